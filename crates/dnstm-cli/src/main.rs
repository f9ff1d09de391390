//! dnstm - DNS tunnel manager CLI

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dnstm_cli::{
    stdout_sink, BackendCommands, Cli, Commands, DnsrouterCommands, OutputSink, TunnelCommands,
};
use dnstm_config::{ConfigStore, Topology, TransportKind};
use dnstm_core::{Host, NewTunnel, Orchestrator};
use dnstm_router::{RouteTable, RouterServer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Dnsrouter { command } => handle_dnsrouter_command(command).await,
        command => {
            let mut out = stdout_sink();
            let result = run_command(&cli.config, command, out.as_mut());
            out.finish()?;
            result
        }
    }
}

fn run_command(config_path: &Path, command: Commands, out: &mut dyn OutputSink) -> Result<()> {
    let store = ConfigStore::new(config_path);
    let program = std::env::current_exe().context("Failed to locate the dnstm binary")?;
    let host = Host::system(&store, program);
    let mut orchestrator = Orchestrator::load(store, host)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    debug!("Loaded configuration from {:?}", config_path);

    match command {
        Commands::Status => handle_status(&orchestrator, out),
        Commands::Start => handle_start(&mut orchestrator, out),
        Commands::Stop => handle_stop(&mut orchestrator, out),
        Commands::Restart => handle_restart(&mut orchestrator, out),
        Commands::Mode { mode } => handle_mode(&mut orchestrator, mode, out),
        Commands::Switch { tag } => handle_switch(&mut orchestrator, &tag, out),
        Commands::Default { tag } => handle_default(&mut orchestrator, &tag, out),
        Commands::Tunnel { command } => handle_tunnel_command(&mut orchestrator, command, out),
        Commands::Backend { command } => handle_backend_command(&mut orchestrator, command, out),
        Commands::Uninstall => handle_uninstall(&mut orchestrator, config_path, out),
        Commands::Dnsrouter { .. } => {
            anyhow::bail!("dnsrouter commands do not use the configuration file")
        }
    }
}

fn handle_status(orchestrator: &Orchestrator, out: &mut dyn OutputSink) -> Result<()> {
    out.text(&orchestrator.status().to_string())?;
    Ok(())
}

fn handle_start(orchestrator: &mut Orchestrator, out: &mut dyn OutputSink) -> Result<()> {
    let report = orchestrator.start()?;
    out.report(&report)?;
    out.success(&format!("Started {} mode", orchestrator.config().topology()))?;
    Ok(())
}

fn handle_stop(orchestrator: &mut Orchestrator, out: &mut dyn OutputSink) -> Result<()> {
    let report = orchestrator.stop()?;
    out.report(&report)?;
    out.success("Stopped all tunnels and the DNS router")?;
    Ok(())
}

fn handle_restart(orchestrator: &mut Orchestrator, out: &mut dyn OutputSink) -> Result<()> {
    let report = orchestrator.restart()?;
    out.report(&report)?;
    out.success(&format!("Restarted {} mode", orchestrator.config().topology()))?;
    Ok(())
}

fn handle_mode(
    orchestrator: &mut Orchestrator,
    mode: Topology,
    out: &mut dyn OutputSink,
) -> Result<()> {
    let current = orchestrator.config().topology();
    if current == mode {
        out.success(&format!("Already in {} mode", mode))?;
        return Ok(());
    }

    out.step(&format!("Switching from {} to {} mode", current, mode))?;
    let report = orchestrator.switch_topology(mode)?;
    out.report(&report)?;

    let config = orchestrator.config();
    match mode {
        Topology::Single => out.step(&format!("Active tunnel: {}", config.route.active))?,
        Topology::Multi => {
            let routed = config.enabled_tunnels().count();
            out.step(&format!(
                "DNS router on {} with {} route(s)",
                config.listen.address, routed
            ))?;
        }
    }
    out.success(&format!("Switched to {} mode", mode))?;
    Ok(())
}

fn handle_switch(
    orchestrator: &mut Orchestrator,
    tag: &str,
    out: &mut dyn OutputSink,
) -> Result<()> {
    let report = orchestrator.switch_active(tag)?;
    out.report(&report)?;
    out.success(&format!("Active tunnel is now '{}'", tag))?;
    Ok(())
}

fn handle_default(
    orchestrator: &mut Orchestrator,
    tag: &str,
    out: &mut dyn OutputSink,
) -> Result<()> {
    let report = orchestrator.set_default_route(tag)?;
    out.report(&report)?;
    out.success(&format!("Default route is now '{}'", tag))?;
    Ok(())
}

fn handle_tunnel_command(
    orchestrator: &mut Orchestrator,
    command: TunnelCommands,
    out: &mut dyn OutputSink,
) -> Result<()> {
    match command {
        TunnelCommands::Add {
            transport,
            domain,
            backend,
            tag,
            port,
            mtu,
        } => {
            let mut request = NewTunnel::new(transport, backend, domain);
            if let Some(tag) = tag {
                request = request.with_tag(tag);
            }
            if let Some(port) = port {
                request = request.with_port(port);
            }
            if let Some(mtu) = mtu {
                request = request.with_mtu(mtu);
            }
            handle_add_tunnel(orchestrator, request, out)
        }
        TunnelCommands::Remove { tag } => {
            let report = orchestrator.remove_tunnel(&tag)?;
            out.report(&report)?;
            out.success(&format!("Tunnel '{}' removed", tag))?;
            Ok(())
        }
        TunnelCommands::List => handle_list_tunnels(orchestrator, out),
        TunnelCommands::Enable { tag } => {
            let report = orchestrator.enable_tunnel(&tag)?;
            out.report(&report)?;
            out.success(&format!("Tunnel '{}' enabled", tag))?;
            Ok(())
        }
        TunnelCommands::Disable { tag } => {
            let report = orchestrator.disable_tunnel(&tag)?;
            out.report(&report)?;
            out.success(&format!("Tunnel '{}' disabled", tag))?;
            Ok(())
        }
        TunnelCommands::Logs { tag, lines } => {
            let logs = orchestrator.tunnel_logs(&tag, lines)?;
            out.text(&logs)?;
            Ok(())
        }
    }
}

fn handle_add_tunnel(
    orchestrator: &mut Orchestrator,
    request: NewTunnel,
    out: &mut dyn OutputSink,
) -> Result<()> {
    let added = orchestrator.add_tunnel(request)?;
    let tunnel = &added.tunnel;

    out.step(&format!(
        "{} tunnel for {} on port {}",
        tunnel.transport, tunnel.domain, tunnel.port
    ))?;
    match tunnel.transport {
        TransportKind::Slipstream => out.step(&format!(
            "Certificate fingerprint (SHA-256): {}",
            added.material.fingerprint
        ))?,
        TransportKind::Dnstt => out.step(&format!("Public key: {}", added.material.fingerprint))?,
    }
    out.report(&added.report)?;

    let config = orchestrator.config();
    if config.topology() == Topology::Single && config.route.active != tunnel.tag {
        out.step(&format!("Activate it with: dnstm switch {}", tunnel.tag))?;
    }
    out.success(&format!("Tunnel '{}' added", tunnel.tag))?;
    Ok(())
}

fn handle_list_tunnels(orchestrator: &Orchestrator, out: &mut dyn OutputSink) -> Result<()> {
    let config = orchestrator.config();
    if config.tunnels.is_empty() {
        out.text("No tunnels configured\n")?;
        out.text("Add a tunnel with: dnstm tunnel add --transport <slipstream|dnstt> --domain <domain>\n")?;
        return Ok(());
    }

    let mut text = format!("Configured tunnels ({})\n\n", config.tunnels.len());
    text.push_str(&format!(
        "{:<24} {:<11} {:<28} {:<14} {:<6} ENABLED\n",
        "TAG", "TRANSPORT", "DOMAIN", "BACKEND", "PORT"
    ));
    for tunnel in &config.tunnels {
        text.push_str(&format!(
            "{:<24} {:<11} {:<28} {:<14} {:<6} {}\n",
            tunnel.tag,
            tunnel.transport,
            tunnel.domain,
            tunnel.backend,
            tunnel.port,
            if tunnel.is_enabled() { "yes" } else { "no" }
        ));
    }
    out.text(&text)?;
    Ok(())
}

fn handle_backend_command(
    orchestrator: &mut Orchestrator,
    command: BackendCommands,
    out: &mut dyn OutputSink,
) -> Result<()> {
    match command {
        BackendCommands::Add { tag, address, kind } => {
            orchestrator.add_backend(&tag, kind, &address)?;
            out.success(&format!("Backend '{}' ({}) added: {}", tag, kind, address))?;
        }
        BackendCommands::Remove { tag } => {
            orchestrator.remove_backend(&tag)?;
            out.success(&format!("Backend '{}' removed", tag))?;
        }
        BackendCommands::List => {
            let backends = &orchestrator.config().backends;
            if backends.is_empty() {
                out.text("No backends configured\n")?;
                return Ok(());
            }
            let mut text = format!("{:<24} {:<12} ADDRESS\n", "TAG", "TYPE");
            for backend in backends {
                text.push_str(&format!(
                    "{:<24} {:<12} {}\n",
                    backend.tag, backend.kind, backend.address
                ));
            }
            out.text(&text)?;
        }
    }
    Ok(())
}

fn handle_uninstall(
    orchestrator: &mut Orchestrator,
    config_path: &Path,
    out: &mut dyn OutputSink,
) -> Result<()> {
    let report = orchestrator.uninstall()?;
    out.report(&report)?;
    out.success(&format!(
        "Removed dnstm services; configuration kept at {:?}",
        config_path
    ))?;
    Ok(())
}

async fn handle_dnsrouter_command(command: DnsrouterCommands) -> Result<()> {
    match command {
        DnsrouterCommands::Serve { routes } => {
            let table = RouteTable::load(&routes)
                .with_context(|| format!("Failed to load routing table {:?}", routes))?;
            let server = RouterServer::new(&table).context("Invalid routing table")?;
            info!(
                listen = %server.listen_address(),
                routes = table.routes.len(),
                "Starting DNS router"
            );
            server.run().await.context("DNS router failed")?;
            Ok(())
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
