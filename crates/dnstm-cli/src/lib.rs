//! dnstm command-line front end
//!
//! Argument definitions and output sinks; the `dnstm` binary wires them to
//! the orchestrator.

pub mod cli;
pub mod output;

pub use cli::{BackendCommands, Cli, Commands, DnsrouterCommands, TunnelCommands};
pub use output::{stdout_sink, LineSink, OutputSink, ProgressSink};
