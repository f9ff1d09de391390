//! Loading hand-written configuration files

use dnstm_config::{
    generate_unique_tag, validate_tag, ConfigStore, Enablement, PortAllocator, Topology,
    TransportKind,
};
use tempfile::TempDir;

const HAND_WRITTEN: &str = r#"{
  "listen": { "address": "0.0.0.0:53" },
  "route": { "mode": "multi", "default": "home-dns" },
  "backends": [
    { "tag": "socks", "type": "socks", "address": "127.0.0.1:1080" },
    { "tag": "ssh-box", "type": "ssh", "address": "127.0.0.1:22" }
  ],
  "tunnels": [
    { "tag": "home-dns", "transport": "slipstream", "backend": "socks", "domain": "s.example.com", "port": 5310 },
    { "tag": "work-dns", "transport": "dnstt", "backend": "ssh-box", "domain": "d.example.com", "port": 5312, "enabled": false, "mtu": 900 }
  ]
}"#;

fn write_config(content: &str) -> (ConfigStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    std::fs::write(&path, content).unwrap();
    (ConfigStore::new(path), temp_dir)
}

#[test]
fn test_hand_written_config_loads() {
    let (store, _temp) = write_config(HAND_WRITTEN);
    let config = store.load().unwrap();

    assert_eq!(config.topology(), Topology::Multi);
    assert_eq!(config.route.default, "home-dns");
    assert_eq!(config.route.active, "");
    assert_eq!(config.tunnels.len(), 2);
    assert_eq!(config.tunnels[0].enabled, Enablement::Enabled);
    assert_eq!(config.tunnels[1].transport, TransportKind::Dnstt);
    assert_eq!(config.tunnels[1].mtu(), 900);
    assert_eq!(
        config.enabled_tunnels().map(|t| t.tag.as_str()).collect::<Vec<_>>(),
        vec!["home-dns"]
    );
}

#[test]
fn test_new_tunnel_resources_do_not_collide() {
    let (store, _temp) = write_config(HAND_WRITTEN);
    let config = store.load().unwrap();

    let port = PortAllocator::default().allocate(&config.used_ports()).unwrap();
    assert_eq!(port, 5311);

    let tag = generate_unique_tag(&config.used_tags());
    assert!(validate_tag(&tag).is_ok());
    assert!(config.tunnel(&tag).is_none());
}

#[test]
fn test_multi_config_with_shared_domain_is_rejected() {
    let shared = HAND_WRITTEN.replace("d.example.com", "s.example.com");
    let (store, _temp) = write_config(&shared);
    let err = store.load().unwrap_err();
    assert!(err.to_string().contains("s.example.com"));
}
