//! Tests for configuration loading and validation

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use tempfile::NamedTempFile;

use wsrelay::config::{Config, ConfigManager};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_valid_config_file() {
    let file = write_config(
        r#"
[server]
bind_host = "127.0.0.1"
port_in = 9000
port_out = 9001
handshake_timeout = "5s"
shutdown_timeout = "2s"

[monitoring]
log_level = "debug"
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert_eq!(config.server.port_in, 9000);
    assert_eq!(config.server.port_out, 9001);
    assert_eq!(config.server.handshake_timeout, Duration::from_secs(5));
    assert_eq!(config.server.shutdown_timeout, Duration::from_secs(2));
    assert_eq!(config.monitoring.log_level, "debug");
    assert!(!config.is_shared_port());
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let config = ConfigManager::load_from_file(Path::new("/nonexistent/wsrelay.toml")).unwrap();
    assert_eq!(config.server.port_in, 8080);
    assert_eq!(config.server.port_out, 8081);
}

#[test]
fn test_malformed_file_is_rejected() {
    let file = write_config("[server]\nport_in = \"not a port\"\n");
    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn test_invalid_log_level_is_rejected() {
    let file = write_config(
        r#"
[server]
bind_host = "0.0.0.0"
port_in = 8080
port_out = 8081
handshake_timeout = "10s"
shutdown_timeout = "5s"

[monitoring]
log_level = "noisy"
"#,
    );

    let err = ConfigManager::load_from_file(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("log_level"));
}

#[test]
fn test_shared_port_configuration() {
    let file = write_config(
        r#"
[server]
bind_host = "0.0.0.0"
port_in = 3000
port_out = 3000
handshake_timeout = "10s"
shutdown_timeout = "5s"

[monitoring]
log_level = "info"
"#,
    );

    let config = ConfigManager::load_from_file(file.path()).unwrap();
    assert!(config.is_shared_port());
}

#[test]
fn test_cli_override_beats_file_value() {
    let file = write_config(
        r#"
[server]
bind_host = "0.0.0.0"
port_in = 9000
port_out = 9001
handshake_timeout = "10s"
shutdown_timeout = "5s"

[monitoring]
log_level = "info"
"#,
    );

    let mut config: Config = ConfigManager::load_from_file(file.path()).unwrap();
    config.merge_with_cli_args(Some(7000), None, Some("127.0.0.1".parse().unwrap()));

    assert_eq!(config.server.port_in, 7000);
    assert_eq!(config.server.port_out, 9001);
    assert_eq!(
        config.server.bind_host,
        "127.0.0.1".parse::<std::net::IpAddr>().unwrap()
    );
}
