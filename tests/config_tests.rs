// Config loading and validation tests

use hostmon::config::AppConfig;

const VALID_CONFIG: &str = r#"
[monitoring]
sample_interval_ms = 500
docker_interval_secs = 5
detect_interval_secs = 30
collect_interval_secs = 10
collect_timeout_secs = 8
stats_log_interval_secs = 60
process_keep = 20

[docker]
socket = "/run/user/1000/docker.sock"

[publishing]
subscriber_buffer = 4

[services.pihole]
password = "hunter2"
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.monitoring.sample_interval_ms, 500);
    assert_eq!(config.monitoring.process_keep, 20);
    assert_eq!(config.docker.socket, "/run/user/1000/docker.sock");
    assert_eq!(config.publishing.subscriber_buffer, 4);
    assert_eq!(config.services.pihole.password, "hunter2");
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = AppConfig::load_from_str("").expect("defaults");
    assert_eq!(config.monitoring.sample_interval_ms, 1000);
    assert_eq!(config.monitoring.docker_interval_secs, 5);
    assert_eq!(config.monitoring.detect_interval_secs, 30);
    assert_eq!(config.monitoring.collect_interval_secs, 10);
    assert_eq!(config.monitoring.collect_timeout_secs, 8);
    assert_eq!(config.monitoring.process_keep, 15);
    assert_eq!(config.docker.socket, "/var/run/docker.sock");
    assert_eq!(config.publishing.subscriber_buffer, 2);
    assert!(config.services.pihole.password.is_empty());
}

#[test]
fn test_partial_section_keeps_other_defaults() {
    let config = AppConfig::load_from_str("[monitoring]\nsample_interval_ms = 250\n").unwrap();
    assert_eq!(config.monitoring.sample_interval_ms, 250);
    assert_eq!(config.monitoring.stats_log_interval_secs, 60);
}

#[test]
fn test_config_validation_rejects_zero_sample_interval() {
    let bad = VALID_CONFIG.replace("sample_interval_ms = 500", "sample_interval_ms = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("sample_interval_ms"));
}

#[test]
fn test_config_validation_rejects_zero_collect_timeout() {
    let bad = VALID_CONFIG.replace("collect_timeout_secs = 8", "collect_timeout_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("collect_timeout_secs"));
}

#[test]
fn test_config_validation_rejects_zero_process_keep() {
    let bad = VALID_CONFIG.replace("process_keep = 20", "process_keep = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("process_keep"));
}

#[test]
fn test_config_validation_rejects_empty_socket() {
    let bad = VALID_CONFIG.replace("socket = \"/run/user/1000/docker.sock\"", "socket = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("docker.socket"));
}

#[test]
fn test_config_validation_rejects_zero_subscriber_buffer() {
    let bad = VALID_CONFIG.replace("subscriber_buffer = 4", "subscriber_buffer = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("subscriber_buffer"));
}

#[test]
fn test_debug_output_redacts_password() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    let debug = format!("{config:?}");
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("<redacted>"));
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load_from_path(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.monitoring.sample_interval_ms, 1000);
}

#[test]
fn test_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    let config = AppConfig::load_from_path(&path).unwrap();
    assert_eq!(config.publishing.subscriber_buffer, 4);
}

#[test]
fn test_malformed_toml_is_an_error() {
    assert!(AppConfig::load_from_str("[monitoring\nsample_interval_ms = ").is_err());
}
