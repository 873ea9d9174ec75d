//! Integration tests for the configuration system

use hat_battery::config::{ConfigError, DaemonConfig, LogLevel};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

/// Test that configuration can be saved and loaded correctly
#[test]
fn test_config_save_load() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.json");

    let mut config = DaemonConfig::default();
    config.battery.manually_configured = true;
    config.battery.chemistry = Some("lifepo4".to_string());
    config.battery.cell_count_hint = Some(4);
    config.battery.depletion_warning_hours = 8.0;
    config.paths.event_spool = Some(temp_dir.path().join("events.jsonl"));
    config.sampling.interval_secs = 60;
    config.system.log_level = LogLevel::Debug;
    config.system.debug.discharge = true;

    config.save_to_path(&config_path).expect("Failed to save configuration");
    let loaded = DaemonConfig::load_from_path(&config_path).expect("Failed to load configuration");

    assert_eq!(loaded, config);
}

/// Test that default configuration is used when the file doesn't exist
#[test]
fn test_config_default_when_missing() {
    let non_existent_path = PathBuf::from("/non/existent/path/config.json");
    let config = DaemonConfig::load_from_path(&non_existent_path)
        .expect("Loading from non-existent file should return default config");
    assert_eq!(config, DaemonConfig::default());
    assert!(config.validate().is_ok());
}

/// Test that omitted sections and fields fall back to defaults
#[test]
fn test_config_partial_file() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.json");
    fs::write(
        &config_path,
        r#"{ "battery": { "chemistry": "li-ion", "manually_configured": true }, "sampling": { "interval_secs": 30 } }"#,
    )
    .unwrap();

    let config = DaemonConfig::load_from_path(&config_path).unwrap();
    assert_eq!(config.battery.chemistry.as_deref(), Some("li-ion"));
    assert!(config.battery.manually_configured);
    assert!(config.battery.enable_depletion_estimate);
    assert_eq!(config.battery.depletion_history_hours, 24);
    assert_eq!(config.sampling.interval_secs, 30);
    assert_eq!(config.sampling.config_reload_cycles, 30);
    assert_eq!(config.paths, DaemonConfig::default().paths);
}

/// Test that malformed JSON is reported as a parse error
#[test]
fn test_config_parse_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.json");
    fs::write(&config_path, "{ battery: ").unwrap();

    match DaemonConfig::load_from_path(&config_path) {
        Err(ConfigError::Parse(_)) => {}
        other => panic!("expected parse error, got {:?}", other),
    }
}

/// Test that configuration validates values
#[test]
fn test_config_validation() {
    let mut config = DaemonConfig::default();
    config.battery.chemistry = Some("nimh".to_string());
    match config.validate() {
        Err(ConfigError::ValidationFailed(field, reason)) => {
            assert_eq!(field, "battery.chemistry");
            assert!(reason.contains("nimh"));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }

    let mut config = DaemonConfig::default();
    config.sampling.interval_secs = 0;
    match config.validate() {
        Err(ConfigError::ValidationFailed(field, _)) => assert_eq!(field, "sampling.interval_secs"),
        other => panic!("expected validation failure, got {:?}", other),
    }

    let mut config = DaemonConfig::default();
    config.battery.cell_count_hint = Some(0);
    assert!(config.validate().is_err());
}
