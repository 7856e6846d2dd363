//! Tests for CLI configuration and argument parsing.

use crate::commands::parse_override;
use crate::config::{CliConfig, ConfigError, OutputFormat};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = CliConfig::load_from(&dir.path().join("config.yaml")).unwrap();
    assert_eq!(config, CliConfig::default());
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.yaml");

    let mut config = CliConfig::default();
    config.set("backend_url", "https://ci.example.com").unwrap();
    config.set("run_config", "ci/decider.yaml").unwrap();
    config.set("output_format", "json").unwrap();
    config.save_to(&path).unwrap();

    let loaded = CliConfig::load_from(&path).unwrap();
    assert_eq!(loaded.backend_url, "https://ci.example.com");
    assert_eq!(loaded.run_config, Some(PathBuf::from("ci/decider.yaml")));
    assert_eq!(loaded.output_format, OutputFormat::Json);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "token: abc\n").unwrap();

    let config = CliConfig::load_from(&path).unwrap();
    assert_eq!(config.token.as_deref(), Some("abc"));
    assert_eq!(config.backend_url, "http://localhost:8080");
}

#[test]
fn test_set_rejects_unknown_values() {
    let mut config = CliConfig::default();
    assert!(matches!(
        config.set("colour", "red"),
        Err(ConfigError::UnknownKey(_))
    ));
    assert!(matches!(
        config.set("output_format", "xml"),
        Err(ConfigError::InvalidFormat(_))
    ));
}

#[test]
fn test_parse_override() {
    assert_eq!(
        parse_override("NEW_AMI_WORKER_TYPE=win2016-new").unwrap(),
        ("NEW_AMI_WORKER_TYPE".to_string(), "win2016-new".to_string())
    );
    assert_eq!(
        parse_override("EMPTY=").unwrap(),
        ("EMPTY".to_string(), String::new())
    );
    assert!(parse_override("=value").is_err());
    assert!(parse_override("novalue").is_err());
}
