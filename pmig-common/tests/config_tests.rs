//! Tests for configuration loading and priority resolution
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate PMIG_CONFIG are marked with #[serial].

use pmig_common::config::{
    load_toml_config, resolve_config_path, write_toml_config, LoggingConfig, ProcessMode,
    ProcessingConfig, ProcessingOverrides, StoreConfig, TomlConfig, CONFIG_PATH_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_missing_config_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_no_config_path_yields_defaults() {
    let config = load_toml_config(None).unwrap();
    assert_eq!(config.processing.batch_size, 50);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_partial_toml_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pmig.toml");
    std::fs::write(
        &path,
        r#"
[processing]
process_mode = "parallel"
batch_size = 25

[store]
base_url = "https://cms.example.org"
"#,
    )
    .unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.processing.process_mode, ProcessMode::Parallel);
    assert_eq!(config.processing.batch_size, 25);
    assert_eq!(config.processing.chunk_size, 500);
    assert!(!config.processing.omit_get);
    assert_eq!(config.store.base_url, "https://cms.example.org");
    assert_eq!(config.store.requests_per_second, 20);
}

#[test]
fn test_malformed_toml_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[processing\nbatch_size = ").unwrap();

    assert!(load_toml_config(Some(&path)).is_err());
}

#[test]
fn test_write_then_load_preserves_values() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let config = TomlConfig {
        store: StoreConfig {
            base_url: "http://cms:1337".to_string(),
            api_token: Some("secret".to_string()),
            ..Default::default()
        },
        processing: ProcessingConfig {
            process_mode: ProcessMode::Parallel,
            omit_get: true,
            batch_size: 7,
            chunk_size: 70,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    };

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(Some(&path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_cli_overrides_beat_toml_values() {
    let from_toml = ProcessingConfig {
        process_mode: ProcessMode::Parallel,
        batch_size: 100,
        ..Default::default()
    };
    let cli = ProcessingOverrides {
        process_mode: Some(ProcessMode::Sequential),
        batch_size: Some(5),
        ..Default::default()
    };

    let merged = from_toml.with_overrides(&cli);
    assert_eq!(merged.process_mode, ProcessMode::Sequential);
    assert_eq!(merged.batch_size, 5);
}

#[test]
#[serial]
fn test_cli_config_path_has_priority_over_env() {
    env::set_var(CONFIG_PATH_ENV, "/from/env.toml");

    let cli = PathBuf::from("/from/cli.toml");
    let resolved = resolve_config_path(Some(&cli));
    assert_eq!(resolved, Some(cli));

    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_env_config_path_used_without_cli() {
    env::set_var(CONFIG_PATH_ENV, "/from/env.toml");

    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));

    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_blank_env_config_path_ignored() {
    env::set_var(CONFIG_PATH_ENV, "   ");

    let resolved = resolve_config_path(None);
    assert_ne!(resolved, Some(PathBuf::from("   ")));

    env::remove_var(CONFIG_PATH_ENV);
}
