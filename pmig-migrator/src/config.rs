//! Configuration resolution for pmig-migrator
//!
//! Provides tiered resolution with CLI → ENV → TOML → default priority.
//! Command-line and environment values arrive already merged by clap, so
//! this module only has to layer them over the TOML file.

use crate::error::{MigrationError, MigrationResult};
use pmig_common::config::{ProcessingConfig, ProcessingOverrides, StoreConfig, TomlConfig};
use tracing::{info, warn};

/// Store settings collected from the command line / environment
#[derive(Debug, Clone, Default)]
pub struct StoreOverrides {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
}

/// Fully resolved migrator configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MigratorConfig {
    pub store: StoreConfig,
    pub processing: ProcessingConfig,
    pub log_level: String,
}

/// Layer CLI / ENV values over a loaded TOML config
pub fn resolve_config(
    toml_config: TomlConfig,
    processing: &ProcessingOverrides,
    store: &StoreOverrides,
) -> MigrationResult<MigratorConfig> {
    let processing = toml_config.processing.with_overrides(processing);
    processing.validate()?;

    let mut store_config = toml_config.store;
    if let Some(url) = store.base_url.as_deref().filter(|u| is_valid_value(u)) {
        store_config.base_url = url.trim().to_string();
    }
    if store_config.base_url.trim().is_empty() {
        return Err(MigrationError::Config("Store base URL is empty".to_string()));
    }
    store_config.api_token = resolve_api_token(store.api_token.as_deref(), &store_config);

    Ok(MigratorConfig {
        store: store_config,
        processing,
        log_level: toml_config.logging.level,
    })
}

/// Resolve the API token
///
/// **Priority:** CLI / ENV → TOML
pub fn resolve_api_token(override_token: Option<&str>, toml_store: &StoreConfig) -> Option<String> {
    let override_token = override_token.filter(|t| is_valid_value(t));
    let toml_token = toml_store.token();

    if override_token.is_some() && toml_token.is_some() {
        warn!(
            "API token found in both command line/environment and TOML. \
             Using command line/environment."
        );
    }

    if let Some(token) = override_token {
        info!("API token loaded from command line/environment");
        return Some(token.trim().to_string());
    }

    if let Some(token) = toml_token {
        info!("API token loaded from TOML config");
        return Some(token.to_string());
    }

    warn!("No API token configured, store requests will be anonymous");
    None
}

/// Non-empty, non-whitespace
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmig_common::config::ProcessMode;

    fn toml_with_token(token: Option<&str>) -> TomlConfig {
        let mut config = TomlConfig::default();
        config.store.api_token = token.map(str::to_string);
        config
    }

    #[test]
    fn test_defaults_pass_through() {
        let resolved = resolve_config(
            TomlConfig::default(),
            &ProcessingOverrides::default(),
            &StoreOverrides::default(),
        )
        .unwrap();

        assert_eq!(resolved.processing, ProcessingConfig::default());
        assert_eq!(resolved.store.base_url, "http://localhost:1337");
        assert_eq!(resolved.store.api_token, None);
        assert_eq!(resolved.log_level, "info");
    }

    #[test]
    fn test_overrides_win_over_toml() {
        let mut toml_config = toml_with_token(Some("from-toml"));
        toml_config.processing.batch_size = 10;
        toml_config.store.base_url = "http://toml:1337".to_string();

        let resolved = resolve_config(
            toml_config,
            &ProcessingOverrides {
                process_mode: Some(ProcessMode::Parallel),
                batch_size: Some(25),
                ..Default::default()
            },
            &StoreOverrides {
                base_url: Some("http://cli:1337".to_string()),
                api_token: Some("from-cli".to_string()),
            },
        )
        .unwrap();

        assert_eq!(resolved.processing.process_mode, ProcessMode::Parallel);
        assert_eq!(resolved.processing.batch_size, 25);
        assert_eq!(resolved.store.base_url, "http://cli:1337");
        assert_eq!(resolved.store.api_token.as_deref(), Some("from-cli"));
    }

    #[test]
    fn test_blank_override_token_falls_back_to_toml() {
        let store = toml_with_token(Some("from-toml")).store;
        assert_eq!(resolve_api_token(Some("   "), &store).as_deref(), Some("from-toml"));
        assert_eq!(resolve_api_token(None, &toml_with_token(Some("")).store), None);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let result = resolve_config(
            TomlConfig::default(),
            &ProcessingOverrides {
                batch_size: Some(0),
                ..Default::default()
            },
            &StoreOverrides::default(),
        );
        assert!(matches!(result, Err(MigrationError::Common(_))));
    }
}
