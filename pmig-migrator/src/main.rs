//! Participant migrator (pmig) - Main entry point
//!
//! Loads a participant CSV (and optionally CCT reference data) into the
//! content store: analysis, entity creation, then per-row batch migration.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pmig_common::config::{
    load_toml_config, resolve_config_path, write_toml_config, ProcessMode, ProcessingOverrides,
    TomlConfig,
};
use pmig_common::events::EventBus;
use pmig_migrator::config::{resolve_config, StoreOverrides};
use pmig_migrator::models::MigrationReport;
use pmig_migrator::store::{HttpStore, MemoryStore};
use pmig_migrator::{RemoteStore, WorkflowOrchestrator};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for pmig
#[derive(Parser, Debug)]
#[command(name = "pmig")]
#[command(about = "Migrate participant spreadsheets into the content store")]
#[command(version)]
struct Args {
    /// Participant CSV file
    #[arg(
        short,
        long,
        env = "PMIG_PARTICIPANTS",
        required_unless_present = "init_config"
    )]
    participants: Option<PathBuf>,

    /// CCT reference CSV file
    #[arg(short, long, env = "PMIG_REFERENCE")]
    reference: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, env = "PMIG_CONFIG")]
    config: Option<PathBuf>,

    /// Row dispatch mode within a batch (parallel or sequential)
    #[arg(long, env = "PMIG_MODE")]
    mode: Option<ProcessMode>,

    /// Skip existence checks before participation and email creation
    /// (`--omit-get` alone means true)
    #[arg(
        long,
        env = "PMIG_OMIT_GET",
        num_args = 0..=1,
        require_equals = true,
        value_parser = clap::builder::BoolishValueParser::new(),
        default_missing_value = "true"
    )]
    omit_get: Option<bool>,

    /// Rows per batch
    #[arg(long, env = "PMIG_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Processed rows between progress reports
    #[arg(long, env = "PMIG_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Content store base URL
    #[arg(long, env = "PMIG_API_URL")]
    api_url: Option<String>,

    /// Content store API token
    #[arg(long, env = "PMIG_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Where to write the JSON run report
    #[arg(long, default_value = "migration-report.json", env = "PMIG_REPORT")]
    report: PathBuf,

    /// Run against an in-memory store instead of the remote API
    #[arg(long)]
    dry_run: bool,

    /// Write a default TOML config to this path and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,
}

impl Args {
    fn processing_overrides(&self) -> ProcessingOverrides {
        ProcessingOverrides {
            process_mode: self.mode,
            omit_get: self.omit_get,
            batch_size: self.batch_size,
            chunk_size: self.chunk_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // TOML is read first so its log level can seed the filter
    let config_path = resolve_config_path(args.config.as_deref());
    let toml_config =
        load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&toml_config.logging.level))
                .unwrap_or_else(|_| "pmig_migrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting pmig v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file, using built-in defaults"),
    }

    if let Some(path) = &args.init_config {
        write_toml_config(&TomlConfig::default(), path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Default configuration written to {}", path.display());
        return Ok(());
    }

    let Some(participants_path) = args.participants.clone() else {
        anyhow::bail!("--participants is required");
    };

    let processing_overrides = args.processing_overrides();
    let store_overrides = StoreOverrides {
        base_url: args.api_url.clone(),
        api_token: args.api_token.clone(),
    };
    let config = resolve_config(toml_config, &processing_overrides, &store_overrides)
        .context("Invalid configuration")?;

    info!(
        mode = %config.processing.process_mode,
        omit_get = config.processing.omit_get,
        batch_size = config.processing.batch_size,
        chunk_size = config.processing.chunk_size,
        "Processing configuration resolved"
    );

    let store: Arc<dyn RemoteStore> = if args.dry_run {
        warn!("Dry run: writing to an in-memory store, nothing reaches {}", config.store.base_url);
        Arc::new(MemoryStore::new())
    } else {
        info!("Content store: {}", config.store.base_url);
        Arc::new(
            HttpStore::new(&config.store)
                .context("Failed to initialize content store client")?,
        )
    };

    let event_bus = EventBus::new(1000);
    let mut events = event_bus.subscribe();
    let forwarder = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(event = event.event_type(), "{:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event log lagged, {} events skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let orchestrator = WorkflowOrchestrator::new(store, config.processing.clone(), event_bus)?;

    let participants = File::open(&participants_path)
        .with_context(|| format!("Failed to open {}", participants_path.display()))?;
    let mut reference = match &args.reference {
        Some(path) => Some(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => None,
    };

    let result = orchestrator
        .execute_migration(
            BufReader::new(participants),
            reference.as_mut().map(|r| r as &mut dyn Read),
        )
        .await;

    // Dropping the orchestrator closes the event bus and ends the forwarder
    drop(orchestrator);
    if let Err(e) = forwarder.await {
        warn!("Event forwarder ended abnormally: {}", e);
    }

    match result {
        Ok(report) => {
            write_report(&args.report, &report)?;
            info!(
                "Migration finished: {} records, {} succeeded, {} failed. Report: {}",
                report.summary.total_records,
                report.summary.success_count,
                report.summary.error_count,
                args.report.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e).context("Migration failed")
        }
    }
}

/// Hand the report to the external reporter as pretty JSON
fn write_report(path: &Path, report: &MigrationReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["pmig", "--participants", "rows.csv"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_omit_get_flag_forms() {
        assert_eq!(parse(&[]).omit_get, None);
        assert_eq!(parse(&["--omit-get"]).omit_get, Some(true));
        assert_eq!(parse(&["--omit-get=false"]).omit_get, Some(false));
    }

    #[test]
    fn test_explicit_false_overrides_toml_omit_get() {
        let mut toml_config = TomlConfig::default();
        toml_config.processing.omit_get = true;

        let overrides = parse(&["--omit-get=false"]).processing_overrides();
        let processing = toml_config.processing.with_overrides(&overrides);

        assert!(!processing.omit_get);
    }

    #[test]
    fn test_init_config_needs_no_participants() {
        let args = Args::try_parse_from(["pmig", "--init-config", "pmig.toml"]).unwrap();
        assert_eq!(args.participants, None);
        assert_eq!(args.init_config, Some(PathBuf::from("pmig.toml")));
        assert!(Args::try_parse_from(["pmig"]).is_err());
    }
}
