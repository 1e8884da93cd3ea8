//! Generator engine service for isleforge.
//!
//! Loads configuration, the tier catalog and every parcel's generator
//! record, then keeps the write-behind persistence running until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `ISLEFORGE_CONFIG` (default `isleforge.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations when a URL is configured,
//!    otherwise fall back to an in-memory repository
//! 4. Run the service loop until shutdown
//! 5. Log the writer's final counters

mod error;
mod service;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use isleforge_core::config::LoggingConfig;
use isleforge_core::{GeneratorConfig, MemoryRepository};
use isleforge_db::{PostgresConfig, PostgresPool};

use crate::error::EngineError;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the catalog, the database or the
/// final flush fails.
#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // Config comes first: it carries the log level.
    let (config, path) = GeneratorConfig::load()?;
    init_logging(&config.logging);

    info!("isleforge-engine starting");
    match &path {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("No configuration file found, using defaults"),
    }

    let stats = if let Some(url) = config.storage.postgres_url.as_deref() {
        let pool = PostgresPool::connect(&PostgresConfig::from_storage(url, &config.storage)).await?;
        pool.run_migrations().await?;
        let result = service::run(&config, Arc::new(pool.repository()), shutdown_signal()).await;
        pool.close().await;
        result?
    } else {
        warn!("No postgres_url configured, generator records will not survive a restart");
        service::run(&config, Arc::new(MemoryRepository::new()), shutdown_signal()).await?
    };

    info!(
        saved = stats.saved,
        deleted = stats.deleted,
        failed = stats.failed,
        "isleforge-engine stopped"
    );
    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C, shutting down");
    }
}
