//! The long-running service loop.
//!
//! # Lifecycle
//!
//! 1. Load the catalog: the repository's stored catalog if it has one,
//!    otherwise the YAML file from `catalog.path`
//! 2. Hydrate parcel records from the repository
//! 3. Spawn the persistence writer and wire the engine
//! 4. Loop: periodic full flush, optional catalog reload, until shutdown
//! 5. Final flush, then wait for the writer to drain

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use isleforge_catalog::{CatalogSource, TierRegistry, YamlFileSource};
use isleforge_core::collaborators::{InMemoryDirectory, InMemoryLevels};
use isleforge_core::config::CatalogConfig;
use isleforge_core::persist::WriterStats;
use isleforge_core::{
    Collaborators, EventBus, GeneratorConfig, GeneratorEngine, GeneratorRepository, ParcelStore,
    RetryPolicy, spawn_writer,
};

use crate::error::EngineError;

/// Where the running catalog came from, and so where reloads read.
#[derive(Debug)]
pub enum CatalogOrigin {
    /// The repository's stored catalog.
    Repository,
    /// A YAML file.
    File(YamlFileSource),
}

/// Load the startup catalog into `registry`.
///
/// A missing YAML file starts the service with an empty catalog; an invalid
/// one is an error.
pub async fn load_catalog<R: GeneratorRepository>(
    registry: &TierRegistry,
    repository: &R,
    config: &CatalogConfig,
) -> Result<CatalogOrigin, EngineError> {
    if let Some(document) = repository.load_catalog().await? {
        registry.load_all(&document)?;
        info!("Catalog loaded from repository");
        return Ok(CatalogOrigin::Repository);
    }

    let source = YamlFileSource::new(&config.path);
    if source.path().exists() {
        registry.load_all(&source)?;
        info!(source = %source.describe(), "Catalog loaded");
    } else {
        warn!(
            path = %source.path().display(),
            "Catalog file not found, starting with an empty catalog"
        );
    }
    Ok(CatalogOrigin::File(source))
}

async fn reload_catalog<R: GeneratorRepository>(
    engine: &GeneratorEngine,
    repository: &R,
    origin: &CatalogOrigin,
) {
    let reloaded = match origin {
        CatalogOrigin::Repository => match repository.load_catalog().await {
            Ok(Some(document)) => engine.reload(&document).is_ok(),
            Ok(None) => {
                warn!("Stored catalog disappeared, keeping the current one");
                false
            }
            Err(e) => {
                warn!(error = %e, "Could not read stored catalog, keeping the current one");
                false
            }
        },
        CatalogOrigin::File(source) => source.path().exists() && engine.reload(source).is_ok(),
    };
    if reloaded {
        debug!("Catalog reloaded");
    }
}

fn spawn_event_log(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(
                    parcel = %event.parcel,
                    tier = %event.tier,
                    kind = ?event.kind,
                    "Progression event"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progression event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Run the service until `shutdown` resolves. Returns the writer's final
/// counters.
pub async fn run<R, S>(
    config: &GeneratorConfig,
    repository: Arc<R>,
    shutdown: S,
) -> Result<WriterStats, EngineError>
where
    R: GeneratorRepository,
    S: Future<Output = ()>,
{
    let registry = Arc::new(TierRegistry::new());
    let origin = load_catalog(&registry, repository.as_ref(), &config.catalog).await?;

    let records = repository.load_parcels().await?;
    let (handle, writer) = spawn_writer(
        Arc::clone(&repository),
        RetryPolicy::from_config(&config.storage),
    );
    let store = Arc::new(ParcelStore::new(Some(handle)));
    store.hydrate(records);

    // The standalone service has no game host attached; embedding hosts
    // construct the engine with their own collaborators.
    let engine = GeneratorEngine::new(
        config,
        registry,
        Arc::clone(&store),
        Collaborators {
            levels: Arc::new(InMemoryLevels::new()),
            directory: Arc::new(InMemoryDirectory::new()),
            economy: None,
        },
    );
    let event_log = spawn_event_log(engine.progression().events());

    let flush_period = Duration::from_secs(config.storage.flush_interval_secs.max(1));
    let mut flush = tokio::time::interval(flush_period);
    flush.reset();
    let reload_secs = config.catalog.reload_interval_secs;
    let mut reload = tokio::time::interval(Duration::from_secs(reload_secs.max(1)));
    reload.reset();

    info!(
        parcels = store.len(),
        mode = ?config.resolution.mode,
        flush_interval_secs = config.storage.flush_interval_secs,
        reload_interval_secs = reload_secs,
        "isleforge-engine running"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = flush.tick() => {
                let queued = store.flush_all();
                debug!(queued, "Periodic flush queued");
            }
            _ = reload.tick(), if reload_secs > 0 => {
                reload_catalog(&engine, repository.as_ref(), &origin).await;
            }
        }
    }

    let queued = store.flush_all();
    store.flush().await?;
    drop(engine);
    drop(store);
    event_log.await?;
    let stats = writer.await?;
    info!(
        queued,
        saved = stats.saved,
        failed = stats.failed,
        "Final flush complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use isleforge_catalog::CatalogDocument;
    use isleforge_core::MemoryRepository;
    use isleforge_types::{ParcelGeneratorData, ParcelId, TierId};

    use super::*;

    fn missing_file() -> CatalogConfig {
        CatalogConfig {
            path: std::env::temp_dir().join("isleforge-no-such-catalog.yaml"),
            reload_interval_secs: 0,
        }
    }

    #[tokio::test]
    async fn stored_catalog_wins_over_file() {
        let repository = MemoryRepository::new();
        let yaml = "tiers:\n  a: { blocks: { stone: 1 } }\n";
        let document = CatalogDocument::from_yaml_str(yaml).unwrap_or_default();
        repository.set_catalog(document);

        let registry = TierRegistry::new();
        let origin = load_catalog(&registry, &repository, &missing_file()).await;
        assert!(matches!(origin, Ok(CatalogOrigin::Repository)));
        assert!(registry.get_by_id("a").is_some());
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let registry = TierRegistry::new();
        let origin = load_catalog(&registry, &MemoryRepository::new(), &missing_file()).await;
        assert!(matches!(origin, Ok(CatalogOrigin::File(_))));
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn shutdown_flushes_hydrated_records() {
        let mut record = ParcelGeneratorData::new(ParcelId::new());
        record.unlocked_tier_ids.insert(TierId::new("gold"));
        let owner = record.owner_id;
        let repository = Arc::new(MemoryRepository::with_parcels([record]));

        let mut config = GeneratorConfig::default();
        config.catalog = missing_file();
        let stats = run(&config, Arc::clone(&repository), async {}).await;

        assert_eq!(stats.ok().map(|s| s.saved), Some(1));
        assert!(
            repository
                .stored(owner)
                .is_some_and(|r| r.has_unlocked(&TierId::new("gold")))
        );
    }
}
