//! The tier registry: the process-wide owner of the current catalog.
//!
//! Readers take a cheap snapshot (`Arc<Catalog>`) and never block behind a
//! reload for longer than a pointer swap. A reload parses and validates the
//! new document completely before the swap; on failure the previous catalog
//! stays in place and the error is logged and returned.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use isleforge_types::{GeneratorBundle, GeneratorTier, TierId, WorldContext};

use crate::catalog::{Catalog, CatalogSummary};
use crate::error::CatalogError;
use crate::source::CatalogSource;

/// Holds the active catalog and swaps it atomically on reload.
#[derive(Debug, Default)]
pub struct TierRegistry {
    current: RwLock<Arc<Catalog>>,
    /// Tiers already reported for an empty output table since the last swap.
    warned_empty: Mutex<BTreeSet<TierId>>,
}

impl TierRegistry {
    /// A registry serving an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry serving `catalog`.
    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
            warned_empty: Mutex::new(BTreeSet::new()),
        }
    }

    /// Load a fresh catalog from `source` and swap it in.
    ///
    /// # Errors
    ///
    /// Returns the [`CatalogError`] that rejected the document. The
    /// previously loaded catalog is kept unchanged in that case.
    pub fn load_all(&self, source: &dyn CatalogSource) -> Result<CatalogSummary, CatalogError> {
        let origin = source.describe();
        let built = source
            .read_document()
            .and_then(|document| Catalog::from_document(&document));
        match built {
            Ok(catalog) => Ok(self.replace(catalog)),
            Err(e) => {
                tracing::error!(
                    source = %origin,
                    error = %e,
                    "Catalog load rejected, keeping previous catalog"
                );
                Err(e)
            }
        }
    }

    /// Swap in an already built catalog.
    pub fn replace(&self, catalog: Catalog) -> CatalogSummary {
        let summary = catalog.summary();
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *current = Arc::new(catalog);
        }
        self.warned_empty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        tracing::info!(
            global_tiers = summary.global_tiers,
            global_bundles = summary.global_bundles,
            game_modes = summary.game_mode_tiers.len(),
            "Generator catalog loaded"
        );
        for tier in &summary.empty_output_tiers {
            tracing::warn!(tier = %tier, "Tier has an empty output table and will never generate");
        }
        summary
    }

    /// The current catalog. Stays valid across later reloads.
    pub fn snapshot(&self) -> Arc<Catalog> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Look up a tier without a world context.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<GeneratorTier>> {
        self.snapshot().tier(id).cloned()
    }

    /// Look up a tier as `world` sees it.
    pub fn get_in_world(&self, world: &WorldContext, id: &str) -> Option<Arc<GeneratorTier>> {
        self.snapshot().tier_in(world, id).cloned()
    }

    /// All tiers visible in `world`, in registry order.
    pub fn all_for_world(&self, world: &WorldContext) -> Arc<[Arc<GeneratorTier>]> {
        self.snapshot().tiers_for(world)
    }

    /// All bundles visible in `world`.
    pub fn all_bundles(&self, world: &WorldContext) -> Vec<Arc<GeneratorBundle>> {
        self.snapshot().bundles_for(world)
    }

    /// Record that `tier` was hit with an empty output table. Returns `true`
    /// the first time for each tier per loaded catalog, so callers warn once.
    pub fn note_empty_output(&self, tier: &TierId) -> bool {
        self.warned_empty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tier.clone())
    }
}
