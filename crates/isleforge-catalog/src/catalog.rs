//! A validated, immutable catalog built from a [`CatalogDocument`].
//!
//! Building happens in two phases. First every tier table is converted and
//! validated (the global table and each game-mode override table), and the
//! merged per-game-mode tier tables are computed. Only then are bundle tier
//! references resolved by id, against the id space of the scope the bundle
//! lives in. Declaration order inside the document never matters.
//!
//! Each scope's ordered tier list is computed once here, so lookups on the
//! generation hot path are a map access and an `Arc` clone.

use std::collections::BTreeMap;
use std::sync::Arc;

use isleforge_types::{BundleId, GeneratorBundle, GeneratorTier, TierId, WorldContext};

use crate::document::{BundleDefinition, CatalogDocument, TierDefinition};
use crate::error::CatalogError;
use crate::merge::{merge_by_id, ordered};

/// Tiers keyed by id.
pub type TierTable = BTreeMap<TierId, Arc<GeneratorTier>>;

/// Bundles keyed by id.
pub type BundleTable = BTreeMap<BundleId, Arc<GeneratorBundle>>;

/// Scope label used in errors and logs for the global catalog.
const GLOBAL_SCOPE: &str = "global catalog";

/// The tiers and bundles visible in one scope (global, or one game mode
/// with overrides merged in).
#[derive(Debug, Clone, Default)]
struct CatalogView {
    tiers: TierTable,
    ordered: Arc<[Arc<GeneratorTier>]>,
    bundles: BundleTable,
}

impl CatalogView {
    fn new(tiers: TierTable, bundles: BundleTable) -> Self {
        let ordered = ordered(tiers.values()).into();
        Self {
            tiers,
            ordered,
            bundles,
        }
    }
}

/// Counts describing a loaded catalog, logged on every (re)load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSummary {
    /// Tiers in the global catalog.
    pub global_tiers: usize,
    /// Bundles in the global catalog.
    pub global_bundles: usize,
    /// Merged tier count per game mode.
    pub game_mode_tiers: BTreeMap<String, usize>,
    /// Tiers (any scope) whose ordinary output table is empty.
    pub empty_output_tiers: Vec<TierId>,
}

/// An immutable, fully resolved catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    global: CatalogView,
    game_modes: BTreeMap<String, CatalogView>,
}

impl Catalog {
    /// A catalog with no tiers and no bundles.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate `document` and build a catalog from it.
    ///
    /// # Errors
    ///
    /// Returns the first [`CatalogError`] found; nothing is partially built.
    pub fn from_document(document: &CatalogDocument) -> Result<Self, CatalogError> {
        // Phase 1: tier tables.
        let global_tiers = build_tiers(&document.tiers, GLOBAL_SCOPE)?;
        let mut mode_tiers: BTreeMap<String, (TierTable, String)> = BTreeMap::new();
        for (mode, overrides) in &document.game_modes {
            let scope = format!("game mode {mode}");
            let own = build_tiers(&overrides.tiers, &scope)?;
            mode_tiers.insert(mode.clone(), (merge_by_id(&global_tiers, &own), scope));
        }

        // Phase 2: bundle references, resolved against complete tables.
        let global_bundles = build_bundles(&document.bundles, GLOBAL_SCOPE, &global_tiers)?;
        let mut game_modes = BTreeMap::new();
        for (mode, (merged_tiers, scope)) in mode_tiers {
            let own_bundles = document
                .game_modes
                .get(&mode)
                .map(|m| build_bundles(&m.bundles, &scope, &merged_tiers))
                .transpose()?
                .unwrap_or_default();
            let merged_bundles = merge_by_id(&global_bundles, &own_bundles);
            game_modes.insert(mode, CatalogView::new(merged_tiers, merged_bundles));
        }

        Ok(Self {
            global: CatalogView::new(global_tiers, global_bundles),
            game_modes,
        })
    }

    fn view(&self, world: &WorldContext) -> &CatalogView {
        world
            .game_mode
            .as_ref()
            .and_then(|mode| self.game_modes.get(mode))
            .unwrap_or(&self.global)
    }

    /// Every tier visible in `world`, in registry order. Unknown game modes
    /// see the global catalog.
    pub fn tiers_for(&self, world: &WorldContext) -> Arc<[Arc<GeneratorTier>]> {
        Arc::clone(&self.view(world).ordered)
    }

    /// Every bundle visible in `world`, ordered by id.
    pub fn bundles_for(&self, world: &WorldContext) -> Vec<Arc<GeneratorBundle>> {
        self.view(world).bundles.values().cloned().collect()
    }

    /// Look up a tier as `world` sees it (override first).
    pub fn tier_in(&self, world: &WorldContext, id: &str) -> Option<&Arc<GeneratorTier>> {
        self.view(world).tiers.get(id)
    }

    /// Look up a bundle as `world` sees it (override first).
    pub fn bundle_in(&self, world: &WorldContext, id: &str) -> Option<&Arc<GeneratorBundle>> {
        self.view(world).bundles.get(id)
    }

    /// Look up a tier without a world: the global catalog first, then the
    /// override catalogs in game-mode name order.
    pub fn tier(&self, id: &str) -> Option<&Arc<GeneratorTier>> {
        self.global
            .tiers
            .get(id)
            .or_else(|| self.game_modes.values().find_map(|view| view.tiers.get(id)))
    }

    /// Whether the catalog has no tiers in any scope.
    pub fn is_empty(&self) -> bool {
        self.global.tiers.is_empty() && self.game_modes.values().all(|v| v.tiers.is_empty())
    }

    /// Names of the game modes with an override catalog.
    pub fn game_modes(&self) -> impl Iterator<Item = &str> {
        self.game_modes.keys().map(String::as_str)
    }

    /// Summarize the catalog for logging.
    pub fn summary(&self) -> CatalogSummary {
        let mut empty: Vec<TierId> = std::iter::once(&self.global)
            .chain(self.game_modes.values())
            .flat_map(|view| view.tiers.values())
            .filter(|tier| !tier.has_outputs())
            .map(|tier| tier.id.clone())
            .collect();
        empty.sort();
        empty.dedup();

        CatalogSummary {
            global_tiers: self.global.tiers.len(),
            global_bundles: self.global.bundles.len(),
            game_mode_tiers: self
                .game_modes
                .iter()
                .map(|(mode, view)| (mode.clone(), view.tiers.len()))
                .collect(),
            empty_output_tiers: empty,
        }
    }
}

impl TryFrom<&CatalogDocument> for Catalog {
    type Error = CatalogError;

    fn try_from(document: &CatalogDocument) -> Result<Self, Self::Error> {
        Self::from_document(document)
    }
}

fn build_tiers(
    definitions: &BTreeMap<String, TierDefinition>,
    scope: &str,
) -> Result<TierTable, CatalogError> {
    let mut table = TierTable::new();
    for (id, definition) in definitions {
        let tier = definition.to_tier(id, scope)?;
        table.insert(tier.id.clone(), Arc::new(tier));
    }
    Ok(table)
}

fn build_bundles(
    definitions: &BTreeMap<String, BundleDefinition>,
    scope: &str,
    known: &TierTable,
) -> Result<BundleTable, CatalogError> {
    let mut table = BundleTable::new();
    for (id, definition) in definitions {
        let bundle = definition.resolve(id, scope, |tier| known.contains_key(tier))?;
        table.insert(bundle.id.clone(), Arc::new(bundle));
    }
    Ok(table)
}
