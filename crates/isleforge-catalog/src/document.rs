//! The catalog document: the structured, id-keyed description of tiers and
//! bundles that a catalog is built from.
//!
//! ```yaml
//! tiers:
//!   basic:
//!     display_name: Basic generator
//!     default: true
//!     required_min_level: -1
//!     blocks: { cobblestone: 80, stone: 20 }
//! bundles:
//!   starter: { tiers: [basic] }
//! game_modes:
//!   skyblock:
//!     tiers: { ... }     # override catalog, wins per id
//!     bundles: { ... }
//! ```
//!
//! Definitions are plain serde structs. Turning them into
//! [`GeneratorTier`]/[`GeneratorBundle`] values validates every field;
//! bundle tier references are resolved separately, once every tier table of
//! the document exists (see [`crate::catalog`]).

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use isleforge_types::{BundleId, GeneratorBundle, GeneratorCategory, GeneratorTier, Material, TierId};

use crate::error::CatalogError;

/// A full catalog document: global tables plus per-game-mode overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogDocument {
    /// Global default tiers keyed by tier id.
    #[serde(default)]
    pub tiers: BTreeMap<String, TierDefinition>,

    /// Global bundles keyed by bundle id.
    #[serde(default)]
    pub bundles: BTreeMap<String, BundleDefinition>,

    /// Override catalogs keyed by game mode name.
    #[serde(default)]
    pub game_modes: BTreeMap<String, GameModeDocument>,
}

impl CatalogDocument {
    /// Parse a document from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Yaml`] if the text is not a valid document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CatalogError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Render the document as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Yaml`] if serialization fails.
    pub fn to_yaml_string(&self) -> Result<String, CatalogError> {
        Ok(serde_yml::to_string(self)?)
    }

    /// Number of tier definitions across the global and override tables.
    pub fn tier_definition_count(&self) -> usize {
        self.game_modes
            .values()
            .fold(self.tiers.len(), |acc, mode| acc.saturating_add(mode.tiers.len()))
    }

    /// Whether the document defines nothing at all.
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty() && self.bundles.is_empty() && self.game_modes.is_empty()
    }
}

/// The override tables of a single game mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameModeDocument {
    /// Tiers keyed by id; an id present here replaces the global one.
    #[serde(default)]
    pub tiers: BTreeMap<String, TierDefinition>,

    /// Bundles keyed by id; an id present here replaces the global one.
    #[serde(default)]
    pub bundles: BTreeMap<String, BundleDefinition>,
}

/// Serialized form of a [`GeneratorTier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierDefinition {
    /// Display name; defaults to the tier id.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Description lines.
    #[serde(default)]
    pub description: Vec<String>,

    /// Event category the tier responds to.
    #[serde(default)]
    pub category: GeneratorCategory,

    /// Ordering and tie-break key.
    #[serde(default)]
    pub priority: i32,

    /// Minimum parcel level; negative means always eligible.
    #[serde(default)]
    pub required_min_level: i64,

    /// Allowed biomes (empty = anywhere).
    #[serde(default)]
    pub required_biomes: BTreeSet<String>,

    /// Required permissions (empty = none).
    #[serde(default)]
    pub required_permissions: BTreeSet<String>,

    /// Purchase cost.
    #[serde(default)]
    pub unlock_cost: Decimal,

    /// Cost per activation.
    #[serde(default)]
    pub activation_cost: Decimal,

    /// Granted to every parcel.
    #[serde(default, rename = "default")]
    pub is_default: bool,

    /// Visible to players.
    #[serde(default = "default_true", rename = "published")]
    pub is_published: bool,

    /// Ordinary outputs: material to weight.
    #[serde(default)]
    pub blocks: BTreeMap<String, u32>,

    /// Treasure outputs: material to weight.
    #[serde(default)]
    pub treasures: BTreeMap<String, u32>,

    /// Probability of a treasure roll.
    #[serde(default)]
    pub treasure_chance: f64,

    /// Largest treasure stack.
    #[serde(default = "default_max_treasure_amount")]
    pub max_treasure_amount: u32,
}

impl Default for TierDefinition {
    fn default() -> Self {
        Self {
            display_name: None,
            description: Vec::new(),
            category: GeneratorCategory::Any,
            priority: 0,
            required_min_level: 0,
            required_biomes: BTreeSet::new(),
            required_permissions: BTreeSet::new(),
            unlock_cost: Decimal::ZERO,
            activation_cost: Decimal::ZERO,
            is_default: false,
            is_published: true,
            blocks: BTreeMap::new(),
            treasures: BTreeMap::new(),
            treasure_chance: 0.0,
            max_treasure_amount: default_max_treasure_amount(),
        }
    }
}

impl TierDefinition {
    /// Validate the definition and build the tier `id` from it.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the id is empty, a weight is zero, a cost
    /// is negative, or the treasure chance is not a probability.
    pub fn to_tier(&self, id: &str, scope: &str) -> Result<GeneratorTier, CatalogError> {
        if id.is_empty() {
            return Err(CatalogError::EmptyId {
                scope: scope.to_owned(),
            });
        }
        let tier_id = TierId::new(id);

        for (field, cost) in [
            ("unlock_cost", self.unlock_cost),
            ("activation_cost", self.activation_cost),
        ] {
            if cost.is_sign_negative() && !cost.is_zero() {
                return Err(CatalogError::NegativeCost {
                    scope: scope.to_owned(),
                    tier: tier_id,
                    field,
                });
            }
        }

        if !self.treasure_chance.is_finite() || !(0.0..=1.0).contains(&self.treasure_chance) {
            return Err(CatalogError::InvalidTreasureChance {
                scope: scope.to_owned(),
                tier: tier_id,
                chance: self.treasure_chance,
            });
        }

        let output_weights = weight_table(&self.blocks, &tier_id, scope)?;
        let treasure_weights = weight_table(&self.treasures, &tier_id, scope)?;

        Ok(GeneratorTier {
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| id.to_owned()),
            id: tier_id,
            description: self.description.clone(),
            category: self.category,
            priority: self.priority,
            required_min_level: self.required_min_level,
            required_biomes: self.required_biomes.clone(),
            required_permissions: self.required_permissions.clone(),
            unlock_cost: self.unlock_cost,
            activation_cost: self.activation_cost,
            is_default: self.is_default,
            is_published: self.is_published,
            output_weights,
            treasure_weights,
            treasure_chance: self.treasure_chance,
            max_treasure_amount: self.max_treasure_amount,
        })
    }
}

impl From<&GeneratorTier> for TierDefinition {
    fn from(tier: &GeneratorTier) -> Self {
        let plain = |table: &BTreeMap<Material, u32>| {
            table
                .iter()
                .map(|(material, weight)| (material.as_str().to_owned(), *weight))
                .collect()
        };
        Self {
            display_name: Some(tier.display_name.clone()),
            description: tier.description.clone(),
            category: tier.category,
            priority: tier.priority,
            required_min_level: tier.required_min_level,
            required_biomes: tier.required_biomes.clone(),
            required_permissions: tier.required_permissions.clone(),
            unlock_cost: tier.unlock_cost,
            activation_cost: tier.activation_cost,
            is_default: tier.is_default,
            is_published: tier.is_published,
            blocks: plain(&tier.output_weights),
            treasures: plain(&tier.treasure_weights),
            treasure_chance: tier.treasure_chance,
            max_treasure_amount: tier.max_treasure_amount,
        }
    }
}

/// Serialized form of a [`GeneratorBundle`]. Tier references are plain ids
/// until the catalog resolves them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleDefinition {
    /// Display name; defaults to the bundle id.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Description lines.
    #[serde(default)]
    pub description: Vec<String>,

    /// Ids of the tiers in the bundle.
    #[serde(default)]
    pub tiers: Vec<String>,
}

impl BundleDefinition {
    /// Build bundle `id`, resolving every tier reference with `known`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownTierReference`] for the first id that
    /// `known` rejects, or [`CatalogError::EmptyId`] for an empty bundle id.
    pub fn resolve(
        &self,
        id: &str,
        scope: &str,
        known: impl Fn(&str) -> bool,
    ) -> Result<GeneratorBundle, CatalogError> {
        if id.is_empty() {
            return Err(CatalogError::EmptyId {
                scope: scope.to_owned(),
            });
        }
        let bundle_id = BundleId::new(id);
        let mut tier_ids = BTreeSet::new();
        for tier in &self.tiers {
            if !known(tier) {
                return Err(CatalogError::UnknownTierReference {
                    scope: scope.to_owned(),
                    bundle: bundle_id,
                    tier: TierId::new(tier.as_str()),
                });
            }
            tier_ids.insert(TierId::new(tier.as_str()));
        }
        Ok(GeneratorBundle {
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| id.to_owned()),
            id: bundle_id,
            description: self.description.clone(),
            tier_ids,
        })
    }
}

fn weight_table(
    raw: &BTreeMap<String, u32>,
    tier: &TierId,
    scope: &str,
) -> Result<BTreeMap<Material, u32>, CatalogError> {
    let mut table = BTreeMap::new();
    for (material, &weight) in raw {
        if weight == 0 {
            return Err(CatalogError::ZeroWeight {
                scope: scope.to_owned(),
                tier: tier.clone(),
                material: Material::new(material.as_str()),
            });
        }
        table.insert(Material::new(material.as_str()), weight);
    }
    Ok(table)
}

const fn default_true() -> bool {
    true
}

const fn default_max_treasure_amount() -> u32 {
    1
}
