//! Core data model: catalog entries, per-parcel progression records, and the
//! generation event/output pair exchanged with the host.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{BlockKind, GeneratorCategory};
use crate::ids::{BundleId, Material, ParcelId, TierId};

// ---------------------------------------------------------------------------
// GeneratorTier
// ---------------------------------------------------------------------------

/// An immutable catalog entry describing one generator tier.
///
/// Tiers live in the registry for the lifetime of a loaded catalog and are
/// replaced wholesale on reload; they are never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorTier {
    /// Unique, stable key.
    pub id: TierId,
    /// Name shown to players.
    pub display_name: String,
    /// Description lines shown to players.
    pub description: Vec<String>,
    /// Which generation events the tier responds to.
    pub category: GeneratorCategory,
    /// Ordering and tie-break key; higher wins in multi-active resolution.
    pub priority: i32,
    /// Minimum parcel level needed to unlock. Negative means always eligible.
    pub required_min_level: i64,
    /// Biomes the tier is restricted to (empty = anywhere).
    pub required_biomes: BTreeSet<String>,
    /// Permissions that must all be held to unlock (empty = none).
    pub required_permissions: BTreeSet<String>,
    /// One-off cost to purchase the tier (zero = free).
    pub unlock_cost: Decimal,
    /// Cost charged on every activation.
    pub activation_cost: Decimal,
    /// Granted to every parcel without purchase.
    pub is_default: bool,
    /// Hidden from players entirely when false.
    pub is_published: bool,
    /// Ordinary output table: material to positive weight.
    pub output_weights: BTreeMap<Material, u32>,
    /// Treasure output table: material to positive weight.
    pub treasure_weights: BTreeMap<Material, u32>,
    /// Probability in `[0, 1]` that an event yields treasure instead.
    pub treasure_chance: f64,
    /// Upper bound of the treasure stack size.
    pub max_treasure_amount: u32,
}

impl GeneratorTier {
    /// Create a published, free tier with an empty output table and
    /// otherwise neutral settings.
    pub fn new(id: impl Into<TierId>) -> Self {
        let id = id.into();
        Self {
            display_name: id.as_str().to_owned(),
            id,
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
            output_weights: BTreeMap::new(),
            treasure_weights: BTreeMap::new(),
            treasure_chance: 0.0,
            max_treasure_amount: 0,
        }
    }

    /// Whether the ordinary output table has at least one entry.
    pub fn has_outputs(&self) -> bool {
        !self.output_weights.is_empty()
    }

    /// Whether unlocking the tier costs nothing.
    pub fn is_free(&self) -> bool {
        self.unlock_cost <= Decimal::ZERO
    }

    /// Whether a parcel at `level` meets the minimum level gate.
    pub fn level_satisfied(&self, level: u64) -> bool {
        i64::try_from(level).map_or(true, |level| level >= self.required_min_level)
    }

    /// Whether the tier is allowed in `biome` (an empty restriction set
    /// allows every biome, including an unknown one).
    pub fn biome_allowed(&self, biome: Option<&str>) -> bool {
        if self.required_biomes.is_empty() {
            return true;
        }
        biome.is_some_and(|b| self.required_biomes.contains(b))
    }
}

// ---------------------------------------------------------------------------
// GeneratorBundle
// ---------------------------------------------------------------------------

/// A named, permission-gated grouping of tiers used as a UI filter.
///
/// Bundles carry no progression state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorBundle {
    /// Unique, stable key.
    pub id: BundleId,
    /// Name shown to players.
    pub display_name: String,
    /// Description lines shown to players.
    pub description: Vec<String>,
    /// Tiers in the bundle, resolved against the catalog at load time.
    pub tier_ids: BTreeSet<TierId>,
}

// ---------------------------------------------------------------------------
// ParcelGeneratorData
// ---------------------------------------------------------------------------

/// Mutable, persisted progression record of a single parcel.
///
/// Default tiers are never stored in `unlocked_tier_ids`; they count as
/// unlocked when read. `active_tier_ids` keeps activation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParcelGeneratorData {
    /// The parcel this record belongs to.
    pub owner_id: ParcelId,
    /// Tiers unlocked by purchase, level-up, or grant.
    #[serde(default)]
    pub unlocked_tier_ids: BTreeSet<TierId>,
    /// Active tiers in activation order.
    #[serde(default)]
    pub active_tier_ids: Vec<TierId>,
    /// Per-parcel active slot limit (permission-derived or admin-set).
    #[serde(default)]
    pub slot_limit: Option<u32>,
    /// Per-parcel working range in blocks (permission-derived or admin-set).
    #[serde(default)]
    pub working_range: Option<u32>,
    /// When the record was last changed.
    pub updated_at: DateTime<Utc>,
}

impl ParcelGeneratorData {
    /// Create an empty record for `owner_id`.
    pub fn new(owner_id: ParcelId) -> Self {
        Self {
            owner_id,
            unlocked_tier_ids: BTreeSet::new(),
            active_tier_ids: Vec::new(),
            slot_limit: None,
            working_range: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether `tier` is currently active.
    pub fn is_active(&self, tier: &TierId) -> bool {
        self.active_tier_ids.contains(tier)
    }

    /// Whether `tier` was explicitly unlocked (default tiers are not listed).
    pub fn has_unlocked(&self, tier: &TierId) -> bool {
        self.unlocked_tier_ids.contains(tier)
    }

    /// Number of active tiers.
    pub fn active_count(&self) -> usize {
        self.active_tier_ids.len()
    }

    /// Remove `tier` from the active list. Returns whether it was present.
    pub fn remove_active(&mut self, tier: &TierId) -> bool {
        let before = self.active_tier_ids.len();
        self.active_tier_ids.retain(|id| id != tier);
        self.active_tier_ids.len() != before
    }

    /// Stamp the record as modified now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// World and position
// ---------------------------------------------------------------------------

/// The world a request is made in, with the game mode that owns it.
///
/// The game mode selects which override catalog is merged over the global
/// default catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorldContext {
    /// World name as known by the host.
    pub world: String,
    /// Game mode owning the world, if any.
    pub game_mode: Option<String>,
}

impl WorldContext {
    /// A world without a game mode (global catalog only).
    pub fn new(world: impl Into<String>) -> Self {
        Self {
            world: world.into(),
            game_mode: None,
        }
    }

    /// Attach a game mode.
    #[must_use]
    pub fn with_game_mode(mut self, game_mode: impl Into<String>) -> Self {
        self.game_mode = Some(game_mode.into());
        self
    }
}

/// Integer block coordinate inside a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    /// East-west axis.
    pub x: i32,
    /// Vertical axis.
    pub y: i32,
    /// North-south axis.
    pub z: i32,
}

impl BlockPos {
    /// Construct a position.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

// ---------------------------------------------------------------------------
// Generation event / output
// ---------------------------------------------------------------------------

/// A block-generation event reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEvent {
    /// World of the event.
    pub world: WorldContext,
    /// Where the block forms.
    pub position: BlockPos,
    /// Which block the host would produce by default.
    pub kind: BlockKind,
    /// Biome at the position, if known.
    pub biome: Option<String>,
    /// Distance to the nearest online parcel member, if the host tracks it.
    pub nearest_member_distance: Option<f64>,
    /// Record a resolution trace for this event.
    #[serde(default)]
    pub debug: bool,
}

impl GenerationEvent {
    /// An event with no biome, distance, or debug information.
    pub const fn new(world: WorldContext, position: BlockPos, kind: BlockKind) -> Self {
        Self {
            world,
            position,
            kind,
            biome: None,
            nearest_member_distance: None,
            debug: false,
        }
    }

    /// Attach the biome at the event position.
    #[must_use]
    pub fn in_biome(mut self, biome: impl Into<String>) -> Self {
        self.biome = Some(biome.into());
        self
    }

    /// Attach the nearest-member distance.
    #[must_use]
    pub const fn with_member_distance(mut self, distance: f64) -> Self {
        self.nearest_member_distance = Some(distance);
        self
    }

    /// Request a resolution trace.
    #[must_use]
    pub const fn traced(mut self) -> Self {
        self.debug = true;
        self
    }
}

/// What the engine decided an event produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratedOutput {
    /// Place this block instead of the default.
    Block(Material),
    /// Drop a treasure stack instead of placing a block.
    Treasure {
        /// Item type.
        material: Material,
        /// Stack size, at least 1.
        amount: u32,
    },
}

impl GeneratedOutput {
    /// The material produced, block or treasure.
    pub const fn material(&self) -> &Material {
        match self {
            Self::Block(material) | Self::Treasure { material, .. } => material,
        }
    }

    /// Whether this is a treasure drop.
    pub const fn is_treasure(&self) -> bool {
        matches!(self, Self::Treasure { .. })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn negative_min_level_is_always_satisfied() {
        let mut tier = GeneratorTier::new("fallback");
        tier.required_min_level = -1;
        assert!(tier.level_satisfied(0));
    }

    #[test]
    fn level_gate_is_inclusive() {
        let mut tier = GeneratorTier::new("iron");
        tier.required_min_level = 15;
        assert!(!tier.level_satisfied(14));
        assert!(tier.level_satisfied(15));
        assert!(tier.level_satisfied(u64::MAX));
    }

    #[test]
    fn empty_biome_set_allows_unknown_biome() {
        let tier = GeneratorTier::new("basic");
        assert!(tier.biome_allowed(None));
        assert!(tier.biome_allowed(Some("desert")));
    }

    #[test]
    fn biome_restriction_rejects_unknown_biome() {
        let mut tier = GeneratorTier::new("nether");
        tier.required_biomes.insert("nether_wastes".to_owned());
        assert!(tier.biome_allowed(Some("nether_wastes")));
        assert!(!tier.biome_allowed(Some("plains")));
        assert!(!tier.biome_allowed(None));
    }

    #[test]
    fn free_means_zero_unlock_cost() {
        let mut tier = GeneratorTier::new("gold");
        assert!(tier.is_free());
        tier.unlock_cost = dec!(100);
        assert!(!tier.is_free());
    }

    #[test]
    fn remove_active_keeps_order_of_remaining() {
        let mut data = ParcelGeneratorData::new(ParcelId::new());
        data.active_tier_ids = vec![TierId::new("a"), TierId::new("b"), TierId::new("c")];
        assert!(data.remove_active(&TierId::new("b")));
        assert!(!data.remove_active(&TierId::new("b")));
        assert_eq!(data.active_tier_ids, vec![TierId::new("a"), TierId::new("c")]);
    }

    #[test]
    fn parcel_record_tolerates_missing_optional_fields() {
        let owner = ParcelId::new();
        let json = format!(
            r#"{{"owner_id":"{owner}","updated_at":"2026-01-01T00:00:00Z"}}"#
        );
        let parsed: Result<ParcelGeneratorData, _> = serde_json::from_str(&json);
        let data = parsed.ok();
        assert!(data.as_ref().is_some_and(|d| d.unlocked_tier_ids.is_empty()));
        assert!(data.is_some_and(|d| d.slot_limit.is_none()));
    }
}
