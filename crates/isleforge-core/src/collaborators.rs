//! Contracts the engine consumes from the host.
//!
//! The engine never talks to the game server, the leveling service, or the
//! currency backend directly. It calls these traits, which the host
//! implements. All methods are synchronous and must not block on I/O: they
//! are called from the generation hot path and from inside per-parcel
//! critical sections.
//!
//! In-memory implementations are provided for tests and local hosts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

use rust_decimal::Decimal;

use isleforge_types::{BlockPos, ParcelId, PlayerId, WorldContext};

/// Supplies the numeric level of a parcel.
pub trait LevelProvider: Send + Sync {
    /// Current level of `parcel` in `world`.
    fn level(&self, parcel: ParcelId, world: &WorldContext) -> u64;
}

/// The currency backend.
pub trait Economy: Send + Sync {
    /// Whether `player` holds at least `amount`.
    fn has_balance(&self, player: PlayerId, amount: Decimal) -> bool;

    /// Withdraw `amount` from `player`. Returns whether the withdrawal
    /// happened.
    fn withdraw(&self, player: PlayerId, amount: Decimal) -> bool;
}

/// Parcel ownership and membership lookup.
pub trait ParcelDirectory: Send + Sync {
    /// The parcel covering `position` in `world`, if any.
    fn owner_at(&self, world: &WorldContext, position: &BlockPos) -> Option<ParcelId>;

    /// Every member of `parcel`.
    fn members(&self, parcel: ParcelId) -> BTreeSet<PlayerId>;

    /// Whether at least one member of `parcel` is online.
    fn is_any_member_online(&self, parcel: ParcelId) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Levels held in a map; unknown parcels are level 0.
#[derive(Debug, Default)]
pub struct InMemoryLevels {
    levels: RwLock<BTreeMap<ParcelId, u64>>,
}

impl InMemoryLevels {
    /// An empty level table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the level of `parcel`.
    pub fn set(&self, parcel: ParcelId, level: u64) {
        self.levels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(parcel, level);
    }
}

impl LevelProvider for InMemoryLevels {
    fn level(&self, parcel: ParcelId, _world: &WorldContext) -> u64 {
        self.levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&parcel)
            .copied()
            .unwrap_or(0)
    }
}

/// A square parcel region centered on a block position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParcelRegion {
    /// The parcel owning the region.
    pub parcel: ParcelId,
    /// World name the region lives in.
    pub world: String,
    /// Region center.
    pub center: BlockPos,
    /// Half the side length, in blocks.
    pub radius: u32,
}

impl ParcelRegion {
    fn contains(&self, world: &WorldContext, position: &BlockPos) -> bool {
        let within = |a: i32, b: i32| a.abs_diff(b) <= self.radius;
        self.world == world.world
            && within(position.x, self.center.x)
            && within(position.z, self.center.z)
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    regions: Vec<ParcelRegion>,
    members: BTreeMap<ParcelId, BTreeSet<PlayerId>>,
    online: BTreeSet<PlayerId>,
}

/// Parcel regions, memberships, and online players held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parcel region.
    pub fn add_region(&self, region: ParcelRegion) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .regions
            .push(region);
    }

    /// Add `player` as a member of `parcel`.
    pub fn add_member(&self, parcel: ParcelId, player: PlayerId) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .entry(parcel)
            .or_default()
            .insert(player);
    }

    /// Mark `player` online or offline.
    pub fn set_online(&self, player: PlayerId, online: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if online {
            state.online.insert(player);
        } else {
            state.online.remove(&player);
        }
    }
}

impl ParcelDirectory for InMemoryDirectory {
    fn owner_at(&self, world: &WorldContext, position: &BlockPos) -> Option<ParcelId> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .regions
            .iter()
            .find(|region| region.contains(world, position))
            .map(|region| region.parcel)
    }

    fn members(&self, parcel: ParcelId) -> BTreeSet<PlayerId> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .get(&parcel)
            .cloned()
            .unwrap_or_default()
    }

    fn is_any_member_online(&self, parcel: ParcelId) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .members
            .get(&parcel)
            .is_some_and(|members| members.iter().any(|m| state.online.contains(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_parcel_is_level_zero() {
        let levels = InMemoryLevels::new();
        let parcel = ParcelId::new();
        let world = WorldContext::new("world");
        assert_eq!(levels.level(parcel, &world), 0);
        levels.set(parcel, 12);
        assert_eq!(levels.level(parcel, &world), 12);
    }

    #[test]
    fn region_lookup_is_per_world_and_inclusive() {
        let directory = InMemoryDirectory::new();
        let parcel = ParcelId::new();
        directory.add_region(ParcelRegion {
            parcel,
            world: "world".to_owned(),
            center: BlockPos::new(0, 64, 0),
            radius: 50,
        });

        let world = WorldContext::new("world");
        assert_eq!(directory.owner_at(&world, &BlockPos::new(50, 10, -50)), Some(parcel));
        assert_eq!(directory.owner_at(&world, &BlockPos::new(51, 10, 0)), None);
        let other = WorldContext::new("nether");
        assert_eq!(directory.owner_at(&other, &BlockPos::new(0, 64, 0)), None);
    }

    #[test]
    fn online_check_considers_members_only() {
        let directory = InMemoryDirectory::new();
        let parcel = ParcelId::new();
        let member = PlayerId::new();
        let stranger = PlayerId::new();
        directory.add_member(parcel, member);

        directory.set_online(stranger, true);
        assert!(!directory.is_any_member_online(parcel));
        directory.set_online(member, true);
        assert!(directory.is_any_member_online(parcel));
        directory.set_online(member, false);
        assert!(!directory.is_any_member_online(parcel));
        assert_eq!(directory.members(parcel).len(), 1);
    }
}
