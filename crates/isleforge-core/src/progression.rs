//! The progression state machine.
//!
//! Per (parcel, tier) the states are `Locked -> Unlocked -> Active`, with
//! `Active -> Unlocked` on deactivation and no way back to `Locked` short of
//! an administrative wipe. Default tiers start out unlocked.
//!
//! Every transition runs inside the parcel's mutation gate (see
//! [`ParcelStore::update`]): guards, payment, and the record change happen
//! as one step, so rapid repeated commands cannot double-charge or exceed a
//! limit. Results are [`TransitionOutcome`] values, never errors.
//!
//! | Operation        | Guards (in order)                                              |
//! |------------------|----------------------------------------------------------------|
//! | `unlock`         | known, not unlocked, eligible, free                            |
//! | `purchase`       | known, not unlocked, eligible, balance >= unlock cost          |
//! | `activate`       | known, unlocked, not active, slot free, balance >= activation   |
//! | `activate` forced| known, unlocked, not active                                    |
//! | `deactivate`     | active                                                         |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rust_decimal::Decimal;

use isleforge_catalog::TierRegistry;
use isleforge_types::{
    BundleId, GeneratorBundle, GeneratorTier, Material, ParcelGeneratorData, ParcelId, PlayerId,
    TierId, WorldContext,
};

use crate::collaborators::Economy;
use crate::config::ProgressionConfig;
use crate::eligibility::{Ineligible, can_unlock, check_unlock, is_unlocked};
use crate::events::{
    DeactivationReason, EventBus, ProgressionEvent, ProgressionEventKind, UnlockSource,
};
use crate::permissions::{PermissionLimits, effective_slot_limit};
use crate::sampler::{Odds, WeightedTable};
use crate::store::{Mutation, ParcelStore};

// ---------------------------------------------------------------------------
// Context and outcomes
// ---------------------------------------------------------------------------

/// Who is acting on which parcel, and the facts the guards need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionContext {
    /// The parcel whose progression changes.
    pub parcel: ParcelId,
    /// The acting (and paying) player.
    pub player: PlayerId,
    /// The world the request is made in.
    pub world: WorldContext,
    /// Current parcel level.
    pub level: u64,
    /// Biome the player stands in, if known.
    pub biome: Option<String>,
    /// Permissions held by the player.
    pub permissions: BTreeSet<String>,
}

impl ProgressionContext {
    /// A context at level 0 with no biome and no permissions.
    pub const fn new(parcel: ParcelId, player: PlayerId, world: WorldContext) -> Self {
        Self {
            parcel,
            player,
            world,
            level: 0,
            biome: None,
            permissions: BTreeSet::new(),
        }
    }

    /// Set the parcel level.
    #[must_use]
    pub const fn at_level(mut self, level: u64) -> Self {
        self.level = level;
        self
    }

    /// Set the biome.
    #[must_use]
    pub fn in_biome(mut self, biome: impl Into<String>) -> Self {
        self.biome = Some(biome.into());
        self
    }

    /// Add permissions.
    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    fn check(&self, tier: &GeneratorTier) -> Result<(), Ineligible> {
        check_unlock(tier, self.level, self.biome.as_deref(), &self.permissions)
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The tier does not exist in this world or is unpublished.
    UnknownTier,
    /// A level, biome, or permission gate failed.
    Ineligible(Ineligible),
    /// The player cannot afford the cost.
    InsufficientFunds {
        /// The amount that was required.
        required: Decimal,
    },
    /// The economy reported a balance but refused the withdrawal.
    PaymentFailed,
    /// Every active slot is taken.
    SlotLimitExceeded {
        /// The limit in force.
        limit: u32,
    },
    /// The tier must be unlocked first.
    NotUnlocked,
    /// The tier costs money and must be purchased instead.
    RequiresPurchase {
        /// Its unlock cost.
        cost: Decimal,
    },
}

impl BlockReason {
    /// Stable, machine-checkable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownTier => "unknown_tier",
            Self::Ineligible(inner) => inner.code(),
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::PaymentFailed => "payment_failed",
            Self::SlotLimitExceeded { .. } => "slot_limit_exceeded",
            Self::NotUnlocked => "not_unlocked",
            Self::RequiresPurchase { .. } => "requires_purchase",
        }
    }
}

/// Why a transition changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// The tier is already unlocked (or is a default tier).
    AlreadyUnlocked,
    /// The tier is already active.
    AlreadyActive,
    /// The tier is not active.
    NotActive,
}

impl NoOpReason {
    /// Stable, machine-checkable code.
    pub const fn code(self) -> &'static str {
        match self {
            Self::AlreadyUnlocked => "already_unlocked",
            Self::AlreadyActive => "already_active",
            Self::NotActive => "not_active",
        }
    }
}

/// Result of a transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition took effect.
    Success,
    /// A guard refused it.
    Blocked(BlockReason),
    /// Nothing needed to change.
    NoOp(NoOpReason),
}

impl TransitionOutcome {
    /// Stable, machine-checkable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Blocked(reason) => reason.code(),
            Self::NoOp(reason) => reason.code(),
        }
    }

    /// Whether the transition took effect.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<BlockReason> for TransitionOutcome {
    fn from(reason: BlockReason) -> Self {
        Self::Blocked(reason)
    }
}

impl From<NoOpReason> for TransitionOutcome {
    fn from(reason: NoOpReason) -> Self {
        Self::NoOp(reason)
    }
}

/// Result of a guarded step: the amount charged, or the outcome that
/// stopped it.
type Step = Result<Decimal, TransitionOutcome>;

// ---------------------------------------------------------------------------
// Overview types
// ---------------------------------------------------------------------------

/// Progression state of one tier for one parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierState {
    /// Not unlocked yet.
    Locked,
    /// Unlocked, not active.
    Unlocked,
    /// Active.
    Active,
}

/// One row of the tier overview shown to players.
#[derive(Debug, Clone, PartialEq)]
pub struct TierView {
    /// The tier.
    pub tier: Arc<GeneratorTier>,
    /// Its state for the parcel.
    pub state: TierState,
    /// The gate that keeps a locked tier locked, if any.
    pub blocker: Option<Ineligible>,
    /// Ordinary output odds in sampling order.
    pub outputs: Vec<Odds<Material>>,
    /// Treasure odds in sampling order.
    pub treasures: Vec<Odds<Material>>,
}

fn odds(weights: &BTreeMap<Material, u32>) -> Vec<Odds<Material>> {
    WeightedTable::from_map(weights)
        .map(|table| table.percentages())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// ProgressionMachine
// ---------------------------------------------------------------------------

/// Orchestrates unlock, purchase, activation, and limit changes.
#[derive(Clone)]
pub struct ProgressionMachine {
    registry: Arc<TierRegistry>,
    store: Arc<ParcelStore>,
    economy: Option<Arc<dyn Economy>>,
    events: EventBus,
    config: ProgressionConfig,
}

impl std::fmt::Debug for ProgressionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressionMachine")
            .field("has_economy", &self.economy.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProgressionMachine {
    /// Build a machine over shared registry and store. Without an economy
    /// no cost is ever charged.
    pub fn new(
        registry: Arc<TierRegistry>,
        store: Arc<ParcelStore>,
        economy: Option<Arc<dyn Economy>>,
        config: ProgressionConfig,
    ) -> Self {
        Self {
            registry,
            store,
            economy,
            events: EventBus::new(),
            config,
        }
    }

    /// The event bus transitions publish on.
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// The parcel store.
    pub const fn store(&self) -> &Arc<ParcelStore> {
        &self.store
    }

    /// The tier registry.
    pub const fn registry(&self) -> &Arc<TierRegistry> {
        &self.registry
    }

    /// The progression configuration.
    pub const fn config(&self) -> &ProgressionConfig {
        &self.config
    }

    /// Current record of `parcel`.
    pub fn parcel(&self, parcel: ParcelId) -> Arc<ParcelGeneratorData> {
        self.store.snapshot(parcel)
    }

    fn published(&self, world: &WorldContext, id: &str) -> Result<Arc<GeneratorTier>, BlockReason> {
        self.registry
            .get_in_world(world, id)
            .filter(|tier| tier.is_published)
            .ok_or(BlockReason::UnknownTier)
    }

    fn charge(&self, player: PlayerId, amount: Decimal) -> Result<Decimal, BlockReason> {
        if amount <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let Some(economy) = &self.economy else {
            return Ok(Decimal::ZERO);
        };
        if !economy.has_balance(player, amount) {
            return Err(BlockReason::InsufficientFunds { required: amount });
        }
        if !economy.withdraw(player, amount) {
            return Err(BlockReason::PaymentFailed);
        }
        Ok(amount)
    }

    fn finish(
        &self,
        step: Step,
        parcel: ParcelId,
        player: Option<PlayerId>,
        tier: &TierId,
        kind: impl FnOnce(Decimal) -> ProgressionEventKind,
    ) -> TransitionOutcome {
        match step {
            Ok(cost) => {
                self.events.publish(ProgressionEvent::new(
                    parcel,
                    player,
                    tier.clone(),
                    kind(cost),
                ));
                TransitionOutcome::Success
            }
            Err(outcome) => {
                tracing::debug!(
                    parcel = %parcel,
                    tier = %tier,
                    outcome = outcome.code(),
                    "Transition not applied"
                );
                outcome
            }
        }
    }

    /// Unlock a free tier the parcel is eligible for.
    pub fn unlock(&self, ctx: &ProgressionContext, tier_id: &str) -> TransitionOutcome {
        let tier = match self.published(&ctx.world, tier_id) {
            Ok(tier) => tier,
            Err(reason) => return reason.into(),
        };
        let step = self.store.update(ctx.parcel, |data| {
            if is_unlocked(&tier, data) {
                return Mutation::Keep(Err(NoOpReason::AlreadyUnlocked.into()));
            }
            if let Err(why) = ctx.check(&tier) {
                return Mutation::Keep(Err(BlockReason::Ineligible(why).into()));
            }
            if !tier.is_free() {
                return Mutation::Keep(Err(BlockReason::RequiresPurchase {
                    cost: tier.unlock_cost,
                }
                .into()));
            }
            data.unlocked_tier_ids.insert(tier.id.clone());
            Mutation::Commit(Ok(Decimal::ZERO))
        });
        self.finish(step, ctx.parcel, Some(ctx.player), &tier.id, |_| {
            ProgressionEventKind::Unlocked {
                source: UnlockSource::Explicit,
            }
        })
    }

    /// Administratively unlock any existing tier, skipping every guard.
    pub fn grant(&self, parcel: ParcelId, world: &WorldContext, tier_id: &str) -> TransitionOutcome {
        let Some(tier) = self.registry.get_in_world(world, tier_id) else {
            return BlockReason::UnknownTier.into();
        };
        let step = self.store.update(parcel, |data| {
            if is_unlocked(&tier, data) {
                return Mutation::Keep(Err(NoOpReason::AlreadyUnlocked.into()));
            }
            data.unlocked_tier_ids.insert(tier.id.clone());
            Mutation::Commit(Ok(Decimal::ZERO))
        });
        if step.is_ok() {
            tracing::info!(parcel = %parcel, tier = %tier.id, "Tier granted");
        }
        self.finish(step, parcel, None, &tier.id, |_| ProgressionEventKind::Unlocked {
            source: UnlockSource::Granted,
        })
    }

    /// Buy a tier: eligibility, then balance, then withdrawal, then unlock.
    pub fn purchase(&self, ctx: &ProgressionContext, tier_id: &str) -> TransitionOutcome {
        let tier = match self.published(&ctx.world, tier_id) {
            Ok(tier) => tier,
            Err(reason) => return reason.into(),
        };
        let step = self.store.update(ctx.parcel, |data| {
            if is_unlocked(&tier, data) {
                return Mutation::Keep(Err(NoOpReason::AlreadyUnlocked.into()));
            }
            if let Err(why) = ctx.check(&tier) {
                return Mutation::Keep(Err(BlockReason::Ineligible(why).into()));
            }
            match self.charge(ctx.player, tier.unlock_cost) {
                Ok(cost) => {
                    data.unlocked_tier_ids.insert(tier.id.clone());
                    Mutation::Commit(Ok(cost))
                }
                Err(reason) => Mutation::Keep(Err(reason.into())),
            }
        });
        if let Ok(cost) = step {
            tracing::info!(
                parcel = %ctx.parcel,
                player = %ctx.player,
                tier = %tier.id,
                cost = %cost,
                "Tier purchased"
            );
        }
        self.finish(step, ctx.parcel, Some(ctx.player), &tier.id, |cost| {
            ProgressionEventKind::Purchased { cost }
        })
    }

    /// Activate an unlocked tier.
    ///
    /// With `bypass` set, the slot limit and the activation cost are skipped;
    /// the tier must still be unlocked. A forced activation may therefore
    /// leave the parcel above its slot limit until limits are next refreshed.
    pub fn activate(
        &self,
        ctx: &ProgressionContext,
        tier_id: &str,
        bypass: bool,
    ) -> TransitionOutcome {
        let tier = match self.published(&ctx.world, tier_id) {
            Ok(tier) => tier,
            Err(reason) => return reason.into(),
        };
        let default_slots = self.config.default_active_slots;
        let step = self.store.update(ctx.parcel, |data| {
            if !is_unlocked(&tier, data) {
                return Mutation::Keep(Err(BlockReason::NotUnlocked.into()));
            }
            if data.is_active(&tier.id) {
                return Mutation::Keep(Err(NoOpReason::AlreadyActive.into()));
            }
            let cost = if bypass {
                Decimal::ZERO
            } else {
                let limit = effective_slot_limit(default_slots, data.slot_limit);
                let active = u32::try_from(data.active_count()).unwrap_or(u32::MAX);
                if active >= limit {
                    return Mutation::Keep(Err(BlockReason::SlotLimitExceeded { limit }.into()));
                }
                match self.charge(ctx.player, tier.activation_cost) {
                    Ok(cost) => cost,
                    Err(reason) => return Mutation::Keep(Err(reason.into())),
                }
            };
            data.active_tier_ids.push(tier.id.clone());
            Mutation::Commit(Ok(cost))
        });
        self.finish(step, ctx.parcel, Some(ctx.player), &tier.id, |cost| {
            ProgressionEventKind::Activated {
                cost,
                bypassed: bypass,
            }
        })
    }

    /// Deactivate a tier. Only requires the tier to be active; it does not
    /// need to exist in the catalog any more.
    pub fn deactivate(
        &self,
        parcel: ParcelId,
        player: Option<PlayerId>,
        tier_id: &str,
    ) -> TransitionOutcome {
        let id = TierId::new(tier_id);
        if !self.store.snapshot(parcel).is_active(&id) {
            return NoOpReason::NotActive.into();
        }
        let step = self.store.update(parcel, |data| {
            if data.remove_active(&id) {
                Mutation::Commit(Ok(Decimal::ZERO))
            } else {
                Mutation::Keep(Err(NoOpReason::NotActive.into()))
            }
        });
        self.finish(step, parcel, player, &id, |_| ProgressionEventKind::Deactivated {
            reason: DeactivationReason::Requested,
        })
    }

    /// Unlock every free, published tier the parcel has become eligible
    /// for. Returns the ids that were newly unlocked, in registry order.
    pub fn on_level_change(&self, ctx: &ProgressionContext) -> Vec<TierId> {
        if !self.config.auto_unlock {
            return Vec::new();
        }
        let tiers = self.registry.all_for_world(&ctx.world);
        let candidates: Vec<&Arc<GeneratorTier>> = tiers
            .iter()
            .filter(|tier| tier.is_published && !tier.is_default && tier.is_free())
            .filter(|tier| ctx.check(tier).is_ok())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let unlocked = self.store.update(ctx.parcel, |data| {
            let added: Vec<TierId> = candidates
                .iter()
                .filter(|tier| data.unlocked_tier_ids.insert(tier.id.clone()))
                .map(|tier| tier.id.clone())
                .collect();
            if added.is_empty() {
                Mutation::Keep(added)
            } else {
                Mutation::Commit(added)
            }
        });

        for id in &unlocked {
            self.events.publish(ProgressionEvent::new(
                ctx.parcel,
                None,
                id.clone(),
                ProgressionEventKind::Unlocked {
                    source: UnlockSource::Automatic,
                },
            ));
        }
        if !unlocked.is_empty() {
            tracing::info!(
                parcel = %ctx.parcel,
                level = ctx.level,
                count = unlocked.len(),
                "Tiers unlocked by level change"
            );
        }
        unlocked
    }

    /// Re-derive the parcel's slot limit and working range from the owner's
    /// permissions. Returns the tiers deactivated because the slot limit
    /// shrank (most recently activated first).
    pub fn refresh_limits(&self, parcel: ParcelId, permissions: &BTreeSet<String>) -> Vec<TierId> {
        let limits = PermissionLimits::derive(&self.config.permission_prefix, permissions);
        self.apply_limits(parcel, limits.slot_limit, limits.working_range)
    }

    /// Set the parcel's slot limit and working range directly. Returns the
    /// tiers deactivated because the slot limit shrank.
    pub fn set_limits(
        &self,
        parcel: ParcelId,
        slot_limit: Option<u32>,
        working_range: Option<u32>,
    ) -> Vec<TierId> {
        self.apply_limits(parcel, slot_limit, working_range)
    }

    fn apply_limits(
        &self,
        parcel: ParcelId,
        slot_limit: Option<u32>,
        working_range: Option<u32>,
    ) -> Vec<TierId> {
        let default_slots = self.config.default_active_slots;
        let trimmed = self.store.update(parcel, |data| {
            let changed = data.slot_limit != slot_limit || data.working_range != working_range;
            data.slot_limit = slot_limit;
            data.working_range = working_range;

            let limit = usize::try_from(effective_slot_limit(default_slots, slot_limit))
                .unwrap_or(usize::MAX);
            let mut trimmed = Vec::new();
            while data.active_count() > limit {
                match data.active_tier_ids.pop() {
                    Some(id) => trimmed.push(id),
                    None => break,
                }
            }
            if changed || !trimmed.is_empty() {
                Mutation::Commit(trimmed)
            } else {
                Mutation::Keep(trimmed)
            }
        });

        for id in &trimmed {
            self.events.publish(ProgressionEvent::new(
                parcel,
                None,
                id.clone(),
                ProgressionEventKind::Deactivated {
                    reason: DeactivationReason::SlotLimitShrunk,
                },
            ));
        }
        if !trimmed.is_empty() {
            tracing::info!(
                parcel = %parcel,
                deactivated = trimmed.len(),
                "Active tiers trimmed to new slot limit"
            );
        }
        trimmed
    }

    /// Delete the parcel's progression in memory and storage.
    pub fn wipe(&self, parcel: ParcelId) -> bool {
        let removed = self.store.wipe(parcel);
        if removed {
            tracing::info!(parcel = %parcel, "Parcel progression wiped");
        }
        removed
    }

    /// Published tiers that are unlocked or could be unlocked now, in
    /// registry order.
    pub fn eligible_tiers(&self, ctx: &ProgressionContext) -> Vec<Arc<GeneratorTier>> {
        let data = self.store.snapshot(ctx.parcel);
        self.registry
            .all_for_world(&ctx.world)
            .iter()
            .filter(|tier| tier.is_published)
            .filter(|tier| {
                is_unlocked(tier, &data)
                    || can_unlock(tier, ctx.level, ctx.biome.as_deref(), &ctx.permissions)
            })
            .cloned()
            .collect()
    }

    /// Every published tier with its state, blocker, and display odds.
    pub fn tier_overview(&self, ctx: &ProgressionContext) -> Vec<TierView> {
        let data = self.store.snapshot(ctx.parcel);
        self.registry
            .all_for_world(&ctx.world)
            .iter()
            .filter(|tier| tier.is_published)
            .map(|tier| {
                let state = if data.is_active(&tier.id) {
                    TierState::Active
                } else if is_unlocked(tier, &data) {
                    TierState::Unlocked
                } else {
                    TierState::Locked
                };
                let blocker = match state {
                    TierState::Locked => ctx.check(tier).err(),
                    TierState::Unlocked | TierState::Active => None,
                };
                TierView {
                    tier: Arc::clone(tier),
                    state,
                    blocker,
                    outputs: odds(&tier.output_weights),
                    treasures: odds(&tier.treasure_weights),
                }
            })
            .collect()
    }

    /// Bundles the holder of `permissions` may see in `world`.
    pub fn visible_bundles(
        &self,
        world: &WorldContext,
        permissions: &BTreeSet<String>,
    ) -> Vec<Arc<GeneratorBundle>> {
        let limits = PermissionLimits::derive(&self.config.permission_prefix, permissions);
        self.registry
            .all_bundles(world)
            .into_iter()
            .filter(|bundle| limits.can_see_bundle(&bundle.id))
            .collect()
    }

    /// Published tiers of `bundle` in registry order. Empty for an unknown
    /// bundle.
    pub fn bundle_tiers(&self, world: &WorldContext, bundle: &BundleId) -> Vec<Arc<GeneratorTier>> {
        let catalog = self.registry.snapshot();
        let Some(bundle) = catalog.bundle_in(world, bundle.as_str()) else {
            return Vec::new();
        };
        catalog
            .tiers_for(world)
            .iter()
            .filter(|tier| tier.is_published && bundle.tier_ids.contains(&tier.id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use isleforge_catalog::CatalogDocument;
    use rust_decimal_macros::dec;

    use crate::economy::LedgerEconomy;

    use super::*;

    const CATALOG: &str = r"
tiers:
  basic:
    default: true
    required_min_level: -1
    blocks: { cobblestone: 1 }
  coal:
    required_min_level: 5
    blocks: { coal_ore: 1 }
  iron:
    required_min_level: 10
    unlock_cost: 100
    activation_cost: 10
    blocks: { iron_ore: 1 }
  vip:
    required_permissions: [gen.vip]
    blocks: { emerald_ore: 1 }
  hidden:
    published: false
    blocks: { bedrock: 1 }
bundles:
  ores: { tiers: [coal, iron] }
";

    struct Fixture {
        machine: ProgressionMachine,
        economy: Arc<LedgerEconomy>,
        ctx: ProgressionContext,
    }

    fn fixture(config: ProgressionConfig) -> Fixture {
        let registry = Arc::new(TierRegistry::new());
        let document = CatalogDocument::from_yaml_str(CATALOG).unwrap_or_default();
        assert!(registry.load_all(&document).is_ok());
        let economy = Arc::new(LedgerEconomy::new());
        let machine = ProgressionMachine::new(
            registry,
            Arc::new(ParcelStore::new(None)),
            Some(Arc::clone(&economy) as Arc<dyn Economy>),
            config,
        );
        let ctx = ProgressionContext::new(ParcelId::new(), PlayerId::new(), WorldContext::new("w"));
        Fixture {
            machine,
            economy,
            ctx,
        }
    }

    #[test]
    fn unlock_requires_eligibility_and_free_tier() {
        let f = fixture(ProgressionConfig::default());
        assert_eq!(f.machine.unlock(&f.ctx, "coal").code(), "level_too_low");
        let ctx = f.ctx.clone().at_level(10);
        assert_eq!(f.machine.unlock(&ctx, "coal"), TransitionOutcome::Success);
        assert_eq!(f.machine.unlock(&ctx, "coal").code(), "already_unlocked");
        assert_eq!(f.machine.unlock(&ctx, "iron").code(), "requires_purchase");
        assert_eq!(f.machine.unlock(&ctx, "basic").code(), "already_unlocked");
    }

    #[test]
    fn unknown_and_unpublished_tiers_block() {
        let f = fixture(ProgressionConfig::default());
        assert_eq!(f.machine.unlock(&f.ctx, "ghost").code(), "unknown_tier");
        assert_eq!(f.machine.purchase(&f.ctx, "hidden").code(), "unknown_tier");
        assert_eq!(f.machine.activate(&f.ctx, "hidden", true).code(), "unknown_tier");
    }

    #[test]
    fn purchase_charges_once() {
        let f = fixture(ProgressionConfig::default());
        f.economy.deposit(f.ctx.player, dec!(150));
        let ctx = f.ctx.clone().at_level(10);
        assert!(f.machine.purchase(&ctx, "iron").is_success());
        assert_eq!(f.machine.purchase(&ctx, "iron").code(), "already_unlocked");
        assert_eq!(f.economy.balance(ctx.player), dec!(50));
    }

    #[test]
    fn purchase_checks_eligibility_before_funds() {
        let f = fixture(ProgressionConfig::default());
        assert_eq!(f.machine.purchase(&f.ctx, "iron").code(), "level_too_low");
        assert!(f.economy.withdrawals().is_empty());
    }

    #[test]
    fn activate_respects_slot_limit_and_bypass() {
        let f = fixture(ProgressionConfig::default());
        let ctx = f.ctx.clone().at_level(10);
        assert!(f.machine.unlock(&ctx, "coal").is_success());

        assert!(f.machine.activate(&ctx, "basic", false).is_success());
        assert_eq!(
            f.machine.activate(&ctx, "coal", false),
            TransitionOutcome::Blocked(BlockReason::SlotLimitExceeded { limit: 1 })
        );
        assert!(f.machine.activate(&ctx, "coal", true).is_success());
        assert_eq!(f.machine.parcel(ctx.parcel).active_count(), 2);
    }

    #[test]
    fn activate_requires_unlock_even_when_bypassed() {
        let f = fixture(ProgressionConfig::default());
        assert_eq!(f.machine.activate(&f.ctx, "coal", true).code(), "not_unlocked");
    }

    #[test]
    fn deactivate_of_inactive_tier_is_noop_without_creating_record() {
        let f = fixture(ProgressionConfig::default());
        assert_eq!(
            f.machine.deactivate(f.ctx.parcel, None, "basic"),
            TransitionOutcome::NoOp(NoOpReason::NotActive)
        );
        assert!(!f.machine.store().contains(f.ctx.parcel));
    }

    #[test]
    fn level_change_unlocks_free_published_tiers() {
        let f = fixture(ProgressionConfig::default());
        let mut rx = f.machine.events().subscribe();
        let ctx = f.ctx.clone().at_level(12);
        let unlocked = f.machine.on_level_change(&ctx);
        assert_eq!(unlocked, vec![TierId::new("coal")]);
        assert!(f.machine.on_level_change(&ctx).is_empty());
        let event = rx.try_recv().ok();
        assert_eq!(
            event.map(|e| e.kind),
            Some(ProgressionEventKind::Unlocked {
                source: UnlockSource::Automatic
            })
        );
    }

    #[test]
    fn level_change_honors_auto_unlock_switch() {
        let config = ProgressionConfig {
            auto_unlock: false,
            ..ProgressionConfig::default()
        };
        let f = fixture(config);
        assert!(f.machine.on_level_change(&f.ctx.clone().at_level(50)).is_empty());
    }

    #[test]
    fn permission_gated_tier_needs_permission() {
        let f = fixture(ProgressionConfig::default());
        assert_eq!(f.machine.unlock(&f.ctx, "vip").code(), "missing_permission");
        let ctx = f.ctx.clone().with_permissions(["gen.vip"]);
        assert!(f.machine.unlock(&ctx, "vip").is_success());
    }

    #[test]
    fn shrinking_limit_trims_latest_activations() {
        let f = fixture(ProgressionConfig::default());
        let ctx = f.ctx.clone().at_level(10).with_permissions(["gen.vip"]);
        assert!(f.machine.unlock(&ctx, "coal").is_success());
        assert!(f.machine.unlock(&ctx, "vip").is_success());

        let three: BTreeSet<String> = ["islandgen.active-generators.3".to_owned()].into();
        assert!(f.machine.refresh_limits(ctx.parcel, &three).is_empty());
        for id in ["basic", "coal", "vip"] {
            assert!(f.machine.activate(&ctx, id, false).is_success());
        }

        let trimmed = f.machine.refresh_limits(ctx.parcel, &BTreeSet::new());
        assert_eq!(trimmed, vec![TierId::new("vip"), TierId::new("coal")]);
        assert_eq!(f.machine.parcel(ctx.parcel).active_tier_ids, vec![TierId::new("basic")]);
        assert_eq!(f.machine.parcel(ctx.parcel).slot_limit, None);
    }

    #[test]
    fn overview_reports_states_and_odds() {
        let f = fixture(ProgressionConfig::default());
        let ctx = f.ctx.clone().at_level(10);
        assert!(f.machine.activate(&ctx, "basic", false).is_success());

        let overview = f.machine.tier_overview(&ctx);
        let ids: Vec<&str> = overview.iter().map(|v| v.tier.id.as_str()).collect();
        assert_eq!(ids, vec!["basic", "vip", "coal", "iron"]);

        let find = |id: &str| overview.iter().find(|v| v.tier.id.as_str() == id);
        assert_eq!(find("basic").map(|v| v.state), Some(TierState::Active));
        assert_eq!(find("coal").map(|v| v.state), Some(TierState::Locked));
        assert_eq!(find("coal").and_then(|v| v.blocker.clone()), None);
        assert_eq!(
            find("vip").and_then(|v| v.blocker.as_ref().map(Ineligible::code)),
            Some("missing_permission")
        );
        assert_eq!(
            find("basic").and_then(|v| v.outputs.first().map(|o| o.percent)),
            Some(100)
        );
    }

    #[test]
    fn eligible_tiers_include_unlocked_and_unlockable() {
        let f = fixture(ProgressionConfig::default());
        let ids: Vec<String> = f
            .machine
            .eligible_tiers(&f.ctx.clone().at_level(5))
            .iter()
            .map(|t| t.id.to_string())
            .collect();
        assert_eq!(ids, vec!["basic", "coal"]);
    }

    #[test]
    fn bundles_filter_by_permission() {
        let f = fixture(ProgressionConfig::default());
        let world = WorldContext::new("w");
        assert!(f.machine.visible_bundles(&world, &BTreeSet::new()).is_empty());
        let perms: BTreeSet<String> = ["islandgen.bundle.ores".to_owned()].into();
        assert_eq!(f.machine.visible_bundles(&world, &perms).len(), 1);

        let tiers: Vec<String> = f
            .machine
            .bundle_tiers(&world, &BundleId::new("ores"))
            .iter()
            .map(|t| t.id.to_string())
            .collect();
        assert_eq!(tiers, vec!["coal", "iron"]);
        assert!(f.machine.bundle_tiers(&world, &BundleId::new("none")).is_empty());
    }

    #[test]
    fn grant_and_wipe() {
        let f = fixture(ProgressionConfig::default());
        let world = WorldContext::new("w");
        assert!(f.machine.grant(f.ctx.parcel, &world, "hidden").is_success());
        assert_eq!(f.machine.grant(f.ctx.parcel, &world, "hidden").code(), "already_unlocked");
        assert_eq!(f.machine.grant(f.ctx.parcel, &world, "ghost").code(), "unknown_tier");
        assert!(f.machine.wipe(f.ctx.parcel));
        assert!(f.machine.parcel(f.ctx.parcel).unlocked_tier_ids.is_empty());
    }
}
