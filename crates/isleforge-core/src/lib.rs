//! Tier resolution, weighted sampling, and parcel progression for isleforge.
//!
//! The crate decides what a block-generation event produces and owns the
//! per-parcel progression state (unlocked and active tiers). Host services
//! (levels, currency, parcel ownership) are consumed through the traits in
//! [`collaborators`]; storage sits behind [`persist::GeneratorRepository`].
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `isleforge.yaml` into
//!   strongly-typed structs.
//! - [`collaborators`] -- [`LevelProvider`], [`Economy`], and
//!   [`ParcelDirectory`] contracts with in-memory implementations.
//! - [`economy`] -- In-memory currency ledger.
//! - [`eligibility`] -- Pure unlock and activation predicates.
//! - [`permissions`] -- Slot, range, and bundle limits from permission nodes.
//! - [`resolution`] -- Legacy and multi-active tier resolution.
//! - [`sampler`] -- Weighted tables and treasure overlay.
//! - [`store`] -- In-memory parcel records with per-parcel mutation gates.
//! - [`persist`] -- Asynchronous write-behind to a repository.
//! - [`progression`] -- The unlock/purchase/activate state machine.
//! - [`events`] -- Progression event bus.
//! - [`engine`] -- The generation boundary.
//! - [`error`] -- Error types.
//!
//! [`LevelProvider`]: collaborators::LevelProvider
//! [`Economy`]: collaborators::Economy
//! [`ParcelDirectory`]: collaborators::ParcelDirectory

pub mod collaborators;
pub mod config;
pub mod economy;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod events;
pub mod permissions;
pub mod persist;
pub mod progression;
pub mod resolution;
pub mod sampler;
pub mod store;

pub use config::{GeneratorConfig, ResolutionMode};
pub use engine::{Collaborators, GenerationReport, GeneratorEngine};
pub use error::{GenerationError, StorageError};
pub use events::{EventBus, ProgressionEvent, ProgressionEventKind};
pub use persist::{GeneratorRepository, MemoryRepository, PersistHandle, RetryPolicy, spawn_writer};
pub use progression::{
    BlockReason, NoOpReason, ProgressionContext, ProgressionMachine, TierState, TierView,
    TransitionOutcome,
};
pub use resolution::Resolver;
pub use sampler::WeightedTable;
pub use store::ParcelStore;
