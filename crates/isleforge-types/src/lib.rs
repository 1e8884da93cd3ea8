//! Shared type definitions for the isleforge generator engine.
//!
//! This crate is the single source of truth for the data model exchanged
//! between the catalog, the engine, the storage layer, and the host.
//!
//! # Modules
//!
//! - [`ids`] -- Typed identifiers (UUID-backed parcel/player ids, string keys
//!   for tiers, bundles, and materials)
//! - [`enums`] -- Block kinds and tier categories
//! - [`structs`] -- Tiers, bundles, per-parcel records, generation events

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{BlockKind, GeneratorCategory};
pub use ids::{BundleId, Material, ParcelId, PlayerId, TierId};
pub use structs::{
    BlockPos, GeneratedOutput, GenerationEvent, GeneratorBundle, GeneratorTier,
    ParcelGeneratorData, WorldContext,
};
