//! Generator catalog loading and the tier registry.
//!
//! A catalog is an id-keyed document of tiers and bundles with optional
//! per-game-mode override tables. It is validated as a whole, resolved into
//! an immutable [`Catalog`], and served by the [`TierRegistry`], which swaps
//! catalogs atomically on reload.
//!
//! # Modules
//!
//! - [`document`] -- Serialized catalog format (YAML)
//! - [`catalog`] -- Validated catalog with precomputed per-game-mode views
//! - [`merge`] -- Override merge and registry ordering rules
//! - [`registry`] -- Process-wide holder of the current catalog
//! - [`source`] -- Catalog document providers
//! - [`error`] -- Error types

pub mod catalog;
pub mod document;
pub mod error;
pub mod merge;
pub mod registry;
pub mod source;

pub use catalog::{Catalog, CatalogSummary};
pub use document::{BundleDefinition, CatalogDocument, GameModeDocument, TierDefinition};
pub use error::CatalogError;
pub use registry::TierRegistry;
pub use source::{CatalogSource, YamlFileSource};
