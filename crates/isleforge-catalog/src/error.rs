//! Error types for the `isleforge-catalog` crate.
//!
//! Every failure aborts the load as a whole: a catalog is either accepted
//! completely or not at all, and the registry keeps serving the previous one.

use std::path::PathBuf;

use isleforge_types::{BundleId, Material, TierId};

/// Errors that can occur while reading or validating a catalog document.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog file {}: {source}", path.display())]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The catalog text is not a valid document.
    #[error("failed to parse catalog YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        #[from]
        source: serde_yml::Error,
    },

    /// A tier or bundle was declared with an empty id.
    #[error("{scope}: tier and bundle ids must not be empty")]
    EmptyId {
        /// Where the entry was declared.
        scope: String,
    },

    /// A weighted table contains a zero weight.
    #[error("{scope}: tier {tier} has a zero weight for {material}")]
    ZeroWeight {
        /// Where the tier was declared.
        scope: String,
        /// The offending tier.
        tier: TierId,
        /// The entry with the zero weight.
        material: Material,
    },

    /// The treasure chance is not a probability.
    #[error("{scope}: tier {tier} treasure chance {chance} is outside [0, 1]")]
    InvalidTreasureChance {
        /// Where the tier was declared.
        scope: String,
        /// The offending tier.
        tier: TierId,
        /// The rejected value.
        chance: f64,
    },

    /// A cost is below zero.
    #[error("{scope}: tier {tier} has a negative {field}")]
    NegativeCost {
        /// Where the tier was declared.
        scope: String,
        /// The offending tier.
        tier: TierId,
        /// Which cost field.
        field: &'static str,
    },

    /// A bundle lists a tier id that does not exist in its scope.
    #[error("{scope}: bundle {bundle} references unknown tier {tier}")]
    UnknownTierReference {
        /// Where the bundle was declared.
        scope: String,
        /// The offending bundle.
        bundle: BundleId,
        /// The missing tier id.
        tier: TierId,
    },
}
