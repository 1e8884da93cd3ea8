//! Error types for the `isleforge-core` crate.
//!
//! Progression transitions do not use these: their results are
//! [`TransitionOutcome`](crate::progression::TransitionOutcome) values.

use isleforge_types::TierId;

/// Errors reported by a persistence backend or the writer task.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend rejected or failed an operation.
    #[error("storage backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },

    /// The writer task has stopped; commands can no longer be queued.
    #[error("persistence writer is closed")]
    WriterClosed,
}

/// Failures inside the generation hot path.
///
/// These never leave [`GeneratorEngine::on_generation`]; they are logged and
/// the event produces no output.
///
/// [`GeneratorEngine::on_generation`]: crate::engine::GeneratorEngine::on_generation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The resolved tier has nothing to sample from.
    #[error("tier {tier} has an empty output table")]
    EmptyOutputTable {
        /// The offending tier.
        tier: TierId,
    },

    /// The weights of a table do not fit the sampling range.
    #[error("weight table total overflows")]
    WeightOverflow,
}
