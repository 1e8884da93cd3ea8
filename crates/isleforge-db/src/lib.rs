//! `PostgreSQL` persistence for isleforge.
//!
//! Implements the engine's [`GeneratorRepository`] contract: parcel
//! progression records are upserted as JSONB documents, and the generator
//! catalog can be stored and read back as a [`CatalogDocument`].
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool, configuration, and migrations
//! - [`generator_store`] -- Parcel and catalog tables
//! - [`error`] -- Error types
//!
//! [`GeneratorRepository`]: isleforge_core::GeneratorRepository
//! [`CatalogDocument`]: isleforge_catalog::CatalogDocument

pub mod error;
pub mod generator_store;
pub mod postgres;

pub use error::DbError;
pub use generator_store::{DefinitionRow, ParcelRow, PostgresGeneratorRepository};
pub use postgres::{PostgresConfig, PostgresPool};
