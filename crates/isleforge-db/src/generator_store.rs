//! Parcel records and catalog definitions in `PostgreSQL`.
//!
//! Parcel records are stored whole as JSONB keyed by owner id, so saving is a
//! single idempotent upsert. Catalog rows hold the JSON form of
//! [`TierDefinition`] and [`BundleDefinition`] keyed by `(game_mode, id)`,
//! where an empty game mode is the global catalog.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use isleforge_catalog::{BundleDefinition, CatalogDocument, TierDefinition};
use isleforge_core::{GeneratorRepository, StorageError};
use isleforge_types::{ParcelGeneratorData, ParcelId};

use crate::error::DbError;

/// Game mode value of global catalog rows.
pub const GLOBAL_GAME_MODE: &str = "";

/// A row of `parcel_generator_data`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParcelRow {
    /// Parcel owner id.
    pub owner_id: Uuid,
    /// The record as JSON.
    pub record: serde_json::Value,
    /// Last change of the record.
    pub updated_at: DateTime<Utc>,
}

/// A row of `generator_tiers` or `generator_bundles`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DefinitionRow {
    /// Game mode, empty for the global catalog.
    pub game_mode: String,
    /// Tier or bundle id.
    pub id: String,
    /// The definition as JSON.
    pub definition: serde_json::Value,
}

/// [`GeneratorRepository`] backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PostgresGeneratorRepository {
    pool: PgPool,
}

impl PostgresGeneratorRepository {
    /// A repository over `pool`.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Parcels
    // =========================================================================

    /// Every parcel record. Rows that no longer decode are logged and
    /// skipped so one bad record cannot block startup.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn fetch_parcels(&self) -> Result<Vec<ParcelGeneratorData>, DbError> {
        let rows = sqlx::query_as::<_, ParcelRow>(
            r"SELECT owner_id, record, updated_at
              FROM parcel_generator_data
              ORDER BY owner_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<ParcelGeneratorData>(row.record) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        owner = %row.owner_id,
                        error = %e,
                        "Skipping undecodable parcel record"
                    );
                }
            }
        }
        tracing::debug!(parcels = records.len(), "Loaded parcel records");
        Ok(records)
    }

    /// Insert or replace a parcel record. A stored row with a newer
    /// `updated_at` is left as it is.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if the record cannot be encoded or
    /// [`DbError::Postgres`] if the upsert fails.
    pub async fn upsert_parcel(&self, record: &ParcelGeneratorData) -> Result<(), DbError> {
        let json = serde_json::to_value(record)?;
        sqlx::query(
            r"INSERT INTO parcel_generator_data (owner_id, record, updated_at)
              VALUES ($1, $2, $3)
              ON CONFLICT (owner_id) DO UPDATE SET
                record = EXCLUDED.record,
                updated_at = EXCLUDED.updated_at
              WHERE parcel_generator_data.updated_at <= EXCLUDED.updated_at",
        )
        .bind(record.owner_id.into_inner())
        .bind(json)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a parcel record. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the delete fails.
    pub async fn remove_parcel(&self, owner: ParcelId) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM parcel_generator_data WHERE owner_id = $1")
            .bind(owner.into_inner())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Insert or replace one tier definition. `None` targets the global
    /// catalog.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if encoding or the upsert fails.
    pub async fn upsert_tier(
        &self,
        game_mode: Option<&str>,
        id: &str,
        definition: &TierDefinition,
    ) -> Result<(), DbError> {
        let json = serde_json::to_value(definition)?;
        sqlx::query(
            r"INSERT INTO generator_tiers (game_mode, tier_id, definition)
              VALUES ($1, $2, $3)
              ON CONFLICT (game_mode, tier_id) DO UPDATE SET
                definition = EXCLUDED.definition,
                updated_at = now()",
        )
        .bind(game_mode.unwrap_or(GLOBAL_GAME_MODE))
        .bind(id)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or replace one bundle definition. `None` targets the global
    /// catalog.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if encoding or the upsert fails.
    pub async fn upsert_bundle(
        &self,
        game_mode: Option<&str>,
        id: &str,
        definition: &BundleDefinition,
    ) -> Result<(), DbError> {
        let json = serde_json::to_value(definition)?;
        sqlx::query(
            r"INSERT INTO generator_bundles (game_mode, bundle_id, definition)
              VALUES ($1, $2, $3)
              ON CONFLICT (game_mode, bundle_id) DO UPDATE SET
                definition = EXCLUDED.definition,
                updated_at = now()",
        )
        .bind(game_mode.unwrap_or(GLOBAL_GAME_MODE))
        .bind(id)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace the whole stored catalog with `document` in one transaction.
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if encoding or any statement fails; nothing is
    /// changed in that case.
    pub async fn replace_catalog(&self, document: &CatalogDocument) -> Result<u64, DbError> {
        let mut tiers: Vec<(&str, &str, serde_json::Value)> = Vec::new();
        let mut bundles: Vec<(&str, &str, serde_json::Value)> = Vec::new();
        for (id, tier) in &document.tiers {
            tiers.push((GLOBAL_GAME_MODE, id.as_str(), serde_json::to_value(tier)?));
        }
        for (id, bundle) in &document.bundles {
            bundles.push((GLOBAL_GAME_MODE, id.as_str(), serde_json::to_value(bundle)?));
        }
        for (mode, overrides) in &document.game_modes {
            for (id, tier) in &overrides.tiers {
                tiers.push((mode.as_str(), id.as_str(), serde_json::to_value(tier)?));
            }
            for (id, bundle) in &overrides.bundles {
                bundles.push((mode.as_str(), id.as_str(), serde_json::to_value(bundle)?));
            }
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM generator_bundles")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM generator_tiers")
            .execute(&mut *tx)
            .await?;

        let mut written = 0_u64;
        for (mode, id, json) in tiers {
            sqlx::query(
                "INSERT INTO generator_tiers (game_mode, tier_id, definition) VALUES ($1, $2, $3)",
            )
            .bind(mode)
            .bind(id)
            .bind(json)
            .execute(&mut *tx)
            .await?;
            written = written.saturating_add(1);
        }
        for (mode, id, json) in bundles {
            sqlx::query(
                "INSERT INTO generator_bundles (game_mode, bundle_id, definition) VALUES ($1, $2, $3)",
            )
            .bind(mode)
            .bind(id)
            .bind(json)
            .execute(&mut *tx)
            .await?;
            written = written.saturating_add(1);
        }
        tx.commit().await?;

        tracing::info!(rows = written, "Stored generator catalog replaced");
        Ok(written)
    }

    /// Assemble the stored catalog into a document. `None` when no tier and
    /// no bundle is stored.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a query fails or a definition does not decode.
    pub async fn fetch_catalog(&self) -> Result<Option<CatalogDocument>, DbError> {
        let tiers = sqlx::query_as::<_, DefinitionRow>(
            r"SELECT game_mode, tier_id AS id, definition
              FROM generator_tiers
              ORDER BY game_mode, tier_id",
        )
        .fetch_all(&self.pool)
        .await?;
        let bundles = sqlx::query_as::<_, DefinitionRow>(
            r"SELECT game_mode, bundle_id AS id, definition
              FROM generator_bundles
              ORDER BY game_mode, bundle_id",
        )
        .fetch_all(&self.pool)
        .await?;

        if tiers.is_empty() && bundles.is_empty() {
            return Ok(None);
        }
        Ok(Some(assemble_document(tiers, bundles)?))
    }
}

/// Build a catalog document from stored rows.
///
/// # Errors
///
/// Returns [`DbError::Serialization`] for the first definition that does
/// not decode.
pub fn assemble_document(
    tiers: Vec<DefinitionRow>,
    bundles: Vec<DefinitionRow>,
) -> Result<CatalogDocument, DbError> {
    let mut document = CatalogDocument::default();
    let mut mode_tiers: BTreeMap<String, BTreeMap<String, TierDefinition>> = BTreeMap::new();
    let mut mode_bundles: BTreeMap<String, BTreeMap<String, BundleDefinition>> = BTreeMap::new();

    for row in tiers {
        let definition: TierDefinition = serde_json::from_value(row.definition)?;
        if row.game_mode.is_empty() {
            document.tiers.insert(row.id, definition);
        } else {
            mode_tiers
                .entry(row.game_mode)
                .or_default()
                .insert(row.id, definition);
        }
    }
    for row in bundles {
        let definition: BundleDefinition = serde_json::from_value(row.definition)?;
        if row.game_mode.is_empty() {
            document.bundles.insert(row.id, definition);
        } else {
            mode_bundles
                .entry(row.game_mode)
                .or_default()
                .insert(row.id, definition);
        }
    }

    for (mode, tiers) in mode_tiers {
        document.game_modes.entry(mode).or_default().tiers = tiers;
    }
    for (mode, bundles) in mode_bundles {
        document.game_modes.entry(mode).or_default().bundles = bundles;
    }
    Ok(document)
}

impl GeneratorRepository for PostgresGeneratorRepository {
    async fn load_parcels(&self) -> Result<Vec<ParcelGeneratorData>, StorageError> {
        Ok(self.fetch_parcels().await?)
    }

    async fn save_parcel(&self, record: &ParcelGeneratorData) -> Result<(), StorageError> {
        Ok(self.upsert_parcel(record).await?)
    }

    async fn delete_parcel(&self, owner: ParcelId) -> Result<(), StorageError> {
        self.remove_parcel(owner).await?;
        Ok(())
    }

    async fn load_catalog(&self) -> Result<Option<CatalogDocument>, StorageError> {
        Ok(self.fetch_catalog().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(game_mode: &str, id: &str, definition: serde_json::Value) -> DefinitionRow {
        DefinitionRow {
            game_mode: game_mode.to_owned(),
            id: id.to_owned(),
            definition,
        }
    }

    #[test]
    fn rows_split_into_global_and_game_mode_tables() {
        let tiers = vec![
            row("", "basic", serde_json::json!({ "blocks": { "cobblestone": 1 } })),
            row("skyblock", "iron", serde_json::json!({ "required_min_level": 10 })),
        ];
        let bundles = vec![row("skyblock", "vip", serde_json::json!({ "tiers": ["iron"] }))];

        let document = assemble_document(tiers, bundles).ok();
        let document = document.unwrap_or_default();
        assert!(document.tiers.contains_key("basic"));
        assert!(document.bundles.is_empty());
        let skyblock = document.game_modes.get("skyblock");
        assert!(skyblock.is_some_and(|m| m.tiers.contains_key("iron")));
        assert!(skyblock.is_some_and(|m| m.bundles.contains_key("vip")));
    }

    #[test]
    fn undecodable_definition_is_an_error() {
        let tiers = vec![row("", "bad", serde_json::json!({ "unknown_field": true }))];
        assert!(matches!(
            assemble_document(tiers, Vec::new()),
            Err(DbError::Serialization(_))
        ));
    }

    #[test]
    fn stored_rows_rebuild_a_loadable_catalog() {
        let yaml = "tiers:\n  a: { blocks: { stone: 1 } }\nbundles:\n  b: { tiers: [a] }\n";
        let source = CatalogDocument::from_yaml_str(yaml).unwrap_or_default();
        let tiers = source
            .tiers
            .iter()
            .filter_map(|(id, t)| serde_json::to_value(t).ok().map(|v| row("", id, v)))
            .collect();
        let bundles = source
            .bundles
            .iter()
            .filter_map(|(id, b)| serde_json::to_value(b).ok().map(|v| row("", id, v)))
            .collect();
        assert_eq!(assemble_document(tiers, bundles).ok(), Some(source));
    }
}
