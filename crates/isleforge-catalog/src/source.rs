//! Where catalog documents come from.
//!
//! The registry only sees a [`CatalogSource`]. A YAML file on disk and an
//! already parsed document (for example one read back from the database)
//! both qualify.

use std::path::{Path, PathBuf};

use crate::document::CatalogDocument;
use crate::error::CatalogError;

/// A provider of catalog documents.
pub trait CatalogSource {
    /// Read the current document.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the document cannot be produced or parsed.
    fn read_document(&self) -> Result<CatalogDocument, CatalogError>;

    /// Human-readable description used in logs.
    fn describe(&self) -> String;
}

/// A catalog stored as a YAML file.
#[derive(Debug, Clone)]
pub struct YamlFileSource {
    path: PathBuf,
}

impl YamlFileSource {
    /// Read catalogs from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this source reads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogSource for YamlFileSource {
    fn read_document(&self) -> Result<CatalogDocument, CatalogError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| CatalogError::Io {
            path: self.path.clone(),
            source,
        })?;
        CatalogDocument::from_yaml_str(&contents)
    }

    fn describe(&self) -> String {
        format!("yaml file {}", self.path.display())
    }
}

impl CatalogSource for CatalogDocument {
    fn read_document(&self) -> Result<CatalogDocument, CatalogError> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        "in-memory document".to_owned()
    }
}
