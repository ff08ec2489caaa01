//! Catalog of known exports
//!
//! The production catalog is embedded at build time. A JSON file with the
//! same shape can replace it at run time.

use crate::dataset::{LogicalDataset, Program};
use crate::naming::normalize;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Embedded catalog data
const CATALOG_JSON: &str = include_str!("datasets.json");

/// Global catalog instance (loaded once)
static CATALOG: Lazy<Result<DatasetCatalog, CatalogError>> =
    Lazy::new(|| DatasetCatalog::from_json(CATALOG_JSON));

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Malformed catalog JSON
    #[error("parse error: {0}")]
    ParseError(String),

    /// Catalog file could not be read
    #[error("cannot read catalog {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// A dataset descriptor failed validation
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// Two datasets normalize to the same name
    #[error("duplicate dataset name: {0}")]
    DuplicateDataset(String),

    /// A selected name is not in the catalog
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// The selection matched nothing
    #[error("selection matched no datasets")]
    EmptySelection,
}

#[derive(Debug, Deserialize)]
struct RawCatalog {
    #[allow(dead_code)]
    schema_version: String,
    datasets: Vec<LogicalDataset>,
}

/// Ordered set of logical datasets
#[derive(Debug, Clone)]
pub struct DatasetCatalog {
    datasets: Vec<LogicalDataset>,
}

impl DatasetCatalog {
    /// Load the embedded catalog
    ///
    /// This is a singleton operation - the catalog is parsed once and cached.
    pub fn load() -> Result<&'static Self, &'static CatalogError> {
        CATALOG.as_ref()
    }

    /// Load the embedded catalog, returning an owned copy
    pub fn load_embedded() -> Result<Self, CatalogError> {
        Self::from_json(CATALOG_JSON)
    }

    /// Load a catalog file
    pub fn from_path(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Parse catalog JSON
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_json::from_str(json)
            .map_err(|e| CatalogError::ParseError(format!("Failed to parse catalog: {e}")))?;
        Self::from_datasets(raw.datasets)
    }

    /// Build a catalog from descriptors, keeping their order.
    pub fn from_datasets(datasets: Vec<LogicalDataset>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for dataset in &datasets {
            dataset.validate().map_err(CatalogError::InvalidDataset)?;
            if !seen.insert(normalize(&dataset.name)) {
                return Err(CatalogError::DuplicateDataset(dataset.name.clone()));
            }
        }
        Ok(Self { datasets })
    }

    /// All datasets in declared order
    pub fn datasets(&self) -> &[LogicalDataset] {
        &self.datasets
    }

    /// Number of datasets
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Find a dataset by name, ignoring case, underscores, and spacing.
    pub fn get(&self, name: &str) -> Option<&LogicalDataset> {
        let wanted = normalize(name);
        self.datasets
            .iter()
            .find(|dataset| normalize(&dataset.name) == wanted)
    }

    /// Datasets of one program, in declared order.
    pub fn by_program(&self, program: Program) -> Vec<&LogicalDataset> {
        self.datasets
            .iter()
            .filter(|dataset| dataset.program == program)
            .collect()
    }

    /// Expected set for a run.
    ///
    /// With no filters this is the whole catalog. Otherwise it is every
    /// dataset named in `names` or belonging to one of `programs`, in
    /// declared order.
    pub fn select(
        &self,
        names: &[String],
        programs: &[Program],
    ) -> Result<Vec<LogicalDataset>, CatalogError> {
        if names.is_empty() && programs.is_empty() {
            return Ok(self.datasets.clone());
        }

        let mut wanted = HashSet::new();
        for name in names {
            let dataset = self
                .get(name)
                .ok_or_else(|| CatalogError::UnknownDataset(name.clone()))?;
            wanted.insert(normalize(&dataset.name));
        }

        let selected: Vec<_> = self
            .datasets
            .iter()
            .filter(|dataset| {
                programs.contains(&dataset.program) || wanted.contains(&normalize(&dataset.name))
            })
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(CatalogError::EmptySelection);
        }
        Ok(selected)
    }
}
