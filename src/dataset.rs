//! Logical dataset descriptors
//!
//! A [`LogicalDataset`] is one named CommCare export, independent of any
//! particular day's file. The full list required for a run is the expected set.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Program area a dataset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Program {
    /// Health agent visit and call forms
    Call,
    /// Prevention of mother-to-child transmission
    Ptme,
    /// Orphans and vulnerable children
    Oev,
    /// Savings groups
    Muso,
    /// Household gardens
    Gardens,
}

impl Program {
    /// All program areas in display order.
    pub const ALL: [Program; 5] = [
        Program::Call,
        Program::Ptme,
        Program::Oev,
        Program::Muso,
        Program::Gardens,
    ];

    /// Uppercase label ("CALL", "PTME", ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Program::Call => "CALL",
            Program::Ptme => "PTME",
            Program::Oev => "OEV",
            Program::Muso => "MUSO",
            Program::Gardens => "GARDENS",
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Program {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "call" => Ok(Program::Call),
            "ptme" => Ok(Program::Ptme),
            "oev" => Ok(Program::Oev),
            "muso" => Ok(Program::Muso),
            "gardens" => Ok(Program::Gardens),
            _ => Err(format!(
                "Invalid program: {s}. Valid options: call, ptme, oev, muso, gardens"
            )),
        }
    }
}

/// How the browser names a finished export of this dataset.
///
/// - `Simple`: `<name> <today>.xlsx`
/// - `Created`: `<name> (created <any date>) <today>.xlsx`
/// - `FixedCreated`: `<name> (created <fixed date>) <today>.xlsx`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum NamingClass {
    /// Name and download date only
    Simple,
    /// Name, a created-date token, and the download date
    #[default]
    Created,
    /// Name, a specific historical created date, and the download date
    FixedCreated {
        /// The created date embedded in every export of this dataset
        created: NaiveDate,
    },
}

impl fmt::Display for NamingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingClass::Simple => f.write_str("simple"),
            NamingClass::Created => f.write_str("created"),
            NamingClass::FixedCreated { created } => write!(f, "created {created}"),
        }
    }
}

/// Kind of export page, inferred from the export URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// Case export (`/case/download/`)
    Case,
    /// Form export (`/form/download/`)
    Form,
    /// Anything else
    Other,
}

/// One named export defined by the case-management system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalDataset {
    /// Display name, also the filename prefix of every artifact
    pub name: String,
    /// Export download page
    pub export_url: String,
    /// Program area
    pub program: Program,
    /// Heavy datasets get longer timeouts and fewer per-pass retries
    #[serde(default)]
    pub heavy: bool,
    /// Filename shape of finished artifacts
    #[serde(default)]
    pub naming: NamingClass,
    /// Override for the export-preparation ceiling, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preparation_timeout_secs: Option<u64>,
    /// Override for the completion verification ceiling, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_timeout_secs: Option<u64>,
}

impl LogicalDataset {
    /// Create a dataset with the default naming class and no overrides.
    pub fn new(name: impl Into<String>, export_url: impl Into<String>, program: Program) -> Self {
        Self {
            name: name.into(),
            export_url: export_url.into(),
            program,
            heavy: false,
            naming: NamingClass::default(),
            preparation_timeout_secs: None,
            verification_timeout_secs: None,
        }
    }

    /// Mark the dataset as heavy.
    pub fn with_heavy(mut self, heavy: bool) -> Self {
        self.heavy = heavy;
        self
    }

    /// Set the naming class.
    pub fn with_naming(mut self, naming: NamingClass) -> Self {
        self.naming = naming;
        self
    }

    /// Case or form export, based on the URL path.
    pub fn export_kind(&self) -> ExportKind {
        if self.export_url.contains("/case/") {
            ExportKind::Case
        } else if self.export_url.contains("/form/") {
            ExportKind::Form
        } else {
            ExportKind::Other
        }
    }

    /// Validate descriptor fields
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Dataset name cannot be empty".to_string());
        }

        if !(self.export_url.starts_with("https://") || self.export_url.starts_with("http://")) {
            return Err(format!(
                "Export URL for {} must be an http(s) URL, got '{}'",
                self.name, self.export_url
            ));
        }

        if self.name.contains(['/', '\\']) {
            return Err(format!(
                "Dataset name '{}' cannot contain path separators",
                self.name
            ));
        }

        Ok(())
    }
}
