//! Artifact naming and matching
//!
//! Derives the filename pattern a finished export must satisfy for a given
//! dataset and date, and tests candidate filenames against it.
//!
//! Both the pattern and the candidate are normalized before comparison:
//! lowercased, underscores treated as spaces, and whitespace runs collapsed.
//! The browser may append a collision suffix such as ` (1)` before the
//! extension; every naming class accepts it.
//!
//! ```
//! use chrono::NaiveDate;
//! use commcare_downloader::dataset::{LogicalDataset, NamingClass, Program};
//! use commcare_downloader::naming::FilenamePattern;
//!
//! let dataset = LogicalDataset::new("Household mother", "https://example.org/x/", Program::Ptme)
//!     .with_naming(NamingClass::Simple);
//! let today = NaiveDate::from_ymd_opt(2025, 8, 14).unwrap();
//! let pattern = FilenamePattern::for_dataset(&dataset, today);
//!
//! assert!(pattern.matches("household mother 2025-08-14.xlsx"));
//! assert!(pattern.matches("Household mother 2025-08-14 (1).xlsx"));
//! assert!(!pattern.matches("Household mother 2025-08-13.xlsx"));
//! ```

use crate::dataset::{LogicalDataset, NamingClass};
use chrono::NaiveDate;
use regex::Regex;
use std::path::Path;

/// Extension of finished spreadsheet artifacts.
pub const ARTIFACT_EXTENSION: &str = "xlsx";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Normalize a filename or dataset name for comparison.
pub fn normalize(input: &str) -> String {
    input
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Matcher for the artifacts of one dataset on one date
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    dataset: String,
    date: NaiveDate,
    canonical: String,
    regex: Regex,
}

impl FilenamePattern {
    /// Build the pattern for `dataset` downloaded on `date`.
    pub fn for_dataset(dataset: &LogicalDataset, date: NaiveDate) -> Self {
        let day = date.format(DATE_FORMAT).to_string();
        let name = regex::escape(&normalize(&dataset.name));

        let created_clause = match dataset.naming {
            NamingClass::Simple => String::new(),
            NamingClass::Created => r" ?\(created \d{4}-\d{2}-\d{2}\)".to_string(),
            NamingClass::FixedCreated { created } => {
                format!(r" ?\(created {}\)", created.format(DATE_FORMAT))
            }
        };

        let source = format!(
            r"^{name}{created_clause} {day}(?: \(\d+\))?\.{ARTIFACT_EXTENSION}$"
        );
        // Cannot fail: the name is escaped and the rest of the template is fixed
        let regex = Regex::new(&source).expect("escaped dataset name forms a valid pattern");

        let canonical = match dataset.naming {
            NamingClass::Simple => format!("{} {day}.{ARTIFACT_EXTENSION}", dataset.name),
            NamingClass::Created => format!(
                "{} (created XXXX-XX-XX) {day}.{ARTIFACT_EXTENSION}",
                dataset.name
            ),
            NamingClass::FixedCreated { created } => format!(
                "{} (created {}) {day}.{ARTIFACT_EXTENSION}",
                dataset.name,
                created.format(DATE_FORMAT)
            ),
        };

        Self {
            dataset: dataset.name.clone(),
            date,
            canonical,
            regex,
        }
    }

    /// Whether `filename` (a bare name or a path) is an artifact of this dataset and date.
    pub fn matches(&self, filename: &str) -> bool {
        let base = Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(filename);
        self.regex.is_match(&normalize(base))
    }

    /// Human-readable expected filename, used in log lines.
    pub fn canonical_filename(&self) -> &str {
        &self.canonical
    }

    /// Dataset this pattern was derived from.
    pub fn dataset_name(&self) -> &str {
        &self.dataset
    }

    /// Date this pattern was derived for.
    pub fn date(&self) -> NaiveDate {
        self.date
    }
}
