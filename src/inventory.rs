//! Filesystem inventory of the download directory
//!
//! The browser writes into this directory while the controller reads and
//! cleans it, so nothing here is cached: every query re-reads the directory
//! and tolerates entries that vanish or change between listing and `stat`.

use crate::dataset::LogicalDataset;
use crate::naming::{FilenamePattern, ARTIFACT_EXTENSION};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Extensions browsers use for in-flight downloads.
pub const PARTIAL_EXTENSIONS: &[&str] = &["crdownload", "part"];

/// A finished spreadsheet file in the download directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    /// Full path
    pub path: PathBuf,
    /// File name only
    pub filename: String,
    /// Size in bytes at the time of the listing
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl DownloadedArtifact {
    /// Read metadata for `path`.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            filename,
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }

    /// Size in mebibytes, for log lines.
    pub fn size_mb(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0)
    }
}

/// Present artifacts for one dataset.
#[derive(Debug, Clone)]
pub struct DatasetPresence {
    /// Dataset name
    pub dataset: String,
    /// Matching artifact filenames, sorted
    pub files: Vec<String>,
}

/// View over the directory the browser downloads into
#[derive(Debug, Clone)]
pub struct DownloadDirectory {
    root: PathBuf,
}

impl DownloadDirectory {
    /// Wrap `root`; nothing is touched until the first query.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory path
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the directory (and parents) if needed.
    pub fn ensure_exists(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Regular files in the directory. A missing directory lists as empty.
    fn entries(&self) -> io::Result<Vec<PathBuf>> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut paths = Vec::new();
        for entry in read_dir {
            // Entries can disappear mid-listing while the browser renames files
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Filenames of finished spreadsheet artifacts.
    pub fn list_artifacts(&self) -> io::Result<BTreeSet<String>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|path| has_extension(path, ARTIFACT_EXTENSION))
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    /// Finished artifacts with their metadata.
    pub fn artifacts(&self) -> io::Result<Vec<DownloadedArtifact>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|path| has_extension(path, ARTIFACT_EXTENSION))
            .filter_map(|path| DownloadedArtifact::from_path(&path).ok())
            .collect())
    }

    /// In-progress download markers.
    pub fn list_partial_downloads(&self) -> io::Result<Vec<PathBuf>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|path| PARTIAL_EXTENSIONS.iter().any(|ext| has_extension(path, ext)))
            .collect())
    }

    /// Whether any download is still in flight. Listing errors count as "no".
    pub fn has_partial_downloads(&self) -> bool {
        self.list_partial_downloads()
            .map(|partials| !partials.is_empty())
            .unwrap_or(false)
    }

    /// Remove every partial-download marker. Best effort: failures are ignored.
    ///
    /// Returns the number of markers removed.
    pub fn cleanup_orphan_partials(&self) -> usize {
        let Ok(partials) = self.list_partial_downloads() else {
            return 0;
        };

        let mut removed = 0;
        for path in partials {
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed orphan partial download");
                    removed += 1;
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Could not remove partial download"),
            }
        }
        removed
    }

    /// Artifacts matching `pattern`, oldest first.
    pub fn matching(&self, pattern: &FilenamePattern) -> io::Result<Vec<DownloadedArtifact>> {
        let mut matches: Vec<_> = self
            .artifacts()?
            .into_iter()
            .filter(|artifact| pattern.matches(&artifact.filename))
            .collect();
        matches.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(matches)
    }

    /// Whether `dataset` already has an artifact for `date`.
    pub fn is_satisfied(&self, dataset: &LogicalDataset, date: NaiveDate) -> io::Result<bool> {
        let pattern = FilenamePattern::for_dataset(dataset, date);
        Ok(self
            .list_artifacts()?
            .iter()
            .any(|filename| pattern.matches(filename)))
    }

    /// Datasets of `expected` with no artifact for `date`, in declared order.
    pub fn missing<'a>(
        &self,
        expected: &'a [LogicalDataset],
        date: NaiveDate,
    ) -> io::Result<Vec<&'a LogicalDataset>> {
        let files = self.list_artifacts()?;
        Ok(expected
            .iter()
            .filter(|dataset| {
                let pattern = FilenamePattern::for_dataset(dataset, date);
                !files.iter().any(|filename| pattern.matches(filename))
            })
            .collect())
    }

    /// Matching filenames per expected dataset, in declared order.
    pub fn presence(
        &self,
        expected: &[LogicalDataset],
        date: NaiveDate,
    ) -> io::Result<Vec<DatasetPresence>> {
        let files = self.list_artifacts()?;
        Ok(expected
            .iter()
            .map(|dataset| {
                let pattern = FilenamePattern::for_dataset(dataset, date);
                DatasetPresence {
                    dataset: dataset.name.clone(),
                    files: files
                        .iter()
                        .filter(|filename| pattern.matches(filename))
                        .cloned()
                        .collect(),
                }
            })
            .collect())
    }

    /// Keep only the most recently modified artifact per dataset for `date`.
    ///
    /// A file is attributed to the first dataset (in declared order) whose
    /// pattern it matches. Deletion failures are logged and skipped.
    /// Returns the paths that were removed.
    pub fn cleanup_duplicates(
        &self,
        expected: &[LogicalDataset],
        date: NaiveDate,
    ) -> io::Result<Vec<PathBuf>> {
        let patterns: Vec<_> = expected
            .iter()
            .map(|dataset| FilenamePattern::for_dataset(dataset, date))
            .collect();

        let mut groups: Vec<Vec<DownloadedArtifact>> = vec![Vec::new(); patterns.len()];
        for artifact in self.artifacts()? {
            if let Some(index) = patterns.iter().position(|p| p.matches(&artifact.filename)) {
                groups[index].push(artifact);
            }
        }

        let mut removed = Vec::new();
        for (pattern, mut group) in patterns.iter().zip(groups) {
            if group.len() < 2 {
                continue;
            }

            info!(
                dataset = pattern.dataset_name(),
                count = group.len(),
                "Duplicate artifacts found"
            );
            group.sort_by(|a, b| {
                a.modified
                    .cmp(&b.modified)
                    .then_with(|| a.filename.cmp(&b.filename))
            });
            group.pop();

            for stale in group {
                match fs::remove_file(&stale.path) {
                    Ok(()) => {
                        info!(file = %stale.filename, "Removed duplicate artifact");
                        removed.push(stale.path);
                    }
                    Err(e) => warn!(file = %stale.filename, error = %e, "Could not remove duplicate artifact"),
                }
            }
        }

        Ok(removed)
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
