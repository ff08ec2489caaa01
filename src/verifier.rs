//! Completion verifier
//!
//! Polls the download directory until an artifact matching the dataset's
//! pattern is present with a stable, non-zero size. A timeout is an ordinary
//! outcome, not an error.

use crate::config::Timings;
use crate::inventory::{DownloadDirectory, DownloadedArtifact};
use crate::naming::FilenamePattern;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Result of waiting for an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// A matching artifact is complete on disk
    Verified(DownloadedArtifact),
    /// Nothing acceptable appeared before the ceiling
    NotFound {
        /// Time spent polling
        waited: Duration,
    },
}

impl VerifyOutcome {
    /// The verified artifact, if any.
    pub fn artifact(&self) -> Option<&DownloadedArtifact> {
        match self {
            VerifyOutcome::Verified(artifact) => Some(artifact),
            VerifyOutcome::NotFound { .. } => None,
        }
    }
}

/// Filesystem-polling completion check
#[derive(Debug, Clone)]
pub struct CompletionVerifier {
    directory: DownloadDirectory,
    poll_interval: Duration,
    stabilization_interval: Duration,
}

impl CompletionVerifier {
    /// Verifier over `directory` using the poll and stabilization intervals of `timings`.
    pub fn new(directory: DownloadDirectory, timings: &Timings) -> Self {
        Self {
            directory,
            poll_interval: timings.poll_interval,
            stabilization_interval: timings.stabilization_interval,
        }
    }

    /// Wait up to `timeout` for a stable artifact matching `pattern`.
    pub async fn wait_for(&self, pattern: &FilenamePattern, timeout: Duration) -> VerifyOutcome {
        info!(
            expected = pattern.canonical_filename(),
            timeout_secs = timeout.as_secs(),
            "Verifying download"
        );
        let started = Instant::now();
        let deadline = started + timeout;

        while Instant::now() < deadline {
            if self.directory.has_partial_downloads() {
                info!(dataset = pattern.dataset_name(), "Download in progress");
                sleep(self.poll_interval).await;
                continue;
            }

            let candidates = match self.directory.matching(pattern) {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(error = %e, "Could not list download directory");
                    Vec::new()
                }
            };

            // Newest first: a fresh download is the likeliest to be the one in flight
            for candidate in candidates.iter().rev() {
                if self.is_stable(&candidate.path).await {
                    if let Ok(artifact) = DownloadedArtifact::from_path(&candidate.path) {
                        return VerifyOutcome::Verified(artifact);
                    }
                }
                debug!(file = %candidate.filename, "Matching file not stable yet");
            }

            sleep(self.poll_interval).await;
        }

        VerifyOutcome::NotFound {
            waited: started.elapsed(),
        }
    }

    /// Whether `path` has the same non-zero size across one stabilization interval.
    pub async fn is_stable(&self, path: &Path) -> bool {
        let Some(first) = file_size(path) else {
            return false;
        };
        sleep(self.stabilization_interval).await;
        let Some(second) = file_size(path) else {
            return false;
        };
        first > 0 && first == second
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
