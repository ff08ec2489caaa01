//! Retry/pass controller
//!
//! Entry point of a run. Skips datasets already on disk, authenticates one
//! browser session, then sweeps the missing datasets in bounded passes with
//! bounded attempts per dataset. The browser is closed on every exit path,
//! including interruption and panics inside the pass loop.
//!
//! ```text
//! INITIALIZING -> AUTHENTICATING -> PASS_RUNNING(1..=max_passes) -> DONE
//!       \__________ nothing missing ___________________________/
//! ```

use crate::browser::{BrowserError, BrowserLauncher, BrowserSession};
use crate::config::{default_date_floor, RetryPolicy, Timings};
use crate::dataset::{LogicalDataset, Program};
use crate::inventory::{DownloadDirectory, DownloadedArtifact};
use crate::metrics::{self, AttemptMetrics};
use crate::naming::FilenamePattern;
use crate::session::{authenticate, AuthError, Credentials};
use crate::shutdown::{self, SharedShutdown};
use crate::trigger::DownloadTrigger;
use crate::verifier::{CompletionVerifier, VerifyOutcome};
use chrono::NaiveDate;
use futures_util::FutureExt;
use indicatif::ProgressBar;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// Controller errors. Per-dataset failures are reported, never raised.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Login failed; the run cannot proceed
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The browser could not be started
    #[error("browser launch failed: {0}")]
    Launch(BrowserError),

    /// The download directory could not be read or created
    #[error("download directory error: {0}")]
    Inventory(#[from] std::io::Error),

    /// Shutdown was requested before the run finished
    #[error("interrupted")]
    Interrupted,
}

/// Controller state, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Inventory checks before any browser work
    Initializing,
    /// Launching and logging in
    Authenticating,
    /// Sweeping missing datasets
    PassRunning(u32),
    /// Finished
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initializing => f.write_str("INITIALIZING"),
            RunState::Authenticating => f.write_str("AUTHENTICATING"),
            RunState::PassRunning(pass) => write!(f, "PASS_RUNNING {pass}"),
            RunState::Done => f.write_str("DONE"),
        }
    }
}

/// Final disposition of one dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Disposition {
    /// On disk before the run started
    AlreadyPresent,
    /// Downloaded and verified
    Downloaded {
        /// Pass of the successful attempt
        pass: u32,
        /// Attempt within that pass
        attempt: u32,
    },
    /// Appeared on disk without a verified attempt (late download or another process)
    SatisfiedOutOfBand {
        /// Pass during or before which it was noticed
        pass: u32,
    },
    /// Still missing at the end of the run
    Failed {
        /// Attempts spent across all passes
        attempts: u32,
    },
}

impl Disposition {
    /// Whether the dataset ended up on disk.
    pub fn is_success(&self) -> bool {
        !matches!(self, Disposition::Failed { .. })
    }
}

/// Per-dataset line of the report
#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    /// Dataset name
    pub dataset: String,
    /// Program area
    pub program: Program,
    /// What happened
    pub disposition: Disposition,
    /// Matching artifact filename, if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Counts for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Pass number, from 1
    pub pass: u32,
    /// Datasets in the working set
    pub attempted: usize,
    /// Datasets satisfied during the pass
    pub succeeded: usize,
    /// Datasets carried over
    pub failed: usize,
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Everything was already present; no browser was launched
    NothingToDo,
    /// Every expected dataset is present
    Complete,
    /// At least one expected dataset is still missing
    Partial,
}

impl RunStatus {
    /// Label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NothingToDo => "nothing_to_do",
            RunStatus::Complete => "complete",
            RunStatus::Partial => "partial",
        }
    }
}

/// Artifact listed in a complete run's report
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactListing {
    /// File name
    pub filename: String,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Outcome of a run, computed from the final directory state
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Date the artifacts were expected for
    pub date: NaiveDate,
    /// Overall status
    pub status: RunStatus,
    /// One line per expected dataset, in declared order
    pub datasets: Vec<DatasetReport>,
    /// One line per pass actually run
    pub passes: Vec<PassSummary>,
    /// Download attempts across the run
    pub total_attempts: u32,
    /// Whether a browser was started
    pub browser_launched: bool,
    /// Duplicate artifacts removed
    pub duplicates_removed: usize,
    /// Wall time of the run
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Today's artifacts, listed when the run is complete
    pub artifacts: Vec<ArtifactListing>,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl RunReport {
    /// Datasets present at the end of the run
    pub fn succeeded(&self) -> usize {
        self.datasets
            .iter()
            .filter(|d| d.disposition.is_success())
            .count()
    }

    /// Names of datasets still missing
    pub fn failed(&self) -> Vec<&str> {
        self.datasets
            .iter()
            .filter(|d| !d.disposition.is_success())
            .map(|d| d.dataset.as_str())
            .collect()
    }

    /// Datasets obtained during this run
    pub fn downloaded(&self) -> usize {
        self.datasets
            .iter()
            .filter(|d| {
                matches!(
                    d.disposition,
                    Disposition::Downloaded { .. } | Disposition::SatisfiedOutOfBand { .. }
                )
            })
            .count()
    }

    /// Wall time divided by datasets obtained during this run
    pub fn average_per_download(&self) -> Option<Duration> {
        let downloaded = self.downloaded() as u32;
        (downloaded > 0).then(|| self.elapsed / downloaded)
    }

    /// Whether every expected dataset is present
    pub fn is_complete(&self) -> bool {
        self.status != RunStatus::Partial
    }

    /// Report line for `dataset`
    pub fn dataset(&self, name: &str) -> Option<&DatasetReport> {
        self.datasets.iter().find(|d| d.dataset == name)
    }
}

/// Format a duration as `"Xm Ys"`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// What one pass did for one dataset
enum DatasetResult {
    /// Verified after `attempt`
    Downloaded { attempt: u32 },
    /// Found on disk before an attempt started
    Present { before_attempt: u32 },
    /// Attempts exhausted
    Exhausted { attempts: u32 },
}

#[derive(Default)]
struct SessionOutcome {
    dispositions: HashMap<String, Disposition>,
    attempts: HashMap<String, u32>,
    passes: Vec<PassSummary>,
    total_attempts: u32,
}

/// Drives a run over the expected set
pub struct DownloadController {
    expected: Vec<LogicalDataset>,
    directory: DownloadDirectory,
    launcher: Arc<dyn BrowserLauncher>,
    credentials: Credentials,
    policy: RetryPolicy,
    timings: Timings,
    today: NaiveDate,
    date_floor: NaiveDate,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressBar>,
}

impl DownloadController {
    /// Controller for `expected`, downloading into `directory` for today's date.
    pub fn new(
        expected: Vec<LogicalDataset>,
        directory: DownloadDirectory,
        launcher: Arc<dyn BrowserLauncher>,
        credentials: Credentials,
    ) -> Self {
        Self {
            expected,
            directory,
            launcher,
            credentials,
            policy: RetryPolicy::default(),
            timings: Timings::default(),
            today: chrono::Local::now().date_naive(),
            date_floor: default_date_floor(),
            shutdown: shutdown::get_global_shutdown(),
            progress: None,
        }
    }

    /// Set the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set all waits
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Override the date artifacts are expected for
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Set the lower bound of the export date range
    pub fn with_date_floor(mut self, date_floor: NaiveDate) -> Self {
        self.date_floor = date_floor;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Report per-pass progress on a bar
    pub fn with_progress(mut self, progress: Option<ProgressBar>) -> Self {
        self.progress = progress;
        self
    }

    /// Expected set
    pub fn expected(&self) -> &[LogicalDataset] {
        &self.expected
    }

    fn transition(&self, state: RunState) {
        info!(state = %state, "State transition");
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Run to completion.
    ///
    /// Returns a report for both complete and partial runs. Errors are
    /// reserved for authentication failure, browser launch failure,
    /// directory I/O failure, and interruption.
    pub async fn run(&self) -> Result<RunReport, ControllerError> {
        let started = Instant::now();
        self.transition(RunState::Initializing);

        self.directory.ensure_exists()?;
        let duplicates_removed = self.directory.cleanup_duplicates(&self.expected, self.today)?.len();
        let missing = self.directory.missing(&self.expected, self.today)?;
        info!(
            date = %self.today,
            expected = self.expected.len(),
            present = self.expected.len() - missing.len(),
            missing = missing.len(),
            "Initial inventory"
        );

        if missing.is_empty() {
            info!("All expected files already present, nothing to download");
            self.transition(RunState::Done);
            let report = self.build_report(started, SessionOutcome::default(), false, duplicates_removed)?;
            self.log_summary(&report);
            return Ok(report);
        }

        for dataset in &missing {
            info!(dataset = %dataset.name, "Missing");
        }

        if self.shutdown_requested() {
            return Err(ControllerError::Interrupted);
        }

        self.transition(RunState::Authenticating);
        let session = self.launcher.launch().await.map_err(ControllerError::Launch)?;

        let body = AssertUnwindSafe(self.run_session(session.as_ref(), missing)).catch_unwind();
        let outcome = match &self.shutdown {
            Some(shutdown) => tokio::select! {
                result = body => Some(result),
                _ = shutdown.wait_for_shutdown() => None,
            },
            None => Some(body.await),
        };

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close browser session");
        }
        if let Some(progress) = &self.progress {
            progress.finish_and_clear();
        }

        let outcome = match outcome {
            None => {
                warn!("Run interrupted");
                return Err(ControllerError::Interrupted);
            }
            Some(Err(panic)) => std::panic::resume_unwind(panic),
            Some(Ok(result)) => result?,
        };

        self.transition(RunState::Done);
        let report = self.build_report(started, outcome, true, duplicates_removed)?;
        self.log_summary(&report);
        Ok(report)
    }

    async fn run_session(
        &self,
        session: &dyn BrowserSession,
        missing: Vec<&LogicalDataset>,
    ) -> Result<SessionOutcome, ControllerError> {
        let landing_url = match missing.first() {
            Some(dataset) => dataset.export_url.clone(),
            None => return Ok(SessionOutcome::default()),
        };
        authenticate(session, &self.credentials, &landing_url, &self.timings).await?;

        let trigger = DownloadTrigger::new(self.timings.clone(), self.date_floor, self.today);
        let verifier = CompletionVerifier::new(self.directory.clone(), &self.timings);
        let mut outcome = SessionOutcome::default();
        let mut working = missing;

        for pass in 1..=self.policy.max_passes {
            if pass > 1 {
                working = self.recheck_between_passes(working, pass, &mut outcome);
                if working.is_empty() {
                    info!(pass, "Nothing left to retry");
                    break;
                }

                let backoff = self.policy.backoff_before_pass(pass);
                if !backoff.is_zero() {
                    info!(pass, backoff_ms = backoff.as_millis() as u64, "Waiting before next pass");
                    tokio::time::sleep(backoff).await;
                }
            }

            self.transition(RunState::PassRunning(pass));
            info!(
                pass,
                max_passes = self.policy.max_passes,
                datasets = working.len(),
                "Starting pass"
            );
            if let Some(progress) = &self.progress {
                progress.reset();
                progress.set_length(working.len() as u64);
                progress.set_message(format!("pass {pass}/{}", self.policy.max_passes));
            }

            let mut failed = Vec::new();
            for dataset in &working {
                let span = info_span!("dataset", name = %dataset.name, pass);
                let result = self
                    .download_with_verification(session, &trigger, &verifier, dataset, pass, &mut outcome)
                    .instrument(span)
                    .await;

                match result {
                    DatasetResult::Downloaded { attempt } => {
                        outcome
                            .dispositions
                            .insert(dataset.name.clone(), Disposition::Downloaded { pass, attempt });
                    }
                    DatasetResult::Present { before_attempt: 1 } => {
                        outcome
                            .dispositions
                            .insert(dataset.name.clone(), Disposition::SatisfiedOutOfBand { pass });
                    }
                    DatasetResult::Present { before_attempt } => {
                        outcome.dispositions.insert(
                            dataset.name.clone(),
                            Disposition::Downloaded {
                                pass,
                                attempt: before_attempt - 1,
                            },
                        );
                    }
                    DatasetResult::Exhausted { attempts } => {
                        error!(
                            dataset = %dataset.name,
                            pass,
                            attempts,
                            "Dataset failed for this pass"
                        );
                        metrics::record_dataset_failed(&dataset.name, pass);
                        failed.push(*dataset);
                    }
                }

                if let Some(progress) = &self.progress {
                    progress.inc(1);
                }
            }

            let summary = PassSummary {
                pass,
                attempted: working.len(),
                succeeded: working.len() - failed.len(),
                failed: failed.len(),
            };
            info!(
                pass,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Pass finished"
            );
            metrics::record_pass(pass, failed.len());
            outcome.passes.push(summary);
            working = failed;

            if working.is_empty() {
                break;
            }
        }

        Ok(outcome)
    }

    /// Drop datasets that appeared on disk since the last pass.
    fn recheck_between_passes<'a>(
        &self,
        working: Vec<&'a LogicalDataset>,
        pass: u32,
        outcome: &mut SessionOutcome,
    ) -> Vec<&'a LogicalDataset> {
        working
            .into_iter()
            .filter(|dataset| match self.directory.is_satisfied(dataset, self.today) {
                Ok(true) => {
                    info!(dataset = %dataset.name, pass, "Appeared on disk between passes");
                    outcome
                        .dispositions
                        .insert(dataset.name.clone(), Disposition::SatisfiedOutOfBand { pass: pass - 1 });
                    false
                }
                Ok(false) => true,
                Err(e) => {
                    warn!(dataset = %dataset.name, error = %e, "Could not re-check dataset");
                    true
                }
            })
            .collect()
    }

    async fn download_with_verification(
        &self,
        session: &dyn BrowserSession,
        trigger: &DownloadTrigger,
        verifier: &CompletionVerifier,
        dataset: &LogicalDataset,
        pass: u32,
        outcome: &mut SessionOutcome,
    ) -> DatasetResult {
        let pattern = FilenamePattern::for_dataset(dataset, self.today);
        let max_attempts = self.policy.retries_for(dataset);
        let timeout = self.timings.verification_timeout_for(dataset);

        for attempt in 1..=max_attempts {
            match self.directory.is_satisfied(dataset, self.today) {
                Ok(true) => {
                    info!(attempt, "Already present, no download started");
                    self.cleanup_duplicates();
                    return DatasetResult::Present {
                        before_attempt: attempt,
                    };
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Could not check download directory"),
            }

            info!(
                attempt,
                max_attempts,
                pass,
                expected = pattern.canonical_filename(),
                "Downloading"
            );
            outcome.total_attempts += 1;
            *outcome.attempts.entry(dataset.name.clone()).or_insert(0) += 1;
            let attempt_metrics = AttemptMetrics::start(&dataset.name, pass, attempt);

            self.directory.cleanup_orphan_partials();
            if let Err(failure) = trigger.trigger(session, dataset).await {
                warn!(attempt, error = %failure, "Export trigger failed");
                attempt_metrics.record_trigger_failure(failure.kind());
            }

            // A failed trigger can still have started the download
            match verifier.wait_for(&pattern, timeout).await {
                VerifyOutcome::Verified(artifact) => {
                    info!(
                        attempt,
                        file = %artifact.filename,
                        size_mb = %format!("{:.1}", artifact.size_mb()),
                        "Download verified"
                    );
                    attempt_metrics.record_verified(artifact.size);
                    self.cleanup_duplicates();
                    return DatasetResult::Downloaded { attempt };
                }
                VerifyOutcome::NotFound { waited } => {
                    warn!(
                        attempt,
                        max_attempts,
                        waited_secs = waited.as_secs(),
                        "Download not confirmed"
                    );
                    attempt_metrics.record_not_verified();
                    self.directory.cleanup_orphan_partials();
                }
            }
        }

        DatasetResult::Exhausted {
            attempts: max_attempts,
        }
    }

    fn cleanup_duplicates(&self) {
        if let Err(e) = self.directory.cleanup_duplicates(&self.expected, self.today) {
            warn!(error = %e, "Duplicate cleanup failed");
        }
    }

    fn build_report(
        &self,
        started: Instant,
        outcome: SessionOutcome,
        browser_launched: bool,
        duplicates_removed: usize,
    ) -> Result<RunReport, ControllerError> {
        let presence = self.directory.presence(&self.expected, self.today)?;
        let last_pass = outcome.passes.last().map(|p| p.pass).unwrap_or(0);

        let datasets: Vec<DatasetReport> = self
            .expected
            .iter()
            .zip(&presence)
            .map(|(dataset, present)| {
                let attempts = outcome.attempts.get(&dataset.name).copied().unwrap_or(0);
                let disposition = if present.files.is_empty() {
                    Disposition::Failed { attempts }
                } else {
                    match outcome.dispositions.get(&dataset.name) {
                        Some(disposition) => *disposition,
                        None if attempts > 0 => Disposition::SatisfiedOutOfBand { pass: last_pass },
                        None => Disposition::AlreadyPresent,
                    }
                };
                DatasetReport {
                    dataset: dataset.name.clone(),
                    program: dataset.program,
                    disposition,
                    file: present.files.last().cloned(),
                }
            })
            .collect();

        let all_present = datasets.iter().all(|d| d.disposition.is_success());
        let status = match (all_present, browser_launched) {
            (true, false) => RunStatus::NothingToDo,
            (true, true) => RunStatus::Complete,
            (false, _) => RunStatus::Partial,
        };

        let artifacts = if all_present {
            presence
                .iter()
                .flat_map(|p| p.files.iter())
                .filter_map(|filename| {
                    DownloadedArtifact::from_path(&self.directory.path().join(filename)).ok()
                })
                .map(|artifact| ArtifactListing {
                    filename: artifact.filename,
                    size_bytes: artifact.size,
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(RunReport {
            date: self.today,
            status,
            datasets,
            passes: outcome.passes,
            total_attempts: outcome.total_attempts,
            browser_launched,
            duplicates_removed,
            elapsed: started.elapsed(),
            artifacts,
        })
    }

    fn log_summary(&self, report: &RunReport) {
        let failed = report.failed();
        info!(
            status = report.status.as_str(),
            succeeded = report.succeeded(),
            failed = failed.len(),
            attempts = report.total_attempts,
            elapsed = %format_elapsed(report.elapsed),
            "Run finished"
        );
        if let Some(average) = report.average_per_download() {
            info!(average_secs = average.as_secs(), "Average time per downloaded file");
        }
        metrics::record_run(report.status.as_str());

        if failed.is_empty() {
            for artifact in &report.artifacts {
                info!(
                    file = %artifact.filename,
                    size_mb = %format!("{:.1}", artifact.size_bytes as f64 / (1024.0 * 1024.0)),
                    "Present"
                );
            }
        } else {
            for name in &failed {
                error!(dataset = %name, "Still missing after all passes");
            }
        }
    }
}
