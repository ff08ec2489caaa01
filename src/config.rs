//! Retry policy and timing configuration
//!
//! Defaults hold the production values. Every wait in the crate reads from
//! [`Timings`], so embedders and tests can shrink them as a whole.

use crate::dataset::LogicalDataset;
use chrono::NaiveDate;
use std::time::Duration;

/// Per-pass download attempts for a normal dataset.
pub const MAX_RETRIES_PER_FILE: u32 = 3;

/// Per-pass download attempts for a heavy dataset; each attempt is already expensive.
pub const HEAVY_MAX_RETRIES: u32 = 2;

/// Global passes over the still-missing datasets.
pub const MAX_GLOBAL_PASSES: u32 = 3;

/// Completion verification ceiling for a normal dataset.
pub const VERIFICATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Completion verification ceiling for a heavy dataset.
pub const HEAVY_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Ceiling for the download link to become clickable on a normal export.
pub const PREPARATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Ceiling for the download link to become clickable on a heavy export.
pub const HEAVY_PREPARATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Filesystem poll interval while waiting for an artifact.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Delay between the two size reads of the stability check.
pub const STABILIZATION_INTERVAL: Duration = Duration::from_secs(2);

/// Initial delay before a retry pass, in milliseconds.
pub const INITIAL_PASS_BACKOFF_MS: u64 = 5_000;

/// Maximum delay before a retry pass, in milliseconds.
pub const MAX_PASS_BACKOFF_MS: u64 = 60_000;

/// Lower bound of the export date range.
pub fn default_date_floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Calculate exponential backoff delay
pub fn calculate_backoff(base: Duration, max: Duration, retry_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry_count);
    base.saturating_mul(factor).min(max)
}

/// Bounded retry structure: per-file attempts nested inside global passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per dataset per pass
    pub max_retries: u32,
    /// Upper bound of attempts per pass for heavy datasets
    pub heavy_max_retries: u32,
    /// Global passes
    pub max_passes: u32,
    /// Delay before the second pass, doubled for each later pass
    pub pass_backoff: Duration,
    /// Cap on the delay between passes
    pub max_pass_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES_PER_FILE,
            heavy_max_retries: HEAVY_MAX_RETRIES,
            max_passes: MAX_GLOBAL_PASSES,
            pass_backoff: Duration::from_millis(INITIAL_PASS_BACKOFF_MS),
            max_pass_backoff: Duration::from_millis(MAX_PASS_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Set per-pass attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Set global passes
    pub fn with_max_passes(mut self, max_passes: u32) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    /// Attempts per pass for `dataset`.
    pub fn retries_for(&self, dataset: &LogicalDataset) -> u32 {
        if dataset.heavy {
            self.max_retries.min(self.heavy_max_retries).max(1)
        } else {
            self.max_retries.max(1)
        }
    }

    /// Delay before pass `pass` (1-based). The first pass starts immediately.
    pub fn backoff_before_pass(&self, pass: u32) -> Duration {
        if pass <= 1 {
            return Duration::ZERO;
        }
        calculate_backoff(self.pass_backoff, self.max_pass_backoff, pass - 2)
    }
}

/// Every bounded wait used by the trigger, verifier, and login flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Filesystem poll interval in the verifier
    pub poll_interval: Duration,
    /// Delay between size reads in the stability check
    pub stabilization_interval: Duration,
    /// Verification ceiling, normal datasets
    pub verification_timeout: Duration,
    /// Verification ceiling, heavy datasets
    pub heavy_verification_timeout: Duration,
    /// Download link ceiling, normal datasets
    pub preparation_timeout: Duration,
    /// Download link ceiling, heavy datasets
    pub heavy_preparation_timeout: Duration,
    /// Wait for an ordinary page element (date input, prepare button)
    pub element_timeout: Duration,
    /// Wait for the export progress modal to appear
    pub modal_timeout: Duration,
    /// Pause after the modal appears, normal datasets
    pub generation_wait: Duration,
    /// Pause after the modal appears, heavy datasets
    pub heavy_generation_wait: Duration,
    /// Wait spent on each download-link locator before trying the next
    pub link_probe_timeout: Duration,
    /// Wait before re-clicking after a stale or intercepted click
    pub click_retry_timeout: Duration,
    /// Pause after navigation
    pub page_settle: Duration,
    /// Pause between UI keystrokes and clicks
    pub ui_pause: Duration,
    /// Poll interval for UI conditions
    pub ui_poll_interval: Duration,
    /// Wait for the login form fields
    pub login_form_timeout: Duration,
    /// Wait for the submit click to leave the login page before pressing Enter
    pub login_redirect_grace: Duration,
    /// Wait for the post-login page
    pub login_confirm_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            stabilization_interval: STABILIZATION_INTERVAL,
            verification_timeout: VERIFICATION_TIMEOUT,
            heavy_verification_timeout: HEAVY_VERIFICATION_TIMEOUT,
            preparation_timeout: PREPARATION_TIMEOUT,
            heavy_preparation_timeout: HEAVY_PREPARATION_TIMEOUT,
            element_timeout: Duration::from_secs(30),
            modal_timeout: Duration::from_secs(120),
            generation_wait: Duration::from_secs(30),
            heavy_generation_wait: Duration::from_secs(60),
            link_probe_timeout: Duration::from_secs(10),
            click_retry_timeout: Duration::from_secs(5),
            page_settle: Duration::from_secs(3),
            ui_pause: Duration::from_millis(500),
            ui_poll_interval: Duration::from_millis(250),
            login_form_timeout: Duration::from_secs(60),
            login_redirect_grace: Duration::from_secs(2),
            login_confirm_timeout: Duration::from_secs(30),
        }
    }
}

impl Timings {
    /// Verification ceiling for `dataset`, honoring its override.
    pub fn verification_timeout_for(&self, dataset: &LogicalDataset) -> Duration {
        match dataset.verification_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None if dataset.heavy => self.heavy_verification_timeout,
            None => self.verification_timeout,
        }
    }

    /// Download link ceiling for `dataset`, honoring its override.
    pub fn preparation_timeout_for(&self, dataset: &LogicalDataset) -> Duration {
        match dataset.preparation_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None if dataset.heavy => self.heavy_preparation_timeout,
            None => self.preparation_timeout,
        }
    }

    /// Pause after the progress modal appears.
    pub fn generation_wait_for(&self, dataset: &LogicalDataset) -> Duration {
        if dataset.heavy {
            self.heavy_generation_wait
        } else {
            self.generation_wait
        }
    }
}
