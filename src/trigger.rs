//! Download trigger
//!
//! Drives the export page of one dataset up to the point where the browser
//! has been asked to download the file. Whether the file actually lands is
//! the verifier's concern.

use crate::browser::wait::{first_clickable, wait_for_clickable, wait_for_visible};
use crate::browser::{keys, BrowserError, BrowserSession, ElementHandle, Locator};
use crate::config::Timings;
use crate::dataset::LogicalDataset;
use chrono::NaiveDate;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Date range text input on the export form
pub const DATE_RANGE_INPUT: Locator = Locator::id("id_date_range");

/// Progress modal shown while the export is generated
pub const EXPORT_MODAL: Locator = Locator::id("download-progress");

/// Export preparation button, tried in order
pub static PREPARE_LOCATORS: [Locator; 3] = [
    Locator::css("#download-export-form button[type='submit']"),
    Locator::css("#download-export-form .btn-primary"),
    Locator::xpath("//div[@id='download-export-form']//button[contains(@class,'btn')]"),
];

/// Download link or button once the export is ready, tried in order.
///
/// Case and form exports render the modal differently, so the list runs from
/// the most specific markup to the loosest.
pub static DOWNLOAD_LINK_LOCATORS: [Locator; 7] = [
    Locator::css("#download-progress a[href$='.xlsx']"),
    Locator::css("#download-progress form a"),
    Locator::css("#download-progress a"),
    Locator::xpath(
        "//div[@id='download-progress']//a[contains(., 'Download') or contains(., 'Télécharger')]",
    ),
    Locator::xpath("//a[contains(@href, 'download') and contains(@href, '.xlsx')]"),
    Locator::xpath("//button[contains(., 'Download') or contains(., 'Télécharger')]"),
    Locator::css("a[href*='download']"),
];

const PAGE_BODY: Locator = Locator::tag("body");

const DIAGNOSTIC_SOURCE_CHARS: usize = 2000;

/// Why a trigger attempt did not start a download
#[derive(Debug, thiserror::Error)]
pub enum TriggerFailure {
    /// The export page could not be loaded
    #[error("navigation to {url} failed: {source}")]
    Navigation {
        /// Export URL
        url: String,
        /// Browser error
        source: BrowserError,
    },

    /// No preparation button became clickable
    #[error("export preparation button not found")]
    PrepareButtonNotFound,

    /// The export never offered a clickable download link
    #[error("no clickable download link within {0:?}")]
    DownloadLinkNotFound(Duration),

    /// Any other browser failure
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
}

impl TriggerFailure {
    /// Stable label for the failure kind, without URLs or error text
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerFailure::Navigation { .. } => "navigation",
            TriggerFailure::PrepareButtonNotFound => "prepare_button_not_found",
            TriggerFailure::DownloadLinkNotFound(_) => "download_link_not_found",
            TriggerFailure::Browser(_) => "browser",
        }
    }
}

/// Result of one trigger attempt
pub type TriggerOutcome = Result<(), TriggerFailure>;

/// Drives export pages for one run
#[derive(Debug, Clone)]
pub struct DownloadTrigger {
    timings: Timings,
    date_floor: NaiveDate,
    today: NaiveDate,
}

impl DownloadTrigger {
    /// Trigger exporting `date_floor..=today`.
    pub fn new(timings: Timings, date_floor: NaiveDate, today: NaiveDate) -> Self {
        Self {
            timings,
            date_floor,
            today,
        }
    }

    /// Text typed into the date range input
    pub fn date_range_text(&self) -> String {
        format!(
            "{} to {}",
            self.date_floor.format("%Y-%m-%d"),
            self.today.format("%Y-%m-%d")
        )
    }

    /// Run the export workflow for `dataset`.
    pub async fn trigger(
        &self,
        session: &dyn BrowserSession,
        dataset: &LogicalDataset,
    ) -> TriggerOutcome {
        let preparation_timeout = self.timings.preparation_timeout_for(dataset);
        info!(
            url = %dataset.export_url,
            heavy = dataset.heavy,
            preparation_timeout_secs = preparation_timeout.as_secs(),
            "Opening export page"
        );

        session
            .navigate(&dataset.export_url)
            .await
            .map_err(|source| TriggerFailure::Navigation {
                url: dataset.export_url.clone(),
                source,
            })?;
        sleep(self.timings.page_settle).await;

        self.set_date_range(session).await;
        self.submit_export(session).await?;

        match wait_for_visible(
            session,
            &EXPORT_MODAL,
            self.timings.modal_timeout,
            self.timings.ui_poll_interval,
        )
        .await
        {
            Ok(_) => {
                let pause = self.timings.generation_wait_for(dataset);
                info!(wait_secs = pause.as_secs(), "Export modal shown, waiting for generation");
                sleep(pause).await;
            }
            Err(BrowserError::Timeout { .. }) => {
                warn!("Export modal not detected in time, looking for the link anyway");
            }
            Err(e) => return Err(e.into()),
        }

        match self.click_download_link(session, preparation_timeout).await? {
            Some(locator) => {
                info!(%locator, "Download triggered");
                Ok(())
            }
            None => {
                self.log_page_source(session).await;
                Err(TriggerFailure::DownloadLinkNotFound(preparation_timeout))
            }
        }
    }

    /// Type the date range. Failures are logged and the page is released.
    async fn set_date_range(&self, session: &dyn BrowserSession) {
        if let Err(e) = self.try_set_date_range(session).await {
            warn!(error = %e, "Could not set the date range");
            self.unfreeze(session).await;
        }
    }

    async fn try_set_date_range(&self, session: &dyn BrowserSession) -> Result<(), BrowserError> {
        let pause = self.timings.ui_pause;
        let input = wait_for_visible(
            session,
            &DATE_RANGE_INPUT,
            self.timings.element_timeout,
            self.timings.ui_poll_interval,
        )
        .await?;

        session.click(&input).await?;
        sleep(pause).await;
        session.clear(&input).await?;
        sleep(pause).await;
        session
            .send_keys(&input, &format!("{}a", keys::CONTROL))
            .await?;
        session.send_keys(&input, keys::DELETE).await?;
        sleep(pause).await;

        let range = self.date_range_text();
        session.send_keys(&input, &range).await?;
        info!(range = %range, "Date range entered");
        session.send_keys(&input, keys::TAB).await?;
        sleep(pause).await;

        self.unfreeze(session).await;
        Ok(())
    }

    /// Dismiss date pickers and overlays left open by typing.
    async fn unfreeze(&self, session: &dyn BrowserSession) {
        let result: Result<(), BrowserError> = async {
            let body = session.find_element(&PAGE_BODY).await?;
            session.js_click(&body).await?;
            sleep(self.timings.ui_pause).await;
            session.send_keys(&body, keys::ESCAPE).await?;
            sleep(self.timings.ui_pause).await;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Could not release the page");
        }
    }

    async fn submit_export(&self, session: &dyn BrowserSession) -> Result<(), TriggerFailure> {
        let (button, locator) = first_clickable(
            session,
            &PREPARE_LOCATORS,
            self.timings.element_timeout,
            self.timings.ui_poll_interval,
        )
        .await
        .map_err(|e| match e {
            BrowserError::Timeout { .. } => TriggerFailure::PrepareButtonNotFound,
            other => TriggerFailure::Browser(other),
        })?;

        debug!(%locator, "Submitting export");
        session.scroll_into_view(&button).await?;
        match session.click(&button).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_click_race() => {
                debug!(error = %e, "Prepare click raced the page, retrying once");
                self.retry_click(session, locator).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-locate the element and click it through script.
    async fn retry_click(
        &self,
        session: &dyn BrowserSession,
        locator: &Locator,
    ) -> Result<ElementHandle, BrowserError> {
        let element = wait_for_clickable(
            session,
            locator,
            self.timings.click_retry_timeout,
            self.timings.ui_poll_interval,
        )
        .await?;
        session.js_click(&element).await?;
        Ok(element)
    }

    /// Sweep the link locators until one is clicked or `timeout` elapses.
    ///
    /// Returns the locator that worked.
    async fn click_download_link(
        &self,
        session: &dyn BrowserSession,
        timeout: Duration,
    ) -> Result<Option<&'static Locator>, BrowserError> {
        let deadline = Instant::now() + timeout;

        loop {
            for locator in DOWNLOAD_LINK_LOCATORS.iter() {
                let element = match wait_for_clickable(
                    session,
                    locator,
                    self.timings.link_probe_timeout,
                    self.timings.ui_poll_interval,
                )
                .await
                {
                    Ok(element) => element,
                    Err(BrowserError::Timeout { .. }) => continue,
                    Err(e) => return Err(e),
                };

                match self.click_link(session, &element).await {
                    Ok(()) => return Ok(Some(locator)),
                    Err(e) if e.is_click_race() => {
                        debug!(%locator, "Download link went stale, retrying once");
                        match self.retry_click(session, locator).await {
                            Ok(_) => return Ok(Some(locator)),
                            Err(e) => debug!(%locator, error = %e, "Retry click failed"),
                        }
                    }
                    Err(e) => debug!(%locator, error = %e, "Download link click failed"),
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.timings.poll_interval).await;
        }
    }

    async fn click_link(
        &self,
        session: &dyn BrowserSession,
        element: &ElementHandle,
    ) -> Result<(), BrowserError> {
        session.scroll_into_view(element).await?;
        sleep(self.timings.ui_pause).await;
        session.js_click(element).await
    }

    async fn log_page_source(&self, session: &dyn BrowserSession) {
        match session.page_source().await {
            Ok(source) => {
                let snippet: String = source.chars().take(DIAGNOSTIC_SOURCE_CHARS).collect();
                debug!(page_source = %snippet, "No download link on page");
            }
            Err(e) => debug!(error = %e, "Could not read page source"),
        }
    }
}
