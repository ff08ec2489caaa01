//! # CommCare Downloader Library
//!
//! Drives a browser through CommCare's export pages to download a declared
//! set of spreadsheet exports, and confirms each one by watching the download
//! directory.
//!
//! ## Features
//!
//! - **Idempotent Re-entry**: datasets already on disk for today are never downloaded again
//! - **Bounded Retries**: per-dataset attempts nested inside global passes
//! - **Filesystem Verification**: a download counts only once its file is present and stable
//! - **Single Session**: one authenticated browser session per run, always closed
//! - **Catalog**: the production exports are embedded, grouped by program area
//!
//! ## Quick Start
//!
//! ```no_run
//! use commcare_downloader::browser::webdriver::{BrowserOptions, WebDriverLauncher};
//! use commcare_downloader::catalog::DatasetCatalog;
//! use commcare_downloader::controller::DownloadController;
//! use commcare_downloader::inventory::DownloadDirectory;
//! use commcare_downloader::session::Credentials;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let expected = DatasetCatalog::load_embedded()?.datasets().to_vec();
//! let launcher = WebDriverLauncher::new(BrowserOptions::new("http://localhost:9515", "data"))?;
//! let credentials = Credentials::load(Some("id_cc.env".as_ref()))?;
//!
//! let controller = DownloadController::new(
//!     expected,
//!     DownloadDirectory::new("data"),
//!     Arc::new(launcher),
//!     credentials,
//! );
//! let report = controller.run().await?;
//! println!("{} of {} present", report.succeeded(), report.datasets.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`naming`] - Filename patterns for one dataset on one date
//! - [`inventory`] - Uncached view of the download directory
//! - [`browser`] - Browser capability traits and the WebDriver client
//! - [`session`] - Login
//! - [`trigger`] - Export page workflow up to the download click
//! - [`verifier`] - Filesystem completion polling
//! - [`controller`] - Retry/pass state machine and run report

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Browser capability abstraction
pub mod browser;

/// Embedded dataset catalog
pub mod catalog;

/// CLI command implementations
pub mod cli;

/// Retry policy and timings
pub mod config;

/// Retry/pass controller
pub mod controller;

/// Logical dataset descriptors
pub mod dataset;

/// Download directory inventory
pub mod inventory;

/// Prometheus metrics
pub mod metrics;

/// Artifact naming and matching
pub mod naming;

/// Login
pub mod session;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Export page workflow
pub mod trigger;

/// Download completion verification
pub mod verifier;

// Re-export commonly used types
pub use controller::{DownloadController, RunReport, RunStatus};
pub use dataset::{LogicalDataset, NamingClass, Program};
pub use naming::FilenamePattern;
