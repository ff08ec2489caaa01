//! Run command and top-level CLI definition

use crate::browser::webdriver::{BrowserOptions, WebDriverLauncher, DEFAULT_WEBDRIVER_URL};
use crate::catalog::DatasetCatalog;
use crate::config::{default_date_floor, RetryPolicy};
use crate::controller::{format_elapsed, DownloadController, RunReport, RunStatus};
use crate::dataset::{LogicalDataset, Program};
use crate::inventory::DownloadDirectory;
use crate::session::{AuthError, Credentials, DEFAULT_ENV_FILE};
use crate::shutdown::SharedShutdown;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::{CheckCommand, CleanCommand, CliError, ListCommand, OutputFormat};
use super::{EXIT_PARTIAL, EXIT_SUCCESS};

/// CommCare export downloader CLI
#[derive(Parser, Debug)]
#[command(name = "commcare-downloader")]
#[command(about = "Download and verify CommCare spreadsheet exports", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Directory the browser downloads into
    #[arg(long, global = true, env = "COMMCARE_DOWNLOAD_DIR", default_value = "data")]
    pub download_dir: PathBuf,

    /// JSON catalog replacing the embedded one
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Only this dataset (repeatable)
    #[arg(long = "dataset", global = true)]
    pub datasets: Vec<String>,

    /// Only datasets of this program: call, ptme, oev, muso, gardens (repeatable)
    #[arg(long = "program", global = true)]
    pub programs: Vec<Program>,

    /// Date artifacts are expected for (default: today)
    #[arg(long, global = true)]
    pub date: Option<NaiveDate>,
}

impl Cli {
    /// Load the catalog
    pub fn load_catalog(&self) -> Result<DatasetCatalog, CliError> {
        match &self.catalog {
            Some(path) => Ok(DatasetCatalog::from_path(path)?),
            None => Ok(DatasetCatalog::load_embedded()?),
        }
    }

    /// Expected set after applying `--dataset` and `--program`
    pub fn expected_set(&self) -> Result<Vec<LogicalDataset>, CliError> {
        let catalog = self.load_catalog()?;
        Ok(catalog.select(&self.datasets, &self.programs)?)
    }

    /// Target date
    pub fn today(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// Download directory view
    pub fn directory(&self) -> DownloadDirectory {
        DownloadDirectory::new(&self.download_dir)
    }

    /// Execute the selected command, returning the process exit code.
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<i32, CliError> {
        match &self.command {
            Commands::Run(args) => args.execute(self, shutdown).await,
            Commands::Check(cmd) => cmd.execute(self),
            Commands::Clean(cmd) => cmd.execute(self),
            Commands::List(cmd) => cmd.execute(self),
        }
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download every missing dataset and verify it on disk
    Run(RunArgs),

    /// Report present and missing datasets without launching a browser
    Check(CheckCommand),

    /// Remove orphan partial downloads and duplicate artifacts
    Clean(CleanCommand),

    /// List the dataset catalog
    List(ListCommand),
}

/// Run command arguments
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// WebDriver endpoint (chromedriver)
    #[arg(long, env = "WEBDRIVER_URL", default_value = DEFAULT_WEBDRIVER_URL)]
    pub webdriver_url: String,

    /// Run the browser without a window
    #[arg(long, default_value_t = false)]
    pub headless: bool,

    /// Attempts per dataset per pass (heavy datasets are capped at 2)
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: u32,

    /// Passes over the still-missing datasets
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_passes: u32,

    /// Credentials file with EMAIL and PASSWORD (or PASSWORD_CC)
    #[arg(long, default_value = DEFAULT_ENV_FILE)]
    pub env_file: PathBuf,

    /// Lower bound of the export date range (default: 2021-01-01)
    #[arg(long)]
    pub date_floor: Option<NaiveDate>,

    /// Exit 0 even when some datasets are still missing
    #[arg(long, default_value_t = false)]
    pub allow_partial: bool,

    /// Expose Prometheus metrics on this address (e.g., 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<i32, CliError> {
        let expected = cli.expected_set()?;
        let today = cli.today();
        let directory = cli.directory();
        let date_floor = self.date_floor.unwrap_or_else(default_date_floor);
        if date_floor > today {
            return Err(CliError::InvalidArgument(format!(
                "date floor {date_floor} is after {today}"
            )));
        }

        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr)
                .await
                .map_err(|e| CliError::ConfigurationError(e.to_string()))?;
        }

        let credentials = match Credentials::load(Some(&self.env_file)) {
            Ok(credentials) => credentials,
            // Credentials only matter when something has to be downloaded
            Err(e @ AuthError::MissingCredentials(_))
                if directory.missing(&expected, today)?.is_empty() =>
            {
                debug!(error = %e, "No credentials, none needed");
                Credentials::new("", "")
            }
            Err(e) => return Err(e.into()),
        };

        let options = BrowserOptions::new(&self.webdriver_url, &cli.download_dir)
            .with_headless(self.headless);
        let launcher = Arc::new(WebDriverLauncher::new(options)?);

        let policy = RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_max_passes(self.max_passes);

        let progress = match cli.output_format {
            OutputFormat::Human => Some(create_progress_bar()),
            OutputFormat::Json => None,
        };

        info!(
            datasets = expected.len(),
            download_dir = %cli.download_dir.display(),
            max_retries = policy.max_retries,
            max_passes = policy.max_passes,
            "Starting run"
        );

        let controller = DownloadController::new(expected, directory, launcher, credentials)
            .with_policy(policy)
            .with_today(today)
            .with_date_floor(date_floor)
            .with_shutdown(shutdown)
            .with_progress(progress);

        let report = controller.run().await?;

        match cli.output_format {
            OutputFormat::Json => output_json(&report),
            OutputFormat::Human => output_human(&report),
        }

        Ok(exit_code(&report, self.allow_partial))
    }
}

/// Exit code for a finished run
pub fn exit_code(report: &RunReport, allow_partial: bool) -> i32 {
    match report.status {
        RunStatus::Partial if !allow_partial => EXIT_PARTIAL,
        _ => EXIT_SUCCESS,
    }
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Output the report as JSON
fn output_json(report: &RunReport) {
    match serde_json::to_string(report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize report: {e}"),
    }
}

/// Output the report in human-readable format
fn output_human(report: &RunReport) {
    let headline = match report.status {
        RunStatus::NothingToDo => "All files already present, nothing to download.",
        RunStatus::Complete => "All files downloaded successfully!",
        RunStatus::Partial => "Run finished with missing files.",
    };
    println!("\n{headline}");
    println!("Date: {}", report.date);

    for pass in &report.passes {
        println!(
            "Pass {}: {} succeeded, {} failed",
            pass.pass, pass.succeeded, pass.failed
        );
    }

    println!(
        "Succeeded: {}/{}",
        report.succeeded(),
        report.datasets.len()
    );
    println!("Attempts: {}", report.total_attempts);
    println!("Elapsed: {}", format_elapsed(report.elapsed));
    if let Some(average) = report.average_per_download() {
        println!("Average per file: {:.1}s", average.as_secs_f64());
    }

    let failed = report.failed();
    if failed.is_empty() {
        for artifact in &report.artifacts {
            println!(
                "  {} ({:.1} MB)",
                artifact.filename,
                artifact.size_bytes as f64 / (1024.0 * 1024.0)
            );
        }
    } else {
        eprintln!("Missing:");
        for name in failed {
            eprintln!("  {name}");
        }
    }
}
