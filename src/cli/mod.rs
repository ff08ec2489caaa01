//! CLI command implementations

pub mod check;
pub mod datasets;
pub mod error;
pub mod run;

pub use check::{CheckCommand, CleanCommand};
pub use datasets::ListCommand;
pub use error::CliError;
pub use run::{Cli, Commands, RunArgs};

/// Every expected dataset is present
pub const EXIT_SUCCESS: i32 = 0;
/// Fatal error
pub const EXIT_FAILURE: i32 = 1;
/// Run finished with datasets still missing
pub const EXIT_PARTIAL: i32 = 2;
/// Interrupted by Ctrl+C
pub const EXIT_INTERRUPTED: i32 = 130;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
