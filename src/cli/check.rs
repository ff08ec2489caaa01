//! Inventory commands that never launch a browser

use super::{Cli, CliError, OutputFormat, EXIT_PARTIAL, EXIT_SUCCESS};
use crate::naming::FilenamePattern;
use clap::Args;
use serde_json::json;
use tracing::info;

/// Check subcommand
#[derive(Debug, Args)]
pub struct CheckCommand {}

impl CheckCommand {
    /// Report present and missing datasets; exit 2 when any is missing.
    pub fn execute(&self, cli: &Cli) -> Result<i32, CliError> {
        let expected = cli.expected_set()?;
        let today = cli.today();
        let directory = cli.directory();
        let presence = directory.presence(&expected, today)?;
        let partials = directory.list_partial_downloads()?;

        let missing: Vec<_> = expected
            .iter()
            .zip(&presence)
            .filter(|(_, present)| present.files.is_empty())
            .map(|(dataset, _)| dataset)
            .collect();

        match cli.output_format {
            OutputFormat::Json => {
                let output = json!({
                    "date": today.to_string(),
                    "directory": directory.path().display().to_string(),
                    "present": presence
                        .iter()
                        .filter(|p| !p.files.is_empty())
                        .map(|p| json!({ "dataset": p.dataset, "files": p.files }))
                        .collect::<Vec<_>>(),
                    "missing": missing.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
                    "partial_downloads": partials.len(),
                });
                println!("{output}");
            }
            OutputFormat::Human => {
                println!("Files for {} in {}", today, directory.path().display());
                for present in &presence {
                    if !present.files.is_empty() {
                        println!("  [ok]      {}", present.files.join(", "));
                    }
                }
                for dataset in &missing {
                    let pattern = FilenamePattern::for_dataset(dataset, today);
                    println!("  [missing] {}", pattern.canonical_filename());
                }
                if !partials.is_empty() {
                    println!("{} partial download(s) in progress or orphaned", partials.len());
                }
                println!(
                    "{}/{} present",
                    expected.len() - missing.len(),
                    expected.len()
                );
            }
        }

        info!(
            present = expected.len() - missing.len(),
            missing = missing.len(),
            "Inventory checked"
        );
        Ok(if missing.is_empty() { EXIT_SUCCESS } else { EXIT_PARTIAL })
    }
}

/// Clean subcommand
#[derive(Debug, Args)]
pub struct CleanCommand {}

impl CleanCommand {
    /// Remove orphan partial downloads and keep one artifact per dataset.
    pub fn execute(&self, cli: &Cli) -> Result<i32, CliError> {
        let expected = cli.expected_set()?;
        let today = cli.today();
        let directory = cli.directory();

        let partials = directory.cleanup_orphan_partials();
        let duplicates = directory.cleanup_duplicates(&expected, today)?;

        match cli.output_format {
            OutputFormat::Json => {
                let output = json!({
                    "partial_downloads_removed": partials,
                    "duplicates_removed": duplicates
                        .iter()
                        .filter_map(|p| p.file_name())
                        .map(|n| n.to_string_lossy().into_owned())
                        .collect::<Vec<_>>(),
                });
                println!("{output}");
            }
            OutputFormat::Human => {
                println!("Removed {partials} partial download(s)");
                println!("Removed {} duplicate artifact(s)", duplicates.len());
                for path in &duplicates {
                    println!("  {}", path.display());
                }
            }
        }
        Ok(EXIT_SUCCESS)
    }
}
