//! CLI command for listing the dataset catalog

use super::{Cli, CliError, OutputFormat, EXIT_SUCCESS};

/// List subcommand
#[derive(Debug, clap::Args)]
pub struct ListCommand {}

impl ListCommand {
    /// Print the selected datasets in declared order
    pub fn execute(&self, cli: &Cli) -> Result<i32, CliError> {
        let datasets = cli.expected_set()?;

        match cli.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&datasets).map_err(|e| {
                    CliError::ConfigurationError(format!("Failed to serialize catalog: {e}"))
                })?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!("Datasets ({}):", datasets.len());
                let mut program = None;
                for dataset in &datasets {
                    if program != Some(dataset.program) {
                        program = Some(dataset.program);
                        println!("\n{}", dataset.program);
                    }
                    let heavy = if dataset.heavy { " [heavy]" } else { "" };
                    println!("  {} ({}){heavy}", dataset.name, dataset.naming);
                }
            }
        }
        Ok(EXIT_SUCCESS)
    }
}
