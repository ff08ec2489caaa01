//! CLI error types and conversions

use crate::browser::BrowserError;
use crate::catalog::CatalogError;
use crate::controller::ControllerError;
use crate::session::AuthError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Catalog error
    #[error("catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    /// Credentials or login error
    #[error("authentication error: {0}")]
    AuthError(#[from] AuthError),

    /// Run error
    #[error("{0}")]
    ControllerError(#[from] ControllerError),

    /// Browser setup error
    #[error("browser error: {0}")]
    BrowserError(#[from] BrowserError),

    /// Download directory error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ControllerError(ControllerError::Interrupted) => super::EXIT_INTERRUPTED,
            _ => super::EXIT_FAILURE,
        }
    }
}
