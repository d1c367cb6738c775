//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Neither `--server` nor a configuration file names a server
    #[error("No server URL: pass --server or a configuration file with [server].url")]
    MissingServer,

    /// Resolved configuration is invalid
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    /// Input contained no build scan links
    #[error("No build scan links found in {source_name}")]
    NoBuildScans { source_name: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    pub fn no_build_scans(source_name: impl Into<String>) -> Self {
        Self::NoBuildScans {
            source_name: source_name.into(),
        }
    }
}
