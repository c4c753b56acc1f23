//! CLI error types.

use thiserror::Error;
use view_compiler::config::ConfigError;
use view_compiler::CompilationError;

/// Errors surfaced by `viewc` commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Scenario file missing.
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Bad command line value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Scenario file could not be parsed.
    #[error("Invalid scenario {path}: {message}")]
    InvalidScenario {
        /// Scenario path.
        path: String,
        /// Parser message.
        message: String,
    },

    /// Compiler configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Compilation failed.
    #[error(transparent)]
    Compilation(#[from] CompilationError),

    /// Output could not be rendered.
    #[error("Failed to render output: {0}")]
    Render(#[from] serde_json::Error),

    /// Filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias for CLI commands.
pub type Result<T> = std::result::Result<T, CliError>;
