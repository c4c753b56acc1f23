//! Error types for view compilation.

use chrono::{DateTime, Utc};
use thiserror::Error;
use view_core::{SourceError, ValidityWindow};
use view_depgraph::BuildError;

/// Failure of a whole compile call.
///
/// A compile call either yields a complete artifact or one of these; there is
/// no partially compiled output. Per-requirement resolution failures are not
/// errors, they are reported inside the compiled artifact.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// A referenced portfolio, position or security does not exist.
    #[error("View '{view}': {source}")]
    NotFound {
        /// View being compiled.
        view: String,
        /// Underlying lookup failure.
        #[source]
        source: SourceError,
    },

    /// Portfolio outputs are required but the view names no portfolio.
    #[error("The view definition '{0}' contains required portfolio outputs, but it does not reference a portfolio")]
    MissingPortfolio(String),

    /// One lookup in a bulk security resolution failed; nothing was resolved.
    #[error("Bulk resolution failed on {reference}: {source}")]
    BulkResolutionFailure {
        /// The link whose lookup failed.
        reference: String,
        /// Underlying lookup failure.
        #[source]
        source: SourceError,
    },

    /// The intersected validity window is empty or excludes the valuation time.
    #[error("View '{view}' compiled to validity window {window} which does not admit {valuation_time}")]
    InvalidValidityWindow {
        /// View being compiled.
        view: String,
        /// Intersection of every node's window.
        window: ValidityWindow,
        /// Instant the view was compiled for.
        valuation_time: DateTime<Utc>,
    },

    /// The caller cancelled while the compiler was waiting on background work.
    #[error("Interrupted during {0}")]
    Interrupted(String),

    /// A configuration's graph build failed as a whole.
    #[error("View '{view}' configuration '{configuration}': {source}")]
    GraphBuild {
        /// View being compiled.
        view: String,
        /// Failing configuration.
        configuration: String,
        /// Builder failure.
        #[source]
        source: BuildError,
    },

    /// The view definition is malformed.
    #[error("Invalid view definition '{view}': {message}")]
    InvalidDefinition {
        /// View name.
        view: String,
        /// What is wrong.
        message: String,
    },

    /// An operation was attempted out of order.
    #[error("Illegal compilation state: {0}")]
    InvalidState(String),
}

impl CompilationError {
    /// Returns true for cancellation, including cancellation seen by a graph build.
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            CompilationError::Interrupted(_)
                | CompilationError::GraphBuild {
                    source: BuildError::Interrupted(_),
                    ..
                }
        )
    }
}

/// Result alias for compilation.
pub type Result<T> = std::result::Result<T, CompilationError>;
