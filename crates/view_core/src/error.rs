//! Error types for source lookups.
//!
//! Position and security sources report failures through [`SourceError`];
//! the compiler layers above map these onto their own taxonomy.

use thiserror::Error;

/// Errors raised by position and security sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The referenced object does not exist at the requested version/correction.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of object requested (portfolio, position, security).
        kind: &'static str,
        /// Display form of the identifier that failed to resolve.
        id: String,
    },

    /// The request itself was malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The backing store could not be reached.
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Creates a not-found error for the given kind and identifier.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns true for the not-found variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
