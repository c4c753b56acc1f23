//! Error types for function resolution and graph construction.

use thiserror::Error;
use view_core::ValueRequirement;

/// Why a single requirement could not be satisfied.
///
/// Failures are values collected by the builder, never panics. They are
/// hashable so the builder can count occurrences per distinct failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Error)]
pub enum ResolutionFailure {
    /// No rule produces the value name on the target type.
    #[error("No functions can produce {0}")]
    NoFunctions(ValueRequirement),

    /// The requirement's target could not be resolved to an object.
    #[error("Unable to resolve target of {0}")]
    UnresolvableTarget(ValueRequirement),

    /// The requirement is already being resolved further up the stack.
    #[error("Recursive requirement on {0}")]
    RecursiveRequirement(ValueRequirement),

    /// Every candidate rule was tried and none succeeded.
    #[error("No candidate could satisfy {requirement} ({attempts} tried)")]
    CandidatesExhausted {
        /// The requirement.
        requirement: ValueRequirement,
        /// Number of candidate rules attempted.
        attempts: usize,
    },

    /// A candidate function's input could not be satisfied.
    #[error("Input {input} of {function_id} failed while resolving {requirement}")]
    InputFailure {
        /// The requirement being resolved.
        requirement: ValueRequirement,
        /// Function whose input failed.
        function_id: String,
        /// The failing input requirement.
        input: ValueRequirement,
    },
}

impl ResolutionFailure {
    /// The requirement this failure is about.
    pub fn requirement(&self) -> &ValueRequirement {
        match self {
            ResolutionFailure::NoFunctions(r)
            | ResolutionFailure::UnresolvableTarget(r)
            | ResolutionFailure::RecursiveRequirement(r) => r,
            ResolutionFailure::CandidatesExhausted { requirement, .. }
            | ResolutionFailure::InputFailure { requirement, .. } => requirement,
        }
    }
}

/// Failure of a whole graph build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The build was cancelled before it completed.
    #[error("Graph build for configuration '{0}' was interrupted")]
    Interrupted(String),

    /// A function panicked during resolution; the build was abandoned.
    #[error("Graph build for configuration '{configuration}' aborted: {message}")]
    Aborted {
        /// Configuration name.
        configuration: String,
        /// Panic message.
        message: String,
    },
}

/// Structural errors found in a built graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Some nodes could not be ordered because they depend on each other.
    #[error("Dependency graph '{configuration}' contains a cycle through {nodes} node(s)")]
    Cycle {
        /// Configuration name.
        configuration: String,
        /// Number of nodes left unordered.
        nodes: usize,
    },
}
