//! # View Dependency Graph (L2: Resolution)
//!
//! Turns value requirements into a dependency graph of function invocations.
//!
//! This crate provides:
//! - Function definitions and the function repository
//! - Resolution rules, per-configuration rule transforms and the compiled resolver
//! - Market data availability providers deciding which requirements are leaves
//! - The dependency graph and its per-configuration builder
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            view_compiler (L3)           │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │            view_depgraph (L2)           │
//! │  function/ repository/ rules/           │
//! │  market_data/ target/ graph/ builder/   │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │              view_core (L1)             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Requirements added in a fixed order produce identical graphs, node order
//! included. Concurrent producers may change node order but not the set of
//! nodes when the requirements they add are independent of each other.

#![deny(missing_docs)]

pub mod builder;
pub mod error;
pub mod function;
pub mod graph;
pub mod market_data;
pub mod repository;
pub mod rules;
pub mod target;

pub use builder::{DependencyGraphBuilder, ResolutionContext};
pub use error::{BuildError, GraphError, ResolutionFailure};
pub use function::{DeclaredFunction, DeclaredInput, DeclaredOutput, FunctionDefinition, InputTarget};
pub use graph::{DependencyGraph, DependencyNode, NodeId, NodeSignature};
pub use market_data::{
    FixedMarketDataAvailabilityProvider, MarketDataAvailabilityProvider,
    UnionMarketDataAvailabilityProvider, ValueNameMarketDataAvailabilityProvider,
    MARKET_DATA_SOURCING_FUNCTION,
};
pub use repository::FunctionRepository;
pub use rules::{CompiledFunctionResolver, ResolutionRule, ResolutionRuleTransform, SimpleResolutionRuleTransform};
pub use target::{ComputationTargetResolver, MapTargetResolver};
