//! # View Compiler (L3: Compilation)
//!
//! Compiles a view definition into one dependency graph per calculation
//! configuration and packages the graphs with their validity window and
//! market data requirements.
//!
//! This crate provides:
//! - View definitions, calculation configurations and result models
//! - Portfolio and security resolution against the position and security sources
//! - Requirement generation from the portfolio tree and from explicit requirements
//! - The compiled view artifact and its assembly
//! - Compiler configuration and the shared worker pool
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            service_cli (S)              │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │            view_compiler (L3)           │
//! │  definition/ compiler/ portfolio/       │
//! │  specific/ security/ traversal/ bulk/   │
//! │  context/ compiled/ config/ services/   │
//! │  metrics/                               │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │            view_depgraph (L2)           │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │              view_core (L1)             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! One Rayon pool, built from [`CompilerConfig::build_executor`], is shared by
//! portfolio traversal, bulk security resolution and parallel graph building.
//! All fan-out is joined before a compile call returns. Compile calls must not
//! be made from a thread of that pool.

#![deny(missing_docs)]

pub mod bulk;
pub mod compiled;
pub mod compiler;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod metrics;
pub mod portfolio;
pub mod security;
pub mod services;
pub mod specific;
pub mod traversal;

pub use compiled::{CompiledViewCalculationConfiguration, CompiledViewDefinitionWithGraphs};
pub use compiler::ViewDefinitionCompiler;
pub use config::{CompilerConfig, GraphBuildMode, LogLevel};
pub use context::CompilationState;
pub use definition::{
    PortfolioRequirement, ResultModelDefinition, ResultOutputMode, ViewCalculationConfiguration,
    ViewDefinition, AGGREGATE_ONLY,
};
pub use error::{CompilationError, Result};
pub use metrics::{CompilationMetrics, CompilationStats};
pub use services::ViewCompilationServices;
