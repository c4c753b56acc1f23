//! # View Core (L1: Foundation)
//!
//! Immutable descriptors shared by the dependency graph builder and the view
//! compiler.
//!
//! This crate provides:
//! - Identifiers (`UniqueId`, `ObjectId`, external id bundles, version/correction)
//! - Computation targets and their specifications
//! - The value model: `ValueProperties`, `ValueRequirement`, `ValueSpecification`
//! - The portfolio tree (nodes, positions, trades, security links)
//! - Read interfaces onto position and security storage, with in-memory implementations
//! - Validity windows and cooperative cancellation
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
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │              view_core (L1)             │
//! │  ids/ target/ value/ position/          │
//! │  validity/ cancel/                      │
//! └─────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod cancel;
pub mod error;
pub mod ids;
pub mod position;
pub mod target;
pub mod validity;
pub mod value;

pub use cancel::CancellationToken;
pub use error::SourceError;
pub use ids::{ExternalId, ExternalIdBundle, ObjectId, UniqueId, VersionCorrection};
pub use target::{ComputationTarget, ComputationTargetSpecification, ComputationTargetType};
pub use validity::ValidityWindow;
pub use value::{ValueProperties, ValueRequirement, ValueSpecification};
