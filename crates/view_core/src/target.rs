//! Computation targets: what a value is about.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::ids::UniqueId;
use crate::position::{PortfolioNode, Position, Security, Trade};

/// Kind of object a value is computed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputationTargetType {
    /// A node of the portfolio tree (aggregates).
    PortfolioNode,
    /// A position.
    Position,
    /// A trade within a position.
    Trade,
    /// A security.
    Security,
    /// Anything identified only by id, e.g. a currency or a curve name.
    Primitive,
}

impl ComputationTargetType {
    /// All target types, in declaration order.
    pub const ALL: [ComputationTargetType; 5] = [
        ComputationTargetType::PortfolioNode,
        ComputationTargetType::Position,
        ComputationTargetType::Trade,
        ComputationTargetType::Security,
        ComputationTargetType::Primitive,
    ];

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputationTargetType::PortfolioNode => "PORTFOLIO_NODE",
            ComputationTargetType::Position => "POSITION",
            ComputationTargetType::Trade => "TRADE",
            ComputationTargetType::Security => "SECURITY",
            ComputationTargetType::Primitive => "PRIMITIVE",
        }
    }
}

impl fmt::Display for ComputationTargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputationTargetType {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComputationTargetType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SourceError::InvalidArgument(format!("unknown target type: {}", s)))
    }
}

/// Identifies a computation target by type and unique id.
///
/// ```
/// use view_core::ids::UniqueId;
/// use view_core::target::{ComputationTargetSpecification, ComputationTargetType};
///
/// let spec = ComputationTargetSpecification::position(UniqueId::of("DbPos", "1"));
/// assert_eq!(spec.target_type, ComputationTargetType::Position);
/// assert_eq!(spec.to_string(), "POSITION DbPos~1");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComputationTargetSpecification {
    /// Kind of target.
    #[serde(rename = "type")]
    pub target_type: ComputationTargetType,
    /// Identifier of the target.
    #[serde(rename = "id")]
    pub unique_id: UniqueId,
}

impl ComputationTargetSpecification {
    /// Creates a specification.
    #[inline]
    pub fn of(target_type: ComputationTargetType, unique_id: UniqueId) -> Self {
        Self {
            target_type,
            unique_id,
        }
    }

    /// Portfolio node target.
    pub fn portfolio_node(unique_id: UniqueId) -> Self {
        Self::of(ComputationTargetType::PortfolioNode, unique_id)
    }

    /// Position target.
    pub fn position(unique_id: UniqueId) -> Self {
        Self::of(ComputationTargetType::Position, unique_id)
    }

    /// Trade target.
    pub fn trade(unique_id: UniqueId) -> Self {
        Self::of(ComputationTargetType::Trade, unique_id)
    }

    /// Security target.
    pub fn security(unique_id: UniqueId) -> Self {
        Self::of(ComputationTargetType::Security, unique_id)
    }

    /// Primitive target.
    pub fn primitive(unique_id: UniqueId) -> Self {
        Self::of(ComputationTargetType::Primitive, unique_id)
    }
}

impl fmt::Display for ComputationTargetSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.target_type, self.unique_id)
    }
}

/// A resolved computation target.
#[derive(Clone, Debug)]
pub enum ComputationTarget {
    /// Portfolio node with its subtree.
    PortfolioNode(Arc<PortfolioNode>),
    /// Position with resolved security.
    Position(Arc<Position>),
    /// Trade with resolved security.
    Trade(Arc<Trade>),
    /// Security.
    Security(Arc<Security>),
    /// Primitive, identified only by id.
    Primitive(UniqueId),
}

impl ComputationTarget {
    /// Kind of this target.
    pub fn target_type(&self) -> ComputationTargetType {
        match self {
            ComputationTarget::PortfolioNode(_) => ComputationTargetType::PortfolioNode,
            ComputationTarget::Position(_) => ComputationTargetType::Position,
            ComputationTarget::Trade(_) => ComputationTargetType::Trade,
            ComputationTarget::Security(_) => ComputationTargetType::Security,
            ComputationTarget::Primitive(_) => ComputationTargetType::Primitive,
        }
    }

    /// Unique id of this target.
    pub fn unique_id(&self) -> &UniqueId {
        match self {
            ComputationTarget::PortfolioNode(node) => &node.unique_id,
            ComputationTarget::Position(position) => &position.unique_id,
            ComputationTarget::Trade(trade) => &trade.unique_id,
            ComputationTarget::Security(security) => &security.unique_id,
            ComputationTarget::Primitive(id) => id,
        }
    }

    /// Specification identifying this target.
    pub fn to_specification(&self) -> ComputationTargetSpecification {
        ComputationTargetSpecification::of(self.target_type(), self.unique_id().clone())
    }

    /// Security behind a position, trade or security target.
    pub fn security(&self) -> Option<&Arc<Security>> {
        match self {
            ComputationTarget::Position(position) => position.security(),
            ComputationTarget::Trade(trade) => trade.security(),
            ComputationTarget::Security(security) => Some(security),
            _ => None,
        }
    }

    /// Direct children of a portfolio node target: child nodes then positions.
    ///
    /// Empty for every other target type.
    pub fn children(&self) -> Vec<ComputationTargetSpecification> {
        match self {
            ComputationTarget::PortfolioNode(node) => node
                .child_nodes
                .iter()
                .map(|child| ComputationTargetSpecification::portfolio_node(child.unique_id.clone()))
                .chain(
                    node.positions
                        .iter()
                        .map(|p| ComputationTargetSpecification::position(p.unique_id.clone())),
                )
                .collect(),
            _ => Vec::new(),
        }
    }
}
