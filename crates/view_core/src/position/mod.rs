//! Portfolio structure: nodes, positions, trades and the securities they hold.
//!
//! The tree is immutable once built. Resolving security links produces a new
//! tree (see [`Portfolio::with_resolved_securities`]) rather than patching the
//! existing one in place.

mod security;
mod source;

pub use security::{Security, SecurityLink};
pub use source::{
    InMemoryPositionSource, InMemorySecuritySource, PositionSource, SecuritySource,
};

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::ids::UniqueId;

/// A single trade booked against a position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trade {
    /// Identifier of the trade.
    pub unique_id: UniqueId,
    /// Traded quantity.
    pub quantity: f64,
    /// Link to the traded security.
    pub security_link: SecurityLink,
    /// Counterparty name, if recorded.
    #[serde(default)]
    pub counterparty: Option<String>,
    /// Trade date, if recorded.
    #[serde(default)]
    pub trade_date: Option<NaiveDate>,
}

impl Trade {
    /// Resolved security, if the link has been resolved.
    pub fn security(&self) -> Option<&Arc<Security>> {
        self.security_link.target()
    }
}

/// A holding of a security, optionally broken down into trades.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Position {
    /// Identifier of the position.
    pub unique_id: UniqueId,
    /// Held quantity.
    pub quantity: f64,
    /// Link to the held security.
    pub security_link: SecurityLink,
    /// Trades making up the position.
    #[serde(default)]
    pub trades: Vec<Trade>,
}

impl Position {
    /// Resolved security, if the link has been resolved.
    pub fn security(&self) -> Option<&Arc<Security>> {
        self.security_link.target()
    }

    /// Security type of the resolved security.
    pub fn security_type(&self) -> Option<&str> {
        self.security().map(|s| s.security_type.as_str())
    }
}

/// A node of the portfolio tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioNode {
    /// Identifier of the node.
    pub unique_id: UniqueId,
    /// Display name.
    pub name: String,
    /// Child nodes.
    #[serde(default)]
    pub child_nodes: Vec<PortfolioNode>,
    /// Positions held directly at this node.
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl PortfolioNode {
    /// Creates an empty node.
    pub fn new(unique_id: UniqueId, name: impl Into<String>) -> Self {
        Self {
            unique_id,
            name: name.into(),
            child_nodes: Vec::new(),
            positions: Vec::new(),
        }
    }

    /// Adds a child node (builder style).
    pub fn with_child(mut self, child: PortfolioNode) -> Self {
        self.child_nodes.push(child);
        self
    }

    /// Adds a position (builder style).
    pub fn with_position(mut self, position: Position) -> Self {
        self.positions.push(position);
        self
    }

    /// Total number of positions in this subtree.
    pub fn position_count(&self) -> usize {
        self.positions.len()
            + self
                .child_nodes
                .iter()
                .map(PortfolioNode::position_count)
                .sum::<usize>()
    }

    /// Visits every node in the subtree, depth first, parents before children.
    pub fn for_each_node<'a>(&'a self, visit: &mut impl FnMut(&'a PortfolioNode)) {
        visit(self);
        for child in &self.child_nodes {
            child.for_each_node(visit);
        }
    }

    /// Visits every position in the subtree together with its parent node.
    pub fn for_each_position<'a>(
        &'a self,
        visit: &mut impl FnMut(&'a PortfolioNode, &'a Position),
    ) {
        for position in &self.positions {
            visit(self, position);
        }
        for child in &self.child_nodes {
            child.for_each_position(visit);
        }
    }

    /// Distinct security types held anywhere under this node.
    ///
    /// Unresolved positions contribute nothing.
    pub fn security_types(&self) -> BTreeSet<String> {
        let mut types = BTreeSet::new();
        self.for_each_position(&mut |_, position| {
            if let Some(security_type) = position.security_type() {
                types.insert(security_type.to_string());
            }
        });
        types
    }

    fn resolve_links(
        &self,
        resolve: &impl Fn(&SecurityLink) -> Option<Arc<Security>>,
    ) -> Result<PortfolioNode, SourceError> {
        let positions = self
            .positions
            .iter()
            .map(|position| {
                let trades = position
                    .trades
                    .iter()
                    .map(|trade| {
                        Ok(Trade {
                            security_link: resolve_link(&trade.security_link, resolve)?,
                            ..trade.clone()
                        })
                    })
                    .collect::<Result<Vec<_>, SourceError>>()?;
                Ok(Position {
                    unique_id: position.unique_id.clone(),
                    quantity: position.quantity,
                    security_link: resolve_link(&position.security_link, resolve)?,
                    trades,
                })
            })
            .collect::<Result<Vec<_>, SourceError>>()?;
        let child_nodes = self
            .child_nodes
            .iter()
            .map(|child| child.resolve_links(resolve))
            .collect::<Result<Vec<_>, SourceError>>()?;
        Ok(PortfolioNode {
            unique_id: self.unique_id.clone(),
            name: self.name.clone(),
            child_nodes,
            positions,
        })
    }
}

fn resolve_link(
    link: &SecurityLink,
    resolve: &impl Fn(&SecurityLink) -> Option<Arc<Security>>,
) -> Result<SecurityLink, SourceError> {
    if link.is_resolved() {
        return Ok(link.clone());
    }
    resolve(link)
        .map(|security| link.resolved(security))
        .ok_or_else(|| SourceError::not_found("Security", link))
}

/// A portfolio: a named tree of nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Portfolio {
    /// Identifier of the portfolio.
    pub unique_id: UniqueId,
    /// Display name.
    pub name: String,
    /// Root of the node tree.
    pub root_node: PortfolioNode,
}

impl Portfolio {
    /// Creates a portfolio.
    pub fn new(unique_id: UniqueId, name: impl Into<String>, root_node: PortfolioNode) -> Self {
        Self {
            unique_id,
            name: name.into(),
            root_node,
        }
    }

    /// Every distinct security link held by positions and trades, in tree order.
    pub fn security_links(&self) -> Vec<SecurityLink> {
        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();
        self.root_node.for_each_position(&mut |_, position| {
            if seen.insert(position.security_link.clone()) {
                links.push(position.security_link.clone());
            }
            for trade in &position.trades {
                if seen.insert(trade.security_link.clone()) {
                    links.push(trade.security_link.clone());
                }
            }
        });
        links
    }

    /// True when every position and trade link carries its security.
    pub fn is_fully_resolved(&self) -> bool {
        let mut resolved = true;
        self.root_node.for_each_position(&mut |_, position| {
            resolved &= position.security_link.is_resolved()
                && position.trades.iter().all(|t| t.security_link.is_resolved());
        });
        resolved
    }

    /// Rebuilds the tree with every unresolved link resolved through `resolve`.
    ///
    /// Fails with `NotFound` on the first link the closure cannot resolve, so a
    /// successful result never contains dangling links.
    pub fn with_resolved_securities(
        &self,
        resolve: impl Fn(&SecurityLink) -> Option<Arc<Security>>,
    ) -> Result<Portfolio, SourceError> {
        Ok(Portfolio {
            unique_id: self.unique_id.clone(),
            name: self.name.clone(),
            root_node: self.root_node.resolve_links(&resolve)?,
        })
    }
}
