//! Resolution of target specifications to target objects.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use view_core::position::{PortfolioNode, Portfolio, Security};
use view_core::{ComputationTarget, ComputationTargetSpecification, ComputationTargetType};

/// Maps a target specification to the object it identifies.
pub trait ComputationTargetResolver: Send + Sync {
    /// Resolves `specification`, or `None` when it is unknown.
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget>;
}

/// Resolver over targets registered up front. Primitives always resolve.
///
/// Safe to populate while builders are already resolving against it.
#[derive(Debug, Default)]
pub struct MapTargetResolver {
    targets: RwLock<HashMap<ComputationTargetSpecification, ComputationTarget>>,
}

impl MapTargetResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a target, keeping any earlier registration of the same specification.
    pub fn add(&self, target: ComputationTarget) {
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        targets.entry(target.to_specification()).or_insert(target);
    }

    /// Registers a security.
    pub fn add_security(&self, security: Arc<Security>) {
        self.add(ComputationTarget::Security(security));
    }

    /// Registers every node, position, trade and resolved security of `portfolio`.
    pub fn add_portfolio(&self, portfolio: &Portfolio) {
        let mut collected = Vec::new();
        collect_node(&portfolio.root_node, &mut collected);
        let mut targets = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        for target in collected {
            targets.entry(target.to_specification()).or_insert(target);
        }
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        self.targets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collect_node(node: &PortfolioNode, out: &mut Vec<ComputationTarget>) {
    out.push(ComputationTarget::PortfolioNode(Arc::new(node.clone())));
    for position in &node.positions {
        if let Some(security) = position.security() {
            out.push(ComputationTarget::Security(security.clone()));
        }
        for trade in &position.trades {
            if let Some(security) = trade.security() {
                out.push(ComputationTarget::Security(security.clone()));
            }
            out.push(ComputationTarget::Trade(Arc::new(trade.clone())));
        }
        out.push(ComputationTarget::Position(Arc::new(position.clone())));
    }
    for child in &node.child_nodes {
        collect_node(child, out);
    }
}

impl ComputationTargetResolver for MapTargetResolver {
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        if specification.target_type == ComputationTargetType::Primitive {
            return Some(ComputationTarget::Primitive(specification.unique_id.clone()));
        }
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(specification)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use view_core::position::{Position, SecurityLink, Trade};
    use view_core::{ExternalId, ExternalIdBundle, UniqueId};

    #[test]
    fn test_resolves_portfolio_targets() {
        let security = Arc::new(Security::new(
            UniqueId::of("DbSec", "1"),
            ExternalIdBundle::of([ExternalId::of("TICKER", "X")]),
            "EQUITY",
            "X",
        ));
        let position = Position {
            unique_id: UniqueId::of("DbPos", "1"),
            quantity: 5.0,
            security_link: SecurityLink::resolved_to(security.clone()),
            trades: vec![Trade {
                unique_id: UniqueId::of("DbTrd", "1"),
                quantity: 5.0,
                security_link: SecurityLink::resolved_to(security),
                counterparty: None,
                trade_date: None,
            }],
        };
        let portfolio = Portfolio::new(
            UniqueId::of("DbPrt", "1"),
            "p",
            PortfolioNode::new(UniqueId::of("DbNode", "1"), "root")
                .with_child(PortfolioNode::new(UniqueId::of("DbNode", "2"), "child").with_position(position)),
        );

        let resolver = MapTargetResolver::new();
        resolver.add_portfolio(&portfolio);
        assert_eq!(resolver.len(), 5);

        let pos = resolver
            .resolve(&ComputationTargetSpecification::position(UniqueId::of("DbPos", "1")))
            .unwrap();
        assert_eq!(pos.security().unwrap().security_type, "EQUITY");
        assert!(resolver
            .resolve(&ComputationTargetSpecification::trade(UniqueId::of("DbTrd", "1")))
            .is_some());
        assert!(resolver
            .resolve(&ComputationTargetSpecification::security(UniqueId::of("DbSec", "1")))
            .is_some());
        assert!(resolver
            .resolve(&ComputationTargetSpecification::position(UniqueId::of("DbPos", "2")))
            .is_none());
    }

    #[test]
    fn test_primitives_always_resolve() {
        let resolver = MapTargetResolver::new();
        let spec = ComputationTargetSpecification::primitive(UniqueId::of("CurveName", "USD"));
        let target = resolver.resolve(&spec).unwrap();
        assert_eq!(target.to_specification(), spec);
        assert!(resolver.is_empty());
    }
}
