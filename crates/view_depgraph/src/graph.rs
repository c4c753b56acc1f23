//! Dependency graphs: function invocations bound to targets.
//!
//! Nodes are stored in creation order and a node only ever references nodes
//! created before it, which keeps graphs produced by the builder acyclic.
//! [`DependencyGraph::topological_order`] still checks, so hand-assembled
//! graphs are validated too.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use view_core::{ComputationTargetSpecification, ValidityWindow, ValueRequirement, ValueSpecification};

use crate::error::GraphError;
use crate::market_data::MARKET_DATA_SOURCING_FUNCTION;

/// Index of a node within its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Position of the node in creation order.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What makes two nodes the same invocation: function, target and inputs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeSignature {
    /// Function id.
    pub function_id: String,
    /// Target.
    pub target: ComputationTargetSpecification,
    /// Resolved inputs.
    pub inputs: BTreeSet<ValueSpecification>,
}

/// A function invocation on one target.
#[derive(Clone, Debug)]
pub struct DependencyNode {
    pub(crate) function_id: String,
    pub(crate) target: ComputationTargetSpecification,
    pub(crate) input_values: BTreeSet<ValueSpecification>,
    pub(crate) output_values: BTreeSet<ValueSpecification>,
    pub(crate) input_nodes: BTreeSet<NodeId>,
    pub(crate) validity: ValidityWindow,
}

impl DependencyNode {
    /// Creates a node. Input nodes are derived when the node is added to a graph.
    pub fn new(
        function_id: impl Into<String>,
        target: ComputationTargetSpecification,
        input_values: BTreeSet<ValueSpecification>,
        output_values: BTreeSet<ValueSpecification>,
        validity: ValidityWindow,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            target,
            input_values,
            output_values,
            input_nodes: BTreeSet::new(),
            validity,
        }
    }

    /// Function invoked by this node.
    pub fn function_id(&self) -> &str {
        &self.function_id
    }

    /// Target of the invocation.
    pub fn target(&self) -> &ComputationTargetSpecification {
        &self.target
    }

    /// Consumed specifications.
    pub fn input_values(&self) -> &BTreeSet<ValueSpecification> {
        &self.input_values
    }

    /// Produced specifications.
    pub fn output_values(&self) -> &BTreeSet<ValueSpecification> {
        &self.output_values
    }

    /// Nodes producing this node's inputs.
    pub fn input_nodes(&self) -> &BTreeSet<NodeId> {
        &self.input_nodes
    }

    /// Earliest valid invocation; `None` is unbounded.
    pub fn earliest_invocation(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.validity.valid_from
    }

    /// Latest valid invocation; `None` is unbounded.
    pub fn latest_invocation(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.validity.valid_to
    }

    /// Invocation window.
    pub fn validity(&self) -> ValidityWindow {
        self.validity
    }

    /// Returns true for market data leaves.
    pub fn is_market_data(&self) -> bool {
        self.function_id == MARKET_DATA_SOURCING_FUNCTION
    }

    /// Identity of the invocation.
    pub fn signature(&self) -> NodeSignature {
        NodeSignature {
            function_id: self.function_id.clone(),
            target: self.target.clone(),
            inputs: self.input_values.clone(),
        }
    }
}

/// The graph compiled for one calculation configuration.
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    calculation_configuration_name: String,
    pub(crate) nodes: Vec<DependencyNode>,
    pub(crate) producers: HashMap<ValueSpecification, NodeId>,
    pub(crate) terminal_outputs: BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>,
    pub(crate) unresolved_requirements: BTreeSet<ValueRequirement>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new(calculation_configuration_name: impl Into<String>) -> Self {
        Self {
            calculation_configuration_name: calculation_configuration_name.into(),
            ..Self::default()
        }
    }

    /// Name of the owning configuration.
    pub fn calculation_configuration_name(&self) -> &str {
        &self.calculation_configuration_name
    }

    /// Adds a node, linking it to the producers of its inputs.
    ///
    /// Outputs that already have a producer are dropped from the new node so
    /// each specification keeps a single producer.
    pub fn add_node(&mut self, mut node: DependencyNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.input_nodes = node
            .input_values
            .iter()
            .filter_map(|input| self.producers.get(input).copied())
            .collect();
        node.output_values
            .retain(|output| !self.producers.contains_key(output));
        for output in &node.output_values {
            self.producers.insert(output.clone(), id);
        }
        self.nodes.push(node);
        id
    }

    /// Marks `specification` as satisfying a directly requested requirement.
    pub fn add_terminal_output(&mut self, specification: ValueSpecification, requirement: ValueRequirement) {
        self.terminal_outputs
            .entry(specification)
            .or_default()
            .insert(requirement);
    }

    /// All nodes, in creation order.
    pub fn nodes(&self) -> &[DependencyNode] {
        &self.nodes
    }

    /// Nodes with their ids.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (NodeId, &DependencyNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> Option<&DependencyNode> {
        self.nodes.get(id.0)
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node producing `specification`.
    pub fn producer_of(&self, specification: &ValueSpecification) -> Option<NodeId> {
        self.producers.get(specification).copied()
    }

    /// Every produced specification.
    pub fn output_values(&self) -> BTreeSet<&ValueSpecification> {
        self.nodes.iter().flat_map(|n| n.output_values.iter()).collect()
    }

    /// Terminal outputs and the requirements each satisfies.
    pub fn terminal_outputs(&self) -> &BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>> {
        &self.terminal_outputs
    }

    /// Requirements that were requested but could not be resolved.
    pub fn missing_requirements(&self) -> &BTreeSet<ValueRequirement> {
        &self.unresolved_requirements
    }

    /// Specifications that must be supplied from outside the graph.
    pub fn market_data_requirements(&self) -> BTreeSet<ValueSpecification> {
        self.nodes
            .iter()
            .filter(|n| n.is_market_data())
            .flat_map(|n| n.output_values.iter().cloned())
            .collect()
    }

    /// Every distinct target any node is bound to.
    pub fn all_computation_targets(&self) -> BTreeSet<ComputationTargetSpecification> {
        self.nodes.iter().map(|n| n.target.clone()).collect()
    }

    /// Intersection of every node's invocation window; unbounded for an empty graph.
    pub fn validity_window(&self) -> ValidityWindow {
        self.nodes
            .iter()
            .fold(ValidityWindow::unbounded(), |w, n| w.intersect(&n.validity))
    }

    /// Node ids ordered so every node follows the nodes it consumes.
    ///
    /// Ready nodes are taken lowest id first, so the order is deterministic.
    ///
    /// # Errors
    ///
    /// `GraphError::Cycle` if some nodes depend on each other.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let n = self.nodes.len();
        let mut remaining: Vec<usize> = self.nodes.iter().map(|node| node.input_nodes.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, node) in self.nodes.iter().enumerate() {
            for input in &node.input_nodes {
                dependents[input.0].push(i);
            }
        }
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            order.push(NodeId(i));
            for &d in &dependents[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert(d);
                }
            }
        }
        if order.len() == n {
            Ok(order)
        } else {
            Err(GraphError::Cycle {
                configuration: self.calculation_configuration_name.clone(),
                nodes: n - order.len(),
            })
        }
    }

    /// Returns true if no node transitively depends on itself.
    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_ok()
    }

    /// Drops outputs that are neither terminal nor consumed by another node.
    ///
    /// Returns the number of outputs removed.
    pub fn remove_unnecessary_values(&mut self) -> usize {
        let consumed: BTreeSet<ValueSpecification> = self
            .nodes
            .iter()
            .flat_map(|n| n.input_values.iter().cloned())
            .collect();
        let mut removed = 0;
        for node in &mut self.nodes {
            let before = node.output_values.len();
            let terminal = &self.terminal_outputs;
            let producers = &mut self.producers;
            node.output_values.retain(|output| {
                let keep = consumed.contains(output) || terminal.contains_key(output);
                if !keep {
                    producers.remove(output);
                }
                keep
            });
            removed += before - node.output_values.len();
        }
        if removed > 0 {
            tracing::debug!(
                configuration = %self.calculation_configuration_name,
                removed,
                "Removed unnecessary values"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use view_core::{UniqueId, ValueProperties};

    fn target() -> ComputationTargetSpecification {
        ComputationTargetSpecification::position(UniqueId::of("DbPos", "1"))
    }

    fn spec(name: &str, function: &str) -> ValueSpecification {
        ValueSpecification::produced_by(name, target(), function, ValueProperties::new())
    }

    fn node(function: &str, inputs: &[&ValueSpecification], outputs: &[&ValueSpecification]) -> DependencyNode {
        DependencyNode::new(
            function,
            target(),
            inputs.iter().map(|s| (*s).clone()).collect(),
            outputs.iter().map(|s| (*s).clone()).collect(),
            ValidityWindow::unbounded(),
        )
    }

    #[test]
    fn test_add_node_links_inputs() {
        let mut graph = DependencyGraph::new("Default");
        let curve = spec("YieldCurve", "Curve");
        let pv = spec("PresentValue", "PV");
        let a = graph.add_node(node("Curve", &[], &[&curve]));
        let b = graph.add_node(node("PV", &[&curve], &[&pv]));
        assert_eq!(graph.node(b).unwrap().input_nodes().iter().copied().collect::<Vec<_>>(), vec![a]);
        assert_eq!(graph.producer_of(&pv), Some(b));
        assert_eq!(graph.topological_order().unwrap(), vec![a, b]);
        assert_eq!(graph.all_computation_targets().len(), 1);
    }

    #[test]
    fn test_single_producer_per_spec() {
        let mut graph = DependencyGraph::new("Default");
        let pv = spec("PresentValue", "PV");
        let a = graph.add_node(node("PV", &[], &[&pv]));
        let b = graph.add_node(node("PV", &[], &[&pv]));
        assert_eq!(graph.producer_of(&pv), Some(a));
        assert!(graph.node(b).unwrap().output_values().is_empty());
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = DependencyGraph::new("Cyclic");
        let x = spec("X", "F");
        let y = spec("Y", "G");
        graph.add_node(node("F", &[], &[&x]));
        graph.add_node(node("G", &[&x], &[&y]));
        // hand-wire a back edge
        graph.nodes[0].input_nodes.insert(NodeId(1));
        let err = graph.topological_order().unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle {
                configuration: "Cyclic".to_string(),
                nodes: 2
            }
        );
        assert!(!graph.is_acyclic());
    }

    #[test]
    fn test_validity_window_intersection() {
        let t = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
        let mut graph = DependencyGraph::new("Default");
        assert_eq!(graph.validity_window(), ValidityWindow::unbounded());

        let mut a = node("A", &[], &[&spec("A", "A")]);
        a.validity = ValidityWindow::new(Some(t(2)), None);
        let mut b = node("B", &[], &[&spec("B", "B")]);
        b.validity = ValidityWindow::new(Some(t(1)), Some(t(20)));
        graph.add_node(a);
        graph.add_node(b);
        assert_eq!(graph.validity_window(), ValidityWindow::new(Some(t(2)), Some(t(20))));
    }

    #[test]
    fn test_remove_unnecessary_values() {
        let mut graph = DependencyGraph::new("Default");
        let curve = spec("YieldCurve", "Curve");
        let spare = spec("DiscountFactors", "Curve");
        let pv = spec("PresentValue", "PV");
        graph.add_node(node("Curve", &[], &[&curve, &spare]));
        graph.add_node(node("PV", &[&curve], &[&pv]));
        graph.add_terminal_output(
            pv.clone(),
            ValueRequirement::unconstrained("PresentValue", target()),
        );

        assert_eq!(graph.output_values().len(), 3);
        assert_eq!(graph.remove_unnecessary_values(), 1);
        assert_eq!(graph.output_values().len(), 2);
        assert!(graph.producer_of(&spare).is_none());
        assert!(graph.producer_of(&curve).is_some());
    }

    #[test]
    fn test_market_data_requirements() {
        let mut graph = DependencyGraph::new("Default");
        let price = spec("MarketPrice", MARKET_DATA_SOURCING_FUNCTION);
        graph.add_node(node(MARKET_DATA_SOURCING_FUNCTION, &[], &[&price]));
        graph.add_node(node("PV", &[&price], &[&spec("PresentValue", "PV")]));
        let md = graph.market_data_requirements();
        assert_eq!(md.len(), 1);
        assert!(md.contains(&price));
    }
}
