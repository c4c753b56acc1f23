//! Portfolio tree traversal.
//!
//! A traverser walks a node subtree and reports every node and position to a
//! [`PortfolioNodeTraversalCallback`]. The parallel traverser fans siblings
//! and positions out over the shared Rayon pool; a node's post-order callback
//! always runs after every callback of its subtree has returned.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use rayon::ThreadPool;
use view_core::position::{PortfolioNode, Position};
use view_core::UniqueId;

/// Receives nodes and positions during a traversal.
///
/// Callbacks may run on several pool threads at once.
pub trait PortfolioNodeTraversalCallback: Sync {
    /// Called on a node before its positions and children.
    fn pre_order_node(&self, _node: &PortfolioNode) {}

    /// Called on every position with its parent node.
    fn position(&self, _parent: &PortfolioNode, _position: &Position) {}

    /// Called on a node after its whole subtree.
    fn post_order_node(&self, _node: &PortfolioNode) {}
}

/// Strategy for walking a portfolio subtree.
#[derive(Clone)]
pub enum PortfolioNodeTraverser {
    /// Sequential walk on the calling thread, parents first.
    DepthFirst,
    /// Parallel walk on the given pool.
    Parallel(Arc<ThreadPool>),
}

impl PortfolioNodeTraverser {
    /// Sequential depth-first traverser.
    pub fn depth_first() -> Self {
        PortfolioNodeTraverser::DepthFirst
    }

    /// Traverser fanning out over `executor`.
    pub fn parallel(executor: Arc<ThreadPool>) -> Self {
        PortfolioNodeTraverser::Parallel(executor)
    }

    /// Walks `root` and its descendants.
    ///
    /// # Arguments
    ///
    /// * `root` - Subtree to walk
    /// * `callback` - Receiver of node and position events
    pub fn traverse(&self, root: &PortfolioNode, callback: &dyn PortfolioNodeTraversalCallback) {
        match self {
            PortfolioNodeTraverser::DepthFirst => walk_depth_first(root, callback),
            PortfolioNodeTraverser::Parallel(executor) => {
                executor.install(|| walk_parallel(root, callback))
            }
        }
    }
}

fn walk_depth_first(node: &PortfolioNode, callback: &dyn PortfolioNodeTraversalCallback) {
    callback.pre_order_node(node);
    for position in &node.positions {
        callback.position(node, position);
    }
    for child in &node.child_nodes {
        walk_depth_first(child, callback);
    }
    callback.post_order_node(node);
}

fn walk_parallel(node: &PortfolioNode, callback: &dyn PortfolioNodeTraversalCallback) {
    callback.pre_order_node(node);
    rayon::join(
        || {
            node.positions
                .par_iter()
                .for_each(|position| callback.position(node, position))
        },
        || {
            node.child_nodes
                .par_iter()
                .for_each(|child| walk_parallel(child, callback))
        },
    );
    callback.post_order_node(node);
}

/// Collects the security types held under every node of a tree.
///
/// ```
/// use view_compiler::traversal::{PortfolioNodeTraverser, SecurityTypeGatherer};
/// use view_core::position::PortfolioNode;
/// use view_core::UniqueId;
///
/// let root = PortfolioNode::new(UniqueId::of("DbNode", "1"), "root");
/// let gatherer = SecurityTypeGatherer::new();
/// PortfolioNodeTraverser::depth_first().traverse(&root, &gatherer);
/// assert!(gatherer.into_types()[&UniqueId::of("DbNode", "1")].is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SecurityTypeGatherer {
    types: Mutex<HashMap<UniqueId, BTreeSet<String>>>,
}

impl SecurityTypeGatherer {
    /// Creates an empty gatherer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Security types per node id. Unresolved positions contribute nothing.
    pub fn into_types(self) -> HashMap<UniqueId, BTreeSet<String>> {
        self.types.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PortfolioNodeTraversalCallback for SecurityTypeGatherer {
    fn post_order_node(&self, node: &PortfolioNode) {
        let mut types = self.types.lock().unwrap_or_else(PoisonError::into_inner);
        let mut held: BTreeSet<String> = node
            .positions
            .iter()
            .filter_map(|position| position.security_type().map(str::to_string))
            .collect();
        for child in &node.child_nodes {
            if let Some(child_types) = types.get(&child.unique_id) {
                held.extend(child_types.iter().cloned());
            }
        }
        types.insert(node.unique_id.clone(), held);
    }
}
