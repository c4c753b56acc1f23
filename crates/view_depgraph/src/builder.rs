//! Dependency graph builder for one calculation configuration.
//!
//! Requirements are queued with [`DependencyGraphBuilder::add_target`] from any
//! thread. Once [`start`](DependencyGraphBuilder::start) has handed the builder
//! a pool, a single drain job resolves the queue in the background; otherwise
//! the queue is drained on the caller's thread inside
//! [`wait_for_dependency_graph_build`](DependencyGraphBuilder::wait_for_dependency_graph_build).
//!
//! Resolution of one requirement is a depth-first search:
//!
//! 1. a memoised result is reused;
//! 2. a requirement already on the resolution stack fails as recursive;
//! 3. market data availability turns the requirement into a leaf;
//! 4. otherwise candidate rules are tried best first. A candidate's maximal
//!    output is composed with the requirement's constraints, its inputs are
//!    resolved recursively, and the first candidate whose inputs all resolve
//!    wins. A failed candidate is rolled back through an undo log so it leaves
//!    nothing behind in the graph.
//!
//! Failures are collected per requirement, never raised.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use rayon::ThreadPool;
use tracing::{debug, error, trace, warn};
use view_core::{
    CancellationToken, ComputationTarget, ValidityWindow, ValueRequirement, ValueSpecification,
};

use crate::error::{BuildError, ResolutionFailure};
use crate::function::FunctionDefinition;
use crate::graph::{DependencyGraph, DependencyNode, NodeId, NodeSignature};
use crate::market_data::{MarketDataAvailabilityProvider, MARKET_DATA_SOURCING_FUNCTION};
use crate::rules::{CompiledFunctionResolver, ResolutionRule};
use crate::target::ComputationTargetResolver;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Read-only inputs shared by every builder of one compilation.
#[derive(Clone)]
pub struct ResolutionContext {
    /// Rules for the configuration, best first.
    pub resolver: Arc<CompiledFunctionResolver>,
    /// Market data oracle.
    pub market_data: Arc<dyn MarketDataAvailabilityProvider>,
    /// Target resolver.
    pub targets: Arc<dyn ComputationTargetResolver>,
}

enum Undo {
    NodeAdded(NodeId),
    OutputAdded {
        node: NodeId,
        specification: ValueSpecification,
    },
    Resolved(ValueRequirement),
    SignatureAdded(NodeSignature),
}

struct Failure {
    reason: ResolutionFailure,
    recursive: bool,
}

struct Rejected {
    recursive: bool,
}

#[derive(Default)]
struct BuildState {
    graph: DependencyGraph,
    resolved: HashMap<ValueRequirement, ValueSpecification>,
    failed: HashMap<ValueRequirement, ResolutionFailure>,
    signatures: HashMap<NodeSignature, NodeId>,
    requirement_mapping: BTreeMap<ValueRequirement, ValueSpecification>,
    exceptions: HashMap<ResolutionFailure, usize>,
    undo: Vec<Undo>,
}

impl BuildState {
    fn resolve_terminal(&mut self, ctx: &ResolutionContext, requirement: ValueRequirement) {
        if self.requirement_mapping.contains_key(&requirement) {
            return;
        }
        let mut stack = Vec::new();
        let result = self.resolve(ctx, &requirement, &mut stack);
        self.undo.clear();
        match result {
            Ok(specification) => {
                trace!(requirement = %requirement, specification = %specification, "Resolved");
                self.graph.unresolved_requirements.remove(&requirement);
                self.graph
                    .add_terminal_output(specification.clone(), requirement.clone());
                self.requirement_mapping.insert(requirement, specification);
            }
            Err(failure) => {
                warn!(
                    configuration = %self.graph.calculation_configuration_name(),
                    requirement = %requirement,
                    reason = %failure.reason,
                    "Unable to resolve requirement"
                );
                self.graph.unresolved_requirements.insert(requirement);
            }
        }
    }

    fn resolve(
        &mut self,
        ctx: &ResolutionContext,
        requirement: &ValueRequirement,
        stack: &mut Vec<ValueRequirement>,
    ) -> Result<ValueSpecification, Failure> {
        let result = self.resolve_uncounted(ctx, requirement, stack);
        if let Err(failure) = &result {
            *self.exceptions.entry(failure.reason.clone()).or_insert(0) += 1;
        }
        result
    }

    fn resolve_uncounted(
        &mut self,
        ctx: &ResolutionContext,
        requirement: &ValueRequirement,
        stack: &mut Vec<ValueRequirement>,
    ) -> Result<ValueSpecification, Failure> {
        if let Some(specification) = self.resolved.get(requirement) {
            return Ok(specification.clone());
        }
        if let Some(reason) = self.failed.get(requirement) {
            return Err(Failure {
                reason: reason.clone(),
                recursive: false,
            });
        }
        if stack.contains(requirement) {
            return Err(Failure {
                reason: ResolutionFailure::RecursiveRequirement(requirement.clone()),
                recursive: true,
            });
        }

        if let Some(specification) = ctx.market_data.get_availability(requirement) {
            if self.graph.producer_of(&specification).is_none() {
                let id = self.graph.add_node(DependencyNode::new(
                    MARKET_DATA_SOURCING_FUNCTION,
                    specification.target.clone(),
                    BTreeSet::new(),
                    BTreeSet::from([specification.clone()]),
                    ValidityWindow::unbounded(),
                ));
                self.undo.push(Undo::NodeAdded(id));
            }
            self.remember(requirement, &specification);
            return Ok(specification);
        }

        let Some(target) = ctx.targets.resolve(&requirement.target) else {
            return Err(Failure {
                reason: ResolutionFailure::UnresolvableTarget(requirement.clone()),
                recursive: false,
            });
        };

        let candidates: Vec<&ResolutionRule> = ctx
            .resolver
            .candidates(&requirement.value_name, requirement.target.target_type)
            .iter()
            .filter(|rule| rule.function.can_apply_to(&target))
            .collect();
        if candidates.is_empty() {
            let reason = ResolutionFailure::NoFunctions(requirement.clone());
            self.failed.insert(requirement.clone(), reason.clone());
            return Err(Failure {
                reason,
                recursive: false,
            });
        }

        stack.push(requirement.clone());
        let mut recursive = false;
        let mut resolved = None;
        let mut attempts = 0;
        for rule in candidates {
            attempts += 1;
            match self.try_rule(ctx, rule, &target, requirement, stack) {
                Ok(specification) => {
                    resolved = Some(specification);
                    break;
                }
                Err(rejected) => recursive |= rejected.recursive,
            }
        }
        stack.pop();

        match resolved {
            Some(specification) => {
                self.remember(requirement, &specification);
                Ok(specification)
            }
            None => {
                let reason = ResolutionFailure::CandidatesExhausted {
                    requirement: requirement.clone(),
                    attempts,
                };
                // a failure caused by the current stack may succeed elsewhere
                if !recursive {
                    self.failed.insert(requirement.clone(), reason.clone());
                }
                Err(Failure { reason, recursive })
            }
        }
    }

    fn try_rule(
        &mut self,
        ctx: &ResolutionContext,
        rule: &ResolutionRule,
        target: &ComputationTarget,
        requirement: &ValueRequirement,
        stack: &mut Vec<ValueRequirement>,
    ) -> Result<ValueSpecification, Rejected> {
        let function = &rule.function;
        let function_id = function.function_id();
        let maximal: Vec<ValueSpecification> = function
            .results(target)
            .into_iter()
            .map(|s| ValueSpecification::produced_by(s.value_name, s.target, function_id, s.properties))
            .collect();
        let Some(matched) = maximal.iter().find(|s| {
            s.value_name == requirement.value_name
                && s.target == requirement.target
                && requirement.constraints.is_satisfied_by(&s.properties)
        }) else {
            trace!(function = function_id, requirement = %requirement, "No matching output");
            return Err(Rejected { recursive: false });
        };
        let desired = ValueSpecification {
            properties: matched.properties.compose(&requirement.constraints),
            ..matched.clone()
        };
        if self.graph.producer_of(&desired).is_some() {
            return Ok(desired);
        }

        let Some(inputs) = function.requirements(target, &desired) else {
            return Err(Rejected { recursive: false });
        };

        let checkpoint = self.undo.len();
        let mut input_values = BTreeSet::new();
        for input in &inputs {
            match self.resolve(ctx, input, stack) {
                Ok(specification) => {
                    input_values.insert(specification);
                }
                Err(failure) => {
                    self.rollback(checkpoint);
                    let reason = ResolutionFailure::InputFailure {
                        requirement: requirement.clone(),
                        function_id: function_id.to_string(),
                        input: input.clone(),
                    };
                    trace!(reason = %reason, "Candidate rejected");
                    *self.exceptions.entry(reason).or_insert(0) += 1;
                    return Err(Rejected {
                        recursive: failure.recursive,
                    });
                }
            }
        }

        let signature = NodeSignature {
            function_id: function_id.to_string(),
            target: requirement.target.clone(),
            inputs: input_values,
        };
        if let Some(&id) = self.signatures.get(&signature) {
            if self.graph.producer_of(&desired).is_none() {
                self.graph.nodes[id.0].output_values.insert(desired.clone());
                self.graph.producers.insert(desired.clone(), id);
                self.undo.push(Undo::OutputAdded {
                    node: id,
                    specification: desired.clone(),
                });
            }
            return Ok(desired);
        }

        let mut outputs: BTreeSet<ValueSpecification> = maximal
            .iter()
            .filter(|s| *s != matched)
            .cloned()
            .collect();
        outputs.insert(desired.clone());
        let id = self.graph.add_node(DependencyNode::new(
            function_id,
            requirement.target.clone(),
            signature.inputs.clone(),
            outputs,
            function.validity(),
        ));
        self.undo.push(Undo::NodeAdded(id));
        self.signatures.insert(signature.clone(), id);
        self.undo.push(Undo::SignatureAdded(signature));
        Ok(desired)
    }

    fn remember(&mut self, requirement: &ValueRequirement, specification: &ValueSpecification) {
        if self
            .resolved
            .insert(requirement.clone(), specification.clone())
            .is_none()
        {
            self.undo.push(Undo::Resolved(requirement.clone()));
        }
    }

    fn rollback(&mut self, checkpoint: usize) {
        while self.undo.len() > checkpoint {
            let Some(entry) = self.undo.pop() else { break };
            match entry {
                Undo::NodeAdded(id) => {
                    debug_assert_eq!(id.0 + 1, self.graph.nodes.len());
                    if let Some(node) = self.graph.nodes.pop() {
                        for output in &node.output_values {
                            if self.graph.producers.get(output) == Some(&id) {
                                self.graph.producers.remove(output);
                            }
                        }
                    }
                }
                Undo::OutputAdded {
                    node,
                    specification,
                } => {
                    self.graph.nodes[node.0].output_values.remove(&specification);
                    self.graph.producers.remove(&specification);
                }
                Undo::Resolved(requirement) => {
                    self.resolved.remove(&requirement);
                }
                Undo::SignatureAdded(signature) => {
                    self.signatures.remove(&signature);
                }
            }
        }
    }
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<ValueRequirement>,
    job_active: bool,
    interrupted: bool,
    aborted: Option<String>,
}

struct Shared {
    configuration: String,
    context: ResolutionContext,
    cancel: CancellationToken,
    executor: OnceLock<Arc<ThreadPool>>,
    queue: Mutex<Queue>,
    idle: Condvar,
    state: Mutex<BuildState>,
}

impl Shared {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, BuildState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self) {
        loop {
            let requirement = {
                let mut queue = self.lock_queue();
                if self.cancel.is_cancelled() && !queue.pending.is_empty() {
                    debug!(
                        configuration = %self.configuration,
                        dropped = queue.pending.len(),
                        "Graph build cancelled"
                    );
                    queue.interrupted = true;
                    queue.pending.clear();
                }
                match queue.pending.pop_front() {
                    Some(requirement) => requirement,
                    None => {
                        queue.job_active = false;
                        self.idle.notify_all();
                        return;
                    }
                }
            };

            let mut state = self.lock_state();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                state.resolve_terminal(&self.context, requirement)
            }));
            let nodes = state.graph.size();
            drop(state);

            if let Err(payload) = outcome {
                let message = panic_message(payload);
                error!(configuration = %self.configuration, message = %message, "Graph build aborted");
                let mut queue = self.lock_queue();
                queue.aborted = Some(message);
                queue.pending.clear();
                queue.job_active = false;
                self.idle.notify_all();
                return;
            }
            trace!(configuration = %self.configuration, nodes, "Requirement processed");
        }
    }
}

fn spawn_if_idle(shared: &Arc<Shared>, queue: &mut Queue) {
    if queue.job_active || queue.pending.is_empty() {
        return;
    }
    if let Some(pool) = shared.executor.get() {
        queue.job_active = true;
        let job = Arc::clone(shared);
        pool.spawn(move || job.drain());
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builds the dependency graph of one calculation configuration.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use view_core::{CancellationToken, ComputationTargetSpecification, ComputationTargetType, UniqueId, ValueRequirement};
/// use view_depgraph::builder::{DependencyGraphBuilder, ResolutionContext};
/// use view_depgraph::function::{DeclaredFunction, DeclaredOutput};
/// use view_depgraph::market_data::FixedMarketDataAvailabilityProvider;
/// use view_depgraph::repository::FunctionRepository;
/// use view_depgraph::rules::{CompiledFunctionResolver, SimpleResolutionRuleTransform};
/// use view_depgraph::target::MapTargetResolver;
///
/// let repository: FunctionRepository = [DeclaredFunction::new(
///     "Fx",
///     ComputationTargetType::Primitive,
///     [DeclaredOutput::named("FxRate")],
/// )]
/// .into_iter()
/// .collect();
/// let context = ResolutionContext {
///     resolver: Arc::new(CompiledFunctionResolver::new(&repository, &SimpleResolutionRuleTransform::new())),
///     market_data: Arc::new(FixedMarketDataAvailabilityProvider::new()),
///     targets: Arc::new(MapTargetResolver::new()),
/// };
///
/// let builder = DependencyGraphBuilder::new("Default", context, CancellationToken::new());
/// builder.add_target(ValueRequirement::unconstrained(
///     "FxRate",
///     ComputationTargetSpecification::primitive(UniqueId::of("CurrencyPair", "EURUSD")),
/// ));
/// builder.wait_for_dependency_graph_build().unwrap();
/// let graph = builder.into_dependency_graph().unwrap();
/// assert_eq!(graph.size(), 1);
/// assert_eq!(graph.terminal_outputs().len(), 1);
/// ```
pub struct DependencyGraphBuilder {
    shared: Arc<Shared>,
}

impl DependencyGraphBuilder {
    /// Creates a builder for `configuration`.
    pub fn new(
        configuration: impl Into<String>,
        context: ResolutionContext,
        cancel: CancellationToken,
    ) -> Self {
        let configuration = configuration.into();
        let state = BuildState {
            graph: DependencyGraph::new(configuration.clone()),
            ..BuildState::default()
        };
        Self {
            shared: Arc::new(Shared {
                configuration,
                context,
                cancel,
                executor: OnceLock::new(),
                queue: Mutex::new(Queue::default()),
                idle: Condvar::new(),
                state: Mutex::new(state),
            }),
        }
    }

    /// Configuration this builder belongs to.
    pub fn calculation_configuration_name(&self) -> &str {
        &self.shared.configuration
    }

    /// Queues a requirement. Safe to call from several threads at once.
    pub fn add_target(&self, requirement: ValueRequirement) {
        let mut queue = self.shared.lock_queue();
        queue.pending.push_back(requirement);
        spawn_if_idle(&self.shared, &mut queue);
    }

    /// Queues several requirements.
    pub fn add_targets(&self, requirements: impl IntoIterator<Item = ValueRequirement>) {
        let mut queue = self.shared.lock_queue();
        queue.pending.extend(requirements);
        spawn_if_idle(&self.shared, &mut queue);
    }

    /// Moves resolution onto `executor`. Later calls are ignored.
    pub fn start(&self, executor: Arc<ThreadPool>) {
        if self.shared.executor.set(executor).is_err() {
            return;
        }
        let mut queue = self.shared.lock_queue();
        spawn_if_idle(&self.shared, &mut queue);
    }

    /// Number of requirements queued but not yet taken up.
    pub fn pending_count(&self) -> usize {
        self.shared.lock_queue().pending.len()
    }

    /// Blocks until every queued requirement has been processed.
    ///
    /// Without an executor the queue is drained on the calling thread.
    ///
    /// # Errors
    ///
    /// - `BuildError::Interrupted` when the cancellation token fires first
    /// - `BuildError::Aborted` when a function panicked during resolution
    pub fn wait_for_dependency_graph_build(&self) -> Result<(), BuildError> {
        let shared = &self.shared;
        let mut queue = shared.lock_queue();
        loop {
            if let Some(message) = &queue.aborted {
                return Err(BuildError::Aborted {
                    configuration: shared.configuration.clone(),
                    message: message.clone(),
                });
            }
            if queue.interrupted || shared.cancel.is_cancelled() {
                queue.interrupted = true;
                queue.pending.clear();
                return Err(BuildError::Interrupted(shared.configuration.clone()));
            }
            if queue.pending.is_empty() && !queue.job_active {
                return Ok(());
            }
            if !queue.job_active {
                queue.job_active = true;
                match shared.executor.get() {
                    Some(pool) => {
                        let job = Arc::clone(shared);
                        pool.spawn(move || job.drain());
                    }
                    None => {
                        drop(queue);
                        shared.drain();
                        queue = shared.lock_queue();
                        continue;
                    }
                }
            }
            queue = shared
                .idle
                .wait_timeout(queue, CANCEL_POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Requirement to satisfying specification, for resolved requirements.
    pub fn value_requirement_mapping(&self) -> BTreeMap<ValueRequirement, ValueSpecification> {
        self.shared.lock_state().requirement_mapping.clone()
    }

    /// Occurrence count of every failure met so far.
    pub fn exceptions(&self) -> HashMap<ResolutionFailure, usize> {
        self.shared.lock_state().exceptions.clone()
    }

    /// Requested requirements that could not be resolved.
    pub fn unresolved_requirements(&self) -> BTreeSet<ValueRequirement> {
        self.shared.lock_state().graph.missing_requirements().clone()
    }

    /// Waits for the build and hands over the graph.
    ///
    /// # Errors
    ///
    /// Same as [`wait_for_dependency_graph_build`](Self::wait_for_dependency_graph_build).
    pub fn into_dependency_graph(self) -> Result<DependencyGraph, BuildError> {
        self.wait_for_dependency_graph_build()?;
        let mut state = self.shared.lock_state();
        let graph = std::mem::take(&mut state.graph);
        debug!(
            configuration = %self.shared.configuration,
            nodes = graph.size(),
            terminal_outputs = graph.terminal_outputs().len(),
            unresolved = graph.missing_requirements().len(),
            "Dependency graph built"
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{DeclaredFunction, DeclaredInput, DeclaredOutput, InputTarget};
    use crate::market_data::FixedMarketDataAvailabilityProvider;
    use crate::repository::FunctionRepository;
    use crate::rules::SimpleResolutionRuleTransform;
    use crate::target::MapTargetResolver;
    use chrono::{DateTime, TimeZone, Utc};
    use view_core::{ComputationTargetSpecification, ComputationTargetType, UniqueId, ValueProperties};

    fn prim(value: &str) -> ComputationTargetSpecification {
        ComputationTargetSpecification::primitive(UniqueId::of("Test", value))
    }

    fn req(name: &str) -> ValueRequirement {
        ValueRequirement::unconstrained(name, prim("T"))
    }

    fn producer(id: &str, outputs: &[&str], inputs: &[&str]) -> DeclaredFunction {
        let mut f = DeclaredFunction::new(
            id,
            ComputationTargetType::Primitive,
            outputs.iter().map(|o| DeclaredOutput::named(*o)),
        );
        for input in inputs {
            f = f.with_input(DeclaredInput::same(*input));
        }
        f
    }

    fn context_with(
        repository: &FunctionRepository,
        transform: &SimpleResolutionRuleTransform,
        market_data: FixedMarketDataAvailabilityProvider,
    ) -> ResolutionContext {
        ResolutionContext {
            resolver: Arc::new(CompiledFunctionResolver::new(repository, transform)),
            market_data: Arc::new(market_data),
            targets: Arc::new(MapTargetResolver::new()),
        }
    }

    fn build(
        functions: Vec<DeclaredFunction>,
        market_data: FixedMarketDataAvailabilityProvider,
        requirements: Vec<ValueRequirement>,
    ) -> (DependencyGraph, HashMap<ResolutionFailure, usize>) {
        let repository: FunctionRepository = functions.into_iter().collect();
        let context = context_with(&repository, &SimpleResolutionRuleTransform::new(), market_data);
        let builder = DependencyGraphBuilder::new("Default", context, CancellationToken::new());
        builder.add_targets(requirements);
        builder.wait_for_dependency_graph_build().unwrap();
        let exceptions = builder.exceptions();
        (builder.into_dependency_graph().unwrap(), exceptions)
    }

    fn functions_in(graph: &DependencyGraph) -> Vec<&str> {
        let mut ids: Vec<&str> = graph.nodes().iter().map(|n| n.function_id()).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_single_output_single_function_node() {
        let (graph, _) = build(
            vec![producer("F", &["Req1", "Req2"], &[])],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("Req1")],
        );
        assert_eq!(graph.size(), 1);
        let node = &graph.nodes()[0];
        assert_eq!(node.output_values().len(), 2);
        assert!(node.input_nodes().is_empty());
        assert_eq!(graph.terminal_outputs().len(), 1);
    }

    #[test]
    fn test_multiple_outputs_share_node() {
        let (graph, _) = build(
            vec![producer("F", &["Req1", "Req2"], &[])],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("Req1"), req("Req2")],
        );
        assert_eq!(graph.size(), 1);
        assert_eq!(graph.terminal_outputs().len(), 2);
    }

    #[test]
    fn test_unsatisfiable_dependency_is_collected() {
        let (graph, exceptions) = build(
            vec![producer("F", &["Req1"], &["Missing"])],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("Req1")],
        );
        assert!(graph.is_empty());
        assert!(graph.missing_requirements().contains(&req("Req1")));
        assert_eq!(exceptions.get(&ResolutionFailure::NoFunctions(req("Missing"))), Some(&1));
        assert_eq!(
            exceptions.get(&ResolutionFailure::CandidatesExhausted {
                requirement: req("Req1"),
                attempts: 1
            }),
            Some(&1)
        );
    }

    #[test]
    fn test_double_level_no_market_data() {
        let (graph, _) = build(
            vec![producer("F1", &["Req1"], &["Req2"]), producer("F2", &["Req2"], &[])],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("Req1")],
        );
        assert_eq!(graph.size(), 2);
        let order = graph.topological_order().unwrap();
        assert_eq!(graph.node(order[0]).unwrap().function_id(), "F2");
        assert_eq!(graph.node(order[1]).unwrap().function_id(), "F1");
        assert_eq!(graph.node(order[1]).unwrap().input_nodes().len(), 1);
        assert!(graph.market_data_requirements().is_empty());
    }

    #[test]
    fn test_double_level_market_data_preferred() {
        let (graph, _) = build(
            vec![producer("F1", &["Req1"], &["Req2"]), producer("F2", &["Req2"], &[])],
            FixedMarketDataAvailabilityProvider::new().with("Req2", prim("T")),
            vec![req("Req1")],
        );
        assert_eq!(functions_in(&graph), vec!["F1", MARKET_DATA_SOURCING_FUNCTION]);
        let md = graph.market_data_requirements();
        assert_eq!(md.len(), 1);
        assert_eq!(md.iter().next().unwrap().value_name, "Req2");
    }

    #[test]
    fn test_lower_priority_wins() {
        let (graph, _) = build(
            vec![
                producer("Slow", &["Req1"], &[]).with_priority(5),
                producer("Fast", &["Req1"], &[]).with_priority(1),
            ],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("Req1")],
        );
        assert_eq!(functions_in(&graph), vec!["Fast"]);
    }

    #[test]
    fn test_rule_transform_excludes_function() {
        let repository: FunctionRepository = [
            producer("Fast", &["Req1"], &[]).with_priority(1),
            producer("Slow", &["Req1"], &[]).with_priority(5),
        ]
        .into_iter()
        .collect();
        let transform = SimpleResolutionRuleTransform::new().dont_use("Fast");
        let context = context_with(&repository, &transform, FixedMarketDataAvailabilityProvider::new());
        let builder = DependencyGraphBuilder::new("NoFast", context, CancellationToken::new());
        builder.add_target(req("Req1"));
        let graph = builder.into_dependency_graph().unwrap();
        assert_eq!(functions_in(&graph), vec!["Slow"]);
    }

    #[test]
    fn test_failed_candidate_leaves_no_nodes() {
        // "Best" resolves its first input then fails on the second
        let (graph, exceptions) = build(
            vec![
                producer("Best", &["Req1"], &["Req2", "Missing"]).with_priority(0),
                producer("Fallback", &["Req1"], &[]).with_priority(1),
                producer("F2", &["Req2"], &[]),
            ],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("Req1")],
        );
        assert_eq!(functions_in(&graph), vec!["Fallback"]);
        assert!(graph.is_acyclic());
        assert!(exceptions.keys().any(|f| matches!(
            f,
            ResolutionFailure::InputFailure { function_id, .. } if function_id == "Best"
        )));
    }

    #[test]
    fn test_recursive_requirement_detected() {
        let (graph, exceptions) = build(
            vec![producer("A", &["X"], &["Y"]), producer("B", &["Y"], &["X"])],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("X")],
        );
        assert!(graph.is_empty());
        assert!(exceptions.contains_key(&ResolutionFailure::RecursiveRequirement(req("X"))));
    }

    #[test]
    fn test_shared_input_resolved_once() {
        let (graph, _) = build(
            vec![
                producer("A", &["Req1"], &["Shared"]),
                producer("B", &["Req2"], &["Shared"]),
                producer("S", &["Shared"], &[]),
            ],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("Req1"), req("Req2")],
        );
        assert_eq!(functions_in(&graph), vec!["A", "B", "S"]);
        for spec in graph.output_values() {
            assert!(graph.producer_of(spec).is_some());
        }
    }

    #[test]
    fn test_constraints_select_function() {
        let usd = DeclaredFunction::new(
            "UsdPV",
            ComputationTargetType::Primitive,
            [DeclaredOutput {
                value_name: "PV".to_string(),
                properties: ValueProperties::new().with("Currency", ["USD"]),
            }],
        );
        let any = DeclaredFunction::new(
            "AnyPV",
            ComputationTargetType::Primitive,
            [DeclaredOutput {
                value_name: "PV".to_string(),
                properties: ValueProperties::new().with_any("Currency"),
            }],
        )
        .with_priority(1);
        let eur = ValueRequirement::new("PV", prim("T"), ValueProperties::new().with("Currency", ["EUR"]));
        let (graph, _) = build(vec![usd, any], FixedMarketDataAvailabilityProvider::new(), vec![eur.clone()]);
        assert_eq!(functions_in(&graph), vec!["AnyPV"]);
        let (spec, requirements) = graph.terminal_outputs().iter().next().unwrap();
        assert_eq!(spec.properties.value_of("Currency"), Some("EUR"));
        assert!(requirements.contains(&eur));
    }

    #[test]
    fn test_unresolvable_target() {
        let f = DeclaredFunction::new(
            "PosPV",
            ComputationTargetType::Position,
            [DeclaredOutput::named("PV")],
        );
        let missing = ValueRequirement::unconstrained(
            "PV",
            ComputationTargetSpecification::position(UniqueId::of("DbPos", "404")),
        );
        let (graph, exceptions) = build(vec![f], FixedMarketDataAvailabilityProvider::new(), vec![missing.clone()]);
        assert!(graph.missing_requirements().contains(&missing));
        assert!(exceptions.contains_key(&ResolutionFailure::UnresolvableTarget(missing)));
    }

    #[test]
    fn test_node_validity_from_function() {
        let from: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (graph, _) = build(
            vec![producer("F", &["Req1"], &[]).valid_between(Some(from), None)],
            FixedMarketDataAvailabilityProvider::new(),
            vec![req("Req1")],
        );
        assert_eq!(graph.nodes()[0].earliest_invocation(), Some(from));
        assert_eq!(graph.validity_window().valid_from, Some(from));
    }

    #[test]
    fn test_children_inputs_on_primitive_resolve_to_no_inputs() {
        let f = producer("Agg", &["Sum"], &[]).with_input(DeclaredInput::on("Leaf", InputTarget::Children));
        let (graph, _) = build(vec![f], FixedMarketDataAvailabilityProvider::new(), vec![req("Sum")]);
        assert_eq!(graph.size(), 1);
        assert!(graph.nodes()[0].input_values().is_empty());
    }

    #[test]
    fn test_background_build_with_concurrent_producers() {
        let repository: FunctionRepository = [producer("F", &["V"], &["MD"])].into_iter().collect();
        let mut market_data = FixedMarketDataAvailabilityProvider::new();
        for i in 0..64 {
            market_data = market_data.with("MD", prim(&i.to_string()));
        }
        let context = context_with(&repository, &SimpleResolutionRuleTransform::new(), market_data);
        let builder = DependencyGraphBuilder::new("Parallel", context, CancellationToken::new());
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap());
        builder.start(pool);

        std::thread::scope(|scope| {
            for chunk in 0..4 {
                let builder = &builder;
                scope.spawn(move || {
                    for i in (chunk * 16)..(chunk * 16 + 16) {
                        builder.add_target(ValueRequirement::unconstrained("V", prim(&i.to_string())));
                    }
                });
            }
        });
        builder.wait_for_dependency_graph_build().unwrap();
        assert_eq!(builder.pending_count(), 0);
        assert_eq!(builder.value_requirement_mapping().len(), 64);
        let graph = builder.into_dependency_graph().unwrap();
        assert_eq!(graph.size(), 128);
        assert_eq!(graph.market_data_requirements().len(), 64);
    }

    #[test]
    fn test_cancelled_build_is_interrupted() {
        let repository: FunctionRepository = [producer("F", &["V"], &[])].into_iter().collect();
        let context = context_with(&repository, &SimpleResolutionRuleTransform::new(), FixedMarketDataAvailabilityProvider::new());
        let token = CancellationToken::new();
        let builder = DependencyGraphBuilder::new("Cancelled", context, token.clone());
        builder.add_target(req("V"));
        token.cancel();
        assert_eq!(
            builder.wait_for_dependency_graph_build(),
            Err(BuildError::Interrupted("Cancelled".to_string()))
        );
    }

    #[derive(Debug)]
    struct Exploding;

    impl FunctionDefinition for Exploding {
        fn function_id(&self) -> &str {
            "Exploding"
        }
        fn target_type(&self) -> ComputationTargetType {
            ComputationTargetType::Primitive
        }
        fn output_value_names(&self) -> Vec<String> {
            vec!["V".to_string()]
        }
        fn can_apply_to(&self, _target: &ComputationTarget) -> bool {
            true
        }
        fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification> {
            vec![ValueSpecification::new("V", target.to_specification(), ValueProperties::new())]
        }
        fn requirements(&self, _target: &ComputationTarget, _desired: &ValueSpecification) -> Option<Vec<ValueRequirement>> {
            panic!("boom")
        }
    }

    #[test]
    fn test_panicking_function_aborts_build() {
        let mut repository = FunctionRepository::new();
        repository.register(Arc::new(Exploding), 0);
        let context = context_with(&repository, &SimpleResolutionRuleTransform::new(), FixedMarketDataAvailabilityProvider::new());
        let builder = DependencyGraphBuilder::new("Boom", context, CancellationToken::new());
        builder.add_target(req("V"));
        match builder.wait_for_dependency_graph_build() {
            Err(BuildError::Aborted { configuration, message }) => {
                assert_eq!(configuration, "Boom");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
