//! Per-call compilation state.
//!
//! A [`ViewCompilationContext`] lives for exactly one compile call. It owns one
//! [`ConfigurationContext`] per calculation configuration, each holding that
//! configuration's graph builder and requirement accumulator, and hands them
//! over by value once requirement gathering is done.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use view_core::position::{Portfolio, SecuritySource};
use view_core::{
    CancellationToken, ComputationTarget, ComputationTargetSpecification, ComputationTargetType,
    UniqueId, ValueRequirement, ValueSpecification, VersionCorrection,
};
use view_depgraph::{
    BuildError, CompiledFunctionResolver, ComputationTargetResolver, DependencyGraph,
    DependencyGraphBuilder, MapTargetResolver, ResolutionContext, ResolutionFailure,
};

use crate::definition::{ViewCalculationConfiguration, ViewDefinition};
use crate::error::{CompilationError, Result};
use crate::services::ViewCompilationServices;

/// Phase of a compile call. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompilationState {
    /// Context built, builders idle.
    Created,
    /// Specific requirements queued and the portfolio, if needed, resolved.
    RequirementsGathered,
    /// Portfolio requirements are being fed to builders that may already be running.
    GraphsBuilding,
    /// Every configuration's graph is complete.
    GraphsBuilt,
    /// The compiled artifact exists.
    Assembled,
}

impl CompilationState {
    /// The phase after this one.
    pub fn next(self) -> Option<CompilationState> {
        match self {
            CompilationState::Created => Some(CompilationState::RequirementsGathered),
            CompilationState::RequirementsGathered => Some(CompilationState::GraphsBuilding),
            CompilationState::GraphsBuilding => Some(CompilationState::GraphsBuilt),
            CompilationState::GraphsBuilt => Some(CompilationState::Assembled),
            CompilationState::Assembled => None,
        }
    }
}

impl fmt::Display for CompilationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompilationState::Created => "CREATED",
            CompilationState::RequirementsGathered => "REQUIREMENTS_GATHERED",
            CompilationState::GraphsBuilding => "GRAPHS_BUILDING",
            CompilationState::GraphsBuilt => "GRAPHS_BUILT",
            CompilationState::Assembled => "ASSEMBLED",
        };
        f.write_str(name)
    }
}

/// Target resolver for one compilation.
///
/// Serves the targets registered from the resolved portfolio, falls back to
/// the security source for SECURITY targets outside the portfolio, and
/// records every specification it resolved.
pub struct CompilationTargetResolver {
    targets: MapTargetResolver,
    securities: Arc<dyn SecuritySource>,
    resolutions: Mutex<BTreeMap<ComputationTargetSpecification, UniqueId>>,
}

impl CompilationTargetResolver {
    /// Creates a resolver with nothing registered.
    pub fn new(securities: Arc<dyn SecuritySource>) -> Self {
        Self {
            targets: MapTargetResolver::new(),
            securities,
            resolutions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers every target of a resolved portfolio.
    pub fn add_portfolio(&self, portfolio: &Portfolio) {
        self.targets.add_portfolio(portfolio);
        debug!(targets = self.targets.len(), "Registered portfolio targets");
    }

    /// Specifications resolved so far, with the identifier each resolved to.
    pub fn resolutions(&self) -> BTreeMap<ComputationTargetSpecification, UniqueId> {
        self.resolutions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, specification: &ComputationTargetSpecification, target: &ComputationTarget) {
        self.resolutions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(specification.clone())
            .or_insert_with(|| target.unique_id().clone());
    }
}

impl ComputationTargetResolver for CompilationTargetResolver {
    fn resolve(&self, specification: &ComputationTargetSpecification) -> Option<ComputationTarget> {
        let target = match self.targets.resolve(specification) {
            Some(target) => target,
            None if specification.target_type == ComputationTargetType::Security => {
                let security = self.securities.get_security(&specification.unique_id).ok()?;
                trace!(target = %specification, "Resolved security target from source");
                self.targets.add_security(security);
                self.targets.resolve(specification)?
            }
            None => return None,
        };
        self.record(specification, &target);
        Some(target)
    }
}

/// One configuration's builder and requirement accumulator.
pub struct ConfigurationContext {
    configuration: ViewCalculationConfiguration,
    builder: DependencyGraphBuilder,
    requirements: Mutex<BTreeSet<ValueRequirement>>,
}

impl ConfigurationContext {
    fn new(configuration: ViewCalculationConfiguration, builder: DependencyGraphBuilder) -> Self {
        Self {
            configuration,
            builder,
            requirements: Mutex::new(BTreeSet::new()),
        }
    }

    /// Configuration name.
    pub fn name(&self) -> &str {
        &self.configuration.name
    }

    /// The configuration being compiled.
    pub fn configuration(&self) -> &ViewCalculationConfiguration {
        &self.configuration
    }

    /// Queues `requirement` with the builder unless it was queued before.
    ///
    /// Returns true if the requirement was new. Safe to call from traversal
    /// callbacks running on several threads.
    pub fn add_requirement(&self, requirement: ValueRequirement) -> bool {
        let added = self
            .requirements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(requirement.clone());
        if added {
            self.builder.add_target(requirement);
        }
        added
    }

    /// Every requirement queued so far.
    pub fn requirements(&self) -> BTreeSet<ValueRequirement> {
        self.requirements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Blocks until the builder has processed everything queued so far.
    ///
    /// # Errors
    ///
    /// The builder's failure, as reported by
    /// [`DependencyGraphBuilder::wait_for_dependency_graph_build`].
    pub fn wait_for_graph_build(&self) -> std::result::Result<(), BuildError> {
        self.builder.wait_for_dependency_graph_build()
    }

    /// Completes the build and hands over the configuration's results.
    ///
    /// Values the graph produces but nothing consumes or requested are dropped.
    ///
    /// # Errors
    ///
    /// The builder's failure.
    pub fn build(self) -> std::result::Result<BuiltConfiguration, BuildError> {
        self.builder.wait_for_dependency_graph_build()?;
        let failures = self.builder.exceptions();
        let requirement_mapping = self.builder.value_requirement_mapping();
        let mut graph = self.builder.into_dependency_graph()?;
        let removed = graph.remove_unnecessary_values();
        debug!(
            configuration = %self.configuration.name,
            nodes = graph.size(),
            removed_values = removed,
            "Configuration graph complete"
        );
        Ok(BuiltConfiguration {
            requirements: self
                .requirements
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner),
            configuration: self.configuration,
            graph,
            failures,
            requirement_mapping,
        })
    }
}

/// A configuration whose graph build has completed.
#[derive(Debug)]
pub struct BuiltConfiguration {
    /// The configuration.
    pub configuration: ViewCalculationConfiguration,
    /// Every requirement fed to the builder.
    pub requirements: BTreeSet<ValueRequirement>,
    /// The built graph.
    pub graph: DependencyGraph,
    /// Occurrence count of every resolution failure.
    pub failures: HashMap<ResolutionFailure, usize>,
    /// Requirement to satisfying specification, for resolved requirements.
    pub requirement_mapping: BTreeMap<ValueRequirement, ValueSpecification>,
}

/// State of one compile call.
pub struct ViewCompilationContext {
    view: ViewDefinition,
    services: ViewCompilationServices,
    valuation_time: DateTime<Utc>,
    version_correction: VersionCorrection,
    cancel: CancellationToken,
    targets: Arc<CompilationTargetResolver>,
    configurations: Vec<ConfigurationContext>,
    state: CompilationState,
    specific_target_types: BTreeSet<ComputationTargetType>,
    portfolio: Option<Arc<Portfolio>>,
}

impl ViewCompilationContext {
    /// Creates the context and one idle builder per configuration.
    ///
    /// Each builder gets its own resolver compiled from the configuration's
    /// rule transform, holding only functions valid at `valuation_time`.
    pub fn new(
        view: ViewDefinition,
        services: ViewCompilationServices,
        valuation_time: DateTime<Utc>,
        version_correction: VersionCorrection,
        cancel: CancellationToken,
    ) -> Self {
        let targets = Arc::new(CompilationTargetResolver::new(Arc::clone(&services.securities)));
        let configurations = view
            .calculation_configurations
            .iter()
            .map(|configuration| {
                let resolver = CompiledFunctionResolver::at_valuation_time(
                    &services.functions,
                    &configuration.resolution_rule_transform,
                    valuation_time,
                );
                let context = ResolutionContext {
                    resolver: Arc::new(resolver),
                    market_data: Arc::clone(&services.market_data),
                    targets: Arc::clone(&targets) as Arc<dyn ComputationTargetResolver>,
                };
                let builder =
                    DependencyGraphBuilder::new(configuration.name.clone(), context, cancel.clone());
                ConfigurationContext::new(configuration.clone(), builder)
            })
            .collect();
        Self {
            view,
            services,
            valuation_time,
            version_correction,
            cancel,
            targets,
            configurations,
            state: CompilationState::Created,
            specific_target_types: BTreeSet::new(),
            portfolio: None,
        }
    }

    /// The view being compiled.
    pub fn view(&self) -> &ViewDefinition {
        &self.view
    }

    /// Collaborators.
    pub fn services(&self) -> &ViewCompilationServices {
        &self.services
    }

    /// Instant the view is compiled for.
    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    /// Version/correction for source lookups.
    pub fn version_correction(&self) -> VersionCorrection {
        self.version_correction
    }

    /// Cancellation token of the call.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Target resolver shared by every builder of the call.
    pub fn targets(&self) -> &CompilationTargetResolver {
        &self.targets
    }

    /// Configuration contexts in declaration order.
    pub fn configurations(&self) -> &[ConfigurationContext] {
        &self.configurations
    }

    /// Hands over the configuration contexts, leaving none behind.
    pub fn take_configurations(&mut self) -> Vec<ConfigurationContext> {
        std::mem::take(&mut self.configurations)
    }

    /// Current phase.
    pub fn state(&self) -> CompilationState {
        self.state
    }

    /// Moves to `target`, which must be the phase directly after the current one.
    ///
    /// # Errors
    ///
    /// `InvalidState` for any other transition.
    pub fn advance(&mut self, target: CompilationState) -> Result<()> {
        if self.state.next() != Some(target) {
            return Err(CompilationError::InvalidState(format!(
                "cannot move view '{}' from {} to {}",
                self.view.name, self.state, target
            )));
        }
        debug!(view = %self.view.name, from = %self.state, to = %target, "Compilation state change");
        self.state = target;
        Ok(())
    }

    /// Fails with `Interrupted` if the call has been cancelled.
    pub fn check_cancelled(&self, phase: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CompilationError::Interrupted(phase.to_string()));
        }
        Ok(())
    }

    /// Target types named by specific requirements.
    pub fn specific_target_types(&self) -> &BTreeSet<ComputationTargetType> {
        &self.specific_target_types
    }

    /// Records the target types named by specific requirements.
    pub fn set_specific_target_types(&mut self, types: BTreeSet<ComputationTargetType>) {
        self.specific_target_types = types;
    }

    /// The resolved portfolio, once resolved.
    pub fn portfolio(&self) -> Option<&Arc<Portfolio>> {
        self.portfolio.as_ref()
    }

    /// Stores the resolved portfolio and registers its targets.
    pub fn set_portfolio(&mut self, portfolio: Arc<Portfolio>) {
        self.targets.add_portfolio(&portfolio);
        self.portfolio = Some(portfolio);
    }
}
