//! The compiled view: per-configuration graphs plus aggregate facts about them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;
use view_core::position::Portfolio;
use view_core::{
    ComputationTargetSpecification, ComputationTargetType, UniqueId, ValidityWindow,
    ValueRequirement, ValueSpecification, VersionCorrection,
};
use view_depgraph::{ComputationTargetResolver, DependencyGraph, ResolutionFailure};

use crate::context::BuiltConfiguration;
use crate::definition::ViewDefinition;
use crate::error::{CompilationError, Result};

static COMPILATION_PREFIX: OnceLock<String> = OnceLock::new();
static COMPILATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier unique to one compile call: a per-process UUID and a counter.
fn next_compilation_id() -> String {
    let prefix = COMPILATION_PREFIX.get_or_init(|| uuid::Uuid::new_v4().to_string());
    let sequence = COMPILATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{prefix}-{sequence}")
}

/// Summary of one compiled configuration.
#[derive(Debug, Clone)]
pub struct CompiledViewCalculationConfiguration {
    name: String,
    terminal_outputs: BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>,
    market_data_requirements: BTreeSet<ValueSpecification>,
    computation_targets: BTreeSet<ComputationTargetSpecification>,
    unresolved_requirements: BTreeSet<ValueRequirement>,
    failures: BTreeMap<ResolutionFailure, usize>,
}

impl CompiledViewCalculationConfiguration {
    fn of(built: &BuiltConfiguration) -> Self {
        Self {
            name: built.configuration.name.clone(),
            terminal_outputs: built.graph.terminal_outputs().clone(),
            market_data_requirements: built.graph.market_data_requirements(),
            computation_targets: built.graph.all_computation_targets(),
            unresolved_requirements: built.graph.missing_requirements().clone(),
            failures: built
                .failures
                .iter()
                .map(|(failure, count)| (failure.clone(), *count))
                .collect(),
        }
    }

    /// Configuration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directly requested specifications with the requirements they satisfy.
    pub fn terminal_outputs(&self) -> &BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>> {
        &self.terminal_outputs
    }

    /// Externally sourced leaf values.
    pub fn market_data_requirements(&self) -> &BTreeSet<ValueSpecification> {
        &self.market_data_requirements
    }

    /// Targets of the graph's nodes.
    pub fn computation_targets(&self) -> &BTreeSet<ComputationTargetSpecification> {
        &self.computation_targets
    }

    /// Requested requirements that no function could satisfy.
    pub fn unresolved_requirements(&self) -> &BTreeSet<ValueRequirement> {
        &self.unresolved_requirements
    }

    /// Occurrence count of every resolution failure met while building.
    pub fn failures(&self) -> &BTreeMap<ResolutionFailure, usize> {
        &self.failures
    }

    /// Returns true if `requirement` was requested and resolved.
    pub fn is_resolved(&self, requirement: &ValueRequirement) -> bool {
        self.terminal_outputs
            .values()
            .any(|requirements| requirements.contains(requirement))
    }
}

/// Everything an execution engine needs to run a view.
///
/// Immutable once assembled. A later valuation time may reuse the artifact
/// when [`is_valid_for`](Self::is_valid_for) holds and the function registry
/// still has the same [`function_init_id`](Self::function_init_id).
#[derive(Debug)]
pub struct CompiledViewDefinitionWithGraphs {
    compilation_id: String,
    view: ViewDefinition,
    portfolio: Option<Arc<Portfolio>>,
    valuation_time: DateTime<Utc>,
    version_correction: VersionCorrection,
    function_init_id: u64,
    configurations: Vec<CompiledViewCalculationConfiguration>,
    graphs: Vec<DependencyGraph>,
    market_data_requirements: BTreeSet<ValueSpecification>,
    computation_targets: BTreeSet<ComputationTargetSpecification>,
    security_types: BTreeSet<String>,
    resolved_targets: BTreeMap<ComputationTargetSpecification, UniqueId>,
    validity: ValidityWindow,
    compile_duration: Duration,
}

/// Inputs of [`CompiledViewDefinitionWithGraphs::assemble`].
pub struct AssemblyInput<'a> {
    /// The compiled view.
    pub view: ViewDefinition,
    /// The resolved portfolio, if the view needed one.
    pub portfolio: Option<Arc<Portfolio>>,
    /// Instant compiled for.
    pub valuation_time: DateTime<Utc>,
    /// Version/correction used for lookups.
    pub version_correction: VersionCorrection,
    /// Function registry snapshot used.
    pub function_init_id: u64,
    /// Built configurations in declaration order.
    pub configurations: Vec<BuiltConfiguration>,
    /// Resolver used to find the security type of SECURITY targets.
    pub targets: &'a dyn ComputationTargetResolver,
    /// Target resolutions recorded while building.
    pub resolutions: BTreeMap<ComputationTargetSpecification, UniqueId>,
}

impl CompiledViewDefinitionWithGraphs {
    /// Packages built configurations into the compiled view.
    ///
    /// Resolutions of targets no graph uses are dropped, except positions.
    ///
    /// # Errors
    ///
    /// `InvalidValidityWindow` when the intersection of every node's window is
    /// empty or does not contain the valuation time.
    pub fn assemble(input: AssemblyInput<'_>) -> Result<Self> {
        let validity = input
            .configurations
            .iter()
            .fold(ValidityWindow::unbounded(), |window, built| {
                window.intersect(&built.graph.validity_window())
            });
        if validity.is_empty() || !validity.contains(input.valuation_time) {
            return Err(CompilationError::InvalidValidityWindow {
                view: input.view.name.clone(),
                window: validity,
                valuation_time: input.valuation_time,
            });
        }

        let configurations: Vec<CompiledViewCalculationConfiguration> = input
            .configurations
            .iter()
            .map(CompiledViewCalculationConfiguration::of)
            .collect();
        for configuration in &configurations {
            if !configuration.unresolved_requirements.is_empty() {
                warn!(
                    view = %input.view.name,
                    configuration = configuration.name(),
                    unresolved = configuration.unresolved_requirements.len(),
                    "Configuration compiled with unresolved requirements"
                );
            }
        }

        let market_data_requirements = configurations
            .iter()
            .flat_map(|c| c.market_data_requirements.iter().cloned())
            .collect();
        let computation_targets: BTreeSet<ComputationTargetSpecification> = configurations
            .iter()
            .flat_map(|c| c.computation_targets.iter().cloned())
            .collect();
        let security_types = computation_targets
            .iter()
            .filter(|target| target.target_type == ComputationTargetType::Security)
            .filter_map(|target| input.targets.resolve(target))
            .filter_map(|target| target.security().map(|s| s.security_type.clone()))
            .collect();
        let resolved_targets = input
            .resolutions
            .into_iter()
            .filter(|(specification, _)| {
                specification.target_type == ComputationTargetType::Position
                    || computation_targets.contains(specification)
            })
            .collect();

        Ok(Self {
            compilation_id: next_compilation_id(),
            view: input.view,
            portfolio: input.portfolio,
            valuation_time: input.valuation_time,
            version_correction: input.version_correction,
            function_init_id: input.function_init_id,
            configurations,
            graphs: input.configurations.into_iter().map(|built| built.graph).collect(),
            market_data_requirements,
            computation_targets,
            security_types,
            resolved_targets,
            validity,
            compile_duration: Duration::ZERO,
        })
    }

    /// Records the wall time of the compile call (builder style).
    pub(crate) fn with_compile_duration(mut self, compile_duration: Duration) -> Self {
        self.compile_duration = compile_duration;
        self
    }

    /// Identifier of the compile call that produced this artifact.
    pub fn compilation_id(&self) -> &str {
        &self.compilation_id
    }

    /// The compiled view definition.
    pub fn view_definition(&self) -> &ViewDefinition {
        &self.view
    }

    /// The resolved portfolio, or `None` when the view did not need it.
    pub fn portfolio(&self) -> Option<&Arc<Portfolio>> {
        self.portfolio.as_ref()
    }

    /// Instant compiled for.
    pub fn valuation_time(&self) -> DateTime<Utc> {
        self.valuation_time
    }

    /// Version/correction used for lookups.
    pub fn version_correction(&self) -> VersionCorrection {
        self.version_correction
    }

    /// Function registry snapshot used.
    pub fn function_init_id(&self) -> u64 {
        self.function_init_id
    }

    /// Compiled configurations in declaration order.
    pub fn compiled_calculation_configurations(&self) -> &[CompiledViewCalculationConfiguration] {
        &self.configurations
    }

    /// Compiled configuration by name.
    pub fn compiled_calculation_configuration(
        &self,
        name: &str,
    ) -> Option<&CompiledViewCalculationConfiguration> {
        self.configurations.iter().find(|c| c.name == name)
    }

    /// Graphs in declaration order.
    pub fn dependency_graphs(&self) -> &[DependencyGraph] {
        &self.graphs
    }

    /// Graph of configuration `name`.
    pub fn dependency_graph(&self, name: &str) -> Option<&DependencyGraph> {
        self.graphs
            .iter()
            .find(|g| g.calculation_configuration_name() == name)
    }

    /// Union of every graph's market data leaves.
    pub fn market_data_requirements(&self) -> &BTreeSet<ValueSpecification> {
        &self.market_data_requirements
    }

    /// Union of every graph's node targets.
    pub fn computation_targets(&self) -> &BTreeSet<ComputationTargetSpecification> {
        &self.computation_targets
    }

    /// Security types of the SECURITY targets of every graph.
    pub fn security_types(&self) -> &BTreeSet<String> {
        &self.security_types
    }

    /// Target specifications resolved during compilation and what they resolved to.
    pub fn resolved_targets(&self) -> &BTreeMap<ComputationTargetSpecification, UniqueId> {
        &self.resolved_targets
    }

    /// Intersection of every node's invocation window.
    pub fn validity(&self) -> ValidityWindow {
        self.validity
    }

    /// Earliest valid instant; `None` is unbounded.
    pub fn valid_from(&self) -> Option<DateTime<Utc>> {
        self.validity.valid_from
    }

    /// Latest valid instant; `None` is unbounded.
    pub fn valid_to(&self) -> Option<DateTime<Utc>> {
        self.validity.valid_to
    }

    /// Wall time of the compile call that produced this artifact.
    pub fn compile_duration(&self) -> Duration {
        self.compile_duration
    }

    /// Returns true if the graphs may be executed at `instant`.
    pub fn is_valid_for(&self, instant: DateTime<Utc>) -> bool {
        self.validity.contains(instant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ViewCalculationConfiguration;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use view_depgraph::{DependencyNode, MapTargetResolver};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn built(name: &str, windows: &[(Option<DateTime<Utc>>, Option<DateTime<Utc>>)]) -> BuiltConfiguration {
        let mut graph = DependencyGraph::new(name);
        for (i, (from, to)) in windows.iter().enumerate() {
            let target = ComputationTargetSpecification::primitive(UniqueId::of("Curve", i.to_string()));
            graph.add_node(DependencyNode::new(
                format!("Fn{i}"),
                target,
                BTreeSet::new(),
                BTreeSet::new(),
                ValidityWindow::new(*from, *to),
            ));
        }
        BuiltConfiguration {
            configuration: ViewCalculationConfiguration::new(name),
            requirements: BTreeSet::new(),
            graph,
            failures: HashMap::new(),
            requirement_mapping: BTreeMap::new(),
        }
    }

    fn assemble(
        configurations: Vec<BuiltConfiguration>,
        valuation_time: DateTime<Utc>,
    ) -> Result<CompiledViewDefinitionWithGraphs> {
        let targets = MapTargetResolver::new();
        CompiledViewDefinitionWithGraphs::assemble(AssemblyInput {
            view: ViewDefinition::new("v"),
            portfolio: None,
            valuation_time,
            version_correction: VersionCorrection::LATEST,
            function_init_id: 1,
            configurations,
            targets: &targets,
            resolutions: BTreeMap::new(),
        })
    }

    #[test]
    fn test_empty_view_is_unbounded() {
        let compiled = assemble(Vec::new(), t(1)).unwrap();
        assert_eq!(compiled.validity(), ValidityWindow::unbounded());
        assert!(compiled.is_valid_for(t(1)));
        assert!(compiled.dependency_graphs().is_empty());
    }

    #[test]
    fn test_validity_intersects_across_configurations() {
        let compiled = assemble(
            vec![
                built("A", &[(Some(t(2)), None)]),
                built("B", &[(None, Some(t(20))), (Some(t(5)), Some(t(25)))]),
            ],
            t(10),
        )
        .unwrap();
        assert_eq!(compiled.valid_from(), Some(t(5)));
        assert_eq!(compiled.valid_to(), Some(t(20)));
        assert!(!compiled.is_valid_for(t(21)));
        assert_eq!(compiled.computation_targets().len(), 3);
        assert!(compiled.dependency_graph("B").is_some());
    }

    #[test]
    fn test_disjoint_windows_fail() {
        let err = assemble(
            vec![built("A", &[(Some(t(10)), None), (None, Some(t(5)))])],
            t(7),
        )
        .unwrap_err();
        assert!(matches!(err, CompilationError::InvalidValidityWindow { .. }));
    }

    #[test]
    fn test_valuation_time_outside_window_fails() {
        let err = assemble(vec![built("A", &[(Some(t(10)), Some(t(20)))])], t(21)).unwrap_err();
        assert!(matches!(
            err,
            CompilationError::InvalidValidityWindow { valuation_time, .. } if valuation_time == t(21)
        ));
    }

    #[test]
    fn test_compilation_ids_are_distinct() {
        let first = assemble(Vec::new(), t(1)).unwrap();
        let second = assemble(Vec::new(), t(1)).unwrap();
        assert_ne!(first.compilation_id(), second.compilation_id());
        let prefix = |id: &str| id.rsplit_once('-').map(|(p, _)| p.to_string());
        assert_eq!(prefix(first.compilation_id()), prefix(second.compilation_id()));
    }
}
