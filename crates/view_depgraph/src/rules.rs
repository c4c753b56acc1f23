//! Resolution rules and the per-configuration compiled resolver.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use view_core::ComputationTargetType;

use crate::function::FunctionDefinition;
use crate::repository::FunctionRepository;

/// A candidate producer with its priority. Lower priority values win.
#[derive(Clone, Debug)]
pub struct ResolutionRule {
    /// The producing function.
    pub function: Arc<dyn FunctionDefinition>,
    /// Priority; lower wins.
    pub priority: i32,
}

impl ResolutionRule {
    /// Identifier of the rule's function.
    pub fn function_id(&self) -> &str {
        self.function.function_id()
    }
}

/// Filters or reprioritises the global rule set for one configuration.
pub trait ResolutionRuleTransform: Send + Sync + fmt::Debug {
    /// Returns the transformed rules. Order of the input must be preserved
    /// for rules that are kept.
    fn transform(&self, rules: Vec<ResolutionRule>) -> Vec<ResolutionRule>;
}

/// Action applied to every rule for one function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RuleTransformAction {
    /// Remove the function's rules.
    DontUse,
    /// Replace the rule priority.
    Adjust {
        /// New priority.
        priority: i32,
    },
}

/// Per-function actions keyed by function id. Functions without an entry pass through.
///
/// ```
/// use view_depgraph::rules::{RuleTransformAction, SimpleResolutionRuleTransform};
///
/// let transform = SimpleResolutionRuleTransform::new()
///     .dont_use("LegacyPV")
///     .adjust("FastPV", -10);
/// assert_eq!(transform.action("LegacyPV"), Some(&RuleTransformAction::DontUse));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimpleResolutionRuleTransform {
    actions: BTreeMap<String, RuleTransformAction>,
}

impl SimpleResolutionRuleTransform {
    /// Transform with no actions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every rule of `function_id` (builder style).
    pub fn dont_use(mut self, function_id: impl Into<String>) -> Self {
        self.actions
            .insert(function_id.into(), RuleTransformAction::DontUse);
        self
    }

    /// Overrides the priority of `function_id` (builder style).
    pub fn adjust(mut self, function_id: impl Into<String>, priority: i32) -> Self {
        self.actions
            .insert(function_id.into(), RuleTransformAction::Adjust { priority });
        self
    }

    /// Action registered for `function_id`.
    pub fn action(&self, function_id: &str) -> Option<&RuleTransformAction> {
        self.actions.get(function_id)
    }

    /// Returns true if no action is registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl ResolutionRuleTransform for SimpleResolutionRuleTransform {
    fn transform(&self, rules: Vec<ResolutionRule>) -> Vec<ResolutionRule> {
        rules
            .into_iter()
            .filter_map(|rule| match self.actions.get(rule.function_id()) {
                None => Some(rule),
                Some(RuleTransformAction::DontUse) => None,
                Some(RuleTransformAction::Adjust { priority }) => Some(ResolutionRule {
                    priority: *priority,
                    ..rule
                }),
            })
            .collect()
    }
}

/// Rules indexed by `(value name, target type)`, each list ordered by
/// priority and then registration order.
///
/// A resolver compiled for a valuation time only holds functions whose
/// invocation window contains that instant.
#[derive(Debug)]
pub struct CompiledFunctionResolver {
    index: HashMap<(String, ComputationTargetType), Vec<ResolutionRule>>,
    function_init_id: u64,
    rule_count: usize,
    valuation_time: Option<DateTime<Utc>>,
}

impl CompiledFunctionResolver {
    /// Builds the index for one configuration, ignoring function validity.
    pub fn new(repository: &FunctionRepository, transform: &dyn ResolutionRuleTransform) -> Self {
        Self::compile(repository, transform, None)
    }

    /// Builds the index for one configuration, keeping only functions that
    /// may be invoked at `valuation_time`.
    pub fn at_valuation_time(
        repository: &FunctionRepository,
        transform: &dyn ResolutionRuleTransform,
        valuation_time: DateTime<Utc>,
    ) -> Self {
        Self::compile(repository, transform, Some(valuation_time))
    }

    fn compile(
        repository: &FunctionRepository,
        transform: &dyn ResolutionRuleTransform,
        valuation_time: Option<DateTime<Utc>>,
    ) -> Self {
        let rules: Vec<ResolutionRule> = repository
            .functions()
            .iter()
            .filter(|f| valuation_time.map_or(true, |t| f.definition.validity().contains(t)))
            .map(|f| ResolutionRule {
                function: f.definition.clone(),
                priority: f.priority,
            })
            .collect();
        let expired = repository.functions().len() - rules.len();
        let mut rules = transform.transform(rules);
        // stable: equal priorities keep registration order
        rules.sort_by_key(|r| r.priority);

        let rule_count = rules.len();
        let mut index: HashMap<(String, ComputationTargetType), Vec<ResolutionRule>> =
            HashMap::new();
        for rule in rules {
            let target_type = rule.function.target_type();
            for value_name in rule.function.output_value_names() {
                index
                    .entry((value_name, target_type))
                    .or_default()
                    .push(rule.clone());
            }
        }
        tracing::debug!(
            rules = rule_count,
            expired,
            keys = index.len(),
            function_init_id = repository.function_init_id(),
            "Compiled function resolver"
        );
        Self {
            index,
            function_init_id: repository.function_init_id(),
            rule_count,
            valuation_time,
        }
    }

    /// Candidate rules for a value name on a target type, best first.
    pub fn candidates(&self, value_name: &str, target_type: ComputationTargetType) -> &[ResolutionRule] {
        self.index
            .get(&(value_name.to_string(), target_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Function set this resolver was compiled from.
    pub fn function_init_id(&self) -> u64 {
        self.function_init_id
    }

    /// Number of rules kept after transformation.
    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    /// Instant the rules were filtered for, if any.
    pub fn valuation_time(&self) -> Option<DateTime<Utc>> {
        self.valuation_time
    }
}
