//! View definitions: what a view asks to have computed.
//!
//! A view names a portfolio, a result model deciding which target types get
//! outputs at all, and one or more calculation configurations. Each
//! configuration lists portfolio requirements keyed by security type,
//! ad hoc requirements on explicit targets, and a rule transform applied to
//! the function set for that configuration only.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use view_core::{ComputationTargetType, UniqueId, ValueProperties, ValueRequirement};
use view_depgraph::SimpleResolutionRuleTransform;

use crate::error::{CompilationError, Result};

/// Pseudo security type for outputs requested on portfolio nodes only.
pub const AGGREGATE_ONLY: &str = "Aggregate only";

/// Whether results are produced for a target type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultOutputMode {
    /// No outputs for this target type.
    None,
    /// Only directly requested outputs.
    #[default]
    TerminalOutputs,
    /// Every output computed on the target type.
    All,
}

impl ResultOutputMode {
    /// Returns false for [`ResultOutputMode::None`].
    #[inline]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ResultOutputMode::None)
    }
}

/// Output mode per target type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultModelDefinition {
    /// Portfolio node (aggregate) targets.
    pub aggregate_position: ResultOutputMode,
    /// Position targets.
    pub position: ResultOutputMode,
    /// Trade targets.
    pub trade: ResultOutputMode,
    /// Security targets.
    pub security: ResultOutputMode,
    /// Primitive targets.
    pub primitive: ResultOutputMode,
}

impl Default for ResultModelDefinition {
    fn default() -> Self {
        Self::uniform(ResultOutputMode::TerminalOutputs)
    }
}

impl ResultModelDefinition {
    /// The same mode for every target type.
    pub fn uniform(mode: ResultOutputMode) -> Self {
        Self {
            aggregate_position: mode,
            position: mode,
            trade: mode,
            security: mode,
            primitive: mode,
        }
    }

    /// Mode applying to `target_type`.
    pub fn output_mode(&self, target_type: ComputationTargetType) -> ResultOutputMode {
        match target_type {
            ComputationTargetType::PortfolioNode => self.aggregate_position,
            ComputationTargetType::Position => self.position,
            ComputationTargetType::Trade => self.trade,
            ComputationTargetType::Security => self.security,
            ComputationTargetType::Primitive => self.primitive,
        }
    }

    /// Returns true if aggregate, position or trade outputs are enabled.
    pub fn portfolio_outputs_enabled(&self) -> bool {
        self.position.is_enabled() || self.aggregate_position.is_enabled() || self.trade.is_enabled()
    }
}

/// An output requested on every matching portfolio target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortfolioRequirement {
    /// Requested value name.
    pub value_name: String,
    /// Constraints on the value.
    #[serde(default)]
    pub constraints: ValueProperties,
}

impl PortfolioRequirement {
    /// Creates a portfolio requirement.
    pub fn new(value_name: impl Into<String>, constraints: ValueProperties) -> Self {
        Self {
            value_name: value_name.into(),
            constraints,
        }
    }
}

/// One named set of requirements compiled into its own graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewCalculationConfiguration {
    /// Configuration name, unique within the view.
    pub name: String,
    /// Portfolio requirements keyed by security type.
    #[serde(default)]
    pub portfolio_requirements_by_security_type: BTreeMap<String, BTreeSet<PortfolioRequirement>>,
    /// Requirements on explicit targets.
    #[serde(default)]
    pub specific_requirements: BTreeSet<ValueRequirement>,
    /// Rule transform for this configuration.
    #[serde(default)]
    pub resolution_rule_transform: SimpleResolutionRuleTransform,
}

impl ViewCalculationConfiguration {
    /// Empty configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Requests `value_name` on every position of `security_type` and the nodes above them.
    pub fn with_portfolio_requirement(
        mut self,
        security_type: impl Into<String>,
        value_name: impl Into<String>,
        constraints: ValueProperties,
    ) -> Self {
        self.portfolio_requirements_by_security_type
            .entry(security_type.into())
            .or_default()
            .insert(PortfolioRequirement::new(value_name, constraints));
        self
    }

    /// Requests `value_name` on portfolio nodes only.
    pub fn with_aggregate_requirement(
        self,
        value_name: impl Into<String>,
        constraints: ValueProperties,
    ) -> Self {
        self.with_portfolio_requirement(AGGREGATE_ONLY, value_name, constraints)
    }

    /// Adds a requirement on an explicit target.
    pub fn with_specific_requirement(mut self, requirement: ValueRequirement) -> Self {
        self.specific_requirements.insert(requirement);
        self
    }

    /// Replaces the rule transform.
    pub fn with_rule_transform(mut self, transform: SimpleResolutionRuleTransform) -> Self {
        self.resolution_rule_transform = transform;
        self
    }

    /// Requirements configured for `security_type`.
    pub fn portfolio_requirements_for(&self, security_type: &str) -> Option<&BTreeSet<PortfolioRequirement>> {
        self.portfolio_requirements_by_security_type.get(security_type)
    }

    /// Every `(security type, requirement)` pair.
    pub fn all_portfolio_requirements(&self) -> Vec<(&str, &PortfolioRequirement)> {
        self.portfolio_requirements_by_security_type
            .iter()
            .flat_map(|(security_type, requirements)| {
                requirements.iter().map(move |r| (security_type.as_str(), r))
            })
            .collect()
    }

    /// Returns true if any portfolio requirement is configured.
    pub fn has_portfolio_requirements(&self) -> bool {
        self.portfolio_requirements_by_security_type
            .values()
            .any(|requirements| !requirements.is_empty())
    }

    /// Returns true if some portfolio requirement lands on a target type that
    /// `result_model` enables.
    ///
    /// [`AGGREGATE_ONLY`] requirements only reach nodes; per-type requirements
    /// reach nodes, positions and trades.
    pub fn has_enabled_portfolio_requirements(&self, result_model: &ResultModelDefinition) -> bool {
        if result_model.aggregate_position.is_enabled() {
            return self.has_portfolio_requirements();
        }
        (result_model.position.is_enabled() || result_model.trade.is_enabled())
            && self
                .portfolio_requirements_by_security_type
                .iter()
                .any(|(security_type, requirements)| {
                    security_type != AGGREGATE_ONLY && !requirements.is_empty()
                })
    }
}

/// A named view over a portfolio.
///
/// ```
/// use view_compiler::definition::{ViewCalculationConfiguration, ViewDefinition};
/// use view_core::{UniqueId, ValueProperties};
///
/// let view = ViewDefinition::new("Swaps")
///     .with_portfolio(UniqueId::of("DbPrt", "1"))
///     .with_calculation_configuration(
///         ViewCalculationConfiguration::new("Default")
///             .with_portfolio_requirement("SWAP", "PresentValue", ValueProperties::new()),
///     );
/// assert!(view.validate().is_ok());
/// assert!(view.calculation_configuration("Default").is_some());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewDefinition {
    /// View name.
    pub name: String,
    /// Portfolio the view is computed over, if any.
    #[serde(default)]
    pub portfolio_id: Option<UniqueId>,
    /// Output modes.
    #[serde(default)]
    pub result_model: ResultModelDefinition,
    /// Calculation configurations, compiled in this order.
    #[serde(default, rename = "calculation_configuration")]
    pub calculation_configurations: Vec<ViewCalculationConfiguration>,
}

impl ViewDefinition {
    /// Empty view.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the portfolio (builder style).
    pub fn with_portfolio(mut self, portfolio_id: UniqueId) -> Self {
        self.portfolio_id = Some(portfolio_id);
        self
    }

    /// Sets the result model (builder style).
    pub fn with_result_model(mut self, result_model: ResultModelDefinition) -> Self {
        self.result_model = result_model;
        self
    }

    /// Appends a configuration (builder style).
    pub fn with_calculation_configuration(mut self, configuration: ViewCalculationConfiguration) -> Self {
        self.calculation_configurations.push(configuration);
        self
    }

    /// Configuration by name.
    pub fn calculation_configuration(&self, name: &str) -> Option<&ViewCalculationConfiguration> {
        self.calculation_configurations.iter().find(|c| c.name == name)
    }

    /// Checks the definition is compilable.
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` for an empty view name, an empty configuration name
    /// or two configurations sharing a name.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| CompilationError::InvalidDefinition {
            view: self.name.clone(),
            message,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("view name is empty".to_string()));
        }
        let mut seen = BTreeSet::new();
        for configuration in &self.calculation_configurations {
            if configuration.name.trim().is_empty() {
                return Err(invalid("calculation configuration name is empty".to_string()));
            }
            if !seen.insert(configuration.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate calculation configuration '{}'",
                    configuration.name
                )));
            }
        }
        Ok(())
    }
}
