//! Function definitions: the producers the graph builder searches over.
//!
//! A function declares which value names it produces on which target type.
//! Given a target it reports its maximal outputs, and given one desired output
//! it reports the inputs it needs. The builder never inspects a function
//! beyond this interface.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use view_core::{
    ComputationTarget, ComputationTargetSpecification, ComputationTargetType, UniqueId,
    ValidityWindow, ValueProperties, ValueRequirement, ValueSpecification,
};

/// A producer of values on one target type.
pub trait FunctionDefinition: Send + Sync + fmt::Debug {
    /// Unique identifier, recorded in the `Function` property of every output.
    fn function_id(&self) -> &str;

    /// Target type this function applies to.
    fn target_type(&self) -> ComputationTargetType;

    /// Value names this function can produce, used to index rules.
    fn output_value_names(&self) -> Vec<String>;

    /// Returns true if the function can run on `target`.
    fn can_apply_to(&self, target: &ComputationTarget) -> bool;

    /// Maximal output specifications on `target`.
    ///
    /// Properties left as "any" are pinned later to what a requirement asks for.
    fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification>;

    /// Inputs needed to produce `desired` on `target`, or `None` if it cannot.
    fn requirements(
        &self,
        target: &ComputationTarget,
        desired: &ValueSpecification,
    ) -> Option<Vec<ValueRequirement>>;

    /// Earliest instant the function may be invoked at; `None` is unbounded.
    fn earliest_invocation(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Latest instant the function may be invoked at; `None` is unbounded.
    fn latest_invocation(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Invocation window as a [`ValidityWindow`].
    fn validity(&self) -> ValidityWindow {
        ValidityWindow::new(self.earliest_invocation(), self.latest_invocation())
    }
}

/// One output of a [`DeclaredFunction`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeclaredOutput {
    /// Produced value name.
    pub value_name: String,
    /// Maximal properties of the output.
    #[serde(default)]
    pub properties: ValueProperties,
}

/// Where a declared input is computed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputTarget {
    /// The function's own target.
    #[default]
    Same,
    /// The security of a position, trade or security target.
    Security,
    /// Every direct child (nodes and positions) of a portfolio node target.
    Children,
    /// A fixed primitive, e.g. a curve or currency id.
    Primitive {
        /// Identifier scheme.
        scheme: String,
        /// Identifier value.
        value: String,
    },
}

/// One input of a [`DeclaredFunction`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeclaredInput {
    /// Required value name.
    pub value_name: String,
    /// Where the input is computed.
    #[serde(default)]
    pub target: InputTarget,
    /// Constraints on the input.
    #[serde(default)]
    pub constraints: ValueProperties,
    /// Properties copied from the desired output onto the input's constraints.
    #[serde(default)]
    pub inherit: Vec<String>,
}

/// Function described entirely by data.
///
/// Used by scenario files and tests in place of real analytics.
///
/// ```
/// use view_depgraph::function::DeclaredFunction;
///
/// let f: DeclaredFunction = toml::from_str(r#"
///     id = "SwapPV"
///     target_type = "POSITION"
///     security_types = ["SWAP"]
///     outputs = [{ value_name = "PresentValue" }]
///     inputs = [{ value_name = "YieldCurve", target = { kind = "primitive", scheme = "CurveName", value = "USD" } }]
/// "#).unwrap();
/// assert_eq!(f.id, "SwapPV");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeclaredFunction {
    /// Function identifier.
    pub id: String,
    /// Target type the function applies to.
    pub target_type: ComputationTargetType,
    /// Security types the function accepts; empty accepts any.
    #[serde(default)]
    pub security_types: BTreeSet<String>,
    /// Produced values.
    pub outputs: Vec<DeclaredOutput>,
    /// Required inputs, identical for every output.
    #[serde(default)]
    pub inputs: Vec<DeclaredInput>,
    /// Default rule priority; lower wins.
    #[serde(default)]
    pub priority: i32,
    /// Earliest valid invocation.
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    /// Latest valid invocation.
    #[serde(default)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl DeclaredFunction {
    /// Function with outputs only.
    pub fn new(
        id: impl Into<String>,
        target_type: ComputationTargetType,
        outputs: impl IntoIterator<Item = DeclaredOutput>,
    ) -> Self {
        Self {
            id: id.into(),
            target_type,
            security_types: BTreeSet::new(),
            outputs: outputs.into_iter().collect(),
            inputs: Vec::new(),
            priority: 0,
            valid_from: None,
            valid_to: None,
        }
    }

    /// Restricts the function to a security type (builder style).
    pub fn for_security_type(mut self, security_type: impl Into<String>) -> Self {
        self.security_types.insert(security_type.into());
        self
    }

    /// Adds an input (builder style).
    pub fn with_input(mut self, input: DeclaredInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Sets the default priority (builder style).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the validity window (builder style).
    pub fn valid_between(
        mut self,
        valid_from: Option<DateTime<Utc>>,
        valid_to: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    fn input_targets(
        &self,
        input: &DeclaredInput,
        target: &ComputationTarget,
    ) -> Option<Vec<ComputationTargetSpecification>> {
        match &input.target {
            InputTarget::Same => Some(vec![target.to_specification()]),
            InputTarget::Security => target
                .security()
                .map(|s| vec![ComputationTargetSpecification::security(s.unique_id.clone())]),
            InputTarget::Children => Some(target.children()),
            InputTarget::Primitive { scheme, value } => {
                Some(vec![ComputationTargetSpecification::primitive(UniqueId::of(
                    scheme.clone(),
                    value.clone(),
                ))])
            }
        }
    }
}

impl DeclaredOutput {
    /// Output without property restrictions.
    pub fn named(value_name: impl Into<String>) -> Self {
        Self {
            value_name: value_name.into(),
            properties: ValueProperties::new(),
        }
    }
}

impl DeclaredInput {
    /// Input on the function's own target.
    pub fn same(value_name: impl Into<String>) -> Self {
        Self::on(value_name, InputTarget::Same)
    }

    /// Input on the given target.
    pub fn on(value_name: impl Into<String>, target: InputTarget) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            constraints: ValueProperties::new(),
            inherit: Vec::new(),
        }
    }

    /// Copies `property` from the desired output (builder style).
    pub fn inheriting(mut self, property: impl Into<String>) -> Self {
        self.inherit.push(property.into());
        self
    }
}

impl FunctionDefinition for DeclaredFunction {
    fn function_id(&self) -> &str {
        &self.id
    }

    fn target_type(&self) -> ComputationTargetType {
        self.target_type
    }

    fn output_value_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.value_name.clone()).collect()
    }

    fn can_apply_to(&self, target: &ComputationTarget) -> bool {
        target.target_type() == self.target_type
            && (self.security_types.is_empty()
                || target
                    .security()
                    .is_some_and(|s| self.security_types.contains(&s.security_type)))
    }

    fn results(&self, target: &ComputationTarget) -> Vec<ValueSpecification> {
        let spec = target.to_specification();
        self.outputs
            .iter()
            .map(|o| {
                ValueSpecification::produced_by(
                    o.value_name.clone(),
                    spec.clone(),
                    &self.id,
                    o.properties.clone(),
                )
            })
            .collect()
    }

    fn requirements(
        &self,
        target: &ComputationTarget,
        desired: &ValueSpecification,
    ) -> Option<Vec<ValueRequirement>> {
        let mut requirements = Vec::new();
        for input in &self.inputs {
            let mut constraints = input.constraints.clone();
            for name in &input.inherit {
                if let Some(values) = desired.properties.values(name) {
                    if !values.is_empty() {
                        constraints = constraints.with(name.clone(), values.iter().cloned());
                    }
                }
            }
            for input_target in self.input_targets(input, target)? {
                requirements.push(ValueRequirement::new(
                    input.value_name.clone(),
                    input_target,
                    constraints.clone(),
                ));
            }
        }
        Some(requirements)
    }

    fn earliest_invocation(&self) -> Option<DateTime<Utc>> {
        self.valid_from
    }

    fn latest_invocation(&self) -> Option<DateTime<Utc>> {
        self.valid_to
    }
}
