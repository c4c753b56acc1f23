//! Value requirements and value specifications.
//!
//! A [`ValueRequirement`] asks for a named value on a target under some
//! constraints. A [`ValueSpecification`] names a value a function invocation
//! actually produces; one specification can satisfy many requirements.

mod names;
mod properties;

pub use names::{ValuePropertyNames, ValueRequirementNames};
pub use properties::{PropertyConstraint, ValueProperties};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::target::ComputationTargetSpecification;

/// A request for a named value on a target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueRequirement {
    /// Name of the requested value.
    pub value_name: String,
    /// Target the value is computed on.
    pub target: ComputationTargetSpecification,
    /// Constraints on the producing function's output.
    #[serde(default)]
    pub constraints: ValueProperties,
}

impl ValueRequirement {
    /// Creates a requirement.
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTargetSpecification,
        constraints: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            constraints,
        }
    }

    /// Creates a requirement without constraints.
    pub fn unconstrained(value_name: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        Self::new(value_name, target, ValueProperties::new())
    }
}

impl fmt::Display for ValueRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.value_name, self.target)?;
        if !self.constraints.is_empty() {
            write!(f, " {}", self.constraints)?;
        }
        Ok(())
    }
}

/// A value a function invocation produces.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueSpecification {
    /// Name of the produced value.
    pub value_name: String,
    /// Target the value is computed on.
    pub target: ComputationTargetSpecification,
    /// Resolved properties, including [`ValuePropertyNames::FUNCTION`].
    pub properties: ValueProperties,
}

impl ValueSpecification {
    /// Creates a specification.
    pub fn new(
        value_name: impl Into<String>,
        target: ComputationTargetSpecification,
        properties: ValueProperties,
    ) -> Self {
        Self {
            value_name: value_name.into(),
            target,
            properties,
        }
    }

    /// Creates a specification tagged with its producing function.
    pub fn produced_by(
        value_name: impl Into<String>,
        target: ComputationTargetSpecification,
        function_id: &str,
        properties: ValueProperties,
    ) -> Self {
        Self::new(
            value_name,
            target,
            properties
                .without(ValuePropertyNames::FUNCTION)
                .with(ValuePropertyNames::FUNCTION, [function_id]),
        )
    }

    /// Identifier of the producing function, if recorded.
    pub fn function_id(&self) -> Option<&str> {
        self.properties.value_of(ValuePropertyNames::FUNCTION)
    }

    /// Returns true if this specification meets `requirement`.
    pub fn satisfies(&self, requirement: &ValueRequirement) -> bool {
        self.value_name == requirement.value_name
            && self.target == requirement.target
            && requirement.constraints.is_satisfied_by(&self.properties)
    }
}

impl fmt::Display for ValueSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {} {}", self.value_name, self.target, self.properties)
    }
}
