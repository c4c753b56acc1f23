//! Market data availability: which requirements are graph leaves.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use view_core::{ComputationTargetSpecification, ValueProperties, ValueRequirement, ValueSpecification};

/// Function id recorded on every market data leaf node.
pub const MARKET_DATA_SOURCING_FUNCTION: &str = "MarketDataSourcingFunction";

/// Answers whether a requirement is sourced externally instead of computed.
pub trait MarketDataAvailabilityProvider: Send + Sync + fmt::Debug {
    /// Specification of the external value satisfying `requirement`, if any.
    fn get_availability(&self, requirement: &ValueRequirement) -> Option<ValueSpecification>;
}

fn sourced(requirement: &ValueRequirement, properties: &ValueProperties) -> Option<ValueSpecification> {
    let maximal = ValueSpecification::produced_by(
        requirement.value_name.clone(),
        requirement.target.clone(),
        MARKET_DATA_SOURCING_FUNCTION,
        properties.clone(),
    );
    if !maximal.satisfies(requirement) {
        return None;
    }
    Some(ValueSpecification {
        properties: maximal.properties.compose(&requirement.constraints),
        ..maximal
    })
}

/// Availability from an explicit list of `(value name, target)` entries.
#[derive(Debug, Default)]
pub struct FixedMarketDataAvailabilityProvider {
    available: HashMap<(String, ComputationTargetSpecification), ValueProperties>,
}

impl FixedMarketDataAvailabilityProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a value available with no properties (builder style).
    pub fn with(self, value_name: impl Into<String>, target: ComputationTargetSpecification) -> Self {
        self.with_properties(value_name, target, ValueProperties::new())
    }

    /// Declares a value available with the given properties (builder style).
    pub fn with_properties(
        mut self,
        value_name: impl Into<String>,
        target: ComputationTargetSpecification,
        properties: ValueProperties,
    ) -> Self {
        self.available.insert((value_name.into(), target), properties);
        self
    }

    /// Number of declared entries.
    pub fn len(&self) -> usize {
        self.available.len()
    }

    /// Returns true if nothing is available.
    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }
}

impl MarketDataAvailabilityProvider for FixedMarketDataAvailabilityProvider {
    fn get_availability(&self, requirement: &ValueRequirement) -> Option<ValueSpecification> {
        let key = (requirement.value_name.clone(), requirement.target.clone());
        self.available
            .get(&key)
            .and_then(|properties| sourced(requirement, properties))
    }
}

/// Every requirement for one of the listed value names is available, on any target.
#[derive(Debug, Default)]
pub struct ValueNameMarketDataAvailabilityProvider {
    value_names: BTreeSet<String>,
}

impl ValueNameMarketDataAvailabilityProvider {
    /// Provider for the given value names.
    pub fn new(value_names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            value_names: value_names.into_iter().map(Into::into).collect(),
        }
    }
}

impl MarketDataAvailabilityProvider for ValueNameMarketDataAvailabilityProvider {
    fn get_availability(&self, requirement: &ValueRequirement) -> Option<ValueSpecification> {
        if !self.value_names.contains(&requirement.value_name) {
            return None;
        }
        let mut properties = ValueProperties::new();
        for name in requirement.constraints.property_names() {
            properties = properties.with_any(name);
        }
        sourced(requirement, &properties)
    }
}

/// First answer among several providers, in order.
#[derive(Debug, Default)]
pub struct UnionMarketDataAvailabilityProvider {
    providers: Vec<Arc<dyn MarketDataAvailabilityProvider>>,
}

impl UnionMarketDataAvailabilityProvider {
    /// Union of `providers`, consulted in order.
    pub fn new(providers: Vec<Arc<dyn MarketDataAvailabilityProvider>>) -> Self {
        Self { providers }
    }
}

impl MarketDataAvailabilityProvider for UnionMarketDataAvailabilityProvider {
    fn get_availability(&self, requirement: &ValueRequirement) -> Option<ValueSpecification> {
        self.providers
            .iter()
            .find_map(|p| p.get_availability(requirement))
    }
}
