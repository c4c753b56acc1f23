//! Property bags attached to requirements and specifications.
//!
//! A [`ValueProperties`] maps a property name to a [`PropertyConstraint`]. On a
//! requirement the constraint restricts what is acceptable; on a specification
//! it describes what a function produces. An empty value set means "any value".

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Allowed values of one property.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyConstraint {
    /// Allowed values; empty means any.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub values: BTreeSet<String>,
    /// Whether a producer may omit the property entirely.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl PropertyConstraint {
    /// Constraint accepting any value.
    pub fn any() -> Self {
        Self::default()
    }

    /// Returns true when no specific values are required.
    #[inline]
    pub fn is_any(&self) -> bool {
        self.values.is_empty()
    }

    fn accepts(&self, produced: &PropertyConstraint) -> bool {
        self.is_any() || produced.is_any() || !self.values.is_disjoint(&produced.values)
    }
}

/// Property name to constraint map.
///
/// ```
/// use view_core::value::ValueProperties;
///
/// let wanted = ValueProperties::new().with("Currency", ["USD"]).with_any("Curve");
/// let produced = ValueProperties::new().with("Currency", ["USD", "EUR"]).with("Curve", ["FUNDING"]);
/// assert!(wanted.is_satisfied_by(&produced));
///
/// let spec = produced.compose(&wanted);
/// assert_eq!(spec.value_of("Currency"), Some("USD"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueProperties(BTreeMap<String, PropertyConstraint>);

impl ValueProperties {
    /// Empty property set: no constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property restricted to `values`.
    pub fn with<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.0.entry(name.into()).or_default();
        entry.values.extend(values.into_iter().map(Into::into));
        self
    }

    /// Adds a property accepting any value.
    pub fn with_any(mut self, name: impl Into<String>) -> Self {
        self.0.entry(name.into()).or_default().values.clear();
        self
    }

    /// Marks a property as optional, adding it as "any" if absent.
    pub fn with_optional(mut self, name: impl Into<String>) -> Self {
        self.0.entry(name.into()).or_default().optional = true;
        self
    }

    /// Removes a property.
    pub fn without(mut self, name: &str) -> Self {
        self.0.remove(name);
        self
    }

    /// Returns true when no property is defined.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Property names in order.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Constraint for `name`, if defined.
    pub fn get(&self, name: &str) -> Option<&PropertyConstraint> {
        self.0.get(name)
    }

    /// Allowed values of `name`; empty for "any", `None` when undefined.
    pub fn values(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.0.get(name).map(|c| &c.values)
    }

    /// First value of `name` if it is restricted to specific values.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.values(name)
            .and_then(|values| values.iter().next())
            .map(String::as_str)
    }

    /// Returns true if `name` is defined and optional.
    pub fn is_optional(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|c| c.optional)
    }

    /// Returns true when `produced` meets every constraint in `self`.
    ///
    /// A property missing from `produced` is acceptable only if optional here.
    /// Otherwise the value sets must overlap, with "any" on either side
    /// matching everything.
    pub fn is_satisfied_by(&self, produced: &ValueProperties) -> bool {
        self.0.iter().all(|(name, constraint)| match produced.0.get(name) {
            Some(p) => constraint.accepts(p),
            None => constraint.optional,
        })
    }

    /// Narrows a producer's maximal properties to what `requirement` asks for.
    ///
    /// "Any" properties are pinned to the smallest requested value and explicit
    /// value sets are intersected with the request. Properties the requirement
    /// does not mention are left as produced. The result is only meaningful
    /// when `requirement.is_satisfied_by(self)`.
    pub fn compose(&self, requirement: &ValueProperties) -> ValueProperties {
        let composed = self
            .0
            .iter()
            .map(|(name, produced)| {
                let narrowed = match requirement.0.get(name) {
                    Some(wanted) if !wanted.is_any() => {
                        let values: BTreeSet<String> = if produced.is_any() {
                            wanted.values.iter().take(1).cloned().collect()
                        } else {
                            produced
                                .values
                                .intersection(&wanted.values)
                                .cloned()
                                .collect()
                        };
                        PropertyConstraint {
                            values,
                            optional: false,
                        }
                    }
                    _ => PropertyConstraint {
                        values: produced.values.clone(),
                        optional: false,
                    },
                };
                (name.clone(), narrowed)
            })
            .collect();
        ValueProperties(composed)
    }
}

impl fmt::Display for ValueProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, constraint)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}=", name)?;
            if constraint.is_any() {
                write!(f, "*")?;
            } else {
                let values: Vec<&str> = constraint.values.iter().map(String::as_str).collect();
                write!(f, "[{}]", values.join(","))?;
            }
            if constraint.optional {
                write!(f, "?")?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_constraints_satisfied_by_anything() {
        let produced = ValueProperties::new().with("Currency", ["USD"]);
        assert!(ValueProperties::new().is_satisfied_by(&produced));
        assert!(ValueProperties::new().is_satisfied_by(&ValueProperties::new()));
    }

    #[test]
    fn test_missing_property() {
        let required = ValueProperties::new().with("Curve", ["FUNDING"]);
        assert!(!required.is_satisfied_by(&ValueProperties::new()));

        let optional = ValueProperties::new().with("Curve", ["FUNDING"]).with_optional("Curve");
        assert!(optional.is_optional("Curve"));
        assert!(optional.is_satisfied_by(&ValueProperties::new()));
    }

    #[test]
    fn test_disjoint_values_not_satisfied() {
        let required = ValueProperties::new().with("Currency", ["USD"]);
        let produced = ValueProperties::new().with("Currency", ["EUR", "GBP"]);
        assert!(!required.is_satisfied_by(&produced));
    }

    #[test]
    fn test_wildcards_match() {
        let required = ValueProperties::new().with_any("Curve");
        let produced = ValueProperties::new().with("Curve", ["FORWARD"]);
        assert!(required.is_satisfied_by(&produced));

        let required = ValueProperties::new().with("Curve", ["FORWARD"]);
        let produced = ValueProperties::new().with_any("Curve");
        assert!(required.is_satisfied_by(&produced));
    }

    #[test]
    fn test_compose_pins_wildcard() {
        let maximal = ValueProperties::new()
            .with_any("Curve")
            .with("Currency", ["USD", "EUR"])
            .with("Function", ["PV"]);
        let wanted = ValueProperties::new()
            .with("Curve", ["OIS", "FUNDING"])
            .with("Currency", ["EUR"]);
        let composed = maximal.compose(&wanted);
        assert_eq!(composed.value_of("Curve"), Some("FUNDING"));
        assert_eq!(composed.values("Currency").unwrap().len(), 1);
        assert_eq!(composed.value_of("Currency"), Some("EUR"));
        assert_eq!(composed.value_of("Function"), Some("PV"));
        assert!(wanted.is_satisfied_by(&composed));
    }

    #[test]
    fn test_display() {
        let props = ValueProperties::new()
            .with("Currency", ["USD"])
            .with_any("Curve")
            .with_optional("Curve");
        assert_eq!(props.to_string(), "{Currency=[USD],Curve=*?}");
    }

    #[test]
    fn test_toml_form() {
        let props: ValueProperties = toml::from_str(
            r#"
            Currency = { values = ["USD"] }
            Curve = { optional = true }
            "#,
        )
        .unwrap();
        assert_eq!(props.value_of("Currency"), Some("USD"));
        assert!(props.is_optional("Curve"));
    }

    fn arb_properties() -> impl Strategy<Value = ValueProperties> {
        proptest::collection::btree_map(
            prop::sample::select(vec!["A", "B", "C"]),
            (proptest::collection::btree_set(prop::sample::select(vec!["x", "y", "z"]), 0..3), any::<bool>()),
            0..3,
        )
        .prop_map(|m| {
            ValueProperties(
                m.into_iter()
                    .map(|(k, (values, optional))| {
                        (
                            k.to_string(),
                            PropertyConstraint {
                                values: values.into_iter().map(str::to_string).collect(),
                                optional,
                            },
                        )
                    })
                    .collect(),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_composed_properties_still_satisfy(wanted in arb_properties(), produced in arb_properties()) {
            prop_assume!(wanted.is_satisfied_by(&produced));
            let composed = produced.compose(&wanted);
            prop_assert!(wanted.is_satisfied_by(&composed));
        }
    }
}
