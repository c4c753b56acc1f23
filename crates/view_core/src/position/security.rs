use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::{ExternalIdBundle, ObjectId, UniqueId};

/// A tradable security as returned by a [`SecuritySource`](super::SecuritySource).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    /// Identifier of the stored security.
    pub unique_id: UniqueId,
    /// External identifiers (tickers, ISINs) of the security.
    pub external_ids: ExternalIdBundle,
    /// Security type, e.g. `SWAP` or `EQUITY`. Drives per-type output selection.
    pub security_type: String,
    /// Display name.
    pub name: String,
    /// Free-form attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Security {
    /// Creates a security with no attributes.
    pub fn new(
        unique_id: UniqueId,
        external_ids: ExternalIdBundle,
        security_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            unique_id,
            external_ids,
            security_type: security_type.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Reference from a position or trade to its security.
///
/// A link names the security by object id, by external id bundle, or both, and
/// may carry the resolved security. Equality and hashing consider only the
/// identifying parts, so a link compares equal to its resolved form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecurityLink {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    object_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "ExternalIdBundle::is_empty")]
    external_id: ExternalIdBundle,
    #[serde(skip)]
    target: Option<Arc<Security>>,
}

impl SecurityLink {
    /// Link by object id.
    pub fn from_object_id(object_id: ObjectId) -> Self {
        Self {
            object_id: Some(object_id),
            ..Self::default()
        }
    }

    /// Link by external id bundle.
    pub fn from_bundle(external_id: ExternalIdBundle) -> Self {
        Self {
            external_id,
            ..Self::default()
        }
    }

    /// Link that is already resolved to `security`.
    pub fn resolved_to(security: Arc<Security>) -> Self {
        Self {
            object_id: Some(security.unique_id.object_id()),
            external_id: security.external_ids.clone(),
            target: Some(security),
        }
    }

    /// Object id the link refers to, if any.
    pub fn object_id(&self) -> Option<&ObjectId> {
        self.object_id.as_ref()
    }

    /// External ids the link refers to.
    pub fn external_id(&self) -> &ExternalIdBundle {
        &self.external_id
    }

    /// Resolved security, if present.
    pub fn target(&self) -> Option<&Arc<Security>> {
        self.target.as_ref()
    }

    /// Returns true if the link carries its security.
    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }

    /// Returns true if the link identifies nothing at all.
    pub fn is_empty(&self) -> bool {
        self.object_id.is_none() && self.external_id.is_empty() && self.target.is_none()
    }

    /// Copy of this link carrying `security`.
    pub fn resolved(&self, security: Arc<Security>) -> Self {
        Self {
            object_id: self.object_id.clone(),
            external_id: self.external_id.clone(),
            target: Some(security),
        }
    }
}

impl PartialEq for SecurityLink {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id && self.external_id == other.external_id
    }
}

impl Eq for SecurityLink {}

impl Hash for SecurityLink {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_id.hash(state);
        self.external_id.hash(state);
    }
}

impl fmt::Display for SecurityLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.object_id, self.external_id.is_empty()) {
            (Some(oid), true) => write!(f, "{}", oid),
            (Some(oid), false) => write!(f, "{} {}", oid, self.external_id),
            (None, _) => write!(f, "{}", self.external_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ExternalId;
    use std::collections::HashSet;

    fn swap() -> Arc<Security> {
        Arc::new(Security::new(
            UniqueId::of("DbSec", "1"),
            ExternalIdBundle::of([ExternalId::of("TICKER", "SWAP1")]),
            "SWAP",
            "5Y USD swap",
        ))
    }

    #[test]
    fn test_link_identity_ignores_target() {
        let link = SecurityLink::from_bundle(ExternalIdBundle::of([ExternalId::of("TICKER", "SWAP1")]));
        let resolved = link.resolved(swap());
        assert!(!link.is_resolved());
        assert!(resolved.is_resolved());
        assert_eq!(link, resolved);

        let mut set = HashSet::new();
        set.insert(link);
        set.insert(resolved);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_resolved_to_carries_ids() {
        let link = SecurityLink::resolved_to(swap());
        assert_eq!(link.object_id(), Some(&ObjectId::of("DbSec", "1")));
        assert_eq!(link.external_id().value_of("TICKER"), Some("SWAP1"));
        assert_eq!(link.to_string(), "DbSec~1 [TICKER~SWAP1]");
    }

    #[test]
    fn test_empty_link() {
        assert!(SecurityLink::default().is_empty());
        assert!(!SecurityLink::from_object_id(ObjectId::of("DbSec", "1")).is_empty());
    }
}
