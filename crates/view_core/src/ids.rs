//! Identifier types for portfolio, position and security entities.
//!
//! Unique identifiers carry an optional version so that the same object can be
//! referenced at different points in its history. Object identifiers drop the
//! version, and external identifiers (tickers, ISINs, ...) are grouped into
//! bundles which identify a single security.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Versioned identifier of a stored object.
///
/// # Examples
///
/// ```
/// use view_core::ids::UniqueId;
///
/// let id = UniqueId::of("DbPos", "1001");
/// assert_eq!(id.to_string(), "DbPos~1001");
///
/// let versioned = UniqueId::versioned("DbPos", "1001", "3");
/// assert_eq!(versioned.to_string(), "DbPos~1001~3");
/// assert_eq!(versioned.object_id(), id.object_id());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    scheme: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

impl UniqueId {
    /// Creates an unversioned unique id.
    #[inline]
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
            version: None,
        }
    }

    /// Creates a versioned unique id.
    #[inline]
    pub fn versioned(
        scheme: impl Into<String>,
        value: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
            version: Some(version.into()),
        }
    }

    /// Returns the scheme.
    #[inline]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the value within the scheme.
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the version, if any.
    #[inline]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns the object id, dropping the version.
    pub fn object_id(&self) -> ObjectId {
        ObjectId::of(self.scheme.clone(), self.value.clone())
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}~{}~{}", self.scheme, self.value, version),
            None => write!(f, "{}~{}", self.scheme, self.value),
        }
    }
}

/// Version-independent identifier of a stored object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    scheme: String,
    value: String,
}

impl ObjectId {
    /// Creates a new object id.
    #[inline]
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }

    /// Returns the scheme.
    #[inline]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the value within the scheme.
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the latest unique id of this object.
    pub fn at_latest_version(&self) -> UniqueId {
        UniqueId::of(self.scheme.clone(), self.value.clone())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.scheme, self.value)
    }
}

/// An identifier issued by an external scheme, e.g. a ticker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId {
    scheme: String,
    value: String,
}

impl ExternalId {
    /// Creates a new external id.
    #[inline]
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }

    /// Returns the scheme.
    #[inline]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns the value within the scheme.
    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.scheme, self.value)
    }
}

/// A set of external ids that all refer to the same object.
///
/// Ordered so that two bundles holding the same ids compare and hash equal
/// regardless of construction order.
///
/// ```
/// use view_core::ids::{ExternalId, ExternalIdBundle};
///
/// let a = ExternalIdBundle::of([ExternalId::of("TICKER", "AAPL"), ExternalId::of("ISIN", "US0378331005")]);
/// let b = ExternalIdBundle::of([ExternalId::of("ISIN", "US0378331005"), ExternalId::of("TICKER", "AAPL")]);
/// assert_eq!(a, b);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalIdBundle(BTreeSet<ExternalId>);

impl ExternalIdBundle {
    /// Creates a bundle from the given ids.
    pub fn of(ids: impl IntoIterator<Item = ExternalId>) -> Self {
        Self(ids.into_iter().collect())
    }

    /// Creates an empty bundle.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns true if the bundle holds no ids.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of ids in the bundle.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the ids in order.
    pub fn iter(&self) -> impl Iterator<Item = &ExternalId> {
        self.0.iter()
    }

    /// Returns true if any id is shared with `other`.
    pub fn contains_any(&self, other: &ExternalIdBundle) -> bool {
        other.0.iter().any(|id| self.0.contains(id))
    }

    /// Returns the value for the given scheme, if present.
    pub fn value_of(&self, scheme: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|id| id.scheme() == scheme)
            .map(ExternalId::value)
    }
}

impl fmt::Display for ExternalIdBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "]")
    }
}

impl FromIterator<ExternalId> for ExternalIdBundle {
    fn from_iter<T: IntoIterator<Item = ExternalId>>(iter: T) -> Self {
        Self::of(iter)
    }
}

/// Version/correction instants used to query versioned sources.
///
/// `None` in either position means "latest".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionCorrection {
    /// Instant at which the version is taken.
    pub version_as_of: Option<DateTime<Utc>>,
    /// Instant at which corrections are taken.
    pub corrected_to: Option<DateTime<Utc>>,
}

impl VersionCorrection {
    /// Latest version, latest correction.
    pub const LATEST: VersionCorrection = VersionCorrection {
        version_as_of: None,
        corrected_to: None,
    };

    /// Version and correction fixed at the given instants.
    pub fn of(version_as_of: DateTime<Utc>, corrected_to: DateTime<Utc>) -> Self {
        Self {
            version_as_of: Some(version_as_of),
            corrected_to: Some(corrected_to),
        }
    }

    /// Returns true if both instants are "latest".
    pub fn is_latest(&self) -> bool {
        self.version_as_of.is_none() && self.corrected_to.is_none()
    }

    /// Replaces any "latest" component with `now`.
    pub fn with_latest_fixed(&self, now: DateTime<Utc>) -> Self {
        Self {
            version_as_of: Some(self.version_as_of.unwrap_or(now)),
            corrected_to: Some(self.corrected_to.unwrap_or(now)),
        }
    }
}

impl fmt::Display for VersionCorrection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self
            .version_as_of
            .map_or_else(|| "LATEST".to_string(), |t| t.to_rfc3339());
        let c = self
            .corrected_to
            .map_or_else(|| "LATEST".to_string(), |t| t.to_rfc3339());
        write!(f, "V{}.C{}", v, c)
    }
}
