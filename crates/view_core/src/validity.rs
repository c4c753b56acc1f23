//! Validity windows of functions and compiled graphs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed instant range `[valid_from, valid_to]`; `None` means unbounded on that side.
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use view_core::validity::ValidityWindow;
///
/// let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
/// let w = ValidityWindow::unbounded()
///     .intersect(&ValidityWindow::new(Some(t0), None))
///     .intersect(&ValidityWindow::new(None, Some(t1)));
/// assert_eq!(w, ValidityWindow::new(Some(t0), Some(t1)));
/// assert!(w.contains(t0));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityWindow {
    /// Earliest valid instant.
    pub valid_from: Option<DateTime<Utc>>,
    /// Latest valid instant.
    pub valid_to: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    /// Creates a window.
    pub fn new(valid_from: Option<DateTime<Utc>>, valid_to: Option<DateTime<Utc>>) -> Self {
        Self {
            valid_from,
            valid_to,
        }
    }

    /// Window with no bounds.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Intersection: the later start and the earlier end.
    pub fn intersect(&self, other: &ValidityWindow) -> ValidityWindow {
        let valid_from = match (self.valid_from, other.valid_from) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let valid_to = match (self.valid_to, other.valid_to) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        ValidityWindow {
            valid_from,
            valid_to,
        }
    }

    /// Returns true if the window admits no instant.
    pub fn is_empty(&self) -> bool {
        matches!((self.valid_from, self.valid_to), (Some(from), Some(to)) if from > to)
    }

    /// Returns true if `instant` lies within the window, bounds included.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.valid_from.map_or(true, |from| from <= instant)
            && self.valid_to.map_or(true, |to| instant <= to)
    }
}

impl fmt::Display for ValidityWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self
            .valid_from
            .map_or_else(|| "-inf".to_string(), |t| t.to_rfc3339());
        let to = self
            .valid_to
            .map_or_else(|| "+inf".to_string(), |t| t.to_rfc3339());
        write!(f, "[{}, {}]", from, to)
    }
}
