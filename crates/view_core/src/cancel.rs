//! Cooperative cancellation shared between a caller and its background work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancel flag. Clones observe the same flag.
///
/// ```
/// use view_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker = token.clone();
/// assert!(!worker.is_cancelled());
/// token.cancel();
/// assert!(worker.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called on any clone.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Token that is cancelled when either this token or `parent` is.
    pub fn child_of(parent: &CancellationToken) -> LinkedCancellation {
        LinkedCancellation {
            parent: parent.clone(),
            own: CancellationToken::new(),
        }
    }
}

/// A local cancel flag chained to a parent token.
#[derive(Clone, Debug)]
pub struct LinkedCancellation {
    parent: CancellationToken,
    own: CancellationToken,
}

impl LinkedCancellation {
    /// Cancels the local flag only; the parent is untouched.
    pub fn cancel(&self) {
        self.own.cancel();
    }

    /// Returns true if the local flag or the parent is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.own.is_cancelled() || self.parent.is_cancelled()
    }

    /// Returns true if the parent was cancelled.
    pub fn parent_cancelled(&self) -> bool {
        self.parent.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linked_cancellation() {
        let parent = CancellationToken::new();
        let child = CancellationToken::child_of(&parent);
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!child.parent_cancelled());

        let other = CancellationToken::child_of(&parent);
        parent.cancel();
        assert!(other.is_cancelled());
        assert!(other.parent_cancelled());
    }
}
