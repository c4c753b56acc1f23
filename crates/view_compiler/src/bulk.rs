//! All-or-nothing fan-out over the shared pool.
//!
//! [`bulk_resolve`] submits one task per item, drains results in completion
//! order and fails the whole batch on the first error. Tasks that have not
//! started when the batch fails see the batch flag and skip their work;
//! running tasks are left to finish and their results are discarded.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use rayon::ThreadPool;
use tracing::{debug, trace};
use view_core::CancellationToken;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Why a bulk operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkError<E> {
    /// The task for item `index` failed.
    Failed {
        /// Position of the failing item in the submitted batch.
        index: usize,
        /// The task's error.
        error: E,
    },
    /// The task for item `index` panicked.
    Panicked {
        /// Position of the failing item in the submitted batch.
        index: usize,
        /// Panic message.
        message: String,
    },
    /// The caller's token was cancelled before the batch completed.
    Interrupted,
}

enum Outcome<T, E> {
    Done(Result<T, E>),
    Panicked(String),
    Skipped,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `task` once per item on `executor`.
///
/// Returns the results in item order once every task has succeeded. The
/// first failure, panic or cancellation of `cancel` ends the call; results of
/// tasks that already succeeded are dropped.
///
/// Must not be called from a thread of `executor` itself: the caller blocks
/// while draining.
///
/// # Examples
///
/// ```
/// use view_compiler::bulk::{bulk_resolve, BulkError};
/// use view_core::CancellationToken;
///
/// let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
/// let token = CancellationToken::new();
///
/// let squares = bulk_resolve(&pool, vec![1, 2, 3], &token, |x: i32| Ok::<_, String>(x * x));
/// assert_eq!(squares, Ok(vec![1, 4, 9]));
///
/// let failed = bulk_resolve(&pool, vec![1, 2, 3], &token, |x: i32| {
///     if x == 2 { Err("boom".to_string()) } else { Ok(x) }
/// });
/// assert_eq!(failed, Err(BulkError::Failed { index: 1, error: "boom".to_string() }));
/// ```
pub fn bulk_resolve<I, T, E, F>(
    executor: &ThreadPool,
    items: Vec<I>,
    cancel: &CancellationToken,
    task: F,
) -> Result<Vec<T>, BulkError<E>>
where
    I: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Result<T, E> + Send + Sync + 'static,
{
    let total = items.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    if cancel.is_cancelled() {
        return Err(BulkError::Interrupted);
    }

    let task = Arc::new(task);
    let batch = CancellationToken::child_of(cancel);
    let (sender, receiver) = mpsc::channel();
    for (index, item) in items.into_iter().enumerate() {
        let task = Arc::clone(&task);
        let batch = batch.clone();
        let sender = sender.clone();
        executor.spawn(move || {
            let outcome = if batch.is_cancelled() {
                Outcome::Skipped
            } else {
                match catch_unwind(AssertUnwindSafe(|| task(item))) {
                    Ok(result) => Outcome::Done(result),
                    Err(payload) => Outcome::Panicked(panic_message(payload)),
                }
            };
            // the receiver is gone once the batch has failed
            let _ = sender.send((index, outcome));
        });
    }
    drop(sender);

    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut remaining = total;
    while remaining > 0 {
        match receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok((index, Outcome::Done(Ok(value)))) => {
                trace!(index, remaining, "Bulk task completed");
                results[index] = Some(value);
                remaining -= 1;
            }
            Ok((index, Outcome::Done(Err(error)))) => {
                batch.cancel();
                debug!(index, outstanding = remaining - 1, "Bulk task failed; cancelling batch");
                return Err(BulkError::Failed { index, error });
            }
            Ok((index, Outcome::Panicked(message))) => {
                batch.cancel();
                return Err(BulkError::Panicked { index, message });
            }
            Ok((_, Outcome::Skipped)) | Err(RecvTimeoutError::Disconnected) => {
                batch.cancel();
                return Err(BulkError::Interrupted);
            }
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    batch.cancel();
                    return Err(BulkError::Interrupted);
                }
            }
        }
    }
    Ok(results.into_iter().flatten().collect())
}
