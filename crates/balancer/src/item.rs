//! Work items and their retry behaviour.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tracing::warn;

use crate::DEFAULT_MAX_ATTEMPTS;

/// Future returned by one attempt of a work item.
pub type WorkFuture<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send>>;

type Operation<E> = Box<dyn FnMut() -> WorkFuture<E> + Send>;
type RetryPredicate<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

/// Upper bound on how many times a single item is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Allows at most `max_attempts` attempts per item (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

/// A unit of work: an operation that may be attempted several times.
///
/// The pool never runs two attempts of the same item at once.
pub struct WorkItem<E> {
    id: String,
    operation: Operation<E>,
    should_retry: RetryPredicate<E>,
}

impl<E> WorkItem<E> {
    /// Creates an item that is attempted once.
    pub fn new<F, Fut>(id: impl Into<String>, mut operation: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self {
            id: id.into(),
            operation: Box::new(move || Box::pin(operation())),
            should_retry: Box::new(|_| false),
        }
    }

    /// Retries the operation whenever `predicate` accepts the error.
    pub fn retry_when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Box::new(predicate);
        self
    }

    /// Retries the operation on every error (bounded by the pool's policy).
    pub fn retry_always(self) -> Self {
        self.retry_when(|_| true)
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<E: fmt::Display> WorkItem<E> {
    /// Runs the operation until it succeeds, the predicate rejects the error
    /// or the policy's budget is spent. Returns the number of attempts made.
    pub(crate) async fn execute(&mut self, policy: &RetryPolicy) -> Result<u32, WorkFailure<E>> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match (self.operation)().await {
                Ok(()) => return Ok(attempts),
                Err(e) => e,
            };

            let retryable = (self.should_retry)(&err);
            if !retryable || attempts >= policy.max_attempts() {
                return Err(WorkFailure {
                    id: self.id.clone(),
                    attempts,
                    exhausted: retryable,
                    error: err,
                });
            }
            warn!(id = %self.id, attempt = attempts, error = %err, "work item failed, retrying");
        }
    }
}

impl<E> fmt::Debug for WorkItem<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A work item that failed for good.
#[derive(Debug)]
pub struct WorkFailure<E> {
    pub id: String,
    pub attempts: u32,
    /// `true` when the retry budget ran out, `false` when the error was not
    /// retryable.
    pub exhausted: bool,
    pub error: E,
}

impl<E: fmt::Display> fmt::Display for WorkFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempt(s): {}",
            self.id, self.attempts, self.error
        )
    }
}
