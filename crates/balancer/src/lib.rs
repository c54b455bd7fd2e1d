//! Fixed-size worker pool with per-item retry and cooperative teardown.
//!
//! Items reach the workers through a bounded intake shared by all of them.
//! [`BalancerHandle::submit`] returns only once a worker has taken the item,
//! so a teardown never drops work that was already handed over. Each worker
//! runs one item at a time, retrying it while the item's predicate allows
//! and the [`RetryPolicy`] budget lasts. Items that fail for good are
//! published on a failure stream; the pool itself keeps going.

mod item;
mod pool;

pub use item::{RetryPolicy, WorkFailure, WorkFuture, WorkItem};
pub use pool::{Balancer, BalancerConfig, BalancerHandle, PoolState, PoolSummary};

/// Default attempt budget per work item.
///
/// Large enough to ride out transient outages, finite so a permanently
/// failing item cannot keep a worker busy forever.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Errors produced by the balancer.
#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    #[error("balancer intake is closed")]
    IntakeClosed,

    #[error("parallelism must be at least 1")]
    InvalidParallelism,

    #[error("work item {0} was abandoned before a worker took it")]
    Abandoned(String),

    #[error("balancer supervisor exited without reporting")]
    SupervisorLost,
}
