//! The worker pool and its lifecycle.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::BalancerError;
use crate::item::{RetryPolicy, WorkFailure, WorkItem};

/// Lifecycle of a pool.
///
/// `Running → Draining → Finished` on the normal path, or
/// `Running → TearingDown → Finished` when torn down early. A pool is
/// `Running` from the moment [`Balancer::run`] returns its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    Draining,
    TearingDown,
    Finished,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            2 => Self::TearingDown,
            _ => Self::Finished,
        }
    }
}

/// Pool sizing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerConfig {
    /// Number of worker tasks.
    pub parallelism: usize,
    /// Items that can wait in the intake before `enqueue` blocks.
    pub intake_capacity: usize,
    pub retry: RetryPolicy,
}

impl BalancerConfig {
    /// `parallelism` workers, an intake of the same size and the default
    /// retry budget.
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism,
            intake_capacity: parallelism.max(1),
            retry: RetryPolicy::default(),
        }
    }
}

/// Counts reported once the pool has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    /// Items whose operation eventually succeeded.
    pub completed: u64,
    /// Items that failed for good.
    pub failed: u64,
    /// Enqueued items no worker had taken when the pool was torn down.
    pub abandoned: u64,
    /// Operation invocations across all items.
    pub attempts: u64,
    /// Workers that panicked.
    pub panicked: u64,
    pub torn_down: bool,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    attempts: AtomicU64,
}

/// A fixed-size pool of workers sharing one intake queue.
pub struct Balancer<E> {
    config: BalancerConfig,
    _error: PhantomData<fn() -> E>,
}

impl<E> Balancer<E>
where
    E: fmt::Display + Send + 'static,
{
    /// Creates a pool; no worker runs until [`run`](Self::run).
    pub fn new(config: BalancerConfig) -> Result<Self, BalancerError> {
        if config.parallelism == 0 {
            return Err(BalancerError::InvalidParallelism);
        }
        Ok(Self {
            config,
            _error: PhantomData,
        })
    }

    /// Spawns the workers and returns the handle used to feed and stop them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(self) -> BalancerHandle<E> {
        let BalancerConfig {
            parallelism,
            intake_capacity,
            retry,
        } = self.config;

        let (intake_tx, intake_rx) = mpsc::channel(intake_capacity.max(1));
        let intake_rx = Arc::new(Mutex::new(intake_rx));
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let teardown = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let state = Arc::new(AtomicU8::new(PoolState::Running as u8));

        let mut workers = JoinSet::new();
        for index in 0..parallelism {
            workers.spawn(worker_loop(
                index,
                Arc::clone(&intake_rx),
                failures_tx.clone(),
                teardown.clone(),
                retry,
                Arc::clone(&counters),
            ));
        }
        // The failure stream ends once the last worker drops its sender.
        drop(failures_tx);

        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(supervise(
            workers,
            intake_rx,
            counters,
            Arc::clone(&state),
            teardown.clone(),
            done_tx,
        ));

        info!(
            parallelism,
            intake_capacity,
            max_attempts = retry.max_attempts(),
            "balancer started"
        );

        BalancerHandle {
            intake: Some(intake_tx),
            failures: Some(failures_rx),
            teardown,
            state,
            done: done_rx,
        }
    }
}

/// An item waiting in the intake, with the submitter waiting on `taken`.
struct Queued<E> {
    item: WorkItem<E>,
    taken: Option<oneshot::Sender<()>>,
}

/// Control side of a running pool.
pub struct BalancerHandle<E> {
    intake: Option<mpsc::Sender<Queued<E>>>,
    failures: Option<mpsc::UnboundedReceiver<WorkFailure<E>>>,
    teardown: CancellationToken,
    state: Arc<AtomicU8>,
    done: oneshot::Receiver<PoolSummary>,
}

impl<E> BalancerHandle<E> {
    /// Hands an item to a worker, returning once a worker has taken it.
    ///
    /// A taken item always runs to completion, even if the pool is torn down
    /// right after.
    pub async fn submit(&self, item: WorkItem<E>) -> Result<(), BalancerError> {
        let (taken_tx, taken_rx) = oneshot::channel();
        let id = item.id().to_string();
        self.send(Queued {
            item,
            taken: Some(taken_tx),
        })
        .await?;
        taken_rx.await.map_err(|_| BalancerError::Abandoned(id))
    }

    /// Queues an item, waiting only while the intake is full.
    ///
    /// Unlike [`submit`](Self::submit), the item may still be waiting when
    /// the pool is torn down, in which case it is abandoned.
    pub async fn enqueue(&self, item: WorkItem<E>) -> Result<(), BalancerError> {
        self.send(Queued { item, taken: None }).await
    }

    async fn send(&self, queued: Queued<E>) -> Result<(), BalancerError> {
        let Some(intake) = &self.intake else {
            return Err(BalancerError::IntakeClosed);
        };
        intake
            .send(queued)
            .await
            .map_err(|_| BalancerError::IntakeClosed)
    }

    /// Stops accepting items; queued and in-flight items still run.
    pub fn close_intake(&mut self) {
        if self.intake.take().is_some() {
            self.transition(PoolState::Running, PoolState::Draining);
            debug!("balancer intake closed, draining");
        }
    }

    /// Stops accepting items and asks workers to exit as soon as their
    /// current item is done. Enqueued items that no worker took are
    /// abandoned.
    pub fn tear_down(&mut self) {
        self.intake = None;
        if self.teardown.is_cancelled() {
            return;
        }
        self.teardown.cancel();
        self.transition(PoolState::Running, PoolState::TearingDown);
        self.transition(PoolState::Draining, PoolState::TearingDown);
        info!("balancer teardown requested");
    }

    /// Takes the stream of terminal per-item failures. Can only be called once.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<WorkFailure<E>>> {
        self.failures.take()
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Waits for the last worker to exit.
    ///
    /// Closes the intake first if it is still open.
    pub async fn wait(mut self) -> Result<PoolSummary, BalancerError> {
        self.close_intake();
        self.done.await.map_err(|_| BalancerError::SupervisorLost)
    }

    fn transition(&self, from: PoolState, to: PoolState) {
        let _ = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire);
    }
}

async fn worker_loop<E>(
    index: usize,
    intake: Arc<Mutex<mpsc::Receiver<Queued<E>>>>,
    failures: mpsc::UnboundedSender<WorkFailure<E>>,
    teardown: CancellationToken,
    retry: RetryPolicy,
    counters: Arc<Counters>,
) where
    E: fmt::Display + Send + 'static,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = teardown.cancelled() => None,
            item = async { intake.lock().await.recv().await } => item,
        };
        let Some(Queued { mut item, taken }) = next else {
            break;
        };
        if let Some(taken) = taken {
            let _ = taken.send(());
        }

        match item.execute(&retry).await {
            Ok(attempts) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                counters.attempts.fetch_add(u64::from(attempts), Ordering::Relaxed);
                debug!(worker = index, id = %item.id(), attempts, "work item done");
            }
            Err(failure) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                counters
                    .attempts
                    .fetch_add(u64::from(failure.attempts), Ordering::Relaxed);
                warn!(
                    worker = index,
                    id = %failure.id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "work item failed for good"
                );
                let _ = failures.send(failure);
            }
        }
    }
    debug!(worker = index, "balancer worker exited");
}

/// Joins every worker, counts abandoned items and fires the completion
/// signal. This is the only place the signal is sent.
async fn supervise<E>(
    mut workers: JoinSet<()>,
    intake: Arc<Mutex<mpsc::Receiver<Queued<E>>>>,
    counters: Arc<Counters>,
    state: Arc<AtomicU8>,
    teardown: CancellationToken,
    done: oneshot::Sender<PoolSummary>,
) {
    let mut panicked = 0;
    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "balancer worker panicked");
            panicked += 1;
        }
    }

    let mut abandoned = 0;
    {
        let mut rx = intake.lock().await;
        rx.close();
        while rx.try_recv().is_ok() {
            abandoned += 1;
        }
    }

    state.store(PoolState::Finished as u8, Ordering::Release);
    let summary = PoolSummary {
        completed: counters.completed.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        abandoned,
        attempts: counters.attempts.load(Ordering::Relaxed),
        panicked,
        torn_down: teardown.is_cancelled(),
    };
    info!(
        completed = summary.completed,
        failed = summary.failed,
        abandoned = summary.abandoned,
        "all balancer workers finished"
    );
    let _ = done.send(summary);
}
