//! Data types for the upload flow.

use std::sync::Arc;
use std::time::Duration;

use vhdup_balancer::{PoolSummary, RetryPolicy, WorkFailure};
use vhdup_page_blob::{BlobTarget, PageBlobStore, StoreError};
use vhdup_transfer::{DEFAULT_READ_AHEAD, IndexRange, ProgressConfig};

use crate::RangeWriteError;

/// Everything one upload needs.
///
/// The stream is moved into the disk reader; nothing else touches it.
pub struct UploadContext<S> {
    pub stream: S,
    /// Sorted, disjoint ranges to upload.
    pub ranges: Vec<IndexRange>,
    pub store: Arc<dyn PageBlobStore>,
    pub target: BlobTarget,
    pub parallelism: usize,
}

/// Which failed range writes are retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryMode {
    /// Retry every failed write until the attempt budget runs out.
    #[default]
    Always,
    /// Retry only errors the store reports as transient.
    TransientOnly,
}

impl RetryMode {
    pub(crate) fn should_retry(self, err: &StoreError) -> bool {
        match self {
            Self::Always => true,
            Self::TransientOnly => err.is_retryable(),
        }
    }
}

/// Tuning knobs for [`UploadOrchestrator`](crate::UploadOrchestrator).
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Units buffered between the disk reader and the submit loop.
    pub read_ahead: usize,
    pub retry: RetryPolicy,
    pub retry_mode: RetryMode,
    pub progress: ProgressConfig,
    /// Bytes already uploaded before this run, counted towards progress.
    pub initial_bytes: u64,
    /// Capacity of the progress record channel.
    pub progress_capacity: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            read_ahead: DEFAULT_READ_AHEAD,
            retry: RetryPolicy::default(),
            retry_mode: RetryMode::default(),
            progress: ProgressConfig::default(),
            initial_bytes: 0,
            progress_capacity: 64,
        }
    }
}

/// Outcome of an upload whose disk stream did not fail.
#[derive(Debug)]
pub struct UploadReport {
    /// Ranges in the plan.
    pub ranges: usize,
    /// Bytes written by this run.
    pub bytes_uploaded: u64,
    /// Ranges that could not be written.
    pub failures: Vec<WorkFailure<RangeWriteError>>,
    pub summary: PoolSummary,
    pub elapsed: Duration,
}

impl UploadReport {
    /// Whether every planned range was written.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.summary.abandoned == 0 && self.summary.panicked == 0
    }

    /// Ranges that failed, in plan order.
    pub fn failed_ranges(&self) -> Vec<IndexRange> {
        let mut ranges: Vec<IndexRange> = self.failures.iter().map(|f| f.error.range).collect();
        ranges.sort();
        ranges
    }
}
