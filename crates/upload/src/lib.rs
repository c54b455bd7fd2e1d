//! Upload orchestration.
//!
//! Wires the disk range reader, the balancer and the progress tracker into
//! one upload of a planned set of ranges to a page blob.

mod orchestrator;
mod types;

pub use orchestrator::UploadOrchestrator;
pub use types::{RetryMode, UploadContext, UploadOptions, UploadReport};

use vhdup_balancer::BalancerError;
use vhdup_page_blob::StoreError;
use vhdup_transfer::{IndexRange, TransferError};

/// Errors that abort an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Reading the disk failed; the pool was torn down.
    #[error("disk stream failed: {0}")]
    Stream(TransferError),

    #[error("parallelism must be at least 1")]
    InvalidParallelism,

    #[error("disk reader task ended unexpectedly")]
    ReaderLost,

    #[error("balancer error: {0}")]
    Balancer(#[from] BalancerError),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// A failed write of one range.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct RangeWriteError {
    pub range: IndexRange,
    pub source: StoreError,
}
