//! Page blob destinations for range uploads.
//!
//! [`PageBlobStore`] is the seam between the upload pipeline and the object
//! store. [`LocalPageStore`] maps containers to directories and page blobs
//! to sparse files, which is enough to exercise the whole pipeline offline.

pub mod local;
pub mod store;
pub mod validation;

pub use local::LocalPageStore;
pub use store::{BlobTarget, PageBlobStore, StoreFuture};
pub use validation::{validate_blob_name, validate_container_name};

use vhdup_transfer::IndexRange;

/// Page blob writes and sizes must be multiples of this many bytes.
pub const PAGE_ALIGNMENT: u64 = 512;

/// Errors produced by page blob stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("offset {offset} is not a multiple of {alignment}")]
    Misaligned { offset: u64, alignment: u64 },

    #[error("payload of {actual} bytes does not match range {range}")]
    LengthMismatch { range: IndexRange, actual: usize },

    #[error("range {range} is outside a blob of {size} bytes")]
    OutOfBounds { range: IndexRange, size: u64 },

    #[error("blob already exists: {0}")]
    BlobExists(String),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("remote store error: {0}")]
    Remote(String),
}

impl StoreError {
    /// Whether retrying the same request may succeed.
    ///
    /// Request-shape errors (bad names, alignment, bounds) and missing
    /// targets fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Remote(_))
    }
}

/// Checks that `value` is a multiple of [`PAGE_ALIGNMENT`].
pub fn check_alignment(value: u64) -> Result<(), StoreError> {
    if value % PAGE_ALIGNMENT != 0 {
        return Err(StoreError::Misaligned {
            offset: value,
            alignment: PAGE_ALIGNMENT,
        });
    }
    Ok(())
}
