//! Destination trait for range writes.
//!
//! The upload pipeline talks to the object store only through
//! [`PageBlobStore`], which keeps it independent of the transport and easy
//! to test with in-memory mocks.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use vhdup_transfer::IndexRange;

use crate::StoreError;

/// Boxed future returned by [`PageBlobStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Identifies a page blob inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobTarget {
    pub container: String,
    pub blob: String,
}

impl BlobTarget {
    pub fn new(container: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blob: blob.into(),
        }
    }
}

impl fmt::Display for BlobTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.blob)
    }
}

/// A page-addressable object store.
pub trait PageBlobStore: Send + Sync {
    /// Writes `payload` to the inclusive byte `range` of the blob.
    ///
    /// Writing the same bytes to the same range twice must be harmless, since
    /// failed writes are retried.
    fn write_range<'a>(
        &'a self,
        target: &'a BlobTarget,
        range: IndexRange,
        payload: &'a [u8],
    ) -> StoreFuture<'a, ()>;

    /// Creates the container if it does not exist yet.
    ///
    /// Returns `true` if it was created by this call.
    fn ensure_container<'a>(&'a self, container: &'a str) -> StoreFuture<'a, bool>;

    /// Creates a zero-filled page blob of `size` bytes.
    ///
    /// Fails with [`StoreError::BlobExists`] if the blob exists and
    /// `overwrite` is false.
    fn create_page_blob<'a>(
        &'a self,
        target: &'a BlobTarget,
        size: u64,
        overwrite: bool,
    ) -> StoreFuture<'a, ()>;
}
