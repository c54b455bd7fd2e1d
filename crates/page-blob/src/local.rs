//! File-backed page blob store.
//!
//! Containers are directories under a root, page blobs are files inside
//! them. Blob creation sizes the file with `set_len`, so unwritten pages
//! read back as zeros the same way they do on a real page blob.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};
use vhdup_transfer::IndexRange;

use crate::store::{BlobTarget, PageBlobStore, StoreFuture};
use crate::validation::{validate_blob_name, validate_container_name};
use crate::{StoreError, check_alignment};

/// Page blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalPageStore {
    root: PathBuf,
}

impl LocalPageStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `target`.
    pub fn blob_path(&self, target: &BlobTarget) -> Result<PathBuf, StoreError> {
        validate_container_name(&target.container)?;
        validate_blob_name(&target.blob)?;
        Ok(self.root.join(&target.container).join(&target.blob))
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, StoreError> {
        validate_container_name(container)?;
        Ok(self.root.join(container))
    }

    async fn write_range_impl(
        &self,
        target: &BlobTarget,
        range: IndexRange,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        check_alignment(range.start())?;
        check_alignment(range.length())?;
        if payload.len() as u64 != range.length() {
            return Err(StoreError::LengthMismatch {
                range,
                actual: payload.len(),
            });
        }

        let path = self.blob_path(target)?;
        let mut file = match OpenOptions::new().write(true).open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::BlobNotFound(target.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata().await?.len();
        if range.end() >= size {
            return Err(StoreError::OutOfBounds { range, size });
        }

        file.seek(SeekFrom::Start(range.start())).await?;
        file.write_all(payload).await?;
        file.flush().await?;

        debug!(blob = %target, %range, "page range written");
        Ok(())
    }

    async fn ensure_container_impl(&self, container: &str) -> Result<bool, StoreError> {
        let path = self.container_path(container)?;
        if fs::try_exists(&path).await? {
            return Ok(false);
        }
        fs::create_dir_all(&path).await?;
        info!(container, path = %path.display(), "container created");
        Ok(true)
    }

    async fn create_page_blob_impl(
        &self,
        target: &BlobTarget,
        size: u64,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        check_alignment(size)?;

        let container = self.container_path(&target.container)?;
        if !fs::try_exists(&container).await? {
            return Err(StoreError::ContainerNotFound(target.container.clone()));
        }

        let path = self.blob_path(target)?;
        if !overwrite && fs::try_exists(&path).await? {
            return Err(StoreError::BlobExists(target.to_string()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = fs::File::create(&path).await?;
        file.set_len(size).await?;
        file.sync_all().await?;

        info!(blob = %target, size, overwrite, "page blob created");
        Ok(())
    }
}

impl PageBlobStore for LocalPageStore {
    fn write_range<'a>(
        &'a self,
        target: &'a BlobTarget,
        range: IndexRange,
        payload: &'a [u8],
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.write_range_impl(target, range, payload))
    }

    fn ensure_container<'a>(&'a self, container: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(self.ensure_container_impl(container))
    }

    fn create_page_blob<'a>(
        &'a self,
        target: &'a BlobTarget,
        size: u64,
        overwrite: bool,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.create_page_blob_impl(target, size, overwrite))
    }
}
