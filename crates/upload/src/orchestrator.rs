//! Upload orchestrator.
//!
//! Streams planned disk ranges into a balancer whose workers write them to
//! a page blob, while a progress tracker reports throughput and ETA.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vhdup_balancer::{Balancer, BalancerConfig, BalancerHandle, WorkFailure, WorkItem};
use vhdup_page_blob::{BlobTarget, PageBlobStore};
use vhdup_transfer::{
    DataUnit, DiskRangeReader, DiskStream, ProgressRecord, ProgressTracker, RangeStream,
    TransferError, total_length,
};

use crate::types::{RetryMode, UploadContext, UploadOptions, UploadReport};
use crate::{RangeWriteError, UploadError};

/// Runs one upload of planned disk ranges to a page blob.
pub struct UploadOrchestrator {
    options: UploadOptions,
    progress_tx: mpsc::Sender<ProgressRecord>,
    progress_rx: Option<mpsc::Receiver<ProgressRecord>>,
}

impl Default for UploadOrchestrator {
    fn default() -> Self {
        Self::new(UploadOptions::default())
    }
}

impl UploadOrchestrator {
    pub fn new(options: UploadOptions) -> Self {
        let (progress_tx, progress_rx) = mpsc::channel(options.progress_capacity.max(1));
        Self {
            options,
            progress_tx,
            progress_rx: Some(progress_rx),
        }
    }

    /// Takes the progress record receiver. Can only be called once.
    pub fn take_progress(&mut self) -> Option<mpsc::Receiver<ProgressRecord>> {
        self.progress_rx.take()
    }

    /// Uploads every range of `cxt.ranges` and waits for the workers to
    /// finish.
    ///
    /// A disk read failure stops submission, tears the pool down and is
    /// returned as [`UploadError::Stream`]. Ranges whose writes fail for good
    /// do not abort the upload; they are listed in the report.
    pub async fn upload<S>(self, cxt: UploadContext<S>) -> Result<UploadReport, UploadError>
    where
        S: DiskStream + 'static,
    {
        let UploadContext {
            stream,
            ranges,
            store,
            target,
            parallelism,
        } = cxt;

        if parallelism == 0 {
            return Err(UploadError::InvalidParallelism);
        }

        let started = Instant::now();
        let range_count = ranges.len();
        let planned_bytes = total_length(&ranges);

        if ranges.is_empty() {
            info!(blob = %target, "nothing to upload");
            return Ok(UploadReport {
                ranges: 0,
                bytes_uploaded: 0,
                failures: Vec::new(),
                summary: Default::default(),
                elapsed: started.elapsed(),
            });
        }

        info!(
            blob = %target,
            ranges = range_count,
            bytes = planned_bytes,
            parallelism,
            "upload started"
        );

        let mut pool = Balancer::<RangeWriteError>::new(BalancerConfig {
            retry: self.options.retry,
            ..BalancerConfig::new(parallelism)
        })?
        .run();

        let collector = pool.take_failures().map(|mut failures| {
            tokio::spawn(async move {
                let mut collected: Vec<WorkFailure<RangeWriteError>> = Vec::new();
                while let Some(failure) = failures.recv().await {
                    collected.push(failure);
                }
                collected
            })
        });

        let initial_bytes = self.options.initial_bytes;
        let tracker = ProgressTracker::start(
            self.options.progress,
            parallelism,
            initial_bytes,
            initial_bytes.saturating_add(planned_bytes),
            self.progress_tx.clone(),
        );

        let reader = DiskRangeReader::spawn(stream, ranges, self.options.read_ahead);
        let writer = RangeWriter {
            store,
            target: Arc::new(target),
            tracker: tracker.clone(),
            retry_mode: self.options.retry_mode,
        };

        let outcome = feed(reader, &mut pool, &writer).await;

        match &outcome {
            Ok(()) => pool.close_intake(),
            Err(_) => pool.tear_down(),
        }
        let summary = pool.wait().await;
        tracker.close();

        let failures = match collector {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        outcome?;
        let summary = summary?;
        let bytes_uploaded = tracker.bytes_processed().saturating_sub(initial_bytes);

        if !failures.is_empty() {
            warn!(
                blob = %writer.target,
                failed = failures.len(),
                "upload finished with unwritten ranges"
            );
        }
        info!(
            blob = %writer.target,
            bytes = bytes_uploaded,
            completed = summary.completed,
            failed = summary.failed,
            attempts = summary.attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upload finished"
        );

        Ok(UploadReport {
            ranges: range_count,
            bytes_uploaded,
            failures,
            summary,
            elapsed: started.elapsed(),
        })
    }
}

/// Submits units to the pool until the reader is done or fails.
///
/// Units already read are always submitted before a reader error is acted
/// on, and a submit returns only once a worker holds the unit, so every
/// range before the failing one is written even though the pool is torn
/// down right after.
async fn feed(
    reader: RangeStream,
    pool: &mut BalancerHandle<RangeWriteError>,
    writer: &RangeWriter,
) -> Result<(), UploadError> {
    let RangeStream {
        mut units,
        error: mut reader_error,
        handle,
    } = reader;
    let mut reader_done = false;

    let result = loop {
        tokio::select! {
            biased;
            unit = units.recv() => match unit {
                Some(unit) => {
                    debug!(range = %unit.range, "submitting range");
                    if let Err(e) = pool.submit(writer.work_item(unit)).await {
                        break Err(e.into());
                    }
                }
                None => match reader_error.try_recv() {
                    Ok(e) => break Err(stream_failure(e)),
                    Err(_) => break Ok(()),
                },
            },
            res = &mut reader_error, if !reader_done => match res {
                Ok(e) => break Err(stream_failure(e)),
                // No error will come; keep draining units.
                Err(_) => reader_done = true,
            },
        }
    };

    // Unblocks a reader waiting on a full buffer.
    drop(units);
    if let Err(e) = handle.await {
        error!(error = %e, "disk reader task panicked");
        if result.is_ok() {
            return Err(UploadError::ReaderLost);
        }
    }
    result
}

fn stream_failure(e: TransferError) -> UploadError {
    error!(error = %e, "disk stream failed, tearing down upload");
    UploadError::Stream(e)
}

/// Builds the work item that writes one unit.
struct RangeWriter {
    store: Arc<dyn PageBlobStore>,
    target: Arc<BlobTarget>,
    tracker: ProgressTracker,
    retry_mode: RetryMode,
}

impl RangeWriter {
    fn work_item(&self, unit: DataUnit) -> WorkItem<RangeWriteError> {
        let DataUnit { range, data } = unit;
        let data: Arc<[u8]> = data.into();
        let store = Arc::clone(&self.store);
        let target = Arc::clone(&self.target);
        let tracker = self.tracker.clone();
        let retry_mode = self.retry_mode;

        WorkItem::<RangeWriteError>::new(range.to_string(), move || {
            let store = Arc::clone(&store);
            let target = Arc::clone(&target);
            let data = Arc::clone(&data);
            let tracker = tracker.clone();
            async move {
                store
                    .write_range(&target, range, &data)
                    .await
                    .map_err(|source| RangeWriteError { range, source })?;
                tracker.report_bytes(range.length());
                debug!(range = %range, bytes = range.length(), "range written");
                Ok(())
            }
        })
        .retry_when(move |e| retry_mode.should_retry(&e.source))
    }
}
