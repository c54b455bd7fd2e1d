//! The `upload` command: provision the blob, plan the ranges, upload them.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use vhdup_balancer::RetryPolicy;
use vhdup_page_blob::{BlobTarget, LocalPageStore, PageBlobStore};
use vhdup_transfer::{
    DiskStream, FileDiskStream, IndexRange, ProgressRecord, detect_empty_ranges,
    locate_uploadable_ranges, total_length,
};
use vhdup_upload::{UploadContext, UploadOptions, UploadOrchestrator};

use crate::cli::{UploadArgs, normalize_blob_name};
use crate::config::Config;

pub async fn upload(args: UploadArgs, config: Config) -> anyhow::Result<()> {
    let container = match args.container {
        Some(c) => c,
        None => {
            info!(container = %config.container, "using default container");
            config.container.clone()
        }
    };
    let target = BlobTarget::new(container, normalize_blob_name(&args.blob_name));
    let parallelism = config.effective_parallelism(args.parallelism);
    let detect_empty = config.detect_empty && !args.no_detect_empty;

    let stream = FileDiskStream::open(&args.local_vhd_path)
        .with_context(|| format!("opening {}", args.local_vhd_path.display()))?;
    let disk_size = stream.size();
    info!(
        path = %args.local_vhd_path.display(),
        size = disk_size,
        blob = %target,
        parallelism,
        "preparing upload"
    );

    let store = Arc::new(LocalPageStore::new(&args.store_root));
    info!(root = %store.root().display(), "using local page store");
    if store.ensure_container(&target.container).await? {
        info!(container = %target.container, "container created");
    }
    store
        .create_page_blob(&target, disk_size, args.overwrite)
        .await
        .with_context(|| format!("creating page blob {target}"))?;

    let page_size = config.page_size;
    let skip = args.skip;
    let (stream, ranges) = tokio::task::spawn_blocking(move || {
        plan(stream, &skip, page_size, detect_empty)
    })
    .await??;

    let options = UploadOptions {
        read_ahead: config.read_ahead,
        retry: RetryPolicy::new(config.max_attempts),
        progress: config.progress(),
        ..UploadOptions::default()
    };
    let mut orchestrator = UploadOrchestrator::new(options);
    let printer = orchestrator.take_progress().map(spawn_progress_printer);

    let report = orchestrator
        .upload(UploadContext {
            stream,
            ranges,
            store,
            target: target.clone(),
            parallelism,
        })
        .await?;

    if let Some(printer) = printer {
        let _ = printer.await;
    }

    if !report.is_complete() {
        for failure in &report.failures {
            eprintln!("FailedAfterAllRetries: {failure}");
        }
        bail!(
            "{} of {} range(s) of {target} could not be written",
            report.ranges as u64 - report.summary.completed,
            report.ranges
        );
    }

    info!(
        blob = %target,
        bytes = report.bytes_uploaded,
        ranges = report.ranges,
        elapsed_s = report.elapsed.as_secs_f64(),
        "upload complete"
    );
    Ok(())
}

/// Plans the ranges to upload and drops the all-zero ones.
fn plan(
    mut stream: FileDiskStream,
    skip: &[IndexRange],
    page_size: u64,
    detect_empty: bool,
) -> anyhow::Result<(FileDiskStream, Vec<IndexRange>)> {
    let mut ranges = locate_uploadable_ranges(&stream, skip, page_size)?;
    info!(
        ranges = ranges.len(),
        bytes = total_length(&ranges),
        "uploadable ranges located"
    );

    if detect_empty {
        let before = ranges.len();
        ranges = detect_empty_ranges(&mut stream, &ranges)?;
        info!(
            empty = before - ranges.len(),
            remaining = ranges.len(),
            bytes = total_length(&ranges),
            "empty ranges detected"
        );
    }
    Ok((stream, ranges))
}

fn spawn_progress_printer(mut records: mpsc::Receiver<ProgressRecord>) -> JoinHandle<()> {
    tokio::spawn(async move {
        eprintln!("Uploading the VHD..");
        let mut printed = false;
        while let Some(record) = records.recv().await {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\r {}", format_progress(&record));
            let _ = stderr.flush();
            printed = true;
        }
        if printed {
            eprintln!();
        }
    })
}

/// Renders a progress record as a single status line.
pub fn format_progress(record: &ProgressRecord) -> String {
    format!(
        "Completed: {:>3}% RemainingTime: {} Throughput: {} MB/sec",
        record.percent_complete as u64,
        record.format_remaining(),
        record.average_throughput_mbps as u64
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(percent: f64, remaining: Duration, mbps: f64) -> ProgressRecord {
        ProgressRecord {
            percent_complete: percent,
            remaining_duration: remaining,
            average_throughput_mbps: mbps,
            bytes_processed: 0,
            total_bytes: 0,
            workers: 1,
        }
    }

    #[test]
    fn progress_line() {
        let line = format_progress(&record(7.9, Duration::from_secs(3723), 12.6));
        assert_eq!(
            line,
            "Completed:   7% RemainingTime: 01h:02m:03s Throughput: 12 MB/sec"
        );
        let line = format_progress(&record(100.0, Duration::ZERO, 0.0));
        assert_eq!(
            line,
            "Completed: 100% RemainingTime: 00h:00m:00s Throughput: 0 MB/sec"
        );
    }

    #[test]
    fn plan_skips_zero_pages() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut data = vec![0u8; 4096];
        data[..1024].fill(1);
        data[3072..].fill(2);
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let stream = FileDiskStream::open(file.path()).unwrap();
        let (_, ranges) = plan(stream, &[], 1024, true).unwrap();
        assert_eq!(
            ranges,
            vec![
                IndexRange::new(0, 1023).unwrap(),
                IndexRange::new(3072, 4095).unwrap()
            ]
        );

        let stream = FileDiskStream::open(file.path()).unwrap();
        let skip = [IndexRange::new(0, 1023).unwrap()];
        let (_, ranges) = plan(stream, &skip, 1024, false).unwrap();
        assert_eq!(ranges.len(), 3);
    }

    #[tokio::test]
    async fn uploads_file_into_local_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut data = vec![0u8; 8192];
        data[512..1024].fill(0x5A);
        data[6144..].fill(0xA5);
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        let root = tempfile::tempdir().unwrap();

        let args = UploadArgs {
            local_vhd_path: file.path().to_path_buf(),
            store_root: root.path().to_path_buf(),
            blob_name: "disk".into(),
            container: None,
            parallelism: Some(2),
            overwrite: false,
            skip: Vec::new(),
            no_detect_empty: false,
            config: None,
        };
        let config = Config {
            page_size: 2048,
            ..Config::default()
        };

        upload(args, config).await.unwrap();

        let uploaded = std::fs::read(root.path().join("vhds").join("disk.vhd")).unwrap();
        assert_eq!(uploaded, data);
    }

    #[tokio::test]
    async fn existing_blob_requires_overwrite() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 1024]).unwrap();
        file.flush().unwrap();
        let root = tempfile::tempdir().unwrap();

        let args = |overwrite| UploadArgs {
            local_vhd_path: file.path().to_path_buf(),
            store_root: root.path().to_path_buf(),
            blob_name: "disk.vhd".into(),
            container: Some("images".into()),
            parallelism: Some(1),
            overwrite,
            skip: Vec::new(),
            no_detect_empty: true,
            config: None,
        };

        upload(args(false), Config::default()).await.unwrap();
        assert!(upload(args(false), Config::default()).await.is_err());
        upload(args(true), Config::default()).await.unwrap();
    }
}
