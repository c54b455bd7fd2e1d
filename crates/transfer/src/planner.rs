//! Decides which byte ranges of a disk have to be uploaded.

use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::TransferError;
use crate::disk::DiskStream;
use crate::range::{IndexRange, normalize_ranges, subtract_ranges};

/// Plans the page-aligned ranges of `[0, disk_size)` that are not skipped.
///
/// One range is produced per `page_size` window; a window that a skip range
/// cuts yields only its remaining pieces, and the last window may be shorter.
pub fn plan_ranges(
    disk_size: u64,
    page_size: u64,
    skip_ranges: &[IndexRange],
) -> Result<Vec<IndexRange>, TransferError> {
    let Ok(whole) = IndexRange::from_length(0, disk_size) else {
        if page_size == 0 {
            return Err(TransferError::InvalidPageSize);
        }
        return Ok(Vec::new());
    };
    plan_extents(&[whole], disk_size, page_size, skip_ranges)
}

/// Like [`plan_ranges`] but only bytes inside `extents` are considered.
pub fn plan_extents(
    extents: &[IndexRange],
    disk_size: u64,
    page_size: u64,
    skip_ranges: &[IndexRange],
) -> Result<Vec<IndexRange>, TransferError> {
    if page_size == 0 {
        return Err(TransferError::InvalidPageSize);
    }
    if disk_size == 0 {
        return Ok(Vec::new());
    }

    let disk = IndexRange::new(0, disk_size - 1)?;
    let data: Vec<IndexRange> = normalize_ranges(extents)
        .iter()
        .filter_map(|extent| extent.intersection(&disk))
        .collect();
    let wanted = subtract_ranges(&data, &normalize_ranges(skip_ranges));

    let mut plan = Vec::with_capacity(wanted.len());
    for range in &wanted {
        // Cut each wanted range on the global page grid so full pages stay whole.
        let mut start = range.start();
        loop {
            let window_end = (start / page_size)
                .saturating_mul(page_size)
                .saturating_add(page_size - 1);
            let end = window_end.min(range.end());
            plan.push(IndexRange::new(start, end)?);
            if end == range.end() {
                break;
            }
            start = end + 1;
        }
    }

    debug!(
        disk_size,
        page_size,
        skipped = skip_ranges.len(),
        ranges = plan.len(),
        "planned uploadable ranges"
    );
    Ok(plan)
}

/// Plans the uploadable ranges of `stream`, honouring its data extents.
pub fn locate_uploadable_ranges<S: DiskStream + ?Sized>(
    stream: &S,
    skip_ranges: &[IndexRange],
    page_size: u64,
) -> Result<Vec<IndexRange>, TransferError> {
    plan_extents(&stream.extents(), stream.size(), page_size, skip_ranges)
}

/// Drops every candidate range whose bytes are all zero.
///
/// Reads each candidate once; any seek or read failure aborts detection.
pub fn detect_empty_ranges<S: DiskStream + ?Sized>(
    stream: &mut S,
    candidates: &[IndexRange],
) -> Result<Vec<IndexRange>, TransferError> {
    let largest = candidates.iter().map(IndexRange::length).max().unwrap_or(0);
    let mut buf = vec![0u8; largest as usize];
    let mut kept = Vec::with_capacity(candidates.len());

    for range in candidates {
        let len = range.length() as usize;
        stream
            .seek(SeekFrom::Start(range.start()))
            .and_then(|_| stream.read_exact(&mut buf[..len]))
            .map_err(|source| TransferError::EmptyDetection {
                range: *range,
                source,
            })?;

        if buf[..len].iter().any(|&b| b != 0) {
            kept.push(*range);
        }
    }

    debug!(
        candidates = candidates.len(),
        empty = candidates.len() - kept.len(),
        "empty range detection finished"
    );
    Ok(kept)
}
