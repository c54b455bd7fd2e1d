//! Disk-side building blocks of a page blob upload.
//!
//! - [`range`]: inclusive byte ranges and range-set arithmetic
//! - [`planner`]: which ranges of a disk must be uploaded
//! - [`reader`]: sequential producer of `(range, bytes)` units
//! - [`progress`]: byte counter with periodic throughput/ETA records

pub mod disk;
pub mod planner;
pub mod progress;
pub mod range;
pub mod reader;
mod types;

pub use disk::{DiskStream, FileDiskStream};
pub use planner::{detect_empty_ranges, locate_uploadable_ranges, plan_extents, plan_ranges};
pub use progress::{ProgressConfig, ProgressRecord, ProgressTracker, ThroughputWindow};
pub use range::{IndexRange, chunk_range_by_size, normalize_ranges, subtract_ranges, total_length};
pub use reader::{DEFAULT_READ_AHEAD, DiskRangeReader, RangeStream};
pub use types::DataUnit;

/// Default page size: 2 MiB.
///
/// Each planned range covers at most one page, so this is also the largest
/// single range write issued.
pub const DEFAULT_PAGE_SIZE: u64 = 2 * 1024 * 1024;

/// Errors produced while planning or reading disk ranges.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid range: start {start} is past end {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("page size must be greater than zero")]
    InvalidPageSize,

    #[error("failed to read range {range} while detecting empty ranges: {source}")]
    EmptyDetection {
        range: IndexRange,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read disk range {range}: {source}")]
    StreamRead {
        range: IndexRange,
        #[source]
        source: std::io::Error,
    },
}
