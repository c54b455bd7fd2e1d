//! Sequential producer turning a range plan into [`DataUnit`]s.

use std::io::SeekFrom;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::TransferError;
use crate::disk::DiskStream;
use crate::range::IndexRange;
use crate::types::DataUnit;

/// Default number of units buffered between the reader and its consumer.
///
/// The reader holds at most this many pages in memory ahead of the consumer;
/// once the buffer is full it blocks on the next send.
pub const DEFAULT_READ_AHEAD: usize = 4;

/// Output of a running [`DiskRangeReader`].
///
/// `units` closes once every range was read or right after a failure. A
/// failure is delivered on `error` before `units` closes; on success the
/// error sender is dropped without a value.
pub struct RangeStream {
    pub units: mpsc::Receiver<DataUnit>,
    pub error: oneshot::Receiver<TransferError>,
    pub handle: JoinHandle<()>,
}

/// Reads planned ranges from a disk stream on a blocking thread.
pub struct DiskRangeReader;

impl DiskRangeReader {
    /// Starts reading `ranges` from `stream`, in order.
    ///
    /// The stream is owned by the producer task for its whole lifetime and is
    /// dropped when the task ends. `capacity` bounds the read-ahead buffer.
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(stream: S, ranges: Vec<IndexRange>, capacity: usize) -> RangeStream
    where
        S: DiskStream + 'static,
    {
        let (units_tx, units_rx) = mpsc::channel(capacity.max(1));
        let (error_tx, error_rx) = oneshot::channel();

        let handle = tokio::task::spawn_blocking(move || {
            produce(stream, &ranges, &units_tx, error_tx);
        });

        RangeStream {
            units: units_rx,
            error: error_rx,
            handle,
        }
    }
}

fn produce<S: DiskStream>(
    mut stream: S,
    ranges: &[IndexRange],
    units: &mpsc::Sender<DataUnit>,
    error_tx: oneshot::Sender<TransferError>,
) {
    for (index, range) in ranges.iter().enumerate() {
        let unit = match read_unit(&mut stream, range) {
            Ok(unit) => unit,
            Err(e) => {
                error!(range = %range, index, error = %e, "disk read failed");
                let _ = error_tx.send(e);
                return;
            }
        };

        if units.blocking_send(unit).is_err() {
            debug!(range = %range, "range consumer dropped, stopping reader");
            return;
        }
    }
    debug!(ranges = ranges.len(), "all disk ranges read");
}

fn read_unit<S: DiskStream>(stream: &mut S, range: &IndexRange) -> Result<DataUnit, TransferError> {
    let mut data = vec![0u8; range.length() as usize];
    stream
        .seek(SeekFrom::Start(range.start()))
        .and_then(|_| stream.read_exact(&mut data))
        .map_err(|source| TransferError::StreamRead {
            range: *range,
            source,
        })?;
    Ok(DataUnit {
        range: *range,
        data,
    })
}
