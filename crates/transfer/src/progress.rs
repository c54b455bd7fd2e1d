use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Default sampling interval of the reporting task.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of samples kept for the throughput average.
pub const DEFAULT_WINDOW: usize = 60;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Reporting settings for a [`ProgressTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressConfig {
    /// How often a record is computed and emitted.
    pub interval: Duration,
    /// How many recent samples make up the throughput average.
    pub window: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            window: DEFAULT_WINDOW,
        }
    }
}

/// A point-in-time view of upload progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    /// Percentage of `total_bytes` processed, within `[0, 100]`.
    pub percent_complete: f64,
    /// Estimated time until every byte is processed.
    pub remaining_duration: Duration,
    /// Average throughput over the recent window, in MB/s.
    pub average_throughput_mbps: f64,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    /// Number of workers feeding the tracker.
    pub workers: usize,
}

impl ProgressRecord {
    /// Formats the remaining time as `HHh:MMm:SSs`.
    pub fn format_remaining(&self) -> String {
        let secs = self.remaining_duration.as_secs();
        format!(
            "{:02}h:{:02}m:{:02}s",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60
        )
    }
}

/// Counts processed bytes from any number of workers and periodically emits
/// [`ProgressRecord`]s.
///
/// Cloning yields another handle to the same counter.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    total_bytes: u64,
    workers: usize,
    processed: AtomicU64,
    closed: AtomicBool,
    sampling: Mutex<Sampling>,
    sink: Mutex<Option<mpsc::Sender<ProgressRecord>>>,
    stop: CancellationToken,
}

struct Sampling {
    window: ThroughputWindow,
    last_processed: u64,
}

impl ProgressTracker {
    /// Starts tracking an upload of `total_bytes`, of which `initial_bytes`
    /// are already done, and spawns the reporting task.
    ///
    /// Records are offered to `sink` without waiting; a slow consumer misses
    /// records instead of slowing the upload. The sequence ends after
    /// [`close`](Self::close).
    pub fn start(
        config: ProgressConfig,
        workers: usize,
        initial_bytes: u64,
        total_bytes: u64,
        sink: mpsc::Sender<ProgressRecord>,
    ) -> Self {
        let started = Instant::now();
        let mut window = ThroughputWindow::new(config.window);
        window.add_sample(0, started);

        let inner = Arc::new(TrackerInner {
            total_bytes,
            workers,
            processed: AtomicU64::new(initial_bytes),
            closed: AtomicBool::new(false),
            sampling: Mutex::new(Sampling {
                window,
                last_processed: initial_bytes,
            }),
            sink: Mutex::new(Some(sink)),
            stop: CancellationToken::new(),
        });

        let period = config.interval.max(Duration::from_millis(1));
        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(started + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_inner.stop.cancelled() => break,
                    at = ticker.tick() => {
                        let record = task_inner.sample(at);
                        trace!(percent = record.percent_complete, "progress tick");
                        task_inner.offer(record);
                    }
                }
            }
            debug!("progress reporting stopped");
        });

        Self { inner }
    }

    /// Adds `bytes` to the processed count. Ignored after close.
    pub fn report_bytes(&self, bytes: u64) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        self.inner.processed.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Bytes processed so far, including the initial bytes.
    pub fn bytes_processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Acquire)
    }

    /// Total bytes the tracker was started with.
    pub fn total_bytes(&self) -> u64 {
        self.inner.total_bytes
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Emits a final record and ends the record sequence.
    ///
    /// Calling it again has no effect.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.stop.cancel();

        let mut sink = lock(&self.inner.sink);
        if let Some(tx) = sink.take() {
            let record = self.inner.record();
            debug!(
                bytes = record.bytes_processed,
                total = record.total_bytes,
                "progress tracker closed"
            );
            let _ = tx.try_send(record);
        }
    }
}

impl TrackerInner {
    /// Pushes the bytes processed since the previous tick into the window.
    fn sample(&self, at: Instant) -> ProgressRecord {
        {
            let mut sampling = lock(&self.sampling);
            let processed = self.processed.load(Ordering::Acquire);
            let delta = processed.saturating_sub(sampling.last_processed);
            sampling.last_processed = processed;
            sampling.window.add_sample(delta, at);
        }
        self.record()
    }

    fn record(&self) -> ProgressRecord {
        let processed = self.processed.load(Ordering::Acquire);
        let remaining = self.total_bytes.saturating_sub(processed);
        let (bytes_per_second, eta) = {
            let sampling = lock(&self.sampling);
            (
                sampling.window.bytes_per_second(),
                sampling.window.eta(remaining),
            )
        };

        let percent_complete = if self.total_bytes == 0 {
            100.0
        } else {
            (processed as f64 / self.total_bytes as f64 * 100.0).clamp(0.0, 100.0)
        };

        // No measurable throughput yet means no finite estimate.
        let remaining_duration = if remaining == 0 {
            Duration::ZERO
        } else {
            eta.unwrap_or(Duration::MAX)
        };

        ProgressRecord {
            percent_complete,
            remaining_duration,
            average_throughput_mbps: bytes_per_second / BYTES_PER_MB,
            bytes_processed: processed,
            total_bytes: self.total_bytes,
            workers: self.workers,
        }
    }

    fn offer(&self, record: ProgressRecord) {
        if let Some(tx) = lock(&self.sink).as_ref() {
            let _ = tx.try_send(record);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ThroughputWindow
// ---------------------------------------------------------------------------

struct Sample {
    bytes: u64,
    timestamp: Instant,
}

/// Average throughput over the most recent samples.
///
/// Each sample holds the bytes processed since the previous one; the oldest
/// retained sample only marks where the window begins.
pub struct ThroughputWindow {
    samples: VecDeque<Sample>,
    max_samples: usize,
}

impl ThroughputWindow {
    /// Creates a window keeping at most `max_samples` samples (at least 2).
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(2);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Records `bytes` processed up to `timestamp`.
    pub fn add_sample(&mut self, bytes: u64, timestamp: Instant) {
        self.samples.push_back(Sample { bytes, timestamp });
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Returns the average bytes/second across the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if self.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }

        let bytes: u64 = self.samples.iter().skip(1).map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates the time needed for `remaining_bytes` at the current rate.
    ///
    /// Returns `None` if the rate is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(remaining_bytes as f64 / speed).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn window_needs_two_samples() {
        let mut window = ThroughputWindow::new(10);
        assert_eq!(window.bytes_per_second(), 0.0);
        assert!(window.eta(1000).is_none());

        window.add_sample(500, Instant::now());
        assert_eq!(window.bytes_per_second(), 0.0);
    }

    #[test]
    fn window_averages_recent_samples_only() {
        let t0 = Instant::now();
        let mut window = ThroughputWindow::new(3);
        window.add_sample(0, t0);
        window.add_sample(100, t0 + Duration::from_secs(1));
        assert!(approx(window.bytes_per_second(), 100.0));

        window.add_sample(300, t0 + Duration::from_secs(2));
        assert!(approx(window.bytes_per_second(), 200.0));

        // The first sample falls out; the 100-byte sample becomes the baseline.
        window.add_sample(500, t0 + Duration::from_secs(3));
        assert!(approx(window.bytes_per_second(), 400.0));

        let eta = window.eta(800).unwrap();
        assert_eq!(eta, Duration::from_secs(2));
    }

    #[test]
    fn format_remaining_as_clock() {
        let record = ProgressRecord {
            percent_complete: 50.0,
            remaining_duration: Duration::from_secs(3 * 3600 + 7 * 60 + 9),
            average_throughput_mbps: 1.0,
            bytes_processed: 1,
            total_bytes: 2,
            workers: 1,
        };
        assert_eq!(record.format_remaining(), "03h:07m:09s");
    }

    #[tokio::test(start_paused = true)]
    async fn emits_record_each_interval() {
        let (tx, mut rx) = mpsc::channel(16);
        let tracker = ProgressTracker::start(ProgressConfig::default(), 4, 0, 10 * MIB, tx);

        tracker.report_bytes(MIB);
        let record = rx.recv().await.unwrap();

        assert_eq!(record.bytes_processed, MIB);
        assert_eq!(record.workers, 4);
        assert!(approx(record.percent_complete, 10.0));
        assert!(approx(record.average_throughput_mbps, 1.0));
        assert_eq!(record.remaining_duration, Duration::from_secs(9));

        tracker.close();
    }

    #[tokio::test(start_paused = true)]
    async fn initial_bytes_count_as_done_but_not_as_throughput() {
        let (tx, mut rx) = mpsc::channel(16);
        let tracker = ProgressTracker::start(ProgressConfig::default(), 1, 5 * MIB, 10 * MIB, tx);

        let record = rx.recv().await.unwrap();
        assert!(approx(record.percent_complete, 50.0));
        assert_eq!(record.average_throughput_mbps, 0.0);
        assert_eq!(record.remaining_duration, Duration::MAX);
        tracker.close();
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_after_close() {
        let (tx, mut rx) = mpsc::channel(16);
        let tracker = ProgressTracker::start(ProgressConfig::default(), 2, 0, 4 * MIB, tx);

        tracker.report_bytes(4 * MIB);
        tracker.close();
        tracker.close();
        tracker.report_bytes(MIB);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let last = rx.recv().await.unwrap();
        assert_eq!(last.bytes_processed, 4 * MIB);
        assert!(approx(last.percent_complete, 100.0));
        assert_eq!(last.remaining_duration, Duration::ZERO);
        assert!(rx.recv().await.is_none());
        assert!(tracker.is_closed());
        assert_eq!(tracker.bytes_processed(), 4 * MIB);
    }

    #[tokio::test(start_paused = true)]
    async fn percent_is_clamped() {
        let (tx, mut rx) = mpsc::channel(16);
        let tracker = ProgressTracker::start(ProgressConfig::default(), 1, 0, 100, tx);
        tracker.report_bytes(250);
        tracker.close();
        let record = rx.recv().await.unwrap();
        assert!(approx(record.percent_complete, 100.0));

        let (tx, mut rx) = mpsc::channel(16);
        let empty = ProgressTracker::start(ProgressConfig::default(), 1, 0, 0, tx);
        empty.close();
        assert!(approx(rx.recv().await.unwrap().percent_complete, 100.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reports_sum_exactly() {
        let (tx, _rx) = mpsc::channel(1);
        let tracker = ProgressTracker::start(ProgressConfig::default(), 8, 0, u64::MAX, tx);

        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let t = tracker.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..1000u64 {
                    t.report_bytes(worker + i % 7);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let expected: u64 = (0..8u64)
            .map(|w| (0..1000u64).map(|i| w + i % 7).sum::<u64>())
            .sum();
        assert_eq!(tracker.bytes_processed(), expected);
        tracker.close();
    }
}
