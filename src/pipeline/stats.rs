//! Frame counters for a pipeline instance

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    queued: AtomicU64,
    evicted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Processing rate bookkeeping, relative to the last reset and the last
/// `update_fps` call.
struct RateWindow {
    reset_at: Instant,
    reset_processed: u64,
    window_at: Instant,
    window_processed: u64,
    fps: f64,
}

impl RateWindow {
    fn new(now: Instant, processed: u64) -> Self {
        Self {
            reset_at: now,
            reset_processed: processed,
            window_at: now,
            window_processed: processed,
            fps: 0.0,
        }
    }
}

/// Counters updated from both the producer and the worker thread.
///
/// Every update is mirrored to the `metrics` facade.
pub struct PipelineStats {
    counters: CachePadded<Counters>,
    rate: Mutex<RateWindow>,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Frames read back from the device.
    pub captured: u64,
    /// Frames accepted by the queue.
    pub queued: u64,
    /// Queued frames overwritten by a newer one before the worker got to them.
    pub evicted: u64,
    /// Frames discarded on the capture side.
    pub dropped: u64,
    /// Frames transformed and delivered.
    pub processed: u64,
    /// Frames whose transform or delivery failed.
    pub failed: u64,
    /// Processing rate over the interval ending at the last `update_fps`.
    pub fps: f64,
    /// Processing rate since the last rate reset.
    pub total_fps: f64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            counters: CachePadded::new(Counters::default()),
            rate: Mutex::new(RateWindow::new(Instant::now(), 0)),
        }
    }

    pub fn record_captured(&self) {
        self.counters.captured.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("readback_frames_captured").increment(1);
    }

    pub fn record_queued(&self) {
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("readback_frames_queued").increment(1);
    }

    pub fn record_evicted(&self) {
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("readback_frames_evicted").increment(1);
    }

    pub fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("readback_frames_dropped").increment(1);
    }

    pub fn record_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("readback_frames_processed").increment(1);
    }

    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("readback_frames_failed").increment(1);
    }

    /// Restart rate measurement from now. Counters are left alone.
    pub fn reset_rate(&self) {
        self.reset_rate_at(Instant::now());
    }

    fn reset_rate_at(&self, now: Instant) {
        let processed = self.counters.processed.load(Ordering::Relaxed);
        *self.rate.lock() = RateWindow::new(now, processed);
    }

    /// Close the current measuring interval and return its processing rate.
    pub fn update_fps(&self) -> f64 {
        self.update_fps_at(Instant::now())
    }

    fn update_fps_at(&self, now: Instant) -> f64 {
        let processed = self.counters.processed.load(Ordering::Relaxed);
        let mut rate = self.rate.lock();
        let secs = now.saturating_duration_since(rate.window_at).as_secs_f64();
        if secs > 0.0 {
            rate.fps = processed.saturating_sub(rate.window_processed) as f64 / secs;
            rate.window_at = now;
            rate.window_processed = processed;
        }
        metrics::gauge!("readback_processing_fps").set(rate.fps);
        rate.fps
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> StatsSnapshot {
        let c = &self.counters;
        let processed = c.processed.load(Ordering::Relaxed);
        let rate = self.rate.lock();
        let secs = now.saturating_duration_since(rate.reset_at).as_secs_f64();
        let total_fps = if secs > 0.0 {
            processed.saturating_sub(rate.reset_processed) as f64 / secs
        } else {
            0.0
        };

        StatsSnapshot {
            captured: c.captured.load(Ordering::Relaxed),
            queued: c.queued.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            processed,
            failed: c.failed.load(Ordering::Relaxed),
            fps: rate.fps,
            total_fps,
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
