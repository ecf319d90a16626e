//! Pipeline composition root
//!
//! A [`Pipeline`] ties the readback source, frame queue, frame pool and worker
//! thread together and owns their lifecycles. The producer side calls
//! [`Pipeline::submit_capture_cycle`] once per rendered frame; the worker
//! drains the queue, runs the transform and hands results to the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

use super::stats::{PipelineStats, StatsSnapshot};
use super::worker::{self, AtomicWorkerState, WorkerState};
use super::{FramePool, FrameQueue};
use crate::capture::frame::byte_size;
use crate::capture::{DoubleBufferedSource, ReadbackDevice};
use crate::error::{PipelineError, Result};
use crate::process::{FrameSink, FrameTransform, ResultFrameType};
use crate::{BackpressurePolicy, PipelineConfig};

/// What happened to the frame captured by one submit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued for the worker.
    Queued,
    /// Queued, overwriting an older frame the worker had not picked up yet.
    Replaced,
    /// Nothing was queued.
    Dropped,
}

/// State shared between the pipeline handle and its worker thread.
pub(crate) struct Shared {
    pub(crate) queue: FrameQueue,
    pub(crate) pool: FramePool,
    pub(crate) source: DoubleBufferedSource,
    pub(crate) params: Mutex<ResultFrameType>,
    pub(crate) running: AtomicBool,
    pub(crate) state: AtomicWorkerState,
    pub(crate) stats: PipelineStats,
    pub(crate) sink: Arc<dyn FrameSink>,
    /// Taken by the worker while it runs, handed back when it exits.
    pub(crate) transform: Mutex<Option<Box<dyn FrameTransform>>>,
}

/// Bounded capture-to-callback frame pipeline.
pub struct Pipeline {
    shared: Arc<Shared>,
    /// Lifecycle lock; also holds the worker's join handle.
    worker: Mutex<Option<JoinHandle<()>>>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new<D, T, S>(config: PipelineConfig, device: D, transform: T, sink: S) -> Self
    where
        D: ReadbackDevice + 'static,
        T: FrameTransform + 'static,
        S: FrameSink + 'static,
    {
        let transform: Box<dyn FrameTransform> = Box::new(transform);
        let shared = Shared {
            queue: FrameQueue::new(config.queue_capacity),
            pool: FramePool::new(config.pool_capacity),
            source: DoubleBufferedSource::new(device),
            params: Mutex::new(config.default_result_type),
            running: AtomicBool::new(false),
            state: AtomicWorkerState::new(WorkerState::Stopped),
            stats: PipelineStats::new(),
            sink: Arc::new(sink),
            transform: Mutex::new(Some(transform)),
        };

        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
            config,
        }
    }

    /// Allocate readback buffers for `width` x `height` frames and spawn the
    /// worker thread.
    #[instrument(skip(self))]
    pub fn start(&self, width: u32, height: u32) -> Result<()> {
        let mut worker = self.worker.lock();

        if self.shared.running.load(Ordering::Acquire) {
            warn!("Pipeline already running");
            return Err(PipelineError::AlreadyRunning);
        }
        if worker.is_some() {
            warn!("Reaping worker that exited on its own");
            self.teardown(&mut worker);
        }
        if width == 0 || height == 0 || byte_size(width, height).is_none() {
            return Err(PipelineError::InvalidShape { width, height });
        }
        if self.shared.transform.lock().is_none() {
            return Err(PipelineError::TransformUnavailable);
        }

        self.shared.state.store(WorkerState::Starting);
        if let Err(e) = self.shared.source.init_frame(width, height) {
            error!("Failed to allocate readback buffers: {}", e);
            self.shared.state.store(WorkerState::Stopped);
            return Err(e.into());
        }

        // A producer racing the last stop may have left stale frames behind.
        self.shared.queue.clear();
        self.shared.queue.reopen();
        self.shared.stats.reset_rate();
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let core = self.config.worker_core;
        let spawned = thread::Builder::new()
            .name(self.config.worker_name.clone())
            .spawn(move || worker::run(shared, core));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                self.shared
                    .state
                    .transition(WorkerState::Starting, WorkerState::Running);
                info!("Pipeline started");
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn worker thread: {}", e);
                self.shared.running.store(false, Ordering::Release);
                self.shared.source.release_frame(&self.shared.queue);
                self.shared.state.store(WorkerState::Stopped);
                Err(PipelineError::Spawn(e))
            }
        }
    }

    /// Stop the worker and release all buffers.
    ///
    /// Blocks until the worker thread has exited; no result is delivered after
    /// this returns. Calling it on a stopped pipeline does nothing.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            debug!("Pipeline not running");
            return;
        }
        self.teardown(&mut worker);
    }

    fn teardown(&self, worker: &mut Option<JoinHandle<()>>) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.state.store(WorkerState::Stopping);
        self.shared.source.release_frame(&self.shared.queue);

        if let Some(handle) = worker.take() {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }

        self.shared.queue.clear();
        self.shared.pool.clear();
        self.shared.state.store(WorkerState::Stopped);
        info!("Pipeline stopped");
    }

    /// Producer entry point, called once per rendered frame.
    ///
    /// Never blocks on the worker.
    pub fn submit_capture_cycle(&self) -> SubmitOutcome {
        let shared = &*self.shared;

        let Some(frame) = shared.source.capture_cycle(&shared.pool) else {
            shared.stats.record_dropped();
            return SubmitOutcome::Dropped;
        };
        shared.stats.record_captured();

        if self.config.backpressure == BackpressurePolicy::DropNewest && !shared.queue.can_accept()
        {
            trace!("Queue full, dropping new frame");
            shared.pool.release(frame);
            shared.stats.record_dropped();
            return SubmitOutcome::Dropped;
        }

        match shared.queue.push(frame) {
            None => {
                shared.stats.record_queued();
                SubmitOutcome::Queued
            }
            Some(evicted) => {
                trace!("Queue full, evicted oldest frame");
                shared.pool.release(evicted);
                shared.stats.record_queued();
                shared.stats.record_evicted();
                SubmitOutcome::Replaced
            }
        }
    }

    /// Set the result mode from a host integer, modulo the number of modes.
    ///
    /// Takes effect from the next frame the worker picks up.
    pub fn set_parameter(&self, value: i32) {
        let kind = ResultFrameType::from_value(value);
        *self.shared.params.lock() = kind;
        debug!(?kind, "Result frame type set");
    }

    pub fn parameter(&self) -> ResultFrameType {
        *self.shared.params.lock()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state.load()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Processing rate since the previous call (or since `start`).
    pub fn update_fps(&self) -> f64 {
        self.shared.stats.update_fps()
    }

    /// Frame shape while readback buffers are allocated.
    pub fn shape(&self) -> Option<(u32, u32)> {
        self.shared.source.shape()
    }

    pub fn queued_frames(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn pooled_frames(&self) -> usize {
        self.shared.pool.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::capture::{Frame, SoftwareDevice};
    use crate::error::TransformError;
    use crate::process::{GrayscaleTransform, ProcessedFrame};

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    fn counting_sink() -> (Arc<AtomicUsize>, impl FrameSink) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink_count = Arc::clone(&count);
        let sink = move |_: ProcessedFrame, _: u64| {
            sink_count.fetch_add(1, Ordering::SeqCst);
        };
        (count, sink)
    }

    #[test]
    fn start_stop_cycle() {
        let (_, sink) = counting_sink();
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            GrayscaleTransform::new(),
            sink,
        );

        assert_eq!(pipeline.state(), WorkerState::Stopped);
        pipeline.start(16, 16).unwrap();
        assert!(pipeline.is_running());
        assert_eq!(pipeline.state(), WorkerState::Running);
        assert_eq!(pipeline.shape(), Some((16, 16)));

        pipeline.stop();
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.state(), WorkerState::Stopped);
        assert_eq!(pipeline.shape(), None);
    }

    #[test]
    fn second_start_is_rejected() {
        let (_, sink) = counting_sink();
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            GrayscaleTransform::new(),
            sink,
        );

        pipeline.start(8, 8).unwrap();
        assert!(matches!(
            pipeline.start(8, 8),
            Err(PipelineError::AlreadyRunning)
        ));
        pipeline.stop();
    }

    #[test]
    fn zero_shape_is_rejected() {
        let (_, sink) = counting_sink();
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            GrayscaleTransform::new(),
            sink,
        );
        assert!(matches!(
            pipeline.start(0, 10),
            Err(PipelineError::InvalidShape { .. })
        ));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn overflowing_shape_is_rejected() {
        let (_, sink) = counting_sink();
        let device = SoftwareDevice::new();
        let counters = device.counters();
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            device,
            GrayscaleTransform::new(),
            sink,
        );

        assert!(matches!(
            pipeline.start(u32::MAX, u32::MAX),
            Err(PipelineError::InvalidShape { .. })
        ));
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.state(), WorkerState::Stopped);
        assert_eq!(counters.live_buffers(), 0);

        pipeline.start(4, 4).unwrap();
        pipeline.stop();
    }

    #[test]
    fn device_allocation_failure_surfaces_from_start() {
        let (_, sink) = counting_sink();
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new().with_allocation_limit(64),
            GrayscaleTransform::new(),
            sink,
        );

        assert!(matches!(
            pipeline.start(640, 480),
            Err(PipelineError::Device(_))
        ));
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.state(), WorkerState::Stopped);
    }

    #[test]
    fn submit_while_stopped_drops() {
        let (_, sink) = counting_sink();
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            GrayscaleTransform::new(),
            sink,
        );
        assert_eq!(pipeline.submit_capture_cycle(), SubmitOutcome::Dropped);
        assert_eq!(pipeline.stats().dropped, 1);
    }

    #[test]
    fn fps_reflects_processed_frames() {
        let (count, sink) = counting_sink();
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            GrayscaleTransform::new(),
            sink,
        );

        pipeline.start(4, 4).unwrap();
        pipeline.submit_capture_cycle();
        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(5));

        assert!(pipeline.update_fps() > 0.0);
        let stats = pipeline.stats();
        assert!(stats.fps > 0.0);
        assert!(stats.total_fps > 0.0);
        pipeline.stop();
    }

    #[test]
    fn set_parameter_wraps_and_applies_to_next_frame() {
        let (tx, rx) = flume::unbounded();
        let sink = move |frame: ProcessedFrame, _: u64| {
            let _ = tx.send(frame.kind);
        };
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            GrayscaleTransform::new(),
            sink,
        );

        pipeline.set_parameter(ResultFrameType::COUNT + 1);
        assert_eq!(pipeline.parameter(), ResultFrameType::Src);

        pipeline.start(4, 4).unwrap();
        pipeline.submit_capture_cycle();
        let kind = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(kind, ResultFrameType::Src);
        pipeline.stop();
    }

    #[test]
    fn recoverable_errors_keep_the_worker_alive() {
        let (count, sink) = counting_sink();
        let mut calls = 0;
        let transform = move |frame: &Frame, kind: ResultFrameType| {
            calls += 1;
            if calls == 1 {
                return Err(TransformError::Recoverable("bad frame".into()));
            }
            Ok(ProcessedFrame {
                data: bytes::Bytes::new(),
                width: frame.width,
                height: frame.height,
                kind,
            })
        };
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            transform,
            sink,
        );

        pipeline.start(4, 4).unwrap();
        pipeline.submit_capture_cycle();
        assert!(wait_until(Duration::from_secs(2), || pipeline.stats().failed == 1));
        pipeline.submit_capture_cycle();
        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 1));
        assert!(pipeline.is_running());
        pipeline.stop();
    }

    #[test]
    fn fatal_error_stops_worker_until_stop() {
        let (count, sink) = counting_sink();
        let transform = |_: &Frame, _: ResultFrameType| -> std::result::Result<ProcessedFrame, TransformError> {
            Err(TransformError::Fatal("device lost".into()))
        };
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            transform,
            sink,
        );

        pipeline.start(4, 4).unwrap();
        pipeline.submit_capture_cycle();
        assert!(wait_until(Duration::from_secs(2), || !pipeline.is_running()));
        assert_eq!(pipeline.state(), WorkerState::Stopping);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        pipeline.stop();
        assert_eq!(pipeline.state(), WorkerState::Stopped);
        pipeline.start(4, 4).unwrap();
        assert!(pipeline.is_running());
        pipeline.stop();
    }

    #[test]
    fn panicking_transform_is_contained() {
        let (_, sink) = counting_sink();
        let transform = |_: &Frame, _: ResultFrameType| -> std::result::Result<ProcessedFrame, TransformError> {
            panic!("transform exploded")
        };
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            transform,
            sink,
        );

        pipeline.start(4, 4).unwrap();
        pipeline.submit_capture_cycle();
        assert!(wait_until(Duration::from_secs(2), || !pipeline.is_running()));

        // The faulted worker is reaped by the next start.
        pipeline.start(4, 4).unwrap();
        assert_eq!(pipeline.state(), WorkerState::Running);
        pipeline.stop();
    }

    #[test]
    fn drop_newest_policy_keeps_the_queued_frame() {
        let config = PipelineConfig {
            backpressure: BackpressurePolicy::DropNewest,
            ..PipelineConfig::default()
        };
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        let (count, sink) = counting_sink();
        let transform = move |frame: &Frame, kind: ResultFrameType| {
            // Hold the worker so the queue fills up behind it.
            let _ = gate_rx.recv();
            Ok::<_, TransformError>(ProcessedFrame {
                data: bytes::Bytes::new(),
                width: frame.width,
                height: frame.height,
                kind,
            })
        };
        let pipeline = Pipeline::new(config, SoftwareDevice::new(), transform, sink);

        pipeline.start(4, 4).unwrap();
        assert_eq!(pipeline.submit_capture_cycle(), SubmitOutcome::Queued);
        assert!(wait_until(Duration::from_secs(2), || pipeline.queued_frames() == 0));
        assert_eq!(pipeline.submit_capture_cycle(), SubmitOutcome::Queued);
        assert_eq!(pipeline.submit_capture_cycle(), SubmitOutcome::Dropped);

        drop(gate_tx);
        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 2));
        pipeline.stop();
    }

    #[test]
    fn evicted_frame_returns_to_the_pool() {
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        let (count, sink) = counting_sink();
        let transform = move |frame: &Frame, kind: ResultFrameType| {
            let _ = gate_rx.recv();
            Ok::<_, TransformError>(ProcessedFrame {
                data: bytes::Bytes::new(),
                width: frame.width,
                height: frame.height,
                kind,
            })
        };
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            SoftwareDevice::new(),
            transform,
            sink,
        );

        pipeline.start(4, 4).unwrap();
        assert_eq!(pipeline.submit_capture_cycle(), SubmitOutcome::Queued);
        // The worker now holds the first frame inside the gated transform.
        assert!(wait_until(Duration::from_secs(2), || pipeline.queued_frames() == 0));
        assert_eq!(pipeline.submit_capture_cycle(), SubmitOutcome::Queued);

        let pooled = pipeline.pooled_frames();
        assert_eq!(pipeline.submit_capture_cycle(), SubmitOutcome::Replaced);
        assert_eq!(pipeline.stats().evicted, 1);
        assert_eq!(pipeline.pooled_frames(), pooled + 1);
        assert_eq!(pipeline.queued_frames(), 1);

        drop(gate_tx);
        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) == 2));
        pipeline.stop();
    }
}
