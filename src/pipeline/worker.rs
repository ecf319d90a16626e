//! Background worker draining the frame queue

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::processor::Shared;
use crate::error::TransformError;
use crate::process::FrameTransform;
use crate::utils::pin_current_thread;

/// Lifecycle of a pipeline's worker thread.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`. A worker that
/// exits on a fatal error parks the pipeline in `Stopping` until `stop()`
/// joins it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

pub(crate) struct AtomicWorkerState(AtomicU8);

impl AtomicWorkerState {
    pub(crate) fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> WorkerState {
        match self.0.load(Ordering::Acquire) {
            0 => WorkerState::Stopped,
            1 => WorkerState::Starting,
            2 => WorkerState::Running,
            _ => WorkerState::Stopping,
        }
    }

    pub(crate) fn store(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`, failing if another transition got there first.
    pub(crate) fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Debug)]
enum Exit {
    Stopped,
    Fatal,
}

/// Worker thread body.
pub(crate) fn run(shared: Arc<Shared>, core: Option<usize>) {
    if let Some(core) = core {
        pin_current_thread(core);
    }

    let Some(mut transform) = shared.transform.lock().take() else {
        error!("No transform available, worker exiting");
        shared.state.store(WorkerState::Stopping);
        shared.running.store(false, Ordering::Release);
        return;
    };

    info!("Worker started");
    let exit = process_frames(&shared, transform.as_mut());
    *shared.transform.lock() = Some(transform);

    if let Exit::Fatal = exit {
        shared.state.store(WorkerState::Stopping);
        shared.running.store(false, Ordering::Release);
    }
    info!(?exit, "Worker exiting");
}

fn process_frames(shared: &Shared, transform: &mut dyn FrameTransform) -> Exit {
    while shared.running.load(Ordering::Acquire) {
        let Some((frame, timestamp_ms)) = shared.queue.pop() else {
            continue;
        };
        if !shared.running.load(Ordering::Acquire) {
            shared.pool.release(frame);
            break;
        }

        // Copy the mode out so the lock is not held during the transform.
        let kind = *shared.params.lock();
        let started = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let result = transform.transform(&frame, kind)?;
            if shared.running.load(Ordering::Acquire) {
                shared.sink.deliver(result, timestamp_ms);
            }
            Ok::<_, TransformError>(())
        }));

        metrics::histogram!("readback_transform_time_us")
            .record(started.elapsed().as_micros() as f64);
        shared.pool.release(frame);

        match outcome {
            Ok(Ok(())) => {
                shared.stats.record_processed();
                debug!(timestamp_ms, "Frame processed");
            }
            Ok(Err(e)) if !e.is_fatal() => {
                shared.stats.record_failed();
                warn!("Dropping frame: {}", e);
            }
            Ok(Err(e)) => {
                shared.stats.record_failed();
                error!("Stopping worker: {}", e);
                return Exit::Fatal;
            }
            Err(payload) => {
                shared.stats.record_failed();
                error!("Stopping worker after panic: {}", panic_message(&*payload));
                return Exit::Fatal;
            }
        }
    }

    Exit::Stopped
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
