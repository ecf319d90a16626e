use flume::{Sender, TrySendError};
use tracing::debug;

use super::transform::ProcessedFrame;

/// Receives transform results.
///
/// Called on the pipeline's worker thread, at whatever rate frames are
/// processed. Implementations must not assume any particular thread.
pub trait FrameSink: Send + Sync {
    fn deliver(&self, result: ProcessedFrame, timestamp_ms: u64);
}

impl<F> FrameSink for F
where
    F: Fn(ProcessedFrame, u64) + Send + Sync,
{
    fn deliver(&self, result: ProcessedFrame, timestamp_ms: u64) {
        self(result, timestamp_ms)
    }
}

/// A delivered result together with the enqueue time of its source frame.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub frame: ProcessedFrame,
    pub timestamp_ms: u64,
}

/// Forwards results into a flume channel without ever blocking the worker.
///
/// With a bounded channel, results are dropped while the receiver lags.
pub struct ChannelSink {
    tx: Sender<Delivery>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Delivery>) -> Self {
        Self { tx }
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&self, frame: ProcessedFrame, timestamp_ms: u64) {
        match self.tx.try_send(Delivery {
            frame,
            timestamp_ms,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics::counter!("readback_deliveries_dropped").increment(1);
                debug!("Result channel full, dropping delivery");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Result channel closed, dropping delivery");
            }
        }
    }
}
