//! Bounded capture-to-callback frame pipeline.
//!
//! Frames are read back from a device with two ping-ponged buffers, handed
//! over a bounded queue to a single worker thread, transformed, and delivered
//! to a host callback. Frame buffers are recycled through a small pool.

pub mod capture;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{DoubleBufferedSource, Frame, ReadbackDevice, SoftwareDevice};
pub use error::{DeviceError, PipelineError, Result, TransformError};
pub use pipeline::{
    FramePool, FrameQueue, Pipeline, PipelineId, Registry, StatsSnapshot, SubmitOutcome,
    WorkerState,
};
pub use process::{
    ChannelSink, Delivery, FrameSink, FrameTransform, GrayscaleTransform, ProcessedFrame,
    ResultFrameType,
};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Prefix of environment variables overriding configuration values,
/// e.g. `READBACK_PIPELINE__QUEUE_CAPACITY=2`.
pub const ENV_PREFIX: &str = "READBACK";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub capture: CaptureConfig,
}

/// What the producer does when the queue is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Queue the new frame and recycle the oldest queued one.
    #[default]
    EvictOldest,
    /// Keep what is queued and recycle the new frame.
    DropNewest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub pool_capacity: usize,
    pub backpressure: BackpressurePolicy,
    pub worker_name: String,
    pub worker_core: Option<usize>, // CPU pinning for the worker thread
    pub default_result_type: ResultFrameType,
}

/// Frame source settings used by the demo binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: pipeline::MAX_QUEUED_FRAMES,
            pool_capacity: pipeline::MAX_POOL_SIZE,
            backpressure: BackpressurePolicy::EvictOldest,
            worker_name: "readback-worker".into(),
            worker_core: None,
            default_result_type: ResultFrameType::DstLine,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            duration_secs: 3,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// `READBACK_`-prefixed environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
            .map_err(PipelineError::from)
    }
}
