use thiserror::Error;

/// Failures reported by a [`ReadbackDevice`](crate::capture::ReadbackDevice).
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device buffer allocation failed ({size} bytes): {reason}")]
    Allocation { size: usize, reason: String },

    #[error("unknown device buffer {0}")]
    UnknownBuffer(u32),

    #[error("read request failed: {0}")]
    Read(String),
}

/// Errors raised by a frame transform.
///
/// The worker keeps running after a `Recoverable` failure and exits after a
/// `Fatal` one.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("malformed frame: {0}")]
    Recoverable(String),

    #[error("transform failed: {0}")]
    Fatal(String),
}

impl TransformError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransformError::Fatal(_))
    }
}

/// Pipeline lifecycle errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("invalid frame shape {width}x{height}")]
    InvalidShape { width: u32, height: u32 },

    #[error("device setup failed: {0}")]
    Device(#[from] DeviceError),

    #[error("transform was lost by a crashed worker")]
    TransformUnavailable,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("unknown pipeline id {0}")]
    UnknownPipeline(u64),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
