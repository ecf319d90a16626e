pub mod pool;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod worker;

pub use pool::{FramePool, MAX_POOL_SIZE};
pub use processor::{Pipeline, SubmitOutcome};
pub use queue::{FrameQueue, MAX_QUEUED_FRAMES};
pub use registry::{PipelineId, Registry};
pub use stats::StatsSnapshot;
pub use worker::WorkerState;
