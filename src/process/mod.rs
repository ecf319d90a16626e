pub mod sink;
pub mod transform;

pub use sink::{ChannelSink, Delivery, FrameSink};
pub use transform::{FrameTransform, GrayscaleTransform, ProcessedFrame, ResultFrameType};
