pub mod device;
pub mod frame;
pub mod readback;

pub use device::{DeviceBuffer, DeviceCounters, ReadbackDevice, SoftwareDevice};
pub use frame::Frame;
pub use frame::PixelFormat;
pub use readback::DoubleBufferedSource;
