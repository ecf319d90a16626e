//! Double-buffered asynchronous readback
//!
//! Each capture cycle requests a read into one device buffer while copying
//! out the other, which was requested a cycle earlier. The consumer sees
//! frames one cycle late, but the producer never stalls waiting for the
//! device to finish a read.

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::capture::device::{DeviceBuffer, ReadbackDevice};
use crate::capture::frame::{byte_size, Frame};
use crate::error::DeviceError;
use crate::pipeline::{FramePool, FrameQueue};

struct SourceState {
    device: Box<dyn ReadbackDevice>,
    slots: Option<[DeviceBuffer; 2]>,
    active_index: usize,
    width: u32,
    height: u32,
    byte_size: usize,
}

impl SourceState {
    fn release_slots(&mut self) {
        if let Some(slots) = self.slots.take() {
            for slot in slots {
                self.device.release_buffer(slot);
            }
        }
    }
}

/// Ping-pong pair of device read targets.
///
/// All shape changes go through a lock of their own, separate from the frame
/// queue, since reconfiguration can race a capture cycle running on another
/// thread.
pub struct DoubleBufferedSource {
    state: Mutex<SourceState>,
}

impl DoubleBufferedSource {
    pub fn new<D: ReadbackDevice + 'static>(device: D) -> Self {
        Self {
            state: Mutex::new(SourceState {
                device: Box::new(device),
                slots: None,
                active_index: 0,
                width: 0,
                height: 0,
                byte_size: 0,
            }),
        }
    }

    /// Allocate both read targets for frames of `width` x `height`.
    #[instrument(skip(self))]
    pub fn init_frame(&self, width: u32, height: u32) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.release_slots();
        state.byte_size = 0;

        let size = byte_size(width, height).ok_or_else(|| DeviceError::Allocation {
            size: usize::MAX,
            reason: format!("{width}x{height} frame size overflows"),
        })?;
        let first = state.device.acquire_buffer(size)?;
        let second = match state.device.acquire_buffer(size) {
            Ok(buffer) => buffer,
            Err(e) => {
                state.device.release_buffer(first);
                return Err(e);
            }
        };

        state.slots = Some([first, second]);
        state.active_index = 0;
        state.width = width;
        state.height = height;
        state.byte_size = size;

        info!(size, "Readback buffers ready");
        Ok(())
    }

    /// Free both read targets and wake anyone waiting for a frame.
    pub fn release_frame(&self, queue: &FrameQueue) {
        {
            let mut state = self.state.lock();
            state.byte_size = 0;
            state.release_slots();
            state.width = 0;
            state.height = 0;
        }

        queue.shutdown();
        debug!("Readback buffers released");
    }

    /// Run one readback cycle, returning the frame requested on the previous
    /// cycle. Returns `None` when the frame is dropped.
    pub fn capture_cycle(&self, pool: &FramePool) -> Option<Frame> {
        let mut state = self.state.lock();
        let slots = match state.slots {
            Some(slots) if state.byte_size > 0 => slots,
            _ => return None,
        };

        let (width, height) = (state.width, state.height);
        let mut frame = pool.acquire(width, height);

        let read_ix = state.active_index;
        let next_ix = (read_ix + 1) % 2;

        if let Err(e) = state.device.read_async(slots[next_ix], width, height) {
            drop(state);
            warn!("Readback request failed: {}", e);
            pool.release(frame);
            return None;
        }

        let mapped = state.device.map_and_copy(slots[read_ix], &mut frame.data);
        state.active_index = next_ix;
        drop(state);

        if mapped {
            Some(frame)
        } else {
            warn!(slot = read_ix, "Failed to map readback buffer");
            pool.release(frame);
            None
        }
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().byte_size > 0
    }

    /// Current frame shape, if buffers are allocated.
    pub fn shape(&self) -> Option<(u32, u32)> {
        let state = self.state.lock();
        (state.byte_size > 0).then_some((state.width, state.height))
    }

    pub fn active_index(&self) -> usize {
        self.state.lock().active_index
    }
}
