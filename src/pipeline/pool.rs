//! Bounded recycling pool for frame buffers

use parking_lot::Mutex;
use tracing::trace;

use crate::capture::Frame;

/// Default number of frames kept for reuse.
pub const MAX_POOL_SIZE: usize = 2;

/// Bag of returned frames, reused LIFO so the hottest buffer goes out first.
pub struct FramePool {
    frames: Mutex<Vec<Frame>>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a frame of the requested shape, reusing a pooled buffer if one
    /// matches. Pooled buffers of any other shape are discarded.
    pub fn acquire(&self, width: u32, height: u32) -> Frame {
        let mut frames = self.frames.lock();
        while let Some(frame) = frames.pop() {
            if frame.has_shape(width, height) {
                return frame;
            }
            trace!(
                stale_width = frame.width,
                stale_height = frame.height,
                "Discarding stale pooled frame"
            );
        }
        drop(frames);

        trace!(width, height, "Allocating frame");
        Frame::new(width, height)
    }

    /// Return a frame for reuse. Dropped if the pool is full or the frame is empty.
    pub fn release(&self, frame: Frame) {
        if frame.is_empty() {
            return;
        }

        let mut frames = self.frames.lock();
        if frames.len() < self.capacity {
            frames.push(frame);
        }
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(MAX_POOL_SIZE)
    }
}
