//! Bounded blocking frame queue between the capture side and the worker

use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

use crate::capture::Frame;
use crate::utils::now_millis;

/// Default number of frames waiting for the worker.
pub const MAX_QUEUED_FRAMES: usize = 1;

struct Queued {
    frame: Frame,
    enqueued_at_ms: u64,
}

struct QueueState {
    ring: HeapRb<Queued>,
    last_enqueue_ms: u64,
    shut_down: bool,
}

/// FIFO of captured frames with overwrite-oldest overflow.
///
/// The producer never blocks: a push into a full queue evicts the head and
/// hands it back. The consumer blocks in [`pop`](Self::pop) until a frame
/// arrives or the queue is shut down.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl FrameQueue {
    /// Capacity is clamped to at least one frame.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                ring: HeapRb::new(capacity.max(1)),
                last_enqueue_ms: 0,
                shut_down: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append a frame, returning the evicted head if the queue was full.
    ///
    /// While the queue is shut down nothing is accepted and the frame itself
    /// comes straight back.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Some(frame);
        }

        let now = now_millis();
        state.last_enqueue_ms = now;
        let evicted = state.ring.push_overwrite(Queued {
            frame,
            enqueued_at_ms: now,
        });
        self.available.notify_one();

        evicted.map(|q| q.frame)
    }

    /// Block until a frame is available, returning it with its enqueue time.
    ///
    /// Returns `None` on a wake-up that finds the queue empty, and whenever
    /// the queue is shut down.
    pub fn pop(&self) -> Option<(Frame, u64)> {
        let mut state = self.state.lock();
        if state.ring.is_empty() && !state.shut_down {
            self.available.wait(&mut state);
        }
        if state.shut_down {
            return None;
        }

        state.ring.try_pop().map(|q| (q.frame, q.enqueued_at_ms))
    }

    /// Non-blocking variant of [`pop`](Self::pop).
    pub fn try_pop(&self) -> Option<(Frame, u64)> {
        let mut state = self.state.lock();
        if state.shut_down {
            return None;
        }
        state.ring.try_pop().map(|q| (q.frame, q.enqueued_at_ms))
    }

    pub fn can_accept(&self) -> bool {
        let state = self.state.lock();
        !state.shut_down && !state.ring.is_full()
    }

    /// Drain every queued frame. The caller decides whether to recycle them.
    pub fn clear(&self) -> Vec<Frame> {
        let mut state = self.state.lock();
        std::iter::from_fn(|| state.ring.try_pop())
            .map(|q| q.frame)
            .collect()
    }

    /// Wake every blocked consumer and refuse further frames.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        self.available.notify_all();
    }

    /// Accept frames again after a [`shutdown`](Self::shutdown).
    pub fn reopen(&self) {
        self.state.lock().shut_down = false;
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Wall-clock time of the most recent push, in milliseconds since the epoch.
    pub fn last_enqueue_timestamp(&self) -> u64 {
        self.state.lock().last_enqueue_ms
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity().get()
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(MAX_QUEUED_FRAMES)
    }
}
