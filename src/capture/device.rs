//! Device-side readback targets
//!
//! A [`ReadbackDevice`] owns the buffers that framebuffer contents are read
//! into. Reads are requested asynchronously and collected later by mapping the
//! buffer, which is what lets the capture side overlap device latency with
//! the copy-out of the previous frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::error::DeviceError;

/// Opaque handle to a device-side buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceBuffer(pub u32);

/// Asynchronous readback primitive provided by the host.
pub trait ReadbackDevice: Send {
    /// Allocate a read target of `size` bytes.
    fn acquire_buffer(&mut self, size: usize) -> Result<DeviceBuffer, DeviceError>;

    fn release_buffer(&mut self, buffer: DeviceBuffer);

    /// Request an asynchronous read of the current framebuffer into `buffer`.
    fn read_async(
        &mut self,
        buffer: DeviceBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError>;

    /// Map `buffer` and copy its contents into `dst`.
    ///
    /// Returns `false` when the buffer could not be mapped.
    fn map_and_copy(&mut self, buffer: DeviceBuffer, dst: &mut [u8]) -> bool;
}

impl<D: ReadbackDevice + ?Sized> ReadbackDevice for Box<D> {
    fn acquire_buffer(&mut self, size: usize) -> Result<DeviceBuffer, DeviceError> {
        (**self).acquire_buffer(size)
    }

    fn release_buffer(&mut self, buffer: DeviceBuffer) {
        (**self).release_buffer(buffer)
    }

    fn read_async(
        &mut self,
        buffer: DeviceBuffer,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError> {
        (**self).read_async(buffer, width, height)
    }

    fn map_and_copy(&mut self, buffer: DeviceBuffer, dst: &mut [u8]) -> bool {
        (**self).map_and_copy(buffer, dst)
    }
}

/// Live counters of a [`SoftwareDevice`], readable after the device has been
/// moved into a pipeline.
#[derive(Debug, Default)]
pub struct DeviceCounters {
    live_buffers: AtomicUsize,
    reads: AtomicU64,
}

impl DeviceCounters {
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::Acquire)
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }
}

/// In-memory device used by the demo binary and the tests.
///
/// Every read request renders a flat frame whose first eight bytes carry the
/// request's sequence number (starting at 1), so the consumer can tell which
/// request a frame came from.
pub struct SoftwareDevice {
    buffers: HashMap<u32, Vec<u8>>,
    next_id: u32,
    sequence: u64,
    max_allocation: Option<usize>,
    counters: Arc<DeviceCounters>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_id: 1,
            sequence: 0,
            max_allocation: None,
            counters: Arc::new(DeviceCounters::default()),
        }
    }

    /// Reject allocations larger than `bytes`.
    pub fn with_allocation_limit(mut self, bytes: usize) -> Self {
        self.max_allocation = Some(bytes);
        self
    }

    pub fn counters(&self) -> Arc<DeviceCounters> {
        Arc::clone(&self.counters)
    }

    /// Sequence number stamped into a frame produced by this device.
    ///
    /// `0` means the buffer was mapped before any read had landed in it.
    pub fn sequence_of(data: &[u8]) -> Option<u64> {
        let stamp: [u8; 8] = data.get(..8)?.try_into().ok()?;
        Some(u64::from_le_bytes(stamp))
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadbackDevice for SoftwareDevice {
    fn acquire_buffer(&mut self, size: usize) -> Result<DeviceBuffer, DeviceError> {
        if let Some(limit) = self.max_allocation {
            if size > limit {
                return Err(DeviceError::Allocation {
                    size,
                    reason: format!("exceeds limit of {limit} bytes"),
                });
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(id, vec![0; size]);
        self.counters.live_buffers.fetch_add(1, Ordering::AcqRel);
        trace!(id, size, "Allocated device buffer");
        Ok(DeviceBuffer(id))
    }

    fn release_buffer(&mut self, buffer: DeviceBuffer) {
        if self.buffers.remove(&buffer.0).is_some() {
            self.counters.live_buffers.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn read_async(
        &mut self,
        buffer: DeviceBuffer,
        _width: u32,
        _height: u32,
    ) -> Result<(), DeviceError> {
        let target = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(DeviceError::UnknownBuffer(buffer.0))?;

        self.sequence += 1;
        target.fill(self.sequence as u8);
        if target.len() >= 8 {
            target[..8].copy_from_slice(&self.sequence.to_le_bytes());
        }
        self.counters.reads.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn map_and_copy(&mut self, buffer: DeviceBuffer, dst: &mut [u8]) -> bool {
        match self.buffers.get(&buffer.0) {
            Some(src) if src.len() == dst.len() => {
                dst.copy_from_slice(src);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_then_map_returns_stamped_frame() {
        let mut device = SoftwareDevice::new();
        let buf = device.acquire_buffer(16).unwrap();
        device.read_async(buf, 2, 2).unwrap();

        let mut out = vec![0u8; 16];
        assert!(device.map_and_copy(buf, &mut out));
        assert_eq!(SoftwareDevice::sequence_of(&out), Some(1));
        assert_eq!(out[15], 1);
    }

    #[test]
    fn map_rejects_size_mismatch() {
        let mut device = SoftwareDevice::new();
        let buf = device.acquire_buffer(16).unwrap();
        let mut out = vec![0u8; 8];
        assert!(!device.map_and_copy(buf, &mut out));
    }

    #[test]
    fn allocation_limit_is_enforced() {
        let mut device = SoftwareDevice::new().with_allocation_limit(8);
        assert!(matches!(
            device.acquire_buffer(16),
            Err(DeviceError::Allocation { size: 16, .. })
        ));
        assert!(device.acquire_buffer(8).is_ok());
    }

    #[test]
    fn counters_track_live_buffers() {
        let mut device = SoftwareDevice::new();
        let counters = device.counters();
        let a = device.acquire_buffer(4).unwrap();
        let b = device.acquire_buffer(4).unwrap();
        assert_eq!(counters.live_buffers(), 2);
        device.release_buffer(a);
        device.release_buffer(a);
        assert_eq!(counters.live_buffers(), 1);
        device.release_buffer(b);
        assert_eq!(counters.live_buffers(), 0);
    }

    #[test]
    fn read_into_unknown_buffer_fails() {
        let mut device = SoftwareDevice::new();
        assert!(matches!(
            device.read_async(DeviceBuffer(42), 1, 1),
            Err(DeviceError::UnknownBuffer(42))
        ));
    }
}
