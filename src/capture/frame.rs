use serde::{Deserialize, Serialize};

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// A mutable RGBA pixel buffer moved between pipeline stages.
///
/// Frames are never shared: the pool, the source, the queue and the worker
/// hand them to each other by value.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Allocate a zeroed frame of the given shape. A shape whose byte size
    /// overflows `usize` yields an empty frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; byte_size(width, height).unwrap_or(0)],
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has_shape(&self, width: u32, height: u32) -> bool {
        self.width == width
            && self.height == height
            && byte_size(width, height) == Some(self.data.len())
    }

    pub fn stride(&self) -> usize {
        self.width as usize * PixelFormat::Rgba8.bytes_per_pixel()
    }
}

/// Size in bytes of an RGBA frame, or `None` if it does not fit in `usize`.
pub fn byte_size(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(PixelFormat::Rgba8.bytes_per_pixel())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_frame_is_zeroed_and_shaped() {
        let frame = Frame::new(4, 3);
        assert_eq!(frame.data.len(), 48);
        assert!(frame.data.iter().all(|&b| b == 0));
        assert!(frame.has_shape(4, 3));
        assert!(!frame.has_shape(3, 4));
        assert_eq!(frame.stride(), 16);
    }

    #[test]
    fn byte_size_reports_overflow() {
        assert_eq!(byte_size(640, 480), Some(640 * 480 * 4));
        assert_eq!(byte_size(0, 480), Some(0));
        assert_eq!(byte_size(u32::MAX, u32::MAX), None);

        let frame = Frame::new(u32::MAX, u32::MAX);
        assert!(frame.is_empty());
        assert!(!frame.has_shape(u32::MAX, u32::MAX));
    }

    #[test]
    fn default_frame_is_empty() {
        assert!(Frame::default().is_empty());
    }
}
