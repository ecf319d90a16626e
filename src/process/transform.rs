//! Per-frame transform stage

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::capture::frame::byte_size;
use crate::capture::Frame;
use crate::error::TransformError;

/// Which image the worker hands to the sink alongside its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFrameType {
    /// Numeric results only, no image.
    None,
    Src,
    Dst,
    SrcLine,
    #[default]
    DstLine,
}

impl ResultFrameType {
    /// Number of recognised modes.
    pub const COUNT: i32 = 5;

    /// Map an arbitrary host integer onto a mode, modulo [`Self::COUNT`].
    pub fn from_value(value: i32) -> Self {
        match value.rem_euclid(Self::COUNT) {
            0 => ResultFrameType::None,
            1 => ResultFrameType::Src,
            2 => ResultFrameType::Dst,
            3 => ResultFrameType::SrcLine,
            _ => ResultFrameType::DstLine,
        }
    }

    pub fn value(self) -> i32 {
        self as i32
    }
}

/// Output of a transform, handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub kind: ResultFrameType,
}

impl ProcessedFrame {
    /// A result that carries no image.
    pub fn empty(kind: ResultFrameType) -> Self {
        Self {
            data: Bytes::new(),
            width: 0,
            height: 0,
            kind,
        }
    }
}

/// Pluggable per-frame computation run on the worker thread.
pub trait FrameTransform: Send {
    fn transform(
        &mut self,
        frame: &Frame,
        kind: ResultFrameType,
    ) -> Result<ProcessedFrame, TransformError>;
}

impl<F> FrameTransform for F
where
    F: FnMut(&Frame, ResultFrameType) -> Result<ProcessedFrame, TransformError> + Send,
{
    fn transform(
        &mut self,
        frame: &Frame,
        kind: ResultFrameType,
    ) -> Result<ProcessedFrame, TransformError> {
        self(frame, kind)
    }
}

/// RGBA to luma and back to RGBA.
#[derive(Debug, Default)]
pub struct GrayscaleTransform;

impl GrayscaleTransform {
    pub fn new() -> Self {
        Self
    }

    fn to_gray_rgba(src: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(src.len());
        for px in src.chunks_exact(4) {
            // BT.601 weights in 8-bit fixed point
            let y = ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8) as u8;
            out.extend_from_slice(&[y, y, y, 255]);
        }
        out
    }
}

impl FrameTransform for GrayscaleTransform {
    fn transform(
        &mut self,
        frame: &Frame,
        kind: ResultFrameType,
    ) -> Result<ProcessedFrame, TransformError> {
        let expected = byte_size(frame.width, frame.height).unwrap_or(0);
        if frame.data.len() != expected || expected == 0 {
            return Err(TransformError::Recoverable(format!(
                "{}x{} frame holds {} bytes, expected {}",
                frame.width,
                frame.height,
                frame.data.len(),
                expected
            )));
        }

        let data = match kind {
            ResultFrameType::None => return Ok(ProcessedFrame::empty(kind)),
            ResultFrameType::Src | ResultFrameType::SrcLine => {
                Bytes::copy_from_slice(&frame.data)
            }
            ResultFrameType::Dst | ResultFrameType::DstLine => {
                Bytes::from(Self::to_gray_rgba(&frame.data))
            }
        };

        Ok(ProcessedFrame {
            data,
            width: frame.width,
            height: frame.height,
            kind,
        })
    }
}
