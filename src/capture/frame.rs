use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgba32 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

impl Frame {
    pub fn new(data: Bytes, sequence: u64, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * format.bytes_per_pixel() as u32,
                format,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    /// Return the pixel data as tightly-packed RGB24, converting from
    /// 4-channel (alpha dropped) or 1-channel (replicated) layouts
    pub fn to_rgb24(&self) -> Vec<u8> {
        match self.meta.format {
            PixelFormat::Rgb24 => self.data.to_vec(),
            PixelFormat::Rgba32 => {
                let mut rgb = Vec::with_capacity(self.data.len() / 4 * 3);
                for px in self.data.chunks_exact(4) {
                    rgb.extend_from_slice(&px[..3]);
                }
                rgb
            }
            PixelFormat::Gray8 => {
                let mut rgb = Vec::with_capacity(self.data.len() * 3);
                for &v in self.data.iter() {
                    rgb.extend_from_slice(&[v, v, v]);
                }
                rgb
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_drops_alpha() {
        let frame = Frame::new(
            Bytes::from_static(&[1, 2, 3, 255, 4, 5, 6, 0]),
            1,
            2,
            1,
            PixelFormat::Rgba32,
        );
        assert_eq!(frame.to_rgb24(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn gray_replicates_channels() {
        let frame = Frame::new(Bytes::from_static(&[7, 9]), 1, 2, 1, PixelFormat::Gray8);
        assert_eq!(frame.to_rgb24(), vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn rgb_passes_through() {
        let frame = Frame::new(
            Bytes::from_static(&[1, 2, 3, 4, 5, 6]),
            1,
            2,
            1,
            PixelFormat::Rgb24,
        );
        assert_eq!(frame.to_rgb24(), frame.data.to_vec());
        assert_eq!(frame.meta.stride, 6);
    }
}
