//! Video frame data structures

use bytes::Bytes;
use std::time::Instant;

use super::format::Resolution;

/// A decoded frame in planar YUV 4:2:0 (I420) layout
///
/// Transient: owned by whichever pipeline stage currently holds it and
/// released when that stage drops it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Y plane followed by U and V planes, tightly packed
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Decoder output sequence number
    pub sequence: u64,
    /// Time the frame left the decoder
    pub decoded_at: Instant,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, resolution: Resolution, sequence: u64) -> Self {
        Self {
            data: data.into(),
            resolution,
            sequence,
            decoded_at: Instant::now(),
        }
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }
}

/// Packed interleaved RGB24 frame (`width * height * 3` bytes)
#[derive(Debug, Clone)]
pub struct RgbFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Self {
            data,
            width,
            height,
        }
    }

    /// Solid-colour frame, mostly useful for tests and warm-up
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height)
    }

    /// RGB value at pixel (x, y)
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * self.width as usize + x) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}
