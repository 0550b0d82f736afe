//! H.264 software decoding
//!
//! Wraps the openh264 decoder. The decoder holds a raw C handle and is not
//! `Send`, so it lives on the blocking thread that feeds it.

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use openh264::nal_units;
use tracing::{debug, trace};

use super::convert::i420_buffer_size;
use super::format::Resolution;
use super::frame::RawFrame;
use crate::error::{AppError, Result};

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub access_units: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
}

/// Annex-B H.264 to I420 decoder
pub struct H264Decoder {
    inner: Decoder,
    sequence: u64,
    last_resolution: Option<Resolution>,
    stats: DecoderStats,
}

impl H264Decoder {
    pub fn new() -> Result<Self> {
        let inner = Decoder::new()
            .map_err(|e| AppError::Decode(format!("failed to create H.264 decoder: {}", e)))?;
        Ok(Self {
            inner,
            sequence: 0,
            last_resolution: None,
            stats: DecoderStats::default(),
        })
    }

    /// Decode one access unit (Annex-B, start-code delimited)
    ///
    /// Returns every picture the decoder emitted; parameter-set-only units
    /// yield nothing. Errors on individual NAL units are counted and skipped
    /// so a single corrupt packet does not end the stream.
    pub fn decode(&mut self, access_unit: &[u8]) -> Vec<RawFrame> {
        self.stats.access_units += 1;
        let mut frames = Vec::new();

        for nal in nal_units(access_unit) {
            match self.inner.decode(nal) {
                Ok(Some(yuv)) => {
                    let (width, height) = yuv.dimensions();
                    let resolution = Resolution::new(width as u32, height as u32);
                    if !resolution.is_valid_420() {
                        trace!("Skipping decoded picture with odd size {}", resolution);
                        continue;
                    }
                    if self.last_resolution != Some(resolution) {
                        debug!("Decoder output resolution: {}", resolution);
                        self.last_resolution = Some(resolution);
                    }

                    let data = pack_i420(&yuv, width, height);
                    self.sequence += 1;
                    self.stats.frames_decoded += 1;
                    frames.push(RawFrame::new(data, resolution, self.sequence));
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.decode_errors += 1;
                    trace!("H.264 decode error: {}", e);
                }
            }
        }

        frames
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }
}

/// Copy stride-padded decoder planes into a tightly packed I420 buffer
fn pack_i420(yuv: &impl YUVSource, width: usize, height: usize) -> Vec<u8> {
    let (y_stride, u_stride, v_stride) = yuv.strides();
    let (cw, ch) = (width / 2, height / 2);
    let mut out = Vec::with_capacity(i420_buffer_size(width, height));

    copy_plane(&mut out, yuv.y(), y_stride, width, height);
    copy_plane(&mut out, yuv.u(), u_stride, cw, ch);
    copy_plane(&mut out, yuv.v(), v_stride, cw, ch);
    out
}

fn copy_plane(out: &mut Vec<u8>, plane: &[u8], stride: usize, width: usize, rows: usize) {
    for row in 0..rows {
        let start = row * stride;
        out.extend_from_slice(&plane[start..start + width]);
    }
}
