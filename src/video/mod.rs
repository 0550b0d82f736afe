//! Received video handling
//!
//! Decoded frames arrive as planar I420 and are converted to packed RGB24
//! before inference.

pub mod convert;
pub mod decoder;
pub mod format;
pub mod frame;

pub use convert::{i420_buffer_size, i420_to_rgb24};
pub use decoder::H264Decoder;
pub use format::Resolution;
pub use frame::{RawFrame, RgbFrame};
