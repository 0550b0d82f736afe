//! Pixel format conversion
//!
//! BT.601 limited-range YUV 4:2:0 to packed RGB24 using the usual 8-bit
//! fixed point coefficients.

use crate::error::{AppError, Result};

/// Byte length of a tightly packed I420 frame
pub fn i420_buffer_size(width: usize, height: usize) -> usize {
    width * height + 2 * (width / 2) * (height / 2)
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Convert a single YUV sample to RGB
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((298 * c + 409 * e + 128) >> 8),
        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((298 * c + 516 * d + 128) >> 8),
    ]
}

/// Convert a planar I420 buffer to packed RGB24
///
/// `data` holds the Y plane (`width * height`) followed by the U and V
/// planes (`width/2 * height/2` each). Trailing bytes are ignored.
/// Output is `width * height * 3` bytes, row-major.
pub fn i420_to_rgb24(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || w % 2 != 0 || h % 2 != 0 {
        return Err(AppError::Conversion(format!(
            "unsupported I420 dimensions {}x{}",
            width, height
        )));
    }

    let expected = i420_buffer_size(w, h);
    if data.len() < expected {
        return Err(AppError::Conversion(format!(
            "I420 buffer too small for {}x{}: {} < {}",
            width,
            height,
            data.len(),
            expected
        )));
    }

    let chroma_w = w / 2;
    let chroma_len = chroma_w * (h / 2);
    let (y_plane, rest) = data.split_at(w * h);
    let (u_plane, rest) = rest.split_at(chroma_len);
    let v_plane = &rest[..chroma_len];

    let mut rgb = vec![0u8; w * h * 3];
    for (row, out_row) in rgb.chunks_exact_mut(w * 3).enumerate() {
        let y_row = &y_plane[row * w..(row + 1) * w];
        let chroma_row = (row / 2) * chroma_w;
        for (col, out) in out_row.chunks_exact_mut(3).enumerate() {
            let ci = chroma_row + col / 2;
            out.copy_from_slice(&yuv_to_rgb(y_row[col], u_plane[ci], v_plane[ci]));
        }
    }

    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_i420(width: usize, height: usize, y: u8, u: u8, v: u8) -> Vec<u8> {
        let mut data = vec![y; width * height];
        data.extend(std::iter::repeat(u).take((width / 2) * (height / 2)));
        data.extend(std::iter::repeat(v).take((width / 2) * (height / 2)));
        data
    }

    #[test]
    fn test_output_length() {
        let data = solid_i420(8, 6, 128, 128, 128);
        assert_eq!(data.len(), i420_buffer_size(8, 6));
        let rgb = i420_to_rgb24(&data, 8, 6).unwrap();
        assert_eq!(rgb.len(), 8 * 6 * 3);
    }

    #[test]
    fn test_black_and_white_levels() {
        assert_eq!(yuv_to_rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(235, 128, 128), [255, 255, 255]);
    }

    #[test]
    fn test_clamps_out_of_range() {
        // Super-white and extreme chroma saturate instead of wrapping
        assert_eq!(yuv_to_rgb(255, 128, 128), [255, 255, 255]);
        assert_eq!(yuv_to_rgb(0, 128, 128), [0, 0, 0]);
        let [r, _, b] = yuv_to_rgb(128, 255, 255);
        assert_eq!(r, 255);
        assert_eq!(b, 255);
    }

    #[test]
    fn test_chroma_shared_per_2x2_block() {
        // 4x2: left block neutral chroma, right block strong red
        let mut data = vec![128u8; 8];
        data.extend_from_slice(&[128, 128]); // U
        data.extend_from_slice(&[128, 240]); // V
        let rgb = i420_to_rgb24(&data, 4, 2).unwrap();

        let px = |x: usize, y: usize| &rgb[(y * 4 + x) * 3..(y * 4 + x) * 3 + 3];
        assert_eq!(px(0, 0), px(1, 1));
        assert_eq!(px(2, 0), px(3, 1));
        assert!(px(2, 0)[0] > px(0, 0)[0]);
    }

    #[test]
    fn test_rejects_short_buffer() {
        let data = vec![0u8; 10];
        assert!(matches!(
            i420_to_rgb24(&data, 4, 4),
            Err(AppError::Conversion(_))
        ));
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        let data = vec![0u8; 64];
        assert!(i420_to_rgb24(&data, 3, 2).is_err());
        assert!(i420_to_rgb24(&data, 0, 2).is_err());
    }
}
