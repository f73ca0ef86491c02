use color_eyre::{eyre::eyre, Result};
use zune_jpeg::JpegDecoder;

use super::frame::{Frame, PixelFormat};

/// Decode raw device pixels into packed RGB24.
pub fn decode_frame(data: &[u8], format: PixelFormat, width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = (width * height * 3) as usize;

    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = JpegDecoder::new(data);
            let pixels = decoder.decode()?;
            if pixels.len() != expected {
                return Err(eyre!(
                    "Decoded MJPEG frame has {} bytes, expected {}x{} RGB",
                    pixels.len(),
                    width,
                    height
                ));
            }
            Ok(pixels)
        }
        PixelFormat::Rgb24 => {
            // Already in RGB format
            check_len(data, expected, format)?;
            Ok(data.to_vec())
        }
        PixelFormat::Bgr24 => {
            check_len(data, expected, format)?;
            Ok(data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect())
        }
        PixelFormat::Yuyv4 => {
            check_len(data, (width * height * 2) as usize, format)?;
            Ok(yuyv_to_rgb(data))
        }
        PixelFormat::Nv12 => Err(eyre!("Unsupported format: {:?}", format)),
    }
}

/// Decode a captured frame into a new RGB24 frame with the same metadata.
pub fn decode_to_rgb(frame: &Frame) -> Result<Frame> {
    if frame.format() == PixelFormat::Rgb24 {
        return Ok(frame.clone());
    }

    let rgb = decode_frame(&frame.data, frame.format(), frame.width(), frame.height())?;
    let mut meta = (*frame.meta).clone();
    meta.format = PixelFormat::Rgb24;
    meta.stride = meta.width * 3;

    Ok(Frame {
        data: rgb.into(),
        meta: meta.into(),
        timestamp: frame.timestamp,
    })
}

fn check_len(data: &[u8], expected: usize, format: PixelFormat) -> Result<()> {
    if data.len() < expected {
        return Err(eyre!(
            "Short {:?} frame: {} bytes, expected {}",
            format,
            data.len(),
            expected
        ));
    }
    Ok(())
}

/// YUYV 4:2:2 to RGB24, BT.601 limited range.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);

    for mp in data.chunks_exact(4) {
        let (y0, u, y1, v) = (mp[0], mp[1], mp[2], mp[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }

    rgb
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    [clamp(r), clamp(g), clamp(b)]
}

#[inline]
fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swizzled() {
        let rgb = decode_frame(&[1, 2, 3, 4, 5, 6], PixelFormat::Bgr24, 2, 1).unwrap();
        assert_eq!(rgb, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn yuyv_black_and_white() {
        // Y=16 is black, Y=235 is white with neutral chroma
        let rgb = decode_frame(&[16, 128, 235, 128], PixelFormat::Yuyv4, 2, 1).unwrap();
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert_eq!(&rgb[3..], &[255, 255, 255]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(decode_frame(&[0; 5], PixelFormat::Rgb24, 2, 1).is_err());
    }

    #[test]
    fn nv12_is_unsupported() {
        assert!(decode_frame(&[0; 6], PixelFormat::Nv12, 2, 2).is_err());
    }

    #[test]
    fn rgb_frames_pass_through() {
        let frame = Frame::from_pixels(vec![9; 12], 2, 2, PixelFormat::Rgb24, 3);
        let decoded = decode_to_rgb(&frame).unwrap();
        assert_eq!(decoded.data, frame.data);
        assert_eq!(decoded.meta.sequence, 3);
    }
}
