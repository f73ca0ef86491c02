//! Still image output

use std::path::Path;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::capture::frame::{Frame, PixelFormat};

#[derive(Debug, Error)]
pub enum ImageWriteError {
    #[error("cannot write {0:?} frames as images")]
    UnsupportedFormat(PixelFormat),

    #[error("frame buffer holds {actual} bytes, {width}x{height} needs {expected}")]
    ShortBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Encode(#[from] image::ImageError),
}

/// Encode `frame` to `path`; the container is picked from the extension.
#[instrument(skip(frame), fields(sequence = frame.meta.sequence))]
pub fn write_image(path: &Path, frame: &Frame) -> Result<(), ImageWriteError> {
    let rgb = packed_rgb(frame)?;
    let image = RgbImage::from_raw(frame.width(), frame.height(), rgb).ok_or(
        ImageWriteError::ShortBuffer {
            width: frame.width(),
            height: frame.height(),
            expected: (frame.width() * frame.height() * 3) as usize,
            actual: frame.data.len(),
        },
    )?;

    image.save(path)?;
    debug!("Wrote {}x{} image", frame.width(), frame.height());
    Ok(())
}

/// Tightly packed RGB rows, dropping any stride padding.
fn packed_rgb(frame: &Frame) -> Result<Vec<u8>, ImageWriteError> {
    let swap = match frame.format() {
        PixelFormat::Rgb24 => false,
        PixelFormat::Bgr24 => true,
        other => return Err(ImageWriteError::UnsupportedFormat(other)),
    };

    let row_bytes = frame.width() as usize * 3;
    let stride = (frame.meta.stride as usize).max(row_bytes);
    let rows = frame.height() as usize;
    if rows == 0 || row_bytes == 0 || frame.data.len() < stride * (rows - 1) + row_bytes {
        return Err(ImageWriteError::ShortBuffer {
            width: frame.width(),
            height: frame.height(),
            expected: row_bytes * rows,
            actual: frame.data.len(),
        });
    }

    let mut out = Vec::with_capacity(row_bytes * rows);
    for row in frame.data.chunks(stride).take(rows) {
        let row = &row[..row_bytes];
        if swap {
            out.extend(row.chunks_exact(3).flat_map(|px| [px[2], px[1], px[0]]));
        } else {
            out.extend_from_slice(row);
        }
    }

    Ok(out)
}
