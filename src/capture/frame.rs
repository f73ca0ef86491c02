use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - cloning a frame never copies pixels
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
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for compressed or planar ones
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg | PixelFormat::Nv12 => None,
        }
    }
}

impl Frame {
    /// Build a packed frame from raw pixel bytes.
    pub fn from_pixels(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        let stride = width * format.bytes_per_pixel().unwrap_or(1);
        Self {
            data: data.into(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride,
                format,
                device_timestamp: None,
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

    pub fn size(&self) -> (u32, u32) {
        (self.meta.width, self.meta.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    /// Horizontally flipped copy of this frame.
    ///
    /// The original buffer is left untouched, so callers still holding this
    /// frame keep seeing the unmirrored pixels. Compressed formats cannot be
    /// flipped without decoding and are returned as a plain clone.
    pub fn mirrored(&self) -> Frame {
        let bpp = match self.meta.format {
            // YUYV pairs share chroma, so flip whole macropixels and swap lumas
            PixelFormat::Yuyv4 => return self.mirrored_yuyv(),
            format => match format.bytes_per_pixel() {
                Some(bpp) => bpp as usize,
                None => return self.clone(),
            },
        };

        let width = self.meta.width as usize;
        let stride = self.meta.stride as usize;
        if stride == 0 {
            return self.clone();
        }
        let mut out = Vec::with_capacity(self.data.len());

        for row in self.data.chunks(stride) {
            let pixels = &row[..(width * bpp).min(row.len())];
            for pixel in pixels.chunks_exact(bpp).rev() {
                out.extend_from_slice(pixel);
            }
            out.extend_from_slice(&row[pixels.len()..]);
        }

        self.with_data(out)
    }

    fn mirrored_yuyv(&self) -> Frame {
        let stride = self.meta.stride as usize;
        if stride == 0 {
            return self.clone();
        }
        let row_bytes = (self.meta.width as usize / 2) * 4;
        let mut out = Vec::with_capacity(self.data.len());

        for row in self.data.chunks(stride) {
            let pixels = &row[..row_bytes.min(row.len())];
            for mp in pixels.chunks_exact(4).rev() {
                out.extend_from_slice(&[mp[2], mp[1], mp[0], mp[3]]);
            }
            out.extend_from_slice(&row[pixels.len()..]);
        }

        self.with_data(out)
    }

    /// Same metadata, new pixel buffer.
    pub fn with_data(&self, data: impl Into<Bytes>) -> Frame {
        Frame {
            data: data.into(),
            meta: self.meta.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("size", &(self.meta.width, self.meta.height))
            .field("format", &self.meta.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}
