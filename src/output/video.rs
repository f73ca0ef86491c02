//! Screencast output: encoding tags, recording targets and writer traits

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::frame::{Frame, PixelFormat};

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video recording support was not compiled in")]
    BackendUnavailable,

    #[error("invalid fourcc {0:?}: expected four ASCII characters")]
    InvalidFourCc(String),

    #[error("no encoder available for fourcc {0}")]
    UnsupportedEncoding(FourCc),

    #[error("invalid frame rate {0}")]
    InvalidFrameRate(f64),

    #[error("cannot encode {0:?} frames")]
    UnsupportedFormat(PixelFormat),

    #[error("frame is {actual:?}, encoder expects {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("pipeline error: {0}")]
    Pipeline(String),
}

/// Four-character video encoding tag, e.g. `I420` or `MJPG`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCc([u8; 4]);

impl FourCc {
    pub const I420: FourCc = FourCc(*b"I420");
    pub const MJPG: FourCc = FourCc(*b"MJPG");

    pub const fn new(code: &[u8; 4]) -> Self {
        FourCc(*code)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl Default for FourCc {
    fn default() -> Self {
        FourCc::I420
    }
}

impl FromStr for FourCc {
    type Err = VideoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(VideoError::InvalidFourCc(s.to_string()));
        }
        Ok(FourCc([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl TryFrom<String> for FourCc {
    type Error = VideoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FourCc> for String {
    fn from(value: FourCc) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Constructed only from ASCII
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self)
    }
}

/// An active recording request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTarget {
    pub path: PathBuf,
    pub encoding: FourCc,
}

impl VideoTarget {
    pub fn new(path: impl Into<PathBuf>, encoding: FourCc) -> Self {
        Self {
            path: path.into(),
            encoding,
        }
    }
}

/// An open video encoder bound to one file, size and rate.
pub trait VideoWriter {
    /// Frame size the encoder was opened with
    fn size(&self) -> (u32, u32);

    fn write(&mut self, frame: &Frame) -> Result<(), VideoError>;

    /// Flush and close the file. Further writes are errors.
    fn finish(&mut self) -> Result<(), VideoError>;
}

/// Opens encoders once the frame size and rate are known.
pub trait VideoWriterFactory {
    fn open(
        &self,
        target: &VideoTarget,
        fps: f64,
        size: (u32, u32),
    ) -> Result<Box<dyn VideoWriter>, VideoError>;
}

/// Factory backed by whatever encoder support was compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultVideoWriterFactory;

impl VideoWriterFactory for DefaultVideoWriterFactory {
    #[cfg(feature = "gstreamer-pipeline")]
    fn open(
        &self,
        target: &VideoTarget,
        fps: f64,
        size: (u32, u32),
    ) -> Result<Box<dyn VideoWriter>, VideoError> {
        let writer = super::gst_video::GstVideoWriter::new(target, fps, size)?;
        Ok(Box::new(writer))
    }

    #[cfg(not(feature = "gstreamer-pipeline"))]
    fn open(
        &self,
        _target: &VideoTarget,
        _fps: f64,
        _size: (u32, u32),
    ) -> Result<Box<dyn VideoWriter>, VideoError> {
        Err(VideoError::BackendUnavailable)
    }
}
