pub mod decoder;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_source;
pub mod pattern;
pub mod source;
pub mod v4l2;

pub use frame::Frame;
pub use frame::PixelFormat;
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_source::{GstInput, GstSource};
pub use pattern::PatternSource;
pub use source::{FrameSource, Property};
pub use v4l2::V4l2Source;
