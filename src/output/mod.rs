pub mod image;
pub mod video;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_video;

pub use self::image::{write_image, ImageWriteError};
pub use video::{
    DefaultVideoWriterFactory, FourCc, VideoError, VideoTarget, VideoWriter, VideoWriterFactory,
};
