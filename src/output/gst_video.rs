//! GStreamer screencast writer
//!
//! Pipeline: appsrc (RGB) -> videoconvert -> [encoder] -> avimux -> filesink

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::frame::{Frame, PixelFormat};
use crate::output::video::{FourCc, VideoError, VideoTarget, VideoWriter};

/// How a fourcc maps onto GStreamer elements
enum EncoderSpec {
    /// Uncompressed frames stored as-is in the given raw format
    Raw(gst_video::VideoFormat),
    /// Named encoder element
    Element(&'static str),
}

fn encoder_for(encoding: FourCc) -> Result<EncoderSpec, VideoError> {
    let spec = match encoding.as_bytes() {
        b"I420" | b"IYUV" => EncoderSpec::Raw(gst_video::VideoFormat::I420),
        b"YUY2" | b"YUYV" => EncoderSpec::Raw(gst_video::VideoFormat::Yuy2),
        b"MJPG" => EncoderSpec::Element("jpegenc"),
        b"XVID" | b"DIVX" | b"FMP4" | b"MP4V" => EncoderSpec::Element("avenc_mpeg4"),
        b"H264" | b"X264" | b"AVC1" => EncoderSpec::Element("x264enc"),
        _ => return Err(VideoError::UnsupportedEncoding(encoding)),
    };
    Ok(spec)
}

/// Convert a floating point rate into a millihertz fraction.
fn rate_fraction(fps: f64) -> Result<gst::Fraction, VideoError> {
    if !fps.is_finite() || fps <= 0.0 || fps > 1000.0 {
        return Err(VideoError::InvalidFrameRate(fps));
    }
    Ok(gst::Fraction::new((fps * 1000.0).round() as i32, 1000))
}

fn pipeline_err(what: &str) -> impl Fn(gst::glib::BoolError) -> VideoError + '_ {
    move |e| VideoError::Pipeline(format!("{}: {}", what, e))
}

/// Writes RGB frames to an AVI file
pub struct GstVideoWriter {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    size: (u32, u32),
    /// Row stride GStreamer expects for the negotiated RGB caps
    stride: usize,
    frame_duration: gst::ClockTime,
    frames_written: u64,
    finished: bool,
}

impl GstVideoWriter {
    pub fn new(target: &VideoTarget, fps: f64, size: (u32, u32)) -> Result<Self, VideoError> {
        gst::init()
            .map_err(|e| VideoError::Pipeline(format!("Failed to initialize GStreamer: {}", e)))?;

        let rate = rate_fraction(fps)?;
        let encoder = encoder_for(target.encoding)?;
        info!(
            "Opening video writer {} ({}, {}x{} @ {:.2} fps)",
            target.path.display(),
            target.encoding,
            size.0,
            size.1,
            fps
        );

        let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, size.0, size.1)
            .fps(rate)
            .build()
            .map_err(pipeline_err("Invalid video info"))?;
        let stride = info.stride()[0] as usize;
        let caps = info.to_caps().map_err(pipeline_err("Invalid caps"))?;

        let appsrc = gst_app::AppSrc::builder()
            .name("appsrc")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(false)
            .block(true)
            .build();

        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(pipeline_err("Failed to create videoconvert"))?;

        let encode = match encoder {
            EncoderSpec::Raw(format) => {
                let raw_caps = gst_video::VideoCapsBuilder::new().format(format).build();
                gst::ElementFactory::make("capsfilter")
                    .property("caps", raw_caps)
                    .build()
                    .map_err(pipeline_err("Failed to create capsfilter"))?
            }
            EncoderSpec::Element(name) => {
                if gst::ElementFactory::find(name).is_none() {
                    warn!("Encoder element {} is not installed", name);
                    return Err(VideoError::UnsupportedEncoding(target.encoding));
                }
                gst::ElementFactory::make(name)
                    .build()
                    .map_err(pipeline_err("Failed to create encoder"))?
            }
        };

        let mux = gst::ElementFactory::make("avimux")
            .build()
            .map_err(pipeline_err("Failed to create avimux"))?;

        let filesink = gst::ElementFactory::make("filesink")
            .property("location", target.path.to_string_lossy().to_string())
            .property("async", false)
            .build()
            .map_err(pipeline_err("Failed to create filesink"))?;

        let pipeline = gst::Pipeline::new();
        pipeline
            .add_many([appsrc.upcast_ref(), &convert, &encode, &mux, &filesink])
            .map_err(pipeline_err("Failed to add elements"))?;
        gst::Element::link_many([appsrc.upcast_ref(), &convert, &encode, &mux, &filesink])
            .map_err(pipeline_err("Failed to link elements"))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| VideoError::Pipeline(format!("Failed to start pipeline: {:?}", e)))?;

        let frame_duration = gst::ClockTime::from_nseconds(
            (gst::ClockTime::SECOND.nseconds() as f64 / fps).round() as u64,
        );

        Ok(Self {
            pipeline,
            appsrc,
            size,
            stride,
            frame_duration,
            frames_written: 0,
            finished: false,
        })
    }

    /// Send EOS and wait for the muxer to write the index
    fn drain(&self) -> Result<(), VideoError> {
        if let Err(e) = self.appsrc.end_of_stream() {
            warn!("Failed to send EOS: {:?}", e);
        }

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| VideoError::Pipeline("Pipeline has no bus".into()))?;

        for msg in bus.iter_timed(gst::ClockTime::from_seconds(5)) {
            use gst::MessageView;

            match msg.view() {
                MessageView::Eos(..) => return Ok(()),
                MessageView::Error(err) => {
                    return Err(VideoError::Pipeline(format!(
                        "Error from {:?}: {} ({:?})",
                        err.src().map(|s| s.path_string()),
                        err.error(),
                        err.debug()
                    )));
                }
                _ => {}
            }
        }

        warn!("Timed out waiting for EOS");
        Ok(())
    }
}

/// Copy rows into a buffer with GStreamer's row alignment
fn restride(frame: &Frame, stride: usize) -> Vec<u8> {
    let row_bytes = frame.width() as usize * 3;
    let src_stride = (frame.meta.stride as usize).max(row_bytes);
    let mut out = vec![0u8; stride * frame.height() as usize];

    for (dst, src) in out
        .chunks_exact_mut(stride)
        .zip(frame.data.chunks(src_stride))
    {
        let n = row_bytes.min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
    }

    out
}

impl VideoWriter for GstVideoWriter {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn write(&mut self, frame: &Frame) -> Result<(), VideoError> {
        if self.finished {
            return Err(VideoError::Pipeline("writer already finished".into()));
        }
        if frame.format() != PixelFormat::Rgb24 {
            return Err(VideoError::UnsupportedFormat(frame.format()));
        }
        if frame.size() != self.size {
            return Err(VideoError::SizeMismatch {
                expected: self.size,
                actual: frame.size(),
            });
        }

        // Bytes is refcounted, so matching layouts wrap the frame without a copy
        let mut buffer = if frame.meta.stride as usize == self.stride {
            gst::Buffer::from_slice(frame.data.clone())
        } else {
            gst::Buffer::from_mut_slice(restride(frame, self.stride))
        };
        {
            let buffer_ref = buffer.make_mut();
            buffer_ref.set_pts(self.frame_duration * self.frames_written);
            buffer_ref.set_duration(self.frame_duration);
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| VideoError::Pipeline(format!("Failed to push buffer: {:?}", e)))?;

        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let drained = self.drain();
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| VideoError::Pipeline(format!("Failed to stop pipeline: {:?}", e)))?;

        debug!("Video writer closed after {} frames", self.frames_written);
        drained
    }
}

impl Drop for GstVideoWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Failed to finalize video: {}", e);
        }
    }
}
