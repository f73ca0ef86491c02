//! GStreamer frame source for video files and V4L2 devices

use std::time::Instant;

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::source::{FrameSource, Property};

/// Where the pipeline reads from
#[derive(Debug, Clone)]
pub enum GstInput {
    /// Local video file, decoded with `decodebin`
    File(String),
    /// V4L2 device path
    Device(String),
}

impl GstInput {
    fn pipeline_string(&self) -> String {
        let head = match self {
            GstInput::File(path) => format!("filesrc location=\"{}\" ! decodebin", path),
            GstInput::Device(path) => format!("v4l2src device={} ! decodebin", path),
        };
        format!(
            "{} ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false",
            head
        )
    }
}

struct Sample {
    data: Bytes,
    width: u32,
    height: u32,
    stride: u32,
    pts: Option<gst::ClockTime>,
    timestamp: Instant,
}

/// Frame source backed by a GStreamer pipeline ending in an appsink
pub struct GstSource {
    input: GstInput,
    pipeline: Option<gst::Pipeline>,
    appsink: Option<gst_app::AppSink>,
    sequence: u64,
    grabbed: Option<Sample>,
    width: u32,
    height: u32,
    fps: f64,
}

impl GstSource {
    pub fn new(input: GstInput) -> Self {
        Self {
            input,
            pipeline: None,
            appsink: None,
            sequence: 0,
            grabbed: None,
            width: 0,
            height: 0,
            fps: 0.0,
        }
    }

    fn build(&mut self) -> Result<()> {
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        let pipeline_str = self.input.pipeline_string();
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("Failed to create pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| eyre!("Failed to find appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| eyre!("Failed to cast to AppSink"))?;

        // Files must not drop frames; live devices are paced by the device
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", matches!(self.input, GstInput::Device(_)));

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| eyre!("Failed to start pipeline: {:?}", e))?;

        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    /// Pull the next decoded sample, updating the advertised size and rate
    fn pull(&mut self) -> Result<Sample> {
        let appsink = self
            .appsink
            .as_ref()
            .ok_or_else(|| eyre!("Pipeline not started"))?;

        let timestamp = Instant::now();
        let sample = appsink
            .pull_sample()
            .map_err(|_| eyre!("Failed to pull sample from pipeline"))?;

        let caps = sample.caps().ok_or_else(|| eyre!("Sample has no caps"))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| eyre!("Failed to parse video info from caps"))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| eyre!("Sample contains no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|_| eyre!("Failed to map buffer"))?;

        // A 0/1 framerate means the stream is variable or unknown
        let rate = video_info.fps();
        self.fps = if rate.numer() > 0 && rate.denom() > 0 {
            rate.numer() as f64 / rate.denom() as f64
        } else {
            0.0
        };
        self.width = video_info.width();
        self.height = video_info.height();

        Ok(Sample {
            data: Bytes::copy_from_slice(map.as_slice()),
            width: video_info.width(),
            height: video_info.height(),
            stride: video_info.stride()[0] as u32,
            pts: buffer.pts(),
            timestamp,
        })
    }

    fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                warn!("Failed to stop pipeline: {:?}", e);
            }
        }
        self.appsink = None;
    }
}

impl FrameSource for GstSource {
    fn open(&mut self) -> Result<()> {
        if self.is_opened() {
            return Ok(());
        }
        self.build()?;
        // Prime size and rate so they can be queried before the first grab
        let first = self.pull()?;
        self.grabbed = Some(first);
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.pipeline.is_some()
    }

    fn grab(&mut self) -> bool {
        if !self.is_opened() {
            return false;
        }
        // The priming sample from `open` counts as the first grab
        if self.sequence == 0 && self.grabbed.is_some() {
            self.sequence = 1;
            return true;
        }

        match self.pull() {
            Ok(sample) => {
                self.sequence += 1;
                self.grabbed = Some(sample);
                true
            }
            Err(e) => {
                debug!("End of input or pull failure: {}", e);
                self.grabbed = None;
                false
            }
        }
    }

    fn retrieve(&mut self, channel: u32) -> Option<Frame> {
        if channel != 0 {
            return None;
        }
        let sample = self.grabbed.as_ref()?;
        Some(Frame {
            data: sample.data.clone(),
            meta: FrameMetadata {
                sequence: self.sequence,
                width: sample.width,
                height: sample.height,
                stride: sample.stride,
                format: PixelFormat::Rgb24,
                device_timestamp: sample.pts.map(|pts| pts.into()),
            }
            .into(),
            timestamp: sample.timestamp,
        })
    }

    fn get(&self, property: Property) -> f64 {
        match property {
            Property::FrameWidth => self.width as f64,
            Property::FrameHeight => self.height as f64,
            Property::Fps => self.fps,
        }
    }
}

impl Drop for GstSource {
    fn drop(&mut self) {
        self.stop();
    }
}
