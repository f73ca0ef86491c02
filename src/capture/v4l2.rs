//! V4L2 frame source with mmap streaming

use std::time::{Duration, Instant};

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::decoder,
    capture::frame::{Frame, FrameMetadata, PixelFormat},
    capture::source::{FrameSource, Property},
    CaptureConfig,
};

/// Raw buffer kept between `grab` and `retrieve`
struct Grabbed {
    data: Bytes,
    sequence: u64,
    timestamp: Instant,
    device_timestamp: Duration,
}

/// V4L2 capture device
pub struct V4l2Source {
    _device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    width: u32,
    height: u32,
    fps: f64,
    sequence: u64,
    grabbed: Option<Grabbed>,
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            _device: None,
            stream: None,
            width: config.width,
            height: config.height,
            fps: 0.0,
            config,
            sequence: 0,
            grabbed: None,
        }
    }

    fn configure(&mut self) -> Result<()> {
        info!("Initializing V4L2 capture: {:?}", self.config.device);

        let device = Device::with_path(&self.config.device.path)?;

        // Query capabilities
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        // Set format
        let mut fmt = device.format()?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = match self.config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            _ => return Err(eyre!("Unsupported pixel format")),
        };

        // The driver may adjust the requested size
        let actual = device.set_format(&fmt)?;
        if actual.width != self.config.width || actual.height != self.config.height {
            warn!(
                "Device adjusted resolution to {}x{} (requested {}x{})",
                actual.width, actual.height, self.config.width, self.config.height
            );
        }
        self.width = actual.width;
        self.height = actual.height;

        // Devices that don't expose a frame interval report 0 fps
        self.fps = match device.params() {
            Ok(params) if params.interval.numerator > 0 => {
                params.interval.denominator as f64 / params.interval.numerator as f64
            }
            _ => 0.0,
        };
        info!("Reported frame rate: {:.2} fps", self.fps);

        let stream =
            MmapStream::with_buffers(&device, Type::VideoCapture, self.config.buffer_count)?;
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );

        self._device = Some(device);
        self.stream = Some(stream);
        Ok(())
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self) -> Result<()> {
        if self.is_opened() {
            return Ok(());
        }
        self.configure()
    }

    fn is_opened(&self) -> bool {
        self.stream.is_some()
    }

    #[instrument(skip(self))]
    fn grab(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let timestamp = Instant::now();
        match stream.next() {
            Ok((buf, meta)) => {
                self.sequence += 1;
                self.grabbed = Some(Grabbed {
                    // Copy out of the mmap'd buffer before it is requeued
                    data: Bytes::copy_from_slice(&buf[..(meta.bytesused as usize).min(buf.len())]),
                    sequence: self.sequence,
                    timestamp,
                    device_timestamp: Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                });
                true
            }
            Err(e) => {
                warn!("Failed to dequeue buffer: {}", e);
                self.grabbed = None;
                false
            }
        }
    }

    #[instrument(skip(self))]
    fn retrieve(&mut self, channel: u32) -> Option<Frame> {
        if channel != 0 {
            debug!("V4L2 devices expose a single channel");
            return None;
        }

        let grabbed = self.grabbed.as_ref()?;
        let raw = Frame {
            data: grabbed.data.clone(),
            meta: FrameMetadata {
                sequence: grabbed.sequence,
                width: self.width,
                height: self.height,
                stride: self.width * self.config.format.bytes_per_pixel().unwrap_or(1),
                format: self.config.format,
                device_timestamp: Some(grabbed.device_timestamp),
            }
            .into(),
            timestamp: grabbed.timestamp,
        };

        match decoder::decode_to_rgb(&raw) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Failed to decode frame {}: {}", grabbed.sequence, e);
                None
            }
        }
    }

    fn get(&self, property: Property) -> f64 {
        match property {
            Property::FrameWidth => self.width as f64,
            Property::FrameHeight => self.height as f64,
            Property::Fps => self.fps,
        }
    }
}
