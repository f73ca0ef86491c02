use crate::capture::frame::PixelFormat;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

/// Device path that selects the built-in test pattern
pub const PATTERN_DEVICE: &str = "pattern";

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }

    pub fn is_pattern(&self) -> bool {
        self.path == PATTERN_DEVICE
    }
}

/// Preference order when several formats are offered
fn format_rank(fourcc: FourCC) -> Option<(u8, PixelFormat)> {
    if fourcc == FourCC::new(b"MJPG") {
        Some((0, PixelFormat::Mjpeg))
    } else if fourcc == FourCC::new(b"YUYV") {
        Some((1, PixelFormat::Yuyv4))
    } else {
        None
    }
}

/// Auto-detect the best capture device, preferring MJPEG over YUYV
pub async fn auto_detect_device() -> Result<FoundDevice> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    let mut best: Option<(u8, FoundDevice)> = None;

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        // Metadata nodes share the driver but can't capture
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            debug!("Skipping {} ({}): no capture capability", path, caps.card);
            continue;
        }

        let Ok(formats) = dev.enum_formats() else {
            continue;
        };
        let preferred = formats
            .iter()
            .filter_map(|f| format_rank(f.fourcc))
            .min_by_key(|(rank, _)| *rank);
        let Some((rank, format)) = preferred else {
            continue;
        };

        info!("Found {:?} device: {} - {}", format, path, caps.card);
        if best.as_ref().map_or(true, |(best_rank, _)| rank < *best_rank) {
            best = Some((rank, FoundDevice { path, format }));
        }
    }

    best.map(|(_, device)| device)
        .ok_or_else(|| eyre!("No suitable capture device found"))
}
