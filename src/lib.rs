pub mod app;
pub mod capture;
pub mod display;
pub mod filter;
pub mod manager;
pub mod output;
pub mod utils;

use std::path::{Path, PathBuf};

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

use crate::filter::FilterKind;
use crate::output::FourCc;
use crate::utils::FoundDevice;

pub use capture::{Frame, FrameSource};
pub use manager::{CaptureError, CaptureManager, CycleReport, VideoStep};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "VISAGE_CONFIG";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Device path; empty to auto-detect, `pattern` for the test pattern
    pub device: FoundDevice,
    pub width: u32,
    pub height: u32,
    /// Rate reported by the test pattern source, 0 for "unknown"
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub channel: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub mirror_preview: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub filter: FilterKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Overwritten on every screenshot
    pub screenshot_path: PathBuf,
    /// Overwritten on every recording
    pub screencast_path: PathBuf,
    pub screencast_encoding: FourCc,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: FoundDevice::new("/dev/video0".into(), PixelFormat::Mjpeg),
                width: 640,
                height: 480,
                fps: 0,
                format: PixelFormat::Mjpeg,
                buffer_count: 4,
                channel: 0,
            },
            display: DisplayConfig {
                title: "Visage".into(),
                width: 640,
                height: 480,
                mirror_preview: true,
            },
            pipeline: PipelineConfig {
                filter: FilterKind::None,
            },
            output: OutputConfig {
                screenshot_path: "screenshot.png".into(),
                screencast_path: "screencast.avi".into(),
                screencast_encoding: FourCc::I420,
            },
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `VISAGE_*` environment
    /// variables (`VISAGE_CAPTURE__WIDTH=1280`).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix("VISAGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
