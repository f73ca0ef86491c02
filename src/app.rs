//! Application driver: wires the capture device, filters and the preview
//! window together and maps keys to capture commands.

use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use flume::Receiver;
use tracing::{info, instrument, warn};

#[cfg(feature = "gstreamer-pipeline")]
use crate::capture::{GstInput, GstSource};
use crate::capture::{FrameSource, PatternSource, V4l2Source};
use crate::display::{DisplaySink, Sdl2WindowManager};
use crate::filter::FilterPipeline;
use crate::manager::CaptureManager;
use crate::{CaptureConfig, Config, OutputConfig};

pub const KEY_TAB: u8 = 9;
pub const KEY_ESCAPE: u8 = 27;
pub const KEY_SPACE: u8 = 32;
pub const KEY_FILTER: u8 = b'f';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Continue,
    /// Switch to the next filter
    CycleFilter,
    Quit,
}

/// Space: screenshot. Tab: start/stop screencast. F: next filter. Escape: quit.
pub fn handle_keypress<S: FrameSource, D: DisplaySink>(
    capture: &mut CaptureManager<S, D>,
    output: &OutputConfig,
    keycode: u8,
) -> KeyAction {
    match keycode {
        KEY_SPACE => capture.write_image(&output.screenshot_path),
        KEY_TAB => {
            if capture.is_writing_video() {
                if !capture.is_video_encoder_ready() {
                    warn!(
                        "Recording stopped during warm-up, {} was not written",
                        output.screencast_path.display()
                    );
                }
                capture.stop_writing_video();
            } else {
                capture.start_writing_video(&output.screencast_path, output.screencast_encoding);
            }
        }
        KEY_FILTER => return KeyAction::CycleFilter,
        KEY_ESCAPE => return KeyAction::Quit,
        _ => {}
    }
    KeyAction::Continue
}

/// Open the configured frame source
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let mut source: Box<dyn FrameSource> = if config.device.is_pattern() {
        Box::new(PatternSource::new(
            config.width,
            config.height,
            config.fps as f64,
        ))
    } else if Path::new(&config.device.path).is_file() {
        open_file_source(&config.device.path)?
    } else {
        return open_device_source(config);
    };

    if !source.is_opened() {
        source.open()?;
    }
    Ok(source)
}

/// V4L2 first; GStreamer's decodebin covers formats the direct path cannot
/// negotiate.
fn open_device_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let mut v4l2 = V4l2Source::new(config.clone());
    match v4l2.open() {
        Ok(()) => Ok(Box::new(v4l2)),
        Err(e) => fallback_device_source(config, e),
    }
}

#[cfg(feature = "gstreamer-pipeline")]
fn fallback_device_source(
    config: &CaptureConfig,
    err: color_eyre::Report,
) -> Result<Box<dyn FrameSource>> {
    warn!(
        "V4L2 capture on {} failed ({}), trying GStreamer",
        config.device.path, err
    );
    let mut source = GstSource::new(GstInput::Device(config.device.path.clone()));
    source.open()?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "gstreamer-pipeline"))]
fn fallback_device_source(
    _config: &CaptureConfig,
    err: color_eyre::Report,
) -> Result<Box<dyn FrameSource>> {
    Err(err)
}

pub struct Visage<S> {
    capture: CaptureManager<S, Sdl2WindowManager>,
    filters: FilterPipeline,
    keys: Receiver<u8>,
    output: OutputConfig,
}

impl<S: FrameSource> Visage<S> {
    pub fn new(source: S, config: &Config) -> Result<Self> {
        let (tx, keys) = flume::unbounded();
        let window = Sdl2WindowManager::new(
            config.display.title.clone(),
            config.display.width,
            config.display.height,
            Some(Box::new(move |code: u8| {
                // The receiver lives as long as the driver
                let _ = tx.send(code);
            })),
        )?;

        let mut capture =
            CaptureManager::new(Some(source), Some(window), config.display.mirror_preview);
        capture.set_channel(config.capture.channel);

        Ok(Self {
            capture,
            filters: FilterPipeline::new(config.pipeline.filter),
            keys,
            output: config.output.clone(),
        })
    }

    fn window(&mut self) -> Result<&mut Sdl2WindowManager> {
        self.capture
            .preview_mut()
            .ok_or_else(|| eyre!("No preview window"))
    }

    /// Run the main loop until the window is closed
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<()> {
        self.window()?.create_window()?;
        info!("Filter: {:?}", self.filters.kind());

        while self.window()?.is_window_created() {
            // Protocol violations are fatal
            self.capture.enter_frame()?;

            let filtered = self.capture.frame().map(|frame| self.filters.render(frame));
            if let Some(frame) = filtered {
                self.capture.replace_frame(frame);
            }

            self.capture.exit_frame();
            self.window()?.process_events();

            for keycode in self.keys.try_iter().collect::<Vec<_>>() {
                match handle_keypress(&mut self.capture, &self.output, keycode) {
                    KeyAction::Continue => {}
                    KeyAction::CycleFilter => {
                        let next = self.filters.kind().next();
                        self.filters.select(next);
                        info!("Filter: {:?}", next);
                    }
                    KeyAction::Quit => self.window()?.destroy_window(),
                }
            }
        }

        self.capture.stop_writing_video();
        info!(
            "Processed {} frames ({:.1} fps)",
            self.capture.frames_elapsed(),
            self.capture.fps_estimate().unwrap_or(0.0)
        );
        Ok(())
    }
}
