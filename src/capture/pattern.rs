//! Virtual frame source that emits a scrolling RGB test pattern.
//!
//! Selected with the device path `pattern`, handy on machines without a
//! camera and in integration tests.

use color_eyre::Result;
use tracing::info;

use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::source::{FrameSource, Property};

pub struct PatternSource {
    width: u32,
    height: u32,
    fps: f64,
    opened: bool,
    counter: u64,
    grabbed: Option<u64>,
}

impl PatternSource {
    /// `fps` of 0 makes the source behave like a device that does not
    /// report its frame rate.
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            opened: false,
            counter: 0,
            grabbed: None,
        }
    }

    fn render(&self, tick: u64) -> Vec<u8> {
        let (w, h) = (self.width as u64, self.height as u64);
        let mut data = Vec::with_capacity((w * h * 3) as usize);

        for y in 0..h {
            for x in 0..w {
                let r = ((x + tick) * 255 / w.max(1)) as u8;
                let g = (y * 255 / h.max(1)) as u8;
                let b = (tick % 256) as u8;
                data.extend_from_slice(&[r, g, b]);
            }
        }

        data
    }
}

impl FrameSource for PatternSource {
    fn open(&mut self) -> Result<()> {
        if !self.opened {
            info!("Opening test pattern source {}x{}", self.width, self.height);
            self.opened = true;
        }
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn grab(&mut self) -> bool {
        if !self.opened {
            return false;
        }
        self.counter += 1;
        self.grabbed = Some(self.counter);
        true
    }

    fn retrieve(&mut self, channel: u32) -> Option<Frame> {
        if channel != 0 {
            return None;
        }
        let tick = self.grabbed?;
        Some(Frame::from_pixels(
            self.render(tick),
            self.width,
            self.height,
            PixelFormat::Rgb24,
            tick,
        ))
    }

    fn get(&self, property: Property) -> f64 {
        match property {
            Property::FrameWidth => self.width as f64,
            Property::FrameHeight => self.height as f64,
            Property::Fps => self.fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_source_cannot_grab() {
        let mut source = PatternSource::new(4, 2, 0.0);
        assert!(!source.grab());
        assert!(source.retrieve(0).is_none());
    }

    #[test]
    fn frames_follow_grabs() {
        let mut source = PatternSource::new(4, 2, 30.0);
        source.open().unwrap();

        assert!(source.grab());
        let first = source.retrieve(0).unwrap();
        assert!(source.grab());
        let second = source.retrieve(0).unwrap();

        assert_eq!(first.meta.sequence, 1);
        assert_eq!(second.meta.sequence, 2);
        assert_eq!(first.data.len(), 4 * 2 * 3);
        assert_ne!(first.data, second.data);
        assert!(source.retrieve(1).is_none());
    }
}
