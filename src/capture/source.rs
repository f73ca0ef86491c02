//! Capture device contract used by the frame cycle manager

use color_eyre::Result;

use super::frame::Frame;

/// Read-only device properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    FrameWidth,
    FrameHeight,
    Fps,
}

/// A live or file-backed capture device.
///
/// Grabbing and retrieving are separate steps: `grab` only synchronizes with
/// the device, `retrieve` pays for decoding the grabbed frame.
pub trait FrameSource {
    /// Initialize the device. Opening an already opened source is a no-op.
    fn open(&mut self) -> Result<()>;

    fn is_opened(&self) -> bool;

    /// Mark the next frame as available without decoding it.
    fn grab(&mut self) -> bool;

    /// Decode the most recently grabbed frame for `channel`.
    fn retrieve(&mut self, channel: u32) -> Option<Frame>;

    /// Property value, or 0 when the device does not report it.
    fn get(&self, property: Property) -> f64;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn is_opened(&self) -> bool {
        (**self).is_opened()
    }

    fn grab(&mut self) -> bool {
        (**self).grab()
    }

    fn retrieve(&mut self, channel: u32) -> Option<Frame> {
        (**self).retrieve(channel)
    }

    fn get(&self, property: Property) -> f64 {
        (**self).get(property)
    }
}
