use color_eyre::Result;

use crate::capture::Frame;

/// Something that can present frames.
///
/// `show` must not block the capture loop and must treat the frame as
/// read-only; the caller releases it right after the call returns.
pub trait DisplaySink {
    fn show(&mut self, frame: &Frame) -> Result<()>;
}

/// Sink for headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDisplay;

impl DisplaySink for NoDisplay {
    fn show(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

impl<T: DisplaySink + ?Sized> DisplaySink for Box<T> {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        (**self).show(frame)
    }
}
