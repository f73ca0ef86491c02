//! Frame filters applied between capture and display.
//!
//! Filters are pure: they return a new frame and never touch the caller's
//! buffer.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capture::{Frame, PixelFormat};

pub trait Filter {
    fn render(&self, frame: &Frame) -> Frame;
}

/// Filters selectable from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    None,
    /// Horizontal flip
    Mirror,
    /// Swap red and blue channels
    Bgr,
}

impl FilterKind {
    /// The next filter in key-cycling order, wrapping back to `None`
    pub fn next(self) -> Self {
        match self {
            FilterKind::None => FilterKind::Mirror,
            FilterKind::Mirror => FilterKind::Bgr,
            FilterKind::Bgr => FilterKind::None,
        }
    }

    pub fn build(self) -> Option<Box<dyn Filter>> {
        match self {
            FilterKind::None => None,
            FilterKind::Mirror => Some(Box::new(Mirror)),
            FilterKind::Bgr => Some(Box::new(SwapRedBlue)),
        }
    }
}

pub struct Mirror;

impl Filter for Mirror {
    fn render(&self, frame: &Frame) -> Frame {
        frame.mirrored()
    }
}

pub struct SwapRedBlue;

impl Filter for SwapRedBlue {
    fn render(&self, frame: &Frame) -> Frame {
        if !matches!(frame.format(), PixelFormat::Rgb24 | PixelFormat::Bgr24) {
            warn!("Channel swap skipped for {:?} frame", frame.format());
            return frame.clone();
        }

        let row_bytes = frame.width() as usize * 3;
        let stride = frame.meta.stride as usize;
        if row_bytes == 0 || stride < row_bytes {
            return frame.clone();
        }

        // Row padding is copied through untouched
        let mut out = Vec::with_capacity(frame.data.len());
        for row in frame.data.chunks(stride) {
            let pixels = &row[..row_bytes.min(row.len())];
            for px in pixels.chunks(3) {
                match px {
                    [r, g, b] => out.extend_from_slice(&[*b, *g, *r]),
                    partial => out.extend_from_slice(partial),
                }
            }
            out.extend_from_slice(&row[pixels.len()..]);
        }

        frame.with_data(out)
    }
}

/// The active filter, or a passthrough when none is selected
pub struct FilterPipeline {
    kind: FilterKind,
    filter: Option<Box<dyn Filter>>,
}

impl FilterPipeline {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            filter: kind.build(),
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn select(&mut self, kind: FilterKind) {
        if kind != self.kind {
            self.kind = kind;
            self.filter = kind.build();
        }
    }

    pub fn render(&self, frame: &Frame) -> Frame {
        match &self.filter {
            Some(filter) => filter.render(frame),
            None => frame.clone(),
        }
    }
}
