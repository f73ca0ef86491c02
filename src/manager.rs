//! Frame cycle manager
//!
//! Drives one capture device through `enter_frame` / `frame` / `exit_frame`
//! cycles. Grabbing happens on enter, decoding only when somebody reads the
//! frame, and every side effect (preview, screenshot, screencast) is deferred
//! to exit.

use std::path::PathBuf;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capture::{Frame, FrameSource, Property};
use crate::display::DisplaySink;
use crate::output::{
    write_image, DefaultVideoWriterFactory, FourCc, ImageWriteError, VideoError, VideoTarget,
    VideoWriter, VideoWriterFactory,
};

/// Completed cycles needed before the FPS estimate may size an encoder
pub const WARMUP_FRAMES: u64 = 20;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("enter_frame called while the previous frame was not exited")]
    ProtocolViolation,

    #[error("failed to write image {}: {source}", .path.display())]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: ImageWriteError,
    },

    #[error("failed to write video {}: {source}", .path.display())]
    VideoWrite {
        path: PathBuf,
        #[source]
        source: VideoError,
    },

    #[error("preview failed: {0}")]
    Preview(String),
}

/// Time source for FPS bookkeeping
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Per-cycle frame state
enum FrameSlot {
    /// No frame entered
    Idle,
    /// Grabbed on the device, not decoded yet
    Grabbed,
    /// Retrieval ran; `None` when the device failed to deliver
    Retrieved(Option<Frame>),
}

/// Encoder lifecycle within a recording
enum EncoderState {
    Uninitialized,
    WarmingUp { frames_seen: u64 },
    Ready(Box<dyn VideoWriter>),
}

struct Recording {
    target: VideoTarget,
    encoder: EncoderState,
}

/// What the video step did with the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoStep {
    /// Not recording
    #[default]
    Idle,
    /// Frame rate unknown and warm-up incomplete
    EncoderNotReady,
    Written,
    /// Frame does not match the open encoder's size
    Skipped,
    Failed,
}

/// Result of one `exit_frame`
#[derive(Debug, Default)]
pub struct CycleReport {
    /// No frame could be retrieved; nothing else happened
    pub dropped: bool,
    /// Path of the screenshot written this cycle
    pub image_written: Option<PathBuf>,
    pub video: VideoStep,
    /// Recoverable failures, already logged
    pub errors: Vec<CaptureError>,
}

impl CycleReport {
    fn dropped() -> Self {
        Self {
            dropped: true,
            ..Default::default()
        }
    }
}

pub struct CaptureManager<S, D> {
    preview: Option<D>,
    should_mirror_preview: bool,

    capture: Option<S>,
    channel: u32,
    slot: FrameSlot,

    image_path: Option<PathBuf>,
    recording: Option<Recording>,
    writers: Box<dyn VideoWriterFactory>,

    clock: Box<dyn Clock>,
    start_time: Option<Instant>,
    frames_elapsed: u64,
    fps_estimate: Option<f64>,
}

impl<S: FrameSource, D: DisplaySink> CaptureManager<S, D> {
    pub fn new(capture: Option<S>, preview: Option<D>, should_mirror_preview: bool) -> Self {
        Self {
            preview,
            should_mirror_preview,
            capture,
            channel: 0,
            slot: FrameSlot::Idle,
            image_path: None,
            recording: None,
            writers: Box::new(DefaultVideoWriterFactory),
            clock: Box::new(SystemClock),
            start_time: None,
            frames_elapsed: 0,
            fps_estimate: None,
        }
    }

    pub fn with_video_writers(mut self, writers: impl VideoWriterFactory + 'static) -> Self {
        self.writers = Box::new(writers);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn capture(&self) -> Option<&S> {
        self.capture.as_ref()
    }

    pub fn preview(&self) -> Option<&D> {
        self.preview.as_ref()
    }

    pub fn preview_mut(&mut self) -> Option<&mut D> {
        self.preview.as_mut()
    }

    pub fn should_mirror_preview(&self) -> bool {
        self.should_mirror_preview
    }

    pub fn set_mirror_preview(&mut self, mirror: bool) {
        self.should_mirror_preview = mirror;
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    /// Switch capture channel. A frame already retrieved this cycle is
    /// discarded and the next read retrieves from the new channel.
    pub fn set_channel(&mut self, channel: u32) {
        if self.channel != channel {
            self.channel = channel;
            if let FrameSlot::Retrieved(_) = self.slot {
                self.slot = FrameSlot::Grabbed;
            }
        }
    }

    pub fn entered_frame(&self) -> bool {
        !matches!(self.slot, FrameSlot::Idle)
    }

    pub fn frames_elapsed(&self) -> u64 {
        self.frames_elapsed
    }

    pub fn fps_estimate(&self) -> Option<f64> {
        self.fps_estimate
    }

    pub fn is_writing_image(&self) -> bool {
        self.image_path.is_some()
    }

    pub fn is_writing_video(&self) -> bool {
        self.recording.is_some()
    }

    /// Whether the screencast encoder has been opened
    pub fn is_video_encoder_ready(&self) -> bool {
        matches!(
            self.recording,
            Some(Recording {
                encoder: EncoderState::Ready(_),
                ..
            })
        )
    }

    /// Grab the next frame. Decoding is deferred until `frame` is read.
    pub fn enter_frame(&mut self) -> Result<(), CaptureError> {
        if self.entered_frame() {
            error!("enter_frame called twice without exit_frame");
            return Err(CaptureError::ProtocolViolation);
        }

        if let Some(capture) = self.capture.as_mut() {
            if capture.grab() {
                self.slot = FrameSlot::Grabbed;
            } else {
                debug!("Grab failed");
            }
        }
        Ok(())
    }

    /// The current frame, retrieved from the device on first access.
    pub fn frame(&mut self) -> Option<&Frame> {
        if let FrameSlot::Grabbed = self.slot {
            let channel = self.channel;
            let frame = self
                .capture
                .as_mut()
                .and_then(|capture| capture.retrieve(channel));
            self.slot = FrameSlot::Retrieved(frame);
        }

        match &self.slot {
            FrameSlot::Retrieved(frame) => frame.as_ref(),
            _ => None,
        }
    }

    /// Replace the retrieved frame for the rest of this cycle, e.g. with a
    /// filtered copy. Returns false when there is no frame to replace.
    pub fn replace_frame(&mut self, frame: Frame) -> bool {
        match &mut self.slot {
            FrameSlot::Retrieved(Some(current)) => {
                *current = frame;
                true
            }
            _ => false,
        }
    }

    /// Finish the cycle: update the FPS estimate, show the preview, run
    /// pending writes and release the frame.
    pub fn exit_frame(&mut self) -> CycleReport {
        self.frame();
        let frame = match std::mem::replace(&mut self.slot, FrameSlot::Idle) {
            FrameSlot::Retrieved(Some(frame)) => frame,
            _ => {
                metrics::counter!("frames_dropped").increment(1);
                debug!("No frame this cycle, dropping");
                return CycleReport::dropped();
            }
        };

        let mut report = CycleReport::default();

        // An encoder opened this cycle is sized from the estimate as it stood
        // when the previous cycle finished
        let prior_estimate = self.fps_estimate;
        let now = self.clock.now();
        match self.start_time {
            Some(start) if self.frames_elapsed > 0 => {
                let elapsed = now.saturating_duration_since(start).as_secs_f64();
                if elapsed > 0.0 {
                    let fps = self.frames_elapsed as f64 / elapsed;
                    self.fps_estimate = Some(fps);
                    metrics::gauge!("fps_estimate").set(fps);
                }
            }
            _ => self.start_time = Some(now),
        }
        self.frames_elapsed += 1;
        metrics::counter!("frames_completed").increment(1);

        if let Some(preview) = self.preview.as_mut() {
            let shown = if self.should_mirror_preview {
                preview.show(&frame.mirrored())
            } else {
                preview.show(&frame)
            };
            if let Err(e) = shown {
                warn!("Preview failed: {}", e);
                report.errors.push(CaptureError::Preview(e.to_string()));
            }
        }

        if let Some(path) = self.image_path.take() {
            match write_image(&path, &frame) {
                Ok(()) => {
                    info!("Wrote screenshot {}", path.display());
                    report.image_written = Some(path);
                }
                Err(source) => {
                    error!("Failed to write screenshot {}: {}", path.display(), source);
                    report
                        .errors
                        .push(CaptureError::ImageWrite { path, source });
                }
            }
        }

        report.video = self.write_video_frame(&frame, prior_estimate, &mut report.errors);
        report
    }

    /// Write the next exited frame to `path`. Only the latest request before
    /// an exit is honored.
    pub fn write_image(&mut self, path: impl Into<PathBuf>) {
        self.image_path = Some(path.into());
    }

    /// Record exited frames to `path`. The encoder opens lazily once the
    /// frame size and rate are known.
    pub fn start_writing_video(&mut self, path: impl Into<PathBuf>, encoding: FourCc) {
        self.stop_writing_video();

        let target = VideoTarget::new(path, encoding);
        info!(
            "Recording to {} ({})",
            target.path.display(),
            target.encoding
        );
        self.recording = Some(Recording {
            target,
            encoder: EncoderState::Uninitialized,
        });
    }

    /// Stop recording and finalize the file.
    pub fn stop_writing_video(&mut self) {
        let Some(recording) = self.recording.take() else {
            return;
        };

        info!("Stopped recording {}", recording.target.path.display());
        if let EncoderState::Ready(mut writer) = recording.encoder {
            if let Err(e) = writer.finish() {
                error!(
                    "Failed to finalize {}: {}",
                    recording.target.path.display(),
                    e
                );
            }
        }
    }

    fn write_video_frame(
        &mut self,
        frame: &Frame,
        estimate: Option<f64>,
        errors: &mut Vec<CaptureError>,
    ) -> VideoStep {
        let Some(recording) = self.recording.as_mut() else {
            return VideoStep::Idle;
        };

        if !matches!(recording.encoder, EncoderState::Ready(_)) {
            let reported = self
                .capture
                .as_ref()
                .map_or(0.0, |capture| capture.get(Property::Fps));

            let fps = if reported > 0.0 {
                reported
            } else if self.frames_elapsed <= WARMUP_FRAMES {
                recording.encoder = EncoderState::WarmingUp {
                    frames_seen: self.frames_elapsed,
                };
                return VideoStep::EncoderNotReady;
            } else {
                match estimate {
                    Some(fps) if fps > 0.0 => fps,
                    _ => return VideoStep::EncoderNotReady,
                }
            };

            if let EncoderState::WarmingUp { frames_seen } = recording.encoder {
                debug!("Warm-up finished after {} frames", frames_seen);
            }

            let size = match self.capture.as_ref() {
                Some(capture) => (
                    capture.get(Property::FrameWidth) as u32,
                    capture.get(Property::FrameHeight) as u32,
                ),
                None => (0, 0),
            };
            let size = if size.0 == 0 || size.1 == 0 {
                frame.size()
            } else {
                size
            };

            match self.writers.open(&recording.target, fps, size) {
                Ok(writer) => {
                    info!(
                        "Opened encoder for {} at {:.2} fps, {}x{}",
                        recording.target.path.display(),
                        fps,
                        size.0,
                        size.1
                    );
                    recording.encoder = EncoderState::Ready(writer);
                }
                Err(source) => {
                    error!(
                        "Failed to open encoder for {}: {}",
                        recording.target.path.display(),
                        source
                    );
                    // No retry: the recording request is dropped
                    let path = recording.target.path.clone();
                    self.recording = None;
                    errors.push(CaptureError::VideoWrite { path, source });
                    return VideoStep::Failed;
                }
            }
        }

        let EncoderState::Ready(writer) = &mut recording.encoder else {
            return VideoStep::EncoderNotReady;
        };

        if writer.size() != frame.size() {
            warn!(
                "Frame size {:?} differs from encoder size {:?}, not recorded",
                frame.size(),
                writer.size()
            );
            return VideoStep::Skipped;
        }

        match writer.write(frame) {
            Ok(()) => {
                metrics::counter!("video_frames_written").increment(1);
                VideoStep::Written
            }
            Err(source) => {
                error!(
                    "Failed to write video frame to {}: {}",
                    recording.target.path.display(),
                    source
                );
                errors.push(CaptureError::VideoWrite {
                    path: recording.target.path.clone(),
                    source,
                });
                VideoStep::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    use color_eyre::{eyre::eyre, Result};

    use super::*;
    use crate::capture::PixelFormat;

    #[derive(Default)]
    struct FakeSource {
        fps: f64,
        width: u32,
        height: u32,
        fail_grab: bool,
        fail_retrieve: bool,
        grabs: usize,
        retrieves: Vec<u32>,
    }

    impl FakeSource {
        fn new(fps: f64) -> Self {
            Self {
                fps,
                width: 2,
                height: 2,
                ..Default::default()
            }
        }
    }

    impl FrameSource for FakeSource {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_opened(&self) -> bool {
            true
        }

        fn grab(&mut self) -> bool {
            self.grabs += 1;
            !self.fail_grab
        }

        fn retrieve(&mut self, channel: u32) -> Option<Frame> {
            self.retrieves.push(channel);
            if self.fail_retrieve {
                return None;
            }
            let pixels: Vec<u8> = (0..self.width * self.height * 3).map(|b| b as u8).collect();
            Some(Frame::from_pixels(
                pixels,
                self.width,
                self.height,
                PixelFormat::Rgb24,
                self.grabs as u64,
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

    #[derive(Default)]
    struct FakeDisplay {
        shown: Vec<Frame>,
        fail: bool,
    }

    impl DisplaySink for FakeDisplay {
        fn show(&mut self, frame: &Frame) -> Result<()> {
            if self.fail {
                return Err(eyre!("window gone"));
            }
            self.shown.push(frame.clone());
            Ok(())
        }
    }

    #[derive(Clone)]
    struct ManualClock(Rc<Cell<Instant>>);

    impl ManualClock {
        fn new() -> Self {
            Self(Rc::new(Cell::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            self.0.set(self.0.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.0.get()
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Open { path: PathBuf, fps: f64, size: (u32, u32) },
        Write { path: PathBuf, sequence: u64 },
        Finish { path: PathBuf },
    }

    #[derive(Clone, Default)]
    struct RecordingFactory {
        events: Rc<RefCell<Vec<Event>>>,
        fail_open: bool,
    }

    impl RecordingFactory {
        fn writes_to(&self, path: &str) -> Vec<u64> {
            self.events
                .borrow()
                .iter()
                .filter_map(|e| match e {
                    Event::Write { path: p, sequence } if p == &PathBuf::from(path) => {
                        Some(*sequence)
                    }
                    _ => None,
                })
                .collect()
        }

        fn opens(&self) -> Vec<Event> {
            self.events
                .borrow()
                .iter()
                .filter(|e| matches!(e, Event::Open { .. }))
                .cloned()
                .collect()
        }
    }

    struct RecordingWriter {
        path: PathBuf,
        size: (u32, u32),
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl VideoWriter for RecordingWriter {
        fn size(&self) -> (u32, u32) {
            self.size
        }

        fn write(&mut self, frame: &Frame) -> std::result::Result<(), VideoError> {
            self.events.borrow_mut().push(Event::Write {
                path: self.path.clone(),
                sequence: frame.meta.sequence,
            });
            Ok(())
        }

        fn finish(&mut self) -> std::result::Result<(), VideoError> {
            self.events.borrow_mut().push(Event::Finish {
                path: self.path.clone(),
            });
            Ok(())
        }
    }

    impl VideoWriterFactory for RecordingFactory {
        fn open(
            &self,
            target: &VideoTarget,
            fps: f64,
            size: (u32, u32),
        ) -> std::result::Result<Box<dyn VideoWriter>, VideoError> {
            if self.fail_open {
                return Err(VideoError::UnsupportedEncoding(target.encoding));
            }
            self.events.borrow_mut().push(Event::Open {
                path: target.path.clone(),
                fps,
                size,
            });
            Ok(Box::new(RecordingWriter {
                path: target.path.clone(),
                size,
                events: self.events.clone(),
            }))
        }
    }

    type Manager = CaptureManager<FakeSource, FakeDisplay>;

    fn manager(source: FakeSource) -> (Manager, ManualClock, RecordingFactory) {
        let clock = ManualClock::new();
        let factory = RecordingFactory::default();
        let manager = CaptureManager::new(Some(source), Some(FakeDisplay::default()), false)
            .with_clock(clock.clone())
            .with_video_writers(factory.clone());
        (manager, clock, factory)
    }

    fn cycle(manager: &mut Manager, clock: &ManualClock) -> CycleReport {
        manager.enter_frame().unwrap();
        manager.frame();
        let report = manager.exit_frame();
        clock.advance(Duration::from_millis(100));
        report
    }

    #[test]
    fn entered_only_between_enter_and_exit() {
        let (mut manager, _, _) = manager(FakeSource::new(30.0));
        assert!(!manager.entered_frame());

        manager.enter_frame().unwrap();
        assert!(manager.entered_frame());

        manager.exit_frame();
        assert!(!manager.entered_frame());
    }

    #[test]
    fn double_enter_is_a_protocol_violation() {
        let (mut manager, _, _) = manager(FakeSource::new(30.0));
        manager.enter_frame().unwrap();

        assert!(matches!(
            manager.enter_frame(),
            Err(CaptureError::ProtocolViolation)
        ));
        assert_eq!(manager.capture().unwrap().grabs, 1);
    }

    #[test]
    fn failed_grab_leaves_manager_idle() {
        let mut source = FakeSource::new(30.0);
        source.fail_grab = true;
        let (mut manager, _, _) = manager(source);

        manager.enter_frame().unwrap();
        assert!(!manager.entered_frame());
        assert!(manager.frame().is_none());
        assert!(manager.capture().unwrap().retrieves.is_empty());
        // a new enter is allowed right away
        manager.enter_frame().unwrap();
    }

    #[test]
    fn missing_source_is_a_no_op() {
        let mut manager: Manager = CaptureManager::new(None, None, false);
        manager.enter_frame().unwrap();
        assert!(!manager.entered_frame());
        assert!(manager.frame().is_none());
        assert!(manager.exit_frame().dropped);
    }

    #[test]
    fn frame_is_retrieved_once_per_cycle() {
        let (mut manager, _, _) = manager(FakeSource::new(30.0));
        manager.enter_frame().unwrap();

        let first = manager.frame().unwrap().clone();
        let second = manager.frame().unwrap().clone();

        assert_eq!(first.data.as_ptr(), second.data.as_ptr());
        assert_eq!(manager.capture().unwrap().retrieves, vec![0]);
    }

    #[test]
    fn enter_does_not_retrieve() {
        let (mut manager, _, _) = manager(FakeSource::new(30.0));
        manager.enter_frame().unwrap();
        assert!(manager.capture().unwrap().retrieves.is_empty());
    }

    #[test]
    fn frame_before_enter_is_none() {
        let (mut manager, _, _) = manager(FakeSource::new(30.0));
        assert!(manager.frame().is_none());
        assert!(manager.capture().unwrap().retrieves.is_empty());
    }

    #[test]
    fn channel_change_forces_new_retrieval() {
        let (mut manager, _, _) = manager(FakeSource::new(30.0));
        manager.enter_frame().unwrap();
        manager.frame();

        manager.set_channel(1);
        manager.frame();
        manager.set_channel(1);
        manager.frame();

        assert_eq!(manager.capture().unwrap().retrieves, vec![0, 1]);
    }

    #[test]
    fn replaced_frame_is_what_gets_shown() {
        let (mut manager, clock, _) = manager(FakeSource::new(30.0));
        let unused = Frame::from_pixels(vec![0; 12], 2, 2, PixelFormat::Rgb24, 99);
        assert!(!manager.replace_frame(unused));

        manager.enter_frame().unwrap();
        let filtered = manager.frame().unwrap().mirrored();
        assert!(manager.replace_frame(filtered.clone()));
        assert_eq!(manager.frame().unwrap().data, filtered.data);
        manager.exit_frame();
        clock.advance(Duration::from_millis(10));

        assert_eq!(manager.preview().unwrap().shown[0].data, filtered.data);
        assert_eq!(manager.capture().unwrap().retrieves.len(), 1);
    }

    #[test]
    fn dropped_frame_skips_all_side_effects() {
        let mut source = FakeSource::new(30.0);
        source.fail_retrieve = true;
        let (mut manager, clock, factory) = manager(source);
        manager.write_image("never.png");
        manager.start_writing_video("never.avi", FourCc::I420);

        let report = cycle(&mut manager, &clock);

        assert!(report.dropped);
        assert!(!manager.entered_frame());
        assert_eq!(manager.frames_elapsed(), 0);
        assert!(manager.preview().unwrap().shown.is_empty());
        assert!(manager.is_writing_image());
        assert!(factory.events.borrow().is_empty());
    }

    #[test]
    fn first_cycle_only_starts_the_clock() {
        let (mut manager, clock, _) = manager(FakeSource::new(30.0));
        cycle(&mut manager, &clock);

        assert_eq!(manager.frames_elapsed(), 1);
        assert!(manager.fps_estimate().is_none());
    }

    #[test]
    fn fps_estimate_counts_from_first_cycle() {
        let (mut manager, clock, _) = manager(FakeSource::new(30.0));
        // cycles at t = 0, 0.1, ..., 0.9
        for _ in 0..10 {
            cycle(&mut manager, &clock);
        }

        // 9 frames over 0.9s after the first
        let fps = manager.fps_estimate().unwrap();
        assert!((fps - 10.0).abs() < 1e-9, "fps = {fps}");
        assert_eq!(manager.frames_elapsed(), 10);
    }

    #[test]
    fn preview_gets_a_mirrored_copy() {
        let (mut manager, clock, _) = manager(FakeSource::new(30.0));
        manager.set_mirror_preview(true);

        manager.enter_frame().unwrap();
        let original = manager.frame().unwrap().clone();
        manager.exit_frame();
        clock.advance(Duration::from_millis(10));

        let shown = &manager.preview().unwrap().shown[0];
        assert_eq!(shown.data, original.mirrored().data);
        assert_ne!(shown.data, original.data);
        // the retrieved buffer is not flipped in place
        assert_eq!(&original.data[..3], &[0, 1, 2]);
    }

    #[test]
    fn preview_failure_is_reported_not_raised() {
        let (mut manager, clock, _) = manager(FakeSource::new(30.0));
        manager.preview_mut().unwrap().fail = true;

        let report = cycle(&mut manager, &clock);

        assert!(!report.dropped);
        assert!(matches!(report.errors[..], [CaptureError::Preview(_)]));
        assert_eq!(manager.frames_elapsed(), 1);
    }

    #[test]
    fn image_request_is_consumed_by_one_exit() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.png");
        let last = dir.path().join("last.png");
        let (mut manager, clock, _) = manager(FakeSource::new(30.0));

        manager.write_image(&first);
        manager.write_image(&last);
        assert!(manager.is_writing_image());

        let report = cycle(&mut manager, &clock);
        assert_eq!(report.image_written.as_deref(), Some(last.as_path()));
        assert!(last.exists());
        assert!(!first.exists());
        assert!(!manager.is_writing_image());

        let report = cycle(&mut manager, &clock);
        assert!(report.image_written.is_none());
    }

    #[test]
    fn failed_image_write_still_clears_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("shot.png");
        let (mut manager, clock, _) = manager(FakeSource::new(30.0));

        manager.write_image(&path);
        let report = cycle(&mut manager, &clock);

        assert!(matches!(
            &report.errors[..],
            [CaptureError::ImageWrite { path: p, .. }] if p == &path
        ));
        assert!(!manager.is_writing_image());
    }

    #[test]
    fn known_rate_opens_encoder_on_first_frame() {
        let (mut manager, clock, factory) = manager(FakeSource::new(30.0));
        manager.start_writing_video("out.avi", FourCc::MJPG);
        assert!(manager.is_writing_video());
        assert!(!manager.is_video_encoder_ready());

        let report = cycle(&mut manager, &clock);

        assert_eq!(report.video, VideoStep::Written);
        assert_eq!(
            factory.opens(),
            vec![Event::Open {
                path: "out.avi".into(),
                fps: 30.0,
                size: (2, 2)
            }]
        );
        assert_eq!(factory.writes_to("out.avi"), vec![1]);
    }

    #[test]
    fn unknown_rate_waits_for_warmup() {
        let (mut manager, clock, factory) = manager(FakeSource::new(0.0));
        manager.start_writing_video("screencast.avi", FourCc::I420);

        let steps: Vec<VideoStep> = (0..25)
            .map(|_| cycle(&mut manager, &clock).video)
            .collect();

        assert!(steps[..20].iter().all(|s| *s == VideoStep::EncoderNotReady));
        assert!(steps[20..].iter().all(|s| *s == VideoStep::Written));
        assert_eq!(factory.writes_to("screencast.avi"), vec![21, 22, 23, 24, 25]);

        let opens = factory.opens();
        assert_eq!(opens.len(), 1);
        match &opens[0] {
            Event::Open { fps, .. } => assert!((fps - 10.0).abs() < 1e-9, "fps = {fps}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn encoder_rate_comes_from_the_last_warmup_cycle() {
        let (mut manager, clock, factory) = manager(FakeSource::new(0.0));
        manager.start_writing_video("stall.avi", FourCc::I420);
        for _ in 0..20 {
            cycle(&mut manager, &clock);
        }
        // 19 frames over 1.9s
        assert!((manager.fps_estimate().unwrap() - 10.0).abs() < 1e-9);

        // Device stalls before cycle 21, dragging the running estimate down
        clock.advance(Duration::from_secs(2));
        assert_eq!(cycle(&mut manager, &clock).video, VideoStep::Written);
        assert!((manager.fps_estimate().unwrap() - 5.0).abs() < 1e-9);

        match &factory.opens()[..] {
            [Event::Open { fps, .. }] => assert!((fps - 10.0).abs() < 1e-9, "fps = {fps}"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(factory.writes_to("stall.avi"), vec![21]);
    }

    #[test]
    fn recording_started_late_skips_warmup() {
        let (mut manager, clock, factory) = manager(FakeSource::new(0.0));
        for _ in 0..30 {
            cycle(&mut manager, &clock);
        }

        manager.start_writing_video("late.avi", FourCc::I420);
        assert_eq!(cycle(&mut manager, &clock).video, VideoStep::Written);
        assert_eq!(factory.writes_to("late.avi"), vec![31]);
    }

    #[test]
    fn restart_moves_frames_to_new_file() {
        let (mut manager, clock, factory) = manager(FakeSource::new(30.0));
        manager.start_writing_video("old.avi", FourCc::I420);
        cycle(&mut manager, &clock);
        cycle(&mut manager, &clock);

        manager.stop_writing_video();
        assert!(!manager.is_writing_video());
        cycle(&mut manager, &clock);

        manager.start_writing_video("new.avi", FourCc::I420);
        cycle(&mut manager, &clock);
        cycle(&mut manager, &clock);

        assert_eq!(factory.writes_to("old.avi"), vec![1, 2]);
        assert_eq!(factory.writes_to("new.avi"), vec![4, 5]);
        assert!(factory.events.borrow().contains(&Event::Finish {
            path: "old.avi".into()
        }));
    }

    #[test]
    fn restart_without_stop_finalizes_old_file() {
        let (mut manager, clock, factory) = manager(FakeSource::new(30.0));
        manager.start_writing_video("a.avi", FourCc::I420);
        cycle(&mut manager, &clock);

        manager.start_writing_video("b.avi", FourCc::I420);
        cycle(&mut manager, &clock);

        assert_eq!(factory.writes_to("a.avi"), vec![1]);
        assert_eq!(factory.writes_to("b.avi"), vec![2]);
        assert!(factory.events.borrow().contains(&Event::Finish {
            path: "a.avi".into()
        }));
    }

    #[test]
    fn encoder_open_failure_ends_recording() {
        let (manager, clock, _) = manager(FakeSource::new(30.0));
        let factory = RecordingFactory {
            fail_open: true,
            ..Default::default()
        };
        let mut manager = manager.with_video_writers(factory);
        manager.start_writing_video("bad.avi", FourCc::new(b"ZZZZ"));

        let report = cycle(&mut manager, &clock);

        assert_eq!(report.video, VideoStep::Failed);
        assert!(matches!(
            &report.errors[..],
            [CaptureError::VideoWrite { .. }]
        ));
        assert!(!manager.is_writing_video());
    }

    #[test]
    fn size_change_after_open_skips_frames() {
        let (mut manager, clock, factory) = manager(FakeSource::new(30.0));
        manager.start_writing_video("out.avi", FourCc::I420);
        cycle(&mut manager, &clock);

        // Reach into the fake device to change its resolution
        if let Some(source) = manager.capture.as_mut() {
            source.width = 4;
        }
        assert_eq!(cycle(&mut manager, &clock).video, VideoStep::Skipped);
        assert!(manager.is_writing_video());
        assert_eq!(factory.writes_to("out.avi"), vec![1]);
    }

    #[test]
    fn stop_without_recording_is_harmless() {
        let (mut manager, clock, factory) = manager(FakeSource::new(30.0));
        manager.stop_writing_video();
        assert_eq!(cycle(&mut manager, &clock).video, VideoStep::Idle);
        assert!(factory.events.borrow().is_empty());
    }
}
