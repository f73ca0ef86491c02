pub mod sink;
pub mod window;

pub use sink::{DisplaySink, NoDisplay};
pub use window::{normalize_keycode, KeypressCallback, Sdl2WindowManager};
