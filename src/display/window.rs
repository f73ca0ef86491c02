//! SDL2 Window Manager
//! Owns the preview window, renders frames into it and turns keyboard input
//! into keypress callbacks.

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::{debug, info};

use crate::capture::{decoder, Frame, PixelFormat};
use crate::display::sink::DisplaySink;

/// Keypress handler, receives the low byte of the key code
pub type KeypressCallback = Box<dyn FnMut(u8)>;

/// Drop the non-portable high-order bits of a key code
pub fn normalize_keycode(code: i32) -> u8 {
    (code & 0xFF) as u8
}

struct WindowState {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
}

pub struct Sdl2WindowManager {
    sdl: sdl2::Sdl,
    title: String,
    width: u32,
    height: u32,
    window: Option<WindowState>,
    event_pump: Option<EventPump>,
    on_keypress: Option<KeypressCallback>,
}

impl Sdl2WindowManager {
    pub fn new(
        title: impl Into<String>,
        width: u32,
        height: u32,
        on_keypress: Option<KeypressCallback>,
    ) -> Result<Self> {
        let sdl = sdl2::init().map_err(|e| eyre!(e))?;

        Ok(Self {
            sdl,
            title: title.into(),
            width,
            height,
            window: None,
            event_pump: None,
            on_keypress,
        })
    }

    pub fn is_window_created(&self) -> bool {
        self.window.is_some()
    }

    pub fn create_window(&mut self) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }

        let video_subsystem = self.sdl.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&self.title, self.width, self.height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        // SDL allows a single event pump per context
        if self.event_pump.is_none() {
            self.event_pump = Some(self.sdl.event_pump().map_err(|e| eyre!(e))?);
        }

        info!("Created window {:?} ({}x{})", self.title, self.width, self.height);
        self.window = Some(WindowState {
            canvas,
            texture_creator,
        });
        Ok(())
    }

    pub fn destroy_window(&mut self) {
        if self.window.take().is_some() {
            info!("Destroyed window {:?}", self.title);
        }
    }

    /// Poll pending input. Key presses go to the callback; closing the
    /// window destroys it.
    pub fn process_events(&mut self) {
        let Some(pump) = self.event_pump.as_mut() else {
            return;
        };

        let mut quit = false;
        for event in pump.poll_iter() {
            match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    quit = true;
                }
                Event::KeyDown {
                    keycode: Some(keycode),
                    repeat: false,
                    ..
                } => {
                    let code = normalize_keycode(keycode.into_i32());
                    debug!("Keypress {}", code);
                    if let Some(callback) = self.on_keypress.as_mut() {
                        callback(code);
                    }
                }
                _ => {}
            }
        }

        if quit {
            self.destroy_window();
        }
    }
}

impl DisplaySink for Sdl2WindowManager {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        let Some(window) = self.window.as_mut() else {
            return Ok(());
        };

        let rgb = match frame.format() {
            PixelFormat::Rgb24 => frame.clone(),
            _ => decoder::decode_to_rgb(frame)?,
        };
        let (width, height) = rgb.size();

        let mut texture = window
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &rgb.data, rgb.meta.stride as usize)
            .map_err(|e| eyre!(e))?;

        window.canvas.clear();
        window
            .canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        window.canvas.present();
        Ok(())
    }
}
