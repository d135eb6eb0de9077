//! SDL2 preview window for the annotated stream, with interactive keys

use color_eyre::{eyre::eyre, Result};
use image::RgbImage;
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::info;

/// Interactive commands mapped from keyboard input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Quit,
    Statistics,
    ShowConfig,
    ResetStats,
}

/// SDL2 window displaying annotated frames
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: sdl2::EventPump,
    width: u32,
    height: u32,
}

impl Sdl2Display {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("Vigil Detection Preview", width, height)
            .position_centered()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        info!("Preview window opened ({}x{})", width, height);

        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            width,
            height,
        })
    }

    /// Render an RGB frame into the window
    pub fn render(&mut self, img: &RgbImage) -> Result<()> {
        if img.width() != self.width || img.height() != self.height {
            return Err(eyre!(
                "frame {}x{} does not match window {}x{}",
                img.width(),
                img.height(),
                self.width,
                self.height
            ));
        }

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, self.width, self.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, img.as_raw(), (self.width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas.copy(&texture, None, None).map_err(|e| eyre!(e))?;
        self.canvas.present();
        Ok(())
    }

    /// Drain pending window/keyboard events into commands
    pub fn poll_keys(&mut self) -> Vec<KeyCommand> {
        let mut commands = Vec::new();
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => commands.push(KeyCommand::Quit),
                Event::KeyDown {
                    keycode: Some(key), ..
                } => match key {
                    Keycode::Q | Keycode::Escape => commands.push(KeyCommand::Quit),
                    Keycode::S => commands.push(KeyCommand::Statistics),
                    Keycode::C => commands.push(KeyCommand::ShowConfig),
                    Keycode::R => commands.push(KeyCommand::ResetStats),
                    _ => {}
                },
                _ => {}
            }
        }
        commands
    }
}
