use log::{debug, warn};
use sdl2::{
    event::Event, keyboard::Keycode, mouse::MouseButton, pixels::PixelFormatEnum, render::Canvas,
    video::Window, EventPump, Sdl,
};

use crate::{
    events::{keys, EventSource, SciEvent, ScriptedEvents},
    graphics::{Colour, Display, Rect, SCREEN_HEIGHT, SCREEN_WIDTH},
};

const WIDTH: usize = SCREEN_WIDTH as usize;
const HEIGHT: usize = SCREEN_HEIGHT as usize;

pub struct SdlDisplay {
    canvas: Canvas<Window>,
    rgb: Vec<u8>,
}

impl SdlDisplay {
    pub fn init(sdl_context: &Sdl) -> Result<Self, String> {
        let video_subsystem = sdl_context.video()?;
        let window = video_subsystem
            .window("SCI Player", WIDTH as u32 * 3, HEIGHT as u32 * 3)
            .position_centered()
            .resizable()
            .build()
            .map_err(|e| e.to_string())?;

        let mut canvas = window
            .into_canvas()
            .present_vsync()
            .build()
            .map_err(|e| e.to_string())?;
        canvas
            .set_logical_size(WIDTH as u32, HEIGHT as u32)
            .map_err(|e| e.to_string())?;

        Ok(Self {
            canvas,
            rgb: vec![0; WIDTH * HEIGHT * 3],
        })
    }

    fn present(&mut self) -> Result<(), String> {
        let creator = self.canvas.texture_creator();
        let mut texture = creator
            .create_texture_streaming(PixelFormatEnum::RGB24, WIDTH as u32, HEIGHT as u32)
            .map_err(|e| e.to_string())?;
        texture
            .update(None, &self.rgb, WIDTH * 3)
            .map_err(|e| e.to_string())?;
        self.canvas.copy(&texture, None, None)?;
        self.canvas.present();
        Ok(())
    }
}

impl Display for SdlDisplay {
    fn update(&mut self, visual: &[u8], rect: Rect) {
        let rect = rect.clip(&Rect::screen());
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                let i = y as usize * WIDTH + x as usize;
                let Some(&c) = visual.get(i) else {
                    continue;
                };
                let colour = Colour::from_ega(c);
                self.rgb[i * 3..i * 3 + 3].copy_from_slice(&[colour.r, colour.g, colour.b]);
            }
        }
        if let Err(e) = self.present() {
            warn!("Unable to present frame: {e}");
        }
    }
}

pub struct SdlEvents {
    event_pump: EventPump,
    pending: ScriptedEvents,
}

impl SdlEvents {
    pub fn init(sdl_context: &Sdl) -> Result<Self, String> {
        Ok(Self {
            event_pump: sdl_context.event_pump()?,
            pending: ScriptedEvents::default().with_mouse(),
        })
    }

    fn pump(&mut self) {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => self.pending.request_quit(),
                Event::KeyDown {
                    keycode: Some(keycode),
                    ..
                } => {
                    if let Some(message) = key_message(keycode) {
                        self.pending.push(SciEvent::key(message));
                    }
                }
                Event::MouseButtonDown {
                    mouse_btn: MouseButton::Left,
                    x,
                    y,
                    ..
                } => self.pending.push(SciEvent::mouse_down(x as i16, y as i16)),
                _ => {}
            }
        }
    }
}

/// Scan codes for cursor keys, ASCII for the rest
fn key_message(keycode: Keycode) -> Option<u16> {
    let message = match keycode {
        Keycode::Up | Keycode::Kp8 => keys::UP,
        Keycode::Down | Keycode::Kp2 => keys::DOWN,
        Keycode::Left | Keycode::Kp4 => keys::LEFT,
        Keycode::Right | Keycode::Kp6 => keys::RIGHT,
        Keycode::Home | Keycode::Kp7 => keys::HOME,
        Keycode::End | Keycode::Kp1 => keys::END,
        Keycode::PageUp | Keycode::Kp9 => keys::PAGE_UP,
        Keycode::PageDown | Keycode::Kp3 => keys::PAGE_DOWN,
        Keycode::Kp5 => keys::CENTER,
        Keycode::Escape => keys::ESCAPE,
        Keycode::Return | Keycode::KpEnter => keys::ENTER,
        other => {
            let code = other as i32;
            if !(0x20..0x7f).contains(&code) {
                debug!("Ignoring key {other:?}");
                return None;
            }
            code as u16
        }
    };
    Some(message)
}

impl EventSource for SdlEvents {
    fn poll(&mut self, mask: u16) -> SciEvent {
        self.pump();
        self.pending.poll(mask)
    }

    fn quit_requested(&self) -> bool {
        self.pending.quit_requested()
    }

    fn has_mouse(&self) -> bool {
        true
    }
}
