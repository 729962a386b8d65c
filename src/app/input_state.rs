use glam::Vec2;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::keyboard::Key;

/// Keyboard state owned by the driving loop. Updated while events are
/// pumped and read back exactly once per frame; nothing else writes it.
#[derive(Default)]
pub struct InputState {
    pan_up: bool,
    pan_down: bool,
    pan_left: bool,
    pan_right: bool,
    zoom_in: bool,
    zoom_out: bool,
    reset_requested: bool,
}

impl InputState {
    pub fn process_window_events(&mut self, event: &WindowEvent) {
        let WindowEvent::KeyboardInput {
            event: KeyEvent { logical_key, state, .. },
            ..
        } = event else {
            return;
        };

        let down = *state == ElementState::Pressed;
        match logical_key.as_ref() {
            Key::Character("w") => self.pan_up = down,
            Key::Character("s") => self.pan_down = down,
            Key::Character("a") => self.pan_left = down,
            Key::Character("d") => self.pan_right = down,
            Key::Character("q") => self.zoom_in = down,
            Key::Character("e") => self.zoom_out = down,
            Key::Character("r") => {
                if down {
                    self.reset_requested = true;
                }
            }
            _ => {}
        }
    }

    pub fn pan_direction(&self) -> Vec2 {
        let mut dir = Vec2::ZERO;
        if self.pan_up {
            dir.y += 1.0;
        }
        if self.pan_down {
            dir.y -= 1.0;
        }
        if self.pan_left {
            dir.x -= 1.0;
        }
        if self.pan_right {
            dir.x += 1.0;
        }
        dir
    }

    /// +1 zooming in, -1 zooming out, 0 when idle or both held.
    pub fn zoom_direction(&self) -> f32 {
        (self.zoom_in as i32 - self.zoom_out as i32) as f32
    }

    pub fn take_reset(&mut self) -> bool {
        std::mem::take(&mut self.reset_requested)
    }
}
