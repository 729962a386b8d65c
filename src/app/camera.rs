use glam::Vec2;
use crate::renderer::shader_data::FrameParams;

/// Pan/zoom view over the rendered plane. Owned by the frame loop and
/// updated synchronously from the polled input state.
pub struct ViewCamera {
    offset: Vec2,
    zoom: f32,
}

impl ViewCamera {
    // View-heights per second of panning at zoom 1.
    const PAN_SPEED: f32 = 0.5;
    // Zoom multiplier applied per second the key is held.
    const ZOOM_RATE: f32 = 1.8;

    pub fn new() -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
        }
    }

    /// Apply one frame of held input. Pan distance shrinks with zoom so
    /// on-screen movement speed stays constant.
    pub fn update(&mut self, pan: Vec2, zoom_direction: f32, reset: bool, delta_time: f32) {
        if reset {
            *self = Self::new();
            return;
        }

        self.offset += pan * Self::PAN_SPEED * delta_time / self.zoom;
        if zoom_direction != 0.0 {
            self.zoom *= Self::ZOOM_RATE.powf(zoom_direction * delta_time);
        }
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn frame_params(&self, time: f32) -> FrameParams {
        FrameParams {
            offset: self.offset,
            zoom: self.zoom,
            time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pan_distance_shrinks_as_zoom_grows() {
        let mut near = ViewCamera::new();
        near.update(Vec2::X, 0.0, false, 1.0);

        let mut far = ViewCamera { offset: Vec2::ZERO, zoom: 4.0 };
        far.update(Vec2::X, 0.0, false, 1.0);

        assert!(far.offset().x < near.offset().x);
        assert!((near.offset().x / far.offset().x - 4.0).abs() < 1e-5);
    }

    #[test]
    fn zooming_is_exponential_in_hold_time() {
        let mut camera = ViewCamera::new();
        camera.update(Vec2::ZERO, 1.0, false, 1.0);
        let one_second = camera.zoom();

        let mut camera = ViewCamera::new();
        camera.update(Vec2::ZERO, 1.0, false, 2.0);
        assert!((camera.zoom() - one_second * one_second).abs() < 1e-4);
    }

    #[test]
    fn reset_restores_the_default_view() {
        let mut camera = ViewCamera { offset: Vec2::new(3.0, -2.0), zoom: 10.0 };
        camera.update(Vec2::ZERO, 0.0, true, 0.016);
        assert_eq!(camera.offset(), Vec2::ZERO);
        assert_eq!(camera.zoom(), 1.0);
    }

    #[test]
    fn frame_params_carry_the_view_state() {
        let camera = ViewCamera { offset: Vec2::new(1.0, 2.0), zoom: 3.0 };
        let params = camera.frame_params(4.0);
        assert_eq!(params.offset, Vec2::new(1.0, 2.0));
        assert_eq!(params.zoom, 3.0);
        assert_eq!(params.time, 4.0);
    }
}
