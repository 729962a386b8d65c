use bytemuck::{Pod, Zeroable};
use glam::Vec2;

/// Per-frame view state pushed to the compute kernel as a push constant.
/// Layout must match the `FrameParams` block in `shaders/render.comp`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct FrameParams {
    pub offset: Vec2,
    pub zoom: f32,
    pub time: f32,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
            time: 0.0,
        }
    }
}

impl FrameParams {
    pub const SIZE: u32 = size_of::<Self>() as u32;
}
