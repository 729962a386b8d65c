/// Contains configuration options for the renderer like vsync, frame pacing,
/// and validation settings
#[derive(Clone)]
pub struct RenderConfig {
    /// Force the guaranteed-vsync present mode even when a low-latency
    /// mode is available.
    pub vsync: bool,

    /// Number of buffered per-frame signal sets. Each slot carries its own
    /// fence, so up to this many frames may be in flight at once.
    pub frames_in_flight: usize,

    /// Debug pacing mode: wait for the device to go idle after every
    /// presented frame. Single-frame semantics, lowest throughput.
    pub lockstep: bool,

    /// Request the Khronos validation layer. Silently disabled when the
    /// layer is not installed.
    pub validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            vsync: false,
            frames_in_flight: 3,
            lockstep: false,
            validation: cfg!(debug_assertions),
        }
    }
}
