pub mod device_ctx;
pub mod present_ctx;
pub mod compute_ctx;
pub mod frame_ctx;
