pub mod instance;
pub mod device;
pub mod queue;

use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;

/// Responsibilities:
/// - Manage the Vulkan instance, device, and queues
/// - Own one command pool per recording queue family
/// - Run one-shot setup submissions
///
/// Construction is two-phase because the display surface belongs to the
/// windowing layer and may not exist yet: `new` builds the instance only,
/// `initialize_for_surface` finishes device setup exactly once.
pub struct RenderDeviceContext {
    pub instance: RenderInstance,
    device: Option<RenderDevice>,
}

impl RenderDeviceContext {
    pub fn new(
        config: &RenderConfig,
        window: Option<&Window>,
    ) -> Result<Self> {
        let instance = RenderInstance::new(config, window)?;

        Ok(Self {
            instance,
            device: None,
        })
    }

    /// Select a physical device against `surface` and create the logical
    /// device, queues, and command pools. A second call is a no-op.
    pub fn initialize_for_surface(
        &mut self,
        surface: &(vk::SurfaceKHR, ash::khr::surface::Instance),
    ) -> Result<()> {
        if self.device.is_some() {
            log::warn!("Device context already initialized for a surface, ignoring");
            return Ok(());
        }
        if surface.0 == vk::SurfaceKHR::null() {
            return Err(eyre!("cannot initialize device context against a null surface"));
        }

        self.device = Some(RenderDevice::new(&self.instance.instance, surface)?);

        Ok(())
    }

    pub fn device(&self) -> Result<&RenderDevice> {
        self.device
            .as_ref()
            .ok_or_else(|| eyre!("device context not yet initialized for a surface"))
    }

    /// Destroy the device and then the instance. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.destroy();
        }
        self.instance.destroy();
    }
}
