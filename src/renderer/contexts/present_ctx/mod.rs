pub mod swapchain;

use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::present_ctx::swapchain::Swapchain;

/// Result of asking for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A fresh image index, safe to composite into.
    Ready(u32),
    /// The chain could not produce an image this iteration (zero-sized
    /// drawable); the frame must be skipped.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    Recreated,
    /// Drawable is zero-sized; the previous chain state is left fully
    /// intact and recreation retries on a later iteration.
    Deferred,
}

/// Presentation target of the renderer: the surface, the chosen format and
/// present mode, and the current build of the image chain.
///
/// State machine: no chain (minimized) <-> chain ready; every successful
/// rebuild bumps `generation` so dependents can notice staleness.
pub struct PresentTarget {
    window: Arc<Window>,

    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,

    swapchain: Option<Swapchain>,
    generation: u64,
}

/// Prefer an SRGB 8-bit-per-channel format, otherwise take what the surface
/// reports first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when available and vsync is not forced; FIFO is the only mode
/// every implementation guarantees.
fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

impl PresentTarget {
    pub fn new(
        window: Arc<Window>,
        surface: (vk::SurfaceKHR, ash::khr::surface::Instance),
        instance: &ash::Instance,
        dev: &RenderDevice,
        config: &RenderConfig,
    ) -> Result<Self> {
        let (surface, surface_loader) = surface;

        let surface_formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(dev.physical, surface)?
        };
        let surface_present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(dev.physical, surface)?
        };

        let surface_format = choose_surface_format(&surface_formats)
            .ok_or_eyre("surface reports no pixel formats")?;
        if surface_present_modes.is_empty() {
            return Err(eyre!("surface reports no present modes"));
        }
        let present_mode = choose_present_mode(&surface_present_modes, config.vsync);

        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &dev.logical);

        let mut target = Self {
            window,
            surface,
            surface_loader,
            swapchain_loader,
            surface_format,
            present_mode,
            swapchain: None,
            generation: 0,
        };
        target.build_swapchain(dev)?;

        Ok(target)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ready(&self) -> bool {
        self.swapchain.is_some()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|chain| chain.extent)
    }

    pub fn image(&self, index: u32) -> Result<vk::Image> {
        let chain = self.swapchain.as_ref().ok_or_eyre("presentation chain not built")?;
        chain
            .images
            .get(index as usize)
            .copied()
            .ok_or_else(|| eyre!("image index {index} out of range"))
    }

    fn drawable_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// Build a fresh chain at the current drawable size. Leaves the previous
    /// build untouched when the drawable is zero-sized.
    fn build_swapchain(&mut self, dev: &RenderDevice) -> Result<RecreateOutcome> {
        let drawable = self.drawable_size();
        if drawable.0 == 0 || drawable.1 == 0 {
            return Ok(RecreateOutcome::Deferred);
        }

        let old_handle = self
            .swapchain
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |chain| chain.handle);

        let built = Swapchain::new(
            &self.surface,
            &self.surface_loader,
            &self.swapchain_loader,
            &self.surface_format,
            self.present_mode,
            drawable,
            old_handle,
            dev,
        )?;

        match built {
            Some(chain) => {
                if let Some(mut old) = self.swapchain.take() {
                    old.destroy(dev, &self.swapchain_loader);
                }
                log::info!(
                    "Presentation chain ready: {}x{}, {} images, format {:?}",
                    chain.extent.width,
                    chain.extent.height,
                    chain.images.len(),
                    chain.format,
                );
                self.swapchain = Some(chain);
                self.generation += 1;
                Ok(RecreateOutcome::Recreated)
            }
            None => Ok(RecreateOutcome::Deferred),
        }
    }

    /// Tear down and rebuild the chain at the current drawable size. Waits
    /// for the device to go idle first; atomic from the caller's view.
    pub fn recreate(&mut self, dev: &RenderDevice) -> Result<RecreateOutcome> {
        let drawable = self.drawable_size();
        if drawable.0 == 0 || drawable.1 == 0 {
            return Ok(RecreateOutcome::Deferred);
        }

        dev.wait_idle()?;
        self.build_swapchain(dev)
    }

    /// Ask the presentation engine for the next image, signaling
    /// `acquire_sem` once it is usable. An out-of-date chain is rebuilt
    /// synchronously and acquisition retried once.
    pub fn acquire_next_image(
        &mut self,
        dev: &RenderDevice,
        acquire_sem: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        if self.swapchain.is_none()
            && self.recreate(dev)? == RecreateOutcome::Deferred
        {
            return Ok(AcquireOutcome::Skipped);
        }

        match self.try_acquire(acquire_sem)? {
            Some(index) => Ok(AcquireOutcome::Ready(index)),
            None => {
                // Out of date: rebuild, then retry exactly once.
                log::debug!("Acquire reported an out-of-date chain, recreating");
                if self.recreate(dev)? == RecreateOutcome::Deferred {
                    return Ok(AcquireOutcome::Skipped);
                }
                let index = self
                    .try_acquire(acquire_sem)?
                    .ok_or_eyre("chain out of date again immediately after recreation")?;
                Ok(AcquireOutcome::Ready(index))
            }
        }
    }

    /// Ok(None) when the chain is out of date; suboptimal still yields an
    /// index. Anything else is fatal.
    fn try_acquire(&self, acquire_sem: vk::Semaphore) -> Result<Option<u32>> {
        let chain = self.swapchain.as_ref().ok_or_eyre("presentation chain not built")?;
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                chain.handle,
                u64::MAX,
                acquire_sem,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(err) => {
                Err(eyre!("failed to acquire presentable image: {err}"))
            }
        }
    }

    /// Hand the image back to the presentation engine once `wait_sem` is
    /// satisfied. Out-of-date and suboptimal results rebuild the chain and
    /// drop the frame without surfacing an error.
    pub fn present(
        &mut self,
        dev: &RenderDevice,
        image_index: u32,
        wait_sem: vk::Semaphore,
    ) -> Result<()> {
        let chain = self.swapchain.as_ref().ok_or_eyre("presentation chain not built")?;

        let wait_semaphores = [wait_sem];
        let swapchains = [chain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let presented = unsafe {
            self.swapchain_loader
                .queue_present(dev.present_queue.handle, &present_info)
        };
        match presented {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Present reported a stale chain, recreating");
                self.recreate(dev)?;
                Ok(())
            }
            Err(err) => {
                Err(eyre!("failed to present swapchain image: {err}"))
            }
        }
    }

    /// Destroy the chain and then the surface. The instance must still be
    /// alive.
    pub fn destroy(&mut self, dev: &RenderDevice) {
        if let Some(mut chain) = self.swapchain.take() {
            chain.destroy(dev, &self.swapchain_loader);
        }
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
                self.surface = vk::SurfaceKHR::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn prefers_srgb_8bit_format() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB),
        );
    }

    #[test]
    fn falls_back_to_first_reported_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM),
        );
    }

    #[test]
    fn zero_formats_is_an_error_upstream() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn prefers_mailbox_when_low_latency_allowed() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn vsync_forces_fifo_even_when_mailbox_exists() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn fifo_is_the_fallback_mode() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }
}
