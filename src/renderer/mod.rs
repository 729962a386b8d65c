pub mod config;
pub mod shader_data;

mod contexts;
mod resources;

use std::sync::Arc;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use winit::window::Window;
use crate::renderer::config::RenderConfig;
use crate::renderer::contexts::compute_ctx::FrameCompositor;
use crate::renderer::contexts::device_ctx::RenderDeviceContext;
use crate::renderer::contexts::frame_ctx::RenderFrameContext;
use crate::renderer::contexts::present_ctx::{AcquireOutcome, PresentTarget, RecreateOutcome};
use crate::renderer::resources::shader::ComputeShader;
use crate::renderer::shader_data::FrameParams;

const COMPUTE_SHADER_NAME: &str = "render";

/// Owns the whole GPU side: device context, presentation target, per-frame
/// signal sets, and the compositor. One instance drives one window.
pub struct Renderer {
    config: RenderConfig,

    dev_ctx: RenderDeviceContext,
    present: Option<PresentTarget>,
    frames: Option<RenderFrameContext>,
    shader: Option<ComputeShader>,
    // Built lazily: needs a non-zero-sized presentation chain to exist.
    compositor: Option<FrameCompositor>,

    resize_requested: bool,
    shut_down: bool,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        let mut dev_ctx = RenderDeviceContext::new(&config, Some(window.as_ref()))?;

        let surface = dev_ctx.instance.create_surface(&window)?;
        dev_ctx.initialize_for_surface(&surface)?;
        let dev = dev_ctx.device()?;

        let present = PresentTarget::new(
            window,
            surface,
            &dev_ctx.instance.instance,
            dev,
            &config,
        )?;

        let frames = RenderFrameContext::new(dev, config.frames_in_flight)?;
        let shader = ComputeShader::new(COMPUTE_SHADER_NAME, &dev.logical)?;

        let compositor = if present.is_ready() {
            Some(FrameCompositor::new(dev, &present, &shader, config.frames_in_flight)?)
        } else {
            None
        };

        Ok(Self {
            config,
            dev_ctx,
            present: Some(present),
            frames: Some(frames),
            shader: Some(shader),
            compositor,
            resize_requested: false,
            shut_down: false,
        })
    }

    /// Called from the windowing layer's resize notification. Polled once
    /// per `draw`, never acted on mid-frame.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn draw(&mut self, params: FrameParams) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }

        let dev = self.dev_ctx.device()?;
        let present = self.present.as_mut().ok_or_eyre("renderer already shut down")?;
        let frames = self.frames.as_ref().ok_or_eyre("renderer already shut down")?;

        if self.resize_requested {
            // Idle-wait happens inside recreate, before any teardown.
            match present.recreate(dev)? {
                RecreateOutcome::Recreated => self.resize_requested = false,
                // Minimized; keep the flag and retry next iteration.
                RecreateOutcome::Deferred => return Ok(()),
            }
        }

        let sync = frames.begin_frame(dev)?;

        let image_index = match present.acquire_next_image(dev, sync.acquire)? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Skipped => return Ok(()),
        };

        // Acquire may have rebuilt the chain under us; the compositor must
        // match the live chain before it touches the acquired image.
        let stale = self
            .compositor
            .as_ref()
            .is_none_or(|c| c.chain_generation() != present.generation());
        if stale {
            match self.compositor.as_mut() {
                Some(compositor) => compositor.recreate(dev, present)?,
                None => {
                    let shader = self.shader.as_ref().ok_or_eyre("renderer already shut down")?;
                    self.compositor = Some(FrameCompositor::new(
                        dev,
                        present,
                        shader,
                        self.config.frames_in_flight,
                    )?);
                }
            }
        }
        let compositor = self.compositor.as_ref().ok_or_eyre("compositor unavailable")?;

        let swap_image = present.image(image_index)?;
        compositor.dispatch(dev, frames.slot(), swap_image, sync, params)?;
        present.present(dev, image_index, sync.present)?;

        if self.config.lockstep {
            dev.wait_idle()?;
        }

        if let Some(frames) = self.frames.as_mut() {
            frames.advance();
        }

        Ok(())
    }

    /// Release every GPU object in strict reverse-creation order. Safe to
    /// call any number of times; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Ok(dev) = self.dev_ctx.device() {
            if let Err(err) = dev.wait_idle() {
                log::error!("Device wait failed during shutdown: {err}");
            }

            if let Some(mut compositor) = self.compositor.take() {
                if let Err(err) = compositor.destroy(dev) {
                    log::error!("Compositor teardown failed: {err}");
                }
            }
            if let Some(mut shader) = self.shader.take() {
                shader.destroy(&dev.logical);
            }
            if let Some(mut frames) = self.frames.take() {
                frames.destroy(dev);
            }
            if let Some(mut present) = self.present.take() {
                present.destroy(dev);
            }
        }
        self.dev_ctx.shutdown();

        log::info!("Renderer shut down");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
