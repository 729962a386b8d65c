use ash::vk;
use color_eyre::eyre::{eyre, OptionExt, WrapErr};
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::frame_ctx::FrameSync;
use crate::renderer::contexts::present_ctx::PresentTarget;
use crate::renderer::resources::image::StorageImage;
use crate::renderer::resources::shader::ComputeShader;
use crate::renderer::shader_data::FrameParams;

// Must match the local_size declaration in shaders/render.comp.
const LOCAL_SIZE: u32 = 16;

/// Work-group counts covering every texel of `extent`.
fn group_counts(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(LOCAL_SIZE),
        extent.height.div_ceil(LOCAL_SIZE),
    )
}

const fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Command buffers and the internal compute->graphics signal for one frame
/// in flight. The semaphore never leaves this module.
struct CompositorFrame {
    cmd_compute: vk::CommandBuffer,
    cmd_graphics: vk::CommandBuffer,
    compute_done: vk::Semaphore,
}

/// Responsibilities:
/// - Run the compute kernel against an offscreen image sized to the
///   presentation chain
/// - Blit the result onto the acquired presentable image
/// - Sequence compute, transfer, and presentation-engine hazards across the
///   two queues
///
/// The two submissions overlap on hardware with a dedicated compute family
/// and serialize through in-order execution on a single combined family;
/// the semaphore chain is correct under both topologies, so nothing here
/// branches on which one was selected.
pub struct FrameCompositor {
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,

    offscreen: StorageImage,
    frames: Vec<CompositorFrame>,

    extent: vk::Extent2D,
    chain_generation: u64,
}

impl FrameCompositor {
    pub fn new(
        dev: &RenderDevice,
        present: &PresentTarget,
        shader: &ComputeShader,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let extent = present
            .extent()
            .ok_or_eyre("compositor requires a built presentation chain")?;

        let descriptor_set_layout = Self::create_descriptor_set_layout(dev)?;
        let pipeline_layout = Self::create_pipeline_layout(dev, descriptor_set_layout)?;
        let pipeline = Self::create_pipeline(dev, pipeline_layout, shader)?;

        let offscreen = Self::create_offscreen(dev, extent)?;
        let (descriptor_pool, descriptor_set) =
            Self::create_descriptor_pool_and_set(dev, descriptor_set_layout, offscreen.view)?;

        let frames = (0..frames_in_flight)
            .map(|_| Self::create_frame(dev))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Compositor ready: offscreen {}x{}, {} frames in flight",
            extent.width, extent.height, frames.len(),
        );

        Ok(Self {
            descriptor_set_layout,
            pipeline_layout,
            pipeline,
            descriptor_pool,
            descriptor_set,
            offscreen,
            frames,
            extent,
            chain_generation: present.generation(),
        })
    }

    /// Chain generation this compositor's offscreen image was sized
    /// against. A mismatch with the live chain means `recreate` must run
    /// before the next dispatch.
    pub fn chain_generation(&self) -> u64 {
        self.chain_generation
    }

    /// Rebuild only the offscreen image and its descriptor to match the
    /// chain's new extent. Pipeline and shader survive.
    pub fn recreate(&mut self, dev: &RenderDevice, present: &PresentTarget) -> Result<()> {
        let extent = present
            .extent()
            .ok_or_eyre("cannot resize compositor against an unbuilt presentation chain")?;

        dev.wait_idle()?;

        self.offscreen.destroy(&dev.logical, dev.allocator()?)?;
        unsafe {
            dev.logical.destroy_descriptor_pool(self.descriptor_pool, None);
        }

        self.offscreen = Self::create_offscreen(dev, extent)?;
        let (descriptor_pool, descriptor_set) = Self::create_descriptor_pool_and_set(
            dev,
            self.descriptor_set_layout,
            self.offscreen.view,
        )?;
        self.descriptor_pool = descriptor_pool;
        self.descriptor_set = descriptor_set;
        self.extent = extent;
        self.chain_generation = present.generation();

        log::debug!("Compositor resized to {}x{}", extent.width, extent.height);

        Ok(())
    }

    /// Per-frame protocol: dispatch the kernel on the compute queue, then
    /// blit the offscreen image onto the acquired presentable image on the
    /// graphics queue. Ordering runs acquire -> compute -> blit -> present
    /// purely through GPU-side signals; the host never blocks here.
    pub fn dispatch(
        &self,
        dev: &RenderDevice,
        slot: usize,
        swap_image: vk::Image,
        sync: &FrameSync,
        params: FrameParams,
    ) -> Result<()> {
        let frame = self
            .frames
            .get(slot)
            .ok_or_else(|| eyre!("frame slot {slot} out of range"))?;

        // The fence is repaid by the graphics submission below.
        unsafe {
            dev.logical.reset_fences(&[sync.in_flight])?;
        }

        self.record_compute(dev, frame, params)?;
        self.submit_compute(dev, frame, sync)?;

        self.record_graphics(dev, frame, swap_image)?;
        self.submit_graphics(dev, frame, sync)?;

        Ok(())
    }

    fn record_compute(
        &self,
        dev: &RenderDevice,
        frame: &CompositorFrame,
        params: FrameParams,
    ) -> Result<()> {
        let cmd = frame.cmd_compute;
        unsafe {
            dev.logical.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            dev.logical.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;

            dev.logical.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            dev.logical.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            dev.logical.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&params),
            );

            let (groups_x, groups_y) = group_counts(self.extent);
            dev.logical.cmd_dispatch(cmd, groups_x, groups_y, 1);

            // Offscreen: shader writes -> blit source.
            let to_transfer_src = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .src_access_mask(vk::AccessFlags2::SHADER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
                .old_layout(vk::ImageLayout::GENERAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.offscreen.image)
                .subresource_range(color_subresource_range());
            let barriers = [to_transfer_src];
            dev.logical.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&barriers),
            );

            dev.logical.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit_compute(
        &self,
        dev: &RenderDevice,
        frame: &CompositorFrame,
        sync: &FrameSync,
    ) -> Result<()> {
        // The acquire wait is a GPU-side dependency resolved by the device
        // scheduler, not a host block.
        let waits = [vk::SemaphoreSubmitInfo::default()
            .semaphore(sync.acquire)
            .stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)];
        let cmds = [vk::CommandBufferSubmitInfo::default().command_buffer(frame.cmd_compute)];
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.compute_done)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&cmds)
            .signal_semaphore_infos(&signals);

        unsafe {
            dev.logical
                .queue_submit2(dev.compute_queue.handle, &[submit], vk::Fence::null())
                .wrap_err("failed to submit compute pass")?;
        }
        Ok(())
    }

    fn record_graphics(
        &self,
        dev: &RenderDevice,
        frame: &CompositorFrame,
        swap_image: vk::Image,
    ) -> Result<()> {
        let cmd = frame.cmd_graphics;
        unsafe {
            dev.logical.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            dev.logical.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;

            // Fresh from acquire: contents undefined, nothing to preserve.
            let swap_to_dst = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::NONE)
                .src_access_mask(vk::AccessFlags2::NONE)
                .dst_stage_mask(vk::PipelineStageFlags2::BLIT)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(swap_image)
                .subresource_range(color_subresource_range());
            let begin_barriers = [swap_to_dst];
            dev.logical.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&begin_barriers),
            );

            let full_extent = [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: self.offscreen.extent.width as i32,
                    y: self.offscreen.extent.height as i32,
                    z: 1,
                },
            ];
            let subresource = vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            };
            let blit = vk::ImageBlit::default()
                .src_subresource(subresource)
                .src_offsets(full_extent)
                .dst_subresource(subresource)
                .dst_offsets(full_extent);
            dev.logical.cmd_blit_image(
                cmd,
                self.offscreen.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swap_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::NEAREST,
            );

            // Presentable image back to the display engine, offscreen back
            // to the kernel's write layout.
            let swap_to_present = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::BLIT)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::NONE)
                .dst_access_mask(vk::AccessFlags2::NONE)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(swap_image)
                .subresource_range(color_subresource_range());
            let offscreen_to_general = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::BLIT)
                .src_access_mask(vk::AccessFlags2::TRANSFER_READ)
                .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .dst_access_mask(vk::AccessFlags2::SHADER_WRITE)
                .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.offscreen.image)
                .subresource_range(color_subresource_range());
            let end_barriers = [swap_to_present, offscreen_to_general];
            dev.logical.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default().image_memory_barriers(&end_barriers),
            );

            dev.logical.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    fn submit_graphics(
        &self,
        dev: &RenderDevice,
        frame: &CompositorFrame,
        sync: &FrameSync,
    ) -> Result<()> {
        let waits = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.compute_done)
            .stage_mask(vk::PipelineStageFlags2::BLIT)];
        let cmds = [vk::CommandBufferSubmitInfo::default().command_buffer(frame.cmd_graphics)];
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(sync.present)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&waits)
            .command_buffer_infos(&cmds)
            .signal_semaphore_infos(&signals);

        unsafe {
            dev.logical
                .queue_submit2(dev.graphics_queue.handle, &[submit], sync.in_flight)
                .wrap_err("failed to submit blit pass")?;
        }
        Ok(())
    }

    /// Destroy everything this compositor owns, in reverse creation order.
    pub fn destroy(&mut self, dev: &RenderDevice) -> Result<()> {
        unsafe {
            for frame in self.frames.drain(..) {
                // Command buffers are freed with their pools.
                dev.logical.destroy_semaphore(frame.compute_done, None);
            }
            dev.logical.destroy_descriptor_pool(self.descriptor_pool, None);
            dev.logical.destroy_pipeline(self.pipeline, None);
            dev.logical.destroy_pipeline_layout(self.pipeline_layout, None);
            dev.logical.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
        self.offscreen.destroy(&dev.logical, dev.allocator()?)?;
        Ok(())
    }

    fn create_descriptor_set_layout(dev: &RenderDevice) -> Result<vk::DescriptorSetLayout> {
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::COMPUTE)];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        Ok(unsafe {
            dev.logical.create_descriptor_set_layout(&layout_info, None)?
        })
    }

    fn create_pipeline_layout(
        dev: &RenderDevice,
        descriptor_set_layout: vk::DescriptorSetLayout,
    ) -> Result<vk::PipelineLayout> {
        let set_layouts = [descriptor_set_layout];
        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(FrameParams::SIZE)];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        Ok(unsafe {
            dev.logical.create_pipeline_layout(&layout_info, None)?
        })
    }

    fn create_pipeline(
        dev: &RenderDevice,
        pipeline_layout: vk::PipelineLayout,
        shader: &ComputeShader,
    ) -> Result<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.comp_mod)
            .name(c"main");
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(pipeline_layout);

        let pipelines = unsafe {
            dev.logical
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, err)| eyre!("failed to create compute pipeline: {err}"))?
        };
        pipelines
            .first()
            .copied()
            .ok_or_eyre("compute pipeline creation returned nothing")
    }

    /// Offscreen image in the kernel's write layout. The transition is a
    /// one-shot setup submission and the only synchronous wait per rebuild.
    fn create_offscreen(dev: &RenderDevice, extent: vk::Extent2D) -> Result<StorageImage> {
        // Shared across the compute and graphics families so no ownership
        // transfer is needed between the dispatch and the blit.
        let offscreen = StorageImage::new(
            &dev.logical,
            dev.allocator()?,
            extent,
            &dev.assignment.recording_families(),
        )?;
        log::debug!(
            "Offscreen image {}x{} ({:?})",
            offscreen.extent.width, offscreen.extent.height, offscreen.format,
        );

        let image = offscreen.image;
        dev.immediate_submit(&dev.compute_queue, |cmd, device| {
            let to_general = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::NONE)
                .src_access_mask(vk::AccessFlags2::NONE)
                .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                .dst_access_mask(vk::AccessFlags2::SHADER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_subresource_range());
            let barriers = [to_general];
            unsafe {
                device.cmd_pipeline_barrier2(
                    cmd,
                    &vk::DependencyInfo::default().image_memory_barriers(&barriers),
                );
            }
            Ok(())
        })?;

        Ok(offscreen)
    }

    fn create_descriptor_pool_and_set(
        dev: &RenderDevice,
        descriptor_set_layout: vk::DescriptorSetLayout,
        view: vk::ImageView,
    ) -> Result<(vk::DescriptorPool, vk::DescriptorSet)> {
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe {
            dev.logical.create_descriptor_pool(&pool_info, None)?
        };

        let set_layouts = [descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let set = unsafe {
            dev.logical.allocate_descriptor_sets(&alloc_info)?[0]
        };

        let image_infos = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL)];
        let writes = [vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .image_info(&image_infos)];
        unsafe {
            dev.logical.update_descriptor_sets(&writes, &[]);
        }

        Ok((pool, set))
    }

    fn create_frame(dev: &RenderDevice) -> Result<CompositorFrame> {
        let alloc = |family: u32| -> Result<vk::CommandBuffer> {
            let info = vk::CommandBufferAllocateInfo::default()
                .command_pool(dev.command_pool(family)?)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            Ok(unsafe { dev.logical.allocate_command_buffers(&info)?[0] })
        };

        let cmd_compute = alloc(dev.compute_queue.family.index)?;
        let cmd_graphics = alloc(dev.graphics_queue.family.index)?;
        let compute_done = unsafe {
            dev.logical.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };

        Ok(CompositorFrame {
            cmd_compute,
            cmd_graphics,
            compute_done,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_counts_cover_exact_multiples() {
        let extent = vk::Extent2D { width: 1920, height: 1080 };
        assert_eq!(group_counts(extent), (120, 68));
    }

    #[test]
    fn group_counts_round_up_partial_tiles() {
        let extent = vk::Extent2D { width: 17, height: 31 };
        assert_eq!(group_counts(extent), (2, 2));
    }

    #[test]
    fn one_texel_still_gets_a_group() {
        let extent = vk::Extent2D { width: 1, height: 1 };
        assert_eq!(group_counts(extent), (1, 1));
    }
}
