use std::sync::Mutex;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};

/// Offscreen image the compute kernel writes into and the blit reads from.
/// Sized to match the presentation chain; torn down and rebuilt whenever
/// the chain's extent changes.
pub struct StorageImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,

    allocation: Option<Allocation>,
}

impl StorageImage {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

    pub fn new(
        device: &ash::Device,
        memory_allocator: &Mutex<Allocator>,
        extent: vk::Extent2D,
        queue_families: &[u32],
    ) -> Result<Self> {
        let sharing_mode = if queue_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let image = {
            let info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(Self::FORMAT)
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC)
                .sharing_mode(sharing_mode)
                .queue_family_indices(queue_families)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.create_image(&info, None)? }
        };

        let reqs = unsafe { device.get_image_memory_requirements(image) };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name: "offscreen storage image",
                requirements: reqs,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image),
            })?;
        unsafe {
            device.bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view = {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .image(image)
                .format(Self::FORMAT)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { device.create_image_view(&info, None)? }
        };

        Ok(Self {
            image,
            view,
            format: Self::FORMAT,
            extent,
            allocation: Some(allocation),
        })
    }

    /// Release view, image, and memory. Must run before the allocator and
    /// device go away; safe to call twice.
    pub fn destroy(
        &mut self,
        device: &ash::Device,
        memory_allocator: &Mutex<Allocator>,
    ) -> Result<()> {
        unsafe {
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
                self.view = vk::ImageView::null();
            }
            if self.image != vk::Image::null() {
                device.destroy_image(self.image, None);
                self.image = vk::Image::null();
            }
        }
        if let Some(allocation) = self.allocation.take() {
            memory_allocator
                .lock()
                .map_err(|e| eyre!(e.to_string()))?
                .free(allocation)?;
        }
        Ok(())
    }
}
