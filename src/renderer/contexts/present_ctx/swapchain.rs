use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::queue::QueueAssignment;

/// One build of the presentable image chain. Replaced wholesale on resize,
/// never partially mutated.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

/// Extent the chain must be built at, or None while the drawable is
/// zero-sized in either dimension (minimized window).
pub(super) fn resolve_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable_size: (u32, u32),
) -> Option<vk::Extent2D> {
    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: drawable_size.0.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: drawable_size.1.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    };

    if extent.width == 0 || extent.height == 0 {
        None
    } else {
        Some(extent)
    }
}

/// One more image than the minimum so acquisition does not stall on driver
/// bookkeeping, clamped when the surface declares a maximum (0 = unbounded).
pub(super) fn resolve_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let min = capabilities.min_image_count;
    let max = capabilities.max_image_count;
    if max > 0 && min + 1 > max {
        max
    } else {
        min + 1
    }
}

/// Families the chain images are shared across. More than one distinct
/// family forces concurrent sharing; a single family keeps images exclusive.
pub(super) fn sharing_families(assignment: &QueueAssignment) -> Vec<u32> {
    let mut families = vec![assignment.graphics];
    if !families.contains(&assignment.present) {
        families.push(assignment.present);
    }
    if !families.contains(&assignment.compute) {
        families.push(assignment.compute);
    }
    families
}

impl Swapchain {
    pub fn new(
        surface: &vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface_format: &vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        drawable_size: (u32, u32),
        old_swapchain: vk::SwapchainKHR,
        dev: &RenderDevice,
    ) -> Result<Option<Self>> {
        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(dev.physical, *surface)?
        };

        let Some(extent) = resolve_extent(&capabilities, drawable_size) else {
            return Ok(None);
        };

        let min_image_count = resolve_image_count(&capabilities);
        let pre_transform = if capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            capabilities.current_transform
        };

        // The compositor blits into these images; no rendering attachments.
        let image_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_DST;

        let families = sharing_families(&dev.assignment);
        let image_sharing_mode = if families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(*surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_usage(image_usage)
            .image_sharing_mode(image_sharing_mode)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);
        let swapchain_info = if image_sharing_mode == vk::SharingMode::CONCURRENT {
            swapchain_info.queue_family_indices(&families)
        } else {
            swapchain_info.queue_family_indices(&[])
        };

        let handle = unsafe {
            swapchain_loader.create_swapchain(&swapchain_info, None)?
        };

        let (images, image_views) = Self::create_images(
            &handle,
            swapchain_loader,
            surface_format.format,
            dev,
        )?;

        Ok(Some(Self {
            handle,
            images,
            image_views,
            extent,
            format: surface_format.format,
        }))
    }

    pub fn destroy(
        &mut self,
        dev: &RenderDevice,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        unsafe {
            for view in self.image_views.drain(..) {
                dev.logical.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                swapchain_loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
    }

    fn create_images(
        swapchain: &vk::SwapchainKHR,
        swapchain_loader: &ash::khr::swapchain::Device,
        format: vk::Format,
        dev: &RenderDevice,
    ) -> Result<(Vec<vk::Image>, Vec<vk::ImageView>)> {
        let images = unsafe {
            swapchain_loader.get_swapchain_images(*swapchain)?
        };
        let image_views = images
            .iter()
            .map(|image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image(*image);
                unsafe {
                    dev.logical.create_image_view(&view_info, None)
                }
            })
            .collect::<VkResult<Vec<vk::ImageView>>>()?;

        Ok((images, image_views))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        current: (u32, u32),
        min: (u32, u32),
        max: (u32, u32),
        min_count: u32,
        max_count: u32,
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR::default()
            .current_extent(vk::Extent2D { width: current.0, height: current.1 })
            .min_image_extent(vk::Extent2D { width: min.0, height: min.1 })
            .max_image_extent(vk::Extent2D { width: max.0, height: max.1 })
            .min_image_count(min_count)
            .max_image_count(max_count)
    }

    #[test]
    fn extent_uses_surface_reported_size_when_defined() {
        let caps = capabilities((800, 600), (1, 1), (4096, 4096), 2, 0);
        assert_eq!(
            resolve_extent(&caps, (1234, 5678)),
            Some(vk::Extent2D { width: 800, height: 600 }),
        );
    }

    #[test]
    fn extent_clamps_drawable_size_to_capability_bounds() {
        let caps = capabilities((u32::MAX, u32::MAX), (200, 200), (1000, 1000), 2, 0);
        assert_eq!(
            resolve_extent(&caps, (5000, 50)),
            Some(vk::Extent2D { width: 1000, height: 200 }),
        );
    }

    #[test]
    fn zero_drawable_blocks_chain_creation() {
        let caps = capabilities((u32::MAX, u32::MAX), (0, 0), (4096, 4096), 2, 0);
        assert_eq!(resolve_extent(&caps, (0, 600)), None);
        assert_eq!(resolve_extent(&caps, (800, 0)), None);
        assert_eq!(resolve_extent(&caps, (0, 0)), None);
    }

    #[test]
    fn extent_resolution_is_idempotent_for_identical_inputs() {
        let caps = capabilities((u32::MAX, u32::MAX), (1, 1), (4096, 4096), 2, 0);
        let first = resolve_extent(&caps, (800, 600));
        let second = resolve_extent(&caps, (800, 600));
        assert_eq!(first, second);
        assert_eq!(resolve_image_count(&caps), resolve_image_count(&caps));
    }

    #[test]
    fn image_count_is_min_plus_one() {
        let caps = capabilities((1, 1), (1, 1), (1, 1), 2, 0);
        assert_eq!(resolve_image_count(&caps), 3);
    }

    #[test]
    fn image_count_clamps_to_declared_maximum() {
        let caps = capabilities((1, 1), (1, 1), (1, 1), 3, 3);
        assert_eq!(resolve_image_count(&caps), 3);
    }

    #[test]
    fn zero_maximum_means_unbounded() {
        let caps = capabilities((1, 1), (1, 1), (1, 1), 8, 0);
        assert_eq!(resolve_image_count(&caps), 9);
    }

    #[test]
    fn sharing_is_exclusive_for_a_single_family() {
        let assignment = QueueAssignment { compute: 0, graphics: 0, present: 0 };
        assert_eq!(sharing_families(&assignment), vec![0]);
    }

    #[test]
    fn sharing_spans_all_distinct_families() {
        let assignment = QueueAssignment { compute: 2, graphics: 0, present: 1 };
        assert_eq!(sharing_families(&assignment), vec![0, 1, 2]);
    }
}
