use std::ffi::{c_char, CStr};
use std::str::Utf8Error;
use std::sync::Mutex;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::renderer::contexts::device_ctx::queue::{Queue, QueueAssignment, QueueFamily};

/// Logical device plus the queues and command pools the renderer submits
/// through. Owns all GPU-side resources transitively; destroyed only at
/// shutdown, after every dependent resource is gone.
pub struct RenderDevice {
    pub logical: ash::Device,
    pub physical: vk::PhysicalDevice,
    pub assignment: QueueAssignment,

    pub compute_queue: Queue,
    pub graphics_queue: Queue,
    pub present_queue: Queue,

    // One resettable pool per distinct recording family.
    command_pools: Vec<(u32, vk::CommandPool)>,

    memory_allocator: Option<Mutex<Allocator>>,
}

/// Attributes a physical device is judged by during selection. Produced
/// while enumerating, discarded once the winner is picked.
#[derive(Debug, Clone, Copy)]
struct DeviceCandidate {
    device_type: vk::PhysicalDeviceType,
    api_version: u32,
    has_compute: bool,
    can_present: bool,
}

impl DeviceCandidate {
    /// None when the device cannot run the compositor at all. Discrete
    /// beats integrated beats everything else; the reported API version
    /// breaks ties within a type.
    fn score(&self) -> Option<u32> {
        if !self.has_compute || !self.can_present {
            return None;
        }
        let type_score = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
            _ => 100,
        };
        let version_score = vk::api_version_major(self.api_version) * 100
            + vk::api_version_minor(self.api_version) * 10;
        Some(type_score + version_score)
    }
}

/// Index of the highest-scored eligible candidate. Exact ties keep the
/// first one enumerated, so selection is deterministic.
fn pick_best(candidates: &[DeviceCandidate]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let Some(score) = candidate.score() else {
            continue;
        };
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// Resolve which families serve the compute, graphics, and present roles.
/// Compute prefers a dedicated family (compute-capable but not graphics);
/// present prefers riding on the graphics family when it can.
fn resolve_queue_assignment(families: &[QueueFamily]) -> Result<QueueAssignment> {
    let compute = families
        .iter()
        .find(|f| f.supports_compute() && !f.supports_graphics())
        .or_else(|| families.iter().find(|f| f.supports_compute()))
        .ok_or_eyre("device has no compute-capable queue family")?;

    let graphics = families
        .iter()
        .find(|f| f.supports_graphics())
        .ok_or_eyre("device has no graphics-capable queue family")?;

    let present = if graphics.supports_present() {
        graphics
    } else {
        families
            .iter()
            .find(|f| f.supports_present())
            .ok_or_eyre("no queue family can present to the bound surface")?
    };

    Ok(QueueAssignment {
        compute: compute.index,
        graphics: graphics.index,
        present: present.index,
    })
}

impl RenderDevice {
    pub fn new(
        instance: &ash::Instance,
        surface: &(vk::SurfaceKHR, ash::khr::surface::Instance),
    ) -> Result<Self> {
        let (physical_device, queue_families) =
            Self::select_physical_device(instance, surface)?;

        let assignment = resolve_queue_assignment(&queue_families)?;
        log::info!(
            "Queue families: compute={} graphics={} present={}",
            assignment.compute, assignment.graphics, assignment.present,
        );

        let logical_device =
            Self::create_logical_device(instance, &physical_device, &assignment)?;

        let queue_for = |index: u32| -> Result<Queue> {
            let family = queue_families
                .iter()
                .find(|f| f.index == index)
                .ok_or_eyre("queue assignment refers to an unknown family")?;
            let handle = unsafe { logical_device.get_device_queue(index, 0) };
            Ok(Queue::new(family.clone(), handle))
        };
        let compute_queue = queue_for(assignment.compute)?;
        let graphics_queue = queue_for(assignment.graphics)?;
        let present_queue = queue_for(assignment.present)?;

        let command_pools =
            Self::create_command_pools(&logical_device, &assignment)?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        Ok(Self {
            logical: logical_device,
            physical: physical_device,
            assignment,
            compute_queue,
            graphics_queue,
            present_queue,
            command_pools,
            memory_allocator: Some(Mutex::new(memory_allocator)),
        })
    }

    pub fn allocator(&self) -> Result<&Mutex<Allocator>> {
        self.memory_allocator
            .as_ref()
            .ok_or_eyre("memory allocator already torn down")
    }

    pub fn command_pool(&self, family_index: u32) -> Result<vk::CommandPool> {
        self.command_pools
            .iter()
            .find(|(family, _)| *family == family_index)
            .map(|(_, pool)| *pool)
            .ok_or_else(|| eyre!("no command pool for queue family {family_index}"))
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical.device_wait_idle()?;
        }
        Ok(())
    }

    /// Record and run a one-shot command buffer on the given queue, waiting
    /// synchronously for it to finish. Only used for setup transitions.
    pub fn immediate_submit<F>(&self, queue: &Queue, func: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let pool = self.command_pool(queue.family.index)?;

        let cmd = unsafe {
            self.logical.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )?[0]
        };

        unsafe {
            self.logical.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        func(cmd, &self.logical)?;

        let fence = unsafe {
            self.logical.end_command_buffer(cmd)?;
            self.logical.create_fence(&vk::FenceCreateInfo::default(), None)?
        };

        let result = unsafe {
            let cmd_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
            let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
            self.logical
                .queue_submit2(queue.handle, &[submit], fence)
                .and_then(|_| {
                    self.logical.wait_for_fences(&[fence], true, u64::MAX)
                })
        };

        unsafe {
            self.logical.destroy_fence(fence, None);
            self.logical.free_command_buffers(pool, &[cmd]);
        }

        result?;
        Ok(())
    }

    /// Tear down in reverse creation order: allocator, pools, device.
    pub fn destroy(&mut self) {
        drop(self.memory_allocator.take());
        unsafe {
            for (_, pool) in self.command_pools.drain(..) {
                self.logical.destroy_command_pool(pool, None);
            }
            self.logical.destroy_device(None);
        }
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: &(vk::SurfaceKHR, ash::khr::surface::Instance),
    ) -> Result<(vk::PhysicalDevice, Vec<QueueFamily>)> {
        let (surface, surface_loader) = surface;

        let devices = unsafe { instance.enumerate_physical_devices()? };
        if devices.is_empty() {
            return Err(eyre!("no Vulkan-capable devices found"));
        }

        let req_device_exts = Self::get_required_device_extensions();
        let req_device_exts = req_device_exts
            .iter()
            .map(|ext| ext.to_str())
            .collect::<std::result::Result<Vec<&str>, Utf8Error>>()?;

        let mut candidates = Vec::with_capacity(devices.len());
        for device in &devices {
            let props = unsafe { instance.get_physical_device_properties(*device) };
            let queue_props = unsafe {
                instance.get_physical_device_queue_family_properties(*device)
            };

            let exts_supported =
                Self::device_extensions_supported(instance, device, &req_device_exts)?;

            let has_compute = queue_props
                .iter()
                .any(|q| q.queue_flags.contains(vk::QueueFlags::COMPUTE));

            let mut can_present = false;
            for family_index in 0..queue_props.len() as u32 {
                let supported = unsafe {
                    surface_loader.get_physical_device_surface_support(
                        *device,
                        family_index,
                        *surface,
                    )?
                };
                if supported {
                    can_present = true;
                    break;
                }
            }

            log::info!(
                "Found device: {:?} | type {:?} | API {}.{}.{}",
                props.device_name_as_c_str().unwrap_or(c"unknown"),
                props.device_type,
                vk::api_version_major(props.api_version),
                vk::api_version_minor(props.api_version),
                vk::api_version_patch(props.api_version),
            );

            candidates.push(DeviceCandidate {
                device_type: props.device_type,
                api_version: props.api_version,
                // A device without the swapchain extension cannot run the
                // compositor either, so it folds into the same gate.
                has_compute: has_compute && exts_supported,
                can_present,
            });
        }

        let best = pick_best(&candidates)
            .ok_or_eyre("no suitable device with compute and present support")?;
        let device = devices[best];

        let props = unsafe { instance.get_physical_device_properties(device) };
        log::info!(
            "Selected device: {:?} ({:?})",
            props.device_name_as_c_str().unwrap_or(c"unknown"),
            props.device_type,
        );

        let queue_families = unsafe {
            instance.get_physical_device_queue_family_properties(device)
        }
            .into_iter()
            .enumerate()
            .map(|(i, family_props)| {
                let supports_present = unsafe {
                    surface_loader
                        .get_physical_device_surface_support(device, i as u32, *surface)
                        .unwrap_or(false)
                };
                QueueFamily::new(i as u32, family_props, supports_present)
            })
            .collect::<Vec<_>>();

        Ok((device, queue_families))
    }

    fn device_extensions_supported(
        instance: &ash::Instance,
        device: &vk::PhysicalDevice,
        required: &[&str],
    ) -> Result<bool> {
        let supported_extensions = unsafe {
            instance
                .enumerate_device_extension_properties(*device)
                .unwrap_or_default()
        };

        Ok(required.iter().all(|req_ext| {
            let supported = supported_extensions.iter().any(|sup_ext| {
                sup_ext
                    .extension_name_as_c_str()
                    .ok()
                    .and_then(|name| name.to_str().ok())
                    == Some(*req_ext)
            });
            if !supported {
                log::warn!("Device extension not supported: {}", req_ext);
            }
            supported
        }))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: &vk::PhysicalDevice,
        assignment: &QueueAssignment,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos = assignment
            .distinct_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let enabled_extension_names = Self::get_required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        // Synchronization2 lets the barrier/semaphore chain be expressed per
        // submission instead of through full-pipeline stalls.
        let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .push_next(&mut vulkan13_features);

        Ok(unsafe {
            instance.create_device(*physical_device, &device_create_info, None)?
        })
    }

    fn create_command_pools(
        device: &ash::Device,
        assignment: &QueueAssignment,
    ) -> Result<Vec<(u32, vk::CommandPool)>> {
        assignment
            .recording_families()
            .into_iter()
            .map(|family| {
                let pool_info = vk::CommandPoolCreateInfo::default()
                    .queue_family_index(family)
                    // Allow the pool to reset individual command buffers
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
                let pool = unsafe { device.create_command_pool(&pool_info, None)? };
                Ok((family, pool))
            })
            .collect()
    }

    fn get_required_device_extensions() -> Vec<&'static CStr> {
        vec![
            ash::khr::swapchain::NAME,

            #[cfg(target_os = "macos")]
            ash::khr::portability_subset::NAME,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(
        device_type: vk::PhysicalDeviceType,
        major: u32,
        minor: u32,
        has_compute: bool,
        can_present: bool,
    ) -> DeviceCandidate {
        DeviceCandidate {
            device_type,
            api_version: vk::make_api_version(0, major, minor, 0),
            has_compute,
            can_present,
        }
    }

    fn family(index: u32, flags: vk::QueueFlags, present: bool) -> QueueFamily {
        QueueFamily::new(
            index,
            vk::QueueFamilyProperties::default().queue_flags(flags),
            present,
        )
    }

    #[test]
    fn discrete_beats_integrated_regardless_of_version() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 1, 4, true, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 0, true, true),
        ];
        assert_eq!(pick_best(&candidates), Some(1));
    }

    #[test]
    fn api_version_breaks_ties_within_a_type() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 2, true, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 3, true, true),
        ];
        assert_eq!(pick_best(&candidates), Some(1));
    }

    #[test]
    fn exact_ties_keep_the_first_enumerated() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 3, true, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 3, true, true),
        ];
        assert_eq!(pick_best(&candidates), Some(0));
    }

    #[test]
    fn ineligible_candidates_are_never_picked() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 3, false, true),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 3, true, false),
            candidate(vk::PhysicalDeviceType::CPU, 1, 0, true, true),
        ];
        assert_eq!(pick_best(&candidates), Some(2));
    }

    #[test]
    fn no_eligible_candidate_yields_none() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 1, 3, false, false),
        ];
        assert_eq!(pick_best(&candidates), None);
    }

    #[test]
    fn virtual_and_cpu_types_share_the_fallback_score() {
        let virtual_gpu = candidate(vk::PhysicalDeviceType::VIRTUAL_GPU, 1, 3, true, true);
        let cpu = candidate(vk::PhysicalDeviceType::CPU, 1, 3, true, true);
        assert_eq!(virtual_gpu.score(), cpu.score());
    }

    #[test]
    fn assignment_prefers_dedicated_compute_family() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
            family(1, vk::QueueFlags::COMPUTE, false),
        ];
        let assignment = resolve_queue_assignment(&families).unwrap();
        assert_eq!(assignment.compute, 1);
        assert_eq!(assignment.graphics, 0);
        assert_eq!(assignment.present, 0);
    }

    #[test]
    fn assignment_falls_back_to_shared_compute_family() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        let assignment = resolve_queue_assignment(&families).unwrap();
        assert_eq!(assignment, QueueAssignment { compute: 0, graphics: 0, present: 0 });
    }

    #[test]
    fn present_scans_other_families_when_graphics_cannot_present() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS, false),
            family(1, vk::QueueFlags::COMPUTE, false),
            family(2, vk::QueueFlags::TRANSFER, true),
        ];
        let assignment = resolve_queue_assignment(&families).unwrap();
        assert_eq!(assignment.compute, 1);
        assert_eq!(assignment.graphics, 0);
        assert_eq!(assignment.present, 2);
    }

    #[test]
    fn missing_compute_family_is_fatal() {
        let families = [family(0, vk::QueueFlags::GRAPHICS, true)];
        assert!(resolve_queue_assignment(&families).is_err());
    }

    #[test]
    fn missing_present_family_is_fatal() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, false),
        ];
        assert!(resolve_queue_assignment(&families).is_err());
    }
}
