use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;
use crate::renderer::config::RenderConfig;

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl RenderInstance {
    const VALIDATION_LAYER: &'static CStr = c"VK_LAYER_KHRONOS_validation";

    pub fn new(
        config: &RenderConfig,
        window: Option<&Window>,
    ) -> Result<Self> {
        let entry = ash::Entry::linked();

        // Validation is best-effort: a missing layer downgrades to a warning
        // instead of failing construction.
        let validation_enabled = if config.validation {
            let supported = Self::validation_layer_supported(&entry)?;
            if !supported {
                log::warn!(
                    "Validation layer {:?} not available, disabling validation",
                    Self::VALIDATION_LAYER,
                );
            }
            supported
        } else {
            false
        };

        let instance = Self::create_instance(&entry, window, validation_enabled)?;

        let debug_utils = if validation_enabled {
            Some(Self::create_debug_utils_messenger(&entry, &instance)?)
        } else {
            None
        };

        log::info!(
            "Vulkan instance created (validation {})",
            if validation_enabled { "enabled" } else { "disabled" },
        );

        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    pub fn create_surface(
        &self,
        window: &Window,
    ) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)> {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&self.entry, &self.instance);
        Ok((surface, surface_loader))
    }

    /// Tear down the instance and its debug machinery. Everything created
    /// from this instance must already be gone.
    pub fn destroy(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }

    fn create_instance(
        entry: &ash::Entry,
        window: Option<&Window>,
        validation_enabled: bool,
    ) -> Result<ash::Instance> {
        let application_info = vk::ApplicationInfo::default()
            .application_name(c"gravwell")
            .api_version(vk::API_VERSION_1_3);
        let enabled_layer_names = if validation_enabled {
            vec![Self::VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };
        let enabled_extension_names = Self::get_required_instance_extensions(window, validation_enabled)?
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let mut debug_info = debug_utils_messenger_create_info();
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        let instance_info = if validation_enabled {
            instance_info.push_next(&mut debug_info)
        } else {
            instance_info
        };

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe {
            entry.create_instance(&instance_info, None)?
        })
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info();
        let debug_utils_messenger = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)?
        };
        Ok((debug_utils_loader, debug_utils_messenger))
    }

    fn get_required_instance_extensions(
        window: Option<&Window>,
        validation_enabled: bool,
    ) -> Result<Vec<&'static CStr>> {
        let mut exts = if let Some(window) = window {
            ash_window::enumerate_required_extensions(
                window.display_handle()?.as_raw()
            )?
                .iter()
                .map(|ext| unsafe {
                    CStr::from_ptr(*ext)
                })
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        if validation_enabled {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn validation_layer_supported(entry: &ash::Entry) -> Result<bool> {
        let supported = unsafe {
            entry
                .enumerate_instance_layer_properties()?
                .iter()
                .any(|props| {
                    props.layer_name_as_c_str()
                        .map_or(false, |name| name == Self::VALIDATION_LAYER)
                })
        };
        Ok(supported)
    }
}

fn debug_utils_messenger_create_info(
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe {
        CStr::from_ptr((*p_callback_data).p_message)
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::info!("{} {:?}", msg_type, msg);
        }
        _ => {
            log::warn!("{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}
