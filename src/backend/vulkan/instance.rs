//! Vulkan instance and presentation surface.

use std::ffi::{c_char, CStr, CString};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::config::DriverConfig;
use crate::driver::NativeWindow;
use crate::error::{DriverError, DriverResult};
use crate::logging::LogSink;

use super::debug;

const REQUIRED_API_VERSION: u32 = vk::API_VERSION_1_1;

/// Validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

struct DebugMessenger {
    debug_utils: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
    // Referenced by the messenger callback; boxed for a stable address.
    _sink: Box<LogSink>,
}

/// Instance, surface and optional validation messenger.
pub struct VulkanInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_fn: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,
}

impl VulkanInstance {
    pub fn new(window: &dyn NativeWindow, config: &DriverConfig) -> DriverResult<Self> {
        let log = &config.log;

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| DriverError::LoaderUnavailable(e.to_string()))?;

        let display_handle = window
            .display_handle()
            .map_err(|e| DriverError::CapabilityUnsupported(format!("display handle: {}", e)))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| DriverError::CapabilityUnsupported(format!("window handle: {}", e)))?
            .as_raw();

        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)
                .map_err(|e| {
                    DriverError::CapabilityUnsupported(format!(
                        "no Vulkan surface support for this window system: {:?}",
                        e
                    ))
                })?
                .to_vec();
        check_instance_extensions(&entry, &extensions)?;

        let validation = config.validation && check_validation_layer_support(&entry);
        if config.validation && !validation {
            log.warn(format_args!("Validation layers requested but not available"));
        }
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        let layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|e| DriverError::creation("instance", e))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"render-driver")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(REQUIRED_API_VERSION);

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
            match e {
                vk::Result::ERROR_INCOMPATIBLE_DRIVER => {
                    DriverError::LoaderUnavailable(format!("{:?}", e))
                }
                _ => DriverError::creation("instance", format!("{:?}", e)),
            }
        })?;
        let surface_fn = ash::khr::surface::Instance::new(&entry, &instance);

        // From here on Drop releases whatever has been created.
        let mut this = Self {
            entry,
            instance,
            surface_fn,
            surface: vk::SurfaceKHR::null(),
            debug: None,
        };

        if validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&this.entry, &this.instance);
            let sink = Box::new(log.clone());
            let messenger = debug::create_debug_messenger(&debug_utils, &sink)?;
            this.debug = Some(DebugMessenger {
                debug_utils,
                messenger,
                _sink: sink,
            });
        }

        this.surface = unsafe {
            ash_window::create_surface(
                &this.entry,
                &this.instance,
                display_handle,
                window_handle,
                None,
            )
        }
        .map_err(|e| DriverError::creation("surface", format!("{:?}", e)))?;

        log.debug(format_args!(
            "Created Vulkan instance ({} extensions, validation {})",
            extensions.len(),
            validation
        ));
        Ok(this)
    }

    pub fn surface_support(&self, physical_device: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.surface_fn
                .get_physical_device_surface_support(physical_device, family, self.surface)
                .unwrap_or(false)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_fn.destroy_surface(self.surface, None);
            }
            if let Some(debug) = self.debug.take() {
                debug
                    .debug_utils
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn check_instance_extensions(entry: &ash::Entry, required: &[*const c_char]) -> DriverResult<()> {
    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .map_err(|e| DriverError::LoaderUnavailable(format!("{:?}", e)))?;

    for &name in required {
        // SAFETY: entries come from ash-window's static extension name table
        let name = unsafe { CStr::from_ptr(name) };
        let found = available.iter().any(|ext| {
            // SAFETY: extension_name is a null-terminated fixed array
            (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == name
        });
        if !found {
            return Err(DriverError::CapabilityUnsupported(format!(
                "instance extension {:?} not available",
                name
            )));
        }
    }
    Ok(())
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let available_layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(_) => return false,
    };

    available_layers
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER_NAME)
}
