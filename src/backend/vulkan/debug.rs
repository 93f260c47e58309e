//! Vulkan validation layer debug messenger.

use std::ffi::{c_void, CStr};

use ash::vk;
use log::Level;

use crate::error::{DriverError, DriverResult};
use crate::logging::LogSink;

/// Create a messenger forwarding validation output to `sink`.
///
/// `sink` must stay at a fixed address until the messenger is destroyed.
pub fn create_debug_messenger(
    debug_utils: &ash::ext::debug_utils::Instance,
    sink: &LogSink,
) -> DriverResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .user_data(sink as *const LogSink as *mut c_void);

    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(|e| DriverError::creation("debug messenger", format!("{:?}", e)))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if user_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: user_data is the LogSink boxed by the owning VulkanInstance.
    let sink = unsafe { &*(user_data as *const LogSink) };

    let message = if callback_data.is_null() {
        String::from("(no message)")
    } else {
        // SAFETY: callback_data is valid for the duration of the callback
        let data = unsafe { *callback_data };
        if data.p_message.is_null() {
            String::from("(null message)")
        } else {
            // SAFETY: p_message is a valid null-terminated string from the Vulkan driver
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    let level = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => Level::Debug,
        _ => Level::Trace,
    };
    sink.log(level, format_args!("[Vulkan {}] {}", type_str, message));

    vk::FALSE
}
