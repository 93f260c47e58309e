//! Type conversions between driver types and Vulkan types.

use ash::vk;

use crate::error::DriverError;
use crate::shader::ShaderStage;
use crate::types::{PresentMode, TextureFormat};

pub fn present_mode_to_vk(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

pub fn present_mode_from_vk(mode: vk::PresentModeKHR) -> PresentMode {
    match mode {
        vk::PresentModeKHR::IMMEDIATE => PresentMode::Immediate,
        vk::PresentModeKHR::MAILBOX => PresentMode::Mailbox,
        vk::PresentModeKHR::FIFO_RELAXED => PresentMode::FifoRelaxed,
        _ => PresentMode::Fifo,
    }
}

pub fn texture_format_from_vk(format: vk::Format) -> TextureFormat {
    match format {
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8UnormSrgb,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8UnormSrgb,
        vk::Format::D32_SFLOAT_S8_UINT => TextureFormat::Depth32FloatStencil8,
        vk::Format::D32_SFLOAT => TextureFormat::Depth32Float,
        vk::Format::D24_UNORM_S8_UINT => TextureFormat::Depth24UnormStencil8,
        vk::Format::D16_UNORM_S8_UINT => TextureFormat::Depth16UnormStencil8,
        vk::Format::D16_UNORM => TextureFormat::Depth16Unorm,
        other => TextureFormat::Native(other.as_raw()),
    }
}

pub fn shader_stage_to_vk(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
    }
}

/// Aspect flags of a depth/stencil format.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if texture_format_from_vk(format).has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Map a per-frame Vulkan failure onto the driver error taxonomy.
pub fn frame_error(result: vk::Result, context: &str) -> DriverError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR => DriverError::SurfaceOutdated,
        vk::Result::ERROR_DEVICE_LOST | vk::Result::TIMEOUT => DriverError::DeviceLost,
        other => DriverError::FrameFailed(format!("{}: {:?}", context, other)),
    }
}
