//! Swapchain, depth buffer, render pass and framebuffers.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;

use crate::config::DriverConfig;
use crate::error::{DriverError, DriverResult};
use crate::types::SurfaceInfo;

use super::conversion::{depth_aspect, frame_error, present_mode_from_vk, texture_format_from_vk};
use super::device::VulkanDevice;
use super::instance::VulkanInstance;
use super::selection::{
    select_color_format, select_depth_stencil_format, select_present_mode, surface_extent,
    swapchain_image_count,
};

pub struct VulkanSwapchain {
    device: Arc<VulkanDevice>,
    swapchain_fn: ash::khr::swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth_image: vk::Image,
    depth_view: vk::ImageView,
    depth_allocation: Option<Allocation>,
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub surface_format: vk::SurfaceFormatKHR,
    pub depth_format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl VulkanSwapchain {
    pub fn new(
        instance: &VulkanInstance,
        device: &Arc<VulkanDevice>,
        config: &DriverConfig,
    ) -> DriverResult<Self> {
        let physical_device = device.physical_device;
        let surface = instance.surface;

        let (capabilities, formats, present_modes) = unsafe {
            let surface_fn = &instance.surface_fn;
            (
                surface_fn
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .map_err(|e| DriverError::creation("swapchain", format!("{:?}", e)))?,
                surface_fn
                    .get_physical_device_surface_formats(physical_device, surface)
                    .map_err(|e| DriverError::creation("swapchain", format!("{:?}", e)))?,
                surface_fn
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .map_err(|e| DriverError::creation("swapchain", format!("{:?}", e)))?,
            )
        };

        let surface_format = select_color_format(&formats).ok_or_else(|| {
            DriverError::CapabilityUnsupported("surface reports no colour formats".into())
        })?;
        let depth_format = select_depth_stencil_format(|format| unsafe {
            instance
                .instance
                .get_physical_device_format_properties(physical_device, format)
        })
        .ok_or_else(|| {
            DriverError::CapabilityUnsupported("no usable depth/stencil format".into())
        })?;
        let present_mode = select_present_mode(&present_modes, config.present);
        let extent = surface_extent(&capabilities, config.surface_size)?;
        let image_count = swapchain_image_count(&capabilities, config.render_target_count);

        let swapchain_fn = ash::khr::swapchain::Device::new(&instance.instance, &device.device);

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_fn.create_swapchain(&swapchain_info, None) }
            .map_err(|e| DriverError::creation("swapchain", format!("{:?}", e)))?;

        // From here on Drop releases whatever has been created.
        let mut this = Self {
            device: device.clone(),
            swapchain_fn,
            swapchain,
            images: Vec::new(),
            views: Vec::new(),
            depth_image: vk::Image::null(),
            depth_view: vk::ImageView::null(),
            depth_allocation: None,
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            surface_format,
            depth_format,
            present_mode,
            extent,
        };

        this.images = unsafe { this.swapchain_fn.get_swapchain_images(swapchain) }
            .map_err(|e| DriverError::creation("swapchain images", format!("{:?}", e)))?;

        for &image in &this.images {
            let view = create_view(
                device,
                image,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            this.views.push(view);
        }

        this.create_depth_target()?;
        this.render_pass = create_render_pass(device, surface_format.format, depth_format)?;

        for &view in &this.views {
            let attachments = [view, this.depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(this.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(|e| DriverError::creation("framebuffer", format!("{:?}", e)))?;
            this.framebuffers.push(framebuffer);
        }

        Ok(this)
    }

    fn create_depth_target(&mut self) -> DriverResult<()> {
        let device = self.device.clone();
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.depth_format)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        self.depth_image = unsafe { device.device.create_image(&image_info, None) }
            .map_err(|e| DriverError::creation("depth image", format!("{:?}", e)))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(self.depth_image) };
        let allocation =
            device.allocate("depth buffer", requirements, MemoryLocation::GpuOnly, false)?;
        let bound = unsafe {
            device
                .device
                .bind_image_memory(self.depth_image, allocation.memory(), allocation.offset())
        };
        self.depth_allocation = Some(allocation);
        bound.map_err(|e| DriverError::creation("depth image", format!("{:?}", e)))?;

        self.depth_view = create_view(
            &device,
            self.depth_image,
            self.depth_format,
            depth_aspect(self.depth_format),
        )?;
        Ok(())
    }

    pub fn surface_info(&self) -> SurfaceInfo {
        SurfaceInfo {
            width: self.extent.width,
            height: self.extent.height,
            color_format: texture_format_from_vk(self.surface_format.format),
            depth_format: Some(texture_format_from_vk(self.depth_format)),
            present_mode: present_mode_from_vk(self.present_mode),
            image_count: self.images.len() as u32,
        }
    }

    /// Acquire the next image, signalling `semaphore` when it is ready.
    pub fn acquire(&self, semaphore: vk::Semaphore, timeout: u64) -> DriverResult<(u32, bool)> {
        unsafe {
            self.swapchain_fn
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        }
        .map_err(|e| frame_error(e, "acquire next image"))
    }

    /// Queue `image_index` for presentation after `wait` is signalled.
    /// Returns whether the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> DriverResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_fn.queue_present(queue, &present_info) }
            .map_err(|e| frame_error(e, "present"))
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                device.destroy_render_pass(self.render_pass, None);
            }
            if self.depth_view != vk::ImageView::null() {
                device.destroy_image_view(self.depth_view, None);
            }
            if self.depth_image != vk::Image::null() {
                device.destroy_image(self.depth_image, None);
            }
        }
        if let Some(allocation) = self.depth_allocation.take() {
            self.device.free(allocation);
        }
        unsafe {
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            // Swapchain images are owned by the swapchain.
            self.swapchain_fn.destroy_swapchain(self.swapchain, None);
        }
    }
}

fn create_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> DriverResult<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    unsafe { device.device.create_image_view(&view_info, None) }
        .map_err(|e| DriverError::creation("image view", format!("{:?}", e)))
}

fn create_render_pass(
    device: &VulkanDevice,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> DriverResult<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        vk::AttachmentDescription::default()
            .format(depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref)];

    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(stages)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(stages)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .map_err(|e| DriverError::creation("render pass", format!("{:?}", e)))
}
