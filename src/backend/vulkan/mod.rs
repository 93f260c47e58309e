//! Vulkan backend via ash.
//!
//! One primary command buffer is recorded per frame. It clears the acquired
//! swapchain image inside a render pass and executes the secondary command
//! buffer of every registered renderable. `present_frame` submits it with a
//! binary fence and blocks on that fence before returning, so the per-slot
//! values in the [`FrameRing`] are logical values tracked against it.

mod conversion;
mod debug;
mod device;
mod instance;
mod renderable;
pub mod selection;
mod swapchain;
mod sync;

use std::sync::Arc;

use ash::vk;
use glam::Vec4;

use crate::config::DriverConfig;
use crate::driver::{gpu_index, Driver, DriverState, Lifecycle, SharedWindow};
use crate::error::{DriverError, DriverResult};
use crate::frame::FrameRing;
use crate::gpu::Gpu;
use crate::logging::LogSink;
use crate::renderable::{Renderable, RenderableArena, RenderableHandle, TargetFormats};
use crate::types::SurfaceInfo;
use crate::BackendType;

use conversion::frame_error;
use device::{check_device_support, describe_physical_device, VulkanDevice};
use instance::VulkanInstance;
use swapchain::VulkanSwapchain;
use sync::FrameSync;

pub use renderable::VulkanRenderable;

/// Everything owned by the selected device.
struct DeviceContext {
    gpu: usize,
    ring: FrameRing,
    /// Slot of the current frame; predicted for the next one after present.
    frame_index: usize,
    /// Image acquired by `prepare_frame`, consumed by `present_frame`.
    image_index: Option<u32>,
    max_anisotropy: f32,
    // Field order is teardown order.
    sync: FrameSync,
    swapchain: VulkanSwapchain,
    device: Arc<VulkanDevice>,
}

pub struct VulkanDriver {
    config: DriverConfig,
    log: LogSink,
    lifecycle: Lifecycle,
    window: SharedWindow,
    gpus: Vec<Gpu>,
    physical_devices: Vec<vk::PhysicalDevice>,
    renderables: RenderableArena<VulkanRenderable>,
    frame: Option<DeviceContext>,
    instance: Option<VulkanInstance>,
}

impl VulkanDriver {
    pub fn new(window: SharedWindow, config: DriverConfig) -> DriverResult<Self> {
        config.validate()?;
        let log = config.log.clone();
        Ok(Self {
            config,
            log,
            lifecycle: Lifecycle::new(),
            window,
            gpus: Vec::new(),
            physical_devices: Vec::new(),
            renderables: RenderableArena::new(),
            frame: None,
            instance: None,
        })
    }

    /// Block until the fence of the frame with logical `value` is signalled.
    ///
    /// Values already retired return at once. Any failure of the fence wait
    /// leaves the GPU state unknown and is reported as
    /// [`DriverError::DeviceLost`], which sticks for the selected device.
    pub fn wait_for_frame_ready(&mut self, value: u64) -> DriverResult<()> {
        let ctx = self.frame.as_mut().ok_or(DriverError::InvalidState {
            operation: "wait_for_frame_ready",
            state: self.lifecycle.state(),
        })?;
        ctx.device.ensure_alive()?;
        if value <= ctx.ring.completed_value() {
            return Ok(());
        }
        let device = &ctx.device.device;
        let fences = [ctx.sync.fence];

        let timeout = self.config.fence_timeout_ns();
        let waited = unsafe { device.wait_for_fences(&fences, true, timeout) }
            .and_then(|()| unsafe { device.reset_fences(&fences) });
        if let Err(e) = waited {
            self.log.error(format_args!(
                "Fence wait for frame {} failed after {:?}: {:?}",
                value, self.config.fence_timeout, e
            ));
            ctx.device.mark_lost();
            return Err(DriverError::DeviceLost);
        }

        ctx.ring.complete(value);
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(ctx) = &self.frame {
            ctx.device.wait_idle();
            self.log.debug(format_args!(
                "Releasing {} ({} renderables)",
                self.gpus[ctx.gpu].name,
                self.renderables.len()
            ));
        }
        self.renderables.clear();
        self.frame = None;
    }

    fn build_context(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        gpu: usize,
        config: &DriverConfig,
    ) -> DriverResult<DeviceContext> {
        let (queue_family, stages) = check_device_support(instance, physical_device)?;
        let device = VulkanDevice::new(
            instance,
            physical_device,
            queue_family,
            stages,
            config.log.clone(),
        )?;
        let swapchain = VulkanSwapchain::new(instance, &device, config)?;

        // The driver may hand out more images than requested.
        let image_count = swapchain.images.len();
        if image_count != config.render_target_count as usize {
            config.log.warn(format_args!(
                "Requested {} render targets, swapchain has {}",
                config.render_target_count, image_count
            ));
        }
        let ring = FrameRing::new(image_count)?;
        ring.expect_slot_count("framebuffers", swapchain.framebuffers.len())?;
        let sync = FrameSync::new(&device)?;

        let max_anisotropy = config
            .texture_filtering
            .max_anisotropy()
            .min(device.limits.max_sampler_anisotropy);

        Ok(DeviceContext {
            gpu,
            ring,
            frame_index: 0,
            image_index: None,
            max_anisotropy,
            sync,
            swapchain,
            device,
        })
    }
}

/// Record the primary command buffer for `image_index`, returning how many
/// renderables it replays.
fn record_frame(
    ctx: &DeviceContext,
    renderables: &RenderableArena<VulkanRenderable>,
    clear_color: Vec4,
    image_index: u32,
) -> DriverResult<usize> {
    let device = &ctx.device.device;
    let cmd = ctx.sync.command_buffer;
    let framebuffer = *ctx
        .swapchain
        .framebuffers
        .get(image_index as usize)
        .ok_or_else(|| DriverError::FrameFailed(format!("no framebuffer {}", image_index)))?;

    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color.to_array(),
            },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ];
    let render_pass_info = vk::RenderPassBeginInfo::default()
        .render_pass(ctx.swapchain.render_pass)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: ctx.swapchain.extent,
        })
        .clear_values(&clear_values);

    let secondaries: Vec<vk::CommandBuffer> =
        renderables.replay().filter_map(|r| r.commands()).collect();

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .map_err(|e| frame_error(e, "reset command buffer"))?;
        device
            .begin_command_buffer(cmd, &begin_info)
            .map_err(|e| frame_error(e, "begin command buffer"))?;
        device.cmd_begin_render_pass(
            cmd,
            &render_pass_info,
            vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
        );
        if !secondaries.is_empty() {
            device.cmd_execute_commands(cmd, &secondaries);
        }
        device.cmd_end_render_pass(cmd);
        device
            .end_command_buffer(cmd)
            .map_err(|e| frame_error(e, "end command buffer"))?;
    }
    Ok(secondaries.len())
}

impl Driver for VulkanDriver {
    fn backend(&self) -> BackendType {
        BackendType::Vulkan
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn initialize(&mut self) -> DriverResult<()> {
        self.lifecycle.expect_initialize()?;
        let instance = VulkanInstance::new(self.window.as_ref(), &self.config)?;

        let physical_devices = unsafe { instance.instance.enumerate_physical_devices() }
            .map_err(|e| DriverError::LoaderUnavailable(format!("{:?}", e)))?;
        if physical_devices.is_empty() {
            return Err(DriverError::NoAdapters);
        }

        self.gpus = physical_devices
            .iter()
            .enumerate()
            .map(|(id, &pd)| describe_physical_device(&instance.instance, pd, id as u32))
            .collect();
        for gpu in &self.gpus {
            self.log.info(format_args!("Found adapter {}", gpu));
        }

        self.physical_devices = physical_devices;
        self.instance = Some(instance);
        self.lifecycle.set(DriverState::Initialized);
        Ok(())
    }

    fn gpus(&self) -> &[Gpu] {
        &self.gpus
    }

    fn select_gpu(&mut self, id: u32) -> DriverResult<()> {
        self.lifecycle.expect_select()?;
        let index = gpu_index(&self.gpus, id)?;

        self.teardown();
        self.lifecycle.set(DriverState::Initialized);

        let instance = self.instance.as_ref().ok_or(DriverError::InvalidState {
            operation: "select_gpu",
            state: self.lifecycle.state(),
        })?;
        let context =
            Self::build_context(instance, self.physical_devices[index], index, &self.config)
                .map_err(|e| {
                    self.log.error(format_args!(
                        "Failed to select {}: {}",
                        self.gpus[index].name, e
                    ));
                    e
                })?;

        let surface = context.swapchain.surface_info();
        self.log.info(format_args!(
            "Selected {} ({}x{}, {} images, {:?}, {:?})",
            self.gpus[index].name,
            surface.width,
            surface.height,
            surface.image_count,
            surface.color_format,
            surface.present_mode
        ));
        self.frame = Some(context);
        self.lifecycle.set(DriverState::DeviceSelected);
        Ok(())
    }

    fn selected_gpu(&self) -> Option<&Gpu> {
        self.frame.as_ref().map(|ctx| &self.gpus[ctx.gpu])
    }

    fn surface_info(&self) -> Option<SurfaceInfo> {
        self.frame.as_ref().map(|ctx| ctx.swapchain.surface_info())
    }

    fn frame_index(&self) -> Option<usize> {
        self.frame.as_ref().map(|ctx| ctx.frame_index)
    }

    fn max_anisotropy(&self) -> Option<f32> {
        self.frame.as_ref().map(|ctx| ctx.max_anisotropy)
    }

    fn prepare_frame(&mut self) -> DriverResult<()> {
        self.lifecycle.expect_prepare()?;
        let ctx = self
            .frame
            .as_mut()
            .ok_or(DriverError::FrameFailed("no device".into()))?;
        ctx.device.ensure_alive()?;

        let (image_index, suboptimal) = ctx
            .swapchain
            .acquire(ctx.sync.image_acquired, self.config.fence_timeout_ns())
            .map_err(|e| ctx.device.note_failure(e))?;
        if suboptimal {
            self.log
                .debug(format_args!("Swapchain is suboptimal for the surface"));
        }

        let slot = image_index as usize;
        let recorded = ctx.ring.ensure_reusable(slot).and_then(|()| {
            record_frame(ctx, &self.renderables, self.config.clear_color, image_index)
        });
        let renderables = match recorded {
            Ok(count) => count,
            Err(e) => {
                let e = ctx.device.note_failure(e);
                // The acquire semaphore is pending with nobody left to wait on it.
                if !ctx.device.is_lost() {
                    ctx.sync.recreate_image_acquired()?;
                }
                return Err(e);
            }
        };
        self.log.trace(format_args!(
            "Recorded slot {} with {} renderables",
            slot, renderables
        ));

        ctx.image_index = Some(image_index);
        ctx.frame_index = slot;
        self.lifecycle.set(DriverState::FramePrepared);
        Ok(())
    }

    fn present_frame(&mut self) -> DriverResult<()> {
        self.lifecycle.expect_present()?;
        // The recorded frame is consumed whatever happens below.
        self.lifecycle.set(DriverState::DeviceSelected);

        let ctx = self
            .frame
            .as_mut()
            .ok_or(DriverError::FrameFailed("no device".into()))?;
        ctx.device.ensure_alive()?;
        let image_index = ctx
            .image_index
            .take()
            .ok_or(DriverError::FrameFailed("no acquired image".into()))?;
        let slot = image_index as usize;

        let wait_semaphores = [ctx.sync.image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [ctx.sync.command_buffer];
        let signal_semaphores = [ctx.sync.render_finished];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let submitted = unsafe {
            ctx.device
                .device
                .queue_submit(ctx.device.queue, &[submit_info], ctx.sync.fence)
        };
        if let Err(e) = submitted {
            let e = ctx.device.note_failure(frame_error(e, "queue submit"));
            if !ctx.device.is_lost() {
                ctx.sync.recreate_image_acquired()?;
            }
            return Err(e);
        }
        let value = ctx.ring.submit(slot);

        let presented = ctx
            .swapchain
            .present(ctx.device.queue, image_index, ctx.sync.render_finished)
            .map_err(|e| ctx.device.note_failure(e));
        ctx.frame_index = (slot + 1) % ctx.ring.slot_count();

        // The fence was submitted, so the wait happens even if present failed.
        self.wait_for_frame_ready(value)?;

        match presented {
            Ok(true) => {
                self.log
                    .debug(format_args!("Swapchain is suboptimal for the surface"));
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                self.log
                    .warn(format_args!("Present of slot {} failed: {}", slot, e));
                Err(e)
            }
        }
    }

    fn create_renderable(&mut self) -> DriverResult<RenderableHandle> {
        self.lifecycle.expect_device("create_renderable")?;
        let ctx = self.frame.as_ref().ok_or(DriverError::InvalidState {
            operation: "create_renderable",
            state: self.lifecycle.state(),
        })?;
        let surface = ctx.swapchain.surface_info();
        let renderable = VulkanRenderable::new(
            ctx.device.clone(),
            ctx.swapchain.render_pass,
            ctx.swapchain.extent,
            TargetFormats {
                color: surface.color_format,
                depth: surface.depth_format,
            },
        );
        Ok(self.renderables.insert(renderable))
    }

    fn renderable_mut(&mut self, handle: RenderableHandle) -> DriverResult<&mut dyn Renderable> {
        self.lifecycle.expect_mutable_renderables("renderable_mut")?;
        Ok(self.renderables.get_mut(handle)?)
    }

    fn add_renderable(&mut self, handle: RenderableHandle) -> DriverResult<()> {
        self.lifecycle.expect_mutable_renderables("add_renderable")?;
        self.renderables.register(handle)
    }

    fn remove_renderable(&mut self, handle: RenderableHandle) -> DriverResult<()> {
        self.lifecycle.expect_mutable_renderables("remove_renderable")?;
        self.renderables.remove(handle).map(drop)
    }

    fn registered_renderables(&self) -> usize {
        self.renderables.registered_len()
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        self.teardown();
        self.instance = None;
    }
}
