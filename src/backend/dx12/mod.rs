//! Direct3D 12 backend via the `windows` crate.
//!
//! One direct command list is recorded per frame against the allocator of
//! the current back buffer. The queue signals the frame's [`FrameRing`]
//! value on a monotonic fence after presenting, the next back buffer index
//! is read from the swapchain and `present_frame` blocks on that value.

mod device;
mod renderable;

use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use windows::core::Interface;
use windows::Win32::Foundation::{HWND, RECT, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::WaitForSingleObject;

use crate::config::DriverConfig;
use crate::driver::{gpu_index, Driver, DriverState, Lifecycle, SharedWindow};
use crate::error::{DriverError, DriverResult};
use crate::frame::FrameRing;
use crate::gpu::Gpu;
use crate::logging::LogSink;
use crate::renderable::{Renderable, RenderableArena, RenderableHandle, TargetFormats};
use crate::types::{PresentMode, SurfaceInfo, TextureFormat};
use crate::BackendType;

use device::{
    create_command_allocator, create_command_queue, create_device, create_root_signature,
    create_swapchain, describe_adapter, frame_error, transition_barrier, FenceEvent,
    MAX_ANISOTROPY,
};

pub use renderable::Dx12Renderable;

/// Everything owned by the selected device.
struct DeviceContext {
    gpu: usize,
    ring: FrameRing,
    frame_index: usize,
    /// Set once the device is removed or stops signalling; never cleared.
    device_lost: bool,
    surface: SurfaceInfo,
    max_anisotropy: f32,
    viewport: D3D12_VIEWPORT,
    scissor: RECT,
    fence_event: FenceEvent,
    fence: ID3D12Fence,
    root_signature: ID3D12RootSignature,
    command_list: ID3D12GraphicsCommandList,
    bundle_allocator: ID3D12CommandAllocator,
    allocators: Vec<ID3D12CommandAllocator>,
    rtv_heap: ID3D12DescriptorHeap,
    rtv_descriptor_size: usize,
    render_targets: Vec<ID3D12Resource>,
    swapchain: IDXGISwapChain3,
    queue: ID3D12CommandQueue,
    device: ID3D12Device,
}

impl DeviceContext {
    fn ensure_alive(&self) -> DriverResult<()> {
        if self.device_lost {
            return Err(DriverError::DeviceLost);
        }
        Ok(())
    }

    /// Pass `error` through, remembering a device loss.
    fn note_failure(&mut self, error: DriverError) -> DriverError {
        if matches!(error, DriverError::DeviceLost) {
            self.device_lost = true;
        }
        error
    }

    /// Retire everything the fence reports complete.
    ///
    /// A removed device reports `u64::MAX`.
    fn poll_fence(&mut self) -> DriverResult<()> {
        let completed = unsafe { self.fence.GetCompletedValue() };
        if completed == u64::MAX {
            self.device_lost = true;
            return Err(DriverError::DeviceLost);
        }
        self.ring.complete(completed);
        Ok(())
    }

    fn rtv_handle(&self, slot: usize) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + slot * self.rtv_descriptor_size,
        }
    }
}

pub struct Dx12Driver {
    config: DriverConfig,
    log: LogSink,
    lifecycle: Lifecycle,
    window: SharedWindow,
    gpus: Vec<Gpu>,
    adapters: Vec<IDXGIAdapter1>,
    renderables: RenderableArena<Dx12Renderable>,
    frame: Option<DeviceContext>,
    factory: Option<IDXGIFactory4>,
}

impl Dx12Driver {
    pub fn new(window: SharedWindow, config: DriverConfig) -> DriverResult<Self> {
        config.validate()?;
        let log = config.log.clone();
        Ok(Self {
            config,
            log,
            lifecycle: Lifecycle::new(),
            window,
            gpus: Vec::new(),
            adapters: Vec::new(),
            renderables: RenderableArena::new(),
            frame: None,
            factory: None,
        })
    }

    /// Block until the fence reaches `value`.
    ///
    /// With a configured fence timeout, expiry is reported as
    /// [`DriverError::DeviceLost`], which sticks for the selected device.
    pub fn wait_for_frame_ready(&mut self, value: u64) -> DriverResult<()> {
        let ctx = self.frame.as_mut().ok_or(DriverError::InvalidState {
            operation: "wait_for_frame_ready",
            state: self.lifecycle.state(),
        })?;
        ctx.ensure_alive()?;
        ctx.poll_fence()?;
        if value <= ctx.ring.completed_value() {
            return Ok(());
        }

        unsafe { ctx.fence.SetEventOnCompletion(value, ctx.fence_event.0) }
            .map_err(|e| ctx.note_failure(frame_error(e, "set fence event")))?;
        let waited =
            unsafe { WaitForSingleObject(ctx.fence_event.0, self.config.fence_timeout_ms()) };
        if waited == WAIT_TIMEOUT {
            self.log.error(format_args!(
                "Fence wait for value {} timed out after {:?}",
                value, self.config.fence_timeout
            ));
            ctx.device_lost = true;
            return Err(DriverError::DeviceLost);
        }
        if waited != WAIT_OBJECT_0 {
            return Err(DriverError::FrameFailed(format!(
                "fence wait returned {:?}",
                waited
            )));
        }
        ctx.poll_fence()
    }

    fn hwnd(&self) -> DriverResult<HWND> {
        let handle = self
            .window
            .window_handle()
            .map_err(|e| DriverError::CapabilityUnsupported(format!("window handle: {}", e)))?;
        match handle.as_raw() {
            RawWindowHandle::Win32(win32) => Ok(HWND(win32.hwnd.get() as *mut _)),
            other => Err(DriverError::CapabilityUnsupported(format!(
                "Direct3D 12 needs a Win32 window, got {:?}",
                other
            ))),
        }
    }

    fn teardown(&mut self) {
        // A lost device never signals again.
        if self.frame.as_ref().is_some_and(|ctx| !ctx.device_lost) {
            let drained = self.drain_queue();
            if let (Some(ctx), Err(e)) = (&self.frame, drained) {
                self.log.warn(format_args!(
                    "Releasing {} with work outstanding: {}",
                    self.gpus[ctx.gpu].name, e
                ));
            }
        }
        self.renderables.clear();
        self.frame = None;
    }

    /// Signal a fresh value and wait for it, leaving the queue idle.
    fn drain_queue(&mut self) -> DriverResult<()> {
        let ctx = self
            .frame
            .as_mut()
            .ok_or(DriverError::FrameFailed("no device".into()))?;
        let value = ctx.ring.submit(ctx.frame_index);
        unsafe { ctx.queue.Signal(&ctx.fence, value) }
            .map_err(|e| frame_error(e, "signal fence"))?;
        self.wait_for_frame_ready(value)
    }

    fn build_context(&self, index: usize) -> DriverResult<DeviceContext> {
        let factory = self.factory.as_ref().ok_or(DriverError::InvalidState {
            operation: "select_gpu",
            state: self.lifecycle.state(),
        })?;
        let hwnd = self.hwnd()?;
        let count = self.config.render_target_count as usize;
        let ring = FrameRing::new(count)?;

        let device = create_device(&self.adapters[index])?;
        let queue = create_command_queue(&device)?;
        let swapchain = create_swapchain(factory, &queue, hwnd, count as u32)?;
        let swapchain_desc = unsafe { swapchain.GetDesc1() }
            .map_err(|e| DriverError::creation("swapchain", e))?;
        ring.expect_slot_count("swapchain buffers", swapchain_desc.BufferCount as usize)?;

        let rtv_heap: ID3D12DescriptorHeap = unsafe {
            device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                NumDescriptors: count as u32,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                ..Default::default()
            })
        }
        .map_err(|e| DriverError::creation("descriptor heap", e))?;
        let rtv_descriptor_size =
            unsafe { device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) }
                as usize;

        let heap_start = unsafe { rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        let render_targets = (0..swapchain_desc.BufferCount)
            .map(|i| {
                let resource: ID3D12Resource = unsafe { swapchain.GetBuffer(i) }
                    .map_err(|e| DriverError::creation("render target", e))?;
                let handle = D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: heap_start.ptr + i as usize * rtv_descriptor_size,
                };
                unsafe { device.CreateRenderTargetView(&resource, None, handle) };
                Ok(resource)
            })
            .collect::<DriverResult<Vec<_>>>()?;
        ring.expect_slot_count("render target views", render_targets.len())?;

        let allocators = (0..count)
            .map(|_| create_command_allocator(&device, D3D12_COMMAND_LIST_TYPE_DIRECT))
            .collect::<DriverResult<Vec<_>>>()?;
        ring.expect_slot_count("command allocators", allocators.len())?;
        let bundle_allocator = create_command_allocator(&device, D3D12_COMMAND_LIST_TYPE_BUNDLE)?;

        let command_list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocators[0], None)
        }
        .map_err(|e| DriverError::creation("command list", e))?;
        unsafe { command_list.Close() }.map_err(|e| DriverError::creation("command list", e))?;

        let root_signature = create_root_signature(&device)?;
        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| DriverError::creation("fence", e))?;
        let fence_event = FenceEvent::new()?;

        let (width, height) = (swapchain_desc.Width, swapchain_desc.Height);
        let present_mode = if self.config.present.vsync {
            PresentMode::Fifo
        } else {
            PresentMode::Immediate
        };

        Ok(DeviceContext {
            gpu: index,
            ring,
            frame_index: unsafe { swapchain.GetCurrentBackBufferIndex() } as usize,
            device_lost: false,
            surface: SurfaceInfo {
                width,
                height,
                color_format: TextureFormat::Rgba8Unorm,
                depth_format: None,
                present_mode,
                image_count: swapchain_desc.BufferCount,
            },
            max_anisotropy: self
                .config
                .texture_filtering
                .max_anisotropy()
                .min(MAX_ANISOTROPY),
            viewport: D3D12_VIEWPORT {
                TopLeftX: 0.0,
                TopLeftY: 0.0,
                Width: width as f32,
                Height: height as f32,
                MinDepth: D3D12_MIN_DEPTH,
                MaxDepth: D3D12_MAX_DEPTH,
            },
            scissor: RECT {
                left: 0,
                top: 0,
                right: width as i32,
                bottom: height as i32,
            },
            fence_event,
            fence,
            root_signature,
            command_list,
            bundle_allocator,
            allocators,
            rtv_heap,
            rtv_descriptor_size,
            render_targets,
            swapchain,
            queue,
            device,
        })
    }
}

/// Record the frame's command list for `slot`, returning how many bundles
/// it executes.
fn record_frame(
    ctx: &DeviceContext,
    renderables: &RenderableArena<Dx12Renderable>,
    clear_color: [f32; 4],
    slot: usize,
) -> DriverResult<usize> {
    let allocator = &ctx.allocators[slot];
    let list = &ctx.command_list;
    let target = ctx
        .render_targets
        .get(slot)
        .ok_or_else(|| DriverError::FrameFailed(format!("no render target {}", slot)))?;
    let rtv = ctx.rtv_handle(slot);

    let mut bundles = 0;
    unsafe {
        allocator
            .Reset()
            .map_err(|e| frame_error(e, "reset command allocator"))?;
        list.Reset(allocator, None)
            .map_err(|e| frame_error(e, "reset command list"))?;

        list.SetGraphicsRootSignature(&ctx.root_signature);
        list.RSSetViewports(&[ctx.viewport]);
        list.RSSetScissorRects(&[ctx.scissor]);

        list.ResourceBarrier(&[transition_barrier(
            target,
            D3D12_RESOURCE_STATE_PRESENT,
            D3D12_RESOURCE_STATE_RENDER_TARGET,
        )]);
        list.OMSetRenderTargets(1, Some(&rtv), false, None);
        list.ClearRenderTargetView(rtv, &clear_color, None);

        for bundle in renderables.replay().filter_map(|r| r.bundle()) {
            list.ExecuteBundle(bundle);
            bundles += 1;
        }

        list.ResourceBarrier(&[transition_barrier(
            target,
            D3D12_RESOURCE_STATE_RENDER_TARGET,
            D3D12_RESOURCE_STATE_PRESENT,
        )]);
        list.Close()
            .map_err(|e| frame_error(e, "close command list"))?;
    }
    Ok(bundles)
}

impl Driver for Dx12Driver {
    fn backend(&self) -> BackendType {
        BackendType::Dx12
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn initialize(&mut self) -> DriverResult<()> {
        self.lifecycle.expect_initialize()?;

        if self.config.validation {
            let mut debug: Option<ID3D12Debug> = None;
            match unsafe { D3D12GetDebugInterface(&mut debug) } {
                Ok(()) => {
                    if let Some(debug) = debug {
                        unsafe { debug.EnableDebugLayer() };
                    }
                }
                Err(_) => self
                    .log
                    .warn(format_args!("D3D12 debug layer requested but not available")),
            }
        }

        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory1() }
            .map_err(|e| DriverError::LoaderUnavailable(e.to_string()))?;

        let mut adapters = Vec::new();
        // EnumAdapters1 fails with DXGI_ERROR_NOT_FOUND past the last adapter.
        while let Ok(adapter) = unsafe { factory.EnumAdapters1(adapters.len() as u32) } {
            adapters.push(adapter);
        }
        if adapters.is_empty() {
            return Err(DriverError::NoAdapters);
        }

        self.gpus = adapters
            .iter()
            .enumerate()
            .map(|(id, adapter)| describe_adapter(adapter, id as u32))
            .collect::<DriverResult<Vec<_>>>()?;
        for gpu in &self.gpus {
            self.log.info(format_args!("Found adapter {}", gpu));
        }

        self.adapters = adapters;
        self.factory = Some(factory);
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

        let context = self.build_context(index).map_err(|e| {
            self.log.error(format_args!(
                "Failed to select {}: {}",
                self.gpus[index].name, e
            ));
            e
        })?;
        self.log.info(format_args!(
            "Selected {} ({}x{}, {} buffers, {:?})",
            self.gpus[index].name,
            context.surface.width,
            context.surface.height,
            context.surface.image_count,
            context.surface.present_mode
        ));
        self.frame = Some(context);
        self.lifecycle.set(DriverState::DeviceSelected);
        Ok(())
    }

    fn selected_gpu(&self) -> Option<&Gpu> {
        self.frame.as_ref().map(|ctx| &self.gpus[ctx.gpu])
    }

    fn surface_info(&self) -> Option<SurfaceInfo> {
        self.frame.as_ref().map(|ctx| ctx.surface)
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
        ctx.ensure_alive()?;
        ctx.poll_fence()?;

        let slot = ctx.frame_index;
        ctx.ring.ensure_reusable(slot)?;
        let bundles = record_frame(
            ctx,
            &self.renderables,
            self.config.clear_color.to_array(),
            slot,
        )
        .map_err(|e| ctx.note_failure(e))?;
        self.log.trace(format_args!(
            "Recorded slot {} with {} bundles",
            slot, bundles
        ));

        self.lifecycle.set(DriverState::FramePrepared);
        Ok(())
    }

    fn present_frame(&mut self) -> DriverResult<()> {
        self.lifecycle.expect_present()?;
        // The recorded frame is consumed whatever happens below.
        self.lifecycle.set(DriverState::DeviceSelected);

        let sync_interval = u32::from(self.config.present.vsync);
        let ctx = self
            .frame
            .as_mut()
            .ok_or(DriverError::FrameFailed("no device".into()))?;
        ctx.ensure_alive()?;
        let slot = ctx.frame_index;

        let list = ctx
            .command_list
            .cast::<ID3D12CommandList>()
            .map_err(|e| frame_error(e, "submit"))?;
        unsafe { ctx.queue.ExecuteCommandLists(&[Some(list)]) };

        let presented = unsafe { ctx.swapchain.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(|e| ctx.note_failure(frame_error(e, "present")));
        // The back buffer index moves on even if the wait below fails.
        ctx.frame_index = unsafe { ctx.swapchain.GetCurrentBackBufferIndex() } as usize;

        let value = ctx.ring.submit(slot);
        unsafe { ctx.queue.Signal(&ctx.fence, value) }
            .map_err(|e| ctx.note_failure(frame_error(e, "signal fence")))?;

        self.wait_for_frame_ready(value)?;

        presented.map_err(|error| {
            self.log
                .warn(format_args!("Present of slot {} failed: {}", slot, error));
            error
        })
    }

    fn create_renderable(&mut self) -> DriverResult<RenderableHandle> {
        self.lifecycle.expect_device("create_renderable")?;
        let ctx = self.frame.as_ref().ok_or(DriverError::InvalidState {
            operation: "create_renderable",
            state: self.lifecycle.state(),
        })?;
        let renderable = Dx12Renderable::new(
            ctx.device.clone(),
            ctx.root_signature.clone(),
            ctx.bundle_allocator.clone(),
            TargetFormats {
                color: ctx.surface.color_format,
                depth: ctx.surface.depth_format,
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

impl Drop for Dx12Driver {
    fn drop(&mut self) {
        self.teardown();
    }
}
