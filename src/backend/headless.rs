//! Headless backend over simulated adapters.
//!
//! This backend doesn't touch a GPU. It runs the same lifecycle, frame-slot
//! bookkeeping and renderable ownership as the native backends against a
//! fixed set of [`SimulatedAdapter`]s, records every frame-protocol step in
//! a trace, and counts live simulated GPU objects so leaks after failed or
//! repeated device selection are observable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::DriverConfig;
use crate::driver::{gpu_index, Driver, DriverState, Lifecycle};
use crate::error::{DriverError, DriverResult};
use crate::frame::FrameRing;
use crate::gpu::Gpu;
use crate::logging::LogSink;
use crate::renderable::{
    PipelineDescriptor, Renderable, RenderableArena, RenderableHandle, RenderableInputs,
    RenderableStatus, TargetFormats,
};
use crate::shader::{ShaderStage, StageSupport};
use crate::types::{PresentMode, SurfaceInfo, TextureFormat, Vertex};
use crate::BackendType;

/// Bytecode suffix for headless shader files.
pub const HEADLESS_SHADER_SUFFIX: &str = ".bin";

/// Point in `select_gpu` where a simulated creation failure is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStage {
    Device,
    Queue,
    Swapchain,
    RenderTargets,
    CommandAllocators,
    SyncObjects,
}

/// Simulated per-frame fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    /// Presentation reports the surface as out of date.
    SurfaceOutdated,
    /// The queue stops completing work.
    Hang,
    /// The fence wait returns early with the frame still on the GPU.
    WaitFailed,
}

/// A simulated physical adapter.
#[derive(Debug, Clone)]
pub struct SimulatedAdapter {
    pub name: String,
    pub memory_mb: u32,
    pub vendor_id: u32,
    pub device_id: u32,
    pub software: bool,
    pub presentation: bool,
    pub sampler_anisotropy: bool,
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
    pub max_anisotropy: f32,
    pub present_modes: Vec<PresentMode>,
    /// Image count the swapchain hands back; `None` honours the request.
    pub swapchain_images: Option<u32>,
    /// Render target views created; `None` creates one per swapchain image.
    pub render_target_views: Option<u32>,
    pub fail_at: Option<SelectionStage>,
    pub fail_pipeline_builds: bool,
    /// Faults raised by `present_frame`, keyed by 0-based frame number.
    pub present_faults: Vec<(u64, FrameFault)>,
}

impl SimulatedAdapter {
    pub fn new(name: &str, memory_mb: u32, vendor_id: u32, device_id: u32) -> Self {
        Self {
            name: name.to_string(),
            memory_mb,
            vendor_id,
            device_id,
            software: false,
            presentation: true,
            sampler_anisotropy: true,
            geometry_shader: true,
            tessellation_shader: true,
            max_anisotropy: 16.0,
            present_modes: vec![
                PresentMode::Fifo,
                PresentMode::FifoRelaxed,
                PresentMode::Mailbox,
                PresentMode::Immediate,
            ],
            swapchain_images: None,
            render_target_views: None,
            fail_at: None,
            fail_pipeline_builds: false,
            present_faults: Vec::new(),
        }
    }

    /// A software rasterizer that only presents with FIFO.
    pub fn software(name: &str) -> Self {
        Self {
            software: true,
            max_anisotropy: 4.0,
            present_modes: vec![PresentMode::Fifo],
            ..Self::new(name, 0, 0x1414, 0x008c)
        }
    }

    pub fn with_failure(mut self, stage: SelectionStage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    pub fn with_present_fault(mut self, frame: u64, fault: FrameFault) -> Self {
        self.present_faults.push((frame, fault));
        self
    }

    fn stages(&self) -> StageSupport {
        StageSupport {
            geometry: self.geometry_shader,
            tessellation: self.tessellation_shader,
        }
    }

    fn describe(&self, id: u32) -> Gpu {
        Gpu::new(
            id,
            &self.name,
            self.memory_mb,
            self.vendor_id,
            self.device_id,
            self.software,
        )
    }
}

/// Adapter set used by [`HeadlessDriver::new`].
pub fn default_adapters() -> Vec<SimulatedAdapter> {
    vec![
        SimulatedAdapter::new("Headless Discrete GPU", 8192, 0x10de, 0x2684),
        SimulatedAdapter::software("Headless Software Rasterizer"),
    ]
}

/// One step of the frame protocol as observed by the simulated GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// The command allocator of `slot` was reset for recording.
    Reset { slot: usize },
    Record { slot: usize, renderables: usize },
    Submit { slot: usize, value: u64 },
    Present { slot: usize },
    /// `wait_for_frame_ready` returned with `value` complete.
    Waited { value: u64 },
}

/// Counts live simulated GPU objects.
#[derive(Debug, Clone, Default)]
struct ObjectCounter(Arc<AtomicUsize>);

impl ObjectCounter {
    fn create(&self, object: &'static str, fail: bool) -> DriverResult<SimObject> {
        if fail {
            return Err(DriverError::creation(object, "simulated failure"));
        }
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(SimObject {
            counter: self.clone(),
        })
    }

    fn live(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct SimObject {
    counter: ObjectCounter,
}

impl Drop for SimObject {
    fn drop(&mut self) {
        self.counter.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct SimulatedQueue {
    signaled: u64,
    completed: u64,
    hung: bool,
}

#[derive(Debug)]
struct SimulatedDevice {
    adapter: usize,
    ring: FrameRing,
    queue: SimulatedQueue,
    frame_index: usize,
    surface: SurfaceInfo,
    max_anisotropy: f32,
    // Field order is teardown order.
    _fence: SimObject,
    _allocators: Vec<SimObject>,
    _render_targets: Vec<SimObject>,
    _swapchain: SimObject,
    _queue: SimObject,
    _device: SimObject,
}

/// Driver over simulated adapters.
pub struct HeadlessDriver {
    config: DriverConfig,
    log: LogSink,
    lifecycle: Lifecycle,
    runtime_available: bool,
    adapters: Vec<SimulatedAdapter>,
    gpus: Vec<Gpu>,
    renderables: RenderableArena<HeadlessRenderable>,
    device: Option<SimulatedDevice>,
    objects: ObjectCounter,
    trace: Vec<FrameEvent>,
    frames_presented: u64,
}

impl HeadlessDriver {
    /// Driver over [`default_adapters`].
    pub fn new(config: DriverConfig) -> Self {
        Self::with_adapters(default_adapters(), config)
    }

    pub fn with_adapters(adapters: Vec<SimulatedAdapter>, config: DriverConfig) -> Self {
        let log = config.log.clone();
        Self {
            config,
            log,
            lifecycle: Lifecycle::new(),
            runtime_available: true,
            adapters,
            gpus: Vec::new(),
            renderables: RenderableArena::new(),
            device: None,
            objects: ObjectCounter::default(),
            trace: Vec::new(),
            frames_presented: 0,
        }
    }

    /// Driver whose `initialize` fails as if no graphics runtime were installed.
    pub fn without_runtime(config: DriverConfig) -> Self {
        Self {
            runtime_available: false,
            ..Self::with_adapters(Vec::new(), config)
        }
    }

    /// Frame-protocol steps recorded so far.
    pub fn trace(&self) -> &[FrameEvent] {
        &self.trace
    }

    /// Simulated GPU objects currently alive, renderables included.
    pub fn live_objects(&self) -> usize {
        self.objects.live()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Block until the simulated queue has completed `value`.
    pub fn wait_for_frame_ready(&mut self, value: u64) -> DriverResult<()> {
        let device = self
            .device
            .as_mut()
            .ok_or(DriverError::InvalidState {
                operation: "wait_for_frame_ready",
                state: self.lifecycle.state(),
            })?;

        if device.queue.hung {
            self.log.error(format_args!(
                "Fence wait for value {} timed out after {:?}",
                value, self.config.fence_timeout
            ));
            return Err(DriverError::DeviceLost);
        }

        // The simulated GPU finishes everything it was given.
        device.queue.completed = device.queue.signaled;
        device.ring.complete(device.queue.completed);
        self.trace.push(FrameEvent::Waited {
            value: device.queue.completed,
        });
        Ok(())
    }

    fn teardown_device(&mut self) {
        if self.device.is_some() {
            self.log.debug(format_args!(
                "Releasing device ({} renderables)",
                self.renderables.len()
            ));
        }
        self.renderables.clear();
        self.device = None;
    }

    fn build_device(&self, index: usize) -> DriverResult<SimulatedDevice> {
        let adapter = &self.adapters[index];
        let fail = |stage| adapter.fail_at == Some(stage);

        if !adapter.presentation {
            return Err(DriverError::CapabilityUnsupported(format!(
                "{} cannot present to the surface",
                adapter.name
            )));
        }
        if !adapter.sampler_anisotropy {
            return Err(DriverError::CapabilityUnsupported(format!(
                "{} lacks sampler anisotropy",
                adapter.name
            )));
        }

        let requested = self.config.render_target_count as usize;

        let device = self.objects.create("device", fail(SelectionStage::Device))?;
        let queue = self.objects.create("command queue", fail(SelectionStage::Queue))?;
        let swapchain = self
            .objects
            .create("swapchain", fail(SelectionStage::Swapchain))?;

        // Like a Vulkan driver, the swapchain may hand out more images.
        let images = adapter
            .swapchain_images
            .map_or(requested, |count| count as usize);
        if images != requested {
            self.log.warn(format_args!(
                "Requested {} render targets, swapchain has {}",
                requested, images
            ));
        }
        let ring = FrameRing::new(images)?;

        let views = adapter
            .render_target_views
            .map_or(images, |count| count as usize);
        let render_targets = (0..views)
            .map(|_| {
                self.objects
                    .create("render target view", fail(SelectionStage::RenderTargets))
            })
            .collect::<DriverResult<Vec<_>>>()?;
        let allocators = (0..images)
            .map(|_| {
                self.objects.create(
                    "command allocator",
                    fail(SelectionStage::CommandAllocators),
                )
            })
            .collect::<DriverResult<Vec<_>>>()?;
        ring.expect_slot_count("render target views", render_targets.len())?;
        ring.expect_slot_count("command allocators", allocators.len())?;

        let fence = self.objects.create("fence", fail(SelectionStage::SyncObjects))?;

        let desired = self.config.present.desired_mode();
        let present_mode = if adapter.present_modes.contains(&desired) {
            desired
        } else {
            PresentMode::Fifo
        };

        Ok(SimulatedDevice {
            adapter: index,
            ring,
            queue: SimulatedQueue::default(),
            frame_index: 0,
            surface: SurfaceInfo {
                width: self.config.surface_size.0,
                height: self.config.surface_size.1,
                color_format: TextureFormat::Rgba8Unorm,
                depth_format: Some(TextureFormat::Depth32FloatStencil8),
                present_mode,
                image_count: images as u32,
            },
            max_anisotropy: self
                .config
                .texture_filtering
                .max_anisotropy()
                .min(adapter.max_anisotropy),
            _fence: fence,
            _allocators: allocators,
            _render_targets: render_targets,
            _swapchain: swapchain,
            _queue: queue,
            _device: device,
        })
    }

    fn selected_adapter(&self) -> Option<&SimulatedAdapter> {
        self.device.as_ref().map(|d| &self.adapters[d.adapter])
    }
}

impl Driver for HeadlessDriver {
    fn backend(&self) -> BackendType {
        BackendType::Headless
    }

    fn state(&self) -> DriverState {
        self.lifecycle.state()
    }

    fn initialize(&mut self) -> DriverResult<()> {
        self.lifecycle.expect_initialize()?;
        if !self.runtime_available {
            return Err(DriverError::LoaderUnavailable(
                "simulated runtime disabled".into(),
            ));
        }
        if self.adapters.is_empty() {
            return Err(DriverError::NoAdapters);
        }

        self.gpus = self
            .adapters
            .iter()
            .enumerate()
            .map(|(id, adapter)| adapter.describe(id as u32))
            .collect();
        for gpu in &self.gpus {
            self.log.info(format_args!("Found adapter {}", gpu));
        }

        self.lifecycle.set(DriverState::Initialized);
        Ok(())
    }

    fn gpus(&self) -> &[Gpu] {
        &self.gpus
    }

    fn select_gpu(&mut self, id: u32) -> DriverResult<()> {
        self.lifecycle.expect_select()?;
        let index = gpu_index(&self.gpus, id)?;

        self.teardown_device();
        self.lifecycle.set(DriverState::Initialized);

        let device = self.build_device(index).map_err(|e| {
            self.log.error(format_args!(
                "Failed to select {}: {}",
                self.gpus[index].name, e
            ));
            e
        })?;
        self.log.info(format_args!(
            "Selected {} ({} images, {:?})",
            self.gpus[index].name, device.surface.image_count, device.surface.present_mode
        ));
        self.device = Some(device);
        self.lifecycle.set(DriverState::DeviceSelected);
        Ok(())
    }

    fn selected_gpu(&self) -> Option<&Gpu> {
        self.device.as_ref().map(|d| &self.gpus[d.adapter])
    }

    fn surface_info(&self) -> Option<SurfaceInfo> {
        self.device.as_ref().map(|d| d.surface)
    }

    fn frame_index(&self) -> Option<usize> {
        self.device.as_ref().map(|d| d.frame_index)
    }

    fn max_anisotropy(&self) -> Option<f32> {
        self.device.as_ref().map(|d| d.max_anisotropy)
    }

    fn prepare_frame(&mut self) -> DriverResult<()> {
        self.lifecycle.expect_prepare()?;
        let device = self
            .device
            .as_mut()
            .ok_or(DriverError::FrameFailed("no device".into()))?;

        if device.queue.hung {
            return Err(DriverError::DeviceLost);
        }
        let slot = device.frame_index;
        device.ring.ensure_reusable(slot)?;
        self.trace.push(FrameEvent::Reset { slot });

        let renderables = self.renderables.replay().count();
        self.trace.push(FrameEvent::Record { slot, renderables });
        self.log.trace(format_args!(
            "Recorded slot {} with {} renderables",
            slot, renderables
        ));

        self.lifecycle.set(DriverState::FramePrepared);
        Ok(())
    }

    fn present_frame(&mut self) -> DriverResult<()> {
        self.lifecycle.expect_present()?;
        // The recorded frame is consumed whatever happens below.
        self.lifecycle.set(DriverState::DeviceSelected);

        let frame = self.frames_presented;
        let fault = self.selected_adapter().and_then(|a| {
            a.present_faults
                .iter()
                .find(|(at, _)| *at == frame)
                .map(|&(_, fault)| fault)
        });

        let device = self
            .device
            .as_mut()
            .ok_or(DriverError::FrameFailed("no device".into()))?;
        if device.queue.hung {
            return Err(DriverError::DeviceLost);
        }
        let slot = device.frame_index;

        let value = device.ring.submit(slot);
        device.queue.signaled = value;
        self.trace.push(FrameEvent::Submit { slot, value });
        // The submitted slot is consumed; the swapchain moves on.
        device.frame_index = (slot + 1) % device.ring.slot_count();
        self.frames_presented += 1;

        match fault {
            Some(FrameFault::SurfaceOutdated) => {
                self.log
                    .warn(format_args!("Surface out of date, dropping frame {}", frame));
                self.wait_for_frame_ready(value)?;
                return Err(DriverError::SurfaceOutdated);
            }
            Some(FrameFault::Hang) => device.queue.hung = true,
            Some(FrameFault::WaitFailed) => {
                self.trace.push(FrameEvent::Present { slot });
                self.log
                    .warn(format_args!("Fence wait for value {} returned early", value));
                return Err(DriverError::FrameFailed(format!(
                    "fence wait for value {} interrupted",
                    value
                )));
            }
            None => {}
        }

        self.trace.push(FrameEvent::Present { slot });
        self.wait_for_frame_ready(value)
    }

    fn create_renderable(&mut self) -> DriverResult<RenderableHandle> {
        self.lifecycle.expect_device("create_renderable")?;
        let (targets, stage_support, fail_pipeline_builds) =
            match (&self.device, self.selected_adapter()) {
                (Some(device), Some(adapter)) => (
                    TargetFormats {
                        color: device.surface.color_format,
                        depth: device.surface.depth_format,
                    },
                    adapter.stages(),
                    adapter.fail_pipeline_builds,
                ),
                _ => {
                    return Err(DriverError::InvalidState {
                        operation: "create_renderable",
                        state: self.lifecycle.state(),
                    })
                }
            };
        let renderable = HeadlessRenderable {
            inputs: RenderableInputs::default(),
            objects: self.objects.clone(),
            targets,
            stage_support,
            fail_pipeline_builds,
            stages: BTreeMap::new(),
            vertex_buffer: None,
            index_buffer: None,
            pipeline: None,
        };
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

/// Renderable backed by simulated GPU objects.
pub struct HeadlessRenderable {
    inputs: RenderableInputs,
    objects: ObjectCounter,
    targets: TargetFormats,
    stage_support: StageSupport,
    fail_pipeline_builds: bool,
    stages: BTreeMap<ShaderStage, SimObject>,
    vertex_buffer: Option<SimObject>,
    index_buffer: Option<SimObject>,
    /// Pipeline state and its baked command bundle.
    pipeline: Option<(SimObject, SimObject)>,
}

impl Renderable for HeadlessRenderable {
    fn shader_suffix(&self) -> &'static str {
        HEADLESS_SHADER_SUFFIX
    }

    fn attach_shader_bytecode(&mut self, bytecode: &[u8], stage: ShaderStage) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        self.stage_support.check(stage)?;
        if bytecode.is_empty() {
            return Err(DriverError::InvalidRenderable(format!(
                "empty bytecode for {:?} stage",
                stage
            )));
        }
        let module = self
            .objects
            .create("shader module", false)
            .map_err(|e| self.inputs.fail(e))?;
        self.stages.insert(stage, module);
        self.inputs.record_shader(stage, bytecode);
        Ok(())
    }

    fn set_vertices(&mut self, vertices: &[Vertex]) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        self.inputs.record_vertices(vertices.len())?;
        self.vertex_buffer = Some(
            self.objects
                .create("vertex buffer", false)
                .map_err(|e| self.inputs.fail(e))?,
        );
        Ok(())
    }

    fn set_indices(&mut self, indices: &[u16]) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        self.index_buffer = match self.inputs.record_indices(indices.len())? {
            Some(_) => Some(
                self.objects
                    .create("index buffer", false)
                    .map_err(|e| self.inputs.fail(e))?,
            ),
            None => None,
        };
        Ok(())
    }

    fn build(&mut self) -> DriverResult<()> {
        self.inputs.validate()?;
        self.pipeline = None;
        let pipeline = self
            .objects
            .create("pipeline state", self.fail_pipeline_builds)
            .map_err(|e| self.inputs.fail(e))?;
        let bundle = self
            .objects
            .create("command bundle", false)
            .map_err(|e| self.inputs.fail(e))?;
        self.pipeline = Some((pipeline, bundle));

        let descriptor = self.inputs.describe(self.targets);
        self.inputs.finish_build(descriptor);
        Ok(())
    }

    fn status(&self) -> RenderableStatus {
        self.inputs.status()
    }

    fn pipeline_descriptor(&self) -> Option<&PipelineDescriptor> {
        self.inputs.descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> HeadlessDriver {
        HeadlessDriver::new(DriverConfig::default().with_log(LogSink::silent()))
    }

    #[test]
    fn test_initialize_enumerates_adapters() {
        let mut driver = driver();
        assert!(driver.gpus().is_empty());
        driver.initialize().unwrap();

        let gpus = driver.gpus();
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].id, 0);
        assert!(!gpus[0].software);
        assert_eq!(gpus[1].vendor_id, 0x1414);
        assert!(gpus[1].software);
        assert_eq!(driver.state(), DriverState::Initialized);
    }

    #[test]
    fn test_initialize_twice_is_rejected() {
        let mut driver = driver();
        driver.initialize().unwrap();
        assert!(matches!(
            driver.initialize(),
            Err(DriverError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_initialize_failures() {
        let mut driver = HeadlessDriver::without_runtime(DriverConfig::default());
        assert!(matches!(
            driver.initialize(),
            Err(DriverError::LoaderUnavailable(_))
        ));
        assert_eq!(driver.state(), DriverState::Uninitialized);

        let mut driver = HeadlessDriver::with_adapters(Vec::new(), DriverConfig::default());
        assert!(matches!(driver.initialize(), Err(DriverError::NoAdapters)));
    }

    #[test]
    fn test_device_object_count() {
        let mut driver = driver();
        driver.initialize().unwrap();
        driver.select_gpu(0).unwrap();
        // device, queue, swapchain, 2 RTVs, 2 allocators, fence
        assert_eq!(driver.live_objects(), 8);
        assert_eq!(driver.frame_index(), Some(0));
    }

    #[test]
    fn test_capability_checks() {
        let mut no_present = SimulatedAdapter::new("No present", 1024, 1, 1);
        no_present.presentation = false;
        let mut no_aniso = SimulatedAdapter::new("No aniso", 1024, 1, 2);
        no_aniso.sampler_anisotropy = false;

        let mut driver = HeadlessDriver::with_adapters(
            vec![no_present, no_aniso],
            DriverConfig::default().with_log(LogSink::silent()),
        );
        driver.initialize().unwrap();
        for id in 0..2 {
            let err = driver.select_gpu(id).unwrap_err();
            assert!(matches!(err, DriverError::CapabilityUnsupported(_)));
            assert_eq!(driver.state(), DriverState::Initialized);
        }
        assert_eq!(driver.live_objects(), 0);
    }

    #[test]
    fn test_present_requires_prepare() {
        let mut driver = driver();
        driver.initialize().unwrap();
        driver.select_gpu(0).unwrap();
        assert!(matches!(
            driver.present_frame(),
            Err(DriverError::InvalidState {
                operation: "present_frame",
                ..
            })
        ));
    }

    #[test]
    fn test_software_adapter_falls_back_to_fifo() {
        let config = DriverConfig::default()
            .with_log(LogSink::silent())
            .with_present(crate::PresentPreferences {
                vsync: false,
                triple_buffering: true,
                tearing: false,
            });
        let mut driver = HeadlessDriver::new(config);
        driver.initialize().unwrap();

        driver.select_gpu(0).unwrap();
        assert_eq!(
            driver.surface_info().unwrap().present_mode,
            PresentMode::Mailbox
        );

        driver.select_gpu(1).unwrap();
        assert_eq!(driver.surface_info().unwrap().present_mode, PresentMode::Fifo);
        assert_eq!(driver.max_anisotropy(), Some(4.0));
    }

    #[test]
    fn test_empty_bytecode_rejected() {
        let mut driver = driver();
        driver.initialize().unwrap();
        driver.select_gpu(0).unwrap();
        let handle = driver.create_renderable().unwrap();
        let renderable = driver.renderable_mut(handle).unwrap();
        assert!(renderable
            .attach_shader_bytecode(&[], ShaderStage::Vertex)
            .is_err());
        assert_eq!(renderable.status(), RenderableStatus::Empty);
    }

    #[test]
    fn test_optional_stages_follow_adapter() {
        let mut adapter = SimulatedAdapter::new("No tessellation", 2048, 1, 1);
        adapter.tessellation_shader = false;
        let mut driver = HeadlessDriver::with_adapters(
            vec![adapter],
            DriverConfig::default().with_log(LogSink::silent()),
        );
        driver.initialize().unwrap();
        driver.select_gpu(0).unwrap();
        let handle = driver.create_renderable().unwrap();
        let renderable = driver.renderable_mut(handle).unwrap();

        for stage in [
            ShaderStage::TessellationControl,
            ShaderStage::TessellationEvaluation,
        ] {
            assert!(matches!(
                renderable.attach_shader_bytecode(&[1, 2, 3, 4], stage),
                Err(DriverError::CapabilityUnsupported(_))
            ));
        }
        assert_eq!(renderable.status(), RenderableStatus::Empty);

        renderable
            .attach_shader_bytecode(&[1, 2, 3, 4], ShaderStage::Geometry)
            .unwrap();
    }
}
