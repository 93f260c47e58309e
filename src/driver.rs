//! The driver contract shared by every backend.

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::error::{DriverError, DriverResult};
use crate::gpu::Gpu;
use crate::renderable::{Renderable, RenderableHandle};
use crate::types::SurfaceInfo;
use crate::BackendType;

/// Lifecycle of a driver.
///
/// ```text
/// Uninitialized -> Initialized -> DeviceSelected <-> FramePrepared
///                       ^               |
///                       +---------------+  (failed re-selection)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    /// Adapters enumerated.
    Initialized,
    /// Device, swapchain and sync objects exist.
    DeviceSelected,
    /// Commands recorded, waiting for `present_frame`.
    FramePrepared,
}

/// A window the driver can create a presentation surface for.
pub trait NativeWindow: HasWindowHandle + HasDisplayHandle + Send + Sync {}

impl<T: HasWindowHandle + HasDisplayHandle + Send + Sync> NativeWindow for T {}

/// One render driver hides one graphics backend.
///
/// Per frame the caller runs `prepare_frame` then `present_frame`;
/// `present_frame` blocks until the GPU has finished the frame.
pub trait Driver {
    fn backend(&self) -> BackendType;

    fn state(&self) -> DriverState;

    /// Open the API context and enumerate adapters.
    fn initialize(&mut self) -> DriverResult<()>;

    /// Adapters found by `initialize`, in enumeration order.
    fn gpus(&self) -> &[Gpu];

    /// Build device, swapchain, render targets and sync objects for `id`.
    ///
    /// Any previous device is torn down first, which also destroys every
    /// renderable created on it.
    fn select_gpu(&mut self, id: u32) -> DriverResult<()>;

    fn selected_gpu(&self) -> Option<&Gpu>;

    fn surface_info(&self) -> Option<SurfaceInfo>;

    /// Slot the next `prepare_frame` records into.
    fn frame_index(&self) -> Option<usize>;

    /// Effective anisotropy: the configured filtering clamped to the device.
    fn max_anisotropy(&self) -> Option<f32>;

    /// Record the frame's commands. Nothing is submitted.
    fn prepare_frame(&mut self) -> DriverResult<()>;

    /// Submit, present and wait for the GPU to finish the frame.
    fn present_frame(&mut self) -> DriverResult<()>;

    /// Create a renderable owned by the driver.
    fn create_renderable(&mut self) -> DriverResult<RenderableHandle>;

    fn renderable_mut(&mut self, handle: RenderableHandle) -> DriverResult<&mut dyn Renderable>;

    /// Register a built renderable for per-frame replay.
    fn add_renderable(&mut self, handle: RenderableHandle) -> DriverResult<()>;

    /// Deregister and destroy a renderable.
    fn remove_renderable(&mut self, handle: RenderableHandle) -> DriverResult<()>;

    fn registered_renderables(&self) -> usize;
}

/// Shared state-machine checks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lifecycle {
    state: DriverState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: DriverState::Uninitialized,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn set(&mut self, state: DriverState) {
        self.state = state;
    }

    pub fn expect(&self, operation: &'static str, allowed: &[DriverState]) -> DriverResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DriverError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    pub fn expect_initialize(&self) -> DriverResult<()> {
        self.expect("initialize", &[DriverState::Uninitialized])
    }

    pub fn expect_select(&self) -> DriverResult<()> {
        self.expect(
            "select_gpu",
            &[DriverState::Initialized, DriverState::DeviceSelected],
        )
    }

    pub fn expect_prepare(&self) -> DriverResult<()> {
        self.expect("prepare_frame", &[DriverState::DeviceSelected])
    }

    pub fn expect_present(&self) -> DriverResult<()> {
        self.expect("present_frame", &[DriverState::FramePrepared])
    }

    pub fn expect_device(&self, operation: &'static str) -> DriverResult<()> {
        self.expect(
            operation,
            &[DriverState::DeviceSelected, DriverState::FramePrepared],
        )
    }

    /// Renderables may not change while a recorded frame references them.
    pub fn expect_mutable_renderables(&self, operation: &'static str) -> DriverResult<()> {
        self.expect(operation, &[DriverState::DeviceSelected])
    }
}

/// Validate `id` against the enumerated list.
pub(crate) fn gpu_index(gpus: &[Gpu], id: u32) -> DriverResult<usize> {
    let index = id as usize;
    if index >= gpus.len() {
        return Err(DriverError::InvalidGpu {
            id,
            count: gpus.len(),
        });
    }
    Ok(index)
}

pub(crate) type SharedWindow = Arc<dyn NativeWindow>;
