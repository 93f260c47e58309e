//! Render Driver - a thin abstraction over native graphics APIs
//!
//! One [`Driver`] trait hides the backend that owns the GPU:
//! - **Vulkan**: via ash, with gpu-allocator for buffer memory (native only)
//! - **Direct3D 12**: via the `windows` crate (Windows only)
//! - **Headless**: simulated adapters, no GPU required
//!
//! # Usage
//! ```no_run
//! use render_driver::{create_driver, BackendType, DriverConfig};
//!
//! # fn main() -> render_driver::DriverResult<()> {
//! let mut driver = create_driver(BackendType::Headless, None, DriverConfig::default())?;
//! driver.initialize()?;
//! for gpu in driver.gpus() {
//!     println!("{}", gpu);
//! }
//! driver.select_gpu(0)?;
//! loop {
//!     driver.prepare_frame()?;
//!     driver.present_frame()?;
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//! - Adapter enumeration and explicit GPU selection
//! - Double or triple buffered swapchains with per-slot fence tracking
//! - Renderables with precompiled shaders baked into replayable command lists
//! - Driver logging routed through an injected [`LogSink`]

pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod logging;
pub mod renderable;
pub mod shader;
pub mod thread_pool;
pub mod types;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use backend::headless::HeadlessDriver;
pub use config::{DriverConfig, PresentPreferences, TextureFiltering};
pub use driver::{Driver, DriverState, NativeWindow};
pub use error::{DriverError, DriverResult, ErrorKind};
pub use frame::{FrameRing, MAX_RENDER_TARGETS, MIN_RENDER_TARGETS};
pub use gpu::Gpu;
pub use logging::LogSink;
pub use renderable::{PipelineDescriptor, Renderable, RenderableHandle, RenderableStatus};
pub use shader::{ShaderStage, StageSupport};
pub use thread_pool::ThreadPool;
pub use types::{PresentMode, PrimitiveTopology, SurfaceInfo, TextureFormat, Vertex};

#[cfg(all(windows, feature = "dx12-backend"))]
pub use backend::dx12::Dx12Driver;
#[cfg(all(not(target_arch = "wasm32"), feature = "vulkan-backend"))]
pub use backend::vulkan::VulkanDriver;

/// Backend selection for the render driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Vulkan via ash (native only)
    #[default]
    Vulkan,
    /// Direct3D 12 (Windows only)
    Dx12,
    /// Simulated adapters without a GPU
    Headless,
}

impl BackendType {
    /// Whether this build can create a driver for the backend.
    pub fn is_compiled(self) -> bool {
        match self {
            Self::Vulkan => cfg!(all(not(target_arch = "wasm32"), feature = "vulkan-backend")),
            Self::Dx12 => cfg!(all(windows, feature = "dx12-backend")),
            Self::Headless => true,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vulkan => "vulkan",
            Self::Dx12 => "dx12",
            Self::Headless => "headless",
        })
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vulkan" | "vk" => Ok(Self::Vulkan),
            "dx12" | "d3d12" => Ok(Self::Dx12),
            "headless" => Ok(Self::Headless),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Create a driver for `backend`.
///
/// The native backends present to `window` and fail with
/// [`DriverError::CapabilityUnsupported`] without one. A backend that is not
/// compiled into this build reports [`DriverError::LoaderUnavailable`].
#[cfg_attr(
    not(any(
        all(not(target_arch = "wasm32"), feature = "vulkan-backend"),
        all(windows, feature = "dx12-backend")
    )),
    allow(unused_variables)
)]
pub fn create_driver(
    backend: BackendType,
    window: Option<Arc<dyn NativeWindow>>,
    config: DriverConfig,
) -> DriverResult<Box<dyn Driver>> {
    config.validate()?;
    match backend {
        BackendType::Headless => Ok(Box::new(HeadlessDriver::new(config))),
        #[cfg(all(not(target_arch = "wasm32"), feature = "vulkan-backend"))]
        BackendType::Vulkan => Ok(Box::new(VulkanDriver::new(
            require_window(window, backend)?,
            config,
        )?)),
        #[cfg(all(windows, feature = "dx12-backend"))]
        BackendType::Dx12 => Ok(Box::new(Dx12Driver::new(
            require_window(window, backend)?,
            config,
        )?)),
        #[allow(unreachable_patterns)]
        other => Err(DriverError::LoaderUnavailable(format!(
            "{} backend is not available in this build",
            other
        ))),
    }
}

#[cfg_attr(
    not(any(
        all(not(target_arch = "wasm32"), feature = "vulkan-backend"),
        all(windows, feature = "dx12-backend")
    )),
    allow(dead_code)
)]
fn require_window(
    window: Option<Arc<dyn NativeWindow>>,
    backend: BackendType,
) -> DriverResult<Arc<dyn NativeWindow>> {
    window.ok_or_else(|| {
        DriverError::CapabilityUnsupported(format!("{} backend needs a window to present to", backend))
    })
}
