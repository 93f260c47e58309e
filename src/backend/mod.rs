//! Backend implementations of [`Driver`](crate::Driver).
//!
//! The headless backend is always compiled. The native backends sit behind
//! their cargo features and target platforms.

pub mod headless;

// Vulkan backend is only available on native platforms
#[cfg(all(not(target_arch = "wasm32"), feature = "vulkan-backend"))]
pub mod vulkan;

#[cfg(all(windows, feature = "dx12-backend"))]
pub mod dx12;
