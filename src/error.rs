//! Error types for the render driver.

use std::path::PathBuf;

use thiserror::Error;

use crate::driver::DriverState;
use crate::renderable::RenderableHandle;

/// Render driver error type
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Graphics runtime unavailable: {0}")]
    LoaderUnavailable(String),
    #[error("No adapters found")]
    NoAdapters,
    #[error("Capability unsupported: {0}")]
    CapabilityUnsupported(String),
    #[error("Failed to create {object}: {reason}")]
    ResourceCreationFailed { object: &'static str, reason: String },
    #[error("GPU id {id} is out of range ({count} enumerated)")]
    InvalidGpu { id: u32, count: usize },
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: DriverState,
    },
    #[error("Render target count mismatch: expected {expected} {resource}, got {actual}")]
    RenderTargetMismatch {
        resource: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Frame slot {slot} is still in flight (fence value {pending}, completed {completed})")]
    FrameInFlight {
        slot: usize,
        pending: u64,
        completed: u64,
    },
    #[error("Failed to load shader {path}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid renderable: {0}")]
    InvalidRenderable(String),
    #[error("Unknown renderable handle {0:?}")]
    UnknownRenderable(RenderableHandle),
    #[error("Surface out of date")]
    SurfaceOutdated,
    #[error("Device lost")]
    DeviceLost,
    #[error("Frame failed: {0}")]
    FrameFailed(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// How far the damage of an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The whole application cannot render (no runtime, no adapters, device lost).
    Fatal,
    /// The chosen adapter cannot be used; another one may work.
    AdapterFatal,
    /// The current `select_gpu` attempt failed while building device objects.
    SelectionFatal,
    /// A caller mistake; nothing was changed.
    Local,
    /// The frame was dropped; the next one may succeed.
    Transient,
}

impl DriverError {
    pub(crate) fn creation(object: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::ResourceCreationFailed {
            object,
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LoaderUnavailable(_) | Self::NoAdapters | Self::DeviceLost => ErrorKind::Fatal,
            Self::CapabilityUnsupported(_) => ErrorKind::AdapterFatal,
            Self::ResourceCreationFailed { .. } | Self::RenderTargetMismatch { .. } => {
                ErrorKind::SelectionFatal
            }
            Self::InvalidGpu { .. }
            | Self::InvalidState { .. }
            | Self::ShaderLoad { .. }
            | Self::InvalidRenderable(_)
            | Self::UnknownRenderable(_) => ErrorKind::Local,
            Self::FrameInFlight { .. } | Self::SurfaceOutdated | Self::FrameFailed(_) => {
                ErrorKind::Transient
            }
        }
    }

    /// Whether a render loop should drop the frame and keep going.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert!(DriverError::NoAdapters.is_fatal());
        assert!(DriverError::DeviceLost.is_fatal());
        assert!(DriverError::SurfaceOutdated.is_transient());
        assert_eq!(
            DriverError::InvalidGpu { id: 3, count: 1 }.kind(),
            ErrorKind::Local
        );
        assert_eq!(
            DriverError::creation("swapchain", "out of memory").kind(),
            ErrorKind::SelectionFatal
        );
        assert_eq!(
            DriverError::CapabilityUnsupported("anisotropy".into()).kind(),
            ErrorKind::AdapterFatal
        );
    }

    #[test]
    fn test_error_messages() {
        let err = DriverError::creation("fence", "ERROR_OUT_OF_DEVICE_MEMORY");
        assert_eq!(
            err.to_string(),
            "Failed to create fence: ERROR_OUT_OF_DEVICE_MEMORY"
        );

        let err = DriverError::InvalidState {
            operation: "prepare_frame",
            state: DriverState::FramePrepared,
        };
        assert_eq!(
            err.to_string(),
            "prepare_frame is not allowed in state FramePrepared"
        );
    }
}
