//! Driver configuration.

use std::time::Duration;

use glam::Vec4;

use crate::error::{DriverError, DriverResult};
use crate::frame::{MAX_RENDER_TARGETS, MIN_RENDER_TARGETS};
use crate::logging::LogSink;
use crate::types::PresentMode;

/// User presentation preferences fed into present-mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentPreferences {
    pub vsync: bool,
    pub triple_buffering: bool,
    /// Allow tearing when a late frame misses the vertical blank.
    pub tearing: bool,
}

impl Default for PresentPreferences {
    fn default() -> Self {
        Self {
            vsync: true,
            triple_buffering: false,
            tearing: false,
        }
    }
}

impl PresentPreferences {
    /// The present mode whose semantics match these preferences.
    ///
    /// | vsync | triple | tearing | mode          |
    /// |-------|--------|---------|---------------|
    /// | yes   | any    | yes     | `FifoRelaxed` |
    /// | yes   | any    | no      | `Fifo`        |
    /// | no    | yes    | any     | `Mailbox`     |
    /// | no    | no     | any     | `Immediate`   |
    pub fn desired_mode(&self) -> PresentMode {
        match (self.vsync, self.triple_buffering, self.tearing) {
            (true, _, true) => PresentMode::FifoRelaxed,
            (true, _, false) => PresentMode::Fifo,
            (false, true, _) => PresentMode::Mailbox,
            (false, false, _) => PresentMode::Immediate,
        }
    }
}

/// Anisotropic texture filtering setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFiltering {
    None,
    X2,
    X4,
    #[default]
    X8,
    X16,
}

impl TextureFiltering {
    pub fn max_anisotropy(self) -> f32 {
        match self {
            Self::None => 1.0,
            Self::X2 => 2.0,
            Self::X4 => 4.0,
            Self::X8 => 8.0,
            Self::X16 => 16.0,
        }
    }
}

/// Configuration for creating a driver
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Application name reported to the graphics runtime
    pub application_name: String,
    /// Number of swapchain images, render target views and frame slots
    pub render_target_count: u32,
    /// Surface size used when the surface leaves the extent to the application
    pub surface_size: (u32, u32),
    /// Colour the back buffer is cleared to every frame
    pub clear_color: Vec4,
    pub present: PresentPreferences,
    pub texture_filtering: TextureFiltering,
    /// Upper bound for the per-frame fence wait; `None` waits forever.
    pub fence_timeout: Option<Duration>,
    /// Enable API validation layers
    pub validation: bool,
    pub log: LogSink,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            application_name: "Render Driver".to_string(),
            render_target_count: 2,
            surface_size: (1024, 768),
            clear_color: Vec4::new(0.1, 0.3, 0.5, 1.0),
            present: PresentPreferences::default(),
            texture_filtering: TextureFiltering::default(),
            fence_timeout: None,
            validation: cfg!(debug_assertions),
            log: LogSink::global(),
        }
    }
}

impl DriverConfig {
    pub fn with_render_target_count(mut self, count: u32) -> Self {
        self.render_target_count = count;
        self
    }

    pub fn with_surface_size(mut self, width: u32, height: u32) -> Self {
        self.surface_size = (width, height);
        self
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_present(mut self, present: PresentPreferences) -> Self {
        self.present = present;
        self
    }

    pub fn with_texture_filtering(mut self, filtering: TextureFiltering) -> Self {
        self.texture_filtering = filtering;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = Some(timeout);
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_log(mut self, log: LogSink) -> Self {
        self.log = log;
        self
    }

    pub fn validate(&self) -> DriverResult<()> {
        let count = self.render_target_count as usize;
        if !(MIN_RENDER_TARGETS..=MAX_RENDER_TARGETS).contains(&count) {
            return Err(DriverError::CapabilityUnsupported(format!(
                "render target count {} outside {}..={}",
                count, MIN_RENDER_TARGETS, MAX_RENDER_TARGETS
            )));
        }
        if self.surface_size.0 == 0 || self.surface_size.1 == 0 {
            return Err(DriverError::CapabilityUnsupported(
                "surface size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Fence wait bound in nanoseconds, `u64::MAX` when unbounded.
    #[cfg_attr(
        not(all(not(target_arch = "wasm32"), feature = "vulkan-backend")),
        allow(dead_code)
    )]
    pub(crate) fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout
            .map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Fence wait bound in milliseconds, `u32::MAX` (INFINITE) when unbounded.
    #[cfg_attr(not(all(windows, feature = "dx12-backend")), allow(dead_code))]
    pub(crate) fn fence_timeout_ms(&self) -> u32 {
        self.fence_timeout
            .map_or(u32::MAX, |t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_present_mode() {
        let prefs = |vsync, triple_buffering, tearing| PresentPreferences {
            vsync,
            triple_buffering,
            tearing,
        };
        assert_eq!(prefs(true, false, false).desired_mode(), PresentMode::Fifo);
        assert_eq!(prefs(true, false, true).desired_mode(), PresentMode::FifoRelaxed);
        assert_eq!(prefs(false, true, false).desired_mode(), PresentMode::Mailbox);
        assert_eq!(prefs(false, false, false).desired_mode(), PresentMode::Immediate);
        assert_eq!(prefs(false, false, true).desired_mode(), PresentMode::Immediate);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = DriverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render_target_count, 2);
        assert_eq!(config.fence_timeout_ns(), u64::MAX);
    }

    #[test]
    fn test_render_target_range() {
        assert!(DriverConfig::default()
            .with_render_target_count(1)
            .validate()
            .is_err());
        assert!(DriverConfig::default()
            .with_render_target_count(3)
            .validate()
            .is_ok());
        assert!(DriverConfig::default()
            .with_render_target_count(4)
            .validate()
            .is_err());
    }

    #[test]
    fn test_fence_timeout_conversion() {
        let config = DriverConfig::default().with_fence_timeout(Duration::from_millis(250));
        assert_eq!(config.fence_timeout_ns(), 250_000_000);
        assert_eq!(config.fence_timeout_ms(), 250);
    }

    #[test]
    fn test_anisotropy_levels() {
        assert_eq!(TextureFiltering::None.max_anisotropy(), 1.0);
        assert_eq!(TextureFiltering::X16.max_anisotropy(), 16.0);
    }
}
