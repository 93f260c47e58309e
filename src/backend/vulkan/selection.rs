//! Capability selection helpers.
//!
//! Pure functions over what the physical device and surface report. They
//! never call into Vulkan themselves; queries that need a device are passed
//! in as closures.

use ash::vk;

use crate::config::PresentPreferences;
use crate::error::{DriverError, DriverResult};

use super::conversion::present_mode_to_vk;

/// Colour format used when the surface leaves the choice to the application.
pub const PREFERRED_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Depth/stencil formats from highest to lowest precision.
pub const DEPTH_STENCIL_PREFERENCE: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// First queue family supporting both graphics and presentation.
///
/// There is no fallback to separate graphics and present queues.
pub fn select_queue_family(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .map(|(index, family)| (index as u32, family))
        .find(|(index, family)| {
            family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && supports_present(*index)
        })
        .map(|(index, _)| index)
}

/// Pick the swapchain colour format.
///
/// A lone `UNDEFINED` entry means any format is fine, so the preferred one is
/// used. Otherwise the preferred format wins if reported, else the first.
pub fn select_color_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(vk::SurfaceFormatKHR {
            format: PREFERRED_COLOR_FORMAT,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }),
        _ => formats
            .iter()
            .find(|f| f.format == PREFERRED_COLOR_FORMAT)
            .or_else(|| formats.first())
            .copied(),
    }
}

/// First format of [`DEPTH_STENCIL_PREFERENCE`] usable as an optimally tiled
/// depth/stencil attachment.
pub fn select_depth_stencil_format(
    format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    DEPTH_STENCIL_PREFERENCE.iter().copied().find(|&format| {
        format_properties(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

/// The mode matching `preferences` if supported, otherwise FIFO.
pub fn select_present_mode(
    supported: &[vk::PresentModeKHR],
    preferences: PresentPreferences,
) -> vk::PresentModeKHR {
    let desired = present_mode_to_vk(preferences.desired_mode());
    if supported.contains(&desired) {
        desired
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Highest sample count usable for both colour and depth framebuffers.
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// The requested image count moved into the surface limits.
///
/// A `max_image_count` of 0 means the surface sets no upper bound.
pub fn swapchain_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    match capabilities.max_image_count {
        0 => count,
        max => count.min(max),
    }
}

/// The surface's current extent, or `fallback` clamped to its limits when
/// the surface lets the swapchain decide.
///
/// A zero-sized surface (a minimized window) cannot back a swapchain and is
/// reported as [`DriverError::SurfaceOutdated`] until it has a size again.
pub fn surface_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    fallback: (u32, u32),
) -> DriverResult<vk::Extent2D> {
    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
        // Some drivers report min above max; max wins.
        vk::Extent2D {
            width: fallback.0.max(min.width).min(max.width),
            height: fallback.1.max(min.height).min(max.height),
        }
    };
    if extent.width == 0 || extent.height == 0 {
        return Err(DriverError::SurfaceOutdated);
    }
    Ok(extent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn depth_support(supported: &'static [vk::Format]) -> impl Fn(vk::Format) -> vk::FormatProperties {
        move |format| vk::FormatProperties {
            optimal_tiling_features: if supported.contains(&format) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_family_needs_graphics_and_present() {
        let families = [
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];
        // Family 1 has graphics but cannot present.
        assert_eq!(select_queue_family(&families, |i| i != 1), Some(2));
        assert_eq!(select_queue_family(&families, |_| true), Some(1));
    }

    #[test]
    fn test_queue_family_without_match() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
        ];
        // Present-only on the transfer family is not enough.
        assert_eq!(select_queue_family(&families, |i| i == 0), None);
        assert_eq!(select_queue_family(&[], |_| true), None);
    }

    #[test]
    fn test_color_format_undefined_surface() {
        let chosen = select_color_format(&[surface_format(vk::Format::UNDEFINED)]).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_color_format_prefers_fixed_format() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::R8G8B8A8_UNORM),
        ];
        assert_eq!(
            select_color_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_color_format_falls_back_to_first() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32),
        ];
        assert_eq!(
            select_color_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
        assert!(select_color_format(&[]).is_none());
    }

    #[test]
    fn test_color_format_undefined_among_others_is_not_special() {
        let formats = [
            surface_format(vk::Format::UNDEFINED),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            select_color_format(&formats).unwrap().format,
            vk::Format::UNDEFINED
        );
    }

    #[test]
    fn test_depth_format_preference_order() {
        let chosen = select_depth_stencil_format(depth_support(&[
            vk::Format::D16_UNORM,
            vk::Format::D24_UNORM_S8_UINT,
        ]));
        assert_eq!(chosen, Some(vk::Format::D24_UNORM_S8_UINT));

        let chosen = select_depth_stencil_format(depth_support(&DEPTH_STENCIL_PREFERENCE));
        assert_eq!(chosen, Some(vk::Format::D32_SFLOAT_S8_UINT));
    }

    #[test]
    fn test_depth_format_requires_optimal_tiling() {
        let linear_only = |_: vk::Format| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        assert_eq!(select_depth_stencil_format(linear_only), None);
        assert_eq!(select_depth_stencil_format(depth_support(&[])), None);
    }

    #[test]
    fn test_present_mode_matches_preferences() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::FIFO_RELAXED,
        ];
        let prefs = |vsync, triple_buffering, tearing| PresentPreferences {
            vsync,
            triple_buffering,
            tearing,
        };
        assert_eq!(
            select_present_mode(&all, prefs(true, false, false)),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            select_present_mode(&all, prefs(true, false, true)),
            vk::PresentModeKHR::FIFO_RELAXED
        );
        assert_eq!(
            select_present_mode(&all, prefs(false, true, false)),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            select_present_mode(&all, prefs(false, false, true)),
            vk::PresentModeKHR::IMMEDIATE
        );
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let supported = [vk::PresentModeKHR::FIFO_RELAXED];
        let prefs = PresentPreferences {
            vsync: false,
            triple_buffering: true,
            tearing: false,
        };
        assert_eq!(
            select_present_mode(&supported, prefs),
            vk::PresentModeKHR::FIFO
        );
        // Even when FIFO itself is not (wrongly) reported.
        assert_eq!(select_present_mode(&[], prefs), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_max_usable_sample_count() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            max_usable_sample_count(&vk::PhysicalDeviceLimits::default()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_swapchain_image_count_limits() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(swapchain_image_count(&caps, 2), 2);
        assert_eq!(swapchain_image_count(&caps, 4), 3);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(swapchain_image_count(&unbounded, 2), 3);
        assert_eq!(swapchain_image_count(&unbounded, 3), 3);
    }

    #[test]
    fn test_surface_extent() {
        let fixed = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        assert_eq!(surface_extent(&fixed, (1024, 768)).unwrap().width, 800);

        let flexible = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 512,
            },
            ..Default::default()
        };
        let extent = surface_extent(&flexible, (1024, 768)).unwrap();
        assert_eq!((extent.width, extent.height), (1024, 512));
    }

    #[test]
    fn test_surface_extent_with_inverted_limits() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            max_image_extent: vk::Extent2D {
                width: 320,
                height: 240,
            },
            ..Default::default()
        };
        let extent = surface_extent(&caps, (100, 100)).unwrap();
        assert_eq!((extent.width, extent.height), (320, 240));
    }

    #[test]
    fn test_minimized_surface_is_outdated() {
        let minimized = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            ..Default::default()
        };
        assert!(matches!(
            surface_extent(&minimized, (1024, 768)),
            Err(DriverError::SurfaceOutdated)
        ));
    }
}
