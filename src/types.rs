//! Backend-neutral value types shared by all drivers.

use bytemuck::{Pod, Zeroable};

/// Texture formats the drivers report through [`SurfaceInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Depth32FloatStencil8,
    Depth32Float,
    Depth24UnormStencil8,
    Depth16UnormStencil8,
    Depth16Unorm,
    /// A format without a neutral name, carrying the backend's raw value.
    Native(i32),
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            Self::Depth32FloatStencil8
                | Self::Depth32Float
                | Self::Depth24UnormStencil8
                | Self::Depth16UnormStencil8
                | Self::Depth16Unorm
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth32FloatStencil8 | Self::Depth24UnormStencil8 | Self::Depth16UnormStencil8
        )
    }
}

/// Presentation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PresentMode {
    /// No vsync, may tear.
    Immediate,
    /// Triple buffering, newest frame replaces the queued one.
    Mailbox,
    /// Vsync, always supported.
    #[default]
    Fifo,
    /// Vsync, but a late frame is shown immediately.
    FifoRelaxed,
}

/// Interleaved vertex consumed by every backend's input layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    pub const POSITION_OFFSET: u32 = 0;
    pub const COLOR_OFFSET: u32 = 12;

    pub fn new(position: [f32; 3], color: [f32; 4]) -> Self {
        Self { position, color }
    }
}

/// Primitive topology of a renderable's draw call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    /// Three control points per patch, used when tessellation stages are attached.
    PatchList,
}

/// What the selected device presents to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub width: u32,
    pub height: u32,
    pub color_format: TextureFormat,
    /// `None` when the backend renders without a depth attachment.
    pub depth_format: Option<TextureFormat>,
    pub present_mode: PresentMode,
    pub image_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(Vertex::STRIDE, 28);
        assert_eq!(std::mem::offset_of!(Vertex, color) as u32, Vertex::COLOR_OFFSET);

        let vertices = [
            Vertex::new([0.0, 0.5, 0.0], [1.0, 0.0, 0.0, 1.0]),
            Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0, 1.0]),
        ];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 56);
    }

    #[test]
    fn test_depth_format_queries() {
        assert!(TextureFormat::Depth24UnormStencil8.has_stencil());
        assert!(TextureFormat::Depth32Float.is_depth());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth());
    }
}
