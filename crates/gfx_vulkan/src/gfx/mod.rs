//! Backend-agnostic value types used by the recording API
//!
//! These mirror what render stages speak in; the Vulkan backend maps them to
//! `ash::vk` structures at the point where a native call is made.

use serde::{Deserialize, Serialize};

/// Level of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommandBufferType {
    /// Submitted directly to a queue
    #[default]
    Primary,
    /// Executed from a primary buffer, inherits its render pass
    Secondary,
}

/// Stencil face selector for the per-face stencil setters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilFace {
    /// Front-facing polygons
    Front,
    /// Back-facing polygons
    Back,
}

impl StencilFace {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Front => 0,
            Self::Back => 1,
        }
    }
}

/// Primitive topology of a pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveMode {
    /// Independent points
    PointList,
    /// Independent line segments
    LineList,
    /// Connected line segments
    LineStrip,
    /// Independent triangles
    #[default]
    TriangleList,
    /// Triangle strip
    TriangleStrip,
    /// Triangle fan
    TriangleFan,
    /// Tessellation patches
    PatchList,
}

impl PrimitiveMode {
    /// Triangles produced by `count` indices (or vertices) drawn `instances` times.
    ///
    /// Non-triangle topologies contribute nothing.
    pub const fn triangle_count(self, count: u32, instances: u32) -> u32 {
        match self {
            Self::TriangleList => (count / 3).saturating_mul(instances),
            Self::TriangleStrip | Self::TriangleFan => count.saturating_sub(2).saturating_mul(instances),
            _ => 0,
        }
    }
}

/// Integer rectangle (render area, scissor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

/// Viewport with depth range
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    /// Left edge
    pub left: i32,
    /// Top edge
    pub top: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Near depth
    pub min_depth: f32,
    /// Far depth
    pub max_depth: f32,
}

impl Viewport {
    /// Full-depth-range viewport covering `rect`
    pub const fn from_rect(rect: Rect) -> Self {
        Self {
            left: rect.x,
            top: rect.y,
            width: rect.width,
            height: rect.height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    /// Red
    pub r: f32,
    /// Green
    pub g: f32,
    /// Blue
    pub b: f32,
    /// Alpha
    pub a: f32,
}

impl Color {
    /// Create a new color
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Components as an array
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Clear value for one render-pass attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// Color attachment clear
    Color([f32; 4]),
    /// Depth/stencil attachment clear
    DepthStencil {
        /// Depth clear value
        depth: f32,
        /// Stencil clear value
        stencil: u32,
    },
}

/// Depth bias triple
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthBias {
    /// Constant factor
    pub constant: f32,
    /// Maximum bias
    pub clamp: f32,
    /// Slope factor
    pub slope: f32,
}

/// Depth bounds pair
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthBounds {
    /// Lower bound
    pub min_bounds: f32,
    /// Upper bound
    pub max_bounds: f32,
}

/// Parameters of a direct draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawInfo {
    /// Vertices to draw when non-indexed
    pub vertex_count: u32,
    /// First vertex
    pub first_vertex: u32,
    /// Indices to draw when indexed
    pub index_count: u32,
    /// First index
    pub first_index: u32,
    /// Value added to each index
    pub vertex_offset: i32,
    /// Instances to draw; 0 is treated as 1
    pub instance_count: u32,
    /// First instance
    pub first_instance: u32,
}

/// One buffer-to-texture copy region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferTextureCopy {
    /// Byte offset into the source buffer
    pub buffer_offset: u64,
    /// Row length in texels (0 = tightly packed)
    pub buffer_stride: u32,
    /// Image height in texels (0 = tightly packed)
    pub buffer_tex_height: u32,
    /// Destination offset `[x, y, z]`
    pub tex_offset: [i32; 3],
    /// Destination extent `[width, height, depth]`
    pub tex_extent: [u32; 3],
    /// Destination mip level
    pub mip_level: u32,
    /// First destination array layer
    pub base_array_layer: u32,
    /// Number of destination array layers
    pub layer_count: u32,
}

/// Graphics API a shader source is selected for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GfxApi {
    /// OpenGL ES 2
    Gles2,
    /// OpenGL ES 3
    Gles3,
    /// Metal
    Metal,
    /// Vulkan
    Vulkan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangle_list_count() {
        assert_eq!(PrimitiveMode::TriangleList.triangle_count(9, 2), 6);
        assert_eq!(PrimitiveMode::TriangleList.triangle_count(10, 1), 3);
    }

    #[test]
    fn test_strip_and_fan_count() {
        assert_eq!(PrimitiveMode::TriangleStrip.triangle_count(6, 3), 12);
        assert_eq!(PrimitiveMode::TriangleFan.triangle_count(5, 1), 3);
        assert_eq!(PrimitiveMode::TriangleStrip.triangle_count(1, 4), 0);
    }

    #[test]
    fn test_triangle_count_saturates() {
        assert_eq!(PrimitiveMode::TriangleList.triangle_count(3_000_000_000, 5), u32::MAX);
        assert_eq!(PrimitiveMode::TriangleStrip.triangle_count(u32::MAX, 2), u32::MAX);
    }

    #[test]
    fn test_other_topologies_count_nothing() {
        assert_eq!(PrimitiveMode::LineList.triangle_count(9, 2), 0);
        assert_eq!(PrimitiveMode::PointList.triangle_count(9, 2), 0);
    }

    #[test]
    fn test_viewport_from_rect() {
        let vp = Viewport::from_rect(Rect::new(1, 2, 30, 40));
        assert_eq!(vp.left, 1);
        assert_eq!(vp.height, 40);
        assert_eq!(vp.max_depth, 1.0);
    }
}
