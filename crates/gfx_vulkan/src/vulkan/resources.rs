//! GPU resource handles read by the recorder
//!
//! Creation and memory binding happen elsewhere. Buffers and textures keep
//! their native handles behind a lock so an owner can recreate them (resize,
//! external texture swap) while binding layouts keep referring to the same
//! object; the recorder reads the current handles when a layout is bound.

use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use parking_lot::RwLock;

/// Process-unique identity of a resource object, used for rebind detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Snapshot of a buffer's current native backing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferState {
    /// Native buffer
    pub handle: vk::Buffer,
    /// Offset of this buffer's range inside `handle`
    pub start_offset: vk::DeviceSize,
    /// Size of the range in bytes
    pub size: vk::DeviceSize,
    /// Texel view over the range, null unless used as a texel buffer
    pub texel_view: vk::BufferView,
}

/// Buffer resource; may be a sub-range of a larger native buffer
#[derive(Debug)]
pub struct Buffer {
    id: ResourceId,
    usage: vk::BufferUsageFlags,
    stride: u32,
    state: RwLock<BufferState>,
}

impl Buffer {
    /// Buffer covering the whole of `handle`
    pub fn new(handle: vk::Buffer, usage: vk::BufferUsageFlags, size: vk::DeviceSize, stride: u32) -> Self {
        Self::with_offset(handle, usage, 0, size, stride)
    }

    /// Buffer covering `size` bytes of `handle` starting at `start_offset`
    pub fn with_offset(
        handle: vk::Buffer,
        usage: vk::BufferUsageFlags,
        start_offset: vk::DeviceSize,
        size: vk::DeviceSize,
        stride: u32,
    ) -> Self {
        Self {
            id: ResourceId::next(),
            usage,
            stride,
            state: RwLock::new(BufferState {
                handle,
                start_offset,
                size,
                texel_view: vk::BufferView::null(),
            }),
        }
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Usage flags
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Element stride in bytes
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Current backing
    pub fn state(&self) -> BufferState {
        *self.state.read()
    }

    /// Current native handle
    pub fn handle(&self) -> vk::Buffer {
        self.state.read().handle
    }

    /// Current start offset
    pub fn start_offset(&self) -> vk::DeviceSize {
        self.state.read().start_offset
    }

    /// Current size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.state.read().size
    }

    /// Number of `stride`-sized elements; 0 when the stride is 0
    pub fn count(&self) -> u32 {
        if self.stride == 0 {
            return 0;
        }
        u32::try_from(self.size() / u64::from(self.stride)).unwrap_or(u32::MAX)
    }

    /// Point the buffer at new native storage
    pub fn rebuild(&self, handle: vk::Buffer, start_offset: vk::DeviceSize, size: vk::DeviceSize) {
        let mut state = self.state.write();
        state.handle = handle;
        state.start_offset = start_offset;
        state.size = size;
    }

    /// Attach the texel view used by texel buffer descriptors
    pub fn set_texel_view(&self, view: vk::BufferView) {
        self.state.write().texel_view = view;
    }
}

/// Snapshot of a texture's current native backing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureState {
    /// Native image
    pub image: vk::Image,
    /// View sampled by shaders
    pub view: vk::ImageView,
    /// Layout the image is in when sampled
    pub layout: vk::ImageLayout,
}

/// 2D texture resource
#[derive(Debug)]
pub struct Texture {
    id: ResourceId,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    state: RwLock<TextureState>,
    extent: RwLock<vk::Extent2D>,
    external_id: Option<u32>,
}

impl Texture {
    /// Color texture sampled in `SHADER_READ_ONLY_OPTIMAL`
    pub fn new(image: vk::Image, view: vk::ImageView, format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            id: ResourceId::next(),
            format,
            aspect_mask: vk::ImageAspectFlags::COLOR,
            state: RwLock::new(TextureState {
                image,
                view,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }),
            extent: RwLock::new(vk::Extent2D { width, height }),
            external_id: None,
        }
    }

    /// Texture whose image is owned by an external producer (camera feed)
    pub fn external(
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        width: u32,
        height: u32,
        external_id: u32,
    ) -> Self {
        Self {
            external_id: Some(external_id),
            ..Self::new(image, view, format, width, height)
        }
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Pixel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Aspect used for barriers and copies
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect_mask
    }

    /// Id assigned by the external producer, if any
    pub fn external_id(&self) -> Option<u32> {
        self.external_id
    }

    /// Current backing
    pub fn state(&self) -> TextureState {
        *self.state.read()
    }

    /// Current image
    pub fn image(&self) -> vk::Image {
        self.state.read().image
    }

    /// Current view
    pub fn view(&self) -> vk::ImageView {
        self.state.read().view
    }

    /// Current size
    pub fn extent(&self) -> vk::Extent2D {
        *self.extent.read()
    }

    /// Point the texture at a recreated image
    pub fn rebuild(&self, image: vk::Image, view: vk::ImageView, width: u32, height: u32) {
        {
            let mut state = self.state.write();
            state.image = image;
            state.view = view;
        }
        *self.extent.write() = vk::Extent2D { width, height };
    }

    /// Change the layout the image is sampled in (e.g. `GENERAL` for storage use)
    pub fn set_layout(&self, layout: vk::ImageLayout) {
        self.state.write().layout = layout;
    }
}

/// Sampler resource
#[derive(Debug)]
pub struct Sampler {
    id: ResourceId,
    handle: vk::Sampler,
}

impl Sampler {
    /// Wrap a native sampler
    pub fn new(handle: vk::Sampler) -> Self {
        Self {
            id: ResourceId::next(),
            handle,
        }
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Native handle
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_resource_ids_are_unique() {
        let a = ResourceId::next();
        let b = ResourceId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_buffer_count() {
        let buffer = Buffer::new(vk::Buffer::from_raw(1), vk::BufferUsageFlags::VERTEX_BUFFER, 96, 12);
        assert_eq!(buffer.count(), 8);

        let unstrided = Buffer::new(vk::Buffer::from_raw(1), vk::BufferUsageFlags::UNIFORM_BUFFER, 96, 0);
        assert_eq!(unstrided.count(), 0);
    }

    #[test]
    fn test_buffer_rebuild_keeps_identity() {
        let buffer = Buffer::new(vk::Buffer::from_raw(1), vk::BufferUsageFlags::UNIFORM_BUFFER, 64, 0);
        let id = buffer.id();
        buffer.rebuild(vk::Buffer::from_raw(2), 256, 128);

        assert_eq!(buffer.id(), id);
        assert_eq!(buffer.handle(), vk::Buffer::from_raw(2));
        assert_eq!(buffer.start_offset(), 256);
        assert_eq!(buffer.size(), 128);
    }

    #[test]
    fn test_texture_rebuild() {
        let texture = Texture::external(
            vk::Image::from_raw(1),
            vk::ImageView::from_raw(2),
            vk::Format::R8G8B8A8_UNORM,
            4,
            4,
            9,
        );
        texture.rebuild(vk::Image::from_raw(3), vk::ImageView::from_raw(4), 8, 2);

        assert_eq!(texture.external_id(), Some(9));
        assert_eq!(texture.view(), vk::ImageView::from_raw(4));
        assert_eq!(texture.extent().width, 8);
        assert_eq!(texture.state().layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
