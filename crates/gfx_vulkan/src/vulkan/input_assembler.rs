//! Vertex/index/indirect buffer bundles consumed by `draw`

use std::mem;
use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, RwLock};

use crate::gfx::DrawInfo;
use super::resources::{Buffer, ResourceId};

/// Buffer of packed `vk::DrawIndirectCommand` or `vk::DrawIndexedIndirectCommand` records
#[derive(Debug, Clone)]
pub struct IndirectBuffer {
    buffer: Arc<Buffer>,
    draw_count: u32,
    indexed: bool,
}

impl IndirectBuffer {
    /// `draw_count` records starting at the buffer's start offset
    pub fn new(buffer: Arc<Buffer>, draw_count: u32, indexed: bool) -> Self {
        Self {
            buffer,
            draw_count,
            indexed,
        }
    }

    /// Backing buffer
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Number of records
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    /// Records are indexed draws
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Byte stride between records
    pub fn stride(&self) -> u32 {
        let size = if self.indexed {
            mem::size_of::<vk::DrawIndexedIndirectCommand>()
        } else {
            mem::size_of::<vk::DrawIndirectCommand>()
        };
        size as u32
    }
}

#[derive(Debug, Default)]
struct VertexBindings {
    buffers: Vec<vk::Buffer>,
    offsets: Vec<vk::DeviceSize>,
}

/// Vertex streams, optional index buffer and draw parameters
#[derive(Debug)]
pub struct InputAssembler {
    id: ResourceId,
    vertex_buffers: RwLock<Vec<Arc<Buffer>>>,
    index_buffer: Option<Arc<Buffer>>,
    indirect_buffer: Option<IndirectBuffer>,
    draw_info: DrawInfo,
    bindings: Mutex<VertexBindings>,
}

impl InputAssembler {
    /// Input assembler over `vertex_buffers`, bound from binding 0 in order
    pub fn new(vertex_buffers: Vec<Arc<Buffer>>, index_buffer: Option<Arc<Buffer>>) -> Self {
        Self {
            id: ResourceId::next(),
            vertex_buffers: RwLock::new(vertex_buffers),
            index_buffer,
            indirect_buffer: None,
            draw_info: DrawInfo::default(),
            bindings: Mutex::new(VertexBindings::default()),
        }
    }

    /// Draw from `indirect` instead of the direct draw parameters
    pub fn with_indirect_buffer(mut self, indirect: IndirectBuffer) -> Self {
        self.indirect_buffer = Some(indirect);
        self
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Vertex streams
    pub fn vertex_buffers(&self) -> Vec<Arc<Buffer>> {
        self.vertex_buffers.read().clone()
    }

    /// Index buffer
    pub fn index_buffer(&self) -> Option<&Arc<Buffer>> {
        self.index_buffer.as_ref()
    }

    /// Indirect buffer
    pub fn indirect_buffer(&self) -> Option<&IndirectBuffer> {
        self.indirect_buffer.as_ref()
    }

    /// Append another vertex stream; picked up by the next bind
    pub fn add_vertex_buffer(&self, buffer: Arc<Buffer>) {
        self.vertex_buffers.write().push(buffer);
    }

    /// Explicit draw parameters
    pub fn draw_info(&self) -> DrawInfo {
        self.draw_info
    }

    /// Replace the draw parameters; zero counts fall back to buffer sizes
    pub fn set_draw_info(&mut self, draw_info: DrawInfo) {
        self.draw_info = draw_info;
    }

    /// Set the vertex count
    pub fn set_vertex_count(&mut self, count: u32) {
        self.draw_info.vertex_count = count;
    }

    /// Set the index count
    pub fn set_index_count(&mut self, count: u32) {
        self.draw_info.index_count = count;
    }

    /// Set the instance count
    pub fn set_instance_count(&mut self, count: u32) {
        self.draw_info.instance_count = count;
    }

    /// Draw parameters with zero counts derived from the buffers
    pub fn extract_draw_info(&self) -> DrawInfo {
        let mut info = self.draw_info;
        if info.vertex_count == 0 {
            info.vertex_count = self.vertex_buffers.read().first().map_or(0, |vb| vb.count());
        }
        if info.index_count == 0 {
            info.index_count = self.index_buffer.as_ref().map_or(0, |ib| ib.count());
        }
        info
    }

    /// Current index buffer binding: handle, offset and index type from the stride
    pub fn index_binding(&self) -> Option<(vk::Buffer, vk::DeviceSize, vk::IndexType)> {
        self.index_buffer.as_ref().map(|ib| {
            let state = ib.state();
            let index_type = if ib.stride() == 4 {
                vk::IndexType::UINT32
            } else {
                vk::IndexType::UINT16
            };
            (state.handle, state.start_offset, index_type)
        })
    }

    /// Refresh the vertex binding arrays from the current buffer backings
    /// and hand them to `f`.
    ///
    /// The arrays grow when streams were added since the last bind.
    pub(crate) fn with_vertex_bindings<R>(
        &self,
        f: impl FnOnce(&[vk::Buffer], &[vk::DeviceSize]) -> R,
    ) -> R {
        let vertex_buffers = self.vertex_buffers.read();
        let count = vertex_buffers.len();
        let mut bindings = self.bindings.lock();
        if bindings.buffers.len() < count {
            bindings.buffers.resize(count, vk::Buffer::null());
            bindings.offsets.resize(count, 0);
        }
        for (i, vb) in vertex_buffers.iter().enumerate() {
            let state = vb.state();
            bindings.buffers[i] = state.handle;
            bindings.offsets[i] = state.start_offset;
        }
        f(&bindings.buffers[..count], &bindings.offsets[..count])
    }
}
