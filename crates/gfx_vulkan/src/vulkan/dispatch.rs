//! Native entry points driven by the recorder
//!
//! [`DeviceDispatch`] is the seam between the recording logic and the driver.
//! The production implementation forwards to `ash`
//! ([`AshDispatch`](super::ash_dispatch::AshDispatch)); the trace implementation
//! ([`TraceDispatch`](super::trace::TraceDispatch)) records every call so command
//! streams can be compared without a GPU.
//!
//! Everything crossing the trait is plain data: no `p_next` chains and no raw
//! pointers. Implementations build the pointer-carrying Vulkan structures at
//! the point of the call.

use ash::prelude::VkResult;
use ash::vk;

use crate::gfx::ClearValue;
use super::shader::UpdateTemplate;

/// Metadata for one descriptor slot.
///
/// Only the field matching the slot's declared descriptor type is read when
/// the descriptor is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorInfo {
    /// Used by uniform/storage (dynamic) buffer descriptors
    pub buffer: vk::DescriptorBufferInfo,
    /// Used by sampler and image descriptors
    pub image: vk::DescriptorImageInfo,
    /// Used by texel buffer descriptors
    pub texel_buffer_view: vk::BufferView,
}

impl PartialEq for DescriptorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.buffer.buffer == other.buffer.buffer
            && self.buffer.offset == other.buffer.offset
            && self.buffer.range == other.buffer.range
            && self.image.sampler == other.image.sampler
            && self.image.image_view == other.image.image_view
            && self.image.image_layout == other.image.image_layout
            && self.texel_buffer_view == other.texel_buffer_view
    }
}

/// Which part of a [`DescriptorInfo`] a descriptor type reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorClass {
    /// `vk::DescriptorBufferInfo`
    Buffer,
    /// `vk::DescriptorImageInfo`
    Image,
    /// `vk::BufferView`
    TexelBuffer,
}

impl DescriptorClass {
    /// Classify a descriptor type; `None` for types this backend does not write
    pub fn of(descriptor_type: vk::DescriptorType) -> Option<Self> {
        match descriptor_type {
            vk::DescriptorType::UNIFORM_BUFFER
            | vk::DescriptorType::STORAGE_BUFFER
            | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
            | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => Some(Self::Buffer),
            vk::DescriptorType::SAMPLER
            | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
            | vk::DescriptorType::SAMPLED_IMAGE
            | vk::DescriptorType::STORAGE_IMAGE
            | vk::DescriptorType::INPUT_ATTACHMENT => Some(Self::Image),
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER
            | vk::DescriptorType::STORAGE_TEXEL_BUFFER => Some(Self::TexelBuffer),
            _ => None,
        }
    }
}

/// Payload of a single descriptor write
#[derive(Debug, Clone, Copy)]
pub enum WritePayload<'a> {
    /// Buffer descriptor
    Buffer(&'a vk::DescriptorBufferInfo),
    /// Image or sampler descriptor
    Image(&'a vk::DescriptorImageInfo),
    /// Texel buffer descriptor
    TexelBufferView(&'a vk::BufferView),
}

impl<'a> WritePayload<'a> {
    /// Select the payload for `descriptor_type` out of `info`
    pub fn select(descriptor_type: vk::DescriptorType, info: &'a DescriptorInfo) -> Option<Self> {
        DescriptorClass::of(descriptor_type).map(|class| match class {
            DescriptorClass::Buffer => Self::Buffer(&info.buffer),
            DescriptorClass::Image => Self::Image(&info.image),
            DescriptorClass::TexelBuffer => Self::TexelBufferView(&info.texel_buffer_view),
        })
    }
}

/// One entry of a batched `vkUpdateDescriptorSets`
#[derive(Debug, Clone, Copy)]
pub struct DescriptorWrite<'a> {
    /// Destination set
    pub dst_set: vk::DescriptorSet,
    /// Destination binding
    pub dst_binding: u32,
    /// Destination array element
    pub dst_array_element: u32,
    /// Declared descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Descriptor data
    pub payload: WritePayload<'a>,
}

/// Render pass inherited by a secondary command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inheritance {
    /// Render pass the secondary buffer executes within
    pub render_pass: vk::RenderPass,
    /// Subpass index
    pub subpass: u32,
    /// Framebuffer, or null when unknown at record time
    pub framebuffer: vk::Framebuffer,
}

/// Arguments of `vkBeginCommandBuffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingBegin {
    /// Usage flags
    pub flags: vk::CommandBufferUsageFlags,
    /// Inheritance info for secondary buffers
    pub inheritance: Option<Inheritance>,
}

/// Arguments of `vkCmdBeginRenderPass` (subpass contents are always inline)
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin<'a> {
    /// Render pass
    pub render_pass: vk::RenderPass,
    /// Resolved framebuffer
    pub framebuffer: vk::Framebuffer,
    /// Render area
    pub render_area: vk::Rect2D,
    /// One clear value per attachment, in attachment order
    pub clear_values: &'a [ClearValue],
}

/// Layout transition of a whole image subresource range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    /// Image to transition
    pub image: vk::Image,
    /// Aspect of the image
    pub aspect_mask: vk::ImageAspectFlags,
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Accesses that must complete first
    pub src_access: vk::AccessFlags,
    /// Accesses that wait on the barrier
    pub dst_access: vk::AccessFlags,
    /// First mip level
    pub base_mip_level: u32,
    /// Mip level count
    pub level_count: u32,
    /// First array layer
    pub base_array_layer: u32,
    /// Array layer count
    pub layer_count: u32,
}

/// Native device entry points used by the command buffer and device pools.
///
/// All handles passed in must have been created from the same device. The
/// recorder only calls `cmd_*` methods between `begin_command_buffer` and
/// `end_command_buffer` on the same handle.
pub trait DeviceDispatch {
    /// Raw device handle
    fn device_handle(&self) -> vk::Device;

    // --- command pools -------------------------------------------------

    /// Create a resettable command pool for `queue_family_index`
    fn create_command_pool(&self, queue_family_index: u32) -> VkResult<vk::CommandPool>;
    /// Destroy a command pool and every buffer allocated from it
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate `count` command buffers at `level`
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    // --- descriptor pools ----------------------------------------------

    /// Create a descriptor pool
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Return every set of `pool` to it
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()>;
    /// Allocate one set per layout
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    /// `vkUpdateDescriptorSetWithTemplate`
    fn update_descriptor_set_with_template(
        &self,
        set: vk::DescriptorSet,
        template: &UpdateTemplate,
        descriptors: &[DescriptorInfo],
    );
    /// `vkUpdateDescriptorSets` without copies
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite<'_>]);

    // --- queues ----------------------------------------------------------

    /// Submit command buffers in one batch
    fn queue_submit(
        &self,
        queue: vk::Queue,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> VkResult<()>;

    // --- recording -------------------------------------------------------

    /// Open recording
    fn begin_command_buffer(&self, cb: vk::CommandBuffer, begin: &RecordingBegin) -> VkResult<()>;
    /// Close recording
    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()>;
    /// Open a render pass with inline subpass contents
    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, begin: &RenderPassBegin<'_>);
    /// Close the render pass
    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer);
    /// Bind a pipeline
    fn cmd_bind_pipeline(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    /// Bind vertex buffers starting at `first_binding`
    fn cmd_bind_vertex_buffers(
        &self,
        cb: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    /// Bind the index buffer
    fn cmd_bind_index_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    /// Bind descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    /// `vkCmdPushDescriptorSetWithTemplateKHR`
    fn cmd_push_descriptor_set_with_template(
        &self,
        cb: vk::CommandBuffer,
        template: &UpdateTemplate,
        layout: vk::PipelineLayout,
        set: u32,
        descriptors: &[DescriptorInfo],
    );
    /// Set viewports starting at `first_viewport`
    fn cmd_set_viewport(&self, cb: vk::CommandBuffer, first_viewport: u32, viewports: &[vk::Viewport]);
    /// Set scissors starting at `first_scissor`
    fn cmd_set_scissor(&self, cb: vk::CommandBuffer, first_scissor: u32, scissors: &[vk::Rect2D]);
    /// Set line width
    fn cmd_set_line_width(&self, cb: vk::CommandBuffer, width: f32);
    /// Set depth bias
    fn cmd_set_depth_bias(&self, cb: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32);
    /// Set blend constants
    fn cmd_set_blend_constants(&self, cb: vk::CommandBuffer, constants: &[f32; 4]);
    /// Set depth bounds
    fn cmd_set_depth_bounds(&self, cb: vk::CommandBuffer, min_bounds: f32, max_bounds: f32);
    /// Set stencil write mask for `face`
    fn cmd_set_stencil_write_mask(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, mask: u32);
    /// Set stencil compare mask for `face`
    fn cmd_set_stencil_compare_mask(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, mask: u32);
    /// Set stencil reference for `face`
    fn cmd_set_stencil_reference(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, reference: u32);
    /// Non-indexed draw
    fn cmd_draw(
        &self,
        cb: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    /// Indexed draw
    fn cmd_draw_indexed(
        &self,
        cb: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    /// Non-indexed indirect draw
    fn cmd_draw_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    );
    /// Indexed indirect draw
    fn cmd_draw_indexed_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    );
    /// Execute secondary command buffers
    fn cmd_execute_commands(&self, cb: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]);
    /// Inline buffer update; `data.len()` is a multiple of 4 and at most 65536
    fn cmd_update_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    );
    /// Image layout transitions
    fn cmd_pipeline_barrier(
        &self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        transitions: &[ImageTransition],
    );
    /// Buffer to image copy
    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
}
