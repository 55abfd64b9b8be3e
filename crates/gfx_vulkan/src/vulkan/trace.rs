//! Recording `DeviceDispatch` for GPU-free tests and stream dumps
//!
//! Every call is appended to a log as a [`RecordedCommand`], tagged with the
//! command buffer it was recorded into. Handles are minted from a counter.
//! Descriptor pools honour their `max_sets`, so pool growth behaves as it
//! does on a driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;

use crate::gfx::ClearValue;
use super::dispatch::{
    DescriptorInfo, DescriptorWrite, DeviceDispatch, ImageTransition, Inheritance, RecordingBegin,
    RenderPassBegin, WritePayload,
};
use super::shader::UpdateTemplate;

/// Owned copy of a descriptor write payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordedPayload {
    /// Buffer descriptor
    Buffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Offset
        offset: vk::DeviceSize,
        /// Range
        range: vk::DeviceSize,
    },
    /// Image descriptor
    Image {
        /// Sampler
        sampler: vk::Sampler,
        /// Image view
        image_view: vk::ImageView,
        /// Layout
        image_layout: vk::ImageLayout,
    },
    /// Texel buffer descriptor
    TexelBufferView(vk::BufferView),
}

/// Owned copy of a [`DescriptorWrite`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedWrite {
    /// Destination set
    pub dst_set: vk::DescriptorSet,
    /// Destination binding
    pub dst_binding: u32,
    /// Destination array element
    pub dst_array_element: u32,
    /// Declared type
    pub descriptor_type: vk::DescriptorType,
    /// Data written
    pub payload: RecordedPayload,
}

impl From<&DescriptorWrite<'_>> for RecordedWrite {
    fn from(write: &DescriptorWrite<'_>) -> Self {
        let payload = match write.payload {
            WritePayload::Buffer(info) => RecordedPayload::Buffer {
                buffer: info.buffer,
                offset: info.offset,
                range: info.range,
            },
            WritePayload::Image(info) => RecordedPayload::Image {
                sampler: info.sampler,
                image_view: info.image_view,
                image_layout: info.image_layout,
            },
            WritePayload::TexelBufferView(view) => RecordedPayload::TexelBufferView(*view),
        };
        Self {
            dst_set: write.dst_set,
            dst_binding: write.dst_binding,
            dst_array_element: write.dst_array_element,
            descriptor_type: write.descriptor_type,
            payload,
        }
    }
}

/// One native call
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum RecordedCommand {
    CreateCommandPool { queue_family_index: u32, pool: vk::CommandPool },
    DestroyCommandPool(vk::CommandPool),
    AllocateCommandBuffers { pool: vk::CommandPool, level: vk::CommandBufferLevel, buffers: Vec<vk::CommandBuffer> },
    FreeCommandBuffers { pool: vk::CommandPool, buffers: Vec<vk::CommandBuffer> },
    CreateDescriptorPool { pool: vk::DescriptorPool, max_sets: u32 },
    DestroyDescriptorPool(vk::DescriptorPool),
    ResetDescriptorPool(vk::DescriptorPool),
    AllocateDescriptorSets { pool: vk::DescriptorPool, layouts: Vec<vk::DescriptorSetLayout>, sets: Vec<vk::DescriptorSet> },
    UpdateDescriptorSetWithTemplate { set: vk::DescriptorSet, template: vk::DescriptorUpdateTemplate, descriptors: Vec<DescriptorInfo> },
    UpdateDescriptorSets(Vec<RecordedWrite>),
    Submit { queue: vk::Queue, command_buffers: Vec<vk::CommandBuffer>, fence: vk::Fence },
    Begin { flags: vk::CommandBufferUsageFlags, inheritance: Option<Inheritance> },
    End,
    BeginRenderPass { render_pass: vk::RenderPass, framebuffer: vk::Framebuffer, render_area: vk::Rect2D, clear_values: Vec<ClearValue> },
    EndRenderPass,
    BindPipeline { bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline },
    BindVertexBuffers { first_binding: u32, buffers: Vec<vk::Buffer>, offsets: Vec<vk::DeviceSize> },
    BindIndexBuffer { buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType },
    BindDescriptorSets { layout: vk::PipelineLayout, first_set: u32, sets: Vec<vk::DescriptorSet>, dynamic_offsets: Vec<u32> },
    PushDescriptorSetWithTemplate { template: vk::DescriptorUpdateTemplate, layout: vk::PipelineLayout, set: u32, descriptors: Vec<DescriptorInfo> },
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    SetLineWidth(f32),
    SetDepthBias { constant: f32, clamp: f32, slope: f32 },
    SetBlendConstants([f32; 4]),
    SetDepthBounds { min_bounds: f32, max_bounds: f32 },
    SetStencilWriteMask { face: vk::StencilFaceFlags, mask: u32 },
    SetStencilCompareMask { face: vk::StencilFaceFlags, mask: u32 },
    SetStencilReference { face: vk::StencilFaceFlags, reference: u32 },
    Draw { vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32 },
    DrawIndexed { index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32 },
    DrawIndirect { buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32 },
    DrawIndexedIndirect { buffer: vk::Buffer, offset: vk::DeviceSize, draw_count: u32, stride: u32 },
    ExecuteCommands(Vec<vk::CommandBuffer>),
    UpdateBuffer { buffer: vk::Buffer, offset: vk::DeviceSize, data: Vec<u8> },
    PipelineBarrier { src_stage: vk::PipelineStageFlags, dst_stage: vk::PipelineStageFlags, transitions: Vec<ImageTransition> },
    CopyBufferToImage { src: vk::Buffer, dst: vk::Image, dst_layout: vk::ImageLayout, regions: Vec<vk::BufferImageCopy> },
}

/// Logged call and the command buffer it targeted (`None` for device calls)
#[derive(Debug, Clone)]
pub struct TraceEntry {
    /// Target command buffer
    pub command_buffer: Option<vk::CommandBuffer>,
    /// The call
    pub command: RecordedCommand,
}

#[derive(Default)]
struct PoolUsage {
    max_sets: u32,
    allocated: u32,
}

/// `DeviceDispatch` that logs instead of executing
pub struct TraceDispatch {
    next_handle: AtomicU64,
    log: Mutex<Vec<TraceEntry>>,
    descriptor_pools: Mutex<HashMap<vk::DescriptorPool, PoolUsage>>,
    descriptor_alloc_failure: Mutex<Option<vk::Result>>,
    command_buffer_alloc_failure: Mutex<Option<vk::Result>>,
}

impl Default for TraceDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceDispatch {
    /// Empty trace
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(0x1000),
            log: Mutex::new(Vec::new()),
            descriptor_pools: Mutex::new(HashMap::new()),
            descriptor_alloc_failure: Mutex::new(None),
            command_buffer_alloc_failure: Mutex::new(None),
        }
    }

    /// Mint a fresh non-null handle of any type
    pub fn make_handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Make every following descriptor set allocation fail with `result`
    pub fn fail_descriptor_allocations(&self, result: vk::Result) {
        *self.descriptor_alloc_failure.lock() = Some(result);
    }

    /// Make every following command buffer allocation fail with `result`
    pub fn fail_command_buffer_allocations(&self, result: vk::Result) {
        *self.command_buffer_alloc_failure.lock() = Some(result);
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        *self.descriptor_alloc_failure.lock() = None;
        *self.command_buffer_alloc_failure.lock() = None;
    }

    /// Everything logged so far
    pub fn entries(&self) -> Vec<TraceEntry> {
        self.log.lock().clone()
    }

    /// Calls recorded into `cb`, in order
    pub fn commands_for(&self, cb: vk::CommandBuffer) -> Vec<RecordedCommand> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.command_buffer == Some(cb))
            .map(|e| e.command.clone())
            .collect()
    }

    /// Device-level calls (pools, descriptor updates, submits), in order
    pub fn device_commands(&self) -> Vec<RecordedCommand> {
        self.log
            .lock()
            .iter()
            .filter(|e| e.command_buffer.is_none())
            .map(|e| e.command.clone())
            .collect()
    }

    /// Number of logged calls matching `predicate`
    pub fn count_where(&self, predicate: impl Fn(&RecordedCommand) -> bool) -> usize {
        self.log.lock().iter().filter(|e| predicate(&e.command)).count()
    }

    /// Drop the log
    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn device_call(&self, command: RecordedCommand) {
        self.log.lock().push(TraceEntry {
            command_buffer: None,
            command,
        });
    }

    fn record(&self, cb: vk::CommandBuffer, command: RecordedCommand) {
        self.log.lock().push(TraceEntry {
            command_buffer: Some(cb),
            command,
        });
    }
}

impl DeviceDispatch for TraceDispatch {
    fn device_handle(&self) -> vk::Device {
        vk::Device::from_raw(1)
    }

    fn create_command_pool(&self, queue_family_index: u32) -> VkResult<vk::CommandPool> {
        let pool = self.make_handle();
        self.device_call(RecordedCommand::CreateCommandPool {
            queue_family_index,
            pool,
        });
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.device_call(RecordedCommand::DestroyCommandPool(pool));
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        if let Some(err) = *self.command_buffer_alloc_failure.lock() {
            return Err(err);
        }
        let buffers: Vec<vk::CommandBuffer> = (0..count).map(|_| self.make_handle()).collect();
        self.device_call(RecordedCommand::AllocateCommandBuffers {
            pool,
            level,
            buffers: buffers.clone(),
        });
        Ok(buffers)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.device_call(RecordedCommand::FreeCommandBuffers {
            pool,
            buffers: buffers.to_vec(),
        });
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let pool = self.make_handle();
        self.descriptor_pools.lock().insert(
            pool,
            PoolUsage {
                max_sets,
                allocated: 0,
            },
        );
        self.device_call(RecordedCommand::CreateDescriptorPool { pool, max_sets });
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.descriptor_pools.lock().remove(&pool);
        self.device_call(RecordedCommand::DestroyDescriptorPool(pool));
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        if let Some(usage) = self.descriptor_pools.lock().get_mut(&pool) {
            usage.allocated = 0;
        }
        self.device_call(RecordedCommand::ResetDescriptorPool(pool));
        Ok(())
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        if let Some(err) = *self.descriptor_alloc_failure.lock() {
            return Err(err);
        }
        {
            let mut pools = self.descriptor_pools.lock();
            let usage = pools
                .get_mut(&pool)
                .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
            let requested = u32::try_from(layouts.len()).unwrap_or(u32::MAX);
            if usage.allocated.saturating_add(requested) > usage.max_sets {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            usage.allocated += requested;
        }

        let sets: Vec<vk::DescriptorSet> = layouts.iter().map(|_| self.make_handle()).collect();
        self.device_call(RecordedCommand::AllocateDescriptorSets {
            pool,
            layouts: layouts.to_vec(),
            sets: sets.clone(),
        });
        Ok(sets)
    }

    fn update_descriptor_set_with_template(
        &self,
        set: vk::DescriptorSet,
        template: &UpdateTemplate,
        descriptors: &[DescriptorInfo],
    ) {
        self.device_call(RecordedCommand::UpdateDescriptorSetWithTemplate {
            set,
            template: template.handle(),
            descriptors: descriptors.to_vec(),
        });
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite<'_>]) {
        self.device_call(RecordedCommand::UpdateDescriptorSets(
            writes.iter().map(RecordedWrite::from).collect(),
        ));
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> VkResult<()> {
        self.device_call(RecordedCommand::Submit {
            queue,
            command_buffers: command_buffers.to_vec(),
            fence,
        });
        Ok(())
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer, begin: &RecordingBegin) -> VkResult<()> {
        self.record(
            cb,
            RecordedCommand::Begin {
                flags: begin.flags,
                inheritance: begin.inheritance,
            },
        );
        Ok(())
    }

    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()> {
        self.record(cb, RecordedCommand::End);
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        self.record(
            cb,
            RecordedCommand::BeginRenderPass {
                render_pass: begin.render_pass,
                framebuffer: begin.framebuffer,
                render_area: begin.render_area,
                clear_values: begin.clear_values.to_vec(),
            },
        );
    }

    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) {
        self.record(cb, RecordedCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(cb, RecordedCommand::BindPipeline { bind_point, pipeline });
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cb: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.record(
            cb,
            RecordedCommand::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
                offsets: offsets.to_vec(),
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.record(
            cb,
            RecordedCommand::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            },
        );
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.record(
            cb,
            RecordedCommand::BindDescriptorSets {
                layout,
                first_set,
                sets: sets.to_vec(),
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        );
    }

    fn cmd_push_descriptor_set_with_template(
        &self,
        cb: vk::CommandBuffer,
        template: &UpdateTemplate,
        layout: vk::PipelineLayout,
        set: u32,
        descriptors: &[DescriptorInfo],
    ) {
        self.record(
            cb,
            RecordedCommand::PushDescriptorSetWithTemplate {
                template: template.handle(),
                layout,
                set,
                descriptors: descriptors.to_vec(),
            },
        );
    }

    fn cmd_set_viewport(&self, cb: vk::CommandBuffer, _first_viewport: u32, viewports: &[vk::Viewport]) {
        for viewport in viewports {
            self.record(cb, RecordedCommand::SetViewport(*viewport));
        }
    }

    fn cmd_set_scissor(&self, cb: vk::CommandBuffer, _first_scissor: u32, scissors: &[vk::Rect2D]) {
        for scissor in scissors {
            self.record(cb, RecordedCommand::SetScissor(*scissor));
        }
    }

    fn cmd_set_line_width(&self, cb: vk::CommandBuffer, width: f32) {
        self.record(cb, RecordedCommand::SetLineWidth(width));
    }

    fn cmd_set_depth_bias(&self, cb: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32) {
        self.record(cb, RecordedCommand::SetDepthBias { constant, clamp, slope });
    }

    fn cmd_set_blend_constants(&self, cb: vk::CommandBuffer, constants: &[f32; 4]) {
        self.record(cb, RecordedCommand::SetBlendConstants(*constants));
    }

    fn cmd_set_depth_bounds(&self, cb: vk::CommandBuffer, min_bounds: f32, max_bounds: f32) {
        self.record(
            cb,
            RecordedCommand::SetDepthBounds {
                min_bounds,
                max_bounds,
            },
        );
    }

    fn cmd_set_stencil_write_mask(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, mask: u32) {
        self.record(cb, RecordedCommand::SetStencilWriteMask { face, mask });
    }

    fn cmd_set_stencil_compare_mask(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, mask: u32) {
        self.record(cb, RecordedCommand::SetStencilCompareMask { face, mask });
    }

    fn cmd_set_stencil_reference(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, reference: u32) {
        self.record(cb, RecordedCommand::SetStencilReference { face, reference });
    }

    fn cmd_draw(
        &self,
        cb: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.record(
            cb,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        cb: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.record(
            cb,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            },
        );
    }

    fn cmd_draw_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        self.record(
            cb,
            RecordedCommand::DrawIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            },
        );
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        self.record(
            cb,
            RecordedCommand::DrawIndexedIndirect {
                buffer,
                offset,
                draw_count,
                stride,
            },
        );
    }

    fn cmd_execute_commands(&self, cb: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        self.record(cb, RecordedCommand::ExecuteCommands(secondaries.to_vec()));
    }

    fn cmd_update_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) {
        self.record(
            cb,
            RecordedCommand::UpdateBuffer {
                buffer,
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_pipeline_barrier(
        &self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        transitions: &[ImageTransition],
    ) {
        self.record(
            cb,
            RecordedCommand::PipelineBarrier {
                src_stage,
                dst_stage,
                transitions: transitions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.record(
            cb,
            RecordedCommand::CopyBufferToImage {
                src,
                dst,
                dst_layout,
                regions: regions.to_vec(),
            },
        );
    }
}
