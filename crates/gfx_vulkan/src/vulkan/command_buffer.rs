//! Command buffer recording
//!
//! A [`CommandBuffer`] owns one native command buffer from the device pool and
//! records render passes, state binds, draws and transfers into it. It keeps a
//! [`RecordingState`] of what is currently bound so repeated binds and
//! unchanged dynamic state never reach the driver, and resolves descriptor
//! sets when a binding layout is bound, using the best path the device offers:
//!
//! 1. push descriptors through an update template,
//! 2. pool-allocated sets written through an update template,
//! 3. pool-allocated sets written with `vkUpdateDescriptorSets`.
//!
//! Usage violations (drawing outside a render pass, transfers inside one,
//! binding a layout before a pipeline) are logged and the command is dropped.
//! Only native failures surface as errors.

use std::sync::Arc;

use ash::vk;

use crate::foundation::math::{any_not_equal_f, is_not_equal_f};
use crate::gfx::{
    BufferTextureCopy, ClearValue, Color, CommandBufferType, DepthBias, DepthBounds, Rect,
    StencilFace, Viewport,
};
use super::binding_layout::BindingLayout;
use super::device::Device;
use super::dispatch::{
    DescriptorInfo, DescriptorWrite, DeviceDispatch, ImageTransition, Inheritance, RecordingBegin,
    RenderPassBegin, WritePayload,
};
use super::error::VulkanResult;
use super::input_assembler::InputAssembler;
use super::pipeline::{Framebuffer, PipelineState, RenderPass};
use super::queue::Queue;
use super::resources::{Buffer, ResourceId, Texture};
use super::shader::DescriptorSlot;

/// Largest payload of a single `vkCmdUpdateBuffer`
pub const MAX_UPDATE_BUFFER_SIZE: usize = 65536;

/// Parameters of [`CommandBuffer::initialize`]
#[derive(Debug, Clone, Copy)]
pub struct CommandBufferInfo {
    /// Primary or secondary
    pub kind: CommandBufferType,
    /// Queue the buffer will be submitted to
    pub queue: Queue,
}

impl CommandBufferInfo {
    /// Create initialization parameters
    pub fn new(kind: CommandBufferType, queue: Queue) -> Self {
        Self { kind, queue }
    }
}

/// Native command buffer borrowed from the device pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GpuCommandBuffer {
    handle: vk::CommandBuffer,
    level: vk::CommandBufferLevel,
    queue_family_index: u32,
}

/// Draw statistics of one recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Direct draw calls
    pub draw_calls: u32,
    /// Instances drawn
    pub instances: u32,
    /// Triangles drawn
    pub triangles: u32,
}

impl FrameStats {
    /// Add `other` to these counters
    pub fn accumulate(&mut self, other: &Self) {
        self.draw_calls = self.draw_calls.saturating_add(other.draw_calls);
        self.instances = self.instances.saturating_add(other.instances);
        self.triangles = self.triangles.saturating_add(other.triangles);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StencilCompare {
    reference: u32,
    mask: u32,
}

/// Last dynamic state sent to the driver; `None` until first set
#[derive(Debug, Default)]
struct DynamicState {
    viewport: Option<Viewport>,
    scissor: Option<Rect>,
    line_width: Option<f32>,
    depth_bias: Option<DepthBias>,
    blend_constants: Option<[f32; 4]>,
    depth_bounds: Option<DepthBounds>,
    stencil_write_mask: [Option<u32>; 2],
    stencil_compare: [Option<StencilCompare>; 2],
}

/// What is currently bound in the recording
#[derive(Debug, Default)]
struct RecordingState {
    pipeline: Option<Arc<PipelineState>>,
    binding_layout: Option<ResourceId>,
    input_assembler: Option<ResourceId>,
    /// Set only inside a render pass
    framebuffer: Option<vk::Framebuffer>,
    dynamic: DynamicState,
}

const fn stencil_face_flags(face: StencilFace) -> vk::StencilFaceFlags {
    match face {
        StencilFace::Front => vk::StencilFaceFlags::FRONT,
        StencilFace::Back => vk::StencilFaceFlags::BACK,
    }
}

fn viewport_changed(cached: Option<&Viewport>, vp: &Viewport) -> bool {
    cached.map_or(true, |c| {
        c.left != vp.left
            || c.top != vp.top
            || c.width != vp.width
            || c.height != vp.height
            || is_not_equal_f(c.min_depth, vp.min_depth)
            || is_not_equal_f(c.max_depth, vp.max_depth)
    })
}

fn to_vk_rect(rect: &Rect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: rect.x, y: rect.y },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}

fn to_vk_viewport(vp: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: vp.left as f32,
        y: vp.top as f32,
        width: vp.width as f32,
        height: vp.height as f32,
        min_depth: vp.min_depth,
        max_depth: vp.max_depth,
    }
}

fn descriptor_writes<'a>(
    dst_set: vk::DescriptorSet,
    slots: &[DescriptorSlot],
    descriptors: &'a [DescriptorInfo],
) -> Vec<DescriptorWrite<'a>> {
    slots
        .iter()
        .zip(descriptors)
        .filter_map(|(slot, info)| {
            WritePayload::select(slot.descriptor_type, info).map(|payload| DescriptorWrite {
                dst_set,
                dst_binding: slot.binding,
                dst_array_element: slot.array_element,
                descriptor_type: slot.descriptor_type,
                payload,
            })
        })
        .collect()
}

/// Records GPU commands into a pooled native command buffer
pub struct CommandBuffer<D: DeviceDispatch> {
    device: Arc<Device<D>>,
    kind: CommandBufferType,
    queue: Option<Queue>,
    gpu: Option<GpuCommandBuffer>,
    state: RecordingState,
    stats: FrameStats,
}

impl<D: DeviceDispatch> CommandBuffer<D> {
    /// Uninitialized command buffer for `device`
    pub fn new(device: Arc<Device<D>>) -> Self {
        Self {
            device,
            kind: CommandBufferType::Primary,
            queue: None,
            gpu: None,
            state: RecordingState::default(),
            stats: FrameStats::default(),
        }
    }

    /// Acquire a native command buffer of the right level for `info.queue`.
    ///
    /// On failure the buffer stays uninitialized and every recording call is
    /// dropped.
    pub fn initialize(&mut self, info: CommandBufferInfo) -> VulkanResult<()> {
        if self.gpu.is_some() {
            log::warn!("Re-initializing a command buffer; the previous native buffer is released");
            self.destroy();
        }

        let level = match info.kind {
            CommandBufferType::Primary => vk::CommandBufferLevel::PRIMARY,
            CommandBufferType::Secondary => vk::CommandBufferLevel::SECONDARY,
        };
        let queue_family_index = info.queue.family_index();

        self.kind = info.kind;
        self.queue = Some(info.queue);

        let handle = self
            .device
            .request_command_buffer(level, queue_family_index)
            .map_err(|err| {
                log::error!("Failed to acquire a command buffer: {}", err);
                err
            })?;

        self.gpu = Some(GpuCommandBuffer {
            handle,
            level,
            queue_family_index,
        });
        Ok(())
    }

    /// Return the native buffer to the pool; does nothing when not initialized
    pub fn destroy(&mut self) {
        if let Some(gpu) = self.gpu.take() {
            self.device
                .yield_command_buffer(gpu.level, gpu.queue_family_index, gpu.handle);
        }
        self.state = RecordingState::default();
    }

    /// Level of the buffer
    pub fn kind(&self) -> CommandBufferType {
        self.kind
    }

    /// Queue the buffer was initialized for
    pub fn queue(&self) -> Option<&Queue> {
        self.queue.as_ref()
    }

    /// Device recorded against
    pub fn device(&self) -> &Arc<Device<D>> {
        &self.device
    }

    /// A native buffer is held
    pub fn is_ready(&self) -> bool {
        self.gpu.is_some()
    }

    /// Native handle, `None` when not initialized
    pub fn native_handle(&self) -> Option<vk::CommandBuffer> {
        self.gpu.map(|gpu| gpu.handle)
    }

    /// A render pass is open
    pub fn is_in_render_pass(&self) -> bool {
        self.state.framebuffer.is_some()
    }

    /// Statistics since the last `begin`
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Draw calls since the last `begin`
    pub fn num_draw_calls(&self) -> u32 {
        self.stats.draw_calls
    }

    /// Instances since the last `begin`
    pub fn num_instances(&self) -> u32 {
        self.stats.instances
    }

    /// Triangles since the last `begin`
    pub fn num_tris(&self) -> u32 {
        self.stats.triangles
    }

    fn handle_for(&self, command: &str) -> Option<vk::CommandBuffer> {
        let handle = self.native_handle();
        if handle.is_none() {
            log::error!("Command '{}' recorded into an uninitialized command buffer", command);
        }
        handle
    }

    /// Reset all binding state and statistics and open recording.
    ///
    /// A secondary buffer inherits `render_pass`/`subpass`/`framebuffer` and
    /// cannot be begun without a render pass.
    pub fn begin(
        &mut self,
        render_pass: Option<&RenderPass>,
        subpass: u32,
        framebuffer: Option<&Framebuffer>,
    ) -> VulkanResult<()> {
        let Some(cb) = self.handle_for("begin") else {
            return Ok(());
        };

        self.state = RecordingState::default();
        self.stats = FrameStats::default();

        let mut begin = RecordingBegin {
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            inheritance: None,
        };

        if self.kind == CommandBufferType::Secondary {
            let Some(render_pass) = render_pass else {
                log::error!("A render pass has to be specified when beginning a secondary command buffer");
                return Ok(());
            };
            begin.flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
            begin.inheritance = Some(Inheritance {
                render_pass: render_pass.handle(),
                subpass,
                framebuffer: framebuffer
                    .and_then(Framebuffer::resolve)
                    .unwrap_or_else(vk::Framebuffer::null),
            });
        }

        self.device.dispatch().begin_command_buffer(cb, &begin)?;
        Ok(())
    }

    /// Close recording
    pub fn end(&mut self) -> VulkanResult<()> {
        let Some(cb) = self.handle_for("end") else {
            return Ok(());
        };
        self.state.framebuffer = None;
        self.device.dispatch().end_command_buffer(cb)?;
        Ok(())
    }

    /// Open `render_pass` on `framebuffer` and set viewport and scissor to
    /// `render_area`.
    ///
    /// `colors` supplies one clear color per color attachment, in attachment
    /// order; the last attachment is cleared to `depth`/`stencil`.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        render_area: Rect,
        colors: &[Color],
        depth: f32,
        stencil: u32,
    ) {
        let Some(cb) = self.handle_for("begin_render_pass") else {
            return;
        };
        let Some(native_framebuffer) = framebuffer.resolve() else {
            log::error!("Framebuffer has no native framebuffer for the current swapchain image");
            return;
        };

        let color_count = render_pass.color_attachment_count();
        if colors.len() < color_count {
            log::warn!(
                "{} clear colors supplied for {} color attachments",
                colors.len(),
                color_count
            );
        }
        let mut clear_values: Vec<ClearValue> = (0..color_count)
            .map(|i| ClearValue::Color(colors.get(i).copied().unwrap_or_default().to_array()))
            .collect();
        clear_values.push(ClearValue::DepthStencil { depth, stencil });

        let dispatch = self.device.dispatch();
        let area = to_vk_rect(&render_area);
        dispatch.cmd_begin_render_pass(
            cb,
            &RenderPassBegin {
                render_pass: render_pass.handle(),
                framebuffer: native_framebuffer,
                render_area: area,
                clear_values: &clear_values,
            },
        );
        self.state.framebuffer = Some(native_framebuffer);

        let viewport = Viewport::from_rect(render_area);
        dispatch.cmd_set_viewport(cb, 0, &[to_vk_viewport(&viewport)]);
        dispatch.cmd_set_scissor(cb, 0, &[area]);
        self.state.dynamic.viewport = Some(viewport);
        self.state.dynamic.scissor = Some(render_area);
    }

    /// Close the render pass
    pub fn end_render_pass(&mut self) {
        let Some(cb) = self.handle_for("end_render_pass") else {
            return;
        };
        self.device.dispatch().cmd_end_render_pass(cb);
        self.state.framebuffer = None;
    }

    /// Bind `pso` unless it is already bound
    pub fn bind_pipeline_state(&mut self, pso: &Arc<PipelineState>) {
        let Some(cb) = self.handle_for("bind_pipeline_state") else {
            return;
        };
        if self.state.pipeline.as_ref().map(|p| p.id()) == Some(pso.id()) {
            return;
        }
        self.device
            .dispatch()
            .cmd_bind_pipeline(cb, pso.bind_point(), pso.handle());
        self.state.pipeline = Some(Arc::clone(pso));
    }

    /// Resolve and bind the descriptor sets of `layout` unless it is already
    /// bound. A pipeline state must be bound first.
    ///
    /// Descriptor metadata is refreshed from the current resource backings
    /// before it is written.
    pub fn bind_binding_layout(&mut self, layout: &mut BindingLayout) -> VulkanResult<()> {
        let Some(cb) = self.handle_for("bind_binding_layout") else {
            return Ok(());
        };
        let Some(pipeline) = self.state.pipeline.clone() else {
            log::error!("Command 'bind_binding_layout' requires a bound pipeline state");
            return Ok(());
        };
        if self.state.binding_layout == Some(layout.id()) {
            return Ok(());
        }
        let shader = pipeline.shader();
        let shared_sets = layout.set_count().min(shader.set_layouts().len());
        if let Some(set) = (0..shared_sets).find(|&set| layout.slots(set) != shader.write_entries(set)) {
            log::error!(
                "Command 'bind_binding_layout' got a layout whose set {} does not match shader '{}' ({} slots, expected {})",
                set,
                shader.name(),
                layout.slots(set).len(),
                shader.write_entries(set).len()
            );
            return Ok(());
        }

        layout.refresh_descriptors();
        self.resolve_descriptor_sets(cb, &pipeline, layout)?;
        self.state.binding_layout = Some(layout.id());
        Ok(())
    }

    fn resolve_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        pipeline: &PipelineState,
        layout: &mut BindingLayout,
    ) -> VulkanResult<()> {
        let shader = pipeline.shader();
        let declared = shader.set_layouts().len();
        if layout.set_count() != declared {
            log::warn!(
                "Binding layout has {} sets, shader '{}' declares {}",
                layout.set_count(),
                shader.name(),
                declared
            );
        }
        let set_count = layout.set_count().min(declared);
        if set_count == 0 {
            return Ok(());
        }

        let device = &self.device;
        let dispatch = device.dispatch();
        let pipeline_layout = shader.pipeline_layout();

        if device.is_push_descriptor_set_supported() {
            for set in 0..set_count {
                match shader.update_template(set) {
                    Some(template) => dispatch.cmd_push_descriptor_set_with_template(
                        cb,
                        template,
                        pipeline_layout,
                        set as u32,
                        layout.descriptors(set),
                    ),
                    None => log::error!(
                        "Shader '{}' has no push descriptor template for set {}",
                        shader.name(),
                        set
                    ),
                }
            }
            return Ok(());
        }

        device.alloc_descriptor_sets(
            &shader.native_set_layouts()[..set_count],
            &mut layout.descriptor_sets_mut()[..set_count],
        )?;

        let use_templates = device.is_descriptor_update_template_supported();
        for set in 0..set_count {
            let dst_set = layout.descriptor_sets()[set];
            let descriptors = layout.descriptors(set);
            match shader.update_template(set).filter(|_| use_templates) {
                Some(template) => {
                    dispatch.update_descriptor_set_with_template(dst_set, template, descriptors);
                }
                None => {
                    let writes = descriptor_writes(dst_set, shader.write_entries(set), descriptors);
                    if !writes.is_empty() {
                        dispatch.update_descriptor_sets(&writes);
                    }
                }
            }
        }

        dispatch.cmd_bind_descriptor_sets(
            cb,
            pipeline.bind_point(),
            pipeline_layout,
            0,
            &layout.descriptor_sets()[..set_count],
            &[],
        );
        Ok(())
    }

    /// Bind the vertex and index buffers of `ia` unless it is already bound
    pub fn bind_input_assembler(&mut self, ia: &InputAssembler) {
        let Some(cb) = self.handle_for("bind_input_assembler") else {
            return;
        };
        if self.state.input_assembler == Some(ia.id()) {
            return;
        }

        let dispatch = self.device.dispatch();
        ia.with_vertex_bindings(|buffers, offsets| {
            if !buffers.is_empty() {
                dispatch.cmd_bind_vertex_buffers(cb, 0, buffers, offsets);
            }
        });
        if let Some((buffer, offset, index_type)) = ia.index_binding() {
            dispatch.cmd_bind_index_buffer(cb, buffer, offset, index_type);
        }
        self.state.input_assembler = Some(ia.id());
    }

    /// Set the viewport if it differs from the current one
    pub fn set_viewport(&mut self, viewport: &Viewport) {
        let Some(cb) = self.handle_for("set_viewport") else {
            return;
        };
        if !viewport_changed(self.state.dynamic.viewport.as_ref(), viewport) {
            return;
        }
        self.state.dynamic.viewport = Some(*viewport);
        self.device
            .dispatch()
            .cmd_set_viewport(cb, 0, &[to_vk_viewport(viewport)]);
    }

    /// Set the scissor if it differs from the current one
    pub fn set_scissor(&mut self, rect: &Rect) {
        let Some(cb) = self.handle_for("set_scissor") else {
            return;
        };
        if self.state.dynamic.scissor.as_ref() == Some(rect) {
            return;
        }
        self.state.dynamic.scissor = Some(*rect);
        self.device.dispatch().cmd_set_scissor(cb, 0, &[to_vk_rect(rect)]);
    }

    /// Set the line width
    pub fn set_line_width(&mut self, width: f32) {
        let Some(cb) = self.handle_for("set_line_width") else {
            return;
        };
        if self
            .state
            .dynamic
            .line_width
            .map_or(false, |w| !is_not_equal_f(w, width))
        {
            return;
        }
        self.state.dynamic.line_width = Some(width);
        self.device.dispatch().cmd_set_line_width(cb, width);
    }

    /// Set the depth bias triple
    pub fn set_depth_bias(&mut self, constant: f32, clamp: f32, slope: f32) {
        let Some(cb) = self.handle_for("set_depth_bias") else {
            return;
        };
        let bias = DepthBias {
            constant,
            clamp,
            slope,
        };
        if let Some(cur) = self.state.dynamic.depth_bias {
            if !any_not_equal_f(&[cur.constant, cur.clamp, cur.slope], &[constant, clamp, slope]) {
                return;
            }
        }
        self.state.dynamic.depth_bias = Some(bias);
        self.device
            .dispatch()
            .cmd_set_depth_bias(cb, constant, clamp, slope);
    }

    /// Set the blend constants
    pub fn set_blend_constants(&mut self, constants: &Color) {
        let Some(cb) = self.handle_for("set_blend_constants") else {
            return;
        };
        let values = constants.to_array();
        if let Some(cur) = &self.state.dynamic.blend_constants {
            if !any_not_equal_f(cur, &values) {
                return;
            }
        }
        self.state.dynamic.blend_constants = Some(values);
        self.device.dispatch().cmd_set_blend_constants(cb, &values);
    }

    /// Set the depth bounds
    pub fn set_depth_bound(&mut self, min_bounds: f32, max_bounds: f32) {
        let Some(cb) = self.handle_for("set_depth_bound") else {
            return;
        };
        if let Some(cur) = self.state.dynamic.depth_bounds {
            if !any_not_equal_f(&[cur.min_bounds, cur.max_bounds], &[min_bounds, max_bounds]) {
                return;
            }
        }
        self.state.dynamic.depth_bounds = Some(DepthBounds {
            min_bounds,
            max_bounds,
        });
        self.device
            .dispatch()
            .cmd_set_depth_bounds(cb, min_bounds, max_bounds);
    }

    /// Set the stencil write mask of `face`
    pub fn set_stencil_write_mask(&mut self, face: StencilFace, mask: u32) {
        let Some(cb) = self.handle_for("set_stencil_write_mask") else {
            return;
        };
        let cached = &mut self.state.dynamic.stencil_write_mask[face.index()];
        if *cached == Some(mask) {
            return;
        }
        *cached = Some(mask);
        self.device
            .dispatch()
            .cmd_set_stencil_write_mask(cb, stencil_face_flags(face), mask);
    }

    /// Set the stencil reference and compare mask of `face`
    pub fn set_stencil_compare_mask(&mut self, face: StencilFace, reference: u32, mask: u32) {
        let Some(cb) = self.handle_for("set_stencil_compare_mask") else {
            return;
        };
        let compare = StencilCompare { reference, mask };
        let cached = &mut self.state.dynamic.stencil_compare[face.index()];
        if *cached == Some(compare) {
            return;
        }
        *cached = Some(compare);

        let flags = stencil_face_flags(face);
        let dispatch = self.device.dispatch();
        dispatch.cmd_set_stencil_reference(cb, flags, reference);
        dispatch.cmd_set_stencil_compare_mask(cb, flags, mask);
    }

    /// Draw `ia` with the bound state.
    ///
    /// Primary buffers must be inside a render pass. Indirect draws are not
    /// counted in the statistics.
    pub fn draw(&mut self, ia: &InputAssembler) {
        let Some(cb) = self.handle_for("draw") else {
            return;
        };
        if self.kind == CommandBufferType::Primary && self.state.framebuffer.is_none() {
            log::error!("Command 'draw' must be recorded inside a render pass");
            return;
        }

        let device = &self.device;
        let dispatch = device.dispatch();

        if let Some(indirect) = ia.indirect_buffer() {
            let backing = indirect.buffer().state();
            let stride = indirect.stride();
            let draw_count = indirect.draw_count();
            let indexed = indirect.is_indexed();

            if device.is_multi_draw_indirect_supported() {
                if indexed {
                    dispatch.cmd_draw_indexed_indirect(cb, backing.handle, backing.start_offset, draw_count, stride);
                } else {
                    dispatch.cmd_draw_indirect(cb, backing.handle, backing.start_offset, draw_count, stride);
                }
            } else {
                // One call per record, in record order.
                for record in 0..draw_count {
                    let offset = backing.start_offset + u64::from(record) * u64::from(stride);
                    if indexed {
                        dispatch.cmd_draw_indexed_indirect(cb, backing.handle, offset, 1, stride);
                    } else {
                        dispatch.cmd_draw_indirect(cb, backing.handle, offset, 1, stride);
                    }
                }
            }
            return;
        }

        let info = ia.extract_draw_info();
        let instance_count = info.instance_count.max(1);
        let indexed = ia.index_buffer().is_some();

        if indexed {
            dispatch.cmd_draw_indexed(
                cb,
                info.index_count,
                instance_count,
                info.first_index,
                info.vertex_offset,
                info.first_instance,
            );
        } else {
            dispatch.cmd_draw(
                cb,
                info.vertex_count,
                instance_count,
                info.first_vertex,
                info.first_instance,
            );
        }

        let mut drawn = FrameStats {
            draw_calls: 1,
            instances: instance_count,
            triangles: 0,
        };
        if let Some(pipeline) = &self.state.pipeline {
            let count = if indexed { info.index_count } else { info.vertex_count };
            drawn.triangles = pipeline.primitive().triangle_count(count, instance_count);
        }
        self.stats.accumulate(&drawn);
    }

    /// Execute recorded secondary buffers and add their statistics to ours
    pub fn execute(&mut self, secondaries: &[&CommandBuffer<D>]) {
        if secondaries.is_empty() {
            return;
        }
        let Some(cb) = self.handle_for("execute") else {
            return;
        };

        let mut handles = Vec::with_capacity(secondaries.len());
        for secondary in secondaries {
            match secondary.native_handle() {
                Some(handle) => {
                    handles.push(handle);
                    self.stats.accumulate(&secondary.stats());
                }
                None => log::warn!("Skipping an uninitialized secondary command buffer"),
            }
        }

        if !handles.is_empty() {
            self.device.dispatch().cmd_execute_commands(cb, &handles);
        }
    }

    fn transfer_allowed(&self, command: &str) -> bool {
        if self.kind == CommandBufferType::Primary && self.state.framebuffer.is_some() {
            log::error!("Command '{}' must be recorded outside of a render pass", command);
            return false;
        }
        true
    }

    /// Write `data` into `buffer` at `offset` (relative to the buffer's start).
    ///
    /// `offset` and the data length must be multiples of 4. Data larger than
    /// [`MAX_UPDATE_BUFFER_SIZE`] is split into several updates. Returns
    /// whether the update was recorded.
    pub fn update_buffer(&mut self, buffer: &Buffer, offset: vk::DeviceSize, data: &[u8]) -> bool {
        let Some(cb) = self.handle_for("update_buffer") else {
            return false;
        };
        if !self.transfer_allowed("update_buffer") || data.is_empty() {
            return false;
        }
        if offset % 4 != 0 || data.len() % 4 != 0 {
            log::error!(
                "Command 'update_buffer' needs 4-byte aligned offset and size, got {} and {}",
                offset,
                data.len()
            );
            return false;
        }
        let backing = buffer.state();
        let in_bounds = offset
            .checked_add(data.len() as u64)
            .map_or(false, |end| end <= backing.size);
        if !in_bounds {
            log::error!(
                "Command 'update_buffer' writes {} bytes at {} past the {} byte buffer",
                data.len(),
                offset,
                backing.size
            );
            return false;
        }

        let dispatch = self.device.dispatch();
        let mut dst = backing.start_offset + offset;
        for chunk in data.chunks(MAX_UPDATE_BUFFER_SIZE) {
            dispatch.cmd_update_buffer(cb, backing.handle, dst, chunk);
            dst += chunk.len() as u64;
        }
        true
    }

    /// Copy `regions` into `texture`, region `i` reading from `sources[i]`.
    ///
    /// The touched subresources go from the texture's current layout to
    /// `TRANSFER_DST_OPTIMAL` for the copies and back afterwards, so texels
    /// outside the regions are preserved.
    pub fn copy_buffers_to_texture(
        &mut self,
        sources: &[&Buffer],
        texture: &Texture,
        regions: &[BufferTextureCopy],
    ) {
        let Some(cb) = self.handle_for("copy_buffers_to_texture") else {
            return;
        };
        if !self.transfer_allowed("copy_buffers_to_texture") || regions.is_empty() {
            return;
        }
        if sources.len() < regions.len() {
            log::error!(
                "Command 'copy_buffers_to_texture' got {} source buffers for {} regions",
                sources.len(),
                regions.len()
            );
            return;
        }

        let target = texture.state();
        let aspect_mask = texture.aspect_mask();
        let base_mip_level = regions.iter().map(|r| r.mip_level).min().unwrap_or(0);
        let top_mip_level = regions.iter().map(|r| r.mip_level).max().unwrap_or(0);
        let base_array_layer = regions.iter().map(|r| r.base_array_layer).min().unwrap_or(0);
        let top_array_layer = regions
            .iter()
            .map(|r| r.base_array_layer + r.layer_count.max(1))
            .max()
            .unwrap_or(1);

        let transition = |old_layout, new_layout, src_access, dst_access| ImageTransition {
            image: target.image,
            aspect_mask,
            old_layout,
            new_layout,
            src_access,
            dst_access,
            base_mip_level,
            level_count: top_mip_level - base_mip_level + 1,
            base_array_layer,
            layer_count: top_array_layer - base_array_layer,
        };

        let dispatch = self.device.dispatch();
        dispatch.cmd_pipeline_barrier(
            cb,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::TRANSFER,
            &[transition(
                target.layout,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::SHADER_READ,
                vk::AccessFlags::TRANSFER_WRITE,
            )],
        );

        for (region, source) in regions.iter().zip(sources) {
            let backing = source.state();
            let copy = vk::BufferImageCopy {
                buffer_offset: backing.start_offset + region.buffer_offset,
                buffer_row_length: region.buffer_stride,
                buffer_image_height: region.buffer_tex_height,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask,
                    mip_level: region.mip_level,
                    base_array_layer: region.base_array_layer,
                    layer_count: region.layer_count.max(1),
                },
                image_offset: vk::Offset3D {
                    x: region.tex_offset[0],
                    y: region.tex_offset[1],
                    z: region.tex_offset[2],
                },
                image_extent: vk::Extent3D {
                    width: region.tex_extent[0],
                    height: region.tex_extent[1],
                    depth: region.tex_extent[2].max(1),
                },
            };
            dispatch.cmd_copy_buffer_to_image(
                cb,
                backing.handle,
                target.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[copy],
            );
        }

        dispatch.cmd_pipeline_barrier(
            cb,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            &[transition(
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                target.layout,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
            )],
        );
    }
}

impl<D: DeviceDispatch> Drop for CommandBuffer<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
