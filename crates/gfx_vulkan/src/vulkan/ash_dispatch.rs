//! `DeviceDispatch` over a live `ash::Device`

use std::ffi::{c_void, CStr};
use std::mem;

use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;

use crate::gfx::ClearValue;
use super::device::DeviceCaps;
use super::dispatch::{
    DescriptorClass, DescriptorInfo, DescriptorWrite, DeviceDispatch, ImageTransition,
    RecordingBegin, RenderPassBegin, WritePayload,
};
use super::error::{VulkanError, VulkanResult};
use super::shader::{DescriptorSetLayout, UpdateTemplate};

/// Packed descriptor as read by an update template
#[repr(C)]
#[derive(Clone, Copy)]
union PackedDescriptor {
    image: vk::DescriptorImageInfo,
    buffer: vk::DescriptorBufferInfo,
    texel_buffer_view: vk::BufferView,
}

/// Byte stride between template entries
pub const DESCRIPTOR_STRIDE: usize = mem::size_of::<PackedDescriptor>();

/// One packed entry per template entry; entries without metadata are zeroed.
fn pack_descriptors(template: &UpdateTemplate, descriptors: &[DescriptorInfo]) -> Vec<PackedDescriptor> {
    template
        .entry_types()
        .iter()
        .enumerate()
        .map(|(i, ty)| (ty, descriptors.get(i).copied().unwrap_or_default()))
        .map(|(ty, info)| match DescriptorClass::of(*ty) {
            Some(DescriptorClass::Buffer) => PackedDescriptor { buffer: info.buffer },
            Some(DescriptorClass::TexelBuffer) => PackedDescriptor {
                texel_buffer_view: info.texel_buffer_view,
            },
            Some(DescriptorClass::Image) | None => PackedDescriptor { image: info.image },
        })
        .collect()
}

fn to_vk_clear_value(value: &ClearValue) -> vk::ClearValue {
    match *value {
        ClearValue::Color(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

impl DeviceCaps {
    /// Query capability flags of `physical_device`
    pub fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> VulkanResult<Self> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }?;
        let has_extension = |name: &CStr| {
            extensions
                .iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };

        // The template entry points are taken from the 1.1 core table.
        let core_1_1 = vk::api_version_major(properties.api_version) > 1
            || vk::api_version_minor(properties.api_version) >= 1;

        let caps = Self {
            push_descriptor: has_extension(vk::KhrPushDescriptorFn::name()),
            descriptor_update_template: core_1_1,
            multi_draw_indirect: features.multi_draw_indirect == vk::TRUE,
        };
        log::debug!("Device capabilities: {:?}", caps);
        Ok(caps)
    }
}

/// Production dispatch forwarding to the driver
pub struct AshDispatch {
    device: ash::Device,
    push_descriptor: Option<khr::PushDescriptor>,
}

impl AshDispatch {
    /// Wrap `device`; loads `VK_KHR_push_descriptor` when `caps` reports it
    pub fn new(instance: &ash::Instance, device: ash::Device, caps: &DeviceCaps) -> Self {
        let push_descriptor = caps
            .push_descriptor
            .then(|| khr::PushDescriptor::new(instance, &device));
        Self {
            device,
            push_descriptor,
        }
    }

    /// Underlying loader
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// Create an update template matching [`DESCRIPTOR_STRIDE`] packing.
    ///
    /// With `push_set` the template targets `vkCmdPushDescriptorSetWithTemplateKHR`
    /// for that set index; otherwise it updates allocated sets of `layout`.
    pub fn create_update_template(
        &self,
        layout: &DescriptorSetLayout,
        pipeline_layout: vk::PipelineLayout,
        push_set: Option<u32>,
    ) -> VulkanResult<vk::DescriptorUpdateTemplate> {
        let entries: Vec<vk::DescriptorUpdateTemplateEntry> = layout
            .slots()
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                vk::DescriptorUpdateTemplateEntry::builder()
                    .dst_binding(slot.binding)
                    .dst_array_element(slot.array_element)
                    .descriptor_count(1)
                    .descriptor_type(slot.descriptor_type)
                    .offset(i * DESCRIPTOR_STRIDE)
                    .stride(DESCRIPTOR_STRIDE)
                    .build()
            })
            .collect();

        let mut info = vk::DescriptorUpdateTemplateCreateInfo::builder()
            .descriptor_update_entries(&entries)
            .descriptor_set_layout(layout.handle())
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .pipeline_layout(pipeline_layout);
        info = match push_set {
            Some(set) => info
                .template_type(vk::DescriptorUpdateTemplateType::PUSH_DESCRIPTORS_KHR)
                .set(set),
            None => info.template_type(vk::DescriptorUpdateTemplateType::DESCRIPTOR_SET),
        };

        unsafe { self.device.create_descriptor_update_template(&info, None) }.map_err(VulkanError::Api)
    }
}

impl DeviceDispatch for AshDispatch {
    fn device_handle(&self) -> vk::Device {
        self.device.handle()
    }

    fn create_command_pool(&self, queue_family_index: u32) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        unsafe { self.device.create_command_pool(&info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(level)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&info) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        unsafe { self.device.create_descriptor_pool(&info, None) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> VkResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        unsafe { self.device.allocate_descriptor_sets(&info) }
    }

    fn update_descriptor_set_with_template(
        &self,
        set: vk::DescriptorSet,
        template: &UpdateTemplate,
        descriptors: &[DescriptorInfo],
    ) {
        let packed = pack_descriptors(template, descriptors);
        unsafe {
            self.device.update_descriptor_set_with_template(
                set,
                template.handle(),
                packed.as_ptr().cast::<c_void>(),
            );
        }
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite<'_>]) {
        let native: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(write.dst_set)
                    .dst_binding(write.dst_binding)
                    .dst_array_element(write.dst_array_element)
                    .descriptor_type(write.descriptor_type);
                match write.payload {
                    WritePayload::Buffer(info) => builder.buffer_info(std::slice::from_ref(info)),
                    WritePayload::Image(info) => builder.image_info(std::slice::from_ref(info)),
                    WritePayload::TexelBufferView(view) => {
                        builder.texel_buffer_view(std::slice::from_ref(view))
                    }
                }
                .build()
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&native, &[]) }
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        command_buffers: &[vk::CommandBuffer],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let submit = vk::SubmitInfo::builder().command_buffers(command_buffers).build();
        unsafe { self.device.queue_submit(queue, &[submit], fence) }
    }

    fn begin_command_buffer(&self, cb: vk::CommandBuffer, begin: &RecordingBegin) -> VkResult<()> {
        let inheritance = begin.inheritance.map(|inh| {
            vk::CommandBufferInheritanceInfo::builder()
                .render_pass(inh.render_pass)
                .subpass(inh.subpass)
                .framebuffer(inh.framebuffer)
                .build()
        });

        let mut info = vk::CommandBufferBeginInfo::builder().flags(begin.flags);
        if let Some(inheritance) = inheritance.as_ref() {
            info = info.inheritance_info(inheritance);
        }
        unsafe { self.device.begin_command_buffer(cb, &info) }
    }

    fn end_command_buffer(&self, cb: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cb) }
    }

    fn cmd_begin_render_pass(&self, cb: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        let clear_values: Vec<vk::ClearValue> = begin.clear_values.iter().map(to_vk_clear_value).collect();
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(begin.render_area)
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cb, &info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&self, cb: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cb) }
    }

    fn cmd_bind_pipeline(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cb, bind_point, pipeline) }
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cb: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(cb, first_binding, buffers, offsets);
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe { self.device.cmd_bind_index_buffer(cb, buffer, offset, index_type) }
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cb: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cb,
                bind_point,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            );
        }
    }

    fn cmd_push_descriptor_set_with_template(
        &self,
        cb: vk::CommandBuffer,
        template: &UpdateTemplate,
        layout: vk::PipelineLayout,
        set: u32,
        descriptors: &[DescriptorInfo],
    ) {
        let Some(push) = self.push_descriptor.as_ref() else {
            log::error!("VK_KHR_push_descriptor is not loaded; descriptor push dropped");
            return;
        };
        let packed = pack_descriptors(template, descriptors);
        unsafe {
            push.cmd_push_descriptor_set_with_template(
                cb,
                template.handle(),
                layout,
                set,
                packed.as_ptr().cast::<c_void>(),
            );
        }
    }

    fn cmd_set_viewport(&self, cb: vk::CommandBuffer, first_viewport: u32, viewports: &[vk::Viewport]) {
        unsafe { self.device.cmd_set_viewport(cb, first_viewport, viewports) }
    }

    fn cmd_set_scissor(&self, cb: vk::CommandBuffer, first_scissor: u32, scissors: &[vk::Rect2D]) {
        unsafe { self.device.cmd_set_scissor(cb, first_scissor, scissors) }
    }

    fn cmd_set_line_width(&self, cb: vk::CommandBuffer, width: f32) {
        unsafe { self.device.cmd_set_line_width(cb, width) }
    }

    fn cmd_set_depth_bias(&self, cb: vk::CommandBuffer, constant: f32, clamp: f32, slope: f32) {
        unsafe { self.device.cmd_set_depth_bias(cb, constant, clamp, slope) }
    }

    fn cmd_set_blend_constants(&self, cb: vk::CommandBuffer, constants: &[f32; 4]) {
        unsafe { self.device.cmd_set_blend_constants(cb, constants) }
    }

    fn cmd_set_depth_bounds(&self, cb: vk::CommandBuffer, min_bounds: f32, max_bounds: f32) {
        unsafe { self.device.cmd_set_depth_bounds(cb, min_bounds, max_bounds) }
    }

    fn cmd_set_stencil_write_mask(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, mask: u32) {
        unsafe { self.device.cmd_set_stencil_write_mask(cb, face, mask) }
    }

    fn cmd_set_stencil_compare_mask(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, mask: u32) {
        unsafe { self.device.cmd_set_stencil_compare_mask(cb, face, mask) }
    }

    fn cmd_set_stencil_reference(&self, cb: vk::CommandBuffer, face: vk::StencilFaceFlags, reference: u32) {
        unsafe { self.device.cmd_set_stencil_reference(cb, face, reference) }
    }

    fn cmd_draw(
        &self,
        cb: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance);
        }
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
        unsafe {
            self.device.cmd_draw_indexed(
                cb,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_draw_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe { self.device.cmd_draw_indirect(cb, buffer, offset, draw_count, stride) }
    }

    fn cmd_draw_indexed_indirect(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw_indexed_indirect(cb, buffer, offset, draw_count, stride);
        }
    }

    fn cmd_execute_commands(&self, cb: vk::CommandBuffer, secondaries: &[vk::CommandBuffer]) {
        unsafe { self.device.cmd_execute_commands(cb, secondaries) }
    }

    fn cmd_update_buffer(
        &self,
        cb: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_update_buffer(cb, buffer, offset, data) }
    }

    fn cmd_pipeline_barrier(
        &self,
        cb: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        transitions: &[ImageTransition],
    ) {
        let barriers: Vec<vk::ImageMemoryBarrier> = transitions
            .iter()
            .map(|t| {
                vk::ImageMemoryBarrier::builder()
                    .old_layout(t.old_layout)
                    .new_layout(t.new_layout)
                    .src_access_mask(t.src_access)
                    .dst_access_mask(t.dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(t.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: t.aspect_mask,
                        base_mip_level: t.base_mip_level,
                        level_count: t.level_count,
                        base_array_layer: t.base_array_layer,
                        layer_count: t.layer_count,
                    })
                    .build()
            })
            .collect();

        unsafe {
            self.device.cmd_pipeline_barrier(
                cb,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers,
            );
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cb: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cb, src, dst, dst_layout, regions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_stride_fits_largest_descriptor() {
        assert!(DESCRIPTOR_STRIDE >= mem::size_of::<vk::DescriptorImageInfo>());
        assert!(DESCRIPTOR_STRIDE >= mem::size_of::<vk::DescriptorBufferInfo>());
    }

    #[test]
    fn test_pack_selects_member_by_entry_type() {
        let template = UpdateTemplate::new(
            vk::DescriptorUpdateTemplate::null(),
            vec![vk::DescriptorType::UNIFORM_BUFFER, vk::DescriptorType::SAMPLED_IMAGE],
        );
        let mut ubo = DescriptorInfo::default();
        ubo.buffer.buffer = vk::Buffer::from_raw(5);
        ubo.buffer.range = 64;
        let mut image = DescriptorInfo::default();
        image.image.image_view = vk::ImageView::from_raw(6);

        let packed = pack_descriptors(&template, &[ubo, image]);
        assert_eq!(packed.len(), 2);
        unsafe {
            assert_eq!(packed[0].buffer.buffer, vk::Buffer::from_raw(5));
            assert_eq!(packed[0].buffer.range, 64);
            assert_eq!(packed[1].image.image_view, vk::ImageView::from_raw(6));
        }
    }

    #[test]
    fn test_pack_pads_to_template_entries() {
        let template = UpdateTemplate::new(
            vk::DescriptorUpdateTemplate::null(),
            vec![vk::DescriptorType::UNIFORM_BUFFER, vk::DescriptorType::COMBINED_IMAGE_SAMPLER],
        );
        let mut ubo = DescriptorInfo::default();
        ubo.buffer.buffer = vk::Buffer::from_raw(5);

        let packed = pack_descriptors(&template, &[ubo]);
        assert_eq!(packed.len(), 2);
        unsafe {
            assert_eq!(packed[1].image.image_view, vk::ImageView::null());
            assert_eq!(packed[1].image.sampler, vk::Sampler::null());
        }
    }

    #[test]
    fn test_clear_value_conversion() {
        let depth = to_vk_clear_value(&ClearValue::DepthStencil { depth: 1.0, stencil: 3 });
        unsafe {
            assert_eq!(depth.depth_stencil.stencil, 3);
        }
        let color = to_vk_clear_value(&ClearValue::Color([0.5, 0.0, 0.0, 1.0]));
        unsafe {
            assert_eq!(color.color.float32[0], 0.5);
        }
    }
}
