//! Resource bindings for every descriptor of a shader's sets
//!
//! A binding layout pairs each descriptor slot with the buffer, texture or
//! sampler bound to it. The descriptor metadata is refreshed from the current
//! resource backings whenever the layout is bound, so resources recreated in
//! the meantime are picked up.

use std::sync::Arc;

use ash::vk;

use super::dispatch::{DescriptorClass, DescriptorInfo};
use super::error::{VulkanError, VulkanResult};
use super::resources::{Buffer, ResourceId, Sampler, Texture};
use super::shader::{DescriptorSlot, Shader};

/// Resources bound to one descriptor slot
#[derive(Debug, Clone, Default)]
pub struct SlotBinding {
    /// Buffer for buffer and texel buffer descriptors
    pub buffer: Option<Arc<Buffer>>,
    /// Texture for image descriptors
    pub texture: Option<Arc<Texture>>,
    /// Sampler for sampler and combined image sampler descriptors
    pub sampler: Option<Arc<Sampler>>,
}

#[derive(Debug)]
struct SetBindings {
    slots: Vec<DescriptorSlot>,
    bindings: Vec<SlotBinding>,
    descriptors: Vec<DescriptorInfo>,
}

impl SetBindings {
    fn slot_index(&self, binding: u32, array_element: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.binding == binding && s.array_element == array_element)
    }
}

/// Bound resources of a shader's descriptor sets
#[derive(Debug)]
pub struct BindingLayout {
    id: ResourceId,
    sets: Vec<SetBindings>,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl BindingLayout {
    /// Empty bindings for every slot `shader` declares
    pub fn new(shader: &Shader) -> Self {
        let sets: Vec<SetBindings> = shader
            .set_layouts()
            .iter()
            .map(|layout| {
                let slots = layout.slots().to_vec();
                SetBindings {
                    bindings: vec![SlotBinding::default(); slots.len()],
                    descriptors: vec![DescriptorInfo::default(); slots.len()],
                    slots,
                }
            })
            .collect();

        Self {
            id: ResourceId::next(),
            descriptor_sets: vec![vk::DescriptorSet::null(); sets.len()],
            sets,
        }
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Number of descriptor sets
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    fn slot_mut(&mut self, set: usize, binding: u32, array_element: u32) -> VulkanResult<&mut SlotBinding> {
        let set_bindings = self.sets.get_mut(set).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("descriptor set {} is not declared", set),
        })?;
        let index = set_bindings
            .slot_index(binding, array_element)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!(
                    "binding {}[{}] is not declared in set {}",
                    binding, array_element, set
                ),
            })?;
        Ok(&mut set_bindings.bindings[index])
    }

    /// Bind `buffer` at `binding` of `set`
    pub fn bind_buffer(&mut self, set: usize, binding: u32, buffer: Arc<Buffer>) -> VulkanResult<()> {
        self.bind_buffer_at(set, binding, 0, buffer)
    }

    /// Bind `buffer` at one array element of `binding`
    pub fn bind_buffer_at(
        &mut self,
        set: usize,
        binding: u32,
        array_element: u32,
        buffer: Arc<Buffer>,
    ) -> VulkanResult<()> {
        self.slot_mut(set, binding, array_element)?.buffer = Some(buffer);
        Ok(())
    }

    /// Bind `texture` at `binding` of `set`
    pub fn bind_texture(&mut self, set: usize, binding: u32, texture: Arc<Texture>) -> VulkanResult<()> {
        self.bind_texture_at(set, binding, 0, texture)
    }

    /// Bind `texture` at one array element of `binding`
    pub fn bind_texture_at(
        &mut self,
        set: usize,
        binding: u32,
        array_element: u32,
        texture: Arc<Texture>,
    ) -> VulkanResult<()> {
        self.slot_mut(set, binding, array_element)?.texture = Some(texture);
        Ok(())
    }

    /// Bind `sampler` at `binding` of `set`
    pub fn bind_sampler(&mut self, set: usize, binding: u32, sampler: Arc<Sampler>) -> VulkanResult<()> {
        self.bind_sampler_at(set, binding, 0, sampler)
    }

    /// Bind `sampler` at one array element of `binding`
    pub fn bind_sampler_at(
        &mut self,
        set: usize,
        binding: u32,
        array_element: u32,
        sampler: Arc<Sampler>,
    ) -> VulkanResult<()> {
        self.slot_mut(set, binding, array_element)?.sampler = Some(sampler);
        Ok(())
    }

    /// Rewrite every descriptor from the current state of its bound resources
    pub(crate) fn refresh_descriptors(&mut self) {
        for set in &mut self.sets {
            for ((slot, binding), info) in set
                .slots
                .iter()
                .zip(&set.bindings)
                .zip(set.descriptors.iter_mut())
            {
                match DescriptorClass::of(slot.descriptor_type) {
                    Some(DescriptorClass::Buffer) => {
                        if let Some(buffer) = &binding.buffer {
                            let state = buffer.state();
                            info.buffer = vk::DescriptorBufferInfo {
                                buffer: state.handle,
                                offset: state.start_offset,
                                range: state.size,
                            };
                        }
                    }
                    Some(DescriptorClass::TexelBuffer) => {
                        if let Some(buffer) = &binding.buffer {
                            info.texel_buffer_view = buffer.state().texel_view;
                        }
                    }
                    Some(DescriptorClass::Image) => {
                        if let Some(texture) = &binding.texture {
                            let state = texture.state();
                            info.image.image_view = state.view;
                            info.image.image_layout = state.layout;
                        }
                        if let Some(sampler) = &binding.sampler {
                            info.image.sampler = sampler.handle();
                        }
                    }
                    None => {}
                }
            }
        }
    }

    /// Descriptor metadata of `set`, in slot order
    pub fn descriptors(&self, set: usize) -> &[DescriptorInfo] {
        self.sets.get(set).map_or(&[], |s| &s.descriptors)
    }

    /// Slots of `set`, in declaration order
    pub fn slots(&self, set: usize) -> &[DescriptorSlot] {
        self.sets.get(set).map_or(&[], |s| &s.slots)
    }

    /// Sets resolved by the last pool-path bind
    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }

    pub(crate) fn descriptor_sets_mut(&mut self) -> &mut [vk::DescriptorSet] {
        &mut self.descriptor_sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::shader::{DescriptorBinding, DescriptorSetLayout};
    use ash::vk::Handle;

    fn shader() -> Shader {
        let set0 = DescriptorSetLayout::new(
            vk::DescriptorSetLayout::from_raw(1),
            vec![
                DescriptorBinding::new(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::VERTEX),
                DescriptorBinding::new(
                    1,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    1,
                    vk::ShaderStageFlags::FRAGMENT,
                ),
            ],
        );
        let set1 = DescriptorSetLayout::new(
            vk::DescriptorSetLayout::from_raw(2),
            vec![DescriptorBinding::new(
                0,
                vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
                1,
                vk::ShaderStageFlags::VERTEX,
            )],
        );
        Shader::new("test", vk::PipelineLayout::from_raw(3), vec![set0, set1])
    }

    #[test]
    fn test_unknown_slot_is_rejected() {
        let mut layout = BindingLayout::new(&shader());
        let buffer = Arc::new(Buffer::new(vk::Buffer::from_raw(1), vk::BufferUsageFlags::UNIFORM_BUFFER, 16, 0));

        assert!(layout.bind_buffer(0, 5, Arc::clone(&buffer)).is_err());
        assert!(layout.bind_buffer(4, 0, Arc::clone(&buffer)).is_err());
        assert!(layout.bind_buffer(0, 0, buffer).is_ok());
    }

    #[test]
    fn test_refresh_reads_current_backing() {
        let mut layout = BindingLayout::new(&shader());
        let buffer = Arc::new(Buffer::new(vk::Buffer::from_raw(10), vk::BufferUsageFlags::UNIFORM_BUFFER, 64, 0));
        let texture = Arc::new(Texture::new(
            vk::Image::from_raw(11),
            vk::ImageView::from_raw(12),
            vk::Format::R8G8B8A8_UNORM,
            2,
            2,
        ));
        let sampler = Arc::new(Sampler::new(vk::Sampler::from_raw(13)));

        layout.bind_buffer(0, 0, Arc::clone(&buffer)).unwrap();
        layout.bind_texture(0, 1, Arc::clone(&texture)).unwrap();
        layout.bind_sampler(0, 1, sampler).unwrap();
        layout.refresh_descriptors();

        let set0 = layout.descriptors(0);
        assert_eq!(set0[0].buffer.buffer, vk::Buffer::from_raw(10));
        assert_eq!(set0[0].buffer.range, 64);
        assert_eq!(set0[1].image.image_view, vk::ImageView::from_raw(12));
        assert_eq!(set0[1].image.sampler, vk::Sampler::from_raw(13));

        buffer.rebuild(vk::Buffer::from_raw(20), 256, 32);
        texture.rebuild(vk::Image::from_raw(21), vk::ImageView::from_raw(22), 4, 4);
        layout.refresh_descriptors();

        let set0 = layout.descriptors(0);
        assert_eq!(set0[0].buffer.buffer, vk::Buffer::from_raw(20));
        assert_eq!(set0[0].buffer.offset, 256);
        assert_eq!(set0[1].image.image_view, vk::ImageView::from_raw(22));
    }

    #[test]
    fn test_texel_buffer_uses_view() {
        let mut layout = BindingLayout::new(&shader());
        let buffer = Arc::new(Buffer::new(
            vk::Buffer::from_raw(10),
            vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER,
            64,
            4,
        ));
        buffer.set_texel_view(vk::BufferView::from_raw(30));

        layout.bind_buffer(1, 0, buffer).unwrap();
        layout.refresh_descriptors();
        assert_eq!(layout.descriptors(1)[0].texel_buffer_view, vk::BufferView::from_raw(30));
    }
}
