//! Shader reflection data consumed by descriptor resolution
//!
//! Layout objects, pipeline layouts and update templates are created by the
//! shader compiler front-end; this module only carries their handles together
//! with the declaration-ordered slot list every descriptor path iterates.

use ash::vk;

use super::resources::ResourceId;

/// One binding declared in a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding number
    pub binding: u32,
    /// Declared descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Array size of the binding
    pub count: u32,
    /// Stages reading the binding
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    /// Create a binding declaration
    pub const fn new(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            binding,
            descriptor_type,
            count,
            stages,
        }
    }
}

/// One descriptor: a single array element of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSlot {
    /// Binding number
    pub binding: u32,
    /// Element within the binding's array
    pub array_element: u32,
    /// Declared descriptor type
    pub descriptor_type: vk::DescriptorType,
}

/// Descriptor set layout with its declared bindings
#[derive(Debug, Clone)]
pub struct DescriptorSetLayout {
    handle: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
    slots: Vec<DescriptorSlot>,
}

impl DescriptorSetLayout {
    /// Wrap a native layout; `bindings` must be in declaration order
    pub fn new(handle: vk::DescriptorSetLayout, bindings: Vec<DescriptorBinding>) -> Self {
        let slots = bindings
            .iter()
            .flat_map(|b| {
                (0..b.count).map(move |array_element| DescriptorSlot {
                    binding: b.binding,
                    array_element,
                    descriptor_type: b.descriptor_type,
                })
            })
            .collect();

        Self {
            handle,
            bindings,
            slots,
        }
    }

    /// Native handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Declared bindings
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Descriptors in declaration order, one per array element
    pub fn slots(&self) -> &[DescriptorSlot] {
        &self.slots
    }
}

/// Descriptor update template plus the descriptor types of its entries.
///
/// Entries are laid out one per [`DescriptorSlot`], in slot order, at a fixed
/// stride of one packed descriptor info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTemplate {
    handle: vk::DescriptorUpdateTemplate,
    entry_types: Vec<vk::DescriptorType>,
}

impl UpdateTemplate {
    /// Pair a native template with the descriptor types it writes
    pub fn new(handle: vk::DescriptorUpdateTemplate, entry_types: Vec<vk::DescriptorType>) -> Self {
        Self {
            handle,
            entry_types,
        }
    }

    /// Native handle
    pub fn handle(&self) -> vk::DescriptorUpdateTemplate {
        self.handle
    }

    /// Descriptor type of each entry
    pub fn entry_types(&self) -> &[vk::DescriptorType] {
        &self.entry_types
    }
}

/// Reflection data of a linked shader program
#[derive(Debug)]
pub struct Shader {
    id: ResourceId,
    name: String,
    pipeline_layout: vk::PipelineLayout,
    set_layouts: Vec<DescriptorSetLayout>,
    native_set_layouts: Vec<vk::DescriptorSetLayout>,
    update_templates: Vec<UpdateTemplate>,
}

impl Shader {
    /// Create reflection data without update templates
    pub fn new(
        name: impl Into<String>,
        pipeline_layout: vk::PipelineLayout,
        set_layouts: Vec<DescriptorSetLayout>,
    ) -> Self {
        let native_set_layouts = set_layouts.iter().map(DescriptorSetLayout::handle).collect();
        Self {
            id: ResourceId::next(),
            name: name.into(),
            pipeline_layout,
            set_layouts,
            native_set_layouts,
            update_templates: Vec::new(),
        }
    }

    /// Attach one update template per set, in set order.
    ///
    /// The templates must have been created for the push-descriptor path when
    /// the device supports it, and for the set-update path otherwise.
    pub fn with_update_templates(mut self, templates: Vec<vk::DescriptorUpdateTemplate>) -> Self {
        if templates.len() != self.set_layouts.len() {
            log::warn!(
                "Shader '{}': {} update templates for {} descriptor sets",
                self.name,
                templates.len(),
                self.set_layouts.len()
            );
        }

        self.update_templates = templates
            .into_iter()
            .zip(&self.set_layouts)
            .map(|(handle, layout)| {
                UpdateTemplate::new(
                    handle,
                    layout.slots().iter().map(|s| s.descriptor_type).collect(),
                )
            })
            .collect();
        self
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline layout every descriptor set is bound against
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Set layouts in set-index order
    pub fn set_layouts(&self) -> &[DescriptorSetLayout] {
        &self.set_layouts
    }

    /// Native set layout handles in set-index order
    pub fn native_set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.native_set_layouts
    }

    /// Update template for `set`, if one was attached
    pub fn update_template(&self, set: usize) -> Option<&UpdateTemplate> {
        self.update_templates.get(set)
    }

    /// Precomputed write entries for `set`, in declaration order
    pub fn write_entries(&self, set: usize) -> &[DescriptorSlot] {
        self.set_layouts.get(set).map_or(&[], DescriptorSetLayout::slots)
    }
}
