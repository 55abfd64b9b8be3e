//! Pipeline state, render passes and framebuffers

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ash::vk;

use crate::gfx::PrimitiveMode;
use super::resources::ResourceId;
use super::shader::Shader;

/// Compiled graphics pipeline and the reflection data it was built from
#[derive(Debug)]
pub struct PipelineState {
    id: ResourceId,
    handle: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
    primitive: PrimitiveMode,
    shader: Arc<Shader>,
}

impl PipelineState {
    /// Graphics pipeline
    pub fn new(handle: vk::Pipeline, primitive: PrimitiveMode, shader: Arc<Shader>) -> Self {
        Self {
            id: ResourceId::next(),
            handle,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            primitive,
            shader,
        }
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Native pipeline
    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    /// Bind point
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    /// Primitive topology
    pub fn primitive(&self) -> PrimitiveMode {
        self.primitive
    }

    /// Shader reflection data
    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }
}

/// Render pass; its last attachment slot is always the depth/stencil one
#[derive(Debug)]
pub struct RenderPass {
    id: ResourceId,
    handle: vk::RenderPass,
    color_attachment_count: usize,
}

impl RenderPass {
    /// Render pass with `color_attachment_count` colors plus depth/stencil
    pub fn new(handle: vk::RenderPass, color_attachment_count: usize) -> Self {
        Self {
            id: ResourceId::next(),
            handle,
            color_attachment_count,
        }
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Native handle
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// Color attachments
    pub fn color_attachment_count(&self) -> usize {
        self.color_attachment_count
    }

    /// Total attachment slots, depth/stencil included
    pub fn attachment_count(&self) -> usize {
        self.color_attachment_count + 1
    }
}

/// Image cursor of a presentation swapchain
#[derive(Debug)]
pub struct Swapchain {
    id: ResourceId,
    image_count: u32,
    current_image: AtomicU32,
}

impl Swapchain {
    /// Swapchain with `image_count` images, cursor at 0
    pub fn new(image_count: u32) -> Self {
        Self {
            id: ResourceId::next(),
            image_count,
            current_image: AtomicU32::new(0),
        }
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Number of images
    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Record the image index returned by the latest acquire
    pub fn set_current_image(&self, index: u32) {
        self.current_image.store(index, Ordering::Release);
    }

    /// Image index rendering targets this frame
    pub fn current_image(&self) -> u32 {
        self.current_image.load(Ordering::Acquire)
    }
}

/// What a [`Framebuffer`] renders into
#[derive(Debug)]
pub enum FramebufferTarget {
    /// Single native framebuffer
    Offscreen(vk::Framebuffer),
    /// One native framebuffer per swapchain image
    Swapchain {
        /// Swapchain whose cursor picks the framebuffer
        swapchain: Arc<Swapchain>,
        /// Framebuffers indexed by image
        per_image: Vec<vk::Framebuffer>,
    },
}

/// Framebuffer resource
#[derive(Debug)]
pub struct Framebuffer {
    id: ResourceId,
    target: FramebufferTarget,
}

impl Framebuffer {
    /// Offscreen framebuffer
    pub fn offscreen(handle: vk::Framebuffer) -> Self {
        Self {
            id: ResourceId::next(),
            target: FramebufferTarget::Offscreen(handle),
        }
    }

    /// Swapchain-backed framebuffer
    pub fn swapchain(swapchain: Arc<Swapchain>, per_image: Vec<vk::Framebuffer>) -> Self {
        Self {
            id: ResourceId::next(),
            target: FramebufferTarget::Swapchain {
                swapchain,
                per_image,
            },
        }
    }

    /// Unique id
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Target description
    pub fn target(&self) -> &FramebufferTarget {
        &self.target
    }

    /// Native framebuffer to render into right now.
    ///
    /// `None` when the swapchain cursor points past the known framebuffers.
    pub fn resolve(&self) -> Option<vk::Framebuffer> {
        match &self.target {
            FramebufferTarget::Offscreen(handle) => Some(*handle),
            FramebufferTarget::Swapchain {
                swapchain,
                per_image,
            } => per_image.get(swapchain.current_image() as usize).copied(),
        }
    }
}
