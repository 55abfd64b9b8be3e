//! # gfx_vulkan
//!
//! Vulkan command-buffer recording and resource binding for the renderer.
//!
//! ## Features
//!
//! - **Dirty-tracked recording**: redundant pipeline, input-assembler, binding-layout
//!   and dynamic-state binds never reach the driver
//! - **Tiered descriptor resolution**: push descriptors, update templates, or manual
//!   descriptor writes depending on what the device supports
//! - **Frame statistics**: draw calls, instances and triangles, rolled up from
//!   secondary command buffers
//! - **AR camera background**: a consumer of the recorder that composites the
//!   platform camera feed behind the scene
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gfx_vulkan::prelude::*;
//! use gfx_vulkan::vulkan::trace::TraceDispatch;
//!
//! fn record(device: Arc<Device<TraceDispatch>>, queue: Queue) -> VulkanResult<()> {
//!     let mut cmd = CommandBuffer::new(device);
//!     cmd.initialize(CommandBufferInfo::new(CommandBufferType::Primary, queue))?;
//!     cmd.begin(None, 0, None)?;
//!     // begin_render_pass / bind_* / draw ...
//!     cmd.end()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod gfx;
pub mod vulkan;
pub mod ar;

/// Common imports for renderer code
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, GfxConfig},
        gfx::{
            ClearValue, Color, CommandBufferType, DrawInfo, PrimitiveMode, Rect, StencilFace,
            Viewport,
        },
        vulkan::{
            BindingLayout, Buffer, CommandBuffer, CommandBufferInfo, Device, DeviceCaps,
            DeviceDispatch, Framebuffer, InputAssembler, PipelineState, Queue, RenderPass,
            Sampler, Shader, Texture, VulkanError, VulkanResult,
        },
        ar::{ArModule, ArPlatform},
    };
}
