//! Vulkan backend
//!
//! Resource wrappers, the device with its command and descriptor pools, and
//! the command buffer recorder. All native calls go through a
//! [`DeviceDispatch`]: [`AshDispatch`] drives a real device and
//! [`TraceDispatch`] logs the calls so recording can be checked without a GPU.

pub mod error;
pub mod dispatch;
pub mod ash_dispatch;
pub mod trace;
pub mod device;
pub mod queue;
pub mod resources;
pub mod shader;
pub mod pipeline;
pub mod input_assembler;
pub mod binding_layout;
pub mod command_buffer;

pub use ash_dispatch::AshDispatch;
pub use binding_layout::{BindingLayout, SlotBinding};
pub use command_buffer::{CommandBuffer, CommandBufferInfo, FrameStats, MAX_UPDATE_BUFFER_SIZE};
pub use device::{CommandBufferPool, DescriptorSetPool, Device, DeviceCaps, NativeAccess};
pub use dispatch::{DescriptorClass, DescriptorInfo, DeviceDispatch};
pub use error::{VulkanError, VulkanResult};
pub use input_assembler::{IndirectBuffer, InputAssembler};
pub use pipeline::{Framebuffer, FramebufferTarget, PipelineState, RenderPass, Swapchain};
pub use queue::Queue;
pub use resources::{Buffer, ResourceId, Sampler, Texture};
pub use shader::{DescriptorBinding, DescriptorSetLayout, DescriptorSlot, Shader, UpdateTemplate};
pub use trace::{RecordedCommand, TraceDispatch};
