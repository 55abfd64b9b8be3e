//! Device object: capability flags and the pools command buffers draw from
//!
//! Both pools are shared by every command buffer recorded against the device,
//! so their mutation is serialized here. Recording itself needs no locking.

use std::collections::HashMap;

use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::config::{CapabilityOverrides, DescriptorPoolConfig, GfxConfig};
use super::dispatch::DeviceDispatch;
use super::error::{VulkanError, VulkanResult};

/// Optional device features that select recording paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCaps {
    /// `VK_KHR_push_descriptor` is enabled
    pub push_descriptor: bool,
    /// Descriptor update templates are available
    pub descriptor_update_template: bool,
    /// The `multiDrawIndirect` feature is enabled
    pub multi_draw_indirect: bool,
}

impl DeviceCaps {
    /// Every optional feature present
    pub const fn all() -> Self {
        Self {
            push_descriptor: true,
            descriptor_update_template: true,
            multi_draw_indirect: true,
        }
    }

    /// Mask off whatever `overrides` disables
    pub const fn with_overrides(self, overrides: &CapabilityOverrides) -> Self {
        Self {
            push_descriptor: self.push_descriptor && !overrides.disable_push_descriptor,
            descriptor_update_template: self.descriptor_update_template
                && !overrides.disable_descriptor_update_template,
            multi_draw_indirect: self.multi_draw_indirect && !overrides.disable_multi_draw_indirect,
        }
    }
}

struct FamilyPool {
    pool: vk::CommandPool,
    free_primary: Vec<vk::CommandBuffer>,
    free_secondary: Vec<vk::CommandBuffer>,
}

impl FamilyPool {
    fn free_list(&mut self, level: vk::CommandBufferLevel) -> &mut Vec<vk::CommandBuffer> {
        if level == vk::CommandBufferLevel::SECONDARY {
            &mut self.free_secondary
        } else {
            &mut self.free_primary
        }
    }
}

/// Native command pools, one per queue family, with per-level free lists
#[derive(Default)]
pub struct CommandBufferPool {
    families: Mutex<HashMap<u32, FamilyPool>>,
}

impl CommandBufferPool {
    /// Hand out a command buffer of `level` for `queue_family_index`,
    /// reusing a yielded one when available
    pub fn request<D: DeviceDispatch>(
        &self,
        dispatch: &D,
        level: vk::CommandBufferLevel,
        queue_family_index: u32,
    ) -> VulkanResult<vk::CommandBuffer> {
        let mut families = self.families.lock();

        if !families.contains_key(&queue_family_index) {
            let pool = dispatch.create_command_pool(queue_family_index)?;
            log::debug!("Created command pool for queue family {}", queue_family_index);
            families.insert(
                queue_family_index,
                FamilyPool {
                    pool,
                    free_primary: Vec::new(),
                    free_secondary: Vec::new(),
                },
            );
        }
        let Some(family) = families.get_mut(&queue_family_index) else {
            return Err(VulkanError::InvalidOperation {
                reason: format!("no command pool for queue family {}", queue_family_index),
            });
        };

        if let Some(buffer) = family.free_list(level).pop() {
            return Ok(buffer);
        }

        dispatch
            .allocate_command_buffers(family.pool, level, 1)?
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
    }

    /// Return a buffer obtained from [`request`](Self::request)
    pub fn yield_buffer(
        &self,
        level: vk::CommandBufferLevel,
        queue_family_index: u32,
        buffer: vk::CommandBuffer,
    ) {
        let mut families = self.families.lock();
        match families.get_mut(&queue_family_index) {
            Some(family) => family.free_list(level).push(buffer),
            None => log::warn!(
                "Command buffer yielded to unknown queue family {}",
                queue_family_index
            ),
        }
    }

    /// Buffers currently parked in the free lists
    pub fn free_count(&self) -> usize {
        self.families
            .lock()
            .values()
            .map(|f| f.free_primary.len() + f.free_secondary.len())
            .sum()
    }

    fn destroy<D: DeviceDispatch>(&self, dispatch: &D) {
        for (_, family) in self.families.lock().drain() {
            dispatch.destroy_command_pool(family.pool);
        }
    }
}

const POOLED_DESCRIPTOR_TYPES: [vk::DescriptorType; 11] = [
    vk::DescriptorType::SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
    vk::DescriptorType::STORAGE_TEXEL_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    vk::DescriptorType::INPUT_ATTACHMENT,
];

#[derive(Default)]
struct DescriptorPoolState {
    pools: Vec<vk::DescriptorPool>,
    current: usize,
}

/// Growable descriptor set allocator.
///
/// When the current native pool is exhausted the next one is used, creating
/// it if needed. [`reset`](DescriptorSetPool::reset) recycles every pool.
pub struct DescriptorSetPool {
    config: DescriptorPoolConfig,
    state: Mutex<DescriptorPoolState>,
}

impl DescriptorSetPool {
    /// Create an empty allocator; native pools are created on first use
    pub fn new(config: DescriptorPoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DescriptorPoolState::default()),
        }
    }

    fn create_pool<D: DeviceDispatch>(&self, dispatch: &D) -> VulkanResult<vk::DescriptorPool> {
        let max_sets = self.config.max_sets_per_pool.max(1);
        let pool_sizes: Vec<vk::DescriptorPoolSize> = POOLED_DESCRIPTOR_TYPES
            .iter()
            .map(|&ty| vk::DescriptorPoolSize {
                ty,
                descriptor_count: max_sets.saturating_mul(self.config.descriptors_per_type.max(1)),
            })
            .collect();
        let pool = dispatch.create_descriptor_pool(max_sets, &pool_sizes)?;
        log::debug!("Created descriptor pool with room for {} sets", max_sets);
        Ok(pool)
    }

    /// Allocate one set per layout into `out`
    pub fn alloc<D: DeviceDispatch>(
        &self,
        dispatch: &D,
        layouts: &[vk::DescriptorSetLayout],
        out: &mut [vk::DescriptorSet],
    ) -> VulkanResult<()> {
        if layouts.is_empty() {
            return Ok(());
        }
        if layouts.len() > self.config.max_sets_per_pool.max(1) as usize {
            return Err(VulkanError::OutOfPoolMemory {
                requested: layouts.len(),
            });
        }

        let mut state = self.state.lock();
        if state.pools.is_empty() {
            let pool = self.create_pool(dispatch)?;
            state.pools.push(pool);
            state.current = 0;
        }

        let mut grown = false;
        loop {
            let pool = state.pools[state.current];
            match dispatch.allocate_descriptor_sets(pool, layouts) {
                Ok(sets) => {
                    for (slot, set) in out.iter_mut().zip(sets) {
                        *slot = set;
                    }
                    return Ok(());
                }
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                    if grown {
                        return Err(VulkanError::OutOfPoolMemory {
                            requested: layouts.len(),
                        });
                    }
                    state.current += 1;
                    if state.current == state.pools.len() {
                        let pool = self.create_pool(dispatch)?;
                        state.pools.push(pool);
                        grown = true;
                    }
                }
                Err(err) => return Err(VulkanError::Api(err)),
            }
        }
    }

    /// Return every allocated set to its pool
    pub fn reset<D: DeviceDispatch>(&self, dispatch: &D) -> VulkanResult<()> {
        let mut state = self.state.lock();
        for &pool in &state.pools {
            dispatch.reset_descriptor_pool(pool)?;
        }
        state.current = 0;
        Ok(())
    }

    /// Native pools created so far
    pub fn pool_count(&self) -> usize {
        self.state.lock().pools.len()
    }

    fn destroy<D: DeviceDispatch>(&self, dispatch: &D) {
        let mut state = self.state.lock();
        for pool in state.pools.drain(..) {
            dispatch.destroy_descriptor_pool(pool);
        }
        state.current = 0;
    }
}

/// Exclusive access to native calls that must not overlap with other threads.
///
/// Released when dropped.
pub struct NativeAccess<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Logical device as seen by the recorder
pub struct Device<D: DeviceDispatch> {
    dispatch: D,
    caps: DeviceCaps,
    command_buffer_pool: CommandBufferPool,
    descriptor_set_pool: DescriptorSetPool,
    native_access: Mutex<()>,
}

impl<D: DeviceDispatch> Device<D> {
    /// Device with default pool sizing
    pub fn new(dispatch: D, caps: DeviceCaps) -> Self {
        Self::with_config(dispatch, caps, &GfxConfig::default())
    }

    /// Device with capability overrides and pool sizing from `config`
    pub fn with_config(dispatch: D, caps: DeviceCaps, config: &GfxConfig) -> Self {
        let caps = caps.with_overrides(&config.capabilities);
        log::debug!(
            "Device: push descriptors {}, update templates {}, multi-draw indirect {}",
            caps.push_descriptor,
            caps.descriptor_update_template,
            caps.multi_draw_indirect
        );
        Self {
            dispatch,
            caps,
            command_buffer_pool: CommandBufferPool::default(),
            descriptor_set_pool: DescriptorSetPool::new(config.descriptor_pool),
            native_access: Mutex::new(()),
        }
    }

    /// Native entry points
    pub fn dispatch(&self) -> &D {
        &self.dispatch
    }

    /// Native device handle
    pub fn handle(&self) -> vk::Device {
        self.dispatch.device_handle()
    }

    /// Effective capabilities
    pub fn caps(&self) -> DeviceCaps {
        self.caps
    }

    /// Push descriptors can be used
    pub fn is_push_descriptor_set_supported(&self) -> bool {
        self.caps.push_descriptor
    }

    /// Descriptor update templates can be used
    pub fn is_descriptor_update_template_supported(&self) -> bool {
        self.caps.descriptor_update_template
    }

    /// One indirect call may cover several records
    pub fn is_multi_draw_indirect_supported(&self) -> bool {
        self.caps.multi_draw_indirect
    }

    /// Command buffer pool
    pub fn command_buffer_pool(&self) -> &CommandBufferPool {
        &self.command_buffer_pool
    }

    /// Descriptor set pool
    pub fn descriptor_set_pool(&self) -> &DescriptorSetPool {
        &self.descriptor_set_pool
    }

    /// Request a native command buffer
    pub fn request_command_buffer(
        &self,
        level: vk::CommandBufferLevel,
        queue_family_index: u32,
    ) -> VulkanResult<vk::CommandBuffer> {
        self.command_buffer_pool
            .request(&self.dispatch, level, queue_family_index)
    }

    /// Return a native command buffer
    pub fn yield_command_buffer(
        &self,
        level: vk::CommandBufferLevel,
        queue_family_index: u32,
        buffer: vk::CommandBuffer,
    ) {
        self.command_buffer_pool
            .yield_buffer(level, queue_family_index, buffer);
    }

    /// Allocate descriptor sets, one per layout
    pub fn alloc_descriptor_sets(
        &self,
        layouts: &[vk::DescriptorSetLayout],
        out: &mut [vk::DescriptorSet],
    ) -> VulkanResult<()> {
        self.descriptor_set_pool.alloc(&self.dispatch, layouts, out)
    }

    /// Recycle all descriptor sets, typically once per frame
    pub fn reset_descriptor_sets(&self) -> VulkanResult<()> {
        self.descriptor_set_pool.reset(&self.dispatch)
    }

    /// Block until no other thread holds native access, then hold it
    pub fn native_access(&self) -> NativeAccess<'_> {
        NativeAccess {
            _guard: self.native_access.lock(),
        }
    }

    /// Native access if no other thread holds it
    pub fn try_native_access(&self) -> Option<NativeAccess<'_>> {
        self.native_access
            .try_lock()
            .map(|guard| NativeAccess { _guard: guard })
    }
}

impl<D: DeviceDispatch> Drop for Device<D> {
    fn drop(&mut self) {
        self.descriptor_set_pool.destroy(&self.dispatch);
        self.command_buffer_pool.destroy(&self.dispatch);
    }
}
