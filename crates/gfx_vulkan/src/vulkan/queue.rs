//! Hardware queue a command buffer is recorded for

use ash::vk;

use super::command_buffer::CommandBuffer;
use super::device::Device;
use super::dispatch::DeviceDispatch;
use super::error::VulkanResult;

/// Queue handle plus the family command pools are created for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    handle: vk::Queue,
    family_index: u32,
}

impl Queue {
    /// Wrap a queue retrieved from the device
    pub fn new(handle: vk::Queue, family_index: u32) -> Self {
        Self {
            handle,
            family_index,
        }
    }

    /// Native handle
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    /// Queue family index
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Submit recorded primary buffers in one batch, signalling `fence`
    pub fn submit<D: DeviceDispatch>(
        &self,
        device: &Device<D>,
        command_buffers: &[&CommandBuffer<D>],
        fence: vk::Fence,
    ) -> VulkanResult<()> {
        let handles: Vec<vk::CommandBuffer> = command_buffers
            .iter()
            .filter_map(|cb| {
                let handle = cb.native_handle();
                if handle.is_none() {
                    log::warn!("Skipping submit of an uninitialized command buffer");
                }
                handle
            })
            .collect();

        if handles.is_empty() {
            return Ok(());
        }
        device.dispatch().queue_submit(self.handle, &handles, fence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::CommandBufferType;
    use crate::vulkan::command_buffer::CommandBufferInfo;
    use crate::vulkan::device::DeviceCaps;
    use crate::vulkan::trace::{RecordedCommand, TraceDispatch};
    use ash::vk::Handle;
    use std::sync::Arc;

    #[test]
    fn test_submit_batches_initialized_buffers() {
        let device = Arc::new(Device::new(TraceDispatch::new(), DeviceCaps::default()));
        let queue = Queue::new(vk::Queue::from_raw(0x10), 0);

        let mut first = CommandBuffer::new(Arc::clone(&device));
        first.initialize(CommandBufferInfo::new(CommandBufferType::Primary, queue)).unwrap();
        let mut second = CommandBuffer::new(Arc::clone(&device));
        second.initialize(CommandBufferInfo::new(CommandBufferType::Primary, queue)).unwrap();
        let unready = CommandBuffer::new(Arc::clone(&device));

        queue.submit(&*device, &[&first, &unready, &second], vk::Fence::null()).unwrap();

        let submits: Vec<_> = device
            .dispatch()
            .device_commands()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCommand::Submit { queue: q, command_buffers, .. } => Some((q, command_buffers)),
                _ => None,
            })
            .collect();
        assert_eq!(submits.len(), 1);
        assert_eq!(submits[0].0, queue.handle());
        assert_eq!(
            submits[0].1,
            vec![first.native_handle().unwrap(), second.native_handle().unwrap()]
        );
    }

    #[test]
    fn test_submit_nothing_is_noop() {
        let device = Device::new(TraceDispatch::new(), DeviceCaps::default());
        let queue = Queue::new(vk::Queue::from_raw(0x10), 0);

        queue.submit(&device, &[], vk::Fence::null()).unwrap();

        assert_eq!(device.dispatch().count_where(|c| matches!(c, RecordedCommand::Submit { .. })), 0);
    }
}
