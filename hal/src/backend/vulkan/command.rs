//! Vulkan command pool, one-time command buffers and fences.

use ash::vk;

use crate::error::GraphicsError;

/// Create a command pool for graphics operations.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })?;

    Ok(pool)
}

/// Allocate one primary command buffer and begin recording it.
pub fn begin_command_buffer(
    device: &ash::Device,
    pool: vk::CommandPool,
) -> Result<vk::CommandBuffer, GraphicsError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }?
        .into_iter()
        .next()
        .ok_or_else(|| GraphicsError::Internal("No command buffer allocated".to_string()))?;

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    if let Err(e) = unsafe { device.begin_command_buffer(cmd, &begin_info) } {
        unsafe { device.free_command_buffers(pool, &[cmd]) };
        return Err(e.into());
    }
    Ok(cmd)
}

/// A fence owned by one submission.
pub struct Fence {
    device: ash::Device,
    fence: vk::Fence,
}

impl Fence {
    pub fn new(device: &ash::Device) -> Result<Self, GraphicsError> {
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }?;
        Ok(Self {
            device: device.clone(),
            fence,
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    pub fn is_signaled(&self) -> Result<bool, GraphicsError> {
        Ok(unsafe { self.device.get_fence_status(self.fence) }?)
    }

    /// Block until the fence is signaled.
    pub fn wait(&self) -> Result<(), GraphicsError> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, u64::MAX) }?;
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.fence, None) };
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fence").field(&self.fence).finish()
    }
}

/// A command buffer recorded, submitted and waited for in one go.
///
/// The caller must hold exclusive access to `pool` for the guard's lifetime.
/// The buffer is freed on drop, also when recording fails half-way.
pub struct OneTimeCommands<'a> {
    device: &'a ash::Device,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
}

impl<'a> OneTimeCommands<'a> {
    pub fn begin(device: &'a ash::Device, pool: vk::CommandPool) -> Result<Self, GraphicsError> {
        let cmd = begin_command_buffer(device, pool)?;
        Ok(Self { device, pool, cmd })
    }

    pub fn cmd(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// End recording, submit to `queue` and wait for completion.
    pub fn finish(self, queue: vk::Queue) -> Result<(), GraphicsError> {
        unsafe { self.device.end_command_buffer(self.cmd) }?;

        let fence = Fence::new(self.device)?;
        let command_buffers = [self.cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device
                .queue_submit(queue, &[submit_info], fence.handle())
        }?;
        fence.wait()
    }
}

impl Drop for OneTimeCommands<'_> {
    fn drop(&mut self) {
        unsafe { self.device.free_command_buffers(self.pool, &[self.cmd]) };
    }
}
