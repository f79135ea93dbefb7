// Per-frame command recording and synchronization
//
// One command buffer, re-recorded every frame, guarded by a fence so it is
// never reset while the GPU still reads it.

use anyhow::{Context, Result};
use ash::vk;

use super::render_pass::clear_values;
use super::DeviceContext;

pub struct FrameCommands {
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    /// Signalled when the frame's commands finish; presentation waits on it.
    pub render_complete: vk::Semaphore,
    /// Signalled when the submission retires. Starts signalled.
    in_flight: vk::Fence,
    device: ash::Device,
    queue: vk::Queue,
}

impl FrameCommands {
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let device = &ctx.device;
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(ctx.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        // Build piecewise so Drop can clean up after a partial failure
        let mut frame = Self {
            pool,
            command_buffer: vk::CommandBuffer::null(),
            render_complete: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
            device: device.clone(),
            queue: ctx.queue,
        };
        unsafe {
            frame.command_buffer = device
                .allocate_command_buffers(&alloc_info)
                .context("Failed to allocate command buffer")?[0];
            frame.render_complete = device.create_semaphore(&semaphore_info, None)?;
            frame.in_flight = device.create_fence(&fence_info, None)?;
        }
        Ok(frame)
    }

    /// Record a render pass that clears `framebuffer`, then submit it.
    pub fn record_and_submit(
        &self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) -> Result<()> {
        let device = &self.device;
        let cmd = self.command_buffer;

        unsafe {
            device.wait_for_fences(&[self.in_flight], true, u64::MAX)?;
            device.reset_fences(&[self.in_flight])?;
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            let clear_values = clear_values(clear_color);
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)?;

            let command_buffers = [cmd];
            let signal_semaphores = [self.render_complete];
            let submit_info = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);
            device.queue_submit(self.queue, &[submit_info.build()], self.in_flight)?;
        }

        Ok(())
    }
}

impl Drop for FrameCommands {
    fn drop(&mut self) {
        unsafe {
            if self.in_flight != vk::Fence::null() {
                if let Err(e) = self.device.wait_for_fences(&[self.in_flight], true, u64::MAX) {
                    log::warn!("Waiting for the in-flight fence failed: {}", e);
                }
                self.device.destroy_fence(self.in_flight, None);
            }
            self.device.destroy_semaphore(self.render_complete, None);
            // Also frees the command buffer
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}
