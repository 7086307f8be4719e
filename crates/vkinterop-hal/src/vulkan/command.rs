/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use types::SemaphoreKind;

use super::{VulkanBuffer, VulkanDevice, VulkanFence, VulkanImage, VulkanSemaphore};
use crate::format::image_aspect;
use crate::{InteropError, InteropResult};

/// Largest payload `vkCmdUpdateBuffer` accepts
pub const MAX_UPDATE_SIZE: usize = 65536;

/// A primary command buffer recorded once and submitted once. Each one owns its
/// pool, so recording on several threads needs no locking.
pub struct CommandBuffer {
    device: Arc<VulkanDevice>,
    pool: vk::CommandPool,
    cb: vk::CommandBuffer,
}
impl CommandBuffer {
    pub fn begin(device: &Arc<VulkanDevice>) -> InteropResult<Self> {
        let raw = device.device();
        let pool = unsafe {
            raw.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                    .queue_family_index(device.queue_family_index()),
                None,
            )
        }?;
        // Dropping `this` destroys the pool on any later failure
        let mut this = Self {
            device: device.clone(),
            pool,
            cb: vk::CommandBuffer::null(),
        };
        this.cb = unsafe {
            raw.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }?[0];
        unsafe {
            raw.begin_command_buffer(
                this.cb,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }?;
        Ok(this)
    }
    pub fn raw(&self) -> vk::CommandBuffer {
        self.cb
    }
    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn copy_buffer(
        &mut self,
        src: &VulkanBuffer,
        dst: &VulkanBuffer,
        size: u64,
    ) -> InteropResult<()> {
        let available = src.size().min(dst.size());
        if size > available {
            return Err(InteropError::CopyOutOfBounds {
                requested: size,
                available,
            });
        }
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .device()
                .cmd_copy_buffer(self.cb, src.buffer(), dst.buffer(), &[region])
        };
        Ok(())
    }
    /// Inline update. `data` must be a multiple of 4 bytes and at most
    /// [`MAX_UPDATE_SIZE`].
    pub fn update_buffer(
        &mut self,
        dst: &VulkanBuffer,
        offset: u64,
        data: &[u8],
    ) -> InteropResult<()> {
        let end = offset + data.len() as u64;
        if data.len() > MAX_UPDATE_SIZE
            || data.len() % 4 != 0
            || offset % 4 != 0
            || end > dst.size()
        {
            return Err(InteropError::CopyOutOfBounds {
                requested: end,
                available: dst.size().min(offset + MAX_UPDATE_SIZE as u64),
            });
        }
        unsafe {
            self.device
                .device()
                .cmd_update_buffer(self.cb, dst.buffer(), offset, data)
        };
        Ok(())
    }
    pub fn fill_buffer(&mut self, dst: &VulkanBuffer, value: u32) {
        unsafe {
            self.device
                .device()
                .cmd_fill_buffer(self.cb, dst.buffer(), 0, vk::WHOLE_SIZE, value)
        };
    }

    fn level_copy(
        image: &VulkanImage,
        level: u32,
        buffer: &VulkanBuffer,
    ) -> InteropResult<vk::BufferImageCopy> {
        let layout = image.level_layout(level)?;
        if buffer.size() < layout.size {
            return Err(InteropError::CopyOutOfBounds {
                requested: layout.size,
                available: buffer.size(),
            });
        }
        Ok(vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: image_aspect(image.info().format),
                mip_level: level,
                base_array_layer: 0,
                layer_count: image.info().array_layers,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: layout.extent.width,
                height: layout.extent.height,
                depth: layout.extent.depth,
            },
        })
    }
    /// Copies a whole mip level into `buffer`, tightly packed. The image must be in
    /// `GENERAL` or `TRANSFER_SRC_OPTIMAL` layout.
    pub fn copy_image_to_buffer(
        &mut self,
        image: &VulkanImage,
        level: u32,
        buffer: &VulkanBuffer,
    ) -> InteropResult<()> {
        let region = Self::level_copy(image, level, buffer)?;
        unsafe {
            self.device.device().cmd_copy_image_to_buffer(
                self.cb,
                image.image(),
                image.layout(),
                buffer.buffer(),
                &[region],
            )
        };
        Ok(())
    }
    /// The image must be in `GENERAL` or `TRANSFER_DST_OPTIMAL` layout.
    pub fn copy_buffer_to_image(
        &mut self,
        buffer: &VulkanBuffer,
        image: &VulkanImage,
        level: u32,
    ) -> InteropResult<()> {
        let region = Self::level_copy(image, level, buffer)?;
        unsafe {
            self.device.device().cmd_copy_buffer_to_image(
                self.cb,
                buffer.buffer(),
                image.image(),
                image.layout(),
                &[region],
            )
        };
        Ok(())
    }

    /// Makes all prior writes visible to all later commands and to the host.
    pub fn memory_barrier(&mut self) {
        let barrier = vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS | vk::PipelineStageFlags2::HOST)
            .dst_access_mask(
                vk::AccessFlags2::MEMORY_READ
                    | vk::AccessFlags2::MEMORY_WRITE
                    | vk::AccessFlags2::HOST_READ,
            );
        let dependency =
            vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.sync2().cmd_pipeline_barrier2(self.cb, &dependency) };
    }

    fn buffer_ownership_barrier(&mut self, buffer: &VulkanBuffer, release: bool) {
        let family = self.device.queue_family_index();
        let barrier = vk::BufferMemoryBarrier2::default()
            .buffer(buffer.buffer())
            .offset(0)
            .size(vk::WHOLE_SIZE);
        let barrier = if release {
            barrier
                .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
                .src_queue_family_index(family)
                .dst_queue_family_index(vk::QUEUE_FAMILY_EXTERNAL)
        } else {
            barrier
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
                .src_queue_family_index(vk::QUEUE_FAMILY_EXTERNAL)
                .dst_queue_family_index(family)
        };
        let dependency =
            vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.sync2().cmd_pipeline_barrier2(self.cb, &dependency) };
    }
    /// Releases `buffer` to the compute runtime. Submit with a semaphore signal the
    /// compute side waits on.
    pub fn release_buffer_to_external(&mut self, buffer: &VulkanBuffer) {
        self.buffer_ownership_barrier(buffer, true);
    }
    /// Acquires `buffer` back after the compute side signaled a semaphore this
    /// submission waits on.
    pub fn acquire_buffer_from_external(&mut self, buffer: &VulkanBuffer) {
        self.buffer_ownership_barrier(buffer, false);
    }

    fn image_barrier(
        &mut self,
        image: &VulkanImage,
        new_layout: vk::ImageLayout,
        families: Option<(u32, u32)>,
    ) {
        let (src_family, dst_family) =
            families.unwrap_or((vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED));
        let acquire = src_family == vk::QUEUE_FAMILY_EXTERNAL;
        let release = dst_family == vk::QUEUE_FAMILY_EXTERNAL;
        let old_layout = image.layout();
        let mut barrier = vk::ImageMemoryBarrier2::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .image(image.image())
            .subresource_range(image.subresource_range());
        if !acquire {
            barrier = barrier
                .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .src_access_mask(vk::AccessFlags2::MEMORY_WRITE);
        }
        if !release {
            barrier = barrier
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE);
        }
        let dependency =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.sync2().cmd_pipeline_barrier2(self.cb, &dependency) };
        image.set_layout(new_layout);
    }
    pub fn transition_image_layout(&mut self, image: &VulkanImage, new_layout: vk::ImageLayout) {
        self.image_barrier(image, new_layout, None);
    }
    /// Releases `image` to the compute runtime, leaving it in `GENERAL` layout.
    pub fn release_image_to_external(&mut self, image: &VulkanImage) {
        let family = self.device.queue_family_index();
        self.image_barrier(
            image,
            vk::ImageLayout::GENERAL,
            Some((family, vk::QUEUE_FAMILY_EXTERNAL)),
        );
    }
    /// Acquires `image` back from the compute runtime. It stays in `GENERAL` layout.
    pub fn acquire_image_from_external(&mut self, image: &VulkanImage) {
        let family = self.device.queue_family_index();
        self.image_barrier(
            image,
            vk::ImageLayout::GENERAL,
            Some((vk::QUEUE_FAMILY_EXTERNAL, family)),
        );
    }
}
impl Drop for CommandBuffer {
    fn drop(&mut self) {
        // Freeing the pool frees the command buffer
        unsafe { self.device.device().destroy_command_pool(self.pool, None) };
    }
}

/// Semaphores to wait on and signal around one queue submission. Binary
/// semaphores ignore the value. The semaphores must outlive the submission.
#[derive(Default)]
pub struct Submission {
    waits: Vec<vk::Semaphore>,
    wait_values: Vec<u64>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signals: Vec<vk::Semaphore>,
    signal_values: Vec<u64>,
}
impl Submission {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn wait(mut self, semaphore: &VulkanSemaphore, value: u64) -> Self {
        self.waits.push(semaphore.semaphore());
        self.wait_values.push(match semaphore.kind() {
            SemaphoreKind::Timeline => value,
            SemaphoreKind::Binary => 0,
        });
        self.wait_stages.push(vk::PipelineStageFlags::ALL_COMMANDS);
        self
    }
    pub fn signal(mut self, semaphore: &VulkanSemaphore, value: u64) -> Self {
        self.signals.push(semaphore.semaphore());
        self.signal_values.push(match semaphore.kind() {
            SemaphoreKind::Timeline => value,
            SemaphoreKind::Binary => 0,
        });
        self
    }
    pub fn submit(self, commands: CommandBuffer) -> InteropResult<PendingSubmission> {
        let device = commands.device.clone();
        unsafe { device.device().end_command_buffer(commands.cb) }?;
        self.submit_inner(&device, Some(commands))
    }
    /// Submits only the semaphore operations.
    pub fn submit_empty(self, device: &Arc<VulkanDevice>) -> InteropResult<PendingSubmission> {
        self.submit_inner(device, None)
    }
    fn submit_inner(
        self,
        device: &Arc<VulkanDevice>,
        commands: Option<CommandBuffer>,
    ) -> InteropResult<PendingSubmission> {
        let fence = VulkanFence::new(device, false)?;
        let command_buffers: Vec<_> = commands.iter().map(|c| c.cb).collect();
        let mut timeline = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&self.wait_values)
            .signal_semaphore_values(&self.signal_values);
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&self.waits)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&self.signals)
            .push_next(&mut timeline);
        unsafe { device.queue_submit(std::slice::from_ref(&submit), fence.fence()) }?;
        Ok(PendingSubmission {
            commands,
            fence,
        })
    }
}

/// Work on the queue. Dropping it blocks until the work has finished.
pub struct PendingSubmission {
    commands: Option<CommandBuffer>,
    fence: VulkanFence,
}
impl PendingSubmission {
    /// Returns false on timeout. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> InteropResult<bool> {
        self.fence.wait(timeout)
    }
    pub fn is_complete(&self) -> InteropResult<bool> {
        self.fence.is_signaled()
    }
}
impl Drop for PendingSubmission {
    fn drop(&mut self) {
        match self.fence.wait(None) {
            Ok(_) => drop(self.commands.take()),
            Err(e) => {
                log::error!("Failed to wait for submission: {e}; leaking its command buffer");
                std::mem::forget(self.commands.take());
            }
        }
    }
}
