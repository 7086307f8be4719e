/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! Backend erased interop resources. Each factory returns one of these behind an
//! `Arc`; the concrete type is chosen by the active compute API.
//!
//! # Safety (general)
//! * Copies and semaphore operations are asynchronous and only enqueue work.
//!   Host memory passed in must stay valid and untouched until the stream has
//!   drained past the operation, e.g. after [`crate::wait_for_completion`].
//! * Nothing orders compute work against Vulkan work except semaphores.

use hal::ash::vk;
use hal::{ComputeEvent, FormatInfo, ImageHandle, ImageImportInfo, InteropResult, StreamWrapper};
use types::{InteropComputeApi, SemaphoreKind};

use crate::sync::SemaphoreState;

pub trait BufferVkComputeApiExternalMemory: Send + Sync {
    fn compute_api(&self) -> InteropComputeApi;
    /// Device address of the shared memory, valid until this object is dropped
    fn device_ptr(&self) -> u64;
    fn size(&self) -> u64;
    fn was_handle_consumed(&self) -> bool;
    /// # Safety
    /// * See the module level safety section
    unsafe fn copy_to_host_ptr_async(&self, dst: &mut [u8], stream: StreamWrapper)
    -> InteropResult<()>;
    /// # Safety
    /// * See the module level safety section
    unsafe fn copy_from_host_ptr_async(
        &self,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()>;
    /// # Safety
    /// * `dst` must be a device allocation of at least [`Self::size`] bytes
    unsafe fn copy_to_device_ptr_async(
        &self,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()>;
}
impl dyn BufferVkComputeApiExternalMemory {
    /// The device pointer reinterpreted for kernel arguments
    pub fn get_device_ptr<T>(&self) -> *mut T {
        self.device_ptr() as usize as *mut T
    }
}

/// An image imported for pixel loads and stores only.
pub trait UnsampledImageVkComputeApiExternalMemory: Send + Sync {
    fn compute_api(&self) -> InteropComputeApi;
    fn format_info(&self) -> &'static FormatInfo;
    fn import_info(&self) -> &ImageImportInfo;
    fn was_handle_consumed(&self) -> bool;
    /// Surface of the base level
    fn get_surface_object(&self) -> InteropResult<ImageHandle> {
        self.surface_object(0)
    }
    fn surface_object(&self, level: u32) -> InteropResult<ImageHandle>;
    fn get_mipmapped_array_level(&self, level: u32) -> InteropResult<ImageHandle>;
    /// # Safety
    /// * See the module level safety section
    unsafe fn copy_to_host_ptr_async(
        &self,
        level: u32,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()>;
    /// # Safety
    /// * See the module level safety section
    unsafe fn copy_from_host_ptr_async(
        &self,
        level: u32,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()>;
    /// # Safety
    /// * `dst` must hold the whole level, tightly packed
    unsafe fn copy_to_device_ptr_async(
        &self,
        level: u32,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()>;
}

/// An image imported for sampled reads as well as surface access.
pub trait ImageVkComputeApiExternalMemory: UnsampledImageVkComputeApiExternalMemory {
    fn texture_object(&self) -> ImageHandle;
}

pub trait SemaphoreVkComputeApiInterop: Send + Sync {
    fn compute_api(&self) -> InteropComputeApi;
    fn kind(&self) -> SemaphoreKind;
    fn was_handle_consumed(&self) -> bool;
    /// The Vulkan handle to add to submissions
    fn vk_semaphore(&self) -> vk::Semaphore;
    /// Host side view of the scheduled and reached values
    fn state(&self) -> SemaphoreState;
    /// Smallest value the next timeline signal may use
    fn next_signal_value(&self) -> u64;
    /// Records that a Vulkan submission about to be made signals `value`. Call
    /// before submitting; non-increasing timeline values are rejected.
    fn vulkan_signal(&self, value: u64) -> InteropResult<()>;
    /// Records that a Vulkan submission about to be made waits on `value`.
    fn vulkan_wait(&self, value: u64);
    /// Enqueues a signal of `value` on `stream`. `value` is ignored for binary
    /// semaphores.
    /// # Safety
    /// * See the module level safety section
    unsafe fn signal_semaphore_compute_api(&self, stream: StreamWrapper, value: u64)
    -> InteropResult<()>;
    /// Enqueues a wait for `value` on `stream`, recording `done` once it resolved.
    /// # Safety
    /// * A signal of `value` or higher must be submitted eventually, or the stream hangs
    unsafe fn wait_semaphore_compute_api(
        &self,
        stream: StreamWrapper,
        value: u64,
        done: Option<&ComputeEvent>,
    ) -> InteropResult<()>;
}
