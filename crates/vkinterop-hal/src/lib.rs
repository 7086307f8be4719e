/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */

pub mod cuda;
pub mod device;
pub mod error;
pub mod format;
pub mod handle;
pub mod hip;
pub mod image;
pub mod level_zero;
pub mod loader;
pub mod stream;
pub mod sycl;
pub mod vulkan;

#[cfg(test)]
mod tests;

pub use cuda::Cuda;
pub use device::{ComputeDeviceInfo, DeviceIdentity};
pub use error::{InteropError, InteropResult};
pub use format::{
    FormatInfo, convert_vk_format_to_string, get_image_format_glsl_string,
    get_image_format_glsl_string_sized, get_image_format_glsl_string_typed,
    get_image_format_info, small_format_tile_bounds,
};
pub use handle::{
    ExportedHandle, ExternalBufferSource, ExternalImageSource, ExternalMemorySource,
    ExternalSemaphoreSource, HandleStatistics, ImageImportInfo, ImportedHandle,
    handle_statistics,
};
pub use hip::Hip;
pub use image::{ImageFlavor, ImageHandle, LevelLayout};
pub use level_zero::LevelZero;
pub use stream::{ComputeEvent, StreamWrapper};
pub use sycl::Sycl;
pub use vulkan::{
    CommandBuffer, PendingSubmission, Submission, VulkanBuffer, VulkanDevice, VulkanFence,
    VulkanImage, VulkanSemaphore, get_cuda_interop_device_extensions, interop_device_extensions,
};

pub use ash;
pub use gpu_allocator::MemoryLocation;

use std::sync::Arc;
use std::time::Duration;

use types::*;

/// One compute runtime. Every backend has exactly one implementation of each
/// resource trait; the façade erases them behind its own object safe traits.
///
/// Resources hold an `Arc` of the context that imported them, and the context holds
/// the function table, so any teardown order that drops resources first is valid.
pub trait ComputeBackend: Sized + std::fmt::Debug + Send + Sync + 'static {
    const API: InteropComputeApi;

    type Context: DeviceContext<Self>;
    type Buffer: ExternalBuffer<Self>;
    type Image: ExternalImage<Self>;
    type Semaphore: ExternalSemaphore<Self>;

    /// Loads the runtime if it hasn't been yet.
    fn initialize() -> InteropResult<()>;
    fn is_initialized() -> bool;
    /// Drops the process' reference to the function table.
    fn free() -> bool;

    /// Blocks until all work enqueued on `stream` has finished.
    fn wait_for_completion(stream: StreamWrapper) -> InteropResult<()>;
    /// Returns whether the stream drained within `timeout`.
    fn wait_for_completion_timeout(stream: StreamWrapper, timeout: Duration)
    -> InteropResult<bool>;
}

pub trait DeviceContext<B: ComputeBackend<Context = Self>>: Send + Sync + Sized {
    /// Opens the compute device that is the same physical GPU as `identity`.
    fn new(identity: &DeviceIdentity) -> InteropResult<Arc<Self>>;
    fn device_info(&self) -> &ComputeDeviceInfo;

    /// # Safety
    /// * The allocation must stay alive until the returned buffer is dropped
    unsafe fn import_buffer(
        self: &Arc<Self>,
        source: &dyn ExternalBufferSource,
    ) -> InteropResult<B::Buffer>;
    /// # Safety
    /// * The image and its memory must stay alive until the returned image is dropped
    /// * The image must be in `GENERAL` layout whenever the compute side accesses it
    unsafe fn import_image(
        self: &Arc<Self>,
        source: &dyn ExternalImageSource,
        flavor: ImageFlavor,
    ) -> InteropResult<B::Image>;
    /// # Safety
    /// * The semaphore must stay alive until the returned semaphore is dropped
    unsafe fn import_semaphore(
        self: &Arc<Self>,
        source: &dyn ExternalSemaphoreSource,
    ) -> InteropResult<B::Semaphore>;

    fn create_stream(&self) -> InteropResult<StreamWrapper>;
    /// # Safety
    /// * No work may be pending on the stream
    unsafe fn destroy_stream(&self, stream: StreamWrapper) -> InteropResult<()>;
    fn create_event(&self) -> InteropResult<ComputeEvent>;
    /// # Safety
    /// * No pending command may reference the event
    unsafe fn destroy_event(&self, event: ComputeEvent) -> InteropResult<()>;
}

/// # Safety (general)
/// * Copies are asynchronous. Host memory passed in must stay valid and untouched
///   until the stream has drained past the copy.
/// * There is no implicit ordering against Vulkan work; wait on a semaphore first.
pub trait ExternalBuffer<B: ComputeBackend<Buffer = Self>>: Send + Sync {
    fn device_ptr(&self) -> u64;
    fn size(&self) -> u64;
    fn was_handle_consumed(&self) -> bool;
    /// # Safety
    /// * See the trait level safety section
    unsafe fn copy_to_host_async(&self, dst: &mut [u8], stream: StreamWrapper)
    -> InteropResult<()>;
    /// # Safety
    /// * See the trait level safety section
    unsafe fn copy_from_host_async(&self, src: &[u8], stream: StreamWrapper) -> InteropResult<()>;
    /// # Safety
    /// * `dst` must be a device allocation of at least [`ExternalBuffer::size`] bytes
    unsafe fn copy_to_device_ptr_async(
        &self,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()>;
}

/// # Safety (general)
/// * Same rules as [`ExternalBuffer`]
pub trait ExternalImage<B: ComputeBackend<Image = Self>>: Send + Sync {
    fn format_info(&self) -> &'static FormatInfo;
    fn import_info(&self) -> &ImageImportInfo;
    fn flavor(&self) -> ImageFlavor;
    fn was_handle_consumed(&self) -> bool;
    /// Handle for raw pixel loads and stores on `level`
    fn surface_object(&self, level: u32) -> InteropResult<ImageHandle>;
    /// Sampled images only
    fn texture_object(&self) -> Option<ImageHandle>;
    fn mipmapped_array_level(&self, level: u32) -> InteropResult<ImageHandle>;
    /// # Safety
    /// * See the trait level safety section
    unsafe fn copy_to_host_async(
        &self,
        level: u32,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()>;
    /// # Safety
    /// * See the trait level safety section
    unsafe fn copy_from_host_async(
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

pub trait ExternalSemaphore<B: ComputeBackend<Semaphore = Self>>: Send + Sync {
    fn kind(&self) -> SemaphoreKind;
    fn was_handle_consumed(&self) -> bool;
    /// Enqueues a signal. `value` is ignored for binary semaphores.
    /// # Safety
    /// * Timeline values must increase strictly between signals
    unsafe fn signal_async(&self, stream: StreamWrapper, value: u64) -> InteropResult<()>;
    /// Enqueues a wait, recording `done` once the wait has resolved.
    /// # Safety
    /// * A signal of `value` or higher must be submitted eventually, or the stream hangs
    unsafe fn wait_async(
        &self,
        stream: StreamWrapper,
        value: u64,
        done: Option<&ComputeEvent>,
    ) -> InteropResult<()>;
}
