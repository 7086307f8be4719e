/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! Shares Vulkan buffers, images and semaphores with CUDA, HIP, Level Zero or
//! SYCL.
//!
//! * One compute API is active per process. It is picked from the Vulkan driver
//!   on first use, or forced with [`initialize_compute_api`], and only changes
//!   after [`reset_compute_api_state`].
//! * Imported resources keep both their Vulkan source and their compute context
//!   alive, so they may be dropped in any order.
//! * All errors are logged; see [`set_open_message_box_on_compute_api_error`].

mod api;
mod error;
mod resources;
mod state;
mod sync;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

pub use api::{
    BufferVkComputeApiExternalMemory, ImageVkComputeApiExternalMemory,
    SemaphoreVkComputeApiInterop, UnsampledImageVkComputeApiExternalMemory,
};
pub use error::{
    ErrorDialogHook, open_message_box_on_compute_api_error, set_error_dialog_hook,
    set_open_message_box_on_compute_api_error,
};
pub use state::{
    decide_interop_compute_api, initialize_compute_api, reset_compute_api_state,
    selected_compute_api,
};
pub use sync::SemaphoreState;

pub use hal;
pub use hal::level_zero::{
    set_level_zero_next_command_events, set_level_zero_use_bindless_images_interop,
};
pub use hal::sycl::{
    SyclRuntime, clear_global_sycl_queue, global_sycl_queue, is_sycl_queue_registered,
    set_global_sycl_queue,
};
pub use hal::{
    ComputeDeviceInfo, ComputeEvent, DeviceIdentity, ExternalBufferSource, ExternalImageSource,
    ExternalMemorySource, ExternalSemaphoreSource, FormatInfo, HandleStatistics, ImageFlavor,
    ImageHandle, ImageImportInfo, InteropError, InteropResult, StreamWrapper, VulkanBuffer,
    VulkanDevice, VulkanImage, VulkanSemaphore, get_cuda_interop_device_extensions,
    get_image_format_info, handle_statistics, interop_device_extensions,
};
pub use types::{
    ExternalHandleType, ImageDimensionality, ImageExtent, InteropComputeApi, SemaphoreKind,
    UnsupportedComputeApiFeature,
};

use error::route;
use resources::{InteropBuffer, InteropImage, InteropSemaphore, SampledInteropImage};
use state::{BackendContext, context_for, with_backend};

/// The context for `identity`, selecting the compute API first if needed. Errors
/// are routed with the API the selection settled on.
fn routed_context(operation: &str, identity: &DeviceIdentity) -> InteropResult<BackendContext> {
    let context = context_for(identity);
    route(selected_compute_api(), operation, context)
}

/// Imports a Vulkan buffer into the active compute API.
#[tracing::instrument(skip_all, fields(size = buffer.buffer_size()))]
pub fn create_buffer_vk_compute_api_external_memory<S: ExternalBufferSource + 'static>(
    buffer: Arc<S>,
) -> InteropResult<Arc<dyn BufferVkComputeApiExternalMemory>> {
    let source: Arc<dyn ExternalBufferSource> = buffer;
    let context = routed_context(
        "create_buffer_vk_compute_api_external_memory",
        source.device_identity(),
    )?;
    with_backend!(&context, |ctx, B| Ok(Arc::new(InteropBuffer::<B>::import(
        ctx, source
    )?)))
}

/// Imports a Vulkan image for sampled reads as well as surface access. Formats
/// the runtime can't sample fail with [`InteropError::FormatUnsupported`].
#[tracing::instrument(skip_all, fields(format = ?image.image_info().format))]
pub fn create_image_vk_compute_api_external_memory<S: ExternalImageSource + 'static>(
    image: Arc<S>,
) -> InteropResult<Arc<dyn ImageVkComputeApiExternalMemory>> {
    let source: Arc<dyn ExternalImageSource> = image;
    let context = routed_context(
        "create_image_vk_compute_api_external_memory",
        source.device_identity(),
    )?;
    with_backend!(&context, |ctx, B| Ok(Arc::new(
        SampledInteropImage::<B>::import(ctx, source)?
    )))
}

/// Imports a Vulkan image for surface loads and stores only.
#[tracing::instrument(skip_all, fields(format = ?image.image_info().format))]
pub fn create_unsampled_image_vk_compute_api_external_memory<S: ExternalImageSource + 'static>(
    image: Arc<S>,
) -> InteropResult<Arc<dyn UnsampledImageVkComputeApiExternalMemory>> {
    let source: Arc<dyn ExternalImageSource> = image;
    let context = routed_context(
        "create_unsampled_image_vk_compute_api_external_memory",
        source.device_identity(),
    )?;
    with_backend!(&context, |ctx, B| Ok(Arc::new(InteropImage::<B>::import(
        ctx,
        source,
        ImageFlavor::Unsampled
    )?)))
}

/// Creates an exportable Vulkan semaphore on `device` and imports it. The
/// initial value defaults to 0 and is ignored for binary semaphores.
#[tracing::instrument(skip(device))]
pub fn create_semaphore_vk_compute_api_interop(
    device: &Arc<VulkanDevice>,
    kind: SemaphoreKind,
    initial_value: Option<u64>,
) -> InteropResult<Arc<dyn SemaphoreVkComputeApiInterop>> {
    let initial_value = initial_value.unwrap_or(0);
    let semaphore = VulkanSemaphore::new(device, kind, initial_value, true);
    let semaphore = route(
        selected_compute_api(),
        "create_semaphore_vk_compute_api_interop",
        semaphore,
    )?;
    import_semaphore_vk_compute_api_interop(Arc::new(semaphore), initial_value)
}

/// Imports a semaphore created elsewhere. `initial_value` seeds the host side
/// bookkeeping when the source can't report its counter.
#[tracing::instrument(skip(semaphore))]
pub fn import_semaphore_vk_compute_api_interop<S: ExternalSemaphoreSource + 'static>(
    semaphore: Arc<S>,
    initial_value: u64,
) -> InteropResult<Arc<dyn SemaphoreVkComputeApiInterop>> {
    let source: Arc<dyn ExternalSemaphoreSource> = semaphore;
    let context = routed_context(
        "import_semaphore_vk_compute_api_interop",
        source.device_identity(),
    )?;
    with_backend!(&context, |ctx, B| Ok(Arc::new(
        InteropSemaphore::<B>::import(ctx, source, initial_value)?
    )))
}

/// The compute device paired with a Vulkan device
pub fn compute_device_info(identity: &DeviceIdentity) -> InteropResult<ComputeDeviceInfo> {
    let context = routed_context("compute_device_info", identity)?;
    Ok(context.device_info())
}

/// Creates a stream on the compute device paired with `identity`. For SYCL this
/// is the registered queue.
pub fn create_stream(identity: &DeviceIdentity) -> InteropResult<StreamWrapper> {
    let result = context_for(identity).and_then(|context| context.create_stream());
    route(selected_compute_api(), "create_stream", result)
}
/// # Safety
/// * No work may be pending on the stream, see [`wait_for_completion`]
pub unsafe fn destroy_stream(
    identity: &DeviceIdentity,
    stream: StreamWrapper,
) -> InteropResult<()> {
    let result = context_for(identity)
        // SAFETY: forwarded to the caller
        .and_then(|context| unsafe { context.destroy_stream(stream) });
    route(stream.api(), "destroy_stream", result)
}
pub fn create_event(identity: &DeviceIdentity) -> InteropResult<ComputeEvent> {
    let result = context_for(identity).and_then(|context| context.create_event());
    route(selected_compute_api(), "create_event", result)
}
/// # Safety
/// * No pending command may reference the event
pub unsafe fn destroy_event(identity: &DeviceIdentity, event: ComputeEvent) -> InteropResult<()> {
    let result = context_for(identity)
        // SAFETY: forwarded to the caller
        .and_then(|context| unsafe { context.destroy_event(event) });
    route(event.api(), "destroy_event", result)
}

/// Blocks until all work on `stream` has finished. The stream must belong to `api`.
#[tracing::instrument]
pub fn wait_for_completion(api: InteropComputeApi, stream: StreamWrapper) -> InteropResult<()> {
    route(api, "wait_for_completion", state::wait(api, stream))
}
/// Like [`wait_for_completion`], but gives up after `timeout`. Returns whether the
/// stream drained.
#[tracing::instrument]
pub fn wait_for_completion_timeout(
    api: InteropComputeApi,
    stream: StreamWrapper,
    timeout: Duration,
) -> InteropResult<bool> {
    route(
        api,
        "wait_for_completion_timeout",
        state::wait_timeout(api, stream, timeout),
    )
}
