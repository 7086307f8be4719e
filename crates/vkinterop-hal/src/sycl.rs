/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! SYCL backend.
//!
//! SYCL is a C++ API without a stable C ABI, so the embedding application
//! supplies a [`SyclRuntime`] that forwards to its `sycl::ext::oneapi` bindless
//! image and external memory extensions, together with the queue to use.
//! Registering one makes SYCL the preferred compute API.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use types::{ExternalHandleType, InteropComputeApi, SemaphoreKind, UnsupportedComputeApiFeature};

use crate::handle::{RawExternalHandle, check_import_size};
use crate::image::{check_host_span, level_layout};
use crate::stream::{SyclEvent, SyclQueue, poll_until};
use crate::{
    ComputeBackend, ComputeDeviceInfo, ComputeEvent, DeviceContext, DeviceIdentity,
    ExternalBuffer, ExternalBufferSource, ExternalImage, ExternalImageSource, ExternalSemaphore,
    ExternalSemaphoreSource, FormatInfo, ImageFlavor, ImageHandle, ImageImportInfo,
    ImportedHandle, InteropError, InteropResult, LevelLayout, StreamWrapper,
    get_image_format_info,
};

const API: InteropComputeApi = InteropComputeApi::Sycl;

/// `external_mem` returned by `import_external_memory`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SyclExternalMemory(pub u64);

/// `external_semaphore` returned by `import_external_semaphore`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SyclExternalSemaphore(pub u64);

/// Handles of an image mapped from external memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SyclImageHandles {
    /// `image_mem_handle`
    pub memory: u64,
    /// `unsampled_image_handle`
    pub unsampled: u64,
    /// `sampled_image_handle`, for sampled imports only
    pub sampled: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageCopyDirection {
    HostToImage,
    ImageToLinear,
}

/// Bridge to the embedder's SYCL implementation. Every queue argument is the
/// queue passed to [`set_global_sycl_queue`].
///
/// # Safety
/// * Memory, image and semaphore handles passed back in were produced by the same runtime
/// * Copies follow the same rules as [`ExternalBuffer`]
pub trait SyclRuntime: Send + Sync + 'static {
    fn device_uuid(&self, queue: SyclQueue) -> InteropResult<[u8; 16]>;
    fn device_name(&self, queue: SyclQueue) -> String;
    fn total_memory(&self, queue: SyclQueue) -> u64;
    fn max_allocation_size(&self, queue: SyclQueue) -> u64;
    /// Whether imports take ownership of the OS handle, which differs between implementations
    fn consumes_imported_handles(&self) -> bool;
    fn supports_external_semaphores(&self) -> bool;

    /// # Safety
    /// * `handle` must be an exported Vulkan allocation of `size` bytes
    unsafe fn import_external_memory(
        &self,
        queue: SyclQueue,
        handle: RawExternalHandle,
        handle_type: ExternalHandleType,
        size: u64,
    ) -> InteropResult<SyclExternalMemory>;
    /// # Safety
    /// * Nothing mapped from `memory` may be alive
    unsafe fn release_external_memory(&self, queue: SyclQueue, memory: SyclExternalMemory);
    /// # Safety
    /// * `size` must not exceed the imported size
    unsafe fn map_linear_memory(
        &self,
        queue: SyclQueue,
        memory: SyclExternalMemory,
        size: u64,
    ) -> InteropResult<u64>;
    /// # Safety
    /// * No pending work may use `ptr`
    unsafe fn unmap_linear_memory(&self, queue: SyclQueue, ptr: u64);
    /// # Safety
    /// * `info` must describe the image the memory was exported from
    unsafe fn map_image(
        &self,
        queue: SyclQueue,
        memory: SyclExternalMemory,
        info: &ImageImportInfo,
        format: &'static FormatInfo,
        flavor: ImageFlavor,
    ) -> InteropResult<SyclImageHandles>;
    /// # Safety
    /// * No pending work may use the image
    unsafe fn release_image(&self, queue: SyclQueue, image: SyclImageHandles);

    /// # Safety
    /// * `handle` must be an exported Vulkan semaphore of `kind`
    unsafe fn import_external_semaphore(
        &self,
        queue: SyclQueue,
        handle: RawExternalHandle,
        handle_type: ExternalHandleType,
        kind: SemaphoreKind,
    ) -> InteropResult<SyclExternalSemaphore>;
    /// # Safety
    /// * No pending work may use the semaphore
    unsafe fn release_external_semaphore(
        &self,
        queue: SyclQueue,
        semaphore: SyclExternalSemaphore,
    );
    /// `value` is `None` for binary semaphores.
    /// # Safety
    /// * Timeline values must increase strictly between signals
    unsafe fn signal_semaphore(
        &self,
        queue: SyclQueue,
        semaphore: SyclExternalSemaphore,
        value: Option<u64>,
    ) -> InteropResult<()>;
    /// # Safety
    /// * A matching signal must be submitted eventually
    unsafe fn wait_semaphore(
        &self,
        queue: SyclQueue,
        semaphore: SyclExternalSemaphore,
        value: Option<u64>,
    ) -> InteropResult<()>;

    /// # Safety
    /// * Both ranges must be valid for `len` bytes until the queue drains
    unsafe fn memcpy(
        &self,
        queue: SyclQueue,
        dst: *mut u8,
        src: *const u8,
        len: usize,
    ) -> InteropResult<()>;
    /// # Safety
    /// * `linear` must be valid for `layout.size` bytes until the queue drains
    unsafe fn copy_image(
        &self,
        queue: SyclQueue,
        image: SyclImageHandles,
        layout: &LevelLayout,
        linear: *mut u8,
        direction: ImageCopyDirection,
    ) -> InteropResult<()>;

    fn create_event(&self, queue: SyclQueue) -> InteropResult<SyclEvent>;
    /// # Safety
    /// * No pending command may reference the event
    unsafe fn destroy_event(&self, event: SyclEvent);
    /// Signals `event` once all prior work on the queue has finished
    /// (`ext_oneapi_submit_barrier`).
    fn submit_barrier(&self, queue: SyclQueue, event: SyclEvent) -> InteropResult<()>;
    fn wait(&self, queue: SyclQueue) -> InteropResult<()>;
    /// Whether all work submitted to the queue has finished
    fn is_idle(&self, queue: SyclQueue) -> InteropResult<bool>;
}

#[derive(Clone)]
struct Registration {
    runtime: Arc<dyn SyclRuntime>,
    queue: SyclQueue,
}

static REGISTRATION: RwLock<Option<Registration>> = RwLock::new(None);

/// Registers the queue all SYCL interop goes through. Replaces a previous registration.
pub fn set_global_sycl_queue(runtime: Arc<dyn SyclRuntime>, queue: SyclQueue) {
    log::info!("Registered SYCL queue {queue:?} for Vulkan interop");
    *REGISTRATION.write() = Some(Registration { runtime, queue });
}
/// Returns whether a queue was registered
pub fn clear_global_sycl_queue() -> bool {
    REGISTRATION.write().take().is_some()
}
pub fn is_sycl_queue_registered() -> bool {
    REGISTRATION.read().is_some()
}
pub fn global_sycl_queue() -> Option<SyclQueue> {
    REGISTRATION.read().as_ref().map(|r| r.queue)
}

fn registration() -> InteropResult<Registration> {
    REGISTRATION
        .read()
        .clone()
        .ok_or_else(|| {
            InteropError::backend_not_available(API, "no SYCL queue has been registered")
        })
}

/// Contexts still referenced by imported resources, so their queues stay usable
/// after the registration is cleared or replaced.
static LIVE_CONTEXTS: Mutex<Vec<Weak<SyclContext>>> = Mutex::new(Vec::new());

/// Looks up the runtime a stream belongs to: the runtime that imported resources
/// on that queue, else the registered one.
fn runtime_for(stream: StreamWrapper) -> InteropResult<(Arc<dyn SyclRuntime>, SyclQueue)> {
    let queue = stream.as_sycl()?;
    let live = LIVE_CONTEXTS
        .lock()
        .iter()
        .filter_map(Weak::upgrade)
        .find(|context| context.queue == queue);
    match live {
        Some(context) => Ok((context.runtime.clone(), queue)),
        None => Ok((registration()?.runtime, queue)),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Sycl;
impl ComputeBackend for Sycl {
    const API: InteropComputeApi = API;

    type Context = SyclContext;
    type Buffer = SyclBuffer;
    type Image = SyclImage;
    type Semaphore = SyclSemaphore;

    fn initialize() -> InteropResult<()> {
        registration().map(|_| ())
    }
    fn is_initialized() -> bool {
        is_sycl_queue_registered()
    }
    fn free() -> bool {
        clear_global_sycl_queue()
    }
    fn wait_for_completion(stream: StreamWrapper) -> InteropResult<()> {
        let (runtime, queue) = runtime_for(stream)?;
        runtime.wait(queue)
    }
    fn wait_for_completion_timeout(
        stream: StreamWrapper,
        timeout: Duration,
    ) -> InteropResult<bool> {
        let (runtime, queue) = runtime_for(stream)?;
        poll_until(timeout, || runtime.is_idle(queue))
    }
}

/// The registered queue, checked against a Vulkan device.
pub struct SyclContext {
    runtime: Arc<dyn SyclRuntime>,
    queue: SyclQueue,
    info: ComputeDeviceInfo,
}
impl SyclContext {
    pub fn queue(&self) -> SyclQueue {
        self.queue
    }
    /// The queue of `stream`, which must be a SYCL stream
    fn queue_for(&self, stream: StreamWrapper) -> InteropResult<SyclQueue> {
        stream.as_sycl()
    }
    fn settle(&self, handle: crate::ExportedHandle) -> ImportedHandle {
        handle.settle(self.runtime.consumes_imported_handles())
    }
    fn import(
        &self,
        source: &dyn crate::ExternalMemorySource,
    ) -> InteropResult<(SyclExternalMemory, ImportedHandle)> {
        let handle_type = ExternalHandleType::native();
        let handle = source.export_memory_handle(handle_type)?;
        let memory = unsafe {
            self.runtime.import_external_memory(
                self.queue,
                handle.raw(),
                handle_type,
                source.allocation_size(),
            )
        }?;
        Ok((memory, self.settle(handle)))
    }
}

impl DeviceContext<Sycl> for SyclContext {
    #[tracing::instrument(skip_all, fields(device = %identity.name))]
    fn new(identity: &DeviceIdentity) -> InteropResult<Arc<Self>> {
        let Registration { runtime, queue } = registration()?;
        let uuid = runtime.device_uuid(queue)?;
        if !identity.matches(&uuid, None) {
            return Err(InteropError::NoMatchingDevice { api: API });
        }
        let name = runtime.device_name(queue);
        log::info!("Using SYCL device {name} for Vulkan interop");
        let context = Arc::new(Self {
            info: ComputeDeviceInfo {
                api: API,
                name,
                uuid,
                total_memory: runtime.total_memory(queue),
                max_allocation_size: runtime.max_allocation_size(queue),
            },
            runtime,
            queue,
        });
        let mut live = LIVE_CONTEXTS.lock();
        live.retain(|context| context.strong_count() > 0);
        live.push(Arc::downgrade(&context));
        Ok(context)
    }
    fn device_info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    #[tracing::instrument(skip_all)]
    unsafe fn import_buffer(
        self: &Arc<Self>,
        source: &dyn ExternalBufferSource,
    ) -> InteropResult<SyclBuffer> {
        let size = source.buffer_size();
        check_import_size(size, self.info.max_allocation_size)?;
        let (memory, handle) = self.import(source)?;
        // The memory is released by the buffer's drop if mapping fails
        let mut buffer = SyclBuffer {
            memory,
            device_ptr: 0,
            size,
            handle,
            context: self.clone(),
        };
        buffer.device_ptr = unsafe { self.runtime.map_linear_memory(self.queue, memory, size) }?;
        Ok(buffer)
    }

    #[tracing::instrument(skip_all, fields(flavor = ?flavor))]
    unsafe fn import_image(
        self: &Arc<Self>,
        source: &dyn ExternalImageSource,
        flavor: ImageFlavor,
    ) -> InteropResult<SyclImage> {
        let info = source.image_info();
        let format = get_image_format_info(info.format);
        if !format.is_known() {
            return Err(InteropError::format_unsupported(info.format, API));
        }
        let (memory, handle) = self.import(source)?;
        let mapped = unsafe { self.runtime.map_image(self.queue, memory, &info, format, flavor) };
        match mapped {
            Ok(handles) => Ok(SyclImage {
                memory,
                handles,
                info,
                format,
                flavor,
                handle,
                context: self.clone(),
            }),
            Err(e) => {
                unsafe { self.runtime.release_external_memory(self.queue, memory) };
                Err(e)
            }
        }
    }

    #[tracing::instrument(skip_all)]
    unsafe fn import_semaphore(
        self: &Arc<Self>,
        source: &dyn ExternalSemaphoreSource,
    ) -> InteropResult<SyclSemaphore> {
        if !self.runtime.supports_external_semaphores() {
            return Err(InteropError::UnsupportedFeature(
                UnsupportedComputeApiFeature::ExternalSemaphores,
            ));
        }
        let kind = source.semaphore_kind();
        let handle_type = ExternalHandleType::native();
        let handle = source.export_semaphore_handle(handle_type)?;
        let semaphore = unsafe {
            self.runtime
                .import_external_semaphore(self.queue, handle.raw(), handle_type, kind)
        }?;
        Ok(SyclSemaphore {
            semaphore,
            kind,
            handle: self.settle(handle),
            context: self.clone(),
        })
    }

    /// SYCL queues belong to the embedder, so this hands out the registered one.
    fn create_stream(&self) -> InteropResult<StreamWrapper> {
        Ok(StreamWrapper::Sycl(self.queue))
    }
    unsafe fn destroy_stream(&self, stream: StreamWrapper) -> InteropResult<()> {
        stream.as_sycl().map(|_| ())
    }
    fn create_event(&self) -> InteropResult<ComputeEvent> {
        self.runtime.create_event(self.queue).map(ComputeEvent::Sycl)
    }
    unsafe fn destroy_event(&self, event: ComputeEvent) -> InteropResult<()> {
        let ComputeEvent::Sycl(event) = event else {
            return event.expect_api(API);
        };
        unsafe { self.runtime.destroy_event(event) };
        Ok(())
    }
}

fn submit_barrier(context: &SyclContext, event: Option<&ComputeEvent>) -> InteropResult<()> {
    match event {
        None => Ok(()),
        Some(ComputeEvent::Sycl(event)) => context.runtime.submit_barrier(context.queue, *event),
        Some(other) => other.expect_api(API),
    }
}

pub struct SyclBuffer {
    memory: SyclExternalMemory,
    device_ptr: u64,
    size: u64,
    handle: ImportedHandle,
    context: Arc<SyclContext>,
}
impl SyclBuffer {
    fn check_span(&self, len: usize) -> InteropResult<()> {
        if len as u64 > self.size {
            return Err(InteropError::CopyOutOfBounds {
                requested: len as u64,
                available: self.size,
            });
        }
        Ok(())
    }
}
impl ExternalBuffer<Sycl> for SyclBuffer {
    fn device_ptr(&self) -> u64 {
        self.device_ptr
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn was_handle_consumed(&self) -> bool {
        self.handle.was_handle_consumed()
    }
    unsafe fn copy_to_host_async(
        &self,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        let queue = self.context.queue_for(stream)?;
        self.check_span(dst.len())?;
        let src = self.device_ptr as *const u8;
        unsafe { self.context.runtime.memcpy(queue, dst.as_mut_ptr(), src, dst.len()) }
    }
    unsafe fn copy_from_host_async(&self, src: &[u8], stream: StreamWrapper) -> InteropResult<()> {
        let queue = self.context.queue_for(stream)?;
        self.check_span(src.len())?;
        let dst = self.device_ptr as *mut u8;
        unsafe { self.context.runtime.memcpy(queue, dst, src.as_ptr(), src.len()) }
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let queue = self.context.queue_for(stream)?;
        unsafe {
            self.context.runtime.memcpy(
                queue,
                dst as *mut u8,
                self.device_ptr as *const u8,
                self.size as usize,
            )
        }?;
        submit_barrier(&self.context, signal)
    }
}
impl Drop for SyclBuffer {
    fn drop(&mut self) {
        let context = &self.context;
        unsafe {
            if self.device_ptr != 0 {
                context.runtime.unmap_linear_memory(context.queue, self.device_ptr);
            }
            context.runtime.release_external_memory(context.queue, self.memory);
        }
    }
}

pub struct SyclImage {
    memory: SyclExternalMemory,
    handles: SyclImageHandles,
    info: ImageImportInfo,
    format: &'static FormatInfo,
    flavor: ImageFlavor,
    handle: ImportedHandle,
    context: Arc<SyclContext>,
}
impl SyclImage {
    fn copy(
        &self,
        stream: StreamWrapper,
        level: u32,
        linear: *mut u8,
        direction: ImageCopyDirection,
    ) -> InteropResult<()> {
        let queue = self.context.queue_for(stream)?;
        let layout = level_layout(&self.info, self.format, level)?;
        unsafe {
            self.context
                .runtime
                .copy_image(queue, self.handles, &layout, linear, direction)
        }
    }
}
impl ExternalImage<Sycl> for SyclImage {
    fn format_info(&self) -> &'static FormatInfo {
        self.format
    }
    fn import_info(&self) -> &ImageImportInfo {
        &self.info
    }
    fn flavor(&self) -> ImageFlavor {
        self.flavor
    }
    fn was_handle_consumed(&self) -> bool {
        self.handle.was_handle_consumed()
    }
    fn surface_object(&self, level: u32) -> InteropResult<ImageHandle> {
        level_layout(&self.info, self.format, level)?;
        Ok(ImageHandle::Sycl(self.handles.unsampled))
    }
    fn texture_object(&self) -> Option<ImageHandle> {
        self.handles.sampled.map(ImageHandle::Sycl)
    }
    fn mipmapped_array_level(&self, level: u32) -> InteropResult<ImageHandle> {
        level_layout(&self.info, self.format, level)?;
        Ok(ImageHandle::Sycl(self.handles.memory))
    }
    unsafe fn copy_to_host_async(
        &self,
        level: u32,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        check_host_span(&level_layout(&self.info, self.format, level)?, dst.len())?;
        self.copy(stream, level, dst.as_mut_ptr(), ImageCopyDirection::ImageToLinear)
    }
    unsafe fn copy_from_host_async(
        &self,
        level: u32,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        check_host_span(&level_layout(&self.info, self.format, level)?, src.len())?;
        self.copy(
            stream,
            level,
            src.as_ptr().cast_mut(),
            ImageCopyDirection::HostToImage,
        )
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        level: u32,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        self.copy(stream, level, dst as *mut u8, ImageCopyDirection::ImageToLinear)?;
        submit_barrier(&self.context, signal)
    }
}
impl Drop for SyclImage {
    fn drop(&mut self) {
        let context = &self.context;
        unsafe {
            context.runtime.release_image(context.queue, self.handles);
            context.runtime.release_external_memory(context.queue, self.memory);
        }
    }
}

pub struct SyclSemaphore {
    semaphore: SyclExternalSemaphore,
    kind: SemaphoreKind,
    handle: ImportedHandle,
    context: Arc<SyclContext>,
}
impl SyclSemaphore {
    fn value(&self, value: u64) -> Option<u64> {
        (self.kind == SemaphoreKind::Timeline).then_some(value)
    }
}
impl ExternalSemaphore<Sycl> for SyclSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }
    fn was_handle_consumed(&self) -> bool {
        self.handle.was_handle_consumed()
    }
    unsafe fn signal_async(&self, stream: StreamWrapper, value: u64) -> InteropResult<()> {
        let queue = self.context.queue_for(stream)?;
        let runtime = &self.context.runtime;
        unsafe { runtime.signal_semaphore(queue, self.semaphore, self.value(value)) }
    }
    unsafe fn wait_async(
        &self,
        stream: StreamWrapper,
        value: u64,
        done: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let queue = self.context.queue_for(stream)?;
        let runtime = &self.context.runtime;
        unsafe { runtime.wait_semaphore(queue, self.semaphore, self.value(value)) }?;
        submit_barrier(&self.context, done)
    }
}
impl Drop for SyclSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.context
                .runtime
                .release_external_semaphore(self.context.queue, self.semaphore)
        };
    }
}
