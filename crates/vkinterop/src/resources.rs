/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! Generic implementations of the erased resource traits. Fields are declared
//! imports first so the compute side releases its view before the Vulkan source
//! can go away.

use std::sync::Arc;

use hal::ash::vk;
use hal::{
    ComputeBackend, ComputeEvent, DeviceContext, ExternalBuffer, ExternalBufferSource,
    ExternalImage, ExternalImageSource, ExternalSemaphore, ExternalSemaphoreSource, FormatInfo,
    ImageFlavor, ImageHandle, ImageImportInfo, InteropError, InteropResult, StreamWrapper,
};
use types::{InteropComputeApi, SemaphoreKind};

use crate::api::{
    BufferVkComputeApiExternalMemory, ImageVkComputeApiExternalMemory,
    SemaphoreVkComputeApiInterop, UnsampledImageVkComputeApiExternalMemory,
};
use crate::error::route;
use crate::sync::{SemaphoreState, SemaphoreTracker, Side};

pub(crate) struct InteropBuffer<B: ComputeBackend> {
    inner: B::Buffer,
    _source: Arc<dyn ExternalBufferSource>,
}
impl<B: ComputeBackend> InteropBuffer<B> {
    pub fn import(
        context: &Arc<B::Context>,
        source: Arc<dyn ExternalBufferSource>,
    ) -> InteropResult<Self> {
        // SAFETY: the source is kept alive for the lifetime of the import
        let inner = route(B::API, "import_buffer", unsafe {
            context.import_buffer(&*source)
        })?;
        Ok(Self {
            inner,
            _source: source,
        })
    }
}
impl<B: ComputeBackend> BufferVkComputeApiExternalMemory for InteropBuffer<B> {
    fn compute_api(&self) -> InteropComputeApi {
        B::API
    }
    fn device_ptr(&self) -> u64 {
        self.inner.device_ptr()
    }
    fn size(&self) -> u64 {
        self.inner.size()
    }
    fn was_handle_consumed(&self) -> bool {
        self.inner.was_handle_consumed()
    }
    unsafe fn copy_to_host_ptr_async(
        &self,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        route(B::API, "copy_to_host_ptr_async", unsafe {
            self.inner.copy_to_host_async(dst, stream)
        })
    }
    unsafe fn copy_from_host_ptr_async(
        &self,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        route(B::API, "copy_from_host_ptr_async", unsafe {
            self.inner.copy_from_host_async(src, stream)
        })
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        route(B::API, "copy_to_device_ptr_async", unsafe {
            self.inner.copy_to_device_ptr_async(dst, stream, signal)
        })
    }
}

pub(crate) struct InteropImage<B: ComputeBackend> {
    inner: B::Image,
    _source: Arc<dyn ExternalImageSource>,
}
impl<B: ComputeBackend> InteropImage<B> {
    pub fn import(
        context: &Arc<B::Context>,
        source: Arc<dyn ExternalImageSource>,
        flavor: ImageFlavor,
    ) -> InteropResult<Self> {
        // SAFETY: the source is kept alive for the lifetime of the import and
        // images exported by this crate are left in GENERAL layout
        let inner = route(B::API, "import_image", unsafe {
            context.import_image(&*source, flavor)
        })?;
        Ok(Self {
            inner,
            _source: source,
        })
    }
}
impl<B: ComputeBackend> UnsampledImageVkComputeApiExternalMemory for InteropImage<B> {
    fn compute_api(&self) -> InteropComputeApi {
        B::API
    }
    fn format_info(&self) -> &'static FormatInfo {
        self.inner.format_info()
    }
    fn import_info(&self) -> &ImageImportInfo {
        self.inner.import_info()
    }
    fn was_handle_consumed(&self) -> bool {
        self.inner.was_handle_consumed()
    }
    fn surface_object(&self, level: u32) -> InteropResult<ImageHandle> {
        route(B::API, "surface_object", self.inner.surface_object(level))
    }
    fn get_mipmapped_array_level(&self, level: u32) -> InteropResult<ImageHandle> {
        route(
            B::API,
            "get_mipmapped_array_level",
            self.inner.mipmapped_array_level(level),
        )
    }
    unsafe fn copy_to_host_ptr_async(
        &self,
        level: u32,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        route(B::API, "copy_to_host_ptr_async", unsafe {
            self.inner.copy_to_host_async(level, dst, stream)
        })
    }
    unsafe fn copy_from_host_ptr_async(
        &self,
        level: u32,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        route(B::API, "copy_from_host_ptr_async", unsafe {
            self.inner.copy_from_host_async(level, src, stream)
        })
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        level: u32,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        route(B::API, "copy_to_device_ptr_async", unsafe {
            self.inner.copy_to_device_ptr_async(level, dst, stream, signal)
        })
    }
}

/// Sampled import. The texture handle is resolved once at import time.
pub(crate) struct SampledInteropImage<B: ComputeBackend> {
    image: InteropImage<B>,
    texture: ImageHandle,
}
impl<B: ComputeBackend> SampledInteropImage<B> {
    pub fn import(
        context: &Arc<B::Context>,
        source: Arc<dyn ExternalImageSource>,
    ) -> InteropResult<Self> {
        let format = source.image_info().format;
        let image = InteropImage::<B>::import(context, source, ImageFlavor::Sampled)?;
        let texture = route(
            B::API,
            "texture_object",
            image
                .inner
                .texture_object()
                .ok_or_else(|| InteropError::format_unsupported(format, B::API)),
        )?;
        Ok(Self { image, texture })
    }
}
impl<B: ComputeBackend> UnsampledImageVkComputeApiExternalMemory for SampledInteropImage<B> {
    fn compute_api(&self) -> InteropComputeApi {
        B::API
    }
    fn format_info(&self) -> &'static FormatInfo {
        self.image.format_info()
    }
    fn import_info(&self) -> &ImageImportInfo {
        self.image.import_info()
    }
    fn was_handle_consumed(&self) -> bool {
        self.image.was_handle_consumed()
    }
    fn surface_object(&self, level: u32) -> InteropResult<ImageHandle> {
        self.image.surface_object(level)
    }
    fn get_mipmapped_array_level(&self, level: u32) -> InteropResult<ImageHandle> {
        self.image.get_mipmapped_array_level(level)
    }
    unsafe fn copy_to_host_ptr_async(
        &self,
        level: u32,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        unsafe { self.image.copy_to_host_ptr_async(level, dst, stream) }
    }
    unsafe fn copy_from_host_ptr_async(
        &self,
        level: u32,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        unsafe { self.image.copy_from_host_ptr_async(level, src, stream) }
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        level: u32,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        unsafe {
            self.image
                .copy_to_device_ptr_async(level, dst, stream, signal)
        }
    }
}
impl<B: ComputeBackend> ImageVkComputeApiExternalMemory for SampledInteropImage<B> {
    fn texture_object(&self) -> ImageHandle {
        self.texture
    }
}

pub(crate) struct InteropSemaphore<B: ComputeBackend> {
    inner: B::Semaphore,
    tracker: SemaphoreTracker,
    source: Arc<dyn ExternalSemaphoreSource>,
}
impl<B: ComputeBackend> InteropSemaphore<B> {
    pub fn import(
        context: &Arc<B::Context>,
        source: Arc<dyn ExternalSemaphoreSource>,
        initial_value: u64,
    ) -> InteropResult<Self> {
        // SAFETY: the source is kept alive for the lifetime of the import
        let inner = route(B::API, "import_semaphore", unsafe {
            context.import_semaphore(&*source)
        })?;
        let initial_value = source.counter_value().unwrap_or(initial_value);
        Ok(Self {
            inner,
            tracker: SemaphoreTracker::new(source.semaphore_kind(), initial_value),
            source,
        })
    }
    fn refresh(&self) {
        if let Some(value) = self.source.counter_value() {
            self.tracker.observe(value);
        }
    }
}
impl<B: ComputeBackend> SemaphoreVkComputeApiInterop for InteropSemaphore<B> {
    fn compute_api(&self) -> InteropComputeApi {
        B::API
    }
    fn kind(&self) -> SemaphoreKind {
        self.inner.kind()
    }
    fn was_handle_consumed(&self) -> bool {
        self.inner.was_handle_consumed()
    }
    fn vk_semaphore(&self) -> vk::Semaphore {
        self.source.vk_semaphore()
    }
    fn state(&self) -> SemaphoreState {
        self.refresh();
        self.tracker.state()
    }
    fn next_signal_value(&self) -> u64 {
        self.refresh();
        self.tracker.next_value()
    }
    fn vulkan_signal(&self, value: u64) -> InteropResult<()> {
        route(
            B::API,
            "vulkan_signal",
            self.tracker.schedule_signal(Side::Vulkan, value),
        )
    }
    fn vulkan_wait(&self, value: u64) {
        self.refresh();
        self.tracker.schedule_wait(Side::Vulkan, value);
    }
    unsafe fn signal_semaphore_compute_api(
        &self,
        stream: StreamWrapper,
        value: u64,
    ) -> InteropResult<()> {
        let result = self.tracker.signal_with(Side::Compute, value, || {
            // SAFETY: the tracker rejects non-increasing values before enqueuing
            unsafe { self.inner.signal_async(stream, value) }
        });
        route(B::API, "signal_semaphore_compute_api", result)
    }
    unsafe fn wait_semaphore_compute_api(
        &self,
        stream: StreamWrapper,
        value: u64,
        done: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        self.refresh();
        self.tracker.schedule_wait(Side::Compute, value);
        route(B::API, "wait_semaphore_compute_api", unsafe {
            self.inner.wait_async(stream, value, done)
        })
    }
}
