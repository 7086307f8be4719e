/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
mod ffi;

use std::cell::Cell;
use std::ffi::{CStr, c_char};
use std::ptr::{null, null_mut};
use std::sync::Arc;
use std::time::Duration;

use scopeguard::defer;
use types::{
    ChannelCategory, ExternalHandleType, ImageDimensionality, InteropComputeApi, SemaphoreKind,
    UnsupportedComputeApiFeature,
};

pub use ffi::HipFunctions;
use ffi::*;

use crate::device::find_matching_device;
use crate::handle::{RawExternalHandle, check_import_size, driver_consumes_handle};
use crate::image::{HipArray, check_host_span, level_layout};
use crate::loader::{TableSlot, open_library};
use crate::stream::{HipEvent, HipStream, poll_until};
use crate::{
    ComputeBackend, ComputeDeviceInfo, ComputeEvent, DeviceContext, DeviceIdentity,
    ExternalBuffer, ExternalBufferSource, ExternalImage, ExternalImageSource,
    ExternalMemorySource, ExternalSemaphore, ExternalSemaphoreSource, FormatInfo, ImageFlavor,
    ImageHandle, ImageImportInfo, ImportedHandle, InteropError, InteropResult, StreamWrapper,
    get_image_format_info,
};

const API: InteropComputeApi = InteropComputeApi::Hip;
pub const LIBRARY_ENV: &str = "VKINTEROP_HIP_LIBRARY";
const LIBRARY_NAMES: &[&str] = if cfg!(windows) {
    &["amdhip64.dll", "amdhip64_6.dll"]
} else {
    &["libamdhip64.so", "libamdhip64.so.6"]
};

static FUNCTIONS: TableSlot<HipFunctions> = TableSlot::new(API);

pub fn function_table() -> InteropResult<Arc<HipFunctions>> {
    FUNCTIONS.get_or_init(|| {
        let library = open_library(API, LIBRARY_ENV, LIBRARY_NAMES)?;
        let functions = unsafe { HipFunctions::load(library, API) }?;
        check(&functions, unsafe { (functions.hipInit)(0) }, "hipInit")
            .map_err(|e| InteropError::backend_not_available(API, e.to_string()))?;
        Ok(functions)
    })
}

fn check(functions: &HipFunctions, code: hipError_t, call: &'static str) -> InteropResult<()> {
    if code == hipSuccess {
        return Ok(());
    }
    let message = unsafe { (functions.hipGetErrorString)(code) };
    let message = if message.is_null() {
        "unrecognized error code".to_owned()
    } else {
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    };
    Err(InteropError::Backend {
        api: API,
        call,
        code: code as i64,
        message,
    })
}

fn external_handle(raw: RawExternalHandle) -> ExternalHandle {
    match raw {
        RawExternalHandle::Fd(fd) => {
            let mut handle = ExternalHandle {
                win32: Win32Handle {
                    handle: null_mut(),
                    name: null(),
                },
            };
            handle.fd = fd;
            handle
        }
        RawExternalHandle::Win32(h) => ExternalHandle {
            win32: Win32Handle {
                handle: h,
                name: null(),
            },
        },
    }
}

fn memory_handle_type(ty: ExternalHandleType) -> i32 {
    match ty {
        ExternalHandleType::OpaqueFd => hipExternalMemoryHandleTypeOpaqueFd,
        ExternalHandleType::OpaqueWin32 => hipExternalMemoryHandleTypeOpaqueWin32,
        ExternalHandleType::OpaqueWin32Kmt => hipExternalMemoryHandleTypeOpaqueWin32Kmt,
    }
}

fn semaphore_handle_type(kind: SemaphoreKind, ty: ExternalHandleType) -> InteropResult<i32> {
    use ExternalHandleType as H;
    Ok(match (kind, ty) {
        (SemaphoreKind::Binary, H::OpaqueFd) => hipExternalSemaphoreHandleTypeOpaqueFd,
        (SemaphoreKind::Binary, H::OpaqueWin32) => hipExternalSemaphoreHandleTypeOpaqueWin32,
        (SemaphoreKind::Binary, H::OpaqueWin32Kmt) => hipExternalSemaphoreHandleTypeOpaqueWin32Kmt,
        (SemaphoreKind::Timeline, H::OpaqueFd) => hipExternalSemaphoreHandleTypeTimelineSemaphoreFd,
        (SemaphoreKind::Timeline, H::OpaqueWin32) => {
            hipExternalSemaphoreHandleTypeTimelineSemaphoreWin32
        }
        (SemaphoreKind::Timeline, H::OpaqueWin32Kmt) => {
            return Err(InteropError::UnsupportedFeature(
                UnsupportedComputeApiFeature::TimelineSemaphores,
            ));
        }
    })
}

/// Channel descriptor for a registry entry: one bit width per used channel.
pub fn channel_format(format: &FormatInfo) -> Option<hipChannelFormatDesc> {
    use ChannelCategory as C;
    let kind = match format.category {
        C::Uint | C::Unorm => hipChannelFormatKindUnsigned,
        C::Int | C::Snorm => hipChannelFormatKindSigned,
        C::Float => hipChannelFormatKindFloat,
        C::Depth if format.channel_size_in_bytes == 2 => hipChannelFormatKindUnsigned,
        C::Depth => hipChannelFormatKindFloat,
        C::Unknown => return None,
    };
    let bits = (format.channel_size_in_bytes * 8) as i32;
    let width = |channel: u32| if channel < format.channel_count { bits } else { 0 };
    Some(hipChannelFormatDesc {
        x: width(0),
        y: width(1),
        z: width(2),
        w: width(3),
        f: kind,
    })
}

fn mipmapped_array_desc(
    info: &ImageImportInfo,
    format: &FormatInfo,
) -> InteropResult<hipExternalMemoryMipmappedArrayDesc> {
    let format_desc =
        channel_format(format).ok_or_else(|| InteropError::format_unsupported(info.format, API))?;
    let mut flags = hipArraySurfaceLoadStore;
    if info.is_layered() {
        flags |= hipArrayLayered;
    }
    if info.dimensionality == ImageDimensionality::Cube {
        flags |= hipArrayCubemap;
        if info.array_layers > 6 {
            flags |= hipArrayLayered;
        }
    }
    let height = match info.dimensionality {
        ImageDimensionality::D1 => 0,
        _ => info.extent.height as usize,
    };
    Ok(hipExternalMemoryMipmappedArrayDesc {
        offset: 0,
        formatDesc: format_desc,
        extent: hipExtent {
            width: info.extent.width as usize,
            height,
            depth: info.array_depth() as usize,
        },
        flags,
        numLevels: info.mip_levels,
    })
}

#[derive(Clone, Copy, Debug)]
pub struct Hip;
impl ComputeBackend for Hip {
    const API: InteropComputeApi = API;

    type Context = HipContext;
    type Buffer = HipBuffer;
    type Image = HipImage;
    type Semaphore = HipSemaphore;

    fn initialize() -> InteropResult<()> {
        function_table().map(|_| ())
    }
    fn is_initialized() -> bool {
        FUNCTIONS.is_initialized()
    }
    fn free() -> bool {
        FUNCTIONS.free()
    }
    fn wait_for_completion(stream: StreamWrapper) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        let functions = FUNCTIONS.get()?;
        check(
            &functions,
            unsafe { (functions.hipStreamSynchronize)(stream.0) },
            "hipStreamSynchronize",
        )
    }
    fn wait_for_completion_timeout(
        stream: StreamWrapper,
        timeout: Duration,
    ) -> InteropResult<bool> {
        let stream = stream.as_hip()?;
        let functions = FUNCTIONS.get()?;
        poll_until(timeout, || {
            match unsafe { (functions.hipStreamQuery)(stream.0) } {
                hipSuccess => Ok(true),
                hipErrorNotReady => Ok(false),
                code => check(&functions, code, "hipStreamQuery").map(|_| false),
            }
        })
    }
}

/// A HIP device matching a Vulkan device. HIP has no context objects, so the
/// device is made current before every call.
pub struct HipContext {
    functions: Arc<HipFunctions>,
    device: hipDevice_t,
    info: ComputeDeviceInfo,
}

impl HipContext {
    fn bind(&self) -> InteropResult<()> {
        self.check(unsafe { (self.functions.hipSetDevice)(self.device) }, "hipSetDevice")
    }
    fn check(&self, code: hipError_t, call: &'static str) -> InteropResult<()> {
        check(&self.functions, code, call)
    }
    pub fn functions(&self) -> &HipFunctions {
        &self.functions
    }
    pub fn device(&self) -> i32 {
        self.device
    }
    fn import_memory(
        &self,
        source: &dyn ExternalMemorySource,
    ) -> InteropResult<(hipExternalMemory_t, ImportedHandle)> {
        let handle_type = ExternalHandleType::native();
        let handle = source.export_memory_handle(handle_type)?;
        let desc = hipExternalMemoryHandleDesc {
            type_: memory_handle_type(handle_type),
            handle: external_handle(handle.raw()),
            size: source.allocation_size(),
            flags: if source.is_dedicated() {
                hipExternalMemoryDedicated
            } else {
                0
            },
            reserved: [0; 16],
        };
        let mut memory = null_mut();
        let code = unsafe { (self.functions.hipImportExternalMemory)(&mut memory, &desc) };
        if code != hipSuccess {
            log::error!("hipImportExternalMemory failed with code {code}");
            return Err(InteropError::MemoryImportFailed {
                api: API,
                code: code as i64,
            });
        }
        Ok((memory, handle.settle(driver_consumes_handle(handle_type))))
    }
}

impl DeviceContext<Hip> for HipContext {
    #[tracing::instrument(skip_all, fields(device = %identity.name))]
    fn new(identity: &DeviceIdentity) -> InteropResult<Arc<Self>> {
        let functions = function_table()?;
        let f = &*functions;
        let mut count = 0;
        check(f, unsafe { (f.hipGetDeviceCount)(&mut count) }, "hipGetDeviceCount")?;
        let mut candidates = Vec::with_capacity(count.max(0) as usize);
        for ordinal in 0..count {
            let mut device = 0;
            check(f, unsafe { (f.hipDeviceGet)(&mut device, ordinal) }, "hipDeviceGet")?;
            let mut uuid = hipUUID { bytes: [0; 16] };
            check(f, unsafe { (f.hipDeviceGetUuid)(&mut uuid, device) }, "hipDeviceGetUuid")?;
            candidates.push((device, uuid.bytes.map(|b| b as u8), None));
        }
        let device = find_matching_device(identity, API, candidates)?;
        let mut name = [0 as c_char; 256];
        check(
            f,
            unsafe { (f.hipDeviceGetName)(name.as_mut_ptr(), name.len() as i32, device) },
            "hipDeviceGetName",
        )?;
        let name = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let mut total_memory = 0usize;
        check(
            f,
            unsafe { (f.hipDeviceTotalMem)(&mut total_memory, device) },
            "hipDeviceTotalMem",
        )?;
        log::info!("Using HIP device {device} ({name}) for Vulkan interop");
        Ok(Arc::new(Self {
            info: ComputeDeviceInfo {
                api: API,
                name,
                uuid: identity.uuid,
                total_memory: total_memory as u64,
                max_allocation_size: total_memory as u64,
            },
            functions,
            device,
        }))
    }
    fn device_info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    #[tracing::instrument(skip_all)]
    unsafe fn import_buffer(
        self: &Arc<Self>,
        source: &dyn ExternalBufferSource,
    ) -> InteropResult<HipBuffer> {
        let size = source.buffer_size();
        check_import_size(size, self.info.max_allocation_size)?;
        self.bind()?;
        let (memory, handle) = self.import_memory(source)?;
        let err = Cell::new(true);
        defer! {
            if err.get() {
                unsafe { (self.functions.hipDestroyExternalMemory)(memory) };
            }
        }
        let desc = hipExternalMemoryBufferDesc {
            offset: 0,
            size,
            flags: 0,
            reserved: [0; 16],
        };
        let mut device_ptr = null_mut();
        self.check(
            unsafe {
                (self.functions.hipExternalMemoryGetMappedBuffer)(&mut device_ptr, memory, &desc)
            },
            "hipExternalMemoryGetMappedBuffer",
        )?;
        err.set(false);
        Ok(HipBuffer {
            memory,
            device_ptr,
            size,
            handle,
            context: self.clone(),
        })
    }

    #[tracing::instrument(skip_all, fields(flavor = ?flavor))]
    unsafe fn import_image(
        self: &Arc<Self>,
        source: &dyn ExternalImageSource,
        flavor: ImageFlavor,
    ) -> InteropResult<HipImage> {
        let info = source.image_info();
        let format = get_image_format_info(info.format);
        let desc = mipmapped_array_desc(&info, format)?;
        self.bind()?;
        let (memory, handle) = self.import_memory(source)?;
        let mut image = HipImage {
            memory,
            mipmapped_array: null_mut(),
            levels: Vec::new(),
            surfaces: Vec::new(),
            texture: None,
            info,
            format,
            flavor,
            handle,
            context: self.clone(),
        };
        self.check(
            unsafe {
                (self.functions.hipExternalMemoryGetMappedMipmappedArray)(
                    &mut image.mipmapped_array,
                    memory,
                    &desc,
                )
            },
            "hipExternalMemoryGetMappedMipmappedArray",
        )?;
        for level in 0..info.mip_levels {
            let mut array = null_mut();
            self.check(
                unsafe {
                    (self.functions.hipGetMipmappedArrayLevel)(
                        &mut array,
                        image.mipmapped_array,
                        level,
                    )
                },
                "hipGetMipmappedArrayLevel",
            )?;
            image.levels.push(array);
            let resource = hipResourceDesc::array(array);
            let mut surface = 0;
            self.check(
                unsafe { (self.functions.hipCreateSurfaceObject)(&mut surface, &resource) },
                "hipCreateSurfaceObject",
            )?;
            image.surfaces.push(surface);
        }
        if flavor == ImageFlavor::Sampled {
            let integer = format.category.is_integer();
            let filter = if integer || format.is_depth() {
                hipFilterModePoint
            } else {
                hipFilterModeLinear
            };
            let texture_desc = hipTextureDesc {
                addressMode: [hipAddressModeClamp; 3],
                filterMode: filter,
                readMode: if format.category.is_normalized() {
                    hipReadModeNormalizedFloat
                } else {
                    hipReadModeElementType
                },
                normalizedCoords: 1,
                mipmapFilterMode: filter,
                maxMipmapLevelClamp: info.mip_levels.saturating_sub(1) as f32,
                ..Default::default()
            };
            let resource = hipResourceDesc::mipmapped_array(image.mipmapped_array);
            let mut texture = 0;
            self.check(
                unsafe {
                    (self.functions.hipCreateTextureObject)(
                        &mut texture,
                        &resource,
                        &texture_desc,
                        null(),
                    )
                },
                "hipCreateTextureObject",
            )?;
            image.texture = Some(texture);
        }
        Ok(image)
    }

    #[tracing::instrument(skip_all)]
    unsafe fn import_semaphore(
        self: &Arc<Self>,
        source: &dyn ExternalSemaphoreSource,
    ) -> InteropResult<HipSemaphore> {
        let kind = source.semaphore_kind();
        let handle_type = ExternalHandleType::native();
        let type_ = semaphore_handle_type(kind, handle_type)?;
        self.bind()?;
        let handle = source.export_semaphore_handle(handle_type)?;
        let desc = hipExternalSemaphoreHandleDesc {
            type_,
            handle: external_handle(handle.raw()),
            flags: 0,
            reserved: [0; 16],
        };
        let mut semaphore = null_mut();
        let code = unsafe { (self.functions.hipImportExternalSemaphore)(&mut semaphore, &desc) };
        if code != hipSuccess {
            log::error!("hipImportExternalSemaphore failed with code {code}");
            return Err(InteropError::SemaphoreImportFailed {
                api: API,
                code: code as i64,
            });
        }
        Ok(HipSemaphore {
            semaphore,
            kind,
            handle: handle.settle(driver_consumes_handle(handle_type)),
            context: self.clone(),
        })
    }

    fn create_stream(&self) -> InteropResult<StreamWrapper> {
        self.bind()?;
        let mut stream = null_mut();
        self.check(
            unsafe { (self.functions.hipStreamCreateWithFlags)(&mut stream, hipStreamNonBlocking) },
            "hipStreamCreateWithFlags",
        )?;
        Ok(StreamWrapper::Hip(HipStream(stream)))
    }
    unsafe fn destroy_stream(&self, stream: StreamWrapper) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        self.check(
            unsafe { (self.functions.hipStreamDestroy)(stream.0) },
            "hipStreamDestroy",
        )
    }
    fn create_event(&self) -> InteropResult<ComputeEvent> {
        self.bind()?;
        let mut event = null_mut();
        self.check(
            unsafe { (self.functions.hipEventCreateWithFlags)(&mut event, hipEventDisableTiming) },
            "hipEventCreateWithFlags",
        )?;
        Ok(ComputeEvent::Hip(HipEvent(event)))
    }
    unsafe fn destroy_event(&self, event: ComputeEvent) -> InteropResult<()> {
        let ComputeEvent::Hip(event) = event else {
            return event.expect_api(API);
        };
        self.check(
            unsafe { (self.functions.hipEventDestroy)(event.0) },
            "hipEventDestroy",
        )
    }
}

fn record_event(
    context: &HipContext,
    event: Option<&ComputeEvent>,
    stream: HipStream,
) -> InteropResult<()> {
    match event {
        None => Ok(()),
        Some(ComputeEvent::Hip(event)) => context.check(
            unsafe { (context.functions.hipEventRecord)(event.0, stream.0) },
            "hipEventRecord",
        ),
        Some(other) => other.expect_api(API),
    }
}

pub struct HipBuffer {
    memory: hipExternalMemory_t,
    device_ptr: hipDeviceptr_t,
    size: u64,
    handle: ImportedHandle,
    context: Arc<HipContext>,
}
unsafe impl Send for HipBuffer {}
unsafe impl Sync for HipBuffer {}
impl HipBuffer {
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
impl ExternalBuffer<Hip> for HipBuffer {
    fn device_ptr(&self) -> u64 {
        self.device_ptr as u64
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
        let stream = stream.as_hip()?;
        self.check_span(dst.len())?;
        self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.hipMemcpyDtoHAsync)(
                    dst.as_mut_ptr().cast(),
                    self.device_ptr,
                    dst.len(),
                    stream.0,
                )
            },
            "hipMemcpyDtoHAsync",
        )
    }
    unsafe fn copy_from_host_async(&self, src: &[u8], stream: StreamWrapper) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        self.check_span(src.len())?;
        self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.hipMemcpyHtoDAsync)(
                    self.device_ptr,
                    src.as_ptr().cast_mut().cast(),
                    src.len(),
                    stream.0,
                )
            },
            "hipMemcpyHtoDAsync",
        )
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.hipMemcpyDtoDAsync)(
                    dst as hipDeviceptr_t,
                    self.device_ptr,
                    self.size as usize,
                    stream.0,
                )
            },
            "hipMemcpyDtoDAsync",
        )?;
        record_event(&self.context, signal, stream)
    }
}
impl Drop for HipBuffer {
    fn drop(&mut self) {
        let functions = &self.context.functions;
        unsafe {
            (functions.hipFree)(self.device_ptr);
            (functions.hipDestroyExternalMemory)(self.memory);
        }
    }
}

pub struct HipImage {
    memory: hipExternalMemory_t,
    mipmapped_array: hipMipmappedArray_t,
    levels: Vec<hipArray_t>,
    surfaces: Vec<hipSurfaceObject_t>,
    texture: Option<hipTextureObject_t>,
    info: ImageImportInfo,
    format: &'static FormatInfo,
    flavor: ImageFlavor,
    handle: ImportedHandle,
    context: Arc<HipContext>,
}
unsafe impl Send for HipImage {}
unsafe impl Sync for HipImage {}
impl HipImage {
    /// `linear` is a host or device pointer to tightly packed level data
    fn copy_level(
        &self,
        level: u32,
        linear: *mut u8,
        kind: i32,
        stream: HipStream,
    ) -> InteropResult<()> {
        let layout = level_layout(&self.info, self.format, level)?;
        let array = self.levels[level as usize];
        let pitched = hipPitchedPtr {
            ptr: linear.cast(),
            pitch: layout.row_pitch as usize,
            xsize: layout.extent.width as usize,
            ysize: layout.extent.height as usize,
        };
        let empty = hipPitchedPtr {
            ptr: null_mut(),
            pitch: 0,
            xsize: 0,
            ysize: 0,
        };
        let to_array = kind == hipMemcpyHostToDevice;
        let params = hipMemcpy3DParms {
            srcArray: if to_array { null_mut() } else { array },
            srcPos: hipPos::default(),
            srcPtr: if to_array { pitched } else { empty },
            dstArray: if to_array { array } else { null_mut() },
            dstPos: hipPos::default(),
            dstPtr: if to_array { empty } else { pitched },
            extent: hipExtent {
                width: layout.extent.width as usize,
                height: layout.extent.height as usize,
                depth: (layout.extent.depth * layout.layers) as usize,
            },
            kind,
        };
        self.context.bind()?;
        self.context.check(
            unsafe { (self.context.functions.hipMemcpy3DAsync)(&params, stream.0) },
            "hipMemcpy3DAsync",
        )
    }
}
impl ExternalImage<Hip> for HipImage {
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
        self.surfaces
            .get(level as usize)
            .map(|&s| ImageHandle::HipSurface(s))
            .ok_or(InteropError::InvalidMipLevel {
                level,
                levels: self.info.mip_levels,
            })
    }
    fn texture_object(&self) -> Option<ImageHandle> {
        self.texture.map(ImageHandle::HipTexture)
    }
    fn mipmapped_array_level(&self, level: u32) -> InteropResult<ImageHandle> {
        self.levels
            .get(level as usize)
            .map(|&a| ImageHandle::HipArray(HipArray(a)))
            .ok_or(InteropError::InvalidMipLevel {
                level,
                levels: self.info.mip_levels,
            })
    }
    unsafe fn copy_to_host_async(
        &self,
        level: u32,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        check_host_span(&level_layout(&self.info, self.format, level)?, dst.len())?;
        self.copy_level(level, dst.as_mut_ptr(), hipMemcpyDeviceToHost, stream)
    }
    unsafe fn copy_from_host_async(
        &self,
        level: u32,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        check_host_span(&level_layout(&self.info, self.format, level)?, src.len())?;
        self.copy_level(level, src.as_ptr().cast_mut(), hipMemcpyHostToDevice, stream)
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        level: u32,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        self.copy_level(level, dst as *mut u8, hipMemcpyDeviceToDevice, stream)?;
        record_event(&self.context, signal, stream)
    }
}
impl Drop for HipImage {
    fn drop(&mut self) {
        let functions = &self.context.functions;
        unsafe {
            if let Some(texture) = self.texture {
                (functions.hipDestroyTextureObject)(texture);
            }
            for &surface in &self.surfaces {
                (functions.hipDestroySurfaceObject)(surface);
            }
            if !self.mipmapped_array.is_null() {
                (functions.hipFreeMipmappedArray)(self.mipmapped_array);
            }
            (functions.hipDestroyExternalMemory)(self.memory);
        }
    }
}

pub struct HipSemaphore {
    semaphore: hipExternalSemaphore_t,
    kind: SemaphoreKind,
    handle: ImportedHandle,
    context: Arc<HipContext>,
}
unsafe impl Send for HipSemaphore {}
unsafe impl Sync for HipSemaphore {}
impl ExternalSemaphore<Hip> for HipSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }
    fn was_handle_consumed(&self) -> bool {
        self.handle.was_handle_consumed()
    }
    unsafe fn signal_async(&self, stream: StreamWrapper, value: u64) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        let mut params = hipExternalSemaphoreSignalParams::default();
        if self.kind == SemaphoreKind::Timeline {
            params.params.fence_value = value;
        }
        self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.hipSignalExternalSemaphoresAsync)(
                    &self.semaphore,
                    &params,
                    1,
                    stream.0,
                )
            },
            "hipSignalExternalSemaphoresAsync",
        )
    }
    unsafe fn wait_async(
        &self,
        stream: StreamWrapper,
        value: u64,
        done: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let stream = stream.as_hip()?;
        let mut params = hipExternalSemaphoreWaitParams::default();
        if self.kind == SemaphoreKind::Timeline {
            params.params.fence_value = value;
        }
        self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.hipWaitExternalSemaphoresAsync)(
                    &self.semaphore,
                    &params,
                    1,
                    stream.0,
                )
            },
            "hipWaitExternalSemaphoresAsync",
        )?;
        record_event(&self.context, done, stream)
    }
}
impl Drop for HipSemaphore {
    fn drop(&mut self) {
        unsafe { (self.context.functions.hipDestroyExternalSemaphore)(self.semaphore) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn channel_descriptors_follow_the_registry() {
        for format in crate::format::FORMATS {
            let desc = channel_format(format).unwrap();
            let widths = [desc.x, desc.y, desc.z, desc.w];
            let used = widths.iter().filter(|&&w| w != 0).count() as u32;
            assert_eq!(used, format.channel_count, "{}", format.name);
            let bits = (format.channel_size_in_bytes * 8) as i32;
            assert!(widths.iter().all(|&w| w == 0 || w == bits));
        }
        let rg16f = channel_format(get_image_format_info(vk::Format::R16G16_SFLOAT)).unwrap();
        assert_eq!(
            rg16f,
            hipChannelFormatDesc {
                x: 16,
                y: 16,
                z: 0,
                w: 0,
                f: hipChannelFormatKindFloat
            }
        );
        assert!(channel_format(get_image_format_info(vk::Format::BC1_RGB_UNORM_BLOCK)).is_none());
    }

    #[test]
    fn layered_images_use_layers_as_depth() {
        let info = ImageImportInfo {
            format: vk::Format::R8G8B8A8_UNORM,
            extent: types::ImageExtent::new_2d(16, 16),
            mip_levels: 5,
            array_layers: 3,
            dimensionality: ImageDimensionality::D2,
            usage: vk::ImageUsageFlags::STORAGE,
        };
        let desc = mipmapped_array_desc(&info, get_image_format_info(info.format)).unwrap();
        assert_eq!(desc.extent.depth, 3);
        assert_eq!(desc.numLevels, 5);
        assert_eq!(desc.flags, hipArraySurfaceLoadStore | hipArrayLayered);
    }
}
