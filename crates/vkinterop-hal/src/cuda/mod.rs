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

pub use ffi::CudaFunctions;
use ffi::*;

use crate::device::find_matching_device;
use crate::handle::{RawExternalHandle, check_import_size, driver_consumes_handle};
use crate::image::{CuArray, check_host_span, level_layout};
use crate::loader::{TableSlot, open_library};
use crate::stream::{CuEvent, CuStream, poll_until};
use crate::{
    ComputeBackend, ComputeDeviceInfo, ComputeEvent, DeviceContext, DeviceIdentity,
    ExternalBuffer, ExternalBufferSource, ExternalImage, ExternalImageSource, ExternalSemaphore,
    ExternalSemaphoreSource, FormatInfo, ImageFlavor, ImageHandle, ImageImportInfo,
    ImportedHandle, InteropError, InteropResult, StreamWrapper, get_image_format_info,
};

const API: InteropComputeApi = InteropComputeApi::Cuda;
pub const LIBRARY_ENV: &str = "VKINTEROP_CUDA_LIBRARY";
const LIBRARY_NAMES: &[&str] = if cfg!(windows) {
    &["nvcuda.dll"]
} else {
    &["libcuda.so.1", "libcuda.so"]
};

static FUNCTIONS: TableSlot<CudaFunctions> = TableSlot::new(API);

pub fn function_table() -> InteropResult<Arc<CudaFunctions>> {
    FUNCTIONS.get_or_init(|| {
        let library = open_library(API, LIBRARY_ENV, LIBRARY_NAMES)?;
        let functions = unsafe { CudaFunctions::load(library, API) }?;
        check(&functions, unsafe { (functions.cuInit)(0) }, "cuInit")
            .map_err(|e| InteropError::backend_not_available(API, e.to_string()))?;
        Ok(functions)
    })
}

fn error_message(functions: &CudaFunctions, code: CUresult) -> String {
    let mut message: *const c_char = null();
    if unsafe { (functions.cuGetErrorString)(code, &mut message) } == CUDA_SUCCESS
        && !message.is_null()
    {
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    } else {
        "unrecognized error code".to_owned()
    }
}
fn check(functions: &CudaFunctions, code: CUresult, call: &'static str) -> InteropResult<()> {
    if code == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(InteropError::Backend {
            api: API,
            call,
            code: code as i64,
            message: error_message(functions, code),
        })
    }
}

fn external_handle(raw: RawExternalHandle) -> ExternalHandle {
    let mut handle = ExternalHandle {
        win32: Win32Handle {
            handle: null_mut(),
            name: null(),
        },
    };
    match raw {
        RawExternalHandle::Fd(fd) => handle.fd = fd,
        RawExternalHandle::Win32(h) => {
            handle.win32 = Win32Handle {
                handle: h,
                name: null(),
            }
        }
    }
    handle
}

fn memory_handle_type(ty: ExternalHandleType) -> i32 {
    match ty {
        ExternalHandleType::OpaqueFd => CU_EXTERNAL_MEMORY_HANDLE_TYPE_OPAQUE_FD,
        ExternalHandleType::OpaqueWin32 => CU_EXTERNAL_MEMORY_HANDLE_TYPE_OPAQUE_WIN32,
        ExternalHandleType::OpaqueWin32Kmt => CU_EXTERNAL_MEMORY_HANDLE_TYPE_OPAQUE_WIN32_KMT,
    }
}

fn semaphore_handle_type(kind: SemaphoreKind, ty: ExternalHandleType) -> InteropResult<i32> {
    Ok(match (kind, ty) {
        (SemaphoreKind::Binary, ExternalHandleType::OpaqueFd) => {
            CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_OPAQUE_FD
        }
        (SemaphoreKind::Binary, ExternalHandleType::OpaqueWin32) => {
            CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_OPAQUE_WIN32
        }
        (SemaphoreKind::Binary, ExternalHandleType::OpaqueWin32Kmt) => {
            CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_OPAQUE_WIN32_KMT
        }
        (SemaphoreKind::Timeline, ExternalHandleType::OpaqueFd) => {
            CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_TIMELINE_SEMAPHORE_FD
        }
        (SemaphoreKind::Timeline, ExternalHandleType::OpaqueWin32) => {
            CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_TIMELINE_SEMAPHORE_WIN32
        }
        (SemaphoreKind::Timeline, ExternalHandleType::OpaqueWin32Kmt) => {
            return Err(InteropError::UnsupportedFeature(
                UnsupportedComputeApiFeature::TimelineSemaphores,
            ));
        }
    })
}

/// CUDA array element format for a registry entry. Normalized formats are stored
/// as integers and read back normalized by texture objects.
pub fn array_format(format: &FormatInfo) -> Option<i32> {
    use ChannelCategory as C;
    Some(match (format.category, format.channel_size_in_bytes) {
        (C::Uint | C::Unorm, 1) => CU_AD_FORMAT_UNSIGNED_INT8,
        (C::Uint | C::Unorm | C::Depth, 2) => CU_AD_FORMAT_UNSIGNED_INT16,
        (C::Uint, 4) => CU_AD_FORMAT_UNSIGNED_INT32,
        (C::Int | C::Snorm, 1) => CU_AD_FORMAT_SIGNED_INT8,
        (C::Int | C::Snorm, 2) => CU_AD_FORMAT_SIGNED_INT16,
        (C::Int, 4) => CU_AD_FORMAT_SIGNED_INT32,
        (C::Float, 2) => CU_AD_FORMAT_HALF,
        (C::Float | C::Depth, 4) => CU_AD_FORMAT_FLOAT,
        _ => return None,
    })
}

fn array_descriptor(
    info: &ImageImportInfo,
    format: &FormatInfo,
) -> InteropResult<CUDA_ARRAY3D_DESCRIPTOR> {
    let element = array_format(format)
        .ok_or_else(|| InteropError::format_unsupported(info.format, API))?;
    let mut flags = CUDA_ARRAY3D_SURFACE_LDST;
    if info.is_layered() {
        flags |= CUDA_ARRAY3D_LAYERED;
    }
    if info.dimensionality == ImageDimensionality::Cube {
        flags |= CUDA_ARRAY3D_CUBEMAP;
        if info.array_layers > 6 {
            flags |= CUDA_ARRAY3D_LAYERED;
        }
    }
    if info.usage.contains(ash::vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        flags |= CUDA_ARRAY3D_COLOR_ATTACHMENT;
    }
    let height = match info.dimensionality {
        ImageDimensionality::D1 => 0,
        _ => info.extent.height as usize,
    };
    Ok(CUDA_ARRAY3D_DESCRIPTOR {
        Width: info.extent.width as usize,
        Height: height,
        Depth: info.array_depth() as usize,
        Format: element,
        NumChannels: format.channel_count,
        Flags: flags,
    })
}

#[derive(Clone, Copy, Debug)]
pub struct Cuda;
impl ComputeBackend for Cuda {
    const API: InteropComputeApi = API;

    type Context = CudaContext;
    type Buffer = CudaBuffer;
    type Image = CudaImage;
    type Semaphore = CudaSemaphore;

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
        let stream = stream.as_cuda()?;
        let functions = FUNCTIONS.get()?;
        check(
            &functions,
            unsafe { (functions.cuStreamSynchronize)(stream.0) },
            "cuStreamSynchronize",
        )
    }
    fn wait_for_completion_timeout(
        stream: StreamWrapper,
        timeout: Duration,
    ) -> InteropResult<bool> {
        let stream = stream.as_cuda()?;
        let functions = FUNCTIONS.get()?;
        poll_until(timeout, || {
            match unsafe { (functions.cuStreamQuery)(stream.0) } {
                CUDA_SUCCESS => Ok(true),
                CUDA_ERROR_NOT_READY => Ok(false),
                code => check(&functions, code, "cuStreamQuery").map(|_| false),
            }
        })
    }
}

/// The primary context of the CUDA device matching a Vulkan device.
pub struct CudaContext {
    functions: Arc<CudaFunctions>,
    device: CUdevice,
    context: CUcontext,
    info: ComputeDeviceInfo,
}
unsafe impl Send for CudaContext {}
unsafe impl Sync for CudaContext {}

/// Keeps a context current on this thread until dropped
struct CurrentContext<'a> {
    functions: &'a CudaFunctions,
}
impl Drop for CurrentContext<'_> {
    fn drop(&mut self) {
        let mut previous = null_mut();
        unsafe { (self.functions.cuCtxPopCurrent_v2)(&mut previous) };
    }
}

impl CudaContext {
    fn bind(&self) -> InteropResult<CurrentContext<'_>> {
        self.check(
            unsafe { (self.functions.cuCtxPushCurrent_v2)(self.context) },
            "cuCtxPushCurrent",
        )?;
        Ok(CurrentContext {
            functions: &self.functions,
        })
    }
    fn check(&self, code: CUresult, call: &'static str) -> InteropResult<()> {
        check(&self.functions, code, call)
    }
    pub fn functions(&self) -> &CudaFunctions {
        &self.functions
    }
    pub fn device(&self) -> i32 {
        self.device
    }
    fn import_memory(
        &self,
        source: &dyn crate::ExternalMemorySource,
    ) -> InteropResult<(CUexternalMemory, ImportedHandle)> {
        let handle_type = ExternalHandleType::native();
        let handle = source.export_memory_handle(handle_type)?;
        let desc = CUDA_EXTERNAL_MEMORY_HANDLE_DESC {
            type_: memory_handle_type(handle_type),
            handle: external_handle(handle.raw()),
            size: source.allocation_size(),
            flags: if source.is_dedicated() {
                CUDA_EXTERNAL_MEMORY_DEDICATED
            } else {
                0
            },
            reserved: [0; 16],
        };
        let mut memory = null_mut();
        let code = unsafe { (self.functions.cuImportExternalMemory)(&mut memory, &desc) };
        if code != CUDA_SUCCESS {
            log::error!(
                "cuImportExternalMemory failed: {}",
                error_message(&self.functions, code)
            );
            return Err(InteropError::MemoryImportFailed {
                api: API,
                code: code as i64,
            });
        }
        Ok((memory, handle.settle(driver_consumes_handle(handle_type))))
    }
}
impl Drop for CudaContext {
    fn drop(&mut self) {
        unsafe { (self.functions.cuDevicePrimaryCtxRelease_v2)(self.device) };
    }
}

impl DeviceContext<Cuda> for CudaContext {
    #[tracing::instrument(skip_all, fields(device = %identity.name))]
    fn new(identity: &DeviceIdentity) -> InteropResult<Arc<Self>> {
        let functions = function_table()?;
        let f = &*functions;
        let mut count = 0;
        check(f, unsafe { (f.cuDeviceGetCount)(&mut count) }, "cuDeviceGetCount")?;
        let mut candidates = Vec::with_capacity(count.max(0) as usize);
        for ordinal in 0..count {
            let mut device = 0;
            check(f, unsafe { (f.cuDeviceGet)(&mut device, ordinal) }, "cuDeviceGet")?;
            let mut uuid = CUuuid { bytes: [0; 16] };
            check(f, unsafe { (f.cuDeviceGetUuid)(&mut uuid, device) }, "cuDeviceGetUuid")?;
            let luid = f.cuDeviceGetLuid.and_then(|get_luid| {
                let mut luid = [0 as c_char; 8];
                let mut node_mask = 0;
                let code = unsafe { get_luid(luid.as_mut_ptr(), &mut node_mask, device) };
                (code == CUDA_SUCCESS).then(|| luid.map(|b| b as u8))
            });
            candidates.push((device, uuid.bytes, luid));
        }
        let device = find_matching_device(identity, API, candidates)?;

        let mut name = [0 as c_char; 256];
        check(
            f,
            unsafe { (f.cuDeviceGetName)(name.as_mut_ptr(), name.len() as i32, device) },
            "cuDeviceGetName",
        )?;
        let name = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let mut total_memory = 0usize;
        check(
            f,
            unsafe { (f.cuDeviceTotalMem_v2)(&mut total_memory, device) },
            "cuDeviceTotalMem",
        )?;
        let mut context = null_mut();
        check(
            f,
            unsafe { (f.cuDevicePrimaryCtxRetain)(&mut context, device) },
            "cuDevicePrimaryCtxRetain",
        )?;
        log::info!("Using CUDA device {device} ({name}) for Vulkan interop");
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
            context,
        }))
    }
    fn device_info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    #[tracing::instrument(skip_all)]
    unsafe fn import_buffer(
        self: &Arc<Self>,
        source: &dyn ExternalBufferSource,
    ) -> InteropResult<CudaBuffer> {
        let size = source.buffer_size();
        check_import_size(size, self.info.max_allocation_size)?;
        let _current = self.bind()?;
        let (memory, handle) = self.import_memory(source)?;
        let err = Cell::new(true);
        defer! {
            if err.get() {
                unsafe { (self.functions.cuDestroyExternalMemory)(memory) };
            }
        }
        let desc = CUDA_EXTERNAL_MEMORY_BUFFER_DESC {
            offset: 0,
            size,
            flags: 0,
            reserved: [0; 16],
        };
        let mut device_ptr = 0;
        self.check(
            unsafe {
                (self.functions.cuExternalMemoryGetMappedBuffer)(&mut device_ptr, memory, &desc)
            },
            "cuExternalMemoryGetMappedBuffer",
        )?;
        err.set(false);
        Ok(CudaBuffer {
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
    ) -> InteropResult<CudaImage> {
        let info = source.image_info();
        let format = get_image_format_info(info.format);
        let array_desc = array_descriptor(&info, format)?;
        let _current = self.bind()?;
        let (memory, handle) = self.import_memory(source)?;
        // From here on the partially built image releases whatever it holds
        let mut image = CudaImage {
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
        let desc = CUDA_EXTERNAL_MEMORY_MIPMAPPED_ARRAY_DESC {
            offset: 0,
            arrayDesc: array_desc,
            numLevels: info.mip_levels,
            reserved: [0; 16],
        };
        self.check(
            unsafe {
                (self.functions.cuExternalMemoryGetMappedMipmappedArray)(
                    &mut image.mipmapped_array,
                    memory,
                    &desc,
                )
            },
            "cuExternalMemoryGetMappedMipmappedArray",
        )?;
        for level in 0..info.mip_levels {
            let mut array = null_mut();
            self.check(
                unsafe {
                    (self.functions.cuMipmappedArrayGetLevel)(
                        &mut array,
                        image.mipmapped_array,
                        level,
                    )
                },
                "cuMipmappedArrayGetLevel",
            )?;
            image.levels.push(array);
            let mut surface = 0;
            let resource = CUDA_RESOURCE_DESC::array(array);
            self.check(
                unsafe { (self.functions.cuSurfObjectCreate)(&mut surface, &resource) },
                "cuSurfObjectCreate",
            )?;
            image.surfaces.push(surface);
        }
        if flavor == ImageFlavor::Sampled {
            let integer = format.category.is_integer();
            let filter = if integer || format.is_depth() {
                CU_TR_FILTER_MODE_POINT
            } else {
                CU_TR_FILTER_MODE_LINEAR
            };
            let texture_desc = CUDA_TEXTURE_DESC {
                addressMode: [CU_TR_ADDRESS_MODE_CLAMP; 3],
                filterMode: filter,
                mipmapFilterMode: filter,
                flags: CU_TRSF_NORMALIZED_COORDINATES
                    | if integer { CU_TRSF_READ_AS_INTEGER } else { 0 },
                maxMipmapLevelClamp: info.mip_levels.saturating_sub(1) as f32,
                ..Default::default()
            };
            let resource = CUDA_RESOURCE_DESC::mipmapped_array(image.mipmapped_array);
            let mut texture = 0;
            self.check(
                unsafe {
                    (self.functions.cuTexObjectCreate)(
                        &mut texture,
                        &resource,
                        &texture_desc,
                        null(),
                    )
                },
                "cuTexObjectCreate",
            )?;
            image.texture = Some(texture);
        }
        Ok(image)
    }

    #[tracing::instrument(skip_all)]
    unsafe fn import_semaphore(
        self: &Arc<Self>,
        source: &dyn ExternalSemaphoreSource,
    ) -> InteropResult<CudaSemaphore> {
        let kind = source.semaphore_kind();
        let handle_type = ExternalHandleType::native();
        let type_ = semaphore_handle_type(kind, handle_type)?;
        let _current = self.bind()?;
        let handle = source.export_semaphore_handle(handle_type)?;
        let desc = CUDA_EXTERNAL_SEMAPHORE_HANDLE_DESC {
            type_,
            handle: external_handle(handle.raw()),
            flags: 0,
            reserved: [0; 16],
        };
        let mut semaphore = null_mut();
        let code = unsafe { (self.functions.cuImportExternalSemaphore)(&mut semaphore, &desc) };
        if code != CUDA_SUCCESS {
            log::error!(
                "cuImportExternalSemaphore failed: {}",
                error_message(&self.functions, code)
            );
            return Err(InteropError::SemaphoreImportFailed {
                api: API,
                code: code as i64,
            });
        }
        Ok(CudaSemaphore {
            semaphore,
            kind,
            handle: handle.settle(driver_consumes_handle(handle_type)),
            context: self.clone(),
        })
    }

    fn create_stream(&self) -> InteropResult<StreamWrapper> {
        let _current = self.bind()?;
        let mut stream = null_mut();
        self.check(
            unsafe { (self.functions.cuStreamCreate)(&mut stream, CU_STREAM_NON_BLOCKING) },
            "cuStreamCreate",
        )?;
        Ok(StreamWrapper::Cuda(CuStream(stream)))
    }
    unsafe fn destroy_stream(&self, stream: StreamWrapper) -> InteropResult<()> {
        let stream = stream.as_cuda()?;
        let _current = self.bind()?;
        self.check(
            unsafe { (self.functions.cuStreamDestroy_v2)(stream.0) },
            "cuStreamDestroy",
        )
    }
    fn create_event(&self) -> InteropResult<ComputeEvent> {
        let _current = self.bind()?;
        let mut event = null_mut();
        self.check(
            unsafe { (self.functions.cuEventCreate)(&mut event, CU_EVENT_DISABLE_TIMING) },
            "cuEventCreate",
        )?;
        Ok(ComputeEvent::Cuda(CuEvent(event)))
    }
    unsafe fn destroy_event(&self, event: ComputeEvent) -> InteropResult<()> {
        let ComputeEvent::Cuda(event) = event else {
            return event.expect_api(API);
        };
        self.check(
            unsafe { (self.functions.cuEventDestroy_v2)(event.0) },
            "cuEventDestroy",
        )
    }
}

fn record_event(
    context: &CudaContext,
    event: Option<&ComputeEvent>,
    stream: CuStream,
) -> InteropResult<()> {
    match event {
        None => Ok(()),
        Some(ComputeEvent::Cuda(event)) => context.check(
            unsafe { (context.functions.cuEventRecord)(event.0, stream.0) },
            "cuEventRecord",
        ),
        Some(other) => other.expect_api(API),
    }
}

pub struct CudaBuffer {
    memory: CUexternalMemory,
    device_ptr: CUdeviceptr,
    size: u64,
    handle: ImportedHandle,
    context: Arc<CudaContext>,
}
unsafe impl Send for CudaBuffer {}
unsafe impl Sync for CudaBuffer {}
impl CudaBuffer {
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
impl ExternalBuffer<Cuda> for CudaBuffer {
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
        let stream = stream.as_cuda()?;
        self.check_span(dst.len())?;
        let _current = self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.cuMemcpyDtoHAsync_v2)(
                    dst.as_mut_ptr().cast(),
                    self.device_ptr,
                    dst.len(),
                    stream.0,
                )
            },
            "cuMemcpyDtoHAsync",
        )
    }
    unsafe fn copy_from_host_async(&self, src: &[u8], stream: StreamWrapper) -> InteropResult<()> {
        let stream = stream.as_cuda()?;
        self.check_span(src.len())?;
        let _current = self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.cuMemcpyHtoDAsync_v2)(
                    self.device_ptr,
                    src.as_ptr().cast(),
                    src.len(),
                    stream.0,
                )
            },
            "cuMemcpyHtoDAsync",
        )
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let stream = stream.as_cuda()?;
        let _current = self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.cuMemcpyDtoDAsync_v2)(
                    dst,
                    self.device_ptr,
                    self.size as usize,
                    stream.0,
                )
            },
            "cuMemcpyDtoDAsync",
        )?;
        record_event(&self.context, signal, stream)
    }
}
impl Drop for CudaBuffer {
    fn drop(&mut self) {
        let functions = &self.context.functions;
        unsafe {
            (functions.cuMemFree_v2)(self.device_ptr);
            (functions.cuDestroyExternalMemory)(self.memory);
        }
    }
}

enum Linear {
    Host(*mut u8),
    Device(CUdeviceptr),
}

pub struct CudaImage {
    memory: CUexternalMemory,
    mipmapped_array: CUmipmappedArray,
    levels: Vec<CUarray>,
    surfaces: Vec<CUsurfObject>,
    texture: Option<CUtexObject>,
    info: ImageImportInfo,
    format: &'static FormatInfo,
    flavor: ImageFlavor,
    handle: ImportedHandle,
    context: Arc<CudaContext>,
}
unsafe impl Send for CudaImage {}
unsafe impl Sync for CudaImage {}
impl CudaImage {
    fn copy_level(
        &self,
        level: u32,
        linear: Linear,
        to_image: bool,
        stream: CuStream,
    ) -> InteropResult<()> {
        let layout = level_layout(&self.info, self.format, level)?;
        let array = self.levels[level as usize];
        let mut copy = CUDA_MEMCPY3D {
            WidthInBytes: layout.row_pitch as usize,
            Height: layout.extent.height as usize,
            Depth: (layout.extent.depth * layout.layers) as usize,
            ..Default::default()
        };
        let (memory_type, host, device) = match linear {
            Linear::Host(ptr) => (CU_MEMORYTYPE_HOST, ptr, 0),
            Linear::Device(ptr) => (CU_MEMORYTYPE_DEVICE, null_mut(), ptr),
        };
        if to_image {
            copy.srcMemoryType = memory_type;
            copy.srcHost = host.cast_const().cast();
            copy.srcDevice = device;
            copy.srcPitch = layout.row_pitch as usize;
            copy.srcHeight = layout.extent.height as usize;
            copy.dstMemoryType = CU_MEMORYTYPE_ARRAY;
            copy.dstArray = array;
        } else {
            copy.srcMemoryType = CU_MEMORYTYPE_ARRAY;
            copy.srcArray = array;
            copy.dstMemoryType = memory_type;
            copy.dstHost = host.cast();
            copy.dstDevice = device;
            copy.dstPitch = layout.row_pitch as usize;
            copy.dstHeight = layout.extent.height as usize;
        }
        let _current = self.context.bind()?;
        self.context.check(
            unsafe { (self.context.functions.cuMemcpy3DAsync_v2)(&copy, stream.0) },
            "cuMemcpy3DAsync",
        )
    }
}
impl ExternalImage<Cuda> for CudaImage {
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
            .map(|&s| ImageHandle::CudaSurface(s))
            .ok_or(InteropError::InvalidMipLevel {
                level,
                levels: self.info.mip_levels,
            })
    }
    fn texture_object(&self) -> Option<ImageHandle> {
        self.texture.map(ImageHandle::CudaTexture)
    }
    fn mipmapped_array_level(&self, level: u32) -> InteropResult<ImageHandle> {
        self.levels
            .get(level as usize)
            .map(|&a| ImageHandle::CudaArray(CuArray(a)))
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
        let stream = stream.as_cuda()?;
        check_host_span(&level_layout(&self.info, self.format, level)?, dst.len())?;
        self.copy_level(level, Linear::Host(dst.as_mut_ptr()), false, stream)
    }
    unsafe fn copy_from_host_async(
        &self,
        level: u32,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        let stream = stream.as_cuda()?;
        check_host_span(&level_layout(&self.info, self.format, level)?, src.len())?;
        self.copy_level(level, Linear::Host(src.as_ptr().cast_mut()), true, stream)
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        level: u32,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let stream = stream.as_cuda()?;
        self.copy_level(level, Linear::Device(dst), false, stream)?;
        record_event(&self.context, signal, stream)
    }
}
impl Drop for CudaImage {
    fn drop(&mut self) {
        let functions = &self.context.functions;
        unsafe {
            if let Some(texture) = self.texture {
                (functions.cuTexObjectDestroy)(texture);
            }
            for &surface in &self.surfaces {
                (functions.cuSurfObjectDestroy)(surface);
            }
            if !self.mipmapped_array.is_null() {
                (functions.cuMipmappedArrayDestroy)(self.mipmapped_array);
            }
            (functions.cuDestroyExternalMemory)(self.memory);
        }
    }
}

pub struct CudaSemaphore {
    semaphore: CUexternalSemaphore,
    kind: SemaphoreKind,
    handle: ImportedHandle,
    context: Arc<CudaContext>,
}
unsafe impl Send for CudaSemaphore {}
unsafe impl Sync for CudaSemaphore {}
impl ExternalSemaphore<Cuda> for CudaSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }
    fn was_handle_consumed(&self) -> bool {
        self.handle.was_handle_consumed()
    }
    unsafe fn signal_async(&self, stream: StreamWrapper, value: u64) -> InteropResult<()> {
        let stream = stream.as_cuda()?;
        let mut params = CUDA_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS::default();
        if self.kind == SemaphoreKind::Timeline {
            params.params.fence.value = value;
        }
        let _current = self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.cuSignalExternalSemaphoresAsync)(
                    &self.semaphore,
                    &params,
                    1,
                    stream.0,
                )
            },
            "cuSignalExternalSemaphoresAsync",
        )
    }
    unsafe fn wait_async(
        &self,
        stream: StreamWrapper,
        value: u64,
        done: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let stream = stream.as_cuda()?;
        let mut params = CUDA_EXTERNAL_SEMAPHORE_WAIT_PARAMS::default();
        if self.kind == SemaphoreKind::Timeline {
            params.params.fence.value = value;
        }
        let _current = self.context.bind()?;
        self.context.check(
            unsafe {
                (self.context.functions.cuWaitExternalSemaphoresAsync)(
                    &self.semaphore,
                    &params,
                    1,
                    stream.0,
                )
            },
            "cuWaitExternalSemaphoresAsync",
        )?;
        record_event(&self.context, done, stream)
    }
}
impl Drop for CudaSemaphore {
    fn drop(&mut self) {
        unsafe { (self.context.functions.cuDestroyExternalSemaphore)(self.semaphore) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use types::ImageExtent;

    fn image_info(
        format: vk::Format,
        dimensionality: ImageDimensionality,
        layers: u32,
    ) -> ImageImportInfo {
        ImageImportInfo {
            format,
            extent: ImageExtent::new_2d(64, 32),
            mip_levels: 1,
            array_layers: layers,
            dimensionality,
            usage: vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }

    #[test]
    fn every_registry_format_has_an_array_format() {
        for format in crate::format::FORMATS {
            assert!(array_format(format).is_some(), "{}", format.name);
        }
        let half = get_image_format_info(vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(array_format(half), Some(CU_AD_FORMAT_HALF));
        let snorm = get_image_format_info(vk::Format::R8G8_SNORM);
        assert_eq!(array_format(snorm), Some(CU_AD_FORMAT_SIGNED_INT8));
    }

    #[test]
    fn array_descriptors() {
        let format = get_image_format_info(vk::Format::R32_SFLOAT);
        let layered = image_info(vk::Format::R32_SFLOAT, ImageDimensionality::D2, 4);
        let desc = array_descriptor(&layered, format).unwrap();
        assert_eq!((desc.Width, desc.Height, desc.Depth), (64, 32, 4));
        assert_eq!(
            desc.Flags,
            CUDA_ARRAY3D_SURFACE_LDST | CUDA_ARRAY3D_LAYERED | CUDA_ARRAY3D_COLOR_ATTACHMENT
        );
        let cube = image_info(vk::Format::R32_SFLOAT, ImageDimensionality::Cube, 6);
        let cube = array_descriptor(&cube, format).unwrap();
        assert_eq!(cube.Depth, 6);
        assert_eq!(cube.Flags & CUDA_ARRAY3D_LAYERED, 0);
        assert_ne!(cube.Flags & CUDA_ARRAY3D_CUBEMAP, 0);
        let unknown = image_info(vk::Format::BC7_UNORM_BLOCK, ImageDimensionality::D2, 1);
        assert!(matches!(
            array_descriptor(&unknown, get_image_format_info(unknown.format)),
            Err(InteropError::FormatUnsupported { .. })
        ));
    }

    #[test]
    fn timeline_kmt_handles_are_rejected() {
        assert!(
            semaphore_handle_type(SemaphoreKind::Timeline, ExternalHandleType::OpaqueWin32Kmt)
                .is_err()
        );
        assert_eq!(
            semaphore_handle_type(SemaphoreKind::Timeline, ExternalHandleType::OpaqueFd).unwrap(),
            CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_TIMELINE_SEMAPHORE_FD
        );
    }
}
