/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! Level Zero backend.
//!
//! Level Zero has no streams. An in-order immediate command list plays that role,
//! and dependencies on other work are expressed with events. Those events are
//! attached per thread with [`set_level_zero_next_command_events`] and picked up
//! by the next async command issued on that thread.
mod ffi;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::ptr::{null, null_mut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use scopeguard::defer;
use types::{
    ChannelCategory, ExternalHandleType, ImageDimensionality, InteropComputeApi, SemaphoreKind,
    UnsupportedComputeApiFeature,
};

pub use ffi::LevelZeroFunctions;
use ffi::*;

use crate::device::find_matching_device;
use crate::handle::{RawExternalHandle, check_import_size, driver_consumes_handle};
use crate::image::{ZeImage, check_host_span, level_layout};
use crate::loader::{TableSlot, open_library};
use crate::stream::{ZeCommandList, ZeEvent};
use crate::{
    ComputeBackend, ComputeDeviceInfo, ComputeEvent, DeviceContext, DeviceIdentity,
    ExternalBuffer, ExternalBufferSource, ExternalImage, ExternalImageSource, ExternalSemaphore,
    ExternalSemaphoreSource, FormatInfo, ImageFlavor, ImageHandle, ImageImportInfo,
    ImportedHandle, InteropError, InteropResult, StreamWrapper, get_image_format_info,
};

const API: InteropComputeApi = InteropComputeApi::LevelZero;
pub const LIBRARY_ENV: &str = "VKINTEROP_LEVEL_ZERO_LIBRARY";
const LIBRARY_NAMES: &[&str] = if cfg!(windows) {
    &["ze_loader.dll"]
} else {
    &["libze_loader.so.1", "libze_loader.so"]
};

static FUNCTIONS: TableSlot<LevelZeroFunctions> = TableSlot::new(API);

pub fn function_table() -> InteropResult<Arc<LevelZeroFunctions>> {
    FUNCTIONS.get_or_init(|| {
        let library = open_library(API, LIBRARY_ENV, LIBRARY_NAMES)?;
        let functions = unsafe { LevelZeroFunctions::load(library, API) }?;
        check(unsafe { (functions.zeInit)(ZE_INIT_FLAG_GPU_ONLY) }, "zeInit")
            .map_err(|e| InteropError::backend_not_available(API, e.to_string()))?;
        Ok(functions)
    })
}

fn result_name(code: ze_result_t) -> &'static str {
    match code {
        ZE_RESULT_NOT_READY => "ZE_RESULT_NOT_READY",
        ZE_RESULT_ERROR_OUT_OF_DEVICE_MEMORY => "ZE_RESULT_ERROR_OUT_OF_DEVICE_MEMORY",
        ZE_RESULT_ERROR_UNSUPPORTED_FEATURE => "ZE_RESULT_ERROR_UNSUPPORTED_FEATURE",
        0x78000001 => "ZE_RESULT_ERROR_UNINITIALIZED",
        0x78000004 => "ZE_RESULT_ERROR_INVALID_ARGUMENT",
        0x78000005 => "ZE_RESULT_ERROR_INVALID_NULL_HANDLE",
        0x78000007 => "ZE_RESULT_ERROR_INVALID_NULL_POINTER",
        _ => "unrecognized error code",
    }
}
fn check(code: ze_result_t, call: &'static str) -> InteropResult<()> {
    if code == ZE_RESULT_SUCCESS {
        Ok(())
    } else {
        Err(InteropError::Backend {
            api: API,
            call,
            code: code as i64,
            message: result_name(code).to_owned(),
        })
    }
}
fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

const BINDLESS_AUTO: u8 = 0;
const BINDLESS_FORCED: u8 = 1;
const BINDLESS_DISABLED: u8 = 2;
static BINDLESS_MODE: AtomicU8 = AtomicU8::new(BINDLESS_AUTO);

/// How images are imported into Level Zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BindlessImagesMode {
    /// Bindless when the driver offers it
    #[default]
    Auto,
    Forced,
    Disabled,
}

/// Forces the bindless (`true`) or plain (`false`) image import path.
pub fn set_level_zero_use_bindless_images_interop(use_bindless: bool) {
    let mode = if use_bindless {
        BINDLESS_FORCED
    } else {
        BINDLESS_DISABLED
    };
    BINDLESS_MODE.store(mode, Ordering::Release);
}
pub fn reset_level_zero_bindless_images_mode() {
    BINDLESS_MODE.store(BINDLESS_AUTO, Ordering::Release);
}
pub fn bindless_images_mode() -> BindlessImagesMode {
    match BINDLESS_MODE.load(Ordering::Acquire) {
        BINDLESS_FORCED => BindlessImagesMode::Forced,
        BINDLESS_DISABLED => BindlessImagesMode::Disabled,
        _ => BindlessImagesMode::Auto,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageImportPath {
    Bindless,
    Plain,
}

/// Image interop needs bindless images unless the plain path is forced.
pub fn choose_image_import_path(
    mode: BindlessImagesMode,
    driver_has_bindless_images: bool,
) -> InteropResult<ImageImportPath> {
    match mode {
        BindlessImagesMode::Disabled => Ok(ImageImportPath::Plain),
        BindlessImagesMode::Auto | BindlessImagesMode::Forced => {
            if driver_has_bindless_images {
                Ok(ImageImportPath::Bindless)
            } else {
                Err(InteropError::UnsupportedFeature(
                    UnsupportedComputeApiFeature::BindlessImages,
                ))
            }
        }
    }
}

#[derive(Default)]
struct NextCommandEvents {
    signal: Option<ZeEvent>,
    waits: Vec<ZeEvent>,
}
thread_local! {
    static NEXT_COMMAND_EVENTS: RefCell<NextCommandEvents> =
        RefCell::new(NextCommandEvents::default());
}

/// Attaches a signal event and wait events to the next Level Zero command issued
/// on this thread. Replaces anything set before and not yet consumed.
pub fn set_level_zero_next_command_events(signal: Option<ZeEvent>, waits: &[ZeEvent]) {
    NEXT_COMMAND_EVENTS.with(|events| {
        *events.borrow_mut() = NextCommandEvents {
            signal,
            waits: waits.to_vec(),
        }
    });
}
fn take_next_command_events() -> NextCommandEvents {
    NEXT_COMMAND_EVENTS.with(|events| events.take())
}

/// Events of one appended command
struct CommandEvents {
    signal: ze_event_handle_t,
    waits: Vec<ze_event_handle_t>,
}
impl CommandEvents {
    fn next(explicit_signal: Option<&ComputeEvent>) -> InteropResult<Self> {
        let pending = take_next_command_events();
        let signal = match explicit_signal {
            Some(ComputeEvent::LevelZero(event)) => {
                if pending.signal.is_some() {
                    log::warn!("Explicit signal event replaces the one set for the next command");
                }
                Some(*event)
            }
            Some(other) => {
                other.expect_api(API)?;
                None
            }
            None => pending.signal,
        };
        Ok(Self {
            signal: signal.map_or(null_mut(), |e| e.0),
            waits: pending.waits.into_iter().map(|e| e.0).collect(),
        })
    }
    fn wait_count(&self) -> u32 {
        self.waits.len() as u32
    }
    fn wait_ptr(&mut self) -> *mut ze_event_handle_t {
        if self.waits.is_empty() {
            null_mut()
        } else {
            self.waits.as_mut_ptr()
        }
    }
}

fn memory_import(raw: RawExternalHandle, ty: ExternalHandleType) -> MemoryImport {
    match raw {
        RawExternalHandle::Fd(fd) => MemoryImport::Fd(ze_external_memory_import_fd_t::new(fd)),
        RawExternalHandle::Win32(handle) => {
            MemoryImport::Win32(ze_external_memory_import_win32_handle_t {
                stype: ZE_STRUCTURE_TYPE_EXTERNAL_MEMORY_IMPORT_WIN32,
                pNext: null(),
                flags: if ty == ExternalHandleType::OpaqueWin32Kmt {
                    ZE_EXTERNAL_MEMORY_TYPE_FLAG_OPAQUE_WIN32_KMT
                } else {
                    ZE_EXTERNAL_MEMORY_TYPE_FLAG_OPAQUE_WIN32
                },
                handle,
                name: null(),
            })
        }
    }
}

fn semaphore_flags(kind: SemaphoreKind, ty: ExternalHandleType) -> InteropResult<u32> {
    Ok(match (kind, ty) {
        (SemaphoreKind::Binary, ExternalHandleType::OpaqueFd) => {
            ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_OPAQUE_FD
        }
        (SemaphoreKind::Binary, ExternalHandleType::OpaqueWin32) => {
            ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_OPAQUE_WIN32
        }
        (SemaphoreKind::Binary, ExternalHandleType::OpaqueWin32Kmt) => {
            ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_OPAQUE_WIN32_KMT
        }
        (SemaphoreKind::Timeline, ExternalHandleType::OpaqueFd) => {
            ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_VK_TIMELINE_SEMAPHORE_FD
        }
        (SemaphoreKind::Timeline, ExternalHandleType::OpaqueWin32) => {
            ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_VK_TIMELINE_SEMAPHORE_WIN32
        }
        (SemaphoreKind::Timeline, ExternalHandleType::OpaqueWin32Kmt) => {
            return Err(InteropError::UnsupportedFeature(
                UnsupportedComputeApiFeature::TimelineSemaphores,
            ));
        }
    })
}

/// Level Zero image format for a registry entry. Layouts of 64 bits per texel
/// are not importable and yield `None`.
pub fn image_format(format: &FormatInfo) -> Option<ze_image_format_t> {
    use ChannelCategory as C;
    let layout = match (format.channel_count, format.channel_size_in_bytes) {
        (1, 1) => ZE_IMAGE_FORMAT_LAYOUT_8,
        (1, 2) => ZE_IMAGE_FORMAT_LAYOUT_16,
        (1, 4) => ZE_IMAGE_FORMAT_LAYOUT_32,
        (2, 1) => ZE_IMAGE_FORMAT_LAYOUT_8_8,
        (2, 2) => ZE_IMAGE_FORMAT_LAYOUT_16_16,
        (4, 1) => ZE_IMAGE_FORMAT_LAYOUT_8_8_8_8,
        (4, 4) => ZE_IMAGE_FORMAT_LAYOUT_32_32_32_32,
        _ => return None,
    };
    let type_ = match (format.category, format.channel_size_in_bytes) {
        (C::Uint, _) => ZE_IMAGE_FORMAT_TYPE_UINT,
        (C::Int, _) => ZE_IMAGE_FORMAT_TYPE_SINT,
        (C::Unorm, _) | (C::Depth, 2) => ZE_IMAGE_FORMAT_TYPE_UNORM,
        (C::Snorm, _) => ZE_IMAGE_FORMAT_TYPE_SNORM,
        (C::Float, _) | (C::Depth, _) => ZE_IMAGE_FORMAT_TYPE_FLOAT,
        (C::Unknown, _) => return None,
    };
    let swizzle = |channel: u32, component: u32| {
        if channel < format.channel_count {
            component
        } else if component == ZE_IMAGE_FORMAT_SWIZZLE_A {
            ZE_IMAGE_FORMAT_SWIZZLE_1
        } else {
            ZE_IMAGE_FORMAT_SWIZZLE_0
        }
    };
    Some(ze_image_format_t {
        layout,
        type_,
        x: swizzle(0, ZE_IMAGE_FORMAT_SWIZZLE_R),
        y: swizzle(1, ZE_IMAGE_FORMAT_SWIZZLE_G),
        z: swizzle(2, ZE_IMAGE_FORMAT_SWIZZLE_B),
        w: swizzle(3, ZE_IMAGE_FORMAT_SWIZZLE_A),
    })
}

fn image_desc(
    info: &ImageImportInfo,
    format: ze_image_format_t,
    next: *const c_void,
) -> ze_image_desc_t {
    let layers = info.array_layers.max(1);
    let (type_, height, depth, arraylevels) = match info.dimensionality {
        ImageDimensionality::D1 if layers > 1 => (ZE_IMAGE_TYPE_1DARRAY, 1, 1, layers),
        ImageDimensionality::D1 => (ZE_IMAGE_TYPE_1D, 1, 1, 0),
        ImageDimensionality::D3 => (ZE_IMAGE_TYPE_3D, info.extent.height, info.extent.depth, 0),
        // Cube maps are shared as their six faces
        ImageDimensionality::D2 | ImageDimensionality::Cube if layers > 1 => {
            (ZE_IMAGE_TYPE_2DARRAY, info.extent.height, 1, layers)
        }
        ImageDimensionality::D2 | ImageDimensionality::Cube => {
            (ZE_IMAGE_TYPE_2D, info.extent.height, 1, 0)
        }
    };
    ze_image_desc_t {
        stype: ZE_STRUCTURE_TYPE_IMAGE_DESC,
        pNext: next,
        flags: ZE_IMAGE_FLAG_KERNEL_WRITE,
        type_,
        format,
        width: info.extent.width as u64,
        height,
        depth,
        arraylevels,
        miplevels: info.mip_levels,
    }
}

/// Checks that only the base level is addressed
fn base_level_only(info: &ImageImportInfo, level: u32) -> InteropResult<()> {
    if level >= info.mip_levels {
        Err(InteropError::InvalidMipLevel {
            level,
            levels: info.mip_levels,
        })
    } else if level > 0 {
        Err(InteropError::UnsupportedFeature(
            UnsupportedComputeApiFeature::MipLevelAccess,
        ))
    } else {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LevelZero;
impl ComputeBackend for LevelZero {
    const API: InteropComputeApi = API;

    type Context = LevelZeroContext;
    type Buffer = LevelZeroBuffer;
    type Image = LevelZeroImage;
    type Semaphore = LevelZeroSemaphore;

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
        let list = stream.as_level_zero()?;
        let functions = FUNCTIONS.get()?;
        check(
            unsafe { (functions.zeCommandListHostSynchronize)(list.0, u64::MAX) },
            "zeCommandListHostSynchronize",
        )
    }
    fn wait_for_completion_timeout(
        stream: StreamWrapper,
        timeout: Duration,
    ) -> InteropResult<bool> {
        let list = stream.as_level_zero()?;
        let functions = FUNCTIONS.get()?;
        match unsafe { (functions.zeCommandListHostSynchronize)(list.0, timeout_nanos(timeout)) } {
            ZE_RESULT_SUCCESS => Ok(true),
            ZE_RESULT_NOT_READY => Ok(false),
            code => check(code, "zeCommandListHostSynchronize").map(|_| false),
        }
    }
}

/// Optional driver capabilities, probed once per context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub bindless_images: bool,
    pub external_semaphores: bool,
}

#[derive(Default)]
struct ExtensionFunctions {
    image_get_device_offset: Option<PFN_zeImageGetDeviceOffsetExp>,
    import_semaphore: Option<PFN_zeDeviceImportExternalSemaphoreExt>,
    release_semaphore: Option<PFN_zeDeviceReleaseExternalSemaphoreExt>,
    append_signal: Option<PFN_zeCommandListAppendSignalExternalSemaphoreExt>,
    append_wait: Option<PFN_zeCommandListAppendWaitExternalSemaphoreExt>,
}

/// Takes a loader export if present, otherwise asks the driver.
///
/// # Safety
/// * `T` must be the function pointer type of `name`
unsafe fn extension_function<T: Copy>(
    functions: &LevelZeroFunctions,
    driver: ze_driver_handle_t,
    exported: Option<T>,
    name: &CStr,
) -> Option<T> {
    if exported.is_some() {
        return exported;
    }
    let mut address = null_mut();
    let code = unsafe {
        (functions.zeDriverGetExtensionFunctionAddress)(driver, name.as_ptr(), &mut address)
    };
    if code != ZE_RESULT_SUCCESS || address.is_null() {
        return None;
    }
    Some(unsafe { std::mem::transmute_copy::<*mut c_void, T>(&address) })
}

fn driver_extensions(
    functions: &LevelZeroFunctions,
    driver: ze_driver_handle_t,
) -> InteropResult<Vec<String>> {
    let mut count = 0;
    check(
        unsafe { (functions.zeDriverGetExtensionProperties)(driver, &mut count, null_mut()) },
        "zeDriverGetExtensionProperties",
    )?;
    let mut properties: Vec<ze_driver_extension_properties_t> = (0..count)
        .map(|_| ze_driver_extension_properties_t {
            name: [0; 256],
            version: 0,
        })
        .collect();
    check(
        unsafe {
            (functions.zeDriverGetExtensionProperties)(driver, &mut count, properties.as_mut_ptr())
        },
        "zeDriverGetExtensionProperties",
    )?;
    properties.truncate(count as usize);
    Ok(properties
        .iter()
        .map(|p| {
            unsafe { CStr::from_ptr(p.name.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        })
        .collect())
}

fn compute_queue_ordinal(functions: &LevelZeroFunctions, device: ze_device_handle_t) -> u32 {
    let mut count = 0;
    if unsafe { (functions.zeDeviceGetCommandQueueGroupProperties)(device, &mut count, null_mut()) }
        != ZE_RESULT_SUCCESS
    {
        return 0;
    }
    let mut groups: Vec<ze_command_queue_group_properties_t> =
        (0..count).map(|_| Default::default()).collect();
    if unsafe {
        (functions.zeDeviceGetCommandQueueGroupProperties)(device, &mut count, groups.as_mut_ptr())
    } != ZE_RESULT_SUCCESS
    {
        return 0;
    }
    groups
        .iter()
        .take(count as usize)
        .position(|g| g.flags & ZE_COMMAND_QUEUE_GROUP_PROPERTY_FLAG_COMPUTE != 0)
        .unwrap_or(0) as u32
}

/// A Level Zero context on the device matching a Vulkan device.
pub struct LevelZeroContext {
    functions: Arc<LevelZeroFunctions>,
    driver: ze_driver_handle_t,
    device: ze_device_handle_t,
    context: ze_context_handle_t,
    compute_ordinal: u32,
    extensions: ExtensionFunctions,
    capabilities: Capabilities,
    /// Pools behind the events handed out by `create_event`
    event_pools: Mutex<HashMap<ZeEvent, usize>>,
    info: ComputeDeviceInfo,
}
unsafe impl Send for LevelZeroContext {}
unsafe impl Sync for LevelZeroContext {}

impl LevelZeroContext {
    pub fn functions(&self) -> &LevelZeroFunctions {
        &self.functions
    }
    pub fn driver(&self) -> ze_driver_handle_t {
        self.driver
    }
    pub fn device(&self) -> ze_device_handle_t {
        self.device
    }
    pub fn context(&self) -> ze_context_handle_t {
        self.context
    }
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Creates a host visible pool and `count` events in it.
    fn raw_event_pool(
        &self,
        count: u32,
    ) -> InteropResult<(ze_event_pool_handle_t, Vec<ze_event_handle_t>)> {
        let f = &*self.functions;
        let desc = ze_event_pool_desc_t {
            stype: ZE_STRUCTURE_TYPE_EVENT_POOL_DESC,
            pNext: null(),
            flags: ZE_EVENT_POOL_FLAG_HOST_VISIBLE,
            count,
        };
        let mut device = self.device;
        let mut pool = null_mut();
        check(
            unsafe { (f.zeEventPoolCreate)(self.context, &desc, 1, &mut device, &mut pool) },
            "zeEventPoolCreate",
        )?;
        let mut events = Vec::with_capacity(count as usize);
        let err = Cell::new(true);
        defer! {
            if err.get() {
                unsafe { (f.zeEventPoolDestroy)(pool) };
            }
        }
        for index in 0..count {
            let desc = ze_event_desc_t {
                stype: ZE_STRUCTURE_TYPE_EVENT_DESC,
                pNext: null(),
                index,
                signal: ZE_EVENT_SCOPE_FLAG_HOST,
                wait: ZE_EVENT_SCOPE_FLAG_HOST,
            };
            let mut event = null_mut();
            let code = unsafe { (f.zeEventCreate)(pool, &desc, &mut event) };
            if let Err(e) = check(code, "zeEventCreate") {
                for &event in &events {
                    unsafe { (f.zeEventDestroy)(event) };
                }
                return Err(e);
            }
            events.push(event);
        }
        err.set(false);
        Ok((pool, events))
    }

    /// Blocks until `event` is signalled or `timeout` passes.
    pub fn synchronize_event(&self, event: ZeEvent, timeout: Duration) -> InteropResult<bool> {
        match unsafe { (self.functions.zeEventHostSynchronize)(event.0, timeout_nanos(timeout)) } {
            ZE_RESULT_SUCCESS => Ok(true),
            ZE_RESULT_NOT_READY => Ok(false),
            code => check(code, "zeEventHostSynchronize").map(|_| false),
        }
    }
    pub fn reset_event(&self, event: ZeEvent) -> InteropResult<()> {
        check(
            unsafe { (self.functions.zeEventHostReset)(event.0) },
            "zeEventHostReset",
        )
    }

    fn import_failed(&self, call: &'static str, code: ze_result_t) -> InteropError {
        log::error!("{call} failed: {}", result_name(code));
        InteropError::MemoryImportFailed {
            api: API,
            code: code as i64,
        }
    }
}
impl Drop for LevelZeroContext {
    fn drop(&mut self) {
        let f = &*self.functions;
        for (event, pool) in self.event_pools.get_mut().drain() {
            unsafe {
                (f.zeEventDestroy)(event.0);
                (f.zeEventPoolDestroy)(pool as ze_event_pool_handle_t);
            }
        }
        unsafe { (f.zeContextDestroy)(self.context) };
    }
}

impl DeviceContext<LevelZero> for LevelZeroContext {
    #[tracing::instrument(skip_all, fields(device = %identity.name))]
    fn new(identity: &DeviceIdentity) -> InteropResult<Arc<Self>> {
        let functions = function_table()?;
        let f = &*functions;
        let mut driver_count = 0;
        check(unsafe { (f.zeDriverGet)(&mut driver_count, null_mut()) }, "zeDriverGet")?;
        let mut drivers = vec![null_mut(); driver_count as usize];
        check(
            unsafe { (f.zeDriverGet)(&mut driver_count, drivers.as_mut_ptr()) },
            "zeDriverGet",
        )?;
        drivers.truncate(driver_count as usize);

        let mut candidates = Vec::new();
        for &driver in &drivers {
            let mut device_count = 0;
            check(
                unsafe { (f.zeDeviceGet)(driver, &mut device_count, null_mut()) },
                "zeDeviceGet",
            )?;
            let mut devices = vec![null_mut(); device_count as usize];
            check(
                unsafe { (f.zeDeviceGet)(driver, &mut device_count, devices.as_mut_ptr()) },
                "zeDeviceGet",
            )?;
            for &device in devices.iter().take(device_count as usize) {
                let mut properties = ze_device_properties_t::default();
                check(
                    unsafe { (f.zeDeviceGetProperties)(device, &mut properties) },
                    "zeDeviceGetProperties",
                )?;
                let uuid = properties.uuid;
                candidates.push(((driver, device, properties), uuid, None));
            }
        }
        let (driver, device, properties) = find_matching_device(identity, API, candidates)?;
        let name = unsafe { CStr::from_ptr(properties.name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let extension_names = driver_extensions(f, driver)?;
        let has_extension = |name: &str| extension_names.iter().any(|e| e == name);
        let extensions = unsafe {
            ExtensionFunctions {
                image_get_device_offset: extension_function(
                    f,
                    driver,
                    f.zeImageGetDeviceOffsetExp,
                    c"zeImageGetDeviceOffsetExp",
                ),
                import_semaphore: extension_function(
                    f,
                    driver,
                    f.zeDeviceImportExternalSemaphoreExt,
                    c"zeDeviceImportExternalSemaphoreExt",
                ),
                release_semaphore: extension_function(
                    f,
                    driver,
                    f.zeDeviceReleaseExternalSemaphoreExt,
                    c"zeDeviceReleaseExternalSemaphoreExt",
                ),
                append_signal: extension_function(
                    f,
                    driver,
                    f.zeCommandListAppendSignalExternalSemaphoreExt,
                    c"zeCommandListAppendSignalExternalSemaphoreExt",
                ),
                append_wait: extension_function(
                    f,
                    driver,
                    f.zeCommandListAppendWaitExternalSemaphoreExt,
                    c"zeCommandListAppendWaitExternalSemaphoreExt",
                ),
            }
        };
        let capabilities = Capabilities {
            bindless_images: has_extension(BINDLESS_IMAGE_EXTENSION)
                && extensions.image_get_device_offset.is_some(),
            external_semaphores: has_extension(EXTERNAL_SEMAPHORE_EXTENSION)
                && extensions.import_semaphore.is_some()
                && extensions.release_semaphore.is_some()
                && extensions.append_signal.is_some()
                && extensions.append_wait.is_some(),
        };
        log::debug!("Level Zero capabilities of {name}: {capabilities:?}");

        let desc = ze_context_desc_t {
            stype: ZE_STRUCTURE_TYPE_CONTEXT_DESC,
            pNext: null(),
            flags: 0,
        };
        let mut context = null_mut();
        check(unsafe { (f.zeContextCreate)(driver, &desc, &mut context) }, "zeContextCreate")?;
        log::info!("Using Level Zero device {name} for Vulkan interop");
        Ok(Arc::new(Self {
            compute_ordinal: compute_queue_ordinal(f, device),
            info: ComputeDeviceInfo {
                api: API,
                name,
                uuid: identity.uuid,
                total_memory: 0,
                max_allocation_size: properties.maxMemAllocSize,
            },
            functions,
            driver,
            device,
            context,
            extensions,
            capabilities,
            event_pools: Mutex::new(HashMap::new()),
        }))
    }
    fn device_info(&self) -> &ComputeDeviceInfo {
        &self.info
    }

    #[tracing::instrument(skip_all)]
    unsafe fn import_buffer(
        self: &Arc<Self>,
        source: &dyn ExternalBufferSource,
    ) -> InteropResult<LevelZeroBuffer> {
        let size = source.buffer_size();
        check_import_size(size, self.info.max_allocation_size)?;
        let handle_type = ExternalHandleType::native();
        let handle = source.export_memory_handle(handle_type)?;
        let import = memory_import(handle.raw(), handle_type);
        let desc = ze_device_mem_alloc_desc_t {
            stype: ZE_STRUCTURE_TYPE_DEVICE_MEM_ALLOC_DESC,
            pNext: import.as_ptr(),
            flags: 0,
            ordinal: 0,
        };
        let mut ptr = null_mut();
        let code = unsafe {
            (self.functions.zeMemAllocDevice)(
                self.context,
                &desc,
                source.allocation_size() as usize,
                0,
                self.device,
                &mut ptr,
            )
        };
        if code != ZE_RESULT_SUCCESS {
            return Err(self.import_failed("zeMemAllocDevice", code));
        }
        Ok(LevelZeroBuffer {
            ptr,
            size,
            handle: handle.settle(driver_consumes_handle(handle_type)),
            context: self.clone(),
        })
    }

    #[tracing::instrument(skip_all, fields(flavor = ?flavor))]
    unsafe fn import_image(
        self: &Arc<Self>,
        source: &dyn ExternalImageSource,
        flavor: ImageFlavor,
    ) -> InteropResult<LevelZeroImage> {
        let info = source.image_info();
        let format = get_image_format_info(info.format);
        let ze_format =
            image_format(format).ok_or_else(|| InteropError::format_unsupported(info.format, API))?;
        let path =
            choose_image_import_path(bindless_images_mode(), self.capabilities.bindless_images)?;
        let handle_type = ExternalHandleType::native();
        let handle = source.export_memory_handle(handle_type)?;
        let import = memory_import(handle.raw(), handle_type);
        let bindless = ze_image_bindless_exp_desc_t {
            stype: ZE_STRUCTURE_TYPE_BINDLESS_IMAGE_EXP_DESC,
            pNext: import.as_ptr(),
            flags: ZE_IMAGE_BINDLESS_EXP_FLAG_BINDLESS,
        };
        let next = match path {
            ImageImportPath::Bindless => (&bindless as *const ze_image_bindless_exp_desc_t).cast(),
            ImageImportPath::Plain => import.as_ptr(),
        };
        let desc = image_desc(&info, ze_format, next);
        let mut raw_image = null_mut();
        let code = unsafe {
            (self.functions.zeImageCreate)(self.context, self.device, &desc, &mut raw_image)
        };
        match (code, path) {
            (ZE_RESULT_SUCCESS, _) => (),
            (ZE_RESULT_ERROR_UNSUPPORTED_FEATURE, ImageImportPath::Plain) => {
                return Err(InteropError::UnsupportedFeature(
                    UnsupportedComputeApiFeature::NonBindlessImages,
                ));
            }
            (ZE_RESULT_ERROR_UNSUPPORTED_FEATURE, ImageImportPath::Bindless) => {
                return Err(InteropError::UnsupportedFeature(
                    UnsupportedComputeApiFeature::BindlessImages,
                ));
            }
            (code, _) => return Err(self.import_failed("zeImageCreate", code)),
        }
        let mut image = LevelZeroImage {
            image: ZeImage(raw_image),
            bindless_offset: None,
            info,
            format,
            flavor,
            handle: handle.settle(driver_consumes_handle(handle_type)),
            context: self.clone(),
        };
        if path == ImageImportPath::Bindless {
            if let Some(get_offset) = self.extensions.image_get_device_offset {
                let mut offset = 0;
                check(
                    unsafe { get_offset(raw_image, &mut offset) },
                    "zeImageGetDeviceOffsetExp",
                )?;
                image.bindless_offset = Some(offset);
            }
        }
        Ok(image)
    }

    #[tracing::instrument(skip_all)]
    unsafe fn import_semaphore(
        self: &Arc<Self>,
        source: &dyn ExternalSemaphoreSource,
    ) -> InteropResult<LevelZeroSemaphore> {
        let unsupported =
            || InteropError::UnsupportedFeature(UnsupportedComputeApiFeature::ExternalSemaphores);
        if !self.capabilities.external_semaphores {
            return Err(unsupported());
        }
        let import = self.extensions.import_semaphore.ok_or_else(unsupported)?;
        let kind = source.semaphore_kind();
        let handle_type = ExternalHandleType::native();
        let flags = semaphore_flags(kind, handle_type)?;
        let handle = source.export_semaphore_handle(handle_type)?;
        let fd_desc;
        let win32_desc;
        let next: *const c_void = match handle.raw() {
            RawExternalHandle::Fd(fd) => {
                fd_desc = ze_external_semaphore_fd_ext_desc_t {
                    stype: ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_FD_EXT_DESC,
                    pNext: null(),
                    fd,
                };
                (&fd_desc as *const ze_external_semaphore_fd_ext_desc_t).cast()
            }
            RawExternalHandle::Win32(h) => {
                win32_desc = ze_external_semaphore_win32_ext_desc_t {
                    stype: ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_WIN32_EXT_DESC,
                    pNext: null(),
                    handle: h,
                    name: null(),
                };
                (&win32_desc as *const ze_external_semaphore_win32_ext_desc_t).cast()
            }
        };
        let desc = ze_external_semaphore_ext_desc_t {
            stype: ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_EXT_DESC,
            pNext: next,
            flags,
        };
        let mut semaphore = null_mut();
        let code = unsafe { import(self.device, &desc, &mut semaphore) };
        if code != ZE_RESULT_SUCCESS {
            log::error!("zeDeviceImportExternalSemaphoreExt failed: {}", result_name(code));
            return Err(InteropError::SemaphoreImportFailed {
                api: API,
                code: code as i64,
            });
        }
        Ok(LevelZeroSemaphore {
            semaphore,
            kind,
            handle: handle.settle(driver_consumes_handle(handle_type)),
            context: self.clone(),
        })
    }

    fn create_stream(&self) -> InteropResult<StreamWrapper> {
        let desc = ze_command_queue_desc_t {
            stype: ZE_STRUCTURE_TYPE_COMMAND_QUEUE_DESC,
            pNext: null(),
            ordinal: self.compute_ordinal,
            index: 0,
            flags: ZE_COMMAND_QUEUE_FLAG_IN_ORDER,
            mode: ZE_COMMAND_QUEUE_MODE_ASYNCHRONOUS,
            priority: 0,
        };
        let mut list = null_mut();
        check(
            unsafe {
                (self.functions.zeCommandListCreateImmediate)(
                    self.context,
                    self.device,
                    &desc,
                    &mut list,
                )
            },
            "zeCommandListCreateImmediate",
        )?;
        Ok(StreamWrapper::LevelZero(ZeCommandList(list)))
    }
    unsafe fn destroy_stream(&self, stream: StreamWrapper) -> InteropResult<()> {
        let list = stream.as_level_zero()?;
        check(
            unsafe { (self.functions.zeCommandListDestroy)(list.0) },
            "zeCommandListDestroy",
        )
    }
    fn create_event(&self) -> InteropResult<ComputeEvent> {
        let (pool, events) = self.raw_event_pool(1)?;
        let event = ZeEvent(events[0]);
        self.event_pools.lock().insert(event, pool as usize);
        Ok(ComputeEvent::LevelZero(event))
    }
    unsafe fn destroy_event(&self, event: ComputeEvent) -> InteropResult<()> {
        let ComputeEvent::LevelZero(event) = event else {
            return event.expect_api(API);
        };
        let Some(pool) = self.event_pools.lock().remove(&event) else {
            log::warn!("Event {event:?} was not created by this context, leaving it alone");
            return Ok(());
        };
        check(
            unsafe { (self.functions.zeEventDestroy)(event.0) },
            "zeEventDestroy",
        )?;
        check(
            unsafe { (self.functions.zeEventPoolDestroy)(pool as ze_event_pool_handle_t) },
            "zeEventPoolDestroy",
        )
    }
}

/// A host visible pool of pre-allocated events for chaining Level Zero commands.
pub struct EventPool {
    pool: ze_event_pool_handle_t,
    events: Vec<ZeEvent>,
    context: Arc<LevelZeroContext>,
}
unsafe impl Send for EventPool {}
unsafe impl Sync for EventPool {}
impl EventPool {
    pub fn new(context: &Arc<LevelZeroContext>, count: u32) -> InteropResult<Self> {
        let (pool, events) = context.raw_event_pool(count)?;
        Ok(Self {
            pool,
            events: events.into_iter().map(ZeEvent).collect(),
            context: context.clone(),
        })
    }
    pub fn len(&self) -> usize {
        self.events.len()
    }
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
    pub fn event(&self, index: usize) -> Option<ZeEvent> {
        self.events.get(index).copied()
    }
    pub fn compute_event(&self, index: usize) -> Option<ComputeEvent> {
        self.event(index).map(ComputeEvent::LevelZero)
    }
    pub fn host_synchronize(&self, index: usize, timeout: Duration) -> InteropResult<bool> {
        match self.event(index) {
            Some(event) => self.context.synchronize_event(event, timeout),
            None => Ok(false),
        }
    }
    pub fn reset(&self, index: usize) -> InteropResult<()> {
        match self.event(index) {
            Some(event) => self.context.reset_event(event),
            None => Ok(()),
        }
    }
}
impl Drop for EventPool {
    fn drop(&mut self) {
        let f = &*self.context.functions;
        unsafe {
            for event in &self.events {
                (f.zeEventDestroy)(event.0);
            }
            (f.zeEventPoolDestroy)(self.pool);
        }
    }
}

pub struct LevelZeroBuffer {
    ptr: *mut c_void,
    size: u64,
    handle: ImportedHandle,
    context: Arc<LevelZeroContext>,
}
unsafe impl Send for LevelZeroBuffer {}
unsafe impl Sync for LevelZeroBuffer {}
impl LevelZeroBuffer {
    fn check_span(&self, len: usize) -> InteropResult<()> {
        if len as u64 > self.size {
            return Err(InteropError::CopyOutOfBounds {
                requested: len as u64,
                available: self.size,
            });
        }
        Ok(())
    }
    fn append_copy(
        &self,
        list: ZeCommandList,
        dst: *mut c_void,
        src: *const c_void,
        len: usize,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let mut events = CommandEvents::next(signal)?;
        check(
            unsafe {
                (self.context.functions.zeCommandListAppendMemoryCopy)(
                    list.0,
                    dst,
                    src,
                    len,
                    events.signal,
                    events.wait_count(),
                    events.wait_ptr(),
                )
            },
            "zeCommandListAppendMemoryCopy",
        )
    }
}
impl ExternalBuffer<LevelZero> for LevelZeroBuffer {
    fn device_ptr(&self) -> u64 {
        self.ptr as u64
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
        let list = stream.as_level_zero()?;
        self.check_span(dst.len())?;
        self.append_copy(list, dst.as_mut_ptr().cast(), self.ptr, dst.len(), None)
    }
    unsafe fn copy_from_host_async(&self, src: &[u8], stream: StreamWrapper) -> InteropResult<()> {
        let list = stream.as_level_zero()?;
        self.check_span(src.len())?;
        self.append_copy(list, self.ptr, src.as_ptr().cast(), src.len(), None)
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let list = stream.as_level_zero()?;
        self.append_copy(list, dst as *mut c_void, self.ptr, self.size as usize, signal)
    }
}
impl Drop for LevelZeroBuffer {
    fn drop(&mut self) {
        unsafe { (self.context.functions.zeMemFree)(self.context.context, self.ptr) };
    }
}

pub struct LevelZeroImage {
    image: ZeImage,
    /// Set for images imported through the bindless path
    bindless_offset: Option<u64>,
    info: ImageImportInfo,
    format: &'static FormatInfo,
    flavor: ImageFlavor,
    handle: ImportedHandle,
    context: Arc<LevelZeroContext>,
}
unsafe impl Send for LevelZeroImage {}
unsafe impl Sync for LevelZeroImage {}
impl LevelZeroImage {
    pub fn is_bindless(&self) -> bool {
        self.bindless_offset.is_some()
    }
    fn append_to_memory(
        &self,
        list: ZeCommandList,
        dst: *mut c_void,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let mut events = CommandEvents::next(signal)?;
        check(
            unsafe {
                (self.context.functions.zeCommandListAppendImageCopyToMemory)(
                    list.0,
                    dst,
                    self.image.0,
                    null(),
                    events.signal,
                    events.wait_count(),
                    events.wait_ptr(),
                )
            },
            "zeCommandListAppendImageCopyToMemory",
        )
    }
}
impl ExternalImage<LevelZero> for LevelZeroImage {
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
        base_level_only(&self.info, level)?;
        Ok(match self.bindless_offset {
            Some(offset) => ImageHandle::LevelZeroBindless(offset),
            None => ImageHandle::LevelZeroImage(self.image),
        })
    }
    fn texture_object(&self) -> Option<ImageHandle> {
        (self.flavor == ImageFlavor::Sampled).then_some(ImageHandle::LevelZeroImage(self.image))
    }
    fn mipmapped_array_level(&self, level: u32) -> InteropResult<ImageHandle> {
        base_level_only(&self.info, level)?;
        Ok(ImageHandle::LevelZeroImage(self.image))
    }
    unsafe fn copy_to_host_async(
        &self,
        level: u32,
        dst: &mut [u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        let list = stream.as_level_zero()?;
        base_level_only(&self.info, level)?;
        check_host_span(&level_layout(&self.info, self.format, level)?, dst.len())?;
        self.append_to_memory(list, dst.as_mut_ptr().cast(), None)
    }
    unsafe fn copy_from_host_async(
        &self,
        level: u32,
        src: &[u8],
        stream: StreamWrapper,
    ) -> InteropResult<()> {
        let list = stream.as_level_zero()?;
        base_level_only(&self.info, level)?;
        check_host_span(&level_layout(&self.info, self.format, level)?, src.len())?;
        let mut events = CommandEvents::next(None)?;
        check(
            unsafe {
                (self.context.functions.zeCommandListAppendImageCopyFromMemory)(
                    list.0,
                    self.image.0,
                    src.as_ptr().cast(),
                    null(),
                    events.signal,
                    events.wait_count(),
                    events.wait_ptr(),
                )
            },
            "zeCommandListAppendImageCopyFromMemory",
        )
    }
    unsafe fn copy_to_device_ptr_async(
        &self,
        level: u32,
        dst: u64,
        stream: StreamWrapper,
        signal: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let list = stream.as_level_zero()?;
        base_level_only(&self.info, level)?;
        self.append_to_memory(list, dst as *mut c_void, signal)
    }
}
impl Drop for LevelZeroImage {
    fn drop(&mut self) {
        unsafe { (self.context.functions.zeImageDestroy)(self.image.0) };
    }
}

pub struct LevelZeroSemaphore {
    semaphore: ze_external_semaphore_ext_handle_t,
    kind: SemaphoreKind,
    handle: ImportedHandle,
    context: Arc<LevelZeroContext>,
}
unsafe impl Send for LevelZeroSemaphore {}
unsafe impl Sync for LevelZeroSemaphore {}
impl LevelZeroSemaphore {
    fn fence_value(&self, value: u64) -> u64 {
        match self.kind {
            SemaphoreKind::Timeline => value,
            SemaphoreKind::Binary => 0,
        }
    }
    fn missing_entry_point() -> InteropError {
        InteropError::UnsupportedFeature(UnsupportedComputeApiFeature::ExternalSemaphores)
    }
}
impl ExternalSemaphore<LevelZero> for LevelZeroSemaphore {
    fn kind(&self) -> SemaphoreKind {
        self.kind
    }
    fn was_handle_consumed(&self) -> bool {
        self.handle.was_handle_consumed()
    }
    unsafe fn signal_async(&self, stream: StreamWrapper, value: u64) -> InteropResult<()> {
        let list = stream.as_level_zero()?;
        let append = self
            .context
            .extensions
            .append_signal
            .ok_or_else(Self::missing_entry_point)?;
        let mut events = CommandEvents::next(None)?;
        let mut semaphore = self.semaphore;
        let mut params = ze_external_semaphore_signal_params_ext_t {
            stype: ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS_EXT,
            pNext: null(),
            value: self.fence_value(value),
        };
        check(
            unsafe {
                append(
                    list.0,
                    1,
                    &mut semaphore,
                    &mut params,
                    events.signal,
                    events.wait_count(),
                    events.wait_ptr(),
                )
            },
            "zeCommandListAppendSignalExternalSemaphoreExt",
        )
    }
    unsafe fn wait_async(
        &self,
        stream: StreamWrapper,
        value: u64,
        done: Option<&ComputeEvent>,
    ) -> InteropResult<()> {
        let list = stream.as_level_zero()?;
        let append = self
            .context
            .extensions
            .append_wait
            .ok_or_else(Self::missing_entry_point)?;
        let mut events = CommandEvents::next(done)?;
        let mut semaphore = self.semaphore;
        let mut params = ze_external_semaphore_wait_params_ext_t {
            stype: ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_WAIT_PARAMS_EXT,
            pNext: null(),
            value: self.fence_value(value),
        };
        check(
            unsafe {
                append(
                    list.0,
                    1,
                    &mut semaphore,
                    &mut params,
                    events.signal,
                    events.wait_count(),
                    events.wait_ptr(),
                )
            },
            "zeCommandListAppendWaitExternalSemaphoreExt",
        )
    }
}
impl Drop for LevelZeroSemaphore {
    fn drop(&mut self) {
        if let Some(release) = self.context.extensions.release_semaphore {
            unsafe { release(self.semaphore) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use types::ImageExtent;

    #[test]
    fn bindless_path_selection() {
        use BindlessImagesMode::*;
        assert_eq!(choose_image_import_path(Auto, true).unwrap(), ImageImportPath::Bindless);
        assert_eq!(choose_image_import_path(Forced, true).unwrap(), ImageImportPath::Bindless);
        assert_eq!(choose_image_import_path(Disabled, true).unwrap(), ImageImportPath::Plain);
        assert_eq!(choose_image_import_path(Disabled, false).unwrap(), ImageImportPath::Plain);
        for mode in [Auto, Forced] {
            assert!(matches!(
                choose_image_import_path(mode, false),
                Err(InteropError::UnsupportedFeature(
                    UnsupportedComputeApiFeature::BindlessImages
                ))
            ));
        }
    }

    #[test]
    fn bindless_toggle() {
        set_level_zero_use_bindless_images_interop(true);
        assert_eq!(bindless_images_mode(), BindlessImagesMode::Forced);
        set_level_zero_use_bindless_images_interop(false);
        assert_eq!(bindless_images_mode(), BindlessImagesMode::Disabled);
        reset_level_zero_bindless_images_mode();
        assert_eq!(bindless_images_mode(), BindlessImagesMode::Auto);
    }

    #[test]
    fn sixty_four_bit_layouts_are_rejected() {
        for format in crate::format::FORMATS {
            let supported = image_format(format).is_some();
            assert_eq!(supported, format.format_size_in_bytes() != 8, "{}", format.name);
        }
        assert!(image_format(get_image_format_info(vk::Format::R16G16B16A16_SFLOAT)).is_none());
        let rg = image_format(get_image_format_info(vk::Format::R8G8_UNORM)).unwrap();
        assert_eq!(rg.layout, ZE_IMAGE_FORMAT_LAYOUT_8_8);
        assert_eq!(rg.type_, ZE_IMAGE_FORMAT_TYPE_UNORM);
        assert_eq!(
            (rg.x, rg.y, rg.z, rg.w),
            (
                ZE_IMAGE_FORMAT_SWIZZLE_R,
                ZE_IMAGE_FORMAT_SWIZZLE_G,
                ZE_IMAGE_FORMAT_SWIZZLE_0,
                ZE_IMAGE_FORMAT_SWIZZLE_1
            )
        );
        let depth = image_format(get_image_format_info(vk::Format::D32_SFLOAT)).unwrap();
        assert_eq!(depth.type_, ZE_IMAGE_FORMAT_TYPE_FLOAT);
    }

    #[test]
    fn image_descriptors() {
        let format = image_format(get_image_format_info(vk::Format::R32_SFLOAT)).unwrap();
        let mut info = ImageImportInfo {
            format: vk::Format::R32_SFLOAT,
            extent: ImageExtent::new_2d(515, 201),
            mip_levels: 3,
            array_layers: 1,
            dimensionality: ImageDimensionality::D2,
            usage: vk::ImageUsageFlags::STORAGE,
        };
        let desc = image_desc(&info, format, null());
        assert_eq!(
            (desc.type_, desc.width, desc.height, desc.arraylevels),
            (ZE_IMAGE_TYPE_2D, 515, 201, 0)
        );
        assert_eq!(desc.miplevels, 3);
        info.array_layers = 6;
        info.dimensionality = ImageDimensionality::Cube;
        let cube = image_desc(&info, format, null());
        assert_eq!((cube.type_, cube.arraylevels), (ZE_IMAGE_TYPE_2DARRAY, 6));
        info.array_layers = 1;
        info.dimensionality = ImageDimensionality::D3;
        info.extent.depth = 4;
        assert_eq!(image_desc(&info, format, null()).depth, 4);
    }

    #[test]
    fn only_the_base_level_is_addressable() {
        let info = ImageImportInfo {
            format: vk::Format::R8_UINT,
            extent: ImageExtent::new_2d(16, 16),
            mip_levels: 2,
            array_layers: 1,
            dimensionality: ImageDimensionality::D2,
            usage: vk::ImageUsageFlags::STORAGE,
        };
        assert!(base_level_only(&info, 0).is_ok());
        assert!(matches!(
            base_level_only(&info, 1),
            Err(InteropError::UnsupportedFeature(UnsupportedComputeApiFeature::MipLevelAccess))
        ));
        assert!(matches!(
            base_level_only(&info, 2),
            Err(InteropError::InvalidMipLevel { level: 2, levels: 2 })
        ));
    }

    #[test]
    fn next_command_events_are_consumed_once_per_thread() {
        let signal = ZeEvent(16 as *mut c_void);
        let wait = ZeEvent(32 as *mut c_void);
        set_level_zero_next_command_events(Some(signal), &[wait]);
        std::thread::spawn(|| {
            let events = CommandEvents::next(None).unwrap();
            assert!(events.signal.is_null());
            assert_eq!(events.wait_count(), 0);
        })
        .join()
        .unwrap();
        let mut events = CommandEvents::next(None).unwrap();
        assert_eq!(events.signal, signal.0);
        assert_eq!(events.waits, vec![wait.0]);
        assert!(!events.wait_ptr().is_null());
        let mut next = CommandEvents::next(None).unwrap();
        assert!(next.signal.is_null());
        assert!(next.wait_ptr().is_null());
    }

    #[test]
    fn explicit_signal_wins() {
        let pending = ZeEvent(16 as *mut c_void);
        let explicit = ZeEvent(48 as *mut c_void);
        set_level_zero_next_command_events(Some(pending), &[]);
        let events = CommandEvents::next(Some(&ComputeEvent::LevelZero(explicit))).unwrap();
        assert_eq!(events.signal, explicit.0);
        let foreign = ComputeEvent::Cuda(crate::stream::CuEvent(8 as *mut c_void));
        assert!(CommandEvents::next(Some(&foreign)).is_err());
    }

    #[test]
    fn timeline_kmt_handles_are_rejected() {
        assert!(
            semaphore_flags(SemaphoreKind::Timeline, ExternalHandleType::OpaqueWin32Kmt).is_err()
        );
        assert_eq!(
            semaphore_flags(SemaphoreKind::Binary, ExternalHandleType::OpaqueFd).unwrap(),
            ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_OPAQUE_FD
        );
        assert_eq!(timeout_nanos(Duration::MAX), u64::MAX);
    }
}
