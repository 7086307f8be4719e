/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! The subset of the Level Zero loader API used for Vulkan interop.
#![allow(non_camel_case_types, non_snake_case, dead_code)]

use std::ffi::{c_char, c_int, c_void};
use std::ptr::{null, null_mut};

use crate::loader::function_table;

pub type ze_result_t = u32;
pub type ze_driver_handle_t = *mut c_void;
pub type ze_device_handle_t = *mut c_void;
pub type ze_context_handle_t = *mut c_void;
pub type ze_command_list_handle_t = *mut c_void;
pub type ze_event_pool_handle_t = *mut c_void;
pub type ze_event_handle_t = *mut c_void;
pub type ze_image_handle_t = *mut c_void;
pub type ze_external_semaphore_ext_handle_t = *mut c_void;

pub const ZE_RESULT_SUCCESS: ze_result_t = 0;
pub const ZE_RESULT_NOT_READY: ze_result_t = 1;
pub const ZE_RESULT_ERROR_OUT_OF_DEVICE_MEMORY: ze_result_t = 0x70000002;
pub const ZE_RESULT_ERROR_UNSUPPORTED_FEATURE: ze_result_t = 0x78000003;

pub const ZE_INIT_FLAG_GPU_ONLY: u32 = 1;

pub const ZE_STRUCTURE_TYPE_DEVICE_PROPERTIES: u32 = 0x3;
pub const ZE_STRUCTURE_TYPE_COMMAND_QUEUE_GROUP_PROPERTIES: u32 = 0x6;
pub const ZE_STRUCTURE_TYPE_CONTEXT_DESC: u32 = 0xd;
pub const ZE_STRUCTURE_TYPE_COMMAND_QUEUE_DESC: u32 = 0xe;
pub const ZE_STRUCTURE_TYPE_EVENT_POOL_DESC: u32 = 0x10;
pub const ZE_STRUCTURE_TYPE_EVENT_DESC: u32 = 0x11;
pub const ZE_STRUCTURE_TYPE_IMAGE_DESC: u32 = 0x13;
pub const ZE_STRUCTURE_TYPE_DEVICE_MEM_ALLOC_DESC: u32 = 0x15;
pub const ZE_STRUCTURE_TYPE_EXTERNAL_MEMORY_IMPORT_FD: u32 = 0x19;
pub const ZE_STRUCTURE_TYPE_EXTERNAL_MEMORY_IMPORT_WIN32: u32 = 0x22;
pub const ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_EXT_DESC: u32 = 0x0002001a;
pub const ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_WIN32_EXT_DESC: u32 = 0x0002001b;
pub const ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_FD_EXT_DESC: u32 = 0x0002001c;
pub const ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS_EXT: u32 = 0x0002001d;
pub const ZE_STRUCTURE_TYPE_EXTERNAL_SEMAPHORE_WAIT_PARAMS_EXT: u32 = 0x0002001e;
pub const ZE_STRUCTURE_TYPE_BINDLESS_IMAGE_EXP_DESC: u32 = 0x00020023;

pub const ZE_EXTERNAL_MEMORY_TYPE_FLAG_OPAQUE_FD: u32 = 0x1;
pub const ZE_EXTERNAL_MEMORY_TYPE_FLAG_OPAQUE_WIN32: u32 = 0x4;
pub const ZE_EXTERNAL_MEMORY_TYPE_FLAG_OPAQUE_WIN32_KMT: u32 = 0x8;

pub const ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_OPAQUE_FD: u32 = 0x1;
pub const ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_OPAQUE_WIN32: u32 = 0x2;
pub const ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_OPAQUE_WIN32_KMT: u32 = 0x4;
pub const ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_VK_TIMELINE_SEMAPHORE_FD: u32 = 0x80;
pub const ZE_EXTERNAL_SEMAPHORE_EXT_FLAG_VK_TIMELINE_SEMAPHORE_WIN32: u32 = 0x100;

pub const ZE_COMMAND_QUEUE_GROUP_PROPERTY_FLAG_COMPUTE: u32 = 0x1;
pub const ZE_COMMAND_QUEUE_FLAG_IN_ORDER: u32 = 0x2;
pub const ZE_COMMAND_QUEUE_MODE_ASYNCHRONOUS: u32 = 2;

pub const ZE_EVENT_POOL_FLAG_HOST_VISIBLE: u32 = 0x1;
pub const ZE_EVENT_SCOPE_FLAG_HOST: u32 = 0x4;

pub const ZE_IMAGE_FLAG_KERNEL_WRITE: u32 = 0x1;
pub const ZE_IMAGE_BINDLESS_EXP_FLAG_BINDLESS: u32 = 0x1;
pub const ZE_IMAGE_BINDLESS_EXP_FLAG_SAMPLED_IMAGE: u32 = 0x2;

pub const ZE_IMAGE_TYPE_1D: u32 = 0;
pub const ZE_IMAGE_TYPE_1DARRAY: u32 = 1;
pub const ZE_IMAGE_TYPE_2D: u32 = 2;
pub const ZE_IMAGE_TYPE_2DARRAY: u32 = 3;
pub const ZE_IMAGE_TYPE_3D: u32 = 4;

pub const ZE_IMAGE_FORMAT_LAYOUT_8: u32 = 0;
pub const ZE_IMAGE_FORMAT_LAYOUT_16: u32 = 1;
pub const ZE_IMAGE_FORMAT_LAYOUT_32: u32 = 2;
pub const ZE_IMAGE_FORMAT_LAYOUT_8_8: u32 = 3;
pub const ZE_IMAGE_FORMAT_LAYOUT_8_8_8_8: u32 = 4;
pub const ZE_IMAGE_FORMAT_LAYOUT_16_16: u32 = 5;
pub const ZE_IMAGE_FORMAT_LAYOUT_16_16_16_16: u32 = 6;
pub const ZE_IMAGE_FORMAT_LAYOUT_32_32: u32 = 7;
pub const ZE_IMAGE_FORMAT_LAYOUT_32_32_32_32: u32 = 8;

pub const ZE_IMAGE_FORMAT_TYPE_UINT: u32 = 0;
pub const ZE_IMAGE_FORMAT_TYPE_SINT: u32 = 1;
pub const ZE_IMAGE_FORMAT_TYPE_UNORM: u32 = 2;
pub const ZE_IMAGE_FORMAT_TYPE_SNORM: u32 = 3;
pub const ZE_IMAGE_FORMAT_TYPE_FLOAT: u32 = 4;

pub const ZE_IMAGE_FORMAT_SWIZZLE_R: u32 = 0;
pub const ZE_IMAGE_FORMAT_SWIZZLE_G: u32 = 1;
pub const ZE_IMAGE_FORMAT_SWIZZLE_B: u32 = 2;
pub const ZE_IMAGE_FORMAT_SWIZZLE_A: u32 = 3;
pub const ZE_IMAGE_FORMAT_SWIZZLE_0: u32 = 4;
pub const ZE_IMAGE_FORMAT_SWIZZLE_1: u32 = 5;

pub const BINDLESS_IMAGE_EXTENSION: &str = "ZE_experimental_bindless_image";
pub const EXTERNAL_SEMAPHORE_EXTENSION: &str = "ZE_extension_external_semaphores";

#[repr(C)]
pub struct ze_device_properties_t {
    pub stype: u32,
    pub pNext: *mut c_void,
    pub type_: u32,
    pub vendorId: u32,
    pub deviceId: u32,
    pub flags: u32,
    pub subdeviceId: u32,
    pub coreClockRate: u32,
    pub maxMemAllocSize: u64,
    pub maxHardwareContexts: u32,
    pub maxCommandQueuePriority: u32,
    pub numThreadsPerEU: u32,
    pub physicalEUSimdWidth: u32,
    pub numEUsPerSubslice: u32,
    pub numSubslicesPerSlice: u32,
    pub numSlices: u32,
    pub timerResolution: u64,
    pub timestampValidBits: u32,
    pub kernelTimestampValidBits: u32,
    pub uuid: [u8; 16],
    pub name: [c_char; 256],
}
impl Default for ze_device_properties_t {
    fn default() -> Self {
        // Integers, arrays and a null pointer
        let mut properties: Self = unsafe { std::mem::zeroed() };
        properties.stype = ZE_STRUCTURE_TYPE_DEVICE_PROPERTIES;
        properties
    }
}

#[repr(C)]
pub struct ze_command_queue_group_properties_t {
    pub stype: u32,
    pub pNext: *mut c_void,
    pub flags: u32,
    pub maxMemoryFillPatternSize: usize,
    pub numQueues: u32,
}
impl Default for ze_command_queue_group_properties_t {
    fn default() -> Self {
        Self {
            stype: ZE_STRUCTURE_TYPE_COMMAND_QUEUE_GROUP_PROPERTIES,
            pNext: null_mut(),
            flags: 0,
            maxMemoryFillPatternSize: 0,
            numQueues: 0,
        }
    }
}

#[repr(C)]
pub struct ze_driver_extension_properties_t {
    pub name: [c_char; 256],
    pub version: u32,
}

#[repr(C)]
pub struct ze_context_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub flags: u32,
}

#[repr(C)]
pub struct ze_command_queue_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub ordinal: u32,
    pub index: u32,
    pub flags: u32,
    pub mode: u32,
    pub priority: u32,
}

#[repr(C)]
pub struct ze_event_pool_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub flags: u32,
    pub count: u32,
}

#[repr(C)]
pub struct ze_event_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub index: u32,
    pub signal: u32,
    pub wait: u32,
}

#[repr(C)]
pub struct ze_device_mem_alloc_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub flags: u32,
    pub ordinal: u32,
}

#[repr(C)]
pub struct ze_external_memory_import_fd_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub flags: u32,
    pub fd: c_int,
}

#[repr(C)]
pub struct ze_external_memory_import_win32_handle_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub flags: u32,
    pub handle: *mut c_void,
    pub name: *const c_void,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ze_image_format_t {
    pub layout: u32,
    pub type_: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub w: u32,
}

#[repr(C)]
pub struct ze_image_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub flags: u32,
    pub type_: u32,
    pub format: ze_image_format_t,
    pub width: u64,
    pub height: u32,
    pub depth: u32,
    pub arraylevels: u32,
    pub miplevels: u32,
}

#[repr(C)]
pub struct ze_image_bindless_exp_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub flags: u32,
}

#[repr(C)]
pub struct ze_external_semaphore_ext_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub flags: u32,
}

#[repr(C)]
pub struct ze_external_semaphore_fd_ext_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub fd: c_int,
}

#[repr(C)]
pub struct ze_external_semaphore_win32_ext_desc_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub handle: *mut c_void,
    pub name: *const c_char,
}

#[repr(C)]
pub struct ze_external_semaphore_signal_params_ext_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub value: u64,
}

#[repr(C)]
pub struct ze_external_semaphore_wait_params_ext_t {
    pub stype: u32,
    pub pNext: *const c_void,
    pub value: u64,
}

/// Chained import descriptor for either handle flavour
pub enum MemoryImport {
    Fd(ze_external_memory_import_fd_t),
    Win32(ze_external_memory_import_win32_handle_t),
}
impl MemoryImport {
    pub fn as_ptr(&self) -> *const c_void {
        match self {
            Self::Fd(desc) => (desc as *const ze_external_memory_import_fd_t).cast(),
            Self::Win32(desc) => (desc as *const ze_external_memory_import_win32_handle_t).cast(),
        }
    }
}
impl ze_external_memory_import_fd_t {
    pub fn new(fd: c_int) -> Self {
        Self {
            stype: ZE_STRUCTURE_TYPE_EXTERNAL_MEMORY_IMPORT_FD,
            pNext: null(),
            flags: ZE_EXTERNAL_MEMORY_TYPE_FLAG_OPAQUE_FD,
            fd,
        }
    }
}

pub type PFN_zeImageGetDeviceOffsetExp =
    unsafe extern "C" fn(ze_image_handle_t, *mut u64) -> ze_result_t;
pub type PFN_zeDeviceImportExternalSemaphoreExt = unsafe extern "C" fn(
    ze_device_handle_t,
    *const ze_external_semaphore_ext_desc_t,
    *mut ze_external_semaphore_ext_handle_t,
) -> ze_result_t;
pub type PFN_zeDeviceReleaseExternalSemaphoreExt =
    unsafe extern "C" fn(ze_external_semaphore_ext_handle_t) -> ze_result_t;
pub type PFN_zeCommandListAppendSignalExternalSemaphoreExt = unsafe extern "C" fn(
    ze_command_list_handle_t,
    u32,
    *mut ze_external_semaphore_ext_handle_t,
    *mut ze_external_semaphore_signal_params_ext_t,
    ze_event_handle_t,
    u32,
    *mut ze_event_handle_t,
) -> ze_result_t;
pub type PFN_zeCommandListAppendWaitExternalSemaphoreExt = unsafe extern "C" fn(
    ze_command_list_handle_t,
    u32,
    *mut ze_external_semaphore_ext_handle_t,
    *mut ze_external_semaphore_wait_params_ext_t,
    ze_event_handle_t,
    u32,
    *mut ze_event_handle_t,
) -> ze_result_t;

function_table! {
    pub struct LevelZeroFunctions {
        required {
            zeInit: unsafe extern "C" fn(u32) -> ze_result_t,
            zeDriverGet: unsafe extern "C" fn(*mut u32, *mut ze_driver_handle_t) -> ze_result_t,
            zeDriverGetExtensionProperties: unsafe extern "C" fn(ze_driver_handle_t, *mut u32, *mut ze_driver_extension_properties_t) -> ze_result_t,
            zeDriverGetExtensionFunctionAddress: unsafe extern "C" fn(ze_driver_handle_t, *const c_char, *mut *mut c_void) -> ze_result_t,
            zeDeviceGet: unsafe extern "C" fn(ze_driver_handle_t, *mut u32, *mut ze_device_handle_t) -> ze_result_t,
            zeDeviceGetProperties: unsafe extern "C" fn(ze_device_handle_t, *mut ze_device_properties_t) -> ze_result_t,
            zeDeviceGetCommandQueueGroupProperties: unsafe extern "C" fn(ze_device_handle_t, *mut u32, *mut ze_command_queue_group_properties_t) -> ze_result_t,
            zeContextCreate: unsafe extern "C" fn(ze_driver_handle_t, *const ze_context_desc_t, *mut ze_context_handle_t) -> ze_result_t,
            zeContextDestroy: unsafe extern "C" fn(ze_context_handle_t) -> ze_result_t,
            zeMemAllocDevice: unsafe extern "C" fn(ze_context_handle_t, *const ze_device_mem_alloc_desc_t, usize, usize, ze_device_handle_t, *mut *mut c_void) -> ze_result_t,
            zeMemFree: unsafe extern "C" fn(ze_context_handle_t, *mut c_void) -> ze_result_t,
            zeImageCreate: unsafe extern "C" fn(ze_context_handle_t, ze_device_handle_t, *const ze_image_desc_t, *mut ze_image_handle_t) -> ze_result_t,
            zeImageDestroy: unsafe extern "C" fn(ze_image_handle_t) -> ze_result_t,
            zeCommandListCreateImmediate: unsafe extern "C" fn(ze_context_handle_t, ze_device_handle_t, *const ze_command_queue_desc_t, *mut ze_command_list_handle_t) -> ze_result_t,
            zeCommandListHostSynchronize: unsafe extern "C" fn(ze_command_list_handle_t, u64) -> ze_result_t,
            zeCommandListDestroy: unsafe extern "C" fn(ze_command_list_handle_t) -> ze_result_t,
            zeCommandListAppendMemoryCopy: unsafe extern "C" fn(ze_command_list_handle_t, *mut c_void, *const c_void, usize, ze_event_handle_t, u32, *mut ze_event_handle_t) -> ze_result_t,
            zeCommandListAppendImageCopyToMemory: unsafe extern "C" fn(ze_command_list_handle_t, *mut c_void, ze_image_handle_t, *const c_void, ze_event_handle_t, u32, *mut ze_event_handle_t) -> ze_result_t,
            zeCommandListAppendImageCopyFromMemory: unsafe extern "C" fn(ze_command_list_handle_t, ze_image_handle_t, *const c_void, *const c_void, ze_event_handle_t, u32, *mut ze_event_handle_t) -> ze_result_t,
            zeEventPoolCreate: unsafe extern "C" fn(ze_context_handle_t, *const ze_event_pool_desc_t, u32, *mut ze_device_handle_t, *mut ze_event_pool_handle_t) -> ze_result_t,
            zeEventPoolDestroy: unsafe extern "C" fn(ze_event_pool_handle_t) -> ze_result_t,
            zeEventCreate: unsafe extern "C" fn(ze_event_pool_handle_t, *const ze_event_desc_t, *mut ze_event_handle_t) -> ze_result_t,
            zeEventDestroy: unsafe extern "C" fn(ze_event_handle_t) -> ze_result_t,
            zeEventHostSynchronize: unsafe extern "C" fn(ze_event_handle_t, u64) -> ze_result_t,
            zeEventHostReset: unsafe extern "C" fn(ze_event_handle_t) -> ze_result_t,
        }
        optional {
            zeImageGetDeviceOffsetExp: PFN_zeImageGetDeviceOffsetExp,
            zeDeviceImportExternalSemaphoreExt: PFN_zeDeviceImportExternalSemaphoreExt,
            zeDeviceReleaseExternalSemaphoreExt: PFN_zeDeviceReleaseExternalSemaphoreExt,
            zeCommandListAppendSignalExternalSemaphoreExt: PFN_zeCommandListAppendSignalExternalSemaphoreExt,
            zeCommandListAppendWaitExternalSemaphoreExt: PFN_zeCommandListAppendWaitExternalSemaphoreExt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layouts_match_the_c_headers() {
        assert_eq!(std::mem::size_of::<ze_device_properties_t>(), 368);
        assert_eq!(std::mem::size_of::<ze_image_desc_t>(), 72);
        assert_eq!(std::mem::size_of::<ze_command_queue_desc_t>(), 40);
        assert_eq!(std::mem::size_of::<ze_command_queue_group_properties_t>(), 40);
        assert_eq!(std::mem::size_of::<ze_driver_extension_properties_t>(), 260);
    }
}
