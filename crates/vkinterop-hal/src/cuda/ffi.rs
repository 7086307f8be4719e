/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! The subset of the CUDA driver API used for Vulkan interop.
#![allow(non_camel_case_types, non_snake_case, dead_code)]

use std::ffi::{c_char, c_int, c_uint, c_void};

use crate::loader::function_table;

pub type CUresult = c_int;
pub type CUdevice = c_int;
pub type CUdeviceptr = u64;
pub type CUsurfObject = u64;
pub type CUtexObject = u64;
pub type CUcontext = *mut c_void;
pub type CUstream = *mut c_void;
pub type CUevent = *mut c_void;
pub type CUarray = *mut c_void;
pub type CUmipmappedArray = *mut c_void;
pub type CUexternalMemory = *mut c_void;
pub type CUexternalSemaphore = *mut c_void;

pub const CUDA_SUCCESS: CUresult = 0;
pub const CUDA_ERROR_NOT_READY: CUresult = 600;

pub const CU_STREAM_NON_BLOCKING: c_uint = 0x1;
pub const CU_EVENT_DISABLE_TIMING: c_uint = 0x2;

pub const CU_EXTERNAL_MEMORY_HANDLE_TYPE_OPAQUE_FD: c_int = 1;
pub const CU_EXTERNAL_MEMORY_HANDLE_TYPE_OPAQUE_WIN32: c_int = 2;
pub const CU_EXTERNAL_MEMORY_HANDLE_TYPE_OPAQUE_WIN32_KMT: c_int = 3;
pub const CUDA_EXTERNAL_MEMORY_DEDICATED: c_uint = 0x1;

pub const CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_OPAQUE_FD: c_int = 1;
pub const CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_OPAQUE_WIN32: c_int = 2;
pub const CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_OPAQUE_WIN32_KMT: c_int = 3;
pub const CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_TIMELINE_SEMAPHORE_FD: c_int = 9;
pub const CU_EXTERNAL_SEMAPHORE_HANDLE_TYPE_TIMELINE_SEMAPHORE_WIN32: c_int = 10;

pub const CU_AD_FORMAT_UNSIGNED_INT8: c_int = 0x01;
pub const CU_AD_FORMAT_UNSIGNED_INT16: c_int = 0x02;
pub const CU_AD_FORMAT_UNSIGNED_INT32: c_int = 0x03;
pub const CU_AD_FORMAT_SIGNED_INT8: c_int = 0x08;
pub const CU_AD_FORMAT_SIGNED_INT16: c_int = 0x09;
pub const CU_AD_FORMAT_SIGNED_INT32: c_int = 0x0a;
pub const CU_AD_FORMAT_HALF: c_int = 0x10;
pub const CU_AD_FORMAT_FLOAT: c_int = 0x20;

pub const CUDA_ARRAY3D_LAYERED: c_uint = 0x01;
pub const CUDA_ARRAY3D_SURFACE_LDST: c_uint = 0x02;
pub const CUDA_ARRAY3D_CUBEMAP: c_uint = 0x04;
pub const CUDA_ARRAY3D_COLOR_ATTACHMENT: c_uint = 0x20;

pub const CU_RESOURCE_TYPE_ARRAY: c_int = 0;
pub const CU_RESOURCE_TYPE_MIPMAPPED_ARRAY: c_int = 1;

pub const CU_TR_ADDRESS_MODE_CLAMP: c_int = 1;
pub const CU_TR_FILTER_MODE_POINT: c_int = 0;
pub const CU_TR_FILTER_MODE_LINEAR: c_int = 1;
pub const CU_TRSF_READ_AS_INTEGER: c_uint = 0x01;
pub const CU_TRSF_NORMALIZED_COORDINATES: c_uint = 0x02;

pub const CU_MEMORYTYPE_HOST: c_int = 1;
pub const CU_MEMORYTYPE_DEVICE: c_int = 2;
pub const CU_MEMORYTYPE_ARRAY: c_int = 3;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CUuuid {
    pub bytes: [u8; 16],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Win32Handle {
    pub handle: *mut c_void,
    pub name: *const c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union ExternalHandle {
    pub fd: c_int,
    pub win32: Win32Handle,
}

#[repr(C)]
pub struct CUDA_EXTERNAL_MEMORY_HANDLE_DESC {
    pub type_: c_int,
    pub handle: ExternalHandle,
    pub size: u64,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
pub struct CUDA_EXTERNAL_MEMORY_BUFFER_DESC {
    pub offset: u64,
    pub size: u64,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CUDA_ARRAY3D_DESCRIPTOR {
    pub Width: usize,
    pub Height: usize,
    pub Depth: usize,
    pub Format: c_int,
    pub NumChannels: c_uint,
    pub Flags: c_uint,
}

#[repr(C)]
pub struct CUDA_EXTERNAL_MEMORY_MIPMAPPED_ARRAY_DESC {
    pub offset: u64,
    pub arrayDesc: CUDA_ARRAY3D_DESCRIPTOR,
    pub numLevels: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union CUDA_RESOURCE_DESC_res {
    pub hArray: CUarray,
    pub hMipmappedArray: CUmipmappedArray,
    pub reserved: [c_int; 32],
}

#[repr(C)]
pub struct CUDA_RESOURCE_DESC {
    pub resType: c_int,
    pub res: CUDA_RESOURCE_DESC_res,
    pub flags: c_uint,
}
impl CUDA_RESOURCE_DESC {
    pub fn array(array: CUarray) -> Self {
        Self {
            resType: CU_RESOURCE_TYPE_ARRAY,
            res: CUDA_RESOURCE_DESC_res { hArray: array },
            flags: 0,
        }
    }
    pub fn mipmapped_array(array: CUmipmappedArray) -> Self {
        Self {
            resType: CU_RESOURCE_TYPE_MIPMAPPED_ARRAY,
            res: CUDA_RESOURCE_DESC_res {
                hMipmappedArray: array,
            },
            flags: 0,
        }
    }
}

#[repr(C)]
#[derive(Default)]
pub struct CUDA_TEXTURE_DESC {
    pub addressMode: [c_int; 3],
    pub filterMode: c_int,
    pub flags: c_uint,
    pub maxAnisotropy: c_uint,
    pub mipmapFilterMode: c_int,
    pub mipmapLevelBias: f32,
    pub minMipmapLevelClamp: f32,
    pub maxMipmapLevelClamp: f32,
    pub borderColor: [f32; 4],
    pub reserved: [c_int; 12],
}

#[repr(C)]
pub struct CUDA_MEMCPY3D {
    pub srcXInBytes: usize,
    pub srcY: usize,
    pub srcZ: usize,
    pub srcLOD: usize,
    pub srcMemoryType: c_int,
    pub srcHost: *const c_void,
    pub srcDevice: CUdeviceptr,
    pub srcArray: CUarray,
    pub reserved0: *mut c_void,
    pub srcPitch: usize,
    pub srcHeight: usize,
    pub dstXInBytes: usize,
    pub dstY: usize,
    pub dstZ: usize,
    pub dstLOD: usize,
    pub dstMemoryType: c_int,
    pub dstHost: *mut c_void,
    pub dstDevice: CUdeviceptr,
    pub dstArray: CUarray,
    pub reserved1: *mut c_void,
    pub dstPitch: usize,
    pub dstHeight: usize,
    pub WidthInBytes: usize,
    pub Height: usize,
    pub Depth: usize,
}
impl Default for CUDA_MEMCPY3D {
    fn default() -> Self {
        // All fields are integers or pointers, for which zero is the documented default
        unsafe { std::mem::zeroed() }
    }
}

#[repr(C)]
pub struct CUDA_EXTERNAL_SEMAPHORE_HANDLE_DESC {
    pub type_: c_int,
    pub handle: ExternalHandle,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SemaphoreFence {
    pub value: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SignalKeyedMutex {
    pub key: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct WaitKeyedMutex {
    pub key: u64,
    pub timeoutMs: c_uint,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SignalParams {
    pub fence: SemaphoreFence,
    pub nvSciSync: u64,
    pub keyedMutex: SignalKeyedMutex,
    pub reserved: [c_uint; 12],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct WaitParams {
    pub fence: SemaphoreFence,
    pub nvSciSync: u64,
    pub keyedMutex: WaitKeyedMutex,
    pub reserved: [c_uint; 10],
}

#[repr(C)]
#[derive(Default)]
pub struct CUDA_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS {
    pub params: SignalParams,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
#[derive(Default)]
pub struct CUDA_EXTERNAL_SEMAPHORE_WAIT_PARAMS {
    pub params: WaitParams,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

function_table! {
    pub struct CudaFunctions {
        required {
            cuInit: unsafe extern "system" fn(c_uint) -> CUresult,
            cuGetErrorString: unsafe extern "system" fn(CUresult, *mut *const c_char) -> CUresult,
            cuDeviceGetCount: unsafe extern "system" fn(*mut c_int) -> CUresult,
            cuDeviceGet: unsafe extern "system" fn(*mut CUdevice, c_int) -> CUresult,
            cuDeviceGetUuid: unsafe extern "system" fn(*mut CUuuid, CUdevice) -> CUresult,
            cuDeviceGetName: unsafe extern "system" fn(*mut c_char, c_int, CUdevice) -> CUresult,
            cuDeviceTotalMem_v2: unsafe extern "system" fn(*mut usize, CUdevice) -> CUresult,
            cuDevicePrimaryCtxRetain: unsafe extern "system" fn(*mut CUcontext, CUdevice) -> CUresult,
            cuDevicePrimaryCtxRelease_v2: unsafe extern "system" fn(CUdevice) -> CUresult,
            cuCtxPushCurrent_v2: unsafe extern "system" fn(CUcontext) -> CUresult,
            cuCtxPopCurrent_v2: unsafe extern "system" fn(*mut CUcontext) -> CUresult,
            cuStreamCreate: unsafe extern "system" fn(*mut CUstream, c_uint) -> CUresult,
            cuStreamDestroy_v2: unsafe extern "system" fn(CUstream) -> CUresult,
            cuStreamSynchronize: unsafe extern "system" fn(CUstream) -> CUresult,
            cuStreamQuery: unsafe extern "system" fn(CUstream) -> CUresult,
            cuEventCreate: unsafe extern "system" fn(*mut CUevent, c_uint) -> CUresult,
            cuEventRecord: unsafe extern "system" fn(CUevent, CUstream) -> CUresult,
            cuEventDestroy_v2: unsafe extern "system" fn(CUevent) -> CUresult,
            cuMemcpyDtoHAsync_v2: unsafe extern "system" fn(*mut c_void, CUdeviceptr, usize, CUstream) -> CUresult,
            cuMemcpyHtoDAsync_v2: unsafe extern "system" fn(CUdeviceptr, *const c_void, usize, CUstream) -> CUresult,
            cuMemcpyDtoDAsync_v2: unsafe extern "system" fn(CUdeviceptr, CUdeviceptr, usize, CUstream) -> CUresult,
            cuMemcpy3DAsync_v2: unsafe extern "system" fn(*const CUDA_MEMCPY3D, CUstream) -> CUresult,
            cuMemFree_v2: unsafe extern "system" fn(CUdeviceptr) -> CUresult,
            cuImportExternalMemory: unsafe extern "system" fn(*mut CUexternalMemory, *const CUDA_EXTERNAL_MEMORY_HANDLE_DESC) -> CUresult,
            cuExternalMemoryGetMappedBuffer: unsafe extern "system" fn(*mut CUdeviceptr, CUexternalMemory, *const CUDA_EXTERNAL_MEMORY_BUFFER_DESC) -> CUresult,
            cuExternalMemoryGetMappedMipmappedArray: unsafe extern "system" fn(*mut CUmipmappedArray, CUexternalMemory, *const CUDA_EXTERNAL_MEMORY_MIPMAPPED_ARRAY_DESC) -> CUresult,
            cuDestroyExternalMemory: unsafe extern "system" fn(CUexternalMemory) -> CUresult,
            cuMipmappedArrayGetLevel: unsafe extern "system" fn(*mut CUarray, CUmipmappedArray, c_uint) -> CUresult,
            cuMipmappedArrayDestroy: unsafe extern "system" fn(CUmipmappedArray) -> CUresult,
            cuSurfObjectCreate: unsafe extern "system" fn(*mut CUsurfObject, *const CUDA_RESOURCE_DESC) -> CUresult,
            cuSurfObjectDestroy: unsafe extern "system" fn(CUsurfObject) -> CUresult,
            cuTexObjectCreate: unsafe extern "system" fn(*mut CUtexObject, *const CUDA_RESOURCE_DESC, *const CUDA_TEXTURE_DESC, *const c_void) -> CUresult,
            cuTexObjectDestroy: unsafe extern "system" fn(CUtexObject) -> CUresult,
            cuImportExternalSemaphore: unsafe extern "system" fn(*mut CUexternalSemaphore, *const CUDA_EXTERNAL_SEMAPHORE_HANDLE_DESC) -> CUresult,
            cuSignalExternalSemaphoresAsync: unsafe extern "system" fn(*const CUexternalSemaphore, *const CUDA_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS, c_uint, CUstream) -> CUresult,
            cuWaitExternalSemaphoresAsync: unsafe extern "system" fn(*const CUexternalSemaphore, *const CUDA_EXTERNAL_SEMAPHORE_WAIT_PARAMS, c_uint, CUstream) -> CUresult,
            cuDestroyExternalSemaphore: unsafe extern "system" fn(CUexternalSemaphore) -> CUresult,
        }
        optional {
            cuDeviceGetLuid: unsafe extern "system" fn(*mut c_char, *mut c_uint, CUdevice) -> CUresult,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layouts_match_the_c_headers() {
        assert_eq!(std::mem::size_of::<CUDA_RESOURCE_DESC>(), 144);
        assert_eq!(std::mem::size_of::<SignalParams>(), 72);
        assert_eq!(std::mem::size_of::<WaitParams>(), 72);
        assert_eq!(std::mem::size_of::<CUDA_EXTERNAL_SEMAPHORE_SIGNAL_PARAMS>(), 144);
        assert_eq!(std::mem::size_of::<CUDA_EXTERNAL_MEMORY_HANDLE_DESC>(), 104);
        assert_eq!(std::mem::size_of::<CUDA_TEXTURE_DESC>(), 104);
        assert_eq!(std::mem::size_of::<CUDA_MEMCPY3D>(), 200);
    }
}
