/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! The subset of the HIP runtime API used for Vulkan interop.
#![allow(non_camel_case_types, non_snake_case, dead_code)]

use std::ffi::{c_char, c_int, c_uint, c_void};

use crate::loader::function_table;

pub type hipError_t = c_int;
pub type hipDevice_t = c_int;
pub type hipDeviceptr_t = *mut c_void;
pub type hipStream_t = *mut c_void;
pub type hipEvent_t = *mut c_void;
pub type hipArray_t = *mut c_void;
pub type hipMipmappedArray_t = *mut c_void;
pub type hipExternalMemory_t = *mut c_void;
pub type hipExternalSemaphore_t = *mut c_void;
pub type hipSurfaceObject_t = u64;
pub type hipTextureObject_t = u64;

pub const hipSuccess: hipError_t = 0;
pub const hipErrorNotReady: hipError_t = 600;

pub const hipStreamNonBlocking: c_uint = 0x1;
pub const hipEventDisableTiming: c_uint = 0x2;

pub const hipExternalMemoryHandleTypeOpaqueFd: c_int = 1;
pub const hipExternalMemoryHandleTypeOpaqueWin32: c_int = 2;
pub const hipExternalMemoryHandleTypeOpaqueWin32Kmt: c_int = 3;
pub const hipExternalMemoryDedicated: c_uint = 0x1;

pub const hipExternalSemaphoreHandleTypeOpaqueFd: c_int = 1;
pub const hipExternalSemaphoreHandleTypeOpaqueWin32: c_int = 2;
pub const hipExternalSemaphoreHandleTypeOpaqueWin32Kmt: c_int = 3;
pub const hipExternalSemaphoreHandleTypeTimelineSemaphoreFd: c_int = 9;
pub const hipExternalSemaphoreHandleTypeTimelineSemaphoreWin32: c_int = 10;

pub const hipChannelFormatKindSigned: c_int = 0;
pub const hipChannelFormatKindUnsigned: c_int = 1;
pub const hipChannelFormatKindFloat: c_int = 2;

pub const hipArrayLayered: c_uint = 0x01;
pub const hipArraySurfaceLoadStore: c_uint = 0x02;
pub const hipArrayCubemap: c_uint = 0x04;

pub const hipResourceTypeArray: c_int = 0;
pub const hipResourceTypeMipmappedArray: c_int = 1;

pub const hipAddressModeClamp: c_int = 1;
pub const hipFilterModePoint: c_int = 0;
pub const hipFilterModeLinear: c_int = 1;
pub const hipReadModeElementType: c_int = 0;
pub const hipReadModeNormalizedFloat: c_int = 1;

pub const hipMemcpyHostToDevice: c_int = 1;
pub const hipMemcpyDeviceToHost: c_int = 2;
pub const hipMemcpyDeviceToDevice: c_int = 3;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct hipUUID {
    pub bytes: [c_char; 16],
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
pub struct hipExternalMemoryHandleDesc {
    pub type_: c_int,
    pub handle: ExternalHandle,
    pub size: u64,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
pub struct hipExternalMemoryBufferDesc {
    pub offset: u64,
    pub size: u64,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct hipChannelFormatDesc {
    pub x: c_int,
    pub y: c_int,
    pub z: c_int,
    pub w: c_int,
    pub f: c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct hipExtent {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

#[repr(C)]
pub struct hipExternalMemoryMipmappedArrayDesc {
    pub offset: u64,
    pub formatDesc: hipChannelFormatDesc,
    pub extent: hipExtent,
    pub flags: c_uint,
    pub numLevels: c_uint,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union hipResourceDesc_res {
    pub array: hipArray_t,
    pub mipmap: hipMipmappedArray_t,
    pub reserved: [u64; 7],
}

#[repr(C)]
pub struct hipResourceDesc {
    pub resType: c_int,
    pub res: hipResourceDesc_res,
}
impl hipResourceDesc {
    pub fn array(array: hipArray_t) -> Self {
        let mut res = hipResourceDesc_res { reserved: [0; 7] };
        res.array = array;
        Self {
            resType: hipResourceTypeArray,
            res,
        }
    }
    pub fn mipmapped_array(mipmap: hipMipmappedArray_t) -> Self {
        let mut res = hipResourceDesc_res { reserved: [0; 7] };
        res.mipmap = mipmap;
        Self {
            resType: hipResourceTypeMipmappedArray,
            res,
        }
    }
}

#[repr(C)]
#[derive(Default)]
pub struct hipTextureDesc {
    pub addressMode: [c_int; 3],
    pub filterMode: c_int,
    pub readMode: c_int,
    pub sRGB: c_int,
    pub borderColor: [f32; 4],
    pub normalizedCoords: c_int,
    pub maxAnisotropy: c_uint,
    pub mipmapFilterMode: c_int,
    pub mipmapLevelBias: f32,
    pub minMipmapLevelClamp: f32,
    pub maxMipmapLevelClamp: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct hipPos {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct hipPitchedPtr {
    pub ptr: *mut c_void,
    pub pitch: usize,
    pub xsize: usize,
    pub ysize: usize,
}

#[repr(C)]
pub struct hipMemcpy3DParms {
    pub srcArray: hipArray_t,
    pub srcPos: hipPos,
    pub srcPtr: hipPitchedPtr,
    pub dstArray: hipArray_t,
    pub dstPos: hipPos,
    pub dstPtr: hipPitchedPtr,
    pub extent: hipExtent,
    pub kind: c_int,
}

#[repr(C)]
pub struct hipExternalSemaphoreHandleDesc {
    pub type_: c_int,
    pub handle: ExternalHandle,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct SignalParams {
    pub fence_value: u64,
    pub nvSciSync: u64,
    pub keyedMutex_key: u64,
    pub reserved: [c_uint; 12],
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct WaitParams {
    pub fence_value: u64,
    pub nvSciSync: u64,
    pub keyedMutex_key: u64,
    pub keyedMutex_timeoutMs: c_uint,
    pub reserved: [c_uint; 10],
}

#[repr(C)]
#[derive(Default)]
pub struct hipExternalSemaphoreSignalParams {
    pub params: SignalParams,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

#[repr(C)]
#[derive(Default)]
pub struct hipExternalSemaphoreWaitParams {
    pub params: WaitParams,
    pub flags: c_uint,
    pub reserved: [c_uint; 16],
}

function_table! {
    pub struct HipFunctions {
        required {
            hipInit: unsafe extern "C" fn(c_uint) -> hipError_t,
            hipGetErrorString: unsafe extern "C" fn(hipError_t) -> *const c_char,
            hipGetDeviceCount: unsafe extern "C" fn(*mut c_int) -> hipError_t,
            hipDeviceGet: unsafe extern "C" fn(*mut hipDevice_t, c_int) -> hipError_t,
            hipDeviceGetUuid: unsafe extern "C" fn(*mut hipUUID, hipDevice_t) -> hipError_t,
            hipDeviceGetName: unsafe extern "C" fn(*mut c_char, c_int, hipDevice_t) -> hipError_t,
            hipDeviceTotalMem: unsafe extern "C" fn(*mut usize, hipDevice_t) -> hipError_t,
            hipSetDevice: unsafe extern "C" fn(c_int) -> hipError_t,
            hipStreamCreateWithFlags: unsafe extern "C" fn(*mut hipStream_t, c_uint) -> hipError_t,
            hipStreamDestroy: unsafe extern "C" fn(hipStream_t) -> hipError_t,
            hipStreamSynchronize: unsafe extern "C" fn(hipStream_t) -> hipError_t,
            hipStreamQuery: unsafe extern "C" fn(hipStream_t) -> hipError_t,
            hipEventCreateWithFlags: unsafe extern "C" fn(*mut hipEvent_t, c_uint) -> hipError_t,
            hipEventRecord: unsafe extern "C" fn(hipEvent_t, hipStream_t) -> hipError_t,
            hipEventDestroy: unsafe extern "C" fn(hipEvent_t) -> hipError_t,
            hipMemcpyDtoHAsync: unsafe extern "C" fn(*mut c_void, hipDeviceptr_t, usize, hipStream_t) -> hipError_t,
            hipMemcpyHtoDAsync: unsafe extern "C" fn(hipDeviceptr_t, *mut c_void, usize, hipStream_t) -> hipError_t,
            hipMemcpyDtoDAsync: unsafe extern "C" fn(hipDeviceptr_t, hipDeviceptr_t, usize, hipStream_t) -> hipError_t,
            hipMemcpy3DAsync: unsafe extern "C" fn(*const hipMemcpy3DParms, hipStream_t) -> hipError_t,
            hipFree: unsafe extern "C" fn(*mut c_void) -> hipError_t,
            hipImportExternalMemory: unsafe extern "C" fn(*mut hipExternalMemory_t, *const hipExternalMemoryHandleDesc) -> hipError_t,
            hipExternalMemoryGetMappedBuffer: unsafe extern "C" fn(*mut *mut c_void, hipExternalMemory_t, *const hipExternalMemoryBufferDesc) -> hipError_t,
            hipExternalMemoryGetMappedMipmappedArray: unsafe extern "C" fn(*mut hipMipmappedArray_t, hipExternalMemory_t, *const hipExternalMemoryMipmappedArrayDesc) -> hipError_t,
            hipDestroyExternalMemory: unsafe extern "C" fn(hipExternalMemory_t) -> hipError_t,
            hipGetMipmappedArrayLevel: unsafe extern "C" fn(*mut hipArray_t, hipMipmappedArray_t, c_uint) -> hipError_t,
            hipFreeMipmappedArray: unsafe extern "C" fn(hipMipmappedArray_t) -> hipError_t,
            hipCreateSurfaceObject: unsafe extern "C" fn(*mut hipSurfaceObject_t, *const hipResourceDesc) -> hipError_t,
            hipDestroySurfaceObject: unsafe extern "C" fn(hipSurfaceObject_t) -> hipError_t,
            hipCreateTextureObject: unsafe extern "C" fn(*mut hipTextureObject_t, *const hipResourceDesc, *const hipTextureDesc, *const c_void) -> hipError_t,
            hipDestroyTextureObject: unsafe extern "C" fn(hipTextureObject_t) -> hipError_t,
            hipImportExternalSemaphore: unsafe extern "C" fn(*mut hipExternalSemaphore_t, *const hipExternalSemaphoreHandleDesc) -> hipError_t,
            hipSignalExternalSemaphoresAsync: unsafe extern "C" fn(*const hipExternalSemaphore_t, *const hipExternalSemaphoreSignalParams, c_uint, hipStream_t) -> hipError_t,
            hipWaitExternalSemaphoresAsync: unsafe extern "C" fn(*const hipExternalSemaphore_t, *const hipExternalSemaphoreWaitParams, c_uint, hipStream_t) -> hipError_t,
            hipDestroyExternalSemaphore: unsafe extern "C" fn(hipExternalSemaphore_t) -> hipError_t,
        }
        optional {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_layouts_match_the_c_headers() {
        assert_eq!(std::mem::size_of::<hipResourceDesc>(), 64);
        assert_eq!(std::mem::size_of::<hipTextureDesc>(), 64);
        assert_eq!(std::mem::size_of::<hipMemcpy3DParms>(), 160);
        assert_eq!(std::mem::size_of::<hipExternalMemoryMipmappedArrayDesc>(), 64);
        assert_eq!(std::mem::size_of::<hipExternalSemaphoreWaitParams>(), 144);
    }
}
