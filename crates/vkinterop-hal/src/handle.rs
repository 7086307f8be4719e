/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! OS handle brokering.
//!
//! * Exporting an allocation or semaphore produces exactly one [`ExportedHandle`].
//! * Passing it to an importer either transfers it (the runtime now owns it and
//!   it is never closed here) or retains it (closed once the import is released).
//! * Handles that never reach an importer are closed on drop.
//!
//! CUDA, HIP and Level Zero take ownership of file descriptors on a successful
//! import but not of NT handles. SYCL tells us per runtime.

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(unix)]
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd};
#[cfg(windows)]
use std::os::windows::io::{AsRawHandle, IntoRawHandle, OwnedHandle, RawHandle};

use ash::vk;
use types::{ExternalHandleType, ImageDimensionality, ImageExtent, SemaphoreKind};

use crate::{DeviceIdentity, InteropError, InteropResult};

static EXPORTED: AtomicU64 = AtomicU64::new(0);
static TRANSFERRED: AtomicU64 = AtomicU64::new(0);
static CLOSED: AtomicU64 = AtomicU64::new(0);

/// Process wide handle counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandleStatistics {
    pub exported: u64,
    pub transferred: u64,
    pub closed: u64,
}
impl HandleStatistics {
    /// Handles that are still open and owned by this process
    pub fn live(&self) -> u64 {
        self.exported - self.transferred - self.closed
    }
}
pub fn handle_statistics() -> HandleStatistics {
    HandleStatistics {
        exported: EXPORTED.load(Ordering::SeqCst),
        transferred: TRANSFERRED.load(Ordering::SeqCst),
        closed: CLOSED.load(Ordering::SeqCst),
    }
}

/// The raw value handed to a compute runtime's import call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawExternalHandle {
    Fd(i32),
    Win32(*mut c_void),
}

enum OsHandle {
    #[cfg(unix)]
    Fd(OwnedFd),
    #[cfg(windows)]
    Win32(OwnedHandle),
    /// KMT handles are global names and are never closed
    #[cfg(windows)]
    Kmt(RawHandle),
}

pub struct ExportedHandle {
    handle: Option<OsHandle>,
    handle_type: ExternalHandleType,
}
// Raw NT handles are plain kernel object references
unsafe impl Send for ExportedHandle {}
unsafe impl Sync for ExportedHandle {}

impl ExportedHandle {
    fn new(handle: OsHandle, handle_type: ExternalHandleType) -> Self {
        EXPORTED.fetch_add(1, Ordering::SeqCst);
        Self {
            handle: Some(handle),
            handle_type,
        }
    }
    #[cfg(unix)]
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self::new(OsHandle::Fd(fd), ExternalHandleType::OpaqueFd)
    }
    /// # Safety
    /// * `handle` must be a valid handle of type `handle_type` exclusively owned by the caller
    #[cfg(windows)]
    pub unsafe fn from_win32(handle: RawHandle, handle_type: ExternalHandleType) -> Self {
        use std::os::windows::io::FromRawHandle;
        match handle_type {
            ExternalHandleType::OpaqueWin32Kmt => Self::new(OsHandle::Kmt(handle), handle_type),
            _ => Self::new(
                OsHandle::Win32(unsafe { OwnedHandle::from_raw_handle(handle) }),
                handle_type,
            ),
        }
    }
    pub fn handle_type(&self) -> ExternalHandleType {
        self.handle_type
    }
    pub fn raw(&self) -> RawExternalHandle {
        match self.handle.as_ref() {
            #[cfg(unix)]
            Some(OsHandle::Fd(fd)) => RawExternalHandle::Fd(fd.as_raw_fd()),
            #[cfg(windows)]
            Some(OsHandle::Win32(h)) => RawExternalHandle::Win32(h.as_raw_handle()),
            #[cfg(windows)]
            Some(OsHandle::Kmt(h)) => RawExternalHandle::Win32(*h),
            None => unreachable!("exported handle used after transfer"),
        }
    }
    /// Resolves ownership after an import call has succeeded.
    pub fn settle(mut self, consumed_by_importer: bool) -> ImportedHandle {
        if !consumed_by_importer {
            return ImportedHandle::Retained(self);
        }
        match self.handle.take() {
            #[cfg(unix)]
            Some(OsHandle::Fd(fd)) => {
                let _ = fd.into_raw_fd();
            }
            #[cfg(windows)]
            Some(OsHandle::Win32(h)) => {
                let _ = h.into_raw_handle();
            }
            #[cfg(windows)]
            Some(OsHandle::Kmt(_)) => (),
            None => (),
        }
        TRANSFERRED.fetch_add(1, Ordering::SeqCst);
        ImportedHandle::Consumed
    }
}
impl Drop for ExportedHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::trace!("Closing exported {:?} handle", self.handle_type);
            drop(handle);
            CLOSED.fetch_add(1, Ordering::SeqCst);
        }
    }
}
impl std::fmt::Debug for ExportedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportedHandle")
            .field("handle_type", &self.handle_type)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

/// What is left of an exported handle once an import has succeeded
#[derive(Debug)]
pub enum ImportedHandle {
    /// The runtime owns the handle
    Consumed,
    /// Still ours; closed when dropped, which must be after the import is destroyed
    Retained(ExportedHandle),
}
impl ImportedHandle {
    pub fn was_handle_consumed(&self) -> bool {
        matches!(self, Self::Consumed)
    }
}

/// The ownership rule shared by the CUDA, HIP and Level Zero importers
pub fn driver_consumes_handle(handle_type: ExternalHandleType) -> bool {
    !handle_type.is_win32()
}

pub fn vk_memory_handle_type(ty: ExternalHandleType) -> vk::ExternalMemoryHandleTypeFlags {
    match ty {
        ExternalHandleType::OpaqueFd => vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD,
        ExternalHandleType::OpaqueWin32 => vk::ExternalMemoryHandleTypeFlags::OPAQUE_WIN32,
        ExternalHandleType::OpaqueWin32Kmt => vk::ExternalMemoryHandleTypeFlags::OPAQUE_WIN32_KMT,
    }
}
pub fn vk_semaphore_handle_type(ty: ExternalHandleType) -> vk::ExternalSemaphoreHandleTypeFlags {
    match ty {
        ExternalHandleType::OpaqueFd => vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD,
        ExternalHandleType::OpaqueWin32 => vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_WIN32,
        ExternalHandleType::OpaqueWin32Kmt => {
            vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_WIN32_KMT
        }
    }
}

/// Description of an exportable image, as seen by the importers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageImportInfo {
    pub format: vk::Format,
    pub extent: ImageExtent,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub dimensionality: ImageDimensionality,
    pub usage: vk::ImageUsageFlags,
}
impl ImageImportInfo {
    /// A single level, single layer storage and sampled 2D image
    pub fn new_2d(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            format,
            extent: ImageExtent::new_2d(width, height),
            mip_levels: 1,
            array_layers: 1,
            dimensionality: ImageDimensionality::D2,
            usage: vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
        }
    }
    pub fn is_layered(&self) -> bool {
        self.array_layers > 1 && self.dimensionality != ImageDimensionality::Cube
    }
    /// Depth of the compute side array: the number of layers for layered images
    pub fn array_depth(&self) -> u32 {
        match self.dimensionality {
            ImageDimensionality::D3 => self.extent.depth,
            _ if self.array_layers > 1 => self.array_layers,
            _ => 0,
        }
    }
}

/// A Vulkan allocation that can be exported. Implemented by [`crate::vulkan::VulkanBuffer`]
/// and [`crate::vulkan::VulkanImage`].
pub trait ExternalMemorySource: Send + Sync {
    fn device_identity(&self) -> &DeviceIdentity;
    /// Size of the underlying device memory, which may exceed the resource size
    fn allocation_size(&self) -> u64;
    fn is_dedicated(&self) -> bool;
    /// Each call produces a fresh handle.
    fn export_memory_handle(
        &self,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle>;
}
pub trait ExternalBufferSource: ExternalMemorySource {
    /// Bytes visible through the imported device pointer
    fn buffer_size(&self) -> u64;
}
pub trait ExternalImageSource: ExternalMemorySource {
    fn image_info(&self) -> ImageImportInfo;
}
pub trait ExternalSemaphoreSource: Send + Sync {
    fn device_identity(&self) -> &DeviceIdentity;
    fn semaphore_kind(&self) -> SemaphoreKind;
    fn vk_semaphore(&self) -> vk::Semaphore;
    fn export_semaphore_handle(
        &self,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle>;
    /// Current timeline value if it can be queried
    fn counter_value(&self) -> Option<u64> {
        None
    }
}

/// Checks that an import of `size` bytes is within `limit`. Zero sized imports are
/// never valid.
pub fn check_import_size(size: u64, limit: u64) -> InteropResult<()> {
    if size == 0 || size > limit {
        return Err(InteropError::AllocationTooLarge {
            requested: size,
            limit,
        });
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn fd_is_open(fd: i32) -> bool {
        std::path::Path::new(&format!("/proc/self/fd/{fd}")).exists()
    }
    fn temp_handle() -> ExportedHandle {
        let file = tempfile::tempfile().unwrap();
        ExportedHandle::from_fd(OwnedFd::from(file))
    }

    #[test]
    fn unconsumed_handle_is_closed_on_drop() {
        let handle = temp_handle();
        let RawExternalHandle::Fd(fd) = handle.raw() else {
            panic!("expected fd");
        };
        assert!(fd_is_open(fd));
        drop(handle);
        assert!(!fd_is_open(fd));
    }

    #[test]
    fn consumed_handle_is_not_closed() {
        let handle = temp_handle();
        let RawExternalHandle::Fd(fd) = handle.raw() else {
            panic!("expected fd");
        };
        let imported = handle.settle(true);
        assert!(imported.was_handle_consumed());
        drop(imported);
        assert!(fd_is_open(fd));
        // Play the part of the importer
        drop(unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(fd) });
    }

    #[test]
    fn retained_handle_closes_with_import() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        let imported = ExportedHandle::from_fd(OwnedFd::from(file)).settle(false);
        assert!(!imported.was_handle_consumed());
        assert!(fd_is_open(fd));
        drop(imported);
        assert!(!fd_is_open(fd));
    }

    #[test]
    fn statistics_track_every_handle() {
        let before = handle_statistics();
        let a = temp_handle();
        let b = temp_handle();
        let RawExternalHandle::Fd(fd) = b.raw() else {
            unreachable!()
        };
        let _ = b.settle(true);
        drop(a);
        let after = handle_statistics();
        // Other tests run concurrently, so only lower bounds hold
        assert!(after.exported >= before.exported + 2);
        assert!(after.transferred > before.transferred);
        assert!(after.closed > before.closed);
        drop(unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(fd) });
    }

    #[test]
    fn import_size_limits() {
        assert!(matches!(
            check_import_size(0, 1024),
            Err(InteropError::AllocationTooLarge { requested: 0, .. })
        ));
        assert!(check_import_size(1024, 1024).is_ok());
        assert!(check_import_size(1025, 1024).is_err());
        assert!(driver_consumes_handle(ExternalHandleType::OpaqueFd));
        assert!(!driver_consumes_handle(ExternalHandleType::OpaqueWin32));
    }
}
