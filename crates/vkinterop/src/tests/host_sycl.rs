/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! A SYCL runtime backed by host memory, and sources that export temp files.
//! Enough to drive the façade without a GPU.

use std::collections::HashMap;
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;

use hal::ash::vk;
use hal::handle::RawExternalHandle;
use hal::stream::{SyclEvent, SyclQueue};
use hal::sycl::{
    ImageCopyDirection, SyclExternalMemory, SyclExternalSemaphore, SyclImageHandles, SyclRuntime,
};
use hal::{
    DeviceIdentity, ExportedHandle, ExternalBufferSource, ExternalImageSource,
    ExternalMemorySource, ExternalSemaphoreSource, FormatInfo, ImageFlavor, ImageImportInfo,
    InteropError, InteropResult, LevelLayout,
};
use parking_lot::Mutex;
use types::{ExternalHandleType, InteropComputeApi, SemaphoreKind};

pub const UUID: [u8; 16] = [7; 16];
pub const MAX_ALLOCATION: u64 = 1 << 20;

pub fn identity(driver_id: vk::DriverId) -> DeviceIdentity {
    DeviceIdentity {
        uuid: UUID,
        luid: None,
        node_mask: 0,
        driver_id,
        name: "Host test device".to_owned(),
        discrete: false,
    }
}
pub fn queue() -> SyclQueue {
    SyclQueue(std::ptr::without_provenance_mut(0x5eed))
}

fn export_temp_file() -> InteropResult<ExportedHandle> {
    let file = tempfile::tempfile()?;
    Ok(ExportedHandle::from_fd(OwnedFd::from(file)))
}

fn failure(call: &'static str) -> InteropError {
    InteropError::Backend {
        api: InteropComputeApi::Sycl,
        call,
        code: -1,
        message: "host queue error".to_owned(),
    }
}

#[derive(Default)]
struct Semaphore {
    kind: SemaphoreKind,
    value: u64,
    /// Binary signals not consumed yet
    signals: u32,
}

#[derive(Default)]
struct State {
    next_id: u64,
    memory: HashMap<u64, Box<[u8]>>,
    semaphores: HashMap<u64, Semaphore>,
    /// Waits enqueued before their signal, as (semaphore, value)
    blocked: Vec<(u64, u64)>,
    events: u32,
}
impl State {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
    fn unblock(&mut self) {
        let semaphores = &mut self.semaphores;
        self.blocked.retain(|&(id, value)| {
            let Some(semaphore) = semaphores.get_mut(&id) else {
                return false;
            };
            match semaphore.kind {
                SemaphoreKind::Timeline => semaphore.value < value,
                SemaphoreKind::Binary if semaphore.signals > 0 => {
                    semaphore.signals -= 1;
                    false
                }
                SemaphoreKind::Binary => true,
            }
        });
    }
}

/// Runs every command immediately. A wait without its signal keeps the queue busy
/// until the signal arrives.
#[derive(Default)]
pub struct HostSyclRuntime {
    pub consumes_handles: bool,
    state: Mutex<State>,
}
impl HostSyclRuntime {
    pub fn new(consumes_handles: bool) -> Arc<Self> {
        Arc::new(Self {
            consumes_handles,
            state: Mutex::default(),
        })
    }
    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.len()
    }
    pub fn live_events(&self) -> u32 {
        self.state.lock().events
    }
    fn take_handle(&self, handle: RawExternalHandle) {
        if let (true, RawExternalHandle::Fd(fd)) = (self.consumes_handles, handle) {
            // The runtime owns the descriptor from here on
            drop(unsafe { OwnedFd::from_raw_fd(fd) });
        }
    }
}

impl SyclRuntime for HostSyclRuntime {
    fn device_uuid(&self, _queue: SyclQueue) -> InteropResult<[u8; 16]> {
        Ok(UUID)
    }
    fn device_name(&self, _queue: SyclQueue) -> String {
        "Host SYCL device".to_owned()
    }
    fn total_memory(&self, _queue: SyclQueue) -> u64 {
        MAX_ALLOCATION * 4
    }
    fn max_allocation_size(&self, _queue: SyclQueue) -> u64 {
        MAX_ALLOCATION
    }
    fn consumes_imported_handles(&self) -> bool {
        self.consumes_handles
    }
    fn supports_external_semaphores(&self) -> bool {
        true
    }

    unsafe fn import_external_memory(
        &self,
        _queue: SyclQueue,
        handle: RawExternalHandle,
        _handle_type: ExternalHandleType,
        size: u64,
    ) -> InteropResult<SyclExternalMemory> {
        self.take_handle(handle);
        let mut state = self.state.lock();
        let id = state.id();
        state
            .memory
            .insert(id, vec![0; size as usize].into_boxed_slice());
        Ok(SyclExternalMemory(id))
    }
    unsafe fn release_external_memory(&self, _queue: SyclQueue, memory: SyclExternalMemory) {
        self.state.lock().memory.remove(&memory.0);
    }
    unsafe fn map_linear_memory(
        &self,
        _queue: SyclQueue,
        memory: SyclExternalMemory,
        size: u64,
    ) -> InteropResult<u64> {
        let mut state = self.state.lock();
        let bytes = state
            .memory
            .get_mut(&memory.0)
            .ok_or_else(|| failure("map_linear_memory"))?;
        assert!(size as usize <= bytes.len());
        Ok(bytes.as_mut_ptr() as u64)
    }
    unsafe fn unmap_linear_memory(&self, _queue: SyclQueue, _ptr: u64) {}
    unsafe fn map_image(
        &self,
        _queue: SyclQueue,
        memory: SyclExternalMemory,
        _info: &ImageImportInfo,
        _format: &'static FormatInfo,
        flavor: ImageFlavor,
    ) -> InteropResult<SyclImageHandles> {
        Ok(SyclImageHandles {
            memory: memory.0,
            unsampled: memory.0 + 1000,
            sampled: (flavor == ImageFlavor::Sampled).then_some(memory.0 + 2000),
        })
    }
    unsafe fn release_image(&self, _queue: SyclQueue, _image: SyclImageHandles) {}

    unsafe fn import_external_semaphore(
        &self,
        _queue: SyclQueue,
        handle: RawExternalHandle,
        _handle_type: ExternalHandleType,
        kind: SemaphoreKind,
    ) -> InteropResult<SyclExternalSemaphore> {
        self.take_handle(handle);
        let mut state = self.state.lock();
        let id = state.id();
        state.semaphores.insert(
            id,
            Semaphore {
                kind,
                ..Default::default()
            },
        );
        Ok(SyclExternalSemaphore(id))
    }
    unsafe fn release_external_semaphore(
        &self,
        _queue: SyclQueue,
        semaphore: SyclExternalSemaphore,
    ) {
        let mut state = self.state.lock();
        state.semaphores.remove(&semaphore.0);
        state.unblock();
    }
    unsafe fn signal_semaphore(
        &self,
        _queue: SyclQueue,
        semaphore: SyclExternalSemaphore,
        value: Option<u64>,
    ) -> InteropResult<()> {
        let mut state = self.state.lock();
        if let Some(entry) = state.semaphores.get_mut(&semaphore.0) {
            match value {
                Some(value) => entry.value = value,
                None => entry.signals += 1,
            }
        }
        state.unblock();
        Ok(())
    }
    unsafe fn wait_semaphore(
        &self,
        _queue: SyclQueue,
        semaphore: SyclExternalSemaphore,
        value: Option<u64>,
    ) -> InteropResult<()> {
        let mut state = self.state.lock();
        let Some(entry) = state.semaphores.get_mut(&semaphore.0) else {
            return Ok(());
        };
        let ready = match value {
            Some(value) => entry.value >= value,
            None if entry.signals > 0 => {
                entry.signals -= 1;
                true
            }
            None => false,
        };
        if !ready {
            state.blocked.push((semaphore.0, value.unwrap_or(0)));
        }
        Ok(())
    }

    unsafe fn memcpy(
        &self,
        _queue: SyclQueue,
        dst: *mut u8,
        src: *const u8,
        len: usize,
    ) -> InteropResult<()> {
        unsafe { std::ptr::copy_nonoverlapping(src, dst, len) };
        Ok(())
    }
    unsafe fn copy_image(
        &self,
        _queue: SyclQueue,
        image: SyclImageHandles,
        layout: &LevelLayout,
        linear: *mut u8,
        direction: ImageCopyDirection,
    ) -> InteropResult<()> {
        let mut state = self.state.lock();
        let Some(bytes) = state.memory.get_mut(&image.memory) else {
            return Err(failure("copy_image"));
        };
        let len = layout.size as usize;
        assert!(len <= bytes.len());
        unsafe {
            match direction {
                ImageCopyDirection::HostToImage => {
                    std::ptr::copy_nonoverlapping(linear, bytes.as_mut_ptr(), len)
                }
                ImageCopyDirection::ImageToLinear => {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), linear, len)
                }
            }
        }
        Ok(())
    }

    fn create_event(&self, _queue: SyclQueue) -> InteropResult<SyclEvent> {
        let mut state = self.state.lock();
        state.events += 1;
        let id = state.id();
        Ok(SyclEvent(std::ptr::without_provenance_mut(id as usize)))
    }
    unsafe fn destroy_event(&self, _event: SyclEvent) {
        let mut state = self.state.lock();
        state.events = state.events.saturating_sub(1);
    }
    fn submit_barrier(&self, _queue: SyclQueue, _event: SyclEvent) -> InteropResult<()> {
        Ok(())
    }
    fn wait(&self, queue: SyclQueue) -> InteropResult<()> {
        // A real queue would hang here
        if !self.is_idle(queue)? {
            return Err(failure("wait"));
        }
        Ok(())
    }
    fn is_idle(&self, _queue: SyclQueue) -> InteropResult<bool> {
        Ok(self.state.lock().blocked.is_empty())
    }
}

/// Memory source that exports a fresh temp file per handle
pub struct TempMemory {
    pub identity: DeviceIdentity,
    pub size: u64,
    pub image: Option<ImageImportInfo>,
}
impl TempMemory {
    pub fn buffer(size: u64) -> Arc<Self> {
        Arc::new(Self {
            identity: identity(vk::DriverId::INTEL_OPEN_SOURCE_MESA),
            size,
            image: None,
        })
    }
    pub fn image(info: ImageImportInfo, size: u64) -> Arc<Self> {
        Arc::new(Self {
            identity: identity(vk::DriverId::INTEL_OPEN_SOURCE_MESA),
            size,
            image: Some(info),
        })
    }
}
impl ExternalMemorySource for TempMemory {
    fn device_identity(&self) -> &DeviceIdentity {
        &self.identity
    }
    fn allocation_size(&self) -> u64 {
        self.size
    }
    fn is_dedicated(&self) -> bool {
        true
    }
    fn export_memory_handle(
        &self,
        _handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        export_temp_file()
    }
}
impl ExternalBufferSource for TempMemory {
    fn buffer_size(&self) -> u64 {
        self.size
    }
}
impl ExternalImageSource for TempMemory {
    fn image_info(&self) -> ImageImportInfo {
        self.image
            .unwrap_or_else(|| ImageImportInfo::new_2d(vk::Format::R8_UNORM, self.size as u32, 1))
    }
}

pub struct TempSemaphore {
    pub identity: DeviceIdentity,
    pub kind: SemaphoreKind,
}
impl TempSemaphore {
    pub fn new(kind: SemaphoreKind) -> Arc<Self> {
        Arc::new(Self {
            identity: identity(vk::DriverId::INTEL_OPEN_SOURCE_MESA),
            kind,
        })
    }
}
impl ExternalSemaphoreSource for TempSemaphore {
    fn device_identity(&self) -> &DeviceIdentity {
        &self.identity
    }
    fn semaphore_kind(&self) -> SemaphoreKind {
        self.kind
    }
    fn vk_semaphore(&self) -> vk::Semaphore {
        vk::Semaphore::null()
    }
    fn export_semaphore_handle(
        &self,
        _handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        export_temp_file()
    }
}
