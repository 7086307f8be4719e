/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use parking_lot::Mutex;
use scopeguard::defer;
use types::{ExternalHandleType, ImageDimensionality, InteropComputeApi, SemaphoreKind};

use super::{CommandBuffer, Submission, VulkanDevice};
use crate::format::image_aspect;
use crate::handle::{vk_memory_handle_type, vk_semaphore_handle_type};
use crate::image::level_layout;
use crate::{
    DeviceIdentity, ExportedHandle, ExternalBufferSource, ExternalImageSource,
    ExternalMemorySource, ExternalSemaphoreSource, FormatInfo, ImageImportInfo, InteropError,
    InteropResult, LevelLayout, get_image_format_info,
};

fn timeout_nanos(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |t| t.as_nanos().min(u64::MAX as u128) as u64)
}

/// Allocates memory that can be exported as `handle_type`, dedicated to one resource.
unsafe fn allocate_exportable(
    device: &VulkanDevice,
    requirements: vk::MemoryRequirements,
    handle_type: ExternalHandleType,
    mut dedicated: vk::MemoryDedicatedAllocateInfo<'_>,
) -> InteropResult<vk::DeviceMemory> {
    let memory_type = device.find_memory_type(
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let mut export =
        vk::ExportMemoryAllocateInfo::default().handle_types(vk_memory_handle_type(handle_type));
    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type)
        .push_next(&mut export)
        .push_next(&mut dedicated);
    Ok(unsafe { device.device().allocate_memory(&info, None) }?)
}

enum BufferMemory {
    Exportable {
        memory: vk::DeviceMemory,
        size: u64,
        handle_type: ExternalHandleType,
    },
    Allocated(Allocation),
}

/// A Vulkan buffer backed either by its own exportable allocation or by the
/// device's allocator.
pub struct VulkanBuffer {
    device: Arc<VulkanDevice>,
    buffer: vk::Buffer,
    size: u64,
    memory: Option<BufferMemory>,
}
impl VulkanBuffer {
    /// Creates a device local buffer whose memory can be exported to a compute
    /// runtime.
    #[tracing::instrument(skip(device))]
    pub fn new_exportable(
        device: &Arc<VulkanDevice>,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> InteropResult<Self> {
        if size == 0 {
            return Err(InteropError::AllocationTooLarge {
                requested: 0,
                limit: 0,
            });
        }
        let handle_type = ExternalHandleType::native();
        let usage = usage | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        if !device.supports_buffer_export(usage, handle_type) {
            return Err(InteropError::ExportUnsupported);
        }
        let raw = device.device();
        let mut external = vk::ExternalMemoryBufferCreateInfo::default()
            .handle_types(vk_memory_handle_type(handle_type));
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .push_next(&mut external);
        let buffer = unsafe { raw.create_buffer(&info, None) }?;
        let err = Cell::new(true);
        defer! {
            if err.get() {
                unsafe { raw.destroy_buffer(buffer, None) };
            }
        }
        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
        let memory = unsafe {
            allocate_exportable(
                device,
                requirements,
                handle_type,
                vk::MemoryDedicatedAllocateInfo::default().buffer(buffer),
            )
        }?;
        defer! {
            if err.get() {
                unsafe { raw.free_memory(memory, None) };
            }
        }
        unsafe { raw.bind_buffer_memory(buffer, memory, 0) }?;
        err.set(false);
        Ok(Self {
            device: device.clone(),
            buffer,
            size,
            memory: Some(BufferMemory::Exportable {
                memory,
                size: requirements.size,
                handle_type,
            }),
        })
    }

    /// Creates a buffer through the allocator, usually host visible for uploads and
    /// readback. It cannot be exported.
    #[tracing::instrument(skip(device))]
    pub fn new_staging(
        device: &Arc<VulkanDevice>,
        size: u64,
        location: MemoryLocation,
    ) -> InteropResult<Self> {
        let raw = device.device();
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(
                vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::STORAGE_BUFFER,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { raw.create_buffer(&info, None) }?;
        let err = Cell::new(true);
        defer! {
            if err.get() {
                unsafe { raw.destroy_buffer(buffer, None) };
            }
        }
        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name: "vkinterop staging buffer",
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;
        if let Err(e) =
            unsafe { raw.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            if let Err(free_error) = device.allocator().free(allocation) {
                log::error!("Failed to free staging allocation after bind failure: {free_error}");
            }
            return Err(e.into());
        }
        err.set(false);
        Ok(Self {
            device: device.clone(),
            buffer,
            size,
            memory: Some(BufferMemory::Allocated(allocation)),
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }
    pub fn size(&self) -> u64 {
        self.size
    }
    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }
    pub fn is_exportable(&self) -> bool {
        matches!(self.memory, Some(BufferMemory::Exportable { .. }))
    }
    /// Host view of a mapped staging buffer
    pub fn mapped_slice(&self) -> Option<&[u8]> {
        match &self.memory {
            Some(BufferMemory::Allocated(allocation)) => allocation
                .mapped_slice()
                .map(|slice| &slice[..self.size as usize]),
            _ => None,
        }
    }
    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        let size = self.size as usize;
        match &mut self.memory {
            Some(BufferMemory::Allocated(allocation)) => allocation
                .mapped_slice_mut()
                .map(|slice| &mut slice[..size]),
            _ => None,
        }
    }
    /// Copies `data` into a mapped buffer at `offset`.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> InteropResult<()> {
        let size = self.size;
        let slice = self
            .mapped_slice_mut()
            .ok_or(InteropError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let end = offset + data.len() as u64;
        if end > size {
            return Err(InteropError::CopyOutOfBounds {
                requested: end,
                available: size,
            });
        }
        slice[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }
    /// Copies from a mapped buffer at `offset` into `out`.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> InteropResult<()> {
        let slice = self
            .mapped_slice()
            .ok_or(InteropError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let end = offset + out.len() as u64;
        if end > self.size {
            return Err(InteropError::CopyOutOfBounds {
                requested: end,
                available: self.size,
            });
        }
        out.copy_from_slice(&slice[offset as usize..end as usize]);
        Ok(())
    }
}
impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device().destroy_buffer(self.buffer, None) };
        match self.memory.take() {
            Some(BufferMemory::Exportable { memory, .. }) => unsafe {
                self.device.device().free_memory(memory, None)
            },
            Some(BufferMemory::Allocated(allocation)) => {
                if let Err(e) = self.device.allocator().free(allocation) {
                    log::error!("Failed to free staging buffer memory: {e}");
                }
            }
            None => (),
        }
    }
}
impl std::fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("exportable", &self.is_exportable())
            .finish()
    }
}
impl ExternalMemorySource for VulkanBuffer {
    fn device_identity(&self) -> &DeviceIdentity {
        self.device.identity()
    }
    fn allocation_size(&self) -> u64 {
        match &self.memory {
            Some(BufferMemory::Exportable { size, .. }) => *size,
            Some(BufferMemory::Allocated(allocation)) => allocation.size(),
            None => 0,
        }
    }
    fn is_dedicated(&self) -> bool {
        self.is_exportable()
    }
    fn export_memory_handle(
        &self,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        match &self.memory {
            Some(BufferMemory::Exportable {
                memory,
                handle_type: allocated,
                ..
            }) if *allocated == handle_type => self.device.export_memory(*memory, handle_type),
            _ => Err(InteropError::ExportUnsupported),
        }
    }
}
impl ExternalBufferSource for VulkanBuffer {
    fn buffer_size(&self) -> u64 {
        self.size
    }
}

/// Fills in the minimum counts and transfer usage. Cube images must describe whole cubes.
fn normalized_image_info(mut info: ImageImportInfo) -> InteropResult<ImageImportInfo> {
    info.mip_levels = info.mip_levels.max(1);
    info.array_layers = info.array_layers.max(1);
    if info.dimensionality == ImageDimensionality::Cube && info.array_layers % 6 != 0 {
        return Err(InteropError::InvalidCubeLayers {
            layers: info.array_layers,
        });
    }
    info.usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    Ok(info)
}

fn image_type(dimensionality: ImageDimensionality) -> vk::ImageType {
    match dimensionality {
        ImageDimensionality::D1 => vk::ImageType::TYPE_1D,
        ImageDimensionality::D2 | ImageDimensionality::Cube => vk::ImageType::TYPE_2D,
        ImageDimensionality::D3 => vk::ImageType::TYPE_3D,
    }
}
fn view_type(info: &ImageImportInfo) -> vk::ImageViewType {
    let layered = info.array_layers > 1;
    match info.dimensionality {
        ImageDimensionality::D1 if layered => vk::ImageViewType::TYPE_1D_ARRAY,
        ImageDimensionality::D1 => vk::ImageViewType::TYPE_1D,
        ImageDimensionality::D2 if layered => vk::ImageViewType::TYPE_2D_ARRAY,
        ImageDimensionality::D2 => vk::ImageViewType::TYPE_2D,
        ImageDimensionality::D3 => vk::ImageViewType::TYPE_3D,
        ImageDimensionality::Cube if info.array_layers > 6 => vk::ImageViewType::CUBE_ARRAY,
        ImageDimensionality::Cube => vk::ImageViewType::CUBE,
    }
}
const VIEW_USAGES: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT.as_raw(),
);

/// An optimally tiled image in its own exportable allocation. It is left in
/// `GENERAL` layout once created.
pub struct VulkanImage {
    device: Arc<VulkanDevice>,
    image: vk::Image,
    view: Option<vk::ImageView>,
    memory: vk::DeviceMemory,
    allocation_size: u64,
    handle_type: ExternalHandleType,
    info: ImageImportInfo,
    format: &'static FormatInfo,
    layout: Mutex<vk::ImageLayout>,
}
impl VulkanImage {
    #[tracing::instrument(skip(device), fields(format = ?info.format))]
    pub fn new_exportable(
        device: &Arc<VulkanDevice>,
        info: ImageImportInfo,
    ) -> InteropResult<Self> {
        let format = get_image_format_info(info.format);
        if !format.is_known() {
            return Err(InteropError::format_unsupported(
                info.format,
                InteropComputeApi::None,
            ));
        }
        let info = normalized_image_info(info)?;
        let handle_type = ExternalHandleType::native();
        let ty = image_type(info.dimensionality);
        let flags = if info.dimensionality == ImageDimensionality::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        Self::check_export_support(device, &info, ty, flags, handle_type)?;

        let raw = device.device();
        let mut extent = info.extent;
        if info.dimensionality == ImageDimensionality::D1 {
            extent.height = 1;
        }
        if info.dimensionality != ImageDimensionality::D3 {
            extent.depth = 1;
        }
        let mut external = vk::ExternalMemoryImageCreateInfo::default()
            .handle_types(vk_memory_handle_type(handle_type));
        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(ty)
            .format(info.format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            })
            .mip_levels(info.mip_levels)
            .array_layers(info.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .push_next(&mut external);
        let image = unsafe { raw.create_image(&create_info, None) }?;
        let err = Cell::new(true);
        defer! {
            if err.get() {
                unsafe { raw.destroy_image(image, None) };
            }
        }
        let requirements = unsafe { raw.get_image_memory_requirements(image) };
        let memory = unsafe {
            allocate_exportable(
                device,
                requirements,
                handle_type,
                vk::MemoryDedicatedAllocateInfo::default().image(image),
            )
        }?;
        defer! {
            if err.get() {
                unsafe { raw.free_memory(memory, None) };
            }
        }
        unsafe { raw.bind_image_memory(image, memory, 0) }?;
        let view = if info.usage.intersects(VIEW_USAGES) {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(view_type(&info))
                .format(info.format)
                .subresource_range(Self::full_range(&info));
            Some(unsafe { raw.create_image_view(&view_info, None) }?)
        } else {
            None
        };
        err.set(false);
        let this = Self {
            device: device.clone(),
            image,
            view,
            memory,
            allocation_size: requirements.size,
            handle_type,
            info,
            format,
            layout: Mutex::new(vk::ImageLayout::UNDEFINED),
        };
        // On failure `this` is dropped and releases everything above
        let mut commands = CommandBuffer::begin(device)?;
        commands.transition_image_layout(&this, vk::ImageLayout::GENERAL);
        Submission::new().submit(commands)?.wait(None)?;
        Ok(this)
    }

    fn check_export_support(
        device: &VulkanDevice,
        info: &ImageImportInfo,
        ty: vk::ImageType,
        flags: vk::ImageCreateFlags,
        handle_type: ExternalHandleType,
    ) -> InteropResult<()> {
        let mut external_info = vk::PhysicalDeviceExternalImageFormatInfo::default()
            .handle_type(vk_memory_handle_type(handle_type));
        let format_info = vk::PhysicalDeviceImageFormatInfo2::default()
            .format(info.format)
            .ty(ty)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage)
            .flags(flags)
            .push_next(&mut external_info);
        let mut external_props = vk::ExternalImageFormatProperties::default();
        let mut props = vk::ImageFormatProperties2::default().push_next(&mut external_props);
        let result = unsafe {
            device.instance().get_physical_device_image_format_properties2(
                device.physical_device(),
                &format_info,
                &mut props,
            )
        };
        match result {
            Ok(()) => (),
            Err(vk::Result::ERROR_FORMAT_NOT_SUPPORTED) => {
                return Err(InteropError::format_unsupported(
                    info.format,
                    InteropComputeApi::None,
                ));
            }
            Err(e) => return Err(e.into()),
        }
        let limits = props.image_format_properties;
        if info.mip_levels > limits.max_mip_levels || info.array_layers > limits.max_array_layers {
            return Err(InteropError::format_unsupported(
                info.format,
                InteropComputeApi::None,
            ));
        }
        if !external_props
            .external_memory_properties
            .external_memory_features
            .contains(vk::ExternalMemoryFeatureFlags::EXPORTABLE)
        {
            return Err(InteropError::ExportUnsupported);
        }
        Ok(())
    }

    fn full_range(info: &ImageImportInfo) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: image_aspect(info.format),
            base_mip_level: 0,
            level_count: info.mip_levels,
            base_array_layer: 0,
            layer_count: info.array_layers,
        }
    }
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        Self::full_range(&self.info)
    }
    pub fn image(&self) -> vk::Image {
        self.image
    }
    pub fn view(&self) -> Option<vk::ImageView> {
        self.view
    }
    pub fn info(&self) -> &ImageImportInfo {
        &self.info
    }
    pub fn format_info(&self) -> &'static FormatInfo {
        self.format
    }
    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }
    /// Layout the image will be in once all recorded commands have executed
    pub fn layout(&self) -> vk::ImageLayout {
        *self.layout.lock()
    }
    pub(crate) fn set_layout(&self, layout: vk::ImageLayout) {
        *self.layout.lock() = layout;
    }
    /// Tightly packed size and extent of a mip level
    pub fn level_layout(&self, level: u32) -> InteropResult<LevelLayout> {
        level_layout(&self.info, self.format, level)
    }
}
impl Drop for VulkanImage {
    fn drop(&mut self) {
        let raw = self.device.device();
        unsafe {
            if let Some(view) = self.view {
                raw.destroy_image_view(view, None);
            }
            raw.destroy_image(self.image, None);
            raw.free_memory(self.memory, None);
        }
    }
}
impl std::fmt::Debug for VulkanImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanImage")
            .field("image", &self.image)
            .field("info", &self.info)
            .field("layout", &self.layout())
            .finish()
    }
}
impl ExternalMemorySource for VulkanImage {
    fn device_identity(&self) -> &DeviceIdentity {
        self.device.identity()
    }
    fn allocation_size(&self) -> u64 {
        self.allocation_size
    }
    fn is_dedicated(&self) -> bool {
        true
    }
    fn export_memory_handle(
        &self,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        if handle_type != self.handle_type {
            return Err(InteropError::ExportUnsupported);
        }
        self.device.export_memory(self.memory, handle_type)
    }
}
impl ExternalImageSource for VulkanImage {
    fn image_info(&self) -> ImageImportInfo {
        self.info
    }
}

/// A binary or timeline semaphore, optionally exportable.
pub struct VulkanSemaphore {
    device: Arc<VulkanDevice>,
    semaphore: vk::Semaphore,
    kind: SemaphoreKind,
    handle_type: Option<ExternalHandleType>,
}
impl VulkanSemaphore {
    /// `initial_value` is ignored for binary semaphores.
    #[tracing::instrument(skip(device))]
    pub fn new(
        device: &Arc<VulkanDevice>,
        kind: SemaphoreKind,
        initial_value: u64,
        exportable: bool,
    ) -> InteropResult<Self> {
        let semaphore_type = match kind {
            SemaphoreKind::Binary => vk::SemaphoreType::BINARY,
            SemaphoreKind::Timeline => vk::SemaphoreType::TIMELINE,
        };
        let handle_type = exportable.then(ExternalHandleType::native);
        if let Some(handle_type) = handle_type {
            if !device.supports_semaphore_export(semaphore_type, handle_type) {
                return Err(InteropError::ExportUnsupported);
            }
        }
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(semaphore_type)
            .initial_value(if kind == SemaphoreKind::Timeline {
                initial_value
            } else {
                0
            });
        let mut export = vk::ExportSemaphoreCreateInfo::default()
            .handle_types(handle_type.map_or(
                vk::ExternalSemaphoreHandleTypeFlags::empty(),
                vk_semaphore_handle_type,
            ));
        let mut info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        if handle_type.is_some() {
            info = info.push_next(&mut export);
        }
        let semaphore = unsafe { device.device().create_semaphore(&info, None) }?;
        Ok(Self {
            device: device.clone(),
            semaphore,
            kind,
            handle_type,
        })
    }
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }
    pub fn kind(&self) -> SemaphoreKind {
        self.kind
    }
    fn require_timeline(&self) -> InteropResult<()> {
        if self.kind == SemaphoreKind::Timeline {
            Ok(())
        } else {
            Err(InteropError::Vulkan(vk::Result::ERROR_FEATURE_NOT_PRESENT))
        }
    }
    /// Sets a timeline semaphore to `value` from the host.
    pub fn signal(&self, value: u64) -> InteropResult<()> {
        self.require_timeline()?;
        let info = vk::SemaphoreSignalInfo::default()
            .semaphore(self.semaphore)
            .value(value);
        unsafe { self.device.device().signal_semaphore(&info) }?;
        Ok(())
    }
    /// Waits on the host for a timeline semaphore to reach `value`. Returns false
    /// on timeout.
    pub fn wait(&self, value: u64, timeout: Option<Duration>) -> InteropResult<bool> {
        self.require_timeline()?;
        let semaphores = [self.semaphore];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        match unsafe {
            self.device
                .device()
                .wait_semaphores(&info, timeout_nanos(timeout))
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
    pub fn value(&self) -> InteropResult<u64> {
        self.require_timeline()?;
        Ok(unsafe {
            self.device
                .device()
                .get_semaphore_counter_value(self.semaphore)
        }?)
    }
}
impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe { self.device.device().destroy_semaphore(self.semaphore, None) };
    }
}
impl std::fmt::Debug for VulkanSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSemaphore")
            .field("semaphore", &self.semaphore)
            .field("kind", &self.kind)
            .finish()
    }
}
impl ExternalSemaphoreSource for VulkanSemaphore {
    fn device_identity(&self) -> &DeviceIdentity {
        self.device.identity()
    }
    fn semaphore_kind(&self) -> SemaphoreKind {
        self.kind
    }
    fn vk_semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }
    fn export_semaphore_handle(
        &self,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        if self.handle_type != Some(handle_type) {
            return Err(InteropError::ExportUnsupported);
        }
        self.device.export_semaphore(self.semaphore, handle_type)
    }
    fn counter_value(&self) -> Option<u64> {
        match self.kind {
            SemaphoreKind::Timeline => self.value().ok(),
            SemaphoreKind::Binary => None,
        }
    }
}

pub struct VulkanFence {
    device: Arc<VulkanDevice>,
    fence: vk::Fence,
}
impl VulkanFence {
    pub fn new(device: &Arc<VulkanDevice>, signaled: bool) -> InteropResult<Self> {
        let info = vk::FenceCreateInfo::default().flags(if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        });
        let fence = unsafe { device.device().create_fence(&info, None) }?;
        Ok(Self {
            device: device.clone(),
            fence,
        })
    }
    pub fn fence(&self) -> vk::Fence {
        self.fence
    }
    /// Returns false on timeout. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> InteropResult<bool> {
        match unsafe {
            self.device
                .device()
                .wait_for_fences(&[self.fence], true, timeout_nanos(timeout))
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
    pub fn is_signaled(&self) -> InteropResult<bool> {
        Ok(unsafe { self.device.device().get_fence_status(self.fence) }?)
    }
    pub fn reset(&self) -> InteropResult<()> {
        unsafe { self.device.device().reset_fences(&[self.fence]) }?;
        Ok(())
    }
}
impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.device.device().destroy_fence(self.fence, None) };
    }
}
