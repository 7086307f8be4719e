/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;
use log::info;
use types::SemaphoreKind;

use crate as hal;
use crate::{
    CommandBuffer, ComputeBackend, DeviceContext, ExternalBuffer, ExternalImage,
    ExternalSemaphore, ImageFlavor, ImageImportInfo, InteropError, Submission, VulkanBuffer,
    VulkanDevice, VulkanImage, VulkanSemaphore,
};

type TestResult = Result<(), InteropError>;

/// The Vulkan device plus a context of `B` on the same GPU, or `None` to skip
fn setup<B: ComputeBackend>()
-> Result<Option<(Arc<VulkanDevice>, Arc<B::Context>)>, InteropError> {
    let device = match VulkanDevice::new(true) {
        Ok(device) => device,
        Err(e) => {
            info!("Skipping test: no usable Vulkan device ({e})");
            return Ok(None);
        }
    };
    if let Err(e) = B::initialize() {
        info!("Skipping test: {} unavailable ({e})", B::API);
        return Ok(None);
    }
    match B::Context::new(device.identity()) {
        Ok(context) => Ok(Some((device, context))),
        Err(InteropError::NoMatchingDevice { .. }) => {
            info!("Skipping test: {} has no device matching {}", B::API, device.identity().name);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn upload(device: &Arc<VulkanDevice>, data: &[u8]) -> Result<VulkanBuffer, InteropError> {
    let mut staging =
        VulkanBuffer::new_staging(device, data.len() as u64, MemoryLocation::CpuToGpu)?;
    staging.write(0, data)?;
    Ok(staging)
}

fn buffer_round_trip<B: ComputeBackend>() -> TestResult {
    let Some((device, context)) = setup::<B>()? else {
        return Ok(());
    };
    let values: Vec<u32> = (0..256).collect();
    let bytes: &[u8] = bytemuck::cast_slice(&values);
    let shared = VulkanBuffer::new_exportable(
        &device,
        bytes.len() as u64,
        vk::BufferUsageFlags::STORAGE_BUFFER,
    )?;
    let staging = upload(&device, bytes)?;
    let mut commands = CommandBuffer::begin(&device)?;
    commands.copy_buffer(&staging, &shared, bytes.len() as u64)?;
    commands.release_buffer_to_external(&shared);
    Submission::new().submit(commands)?.wait(None)?;

    let imported = unsafe { context.import_buffer(&shared) }?;
    assert_eq!(imported.size(), bytes.len() as u64);
    assert_ne!(imported.device_ptr(), 0);
    let stream = context.create_stream()?;
    let mut readback = vec![0u32; values.len()];
    unsafe { imported.copy_to_host_async(bytemuck::cast_slice_mut(&mut readback), stream) }?;
    B::wait_for_completion(stream)?;
    assert_eq!(readback, values);

    let doubled: Vec<u32> = values.iter().map(|v| v * 2).collect();
    unsafe { imported.copy_from_host_async(bytemuck::cast_slice(&doubled), stream) }?;
    B::wait_for_completion(stream)?;
    let download =
        VulkanBuffer::new_staging(&device, bytes.len() as u64, MemoryLocation::GpuToCpu)?;
    let mut commands = CommandBuffer::begin(&device)?;
    commands.acquire_buffer_from_external(&shared);
    commands.copy_buffer(&shared, &download, bytes.len() as u64)?;
    commands.memory_barrier();
    Submission::new().submit(commands)?.wait(None)?;
    let mut result = vec![0u32; values.len()];
    download.read(0, bytemuck::cast_slice_mut(&mut result))?;
    assert_eq!(result, doubled);

    drop(imported);
    unsafe { context.destroy_stream(stream) }?;
    Ok(())
}
dev_utils::all_backend_tests!(buffer_round_trip);

/// Two imports of one allocation see the same memory
fn double_import<B: ComputeBackend>() -> TestResult {
    let Some((device, context)) = setup::<B>()? else {
        return Ok(());
    };
    let shared = VulkanBuffer::new_exportable(&device, 64, vk::BufferUsageFlags::STORAGE_BUFFER)?;
    let first = unsafe { context.import_buffer(&shared) }?;
    let second = unsafe { context.import_buffer(&shared) }?;
    let stream = context.create_stream()?;
    let pattern: Vec<u8> = (0..64).collect();
    unsafe { first.copy_from_host_async(&pattern, stream) }?;
    let mut seen = vec![0u8; 64];
    unsafe { second.copy_to_host_async(&mut seen, stream) }?;
    B::wait_for_completion(stream)?;
    assert_eq!(seen, pattern);
    drop(second);
    drop(first);
    unsafe { context.destroy_stream(stream) }?;
    Ok(())
}
dev_utils::all_backend_tests!(double_import);

fn timeline_handshake<B: ComputeBackend>() -> TestResult {
    let Some((device, context)) = setup::<B>()? else {
        return Ok(());
    };
    let shared = VulkanBuffer::new_exportable(&device, 4, vk::BufferUsageFlags::STORAGE_BUFFER)?;
    let semaphore = VulkanSemaphore::new(&device, SemaphoreKind::Timeline, 0, true)?;
    let imported = unsafe { context.import_buffer(&shared) }?;
    let compute_semaphore = match unsafe { context.import_semaphore(&semaphore) } {
        Ok(s) => s,
        Err(e) if e.is_optional_feature_miss() => {
            log::warn!("Skipping test: {e}");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let stream = context.create_stream()?;
    for value in 1..=32u64 {
        let expected = value as f32 * 0.5;
        let mut commands = CommandBuffer::begin(&device)?;
        commands.acquire_buffer_from_external(&shared);
        commands.update_buffer(&shared, 0, bytemuck::bytes_of(&expected))?;
        commands.release_buffer_to_external(&shared);
        let pending = Submission::new().signal(&semaphore, value).submit(commands)?;
        let mut out = 0f32;
        unsafe {
            compute_semaphore.wait_async(stream, value, None)?;
            imported.copy_to_host_async(bytemuck::bytes_of_mut(&mut out), stream)?;
        }
        B::wait_for_completion(stream)?;
        pending.wait(None)?;
        assert_eq!(out, expected);
    }
    assert_eq!(semaphore.value()?, 32);
    drop(compute_semaphore);
    drop(imported);
    unsafe { context.destroy_stream(stream) }?;
    Ok(())
}
dev_utils::all_backend_tests!(timeline_handshake);

/// Every channel of texel `(x, y)` holds `x + y * width`
fn image_readback<B: ComputeBackend>() -> TestResult {
    let Some((device, context)) = setup::<B>()? else {
        return Ok(());
    };
    for (width, height) in [(1, 1), (32, 16), (128, 128), (515, 201), (1024, 1024)] {
        let info = ImageImportInfo::new_2d(vk::Format::R32G32B32A32_SFLOAT, width, height);
        let image = VulkanImage::new_exportable(&device, info)?;
        let texels: Vec<f32> = (0..width * height).flat_map(|i| [i as f32; 4]).collect();
        let staging = upload(&device, bytemuck::cast_slice(&texels))?;
        let mut commands = CommandBuffer::begin(&device)?;
        commands.copy_buffer_to_image(&staging, &image, 0)?;
        commands.release_image_to_external(&image);
        Submission::new().submit(commands)?.wait(None)?;

        let imported = match unsafe { context.import_image(&image, ImageFlavor::Unsampled) } {
            Ok(imported) => imported,
            Err(e) if e.is_optional_feature_miss() => {
                log::warn!("Skipping image test on {}: {e}", B::API);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        assert!(imported.texture_object().is_none());
        imported.surface_object(0)?;
        let stream = context.create_stream()?;
        let mut readback = vec![0f32; texels.len()];
        let dst = bytemuck::cast_slice_mut(&mut readback);
        unsafe { imported.copy_to_host_async(0, dst, stream) }?;
        B::wait_for_completion(stream)?;
        assert_eq!(readback, texels, "{width}x{height}");
        drop(imported);
        unsafe { context.destroy_stream(stream) }?;
    }
    Ok(())
}
dev_utils::all_backend_tests!(image_readback);

/// A binary wait without a matching signal never drains
fn binary_single_consumer<B: ComputeBackend>() -> TestResult {
    let Some((device, context)) = setup::<B>()? else {
        return Ok(());
    };
    let semaphore = VulkanSemaphore::new(&device, SemaphoreKind::Binary, 0, true)?;
    let compute_semaphore = match unsafe { context.import_semaphore(&semaphore) } {
        Ok(s) => s,
        Err(e) if e.is_optional_feature_miss() => {
            log::warn!("Skipping test: {e}");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let stream = context.create_stream()?;
    let pending = Submission::new().signal(&semaphore, 0).submit_empty(&device)?;
    unsafe { compute_semaphore.wait_async(stream, 0, None) }?;
    assert!(B::wait_for_completion_timeout(stream, Duration::from_secs(10))?);
    pending.wait(None)?;

    unsafe { compute_semaphore.wait_async(stream, 0, None) }?;
    assert!(!B::wait_for_completion_timeout(stream, Duration::from_millis(200))?);
    // Unblock the stream so it can be destroyed
    Submission::new().signal(&semaphore, 0).submit_empty(&device)?.wait(None)?;
    B::wait_for_completion(stream)?;
    drop(compute_semaphore);
    unsafe { context.destroy_stream(stream) }?;
    Ok(())
}
dev_utils::all_backend_tests!(binary_single_consumer);

#[test]
fn vulkan_export_creates_distinct_handles() -> TestResult {
    let _guard = dev_utils::serial_guard();
    dev_utils::init_test_logging();
    let device = match VulkanDevice::new(true) {
        Ok(device) => device,
        Err(e) => {
            info!("Skipping test: no usable Vulkan device ({e})");
            return Ok(());
        }
    };
    use crate::{ExternalMemorySource, ExternalSemaphoreSource};
    let before = hal::handle_statistics();
    let buffer =
        VulkanBuffer::new_exportable(&device, 1024, vk::BufferUsageFlags::STORAGE_BUFFER)?;
    assert!(buffer.is_dedicated());
    assert!(buffer.allocation_size() >= 1024);
    let a = buffer.export_memory_handle(types::ExternalHandleType::native())?;
    let b = buffer.export_memory_handle(types::ExternalHandleType::native())?;
    assert_ne!(a.raw(), b.raw());
    drop((a, b));
    let staging = VulkanBuffer::new_staging(&device, 16, MemoryLocation::CpuToGpu)?;
    assert!(matches!(
        staging.export_memory_handle(types::ExternalHandleType::native()),
        Err(InteropError::ExportUnsupported)
    ));
    let private = VulkanSemaphore::new(&device, SemaphoreKind::Timeline, 5, false)?;
    assert_eq!(private.counter_value(), Some(5));
    assert!(matches!(
        private.export_semaphore_handle(types::ExternalHandleType::native()),
        Err(InteropError::ExportUnsupported)
    ));
    private.signal(9)?;
    assert!(private.wait(9, Some(Duration::from_secs(1)))?);
    assert!(!private.wait(10, Some(Duration::from_millis(10)))?);
    let after = hal::handle_statistics();
    assert!(after.exported >= before.exported + 2);
    assert!(after.closed >= before.closed + 2);
    Ok(())
}

#[test]
fn image_starts_in_general_layout() -> TestResult {
    let _guard = dev_utils::serial_guard();
    dev_utils::init_test_logging();
    let Ok(device) = VulkanDevice::new(true) else {
        info!("Skipping test: no usable Vulkan device");
        return Ok(());
    };
    let mut info = ImageImportInfo::new_2d(vk::Format::R8G8B8A8_UNORM, 64, 64);
    info.mip_levels = 3;
    let image = VulkanImage::new_exportable(&device, info)?;
    assert_eq!(image.layout(), vk::ImageLayout::GENERAL);
    assert!(image.view().is_some());
    assert_eq!(image.level_layout(2)?.size, 16 * 16 * 4);
    assert!(matches!(
        image.level_layout(3),
        Err(InteropError::InvalidMipLevel { level: 3, levels: 3 })
    ));
    Ok(())
}

#[test]
fn interop_extension_list() {
    let names = hal::get_cuda_interop_device_extensions();
    for required in [
        "VK_KHR_external_memory",
        "VK_KHR_external_semaphore",
        "VK_KHR_timeline_semaphore",
        "VK_KHR_dedicated_allocation",
    ] {
        assert!(names.contains(&required), "{required}");
    }
    let platform = if cfg!(windows) { "_win32" } else { "_fd" };
    assert_eq!(names.iter().filter(|n| n.ends_with(platform)).count(), 2);
}
