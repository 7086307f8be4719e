/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! End to end scenarios on real hardware. Each one skips when the machine has no
//! Vulkan device paired with the backend under test.

use std::sync::Arc;

use hal::ash::vk;
use hal::{CommandBuffer, ComputeBackend, MemoryLocation, Submission};
use log::{info, warn};

use crate::*;

type TestResult = Result<(), InteropError>;

/// Clears the process wide selection when a scenario ends, however it ends
struct ResetOnDrop;
impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        reset_compute_api_state();
    }
}

fn setup<B: ComputeBackend>() -> Result<Option<Arc<VulkanDevice>>, InteropError> {
    reset_compute_api_state();
    let device = match VulkanDevice::new(true) {
        Ok(device) => device,
        Err(e) => {
            info!("Skipping test: no usable Vulkan device ({e})");
            return Ok(None);
        }
    };
    if let Err(e) = initialize_compute_api(B::API) {
        info!("Skipping test: {e}");
        return Ok(None);
    }
    match compute_device_info(device.identity()) {
        Ok(info) => {
            info!("Pairing {} with {} device {}", device.identity().name, info.api, info.name);
            Ok(Some(device))
        }
        Err(InteropError::NoMatchingDevice { .. }) => {
            info!("Skipping test: no {} device matches {}", B::API, device.identity().name);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn image_or_skip<T>(result: InteropResult<T>) -> InteropResult<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_optional_feature_miss() => {
            warn!("Skipping test: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn read_image(device: &Arc<VulkanDevice>, image: &VulkanImage) -> InteropResult<Vec<u8>> {
    let size = image.level_layout(0)?.size;
    let download = VulkanBuffer::new_staging(device, size, MemoryLocation::GpuToCpu)?;
    let mut commands = CommandBuffer::begin(device)?;
    commands.acquire_image_from_external(image);
    commands.copy_image_to_buffer(image, 0, &download)?;
    commands.memory_barrier();
    commands.release_image_to_external(image);
    Submission::new().submit(commands)?.wait(None)?;
    let mut bytes = vec![0u8; size as usize];
    download.read(0, &mut bytes)?;
    Ok(bytes)
}

/// Compute writes every pixel, Vulkan reads them back
fn compute_write_vulkan_read<B: ComputeBackend>() -> TestResult {
    let _reset = ResetOnDrop;
    let Some(device) = setup::<B>()? else {
        return Ok(());
    };
    const SIZE: u32 = 1024;
    let image = Arc::new(VulkanImage::new_exportable(
        &device,
        ImageImportInfo::new_2d(vk::Format::R32_SFLOAT, SIZE, SIZE),
    )?);
    let Some(imported) = image_or_skip(create_unsampled_image_vk_compute_api_external_memory(
        image.clone(),
    ))?
    else {
        return Ok(());
    };
    let pixels: Vec<f32> = (0..SIZE * SIZE).map(|i| i as f32).collect();
    let stream = create_stream(device.identity())?;
    unsafe { imported.copy_from_host_ptr_async(0, bytemuck::cast_slice(&pixels), stream) }?;
    wait_for_completion(B::API, stream)?;

    let bytes = read_image(&device, &image)?;
    let readback: &[f32] = bytemuck::cast_slice(&bytes);
    for y in [0, 1, SIZE / 2, SIZE - 1] {
        for x in [0, 7, SIZE - 1] {
            assert_eq!(readback[(y * SIZE + x) as usize], (y * SIZE + x) as f32);
        }
    }
    assert_eq!(readback, &pixels[..]);
    drop(imported);
    unsafe { destroy_stream(device.identity(), stream) }?;
    Ok(())
}
dev_utils::all_backend_tests!(compute_write_vulkan_read);

/// Vulkan overwrites a value and signals; compute must only ever see the update
fn timeline_handshake<B: ComputeBackend>() -> TestResult {
    let _reset = ResetOnDrop;
    let Some(device) = setup::<B>()? else {
        return Ok(());
    };
    let buffer = Arc::new(VulkanBuffer::new_exportable(
        &device,
        4,
        vk::BufferUsageFlags::STORAGE_BUFFER,
    )?);
    let shared = create_buffer_vk_compute_api_external_memory(buffer.clone())?;
    let semaphore = Arc::new(VulkanSemaphore::new(&device, SemaphoreKind::Timeline, 0, true)?);
    let interop = match import_semaphore_vk_compute_api_interop(semaphore.clone(), 0) {
        Ok(interop) => interop,
        Err(e) if e.is_optional_feature_miss() => {
            warn!("Skipping test: {e}");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    assert_eq!(interop.vk_semaphore(), semaphore.semaphore());
    let stream = create_stream(device.identity())?;
    for value in 1..=1000u64 {
        unsafe { shared.copy_from_host_ptr_async(bytemuck::bytes_of(&42f32), stream) }?;
        wait_for_completion(B::API, stream)?;

        let mut commands = CommandBuffer::begin(&device)?;
        commands.acquire_buffer_from_external(&buffer);
        commands.update_buffer(&buffer, 0, bytemuck::bytes_of(&11f32))?;
        commands.release_buffer_to_external(&buffer);
        interop.vulkan_signal(value)?;
        let pending = Submission::new().signal(&semaphore, value).submit(commands)?;

        let mut out = 0f32;
        unsafe {
            interop.wait_semaphore_compute_api(stream, value, None)?;
            shared.copy_to_host_ptr_async(bytemuck::bytes_of_mut(&mut out), stream)?;
        }
        wait_for_completion(B::API, stream)?;
        pending.wait(None)?;
        assert_eq!(out, 11.0, "iteration {value}");
    }
    assert_eq!(interop.state(), SemaphoreState::Signaled(1000));
    assert_eq!(interop.next_signal_value(), 1001);
    drop(interop);
    drop(shared);
    unsafe { destroy_stream(device.identity(), stream) }?;
    Ok(())
}
dev_utils::all_backend_tests!(timeline_handshake);

/// Level Zero only: a four channel float image through the bindless path
fn bindless_image_round_trip<B: ComputeBackend>() -> TestResult {
    let _reset = ResetOnDrop;
    if B::API != InteropComputeApi::LevelZero {
        return Ok(());
    }
    let Some(device) = setup::<B>()? else {
        return Ok(());
    };
    set_level_zero_use_bindless_images_interop(true);
    const SIZE: u32 = 1024;
    let image = Arc::new(VulkanImage::new_exportable(
        &device,
        ImageImportInfo::new_2d(vk::Format::R32G32B32A32_SFLOAT, SIZE, SIZE),
    )?);
    let texels: Vec<f32> = (0..SIZE * SIZE * 4).map(|i| i as f32).collect();
    let bytes: &[u8] = bytemuck::cast_slice(&texels);
    let mut staging =
        VulkanBuffer::new_staging(&device, bytes.len() as u64, MemoryLocation::CpuToGpu)?;
    staging.write(0, bytes)?;
    let mut commands = CommandBuffer::begin(&device)?;
    commands.copy_buffer_to_image(&staging, &image, 0)?;
    commands.release_image_to_external(&image);
    Submission::new().submit(commands)?.wait(None)?;

    let Some(imported) = image_or_skip(create_unsampled_image_vk_compute_api_external_memory(
        image.clone(),
    ))?
    else {
        return Ok(());
    };
    assert!(matches!(
        imported.get_surface_object()?,
        ImageHandle::LevelZeroBindless(_) | ImageHandle::LevelZeroImage(_)
    ));
    let stream = create_stream(device.identity())?;
    let mut readback = vec![0u8; bytes.len()];
    unsafe { imported.copy_to_host_ptr_async(0, &mut readback, stream) }?;
    wait_for_completion(B::API, stream)?;
    assert!(readback == bytes);
    drop(imported);
    unsafe { destroy_stream(device.identity(), stream) }?;
    Ok(())
}
dev_utils::all_backend_tests!(bindless_image_round_trip);

/// Half floats hold every integer up to 2048 exactly
fn half_bits(value: u16) -> u16 {
    if value == 0 {
        return 0;
    }
    let exponent = 15 - value.leading_zeros() as u16;
    let mantissa = (value << (10 - exponent)) & 0x3ff;
    ((exponent + 15) << 10) | mantissa
}
fn half_value(bits: u16) -> u16 {
    if bits == 0 {
        return 0;
    }
    let exponent = (bits >> 10) - 15;
    ((bits & 0x3ff) | 0x400) >> (10 - exponent)
}

fn half_float_values_are_exact<B: ComputeBackend>() -> TestResult {
    let _reset = ResetOnDrop;
    let Some(device) = setup::<B>()? else {
        return Ok(());
    };
    let info = ImageImportInfo::new_2d(vk::Format::R16G16B16A16_SFLOAT, 32, 16);
    let image = match VulkanImage::new_exportable(&device, info) {
        Ok(image) => Arc::new(image),
        Err(e) if e.is_optional_feature_miss() => {
            warn!("Skipping test: {e}");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let Some(imported) = image_or_skip(create_unsampled_image_vk_compute_api_external_memory(
        image.clone(),
    ))?
    else {
        return Ok(());
    };
    let values: Vec<u16> = (0..2048).map(half_bits).collect();
    let stream = create_stream(device.identity())?;
    unsafe { imported.copy_from_host_ptr_async(0, bytemuck::cast_slice(&values), stream) }?;
    wait_for_completion(B::API, stream)?;

    let bytes = read_image(&device, &image)?;
    let readback: Vec<u16> = bytemuck::cast_slice::<u8, u16>(&bytes)
        .iter()
        .map(|&bits| half_value(bits))
        .collect();
    let expected: Vec<u16> = (0..2048).collect();
    assert_eq!(readback, expected);
    drop(imported);
    unsafe { destroy_stream(device.identity(), stream) }?;
    Ok(())
}
dev_utils::all_backend_tests!(half_float_values_are_exact);

#[test]
fn half_float_encoding() {
    assert_eq!(half_bits(1), 0x3c00);
    assert_eq!(half_bits(2), 0x4000);
    assert_eq!(half_bits(1024), 0x6400);
    assert_eq!(half_bits(2047), 0x67ff);
    assert!((0..2048).all(|v| half_value(half_bits(v)) == v));
}
