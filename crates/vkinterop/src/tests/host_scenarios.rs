/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use std::sync::Arc;
use std::time::Duration;

use hal::ash::vk;
use parking_lot::{Mutex, MutexGuard};

use super::expect_err;
use super::host_sycl::{
    HostSyclRuntime, MAX_ALLOCATION, TempMemory, TempSemaphore, identity, queue,
};
use crate::*;

/// Holds the test lock with the host runtime registered; resets all state on drop
struct HostQueue {
    runtime: Arc<HostSyclRuntime>,
    _guard: MutexGuard<'static, ()>,
}
impl HostQueue {
    fn register(consumes_handles: bool) -> Self {
        let guard = dev_utils::serial_guard();
        dev_utils::init_test_logging();
        reset_compute_api_state();
        let runtime = HostSyclRuntime::new(consumes_handles);
        set_global_sycl_queue(runtime.clone(), queue());
        Self {
            runtime,
            _guard: guard,
        }
    }
}
impl Drop for HostQueue {
    fn drop(&mut self) {
        reset_compute_api_state();
    }
}

fn device() -> DeviceIdentity {
    identity(vk::DriverId::INTEL_OPEN_SOURCE_MESA)
}

/// Whether `stream` went idle within `timeout`
fn drained(stream: StreamWrapper, timeout: Duration) -> bool {
    wait_for_completion_timeout(InteropComputeApi::Sycl, stream, timeout).unwrap()
}

#[test]
fn registered_queue_wins_until_reset() {
    let _host = HostQueue::register(false);
    let nvidia = identity(vk::DriverId::NVIDIA_PROPRIETARY);
    assert_eq!(decide_interop_compute_api(&nvidia), InteropComputeApi::Sycl);
    assert_eq!(selected_compute_api(), InteropComputeApi::Sycl);

    let err = initialize_compute_api(InteropComputeApi::Cuda).unwrap_err();
    assert!(
        matches!(
            err,
            InteropError::BackendNotAvailable {
                api: InteropComputeApi::Cuda,
                ..
            }
        ),
        "{err}"
    );
    assert!(err.to_string().contains("reset_compute_api_state"));
    // Asking for the active API again is fine
    initialize_compute_api(InteropComputeApi::Sycl).unwrap();

    reset_compute_api_state();
    assert!(!is_sycl_queue_registered());
    assert_eq!(selected_compute_api(), InteropComputeApi::None);
    assert_ne!(decide_interop_compute_api(&nvidia), InteropComputeApi::Sycl);
}

#[test]
fn unknown_driver_without_a_queue_has_no_api() {
    let _host = HostQueue::register(false);
    clear_global_sycl_queue();
    let llvmpipe = identity(vk::DriverId::MESA_LLVMPIPE);
    // Only holds where no compute runtime is installed
    if InteropComputeApi::ALL.iter().any(|&api| initialize_compute_api(api).is_ok()) {
        return;
    }
    assert_eq!(decide_interop_compute_api(&llvmpipe), InteropComputeApi::None);
    let source = Arc::new(TempMemory {
        identity: llvmpipe,
        size: 64,
        image: None,
    });
    assert!(matches!(
        expect_err(create_buffer_vk_compute_api_external_memory(source)),
        InteropError::BackendNotAvailable {
            api: InteropComputeApi::None,
            ..
        }
    ));
}

#[test]
fn buffer_sizes_are_checked_before_export() {
    let host = HostQueue::register(false);
    let before = handle_statistics();
    assert!(matches!(
        expect_err(create_buffer_vk_compute_api_external_memory(TempMemory::buffer(0))),
        InteropError::AllocationTooLarge { requested: 0, .. }
    ));
    assert!(matches!(
        expect_err(create_buffer_vk_compute_api_external_memory(TempMemory::buffer(
            MAX_ALLOCATION + 1
        ))),
        InteropError::AllocationTooLarge {
            limit: MAX_ALLOCATION,
            ..
        }
    ));
    assert_eq!(handle_statistics().exported, before.exported);
    assert_eq!(host.runtime.live_allocations(), 0);
}

#[test]
fn handle_ownership_follows_the_runtime() {
    for consumes in [false, true] {
        let host = HostQueue::register(consumes);
        let before = handle_statistics();
        let buffer = create_buffer_vk_compute_api_external_memory(TempMemory::buffer(256)).unwrap();
        let semaphore =
            import_semaphore_vk_compute_api_interop(TempSemaphore::new(SemaphoreKind::Binary), 0)
                .unwrap();
        assert_eq!(buffer.compute_api(), InteropComputeApi::Sycl);
        assert_eq!(buffer.was_handle_consumed(), consumes);
        assert_eq!(semaphore.was_handle_consumed(), consumes);
        assert_eq!(host.runtime.live_allocations(), 1);
        drop(buffer);
        drop(semaphore);
        assert_eq!(host.runtime.live_allocations(), 0);

        let after = handle_statistics();
        assert_eq!(after.exported - before.exported, 2);
        if consumes {
            assert_eq!(after.transferred - before.transferred, 2);
            assert_eq!(after.closed, before.closed);
        } else {
            assert_eq!(after.transferred, before.transferred);
            assert_eq!(after.closed - before.closed, 2);
        }
        assert_eq!(after.live(), before.live());
    }
}

#[test]
fn buffer_copies_go_through_the_stream() {
    let host = HostQueue::register(false);
    let identity = device();
    let stream = create_stream(&identity).unwrap();
    assert_eq!(stream, StreamWrapper::Sycl(queue()));
    let info = compute_device_info(&identity).unwrap();
    assert_eq!(info.api, InteropComputeApi::Sycl);
    assert_eq!(info.max_allocation_size, MAX_ALLOCATION);

    let buffer = create_buffer_vk_compute_api_external_memory(TempMemory::buffer(16)).unwrap();
    assert_eq!(buffer.size(), 16);
    assert!(!buffer.get_device_ptr::<f32>().is_null());
    let data: Vec<u8> = (0..16).collect();
    let mut out = [0u8; 16];
    unsafe {
        buffer.copy_from_host_ptr_async(&data, stream).unwrap();
        buffer.copy_to_host_ptr_async(&mut out, stream).unwrap();
    }
    wait_for_completion(InteropComputeApi::Sycl, stream).unwrap();
    assert_eq!(&out[..], &data[..]);

    let mut too_big = [0u8; 17];
    assert!(matches!(
        unsafe { buffer.copy_to_host_ptr_async(&mut too_big, stream) },
        Err(InteropError::CopyOutOfBounds {
            requested: 17,
            available: 16
        })
    ));

    let target = create_buffer_vk_compute_api_external_memory(TempMemory::buffer(16)).unwrap();
    let event = create_event(&identity).unwrap();
    assert_eq!(host.runtime.live_events(), 1);
    unsafe { buffer.copy_to_device_ptr_async(target.device_ptr(), stream, Some(&event)) }.unwrap();
    let mut copied = [0u8; 16];
    unsafe { target.copy_to_host_ptr_async(&mut copied, stream) }.unwrap();
    assert!(drained(stream, Duration::from_secs(1)));
    assert_eq!(&copied[..], &data[..]);

    assert!(matches!(
        wait_for_completion(InteropComputeApi::Cuda, stream),
        Err(InteropError::InvalidStream {
            expected: InteropComputeApi::Cuda,
            found: InteropComputeApi::Sycl
        })
    ));
    unsafe {
        destroy_event(&identity, event).unwrap();
        destroy_stream(&identity, stream).unwrap();
    }
    assert_eq!(host.runtime.live_events(), 0);
}

#[test]
fn image_flavors() {
    let _host = HostQueue::register(false);
    let stream = create_stream(&device()).unwrap();
    let info = ImageImportInfo::new_2d(vk::Format::R32_SFLOAT, 4, 4);
    let source = TempMemory::image(info, 64);

    let image = create_image_vk_compute_api_external_memory(source.clone()).unwrap();
    assert!(matches!(image.texture_object(), ImageHandle::Sycl(_)));
    assert_eq!(image.format_info().format_size_in_bytes(), 4);
    assert_eq!(image.import_info(), &info);
    let texels: Vec<f32> = (0..16).map(|i| i as f32 * 0.25).collect();
    let mut out = vec![0f32; 16];
    unsafe {
        image
            .copy_from_host_ptr_async(0, bytemuck::cast_slice(&texels), stream)
            .unwrap();
        image
            .copy_to_host_ptr_async(0, bytemuck::cast_slice_mut(&mut out), stream)
            .unwrap();
    }
    wait_for_completion(InteropComputeApi::Sycl, stream).unwrap();
    assert_eq!(out, texels);

    assert!(matches!(
        image.surface_object(1),
        Err(InteropError::InvalidMipLevel {
            level: 1,
            levels: 1
        })
    ));
    let mut short = [0u8; 8];
    assert!(matches!(
        unsafe { image.copy_to_host_ptr_async(0, &mut short, stream) },
        Err(InteropError::CopyOutOfBounds { .. })
    ));

    let unsampled = create_unsampled_image_vk_compute_api_external_memory(source).unwrap();
    assert_ne!(
        unsampled.get_surface_object().unwrap(),
        image.get_surface_object().unwrap()
    );
    unsampled.get_mipmapped_array_level(0).unwrap();

    let unknown = TempMemory::image(ImageImportInfo::new_2d(vk::Format::UNDEFINED, 4, 4), 64);
    let err = expect_err(create_image_vk_compute_api_external_memory(unknown));
    assert!(err.is_optional_feature_miss(), "{err}");
}

#[test]
fn timeline_values_increase_across_apis() {
    let _host = HostQueue::register(false);
    let stream = create_stream(&device()).unwrap();
    let semaphore =
        import_semaphore_vk_compute_api_interop(TempSemaphore::new(SemaphoreKind::Timeline), 0)
            .unwrap();
    assert_eq!(semaphore.kind(), SemaphoreKind::Timeline);
    assert_eq!(semaphore.next_signal_value(), 1);
    assert_eq!(semaphore.vk_semaphore(), vk::Semaphore::null());

    semaphore.vulkan_signal(1).unwrap();
    let err = unsafe { semaphore.signal_semaphore_compute_api(stream, 1) }.unwrap_err();
    assert!(
        matches!(
            err,
            InteropError::TimelineNotMonotonic {
                last: 1,
                requested: 1
            }
        ),
        "{err}"
    );
    unsafe { semaphore.signal_semaphore_compute_api(stream, 2) }.unwrap();
    assert_eq!(
        semaphore.state(),
        SemaphoreState::PendingSignal { from: 0, to: 2 }
    );
    assert_eq!(semaphore.next_signal_value(), 3);
    assert!(semaphore.vulkan_signal(2).is_err());

    unsafe { semaphore.wait_semaphore_compute_api(stream, 2, None) }.unwrap();
    assert!(drained(stream, Duration::from_secs(1)));
}

#[test]
fn binary_semaphore_has_a_single_consumer() {
    let _host = HostQueue::register(false);
    let identity = device();
    let stream = create_stream(&identity).unwrap();
    let semaphore =
        import_semaphore_vk_compute_api_interop(TempSemaphore::new(SemaphoreKind::Binary), 0)
            .unwrap();
    let done = create_event(&identity).unwrap();

    unsafe {
        semaphore.signal_semaphore_compute_api(stream, 0).unwrap();
        semaphore.wait_semaphore_compute_api(stream, 0, Some(&done)).unwrap();
    }
    assert!(drained(stream, Duration::from_secs(1)));
    assert_eq!(semaphore.state(), SemaphoreState::Unsignaled(0));

    unsafe { semaphore.wait_semaphore_compute_api(stream, 0, None) }.unwrap();
    assert!(!drained(stream, Duration::from_millis(50)));
    unsafe { semaphore.signal_semaphore_compute_api(stream, 0) }.unwrap();
    assert!(drained(stream, Duration::from_secs(1)));
    unsafe { destroy_event(&identity, done) }.unwrap();
}

static DIALOGS: Mutex<Vec<(String, String)>> = Mutex::new(Vec::new());

#[test]
fn import_failures_reach_the_dialog_hook() {
    let _host = HostQueue::register(false);
    DIALOGS.lock().clear();
    set_error_dialog_hook(Some(Arc::new(|title: &str, message: &str| {
        DIALOGS.lock().push((title.to_owned(), message.to_owned()));
    })));
    set_open_message_box_on_compute_api_error(true);

    let _ = create_buffer_vk_compute_api_external_memory(TempMemory::buffer(0));
    set_open_message_box_on_compute_api_error(false);
    let _ = create_buffer_vk_compute_api_external_memory(TempMemory::buffer(0));
    set_error_dialog_hook(None);

    let dialogs = DIALOGS.lock();
    assert_eq!(dialogs.len(), 1);
    assert_eq!(dialogs[0].0, "SYCL interop error");
    assert!(dialogs[0].1.contains("import_buffer"), "{}", dialogs[0].1);
}

#[test]
fn failed_compute_signals_keep_the_timeline() {
    let _host = HostQueue::register(false);
    let stream = create_stream(&device()).unwrap();
    let semaphore =
        import_semaphore_vk_compute_api_interop(TempSemaphore::new(SemaphoreKind::Timeline), 0)
            .unwrap();

    let null = StreamWrapper::Sycl(hal::stream::SyclQueue::null());
    let err = unsafe { semaphore.signal_semaphore_compute_api(null, 5) }.unwrap_err();
    assert!(
        matches!(
            err,
            InteropError::NullStream {
                api: InteropComputeApi::Sycl
            }
        ),
        "{err}"
    );
    assert_eq!(semaphore.next_signal_value(), 1);
    assert_eq!(semaphore.state(), SemaphoreState::Unsignaled(0));

    unsafe { semaphore.signal_semaphore_compute_api(stream, 5) }.unwrap();
    assert_eq!(semaphore.next_signal_value(), 6);
    assert!(drained(stream, Duration::from_secs(1)));
}

#[test]
fn live_buffers_outlast_the_registration() {
    let host = HostQueue::register(false);
    let stream = create_stream(&device()).unwrap();
    let buffer = create_buffer_vk_compute_api_external_memory(TempMemory::buffer(16)).unwrap();
    assert!(clear_global_sycl_queue());

    let data: Vec<u8> = (16..32).collect();
    let mut out = [0u8; 16];
    unsafe {
        buffer.copy_from_host_ptr_async(&data, stream).unwrap();
        buffer.copy_to_host_ptr_async(&mut out, stream).unwrap();
    }
    wait_for_completion(InteropComputeApi::Sycl, stream).unwrap();
    assert_eq!(&out[..], &data[..]);

    reset_compute_api_state();
    unsafe { buffer.copy_to_host_ptr_async(&mut out, stream) }.unwrap();
    assert!(drained(stream, Duration::from_secs(1)));
    assert_eq!(host.runtime.live_allocations(), 1);
    drop(buffer);
    assert_eq!(host.runtime.live_allocations(), 0);
}

#[test]
fn context_failures_name_the_selected_api() {
    let _host = HostQueue::register(false);
    DIALOGS.lock().clear();
    set_error_dialog_hook(Some(Arc::new(|title: &str, message: &str| {
        DIALOGS.lock().push((title.to_owned(), message.to_owned()));
    })));
    set_open_message_box_on_compute_api_error(true);
    assert_eq!(selected_compute_api(), InteropComputeApi::None);

    let mut other = device();
    other.uuid = [9; 16];
    let source = Arc::new(TempMemory {
        identity: other,
        size: 64,
        image: None,
    });
    let err = expect_err(create_buffer_vk_compute_api_external_memory(source));
    set_open_message_box_on_compute_api_error(false);
    set_error_dialog_hook(None);
    assert!(
        matches!(
            err,
            InteropError::NoMatchingDevice {
                api: InteropComputeApi::Sycl
            }
        ),
        "{err}"
    );

    let dialogs = DIALOGS.lock();
    assert_eq!(dialogs.len(), 1);
    assert_eq!(dialogs[0].0, "SYCL interop error");
    assert!(
        dialogs[0].1.contains("create_buffer_vk_compute_api_external_memory"),
        "{}",
        dialogs[0].1
    );
}
