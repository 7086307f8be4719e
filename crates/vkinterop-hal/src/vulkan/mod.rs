/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! The Vulkan half of the interop: a device created with the external memory and
//! semaphore extensions, plus exportable resources and the command helpers needed
//! to hand them over to a compute runtime.

mod command;
mod resources;

pub use command::{CommandBuffer, PendingSubmission, Submission};
pub use resources::{VulkanBuffer, VulkanFence, VulkanImage, VulkanSemaphore};

use std::borrow::Cow;
use std::ffi::{self, CStr};
use std::mem::ManuallyDrop;

#[cfg(unix)]
use std::os::fd::{FromRawFd, OwnedFd};

use ash::{Entry, khr, vk};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::{AllocationSizes, AllocatorDebugSettings};
use log::Level;
use parking_lot::{Mutex, MutexGuard};
use types::ExternalHandleType;

use crate::device::prefer_discrete;
use crate::handle::{vk_memory_handle_type, vk_semaphore_handle_type};
use crate::{DeviceIdentity, ExportedHandle, InteropError, InteropResult};

#[cfg(unix)]
type ExternalMemoryLoader = khr::external_memory_fd::Device;
#[cfg(windows)]
type ExternalMemoryLoader = khr::external_memory_win32::Device;
#[cfg(unix)]
type ExternalSemaphoreLoader = khr::external_semaphore_fd::Device;
#[cfg(windows)]
type ExternalSemaphoreLoader = khr::external_semaphore_win32::Device;

/// Device extensions a Vulkan device needs for interop on this platform.
pub fn interop_device_extensions() -> Vec<&'static CStr> {
    let mut extensions = vec![
        khr::external_memory::NAME,
        khr::external_semaphore::NAME,
        khr::timeline_semaphore::NAME,
        khr::dedicated_allocation::NAME,
    ];
    #[cfg(windows)]
    extensions.extend([
        khr::external_memory_win32::NAME,
        khr::external_semaphore_win32::NAME,
    ]);
    #[cfg(not(windows))]
    extensions.extend([khr::external_memory_fd::NAME, khr::external_semaphore_fd::NAME]);
    extensions
}
/// [`interop_device_extensions`] as strings, for applications that create their
/// own device.
pub fn get_cuda_interop_device_extensions() -> Vec<&'static str> {
    interop_device_extensions()
        .into_iter()
        .filter_map(|name| name.to_str().ok())
        .collect()
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = unsafe { *p_callback_data };
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        Cow::from("")
    } else {
        unsafe { ffi::CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy() }
    };

    let message = if callback_data.p_message.is_null() {
        Cow::from("")
    } else {
        unsafe { ffi::CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };
    let level = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => Level::Info,
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => Level::Trace,
        _ => Level::Error,
    };

    log::log!(
        level,
        "{message_severity:?}: {message_type:?} [{message_id_name} ({message_id_number})] : {message}\n",
    );

    vk::FALSE
}

/// Reads the ids a compute runtime uses to find the same GPU.
pub fn query_device_identity(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> DeviceIdentity {
    let mut id = vk::PhysicalDeviceIDProperties::default();
    let mut driver = vk::PhysicalDeviceDriverProperties::default();
    let mut properties = vk::PhysicalDeviceProperties2::default()
        .push_next(&mut id)
        .push_next(&mut driver);
    unsafe { instance.get_physical_device_properties2(physical_device, &mut properties) };
    let properties = properties.properties;
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    DeviceIdentity {
        uuid: id.device_uuid,
        luid: (id.device_luid_valid == vk::TRUE).then_some(id.device_luid),
        node_mask: id.device_node_mask,
        driver_id: driver.driver_id,
        name,
        discrete: properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU,
    }
}

fn supports_extensions(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    required: &[&CStr],
) -> InteropResult<bool> {
    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }?;
    Ok(required.iter().all(|name| {
        available
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(*name))
    }))
}

fn compute_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Option<u32> {
    unsafe { instance.get_physical_device_queue_family_properties(physical_device) }
        .iter()
        .position(|q| {
            q.queue_flags
                .contains(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)
        })
        .map(|i| i as u32)
}

/// A Vulkan device with everything needed to export memory and semaphores.
pub struct VulkanDevice {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: Mutex<vk::Queue>,
    queue_family_index: u32,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    sync2: khr::synchronization2::Device,
    external_memory: ExternalMemoryLoader,
    external_semaphore: ExternalSemaphoreLoader,
    identity: DeviceIdentity,
    /// Whether the instance and device were created here
    owned: bool,
}
impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("identity", &self.identity)
            .field("queue_family_index", &self.queue_family_index)
            .finish()
    }
}

impl VulkanDevice {
    /// Creates a device on the first suitable GPU, preferring discrete ones.
    pub fn new(debug: bool) -> InteropResult<std::sync::Arc<Self>> {
        Self::with_filter(debug, |_| true)
    }
    /// Creates a device on the first GPU `filter` accepts. Candidates are offered
    /// discrete GPUs first.
    #[tracing::instrument(skip_all)]
    pub fn with_filter(
        debug: bool,
        filter: impl Fn(&DeviceIdentity) -> bool,
    ) -> InteropResult<std::sync::Arc<Self>> {
        unsafe {
            let entry = Entry::load()?;
            let app_info =
                vk::ApplicationInfo::default().api_version(vk::make_api_version(0, 1, 2, 0));
            let validation_available = debug
                && entry
                    .enumerate_instance_layer_properties()?
                    .iter()
                    .any(|layer| {
                        layer.layer_name_as_c_str() == Ok(c"VK_LAYER_KHRONOS_validation")
                    });
            if debug && !validation_available {
                log::warn!("Validation layers requested but not installed");
            }
            let validation_layers = if validation_available {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                Vec::new()
            };
            let extension_names = if validation_available {
                vec![ash::ext::debug_utils::NAME.as_ptr()]
            } else {
                Vec::new()
            };
            let instance = entry.create_instance(
                &vk::InstanceCreateInfo::default()
                    .application_info(&app_info)
                    .enabled_layer_names(&validation_layers)
                    .enabled_extension_names(&extension_names),
                None,
            )?;
            let result = Self::create_device(&entry, &instance, validation_available, &filter);
            let (physical_device, queue_family_index, device, debug_utils) = match result {
                Ok(parts) => parts,
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e);
                }
            };
            let queue = device.get_device_queue(queue_family_index, 0);
            Self::build(
                debug,
                entry,
                instance,
                device,
                physical_device,
                queue,
                queue_family_index,
                debug_utils,
                true,
            )
        }
    }

    #[allow(clippy::type_complexity)]
    unsafe fn create_device(
        entry: &Entry,
        instance: &ash::Instance,
        debug: bool,
        filter: &impl Fn(&DeviceIdentity) -> bool,
    ) -> InteropResult<(
        vk::PhysicalDevice,
        u32,
        ash::Device,
        Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    )> {
        unsafe {
            let debug_utils = if debug {
                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(vulkan_debug_callback));
                let loader = ash::ext::debug_utils::Instance::new(entry, instance);
                let messenger = loader.create_debug_utils_messenger(&debug_info, None)?;
                Some((loader, messenger))
            } else {
                None
            };
            let destroy_messenger = |debug_utils: &Option<(
                ash::ext::debug_utils::Instance,
                vk::DebugUtilsMessengerEXT,
            )>| {
                if let Some((loader, messenger)) = debug_utils {
                    loader.destroy_debug_utils_messenger(*messenger, None);
                }
            };

            let required = interop_device_extensions();
            let physical_devices = match instance.enumerate_physical_devices() {
                Ok(devices) => devices,
                Err(e) => {
                    destroy_messenger(&debug_utils);
                    return Err(e.into());
                }
            };
            let kinds: Vec<_> = physical_devices
                .iter()
                .map(|&phyd| instance.get_physical_device_properties(phyd).device_type)
                .collect();
            let mut chosen = None;
            for index in prefer_discrete(&kinds) {
                let phyd = physical_devices[index];
                let identity = query_device_identity(instance, phyd);
                let Some(family) = compute_queue_family(instance, phyd) else {
                    log::debug!("Skipping {}: no compute queue", identity.name);
                    continue;
                };
                if !supports_extensions(instance, phyd, &required).unwrap_or(false) {
                    log::debug!("Skipping {}: missing interop extensions", identity.name);
                    continue;
                }
                if !filter(&identity) {
                    continue;
                }
                chosen = Some((phyd, family, identity));
                break;
            }
            let Some((phyd, queue_family_idx, identity)) = chosen else {
                destroy_messenger(&debug_utils);
                return Err(InteropError::NoSupportedVulkanDevice(format!(
                    "none of {} physical devices support compute interop",
                    physical_devices.len()
                )));
            };
            log::info!(
                "Using Vulkan device {} (driver {:?})",
                identity.name,
                identity.driver_id
            );

            let mut timeline_semaphore =
                vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true);
            let mut sync2 =
                vk::PhysicalDeviceSynchronization2FeaturesKHR::default().synchronization2(true);
            let queue_priority = 1.0;
            let queue_create_info = vk::DeviceQueueCreateInfo::default()
                .queue_priorities(std::slice::from_ref(&queue_priority))
                .queue_family_index(queue_family_idx);
            let mut ext: Vec<_> = required.iter().map(|name| name.as_ptr()).collect();
            ext.push(khr::synchronization2::NAME.as_ptr());
            let dev_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(std::slice::from_ref(&queue_create_info))
                .enabled_extension_names(&ext)
                .push_next(&mut timeline_semaphore)
                .push_next(&mut sync2);
            match instance.create_device(phyd, &dev_create_info, None) {
                Ok(device) => Ok((phyd, queue_family_idx, device, debug_utils)),
                Err(e) => {
                    destroy_messenger(&debug_utils);
                    Err(e.into())
                }
            }
        }
    }

    /// Wraps a device created by the application. It must have been created with
    /// [`interop_device_extensions`], the `synchronization2` extension and the
    /// timeline semaphore and synchronization2 features enabled.
    ///
    /// # Safety
    /// * All handles must be valid and outlive the returned object
    /// * The queue must not be used elsewhere while this object submits to it
    pub unsafe fn from_existing(
        entry: Entry,
        instance: ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        queue: vk::Queue,
        queue_family_index: u32,
    ) -> InteropResult<std::sync::Arc<Self>> {
        unsafe {
            Self::build(
                false,
                entry,
                instance,
                device,
                physical_device,
                queue,
                queue_family_index,
                None,
                false,
            )
        }
    }

    #[allow(clippy::too_many_arguments)]
    unsafe fn build(
        debug: bool,
        entry: Entry,
        instance: ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        queue: vk::Queue,
        queue_family_index: u32,
        debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
        owned: bool,
    ) -> InteropResult<std::sync::Arc<Self>> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: if debug {
                AllocatorDebugSettings {
                    log_leaks_on_shutdown: true,
                    log_stack_traces: true,
                    log_memory_information: true,
                    ..Default::default()
                }
            } else {
                AllocatorDebugSettings::default()
            },
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                if owned {
                    unsafe {
                        device.destroy_device(None);
                        if let Some((loader, messenger)) = debug_utils {
                            loader.destroy_debug_utils_messenger(messenger, None);
                        }
                        instance.destroy_instance(None);
                    }
                }
                return Err(e.into());
            }
        };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let identity = query_device_identity(&instance, physical_device);
        Ok(std::sync::Arc::new(Self {
            sync2: khr::synchronization2::Device::new(&instance, &device),
            external_memory: ExternalMemoryLoader::new(&instance, &device),
            external_semaphore: ExternalSemaphoreLoader::new(&instance, &device),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            queue: Mutex::new(queue),
            entry,
            instance,
            debug_utils,
            physical_device,
            device,
            queue_family_index,
            memory_properties,
            identity,
            owned,
        }))
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }
    pub fn entry(&self) -> &Entry {
        &self.entry
    }
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }
    pub fn device(&self) -> &ash::Device {
        &self.device
    }
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
    pub(crate) fn sync2(&self) -> &khr::synchronization2::Device {
        &self.sync2
    }
    pub(crate) fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }
    pub fn wait_idle(&self) -> InteropResult<()> {
        let _queue = self.queue.lock();
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
    pub(crate) unsafe fn queue_submit(
        &self,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> InteropResult<()> {
        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, submits, fence) }?;
        Ok(())
    }

    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> InteropResult<u32> {
        let props = &self.memory_properties;
        (0..props.memory_type_count)
            .find(|&i| {
                type_bits & (1 << i) != 0
                    && props.memory_types[i as usize]
                        .property_flags
                        .contains(flags)
            })
            .ok_or(InteropError::Vulkan(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ))
    }

    /// Whether buffers with `usage` can be exported as `handle_type`.
    pub fn supports_buffer_export(
        &self,
        usage: vk::BufferUsageFlags,
        handle_type: ExternalHandleType,
    ) -> bool {
        let info = vk::PhysicalDeviceExternalBufferInfo::default()
            .usage(usage)
            .handle_type(vk_memory_handle_type(handle_type));
        let mut props = vk::ExternalBufferProperties::default();
        unsafe {
            self.instance.get_physical_device_external_buffer_properties(
                self.physical_device,
                &info,
                &mut props,
            )
        };
        props
            .external_memory_properties
            .external_memory_features
            .contains(vk::ExternalMemoryFeatureFlags::EXPORTABLE)
    }

    pub fn supports_semaphore_export(
        &self,
        semaphore_type: vk::SemaphoreType,
        handle_type: ExternalHandleType,
    ) -> bool {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default().semaphore_type(semaphore_type);
        let info = vk::PhysicalDeviceExternalSemaphoreInfo::default()
            .handle_type(vk_semaphore_handle_type(handle_type))
            .push_next(&mut type_info);
        let mut props = vk::ExternalSemaphoreProperties::default();
        unsafe {
            self.instance.get_physical_device_external_semaphore_properties(
                self.physical_device,
                &info,
                &mut props,
            )
        };
        props
            .external_semaphore_features
            .contains(vk::ExternalSemaphoreFeatureFlags::EXPORTABLE)
    }

    #[cfg(unix)]
    pub(crate) fn export_memory(
        &self,
        memory: vk::DeviceMemory,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        if handle_type != ExternalHandleType::OpaqueFd {
            return Err(InteropError::ExportUnsupported);
        }
        let info = vk::MemoryGetFdInfoKHR::default()
            .memory(memory)
            .handle_type(vk_memory_handle_type(handle_type));
        let fd = unsafe { self.external_memory.get_memory_fd(&info) }?;
        Ok(ExportedHandle::from_fd(unsafe { OwnedFd::from_raw_fd(fd) }))
    }
    #[cfg(windows)]
    pub(crate) fn export_memory(
        &self,
        memory: vk::DeviceMemory,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        if !handle_type.is_win32() {
            return Err(InteropError::ExportUnsupported);
        }
        let info = vk::MemoryGetWin32HandleInfoKHR::default()
            .memory(memory)
            .handle_type(vk_memory_handle_type(handle_type));
        let handle = unsafe { self.external_memory.get_memory_win32_handle(&info) }?;
        Ok(unsafe { ExportedHandle::from_win32(handle, handle_type) })
    }

    #[cfg(unix)]
    pub(crate) fn export_semaphore(
        &self,
        semaphore: vk::Semaphore,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        if handle_type != ExternalHandleType::OpaqueFd {
            return Err(InteropError::ExportUnsupported);
        }
        let info = vk::SemaphoreGetFdInfoKHR::default()
            .semaphore(semaphore)
            .handle_type(vk_semaphore_handle_type(handle_type));
        let fd = unsafe { self.external_semaphore.get_semaphore_fd(&info) }?;
        Ok(ExportedHandle::from_fd(unsafe { OwnedFd::from_raw_fd(fd) }))
    }
    #[cfg(windows)]
    pub(crate) fn export_semaphore(
        &self,
        semaphore: vk::Semaphore,
        handle_type: ExternalHandleType,
    ) -> InteropResult<ExportedHandle> {
        if !handle_type.is_win32() {
            return Err(InteropError::ExportUnsupported);
        }
        let info = vk::SemaphoreGetWin32HandleInfoKHR::default()
            .semaphore(semaphore)
            .handle_type(vk_semaphore_handle_type(handle_type));
        let handle = unsafe { self.external_semaphore.get_semaphore_win32_handle(&info) }?;
        Ok(unsafe { ExportedHandle::from_win32(handle, handle_type) })
    }
}
impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("Failed to wait for device idle during teardown: {e}");
            }
            self.allocator.lock().report_memory_leaks(log::Level::Error);
            ManuallyDrop::drop(&mut self.allocator);
            if self.owned {
                self.device.destroy_device(None);
                if let Some((loader, messenger)) = self.debug_utils.take() {
                    loader.destroy_debug_utils_messenger(messenger, None);
                }
                self.instance.destroy_instance(None);
            }
        }
    }
}
