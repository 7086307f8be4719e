/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use ash::vk;
use types::InteropComputeApi;

use crate::{InteropError, InteropResult};

/// Identifies a physical Vulkan device to the compute runtimes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub uuid: [u8; 16],
    /// Only valid on Windows
    pub luid: Option<[u8; 8]>,
    pub node_mask: u32,
    pub driver_id: vk::DriverId,
    pub name: String,
    pub discrete: bool,
}
impl DeviceIdentity {
    /// Whether a compute device with these ids is the same physical GPU.
    pub fn matches(&self, uuid: &[u8; 16], luid: Option<&[u8; 8]>) -> bool {
        if &self.uuid == uuid {
            return true;
        }
        // Some Windows drivers report differing UUIDs but matching LUIDs
        cfg!(windows)
            && match (self.luid.as_ref(), luid) {
                (Some(a), Some(b)) => a == b && a != &[0; 8],
                _ => false,
            }
    }
}

/// Properties of the compute device an import context was created on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputeDeviceInfo {
    pub api: InteropComputeApi,
    pub name: String,
    pub uuid: [u8; 16],
    pub total_memory: u64,
    /// Largest single import the runtime accepts
    pub max_allocation_size: u64,
}

/// Returns the first candidate whose ids match the Vulkan device.
pub fn find_matching_device<D>(
    identity: &DeviceIdentity,
    api: InteropComputeApi,
    candidates: impl IntoIterator<Item = (D, [u8; 16], Option<[u8; 8]>)>,
) -> InteropResult<D> {
    candidates
        .into_iter()
        .find(|(_, uuid, luid)| identity.matches(uuid, luid.as_ref()))
        .map(|(device, _, _)| device)
        .ok_or(InteropError::NoMatchingDevice { api })
}

/// Compute runtimes worth trying for a Vulkan driver, in order of preference.
pub fn candidate_apis(driver_id: vk::DriverId) -> &'static [InteropComputeApi] {
    use InteropComputeApi as A;
    match driver_id {
        vk::DriverId::NVIDIA_PROPRIETARY => &[A::Cuda],
        vk::DriverId::AMD_PROPRIETARY | vk::DriverId::AMD_OPEN_SOURCE | vk::DriverId::MESA_RADV => {
            &[A::Hip]
        }
        vk::DriverId::INTEL_PROPRIETARY_WINDOWS | vk::DriverId::INTEL_OPEN_SOURCE_MESA => {
            &[A::LevelZero]
        }
        _ => &[A::Cuda, A::Hip, A::LevelZero],
    }
}

/// Orders physical devices so that discrete GPUs come first, keeping the driver's
/// order otherwise.
pub fn prefer_discrete(kinds: &[vk::PhysicalDeviceType]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..kinds.len()).collect();
    order.sort_by_key(|&i| match kinds[i] {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        _ => 3,
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(uuid: u8) -> DeviceIdentity {
        DeviceIdentity {
            uuid: [uuid; 16],
            luid: None,
            node_mask: 0,
            driver_id: vk::DriverId::NVIDIA_PROPRIETARY,
            name: "test".into(),
            discrete: true,
        }
    }

    #[test]
    fn matches_by_uuid() {
        let id = identity(7);
        let found = find_matching_device(
            &id,
            InteropComputeApi::Cuda,
            [(0, [1; 16], None), (1, [7; 16], None), (2, [7; 16], None)],
        )
        .unwrap();
        assert_eq!(found, 1);
        let missing = find_matching_device(&id, InteropComputeApi::Hip, [(0, [1; 16], None)]);
        assert!(matches!(
            missing,
            Err(InteropError::NoMatchingDevice {
                api: InteropComputeApi::Hip
            })
        ));
    }

    #[test]
    fn luid_matching_is_windows_only() {
        let mut id = identity(1);
        id.luid = Some([3; 8]);
        assert_eq!(id.matches(&[2; 16], Some(&[3; 8])), cfg!(windows));
        assert!(!id.matches(&[2; 16], None));
    }

    #[test]
    fn driver_ids_pick_runtimes() {
        assert_eq!(
            candidate_apis(vk::DriverId::NVIDIA_PROPRIETARY),
            &[InteropComputeApi::Cuda]
        );
        assert_eq!(
            candidate_apis(vk::DriverId::MESA_RADV),
            &[InteropComputeApi::Hip]
        );
        assert_eq!(
            candidate_apis(vk::DriverId::INTEL_OPEN_SOURCE_MESA),
            &[InteropComputeApi::LevelZero]
        );
        assert_eq!(candidate_apis(vk::DriverId::MESA_LLVMPIPE).len(), 3);
    }

    #[test]
    fn discrete_devices_first() {
        use vk::PhysicalDeviceType as T;
        let order = prefer_discrete(&[T::CPU, T::INTEGRATED_GPU, T::DISCRETE_GPU, T::DISCRETE_GPU]);
        assert_eq!(order, vec![2, 3, 1, 0]);
    }
}
