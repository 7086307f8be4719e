/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use ash::vk;
use thiserror::Error;
use types::{InteropComputeApi, UnsupportedComputeApiFeature};

#[must_use]
#[derive(Error, Debug)]
pub enum InteropError {
    #[error("{api} is not available: {reason}")]
    BackendNotAvailable {
        api: InteropComputeApi,
        reason: String,
    },
    #[error("No {api} device has the same UUID as the Vulkan device")]
    NoMatchingDevice { api: InteropComputeApi },
    #[error("The Vulkan allocation was not created with an exportable handle of the requested type")]
    ExportUnsupported,
    #[error("Format {format} is not supported by {api}")]
    FormatUnsupported {
        format: String,
        api: InteropComputeApi,
    },
    #[error("Cannot import {requested} bytes, the limit is {limit} bytes")]
    AllocationTooLarge { requested: u64, limit: u64 },
    #[error("{api} failed to import external memory (error code {code})")]
    MemoryImportFailed { api: InteropComputeApi, code: i64 },
    #[error("{api} failed to import an external semaphore (error code {code})")]
    SemaphoreImportFailed { api: InteropComputeApi, code: i64 },
    #[error("Unsupported compute API feature: {0}")]
    UnsupportedFeature(UnsupportedComputeApiFeature),
    #[error("OS handle error: {0}")]
    Os(#[from] std::io::Error),
    #[error("{api} call {call} failed with code {code}: {message}")]
    Backend {
        api: InteropComputeApi,
        call: &'static str,
        code: i64,
        message: String,
    },
    #[error("{0}")]
    Vulkan(#[from] vk::Result),
    #[error("{0}")]
    VulkanLoad(#[from] ash::LoadingError),
    #[error("{0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
    #[error("Timeline signal value {requested} must be greater than the last signalled value {last}")]
    TimelineNotMonotonic { last: u64, requested: u64 },
    #[error("Stream belongs to {found}, expected a {expected} stream")]
    InvalidStream {
        expected: InteropComputeApi,
        found: InteropComputeApi,
    },
    #[error("The {api} stream handle is null")]
    NullStream { api: InteropComputeApi },
    #[error("Copy of {requested} bytes doesn't fit in {available} bytes")]
    CopyOutOfBounds { requested: u64, available: u64 },
    #[error("Mip level {level} is out of range for an image with {levels} levels")]
    InvalidMipLevel { level: u32, levels: u32 },
    #[error("Cube images need a multiple of 6 array layers, got {layers}")]
    InvalidCubeLayers { layers: u32 },
    #[error("No suitable Vulkan device: {0}")]
    NoSupportedVulkanDevice(String),
}
impl InteropError {
    pub fn is_out_of_device_memory(&self) -> bool {
        match self {
            Self::Vulkan(e) => *e == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            Self::Allocation(e) => matches!(e, gpu_allocator::AllocationError::OutOfMemory),
            _ => false,
        }
    }
    pub fn is_out_of_host_memory(&self) -> bool {
        match self {
            Self::Vulkan(e) => *e == vk::Result::ERROR_OUT_OF_HOST_MEMORY,
            _ => false,
        }
    }
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Vulkan(e) => *e == vk::Result::TIMEOUT,
            _ => false,
        }
    }
    /// Errors that tests and callers treat as "warning, skip" for optional formats and features.
    pub fn is_optional_feature_miss(&self) -> bool {
        matches!(
            self,
            Self::FormatUnsupported { .. } | Self::UnsupportedFeature(_)
        )
    }
    pub fn backend_not_available(api: InteropComputeApi, reason: impl Into<String>) -> Self {
        Self::BackendNotAvailable {
            api,
            reason: reason.into(),
        }
    }
    pub fn format_unsupported(format: vk::Format, api: InteropComputeApi) -> Self {
        Self::FormatUnsupported {
            format: crate::format::convert_vk_format_to_string(format),
            api,
        }
    }
}

pub type InteropResult<T> = Result<T, InteropError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_feature_misses() {
        let e = InteropError::UnsupportedFeature(UnsupportedComputeApiFeature::BindlessImages);
        assert!(e.is_optional_feature_miss());
        let e = InteropError::format_unsupported(
            vk::Format::R16G16B16A16_SFLOAT,
            InteropComputeApi::LevelZero,
        );
        assert!(e.is_optional_feature_miss());
        assert_eq!(
            e.to_string(),
            "Format VK_FORMAT_R16G16B16A16_SFLOAT is not supported by Level Zero"
        );
        let e = InteropError::NoMatchingDevice {
            api: InteropComputeApi::Cuda,
        };
        assert!(!e.is_optional_feature_miss());
        assert!(InteropError::Vulkan(vk::Result::TIMEOUT).is_timeout());
    }
}
