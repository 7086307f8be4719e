/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use serde::{Deserialize, Serialize};

/// The compute runtime that Vulkan resources get shared with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteropComputeApi {
    #[default]
    None,
    LevelZero,
    Cuda,
    Hip,
    Sycl,
}
impl InteropComputeApi {
    pub const ALL: [InteropComputeApi; 4] = [Self::Cuda, Self::Hip, Self::LevelZero, Self::Sycl];

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::LevelZero => "Level Zero",
            Self::Cuda => "CUDA",
            Self::Hip => "HIP",
            Self::Sycl => "SYCL",
        }
    }
    /// Name used for environment switches, e.g. `VKINTEROP_SKIP_BACKEND_LEVEL_ZERO`
    pub fn env_name(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::LevelZero => "LEVEL_ZERO",
            Self::Cuda => "CUDA",
            Self::Hip => "HIP",
            Self::Sycl => "SYCL",
        }
    }
}
impl std::fmt::Display for InteropComputeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelCategory {
    /// Not in the format registry
    #[default]
    Unknown,
    Uint,
    Int,
    Unorm,
    Snorm,
    Float,
    Depth,
}
impl ChannelCategory {
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Uint | Self::Int)
    }
    pub fn is_normalized(&self) -> bool {
        matches!(self, Self::Unorm | Self::Snorm)
    }
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Int | Self::Snorm | Self::Float)
    }
}

/// OS handle flavours that Vulkan can export memory and semaphores as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalHandleType {
    /// POSIX file descriptor
    OpaqueFd,
    /// NT handle, closable with `CloseHandle`
    OpaqueWin32,
    /// Global share handle, never closed
    OpaqueWin32Kmt,
}
impl ExternalHandleType {
    /// The handle type used by default on the current platform
    pub const fn native() -> Self {
        if cfg!(windows) {
            Self::OpaqueWin32
        } else {
            Self::OpaqueFd
        }
    }
    pub fn is_win32(&self) -> bool {
        matches!(self, Self::OpaqueWin32 | Self::OpaqueWin32Kmt)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemaphoreKind {
    #[default]
    Binary,
    Timeline,
}

/// Optional capabilities that a compute runtime may lack. Callers treat a miss as
/// "this feature isn't there", not as a hard failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnsupportedComputeApiFeature {
    BindlessImages,
    ExternalSemaphores,
    /// Copies and handles for mip levels above the base level on Level Zero
    MipLevelAccess,
    /// Image import without bindless images, which some Level Zero drivers reject
    NonBindlessImages,
    TimelineSemaphores,
}
impl std::fmt::Display for UnsupportedComputeApiFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BindlessImages => "bindless images",
            Self::ExternalSemaphores => "external semaphores",
            Self::MipLevelAccess => "access to mip levels above the base level",
            Self::NonBindlessImages => "image import without bindless images",
            Self::TimelineSemaphores => "timeline semaphores",
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageExtent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}
impl ImageExtent {
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }
    /// Extent of a mip level, never smaller than 1 in any dimension
    pub fn mip_level(&self, level: u32) -> Self {
        Self {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth: (self.depth >> level).max(1),
        }
    }
    pub fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageDimensionality {
    D1,
    #[default]
    D2,
    D3,
    Cube,
}
