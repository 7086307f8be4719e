/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
use types::{ImageDimensionality, ImageExtent};

use crate::handle::ImageImportInfo;
use crate::stream::opaque_handle;
use crate::{FormatInfo, InteropError, InteropResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImageFlavor {
    /// Surface plus texture object
    #[default]
    Sampled,
    /// Surface object only
    Unsampled,
}

opaque_handle! {
    /// `CUarray`
    CuArray;
    /// `hipArray_t`
    HipArray;
    /// `ze_image_handle_t`
    ZeImage;
}

/// Kernel visible handles of an imported image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageHandle {
    CudaSurface(u64),
    CudaTexture(u64),
    CudaArray(CuArray),
    HipSurface(u64),
    HipTexture(u64),
    HipArray(HipArray),
    LevelZeroImage(ZeImage),
    /// Device offset of a bindless image
    LevelZeroBindless(u64),
    /// `sycl::ext::oneapi::experimental::unsampled_image_handle` or its sampled sibling
    Sycl(u64),
}

/// Memory footprint of one mip level when tightly packed on the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelLayout {
    pub level: u32,
    pub extent: ImageExtent,
    pub layers: u32,
    pub row_pitch: u64,
    pub slice_pitch: u64,
    pub size: u64,
}

pub fn level_layout(
    info: &ImageImportInfo,
    format: &FormatInfo,
    level: u32,
) -> InteropResult<LevelLayout> {
    if level >= info.mip_levels {
        return Err(InteropError::InvalidMipLevel {
            level,
            levels: info.mip_levels,
        });
    }
    let mut extent = info.extent.mip_level(level);
    if info.dimensionality == ImageDimensionality::D1 {
        extent.height = 1;
    }
    if info.dimensionality != ImageDimensionality::D3 {
        extent.depth = 1;
    }
    let layers = info.array_layers.max(1);
    let row_pitch = extent.width as u64 * format.format_size_in_bytes() as u64;
    let slice_pitch = row_pitch * extent.height as u64;
    Ok(LevelLayout {
        level,
        extent,
        layers,
        row_pitch,
        slice_pitch,
        size: slice_pitch * extent.depth as u64 * layers as u64,
    })
}

/// Host side of a copy must hold the whole level.
pub fn check_host_span(layout: &LevelLayout, len: usize) -> InteropResult<()> {
    if (len as u64) < layout.size {
        return Err(InteropError::CopyOutOfBounds {
            requested: layout.size,
            available: len as u64,
        });
    }
    Ok(())
}
