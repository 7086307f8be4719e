/* BEGIN LICENSE
  SupaSim, a GPGPU and simulation toolkit.
  Copyright (C) 2025 Magnus Larsson
  SPDX-License-Identifier: MIT OR Apache-2.0
END LICENSE */
//! The format registry. Every `VkFormat` that can be shared with a compute runtime
//! has exactly one line in [`FORMATS`]; the backends derive their own channel
//! descriptors from the category, channel count and channel size stored there.
//!
//! Three channel formats are left out on purpose, as none of the compute runtimes
//! expose them portably.

use ash::vk;
use types::{ChannelCategory, ImageExtent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatInfo {
    pub format: vk::Format,
    pub name: &'static str,
    pub category: ChannelCategory,
    pub channel_count: u32,
    pub channel_size_in_bytes: u32,
    /// Image format layout qualifier, e.g. `rgba32f`
    pub glsl_format_qualifier: &'static str,
    /// Type returned by `imageLoad`, e.g. `vec4`
    pub glsl_type: &'static str,
    /// Storage type with explicit bit width, e.g. `f16vec4`
    pub glsl_sized_type: &'static str,
}
impl FormatInfo {
    pub const fn format_size_in_bytes(&self) -> u32 {
        self.channel_count * self.channel_size_in_bytes
    }
    pub fn is_known(&self) -> bool {
        self.category != ChannelCategory::Unknown
    }
    pub fn is_depth(&self) -> bool {
        self.category == ChannelCategory::Depth
    }
    pub fn is_half_float(&self) -> bool {
        self.category == ChannelCategory::Float && self.channel_size_in_bytes == 2
    }
}

macro_rules! format_table {
    ($($fmt:ident => $cat:ident, $count:literal, $size:literal, $qual:literal, $ty:literal, $sized:literal;)*) => {
        pub static FORMATS: &[FormatInfo] = &[
            $(FormatInfo {
                format: vk::Format::$fmt,
                name: concat!("VK_FORMAT_", stringify!($fmt)),
                category: ChannelCategory::$cat,
                channel_count: $count,
                channel_size_in_bytes: $size,
                glsl_format_qualifier: $qual,
                glsl_type: $ty,
                glsl_sized_type: $sized,
            },)*
        ];
    };
}

format_table! {
    R8_UINT => Uint, 1, 1, "r8ui", "uint", "uint8_t";
    R8G8_UINT => Uint, 2, 1, "rg8ui", "uvec2", "u8vec2";
    R8G8B8A8_UINT => Uint, 4, 1, "rgba8ui", "uvec4", "u8vec4";
    R16_UINT => Uint, 1, 2, "r16ui", "uint", "uint16_t";
    R16G16_UINT => Uint, 2, 2, "rg16ui", "uvec2", "u16vec2";
    R16G16B16A16_UINT => Uint, 4, 2, "rgba16ui", "uvec4", "u16vec4";
    R32_UINT => Uint, 1, 4, "r32ui", "uint", "uint";
    R32G32_UINT => Uint, 2, 4, "rg32ui", "uvec2", "uvec2";
    R32G32B32A32_UINT => Uint, 4, 4, "rgba32ui", "uvec4", "uvec4";

    R8_SINT => Int, 1, 1, "r8i", "int", "int8_t";
    R8G8_SINT => Int, 2, 1, "rg8i", "ivec2", "i8vec2";
    R8G8B8A8_SINT => Int, 4, 1, "rgba8i", "ivec4", "i8vec4";
    R16_SINT => Int, 1, 2, "r16i", "int", "int16_t";
    R16G16_SINT => Int, 2, 2, "rg16i", "ivec2", "i16vec2";
    R16G16B16A16_SINT => Int, 4, 2, "rgba16i", "ivec4", "i16vec4";
    R32_SINT => Int, 1, 4, "r32i", "int", "int";
    R32G32_SINT => Int, 2, 4, "rg32i", "ivec2", "ivec2";
    R32G32B32A32_SINT => Int, 4, 4, "rgba32i", "ivec4", "ivec4";

    R8_UNORM => Unorm, 1, 1, "r8", "float", "uint8_t";
    R8G8_UNORM => Unorm, 2, 1, "rg8", "vec2", "u8vec2";
    R8G8B8A8_UNORM => Unorm, 4, 1, "rgba8", "vec4", "u8vec4";
    R16_UNORM => Unorm, 1, 2, "r16", "float", "uint16_t";
    R16G16_UNORM => Unorm, 2, 2, "rg16", "vec2", "u16vec2";
    R16G16B16A16_UNORM => Unorm, 4, 2, "rgba16", "vec4", "u16vec4";

    R8_SNORM => Snorm, 1, 1, "r8_snorm", "float", "int8_t";
    R8G8_SNORM => Snorm, 2, 1, "rg8_snorm", "vec2", "i8vec2";
    R8G8B8A8_SNORM => Snorm, 4, 1, "rgba8_snorm", "vec4", "i8vec4";
    R16_SNORM => Snorm, 1, 2, "r16_snorm", "float", "int16_t";
    R16G16_SNORM => Snorm, 2, 2, "rg16_snorm", "vec2", "i16vec2";
    R16G16B16A16_SNORM => Snorm, 4, 2, "rgba16_snorm", "vec4", "i16vec4";

    R16_SFLOAT => Float, 1, 2, "r16f", "float", "float16_t";
    R16G16_SFLOAT => Float, 2, 2, "rg16f", "vec2", "f16vec2";
    R16G16B16A16_SFLOAT => Float, 4, 2, "rgba16f", "vec4", "f16vec4";
    R32_SFLOAT => Float, 1, 4, "r32f", "float", "float";
    R32G32_SFLOAT => Float, 2, 4, "rg32f", "vec2", "vec2";
    R32G32B32A32_SFLOAT => Float, 4, 4, "rgba32f", "vec4", "vec4";

    D16_UNORM => Depth, 1, 2, "r16", "float", "uint16_t";
    D32_SFLOAT => Depth, 1, 4, "r32f", "float", "float";
}

static UNKNOWN_FORMAT: FormatInfo = FormatInfo {
    format: vk::Format::UNDEFINED,
    name: "VK_FORMAT_UNDEFINED",
    category: ChannelCategory::Unknown,
    channel_count: 0,
    channel_size_in_bytes: 0,
    glsl_format_qualifier: "",
    glsl_type: "",
    glsl_sized_type: "",
};

/// Never fails; formats outside the registry come back with [`ChannelCategory::Unknown`]
/// and a size of zero.
pub fn get_image_format_info(format: vk::Format) -> &'static FormatInfo {
    FORMATS
        .iter()
        .find(|info| info.format == format)
        .unwrap_or(&UNKNOWN_FORMAT)
}
pub fn get_image_format_glsl_string(format: vk::Format) -> &'static str {
    get_image_format_info(format).glsl_format_qualifier
}
pub fn get_image_format_glsl_string_typed(format: vk::Format) -> &'static str {
    get_image_format_info(format).glsl_type
}
pub fn get_image_format_glsl_string_sized(format: vk::Format) -> &'static str {
    get_image_format_info(format).glsl_sized_type
}
pub fn convert_vk_format_to_string(format: vk::Format) -> String {
    let info = get_image_format_info(format);
    if info.is_known() {
        info.name.to_owned()
    } else {
        format!("{format:?}")
    }
}

/// Largest tile for which writing `(x + y * width) * channels + c` into every channel
/// round-trips exactly. 8 bit channels are limited to 256 distinct values, 16 bit
/// integer channels to 128x128 tiles and half floats to the 2048 integers they
/// represent exactly.
pub fn small_format_tile_bounds(format: vk::Format) -> ImageExtent {
    let info = get_image_format_info(format);
    match (info.channel_size_in_bytes, info.is_half_float(), info.channel_count) {
        (4, _, _) => ImageExtent::new_2d(1024, 1024),
        (2, true, 1) => ImageExtent::new_2d(64, 32),
        (2, true, 2) => ImageExtent::new_2d(32, 32),
        (2, true, _) => ImageExtent::new_2d(32, 16),
        (2, false, _) => ImageExtent::new_2d(128, 128),
        (1, _, 1) => ImageExtent::new_2d(16, 16),
        (1, _, 2) => ImageExtent::new_2d(16, 8),
        (1, _, _) => ImageExtent::new_2d(8, 8),
        _ => ImageExtent::default(),
    }
}

/// The aspect used when copying or viewing an image of this format
pub fn image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if get_image_format_info(format).is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_sizes_are_consistent() {
        for info in FORMATS {
            assert!(matches!(info.channel_count, 1 | 2 | 4), "{}", info.name);
            assert!(matches!(info.channel_size_in_bytes, 1 | 2 | 4), "{}", info.name);
            assert_eq!(
                info.format_size_in_bytes(),
                info.channel_count * info.channel_size_in_bytes
            );
            assert!(!info.glsl_format_qualifier.is_empty());
            assert_eq!(convert_vk_format_to_string(info.format), info.name);
        }
    }

    #[test]
    fn registry_has_no_duplicates_or_three_channel_formats() {
        for (i, a) in FORMATS.iter().enumerate() {
            for b in &FORMATS[i + 1..] {
                assert_ne!(a.format, b.format);
            }
        }
        for three in [
            vk::Format::R32G32B32_SFLOAT,
            vk::Format::R8G8B8_UNORM,
            vk::Format::R16G16B16_UINT,
        ] {
            assert!(!get_image_format_info(three).is_known());
        }
    }

    #[test]
    fn unknown_format_is_zero_sized() {
        let info = get_image_format_info(vk::Format::BC1_RGB_UNORM_BLOCK);
        assert_eq!(info.category, ChannelCategory::Unknown);
        assert_eq!(info.format_size_in_bytes(), 0);
        assert_eq!(
            convert_vk_format_to_string(vk::Format::BC1_RGB_UNORM_BLOCK),
            "BC1_RGB_UNORM_BLOCK"
        );
    }

    #[test]
    fn glsl_strings() {
        let f = vk::Format::R32G32B32A32_SFLOAT;
        assert_eq!(get_image_format_glsl_string(f), "rgba32f");
        assert_eq!(get_image_format_glsl_string_typed(f), "vec4");
        assert_eq!(get_image_format_glsl_string_sized(f), "vec4");
        assert_eq!(
            get_image_format_glsl_string_sized(vk::Format::R16G16_SFLOAT),
            "f16vec2"
        );
        assert_eq!(get_image_format_glsl_string_typed(vk::Format::R8_UINT), "uint");
    }

    #[test]
    fn tile_bounds_keep_values_exact() {
        assert_eq!(
            small_format_tile_bounds(vk::Format::R16_SFLOAT),
            ImageExtent::new_2d(64, 32)
        );
        assert_eq!(
            small_format_tile_bounds(vk::Format::R16G16B16A16_SFLOAT),
            ImageExtent::new_2d(32, 16)
        );
        assert_eq!(
            small_format_tile_bounds(vk::Format::R16G16_UNORM),
            ImageExtent::new_2d(128, 128)
        );
        for info in FORMATS {
            let tile = small_format_tile_bounds(info.format);
            let values = tile.texel_count() * info.channel_count as u64;
            match (info.channel_size_in_bytes, info.is_half_float()) {
                (1, _) => assert!(values <= 256, "{}", info.name),
                (2, true) => assert!(values <= 2048, "{}", info.name),
                (2, false) => assert!(values <= 65536, "{}", info.name),
                _ => assert!(values <= 1 << 24, "{}", info.name),
            }
        }
    }
}
