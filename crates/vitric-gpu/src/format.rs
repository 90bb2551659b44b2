//! Pixel format model.
//!
//! Formats are a component count (1-4) crossed with a scalar kind. The same
//! model describes image texels and vertex attributes, so vertex-input
//! inference can derive offsets and strides from it.

use crate::error::{GpuError, Result};
use ash::vk;

/// Scalar kind of a pixel component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// 8-bit signed normalized.
    Snorm8,
    /// 8-bit unsigned normalized.
    Unorm8,
    /// 16-bit signed integer.
    Sint16,
    /// 16-bit unsigned integer.
    Uint16,
    /// 32-bit signed integer.
    Sint32,
    /// 32-bit unsigned integer.
    Uint32,
    /// 32-bit float.
    Sfloat32,
}

impl ScalarKind {
    /// Size of one component in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::Snorm8 | Self::Unorm8 => 1,
            Self::Sint16 | Self::Uint16 => 2,
            Self::Sint32 | Self::Uint32 | Self::Sfloat32 => 4,
        }
    }
}

/// A pixel or vertex-attribute format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    /// Number of components, 1 through 4.
    pub ncomp: u8,
    /// Scalar kind shared by all components.
    pub kind: ScalarKind,
}

impl PixelFormat {
    pub const R8G8B8A8_UNORM: Self = Self::new(4, ScalarKind::Unorm8);
    pub const R32_SFLOAT: Self = Self::new(1, ScalarKind::Sfloat32);
    pub const R32G32_SFLOAT: Self = Self::new(2, ScalarKind::Sfloat32);
    pub const R32G32B32_SFLOAT: Self = Self::new(3, ScalarKind::Sfloat32);
    pub const R32G32B32A32_SFLOAT: Self = Self::new(4, ScalarKind::Sfloat32);
    pub const R32_UINT: Self = Self::new(1, ScalarKind::Uint32);

    pub const fn new(ncomp: u8, kind: ScalarKind) -> Self {
        Self { ncomp, kind }
    }

    /// Total texel size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.ncomp as usize * self.kind.size_bytes()
    }

    /// Map to the Vulkan format, or `Unsupported` for combinations the HAL
    /// does not express.
    pub fn to_vk(&self) -> Result<vk::Format> {
        use ScalarKind::*;
        let fmt = match (self.kind, self.ncomp) {
            (Sfloat32, 1) => vk::Format::R32_SFLOAT,
            (Sfloat32, 2) => vk::Format::R32G32_SFLOAT,
            (Sfloat32, 3) => vk::Format::R32G32B32_SFLOAT,
            (Sfloat32, 4) => vk::Format::R32G32B32A32_SFLOAT,
            (Snorm8, 1) => vk::Format::R8_SNORM,
            (Snorm8, 2) => vk::Format::R8G8_SNORM,
            (Snorm8, 3) => vk::Format::R8G8B8_SNORM,
            (Snorm8, 4) => vk::Format::R8G8B8A8_SNORM,
            (Unorm8, 1) => vk::Format::R8_UNORM,
            (Unorm8, 2) => vk::Format::R8G8_UNORM,
            (Unorm8, 3) => vk::Format::R8G8B8_UNORM,
            (Unorm8, 4) => vk::Format::R8G8B8A8_UNORM,
            (Sint16, 1) => vk::Format::R16_SINT,
            (Sint16, 2) => vk::Format::R16G16_SINT,
            (Sint16, 3) => vk::Format::R16G16B16_SINT,
            (Sint16, 4) => vk::Format::R16G16B16A16_SINT,
            (Uint16, 1) => vk::Format::R16_UINT,
            (Uint16, 2) => vk::Format::R16G16_UINT,
            (Uint16, 3) => vk::Format::R16G16B16_UINT,
            (Uint16, 4) => vk::Format::R16G16B16A16_UINT,
            (Sint32, 1) => vk::Format::R32_SINT,
            (Sint32, 2) => vk::Format::R32G32_SINT,
            (Sint32, 3) => vk::Format::R32G32B32_SINT,
            (Sint32, 4) => vk::Format::R32G32B32A32_SINT,
            (Uint32, 1) => vk::Format::R32_UINT,
            (Uint32, 2) => vk::Format::R32G32_UINT,
            (Uint32, 3) => vk::Format::R32G32B32_UINT,
            (Uint32, 4) => vk::Format::R32G32B32A32_UINT,
            _ => {
                return Err(GpuError::unsupported(format!(
                    "unrecognized pixel format ({} x {:?})",
                    self.ncomp, self.kind
                )))
            }
        };
        Ok(fmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_formats_key_on_component_count() {
        assert_eq!(
            PixelFormat::new(3, ScalarKind::Uint16).to_vk().unwrap(),
            vk::Format::R16G16B16_UINT
        );
        assert_eq!(
            PixelFormat::new(2, ScalarKind::Sint32).to_vk().unwrap(),
            vk::Format::R32G32_SINT
        );
        assert_eq!(
            PixelFormat::R8G8B8A8_UNORM.to_vk().unwrap(),
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn out_of_range_component_count_is_unsupported() {
        let fmt = PixelFormat::new(5, ScalarKind::Unorm8);
        assert!(matches!(fmt.to_vk(), Err(GpuError::Unsupported(_))));
    }

    #[test]
    fn texel_sizes() {
        assert_eq!(PixelFormat::R8G8B8A8_UNORM.size_bytes(), 4);
        assert_eq!(PixelFormat::R32G32B32_SFLOAT.size_bytes(), 12);
        assert_eq!(PixelFormat::new(2, ScalarKind::Uint16).size_bytes(), 4);
    }
}
