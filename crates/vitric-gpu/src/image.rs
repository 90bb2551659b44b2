//! GPU images: typed 2D allocations with usage and host-access configs.

use crate::context::{select_memory_type, Context, SubmitType};
use crate::error::{GpuError, Result};
use crate::format::PixelFormat;
use crate::memory::MemoryAccess;
use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Roles an image may serve.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageUsage: u32 {
        /// Host-mapped source/target of transfer commands. Forces linear
        /// tiling and excludes every other role.
        const STAGING = 1 << 0;
        /// Sampled in shaders through the context's default sampler.
        const SAMPLED = 1 << 1;
        /// Storage image.
        const STORAGE = 1 << 2;
        /// Color attachment of a render pass.
        const ATTACHMENT = 1 << 3;
        /// Presented to a window system. Only meaningful in barriers.
        const PRESENT = 1 << 4;
    }
}

/// Derived creation parameters for an image usage set.
pub(crate) struct ImageUsagePlan {
    pub(crate) usage: vk::ImageUsageFlags,
    pub(crate) init_submit_type: SubmitType,
    pub(crate) is_staging: bool,
}

/// Lower an [`ImageUsage`] set to Vulkan usage bits.
///
/// Staging images are transfer-only; combining `STAGING` with any other role
/// is rejected.
pub(crate) fn plan_image_usage(usage: ImageUsage) -> Result<ImageUsagePlan> {
    let mut vk_usage = vk::ImageUsageFlags::empty();
    let mut init_submit_type = SubmitType::Any;
    let mut is_staging = false;

    if usage.contains(ImageUsage::SAMPLED) {
        vk_usage |= vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::STORAGE) {
        vk_usage |= vk::ImageUsageFlags::STORAGE
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::ATTACHMENT) {
        vk_usage |= vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::INPUT_ATTACHMENT;
        init_submit_type = SubmitType::Graphics;
    }
    if usage.contains(ImageUsage::STAGING) {
        if usage != ImageUsage::STAGING {
            return Err(GpuError::precondition(
                "staging image can only be used for transfer",
            ));
        }
        vk_usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        init_submit_type = SubmitType::Any;
        // The only case where image data is fed directly by memory mapping.
        is_staging = true;
    }

    Ok(ImageUsagePlan {
        usage: vk_usage,
        init_submit_type,
        is_staging,
    })
}

/// Immutable image configuration.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: ImageUsage,
    pub host_access: MemoryAccess,
    pub label: String,
}

/// A device image, its backing memory, and (unless staging) a default 2D
/// view.
pub struct Image {
    ctxt: Context,
    memory: vk::DeviceMemory,
    img: vk::Image,
    img_view: Option<vk::ImageView>,
    config: ImageConfig,
    is_staging: bool,
}

impl Image {
    /// Start building an image on `ctxt`.
    pub fn builder(ctxt: &Context) -> ImageBuilder {
        ImageBuilder {
            ctxt: ctxt.clone(),
            width: 0,
            height: 0,
            depth: 1,
            format: PixelFormat::R8G8B8A8_UNORM,
            usage: ImageUsage::empty(),
            host_access: MemoryAccess::None,
            label: String::new(),
        }
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn is_staging(&self) -> bool {
        self.is_staging
    }

    pub(crate) fn handle(&self) -> vk::Image {
        self.img
    }

    /// Default 2D view handle. Staging images have none.
    pub(crate) fn view_handle(&self) -> Result<vk::ImageView> {
        self.img_view.ok_or_else(|| {
            GpuError::precondition(format!(
                "staging image '{}' has no view",
                self.config.label
            ))
        })
    }

    /// View over the whole image.
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            img: self,
            x_offset: 0,
            y_offset: 0,
            width: self.config.width,
            height: self.config.height,
        }
    }

    /// View over a sub-rectangle.
    pub fn view_rect(&self, x_offset: u32, y_offset: u32, width: u32, height: u32) -> ImageView<'_> {
        ImageView {
            img: self,
            x_offset,
            y_offset,
            width,
            height,
        }
    }

    /// Map the image's memory for host access. Reports the subresource row
    /// pitch so callers can address rows of a linear-tiled image.
    pub fn map(&self) -> Result<MappedImage<'_>> {
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        let layout = unsafe {
            self.ctxt
                .device()
                .get_image_subresource_layout(self.img, subresource)
        };
        let ptr = unsafe {
            self.ctxt.device().map_memory(
                self.memory,
                layout.offset,
                layout.size,
                vk::MemoryMapFlags::empty(),
            )?
        };
        tracing::debug!(
            "mapped image '{}' ({}x{})",
            self.config.label,
            self.config.width,
            self.config.height
        );
        Ok(MappedImage {
            img: self,
            ptr: ptr.cast(),
            size: layout.size as usize,
            row_pitch: layout.row_pitch as usize,
        })
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if let Some(view) = self.img_view {
                self.ctxt.device().destroy_image_view(view, None);
            }
            self.ctxt.device().destroy_image(self.img, None);
            self.ctxt.device().free_memory(self.memory, None);
        }
        tracing::debug!("destroyed image '{}'", self.config.label);
    }
}

/// Builder for [`Image`].
pub struct ImageBuilder {
    ctxt: Context,
    width: u32,
    height: u32,
    depth: u32,
    format: PixelFormat,
    usage: ImageUsage,
    host_access: MemoryAccess,
    label: String,
}

impl ImageBuilder {
    pub fn width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = height;
        self
    }

    /// Depth of the requested extent. Anything other than 1 is rejected at
    /// build time; the HAL is 2D-only.
    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn usage(mut self, usage: ImageUsage) -> Self {
        self.usage |= usage;
        self
    }

    pub fn staging(self) -> Self {
        self.usage(ImageUsage::STAGING)
    }

    pub fn sampled(self) -> Self {
        self.usage(ImageUsage::SAMPLED)
    }

    pub fn storage(self) -> Self {
        self.usage(ImageUsage::STORAGE)
    }

    pub fn attachment(self) -> Self {
        self.usage(ImageUsage::ATTACHMENT)
    }

    pub fn host_access(mut self, host_access: MemoryAccess) -> Self {
        self.host_access = host_access;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn build(self) -> Result<Image> {
        let ctxt = self.ctxt;
        if self.depth != 1 {
            return Err(GpuError::precondition(format!(
                "3D images are not supported (requested depth {})",
                self.depth
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(GpuError::precondition(
                "cannot create an image with a zero extent",
            ));
        }

        let format = self.format.to_vk()?;
        let plan = plan_image_usage(self.usage)?;
        let tiling = if plan.is_staging {
            vk::ImageTiling::LINEAR
        } else {
            vk::ImageTiling::OPTIMAL
        };
        let initial_layout = if plan.is_staging {
            vk::ImageLayout::PREINITIALIZED
        } else {
            vk::ImageLayout::UNDEFINED
        };

        // Reject unsupported (format, usage) combinations up front.
        let global = crate::instance::global()?;
        unsafe {
            global
                .instance
                .get_physical_device_image_format_properties(
                    ctxt.physical_device(),
                    format,
                    vk::ImageType::TYPE_2D,
                    tiling,
                    plan.usage,
                    vk::ImageCreateFlags::empty(),
                )
                .map_err(|e| {
                    GpuError::unsupported(format!(
                        "format {format:?} does not support usage {:?}: {e}",
                        self.usage
                    ))
                })?;
        }

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(plan.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(initial_layout);
        let img = unsafe { ctxt.device().create_image(&create_info, None)? };

        let requirements = unsafe { ctxt.device().get_image_memory_requirements(img) };
        let memory_type_index = match select_memory_type(&ctxt, self.host_access, &requirements)
        {
            Ok(idx) => idx,
            Err(e) => {
                unsafe { ctxt.device().destroy_image(img, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { ctxt.device().allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { ctxt.device().destroy_image(img, None) };
                return Err(e.into());
            }
        };
        if let Err(e) = unsafe { ctxt.device().bind_image_memory(img, memory, 0) } {
            unsafe {
                ctxt.device().destroy_image(img, None);
                ctxt.device().free_memory(memory, None);
            }
            return Err(e.into());
        }

        let img_view = if plan.is_staging {
            None
        } else {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(img)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            match unsafe { ctxt.device().create_image_view(&view_info, None) } {
                Ok(view) => Some(view),
                Err(e) => {
                    unsafe {
                        ctxt.device().destroy_image(img, None);
                        ctxt.device().free_memory(memory, None);
                    }
                    return Err(e.into());
                }
            }
        };

        tracing::debug!(
            "created image '{}' (initializes on {:?} submissions)",
            self.label,
            plan.init_submit_type
        );
        Ok(Image {
            ctxt,
            memory,
            img,
            img_view,
            config: ImageConfig {
                width: self.width,
                height: self.height,
                format: self.format,
                usage: self.usage,
                host_access: self.host_access,
                label: self.label,
            },
            is_staging: plan.is_staging,
        })
    }
}

/// Non-owning sub-rectangle of an image.
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    pub img: &'a Image,
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

/// Scoped host mapping of image memory.
pub struct MappedImage<'a> {
    img: &'a Image,
    ptr: *mut u8,
    size: usize,
    row_pitch: usize,
}

impl MappedImage<'_> {
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn as_slice_mut(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }

    /// Bytes between the starts of consecutive rows.
    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }
}

impl Drop for MappedImage<'_> {
    fn drop(&mut self) {
        unsafe { self.img.ctxt.device().unmap_memory(self.img.memory) };
        tracing::debug!("unmapped image '{}'", self.img.config.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_excludes_other_usages() {
        // Fatal in debug builds, a recoverable error in release builds.
        let outcome = std::panic::catch_unwind(|| {
            plan_image_usage(ImageUsage::STAGING | ImageUsage::SAMPLED)
        });
        match outcome {
            Ok(result) => {
                assert!(matches!(result, Err(GpuError::PreconditionViolated(_))));
            }
            Err(_) => assert!(cfg!(debug_assertions), "panicked in a release build"),
        }
    }

    #[test]
    fn staging_is_linear_transfer_only() {
        let plan = plan_image_usage(ImageUsage::STAGING).unwrap();
        assert!(plan.is_staging);
        assert_eq!(
            plan.usage,
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn attachment_initializes_on_graphics() {
        let plan = plan_image_usage(ImageUsage::ATTACHMENT).unwrap();
        assert!(!plan.is_staging);
        assert_eq!(plan.init_submit_type, SubmitType::Graphics);
        assert!(plan.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(plan.usage.contains(vk::ImageUsageFlags::INPUT_ATTACHMENT));
    }

    #[test]
    fn sampled_storage_combines_transfer_bits() {
        let plan = plan_image_usage(ImageUsage::SAMPLED | ImageUsage::STORAGE).unwrap();
        assert!(plan.usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(plan.usage.contains(vk::ImageUsageFlags::STORAGE));
        assert!(plan.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(plan.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }
}
