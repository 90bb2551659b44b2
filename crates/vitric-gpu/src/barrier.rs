//! Barrier parameter derivation.
//!
//! Barriers are declared as `(usage, device access)` pairs on each side; the
//! tables here lower them to Vulkan access masks, pipeline stages, and (for
//! images) layouts. Pairs outside the tables are rejected at record time.

use crate::buffer::BufferUsage;
use crate::error::{GpuError, Result};
use crate::image::ImageUsage;
use crate::memory::MemoryAccess;
use ash::vk;

/// Which side of a barrier is being derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierSide {
    Source,
    Destination,
}

impl BarrierSide {
    /// Stage used when the side performs no device access at all.
    fn idle_stage(self) -> vk::PipelineStageFlags {
        match self {
            Self::Source => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            Self::Destination => vk::PipelineStageFlags::TOP_OF_PIPE,
        }
    }
}

const SHADER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::ALL_GRAPHICS.as_raw() | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
);
const SAMPLE_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
);
const UNIFORM_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
        | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
        | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw(),
);

/// Derive `(access, stage)` for one side of a buffer barrier.
pub(crate) fn buffer_barrier_params(
    usage: BufferUsage,
    dev_access: MemoryAccess,
    side: BarrierSide,
) -> Result<(vk::AccessFlags, vk::PipelineStageFlags)> {
    use MemoryAccess::*;

    if dev_access == MemoryAccess::None {
        return Ok((vk::AccessFlags::empty(), side.idle_stage()));
    }

    if usage == BufferUsage::STAGING {
        match dev_access {
            ReadOnly => Ok((vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER)),
            WriteOnly => Ok((vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER)),
            _ => Err(GpuError::precondition(
                "buffer used for staging can't be both read and written",
            )),
        }
    } else if usage == BufferUsage::VERTEX {
        if dev_access == ReadOnly {
            Ok((
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
                vk::PipelineStageFlags::VERTEX_INPUT,
            ))
        } else {
            Err(GpuError::precondition(
                "buffer used for vertex input cannot be written",
            ))
        }
    } else if usage == BufferUsage::INDEX {
        if dev_access == ReadOnly {
            Ok((vk::AccessFlags::INDEX_READ, vk::PipelineStageFlags::VERTEX_INPUT))
        } else {
            Err(GpuError::precondition(
                "buffer used for index input cannot be written",
            ))
        }
    } else if usage == BufferUsage::UNIFORM {
        if dev_access == ReadOnly {
            Ok((vk::AccessFlags::UNIFORM_READ, UNIFORM_STAGES))
        } else {
            Err(GpuError::precondition(
                "buffer used for uniform cannot be written",
            ))
        }
    } else if usage == BufferUsage::STORAGE {
        let access = match dev_access {
            ReadOnly => vk::AccessFlags::SHADER_READ,
            WriteOnly => vk::AccessFlags::SHADER_WRITE,
            _ => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        };
        Ok((access, SHADER_STAGES))
    } else {
        Err(GpuError::precondition(format!(
            "cannot make buffer barrier with usage {usage:?}"
        )))
    }
}

/// Derive `(access, stage, layout)` for one side of an image barrier.
pub(crate) fn image_barrier_params(
    usage: ImageUsage,
    dev_access: MemoryAccess,
    side: BarrierSide,
) -> Result<(vk::AccessFlags, vk::PipelineStageFlags, vk::ImageLayout)> {
    use MemoryAccess::*;

    if usage.is_empty() || dev_access == MemoryAccess::None {
        return Ok((
            vk::AccessFlags::empty(),
            side.idle_stage(),
            vk::ImageLayout::UNDEFINED,
        ));
    }

    if usage == ImageUsage::STAGING {
        match dev_access {
            ReadOnly => Ok((
                vk::AccessFlags::TRANSFER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )),
            WriteOnly => Ok((
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TRANSFER,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )),
            _ => Err(GpuError::precondition(
                "image used for staging can't be both read and written",
            )),
        }
    } else if usage == ImageUsage::ATTACHMENT {
        if dev_access == ReadOnly {
            Ok((
                vk::AccessFlags::INPUT_ATTACHMENT_READ,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ))
        } else {
            // Fragment output. The two sides see different access kinds.
            let access = match side {
                BarrierSide::Source => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                BarrierSide::Destination => vk::AccessFlags::COLOR_ATTACHMENT_READ,
            };
            Ok((
                access,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ))
        }
    } else if usage == ImageUsage::SAMPLED {
        if dev_access == ReadOnly {
            Ok((
                vk::AccessFlags::SHADER_READ,
                SAMPLE_STAGES,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ))
        } else {
            Err(GpuError::precondition(
                "image used for sampling cannot be written",
            ))
        }
    } else if usage == ImageUsage::STORAGE {
        let access = match dev_access {
            ReadOnly => vk::AccessFlags::SHADER_READ,
            WriteOnly => vk::AccessFlags::SHADER_WRITE,
            _ => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        };
        Ok((access, SHADER_STAGES, vk::ImageLayout::GENERAL))
    } else if usage == ImageUsage::PRESENT {
        if dev_access == ReadOnly {
            Ok((
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ))
        } else {
            Err(GpuError::precondition(
                "image used for present cannot be written",
            ))
        }
    } else {
        Err(GpuError::precondition(format!(
            "cannot make image barrier with usage {usage:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Precondition violations abort in debug builds and surface as errors in
    // release builds; accept either outcome.
    fn expect_precondition<T>(f: impl FnOnce() -> Result<T>) {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
            Ok(result) => {
                assert!(matches!(result, Err(GpuError::PreconditionViolated(_))));
            }
            Err(_) => assert!(cfg!(debug_assertions), "panicked in a release build"),
        }
    }

    #[test]
    fn storage_read_write_both_sides() {
        for side in [BarrierSide::Source, BarrierSide::Destination] {
            let (access, stage) =
                buffer_barrier_params(BufferUsage::STORAGE, MemoryAccess::ReadWrite, side)
                    .unwrap();
            assert_eq!(
                access,
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE
            );
            assert_eq!(
                stage,
                vk::PipelineStageFlags::ALL_GRAPHICS | vk::PipelineStageFlags::COMPUTE_SHADER
            );
        }
    }

    #[test]
    fn staging_buffer_rejects_read_write() {
        expect_precondition(|| {
            buffer_barrier_params(
                BufferUsage::STAGING,
                MemoryAccess::ReadWrite,
                BarrierSide::Source,
            )
        });
    }

    #[test]
    fn uniform_rejects_writes() {
        expect_precondition(|| {
            buffer_barrier_params(
                BufferUsage::UNIFORM,
                MemoryAccess::WriteOnly,
                BarrierSide::Destination,
            )
        });
        expect_precondition(|| {
            buffer_barrier_params(
                BufferUsage::UNIFORM,
                MemoryAccess::ReadWrite,
                BarrierSide::Destination,
            )
        });
    }

    #[test]
    fn multi_bit_usage_is_rejected() {
        expect_precondition(|| {
            buffer_barrier_params(
                BufferUsage::STORAGE | BufferUsage::VERTEX,
                MemoryAccess::ReadOnly,
                BarrierSide::Source,
            )
        });
    }

    #[test]
    fn no_access_side_is_idle() {
        let (access, stage) =
            buffer_barrier_params(BufferUsage::STORAGE, MemoryAccess::None, BarrierSide::Source)
                .unwrap();
        assert_eq!(access, vk::AccessFlags::empty());
        assert_eq!(stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);

        let (access, stage, layout) =
            image_barrier_params(ImageUsage::empty(), MemoryAccess::WriteOnly, BarrierSide::Destination)
                .unwrap();
        assert_eq!(access, vk::AccessFlags::empty());
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn staging_image_layouts_track_transfer_direction() {
        let (_, _, src_layout) =
            image_barrier_params(ImageUsage::STAGING, MemoryAccess::ReadOnly, BarrierSide::Source)
                .unwrap();
        assert_eq!(src_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        let (_, _, dst_layout) = image_barrier_params(
            ImageUsage::STAGING,
            MemoryAccess::WriteOnly,
            BarrierSide::Destination,
        )
        .unwrap();
        assert_eq!(dst_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn attachment_write_access_differs_per_side() {
        let (src_access, src_stage, _) = image_barrier_params(
            ImageUsage::ATTACHMENT,
            MemoryAccess::WriteOnly,
            BarrierSide::Source,
        )
        .unwrap();
        assert_eq!(src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        let (dst_access, _, _) = image_barrier_params(
            ImageUsage::ATTACHMENT,
            MemoryAccess::WriteOnly,
            BarrierSide::Destination,
        )
        .unwrap();
        assert_eq!(dst_access, vk::AccessFlags::COLOR_ATTACHMENT_READ);
    }

    #[test]
    fn storage_image_uses_general_layout() {
        let (_, _, layout) = image_barrier_params(
            ImageUsage::STORAGE,
            MemoryAccess::ReadWrite,
            BarrierSide::Destination,
        )
        .unwrap();
        assert_eq!(layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn sampled_image_read_only() {
        let (access, stage, layout) = image_barrier_params(
            ImageUsage::SAMPLED,
            MemoryAccess::ReadOnly,
            BarrierSide::Destination,
        )
        .unwrap();
        assert_eq!(access, vk::AccessFlags::SHADER_READ);
        assert_eq!(
            stage,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        expect_precondition(|| {
            image_barrier_params(
                ImageUsage::SAMPLED,
                MemoryAccess::WriteOnly,
                BarrierSide::Source,
            )
        });
    }
}
