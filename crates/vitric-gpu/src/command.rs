//! Abstract commands and submission planning.

use crate::buffer::{Buffer, BufferUsage, BufferView};
use crate::context::SubmitType;
use crate::drain::Transaction;
use crate::error::{GpuError, Result};
use crate::image::{Image, ImageUsage, ImageView};
use crate::memory::MemoryAccess;
use crate::pass::RenderPass;
use crate::pool::ResourcePool;
use crate::task::Task;
use crate::timestamp::Timestamp;

/// One abstract GPU command. Commands borrow the resources they reference;
/// a recorded list must outlive its submission only until `wait` returns.
pub enum Command<'a> {
    /// Force the recording onto the given submit type without emitting any
    /// device work.
    SetSubmitType(SubmitType),
    /// Replay a pre-recorded transaction's secondary command buffers.
    InlineTransaction(&'a Transaction),
    /// Copy a buffer range into an image rectangle. The image is assumed to
    /// be in `TRANSFER_DST_OPTIMAL`.
    CopyBufferToImage {
        src: BufferView<'a>,
        dst: ImageView<'a>,
    },
    /// Copy an image rectangle into a buffer range. The image is assumed to
    /// be in `TRANSFER_SRC_OPTIMAL`.
    CopyImageToBuffer {
        src: ImageView<'a>,
        dst: BufferView<'a>,
    },
    /// Copy between buffer ranges of equal size.
    CopyBuffer {
        src: BufferView<'a>,
        dst: BufferView<'a>,
    },
    /// Copy between image rectangles of equal extent.
    CopyImage {
        src: ImageView<'a>,
        dst: ImageView<'a>,
    },
    /// Dispatch a compute task. The workgroup size was fixed at task
    /// creation; this carries the workgroup count.
    Dispatch {
        task: &'a Task,
        pool: &'a ResourcePool<'a>,
        workgroup_count: [u32; 3],
    },
    /// Draw with a graphics task from a vertex buffer bound at binding 0.
    Draw {
        task: &'a Task,
        pool: &'a ResourcePool<'a>,
        vertices: BufferView<'a>,
        vertex_count: u32,
        instance_count: u32,
    },
    /// Indexed draw; indices are 16-bit.
    DrawIndexed {
        task: &'a Task,
        pool: &'a ResourcePool<'a>,
        vertices: BufferView<'a>,
        indices: BufferView<'a>,
        index_count: u32,
        instance_count: u32,
    },
    /// Reset and write a one-slot timestamp at the `ALL_COMMANDS` stage.
    WriteTimestamp(&'a Timestamp),
    /// Pipeline barrier over the full buffer, with access and stage masks
    /// derived from the `(usage, access)` pairs.
    BufferBarrier {
        buf: &'a Buffer,
        src_usage: BufferUsage,
        dst_usage: BufferUsage,
        src_access: MemoryAccess,
        dst_access: MemoryAccess,
    },
    /// Pipeline barrier over the full image subresource range; additionally
    /// derives the layout transition.
    ImageBarrier {
        img: &'a Image,
        src_usage: ImageUsage,
        dst_usage: ImageUsage,
        src_access: MemoryAccess,
        dst_access: MemoryAccess,
    },
    /// Begin the render pass on its framebuffer. `draw_inline` selects
    /// inline subpass contents; pass `false` when draws arrive via
    /// [`Command::InlineTransaction`].
    BeginRenderPass {
        pass: &'a RenderPass<'a>,
        draw_inline: bool,
    },
    /// End the current render pass.
    EndRenderPass,
}

impl Command<'_> {
    /// Submit type this command requires, `Any` meaning "inherit".
    pub(crate) fn required_submit_type(&self) -> SubmitType {
        match self {
            Command::SetSubmitType(submit_type) => *submit_type,
            Command::Dispatch { .. } => SubmitType::Compute,
            Command::Draw { .. }
            | Command::DrawIndexed { .. }
            | Command::BeginRenderPass { .. }
            | Command::EndRenderPass => SubmitType::Graphics,
            _ => SubmitType::Any,
        }
    }
}

/// Level a command list is recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordLevel {
    /// Directly submittable; queue switches submit eagerly with semaphore
    /// chaining.
    Primary,
    /// Pre-recorded for reuse; replayed by inlining into a primary.
    Secondary,
}

/// Compute the sub-submission sequence a command list lowers to, validating
/// level restrictions before any device work happens.
///
/// Consecutive commands requiring the current submit type extend the current
/// sub-submission; any change appends a new one, so consecutive entries of
/// the result are pairwise distinct.
pub(crate) fn plan_submissions(
    cmds: &[Command<'_>],
    level: RecordLevel,
) -> Result<Vec<SubmitType>> {
    let mut plan: Vec<SubmitType> = Vec::new();

    let step = |plan: &mut Vec<SubmitType>, submit_type: SubmitType| -> Result<()> {
        let submit_type = match submit_type {
            SubmitType::Any => *plan.last().ok_or_else(|| {
                GpuError::precondition(
                    "cannot infer submit type for submit-type-independent command",
                )
            })?,
            concrete => concrete,
        };
        if plan.last() != Some(&submit_type) {
            plan.push(submit_type);
        }
        Ok(())
    };

    for cmd in cmds {
        match cmd {
            Command::InlineTransaction(transact) => {
                if level == RecordLevel::Secondary {
                    return Err(GpuError::precondition(
                        "nested inline transaction is not allowed",
                    ));
                }
                for submit_type in transact.submit_types() {
                    step(&mut plan, submit_type)?;
                }
            }
            Command::BeginRenderPass { .. } | Command::EndRenderPass
                if level == RecordLevel::Secondary =>
            {
                return Err(GpuError::precondition(
                    "render passes can only begin and end in a primary recording",
                ));
            }
            cmd => step(&mut plan, cmd.required_submit_type())?,
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Shorthands for commands whose payloads don't affect planning.
    fn any() -> SubmitType {
        SubmitType::Any
    }

    fn plan_types(types: &[SubmitType], level: RecordLevel) -> Result<Vec<SubmitType>> {
        let cmds: Vec<Command> = types
            .iter()
            .map(|&submit_type| Command::SetSubmitType(submit_type))
            .collect();
        plan_submissions(&cmds, level)
    }

    #[test]
    fn queue_switches_split_submissions() {
        // copy (ANY) -> dispatch (COMPUTE) -> copy (ANY) -> draw (GRAPHICS)
        // -> copy (ANY): the leading ANY binds explicitly, the trailing ANY
        // reuses the graphics submission.
        let plan = plan_types(
            &[
                SubmitType::Compute,
                any(),
                SubmitType::Compute,
                any(),
                SubmitType::Graphics,
                any(),
            ],
            RecordLevel::Primary,
        )
        .unwrap();
        assert_eq!(plan, vec![SubmitType::Compute, SubmitType::Graphics]);
    }

    #[test]
    fn consecutive_plan_entries_are_distinct() {
        let plan = plan_types(
            &[
                SubmitType::Graphics,
                SubmitType::Graphics,
                SubmitType::Compute,
                SubmitType::Compute,
                SubmitType::Graphics,
            ],
            RecordLevel::Primary,
        )
        .unwrap();
        assert_eq!(
            plan,
            vec![SubmitType::Graphics, SubmitType::Compute, SubmitType::Graphics]
        );
        for pair in plan.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

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
    fn leading_any_cannot_infer() {
        expect_precondition(|| plan_types(&[any()], RecordLevel::Primary));
    }

    #[test]
    fn render_pass_requires_primary() {
        expect_precondition(|| {
            plan_submissions(&[Command::EndRenderPass], RecordLevel::Secondary)
        });
        // In a primary recording the same command merely demands graphics.
        let plan = plan_submissions(&[Command::EndRenderPass], RecordLevel::Primary).unwrap();
        assert_eq!(plan, vec![SubmitType::Graphics]);
    }
}
