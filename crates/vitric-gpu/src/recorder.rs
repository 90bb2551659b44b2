//! Lowering of abstract commands into command buffers.
//!
//! A recording appends to an ordered list of sub-submissions, one per run of
//! commands sharing a submit type. Changing the submit type ends the current
//! command buffer and, for primary recordings, submits it immediately with a
//! signal semaphore the next sub-submission waits on.

use crate::barrier::{buffer_barrier_params, image_barrier_params, BarrierSide};
use crate::command::{plan_submissions, Command, RecordLevel};
use crate::context::{Context, SubmitType};
use crate::error::{GpuError, Result};
use crate::pool::ResourcePool;
use crate::task::Task;
use ash::vk;

/// One sub-submission of a recording.
pub(crate) struct TransactionSubmitDetail {
    pub(crate) submit_type: SubmitType,
    pub(crate) cmd_pool: vk::CommandPool,
    pub(crate) cmdbuf: vk::CommandBuffer,
    pub(crate) wait_sema: vk::Semaphore,
    pub(crate) signal_sema: vk::Semaphore,
}

/// Destroy the transient objects of a sub-submission list.
///
/// The caller guarantees the device is done with them (drain-wait or device
/// idle).
pub(crate) fn clear_submit_details(ctxt: &Context, details: &mut Vec<TransactionSubmitDetail>) {
    for detail in details.drain(..) {
        unsafe {
            ctxt.device().destroy_semaphore(detail.signal_sema, None);
            ctxt.device().destroy_command_pool(detail.cmd_pool, None);
        }
    }
}

pub(crate) struct Recording<'c> {
    ctxt: &'c Context,
    level: RecordLevel,
    submit_details: Vec<TransactionSubmitDetail>,
}

impl<'c> Recording<'c> {
    /// Validate and lower `cmds`, returning the recorded sub-submissions.
    ///
    /// For primary recordings every sub-submission except the last is
    /// already on its queue when this returns; the caller ends and submits
    /// the last one with its fence. For secondary recordings the last
    /// command buffer still needs [`end_cmdbuf`].
    pub(crate) fn record_all(
        ctxt: &'c Context,
        level: RecordLevel,
        cmds: &[Command<'_>],
    ) -> Result<Vec<TransactionSubmitDetail>> {
        if cmds.is_empty() {
            return Err(GpuError::precondition("cannot record an empty command list"));
        }
        // Fail fast on level violations and uninferable submit types before
        // touching the device.
        plan_submissions(cmds, level)?;

        let mut recording = Self {
            ctxt,
            level,
            submit_details: Vec::new(),
        };
        for (i, cmd) in cmds.iter().enumerate() {
            tracing::debug!("recording {i}th command");
            if let Err(e) = recording.record(cmd) {
                recording.abandon();
                return Err(e);
            }
        }
        Ok(recording.submit_details)
    }

    /// Tear down after a mid-recording failure. Work already submitted by
    /// queue switches must finish before its pools die.
    fn abandon(&mut self) {
        unsafe {
            let _ = self.ctxt.device().device_wait_idle();
        }
        clear_submit_details(self.ctxt, &mut self.submit_details);
    }

    /// Select the command buffer for a command requiring `submit_type`,
    /// switching sub-submissions when the type changes.
    fn get_cmdbuf(&mut self, submit_type: SubmitType) -> Result<vk::CommandBuffer> {
        let submit_type = match submit_type {
            SubmitType::Any => {
                self.submit_details
                    .last()
                    .ok_or_else(|| {
                        GpuError::precondition(
                            "cannot infer submit type for submit-type-independent command",
                        )
                    })?
                    .submit_type
            }
            concrete => concrete,
        };

        if let Some(last) = self.submit_details.last() {
            // Same submit type: keep feeding the last command buffer.
            if last.submit_type == submit_type {
                return Ok(last.cmdbuf);
            }
            end_cmdbuf(self.ctxt, last)?;
            if self.level == RecordLevel::Primary {
                submit_detail(self.ctxt, last, vk::Fence::null())?;
            }
        }

        self.push_submit_detail(submit_type)?;
        let detail = self.submit_details.last().unwrap();
        begin_cmdbuf(self.ctxt, self.level, detail)?;
        Ok(detail.cmdbuf)
    }

    fn push_submit_detail(&mut self, submit_type: SubmitType) -> Result<()> {
        let ctxt_detail = self.ctxt.submit_detail(submit_type)?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctxt_detail.queue_family_index);
        let cmd_pool = unsafe { self.ctxt.device().create_command_pool(&pool_info, None)? };

        let level = match self.level {
            RecordLevel::Primary => vk::CommandBufferLevel::PRIMARY,
            RecordLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
        };
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(cmd_pool)
            .level(level)
            .command_buffer_count(1);
        let cmdbuf = match unsafe { self.ctxt.device().allocate_command_buffers(&alloc_info) } {
            Ok(cmdbufs) => cmdbufs[0],
            Err(e) => {
                unsafe { self.ctxt.device().destroy_command_pool(cmd_pool, None) };
                return Err(e.into());
            }
        };

        let signal_sema = {
            let sema_info = vk::SemaphoreCreateInfo::default();
            match unsafe { self.ctxt.device().create_semaphore(&sema_info, None) } {
                Ok(sema) => sema,
                Err(e) => {
                    unsafe { self.ctxt.device().destroy_command_pool(cmd_pool, None) };
                    return Err(e.into());
                }
            }
        };

        self.submit_details.push(TransactionSubmitDetail {
            submit_type,
            cmd_pool,
            cmdbuf,
            wait_sema: self
                .submit_details
                .last()
                .map_or(vk::Semaphore::null(), |d| d.signal_sema),
            signal_sema,
        });
        Ok(())
    }

    fn is_primary(&self) -> bool {
        self.level == RecordLevel::Primary
    }

    fn record(&mut self, cmd: &Command<'_>) -> Result<()> {
        match cmd {
            Command::SetSubmitType(submit_type) => {
                self.get_cmdbuf(*submit_type)?;
                if self.is_primary() {
                    tracing::debug!("command drain submit type is set");
                }
            }
            Command::InlineTransaction(transact) => {
                if self.level == RecordLevel::Secondary {
                    return Err(GpuError::precondition(
                        "nested inline transaction is not allowed",
                    ));
                }
                for sub_detail in transact.submit_details() {
                    let cmdbuf = self.get_cmdbuf(sub_detail.submit_type)?;
                    unsafe {
                        self.ctxt
                            .device()
                            .cmd_execute_commands(cmdbuf, &[sub_detail.cmdbuf]);
                    }
                }
                tracing::debug!("scheduled inline transaction '{}'", transact.label());
            }
            Command::CopyBufferToImage { src, dst } => {
                let cmdbuf = self.get_cmdbuf(SubmitType::Any)?;
                let region = vk::BufferImageCopy {
                    buffer_offset: src.offset,
                    buffer_row_length: 0,
                    buffer_image_height: dst.img.config().height,
                    image_subresource: color_layers(),
                    image_offset: vk::Offset3D {
                        x: dst.x_offset as i32,
                        y: dst.y_offset as i32,
                        z: 0,
                    },
                    image_extent: vk::Extent3D {
                        width: dst.width,
                        height: dst.height,
                        depth: 1,
                    },
                };
                unsafe {
                    self.ctxt.device().cmd_copy_buffer_to_image(
                        cmdbuf,
                        src.buf.handle(),
                        dst.img.handle(),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                if self.is_primary() {
                    tracing::debug!(
                        "scheduled copy from buffer '{}' to image '{}'",
                        src.buf.config().label,
                        dst.img.config().label
                    );
                }
            }
            Command::CopyImageToBuffer { src, dst } => {
                let cmdbuf = self.get_cmdbuf(SubmitType::Any)?;
                let region = vk::BufferImageCopy {
                    buffer_offset: dst.offset,
                    buffer_row_length: 0,
                    buffer_image_height: src.img.config().height,
                    image_subresource: color_layers(),
                    image_offset: vk::Offset3D {
                        x: src.x_offset as i32,
                        y: src.y_offset as i32,
                        z: 0,
                    },
                    image_extent: vk::Extent3D {
                        width: src.width,
                        height: src.height,
                        depth: 1,
                    },
                };
                unsafe {
                    self.ctxt.device().cmd_copy_image_to_buffer(
                        cmdbuf,
                        src.img.handle(),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst.buf.handle(),
                        &[region],
                    );
                }
                if self.is_primary() {
                    tracing::debug!(
                        "scheduled copy from image '{}' to buffer '{}'",
                        src.img.config().label,
                        dst.buf.config().label
                    );
                }
            }
            Command::CopyBuffer { src, dst } => {
                if src.size != dst.size {
                    return Err(GpuError::precondition("buffer copy size mismatched"));
                }
                if dst.size == 0 {
                    return Err(GpuError::precondition("zero-sized copy"));
                }
                let cmdbuf = self.get_cmdbuf(SubmitType::Any)?;
                let region = vk::BufferCopy {
                    src_offset: src.offset,
                    dst_offset: dst.offset,
                    size: dst.size,
                };
                unsafe {
                    self.ctxt.device().cmd_copy_buffer(
                        cmdbuf,
                        src.buf.handle(),
                        dst.buf.handle(),
                        &[region],
                    );
                }
                if self.is_primary() {
                    tracing::debug!(
                        "scheduled copy from buffer '{}' to buffer '{}'",
                        src.buf.config().label,
                        dst.buf.config().label
                    );
                }
            }
            Command::CopyImage { src, dst } => {
                if src.width != dst.width || src.height != dst.height {
                    return Err(GpuError::precondition("image copy size mismatched"));
                }
                let cmdbuf = self.get_cmdbuf(SubmitType::Any)?;
                let region = vk::ImageCopy {
                    src_subresource: color_layers(),
                    src_offset: vk::Offset3D {
                        x: src.x_offset as i32,
                        y: src.y_offset as i32,
                        z: 0,
                    },
                    dst_subresource: color_layers(),
                    dst_offset: vk::Offset3D {
                        x: dst.x_offset as i32,
                        y: dst.y_offset as i32,
                        z: 0,
                    },
                    extent: vk::Extent3D {
                        width: dst.width,
                        height: dst.height,
                        depth: 1,
                    },
                };
                unsafe {
                    self.ctxt.device().cmd_copy_image(
                        cmdbuf,
                        src.img.handle(),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst.img.handle(),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                if self.is_primary() {
                    tracing::debug!(
                        "scheduled copy from image '{}' to image '{}'",
                        src.img.config().label,
                        dst.img.config().label
                    );
                }
            }
            Command::Dispatch {
                task,
                pool,
                workgroup_count,
            } => {
                let cmdbuf = self.get_cmdbuf(SubmitType::Compute)?;
                unsafe {
                    self.ctxt.device().cmd_bind_pipeline(
                        cmdbuf,
                        vk::PipelineBindPoint::COMPUTE,
                        task.pipeline(),
                    );
                    if pool.desc_set() != vk::DescriptorSet::null() {
                        self.ctxt.device().cmd_bind_descriptor_sets(
                            cmdbuf,
                            vk::PipelineBindPoint::COMPUTE,
                            task.pipe_layout(),
                            0,
                            &[pool.desc_set()],
                            &[],
                        );
                    }
                    self.ctxt.device().cmd_dispatch(
                        cmdbuf,
                        workgroup_count[0],
                        workgroup_count[1],
                        workgroup_count[2],
                    );
                }
                if self.is_primary() {
                    tracing::debug!("scheduled compute task '{}' for execution", task.label());
                }
            }
            Command::Draw {
                task,
                pool,
                vertices,
                vertex_count,
                instance_count,
            } => {
                let cmdbuf = self.get_cmdbuf(SubmitType::Graphics)?;
                unsafe {
                    self.bind_graphics(cmdbuf, task, pool);
                    self.ctxt.device().cmd_bind_vertex_buffers(
                        cmdbuf,
                        0,
                        &[vertices.buf.handle()],
                        &[vertices.offset],
                    );
                    self.ctxt
                        .device()
                        .cmd_draw(cmdbuf, *vertex_count, *instance_count, 0, 0);
                }
                if self.is_primary() {
                    tracing::debug!("scheduled graphics task '{}' for execution", task.label());
                }
            }
            Command::DrawIndexed {
                task,
                pool,
                vertices,
                indices,
                index_count,
                instance_count,
            } => {
                let cmdbuf = self.get_cmdbuf(SubmitType::Graphics)?;
                unsafe {
                    self.bind_graphics(cmdbuf, task, pool);
                    self.ctxt.device().cmd_bind_vertex_buffers(
                        cmdbuf,
                        0,
                        &[vertices.buf.handle()],
                        &[vertices.offset],
                    );
                    self.ctxt.device().cmd_bind_index_buffer(
                        cmdbuf,
                        indices.buf.handle(),
                        indices.offset,
                        vk::IndexType::UINT16,
                    );
                    self.ctxt
                        .device()
                        .cmd_draw_indexed(cmdbuf, *index_count, *instance_count, 0, 0, 0);
                }
                if self.is_primary() {
                    tracing::debug!("scheduled graphics task '{}' for execution", task.label());
                }
            }
            Command::WriteTimestamp(timestamp) => {
                let cmdbuf = self.get_cmdbuf(SubmitType::Any)?;
                unsafe {
                    self.ctxt
                        .device()
                        .cmd_reset_query_pool(cmdbuf, timestamp.query_pool(), 0, 1);
                    self.ctxt.device().cmd_write_timestamp(
                        cmdbuf,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        timestamp.query_pool(),
                        0,
                    );
                }
                if self.is_primary() {
                    tracing::debug!("scheduled timestamp write");
                }
            }
            Command::BufferBarrier {
                buf,
                src_usage,
                dst_usage,
                src_access,
                dst_access,
            } => {
                let (src_access, src_stage) =
                    buffer_barrier_params(*src_usage, *src_access, BarrierSide::Source)?;
                let (dst_access, dst_stage) =
                    buffer_barrier_params(*dst_usage, *dst_access, BarrierSide::Destination)?;
                let cmdbuf = self.get_cmdbuf(SubmitType::Any)?;

                let barrier = vk::BufferMemoryBarrier::default()
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buf.handle())
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                unsafe {
                    self.ctxt.device().cmd_pipeline_barrier(
                        cmdbuf,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    );
                }
                if self.is_primary() {
                    tracing::debug!("scheduled buffer barrier");
                }
            }
            Command::ImageBarrier {
                img,
                src_usage,
                dst_usage,
                src_access,
                dst_access,
            } => {
                let (src_access, src_stage, src_layout) =
                    image_barrier_params(*src_usage, *src_access, BarrierSide::Source)?;
                let (dst_access, dst_stage, dst_layout) =
                    image_barrier_params(*dst_usage, *dst_access, BarrierSide::Destination)?;
                let cmdbuf = self.get_cmdbuf(SubmitType::Any)?;

                let barrier = vk::ImageMemoryBarrier::default()
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .old_layout(src_layout)
                    .new_layout(dst_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(img.handle())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    });
                unsafe {
                    self.ctxt.device().cmd_pipeline_barrier(
                        cmdbuf,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    );
                }
                if self.is_primary() {
                    tracing::debug!("scheduled image barrier");
                }
            }
            Command::BeginRenderPass { pass, draw_inline } => {
                if !self.is_primary() {
                    return Err(GpuError::precondition(
                        "render passes can only begin in a primary recording",
                    ));
                }
                let cmdbuf = self.get_cmdbuf(SubmitType::Graphics)?;
                let clear_values = [pass.clear_value()];
                let begin_info = vk::RenderPassBeginInfo::default()
                    .render_pass(pass.handle())
                    .framebuffer(pass.framebuffer())
                    .render_area(pass.viewport())
                    .clear_values(&clear_values);
                let contents = if *draw_inline {
                    vk::SubpassContents::INLINE
                } else {
                    vk::SubpassContents::SECONDARY_COMMAND_BUFFERS
                };
                unsafe {
                    self.ctxt
                        .device()
                        .cmd_begin_render_pass(cmdbuf, &begin_info, contents);
                }
                tracing::debug!("scheduled render pass begin");
            }
            Command::EndRenderPass => {
                if !self.is_primary() {
                    return Err(GpuError::precondition(
                        "render passes can only end in a primary recording",
                    ));
                }
                let cmdbuf = self.get_cmdbuf(SubmitType::Graphics)?;
                unsafe {
                    self.ctxt.device().cmd_end_render_pass(cmdbuf);
                }
                tracing::debug!("scheduled render pass end");
            }
        }
        Ok(())
    }

    /// # Safety
    /// `cmdbuf` must be in the recording state.
    unsafe fn bind_graphics(
        &self,
        cmdbuf: vk::CommandBuffer,
        task: &Task,
        pool: &ResourcePool<'_>,
    ) {
        self.ctxt.device().cmd_bind_pipeline(
            cmdbuf,
            vk::PipelineBindPoint::GRAPHICS,
            task.pipeline(),
        );
        if pool.desc_set() != vk::DescriptorSet::null() {
            self.ctxt.device().cmd_bind_descriptor_sets(
                cmdbuf,
                vk::PipelineBindPoint::GRAPHICS,
                task.pipe_layout(),
                0,
                &[pool.desc_set()],
                &[],
            );
        }
    }
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub(crate) fn begin_cmdbuf(
    ctxt: &Context,
    level: RecordLevel,
    detail: &TransactionSubmitDetail,
) -> Result<()> {
    let inheritance = vk::CommandBufferInheritanceInfo::default();
    let mut begin_info = vk::CommandBufferBeginInfo::default().inheritance_info(&inheritance);
    if level == RecordLevel::Secondary && detail.submit_type == SubmitType::Graphics {
        begin_info = begin_info.flags(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE);
    }
    unsafe { ctxt.device().begin_command_buffer(detail.cmdbuf, &begin_info)? };
    Ok(())
}

pub(crate) fn end_cmdbuf(ctxt: &Context, detail: &TransactionSubmitDetail) -> Result<()> {
    unsafe { ctxt.device().end_command_buffer(detail.cmdbuf)? };
    Ok(())
}

/// Submit one sub-submission to its queue, waiting on the previous
/// sub-submission's semaphore at `TOP_OF_PIPE` and signaling its own.
pub(crate) fn submit_detail(
    ctxt: &Context,
    detail: &TransactionSubmitDetail,
    fence: vk::Fence,
) -> Result<()> {
    let wait_stage = vk::PipelineStageFlags::TOP_OF_PIPE;
    let cmdbufs = [detail.cmdbuf];
    let signal_semas = [detail.signal_sema];
    let wait_semas = [detail.wait_sema];
    let wait_stages = [wait_stage];

    let mut submit_info = vk::SubmitInfo::default()
        .command_buffers(&cmdbufs)
        .signal_semaphores(&signal_semas);
    if detail.wait_sema != vk::Semaphore::null() {
        // Wait for the previously submitted command buffer on the device side.
        submit_info = submit_info
            .wait_semaphores(&wait_semas)
            .wait_dst_stage_mask(&wait_stages);
    }

    let queue = ctxt.submit_detail(detail.submit_type)?.queue;
    unsafe { ctxt.device().queue_submit(queue, &[submit_info], fence)? };
    Ok(())
}
