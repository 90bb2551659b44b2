//! Command submission: drains and reusable transactions.

use crate::command::{Command, RecordLevel};
use crate::context::{Context, SubmitType};
use crate::error::{GpuError, Result};
use crate::recorder::{
    clear_submit_details, end_cmdbuf, submit_detail, Recording, TransactionSubmitDetail,
};
use ash::vk;
use std::time::Instant;

/// Fence polling slice in nanoseconds.
const SPIN_INTERVAL_NS: u64 = 3_000;

/// A single-slot submission handle: submit, wait, resubmit.
///
/// Owns the completion fence and the transient sub-submission state of the
/// last `submit`. A resource referenced by a submission must stay alive
/// until `wait` returns.
pub struct CommandDrain {
    ctxt: Context,
    submit_details: Vec<TransactionSubmitDetail>,
    fence: vk::Fence,
}

impl CommandDrain {
    pub fn new(ctxt: &Context) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe { ctxt.device().create_fence(&fence_info, None)? };
        tracing::debug!("created command drain");
        Ok(Self {
            ctxt: ctxt.clone(),
            submit_details: Vec::new(),
            fence,
        })
    }

    /// Record `cmds` as a primary transaction and submit it. The last
    /// sub-submission signals the drain's fence.
    pub fn submit(&mut self, cmds: &[Command<'_>]) -> Result<()> {
        if !self.submit_details.is_empty() {
            return Err(GpuError::precondition(
                "command drain already has a submission in flight",
            ));
        }
        let start = Instant::now();
        self.submit_details = Recording::record_all(&self.ctxt, RecordLevel::Primary, cmds)?;

        let last = self
            .submit_details
            .last()
            .expect("a recorded command list has at least one sub-submission");
        let finish = end_cmdbuf(&self.ctxt, last)
            .and_then(|()| submit_detail(&self.ctxt, last, self.fence));
        if let Err(e) = finish {
            // The fence will never signal; recycle by draining the device.
            unsafe {
                let _ = self.ctxt.device().device_wait_idle();
            }
            clear_submit_details(&self.ctxt, &mut self.submit_details);
            return Err(e);
        }

        tracing::debug!(
            "submitted transaction for execution, command recording took {}us",
            start.elapsed().as_micros()
        );
        Ok(())
    }

    /// Block until the fence signals, then recycle the transient recording
    /// state. A no-op when nothing is in flight, so a second `wait` after a
    /// drained `wait` returns immediately.
    pub fn wait(&mut self) -> Result<()> {
        if self.submit_details.is_empty() {
            return Ok(());
        }

        let wait_start = Instant::now();
        loop {
            match unsafe {
                self.ctxt
                    .device()
                    .wait_for_fences(&[self.fence], true, SPIN_INTERVAL_NS)
            } {
                Ok(()) => break,
                Err(vk::Result::TIMEOUT) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let waited_us = wait_start.elapsed().as_micros();

        let reset_start = Instant::now();
        clear_submit_details(&self.ctxt, &mut self.submit_details);
        unsafe { self.ctxt.device().reset_fences(&[self.fence])? };

        tracing::debug!(
            "command drain returned after {}us since the wait started (spin \
             interval = {}us; resource recycling took {}us)",
            waited_us,
            SPIN_INTERVAL_NS as f64 / 1000.0,
            reset_start.elapsed().as_micros()
        );
        Ok(())
    }

    /// Submit types of the last submission's chain, in order.
    pub fn submission_chain(&self) -> Vec<SubmitType> {
        self.submit_details.iter().map(|d| d.submit_type).collect()
    }
}

impl Drop for CommandDrain {
    fn drop(&mut self) {
        // An in-flight submission must complete before its pools die.
        let _ = self.wait();
        unsafe {
            self.ctxt.device().destroy_fence(self.fence, None);
        }
        tracing::debug!("destroyed command drain");
    }
}

/// A pre-recorded sequence of secondary command buffers, replayed by
/// inlining into a primary recording via
/// [`Command::InlineTransaction`](crate::command::Command).
///
/// The per-sub-submission semaphores only serve cross-queue chaining during
/// construction; at inlining time the host primary does its own chaining.
pub struct Transaction {
    label: String,
    ctxt: Context,
    submit_details: Vec<TransactionSubmitDetail>,
}

impl Transaction {
    /// Record `cmds` at secondary level for later reuse.
    pub fn new(label: impl Into<String>, ctxt: &Context, cmds: &[Command<'_>]) -> Result<Self> {
        let submit_details = Recording::record_all(ctxt, RecordLevel::Secondary, cmds)?;
        let last = submit_details
            .last()
            .expect("a recorded command list has at least one sub-submission");
        end_cmdbuf(ctxt, last)?;

        tracing::debug!("created transaction");
        Ok(Self {
            label: label.into(),
            ctxt: ctxt.clone(),
            submit_details,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn submit_details(&self) -> &[TransactionSubmitDetail] {
        &self.submit_details
    }

    /// Submit types of the recorded sub-submissions, in order.
    pub(crate) fn submit_types(&self) -> Vec<SubmitType> {
        self.submit_details.iter().map(|d| d.submit_type).collect()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        clear_submit_details(&self.ctxt, &mut self.submit_details);
        tracing::debug!("destroyed transaction");
    }
}
