//! Compute invocations: a task, its bound resources, and a drain in one
//! handle.
//!
//! An invocation owns everything a repeated dispatch needs: the resource
//! pool with its bindings written, a drain for submission, and, when timed,
//! a begin/end timestamp pair bracketing the dispatch.

use crate::buffer::BufferView;
use crate::command::Command;
use crate::context::SubmitType;
use crate::drain::CommandDrain;
use crate::error::{GpuError, Result};
use crate::image::ImageView;
use crate::pool::ResourcePool;
use crate::task::Task;
use crate::timestamp::Timestamp;

/// A resource bound by an invocation, in task declaration order.
pub enum InvocationResource<'a> {
    Buffer(BufferView<'a>),
    Image(ImageView<'a>),
}

impl Task {
    /// Start building an invocation of this compute task.
    pub fn compute_invocation(&self) -> ComputeInvocationBuilder<'_> {
        ComputeInvocationBuilder {
            task: self,
            resources: Vec::new(),
            workgroup_count: [1, 1, 1],
            timed: false,
        }
    }
}

/// Builder for [`Invocation`].
pub struct ComputeInvocationBuilder<'a> {
    task: &'a Task,
    resources: Vec<InvocationResource<'a>>,
    workgroup_count: [u32; 3],
    timed: bool,
}

impl<'a> ComputeInvocationBuilder<'a> {
    /// Bind the next resource; order follows the task's resource-type list.
    pub fn resource(mut self, resource: impl Into<InvocationResource<'a>>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// Number of workgroups dispatched on each axis.
    pub fn workgroup_count(mut self, x: u32, y: u32, z: u32) -> Self {
        self.workgroup_count = [x, y, z];
        self
    }

    /// Bracket the dispatch with timestamps so `time_us` works.
    pub fn timed(mut self) -> Self {
        self.timed = true;
        self
    }

    pub fn build(self) -> Result<Invocation<'a>> {
        let pool = ResourcePool::new(self.task)?;
        for (i, resource) in self.resources.iter().enumerate() {
            match resource {
                InvocationResource::Buffer(buf_view) => pool.bind_buffer(i as u32, buf_view)?,
                InvocationResource::Image(img_view) => pool.bind_image(i as u32, img_view)?,
            }
        }
        let drain = CommandDrain::new(self.task.ctxt())?;
        let timestamps = if self.timed {
            Some((
                Timestamp::new(self.task.ctxt())?,
                Timestamp::new(self.task.ctxt())?,
            ))
        } else {
            None
        };
        Ok(Invocation {
            task: self.task,
            pool,
            drain,
            workgroup_count: self.workgroup_count,
            timestamps,
        })
    }
}

/// A submittable compute dispatch with its resources bound.
pub struct Invocation<'a> {
    task: &'a Task,
    pool: ResourcePool<'a>,
    drain: CommandDrain,
    workgroup_count: [u32; 3],
    timestamps: Option<(Timestamp, Timestamp)>,
}

impl Invocation<'_> {
    /// Submit the dispatch through the invocation's drain.
    pub fn submit(&mut self) -> Result<()> {
        let mut cmds: Vec<Command<'_>> = Vec::with_capacity(4);
        cmds.push(Command::SetSubmitType(SubmitType::Compute));
        if let Some((begin, _)) = &self.timestamps {
            cmds.push(Command::WriteTimestamp(begin));
        }
        cmds.push(Command::Dispatch {
            task: self.task,
            pool: &self.pool,
            workgroup_count: self.workgroup_count,
        });
        if let Some((_, end)) = &self.timestamps {
            cmds.push(Command::WriteTimestamp(end));
        }
        self.drain.submit(&cmds)
    }

    /// Wait for the last submission to complete.
    pub fn wait(&mut self) -> Result<()> {
        self.drain.wait()
    }

    /// Device time spent between the bracketing timestamps, in microseconds.
    /// Only available on timed invocations after a drained submission.
    pub fn time_us(&self) -> Result<f64> {
        let (begin, end) = self.timestamps.as_ref().ok_or_else(|| {
            GpuError::precondition("invocation was not built with timing enabled")
        })?;
        Ok(end.result_us()? - begin.result_us()?)
    }
}

impl<'a> From<BufferView<'a>> for InvocationResource<'a> {
    fn from(buf_view: BufferView<'a>) -> Self {
        Self::Buffer(buf_view)
    }
}

impl<'a> From<ImageView<'a>> for InvocationResource<'a> {
    fn from(img_view: ImageView<'a>) -> Self {
        Self::Image(img_view)
    }
}
