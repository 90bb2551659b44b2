//! Thin Vulkan abstraction layer for the Vitric toolkit.
//!
//! This crate provides:
//! - Process-wide instance initialization and device enumeration
//! - Contexts with per-submit-type queue allocation and memory-type ranking
//! - Buffers and images with host mapping
//! - Compute and graphics tasks with positional resource binding
//! - A command recorder lowering abstract commands to command buffers, with
//!   automatic queue switching and barrier derivation
//! - Drains and reusable transactions for submission
//! - One-slot device timestamps

mod barrier;
pub mod buffer;
pub mod command;
pub mod context;
pub mod drain;
pub mod error;
pub mod format;
pub mod image;
pub mod instance;
pub mod invocation;
pub mod memory;
pub mod pass;
pub mod pool;
mod recorder;
pub mod task;
pub mod timestamp;

pub use buffer::{Buffer, BufferBuilder, BufferConfig, BufferUsage, BufferView, MappedBuffer};
pub use command::Command;
pub use context::{Context, ContextBuilder, SubmitType};
pub use drain::{CommandDrain, Transaction};
pub use error::{GpuError, Result};
pub use format::{PixelFormat, ScalarKind};
pub use image::{Image, ImageBuilder, ImageConfig, ImageUsage, ImageView, MappedImage};
pub use instance::{describe_device, device_count, initialize};
pub use invocation::{ComputeInvocationBuilder, Invocation, InvocationResource};
pub use memory::MemoryAccess;
pub use pass::{RenderPass, RenderPassBuilder};
pub use pool::ResourcePool;
pub use task::{ResourceType, Task, Topology, VertexInput, VertexInputRate};
pub use timestamp::Timestamp;

pub use ash;
