//! GPU error types.

use ash::vk;
use thiserror::Error;

/// Errors surfaced by the HAL.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The device cannot provide a required capability (queue family, memory
    /// type, pixel format, timestamp support).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The caller violated an API precondition (illegal barrier combination,
    /// zero-sized copy, nested inline transaction, ...).
    #[error("precondition violated: {0}")]
    PreconditionViolated(String),

    /// Wrapped driver error. `vk::Result`'s `Display` is the stable
    /// stringified kind (ERROR_OUT_OF_DEVICE_MEMORY, ERROR_DEVICE_LOST, ...).
    #[error("vulkan error: {0}")]
    Backend(#[from] vk::Result),

    /// A query result was fetched before the device signaled it.
    #[error("result not ready")]
    NotReady,
}

impl GpuError {
    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!("{msg}");
        Self::Unsupported(msg)
    }

    /// Precondition violations are fatal in debug builds; release builds
    /// surface them as recoverable errors.
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if cfg!(debug_assertions) {
            panic!("{msg}");
        }
        tracing::error!("{msg}");
        Self::PreconditionViolated(msg)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
