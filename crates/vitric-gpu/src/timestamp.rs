//! Device timestamps.

use crate::context::Context;
use crate::error::{GpuError, Result};
use ash::vk;

/// A one-slot timestamp query pool.
///
/// Written by [`Command::WriteTimestamp`](crate::command::Command) and read
/// back scaled to microseconds.
pub struct Timestamp {
    ctxt: Context,
    query_pool: vk::QueryPool,
}

impl Timestamp {
    /// Create a timestamp. Fails `Unsupported` when the device cannot write
    /// timestamps on its compute and graphics queues.
    pub fn new(ctxt: &Context) -> Result<Self> {
        if !ctxt.supports_timestamps() {
            return Err(GpuError::unsupported(
                "device does not support timestamps on compute and graphics queues",
            ));
        }
        let pool_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(1);
        let query_pool = unsafe { ctxt.device().create_query_pool(&pool_info, None)? };
        tracing::debug!("created timestamp");
        Ok(Self {
            ctxt: ctxt.clone(),
            query_pool,
        })
    }

    pub(crate) fn query_pool(&self) -> vk::QueryPool {
        self.query_pool
    }

    /// Read the timestamp in microseconds, waiting for availability.
    pub fn result_us(&self) -> Result<f64> {
        let mut ticks = [0u64; 1];
        unsafe {
            self.ctxt
                .device()
                .get_query_pool_results(
                    self.query_pool,
                    0,
                    &mut ticks,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
                .map_err(|e| {
                    if e == vk::Result::NOT_READY {
                        GpuError::NotReady
                    } else {
                        e.into()
                    }
                })?;
        }
        let ns_per_tick = self.ctxt.timestamp_period();
        Ok(ticks[0] as f64 * ns_per_tick / 1000.0)
    }
}

impl Drop for Timestamp {
    fn drop(&mut self) {
        unsafe {
            self.ctxt.device().destroy_query_pool(self.query_pool, None);
        }
        tracing::debug!("destroyed timestamp");
    }
}
