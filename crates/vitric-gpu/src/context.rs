//! GPU context: logical device, queues, memory ranking, default sampler.

use crate::error::{GpuError, Result};
use crate::instance;
use crate::memory::{MemoryAccess, MemoryTypeRanks};
use ash::vk;
use std::collections::BTreeMap;
use std::ffi::CStr;
use std::sync::Arc;

/// Capability class a command requires from its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitType {
    /// Inherit the current recording's submit type.
    Any,
    /// Requires a graphics-capable queue.
    Graphics,
    /// Requires a compute-capable queue.
    Compute,
}

/// Queue binding for one submit type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContextSubmitDetail {
    pub(crate) submit_type: SubmitType,
    pub(crate) queue_family_index: u32,
    pub(crate) queue: vk::Queue,
}

struct SubmitTypeRequirement {
    submit_type: SubmitType,
    queue_flags: vk::QueueFlags,
    name: &'static str,
    commands: &'static [&'static str],
}

const SUBMIT_TYPE_REQUIREMENTS: &[SubmitTypeRequirement] = &[
    SubmitTypeRequirement {
        submit_type: SubmitType::Graphics,
        queue_flags: vk::QueueFlags::GRAPHICS,
        name: "GRAPHICS",
        commands: &["Draw", "DrawIndexed", "BeginRenderPass", "EndRenderPass"],
    },
    SubmitTypeRequirement {
        submit_type: SubmitType::Compute,
        queue_flags: vk::QueueFlags::COMPUTE,
        name: "COMPUTE",
        commands: &["Dispatch"],
    },
];

/// Pick a queue family for each submit type.
///
/// Families are grouped by the set-bit count of their capability mask and
/// scanned from the most capable group down, so one family can service
/// multiple submit types and cross-queue synchronization stays minimal. A
/// submit type with no qualifying family maps to `None`.
fn allocate_queue_families(
    qfam_props: &[vk::QueueFamilyProperties],
) -> Vec<(SubmitType, Option<u32>)> {
    // set-bit count -> families carrying that many capability bits.
    let mut by_bit_count: BTreeMap<u32, Vec<(u32, vk::QueueFlags)>> = BTreeMap::new();
    for (i, props) in qfam_props.iter().enumerate() {
        if props.queue_count == 0 {
            tracing::warn!("ignored queue family #{i} with zero queue count");
            continue;
        }
        tracing::debug!(
            "discovered queue family #{i}: {:?}",
            props.queue_flags
        );
        by_bit_count
            .entry(props.queue_flags.as_raw().count_ones())
            .or_default()
            .push((i as u32, props.queue_flags));
    }

    SUBMIT_TYPE_REQUIREMENTS
        .iter()
        .map(|req| {
            let picked = by_bit_count
                .values()
                .rev()
                .flatten()
                .find(|(_, flags)| flags.contains(req.queue_flags))
                .map(|&(idx, _)| idx);
            if picked.is_none() {
                tracing::warn!(
                    "cannot find a suitable queue family for {}, the following \
                     commands won't be available: {}",
                    req.name,
                    req.commands.join(", ")
                );
            }
            (req.submit_type, picked)
        })
        .collect()
}

pub(crate) struct ContextInner {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    submit_details: Vec<ContextSubmitDetail>,
    memory_ranks: MemoryTypeRanks,
    fast_sampler: vk::Sampler,
    label: String,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_sampler(self.fast_sampler, None);
            self.device.destroy_device(None);
        }
        tracing::debug!("destroyed vulkan context '{}'", self.label);
    }
}

/// Handle to a logical device and its queues.
///
/// Cheap to clone; every resource holds one so the device strictly outlives
/// it. Recording is single-threaded per recording; a context may be shared
/// across host threads only while their recordings are disjoint.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Start building a context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub(crate) fn device(&self) -> &ash::Device {
        &self.inner.device
    }

    pub(crate) fn fast_sampler(&self) -> vk::Sampler {
        self.inner.fast_sampler
    }

    pub(crate) fn memory_ranks(&self) -> &MemoryTypeRanks {
        &self.inner.memory_ranks
    }

    pub(crate) fn physical_device(&self) -> vk::PhysicalDevice {
        self.inner.physical_device
    }

    /// Queue binding for a concrete submit type; `Unsupported` when the
    /// device offered no qualifying family at construction.
    pub(crate) fn submit_detail(&self, submit_type: SubmitType) -> Result<ContextSubmitDetail> {
        self.inner
            .submit_details
            .iter()
            .find(|d| d.submit_type == submit_type)
            .copied()
            .ok_or_else(|| {
                GpuError::unsupported(format!(
                    "no queue family supports {submit_type:?} submissions"
                ))
            })
    }

    /// Nanoseconds per timestamp tick.
    pub(crate) fn timestamp_period(&self) -> f64 {
        self.inner.properties.limits.timestamp_period as f64
    }

    pub(crate) fn supports_timestamps(&self) -> bool {
        self.inner.properties.limits.timestamp_compute_and_graphics == vk::TRUE
    }

    /// Debug label given at construction.
    pub fn label(&self) -> &str {
        &self.inner.label
    }
}

/// Builder for [`Context`].
pub struct ContextBuilder {
    device_index: usize,
    label: String,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            device_index: 0,
            label: String::new(),
        }
    }
}

impl ContextBuilder {
    /// Select the physical device by enumeration index.
    pub fn device_index(mut self, index: usize) -> Self {
        self.device_index = index;
        self
    }

    /// Attach a debug label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Create the logical device, allocate queues, rank memory types, and
    /// create the default sampler.
    pub fn build(self) -> Result<Context> {
        let global = instance::global()?;
        let physical_device = *global
            .physical_devices
            .get(self.device_index)
            .ok_or_else(|| {
                GpuError::precondition(format!(
                    "wanted vulkan device does not exist (#{} of {} available devices)",
                    self.device_index,
                    global.physical_devices.len()
                ))
            })?;
        let inst = &global.instance;

        let features = unsafe { inst.get_physical_device_features(physical_device) };
        let properties = unsafe { inst.get_physical_device_properties(physical_device) };

        if properties.limits.timestamp_compute_and_graphics == vk::FALSE {
            tracing::warn!(
                "context '{}' device does not support timestamps, the following \
                 command won't be available: WriteTimestamp",
                self.label
            );
        }

        let qfam_props =
            unsafe { inst.get_physical_device_queue_family_properties(physical_device) };
        if qfam_props.is_empty() {
            return Err(GpuError::unsupported(format!(
                "cannot find any queue family on device #{}",
                self.device_index
            )));
        }
        let queue_allocs = allocate_queue_families(&qfam_props);

        // One queue per allocated family, shared by every submit type that
        // mapped to it.
        let mut unique_families: Vec<u32> = queue_allocs
            .iter()
            .filter_map(|&(_, qfam_idx)| qfam_idx)
            .collect();
        unique_families.sort_unstable();
        unique_families.dedup();

        let queue_priority = 1.0_f32;
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(std::slice::from_ref(&queue_priority))
            })
            .collect();

        // Enable every extension the device offers.
        let ext_props =
            unsafe { inst.enumerate_device_extension_properties(physical_device)? };
        let ext_names: Vec<*const i8> = ext_props
            .iter()
            .map(|p| p.extension_name.as_ptr())
            .collect();
        if tracing::enabled!(tracing::Level::DEBUG) {
            let names: Vec<_> = ext_props
                .iter()
                .filter_map(|p| {
                    unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }.to_str().ok()
                })
                .collect();
            tracing::debug!("enabled device extensions: {}", names.join(", "));
        }

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&ext_names)
            .enabled_features(&features);

        let device =
            unsafe { inst.create_device(physical_device, &device_create_info, None)? };

        let submit_details = queue_allocs
            .iter()
            .filter_map(|&(submit_type, qfam_idx)| {
                let queue_family_index = qfam_idx?;
                let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
                Some(ContextSubmitDetail {
                    submit_type,
                    queue_family_index,
                    queue,
                })
            })
            .collect();

        let mem_props =
            unsafe { inst.get_physical_device_memory_properties(physical_device) };
        let memory_ranks = MemoryTypeRanks::new(&mem_props);

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .unnormalized_coordinates(false);
        let fast_sampler = unsafe { device.create_sampler(&sampler_info, None)? };

        tracing::debug!(
            "created vulkan context '{}' on device #{}: {}",
            self.label,
            self.device_index,
            global.device_descs[self.device_index]
        );
        Ok(Context {
            inner: Arc::new(ContextInner {
                device,
                physical_device,
                properties,
                submit_details,
                memory_ranks,
                fast_sampler,
                label: self.label,
            }),
        })
    }
}

/// Memory-type selection for resource allocation.
pub(crate) fn select_memory_type(
    ctxt: &Context,
    host_access: MemoryAccess,
    requirements: &vk::MemoryRequirements,
) -> Result<u32> {
    ctxt.memory_ranks()
        .select(host_access, requirements.memory_type_bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_most_capable_family() {
        // A combined graphics+compute+transfer family should service both
        // submit types even when dedicated families exist.
        let fams = [
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                1,
            ),
            family(vk::QueueFlags::TRANSFER, 4),
        ];
        let allocs = allocate_queue_families(&fams);
        assert_eq!(allocs, vec![
            (SubmitType::Graphics, Some(1)),
            (SubmitType::Compute, Some(1)),
        ]);
    }

    #[test]
    fn compute_only_device_lacks_graphics() {
        let fams = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 1)];
        let allocs = allocate_queue_families(&fams);
        assert_eq!(allocs, vec![
            (SubmitType::Graphics, None),
            (SubmitType::Compute, Some(0)),
        ]);
    }

    #[test]
    fn zero_count_families_are_skipped() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 0),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];
        let allocs = allocate_queue_families(&fams);
        assert_eq!(allocs, vec![
            (SubmitType::Graphics, Some(1)),
            (SubmitType::Compute, Some(1)),
        ]);
    }
}
