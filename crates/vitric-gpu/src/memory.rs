//! Memory-type ranking by host-access pattern.
//!
//! Each host-access class gets a rank-ordered list of memory-type indices.
//! Resource allocation walks the list for its class and picks the first type
//! whose bit is set in the resource's `memoryTypeBits`.

use crate::error::{GpuError, Result};
use ash::vk;

/// How host code intends to access a resource's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryAccess {
    /// Device-only; the host never maps it.
    #[default]
    None,
    /// Host reads what the device wrote.
    ReadOnly,
    /// Host writes what the device reads.
    WriteOnly,
    /// Host reads and writes.
    ReadWrite,
}

impl MemoryAccess {
    pub(crate) const COUNT: usize = 4;

    pub(crate) fn index(self) -> usize {
        match self {
            Self::None => 0,
            Self::ReadOnly => 1,
            Self::WriteOnly => 2,
            Self::ReadWrite => 3,
        }
    }
}

const DL: vk::Flags = vk::MemoryPropertyFlags::DEVICE_LOCAL.as_raw();
const HV: vk::Flags = vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw();
const HC: vk::Flags = vk::MemoryPropertyFlags::HOST_CACHED.as_raw();
const HCO: vk::Flags = vk::MemoryPropertyFlags::HOST_COHERENT.as_raw();

// Best-first tables; entry i maps to priority len - i.
const READ_ONLY_LUT: [vk::Flags; 6] = [
    HV | HC | HCO,
    HV | HC,
    HV | HCO,
    DL | HV | HCO,
    DL | HV | HC,
    DL | HV | HC | HCO,
];
const WRITE_ONLY_LUT: [vk::Flags; 6] = [
    DL | HV | HCO,
    DL | HV | HC | HCO,
    DL | HV | HC,
    HV | HCO,
    HV | HC | HCO,
    HV | HC,
];
const READ_WRITE_LUT: [vk::Flags; 6] = [
    DL | HV | HC | HCO,
    DL | HV | HCO,
    DL | HV | HC,
    HV | HCO,
    HV | HC | HCO,
    HV | HC,
];

/// Priority of a memory type for a host-access pattern. Higher is better.
///
/// The lookup is an exact match on the property flags; a type carrying any
/// flag outside its class's table ranks zero.
fn memory_priority(host_access: MemoryAccess, props: vk::MemoryPropertyFlags) -> u32 {
    let lut: &[vk::Flags] = match host_access {
        MemoryAccess::None => {
            return u32::from(props.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));
        }
        MemoryAccess::ReadOnly => &READ_ONLY_LUT,
        MemoryAccess::WriteOnly => &WRITE_ONLY_LUT,
        MemoryAccess::ReadWrite => &READ_WRITE_LUT,
    };
    match lut.iter().position(|&flags| props.as_raw() == flags) {
        Some(i) => (lut.len() - i) as u32,
        None => 0,
    }
}

/// Rank-ordered memory-type index lists, one per [`MemoryAccess`] class.
#[derive(Debug, Clone)]
pub(crate) struct MemoryTypeRanks {
    by_host_access: [Vec<u32>; MemoryAccess::COUNT],
}

impl MemoryTypeRanks {
    pub(crate) fn new(mem_props: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let classes = [
            MemoryAccess::None,
            MemoryAccess::ReadOnly,
            MemoryAccess::WriteOnly,
            MemoryAccess::ReadWrite,
        ];
        let by_host_access = classes.map(|class| {
            let mut idxs: Vec<u32> = (0..mem_props.memory_type_count).collect();
            // Stable sort keeps the device's type order among equal ranks.
            idxs.sort_by_key(|&i| {
                std::cmp::Reverse(memory_priority(
                    class,
                    mem_props.memory_types[i as usize].property_flags,
                ))
            });
            idxs
        });
        Self { by_host_access }
    }

    /// First ranked type for `host_access` whose bit is set in
    /// `memory_type_bits`, or `Unsupported`.
    pub(crate) fn select(&self, host_access: MemoryAccess, memory_type_bits: u32) -> Result<u32> {
        self.by_host_access[host_access.index()]
            .iter()
            .copied()
            .find(|&i| (1 << i) & memory_type_bits != 0)
            .ok_or_else(|| {
                GpuError::unsupported(format!(
                    "no memory type satisfies host access pattern {host_access:?}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_props(type_flags: &[vk::Flags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: type_flags.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in type_flags.iter().enumerate() {
            props.memory_types[i].property_flags = vk::MemoryPropertyFlags::from_raw(flags);
        }
        props
    }

    #[test]
    fn device_only_prefers_device_local() {
        let props = mem_props(&[HV | HCO, DL]);
        let ranks = MemoryTypeRanks::new(&props);
        assert_eq!(ranks.select(MemoryAccess::None, 0b11).unwrap(), 1);
    }

    #[test]
    fn readback_prefers_cached_over_device_local() {
        let props = mem_props(&[DL, DL | HV | HCO, HV | HC | HCO]);
        let ranks = MemoryTypeRanks::new(&props);
        assert_eq!(ranks.select(MemoryAccess::ReadOnly, 0b111).unwrap(), 2);
    }

    #[test]
    fn upload_prefers_device_local_coherent() {
        let props = mem_props(&[HV | HCO, DL | HV | HCO, DL]);
        let ranks = MemoryTypeRanks::new(&props);
        assert_eq!(ranks.select(MemoryAccess::WriteOnly, 0b111).unwrap(), 1);
    }

    #[test]
    fn selection_respects_requirement_mask() {
        let props = mem_props(&[DL | HV | HCO, HV | HCO]);
        let ranks = MemoryTypeRanks::new(&props);
        // Type 0 ranks higher for uploads but is masked out.
        assert_eq!(ranks.select(MemoryAccess::WriteOnly, 0b10).unwrap(), 1);
    }

    #[test]
    fn unmappable_heap_fails_host_access() {
        let props = mem_props(&[DL]);
        let ranks = MemoryTypeRanks::new(&props);
        // The only type is masked out by the requirement bits.
        assert!(matches!(
            ranks.select(MemoryAccess::ReadOnly, 0b10),
            Err(GpuError::Unsupported(_))
        ));
    }
}
