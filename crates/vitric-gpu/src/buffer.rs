//! GPU buffers: typed allocations with usage and host-access configs.

use crate::context::{select_memory_type, Context};
use crate::error::{GpuError, Result};
use crate::memory::MemoryAccess;
use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Roles a buffer may serve.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        /// Host-mapped source/target of transfer commands.
        const STAGING = 1 << 0;
        /// Uniform buffer.
        const UNIFORM = 1 << 1;
        /// Storage buffer.
        const STORAGE = 1 << 2;
        /// Vertex buffer.
        const VERTEX = 1 << 3;
        /// Index buffer.
        const INDEX = 1 << 4;
    }
}

impl BufferUsage {
    pub(crate) fn to_vk(self) -> vk::BufferUsageFlags {
        let mut usage = vk::BufferUsageFlags::empty();
        if self.contains(Self::STAGING) {
            usage |= vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::UNIFORM) {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::STORAGE) {
            usage |= vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::VERTEX) {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::INDEX) {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST;
        }
        usage
    }
}

/// Immutable buffer configuration.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub size: u64,
    pub usage: BufferUsage,
    pub host_access: MemoryAccess,
    pub label: String,
}

/// A device buffer and its backing memory.
pub struct Buffer {
    ctxt: Context,
    memory: vk::DeviceMemory,
    buf: vk::Buffer,
    config: BufferConfig,
}

impl Buffer {
    /// Start building a buffer on `ctxt`.
    pub fn builder(ctxt: &Context) -> BufferBuilder {
        BufferBuilder {
            ctxt: ctxt.clone(),
            size: 0,
            usage: BufferUsage::empty(),
            host_access: MemoryAccess::None,
            label: String::new(),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    pub fn size(&self) -> u64 {
        self.config.size
    }

    pub(crate) fn handle(&self) -> vk::Buffer {
        self.buf
    }

    /// View over the whole buffer.
    pub fn view(&self) -> BufferView<'_> {
        BufferView {
            buf: self,
            offset: 0,
            size: self.config.size,
        }
    }

    /// View over `[offset, offset + size)`.
    pub fn view_range(&self, offset: u64, size: u64) -> BufferView<'_> {
        BufferView {
            buf: self,
            offset,
            size,
        }
    }

    /// Map a sub-range of the backing memory. The mapping is released when
    /// the returned guard drops.
    pub fn map(&self, offset: u64, size: u64) -> Result<MappedBuffer<'_>> {
        let ptr = unsafe {
            self.ctxt.device().map_memory(
                self.memory,
                offset,
                size,
                vk::MemoryMapFlags::empty(),
            )?
        };
        tracing::debug!(
            "mapped buffer '{}' from {} to {}",
            self.config.label,
            offset,
            offset + size
        );
        Ok(MappedBuffer {
            buf: self,
            ptr: ptr.cast(),
            size: size as usize,
        })
    }

    /// Copy `src` into the buffer through a transient mapping.
    ///
    /// The buffer's host access must allow writes.
    pub fn write_bytes(&self, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            tracing::warn!("zero-sized copy is ignored");
            return Ok(());
        }
        if src.len() as u64 > self.config.size {
            return Err(GpuError::precondition(format!(
                "source does not fit buffer '{}' ({} > {})",
                self.config.label,
                src.len(),
                self.config.size
            )));
        }
        let mapped = self.map(0, src.len() as u64)?;
        mapped.as_slice_mut()[..src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Copy the first `size` bytes of the buffer out through a transient
    /// mapping.
    pub fn read_bytes(&self, size: usize) -> Result<Vec<u8>> {
        if size == 0 {
            tracing::warn!("zero-sized copy is ignored");
            return Ok(Vec::new());
        }
        if size as u64 > self.config.size {
            return Err(GpuError::precondition(format!(
                "read exceeds buffer '{}' ({} > {})",
                self.config.label,
                size,
                self.config.size
            )));
        }
        let mapped = self.map(0, size as u64)?;
        Ok(mapped.as_slice().to_vec())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.ctxt.device().destroy_buffer(self.buf, None);
            self.ctxt.device().free_memory(self.memory, None);
        }
        tracing::debug!("destroyed buffer '{}'", self.config.label);
    }
}

/// Builder for [`Buffer`].
pub struct BufferBuilder {
    ctxt: Context,
    size: u64,
    usage: BufferUsage,
    host_access: MemoryAccess,
    label: String,
}

impl BufferBuilder {
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn usage(mut self, usage: BufferUsage) -> Self {
        self.usage |= usage;
        self
    }

    pub fn staging(self) -> Self {
        self.usage(BufferUsage::STAGING)
    }

    pub fn uniform(self) -> Self {
        self.usage(BufferUsage::UNIFORM)
    }

    pub fn storage(self) -> Self {
        self.usage(BufferUsage::STORAGE)
    }

    pub fn vertex(self) -> Self {
        self.usage(BufferUsage::VERTEX)
    }

    pub fn index(self) -> Self {
        self.usage(BufferUsage::INDEX)
    }

    pub fn host_access(mut self, host_access: MemoryAccess) -> Self {
        self.host_access = host_access;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn build(self) -> Result<Buffer> {
        let ctxt = self.ctxt;
        if self.size == 0 {
            return Err(GpuError::precondition("cannot create a zero-sized buffer"));
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(self.size)
            .usage(self.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buf = unsafe { ctxt.device().create_buffer(&create_info, None)? };

        let requirements = unsafe { ctxt.device().get_buffer_memory_requirements(buf) };
        let memory_type_index = match select_memory_type(&ctxt, self.host_access, &requirements)
        {
            Ok(idx) => idx,
            Err(e) => {
                unsafe { ctxt.device().destroy_buffer(buf, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { ctxt.device().allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { ctxt.device().destroy_buffer(buf, None) };
                return Err(e.into());
            }
        };
        if let Err(e) = unsafe { ctxt.device().bind_buffer_memory(buf, memory, 0) } {
            unsafe {
                ctxt.device().destroy_buffer(buf, None);
                ctxt.device().free_memory(memory, None);
            }
            return Err(e.into());
        }

        tracing::debug!("created buffer '{}'", self.label);
        Ok(Buffer {
            ctxt,
            memory,
            buf,
            config: BufferConfig {
                size: self.size,
                usage: self.usage,
                host_access: self.host_access,
                label: self.label,
            },
        })
    }
}

/// Non-owning sub-range of a buffer.
#[derive(Clone, Copy)]
pub struct BufferView<'a> {
    pub buf: &'a Buffer,
    pub offset: u64,
    pub size: u64,
}

/// Scoped host mapping of buffer memory.
pub struct MappedBuffer<'a> {
    buf: &'a Buffer,
    ptr: *mut u8,
    size: usize,
}

impl MappedBuffer<'_> {
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn as_slice_mut(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }
}

impl Drop for MappedBuffer<'_> {
    fn drop(&mut self) {
        unsafe { self.buf.ctxt.device().unmap_memory(self.buf.memory) };
        tracing::debug!("unmapped buffer '{}'", self.buf.config.label);
    }
}
