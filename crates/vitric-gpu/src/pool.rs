//! Resource pools: one descriptor set sized for exactly one task.

use crate::buffer::BufferView;
use crate::error::{GpuError, Result};
use crate::image::ImageView;
use crate::task::{ResourceType, Task};
use ash::vk;

/// A descriptor pool holding the single descriptor set of its owning task.
///
/// Bindings are indexed `[0..N)` in the order the task declared its resource
/// types. A task with no resources yields an empty pool that allocates no
/// Vulkan objects.
pub struct ResourcePool<'a> {
    task: &'a Task,
    desc_pool: vk::DescriptorPool,
    desc_set: vk::DescriptorSet,
}

impl<'a> ResourcePool<'a> {
    /// Allocate a pool and set sized by `task`'s precomputed pool sizes.
    pub fn new(task: &'a Task) -> Result<Self> {
        if task.pool_sizes().is_empty() {
            tracing::debug!("created resource pool with no entry");
            return Ok(Self {
                task,
                desc_pool: vk::DescriptorPool::null(),
                desc_set: vk::DescriptorSet::null(),
            });
        }

        let device = task.ctxt().device();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(task.pool_sizes());
        let desc_pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        let set_layouts = [task.desc_set_layout()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(desc_pool)
            .set_layouts(&set_layouts);
        let desc_set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe { device.destroy_descriptor_pool(desc_pool, None) };
                return Err(e.into());
            }
        };

        tracing::debug!("created resource pool");
        Ok(Self {
            task,
            desc_pool,
            desc_set,
        })
    }

    pub(crate) fn desc_set(&self) -> vk::DescriptorSet {
        self.desc_set
    }

    pub(crate) fn task(&self) -> &'a Task {
        self.task
    }

    fn resource_type_at(&self, idx: u32) -> Result<ResourceType> {
        if self.desc_pool == vk::DescriptorPool::null() {
            return Err(GpuError::precondition("cannot bind to empty resource pool"));
        }
        self.task
            .resource_types()
            .get(idx as usize)
            .copied()
            .ok_or_else(|| {
                GpuError::precondition(format!(
                    "binding index {idx} exceeds task '{}' resource list",
                    self.task.label()
                ))
            })
    }

    /// Bind a buffer view at `idx`. The descriptor kind comes from the
    /// task's resource-type list and must be a buffer kind.
    pub fn bind_buffer(&self, idx: u32, buf_view: &BufferView<'_>) -> Result<()> {
        let descriptor_type = match self.resource_type_at(idx)? {
            ResourceType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            ResourceType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            rsc_ty => {
                return Err(GpuError::precondition(format!(
                    "binding {idx} of task '{}' is {rsc_ty:?}, not a buffer",
                    self.task.label()
                )))
            }
        };

        let buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(buf_view.buf.handle())
            .offset(buf_view.offset)
            .range(buf_view.size);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.desc_set)
            .dst_binding(idx)
            .dst_array_element(0)
            .descriptor_type(descriptor_type)
            .buffer_info(std::slice::from_ref(&buffer_info));
        unsafe {
            self.task.ctxt().device().update_descriptor_sets(&[write], &[]);
        }
        tracing::debug!(
            "bound pool resource #{idx} to buffer '{}'",
            buf_view.buf.config().label
        );
        Ok(())
    }

    /// Bind an image view at `idx`. Storage images bind in `GENERAL` layout,
    /// sampled images in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn bind_image(&self, idx: u32, img_view: &ImageView<'_>) -> Result<()> {
        let (descriptor_type, layout) = match self.resource_type_at(idx)? {
            ResourceType::SampledImage => (
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            ResourceType::StorageImage => {
                (vk::DescriptorType::STORAGE_IMAGE, vk::ImageLayout::GENERAL)
            }
            rsc_ty => {
                return Err(GpuError::precondition(format!(
                    "binding {idx} of task '{}' is {rsc_ty:?}, not an image",
                    self.task.label()
                )))
            }
        };

        let image_info = vk::DescriptorImageInfo::default()
            .image_view(img_view.img.view_handle()?)
            .image_layout(layout);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.desc_set)
            .dst_binding(idx)
            .dst_array_element(0)
            .descriptor_type(descriptor_type)
            .image_info(std::slice::from_ref(&image_info));
        unsafe {
            self.task.ctxt().device().update_descriptor_sets(&[write], &[]);
        }
        tracing::debug!(
            "bound pool resource #{idx} to image '{}'",
            img_view.img.config().label
        );
        Ok(())
    }
}

impl Drop for ResourcePool<'_> {
    fn drop(&mut self) {
        if self.desc_pool != vk::DescriptorPool::null() {
            unsafe {
                self.task
                    .ctxt()
                    .device()
                    .destroy_descriptor_pool(self.desc_pool, None);
            }
            tracing::debug!("destroyed resource pool");
        }
    }
}
