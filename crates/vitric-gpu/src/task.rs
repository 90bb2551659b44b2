//! Tasks: compute and graphics pipelines with positionally declared
//! resources.
//!
//! A task's resource-type list drives three things: the descriptor-set
//! layout (binding index = list position), the descriptor-pool sizes a
//! matching [`ResourcePool`](crate::pool::ResourcePool) needs, and the
//! descriptor kind used when a pool binding is written.

use crate::context::Context;
use crate::error::{GpuError, Result};
use crate::format::PixelFormat;
use crate::pass::RenderPass;
use ash::vk;
use std::collections::BTreeMap;
use std::ffi::CString;

/// Kind of resource a task binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    UniformBuffer,
    StorageBuffer,
    /// Sampled through the context's default sampler.
    SampledImage,
    StorageImage,
}

impl ResourceType {
    pub(crate) fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}

/// Descriptor-pool sizes for a resource-type list: one entry per descriptor
/// type, counting its occurrences across bindings.
pub(crate) fn accumulate_pool_sizes(resource_types: &[ResourceType]) -> Vec<vk::DescriptorPoolSize> {
    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for rsc_ty in resource_types {
        *counts.entry(rsc_ty.descriptor_type().as_raw()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(ty, count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(ty),
            descriptor_count: count,
        })
        .collect()
}

/// Primitive topology of a graphics task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    Point,
    Line,
    #[default]
    Triangle,
}

impl Topology {
    fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            Self::Point => vk::PrimitiveTopology::POINT_LIST,
            Self::Line => vk::PrimitiveTopology::LINE_LIST,
            Self::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
        }
    }
}

/// Rate at which a vertex attribute advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertexInputRate {
    #[default]
    Vertex,
    /// Reserved; instanced input is not implemented.
    Instance,
}

/// One vertex attribute of a graphics task.
#[derive(Debug, Clone, Copy)]
pub struct VertexInput {
    pub format: PixelFormat,
    pub rate: VertexInputRate,
}

pub(crate) struct VertexInputLayout {
    pub(crate) binding: vk::VertexInputBindingDescription,
    pub(crate) attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Infer the vertex-input layout: attributes in declaration order at
/// location = index, all interleaved in binding 0, offsets as running sums
/// of the format sizes, stride as the total.
pub(crate) fn infer_vertex_input(inputs: &[VertexInput]) -> Result<VertexInputLayout> {
    let mut attributes = Vec::with_capacity(inputs.len());
    let mut offset = 0u32;
    for (i, input) in inputs.iter().enumerate() {
        if input.rate == VertexInputRate::Instance {
            return Err(GpuError::unsupported("instanced draw is currently unsupported"));
        }
        attributes.push(vk::VertexInputAttributeDescription {
            location: i as u32,
            binding: 0,
            format: input.format.to_vk()?,
            offset,
        });
        offset += input.format.size_bytes() as u32;
    }
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: offset,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    Ok(VertexInputLayout {
        binding,
        attributes,
    })
}

/// A compute or graphics pipeline plus everything needed to bind resources
/// to it.
pub struct Task {
    ctxt: Context,
    desc_set_layout: vk::DescriptorSetLayout,
    pipe_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    resource_types: Vec<ResourceType>,
    shader_modules: Vec<vk::ShaderModule>,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    label: String,
}

impl Task {
    /// Start building a compute task on `ctxt`.
    pub fn compute(ctxt: &Context) -> ComputeTaskBuilder {
        ComputeTaskBuilder {
            ctxt: ctxt.clone(),
            spirv: Vec::new(),
            entry_name: "main".to_string(),
            workgroup_size: [1, 1, 1],
            resource_types: Vec::new(),
            label: String::new(),
        }
    }

    /// Start building a graphics task against `pass`.
    pub fn graphics<'p>(pass: &'p RenderPass<'p>) -> GraphicsTaskBuilder<'p> {
        GraphicsTaskBuilder {
            pass,
            vert_spirv: Vec::new(),
            frag_spirv: Vec::new(),
            vert_entry_name: "main".to_string(),
            frag_entry_name: "main".to_string(),
            topology: Topology::default(),
            vertex_inputs: Vec::new(),
            resource_types: Vec::new(),
            label: String::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resource types in declaration order; pool binding indices follow it.
    pub fn resource_types(&self) -> &[ResourceType] {
        &self.resource_types
    }

    pub(crate) fn ctxt(&self) -> &Context {
        &self.ctxt
    }

    pub(crate) fn desc_set_layout(&self) -> vk::DescriptorSetLayout {
        self.desc_set_layout
    }

    pub(crate) fn pipe_layout(&self) -> vk::PipelineLayout {
        self.pipe_layout
    }

    pub(crate) fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub(crate) fn pool_sizes(&self) -> &[vk::DescriptorPoolSize] {
        &self.pool_sizes
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        let device = self.ctxt.device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            for &module in &self.shader_modules {
                device.destroy_shader_module(module, None);
            }
            device.destroy_pipeline_layout(self.pipe_layout, None);
            device.destroy_descriptor_set_layout(self.desc_set_layout, None);
        }
        tracing::debug!("destroyed task '{}'", self.label);
    }
}

/// Layouts shared by compute and graphics construction. Destroyed via
/// `destroy_on_error` if pipeline creation fails afterwards.
struct TaskLayouts {
    desc_set_layout: vk::DescriptorSetLayout,
    pipe_layout: vk::PipelineLayout,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl TaskLayouts {
    fn new(ctxt: &Context, resource_types: &[ResourceType]) -> Result<Self> {
        let sampler = ctxt.fast_sampler();
        let samplers = [sampler];
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = resource_types
            .iter()
            .enumerate()
            .map(|(i, rsc_ty)| {
                let mut binding = vk::DescriptorSetLayoutBinding::default()
                    .binding(i as u32)
                    .descriptor_type(rsc_ty.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(
                        vk::ShaderStageFlags::ALL_GRAPHICS | vk::ShaderStageFlags::COMPUTE,
                    );
                if *rsc_ty == ResourceType::SampledImage {
                    binding = binding.immutable_samplers(&samplers);
                }
                binding
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let desc_set_layout =
            unsafe { ctxt.device().create_descriptor_set_layout(&layout_info, None)? };

        let set_layouts = [desc_set_layout];
        let pipe_layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipe_layout =
            match unsafe { ctxt.device().create_pipeline_layout(&pipe_layout_info, None) } {
                Ok(layout) => layout,
                Err(e) => {
                    unsafe {
                        ctxt.device().destroy_descriptor_set_layout(desc_set_layout, None)
                    };
                    return Err(e.into());
                }
            };

        Ok(Self {
            desc_set_layout,
            pipe_layout,
            pool_sizes: accumulate_pool_sizes(resource_types),
        })
    }

    fn destroy_on_error(&self, ctxt: &Context, shader_modules: &[vk::ShaderModule]) {
        unsafe {
            for &module in shader_modules {
                ctxt.device().destroy_shader_module(module, None);
            }
            ctxt.device().destroy_pipeline_layout(self.pipe_layout, None);
            ctxt.device()
                .destroy_descriptor_set_layout(self.desc_set_layout, None);
        }
    }
}

fn create_shader_module(ctxt: &Context, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);
    Ok(unsafe { ctxt.device().create_shader_module(&create_info, None)? })
}

/// Builder for a compute [`Task`].
pub struct ComputeTaskBuilder {
    ctxt: Context,
    spirv: Vec<u32>,
    entry_name: String,
    workgroup_size: [u32; 3],
    resource_types: Vec<ResourceType>,
    label: String,
}

impl ComputeTaskBuilder {
    /// SPIR-V of the compute stage.
    pub fn spirv(mut self, spirv: impl Into<Vec<u32>>) -> Self {
        self.spirv = spirv.into();
        self
    }

    pub fn entry_name(mut self, entry_name: impl Into<String>) -> Self {
        self.entry_name = entry_name.into();
        self
    }

    /// Workgroup size delivered through specialization constants 0, 1, and 2;
    /// the shader declares `local_size_{x,y,z}_id = 0, 1, 2`.
    pub fn workgroup_size(mut self, x: u32, y: u32, z: u32) -> Self {
        self.workgroup_size = [x, y, z];
        self
    }

    /// Append a resource type; binding index = declaration order.
    pub fn resource(mut self, rsc_ty: ResourceType) -> Self {
        self.resource_types.push(rsc_ty);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn build(self) -> Result<Task> {
        let ctxt = self.ctxt;
        let layouts = TaskLayouts::new(&ctxt, &self.resource_types)?;
        let shader_module = match create_shader_module(&ctxt, &self.spirv) {
            Ok(module) => module,
            Err(e) => {
                layouts.destroy_on_error(&ctxt, &[]);
                return Err(e);
            }
        };

        let spec_entries = [
            vk::SpecializationMapEntry {
                constant_id: 0,
                offset: 0,
                size: 4,
            },
            vk::SpecializationMapEntry {
                constant_id: 1,
                offset: 4,
                size: 4,
            },
            vk::SpecializationMapEntry {
                constant_id: 2,
                offset: 8,
                size: 4,
            },
        ];
        let mut spec_data = [0u8; 12];
        for (dst, dim) in spec_data.chunks_exact_mut(4).zip(self.workgroup_size) {
            dst.copy_from_slice(&dim.to_ne_bytes());
        }
        let spec_info = vk::SpecializationInfo::default()
            .map_entries(&spec_entries)
            .data(&spec_data);

        let entry_name = CString::new(self.entry_name.as_str())
            .map_err(|_| GpuError::precondition("entry name contains a NUL byte"))?;
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(&entry_name)
            .specialization_info(&spec_info);

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(layouts.pipe_layout);

        let pipeline = match unsafe {
            ctxt.device().create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                layouts.destroy_on_error(&ctxt, &[shader_module]);
                return Err(e.into());
            }
        };

        tracing::debug!("created compute task '{}'", self.label);
        Ok(Task {
            ctxt,
            desc_set_layout: layouts.desc_set_layout,
            pipe_layout: layouts.pipe_layout,
            pipeline,
            resource_types: self.resource_types,
            shader_modules: vec![shader_module],
            pool_sizes: layouts.pool_sizes,
            label: self.label,
        })
    }
}

/// Builder for a graphics [`Task`].
pub struct GraphicsTaskBuilder<'p> {
    pass: &'p RenderPass<'p>,
    vert_spirv: Vec<u32>,
    frag_spirv: Vec<u32>,
    vert_entry_name: String,
    frag_entry_name: String,
    topology: Topology,
    vertex_inputs: Vec<VertexInput>,
    resource_types: Vec<ResourceType>,
    label: String,
}

impl GraphicsTaskBuilder<'_> {
    /// SPIR-V of the vertex stage.
    pub fn vert_spirv(mut self, spirv: impl Into<Vec<u32>>) -> Self {
        self.vert_spirv = spirv.into();
        self
    }

    /// SPIR-V of the fragment stage.
    pub fn frag_spirv(mut self, spirv: impl Into<Vec<u32>>) -> Self {
        self.frag_spirv = spirv.into();
        self
    }

    pub fn vert_entry_name(mut self, entry_name: impl Into<String>) -> Self {
        self.vert_entry_name = entry_name.into();
        self
    }

    pub fn frag_entry_name(mut self, entry_name: impl Into<String>) -> Self {
        self.frag_entry_name = entry_name.into();
        self
    }

    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Append a per-vertex attribute at the next location.
    pub fn vertex_input(mut self, format: PixelFormat) -> Self {
        self.vertex_inputs.push(VertexInput {
            format,
            rate: VertexInputRate::Vertex,
        });
        self
    }

    /// Append a vertex attribute with an explicit rate.
    pub fn vertex_input_rate(mut self, format: PixelFormat, rate: VertexInputRate) -> Self {
        self.vertex_inputs.push(VertexInput { format, rate });
        self
    }

    /// Append a resource type; binding index = declaration order.
    pub fn resource(mut self, rsc_ty: ResourceType) -> Self {
        self.resource_types.push(rsc_ty);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn build(self) -> Result<Task> {
        let ctxt = self.pass.ctxt().clone();
        let layouts = TaskLayouts::new(&ctxt, &self.resource_types)?;

        let vert_module = match create_shader_module(&ctxt, &self.vert_spirv) {
            Ok(module) => module,
            Err(e) => {
                layouts.destroy_on_error(&ctxt, &[]);
                return Err(e);
            }
        };
        let frag_module = match create_shader_module(&ctxt, &self.frag_spirv) {
            Ok(module) => module,
            Err(e) => {
                layouts.destroy_on_error(&ctxt, &[vert_module]);
                return Err(e);
            }
        };
        let modules = [vert_module, frag_module];

        let vertex_layout = match infer_vertex_input(&self.vertex_inputs) {
            Ok(layout) => layout,
            Err(e) => {
                layouts.destroy_on_error(&ctxt, &modules);
                return Err(e);
            }
        };

        let vert_entry = CString::new(self.vert_entry_name.as_str())
            .map_err(|_| GpuError::precondition("entry name contains a NUL byte"))?;
        let frag_entry = CString::new(self.frag_entry_name.as_str())
            .map_err(|_| GpuError::precondition("entry name contains a NUL byte"))?;
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(&vert_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(&frag_entry),
        ];

        let bindings = [vertex_layout.binding];
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&vertex_layout.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology.to_vk())
            .primitive_restart_enable(false);

        let pass_viewport = self.pass.viewport();
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: pass_viewport.extent.width as f32,
            height: pass_viewport.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let viewports = [viewport];
        let scissors = [pass_viewport];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default();

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layouts.pipe_layout)
            .render_pass(self.pass.handle())
            .subpass(0);

        let pipeline = match unsafe {
            ctxt.device().create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                layouts.destroy_on_error(&ctxt, &modules);
                return Err(e.into());
            }
        };

        tracing::debug!("created graphics task '{}'", self.label);
        Ok(Task {
            ctxt,
            desc_set_layout: layouts.desc_set_layout,
            pipe_layout: layouts.pipe_layout,
            pipeline,
            resource_types: self.resource_types,
            shader_modules: modules.to_vec(),
            pool_sizes: layouts.pool_sizes,
            label: self.label,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ScalarKind;

    #[test]
    fn pool_sizes_total_per_descriptor_type() {
        let rsc_tys = [
            ResourceType::SampledImage,
            ResourceType::StorageBuffer,
            ResourceType::StorageBuffer,
            ResourceType::UniformBuffer,
            ResourceType::StorageImage,
            ResourceType::StorageBuffer,
        ];
        let sizes = accumulate_pool_sizes(&rsc_tys);
        // One entry per descriptor kind, counts matching the multiset.
        assert_eq!(sizes.len(), 4);
        let count_of = |ty: vk::DescriptorType| {
            sizes
                .iter()
                .find(|s| s.ty == ty)
                .map(|s| s.descriptor_count)
                .unwrap()
        };
        assert_eq!(count_of(vk::DescriptorType::STORAGE_BUFFER), 3);
        assert_eq!(count_of(vk::DescriptorType::UNIFORM_BUFFER), 1);
        assert_eq!(count_of(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), 1);
        assert_eq!(count_of(vk::DescriptorType::STORAGE_IMAGE), 1);
    }

    #[test]
    fn empty_resource_list_has_no_pool_sizes() {
        assert!(accumulate_pool_sizes(&[]).is_empty());
    }

    #[test]
    fn vertex_offsets_are_running_sums() {
        let inputs = [
            VertexInput {
                format: PixelFormat::R32G32B32_SFLOAT,
                rate: VertexInputRate::Vertex,
            },
            VertexInput {
                format: PixelFormat::new(2, ScalarKind::Sfloat32),
                rate: VertexInputRate::Vertex,
            },
            VertexInput {
                format: PixelFormat::R8G8B8A8_UNORM,
                rate: VertexInputRate::Vertex,
            },
        ];
        let layout = infer_vertex_input(&inputs).unwrap();
        assert_eq!(layout.binding.binding, 0);
        assert_eq!(layout.binding.stride, 12 + 8 + 4);
        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20]);
        let locations: Vec<u32> = layout.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
        assert!(layout.attributes.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn instance_rate_is_unsupported() {
        let inputs = [VertexInput {
            format: PixelFormat::R32G32_SFLOAT,
            rate: VertexInputRate::Instance,
        }];
        assert!(matches!(
            infer_vertex_input(&inputs),
            Err(GpuError::Unsupported(_))
        ));
    }
}
