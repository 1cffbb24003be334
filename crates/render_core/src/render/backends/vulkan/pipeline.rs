//! Pipeline, descriptor and render pass operations of the Vulkan device

use ash::vk;
use std::ffi::CStr;
use std::fs::File;
use std::path::Path;

use super::context::{VulkanError, VulkanResult};
use super::conversions;
use super::device::{
    lookup, raw_handle, table_key, VulkanDescriptorSet, VulkanDevice, VulkanPipeline, VulkanRenderPass,
};
use crate::render::api::*;

const ENTRY_POINT: &[u8] = b"main\0";

/// Stages every push-constant range is visible to
const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

fn load_module(device: &ash::Device, path: &Path) -> VulkanResult<vk::ShaderModule> {
    let shader_load = |source| VulkanError::ShaderLoad {
        path: path.display().to_string(),
        source,
    };
    let mut file = File::open(path).map_err(shader_load)?;
    let code = ash::util::read_spv(&mut file).map_err(shader_load)?;
    log::debug!("Loaded {} SPIR-V words from {}", code.len(), path.display());

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
    unsafe { device.create_shader_module(&create_info, None).map_err(VulkanError::Api) }
}

/// Load/store behaviour and layouts of one attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttachmentOps {
    load: vk::AttachmentLoadOp,
    store: vk::AttachmentStoreOp,
    initial: vk::ImageLayout,
    final_layout: vk::ImageLayout,
}

/// Cleared attachments start undefined; loaded ones start in their attachment layout
fn colour_ops(desc: &RenderPassDesc) -> AttachmentOps {
    let clear = desc.clear_flags.contains(ClearFlags::COLOR);
    AttachmentOps {
        load: if clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        },
        store: vk::AttachmentStoreOp::STORE,
        initial: if clear {
            vk::ImageLayout::UNDEFINED
        } else {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        },
        final_layout: if desc.present_after {
            vk::ImageLayout::PRESENT_SRC_KHR
        } else {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        },
    }
}

fn depth_ops(desc: &RenderPassDesc) -> AttachmentOps {
    let clear = desc.clear_flags.contains(ClearFlags::DEPTH);
    AttachmentOps {
        load: if clear {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        },
        store: if desc.has_next_pass {
            vk::AttachmentStoreOp::STORE
        } else {
            vk::AttachmentStoreOp::DONT_CARE
        },
        initial: if clear {
            vk::ImageLayout::UNDEFINED
        } else {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        },
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    }
}

/// A resolved descriptor update whose info arrays outlive the write structs
enum ResolvedWrite {
    Buffer(u32, [vk::DescriptorBufferInfo; 1]),
    Images(u32, Vec<vk::DescriptorImageInfo>),
}

impl VulkanDevice {
    fn resolve_write(&self, write: &DescriptorWrite) -> VulkanResult<ResolvedWrite> {
        match write {
            DescriptorWrite::UniformBuffer {
                binding,
                buffer,
                offset,
                range,
            } => {
                let entry = lookup(&self.buffers, "buffer", buffer.0)?;
                Ok(ResolvedWrite::Buffer(
                    *binding,
                    [vk::DescriptorBufferInfo {
                        buffer: entry.alloc.buffer,
                        offset: *offset,
                        range: *range,
                    }],
                ))
            }
            DescriptorWrite::Samplers { binding, images } => {
                let infos = images
                    .iter()
                    .map(|bound| {
                        let texture = lookup(&self.textures, "texture", bound.texture.0)?;
                        let sampler = *lookup(&self.samplers, "sampler", bound.sampler.0)?;
                        Ok(vk::DescriptorImageInfo {
                            sampler,
                            image_view: texture.view(),
                            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        })
                    })
                    .collect::<VulkanResult<Vec<_>>>()?;
                Ok(ResolvedWrite::Images(*binding, infos))
            }
        }
    }

    fn build_pipeline(
        &self,
        desc: &PipelineDesc,
        modules: &[(vk::ShaderStageFlags, vk::ShaderModule)],
        layout: vk::PipelineLayout,
    ) -> VulkanResult<vk::Pipeline> {
        let render_pass = lookup(&self.passes, "render pass", desc.renderpass.0)?.pass;
        let entry = CStr::from_bytes_with_nul(ENTRY_POINT)
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let stages: Vec<_> = modules
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage)
                    .module(module)
                    .name(entry)
                    .build()
            })
            .collect();

        let attributes = desc
            .attributes
            .iter()
            .map(|attribute| {
                let format = conversions::attribute_format(attribute.kind).ok_or_else(|| {
                    VulkanError::invalid(format!(
                        "pipeline '{}': {:?} is not a vertex attribute format",
                        desc.name, attribute.kind
                    ))
                })?;
                Ok(vk::VertexInputAttributeDescription {
                    location: attribute.location,
                    binding: 0,
                    format,
                    offset: attribute.offset,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;
        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(conversions::cull_mode(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let colour_blend = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()];
        let colour_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&colour_blend);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&colour_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, e)| VulkanError::Api(e))?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid("pipeline creation returned nothing"))
    }
}

impl PipelineDevice for VulkanDevice {
    fn min_uniform_alignment(&self) -> u64 {
        self.context
            .physical
            .properties
            .limits
            .min_uniform_buffer_offset_alignment
            .max(1)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> BackendResult<PipelineHandle> {
        let set_layouts = desc
            .set_layouts
            .iter()
            .map(|layout| lookup(&self.layouts, "descriptor set layout", layout.0).copied())
            .collect::<VulkanResult<Vec<_>>>()?;
        let push_ranges: Vec<_> = desc
            .push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: PUSH_CONSTANT_STAGES,
                offset: range.offset,
                size: range.size,
            })
            .collect();

        let device = self.raw().clone();
        let mut modules = Vec::with_capacity(desc.stages.len());
        for stage in &desc.stages {
            match load_module(&device, &stage.path) {
                Ok(module) => modules.push((conversions::shader_stage(stage.stage), module)),
                Err(e) => {
                    for (_, module) in modules {
                        unsafe { device.destroy_shader_module(module, None) };
                    }
                    return Err(e.into());
                }
            }
        }

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let built = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(VulkanError::Api)
            .and_then(|layout| match self.build_pipeline(desc, &modules, layout) {
                Ok(pipeline) => Ok((pipeline, layout)),
                Err(e) => {
                    unsafe { device.destroy_pipeline_layout(layout, None) };
                    Err(e)
                }
            });

        for (_, module) in modules {
            unsafe { device.destroy_shader_module(module, None) };
        }
        let (pipeline, layout) = built?;
        log::debug!("Created pipeline '{}'", desc.name);

        let key = self.pipelines.insert(VulkanPipeline {
            pipeline,
            layout,
            push_stages: PUSH_CONSTANT_STAGES,
        });
        Ok(PipelineHandle(raw_handle(key)))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        match self.pipelines.remove(table_key(pipeline.0)) {
            Some(entry) => unsafe {
                self.raw().destroy_pipeline(entry.pipeline, None);
                self.raw().destroy_pipeline_layout(entry.layout, None);
            },
            None => log::warn!("destroy_pipeline: unknown {}", pipeline),
        }
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> BackendResult<()> {
        let cb = self.command_buffer()?;
        let raw = lookup(&self.pipelines, "pipeline", pipeline.0)?.pipeline;
        unsafe { self.raw().cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, raw) };
        Ok(())
    }

    fn create_descriptor_pool(&mut self, desc: &DescriptorPoolDesc) -> BackendResult<DescriptorPoolHandle> {
        let sizes: Vec<_> = [
            (vk::DescriptorType::UNIFORM_BUFFER, desc.uniform_buffers),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, desc.samplers),
        ]
        .into_iter()
        .filter(|&(_, count)| count > 0)
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
        .collect();
        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .pool_sizes(&sizes)
            .max_sets(desc.max_sets);
        let pool = unsafe { self.raw().create_descriptor_pool(&info, None).map_err(VulkanError::Api)? };
        Ok(DescriptorPoolHandle(raw_handle(self.pools.insert(pool))))
    }

    fn destroy_descriptor_pool(&mut self, pool: DescriptorPoolHandle) {
        let key = table_key(pool.0);
        match self.pools.remove(key) {
            Some(raw) => {
                self.sets.retain(|_, set| set.pool != key);
                unsafe { self.raw().destroy_descriptor_pool(raw, None) };
            }
            None => log::warn!("destroy_descriptor_pool: unknown {}", pool),
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let raw_bindings: Vec<_> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(conversions::descriptor_type(binding.kind))
                    .descriptor_count(binding.count)
                    .stage_flags(conversions::shader_stages(binding.stages))
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&raw_bindings);
        let layout = unsafe {
            self.raw()
                .create_descriptor_set_layout(&info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(DescriptorSetLayoutHandle(raw_handle(self.layouts.insert(layout))))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        match self.layouts.remove(table_key(layout.0)) {
            Some(raw) => unsafe { self.raw().destroy_descriptor_set_layout(raw, None) },
            None => log::warn!("destroy_descriptor_set_layout: unknown {}", layout),
        }
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> BackendResult<Vec<DescriptorSetHandle>> {
        let pool_key = table_key(pool.0);
        let raw_pool = *lookup(&self.pools, "descriptor pool", pool.0)?;
        let raw_layout = *lookup(&self.layouts, "descriptor set layout", layout.0)?;
        let layouts = vec![raw_layout; count as usize];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(raw_pool)
            .set_layouts(&layouts);

        let sets = match unsafe { self.raw().allocate_descriptor_sets(&info) } {
            Ok(sets) => sets,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                return Err(RenderError::ResourceExhausted {
                    kind: "descriptor set",
                    capacity: count as usize,
                });
            }
            Err(e) => return Err(VulkanError::Api(e).into()),
        };
        Ok(sets
            .into_iter()
            .map(|set| {
                let key = self.sets.insert(VulkanDescriptorSet { set, pool: pool_key });
                DescriptorSetHandle(raw_handle(key))
            })
            .collect())
    }

    fn free_descriptor_sets(&mut self, pool: DescriptorPoolHandle, sets: &[DescriptorSetHandle]) -> BackendResult<()> {
        let pool_key = table_key(pool.0);
        let raw_pool = *lookup(&self.pools, "descriptor pool", pool.0)?;
        let mut raw_sets = Vec::with_capacity(sets.len());
        for handle in sets {
            match self.sets.get(table_key(handle.0)) {
                Some(entry) if entry.pool == pool_key => raw_sets.push(entry.set),
                Some(_) => {
                    return Err(VulkanError::invalid(format!("{handle} was not allocated from {pool}")).into());
                }
                None => return Err(VulkanError::ResourceNotFound { kind: "descriptor set", id: handle.0 }.into()),
            }
        }
        for handle in sets {
            self.sets.remove(table_key(handle.0));
        }
        unsafe {
            self.raw()
                .free_descriptor_sets(raw_pool, &raw_sets)
                .map_err(VulkanError::Api)?;
        }
        Ok(())
    }

    fn write_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) -> BackendResult<()> {
        let raw_set = lookup(&self.sets, "descriptor set", set.0)?.set;
        let resolved = writes
            .iter()
            .map(|write| self.resolve_write(write))
            .collect::<VulkanResult<Vec<_>>>()?;

        let raw_writes: Vec<_> = resolved
            .iter()
            .filter_map(|write| {
                let builder = vk::WriteDescriptorSet::builder().dst_set(raw_set).dst_array_element(0);
                match write {
                    ResolvedWrite::Buffer(binding, info) => Some(
                        builder
                            .dst_binding(*binding)
                            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                            .buffer_info(info)
                            .build(),
                    ),
                    ResolvedWrite::Images(_, infos) if infos.is_empty() => None,
                    ResolvedWrite::Images(binding, infos) => Some(
                        builder
                            .dst_binding(*binding)
                            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                            .image_info(infos)
                            .build(),
                    ),
                }
            })
            .collect();
        unsafe { self.raw().update_descriptor_sets(&raw_writes, &[]) };
        Ok(())
    }

    fn bind_descriptor_set(
        &mut self,
        pipeline: PipelineHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) -> BackendResult<()> {
        let cb = self.command_buffer()?;
        let layout = lookup(&self.pipelines, "pipeline", pipeline.0)?.layout;
        let raw_set = lookup(&self.sets, "descriptor set", set.0)?.set;
        unsafe {
            self.raw().cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[raw_set],
                &[],
            );
        }
        Ok(())
    }

    fn push_constants(&mut self, pipeline: PipelineHandle, offset: u32, data: &[u8]) -> BackendResult<()> {
        let cb = self.command_buffer()?;
        let entry = lookup(&self.pipelines, "pipeline", pipeline.0)?;
        unsafe {
            self.raw()
                .cmd_push_constants(cb, entry.layout, entry.push_stages, offset, data);
        }
        Ok(())
    }
}

impl PassDevice for VulkanDevice {
    fn create_renderpass(&mut self, desc: &RenderPassDesc) -> BackendResult<RenderPassHandle> {
        let colour = colour_ops(desc);
        let mut attachments = vec![vk::AttachmentDescription::builder()
            .format(self.color_format())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(colour.load)
            .store_op(colour.store)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(colour.initial)
            .final_layout(colour.final_layout)
            .build()];

        if desc.depth_attachment {
            let depth = depth_ops(desc);
            let stencil_load = if desc.clear_flags.contains(ClearFlags::STENCIL) {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            };
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(self.context.physical.depth_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(depth.load)
                    .store_op(depth.store)
                    .stencil_load_op(stencil_load)
                    .stencil_store_op(depth.store)
                    .initial_layout(depth.initial)
                    .final_layout(depth.final_layout)
                    .build(),
            );
        }

        let colour_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&colour_refs);
        if desc.depth_attachment {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .build()];

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let pass = unsafe { self.raw().create_render_pass(&info, None).map_err(VulkanError::Api)? };
        log::debug!("Created render pass '{}'", desc.name);

        let key = self.passes.insert(VulkanRenderPass {
            pass,
            clear_color: desc.clear_color,
            depth: desc.depth_attachment,
        });
        Ok(RenderPassHandle(raw_handle(key)))
    }

    fn destroy_renderpass(&mut self, pass: RenderPassHandle) {
        match self.passes.remove(table_key(pass.0)) {
            Some(entry) => unsafe { self.raw().destroy_render_pass(entry.pass, None) },
            None => log::warn!("destroy_renderpass: unknown {}", pass),
        }
    }

    fn create_render_target(
        &mut self,
        pass: RenderPassHandle,
        attachments: &[TextureHandle],
        width: u32,
        height: u32,
    ) -> BackendResult<RenderTargetHandle> {
        let raw_pass = lookup(&self.passes, "render pass", pass.0)?.pass;
        let views = attachments
            .iter()
            .map(|texture| lookup(&self.textures, "texture", texture.0).map(|entry| entry.view()))
            .collect::<VulkanResult<Vec<_>>>()?;
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(raw_pass)
            .attachments(&views)
            .width(width)
            .height(height)
            .layers(1);
        let framebuffer = unsafe { self.raw().create_framebuffer(&info, None).map_err(VulkanError::Api)? };
        Ok(RenderTargetHandle(raw_handle(self.targets.insert(framebuffer))))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        match self.targets.remove(table_key(target.0)) {
            Some(framebuffer) => unsafe { self.raw().destroy_framebuffer(framebuffer, None) },
            None => log::warn!("destroy_render_target: unknown {}", target),
        }
    }

    fn window_attachment(&self, image_index: u32) -> BackendResult<TextureHandle> {
        Ok(self.window_texture(image_index)?)
    }

    fn depth_attachment(&self) -> BackendResult<TextureHandle> {
        Ok(self.depth_texture()?)
    }

    fn begin_renderpass(
        &mut self,
        pass: RenderPassHandle,
        target: RenderTargetHandle,
        area: RenderArea,
    ) -> BackendResult<()> {
        let cb = self.command_buffer()?;
        let entry = lookup(&self.passes, "render pass", pass.0)?;
        let framebuffer = *lookup(&self.targets, "render target", target.0)?;

        let mut clear_values = vec![vk::ClearValue {
            color: vk::ClearColorValue {
                float32: entry.clear_color,
            },
        }];
        if entry.depth {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        }
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(entry.pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: area.x, y: area.y },
                extent: vk::Extent2D {
                    width: area.width,
                    height: area.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.raw()
                .cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    fn end_renderpass(&mut self, pass: RenderPassHandle) -> BackendResult<()> {
        let cb = self.command_buffer()?;
        lookup(&self.passes, "render pass", pass.0)?;
        unsafe { self.raw().cmd_end_render_pass(cb) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(flags: ClearFlags, present_after: bool, has_next_pass: bool) -> RenderPassDesc {
        RenderPassDesc {
            name: "test".to_string(),
            clear_color: [0.0; 4],
            clear_flags: flags,
            depth_attachment: true,
            has_prev_pass: false,
            has_next_pass,
            present_after,
        }
    }

    #[test]
    fn test_cleared_colour_starts_undefined() {
        let ops = colour_ops(&pass(ClearFlags::COLOR, false, true));
        assert_eq!(ops.load, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(ops.initial, vk::ImageLayout::UNDEFINED);
        assert_eq!(ops.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_loaded_colour_keeps_contents() {
        let ops = colour_ops(&pass(ClearFlags::empty(), true, false));
        assert_eq!(ops.load, vk::AttachmentLoadOp::LOAD);
        assert_eq!(ops.initial, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(ops.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_depth_stored_only_for_later_passes() {
        let ops = depth_ops(&pass(ClearFlags::DEPTH | ClearFlags::STENCIL, false, true));
        assert_eq!(ops.load, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(ops.store, vk::AttachmentStoreOp::STORE);

        let ops = depth_ops(&pass(ClearFlags::empty(), false, false));
        assert_eq!(ops.load, vk::AttachmentLoadOp::LOAD);
        assert_eq!(ops.store, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(ops.initial, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn test_push_constant_stages() {
        assert!(PUSH_CONSTANT_STAGES.contains(vk::ShaderStageFlags::VERTEX));
        assert!(PUSH_CONSTANT_STAGES.contains(vk::ShaderStageFlags::FRAGMENT));
    }
}
