//! Vulkan renderable: shader modules, host buffers, a graphics pipeline and
//! a secondary command buffer replayed inside the frame's render pass.

use std::collections::BTreeMap;
use std::ffi::CStr;
use std::io::Cursor;
use std::sync::Arc;

use ash::vk;

use crate::error::{DriverError, DriverResult};
use crate::renderable::{
    PipelineDescriptor, Renderable, RenderableInputs, RenderableStatus, TargetFormats,
};
use crate::shader::{ShaderStage, SPIRV_SUFFIX};
use crate::types::Vertex;

use super::conversion::shader_stage_to_vk;
use super::device::{HostBuffer, VulkanDevice};

/// Entry point of every stage, matching `shader::ENTRY_POINT`.
const SHADER_ENTRY: &CStr = c"main";

/// The pipeline and the recorded draw, destroyed together.
struct BakedDraw {
    device: Arc<VulkanDevice>,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    commands: vk::CommandBuffer,
}

impl Drop for BakedDraw {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                self.device
                    .device
                    .destroy_pipeline_layout(self.layout, None);
            }
        }
        if self.commands != vk::CommandBuffer::null() {
            self.device.free_command_buffer(self.commands);
        }
    }
}

struct ShaderModule {
    device: Arc<VulkanDevice>,
    module: vk::ShaderModule,
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

pub struct VulkanRenderable {
    device: Arc<VulkanDevice>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    targets: TargetFormats,
    inputs: RenderableInputs,
    stages: BTreeMap<ShaderStage, ShaderModule>,
    vertex_buffer: Option<HostBuffer>,
    index_buffer: Option<HostBuffer>,
    baked: Option<BakedDraw>,
}

impl VulkanRenderable {
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        targets: TargetFormats,
    ) -> Self {
        Self {
            device,
            render_pass,
            extent,
            targets,
            inputs: RenderableInputs::default(),
            stages: BTreeMap::new(),
            vertex_buffer: None,
            index_buffer: None,
            baked: None,
        }
    }

    /// Secondary command buffer to execute inside the frame's render pass.
    pub fn commands(&self) -> Option<vk::CommandBuffer> {
        match self.inputs.status() {
            RenderableStatus::Built => self.baked.as_ref().map(|b| b.commands),
            _ => None,
        }
    }

    fn create_pipeline(&self, baked: &mut BakedDraw) -> DriverResult<()> {
        let device = &self.device.device;

        let layout_info = vk::PipelineLayoutCreateInfo::default();
        baked.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| DriverError::creation("pipeline layout", format!("{:?}", e)))?;

        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = self
            .stages
            .iter()
            .map(|(&stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader_stage_to_vk(stage))
                    .module(module.module)
                    .name(SHADER_ENTRY)
            })
            .collect();

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: Vertex::STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: Vertex::POSITION_OFFSET,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: Vertex::COLOR_OFFSET,
            },
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let tessellated = self.inputs.tessellated();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(if tessellated {
                vk::PrimitiveTopology::PATCH_LIST
            } else {
                vk::PrimitiveTopology::TRIANGLE_LIST
            })
            .primitive_restart_enable(false);
        let tessellation =
            vk::PipelineTessellationStateCreateInfo::default().patch_control_points(3);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_infos)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(baked.layout)
            .render_pass(self.render_pass)
            .subpass(0);
        if tessellated {
            pipeline_info = pipeline_info.tessellation_state(&tessellation);
        }

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_, e)| DriverError::creation("graphics pipeline", format!("{:?}", e)))?;
        baked.pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::creation("graphics pipeline", "none created"))?;
        Ok(())
    }

    fn record_draw(&self, baked: &mut BakedDraw) -> DriverResult<()> {
        let device = &self.device.device;
        let vertex_buffer = self
            .vertex_buffer
            .as_ref()
            .ok_or_else(|| DriverError::InvalidRenderable("no vertices set".into()))?;

        baked.commands = self
            .device
            .allocate_command_buffer(vk::CommandBufferLevel::SECONDARY)?;

        let inheritance = vk::CommandBufferInheritanceInfo::default()
            .render_pass(self.render_pass)
            .subpass(0);
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .inheritance_info(&inheritance);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };

        let cmd = baked.commands;
        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| DriverError::creation("draw commands", format!("{:?}", e)))?;
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, baked.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer.buffer], &[0]);
            match (&self.index_buffer, self.inputs.index_count()) {
                (Some(indices), Some(count)) => {
                    device.cmd_bind_index_buffer(cmd, indices.buffer, 0, vk::IndexType::UINT16);
                    device.cmd_draw_indexed(cmd, count, 1, 0, 0, 0);
                }
                _ => device.cmd_draw(cmd, self.inputs.vertex_count(), 1, 0, 0),
            }
            device
                .end_command_buffer(cmd)
                .map_err(|e| DriverError::creation("draw commands", format!("{:?}", e)))?;
        }
        Ok(())
    }
}

impl Renderable for VulkanRenderable {
    fn shader_suffix(&self) -> &'static str {
        SPIRV_SUFFIX
    }

    fn attach_shader_bytecode(&mut self, bytecode: &[u8], stage: ShaderStage) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        self.device.stages.check(stage)?;
        let code = ash::util::read_spv(&mut Cursor::new(bytecode)).map_err(|e| {
            DriverError::InvalidRenderable(format!("invalid SPIR-V for {:?} stage: {}", stage, e))
        })?;
        if code.is_empty() {
            return Err(DriverError::InvalidRenderable(format!(
                "empty bytecode for {:?} stage",
                stage
            )));
        }

        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { self.device.device.create_shader_module(&info, None) }
            .map_err(|e| {
                self.inputs
                    .fail(DriverError::creation("shader module", format!("{:?}", e)))
            })?;
        self.stages.insert(
            stage,
            ShaderModule {
                device: self.device.clone(),
                module,
            },
        );
        self.inputs.record_shader(stage, bytecode);
        Ok(())
    }

    fn set_vertices(&mut self, vertices: &[Vertex]) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        self.inputs.record_vertices(vertices.len())?;
        let buffer = HostBuffer::with_data(
            &self.device,
            "vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
        )
        .map_err(|e| self.inputs.fail(e))?;
        self.vertex_buffer = Some(buffer);
        Ok(())
    }

    fn set_indices(&mut self, indices: &[u16]) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        self.index_buffer = match self.inputs.record_indices(indices.len())? {
            Some(_) => Some(
                HostBuffer::with_data(
                    &self.device,
                    "index buffer",
                    vk::BufferUsageFlags::INDEX_BUFFER,
                    bytemuck::cast_slice(indices),
                )
                .map_err(|e| self.inputs.fail(e))?,
            ),
            None => None,
        };
        Ok(())
    }

    fn build(&mut self) -> DriverResult<()> {
        self.inputs.validate()?;
        self.baked = None;

        let mut baked = BakedDraw {
            device: self.device.clone(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            commands: vk::CommandBuffer::null(),
        };
        self.create_pipeline(&mut baked)
            .and_then(|()| self.record_draw(&mut baked))
            .map_err(|e| self.inputs.fail(e))?;
        self.baked = Some(baked);

        let descriptor = self.inputs.describe(self.targets);
        self.inputs.finish_build(descriptor);
        Ok(())
    }

    fn status(&self) -> RenderableStatus {
        self.inputs.status()
    }

    fn pipeline_descriptor(&self) -> Option<&PipelineDescriptor> {
        self.inputs.descriptor()
    }
}
