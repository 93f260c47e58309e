//! D3D12 renderable: shader blobs, upload-heap buffers, a pipeline state
//! object and a bundle executed from the frame's command list.

use std::collections::BTreeMap;
use std::ffi::c_void;

use windows::core::s;
use windows::Win32::Graphics::Direct3D::{
    D3D_PRIMITIVE_TOPOLOGY, D3D_PRIMITIVE_TOPOLOGY_3_CONTROL_POINT_PATCHLIST,
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::error::{DriverError, DriverResult};
use crate::renderable::{
    PipelineDescriptor, Renderable, RenderableInputs, RenderableStatus, TargetFormats,
};
use crate::shader::{ShaderStage, CSO_SUFFIX};
use crate::types::Vertex;

use super::device::{create_upload_buffer, BACK_BUFFER_FORMAT};

struct UploadBuffer {
    resource: ID3D12Resource,
    size: u32,
}

impl UploadBuffer {
    fn new(device: &ID3D12Device, data: &[u8]) -> DriverResult<Self> {
        let size = u32::try_from(data.len())
            .map_err(|_| DriverError::InvalidRenderable(format!("{} byte buffer", data.len())))?;
        Ok(Self {
            resource: create_upload_buffer(device, data)?,
            size,
        })
    }

    fn address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }
}

pub struct Dx12Renderable {
    device: ID3D12Device,
    root_signature: ID3D12RootSignature,
    bundle_allocator: ID3D12CommandAllocator,
    targets: TargetFormats,
    inputs: RenderableInputs,
    stages: BTreeMap<ShaderStage, Vec<u8>>,
    vertex_buffer: Option<UploadBuffer>,
    index_buffer: Option<UploadBuffer>,
    /// Pipeline state and the bundle drawing with it.
    baked: Option<(ID3D12PipelineState, ID3D12GraphicsCommandList)>,
}

impl Dx12Renderable {
    pub fn new(
        device: ID3D12Device,
        root_signature: ID3D12RootSignature,
        bundle_allocator: ID3D12CommandAllocator,
        targets: TargetFormats,
    ) -> Self {
        Self {
            device,
            root_signature,
            bundle_allocator,
            targets,
            inputs: RenderableInputs::default(),
            stages: BTreeMap::new(),
            vertex_buffer: None,
            index_buffer: None,
            baked: None,
        }
    }

    /// Bundle to execute from the frame's command list.
    pub fn bundle(&self) -> Option<&ID3D12GraphicsCommandList> {
        match self.inputs.status() {
            RenderableStatus::Built => self.baked.as_ref().map(|(_, bundle)| bundle),
            _ => None,
        }
    }

    fn bytecode(&self, stage: ShaderStage) -> D3D12_SHADER_BYTECODE {
        match self.stages.get(&stage) {
            Some(code) => D3D12_SHADER_BYTECODE {
                pShaderBytecode: code.as_ptr() as *const c_void,
                BytecodeLength: code.len(),
            },
            None => D3D12_SHADER_BYTECODE::default(),
        }
    }

    fn create_pipeline_state(&self) -> DriverResult<ID3D12PipelineState> {
        let input_elements = [
            D3D12_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: Vertex::POSITION_OFFSET,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D12_INPUT_ELEMENT_DESC {
                SemanticName: s!("COLOR"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32B32A32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: Vertex::COLOR_OFFSET,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];

        let mut blend = D3D12_BLEND_DESC::default();
        blend.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: false.into(),
            LogicOpEnable: false.into(),
            SrcBlend: D3D12_BLEND_ONE,
            DestBlend: D3D12_BLEND_ZERO,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_ONE,
            DestBlendAlpha: D3D12_BLEND_ZERO,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        };

        let topology_type = if self.inputs.tessellated() {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH
        } else {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE
        };

        let mut desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as u32,
            },
            // Borrowed without an AddRef; the descriptor never releases it.
            pRootSignature: unsafe { std::mem::transmute_copy(&self.root_signature) },
            VS: self.bytecode(ShaderStage::Vertex),
            PS: self.bytecode(ShaderStage::Fragment),
            GS: self.bytecode(ShaderStage::Geometry),
            HS: self.bytecode(ShaderStage::TessellationControl),
            DS: self.bytecode(ShaderStage::TessellationEvaluation),
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: D3D12_CULL_MODE_NONE,
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            BlendState: blend,
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: false.into(),
                StencilEnable: false.into(),
                ..Default::default()
            },
            SampleMask: u32::MAX,
            PrimitiveTopologyType: topology_type,
            NumRenderTargets: 1,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };
        desc.RTVFormats[0] = BACK_BUFFER_FORMAT;

        unsafe { self.device.CreateGraphicsPipelineState(&desc) }
            .map_err(|e| DriverError::creation("pipeline state", e))
    }

    fn record_bundle(&self, pso: &ID3D12PipelineState) -> DriverResult<ID3D12GraphicsCommandList> {
        let vertex_buffer = self
            .vertex_buffer
            .as_ref()
            .ok_or_else(|| DriverError::InvalidRenderable("no vertices set".into()))?;

        let bundle: ID3D12GraphicsCommandList = unsafe {
            self.device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_BUNDLE,
                &self.bundle_allocator,
                pso,
            )
        }
        .map_err(|e| DriverError::creation("command bundle", e))?;

        let topology: D3D_PRIMITIVE_TOPOLOGY = if self.inputs.tessellated() {
            D3D_PRIMITIVE_TOPOLOGY_3_CONTROL_POINT_PATCHLIST
        } else {
            D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST
        };
        let vertex_view = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: vertex_buffer.address(),
            SizeInBytes: vertex_buffer.size,
            StrideInBytes: Vertex::STRIDE,
        };

        unsafe {
            bundle.SetGraphicsRootSignature(&self.root_signature);
            bundle.IASetPrimitiveTopology(topology);
            bundle.IASetVertexBuffers(0, Some(&[vertex_view]));
            match (&self.index_buffer, self.inputs.index_count()) {
                (Some(indices), Some(count)) => {
                    let index_view = D3D12_INDEX_BUFFER_VIEW {
                        BufferLocation: indices.address(),
                        SizeInBytes: indices.size,
                        Format: DXGI_FORMAT_R16_UINT,
                    };
                    bundle.IASetIndexBuffer(Some(&index_view));
                    bundle.DrawIndexedInstanced(count, 1, 0, 0, 0);
                }
                _ => bundle.DrawInstanced(self.inputs.vertex_count(), 1, 0, 0),
            }
            bundle
                .Close()
                .map_err(|e| DriverError::creation("command bundle", e))?;
        }
        Ok(bundle)
    }
}

impl Renderable for Dx12Renderable {
    fn shader_suffix(&self) -> &'static str {
        CSO_SUFFIX
    }

    fn attach_shader_bytecode(&mut self, bytecode: &[u8], stage: ShaderStage) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        if bytecode.is_empty() {
            return Err(DriverError::InvalidRenderable(format!(
                "empty bytecode for {:?} stage",
                stage
            )));
        }
        self.stages.insert(stage, bytecode.to_vec());
        self.inputs.record_shader(stage, bytecode);
        Ok(())
    }

    fn set_vertices(&mut self, vertices: &[Vertex]) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        self.inputs.record_vertices(vertices.len())?;
        let buffer = UploadBuffer::new(&self.device, bytemuck::cast_slice(vertices))
            .map_err(|e| self.inputs.fail(e))?;
        self.vertex_buffer = Some(buffer);
        Ok(())
    }

    fn set_indices(&mut self, indices: &[u16]) -> DriverResult<()> {
        self.inputs.ensure_usable()?;
        self.index_buffer = match self.inputs.record_indices(indices.len())? {
            Some(_) => Some(
                UploadBuffer::new(&self.device, bytemuck::cast_slice(indices))
                    .map_err(|e| self.inputs.fail(e))?,
            ),
            None => None,
        };
        Ok(())
    }

    fn build(&mut self) -> DriverResult<()> {
        self.inputs.validate()?;
        self.baked = None;

        let baked = self
            .create_pipeline_state()
            .and_then(|pso| self.record_bundle(&pso).map(|bundle| (pso, bundle)))
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
