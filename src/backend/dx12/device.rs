//! D3D12 object creation helpers.

use std::ffi::c_void;
use std::mem::ManuallyDrop;

use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND};
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::CreateEventW;

use crate::error::{DriverError, DriverResult};
use crate::gpu::Gpu;

/// Back buffer format of every swapchain.
pub const BACK_BUFFER_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;

/// Upper bound D3D12 places on sampler anisotropy.
pub const MAX_ANISOTROPY: f32 = D3D12_MAX_MAXANISOTROPY as f32;

pub fn describe_adapter(adapter: &IDXGIAdapter1, id: u32) -> DriverResult<Gpu> {
    let desc = unsafe { adapter.GetDesc1() }
        .map_err(|e| DriverError::LoaderUnavailable(format!("adapter description: {}", e)))?;
    let len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    let name = String::from_utf16_lossy(&desc.Description[..len]);
    let software = (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0;

    Ok(Gpu::new(
        id,
        &name,
        Gpu::megabytes(desc.DedicatedVideoMemory as u64),
        desc.VendorId,
        desc.DeviceId,
        software,
    ))
}

pub fn create_device(adapter: &IDXGIAdapter1) -> DriverResult<ID3D12Device> {
    let mut device: Option<ID3D12Device> = None;
    unsafe { D3D12CreateDevice(adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }
        .map_err(|e| DriverError::creation("device", e))?;
    device.ok_or_else(|| DriverError::creation("device", "no device returned"))
}

pub fn create_command_queue(device: &ID3D12Device) -> DriverResult<ID3D12CommandQueue> {
    let desc = D3D12_COMMAND_QUEUE_DESC {
        Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
        Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
        ..Default::default()
    };
    unsafe { device.CreateCommandQueue(&desc) }.map_err(|e| DriverError::creation("command queue", e))
}

pub fn create_swapchain(
    factory: &IDXGIFactory4,
    queue: &ID3D12CommandQueue,
    hwnd: HWND,
    buffer_count: u32,
) -> DriverResult<IDXGISwapChain3> {
    let desc = DXGI_SWAP_CHAIN_DESC1 {
        BufferCount: buffer_count,
        // Zero extent takes the window's client size.
        Width: 0,
        Height: 0,
        Format: BACK_BUFFER_FORMAT,
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        ..Default::default()
    };
    let swapchain: IDXGISwapChain1 =
        unsafe { factory.CreateSwapChainForHwnd(queue, hwnd, &desc, None, None) }
            .map_err(|e| DriverError::creation("swapchain", e))?;
    swapchain
        .cast::<IDXGISwapChain3>()
        .map_err(|e| DriverError::creation("swapchain", e))
}

pub fn create_command_allocator(
    device: &ID3D12Device,
    kind: D3D12_COMMAND_LIST_TYPE,
) -> DriverResult<ID3D12CommandAllocator> {
    unsafe { device.CreateCommandAllocator(kind) }
        .map_err(|e| DriverError::creation("command allocator", e))
}

/// A root signature with no parameters, input assembler enabled.
pub fn create_root_signature(device: &ID3D12Device) -> DriverResult<ID3D12RootSignature> {
    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: 0,
        pParameters: std::ptr::null(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    let mut signature: Option<ID3DBlob> = None;
    let mut error: Option<ID3DBlob> = None;
    unsafe {
        D3D12SerializeRootSignature(
            &desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut signature,
            Some(&mut error),
        )
    }
    .map_err(|e| DriverError::creation("root signature", e))?;
    let signature =
        signature.ok_or_else(|| DriverError::creation("root signature", "empty blob"))?;

    unsafe {
        device.CreateRootSignature(
            0,
            std::slice::from_raw_parts(
                signature.GetBufferPointer() as *const u8,
                signature.GetBufferSize(),
            ),
        )
    }
    .map_err(|e| DriverError::creation("root signature", e))
}

/// A buffer on the upload heap holding `data`.
pub fn create_upload_buffer(device: &ID3D12Device, data: &[u8]) -> DriverResult<ID3D12Resource> {
    let heap_props = D3D12_HEAP_PROPERTIES {
        Type: D3D12_HEAP_TYPE_UPLOAD,
        CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
        MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
        CreationNodeMask: 1,
        VisibleNodeMask: 1,
    };
    let buffer_desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Alignment: 0,
        Width: data.len() as u64,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: D3D12_RESOURCE_FLAG_NONE,
    };

    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device.CreateCommittedResource(
            &heap_props,
            D3D12_HEAP_FLAG_NONE,
            &buffer_desc,
            D3D12_RESOURCE_STATE_GENERIC_READ,
            None,
            &mut resource,
        )
    }
    .map_err(|e| DriverError::creation("upload buffer", e))?;
    let resource = resource.ok_or_else(|| DriverError::creation("upload buffer", "none created"))?;

    unsafe {
        let mut mapped: *mut c_void = std::ptr::null_mut();
        resource
            .Map(0, None, Some(&mut mapped))
            .map_err(|e| DriverError::creation("upload buffer", e))?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), mapped as *mut u8, data.len());
        resource.Unmap(0, None);
    }
    Ok(resource)
}

pub fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // Borrowed without an AddRef; the barrier never releases it.
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

/// Win32 event signalled by the fence.
pub struct FenceEvent(pub HANDLE);

impl FenceEvent {
    pub fn new() -> DriverResult<Self> {
        unsafe { CreateEventW(None, false, false, None) }
            .map(Self)
            .map_err(|e| DriverError::creation("fence event", e))
    }
}

impl Drop for FenceEvent {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Map a per-frame D3D12 failure onto the driver error taxonomy.
pub fn frame_error(error: windows::core::Error, context: &str) -> DriverError {
    let code = error.code();
    if code == DXGI_ERROR_DEVICE_REMOVED
        || code == DXGI_ERROR_DEVICE_RESET
        || code == DXGI_ERROR_DEVICE_HUNG
    {
        DriverError::DeviceLost
    } else {
        DriverError::FrameFailed(format!("{}: {}", context, error))
    }
}
