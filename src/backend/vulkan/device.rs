//! Physical device queries, the logical device and host-visible buffers.

use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;

use crate::error::{DriverError, DriverResult};
use crate::gpu::Gpu;
use crate::logging::LogSink;
use crate::shader::StageSupport;

use super::instance::VulkanInstance;
use super::selection::select_queue_family;

/// Describe a physical device as a [`Gpu`].
pub fn describe_physical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    id: u32,
) -> Gpu {
    let (props, memory) = unsafe {
        (
            instance.get_physical_device_properties(physical_device),
            instance.get_physical_device_memory_properties(physical_device),
        )
    };
    // SAFETY: device_name is a null-terminated fixed array
    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

    let device_local: u64 = memory.memory_heaps[..memory.memory_heap_count as usize]
        .iter()
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum();

    let software = matches!(
        props.device_type,
        vk::PhysicalDeviceType::CPU | vk::PhysicalDeviceType::VIRTUAL_GPU
    );

    Gpu::new(
        id,
        &name,
        Gpu::megabytes(device_local),
        props.vendor_id,
        props.device_id,
        software,
    )
}

/// Check the device can drive this renderer.
///
/// Returns the queue family to use and the optional stages the device offers.
pub fn check_device_support(
    instance: &VulkanInstance,
    physical_device: vk::PhysicalDevice,
) -> DriverResult<(u32, StageSupport)> {
    let extensions = unsafe {
        instance
            .instance
            .enumerate_device_extension_properties(physical_device)
    }
    .map_err(|e| DriverError::CapabilityUnsupported(format!("device extensions: {:?}", e)))?;
    let has_swapchain = extensions.iter().any(|ext| {
        // SAFETY: extension_name is a null-terminated fixed array
        (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == ash::khr::swapchain::NAME
    });
    if !has_swapchain {
        return Err(DriverError::CapabilityUnsupported(
            "VK_KHR_swapchain not supported".into(),
        ));
    }

    let features = unsafe {
        instance
            .instance
            .get_physical_device_features(physical_device)
    };
    if features.sampler_anisotropy == vk::FALSE {
        return Err(DriverError::CapabilityUnsupported(
            "sampler anisotropy not supported".into(),
        ));
    }
    let stages = StageSupport {
        geometry: features.geometry_shader == vk::TRUE,
        tessellation: features.tessellation_shader == vk::TRUE,
    };

    let families = unsafe {
        instance
            .instance
            .get_physical_device_queue_family_properties(physical_device)
    };
    let queue_family = select_queue_family(&families, |family| {
        instance.surface_support(physical_device, family)
    })
    .ok_or_else(|| {
        DriverError::CapabilityUnsupported("no queue family with graphics and present".into())
    })?;
    Ok((queue_family, stages))
}

/// Logical device with its queue, command pool and memory allocator.
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub command_pool: vk::CommandPool,
    pub limits: vk::PhysicalDeviceLimits,
    pub stages: StageSupport,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Set once the driver reports the device lost; never cleared.
    lost: AtomicBool,
    log: LogSink,
}

impl VulkanDevice {
    pub fn new(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        stages: StageSupport,
        log: LogSink,
    ) -> DriverResult<Arc<Self>> {
        let queue_priorities = [1.0f32];
        let queue_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities)];

        let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .geometry_shader(stages.geometry)
            .tessellation_shader(stages.tessellation);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&device_features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &device_info, None)
        }
        .map_err(|e| DriverError::creation("device", format!("{:?}", e)))?;

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let limits = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        }
        .limits;

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(DriverError::creation("memory allocator", e));
            }
        };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(DriverError::creation("command pool", format!("{:?}", e)));
            }
        };

        Ok(Arc::new(Self {
            device,
            physical_device,
            queue,
            queue_family_index,
            command_pool,
            limits,
            stages,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            lost: AtomicBool::new(false),
            log,
        }))
    }

    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> DriverResult<Allocation> {
        self.allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| DriverError::creation("memory allocation", e))
    }

    pub fn free(&self, allocation: Allocation) {
        let freed = self.allocator.lock().free(allocation);
        report_free(&self.log, freed);
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn mark_lost(&self) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            self.log.error(format_args!("Vulkan device lost"));
        }
    }

    /// Fail fast once the device is gone.
    pub fn ensure_alive(&self) -> DriverResult<()> {
        if self.is_lost() {
            return Err(DriverError::DeviceLost);
        }
        Ok(())
    }

    /// Pass `error` through, remembering a device loss.
    pub fn note_failure(&self, error: DriverError) -> DriverError {
        if matches!(error, DriverError::DeviceLost) {
            self.mark_lost();
        }
        error
    }

    pub fn allocate_command_buffer(
        &self,
        level: vk::CommandBufferLevel,
    ) -> DriverResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(level)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| DriverError::creation("command buffer", format!("{:?}", e)))?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::creation("command buffer", "none allocated"))
    }

    pub fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, &[command_buffer])
        };
    }

    /// Wait for the queue to drain. Does nothing on a lost device.
    pub fn wait_idle(&self) {
        if self.is_lost() {
            return;
        }
        match unsafe { self.device.device_wait_idle() } {
            Ok(()) => {}
            Err(vk::Result::ERROR_DEVICE_LOST) => self.mark_lost(),
            Err(e) => self
                .log
                .error(format_args!("Failed to wait for device idle: {:?}", e)),
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        self.wait_idle();
        unsafe {
            // Allocator first: it must not outlive the device.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
    }
}

fn report_free(log: &LogSink, result: gpu_allocator::Result<()>) {
    if let Err(e) = result {
        log.error(format_args!("Failed to free allocation: {}", e));
    }
}

/// A buffer in CPU-visible memory, filled once at creation.
pub struct HostBuffer {
    device: Arc<VulkanDevice>,
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

impl HostBuffer {
    pub fn with_data(
        device: &Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[u8],
    ) -> DriverResult<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(data.len() as u64)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(|e| DriverError::creation("buffer", format!("{:?}", e)))?;

        // From here on Drop releases the buffer.
        let mut this = Self {
            device: device.clone(),
            buffer,
            allocation: None,
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let mut allocation = device.allocate(name, requirements, MemoryLocation::CpuToGpu, true)?;

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            device.free(allocation);
            return Err(DriverError::creation("buffer", format!("{:?}", e)));
        }
        let written = allocation
            .mapped_slice_mut()
            .map(|slice| slice[..data.len()].copy_from_slice(data))
            .is_some();
        if !written {
            device.free(allocation);
            return Err(DriverError::creation("buffer", "memory is not host visible"));
        }

        this.allocation = Some(allocation);
        Ok(this)
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            self.device.free(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_allocator::AllocationError;
    use log::{Level, Log, Metadata, Record};

    #[derive(Default)]
    struct Errors(Mutex<Vec<String>>);

    impl Log for Errors {
        fn enabled(&self, metadata: &Metadata<'_>) -> bool {
            metadata.level() == Level::Error
        }

        fn log(&self, record: &Record<'_>) {
            self.0.lock().push(record.args().to_string());
        }

        fn flush(&self) {}
    }

    #[test]
    fn test_failed_free_is_logged() {
        let errors = Arc::new(Errors::default());
        let log = LogSink::new(errors.clone());

        report_free(&log, Ok(()));
        assert!(errors.0.lock().is_empty());

        report_free(
            &log,
            Err(AllocationError::Internal("unknown memory block".into())),
        );
        let messages = errors.0.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("Failed to free allocation"));
    }
}
