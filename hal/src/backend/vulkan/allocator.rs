//! GPU memory allocator integration using gpu-allocator.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use parking_lot::Mutex;

use crate::error::GraphicsError;

/// Allocator shared between the backend and every image and staging buffer.
pub type SharedAllocator = std::sync::Arc<Mutex<Allocator>>;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, GraphicsError> {
    let allocator = Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })?;

    Ok(allocator)
}

/// Allocate and bind memory for `image`.
pub fn allocate_image(
    allocator: &SharedAllocator,
    device: &ash::Device,
    image: vk::Image,
    name: &str,
) -> Result<Allocation, GraphicsError> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let allocation = allocator
        .lock()
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(map_allocation_error)?;

    if let Err(e) =
        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
    {
        free(allocator, allocation);
        return Err(GraphicsError::ResourceCreationFailed(format!(
            "Failed to bind image memory: {:?}",
            e
        )));
    }
    Ok(allocation)
}

/// Allocate and bind host-visible memory for `buffer`.
pub fn allocate_buffer(
    allocator: &SharedAllocator,
    device: &ash::Device,
    buffer: vk::Buffer,
    location: MemoryLocation,
    name: &str,
) -> Result<Allocation, GraphicsError> {
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let allocation = allocator
        .lock()
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(map_allocation_error)?;

    if let Err(e) =
        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
    {
        free(allocator, allocation);
        return Err(GraphicsError::ResourceCreationFailed(format!(
            "Failed to bind buffer memory: {:?}",
            e
        )));
    }
    Ok(allocation)
}

pub fn free(allocator: &SharedAllocator, allocation: Allocation) {
    if let Err(e) = allocator.lock().free(allocation) {
        log::error!("Failed to free GPU memory: {}", e);
    }
}

fn map_allocation_error(e: gpu_allocator::AllocationError) -> GraphicsError {
    match e {
        gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
        other => GraphicsError::ResourceCreationFailed(format!(
            "Failed to allocate GPU memory: {}",
            other
        )),
    }
}
