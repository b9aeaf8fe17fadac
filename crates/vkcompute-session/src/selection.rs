//! Device, queue family and memory type selection over queried properties.

use ash::vk;

/// Memory properties the storage buffer needs so the host can write it
/// without explicit flushes.
pub const HOST_MEMORY_FLAGS: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Queue capabilities a family must expose to be chosen.
pub const REQUIRED_QUEUE_FLAGS: vk::QueueFlags = vk::QueueFlags::from_raw(
    vk::QueueFlags::COMPUTE.as_raw() | vk::QueueFlags::GRAPHICS.as_raw(),
);

/// Index of the first discrete GPU, if any.
pub fn pick_discrete_device<I>(device_types: I) -> Option<usize>
where
    I: IntoIterator<Item = vk::PhysicalDeviceType>,
{
    device_types
        .into_iter()
        .position(|ty| ty == vk::PhysicalDeviceType::DISCRETE_GPU)
}

/// Index of the first queue family with both compute and graphics support.
/// Compute-only families are skipped on purpose.
pub fn find_compute_graphics_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|family| {
            family.queue_count > 0 && family.queue_flags.contains(REQUIRED_QUEUE_FLAGS)
        })
        .map(|index| index as u32)
}

/// First memory type allowed by `requirements` that is host visible and
/// host coherent.
pub fn find_host_visible_memory_type(
    requirements: &vk::MemoryRequirements,
    properties: &vk::PhysicalDeviceMemoryProperties,
) -> Option<u32> {
    find_memory_type(requirements.memory_type_bits, HOST_MEMORY_FLAGS, properties)
}

pub fn find_memory_type(
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
    properties: &vk::PhysicalDeviceMemoryProperties,
) -> Option<u32> {
    let count = (properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(flags))
        .map(|(i, _)| i as u32)
}
