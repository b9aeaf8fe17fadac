use std::ffi::CString;

use ash::vk;
use serde::Serialize;
use tracing::{info, warn};

use vkcompute_core::InstanceConfig;

use crate::api::{AppInfo, ComputeApi};
use crate::error::SessionError;
use crate::selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GpuDeviceType {
    DiscreteGpu,
    IntegratedGpu,
    VirtualGpu,
    Cpu,
    Other,
}

impl From<vk::PhysicalDeviceType> for GpuDeviceType {
    fn from(ty: vk::PhysicalDeviceType) -> Self {
        match ty {
            vk::PhysicalDeviceType::DISCRETE_GPU => GpuDeviceType::DiscreteGpu,
            vk::PhysicalDeviceType::INTEGRATED_GPU => GpuDeviceType::IntegratedGpu,
            vk::PhysicalDeviceType::VIRTUAL_GPU => GpuDeviceType::VirtualGpu,
            vk::PhysicalDeviceType::CPU => GpuDeviceType::Cpu,
            _ => GpuDeviceType::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueFamilySummary {
    pub index: u32,
    pub queue_count: u32,
    pub compute: bool,
    pub graphics: bool,
    pub transfer: bool,
}

/// What a session would see of one physical device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub index: u32,
    pub device_name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub device_type: GpuDeviceType,
    /// Vulkan API version, "major.minor.patch"
    pub api_version: String,
    /// Sum of device-local heap sizes in bytes
    pub device_local_memory: u64,
    pub queue_families: Vec<QueueFamilySummary>,
    /// Queue family a session would open on this device
    pub compute_family: Option<u32>,
    /// Whether a session would pick this device
    pub selected: bool,
}

/// Enumerate every physical device through a short-lived instance.
pub fn discover_devices<A: ComputeApi>(
    api: &mut A,
    config: &InstanceConfig,
) -> Result<Vec<DeviceSummary>, SessionError> {
    let app_name = CString::new(config.app_name.as_str()).map_err(|source| {
        SessionError::InvalidName {
            what: "application name",
            source,
        }
    })?;
    let app = AppInfo {
        name: app_name.as_c_str(),
        version: vk::make_api_version(0, 1, 0, 0),
    };
    let instance = api
        .create_instance(app, &[])
        .map_err(SessionError::InstanceCreation)?;

    let result = describe_devices(api);
    api.destroy_instance(instance);
    let devices = result?;

    if devices.is_empty() {
        warn!("no GPUs with Vulkan support found");
    } else {
        info!("discovered {} GPU(s) via Vulkan", devices.len());
    }
    Ok(devices)
}

fn describe_devices<A: ComputeApi>(api: &A) -> Result<Vec<DeviceSummary>, SessionError> {
    let physical_devices = api
        .enumerate_physical_devices()
        .map_err(SessionError::DeviceQuery)?;

    let mut devices = Vec::with_capacity(physical_devices.len());
    for (idx, &pd) in physical_devices.iter().enumerate() {
        let props = api
            .physical_device_properties(pd)
            .map_err(SessionError::DeviceQuery)?;
        let mem_props = api.memory_properties(pd).map_err(SessionError::DeviceQuery)?;
        let families = api
            .queue_family_properties(pd)
            .map_err(SessionError::DeviceQuery)?;

        let device_name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let heap_count = (mem_props.memory_heap_count as usize).min(vk::MAX_MEMORY_HEAPS);
        let device_local_memory = mem_props.memory_heaps[..heap_count]
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum::<u64>();

        let queue_families = families
            .iter()
            .enumerate()
            .map(|(i, family)| QueueFamilySummary {
                index: i as u32,
                queue_count: family.queue_count,
                compute: family.queue_flags.contains(vk::QueueFlags::COMPUTE),
                graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                transfer: family.queue_flags.contains(vk::QueueFlags::TRANSFER),
            })
            .collect();

        devices.push(DeviceSummary {
            index: idx as u32,
            device_name,
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            device_type: props.device_type.into(),
            api_version: format_version(props.api_version),
            device_local_memory,
            queue_families,
            compute_family: selection::find_compute_graphics_family(&families),
            selected: false,
        });
    }

    if let Some(chosen) =
        selection::pick_discrete_device(devices.iter().map(|d| match d.device_type {
            GpuDeviceType::DiscreteGpu => vk::PhysicalDeviceType::DISCRETE_GPU,
            _ => vk::PhysicalDeviceType::OTHER,
        }))
    {
        devices[chosen].selected = true;
    }

    for gpu in &devices {
        info!(
            "GPU {}: {} ({:?}, {}MB device-local{})",
            gpu.index,
            gpu.device_name,
            gpu.device_type,
            gpu.device_local_memory / (1024 * 1024),
            if gpu.selected { ", selected" } else { "" },
        );
    }

    Ok(devices)
}

/// Render a packed Vulkan version as "major.minor.patch".
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}
