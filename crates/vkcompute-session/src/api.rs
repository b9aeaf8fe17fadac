use std::ffi::{c_char, c_void, CStr};

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, info};

use crate::error::SessionError;

/// Application identity passed to instance creation.
#[derive(Debug, Clone, Copy)]
pub struct AppInfo<'a> {
    pub name: &'a CStr,
    pub version: u32,
}

/// The native Vulkan calls a [`DeviceSession`](crate::DeviceSession) makes.
///
/// Implementations own at most one instance and one logical device at a
/// time. Every handle passed back in must have been returned by the same
/// implementation and not yet destroyed.
pub trait ComputeApi {
    /// Names of the instance layers the loader can enable.
    fn instance_layers(&self) -> VkResult<Vec<String>>;
    fn create_instance(&mut self, app: AppInfo<'_>, layers: &[&CStr]) -> VkResult<vk::Instance>;
    fn destroy_instance(&mut self, instance: vk::Instance);

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;
    fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::PhysicalDeviceProperties>;
    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::QueueFamilyProperties>>;
    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::PhysicalDeviceMemoryProperties>;

    /// Open a logical device with one queue per priority in `family`.
    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        priorities: &[f32],
    ) -> VkResult<vk::Device>;
    fn destroy_device(&mut self, device: vk::Device);
    fn device_queue(&self, queue_family_index: u32, queue_index: u32) -> VkResult<vk::Queue>;

    fn create_shader_module(&mut self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&mut self, module: vk::ShaderModule);

    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool);
    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout);
    fn allocate_descriptor_set(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet>;
    /// Point a storage-buffer binding of `set` at `[offset, offset + range)` of `buffer`.
    fn write_storage_descriptor(
        &mut self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    );

    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer>;
    fn destroy_buffer(&mut self, buffer: vk::Buffer);
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> VkResult<vk::MemoryRequirements>;
    fn allocate_memory(
        &mut self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory>;
    fn free_memory(&mut self, memory: vk::DeviceMemory);
    fn bind_buffer_memory(
        &mut self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    fn map_memory(
        &mut self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void>;
    fn unmap_memory(&mut self, memory: vk::DeviceMemory);

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);
    fn create_compute_pipeline(
        &mut self,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
        entry_point: &CStr,
    ) -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);
}

/// [`ComputeApi`] backed by the system Vulkan loader through `ash`.
pub struct AshApi {
    entry: ash::Entry,
    instance: Option<ash::Instance>,
    device: Option<ash::Device>,
}

impl AshApi {
    /// Load the Vulkan loader library.
    pub fn load() -> Result<Self, SessionError> {
        let entry = unsafe { ash::Entry::load()? };
        info!("Vulkan entry loaded successfully");
        Ok(Self {
            entry,
            instance: None,
            device: None,
        })
    }

    fn instance(&self) -> VkResult<&ash::Instance> {
        self.instance
            .as_ref()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn device(&self) -> VkResult<&ash::Device> {
        self.device.as_ref().ok_or(vk::Result::ERROR_DEVICE_LOST)
    }
}

impl ComputeApi for AshApi {
    fn instance_layers(&self) -> VkResult<Vec<String>> {
        let layers = unsafe { self.entry.enumerate_instance_layer_properties()? };
        Ok(layers
            .iter()
            .filter_map(|layer| layer.layer_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn create_instance(&mut self, app: AppInfo<'_>, layers: &[&CStr]) -> VkResult<vk::Instance> {
        if self.instance.is_some() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(app.name)
            .application_version(app.version)
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs);

        let instance = unsafe { self.entry.create_instance(&create_info, None)? };
        let raw = instance.handle();
        self.instance = Some(instance);
        Ok(raw)
    }

    fn destroy_instance(&mut self, _instance: vk::Instance) {
        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }
    }

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance()?.enumerate_physical_devices() }
    }

    fn physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::PhysicalDeviceProperties> {
        Ok(unsafe { self.instance()?.get_physical_device_properties(physical_device) })
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::QueueFamilyProperties>> {
        Ok(unsafe {
            self.instance()?
                .get_physical_device_queue_family_properties(physical_device)
        })
    }

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::PhysicalDeviceMemoryProperties> {
        Ok(unsafe {
            self.instance()?
                .get_physical_device_memory_properties(physical_device)
        })
    }

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        priorities: &[f32],
    ) -> VkResult<vk::Device> {
        if self.device.is_some() {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }

        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(priorities);
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_features(&features);

        let device = unsafe {
            self.instance()?
                .create_device(physical_device, &create_info, None)?
        };
        let raw = device.handle();
        self.device = Some(device);
        Ok(raw)
    }

    fn destroy_device(&mut self, _device: vk::Device) {
        if let Some(device) = self.device.take() {
            unsafe { device.destroy_device(None) };
        }
    }

    fn device_queue(&self, queue_family_index: u32, queue_index: u32) -> VkResult<vk::Queue> {
        Ok(unsafe { self.device()?.get_device_queue(queue_family_index, queue_index) })
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device()?.create_shader_module(&create_info, None) }
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_shader_module(module, None) };
        }
    }

    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe { self.device()?.create_descriptor_pool(&create_info, None) }
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_descriptor_pool(pool, None) };
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        unsafe { self.device()?.create_descriptor_set_layout(&create_info, None) }
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> VkResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device()?.allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    fn write_storage_descriptor(
        &mut self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        let Ok(device) = self.device() else {
            return;
        };
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(offset)
            .range(range)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info);
        unsafe { device.update_descriptor_sets(&[write], &[]) };
    }

    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe { self.device()?.create_buffer(&create_info, None) }
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_buffer(buffer, None) };
        }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> VkResult<vk::MemoryRequirements> {
        Ok(unsafe { self.device()?.get_buffer_memory_requirements(buffer) })
    }

    fn allocate_memory(
        &mut self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        unsafe { self.device()?.allocate_memory(&alloc_info, None) }
    }

    fn free_memory(&mut self, memory: vk::DeviceMemory) {
        if let Ok(device) = self.device() {
            unsafe { device.free_memory(memory, None) };
        }
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device()?.bind_buffer_memory(buffer, memory, offset) }
    }

    fn map_memory(
        &mut self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        unsafe {
            self.device()?
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        }
    }

    fn unmap_memory(&mut self, memory: vk::DeviceMemory) {
        if let Ok(device) = self.device() {
            unsafe { device.unmap_memory(memory) };
        }
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> VkResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        unsafe { self.device()?.create_pipeline_layout(&create_info, None) }
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_pipeline_layout(layout, None) };
        }
    }

    fn create_compute_pipeline(
        &mut self,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
        entry_point: &CStr,
    ) -> VkResult<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(entry_point);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let pipelines = unsafe {
            self.device()?
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(pipelines, e)| {
                    debug!("compute pipeline creation returned {} handle(s)", pipelines.len());
                    e
                })?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        if let Ok(device) = self.device() {
            unsafe { device.destroy_pipeline(pipeline, None) };
        }
    }
}
