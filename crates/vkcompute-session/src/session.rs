use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr::NonNull;

use ash::vk;
use tracing::{debug, info, warn};

use vkcompute_core::InstanceConfig;

use crate::api::{AppInfo, ComputeApi};
use crate::error::{DescriptorObject, SessionError};
use crate::plan::Step;
use crate::selection;
use crate::shader;

/// Compute shader entry point.
pub const ENTRY_POINT: &CStr = c"main";

/// Priority of the single compute queue.
pub const QUEUE_PRIORITY: f32 = 1.0;

/// Descriptor binding slot of the storage buffer.
pub const STORAGE_BINDING: u32 = 0;

/// Progress of a session through its setup steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No step has run yet.
    NotReady,
    /// Every step so far succeeded.
    Ready,
    /// A step failed; no further step will run.
    Failed { step: Step },
    /// Teardown has released every resource.
    Destroyed,
}

struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

/// Owns every Vulkan object of one compute bring-up.
///
/// Steps populate the session in dependency order. Every handle is optional
/// so teardown releases exactly what was created, whichever step failed.
/// Dropping the session tears it down.
pub struct DeviceSession<A: ComputeApi> {
    api: A,
    config: InstanceConfig,
    status: SessionStatus,

    instance: Option<vk::Instance>,
    physical_device: Option<vk::PhysicalDevice>,
    queue_family_index: Option<u32>,
    device: Option<vk::Device>,
    queue: Option<vk::Queue>,
    shader_module: Option<vk::ShaderModule>,
    descriptor_pool: Option<vk::DescriptorPool>,
    descriptor_set_layout: Option<vk::DescriptorSetLayout>,
    descriptor_set: Option<vk::DescriptorSet>,
    buffer: Option<vk::Buffer>,
    buffer_memory: Option<vk::DeviceMemory>,
    mapped: Option<MappedRegion>,
    pipeline_layout: Option<vk::PipelineLayout>,
    pipeline: Option<vk::Pipeline>,
}

impl<A: ComputeApi> DeviceSession<A> {
    pub fn new(api: A, config: InstanceConfig) -> Self {
        Self {
            api,
            config,
            status: SessionStatus::NotReady,
            instance: None,
            physical_device: None,
            queue_family_index: None,
            device: None,
            queue: None,
            shader_module: None,
            descriptor_pool: None,
            descriptor_set_layout: None,
            descriptor_set: None,
            buffer: None,
            buffer_memory: None,
            mapped: None,
            pipeline_layout: None,
            pipeline: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn physical_device(&self) -> Option<vk::PhysicalDevice> {
        self.physical_device
    }

    pub fn queue_family_index(&self) -> Option<u32> {
        self.queue_family_index
    }

    pub fn queue(&self) -> Option<vk::Queue> {
        self.queue
    }

    pub fn pipeline(&self) -> Option<vk::Pipeline> {
        self.pipeline
    }

    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.descriptor_set
    }

    /// Host view of the mapped storage buffer memory.
    pub fn mapped_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let region = self.mapped.as_ref()?;
        // SAFETY: the region was returned by map_memory for `len` bytes and
        // stays mapped until teardown, which needs `&mut self`.
        Some(unsafe { std::slice::from_raw_parts_mut(region.ptr.as_ptr(), region.len) })
    }

    /// Gate a step on the session status and record its outcome.
    pub(crate) fn run_step<T>(
        &mut self,
        step: Step,
        f: impl FnOnce(&mut Self) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        match self.status {
            SessionStatus::Failed { step: failed } => return Err(SessionError::Halted(failed)),
            SessionStatus::Destroyed => return Err(SessionError::Destroyed),
            SessionStatus::NotReady | SessionStatus::Ready => {}
        }

        match f(self) {
            Ok(value) => {
                self.status = SessionStatus::Ready;
                debug!("step `{}` done", step);
                Ok(value)
            }
            Err(e) => {
                warn!("step `{}` failed: {}", step, e);
                self.status = SessionStatus::Failed { step };
                Err(e)
            }
        }
    }

    fn require<T: Copy>(
        value: Option<T>,
        step: Step,
        missing: &'static str,
    ) -> Result<T, SessionError> {
        value.ok_or(SessionError::Sequence { step, missing })
    }

    pub fn create_instance(&mut self, enable_validation: bool) -> Result<(), SessionError> {
        self.run_step(Step::CreateInstance, |s| {
            if s.instance.is_some() {
                return Err(SessionError::InstanceCreation(vk::Result::ERROR_INITIALIZATION_FAILED));
            }

            let app_name = CString::new(s.config.app_name.as_str()).map_err(|source| {
                SessionError::InvalidName {
                    what: "application name",
                    source,
                }
            })?;
            let layer = CString::new(s.config.validation_layer.as_str()).map_err(|source| {
                SessionError::InvalidName {
                    what: "validation layer name",
                    source,
                }
            })?;

            let mut layers: Vec<&CStr> = Vec::new();
            if enable_validation {
                match s.api.instance_layers() {
                    Ok(available) if !available.iter().any(|l| l == &s.config.validation_layer) => {
                        warn!(
                            "validation layer {} is not installed; \
                             instance creation will likely fail",
                            s.config.validation_layer
                        );
                    }
                    Ok(_) => {}
                    Err(e) => debug!("could not enumerate instance layers: {}", e),
                }
                layers.push(layer.as_c_str());
            }

            let app = AppInfo {
                name: app_name.as_c_str(),
                version: vk::make_api_version(0, 1, 0, 0),
            };
            let instance = s
                .api
                .create_instance(app, &layers)
                .map_err(SessionError::InstanceCreation)?;
            s.instance = Some(instance);
            info!(
                "created Vulkan instance (validation: {})",
                if enable_validation { s.config.validation_layer.as_str() } else { "off" }
            );
            Ok(())
        })
    }

    pub fn pick_physical_device(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::PickPhysicalDevice, |s| {
            Self::require(s.instance, Step::PickPhysicalDevice, "an instance")?;

            let devices = s
                .api
                .enumerate_physical_devices()
                .map_err(SessionError::DeviceQuery)?;
            if devices.is_empty() {
                return Err(SessionError::NoPhysicalDevices);
            }

            let mut properties = Vec::with_capacity(devices.len());
            for &pd in &devices {
                properties.push(
                    s.api
                        .physical_device_properties(pd)
                        .map_err(SessionError::DeviceQuery)?,
                );
            }

            let index = selection::pick_discrete_device(properties.iter().map(|p| p.device_type))
                .ok_or(SessionError::NoDiscreteGpu {
                    count: devices.len(),
                })?;

            let name = properties[index]
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            info!(
                "selected GPU {} of {}: {} ({:?})",
                index,
                devices.len(),
                name,
                properties[index].device_type
            );
            s.physical_device = Some(devices[index]);
            Ok(())
        })
    }

    pub fn find_queue_family(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::FindQueueFamily, |s| {
            let pd = Self::require(s.physical_device, Step::FindQueueFamily, "a physical device")?;
            let families = s
                .api
                .queue_family_properties(pd)
                .map_err(SessionError::DeviceQuery)?;

            s.queue_family_index = selection::find_compute_graphics_family(&families);
            match s.queue_family_index {
                Some(index) => info!(
                    "using queue family {} ({:?})",
                    index, families[index as usize].queue_flags
                ),
                None => warn!(
                    "none of {} queue families supports both compute and graphics",
                    families.len()
                ),
            }
            Ok(())
        })
    }

    pub fn create_device(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::CreateDevice, |s| {
            let family = s
                .queue_family_index
                .ok_or(SessionError::NoSuitableQueueFamily)?;
            let pd = Self::require(s.physical_device, Step::CreateDevice, "a physical device")?;
            if s.device.is_some() {
                return Err(SessionError::DeviceCreation(vk::Result::ERROR_INITIALIZATION_FAILED));
            }

            let device = s
                .api
                .create_device(pd, family, &[QUEUE_PRIORITY])
                .map_err(SessionError::DeviceCreation)?;
            s.device = Some(device);
            info!("created logical device with one queue in family {}", family);
            Ok(())
        })
    }

    pub fn get_compute_queue(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::GetComputeQueue, |s| {
            let family = s
                .queue_family_index
                .ok_or(SessionError::QueueRetrieval("no queue family selected"))?;
            if s.device.is_none() {
                return Err(SessionError::QueueRetrieval("no logical device"));
            }
            let queue = s
                .api
                .device_queue(family, 0)
                .map_err(|_| SessionError::QueueRetrieval("driver returned no queue"))?;
            s.queue = Some(queue);
            debug!("retrieved queue 0 of family {}", family);
            Ok(())
        })
    }

    /// Create the shader module from a SPIR-V binary. Lengths that are not
    /// a multiple of 4 are rejected before reaching the driver.
    pub fn create_shader_module(&mut self, code: &[u8]) -> Result<(), SessionError> {
        self.run_step(Step::CreateShaderModule, |s| s.build_shader_module(code))
    }

    /// Read a SPIR-V binary from disk and create the shader module from it.
    pub fn create_shader_module_from_file(&mut self, path: &Path) -> Result<(), SessionError> {
        self.run_step(Step::CreateShaderModule, |s| {
            let code = shader::read_shader_file(path)?;
            s.build_shader_module(&code)
        })
    }

    fn build_shader_module(&mut self, code: &[u8]) -> Result<(), SessionError> {
        Self::require(self.device, Step::CreateShaderModule, "a logical device")?;
        if self.shader_module.is_some() {
            return Err(SessionError::ShaderModuleCreation(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let words = shader::spirv_words(code)?;
        let module = self
            .api
            .create_shader_module(&words)
            .map_err(SessionError::ShaderModuleCreation)?;
        self.shader_module = Some(module);
        info!("created shader module ({} words)", words.len());
        Ok(())
    }

    pub fn create_descriptor_pool(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::CreateDescriptorPool, |s| {
            Self::require(s.device, Step::CreateDescriptorPool, "a logical device")?;
            let sizes = [vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)];
            let pool = s.api.create_descriptor_pool(1, &sizes).map_err(|result| {
                SessionError::DescriptorCreation {
                    object: DescriptorObject::Pool,
                    result,
                }
            })?;
            s.descriptor_pool = Some(pool);
            debug!("created descriptor pool");
            Ok(())
        })
    }

    pub fn create_descriptor_set_layout(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::CreateDescriptorSetLayout, |s| {
            Self::require(s.device, Step::CreateDescriptorSetLayout, "a logical device")?;
            let bindings = [vk::DescriptorSetLayoutBinding::default()
                .binding(STORAGE_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)];
            let layout = s.api.create_descriptor_set_layout(&bindings).map_err(|result| {
                SessionError::DescriptorCreation {
                    object: DescriptorObject::SetLayout,
                    result,
                }
            })?;
            s.descriptor_set_layout = Some(layout);
            debug!("created descriptor set layout");
            Ok(())
        })
    }

    pub fn allocate_descriptor_sets(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::AllocateDescriptorSets, |s| {
            let pool = Self::require(
                s.descriptor_pool,
                Step::AllocateDescriptorSets,
                "a descriptor pool",
            )?;
            let layout = Self::require(
                s.descriptor_set_layout,
                Step::AllocateDescriptorSets,
                "a descriptor set layout",
            )?;
            let set = s.api.allocate_descriptor_set(pool, layout).map_err(|result| {
                SessionError::DescriptorCreation {
                    object: DescriptorObject::Set,
                    result,
                }
            })?;
            s.descriptor_set = Some(set);
            debug!("allocated descriptor set");
            Ok(())
        })
    }

    /// Create the storage buffer once, then allocate and bind its memory.
    pub fn create_buffer(&mut self, size: vk::DeviceSize) -> Result<(), SessionError> {
        self.run_step(Step::CreateBuffer, |s| {
            let pd = Self::require(s.physical_device, Step::CreateBuffer, "a physical device")?;
            Self::require(s.device, Step::CreateBuffer, "a logical device")?;
            if s.buffer.is_some() {
                return Err(SessionError::BufferCreation(vk::Result::ERROR_INITIALIZATION_FAILED));
            }

            let buffer = s
                .api
                .create_buffer(
                    size,
                    vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                )
                .map_err(SessionError::BufferCreation)?;
            s.buffer = Some(buffer);

            let requirements = s
                .api
                .buffer_memory_requirements(buffer)
                .map_err(SessionError::BufferCreation)?;
            let memory_properties = s
                .api
                .memory_properties(pd)
                .map_err(SessionError::DeviceQuery)?;
            let memory_type =
                selection::find_host_visible_memory_type(&requirements, &memory_properties)
                    .ok_or(SessionError::MemoryTypeUnavailable {
                        type_bits: requirements.memory_type_bits,
                    })?;

            let memory = s
                .api
                .allocate_memory(requirements.size, memory_type)
                .map_err(|result| SessionError::MemoryAllocation {
                    size: requirements.size,
                    result,
                })?;
            s.buffer_memory = Some(memory);

            s.api
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(SessionError::BufferCreation)?;

            info!(
                "created {} byte storage buffer ({} bytes in memory type {})",
                size, requirements.size, memory_type
            );
            Ok(())
        })
    }

    /// Persistently map the first `size` bytes of the buffer memory.
    pub fn map_buffer_memory(&mut self, size: vk::DeviceSize) -> Result<(), SessionError> {
        self.run_step(Step::MapBufferMemory, |s| {
            let memory = Self::require(s.buffer_memory, Step::MapBufferMemory, "buffer memory")?;
            if s.mapped.is_some() {
                return Err(SessionError::MemoryMap(vk::Result::ERROR_MEMORY_MAP_FAILED));
            }
            let len = usize::try_from(size)
                .map_err(|_| SessionError::MemoryMap(vk::Result::ERROR_MEMORY_MAP_FAILED))?;

            let ptr = s
                .api
                .map_memory(memory, 0, size)
                .map_err(SessionError::MemoryMap)?;
            let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
                s.api.unmap_memory(memory);
                return Err(SessionError::MemoryMap(vk::Result::ERROR_MEMORY_MAP_FAILED));
            };
            s.mapped = Some(MappedRegion { ptr, len });
            debug!("mapped {} bytes of buffer memory", size);
            Ok(())
        })
    }

    /// Point the storage binding at the first `range` bytes of the buffer.
    pub fn update_descriptor_sets(&mut self, range: vk::DeviceSize) -> Result<(), SessionError> {
        self.run_step(Step::UpdateDescriptorSets, |s| {
            let set =
                Self::require(s.descriptor_set, Step::UpdateDescriptorSets, "a descriptor set")?;
            let buffer = Self::require(s.buffer, Step::UpdateDescriptorSets, "a storage buffer")?;
            s.api
                .write_storage_descriptor(set, STORAGE_BINDING, buffer, 0, range);
            debug!("bound {} byte buffer range to binding {}", range, STORAGE_BINDING);
            Ok(())
        })
    }

    /// Pipeline layout with the storage set layout when one exists, empty otherwise.
    pub fn create_pipeline_layout(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::CreatePipelineLayout, |s| {
            Self::require(s.device, Step::CreatePipelineLayout, "a logical device")?;
            let set_layouts: Vec<vk::DescriptorSetLayout> =
                s.descriptor_set_layout.into_iter().collect();
            let layout = s
                .api
                .create_pipeline_layout(&set_layouts)
                .map_err(SessionError::PipelineLayoutCreation)?;
            s.pipeline_layout = Some(layout);
            debug!("created pipeline layout with {} set layout(s)", set_layouts.len());
            Ok(())
        })
    }

    pub fn create_pipeline(&mut self) -> Result<(), SessionError> {
        self.run_step(Step::CreatePipeline, |s| {
            let layout =
                Self::require(s.pipeline_layout, Step::CreatePipeline, "a pipeline layout")?;
            let module = Self::require(s.shader_module, Step::CreatePipeline, "a shader module")?;
            let pipeline = s
                .api
                .create_compute_pipeline(layout, module, ENTRY_POINT)
                .map_err(SessionError::PipelineCreation)?;
            s.pipeline = Some(pipeline);
            info!("created compute pipeline (entry point `main`)");
            Ok(())
        })
    }

    /// Release every resource the session holds, dependents first.
    /// Absent handles are skipped; calling this again does nothing.
    pub fn destroy(&mut self) {
        if self.status == SessionStatus::Destroyed {
            return;
        }

        let mut released = 0u32;

        if let (Some(_), Some(memory)) = (self.mapped.take(), self.buffer_memory) {
            self.api.unmap_memory(memory);
        }
        if let Some(pipeline) = self.pipeline.take() {
            self.api.destroy_pipeline(pipeline);
            released += 1;
        }
        if let Some(layout) = self.pipeline_layout.take() {
            self.api.destroy_pipeline_layout(layout);
            released += 1;
        }
        // Sets are returned with their pool.
        self.descriptor_set = None;
        if let Some(pool) = self.descriptor_pool.take() {
            self.api.destroy_descriptor_pool(pool);
            released += 1;
        }
        if let Some(layout) = self.descriptor_set_layout.take() {
            self.api.destroy_descriptor_set_layout(layout);
            released += 1;
        }
        if let Some(buffer) = self.buffer.take() {
            self.api.destroy_buffer(buffer);
            released += 1;
        }
        if let Some(memory) = self.buffer_memory.take() {
            self.api.free_memory(memory);
            released += 1;
        }
        if let Some(module) = self.shader_module.take() {
            self.api.destroy_shader_module(module);
            released += 1;
        }
        self.queue = None;
        if let Some(device) = self.device.take() {
            self.api.destroy_device(device);
            released += 1;
        }
        self.queue_family_index = None;
        self.physical_device = None;
        if let Some(instance) = self.instance.take() {
            self.api.destroy_instance(instance);
            released += 1;
        }

        self.status = SessionStatus::Destroyed;
        if released > 0 {
            info!("released {} Vulkan resource(s)", released);
        }
    }
}

impl<A: ComputeApi> Drop for DeviceSession<A> {
    fn drop(&mut self) {
        self.destroy();
    }
}
