use std::fmt;
use std::path::PathBuf;

use ash::vk;

use crate::plan::Step;

/// Descriptor objects created by the storage stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorObject {
    Pool,
    SetLayout,
    Set,
}

impl fmt::Display for DescriptorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DescriptorObject::Pool => "descriptor pool",
            DescriptorObject::SetLayout => "descriptor set layout",
            DescriptorObject::Set => "descriptor set",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Vulkan loader unavailable: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("{what} contains an interior NUL byte")]
    InvalidName {
        what: &'static str,
        #[source]
        source: std::ffi::NulError,
    },

    #[error("instance creation failed: {0}")]
    InstanceCreation(vk::Result),

    #[error("physical device query failed: {0}")]
    DeviceQuery(vk::Result),

    #[error("no GPUs with Vulkan support found")]
    NoPhysicalDevices,

    #[error("no discrete GPU among {count} physical device(s)")]
    NoDiscreteGpu { count: usize },

    #[error("no queue family exposes both compute and graphics")]
    NoSuitableQueueFamily,

    #[error("device creation failed: {0}")]
    DeviceCreation(vk::Result),

    #[error("compute queue unavailable: {0}")]
    QueueRetrieval(&'static str),

    #[error("failed to read {}", path.display())]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("shader binary is {len} bytes, not a multiple of 4")]
    ShaderMisaligned { len: usize },

    #[error("shader binary is not SPIR-V ({len} bytes)")]
    ShaderInvalid {
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("shader module creation failed: {0}")]
    ShaderModuleCreation(vk::Result),

    #[error("{object} creation failed: {result}")]
    DescriptorCreation {
        object: DescriptorObject,
        result: vk::Result,
    },

    #[error("buffer creation failed: {0}")]
    BufferCreation(vk::Result),

    #[error("no host-visible, host-coherent memory type in bits {type_bits:#x}")]
    MemoryTypeUnavailable { type_bits: u32 },

    #[error("memory allocation of {size} bytes failed: {result}")]
    MemoryAllocation { size: u64, result: vk::Result },

    #[error("memory map failed: {0}")]
    MemoryMap(vk::Result),

    #[error("pipeline layout creation failed: {0}")]
    PipelineLayoutCreation(vk::Result),

    #[error("pipeline creation failed: {0}")]
    PipelineCreation(vk::Result),

    #[error("cannot {step} before {missing} exists")]
    Sequence { step: Step, missing: &'static str },

    #[error("session halted after failed step `{0}`")]
    Halted(Step),

    #[error("session already destroyed")]
    Destroyed,
}
