pub mod config;
pub mod error;

pub use config::{InstanceConfig, PipelineConfig, VkComputeConfig};
pub use error::CoreError;
