use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;

/// Khronos validation layer, requested when validation is enabled.
pub const DEFAULT_VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";

/// Compute shader binary used when neither the config file nor the command
/// line names one. Override at build time with `VKCOMPUTE_SHADER_PATH`.
pub const DEFAULT_SHADER_PATH: &str = match option_env!("VKCOMPUTE_SHADER_PATH") {
    Some(path) => path,
    None => "shaders/compute.spv",
};

/// Size of the host-visible storage buffer in bytes.
pub const DEFAULT_BUFFER_SIZE: u64 = 1024;

/// Top-level configuration, loaded from vkcompute.toml.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VkComputeConfig {
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Application name reported to the driver
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Request the validation layer at instance creation
    #[serde(default = "default_true")]
    pub enable_validation: bool,
    /// Name of the layer requested when validation is enabled
    #[serde(default = "default_validation_layer")]
    pub validation_layer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// SPIR-V compute shader binary
    #[serde(default = "default_shader_path")]
    pub shader_path: String,
    /// Build the descriptor set and storage buffer stages
    #[serde(default = "default_true")]
    pub storage_buffer: bool,
    /// Storage buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            enable_validation: true,
            validation_layer: default_validation_layer(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shader_path: default_shader_path(),
            storage_buffer: true,
            buffer_size: default_buffer_size(),
        }
    }
}

impl VkComputeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        debug!("loaded configuration from {}", path);
        Ok(config)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let config: VkComputeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.pipeline.storage_buffer && self.pipeline.buffer_size == 0 {
            return Err(CoreError::ConfigError(
                "pipeline.buffer_size must be non-zero when storage_buffer is enabled".to_string(),
            ));
        }
        if self.pipeline.shader_path.is_empty() {
            return Err(CoreError::ConfigError(
                "pipeline.shader_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, CoreError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Returns the default config file path.
/// Search order:
/// 1. System-wide config: `/etc/vkcompute/vkcompute.toml`
/// 2. Local fallback: `./vkcompute.toml`
pub fn default_config_path() -> String {
    #[cfg(not(windows))]
    {
        let system_path = "/etc/vkcompute/vkcompute.toml";
        if std::path::Path::new(system_path).exists() {
            return system_path.to_string();
        }
    }
    "vkcompute.toml".to_string()
}

fn default_app_name() -> String {
    "vkcompute".to_string()
}

fn default_validation_layer() -> String {
    DEFAULT_VALIDATION_LAYER.to_string()
}

fn default_shader_path() -> String {
    DEFAULT_SHADER_PATH.to_string()
}

fn default_buffer_size() -> u64 {
    DEFAULT_BUFFER_SIZE
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = VkComputeConfig::parse("").unwrap();
        assert_eq!(config, VkComputeConfig::default());
        assert!(config.instance.enable_validation);
        assert_eq!(config.instance.validation_layer, "VK_LAYER_KHRONOS_validation");
        assert_eq!(config.pipeline.buffer_size, 1024);
        assert!(config.pipeline.storage_buffer);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = VkComputeConfig::parse(
            r#"
            [instance]
            enable_validation = false

            [pipeline]
            shader_path = "kernels/double.spv"
            storage_buffer = false
            "#,
        )
        .unwrap();

        assert!(!config.instance.enable_validation);
        assert_eq!(config.instance.app_name, "vkcompute");
        assert_eq!(config.pipeline.shader_path, "kernels/double.spv");
        assert!(!config.pipeline.storage_buffer);
        assert_eq!(config.pipeline.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let err = VkComputeConfig::parse("[pipeline]\nbuffer_size = 0\n").unwrap_err();
        assert!(matches!(err, CoreError::ConfigError(_)), "got {err:?}");
    }

    #[test]
    fn zero_buffer_size_is_fine_without_storage() {
        let config =
            VkComputeConfig::parse("[pipeline]\nbuffer_size = 0\nstorage_buffer = false\n")
                .unwrap();
        assert_eq!(config.pipeline.buffer_size, 0);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = VkComputeConfig::parse("[instance\napp_name = 3").unwrap_err();
        assert!(matches!(err, CoreError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn rendered_toml_parses_back() {
        let mut config = VkComputeConfig::default();
        config.instance.app_name = "bring-up".to_string();
        config.pipeline.buffer_size = 4096;

        let text = config.to_toml().unwrap();
        assert_eq!(VkComputeConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn load_reads_file_and_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vkcompute.toml");
        std::fs::write(&path, "[instance]\napp_name = \"from-file\"\n").unwrap();

        let loaded = VkComputeConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.instance.app_name, "from-file");

        let missing = dir.path().join("absent.toml");
        let err = VkComputeConfig::load(missing.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
        assert_eq!(
            VkComputeConfig::load_or_default(missing.to_str().unwrap()),
            VkComputeConfig::default()
        );
    }
}
