//! Configuration system
//!
//! Backend configuration can be loaded from TOML or RON files. Everything has a
//! default, so a missing section simply keeps the queried device behaviour.

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Forces the device onto a lower capability tier than the hardware reports.
///
/// Useful for exercising the fallback descriptor and indirect-draw paths on
/// hardware that would otherwise always take the fast path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityOverrides {
    /// Ignore `VK_KHR_push_descriptor` even when present
    pub disable_push_descriptor: bool,
    /// Ignore descriptor update templates even when present
    pub disable_descriptor_update_template: bool,
    /// Ignore the `multiDrawIndirect` feature even when present
    pub disable_multi_draw_indirect: bool,
}

/// Sizing for each native descriptor pool the device creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Maximum descriptor sets allocated from one native pool
    pub max_sets_per_pool: u32,
    /// Descriptors reserved per descriptor type, per set
    pub descriptors_per_type: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            max_sets_per_pool: 128,
            descriptors_per_type: 8,
        }
    }
}

/// Top-level backend configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxConfig {
    /// Capability tier overrides
    pub capabilities: CapabilityOverrides,
    /// Descriptor pool sizing
    pub descriptor_pool: DescriptorPoolConfig,
    /// Optional log filter passed to `env_logger` (e.g. `"gfx_vulkan=debug"`)
    pub log_level: Option<String>,
}

impl Config for GfxConfig {}

impl GfxConfig {
    /// Initialize logging using `log_level`, falling back to `RUST_LOG`
    pub fn init_logging(&self) {
        match &self.log_level {
            Some(filter) => crate::foundation::logging::init_with_filter(filter),
            None => crate::foundation::logging::init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("gfx_vulkan_{}_{}", std::process::id(), name))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn test_defaults() {
        let config = GfxConfig::default();
        assert!(!config.capabilities.disable_push_descriptor);
        assert_eq!(config.descriptor_pool.max_sets_per_pool, 128);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: GfxConfig = toml::from_str(
            "[capabilities]\ndisable_push_descriptor = true\n",
        )
        .unwrap();
        assert!(config.capabilities.disable_push_descriptor);
        assert!(!config.capabilities.disable_multi_draw_indirect);
        assert_eq!(config.descriptor_pool, DescriptorPoolConfig::default());
    }

    #[test]
    fn test_toml_file_round_trip() {
        let path = temp_path("config.toml");
        let mut config = GfxConfig::default();
        config.capabilities.disable_descriptor_update_template = true;
        config.descriptor_pool.max_sets_per_pool = 16;
        config.log_level = Some("debug".to_string());

        config.save_to_file(&path).unwrap();
        let loaded = GfxConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_file_round_trip() {
        let path = temp_path("config.ron");
        let mut config = GfxConfig::default();
        config.capabilities.disable_multi_draw_indirect = true;

        config.save_to_file(&path).unwrap();
        let loaded = GfxConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_format() {
        let result = GfxConfig::default().save_to_file("config.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
