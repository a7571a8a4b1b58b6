use serde::{Deserialize, Serialize};

use crate::error::{PrismError, PrismResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerPreference {
    #[default]
    High,
    Low,
}

/// Forces a color transform path regardless of render mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorMethodOverride {
    /// Pick from the render mode.
    #[default]
    Auto,
    Accurate,
    Fast,
    Disabled,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GpuConfig {
    #[serde(default)]
    pub power_preference: PowerPreference,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Idle textures kept per render-target spec; surplus ones are destroyed.
    /// `None`, set in code, keeps every released texture until teardown.
    #[serde(default = "default_max_idle")]
    pub max_idle_textures_per_spec: Option<usize>,
}

fn default_max_idle() -> Option<usize> {
    Some(8)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_idle_textures_per_spec: default_max_idle(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ColorConfig {
    #[serde(default)]
    pub method: ColorMethodOverride,
}

/// Per-engine settings, usually read from `prism.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub gpu: GpuConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub color: ColorConfig,
}

impl EngineConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(contents: &str) -> PrismResult<Self> {
        toml::from_str(contents).map_err(|e| PrismError::config(e.to_string(), "<inline>"))
    }

    pub fn load_from_file(path: &std::path::Path) -> PrismResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| PrismError::config(e.to_string(), path))
    }

    pub fn save_to_file(&self, path: &std::path::Path) -> PrismResult<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| PrismError::config(e.to_string(), path))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
