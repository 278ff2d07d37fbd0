//! TOML configuration for a cardgen process.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::request::DEFAULT_MAX_VARIATIONS;

pub const DEFAULT_CONFIG_FILE: &str = "cardgen.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Username to plain secret. Read-only for the lifetime of the process.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default = "default_image_model")]
    pub edit_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryConfig {
    /// A new submission replaces the gallery bucket of its own kind.
    #[serde(default = "default_true")]
    pub replace_on_generate: bool,
    #[serde(default = "default_export_min_images")]
    pub export_min_images: usize,
    #[serde(default)]
    pub empty_slot: EmptySlotPolicy,
    #[serde(default = "default_max_variations")]
    pub max_variations: u32,
}

/// What to do with a provider response slot that carries no image data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptySlotPolicy {
    #[default]
    Skip,
    Fail,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_image_model() -> String {
    "gpt-image-1".to_string()
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

fn default_export_min_images() -> usize {
    1
}

fn default_max_variations() -> u32 {
    DEFAULT_MAX_VARIATIONS
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_base: None,
            model: default_image_model(),
            edit_model: default_image_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            replace_on_generate: default_true(),
            export_min_images: default_export_min_images(),
            empty_slot: EmptySlotPolicy::default(),
            max_variations: default_max_variations(),
        }
    }
}

impl StudioConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        Self::from_toml(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: StudioConfig = toml::from_str(contents)?;
        if config.gallery.max_variations == 0 {
            anyhow::bail!("gallery.max_variations must be at least 1");
        }
        Ok(config)
    }

    /// Reads `path` when it exists, otherwise falls back to defaults (which
    /// carry no credentials, so nobody can log in).
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::from_file(path);
        }
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::{EmptySlotPolicy, StudioConfig};

    #[test]
    fn parses_full_config() -> anyhow::Result<()> {
        let config = StudioConfig::from_toml(
            r#"
[credentials]
alice = "wonderland"
bob = "builder"

[provider]
name = "dryrun"
api_base = "http://localhost:9000/v1"
model = "gpt-image-1"
edit_model = "dall-e-2"
timeout_secs = 30

[gallery]
replace_on_generate = false
export_min_images = 2
empty_slot = "fail"
max_variations = 6
"#,
        )?;
        assert_eq!(config.credentials.get("alice").map(String::as_str), Some("wonderland"));
        assert_eq!(config.provider.name, "dryrun");
        assert_eq!(config.provider.edit_model, "dall-e-2");
        assert_eq!(config.provider.timeout_secs, 30);
        assert!(!config.gallery.replace_on_generate);
        assert_eq!(config.gallery.export_min_images, 2);
        assert_eq!(config.gallery.empty_slot, EmptySlotPolicy::Fail);
        assert_eq!(config.gallery.max_variations, 6);
        Ok(())
    }

    #[test]
    fn missing_sections_use_defaults() -> anyhow::Result<()> {
        let config = StudioConfig::from_toml("[credentials]\nalice = \"x\"\n")?;
        assert_eq!(config.provider.name, "openai");
        assert_eq!(config.provider.model, "gpt-image-1");
        assert!(config.gallery.replace_on_generate);
        assert_eq!(config.gallery.export_min_images, 1);
        assert_eq!(config.gallery.empty_slot, EmptySlotPolicy::Skip);
        assert_eq!(config.gallery.max_variations, 10);
        Ok(())
    }

    #[test]
    fn zero_max_variations_is_rejected() {
        assert!(StudioConfig::from_toml("[gallery]\nmax_variations = 0\n").is_err());
    }

    #[test]
    fn load_or_default_tolerates_missing_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = StudioConfig::load_or_default(temp.path().join("absent.toml"))?;
        assert!(config.credentials.is_empty());

        let path = temp.path().join("cardgen.toml");
        std::fs::write(&path, "[credentials]\ncarol = \"pw\"\n")?;
        let config = StudioConfig::load_or_default(&path)?;
        assert!(config.credentials.contains_key("carol"));
        Ok(())
    }
}
