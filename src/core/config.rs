use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::services::image::ImageConfig;
use crate::services::llm::LlmConfig;

pub const CONFIG_FILE: &str = "storybook.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub llm: LlmConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub style: StyleOptions,
}

/// Story-wide illustration defaults, used when a caller supplies nothing
/// more specific.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StyleOptions {
    #[serde(default = "default_illustration_style")]
    pub illustration_style: String,

    #[serde(default)]
    pub palette_hint: Option<String>,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            illustration_style: default_illustration_style(),
            palette_hint: None,
        }
    }
}

fn default_illustration_style() -> String {
    "soft, friendly digital illustration for young children".to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
