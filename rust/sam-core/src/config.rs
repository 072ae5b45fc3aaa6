//! Architecture and build configuration types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry;

/// Hyperparameters that distinguish one image-encoder variant from another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConfig {
    pub embed_dim: usize,
    pub depth: usize,
    pub num_heads: usize,
    /// Blocks that attend over the whole token grid; all others use windows.
    pub global_attn_block_indices: Vec<usize>,
}

impl VariantConfig {
    /// Load a VariantConfig from a YAML file.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a VariantConfig from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: VariantConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::Validation("depth must be > 0".to_string()));
        }

        if self.num_heads == 0 || self.embed_dim == 0 {
            return Err(Error::Validation(
                "embed_dim and num_heads must be > 0".to_string(),
            ));
        }

        if self.embed_dim % self.num_heads != 0 {
            return Err(Error::Validation(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                self.embed_dim, self.num_heads
            )));
        }

        if let Some(&index) = self
            .global_attn_block_indices
            .iter()
            .find(|&&i| i >= self.depth)
        {
            return Err(Error::Validation(format!(
                "global attention block {} is out of range for depth {}",
                index, self.depth
            )));
        }

        if self
            .global_attn_block_indices
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
        {
            return Err(Error::Validation(format!(
                "global attention blocks must be strictly increasing, got {:?}",
                self.global_attn_block_indices
            )));
        }

        Ok(())
    }

    /// Per-head channel width.
    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    /// True if `block` attends over the whole token grid.
    pub fn is_global(&self, block: usize) -> bool {
        self.global_attn_block_indices.contains(&block)
    }
}

/// Either a registered variant name or an inline architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantSpec {
    Named(String),
    Custom(VariantConfig),
}

impl VariantSpec {
    /// Resolve to a concrete, validated architecture.
    pub fn resolve(&self) -> Result<VariantConfig> {
        match self {
            VariantSpec::Named(name) => registry::resolve(name),
            VariantSpec::Custom(config) => {
                config.validate()?;
                Ok(config.clone())
            }
        }
    }
}

impl From<&str> for VariantSpec {
    fn from(name: &str) -> Self {
        VariantSpec::Named(name.to_string())
    }
}

/// Everything needed to build one model instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub variant: VariantSpec,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    /// Checkpoint to adapt and load; freshly initialized when absent.
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,
    /// Seed for the fresh parameter initialization.
    #[serde(default)]
    pub seed: u64,
}

pub fn default_image_size() -> usize {
    1024
}

impl BuildConfig {
    pub fn new(variant: impl Into<VariantSpec>, image_size: usize) -> Self {
        BuildConfig {
            variant: variant.into(),
            image_size,
            checkpoint: None,
            seed: 0,
        }
    }

    /// Load a BuildConfig from a YAML file.
    ///
    /// A relative checkpoint path is resolved against the file's directory.
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;

        if let (Some(checkpoint), Some(dir)) = (config.checkpoint.as_ref(), path.parent()) {
            if checkpoint.is_relative() {
                config.checkpoint = Some(dir.join(checkpoint));
            }
        }
        Ok(config)
    }

    /// Parse a BuildConfig from a YAML string.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: BuildConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Validate the configuration, resolving the variant.
    pub fn validate(&self) -> Result<VariantConfig> {
        let variant = self.variant.resolve()?;

        if self.image_size < crate::model::PATCH_SIZE {
            return Err(Error::Validation(format!(
                "image_size ({}) must be at least the patch size ({})",
                self.image_size,
                crate::model::PATCH_SIZE
            )));
        }

        Ok(variant)
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })
}
