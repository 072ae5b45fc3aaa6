//! Fixed table of named image-encoder variants.

use crate::config::VariantConfig;
use crate::error::{Error, Result};

struct VariantPreset {
    name: &'static str,
    embed_dim: usize,
    depth: usize,
    num_heads: usize,
    global_attn_block_indices: &'static [usize],
}

impl VariantPreset {
    fn to_config(&self) -> VariantConfig {
        VariantConfig {
            embed_dim: self.embed_dim,
            depth: self.depth,
            num_heads: self.num_heads,
            global_attn_block_indices: self.global_attn_block_indices.to_vec(),
        }
    }
}

const VIT_H: VariantPreset = VariantPreset {
    name: "vit_h",
    embed_dim: 1280,
    depth: 32,
    num_heads: 16,
    global_attn_block_indices: &[7, 15, 23, 31],
};

// Global blocks close each quarter of the depth.
static VARIANTS: &[VariantPreset] = &[
    VariantPreset {
        name: "default",
        ..VIT_H
    },
    VIT_H,
    VariantPreset {
        name: "vit_l",
        embed_dim: 1024,
        depth: 24,
        num_heads: 16,
        global_attn_block_indices: &[5, 11, 17, 23],
    },
    VariantPreset {
        name: "vit_b",
        embed_dim: 768,
        depth: 12,
        num_heads: 12,
        global_attn_block_indices: &[2, 5, 8, 11],
    },
    VariantPreset {
        name: "vit_p50",
        embed_dim: 384,
        depth: 12,
        num_heads: 12,
        global_attn_block_indices: &[2, 5, 8, 11],
    },
    VariantPreset {
        name: "vit_p77",
        embed_dim: 168,
        depth: 12,
        num_heads: 12,
        global_attn_block_indices: &[2, 5, 8, 11],
    },
];

/// Look up a registered variant by name.
pub fn resolve(name: &str) -> Result<VariantConfig> {
    VARIANTS
        .iter()
        .find(|preset| preset.name == name)
        .map(VariantPreset::to_config)
        .ok_or_else(|| Error::UnknownVariant {
            name: name.to_string(),
            known: variant_names().join(", "),
        })
}

/// Registered variant names, in registration order.
pub fn variant_names() -> Vec<&'static str> {
    VARIANTS.iter().map(|preset| preset.name).collect()
}

/// Every registered variant with its configuration.
pub fn list_variants() -> impl Iterator<Item = (&'static str, VariantConfig)> {
    VARIANTS.iter().map(|preset| (preset.name, preset.to_config()))
}
