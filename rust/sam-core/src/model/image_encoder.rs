//! ViT image encoder with windowed and global attention blocks.

use serde::Serialize;

use super::param_spec::{Init, ParamSpecs};
use super::{BuildContext, MLP_RATIO, WINDOW_SIZE};
use crate::config::VariantConfig;

/// How a transformer block restricts attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "size")]
pub enum BlockAttention {
    /// Attend over the full token grid of the given side length.
    Global(usize),
    /// Attend within non-overlapping windows of the given side length.
    Windowed(usize),
}

impl BlockAttention {
    /// Side length of the square the block attends over.
    pub fn extent(&self) -> usize {
        match self {
            BlockAttention::Global(size) | BlockAttention::Windowed(size) => *size,
        }
    }

    /// Number of rows in this block's relative position tables.
    pub fn rel_pos_span(&self) -> usize {
        2 * self.extent() - 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageEncoderConfig {
    pub img_size: usize,
    pub patch_size: usize,
    pub in_chans: usize,
    /// Width, depth, heads and global blocks.
    #[serde(flatten)]
    pub variant: VariantConfig,
    pub mlp_ratio: usize,
    pub out_chans: usize,
    pub qkv_bias: bool,
    pub use_rel_pos: bool,
    pub window_size: usize,
    pub norm_eps: f64,
}

impl ImageEncoderConfig {
    pub fn new(variant: &VariantConfig, context: &BuildContext) -> Self {
        ImageEncoderConfig {
            img_size: context.image_size,
            patch_size: context.patch_size,
            in_chans: 3,
            variant: variant.clone(),
            mlp_ratio: MLP_RATIO,
            out_chans: context.prompt_embed_dim,
            qkv_bias: true,
            use_rel_pos: true,
            window_size: WINDOW_SIZE,
            norm_eps: 1e-6,
        }
    }

    /// Side length of the patch token grid.
    pub fn grid_size(&self) -> usize {
        self.img_size / self.patch_size
    }

    pub fn head_dim(&self) -> usize {
        self.variant.head_dim()
    }

    pub fn mlp_dim(&self) -> usize {
        self.variant.embed_dim * self.mlp_ratio
    }

    pub fn block_attention(&self, block: usize) -> BlockAttention {
        if self.variant.is_global(block) {
            BlockAttention::Global(self.grid_size())
        } else {
            BlockAttention::Windowed(self.window_size)
        }
    }

    /// Parameter contract, with names relative to the encoder.
    pub fn parameter_specs(&self) -> ParamSpecs {
        let dim = self.variant.embed_dim;
        let grid = self.grid_size();
        let mut specs = ParamSpecs::new();

        specs.push("pos_embed", vec![1, grid, grid, dim], Init::Zeros);
        specs.conv2d("patch_embed.proj", self.in_chans, dim, self.patch_size, true);

        for block in 0..self.variant.depth {
            let mut b = ParamSpecs::new();
            b.layer_norm("norm1", dim);
            b.linear("attn.qkv", dim, 3 * dim, self.qkv_bias);
            b.linear("attn.proj", dim, dim, true);
            if self.use_rel_pos {
                let span = self.block_attention(block).rel_pos_span();
                b.push("attn.rel_pos_h", vec![span, self.head_dim()], Init::Zeros);
                b.push("attn.rel_pos_w", vec![span, self.head_dim()], Init::Zeros);
            }
            b.layer_norm("norm2", dim);
            b.linear("mlp.lin1", dim, self.mlp_dim(), true);
            b.linear("mlp.lin2", self.mlp_dim(), dim, true);
            specs.nest(&format!("blocks.{}", block), b);
        }

        specs.conv2d("neck.0", dim, self.out_chans, 1, false);
        specs.layer_norm("neck.1", self.out_chans);
        specs.conv2d("neck.2", self.out_chans, self.out_chans, 3, false);
        specs.layer_norm("neck.3", self.out_chans);

        specs
    }
}
