//! Parameter counts and architecture summary of an assembled model.

use candle_core::DType;
use serde::{Serialize, Serializer};

use super::SamConfig;

/// Summary of model architecture and parameter counts.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub total_params: usize,
    pub image_encoder_params: usize,
    pub prompt_encoder_params: usize,
    pub mask_decoder_params: usize,
    pub num_tensors: usize,
    pub embed_dim: usize,
    pub depth: usize,
    pub num_heads: usize,
    pub head_dim: usize,
    pub global_attn_block_indices: Vec<usize>,
    pub window_size: usize,
    pub image_size: usize,
    pub patch_size: usize,
    pub token_grid_size: usize,
    pub prompt_embed_dim: usize,
    #[serde(serialize_with = "serialize_dtype")]
    pub dtype: DType,
}

fn serialize_dtype<S: Serializer>(dtype: &DType, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(dtype.as_str())
}

impl ModelSummary {
    pub fn new(config: &SamConfig, dtype: DType) -> Self {
        let image_encoder_params = config.image_encoder.parameter_specs().total_params();
        let prompt_encoder_params = config.prompt_encoder.parameter_specs().total_params();
        let mask_decoder_params = config.mask_decoder.parameter_specs().total_params();

        ModelSummary {
            total_params: image_encoder_params + prompt_encoder_params + mask_decoder_params,
            image_encoder_params,
            prompt_encoder_params,
            mask_decoder_params,
            num_tensors: config.parameter_specs().len(),
            embed_dim: config.variant.embed_dim,
            depth: config.variant.depth,
            num_heads: config.variant.num_heads,
            head_dim: config.variant.head_dim(),
            global_attn_block_indices: config.variant.global_attn_block_indices.clone(),
            window_size: config.image_encoder.window_size,
            image_size: config.context.image_size,
            patch_size: config.context.patch_size,
            token_grid_size: config.context.token_grid_size,
            prompt_embed_dim: config.context.prompt_embed_dim,
            dtype,
        }
    }

    /// Estimated memory for model parameters in bytes.
    pub fn param_memory_bytes(&self) -> usize {
        self.total_params * self.dtype.size_in_bytes()
    }

    /// Format the summary as a human-readable string.
    pub fn display(&self) -> String {
        let param_mb = self.param_memory_bytes() as f64 / 1_000_000.0;
        let total_m = self.total_params as f64 / 1_000_000.0;

        format!(
            r#"Model Summary
=============
Image Encoder:
  Embed Dim:          {}
  Depth:              {}
  Attention Heads:    {}
  Head Dimension:     {}
  Global Blocks:      {:?}
  Window Size:        {}

Input:
  Image Size:         {}
  Patch Size:         {}
  Token Grid:         {}x{}
  Prompt Embed Dim:   {}

Parameters:
  Total:              {:.2}M
  Image Encoder:      {}
  Prompt Encoder:     {}
  Mask Decoder:       {}
  Tensors:            {}

Memory:
  Parameters:         {:.2} MB ({})"#,
            self.embed_dim,
            self.depth,
            self.num_heads,
            self.head_dim,
            self.global_attn_block_indices,
            self.window_size,
            self.image_size,
            self.patch_size,
            self.token_grid_size,
            self.token_grid_size,
            self.prompt_embed_dim,
            total_m,
            self.image_encoder_params,
            self.prompt_encoder_params,
            self.mask_decoder_params,
            self.num_tensors,
            param_mb,
            self.dtype.as_str(),
        )
    }
}
