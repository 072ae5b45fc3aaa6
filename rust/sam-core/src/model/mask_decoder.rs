//! Mask decoder: a two-way transformer followed by upscaling and hypernetwork heads.
//!
//! Its shape does not depend on the encoder variant or the input resolution.

use serde::Serialize;

use super::param_spec::ParamSpecs;
use super::BuildContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TwoWayTransformerConfig {
    pub depth: usize,
    pub embedding_dim: usize,
    pub num_heads: usize,
    pub mlp_dim: usize,
    /// Channel reduction inside the token/image cross-attention layers.
    pub attention_downsample_rate: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskDecoderConfig {
    pub transformer_dim: usize,
    pub transformer: TwoWayTransformerConfig,
    pub num_multimask_outputs: usize,
    pub iou_head_depth: usize,
    pub iou_head_hidden_dim: usize,
}

impl MaskDecoderConfig {
    pub fn new(context: &BuildContext) -> Self {
        let dim = context.prompt_embed_dim;
        MaskDecoderConfig {
            transformer_dim: dim,
            transformer: TwoWayTransformerConfig {
                depth: 2,
                embedding_dim: dim,
                num_heads: 8,
                mlp_dim: 2048,
                attention_downsample_rate: 2,
            },
            num_multimask_outputs: 3,
            iou_head_depth: 3,
            iou_head_hidden_dim: 256,
        }
    }

    /// Multimask outputs plus the single-mask token.
    pub fn num_mask_tokens(&self) -> usize {
        self.num_multimask_outputs + 1
    }

    /// Parameter contract, with names relative to the decoder.
    pub fn parameter_specs(&self) -> ParamSpecs {
        let dim = self.transformer_dim;
        let mut specs = ParamSpecs::new();

        specs.nest("transformer", self.transformer.parameter_specs());
        specs.embedding("iou_token", 1, dim);
        specs.embedding("mask_tokens", self.num_mask_tokens(), dim);

        specs.conv_transpose2d("output_upscaling.0", dim, dim / 4, 2);
        specs.layer_norm("output_upscaling.1", dim / 4);
        specs.conv_transpose2d("output_upscaling.3", dim / 4, dim / 8, 2);

        for i in 0..self.num_mask_tokens() {
            specs.nest(
                &format!("output_hypernetworks_mlps.{}", i),
                mlp(dim, dim, dim / 8, 3),
            );
        }
        specs.nest(
            "iou_prediction_head",
            mlp(
                dim,
                self.iou_head_hidden_dim,
                self.num_mask_tokens(),
                self.iou_head_depth,
            ),
        );

        specs
    }
}

impl TwoWayTransformerConfig {
    pub fn parameter_specs(&self) -> ParamSpecs {
        let dim = self.embedding_dim;
        let rate = self.attention_downsample_rate;
        let mut specs = ParamSpecs::new();

        for layer in 0..self.depth {
            let mut l = ParamSpecs::new();
            l.nest("self_attn", attention(dim, 1));
            l.layer_norm("norm1", dim);
            l.nest("cross_attn_token_to_image", attention(dim, rate));
            l.layer_norm("norm2", dim);
            l.linear("mlp.lin1", dim, self.mlp_dim, true);
            l.linear("mlp.lin2", self.mlp_dim, dim, true);
            l.layer_norm("norm3", dim);
            l.layer_norm("norm4", dim);
            l.nest("cross_attn_image_to_token", attention(dim, rate));
            specs.nest(&format!("layers.{}", layer), l);
        }

        specs.nest("final_attn_token_to_image", attention(dim, rate));
        specs.layer_norm("norm_final_attn", dim);

        specs
    }
}

/// Attention with query/key/value projected down to `dim / downsample_rate`.
fn attention(dim: usize, downsample_rate: usize) -> ParamSpecs {
    let internal = dim / downsample_rate;
    let mut specs = ParamSpecs::new();
    specs.linear("q_proj", dim, internal, true);
    specs.linear("k_proj", dim, internal, true);
    specs.linear("v_proj", dim, internal, true);
    specs.linear("out_proj", internal, dim, true);
    specs
}

/// `num_layers` linear layers: input -> hidden -> ... -> output.
fn mlp(input: usize, hidden: usize, output: usize, num_layers: usize) -> ParamSpecs {
    let mut specs = ParamSpecs::new();
    for i in 0..num_layers {
        let n_in = if i == 0 { input } else { hidden };
        let n_out = if i + 1 == num_layers { output } else { hidden };
        specs.linear(&format!("layers.{}", i), n_in, n_out, true);
    }
    specs
}
