//! Summarize command implementation.

use anyhow::{Context, Result};
use sam_core::{registry, SamConfig};

/// Run the summarize command.
pub fn run(variant: &str, image_size: usize, format: &str) -> Result<()> {
    let variant_config = registry::resolve(variant)?;

    // Shapes only; no parameters are allocated.
    let config = SamConfig::new(&variant_config, image_size)
        .with_context(|| format!("Failed to assemble '{}' at image size {}", variant, image_size))?;
    let summary = config.summary();

    match format {
        "json" => {
            let result = serde_json::json!({
                "variant": variant,
                "architecture": {
                    "embed_dim": summary.embed_dim,
                    "depth": summary.depth,
                    "num_heads": summary.num_heads,
                    "head_dim": summary.head_dim,
                    "global_attn_block_indices": summary.global_attn_block_indices,
                    "window_size": summary.window_size,
                },
                "input": {
                    "image_size": summary.image_size,
                    "patch_size": summary.patch_size,
                    "token_grid_size": summary.token_grid_size,
                    "prompt_embed_dim": summary.prompt_embed_dim,
                },
                "parameters": {
                    "total": summary.total_params,
                    "total_millions": summary.total_params as f64 / 1_000_000.0,
                    "image_encoder": summary.image_encoder_params,
                    "prompt_encoder": summary.prompt_encoder_params,
                    "mask_decoder": summary.mask_decoder_params,
                    "tensors": summary.num_tensors,
                },
                "memory": {
                    "params_bytes": summary.param_memory_bytes(),
                    "params_mb": summary.param_memory_bytes() as f64 / 1_000_000.0,
                    "dtype": summary.dtype.as_str(),
                },
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Variant: {}", variant);
            println!("{}", summary.display());
        }
    }

    Ok(())
}
