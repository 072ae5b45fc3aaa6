//! Validate command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use sam_core::{BuildConfig, BuildContext};

/// Run the validate command.
pub fn run(config_path: &Path, format: &str) -> Result<()> {
    let config = BuildConfig::from_yaml(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let variant = config
        .validate()
        .with_context(|| "Configuration validation failed")?;
    let context = BuildContext::new(config.image_size)
        .with_context(|| "Configuration validation failed")?;

    match format {
        "json" => {
            let result = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "embed_dim": variant.embed_dim,
                "depth": variant.depth,
                "num_heads": variant.num_heads,
                "global_attn_block_indices": variant.global_attn_block_indices,
                "image_size": config.image_size,
                "token_grid_size": context.token_grid_size,
                "checkpoint": config.checkpoint.as_ref().map(|p| p.display().to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Config is valid: {:?}", config_path);
            println!("  Embed Dim: {}", variant.embed_dim);
            println!("  Depth: {}", variant.depth);
            println!("  Attention Heads: {}", variant.num_heads);
            println!("  Global Blocks: {:?}", variant.global_attn_block_indices);
            println!("  Image Size: {}", config.image_size);
            println!("  Token Grid: {}x{}", context.token_grid_size, context.token_grid_size);
            if let Some(checkpoint) = &config.checkpoint {
                println!("  Checkpoint: {:?}", checkpoint);
            }
        }
    }

    Ok(())
}
