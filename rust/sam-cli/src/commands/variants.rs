//! Variants command implementation.

use anyhow::Result;
use sam_core::registry;

/// Run the variants command.
pub fn run(format: &str) -> Result<()> {
    match format {
        "json" => {
            let variants: Vec<_> = registry::list_variants()
                .map(|(name, config)| {
                    serde_json::json!({
                        "name": name,
                        "embed_dim": config.embed_dim,
                        "depth": config.depth,
                        "num_heads": config.num_heads,
                        "global_attn_block_indices": config.global_attn_block_indices,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&variants)?);
        }
        _ => {
            println!(
                "{:<10} {:>9} {:>6} {:>6}  {}",
                "Name", "Embed Dim", "Depth", "Heads", "Global Blocks"
            );
            for (name, config) in registry::list_variants() {
                println!(
                    "{:<10} {:>9} {:>6} {:>6}  {:?}",
                    name,
                    config.embed_dim,
                    config.depth,
                    config.num_heads,
                    config.global_attn_block_indices
                );
            }
        }
    }

    Ok(())
}
