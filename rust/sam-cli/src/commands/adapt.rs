//! Adapt command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sam_core::{build_from_config_with_report, save_safetensors, BuildConfig};
use tracing::info;

/// Where the build parameters come from.
pub enum Source {
    Config(PathBuf),
    Flags {
        variant: String,
        image_size: usize,
        checkpoint: Option<PathBuf>,
        seed: u64,
    },
}

impl Source {
    fn into_build_config(self) -> Result<BuildConfig> {
        match self {
            Source::Config(path) => BuildConfig::from_yaml(&path)
                .with_context(|| format!("Failed to load config from {:?}", path)),
            Source::Flags {
                variant,
                image_size,
                checkpoint,
                seed,
            } => {
                let mut config = BuildConfig::new(variant.as_str(), image_size);
                config.checkpoint = checkpoint;
                config.seed = seed;
                Ok(config)
            }
        }
    }
}

/// Run the adapt command.
pub fn run(source: Source, output: &Path, format: &str) -> Result<()> {
    let config = source.into_build_config()?;
    if config.checkpoint.is_none() {
        info!("no checkpoint given; writing freshly initialized parameters");
    }

    let (sam, report) = build_from_config_with_report(&config).with_context(|| {
        format!(
            "Failed to build model at image size {} from checkpoint {:?}",
            config.image_size, config.checkpoint
        )
    })?;

    save_safetensors(sam.state_dict(), output)
        .with_context(|| format!("Failed to write {:?}", output))?;

    match format {
        "json" => {
            let result = serde_json::json!({
                "output": output.display().to_string(),
                "image_size": config.image_size,
                "token_grid_size": sam.context().token_grid_size,
                "tensors": sam.state_dict().len(),
                "checkpoint": config.checkpoint.as_ref().map(|p| p.display().to_string()),
                "adaptation": report.as_ref().map(|r| serde_json::json!({
                    "direct": r.direct,
                    "carried": r.carried.len(),
                    "resampled": r.resampled,
                    "dropped": r.dropped,
                    "initialized": r.initialized,
                })),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Wrote {} tensors to {:?}", sam.state_dict().len(), output);
            println!(
                "  Image Size: {} (token grid {}x{})",
                config.image_size,
                sam.context().token_grid_size,
                sam.context().token_grid_size
            );
            if let Some(report) = &report {
                if report.direct {
                    println!("  Checkpoint matched the model exactly");
                } else {
                    println!("  Carried:     {}", report.carried.len());
                    println!("  Resampled:   {}", report.resampled.len());
                    for name in &report.resampled {
                        println!("    {}", name);
                    }
                    println!("  Dropped:     {}", report.dropped.len());
                    println!("  Initialized: {}", report.initialized.len());
                }
            }
        }
    }

    Ok(())
}
