//! Build entry points: resolve a variant, assemble the model and load a checkpoint.

use tracing::info;

use crate::adapter::{self, AdaptReport};
use crate::checkpoint::{CheckpointSource, SafetensorsCheckpoint};
use crate::config::{BuildConfig, VariantConfig};
use crate::error::Result;
use crate::model::Sam;
use crate::registry;

/// Build a registered variant at `image_size`, optionally loading a checkpoint.
///
/// An unknown variant fails before anything is allocated.
pub fn build_sam(
    variant: &str,
    image_size: usize,
    checkpoint: Option<&dyn CheckpointSource>,
) -> Result<Sam> {
    let variant = registry::resolve(variant)?;
    build_sam_with_variant(&variant, image_size, checkpoint, 0)
}

/// Build an arbitrary architecture at `image_size`.
///
/// `seed` drives the fresh initialization of parameters the checkpoint does
/// not provide.
pub fn build_sam_with_variant(
    variant: &VariantConfig,
    image_size: usize,
    checkpoint: Option<&dyn CheckpointSource>,
    seed: u64,
) -> Result<Sam> {
    build_sam_with_report(variant, image_size, checkpoint, seed).map(|(sam, _)| sam)
}

/// Like [`build_sam_with_variant`], also returning how the checkpoint was
/// adapted. The report is `None` when no checkpoint was given.
pub fn build_sam_with_report(
    variant: &VariantConfig,
    image_size: usize,
    checkpoint: Option<&dyn CheckpointSource>,
    seed: u64,
) -> Result<(Sam, Option<AdaptReport>)> {
    let mut sam = Sam::assemble(variant, image_size, seed)?;

    let Some(source) = checkpoint else {
        return Ok((sam, None));
    };

    info!(source = %source.describe(), "loading checkpoint");
    let params = source.load()?;
    let (adapted, report) = adapter::adapt_with_report(
        &params,
        sam.state_dict(),
        sam.context(),
        &variant.global_attn_block_indices,
    )?;
    sam.load_parameters(adapted)?;

    Ok((sam, Some(report)))
}

/// Build from a [`BuildConfig`], reading its checkpoint file if one is set.
pub fn build_from_config(config: &BuildConfig) -> Result<Sam> {
    build_from_config_with_report(config).map(|(sam, _)| sam)
}

/// Like [`build_from_config`], also returning the adaptation report.
pub fn build_from_config_with_report(config: &BuildConfig) -> Result<(Sam, Option<AdaptReport>)> {
    let variant = config.validate()?;
    let checkpoint = config.checkpoint.as_ref().map(SafetensorsCheckpoint::new);

    build_sam_with_report(
        &variant,
        config.image_size,
        checkpoint.as_ref().map(|c| c as &dyn CheckpointSource),
        config.seed,
    )
}
