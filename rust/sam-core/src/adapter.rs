//! Reconciles a checkpoint with the parameter contract of a freshly built model.
//!
//! A checkpoint trained at another input resolution carries a position
//! embedding and global-attention relative position tables sized for the old
//! token grid. Those are resampled with aligned-corner bilinear
//! interpolation; every other shared parameter is carried over untouched.

use candle_core::Tensor;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::interpolate::{resample_axis_aligned, resize_bilinear_aligned};
use crate::model::BuildContext;
use crate::params::{ParamPath, ParameterSet, POS_EMBED_KEY};

/// What happened to each parameter during adaptation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptReport {
    /// The checkpoint matched the target exactly and was returned as-is.
    pub direct: bool,
    /// Carried over from the checkpoint without change.
    pub carried: Vec<String>,
    /// Taken from the checkpoint and resampled to the target grid.
    pub resampled: Vec<String>,
    /// Checkpoint entries that the target does not know.
    pub dropped: Vec<String>,
    /// Target entries left at their fresh value, either absent from the
    /// checkpoint or still mismatched after resampling.
    pub initialized: Vec<String>,
}

/// Produce a parameter set loadable into the model described by `target`.
///
/// The result has exactly the names of `target`. The only failure is a
/// checkpoint that needs adapting but has no absolute position embedding.
pub fn adapt(
    checkpoint: &ParameterSet,
    target: &ParameterSet,
    context: &BuildContext,
    global_attn_block_indices: &[usize],
) -> Result<ParameterSet> {
    adapt_with_report(checkpoint, target, context, global_attn_block_indices).map(|(set, _)| set)
}

/// Like [`adapt`], also reporting the fate of every parameter.
pub fn adapt_with_report(
    checkpoint: &ParameterSet,
    target: &ParameterSet,
    context: &BuildContext,
    global_attn_block_indices: &[usize],
) -> Result<(ParameterSet, AdaptReport)> {
    let mut report = AdaptReport::default();

    let compatibility = target.compatibility_of(checkpoint);
    if compatibility.is_exact() {
        debug!(parameters = checkpoint.len(), "checkpoint matches the model exactly");
        report.direct = true;
        report.carried = checkpoint.keys().map(str::to_string).collect();
        return Ok((checkpoint.clone(), report));
    }
    debug!(
        missing = compatibility.missing.len(),
        unexpected = compatibility.unexpected.len(),
        mismatched = compatibility.mismatched.len(),
        "checkpoint needs adapting"
    );

    let mut adapted = target.clone();
    for (name, tensor) in checkpoint.iter() {
        if adapted.contains(name) {
            adapted.insert(name, tensor.clone());
        } else {
            debug!(name, "dropping parameter unknown to the model");
            report.dropped.push(name.to_string());
        }
    }

    let pos_embed = match (checkpoint.get(POS_EMBED_KEY), target.contains(POS_EMBED_KEY)) {
        (Some(tensor), true) => tensor,
        _ => return Err(Error::MissingPositionEmbeddingKey(POS_EMBED_KEY.to_string())),
    };

    let grid = context.token_grid_size;
    let mut resampled = Vec::new();
    if pos_embed_grid(pos_embed) != Some((grid, grid)) {
        if let Some(tensor) = resample_pos_embed(pos_embed, grid)? {
            debug!(
                from = ?pos_embed.dims(),
                to = ?tensor.dims(),
                "resampled absolute position embedding"
            );
            adapted.insert(POS_EMBED_KEY, tensor);
            resampled.push(POS_EMBED_KEY.to_string());
        }

        let span = context.rel_pos_span();
        for name in target.keys() {
            if !ParamPath::parse(name).is_rel_pos_bias_in(global_attn_block_indices) {
                continue;
            }
            let Some(table) = checkpoint.get(name) else {
                continue;
            };
            if table.dims().first() == Some(&span) {
                continue;
            }
            if let Some(tensor) = resample_rel_pos(table, span)? {
                debug!(name, from = ?table.dims(), to = ?tensor.dims(), "resampled relative position table");
                adapted.insert(name, tensor);
                resampled.push(name.to_string());
            }
        }
    }

    // Anything still disagreeing with the model keeps its fresh value.
    for (name, expected) in target.iter() {
        let from_checkpoint = checkpoint.contains(name);
        let current = adapted.get(name).map(Tensor::dims);
        if current != Some(expected.dims()) {
            warn!(
                name,
                expected = ?expected.dims(),
                actual = ?current,
                "checkpoint parameter incompatible with the model; keeping fresh value"
            );
            adapted.insert(name, expected.clone());
            resampled.retain(|n| n != name);
            report.initialized.push(name.to_string());
        } else if !from_checkpoint {
            report.initialized.push(name.to_string());
        } else if !resampled.iter().any(|n| n == name) {
            report.carried.push(name.to_string());
        }
    }
    report.resampled = resampled;

    info!(
        carried = report.carried.len(),
        resampled = report.resampled.len(),
        dropped = report.dropped.len(),
        initialized = report.initialized.len(),
        token_grid = grid,
        "adapted checkpoint"
    );

    Ok((adapted, report))
}

/// Spatial size of a `[batch, height, width, channels]` embedding.
fn pos_embed_grid(tensor: &Tensor) -> Option<(usize, usize)> {
    match tensor.dims() {
        [_, h, w, _] => Some((*h, *w)),
        _ => None,
    }
}

/// Resample a `[batch, h, w, c]` embedding to `[batch, grid, grid, c]`.
///
/// `None` when the tensor is not a non-empty 4-D grid.
fn resample_pos_embed(tensor: &Tensor, grid: usize) -> Result<Option<Tensor>> {
    match tensor.dims() {
        [_, h, w, c] if *h > 0 && *w > 0 && *c > 0 => {}
        _ => return Ok(None),
    }

    // Channels lead so each one is resized as an independent plane.
    let planes = tensor.permute((0, 3, 1, 2))?;
    let resized = resize_bilinear_aligned(&planes, (grid, grid))?;
    Ok(Some(resized.permute((0, 2, 3, 1))?.contiguous()?))
}

/// Resample the first axis of a `[len, dim]` table to `span` rows.
fn resample_rel_pos(tensor: &Tensor, span: usize) -> Result<Option<Tensor>> {
    match tensor.dims() {
        [len, dim] if *len > 0 && *dim > 0 => {}
        _ => return Ok(None),
    }
    Ok(Some(resample_axis_aligned(tensor, 0, span)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::tensors_identical;
    use candle_core::{DType, Device};

    const GLOBAL: &[usize] = &[1, 3];

    fn ramp(shape: &[usize], offset: f64) -> Tensor {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n).map(|i| (offset + i as f64 * 0.01) as f32).collect();
        Tensor::from_vec(values, shape, &Device::Cpu).unwrap()
    }

    fn values(tensor: &Tensor) -> Vec<f32> {
        tensor
            .to_dtype(DType::F32)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
    }

    fn same(a: Option<&Tensor>, b: Option<&Tensor>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => tensors_identical(a, b).unwrap(),
            _ => false,
        }
    }

    /// Parameter set of a four-block encoder at the given grid, channels 8, head dim 4.
    fn encoder_set(grid: usize, offset: f64) -> ParameterSet {
        let mut set = ParameterSet::new();
        set.insert(POS_EMBED_KEY, ramp(&[1, grid, grid, 8], offset));
        for block in 0..4 {
            let span = if GLOBAL.contains(&block) { 2 * grid - 1 } else { 27 };
            for axis in ["h", "w"] {
                set.insert(
                    format!("image_encoder.blocks.{}.attn.rel_pos_{}", block, axis),
                    ramp(&[span, 4], offset + block as f64),
                );
            }
            set.insert(
                format!("image_encoder.blocks.{}.attn.proj.weight", block),
                ramp(&[8, 8], offset),
            );
        }
        set.insert("mask_decoder.iou_token.weight", ramp(&[1, 16], offset));
        set
    }

    fn context(grid: usize) -> BuildContext {
        BuildContext::new(grid * 16).unwrap()
    }

    #[test]
    fn test_exact_match_is_returned_unchanged() {
        let checkpoint = encoder_set(8, 1.0);
        let target = encoder_set(8, 0.0);
        let (adapted, report) = adapt_with_report(&checkpoint, &target, &context(8), GLOBAL).unwrap();

        assert!(report.direct);
        assert!(adapted.identical_to(&checkpoint).unwrap());
        assert!(report.resampled.is_empty());
    }

    #[test]
    fn test_same_grid_with_extra_keys_is_restriction() {
        let mut checkpoint = encoder_set(8, 1.0);
        checkpoint.insert("image_encoder.extra", ramp(&[2], 0.0));
        let target = encoder_set(8, 0.0);

        let (adapted, report) = adapt_with_report(&checkpoint, &target, &context(8), GLOBAL).unwrap();
        assert!(!report.direct);
        assert!(adapted.identical_to(&checkpoint.restricted_to(&target)).unwrap());
        assert_eq!(report.dropped, vec!["image_encoder.extra".to_string()]);
        assert!(report.resampled.is_empty());
    }

    #[test]
    fn test_downsample_grid() {
        let checkpoint = encoder_set(8, 1.0);
        let target = encoder_set(4, 0.0);
        let (adapted, report) = adapt_with_report(&checkpoint, &target, &context(4), GLOBAL).unwrap();

        assert_eq!(adapted.get(POS_EMBED_KEY).unwrap().dims(), &[1, 4, 4, 8]);
        for block in 0..4 {
            for axis in ["h", "w"] {
                let name = format!("image_encoder.blocks.{}.attn.rel_pos_{}", block, axis);
                let table = adapted.get(&name).unwrap();
                if GLOBAL.contains(&block) {
                    assert_eq!(table.dims(), &[7, 4]);
                    assert!(report.resampled.contains(&name));
                } else {
                    assert!(same(Some(table), checkpoint.get(&name)));
                    assert!(report.carried.contains(&name));
                }
            }
            let proj = format!("image_encoder.blocks.{}.attn.proj.weight", block);
            assert!(same(adapted.get(&proj), checkpoint.get(&proj)));
        }
        assert_eq!(report.resampled.len(), 1 + 2 * GLOBAL.len());
        assert!(adapted.compatibility_of(&target).is_exact());
    }

    #[test]
    fn test_pos_embed_corners_are_preserved() {
        let checkpoint = encoder_set(8, 1.0);
        let target = encoder_set(5, 0.0);
        let adapted = adapt(&checkpoint, &target, &context(5), GLOBAL).unwrap();

        let before = values(checkpoint.get(POS_EMBED_KEY).unwrap());
        let after = values(adapted.get(POS_EMBED_KEY).unwrap());
        let at = |v: &[f32], grid: usize, y: usize, x: usize, c: usize| v[(y * grid + x) * 8 + c];
        for c in 0..8 {
            for (y0, x0, y1, x1) in [(0, 0, 0, 0), (7, 7, 4, 4), (0, 7, 0, 4), (7, 0, 4, 0)] {
                assert_eq!(at(&before, 8, y0, x0, c), at(&after, 5, y1, x1, c));
            }
        }
    }

    #[test]
    fn test_pos_embed_upsample_interpolates_interior() {
        // Every channel holds the x coordinate of its token.
        let (from, to) = (4, 7);
        let coords: Vec<f32> = (0..from * from * 3).map(|i| ((i / 3) % from) as f32).collect();
        let mut checkpoint = ParameterSet::new();
        checkpoint.insert(
            POS_EMBED_KEY,
            Tensor::from_vec(coords, (1, from, from, 3), &Device::Cpu).unwrap(),
        );
        let mut target = ParameterSet::new();
        target.insert(POS_EMBED_KEY, ramp(&[1, to, to, 3], 0.0));

        let adapted = adapt(&checkpoint, &target, &context(to), &[]).unwrap();
        let pos = adapted.get(POS_EMBED_KEY).unwrap();
        assert_eq!(pos.dims(), &[1, to, to, 3]);

        let after = values(pos);
        let scale = (from - 1) as f32 / (to - 1) as f32;
        for y in 0..to {
            for x in 0..to {
                for c in 0..3 {
                    let got = after[(y * to + x) * 3 + c];
                    assert!((got - x as f32 * scale).abs() < 1e-5, "({}, {}, {})", y, x, c);
                }
            }
        }
    }

    #[test]
    fn test_rel_pos_second_axis_is_kept() {
        let checkpoint = encoder_set(8, 0.0);
        let target = encoder_set(16, 0.0);
        let adapted = adapt(&checkpoint, &target, &context(16), GLOBAL).unwrap();

        let name = "image_encoder.blocks.3.attn.rel_pos_w";
        let before = values(checkpoint.get(name).unwrap());
        let after = values(adapted.get(name).unwrap());
        assert_eq!(adapted.get(name).unwrap().dims(), &[31, 4]);
        // First and last rows coincide with the source rows.
        for d in 0..4 {
            assert_eq!(after[d], before[d]);
            assert_eq!(after[30 * 4 + d], before[14 * 4 + d]);
        }
    }

    #[test]
    fn test_key_set_closure() {
        let mut checkpoint = encoder_set(8, 1.0);
        checkpoint.remove("mask_decoder.iou_token.weight");
        checkpoint.insert("legacy.head.weight", ramp(&[3], 0.0));
        let target = encoder_set(4, 0.0);

        let (adapted, report) = adapt_with_report(&checkpoint, &target, &context(4), GLOBAL).unwrap();
        assert_eq!(adapted.keys().collect::<Vec<_>>(), target.keys().collect::<Vec<_>>());
        assert!(same(
            adapted.get("mask_decoder.iou_token.weight"),
            target.get("mask_decoder.iou_token.weight")
        ));
        assert_eq!(report.initialized, vec!["mask_decoder.iou_token.weight".to_string()]);
        assert_eq!(report.dropped, vec!["legacy.head.weight".to_string()]);
    }

    #[test]
    fn test_missing_pos_embed_is_fatal() {
        let mut checkpoint = encoder_set(8, 1.0);
        checkpoint.remove(POS_EMBED_KEY);
        let target = encoder_set(8, 0.0);

        let err = adapt(&checkpoint, &target, &context(8), GLOBAL).unwrap_err();
        assert!(matches!(err, Error::MissingPositionEmbeddingKey(_)));
    }

    #[test]
    fn test_incompatible_channels_keep_fresh_value() {
        let mut checkpoint = encoder_set(8, 1.0);
        checkpoint.insert("image_encoder.blocks.0.attn.proj.weight", ramp(&[16, 16], 0.0));
        let target = encoder_set(8, 0.0);

        let (adapted, report) = adapt_with_report(&checkpoint, &target, &context(8), GLOBAL).unwrap();
        let name = "image_encoder.blocks.0.attn.proj.weight";
        assert!(same(adapted.get(name), target.get(name)));
        assert!(report.initialized.contains(&name.to_string()));
        assert!(!report.carried.contains(&name.to_string()));
    }

    #[test]
    fn test_resampling_keeps_dtype() {
        let mut checkpoint = encoder_set(8, 1.0);
        let bf16 = checkpoint.get(POS_EMBED_KEY).unwrap().to_dtype(DType::BF16).unwrap();
        checkpoint.insert(POS_EMBED_KEY, bf16);
        let target = encoder_set(4, 0.0);

        let adapted = adapt(&checkpoint, &target, &context(4), GLOBAL).unwrap();
        assert_eq!(adapted.get(POS_EMBED_KEY).unwrap().dtype(), DType::BF16);
        assert_eq!(
            adapted.get("image_encoder.blocks.1.attn.rel_pos_h").unwrap().dtype(),
            DType::F32
        );
    }

    #[test]
    fn test_block_21_is_not_block_1() {
        let mut checkpoint = ParameterSet::new();
        let mut target = ParameterSet::new();
        checkpoint.insert(POS_EMBED_KEY, ramp(&[1, 8, 8, 2], 0.0));
        target.insert(POS_EMBED_KEY, ramp(&[1, 4, 4, 2], 0.0));
        for (block, target_rows) in [(1, 7), (21, 15)] {
            let name = format!("image_encoder.blocks.{}.attn.rel_pos_h", block);
            checkpoint.insert(name.clone(), ramp(&[15, 2], 0.0));
            target.insert(name, ramp(&[target_rows, 2], 0.0));
        }

        let (adapted, report) = adapt_with_report(&checkpoint, &target, &context(4), &[1]).unwrap();
        assert_eq!(
            adapted.get("image_encoder.blocks.1.attn.rel_pos_h").unwrap().dims(),
            &[7, 2]
        );
        assert!(report.resampled.iter().all(|n| !n.contains("blocks.21")));
        assert!(same(
            adapted.get("image_encoder.blocks.21.attn.rel_pos_h"),
            checkpoint.get("image_encoder.blocks.21.attn.rel_pos_h")
        ));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let checkpoint = encoder_set(8, 1.0);
        let snapshot: Vec<(String, Vec<f32>)> = checkpoint
            .iter()
            .map(|(name, tensor)| (name.to_string(), values(tensor)))
            .collect();
        let target = encoder_set(4, 0.0);
        let _ = adapt(&checkpoint, &target, &context(4), GLOBAL).unwrap();

        for (name, before) in snapshot {
            assert_eq!(values(checkpoint.get(&name).unwrap()), before, "{}", name);
        }
    }
}
