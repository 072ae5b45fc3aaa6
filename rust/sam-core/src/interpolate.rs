//! Bilinear resampling with aligned corners.
//!
//! Output sample `i` of an axis with `out` samples reads input position
//! `i * (in - 1) / (out - 1)`, so the first and last samples of input and
//! output coincide exactly. A length-1 output reads position 0.

use candle_core::{DType, Tensor};

use crate::error::{Error, Result};

/// Source lookup for one output sample: lower index, upper index, weight of the upper.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
    lo: u32,
    hi: u32,
    frac: f64,
}

fn axis_taps(in_len: usize, out_len: usize) -> Vec<Tap> {
    (0..out_len)
        .map(|i| {
            let src = if out_len > 1 {
                (i * (in_len - 1)) as f64 / (out_len - 1) as f64
            } else {
                0.0
            };
            let lo = (src.floor() as usize).min(in_len - 1);
            let hi = (lo + 1).min(in_len - 1);
            Tap {
                lo: lo as u32,
                hi: hi as u32,
                frac: src - lo as f64,
            }
        })
        .collect()
}

/// Resample axis `dim` of `x` to `out_len` samples, linearly between taps.
///
/// Computation runs in f64; the result keeps the dtype of `x`. An axis that
/// already has `out_len` samples is returned untouched.
pub(crate) fn resample_axis_aligned(x: &Tensor, dim: usize, out_len: usize) -> Result<Tensor> {
    let in_len = x.dim(dim)?;
    if in_len == 0 || out_len == 0 {
        return Err(Error::Validation(format!(
            "cannot resample axis {} from {} to {} samples",
            dim, in_len, out_len
        )));
    }
    if in_len == out_len {
        return Ok(x.clone());
    }

    let device = x.device();
    let taps = axis_taps(in_len, out_len);
    let lo_index: Vec<u32> = taps.iter().map(|t| t.lo).collect();
    let hi_index: Vec<u32> = taps.iter().map(|t| t.hi).collect();
    let frac: Vec<f64> = taps.iter().map(|t| t.frac).collect();

    // Weights broadcast over every axis after `dim`.
    let mut weight_shape = vec![1; x.rank() - dim];
    weight_shape[0] = out_len;
    let weight = Tensor::from_vec(frac, weight_shape, device)?;

    let wide = x.to_dtype(DType::F64)?.contiguous()?;
    let lo = wide.index_select(&Tensor::new(lo_index.as_slice(), device)?, dim)?;
    let hi = wide.index_select(&Tensor::new(hi_index.as_slice(), device)?, dim)?;

    let out = hi.sub(&lo)?.broadcast_mul(&weight)?.add(&lo)?;
    Ok(out.to_dtype(x.dtype())?)
}

/// Resize the last two axes of `x` to `(out_h, out_w)`; leading axes are planes.
pub(crate) fn resize_bilinear_aligned(x: &Tensor, (out_h, out_w): (usize, usize)) -> Result<Tensor> {
    let rank = x.rank();
    if rank < 2 {
        return Err(Error::Validation(format!(
            "bilinear resize needs at least two axes, got shape {:?}",
            x.dims()
        )));
    }
    let rows = resample_axis_aligned(x, rank - 2, out_h)?;
    resample_axis_aligned(&rows, rank - 1, out_w)
}
