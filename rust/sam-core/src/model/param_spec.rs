//! Parameter shape contracts and their fresh initialization.

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::Result;
use crate::params::ParameterSet;

/// How a freshly built parameter is filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Zeros,
    Ones,
    /// Uniform in `[-bound, bound)`.
    Uniform { bound: f64 },
    /// Standard normal.
    Normal,
}

impl Init {
    fn fan_in(fan_in: usize) -> Self {
        Init::Uniform {
            bound: 1.0 / (fan_in.max(1) as f64).sqrt(),
        }
    }
}

/// One named parameter of the model graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub init: Init,
}

impl ParamSpec {
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Ordered list of parameter specs, built layer by layer under a name prefix.
#[derive(Debug, Clone, Default)]
pub struct ParamSpecs {
    specs: Vec<ParamSpec>,
}

impl ParamSpecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, shape: Vec<usize>, init: Init) {
        self.specs.push(ParamSpec {
            name: name.into(),
            shape,
            init,
        });
    }

    /// `weight [out, in]` and optional `bias [out]`.
    pub fn linear(&mut self, name: &str, in_features: usize, out_features: usize, bias: bool) {
        let init = Init::fan_in(in_features);
        self.push(format!("{name}.weight"), vec![out_features, in_features], init);
        if bias {
            self.push(format!("{name}.bias"), vec![out_features], init);
        }
    }

    /// Affine `weight` and `bias` of a layer norm over `dim` channels.
    pub fn layer_norm(&mut self, name: &str, dim: usize) {
        self.push(format!("{name}.weight"), vec![dim], Init::Ones);
        self.push(format!("{name}.bias"), vec![dim], Init::Zeros);
    }

    /// `weight [out, in, k, k]` and optional `bias [out]`.
    pub fn conv2d(&mut self, name: &str, in_ch: usize, out_ch: usize, kernel: usize, bias: bool) {
        let init = Init::fan_in(in_ch * kernel * kernel);
        self.push(format!("{name}.weight"), vec![out_ch, in_ch, kernel, kernel], init);
        if bias {
            self.push(format!("{name}.bias"), vec![out_ch], init);
        }
    }

    /// `weight [in, out, k, k]` and `bias [out]`.
    pub fn conv_transpose2d(&mut self, name: &str, in_ch: usize, out_ch: usize, kernel: usize) {
        // Transposed weights are laid out input-major, so fan-in counts the second axis.
        let init = Init::fan_in(out_ch * kernel * kernel);
        self.push(format!("{name}.weight"), vec![in_ch, out_ch, kernel, kernel], init);
        self.push(format!("{name}.bias"), vec![out_ch], init);
    }

    /// Lookup table `weight [num, dim]`.
    pub fn embedding(&mut self, name: &str, num: usize, dim: usize) {
        self.push(format!("{name}.weight"), vec![num, dim], Init::Normal);
    }

    /// Append every entry of `other` under `prefix`.
    pub fn nest(&mut self, prefix: &str, other: ParamSpecs) {
        for param in other.specs {
            self.specs.push(ParamSpec {
                name: format!("{prefix}.{}", param.name),
                ..param
            });
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn total_params(&self) -> usize {
        self.specs.iter().map(ParamSpec::numel).sum()
    }

    /// Allocate and fill every parameter on `device` from a generator seeded with `seed`.
    pub fn materialize(&self, dtype: DType, device: &Device, seed: u64) -> Result<ParameterSet> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.specs
            .iter()
            .map(|param| Ok((param.name.clone(), fill(param, dtype, device, &mut rng)?)))
            .collect()
    }
}

fn fill(param: &ParamSpec, dtype: DType, device: &Device, rng: &mut StdRng) -> Result<Tensor> {
    let shape = param.shape.as_slice();
    let values: Vec<f32> = match param.init {
        Init::Zeros => return Ok(Tensor::zeros(shape, dtype, device)?),
        Init::Ones => return Ok(Tensor::ones(shape, dtype, device)?),
        Init::Uniform { bound } => {
            let bound = bound as f32;
            (0..param.numel()).map(|_| rng.gen_range(-bound..bound)).collect()
        }
        Init::Normal => (0..param.numel())
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect(),
    };
    Ok(Tensor::from_vec(values, shape, device)?.to_dtype(dtype)?)
}
