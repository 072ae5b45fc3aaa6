//! Model assembly: derives every sub-graph's configuration from a variant and
//! an input resolution, and owns the resulting parameter set.
//!
//! The forward computation of the sub-graphs lives elsewhere; this module
//! fixes their hyperparameters, parameter names and tensor shapes.

mod image_encoder;
mod mask_decoder;
mod prompt_encoder;
mod param_spec;
mod summary;

pub use image_encoder::{BlockAttention, ImageEncoderConfig};
pub use mask_decoder::{MaskDecoderConfig, TwoWayTransformerConfig};
pub use prompt_encoder::PromptEncoderConfig;
pub use param_spec::{Init, ParamSpec, ParamSpecs};
pub use summary::ModelSummary;

use candle_core::{DType, Device, Tensor};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::VariantConfig;
use crate::error::{Error, Result};
use crate::params::ParameterSet;

/// Side length of the square patches the image encoder embeds.
pub const PATCH_SIZE: usize = 16;
/// Channel width shared by the encoder neck, prompt encoder and mask decoder.
pub const PROMPT_EMBED_DIM: usize = 256;
/// Window side length of the local-attention encoder blocks.
pub const WINDOW_SIZE: usize = 14;
pub const MLP_RATIO: usize = 4;

/// Per-channel RGB mean of input pixels, in 0..255 units.
pub const PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
/// Per-channel RGB standard deviation of input pixels, in 0..255 units.
pub const PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Dimensions derived from the input resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildContext {
    pub image_size: usize,
    pub patch_size: usize,
    /// `image_size / patch_size`, truncating.
    pub token_grid_size: usize,
    pub prompt_embed_dim: usize,
}

impl BuildContext {
    pub fn new(image_size: usize) -> Result<Self> {
        if image_size < PATCH_SIZE {
            return Err(Error::Validation(format!(
                "image_size ({}) must be at least the patch size ({})",
                image_size, PATCH_SIZE
            )));
        }
        if image_size % PATCH_SIZE != 0 {
            warn!(
                image_size,
                patch_size = PATCH_SIZE,
                "image size is not a multiple of the patch size; the token grid drops the remainder"
            );
        }

        Ok(BuildContext {
            image_size,
            patch_size: PATCH_SIZE,
            token_grid_size: image_size / PATCH_SIZE,
            prompt_embed_dim: PROMPT_EMBED_DIM,
        })
    }

    /// Rows of a relative position table spanning the whole token grid.
    pub fn rel_pos_span(&self) -> usize {
        2 * self.token_grid_size - 1
    }
}

/// Complete architecture description of one model instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamConfig {
    pub variant: VariantConfig,
    pub context: BuildContext,
    pub image_encoder: ImageEncoderConfig,
    pub prompt_encoder: PromptEncoderConfig,
    pub mask_decoder: MaskDecoderConfig,
}

impl SamConfig {
    pub fn new(variant: &VariantConfig, image_size: usize) -> Result<Self> {
        variant.validate()?;
        let context = BuildContext::new(image_size)?;

        Ok(SamConfig {
            variant: variant.clone(),
            image_encoder: ImageEncoderConfig::new(variant, &context),
            prompt_encoder: PromptEncoderConfig::new(&context),
            mask_decoder: MaskDecoderConfig::new(&context),
            context,
        })
    }

    /// Full parameter contract of the model, without allocating any tensor.
    pub fn parameter_specs(&self) -> ParamSpecs {
        let mut specs = ParamSpecs::new();
        specs.nest("image_encoder", self.image_encoder.parameter_specs());
        specs.nest("prompt_encoder", self.prompt_encoder.parameter_specs());
        specs.nest("mask_decoder", self.mask_decoder.parameter_specs());
        specs
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary::new(self, DType::F32)
    }
}

/// An assembled model: architecture, normalization constants and parameters.
#[derive(Debug, Clone)]
pub struct Sam {
    config: SamConfig,
    device: Device,
    pixel_mean: [f32; 3],
    pixel_std: [f32; 3],
    training: bool,
    parameters: ParameterSet,
}

impl Sam {
    /// Build the model graph with freshly initialized parameters.
    ///
    /// The returned model is in inference mode.
    pub fn assemble(variant: &VariantConfig, image_size: usize, seed: u64) -> Result<Self> {
        Self::assemble_on(variant, image_size, seed, &Device::Cpu)
    }

    /// Like [`Sam::assemble`], placing every parameter on `device`.
    pub fn assemble_on(
        variant: &VariantConfig,
        image_size: usize,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        let config = SamConfig::new(variant, image_size)?;
        let parameters = config
            .parameter_specs()
            .materialize(DType::F32, device, seed)?;

        info!(
            embed_dim = variant.embed_dim,
            depth = variant.depth,
            image_size,
            token_grid = config.context.token_grid_size,
            num_parameters = parameters.len(),
            "assembled model"
        );

        let mut sam = Sam {
            config,
            device: device.clone(),
            pixel_mean: PIXEL_MEAN,
            pixel_std: PIXEL_STD,
            training: true,
            parameters,
        };
        sam.eval();
        Ok(sam)
    }

    pub fn config(&self) -> &SamConfig {
        &self.config
    }

    pub fn context(&self) -> &BuildContext {
        &self.config.context
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn pixel_mean(&self) -> [f32; 3] {
        self.pixel_mean
    }

    pub fn pixel_std(&self) -> [f32; 3] {
        self.pixel_std
    }

    /// Switch to inference mode.
    pub fn eval(&mut self) {
        self.train(false);
    }

    pub fn train(&mut self, mode: bool) {
        self.training = mode;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Current parameters, keyed by dotted name.
    ///
    /// Normalization constants are not part of this set.
    pub fn state_dict(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Replace every parameter. The set must match the current names and shapes exactly.
    pub fn load_parameters(&mut self, parameters: ParameterSet) -> Result<()> {
        let report = self.parameters.compatibility_of(&parameters);
        if !report.is_exact() {
            for mismatch in &report.mismatched {
                debug!(
                    name = %mismatch.name,
                    expected = ?mismatch.expected,
                    actual = ?mismatch.actual,
                    "shape mismatch"
                );
            }
            return Err(Error::IncompatibleParameters {
                missing: report.missing.len(),
                unexpected: report.unexpected.len(),
                mismatched: report.mismatched.len(),
            });
        }

        self.parameters = parameters;
        Ok(())
    }

    /// Normalize a `[3, height, width]` image and zero-pad it to `[3, image_size, image_size]`.
    pub fn preprocess(&self, image: &Tensor) -> Result<Tensor> {
        let size = self.config.context.image_size;
        let (channels, height, width) = image.dims3()?;
        if channels != 3 {
            return Err(Error::Validation(format!(
                "expected a 3-channel image, got {} channels",
                channels
            )));
        }
        if height > size || width > size {
            return Err(Error::Validation(format!(
                "image {}x{} exceeds the model input size {}",
                height, width, size
            )));
        }

        let mean = Tensor::new(&self.pixel_mean, &self.device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&self.pixel_std, &self.device)?.reshape((3, 1, 1))?;
        let normalized = image
            .to_device(&self.device)?
            .to_dtype(DType::F32)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)?;

        Ok(normalized
            .pad_with_zeros(1, 0, size - height)?
            .pad_with_zeros(2, 0, size - width)?)
    }

    pub fn summary(&self) -> ModelSummary {
        self.config.summary()
    }
}
