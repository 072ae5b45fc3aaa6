//! Prompt encoder for points, boxes and coarse masks.

use serde::Serialize;

use super::param_spec::{Init, ParamSpecs};
use super::BuildContext;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptEncoderConfig {
    pub embed_dim: usize,
    /// Token grid the image encoder produces, `(height, width)`.
    pub image_embedding_size: (usize, usize),
    pub input_image_size: (usize, usize),
    pub mask_in_chans: usize,
    /// Positive/negative point plus two box corners.
    pub num_point_embeddings: usize,
}

impl PromptEncoderConfig {
    pub fn new(context: &BuildContext) -> Self {
        PromptEncoderConfig {
            embed_dim: context.prompt_embed_dim,
            image_embedding_size: (context.token_grid_size, context.token_grid_size),
            input_image_size: (context.image_size, context.image_size),
            mask_in_chans: 16,
            num_point_embeddings: 4,
        }
    }

    /// Spatial size of the mask input, four times the token grid.
    pub fn mask_input_size(&self) -> (usize, usize) {
        (4 * self.image_embedding_size.0, 4 * self.image_embedding_size.1)
    }

    /// Parameter contract, with names relative to the prompt encoder.
    pub fn parameter_specs(&self) -> ParamSpecs {
        let dim = self.embed_dim;
        let mask_mid = self.mask_in_chans / 4;
        let mut specs = ParamSpecs::new();

        specs.push(
            "pe_layer.positional_encoding_gaussian_matrix",
            vec![2, dim / 2],
            Init::Normal,
        );
        for i in 0..self.num_point_embeddings {
            specs.embedding(&format!("point_embeddings.{}", i), 1, dim);
        }
        specs.embedding("not_a_point_embed", 1, dim);

        specs.conv2d("mask_downscaling.0", 1, mask_mid, 2, true);
        specs.layer_norm("mask_downscaling.1", mask_mid);
        specs.conv2d("mask_downscaling.3", mask_mid, self.mask_in_chans, 2, true);
        specs.layer_norm("mask_downscaling.4", self.mask_in_chans);
        specs.conv2d("mask_downscaling.6", self.mask_in_chans, dim, 1, true);
        specs.embedding("no_mask_embed", 1, dim);

        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_follow_context() {
        let config = PromptEncoderConfig::new(&BuildContext::new(512).unwrap());
        assert_eq!(config.embed_dim, 256);
        assert_eq!(config.image_embedding_size, (32, 32));
        assert_eq!(config.input_image_size, (512, 512));
        assert_eq!(config.mask_input_size(), (128, 128));
    }

    #[test]
    fn test_parameters_do_not_depend_on_resolution() {
        let small = PromptEncoderConfig::new(&BuildContext::new(512).unwrap()).parameter_specs();
        let large = PromptEncoderConfig::new(&BuildContext::new(1024).unwrap()).parameter_specs();
        let shapes = |specs: &ParamSpecs| {
            specs
                .iter()
                .map(|s| (s.name.clone(), s.shape.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(shapes(&small), shapes(&large));
    }

    #[test]
    fn test_parameter_names() {
        let specs = PromptEncoderConfig::new(&BuildContext::new(1024).unwrap()).parameter_specs();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"point_embeddings.3.weight"));
        assert!(names.contains(&"mask_downscaling.6.bias"));
        assert!(!names.contains(&"mask_downscaling.2.weight"));

        let gaussian = specs
            .iter()
            .find(|s| s.name == "pe_layer.positional_encoding_gaussian_matrix")
            .unwrap();
        assert_eq!(gaussian.shape, vec![2, 128]);
    }
}
