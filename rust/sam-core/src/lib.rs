//! Variant registry, model assembly and checkpoint adaptation for SAM.
//!
//! A named variant resolves to encoder hyperparameters, the assembler derives
//! every sub-graph's parameter shapes for a target input resolution, and the
//! adapter reconciles a checkpoint trained at another resolution with those
//! shapes by resampling its position embedding and global-attention
//! relative position tables.

pub mod adapter;
mod builder;
pub mod checkpoint;
mod config;
mod error;
mod interpolate;
pub mod model;
mod params;
pub mod registry;

pub use adapter::{adapt, adapt_with_report, AdaptReport};
pub use builder::{
    build_from_config, build_from_config_with_report, build_sam, build_sam_with_report,
    build_sam_with_variant,
};
pub use checkpoint::{
    load_safetensors, parse_safetensors, save_safetensors, CheckpointSource,
    SafetensorsCheckpoint,
};
pub use config::{default_image_size, BuildConfig, VariantConfig, VariantSpec};
pub use error::{Error, Result};
pub use model::{BuildContext, ModelSummary, Sam, SamConfig};
pub use params::{
    tensors_identical, Compatibility, Component, ParamKind, ParamPath, ParameterSet, RelPosAxis,
    ShapeMismatch, POS_EMBED_KEY,
};

pub use candle_core::{DType, Device, Tensor};
