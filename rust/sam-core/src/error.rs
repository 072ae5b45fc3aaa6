//! Error types for sam-core.

use std::path::PathBuf;

/// Result type alias using sam-core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building a model or adapting a checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Variant identifier is not one of the registered presets.
    #[error("unknown variant '{name}' (known variants: {known})")]
    UnknownVariant { name: String, known: String },

    /// The checkpoint carries no absolute position embedding at all.
    #[error("checkpoint is missing the absolute position embedding '{0}'")]
    MissingPositionEmbeddingKey(String),

    /// A parameter set could not be loaded into the model as-is.
    #[error(
        "parameter set does not match the model: {missing} missing, \
         {unexpected} unexpected, {mismatched} with mismatched shape"
    )]
    IncompatibleParameters {
        missing: usize,
        unexpected: usize,
        mismatched: usize,
    },

    /// Failed to read a file.
    #[error("failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a checkpoint file.
    #[error("failed to write '{path}': {source}")]
    WriteCheckpoint {
        path: PathBuf,
        source: candle_core::Error,
    },

    /// Failed to parse YAML.
    #[error("failed to parse YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    /// Tensor operation or safetensors decoding failed.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}
