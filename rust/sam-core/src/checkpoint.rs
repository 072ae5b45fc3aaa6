//! Checkpoint sources and safetensors I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{safetensors, Device, Tensor};
use tracing::debug;

use crate::error::{Error, Result};
use crate::params::ParameterSet;

/// Anything that can produce a checkpoint parameter set.
pub trait CheckpointSource {
    fn load(&self) -> Result<ParameterSet>;

    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;
}

impl CheckpointSource for ParameterSet {
    fn load(&self) -> Result<ParameterSet> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory parameter set ({} tensors)", self.len())
    }
}

/// A `.safetensors` file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetensorsCheckpoint {
    path: PathBuf,
}

impl SafetensorsCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SafetensorsCheckpoint { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointSource for SafetensorsCheckpoint {
    fn load(&self) -> Result<ParameterSet> {
        load_safetensors(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Read every tensor of a safetensors file onto the CPU.
pub fn load_safetensors(path: impl AsRef<Path>) -> Result<ParameterSet> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let params = parse_safetensors(&data, &Device::Cpu)?;
    debug!(path = %path.display(), tensors = params.len(), "loaded safetensors checkpoint");
    Ok(params)
}

/// Decode a safetensors payload held in memory onto `device`.
pub fn parse_safetensors(data: &[u8], device: &Device) -> Result<ParameterSet> {
    Ok(safetensors::load_buffer(data, device)?.into_iter().collect())
}

/// Write a parameter set to a safetensors file.
pub fn save_safetensors(params: &ParameterSet, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let tensors: HashMap<&str, Tensor> = params
        .iter()
        .map(|(name, tensor)| (name, tensor.clone()))
        .collect();

    safetensors::save(&tensors, path).map_err(|e| Error::WriteCheckpoint {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!(path = %path.display(), tensors = params.len(), "wrote safetensors checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn sample() -> ParameterSet {
        let mut params = ParameterSet::new();
        params.insert(
            "image_encoder.pos_embed",
            Tensor::full(0.5f32, (1, 2, 2, 3), &Device::Cpu).unwrap(),
        );
        params.insert(
            "mask_decoder.iou_token.weight",
            Tensor::new(&[[1.0f32, -2.0, 0.25, 8.0]], &Device::Cpu)
                .unwrap()
                .to_dtype(DType::BF16)
                .unwrap(),
        );
        params
    }

    #[test]
    fn test_file_round_trip_is_bitwise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let params = sample();
        save_safetensors(&params, &path).unwrap();
        let loaded = SafetensorsCheckpoint::new(&path).load().unwrap();
        assert!(loaded.identical_to(&params).unwrap());
        assert_eq!(
            loaded.get("mask_decoder.iou_token.weight").unwrap().dtype(),
            DType::BF16
        );
    }

    #[test]
    fn test_parameter_set_is_its_own_source() {
        let params = sample();
        assert!(params.load().unwrap().identical_to(&params).unwrap());
        assert!(params.describe().contains("2 tensors"));
    }

    #[test]
    fn test_missing_file() {
        let err = SafetensorsCheckpoint::new("/nonexistent/weights.safetensors")
            .load()
            .unwrap_err();
        assert!(matches!(err, Error::ReadFile { .. }));
    }

    #[test]
    fn test_garbage_payload() {
        let err = parse_safetensors(b"not a safetensors file", &Device::Cpu).unwrap_err();
        assert!(matches!(err, Error::Candle(_)));
    }

    #[test]
    fn test_unwritable_destination() {
        let err = save_safetensors(&sample(), "/nonexistent/dir/out.safetensors").unwrap_err();
        match err {
            Error::WriteCheckpoint { path, .. } => {
                assert!(path.ends_with("out.safetensors"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
