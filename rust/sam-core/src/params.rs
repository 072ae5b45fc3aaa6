//! Named parameter sets and the typed view of parameter paths.

use std::collections::btree_map;
use std::collections::BTreeMap;

use candle_core::{DType, Tensor};

use crate::error::Result;

/// Name of the image encoder's absolute position embedding.
pub const POS_EMBED_KEY: &str = "image_encoder.pos_embed";

/// Mapping from dotted parameter name to tensor.
///
/// Used both for checkpoints handed in from outside and for the state of an
/// assembled model. Iteration order is lexicographic by name.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    tensors: BTreeMap<String, Tensor>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor, returning the one it replaced.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.tensors.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The name -> shape contract of this set.
    pub fn shapes(&self) -> BTreeMap<String, Vec<usize>> {
        self.tensors
            .iter()
            .map(|(k, v)| (k.clone(), v.dims().to_vec()))
            .collect()
    }

    /// Total number of scalar parameters.
    pub fn num_elements(&self) -> usize {
        self.tensors.values().map(Tensor::elem_count).sum()
    }

    /// Copy of this set keeping only the names present in `other`.
    pub fn restricted_to(&self, other: &ParameterSet) -> ParameterSet {
        self.tensors
            .iter()
            .filter(|(k, _)| other.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Compare `candidate` against this set, treated as the expected contract.
    pub fn compatibility_of(&self, candidate: &ParameterSet) -> Compatibility {
        let mut report = Compatibility::default();

        for (name, expected) in &self.tensors {
            match candidate.get(name) {
                None => report.missing.push(name.clone()),
                Some(actual) if actual.dims() != expected.dims() => {
                    report.mismatched.push(ShapeMismatch {
                        name: name.clone(),
                        expected: expected.dims().to_vec(),
                        actual: actual.dims().to_vec(),
                    });
                }
                Some(_) => {}
            }
        }
        report.unexpected = candidate
            .keys()
            .filter(|k| !self.contains(k))
            .map(str::to_string)
            .collect();

        report
    }

    /// True when both sets hold the same names with identical tensors.
    pub fn identical_to(&self, other: &ParameterSet) -> Result<bool> {
        if self.len() != other.len() {
            return Ok(false);
        }
        for (name, tensor) in &self.tensors {
            match other.get(name) {
                Some(theirs) if tensors_identical(tensor, theirs)? => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

/// True when `a` and `b` agree in dtype, shape and every element bit.
pub fn tensors_identical(a: &Tensor, b: &Tensor) -> Result<bool> {
    if a.dtype() != b.dtype() || a.dims() != b.dims() {
        return Ok(false);
    }
    // Widening to f64 is exact for every float dtype, so bits compare one-to-one.
    let bits = |t: &Tensor| -> Result<Vec<u64>> {
        Ok(t.flatten_all()?
            .to_dtype(DType::F64)?
            .to_vec1::<f64>()?
            .into_iter()
            .map(f64::to_bits)
            .collect())
    };
    Ok(bits(a)? == bits(b)?)
}

impl FromIterator<(String, Tensor)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        ParameterSet {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ParameterSet {
    type Item = (String, Tensor);
    type IntoIter = btree_map::IntoIter<String, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

/// A shared name whose shape differs between two parameter sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub name: String,
    pub expected: Vec<usize>,
    pub actual: Vec<usize>,
}

/// Outcome of comparing a candidate set against an expected contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compatibility {
    /// Expected names absent from the candidate.
    pub missing: Vec<String>,
    /// Candidate names the contract does not know.
    pub unexpected: Vec<String>,
    pub mismatched: Vec<ShapeMismatch>,
}

impl Compatibility {
    /// True when the candidate can be loaded without any change.
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }
}

/// Top-level sub-graph a parameter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    ImageEncoder,
    PromptEncoder,
    MaskDecoder,
    Other,
}

/// Axis a relative position table indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelPosAxis {
    Height,
    Width,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    AbsolutePosEmbed,
    RelPosBias(RelPosAxis),
    Other,
}

/// Typed reading of a dotted parameter name such as
/// `image_encoder.blocks.7.attn.rel_pos_h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamPath {
    pub component: Component,
    /// Encoder block index, for parameters under `image_encoder.blocks.<i>`.
    pub block: Option<usize>,
    pub kind: ParamKind,
}

impl ParamPath {
    pub fn parse(name: &str) -> Self {
        let segments: Vec<&str> = name.split('.').collect();

        let component = match segments[0] {
            "image_encoder" => Component::ImageEncoder,
            "prompt_encoder" => Component::PromptEncoder,
            "mask_decoder" => Component::MaskDecoder,
            _ => Component::Other,
        };

        let block = match (component, segments.get(1), segments.get(2)) {
            (Component::ImageEncoder, Some(&"blocks"), Some(index)) => index.parse::<usize>().ok(),
            _ => None,
        };

        let kind = match (component, block, segments.as_slice()) {
            (Component::ImageEncoder, None, [_, "pos_embed"]) => ParamKind::AbsolutePosEmbed,
            (Component::ImageEncoder, Some(_), [_, _, _, "attn", "rel_pos_h"]) => {
                ParamKind::RelPosBias(RelPosAxis::Height)
            }
            (Component::ImageEncoder, Some(_), [_, _, _, "attn", "rel_pos_w"]) => {
                ParamKind::RelPosBias(RelPosAxis::Width)
            }
            _ => ParamKind::Other,
        };

        ParamPath {
            component,
            block,
            kind,
        }
    }

    pub fn is_rel_pos_bias(&self) -> bool {
        matches!(self.kind, ParamKind::RelPosBias(_))
    }

    /// True for a relative position table of one of `blocks`.
    ///
    /// Membership compares the parsed block index, so block 1 never matches
    /// block 21.
    pub fn is_rel_pos_bias_in(&self, blocks: &[usize]) -> bool {
        self.is_rel_pos_bias() && self.block.is_some_and(|b| blocks.contains(&b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn set(entries: &[(&str, &[usize])]) -> ParameterSet {
        entries
            .iter()
            .map(|(name, shape)| {
                let tensor = Tensor::zeros(shape.to_vec(), DType::F32, &Device::Cpu).unwrap();
                (name.to_string(), tensor)
            })
            .collect()
    }

    #[test]
    fn test_parse_pos_embed() {
        let path = ParamPath::parse("image_encoder.pos_embed");
        assert_eq!(path.component, Component::ImageEncoder);
        assert_eq!(path.block, None);
        assert_eq!(path.kind, ParamKind::AbsolutePosEmbed);
    }

    #[test]
    fn test_parse_rel_pos_tables() {
        let h = ParamPath::parse("image_encoder.blocks.7.attn.rel_pos_h");
        assert_eq!(h.block, Some(7));
        assert_eq!(h.kind, ParamKind::RelPosBias(RelPosAxis::Height));

        let w = ParamPath::parse("image_encoder.blocks.31.attn.rel_pos_w");
        assert_eq!(w.block, Some(31));
        assert_eq!(w.kind, ParamKind::RelPosBias(RelPosAxis::Width));
    }

    #[test]
    fn test_parse_other_parameters() {
        let qkv = ParamPath::parse("image_encoder.blocks.3.attn.qkv.weight");
        assert_eq!(qkv.block, Some(3));
        assert_eq!(qkv.kind, ParamKind::Other);

        let decoder = ParamPath::parse("mask_decoder.transformer.layers.1.norm1.weight");
        assert_eq!(decoder.component, Component::MaskDecoder);
        assert_eq!(decoder.block, None);

        let prompt = ParamPath::parse("prompt_encoder.pe_layer.positional_encoding_gaussian_matrix");
        assert_eq!(prompt.component, Component::PromptEncoder);

        assert_eq!(ParamPath::parse("rel_pos_h").kind, ParamKind::Other);
        assert_eq!(ParamPath::parse("").component, Component::Other);
    }

    #[test]
    fn test_block_membership_is_numeric() {
        let block_21 = ParamPath::parse("image_encoder.blocks.21.attn.rel_pos_h");
        assert!(!block_21.is_rel_pos_bias_in(&[1, 2]));
        assert!(block_21.is_rel_pos_bias_in(&[21]));

        let block_1 = ParamPath::parse("image_encoder.blocks.1.attn.rel_pos_w");
        assert!(block_1.is_rel_pos_bias_in(&[1]));
        assert!(!block_1.is_rel_pos_bias_in(&[11, 21]));

        let not_table = ParamPath::parse("image_encoder.blocks.1.attn.proj.weight");
        assert!(!not_table.is_rel_pos_bias_in(&[1]));
    }

    #[test]
    fn test_compatibility_exact() {
        let target = set(&[("a", &[2, 2]), ("b", &[3])]);
        let candidate = set(&[("a", &[2, 2]), ("b", &[3])]);
        assert!(target.compatibility_of(&candidate).is_exact());
    }

    #[test]
    fn test_compatibility_reports_each_kind() {
        let target = set(&[("a", &[2, 2]), ("b", &[3]), ("c", &[1])]);
        let candidate = set(&[("a", &[4, 2]), ("b", &[3]), ("z", &[1])]);
        let report = target.compatibility_of(&candidate);

        assert!(!report.is_exact());
        assert_eq!(report.missing, vec!["c".to_string()]);
        assert_eq!(report.unexpected, vec!["z".to_string()]);
        assert_eq!(
            report.mismatched,
            vec![ShapeMismatch {
                name: "a".to_string(),
                expected: vec![2, 2],
                actual: vec![4, 2],
            }]
        );
    }

    #[test]
    fn test_restricted_to_and_shapes() {
        let full = set(&[("a", &[2]), ("b", &[3]), ("c", &[4])]);
        let keys = set(&[("a", &[9]), ("c", &[9]), ("d", &[9])]);
        let restricted = full.restricted_to(&keys);

        assert_eq!(restricted.keys().collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(restricted.shapes()["c"], vec![4]);
        assert_eq!(restricted.num_elements(), 6);
    }

    #[test]
    fn test_identical_to_compares_values_and_dtype() {
        let a = Tensor::new(&[1.0f32, -0.5, 2.25], &Device::Cpu).unwrap();
        let same = Tensor::new(&[1.0f32, -0.5, 2.25], &Device::Cpu).unwrap();
        let other = Tensor::new(&[1.0f32, -0.5, 2.0], &Device::Cpu).unwrap();

        assert!(tensors_identical(&a, &same).unwrap());
        assert!(!tensors_identical(&a, &other).unwrap());
        assert!(!tensors_identical(&a, &a.to_dtype(DType::F64).unwrap()).unwrap());

        let mut left = ParameterSet::new();
        left.insert("x", a.clone());
        let mut right = ParameterSet::new();
        right.insert("x", same);
        assert!(left.identical_to(&right).unwrap());
        right.insert("y", a);
        assert!(!left.identical_to(&right).unwrap());
    }
}
