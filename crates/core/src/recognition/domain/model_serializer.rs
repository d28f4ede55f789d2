use std::collections::HashSet;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recognition::domain::head_model::HeadModel;
use crate::recognition::domain::head_slot::HeadSlot;
use crate::recognition::domain::sample::Label;

const FORMAT: &str = "faceteach-head";
const VERSION: u32 = 1;

const HIDDEN_KERNEL: &str = "dense_1/kernel";
const HIDDEN_BIAS: &str = "dense_1/bias";
const OUTPUT_KERNEL: &str = "dense_2/kernel";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelFormatError {
    #[error("invalid model architecture: {0}")]
    Architecture(String),
    #[error("invalid model weights: {0}")]
    Weights(String),
    #[error("invalid label list: {0}")]
    Labels(String),
    #[error("label list has {labels} entries but the model has {outputs} outputs")]
    LabelMismatch { labels: usize, outputs: usize },
    #[error("no trained model to export")]
    NotTrained,
}

/// The three independently stored pieces of a head model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArtifacts {
    /// JSON layer description and weight manifest.
    pub architecture: Vec<u8>,
    /// Weight tensors in manifest order, little-endian `f32`.
    pub weights: Vec<u8>,
    /// JSON array of label names in output order.
    pub labels: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Architecture {
    format: String,
    version: u32,
    layers: Vec<LayerSpec>,
    weights: Vec<WeightSpec>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LayerSpec {
    Flatten {
        input_shape: Vec<usize>,
    },
    Dense {
        units: usize,
        activation: Activation,
        use_bias: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Activation {
    Relu,
    Softmax,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct WeightSpec {
    name: String,
    shape: Vec<usize>,
}

pub struct ModelSerializer;

impl ModelSerializer {
    pub fn export(model: &HeadModel) -> Result<ModelArtifacts, ModelFormatError> {
        let hidden = model.hidden_units();
        let outputs = model.output_units();
        let architecture = Architecture {
            format: FORMAT.to_string(),
            version: VERSION,
            layers: vec![
                LayerSpec::Flatten {
                    input_shape: model.input_shape().to_vec(),
                },
                LayerSpec::Dense {
                    units: hidden,
                    activation: Activation::Relu,
                    use_bias: true,
                },
                LayerSpec::Dense {
                    units: outputs,
                    activation: Activation::Softmax,
                    use_bias: false,
                },
            ],
            weights: manifest(model.input_len(), hidden, outputs),
        };

        let (hidden_kernel, hidden_bias, output_kernel) = (
            model.hidden_kernel(),
            model.hidden_bias(),
            model.output_kernel(),
        );
        let mut weights =
            Vec::with_capacity(4 * (hidden_kernel.len() + hidden_bias.len() + output_kernel.len()));
        let tensors = hidden_kernel
            .iter()
            .chain(hidden_bias.iter())
            .chain(output_kernel.iter());
        for v in tensors {
            weights.extend_from_slice(&v.to_le_bytes());
        }

        let names: Vec<&str> = model.labels().iter().map(Label::as_str).collect();
        Ok(ModelArtifacts {
            architecture: serde_json::to_vec_pretty(&architecture)
                .map_err(|e| ModelFormatError::Architecture(e.to_string()))?,
            weights,
            labels: serde_json::to_vec(&names)
                .map_err(|e| ModelFormatError::Labels(e.to_string()))?,
        })
    }

    /// Exports whatever model the slot currently holds.
    pub fn export_current(slot: &HeadSlot) -> Result<ModelArtifacts, ModelFormatError> {
        let model = slot.current().ok_or(ModelFormatError::NotTrained)?;
        Self::export(&model)
    }

    /// Decodes and validates artifacts. Never touches any head slot; install
    /// the result with `Trainer::install`.
    pub fn import(artifacts: &ModelArtifacts) -> Result<HeadModel, ModelFormatError> {
        let arch: Architecture = serde_json::from_slice(&artifacts.architecture)
            .map_err(|e| ModelFormatError::Architecture(e.to_string()))?;
        if arch.format != FORMAT || arch.version != VERSION {
            return Err(ModelFormatError::Architecture(format!(
                "unsupported format {} v{}",
                arch.format, arch.version
            )));
        }
        let (input_shape, hidden, outputs) = parse_layers(&arch.layers)?;
        let (input_len, total) = weight_count(&input_shape, hidden, outputs)?;

        let expected_manifest = manifest(input_len, hidden, outputs);
        if arch.weights != expected_manifest {
            return Err(ModelFormatError::Architecture(format!(
                "weight manifest {:?} does not match layers",
                arch.weights
            )));
        }

        let values = decode_weights(&artifacts.weights, total)?;
        let labels = decode_labels(&artifacts.labels)?;
        if labels.len() != outputs {
            return Err(ModelFormatError::LabelMismatch {
                labels: labels.len(),
                outputs,
            });
        }

        let (w1, rest) = values.split_at(input_len * hidden);
        let (b1, w2) = rest.split_at(hidden);
        let w1 = Array2::from_shape_vec((input_len, hidden), w1.to_vec())
            .map_err(|e| ModelFormatError::Weights(e.to_string()))?;
        let w2 = Array2::from_shape_vec((hidden, outputs), w2.to_vec())
            .map_err(|e| ModelFormatError::Weights(e.to_string()))?;
        HeadModel::from_parts(labels, input_shape, w1, Array1::from(b1.to_vec()), w2)
            .map_err(|e| ModelFormatError::Weights(e.to_string()))
    }
}

fn manifest(input_len: usize, hidden: usize, outputs: usize) -> Vec<WeightSpec> {
    vec![
        WeightSpec {
            name: HIDDEN_KERNEL.to_string(),
            shape: vec![input_len, hidden],
        },
        WeightSpec {
            name: HIDDEN_BIAS.to_string(),
            shape: vec![hidden],
        },
        WeightSpec {
            name: OUTPUT_KERNEL.to_string(),
            shape: vec![hidden, outputs],
        },
    ]
}

fn parse_layers(layers: &[LayerSpec]) -> Result<(Vec<usize>, usize, usize), ModelFormatError> {
    match layers {
        [LayerSpec::Flatten { input_shape }, LayerSpec::Dense {
            units: hidden,
            activation: Activation::Relu,
            use_bias: true,
        }, LayerSpec::Dense {
            units: outputs,
            activation: Activation::Softmax,
            use_bias: false,
        }] if !input_shape.is_empty() && *hidden > 0 && *outputs > 0 => {
            Ok((input_shape.clone(), *hidden, *outputs))
        }
        _ => Err(ModelFormatError::Architecture(
            "expected flatten → dense(relu, bias) → dense(softmax, no bias)".to_string(),
        )),
    }
}

/// Flattened input length and total weight count, or an error when the
/// declared shapes do not fit in memory.
fn weight_count(
    input_shape: &[usize],
    hidden: usize,
    outputs: usize,
) -> Result<(usize, usize), ModelFormatError> {
    let too_large = || {
        ModelFormatError::Architecture(format!(
            "input {input_shape:?} with {hidden} hidden and {outputs} output units is too large"
        ))
    };
    let input_len = input_shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(too_large)?;
    let total = input_len
        .checked_mul(hidden)
        .and_then(|n| n.checked_add(hidden))
        .and_then(|n| n.checked_add(hidden.checked_mul(outputs)?))
        .filter(|n| n.checked_mul(4).is_some())
        .ok_or_else(too_large)?;
    Ok((input_len, total))
}

fn decode_weights(bytes: &[u8], expected: usize) -> Result<Vec<f32>, ModelFormatError> {
    if bytes.len() / 4 != expected || bytes.len() % 4 != 0 {
        return Err(ModelFormatError::Weights(format!(
            "expected {expected} values, got {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn decode_labels(bytes: &[u8]) -> Result<Vec<Label>, ModelFormatError> {
    let names: Vec<String> =
        serde_json::from_slice(bytes).map_err(|e| ModelFormatError::Labels(e.to_string()))?;
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let label = Label::new(&name).map_err(|e| ModelFormatError::Labels(e.to_string()))?;
            if !seen.insert(label.clone()) {
                return Err(ModelFormatError::Labels(format!("duplicate label {label}")));
            }
            Ok(label)
        })
        .collect()
}
