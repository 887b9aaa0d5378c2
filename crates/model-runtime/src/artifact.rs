// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Portable dense-layer model artifacts.
//!
//! The built-in backends do not link any framework runtime. Instead they
//! execute a small, framework-neutral artifact: a JSON document describing a
//! stack of affine layers, each followed by an optional activation.
//!
//! ```json
//! {
//!   "layers": [
//!     { "weights": [[0.1, 0.2], [0.3, 0.4]], "bias": [0.0, 0.1], "activation": "relu" },
//!     { "weights": [[1.0, -1.0]], "activation": "sigmoid" }
//!   ],
//!   "labels": ["negative", "positive"],
//!   "inputs": ["features"],
//!   "outputs": ["output", "label"]
//! }
//! ```
//!
//! Weight matrices are laid out one row per output unit, so a layer with
//! `weights` of shape `[out, in]` maps an `in`-wide row to an `out`-wide row.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{LoadError, PredictError};

/// Output names an artifact may declare for named-tensor (onnx-like) models.
pub const OUTPUT_RAW: &str = "output";
pub const OUTPUT_LABEL: &str = "label";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    None,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    fn apply(self, row: &mut [f64]) {
        match self {
            Activation::None => {}
            Activation::Relu => row.iter_mut().for_each(|x| *x = x.max(0.0)),
            Activation::Sigmoid => row.iter_mut().for_each(|x| *x = 1.0 / (1.0 + (-*x).exp())),
            Activation::Tanh => row.iter_mut().for_each(|x| *x = x.tanh()),
            Activation::Softmax => {
                let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mut sum = 0.0;
                for x in row.iter_mut() {
                    *x = (*x - max).exp();
                    sum += *x;
                }
                if sum > 0.0 {
                    row.iter_mut().for_each(|x| *x /= sum);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    /// Empty means a zero bias.
    #[serde(default)]
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

impl DenseLayer {
    fn input_dim(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }

    fn output_dim(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, row: &[f64]) -> Vec<f64> {
        let mut out: Vec<f64> = self
            .weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let dot: f64 = w.iter().zip(row).map(|(a, b)| a * b).sum();
                dot + self.bias.get(i).copied().unwrap_or(0.0)
            })
            .collect();
        self.activation.apply(&mut out);
        out
    }
}

fn default_inputs() -> Vec<String> {
    vec!["input".to_string()]
}

fn default_outputs() -> Vec<String> {
    vec![OUTPUT_RAW.to_string()]
}

/// A validated stack of dense layers plus optional label and tensor-name
/// metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct DenseModel {
    pub layers: Vec<DenseLayer>,
    /// Class labels indexed by output unit (or `[negative, positive]` for a
    /// single-unit binary classifier).
    #[serde(default)]
    pub labels: Vec<Value>,
    /// Names of the input tensors, concatenated feature-wise in this order.
    #[serde(default = "default_inputs")]
    pub inputs: Vec<String>,
    #[serde(default = "default_outputs")]
    pub outputs: Vec<String>,
}

impl DenseModel {
    /// Read and validate an artifact. This performs blocking file I/O.
    pub fn read(path: &Path) -> Result<Self, LoadError> {
        let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model: DenseModel = serde_json::from_str(&raw)
            .map_err(|e| LoadError::format(path, format!("not a dense model document: {e}")))?;
        model
            .validate()
            .map_err(|reason| LoadError::format(path, reason))?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("artifact declares no layers".to_string());
        }

        let mut expected_in: Option<usize> = None;
        for (idx, layer) in self.layers.iter().enumerate() {
            let width = layer.input_dim();
            if layer.output_dim() == 0 || width == 0 {
                return Err(format!("layer {idx} has an empty weight matrix"));
            }
            if layer.weights.iter().any(|row| row.len() != width) {
                return Err(format!("layer {idx} weight matrix is not rectangular"));
            }
            if !layer.bias.is_empty() && layer.bias.len() != layer.output_dim() {
                return Err(format!(
                    "layer {idx} bias has {} entries, expected {}",
                    layer.bias.len(),
                    layer.output_dim()
                ));
            }
            if let Some(expected) = expected_in {
                if expected != width {
                    return Err(format!(
                        "layer {idx} expects {width} inputs but previous layer produces {expected}"
                    ));
                }
            }
            expected_in = Some(layer.output_dim());
        }

        if self.inputs.is_empty() {
            return Err("artifact declares no input names".to_string());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.inputs.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(format!("duplicate input name '{dup}'"));
        }
        if let Some(bad) = self
            .outputs
            .iter()
            .find(|name| name.as_str() != OUTPUT_RAW && name.as_str() != OUTPUT_LABEL)
        {
            return Err(format!("unknown output name '{bad}'"));
        }
        Ok(())
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(DenseLayer::input_dim).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(DenseLayer::output_dim).unwrap_or(0)
    }

    /// Run a single feature row through every layer.
    pub fn forward(&self, row: &[f64]) -> Result<Vec<f64>, PredictError> {
        if row.len() != self.input_dim() {
            return Err(PredictError::InvalidInput(format!(
                "expected {} features per row, got {}",
                self.input_dim(),
                row.len()
            )));
        }
        let mut current = row.to_vec();
        for layer in &self.layers {
            current = layer.forward(&current);
        }
        Ok(current)
    }

    /// Apply the model along the last axis of `input`, keeping leading axes.
    pub fn forward_tensor(&self, input: &Tensor) -> Result<Tensor, PredictError> {
        let mut data = Vec::with_capacity(input.row_count() * self.output_dim());
        for row in input.rows()? {
            data.extend(self.forward(row)?);
        }
        let mut shape = input.shape[..input.shape.len() - 1].to_vec();
        shape.push(self.output_dim());
        Ok(Tensor { shape, data })
    }

    /// Map an output row to a class label.
    ///
    /// Single-unit outputs are thresholded at 0.5 when two labels are
    /// declared and returned as-is otherwise (regression).
    pub fn label_for(&self, output: &[f64]) -> Value {
        if output.len() == 1 {
            return match self.labels.as_slice() {
                [negative, positive] => {
                    if output[0] >= 0.5 {
                        positive.clone()
                    } else {
                        negative.clone()
                    }
                }
                _ => Value::from(output[0]),
            };
        }
        let idx = argmax(output);
        self.labels
            .get(idx)
            .cloned()
            .unwrap_or_else(|| Value::from(idx))
    }
}

pub fn argmax(row: &[f64]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_val), (i, &v)| {
            if v > best_val {
                (i, v)
            } else {
                (best, best_val)
            }
        })
        .0
}

/// Dense row-major numeric tensor decoded from JSON nested arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    /// Decode a rectangular nested array of numbers.
    pub fn from_json(value: &Value) -> Result<Self, PredictError> {
        let shape = infer_shape(value);
        let mut data = Vec::with_capacity(shape.iter().product());
        flatten(value, &shape, &mut data)?;
        Ok(Tensor { shape, data })
    }

    /// Build a tensor from an explicit shape and flat row-major data.
    pub fn from_parts(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, PredictError> {
        // Zero-sized axes are counted as 1 so every sub-shape product used
        // later is also known to fit.
        if shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d.max(1)))
            .is_none()
        {
            return Err(PredictError::InvalidInput(format!(
                "shape {shape:?} is too large"
            )));
        }
        let expected: usize = shape.iter().product();
        if shape.is_empty() || expected != data.len() {
            return Err(PredictError::InvalidInput(format!(
                "shape {shape:?} does not match {} data values",
                data.len()
            )));
        }
        Ok(Tensor { shape, data })
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Width of the last axis.
    pub fn row_len(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        match self.row_len() {
            0 => 0,
            n => self.data.len() / n,
        }
    }

    /// Iterate over the last axis. Scalars and empty tensors have no rows.
    pub fn rows(&self) -> Result<std::slice::Chunks<'_, f64>, PredictError> {
        if self.rank() == 0 || self.row_len() == 0 || self.data.is_empty() {
            return Err(PredictError::InvalidInput(
                "input tensor is empty or scalar".to_string(),
            ));
        }
        Ok(self.data.chunks(self.row_len()))
    }

    pub fn to_json(&self) -> Value {
        build_json(&self.shape, &self.data)
    }
}

fn infer_shape(value: &Value) -> Vec<usize> {
    let mut shape = Vec::new();
    let mut current = value;
    while let Value::Array(items) = current {
        shape.push(items.len());
        match items.first() {
            Some(first) => current = first,
            None => break,
        }
    }
    shape
}

fn flatten(value: &Value, shape: &[usize], out: &mut Vec<f64>) -> Result<(), PredictError> {
    match (value, shape.split_first()) {
        (Value::Number(n), None) => {
            let x = n
                .as_f64()
                .ok_or_else(|| PredictError::InvalidInput(format!("unrepresentable number {n}")))?;
            out.push(x);
            Ok(())
        }
        (Value::Array(items), Some((len, rest))) if items.len() == *len => {
            for item in items {
                flatten(item, rest, out)?;
            }
            Ok(())
        }
        (Value::Array(_), _) => Err(PredictError::InvalidInput(
            "input tensor is ragged".to_string(),
        )),
        (other, _) => Err(PredictError::InvalidInput(format!(
            "expected a number or array, got {}",
            json_type(other)
        ))),
    }
}

fn build_json(shape: &[usize], data: &[f64]) -> Value {
    match shape.split_first() {
        None => data.first().copied().map(Value::from).unwrap_or(Value::Null),
        Some((_, rest)) => {
            let stride: usize = rest.iter().product();
            if stride == 0 {
                return Value::Array(Vec::new());
            }
            Value::Array(
                data.chunks(stride)
                    .map(|chunk| build_json(rest, chunk))
                    .collect(),
            )
        }
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
