// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::path::Path;

use protocol::{ModelKind, UnsupportedKindError};
use serde_json::Value;

use crate::artifact::{argmax, json_type, DenseModel, Tensor, OUTPUT_LABEL};
use crate::error::{LoadError, PredictError};

/// Declared input/output widths of a loaded model, if the backend knows them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSignature {
    pub input_shape: Option<Vec<usize>>,
    pub output_shape: Option<Vec<usize>>,
}

/// Capability implemented by every model execution backend.
///
/// A backend exclusively owns its backing resource. `load` performs blocking
/// I/O and `predict` is CPU bound; callers are expected to run both off the
/// async request path.
pub trait ModelBackend: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn load(&mut self, path: &Path) -> Result<(), LoadError>;

    fn predict(&self, input: &Value) -> Result<Value, PredictError>;

    /// Release the backing resource. Calling this twice is a no-op.
    fn unload(&mut self);

    fn is_loaded(&self) -> bool;

    fn signature(&self) -> ModelSignature {
        ModelSignature::default()
    }
}

/// Constructs an unloaded backend for a model kind.
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: ModelKind) -> Result<Box<dyn ModelBackend>, UnsupportedKindError>;
}

/// Factory for the backends shipped with the gateway.
///
/// There is no tensorflow backend; asking for one yields
/// [`UnsupportedKindError`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinBackends;

impl BackendFactory for BuiltinBackends {
    fn create(&self, kind: ModelKind) -> Result<Box<dyn ModelBackend>, UnsupportedKindError> {
        match kind {
            ModelKind::PyTorch => Ok(Box::new(PyTorchBackend::default())),
            ModelKind::Sklearn => Ok(Box::new(SklearnBackend::default())),
            ModelKind::Onnx => Ok(Box::new(OnnxBackend::default())),
            ModelKind::TensorFlow => Err(UnsupportedKindError {
                kind: kind.to_string(),
            }),
        }
    }
}

fn loaded(model: &Option<DenseModel>) -> Result<&DenseModel, PredictError> {
    model.as_ref().ok_or(PredictError::NotLoaded)
}

fn dense_signature(model: &Option<DenseModel>) -> ModelSignature {
    match model {
        Some(m) => ModelSignature {
            input_shape: Some(vec![m.input_dim()]),
            output_shape: Some(vec![m.output_dim()]),
        },
        None => ModelSignature::default(),
    }
}

/// Tensor-in, tensor-out backend.
///
/// Accepts either nested numeric arrays of any rank (the model is applied
/// along the last axis) or a pre-shaped `{"shape": [...], "data": [...]}`
/// object. The artifact is always run in inference mode.
#[derive(Debug, Default)]
pub struct PyTorchBackend {
    model: Option<DenseModel>,
}

impl PyTorchBackend {
    fn decode(input: &Value) -> Result<Tensor, PredictError> {
        match input {
            Value::Object(map) => {
                let shape = map
                    .get("shape")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        PredictError::InvalidInput("pre-shaped input needs a 'shape' array".into())
                    })?
                    .iter()
                    .map(|d| {
                        d.as_u64().map(|d| d as usize).ok_or_else(|| {
                            PredictError::InvalidInput("shape entries must be integers".into())
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let flat = map.get("data").ok_or_else(|| {
                    PredictError::InvalidInput("pre-shaped input needs a 'data' array".into())
                })?;
                let flat = Tensor::from_json(flat)?;
                if flat.rank() != 1 {
                    return Err(PredictError::InvalidInput(
                        "pre-shaped 'data' must be a flat array".into(),
                    ));
                }
                Tensor::from_parts(shape, flat.data)
            }
            other => Tensor::from_json(other),
        }
    }
}

impl ModelBackend for PyTorchBackend {
    fn kind(&self) -> ModelKind {
        ModelKind::PyTorch
    }

    fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        self.model = Some(DenseModel::read(path)?);
        Ok(())
    }

    fn predict(&self, input: &Value) -> Result<Value, PredictError> {
        let model = loaded(&self.model)?;
        let tensor = Self::decode(input)?;
        Ok(model.forward_tensor(&tensor)?.to_json())
    }

    fn unload(&mut self) {
        self.model = None;
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn signature(&self) -> ModelSignature {
        dense_signature(&self.model)
    }
}

/// Estimator-style backend: a 2-D array of samples in, one label per sample
/// out.
#[derive(Debug, Default)]
pub struct SklearnBackend {
    model: Option<DenseModel>,
}

impl ModelBackend for SklearnBackend {
    fn kind(&self) -> ModelKind {
        ModelKind::Sklearn
    }

    fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        self.model = Some(DenseModel::read(path)?);
        Ok(())
    }

    fn predict(&self, input: &Value) -> Result<Value, PredictError> {
        let model = loaded(&self.model)?;
        let samples = Tensor::from_json(input)?;
        if samples.rank() != 2 {
            return Err(PredictError::InvalidInput(format!(
                "expected a 2-D array of samples, got rank {}",
                samples.rank()
            )));
        }
        let labels = samples
            .rows()?
            .map(|row| model.forward(row).map(|out| model.label_for(&out)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(labels))
    }

    fn unload(&mut self) {
        self.model = None;
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn signature(&self) -> ModelSignature {
        let mut sig = dense_signature(&self.model);
        sig.output_shape = self.model.as_ref().map(|_| vec![1]);
        sig
    }
}

/// Named-tensor backend.
///
/// Input is an object mapping each input name declared by the artifact to a
/// tensor; the tensors are concatenated feature-wise in declaration order.
/// The result is a sequence with one tensor per declared output.
#[derive(Debug, Default)]
pub struct OnnxBackend {
    model: Option<DenseModel>,
}

impl ModelBackend for OnnxBackend {
    fn kind(&self) -> ModelKind {
        ModelKind::Onnx
    }

    fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        self.model = Some(DenseModel::read(path)?);
        Ok(())
    }

    fn predict(&self, input: &Value) -> Result<Value, PredictError> {
        let model = loaded(&self.model)?;
        let feeds = input.as_object().ok_or_else(|| {
            PredictError::InvalidInput(format!(
                "expected an object of named input tensors, got {}",
                json_type(input)
            ))
        })?;
        if let Some(unknown) = feeds.keys().find(|k| !model.inputs.contains(*k)) {
            return Err(PredictError::InvalidInput(format!(
                "unknown input tensor '{unknown}'"
            )));
        }

        let mut tensors = Vec::with_capacity(model.inputs.len());
        for name in &model.inputs {
            let value = feeds.get(name).ok_or_else(|| {
                PredictError::InvalidInput(format!("missing input tensor '{name}'"))
            })?;
            let tensor = Tensor::from_json(value)?;
            if tensor.rank() != 2 {
                return Err(PredictError::InvalidInput(format!(
                    "input tensor '{name}' must be 2-D"
                )));
            }
            tensors.push(tensor);
        }

        let batch = tensors[0].row_count();
        if tensors.iter().any(|t| t.row_count() != batch) {
            return Err(PredictError::InvalidInput(
                "input tensors disagree on batch size".into(),
            ));
        }

        let mut iters = tensors
            .iter()
            .map(Tensor::rows)
            .collect::<Result<Vec<_>, _>>()?;
        let mut raw = Vec::with_capacity(batch * model.output_dim());
        let mut labels = Vec::with_capacity(batch);
        for _ in 0..batch {
            let mut features = Vec::with_capacity(model.input_dim());
            for rows in iters.iter_mut() {
                if let Some(row) = rows.next() {
                    features.extend_from_slice(row);
                }
            }
            let out = model.forward(&features)?;
            labels.push(argmax(&out) as f64);
            raw.extend(out);
        }

        let outputs = model
            .outputs
            .iter()
            .map(|name| {
                if name == OUTPUT_LABEL {
                    Tensor::from_parts(vec![batch], labels.clone())
                } else {
                    Tensor::from_parts(vec![batch, model.output_dim()], raw.clone())
                }
                .map(|t| t.to_json())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(outputs))
    }

    fn unload(&mut self) {
        self.model = None;
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn signature(&self) -> ModelSignature {
        dense_signature(&self.model)
    }
}
