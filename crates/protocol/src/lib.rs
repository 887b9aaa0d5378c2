// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// version used whenever a request or config record omits one.
pub const DEFAULT_VERSION: &str = "latest";

/// batch size used by `batch_predict` when the request does not carry one.
pub const DEFAULT_BATCH_SIZE: usize = 32;

pub fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

/// closed set of model execution backends the gateway knows about.
///
/// the wire form is lowercase (`"pytorch"`, `"sklearn"`, `"onnx"`,
/// `"tensorflow"`). a kind being recognised here does not imply that a
/// backend is registered for it; see `model_runtime::BackendFactory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    PyTorch,
    Sklearn,
    Onnx,
    TensorFlow,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::PyTorch,
        ModelKind::Sklearn,
        ModelKind::Onnx,
        ModelKind::TensorFlow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::PyTorch => "pytorch",
            ModelKind::Sklearn => "sklearn",
            ModelKind::Onnx => "onnx",
            ModelKind::TensorFlow => "tensorflow",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// a model kind string that no backend can serve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported model type: {kind}")]
pub struct UnsupportedKindError {
    pub kind: String,
}

impl FromStr for ModelKind {
    type Err = UnsupportedKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase();
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalised)
            .ok_or_else(|| UnsupportedKindError { kind: s.to_string() })
    }
}

/// a single model record, used both for the startup bootstrap list and for
/// the body of `POST /api/v1/models/load`.
///
/// `type` is kept as a raw string so that an unknown kind surfaces as an
/// `UnsupportedKindError` from the registry rather than a generic
/// deserialisation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_version")]
    pub version: String,
}

impl ModelConfig {
    pub fn kind(&self) -> Result<ModelKind, UnsupportedKindError> {
        self.kind.parse()
    }
}

/// body of `POST /api/v1/predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    /// array-like rows, or an object of named input tensors for onnx models.
    pub data: serde_json::Value,
    pub model_name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: serde_json::Value,
    pub model_name: String,
    pub version: String,
    /// seconds spent in the model call.
    pub inference_time: f64,
}

/// body of `POST /api/v1/batch_predict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictRequest {
    pub data: Vec<serde_json::Value>,
    pub model_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// falls back to the gateway's configured default when absent.
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictResponse {
    pub predictions: Vec<serde_json::Value>,
    pub model_name: String,
    pub total_time: f64,
    pub batch_count: usize,
}

/// metadata for a registered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: ModelKind,
    pub loaded: bool,
    #[serde(default)]
    pub input_shape: Option<Vec<usize>>,
    #[serde(default)]
    pub output_shape: Option<Vec<usize>>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnloadResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub models_loaded: usize,
    pub timestamp: String,
}

/// aggregate inference statistics plus worker pool occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_requests: u64,
    pub total_time: f64,
    pub average_time: f64,
    pub throughput: f64,
    pub in_flight: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}
