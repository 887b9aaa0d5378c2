// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Model execution capability used by the serving core.
//!
//! The serving core never talks to a framework directly. It asks a
//! [`BackendFactory`] for a [`ModelBackend`] matching the model's kind,
//! wraps the loaded backend in a [`ModelHandle`], and only ever calls
//! `predict` / `unload` through that handle.

pub mod artifact;
pub mod backend;
pub mod error;
pub mod handle;

pub use backend::{
    BackendFactory, BuiltinBackends, ModelBackend, ModelSignature, OnnxBackend, PyTorchBackend,
    SklearnBackend,
};
pub use error::{LoadError, PredictError};
pub use handle::ModelHandle;
pub use protocol::{ModelKind, UnsupportedKindError};
