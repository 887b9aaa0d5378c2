// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Model registry and inference dispatch.

pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod stats;

pub use dispatcher::{BatchOutcome, Dispatcher, DispatcherConfig, Prediction};
pub use error::ServingError;
pub use registry::ModelRegistry;
pub use runtime::RuntimeManager;
pub use stats::{InferenceStats, StatsSnapshot};
