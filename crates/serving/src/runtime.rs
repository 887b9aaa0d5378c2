// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::sync::Arc;

use model_runtime::BackendFactory;
use protocol::ModelConfig;
use serde_json::Value;
use tracing::info;

use crate::dispatcher::{BatchOutcome, Dispatcher, DispatcherConfig, Prediction};
use crate::error::ServingError;
use crate::registry::ModelRegistry;

/// Process-wide serving state: one registry and one dispatcher.
///
/// Created empty at startup, handed to the gateway by clone (every field is
/// shared), and torn down with [`RuntimeManager::shutdown`].
#[derive(Clone)]
pub struct RuntimeManager {
    registry: ModelRegistry,
    dispatcher: Dispatcher,
}

impl RuntimeManager {
    pub fn new(config: DispatcherConfig) -> Self {
        Self::from_parts(ModelRegistry::new(), Dispatcher::new(config))
    }

    pub fn with_factory(config: DispatcherConfig, factory: Arc<dyn BackendFactory>) -> Self {
        Self::from_parts(ModelRegistry::with_factory(factory), Dispatcher::new(config))
    }

    pub fn from_parts(registry: ModelRegistry, dispatcher: Dispatcher) -> Self {
        info!(
            "serving: runtime ready with {} worker(s), queue depth {}",
            dispatcher.config().workers,
            dispatcher.config().queue_depth
        );
        Self {
            registry,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Load the startup model list. Fails on the first bad record.
    pub async fn bootstrap(&self, models: &[ModelConfig]) -> Result<usize, ServingError> {
        self.registry.load_all(models).await
    }

    /// Look up `(name, version)` and predict on it.
    ///
    /// An unknown model fails here, before anything is queued.
    pub async fn execute_predict(
        &self,
        name: &str,
        version: &str,
        input: Value,
    ) -> Result<Prediction, ServingError> {
        let handle = self.registry.get(name, version).await?;
        self.dispatcher.predict(handle, input).await
    }

    pub async fn execute_batch(
        &self,
        name: &str,
        version: &str,
        items: Vec<Value>,
        batch_size: usize,
    ) -> Result<BatchOutcome, ServingError> {
        let handle = self.registry.get(name, version).await?;
        self.dispatcher
            .batch_predict(handle, items, batch_size)
            .await
    }

    /// Stop admitting predictions and loads, then release every model.
    pub async fn shutdown(&self) -> usize {
        self.dispatcher.close();
        let released = self.registry.close().await;
        info!("serving: shutdown complete, released {} model(s)", released);
        released
    }
}
