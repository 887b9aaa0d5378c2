// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use model_runtime::{BackendFactory, BuiltinBackends, ModelHandle, ModelKind};
use protocol::{ModelConfig, ModelInfo};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::ServingError;

type Versions = HashMap<String, Arc<ModelHandle>>;

#[derive(Default)]
struct Models {
    by_name: HashMap<String, Versions>,
    /// Set by [`ModelRegistry::close`]; no handle is installed afterwards.
    closed: bool,
}

/// Tracks loaded models by name and version.
///
/// The map lock is only ever held for the map update itself. Reading the
/// artifact and releasing a replaced or removed model both happen on the
/// blocking pool with the lock released, so slow model I/O never stalls
/// lookups.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RwLock<Models>>,
    factory: Arc<dyn BackendFactory>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Empty registry backed by the built-in backends.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(BuiltinBackends))
    }

    pub fn with_factory(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Models::default())),
            factory,
        }
    }

    /// Load a model and install it under `(name, version)`.
    ///
    /// An existing handle under the same key is swapped out first and
    /// unloaded afterwards, so lookups always find one of the two.
    pub async fn load(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        kind: ModelKind,
        version: &str,
    ) -> Result<Arc<ModelHandle>, ServingError> {
        if self.inner.read().await.closed {
            return Err(ServingError::ShuttingDown);
        }
        let backend = self.factory.create(kind)?;

        let (owned_name, owned_version) = (name.to_string(), version.to_string());
        let path = path.as_ref().to_path_buf();
        let handle = tokio::task::spawn_blocking(move || {
            ModelHandle::open(owned_name, owned_version, path, backend)
        })
        .await
        .map_err(|e| ServingError::Worker(e.to_string()))?
        .map_err(|e| {
            error!("serving::registry: failed to load {}:{}: {e}", name, version);
            e
        })?;
        let handle = Arc::new(handle);

        let previous = {
            let mut models = self.inner.write().await;
            if models.closed {
                drop(models);
                warn!(
                    "serving::registry: discarding {}:{}; registry closed during load",
                    name, version
                );
                release(handle).await;
                return Err(ServingError::ShuttingDown);
            }
            models
                .by_name
                .entry(name.to_string())
                .or_default()
                .insert(version.to_string(), handle.clone())
        };

        if let Some(previous) = previous {
            info!(
                "serving::registry: replaced {}:{}; releasing previous instance",
                name, version
            );
            release(previous).await;
        }

        info!("serving::registry: model {}:{} ready", name, version);
        Ok(handle)
    }

    /// Remove and release `(name, version)`.
    ///
    /// Returns `false` when nothing was registered under that key.
    pub async fn unload(&self, name: &str, version: &str) -> bool {
        let removed = {
            let mut models = self.inner.write().await;
            let Some(versions) = models.by_name.get_mut(name) else {
                return false;
            };
            let removed = versions.remove(version);
            if versions.is_empty() {
                models.by_name.remove(name);
            }
            removed
        };

        match removed {
            Some(handle) => {
                release(handle).await;
                info!("serving::registry: model {}:{} unloaded", name, version);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, name: &str, version: &str) -> Result<Arc<ModelHandle>, ServingError> {
        let models = self.inner.read().await;
        models
            .by_name
            .get(name)
            .and_then(|versions| versions.get(version))
            .cloned()
            .ok_or_else(|| ServingError::not_found(name, version))
    }

    /// Snapshot of every registered model, ordered by name then version.
    pub async fn list(&self) -> Vec<ModelInfo> {
        let handles: Vec<Arc<ModelHandle>> = {
            let models = self.inner.read().await;
            models.by_name.values().flat_map(|v| v.values().cloned()).collect()
        };

        let mut infos: Vec<ModelInfo> = handles.iter().map(|h| h.info()).collect();
        infos.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        infos
    }

    /// Number of registered `(name, version)` pairs.
    pub async fn len(&self) -> usize {
        let models = self.inner.read().await;
        models.by_name.values().map(HashMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains_name(&self, name: &str) -> bool {
        self.inner.read().await.by_name.contains_key(name)
    }

    /// Load every record in order, stopping at the first failure.
    ///
    /// Models loaded before the failing record stay registered; callers that
    /// abort startup are expected to call [`ModelRegistry::unload_all`].
    pub async fn load_all(&self, configs: &[ModelConfig]) -> Result<usize, ServingError> {
        let mut loaded = 0;
        for cfg in configs {
            let kind = cfg.kind().map_err(|e| {
                error!(
                    "serving::registry: bootstrap record {}:{} has {e}",
                    cfg.name, cfg.version
                );
                e
            })?;
            self.load(&cfg.name, &cfg.path, kind, &cfg.version).await?;
            loaded += 1;
        }
        info!("serving::registry: bootstrapped {} model(s)", loaded);
        Ok(loaded)
    }

    /// Remove and release every model. Returns how many were released.
    pub async fn unload_all(&self) -> usize {
        self.drain(false).await
    }

    /// Like [`ModelRegistry::unload_all`], but also refuses every later
    /// `load` with [`ServingError::ShuttingDown`], including loads already
    /// reading their artifact.
    pub async fn close(&self) -> usize {
        self.drain(true).await
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }

    async fn drain(&self, close: bool) -> usize {
        let drained = {
            let mut models = self.inner.write().await;
            models.closed |= close;
            std::mem::take(&mut models.by_name)
        };

        let mut count = 0;
        for (_, versions) in drained {
            for (_, handle) in versions {
                release(handle).await;
                count += 1;
            }
        }
        info!("serving::registry: unloaded {} model(s)", count);
        count
    }
}

async fn release(handle: Arc<ModelHandle>) {
    let label = format!("{}:{}", handle.name(), handle.version());
    if let Err(e) = tokio::task::spawn_blocking(move || handle.unload()).await {
        warn!("serving::registry: releasing {} failed: {e}", label);
    }
}
