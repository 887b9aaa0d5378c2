// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use protocol::{ModelInfo, ModelKind};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{ModelBackend, ModelSignature};
use crate::error::{LoadError, PredictError};

/// A loaded model: registry coordinates plus the backend that owns the
/// model's backing resource.
///
/// A handle can only be obtained through [`ModelHandle::open`], which loads
/// the backend first, so every live handle starts out fully loaded. After
/// [`ModelHandle::unload`] it stays addressable by anyone still holding it,
/// but reports `loaded = false` and refuses to predict.
pub struct ModelHandle {
    name: String,
    version: String,
    kind: ModelKind,
    path: PathBuf,
    loaded_at: SystemTime,
    /// Predictions take the read side, unload takes the write side so it
    /// waits for in-flight predictions before dropping the resource.
    backend: RwLock<Box<dyn ModelBackend>>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ModelHandle {
    /// Load `backend` from `path` and wrap it in a handle.
    ///
    /// This performs blocking I/O.
    pub fn open(
        name: impl Into<String>,
        version: impl Into<String>,
        path: impl AsRef<Path>,
        mut backend: Box<dyn ModelBackend>,
    ) -> Result<Self, LoadError> {
        let name = name.into();
        let version = version.into();
        let path = path.as_ref().to_path_buf();

        backend.load(&path)?;
        info!(
            "model-runtime: loaded {}:{} ({}) from {}",
            name,
            version,
            backend.kind(),
            path.display()
        );

        Ok(Self {
            name,
            version,
            kind: backend.kind(),
            path,
            loaded_at: SystemTime::now(),
            backend: RwLock::new(backend),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    pub fn is_loaded(&self) -> bool {
        self.backend
            .read()
            .map(|backend| backend.is_loaded())
            .unwrap_or(false)
    }

    pub fn signature(&self) -> ModelSignature {
        self.backend
            .read()
            .map(|backend| backend.signature())
            .unwrap_or_default()
    }

    /// Run the backend's prediction. Blocking; call from a worker thread.
    pub fn predict(&self, input: &Value) -> Result<Value, PredictError> {
        let backend = self.backend.read().map_err(|_| {
            PredictError::Execution(format!(
                "backend for {}:{} is poisoned by an earlier panic",
                self.name, self.version
            ))
        })?;
        if !backend.is_loaded() {
            return Err(PredictError::NotLoaded);
        }
        backend.predict(input)
    }

    /// Release the backing resource. Idempotent.
    ///
    /// Blocks until predictions already running on this handle return.
    pub fn unload(&self) {
        let mut backend = self.backend.write().unwrap_or_else(|poisoned| {
            warn!(
                "model-runtime: backend lock for {}:{} poisoned; unloading anyway",
                self.name, self.version
            );
            PoisonError::into_inner(poisoned)
        });
        if backend.is_loaded() {
            backend.unload();
            info!("model-runtime: unloaded {}:{}", self.name, self.version);
        }
    }

    /// Metadata view used by listing and info endpoints.
    pub fn info(&self) -> ModelInfo {
        let signature = self.signature();
        ModelInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            kind: self.kind,
            loaded: self.is_loaded(),
            input_shape: signature.input_shape,
            output_shape: signature.output_shape,
            description: Some(format!("loaded from {}", self.path.display())),
        }
    }
}
