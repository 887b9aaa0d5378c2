#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use model_runtime::{
    BackendFactory, LoadError, ModelBackend, ModelKind, PredictError, UnsupportedKindError,
};
use serde_json::{json, Value};

/// Blocks predictions until opened. Waits are capped so a failing test can
/// never wedge the blocking pool.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Threads currently blocked on the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn wait(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let guard = self.open.lock().unwrap();
        let _ = self
            .cv
            .wait_timeout_while(guard, Duration::from_secs(5), |open| !*open)
            .unwrap();
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Return the input unchanged.
    Echo,
    /// Return one summary object regardless of input length.
    Aggregate,
}

/// Backend double that counts live resources and never touches disk.
///
/// - loading a path containing "missing" fails with an I/O error,
/// - loading a path containing "slow" waits on the load gate, if any,
/// - predicting on the string `"fail"` fails with an execution error.
pub struct TrackingBackend {
    kind: ModelKind,
    live: Arc<AtomicUsize>,
    loaded: bool,
    output: Output,
    gate: Option<Arc<Gate>>,
    load_gate: Option<Arc<Gate>>,
}

impl ModelBackend for TrackingBackend {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn load(&mut self, path: &Path) -> Result<(), LoadError> {
        if let Some(gate) = &self.load_gate {
            if path.to_string_lossy().contains("slow") {
                gate.wait();
            }
        }
        if path.to_string_lossy().contains("missing") {
            return Err(LoadError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such artifact"),
            });
        }
        self.loaded = true;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn predict(&self, input: &Value) -> Result<Value, PredictError> {
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if input == &json!("fail") {
            return Err(PredictError::Execution("boom".into()));
        }
        Ok(match self.output {
            Output::Echo => input.clone(),
            Output::Aggregate => json!({ "rows": input.as_array().map(Vec::len) }),
        })
    }

    fn unload(&mut self) {
        if self.loaded {
            self.loaded = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Factory producing [`TrackingBackend`]s; tensorflow is unsupported.
pub struct TrackingFactory {
    pub live: Arc<AtomicUsize>,
    pub output: Output,
    pub gate: Option<Arc<Gate>>,
    pub load_gate: Option<Arc<Gate>>,
}

impl TrackingFactory {
    pub fn new(output: Output) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            output,
            gate: None,
            load_gate: None,
        }
    }

    /// Loads of "slow" paths block until `gate` opens.
    pub fn load_gated(gate: Arc<Gate>) -> Self {
        Self {
            load_gate: Some(gate),
            ..Self::new(Output::Echo)
        }
    }

    pub fn gated(gate: Arc<Gate>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(Output::Echo)
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl BackendFactory for TrackingFactory {
    fn create(&self, kind: ModelKind) -> Result<Box<dyn ModelBackend>, UnsupportedKindError> {
        if kind == ModelKind::TensorFlow {
            return Err(UnsupportedKindError {
                kind: kind.to_string(),
            });
        }
        Ok(Box::new(TrackingBackend {
            kind,
            live: self.live.clone(),
            loaded: false,
            output: self.output,
            gate: self.gate.clone(),
            load_gate: self.load_gate.clone(),
        }))
    }
}

/// Poll `cond` until it holds or a second passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
