// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use model_runtime::ModelHandle;
use serde_json::Value;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, warn};

use crate::error::ServingError;
use crate::stats::{InferenceStats, StatsSnapshot};

/// Worker count used when the platform cannot report its parallelism.
pub const FALLBACK_WORKERS: usize = 4;

pub const DEFAULT_QUEUE_DEPTH: usize = 64;

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(FALLBACK_WORKERS)
}

/// Sizing for the inference worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Maximum number of model calls running at once.
    pub workers: usize,
    /// How many requests may wait for a worker before new ones are refused.
    pub queue_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Output of a single dispatched prediction.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub output: Value,
    /// Time spent inside the model call.
    pub elapsed: Duration,
}

/// Output of [`Dispatcher::batch_predict`].
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub predictions: Vec<Value>,
    pub total_time: Duration,
    pub batch_count: usize,
}

/// Runs predictions on the blocking pool with bounded concurrency.
///
/// Two semaphores gate every call:
/// - `admission` (workers + queue depth permits) is taken without waiting;
///   failing to get one is backpressure.
/// - `workers` is awaited; at most `workers` model calls run at once.
///
/// A caller dropped while still waiting for a worker gives both permits
/// back without touching stats. Once the model call starts, both permits
/// travel with the blocking task and are returned only when the call
/// finishes.
#[derive(Clone)]
pub struct Dispatcher {
    workers: Arc<Semaphore>,
    admission: Arc<Semaphore>,
    config: DispatcherConfig,
    stats: Arc<InferenceStats>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        // Both pools must fit in a semaphore.
        let workers = config.workers.clamp(1, Semaphore::MAX_PERMITS / 2);
        let config = DispatcherConfig {
            workers,
            queue_depth: config.queue_depth.min(Semaphore::MAX_PERMITS - workers),
        };
        Self {
            workers: Arc::new(Semaphore::new(workers)),
            admission: Arc::new(Semaphore::new(workers + config.queue_depth)),
            config,
            stats: Arc::new(InferenceStats::new()),
        }
    }

    pub fn config(&self) -> DispatcherConfig {
        self.config
    }

    /// Requests that may be running or queued at once.
    pub fn capacity(&self) -> usize {
        self.config.workers + self.config.queue_depth
    }

    /// Model calls currently running.
    pub fn in_flight(&self) -> usize {
        self.config.workers - self.workers.available_permits()
    }

    /// Requests admitted but still waiting for a worker.
    pub fn queued(&self) -> usize {
        let admitted = self.capacity() - self.admission.available_permits();
        admitted.saturating_sub(self.in_flight())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run `handle.predict(input)` on a worker.
    ///
    /// Stats are only updated when the model call succeeds; the handle's
    /// error is returned unchanged otherwise.
    pub async fn predict(
        &self,
        handle: Arc<ModelHandle>,
        input: Value,
    ) -> Result<Prediction, ServingError> {
        let slot = self
            .admission
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => {
                    warn!(
                        "serving::dispatcher: rejecting {}:{}; {} requests already admitted",
                        handle.name(),
                        handle.version(),
                        self.capacity()
                    );
                    ServingError::Backpressure {
                        capacity: self.capacity(),
                    }
                }
                TryAcquireError::Closed => ServingError::ShuttingDown,
            })?;

        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ServingError::ShuttingDown)?;

        let stats = self.stats.clone();
        let label = format!("{}:{}", handle.name(), handle.version());
        let task = tokio::task::spawn_blocking(move || {
            let _held = (slot, permit);
            let started = Instant::now();
            let output = handle.predict(&input)?;
            let elapsed = started.elapsed();
            stats.record(elapsed);
            Ok::<_, ServingError>(Prediction { output, elapsed })
        });

        let prediction = task
            .await
            .map_err(|e| ServingError::Worker(e.to_string()))?
            .map_err(|e| {
                warn!("serving::dispatcher: inference on {} failed: {e}", label);
                e
            })?;

        debug!(
            "serving::dispatcher: inference on {} completed in {:.3}s",
            label,
            prediction.elapsed.as_secs_f64()
        );
        Ok(prediction)
    }

    /// Predict over `items` in consecutive chunks of at most `batch_size`.
    ///
    /// Chunks run one after another and their outputs are concatenated in
    /// input order. A chunk whose output is an array with one entry per
    /// chunk item is spliced in element-wise; any other output (aggregate or
    /// multi-tensor results) is appended as a single entry.
    pub async fn batch_predict(
        &self,
        handle: Arc<ModelHandle>,
        items: Vec<Value>,
        batch_size: usize,
    ) -> Result<BatchOutcome, ServingError> {
        if batch_size == 0 {
            return Err(ServingError::InvalidBatchSize);
        }

        let started = Instant::now();
        let mut predictions = Vec::with_capacity(items.len());
        let mut batch_count = 0;

        let mut remaining = items.into_iter();
        loop {
            let chunk: Vec<Value> = remaining.by_ref().take(batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            let expected = chunk.len();
            let prediction = self.predict(handle.clone(), Value::Array(chunk)).await?;
            merge_chunk(&mut predictions, prediction.output, expected);
            batch_count += 1;
        }

        let total_time = started.elapsed();
        debug!(
            "serving::dispatcher: batch on {}:{} produced {} prediction(s) from {} chunk(s) in {:.3}s",
            handle.name(),
            handle.version(),
            predictions.len(),
            batch_count,
            total_time.as_secs_f64()
        );

        Ok(BatchOutcome {
            predictions,
            total_time,
            batch_count,
        })
    }

    /// Refuse new work. Calls already admitted finish normally.
    pub fn close(&self) {
        self.admission.close();
    }
}

// TODO: replace the length check with an explicit per-backend "row-aligned
// output" flag once backends can declare it.
fn merge_chunk(predictions: &mut Vec<Value>, output: Value, expected: usize) {
    match output {
        Value::Array(values) if values.len() == expected => predictions.extend(values),
        other => predictions.push(other),
    }
}
