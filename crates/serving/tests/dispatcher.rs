mod common;

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::{eventually, Gate, Output, TrackingFactory};
use model_runtime::{ModelKind, PredictError};
use serde_json::{json, Value};
use serving::{Dispatcher, DispatcherConfig, RuntimeManager, ServingError};

fn config(workers: usize, queue_depth: usize) -> DispatcherConfig {
    DispatcherConfig {
        workers,
        queue_depth,
    }
}

fn runtime_with(factory: Arc<TrackingFactory>, workers: usize, queue_depth: usize) -> RuntimeManager {
    RuntimeManager::with_factory(config(workers, queue_depth), factory)
}

fn iris_artifact() -> PathBuf {
    let mut dir = env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    dir.push(format!("modelgate-serving-{nanos}"));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("iris.json");
    let doc = json!({
        "layers": [{
            "weights": [[1, 0, 0, 0], [0, 1, 0, 0], [0, 0, 1, 0]],
            "activation": "softmax"
        }],
        "labels": ["setosa", "versicolor", "virginica"]
    });
    fs::write(&path, doc.to_string()).unwrap();
    path
}

#[tokio::test]
async fn iris_scenario() {
    let path = iris_artifact();
    let runtime = RuntimeManager::new(config(2, 8));
    runtime
        .registry()
        .load("iris", &path, ModelKind::Sklearn, "v1")
        .await
        .unwrap();

    let prediction = runtime
        .execute_predict("iris", "v1", json!([[1, 2, 3, 4]]))
        .await
        .unwrap();
    assert_eq!(prediction.output, json!(["virginica"]));
    assert_eq!(runtime.dispatcher().stats().total_requests, 1);

    let err = runtime
        .execute_predict("iris", "v2", json!([[1, 2, 3, 4]]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServingError::NotFound { .. }));
    assert_eq!(runtime.dispatcher().stats().total_requests, 1);

    assert!(runtime.registry().unload("iris", "v1").await);
    let err = runtime
        .execute_predict("iris", "v1", json!([[1, 2, 3, 4]]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServingError::NotFound { .. }));
    assert!(!runtime.registry().unload("iris", "v1").await);

    if let Some(dir) = path.parent() {
        fs::remove_dir_all(dir).ok();
    }
}

#[tokio::test]
async fn batch_preserves_order_with_short_last_chunk() {
    let runtime = runtime_with(Arc::new(TrackingFactory::new(Output::Echo)), 2, 8);
    runtime
        .registry()
        .load("echo", "/models/echo.json", ModelKind::PyTorch, "latest")
        .await
        .unwrap();

    let items: Vec<Value> = ["a", "b", "c", "d", "e"].iter().map(|s| json!(s)).collect();
    let outcome = runtime
        .execute_batch("echo", "latest", items.clone(), 2)
        .await
        .unwrap();

    assert_eq!(outcome.predictions, items);
    assert_eq!(outcome.batch_count, 3);
    assert_eq!(runtime.dispatcher().stats().total_requests, 3);
}

#[tokio::test]
async fn aggregate_chunk_outputs_are_appended_whole() {
    let runtime = runtime_with(Arc::new(TrackingFactory::new(Output::Aggregate)), 2, 8);
    runtime
        .registry()
        .load("agg", "/models/agg.json", ModelKind::Onnx, "latest")
        .await
        .unwrap();

    let items: Vec<Value> = (0..5).map(|i| json!([i])).collect();
    let outcome = runtime
        .execute_batch("agg", "latest", items, 2)
        .await
        .unwrap();

    assert_eq!(
        outcome.predictions,
        vec![json!({"rows": 2}), json!({"rows": 2}), json!({"rows": 1})]
    );
    assert_eq!(outcome.batch_count, 3);
}

#[tokio::test]
async fn batch_edge_cases() {
    let runtime = runtime_with(Arc::new(TrackingFactory::new(Output::Echo)), 1, 1);
    runtime
        .registry()
        .load("echo", "/models/echo.json", ModelKind::Sklearn, "latest")
        .await
        .unwrap();

    let err = runtime
        .execute_batch("echo", "latest", vec![json!(1)], 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ServingError::InvalidBatchSize));

    let empty = runtime
        .execute_batch("echo", "latest", Vec::new(), 32)
        .await
        .unwrap();
    assert!(empty.predictions.is_empty());
    assert_eq!(empty.batch_count, 0);
    assert_eq!(runtime.dispatcher().stats().total_requests, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_predicts_on_different_models_are_both_counted() {
    let runtime = runtime_with(Arc::new(TrackingFactory::new(Output::Echo)), 4, 8);
    for name in ["m1", "m2"] {
        runtime
            .registry()
            .load(name, "/models/m.json", ModelKind::PyTorch, "v1")
            .await
            .unwrap();
    }
    let before = runtime.dispatcher().stats().total_requests;

    let (a, b) = tokio::join!(
        runtime.execute_predict("m1", "v1", json!([1])),
        runtime.execute_predict("m2", "v1", json!([2])),
    );
    assert_eq!(a.unwrap().output, json!([1]));
    assert_eq!(b.unwrap().output, json!([2]));
    assert_eq!(runtime.dispatcher().stats().total_requests, before + 2);
}

#[tokio::test]
async fn predict_errors_propagate_without_touching_stats() {
    let runtime = runtime_with(Arc::new(TrackingFactory::new(Output::Echo)), 1, 1);
    let handle = runtime
        .registry()
        .load("m", "/models/m.json", ModelKind::Sklearn, "latest")
        .await
        .unwrap();

    let err = runtime
        .dispatcher()
        .predict(handle.clone(), json!("fail"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServingError::Predict(PredictError::Execution(_))
    ));

    handle.unload();
    let err = runtime
        .dispatcher()
        .predict(handle, json!([1]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServingError::Predict(PredictError::NotLoaded)));

    assert_eq!(runtime.dispatcher().stats().total_requests, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saturated_pool_queues_then_rejects() {
    let gate = Arc::new(Gate::default());
    let runtime = runtime_with(Arc::new(TrackingFactory::gated(gate.clone())), 1, 1);
    let handle = runtime
        .registry()
        .load("slow", "/models/slow.json", ModelKind::PyTorch, "latest")
        .await
        .unwrap();
    let dispatcher: Dispatcher = runtime.dispatcher().clone();

    let running = tokio::spawn({
        let (d, h) = (dispatcher.clone(), handle.clone());
        async move { d.predict(h, json!([1])).await }
    });
    assert!(eventually(|| dispatcher.in_flight() == 1).await);

    let queued = tokio::spawn({
        let (d, h) = (dispatcher.clone(), handle.clone());
        async move { d.predict(h, json!([2])).await }
    });
    assert!(eventually(|| dispatcher.queued() == 1).await);

    let rejected = dispatcher.predict(handle.clone(), json!([3])).await;
    match rejected {
        Err(err @ ServingError::Backpressure { capacity }) => {
            assert_eq!(capacity, 2);
            assert!(err.is_retryable());
        }
        other => panic!("expected backpressure, got {other:?}"),
    }

    gate.open();
    assert_eq!(running.await.unwrap().unwrap().output, json!([1]));
    assert_eq!(queued.await.unwrap().unwrap().output, json!([2]));
    assert_eq!(dispatcher.stats().total_requests, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_a_queued_predict_leaves_stats_alone() {
    let gate = Arc::new(Gate::default());
    let runtime = runtime_with(Arc::new(TrackingFactory::gated(gate.clone())), 1, 4);
    let handle = runtime
        .registry()
        .load("slow", "/models/slow.json", ModelKind::PyTorch, "latest")
        .await
        .unwrap();
    let dispatcher = runtime.dispatcher().clone();

    let running = tokio::spawn({
        let (d, h) = (dispatcher.clone(), handle.clone());
        async move { d.predict(h, json!([1])).await }
    });
    assert!(eventually(|| dispatcher.in_flight() == 1).await);

    let queued = tokio::spawn({
        let (d, h) = (dispatcher.clone(), handle.clone());
        async move { d.predict(h, json!([2])).await }
    });
    assert!(eventually(|| dispatcher.queued() == 1).await);

    queued.abort();
    assert!(queued.await.unwrap_err().is_cancelled());
    assert!(eventually(|| dispatcher.queued() == 0).await);

    gate.open();
    running.await.unwrap().unwrap();
    assert_eq!(dispatcher.stats().total_requests, 1);

    dispatcher.predict(handle, json!([3])).await.unwrap();
    assert_eq!(dispatcher.stats().total_requests, 2);
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn shutdown_refuses_new_work_and_releases_models() {
    let factory = Arc::new(TrackingFactory::new(Output::Echo));
    let runtime = runtime_with(factory.clone(), 1, 1);
    let handle = runtime
        .registry()
        .load("m", "/models/m.json", ModelKind::Sklearn, "latest")
        .await
        .unwrap();

    assert_eq!(runtime.shutdown().await, 1);
    assert_eq!(factory.live(), 0);

    let err = runtime
        .dispatcher()
        .predict(handle, json!([1]))
        .await
        .unwrap_err();
    assert!(matches!(err, ServingError::ShuttingDown));
}
