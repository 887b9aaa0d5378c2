// SPDX-License-Identifier: PolyForm-Shield-1.0

//! HTTP handlers. Every handler is a thin translation between the wire
//! types in `protocol` and calls on the shared [`serving::RuntimeManager`].

use axum::extract::{Path, State};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use protocol::{
    BatchPredictRequest, BatchPredictResponse, HealthResponse, ModelConfig, ModelInfo,
    ModelKind, PredictRequest, PredictResponse, StatsResponse, UnloadResponse,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::AppState;

/// `?version=` on model-scoped routes; absent means "latest".
#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    #[serde(default = "protocol::default_version")]
    pub version: String,
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "modelgate inference gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
    }))
}

pub async fn predict(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    let prediction = state
        .runtime
        .execute_predict(&req.model_name, &req.version, req.data)
        .await?;

    Ok(Json(PredictResponse {
        prediction: prediction.output,
        model_name: req.model_name,
        version: req.version,
        inference_time: prediction.elapsed.as_secs_f64(),
    }))
}

pub async fn batch_predict(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BatchPredictRequest>,
) -> Result<Json<BatchPredictResponse>, ApiError> {
    let batch_size = req.batch_size.unwrap_or(state.default_batch_size);
    let outcome = state
        .runtime
        .execute_batch(&req.model_name, &req.version, req.data, batch_size)
        .await?;

    Ok(Json(BatchPredictResponse {
        predictions: outcome.predictions,
        model_name: req.model_name,
        total_time: outcome.total_time.as_secs_f64(),
        batch_count: outcome.batch_count,
    }))
}

pub async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.runtime.registry().list().await)
}

pub async fn model_info(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiQuery(query): ApiQuery<VersionQuery>,
) -> Result<Json<ModelInfo>, ApiError> {
    let handle = state.runtime.registry().get(&name, &query.version).await?;
    Ok(Json(handle.info()))
}

pub async fn load_model(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ModelConfig>,
) -> Result<Json<ModelInfo>, ApiError> {
    let kind: ModelKind = req.kind()?;
    let handle = state
        .runtime
        .registry()
        .load(&req.name, &req.path, kind, &req.version)
        .await?;
    Ok(Json(handle.info()))
}

pub async fn unload_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiQuery(query): ApiQuery<VersionQuery>,
) -> Result<Json<UnloadResponse>, ApiError> {
    if !state.runtime.registry().unload(&name, &query.version).await {
        return Err(ApiError::ModelNotLoaded {
            name,
            version: query.version,
        });
    }
    Ok(Json(UnloadResponse {
        message: format!("model {name} version {} unloaded", query.version),
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        models_loaded: state.runtime.registry().len().await,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let dispatcher = state.runtime.dispatcher();
    let snapshot = dispatcher.stats();
    Json(StatsResponse {
        total_requests: snapshot.total_requests,
        total_time: snapshot.total_time,
        average_time: snapshot.average_time,
        throughput: snapshot.throughput,
        in_flight: dispatcher.in_flight(),
        workers: dispatcher.config().workers,
    })
}
