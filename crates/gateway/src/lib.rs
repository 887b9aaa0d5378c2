// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{delete, get, post};
use axum::Router;
use serving::RuntimeManager;
use tokio::net::TcpListener;
use tracing::{error, info};

pub mod auth;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;
pub mod shutdown;

pub use auth::{AllowAll, ApiKeys, CredentialCheck};
pub use error::ApiError;

pub struct Config {
    pub listen: SocketAddr,
    /// chunk size for `/batch_predict` requests that do not name one.
    pub default_batch_size: usize,
    pub credentials: Arc<dyn CredentialCheck>,
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub runtime: RuntimeManager,
    pub credentials: Arc<dyn CredentialCheck>,
    pub default_batch_size: usize,
}

/// Build the full route table.
///
/// `/api/v1/health` and `/api/v1/stats` stay open; every other `/api/v1`
/// route goes through the credential check.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/predict", post(routes::predict))
        .route("/batch_predict", post(routes::batch_predict))
        .route("/models", get(routes::list_models))
        .route("/models/load", post(routes::load_model))
        .route("/models/:name", delete(routes::unload_model))
        .route("/models/:name/info", get(routes::model_info))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_credentials,
        ));

    let open = Router::new()
        .route("/health", get(routes::health))
        .route("/stats", get(routes::stats));

    Router::new()
        .route("/", get(routes::root))
        .nest("/api/v1", protected.merge(open))
        .layer(axum::middleware::from_fn(middleware::log_requests))
        .with_state(state)
}

/// Serve on an already-bound listener until `signal` resolves, then drain
/// in-flight requests.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("gateway: listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(signal)
        .await
        .with_context(|| format!("gateway server on {addr} failed"))
}

/// Run the gateway: bind, serve until ctrl-c/SIGTERM, then release every
/// loaded model.
pub async fn run(config: Config, runtime: RuntimeManager) -> Result<()> {
    let listener = match TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            runtime.shutdown().await;
            return Err(e).with_context(|| format!("failed to bind {}", config.listen));
        }
    };

    let state = AppState {
        runtime: runtime.clone(),
        credentials: config.credentials,
        default_batch_size: config.default_batch_size,
    };

    let served = serve(listener, state, shutdown::wait_for_signal()).await;
    if let Err(e) = &served {
        error!("gateway: {e:?}");
    }

    info!("gateway: shutting down");
    runtime.shutdown().await;
    served
}
