// SPDX-License-Identifier: PolyForm-Shield-1.0

use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::info;

use crate::auth::API_KEY_HEADER;
use crate::error::ApiError;
use crate::AppState;

/// Reject requests whose `X-API-Key` does not pass the configured check.
pub async fn require_credentials(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if !state.credentials.verify(presented) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

/// One log line per request: method, path, status and latency.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        "gateway: {} {} -> {} in {:.3}ms",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64() * 1000.0
    );
    response
}
