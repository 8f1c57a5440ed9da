//! HTTP surface: the POST `/run` endpoint, CORS policy and static files.
//!
//! Response mapping follows the original service contract: only credential
//! failures produce a non-200 status (403). Execution failures are
//! transport-level successes carrying an `error` field, so a permissive
//! client can treat every executed request uniformly.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::auth::AccessGate;
use crate::config::ServerConfig;
use crate::sandbox::Sandbox;

/// Header carrying the caller's credential.
pub const ALLY_KEY_HEADER: &str = "x-ally-key";

/// Fixed message returned on credential failure.
const UNAUTHORIZED_MESSAGE: &str = "Unauthorized: invalid ALLY_KEY";

#[derive(Clone)]
pub struct AppState {
    gate: Arc<AccessGate>,
    sandbox: Arc<Sandbox>,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// Source text to execute.
    pub code: String,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    result: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Builds the application router.
///
/// Requests that don't match `/run` fall through to the static directory.
pub fn router(
    config: &ServerConfig,
    gate: AccessGate,
    sandbox: Sandbox,
) -> anyhow::Result<Router> {
    let origin: HeaderValue = config.allowed_origin.parse()?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ALLY_KEY_HEADER),
        ]);

    let state = AppState {
        gate: Arc::new(gate),
        sandbox: Arc::new(sandbox),
    };

    Ok(Router::new()
        .route("/run", post(run))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(cors)
        .with_state(state))
}

/// POST /run — gate the credential, then execute the submitted code.
async fn run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> Response {
    let supplied = headers
        .get(ALLY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    // The submitted code is never logged here; only the gate outcome is.
    if !state.gate.verify(supplied) {
        warn!("Rejected /run request: invalid or missing {ALLY_KEY_HEADER}");
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: UNAUTHORIZED_MESSAGE.to_string(),
            }),
        )
            .into_response();
    }

    match state.sandbox.execute(&request.code).await {
        Ok(result) => {
            info!("Executed script ({} bytes of output)", result.len());
            Json(RunResponse { result }).into_response()
        }
        // Execution failures stay at 200 — only the gate maps to 403
        Err(err) => {
            info!("Script failed: {err}");
            Json(ErrorResponse {
                error: err.to_string(),
            })
            .into_response()
        }
    }
}
