//! HTTP surface for the staging endpoints

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use base64::Engine;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, Level};

use crate::error::{ApiError, Result};
use crate::models::{StageRequest, StageResponse};
use crate::staging::StagingCoordinator;

const UNKNOWN_USER: &str = "unknown";
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: StagingCoordinator,
}

/// Router with the staging endpoints and the health probes
pub fn router(coordinator: StagingCoordinator) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/api/v1/namespaces/{namespace}/applications/{app}/stage",
            post(stage),
        )
        .route(
            "/api/v1/namespaces/{namespace}/staging/{stage_id}/complete",
            get(staged),
        )
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive()),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(AppState { coordinator })
}

/// User named in the Basic credentials; authentication happens upstream
fn request_user(headers: &HeaderMap) -> String {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .and_then(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .ok()
        })
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .and_then(|pair| pair.split(':').next().map(str::to_string))
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

async fn stage(
    State(state): State<AppState>,
    Path((namespace, app)): Path<(String, String)>,
    headers: HeaderMap,
    body: std::result::Result<Json<StageRequest>, JsonRejection>,
) -> Result<Json<StageResponse>> {
    let Json(request) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge {
                limit: MAX_BODY_BYTES,
            };
        }
        ApiError::bad_request("Failed to unmarshal app stage request")
            .with_detail(rejection.body_text())
    })?;
    let user = request_user(&headers);
    debug!(%namespace, %app, %user, "Stage requested");

    let response = state
        .coordinator
        .stage(&user, &namespace, &app, request)
        .await?;
    Ok(Json(response))
}

async fn staged(
    State(state): State<AppState>,
    Path((namespace, stage_id)): Path<(String, String)>,
) -> Result<Json<Value>> {
    let exists = state
        .coordinator
        .namespace_exists(&namespace)
        .await
        .map_err(|e| ApiError::internal(e, "checking namespace"))?;
    if !exists {
        return Err(ApiError::not_found(format!(
            "Targeted namespace '{namespace}' does not exist"
        )));
    }

    state
        .coordinator
        .completion_watcher()
        .await_completion(&stage_id)
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "kiln-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "kiln-server",
        "stagingNamespace": state.coordinator.config().staging_namespace,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn user_comes_from_basic_credentials() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_user(&headers), "unknown");

        let encoded = base64::engine::general_purpose::STANDARD.encode("admin:secret");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert_eq!(request_user(&headers), "admin");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer token"));
        assert_eq!(request_user(&headers), "unknown");
    }
}
