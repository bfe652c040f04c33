use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;

use crate::extractor::ConnectionStatus;
use crate::middleware::request_logging;
use crate::models::{
    CancelResponse, DeleteResponse, IngestRequest, IngestResponse, ReplayRequest, ReplayResponse,
};
use crate::service::{kinds, ReplayService};
use crate::snapshot::SnapshotSummary;

/// Header carrying the operator name recorded on ingested snapshots.
pub const OPERATOR_HEADER: &str = "x-operator";
const DEFAULT_OPERATOR: &str = "system";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: ReplayService,
}

/// Create the API router
pub fn create_router(service: ReplayService) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/replay/fetch", post(fetch_snapshot))
        .route("/api/replay/snapshots", get(list_snapshots))
        .route(
            "/api/replay/snapshots/:id",
            get(get_snapshot).delete(delete_snapshot),
        )
        .route("/api/replay/snapshots/:id/cancel", post(cancel_replay))
        .route("/api/replay/execute", post(execute_replay))
        .route("/api/replay/validate-connection", get(validate_connection))
        .layer(middleware::from_fn(request_logging))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Capture a fixture from the production event log
async fn fetch_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> (StatusCode, Json<IngestResponse>) {
    let operator = headers
        .get(OPERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_OPERATOR);

    let result = state.service.ingest(req, Some(operator)).await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(result))
}

async fn list_snapshots(
    State(state): State<AppState>,
) -> Result<Json<Vec<SnapshotSummary>>, ApiError> {
    Ok(Json(state.service.list()?))
}

async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SnapshotSummary>, ApiError> {
    state
        .service
        .get(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Snapshot {} not found", id)))
}

async fn delete_snapshot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if state.service.delete(id)? {
        Ok(Json(DeleteResponse { deleted: true }))
    } else {
        Err(ApiError::NotFound(format!("Snapshot {} not found", id)))
    }
}

async fn execute_replay(
    State(state): State<AppState>,
    Json(req): Json<ReplayRequest>,
) -> (StatusCode, Json<ReplayResponse>) {
    let result = state.service.replay(req).await;
    let status = match (result.success, result.error_kind.as_deref()) {
        (true, _) => StatusCode::OK,
        (false, Some(kinds::NOT_FOUND)) => StatusCode::NOT_FOUND,
        (false, Some(kinds::CONFLICT)) => StatusCode::CONFLICT,
        (false, _) => StatusCode::BAD_REQUEST,
    };
    (status, Json(result))
}

async fn cancel_replay(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CancelResponse>, ApiError> {
    if state.service.cancel(id) {
        Ok(Json(CancelResponse { cancelled: true }))
    } else {
        Err(ApiError::NotFound(format!(
            "No replay in progress for snapshot {}",
            id
        )))
    }
}

async fn validate_connection(State(state): State<AppState>) -> Json<ConnectionStatus> {
    Json(state.service.validate_connection().await)
}

// ===== Response Types =====

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Storage(anyhow::Error),
    NotFound(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Storage(err) => {
                tracing::error!("Storage error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ProductionExtractor;
    use crate::identity::IdentityRemapper;
    use crate::bus::{EventPublisher, OutboundMessage};
    use crate::replay::{ReplayEngine, ReplaySettings};
    use crate::snapshot::SnapshotStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct NullPublisher;

    #[async_trait::async_trait]
    impl EventPublisher for NullPublisher {
        async fn publish(&self, _message: &OutboundMessage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct NullRemapper;

    #[async_trait::async_trait]
    impl IdentityRemapper for NullRemapper {
        async fn resolve_external_id(&self, _fixture_id: &str) -> anyhow::Result<Option<String>> {
            Ok(Some("R-1".to_string()))
        }
    }

    fn router() -> Router {
        let store = SnapshotStore::in_memory().expect("Failed to create store");
        let engine = ReplayEngine::new(
            Arc::new(NullPublisher),
            Arc::new(NullRemapper),
            ReplaySettings::default(),
        );
        create_router(ReplayService::new(
            store,
            ProductionExtractor::unconfigured(),
            engine,
        ))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        serde_json::from_slice(&bytes).expect("Body is not JSON")
    }

    #[tokio::test]
    async fn test_health() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_unknown_snapshot_is_404() {
        let app = router();
        let response = app
            .clone()
            .oneshot(
                Request::get("/api/replay/snapshots/99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("99"));

        let response = app
            .oneshot(
                Request::delete("/api/replay/snapshots/99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fetch_without_event_log_is_400() {
        let response = router()
            .oneshot(
                Request::post("/api/replay/fetch")
                    .header("content-type", "application/json")
                    .header(OPERATOR_HEADER, "alice")
                    .body(Body::from(
                        r#"{"source_fixture_id":"G1","display_name":"Cats v Swans"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("not configured"));
    }

    #[tokio::test]
    async fn test_execute_unknown_snapshot_is_404() {
        let response = router()
            .oneshot(
                Request::post("/api/replay/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"snapshot_id":5,"environment":"uat","target_start":"2025-01-01T00:00:00Z"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error_kind"], "not_found");
    }

    #[tokio::test]
    async fn test_cancel_without_replay_is_404() {
        let response = router()
            .oneshot(
                Request::post("/api/replay/snapshots/1/cancel")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_validate_connection_reports_unconfigured() {
        let response = router()
            .oneshot(
                Request::get("/api/replay/validate-connection")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["configured"], false);
    }

    #[tokio::test]
    async fn test_list_is_empty_array() {
        let response = router()
            .oneshot(
                Request::get("/api/replay/snapshots")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!([]));
    }
}
