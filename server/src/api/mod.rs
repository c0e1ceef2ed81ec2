use axum::{
    extract::{Json as AxumJson, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use guarded_query_core::{AnomalyAlert, AnomalyScan};
use guarded_query_gateway::{AlertFilter, GatewayError, QueryGateway};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Common response type that can be either data or an error
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiResponse<T> {
    Success(T),
    Error { error: String },
}

/// Errors returned by the API
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown database, scan or alert
    #[error("{0}")]
    NotFound(String),

    /// Request could not be served
    #[error("{0}")]
    Internal(String),
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(what) => ApiError::NotFound(format!("Not found: {}", what)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(ApiResponse::<()>::Error { error: self.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Shared application state
pub struct AppState {
    /// Gateway serving every route
    pub gateway: Arc<QueryGateway>,
}

/// Create the service router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/api/v1/databases/:id/query", post(run_query))
        .route("/api/v1/databases/:id/scans", post(start_scan))
        .route("/api/v1/databases/:id/scans/latest", get(latest_scan))
        .route("/api/v1/databases/:id/alerts", get(list_alerts))
        .route("/api/v1/alerts/seen", post(mark_seen))
        .route("/api/v1/alerts/:alert_id/dismiss", post(dismiss_alert))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let gateway = state.gateway.status().await;
    Json(json!({
        "status": "operational",
        "service": "guarded-query",
        "gateway": gateway,
    }))
}

/// Request for running a guarded query
#[derive(Debug, Deserialize)]
struct QueryRequest {
    sql: String,
    #[serde(default)]
    params: Vec<Value>,
}

/// Validate and run a read query
///
/// Rejected and failed queries answer 422 with the full outcome so the caller
/// can see every validation error.
async fn run_query(
    State(state): State<Arc<AppState>>,
    Path(database_id): Path<String>,
    AxumJson(request): AxumJson<QueryRequest>,
) -> impl IntoResponse {
    let outcome = state
        .gateway
        .validate_and_execute(&database_id, &request.sql, &request.params)
        .await;

    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ScanParams {
    #[serde(default)]
    background: bool,
}

/// Response for a finished scan
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanResponse {
    scan_id: Uuid,
    scan: AnomalyScan,
    alerts: Vec<AnomalyAlert>,
}

async fn start_scan(
    State(state): State<Arc<AppState>>,
    Path(database_id): Path<String>,
    Query(params): Query<ScanParams>,
) -> ApiResult<Response> {
    if params.background {
        state.gateway.submit_scan(&database_id).await?;
        tracing::info!("Queued background scan for {}", database_id);
        return Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse::Success(json!({ "status": "queued", "databaseId": database_id }))),
        )
            .into_response());
    }

    let report = state.gateway.run_scan(&database_id).await?;
    let data = ScanResponse {
        scan_id: report.scan.id,
        scan: report.scan,
        alerts: report.alerts,
    };
    Ok((StatusCode::OK, Json(ApiResponse::Success(data))).into_response())
}

async fn latest_scan(
    State(state): State<Arc<AppState>>,
    Path(database_id): Path<String>,
) -> ApiResult<Json<AnomalyScan>> {
    state
        .gateway
        .get_latest_scan(&database_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No scans for database '{}'", database_id)))
}

#[derive(Debug, Deserialize)]
struct AlertParams {
    include_dismissed: Option<bool>,
    limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Path(database_id): Path<String>,
    Query(params): Query<AlertParams>,
) -> ApiResult<Json<Vec<AnomalyAlert>>> {
    let defaults = AlertFilter::default();
    let filter = AlertFilter {
        include_dismissed: params.include_dismissed.unwrap_or(defaults.include_dismissed),
        limit: params.limit.unwrap_or(defaults.limit),
    };
    Ok(Json(state.gateway.get_alerts(&database_id, filter).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkSeenRequest {
    alert_ids: Vec<Uuid>,
}

async fn mark_seen(
    State(state): State<Arc<AppState>>,
    AxumJson(request): AxumJson<MarkSeenRequest>,
) -> ApiResult<Json<Value>> {
    let updated = state.gateway.mark_seen(&request.alert_ids).await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn dismiss_alert(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.gateway.dismiss_alert(alert_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use guarded_query_core::{ColumnSchema, ConnectionDescriptor, SchemaSnapshot, StoredConnection, TableSchema};
    use guarded_query_gateway::anomaly::HeuristicEnhancer;
    use guarded_query_gateway::executor::{PoolFactory, QueryPool, QueryRows};
    use guarded_query_gateway::{CatalogEntry, Collaborators, GatewayConfig, SqliteStore, StaticCatalog};
    use std::time::Duration;
    use tower::ServiceExt;

    /// Every comparison reports 150 against 100
    struct SpikePool;

    #[async_trait]
    impl QueryPool for SpikePool {
        async fn run_select(
            &self,
            _sql: &str,
            _params: &[Value],
            _timeout: Duration,
        ) -> guarded_query_gateway::Result<QueryRows> {
            let row = |period: &str, total: f64| {
                json!({ "period": period, "total": total, "row_count": 3 })
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
            };
            Ok(QueryRows {
                columns: vec!["period".into(), "total".into(), "row_count".into()],
                rows: vec![row("current", 150.0), row("previous", 100.0)],
            })
        }
    }

    struct SpikeFactory;

    #[async_trait]
    impl PoolFactory for SpikeFactory {
        async fn create_pool(
            &self,
            _descriptor: ConnectionDescriptor,
        ) -> guarded_query_gateway::Result<Arc<dyn QueryPool>> {
            Ok(Arc::new(SpikePool))
        }
    }

    fn app() -> Router {
        let catalog = Arc::new(StaticCatalog::new());
        let mut entry = CatalogEntry::new(StoredConnection {
            host: "db.internal".to_string(),
            port: 5432,
            database: "shop".to_string(),
            username: "reader".to_string(),
            password_secret: "plain:pw".to_string(),
            tls: false,
            dialect: Default::default(),
        });
        entry.allowed_tables = ["orders".to_string()].into();
        entry.schema = Some(SchemaSnapshot {
            tables: vec![TableSchema {
                name: "orders".to_string(),
                columns: vec![
                    ColumnSchema::new("amount", "numeric", false),
                    ColumnSchema::new("created_at", "timestamptz", false),
                ],
                row_count_estimate: Some(100),
            }],
        });
        catalog.insert("shop", entry);

        let gateway = QueryGateway::new(
            GatewayConfig::for_testing(),
            Collaborators::from_catalog(catalog),
            Arc::new(SpikeFactory),
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(HeuristicEnhancer),
        );
        create_router(Arc::new(AppState {
            gateway: Arc::new(gateway),
        }))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let app = app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(&app, "GET", "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gateway"]["open_pools"], 0);
    }

    #[tokio::test]
    async fn test_query_endpoint() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/databases/shop/query",
            Some(json!({ "sql": "SELECT amount FROM orders" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["validation"]["valid"], true);
        assert_eq!(body["result"]["rowCount"], 2);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/databases/shop/query",
            Some(json!({ "sql": "DELETE FROM orders" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["validation"]["valid"], false);
        assert!(body["result"].is_null());
    }

    #[tokio::test]
    async fn test_scan_and_alert_routes() {
        let app = app();
        let (status, _) = send(&app, "GET", "/api/v1/databases/shop/scans/latest", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "POST", "/api/v1/databases/shop/scans", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scan"]["status"], "completed");
        let alerts = body["alerts"].as_array().unwrap();
        assert_eq!(alerts.len(), 2);
        let alert_id = alerts[0]["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "GET", "/api/v1/databases/shop/scans/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alerts_found"], 2);

        let (_, body) = send(
            &app,
            "POST",
            "/api/v1/alerts/seen",
            Some(json!({ "alertIds": [alert_id] })),
        )
        .await;
        assert_eq!(body["updated"], 1);

        let (status, _) = send(&app, "POST", &format!("/api/v1/alerts/{}/dismiss", alert_id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app, "GET", "/api/v1/databases/shop/alerts", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        let (_, body) = send(
            &app,
            "GET",
            "/api/v1/databases/shop/alerts?include_dismissed=true&limit=10",
            None,
        )
        .await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/alerts/{}/dismiss", Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("alert"));
    }

    #[tokio::test]
    async fn test_background_scan_is_accepted() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/v1/databases/shop/scans?background=true", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
    }
}
