// 🌐 HTTP API - Axum router over the orchestrator
// Ingestion answers 202 immediately and finishes the pipeline on a blocking
// worker. Everything else is a read over the audit store or the registry.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Environment;
use crate::error::EdiError;
use crate::pipeline::{IngestRequest, Orchestrator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub environment: Environment,
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResponse {
    pub correlation_id: String,
    pub message: String,
    pub accepted_at: DateTime<Utc>,
    pub audit_trail_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DevStats {
    total_records: usize,
    by_status: BTreeMap<String, usize>,
}

/// Domain error rendered as `{ "error": kind, "message": text }`
pub struct ApiError(EdiError);

impl From<EdiError> for ApiError {
    fn from(err: EdiError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EdiError::ProfileNotFound { .. } | EdiError::UnknownCorrelation(_) => StatusCode::NOT_FOUND,
            EdiError::MissingRequiredField(_) | EdiError::MissingErrorDetail(_) => StatusCode::BAD_REQUEST,
            EdiError::InvalidTransition { .. } | EdiError::DuplicateCorrelation(_) => StatusCode::CONFLICT,
            EdiError::MalformedSegment { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EdiError::PurgeDisabled(_) => StatusCode::FORBIDDEN,
            EdiError::Transmission { .. } => StatusCode::BAD_GATEWAY,
            EdiError::Storage(_) | EdiError::Io(_) | EdiError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({ "error": self.0.kind(), "message": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Relative URL of a document's audit trail
pub fn audit_trail_url(correlation_id: &str) -> String {
    format!("/api/v1/edi/audit/{}", urlencoding::encode(correlation_id))
}

/// File name recorded for uploads that do not carry one
pub const UPLOAD_FILE_NAME: &str = "upload.edi";

// ============================================================================
// HANDLERS
// ============================================================================

/// Store and record the file on a blocking worker, answer 202, finish the pipeline in the background
async fn submit(
    state: AppState,
    request: IngestRequest,
) -> ApiResult<(StatusCode, Json<ProcessingResponse>)> {
    let orchestrator = state.orchestrator.clone();
    let accepted = tokio::task::spawn_blocking(move || orchestrator.accept(request))
        .await
        .map_err(|e| EdiError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))??;

    let response = ProcessingResponse {
        correlation_id: accepted.correlation_id.clone(),
        message: accepted.message.clone(),
        accepted_at: accepted.accepted_at,
        audit_trail_url: audit_trail_url(&accepted.correlation_id),
    };

    let orchestrator = state.orchestrator.clone();
    tokio::task::spawn_blocking(move || match orchestrator.process(&accepted) {
        Ok(outcome) => info!(
            correlation_id = %outcome.correlation_id(),
            status = %outcome.status(),
            "background processing finished"
        ),
        Err(e) => error!(
            correlation_id = %accepted.correlation_id,
            error = %e,
            "background processing aborted"
        ),
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /api/v1/edi/ingest
async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<ProcessingResponse>)> {
    submit(state, request).await
}

/// POST /api/v1/edi/ingest/upload - multipart `file` + `retailerId`, for gateway scripts
async fn ingest_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ProcessingResponse>), Response> {
    let mut retailer_id = String::new();
    let mut edi_content = String::new();
    let mut file_name = None;

    while let Some(field) = multipart.next_field().await.map_err(IntoResponse::into_response)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().filter(|n| !n.is_empty()).map(str::to_string);
                edi_content = field.text().await.map_err(IntoResponse::into_response)?;
            }
            "retailerId" => {
                retailer_id = field.text().await.map_err(IntoResponse::into_response)?;
            }
            _ => {}
        }
    }

    info!(
        retailer = %retailer_id,
        file = file_name.as_deref().unwrap_or(UPLOAD_FILE_NAME),
        bytes = edi_content.len(),
        "EDI file upload"
    );

    let request = IngestRequest {
        retailer_id,
        edi_content,
        file_name: Some(file_name.unwrap_or_else(|| UPLOAD_FILE_NAME.to_string())),
    };
    submit(state, request).await.map_err(IntoResponse::into_response)
}

/// GET /api/v1/edi/audit/:correlation_id
async fn audit_trail(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let history = state.orchestrator.tracker().history(&correlation_id)?;
    if history.is_empty() {
        return Err(EdiError::UnknownCorrelation(correlation_id).into());
    }
    Ok(Json(history))
}

/// GET /api/v1/edi/audit
async fn audit_groups(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.tracker().groups()?))
}

/// GET /api/v1/edi/status/summary
async fn status_summary(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.tracker().summary()?))
}

/// GET /api/v1/edi/dead-letters
async fn dead_letters(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.tracker().dead_letters()?))
}

/// GET /api/v1/mappings
async fn all_mappings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.registry().all().clone())
}

/// GET /api/v1/mappings/:retailer_id/:transaction_set_code
async fn one_mapping(
    State(state): State<AppState>,
    Path((retailer_id, code)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let profile = state
        .orchestrator
        .registry()
        .require(&retailer_id, &code)?;
    Ok(Json(profile.clone()))
}

/// GET /dev/audit-log
async fn dev_audit_log(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.tracker().all_logs()?))
}

/// GET /dev/audit-log/:correlation_id - raw rows, empty list when unknown
async fn dev_audit_log_for(
    State(state): State<AppState>,
    Path(correlation_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.tracker().history(&correlation_id)?))
}

/// DELETE /dev/audit-log
async fn dev_purge(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let deleted = state.orchestrator.tracker().purge(state.environment)?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /dev/stats - raw row counts, not latest-status counts
async fn dev_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let logs = state.orchestrator.tracker().all_logs()?;
    let mut by_status = BTreeMap::new();
    for log in &logs {
        *by_status.entry(log.status.as_str().to_string()).or_insert(0) += 1;
    }
    Ok(Json(DevStats {
        total_records: logs.len(),
        by_status,
    }))
}

/// GET /api/health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.tracker().is_healthy() {
        (StatusCode::OK, Json(json!({ "status": "UP" })))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "DOWN" })))
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn router(state: AppState) -> Router {
    let edi_routes = Router::new()
        .route("/ingest", post(ingest))
        .route("/ingest/upload", post(ingest_upload))
        .route("/audit", get(audit_groups))
        .route("/audit/:correlation_id", get(audit_trail))
        .route("/status/summary", get(status_summary))
        .route("/dead-letters", get(dead_letters));

    let mapping_routes = Router::new()
        .route("/", get(all_mappings))
        .route("/:retailer_id/:transaction_set_code", get(one_mapping));

    let dev_routes = Router::new()
        .route("/audit-log", get(dev_audit_log).delete(dev_purge))
        .route("/audit-log/:correlation_id", get(dev_audit_log_for))
        .route("/stats", get(dev_stats));

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/v1/edi", edi_routes)
        .nest("/api/v1/mappings", mapping_routes)
        .nest("/dev", dev_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::EdiStatus;
    use crate::mapping::{MappingProfile, MappingRegistry, MappingRule};
    use crate::storage::LocalFileStore;
    use crate::tracker::LifecycleTracker;
    use crate::transmit::LocalDraftOrderSink;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const SAMPLE_850: &str = "ISA*00*          *00*          *ZZ*TARGET         *ZZ*VENDORABC      *260219*1200*^*00501*000000042*0*P*>~GS*PO*TGTBUY*VENDORABC*20260219*1200*42*X*005010~ST*850*0001~BEG*00*SA*TGT-2026-00042**20260219~N1*ST*Target Store #1742*92*1742~PO1*1*120*EA*24.99**UI*089541234567~CTT*1~SE*6*0001~GE*1*42~IEA*1*000000042~";

    fn state(dir: &TempDir, environment: Environment) -> AppState {
        let profile = MappingProfile {
            retailer_id: "TARGET".to_string(),
            transaction_set_code: "850".to_string(),
            description: "Target purchase order".to_string(),
            version: "1".to_string(),
            element_delimiter: '*',
            line_loop_segment: None,
            header_mappings: vec![
                MappingRule::new("BEG", 3, "poNumber").required(),
                MappingRule::new("BEG", 2, "purchaseOrderType").required(),
                MappingRule::new("BEG", 5, "poDate").required(),
                MappingRule::new("N1", 2, "shipToName").with_qualifier("01:ST"),
            ],
            line_mappings: vec![
                MappingRule::new("PO1", 7, "sku").required().line_level(),
                MappingRule::new("PO1", 2, "quantityOrdered").line_level(),
                MappingRule::new("PO1", 3, "unitOfMeasure").line_level(),
                MappingRule::new("PO1", 4, "unitPrice").line_level(),
            ],
        };
        AppState {
            orchestrator: Orchestrator::new(
                LifecycleTracker::in_memory().unwrap(),
                Arc::new(MappingRegistry::from_profiles(vec![profile])),
                Arc::new(LocalFileStore::new(dir.path())),
                Arc::new(LocalDraftOrderSink::new()),
            ),
            environment,
        }
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
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
    async fn test_ingest_accepts_and_processes_in_background() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Environment::Test);
        let app = router(state.clone());

        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/v1/edi/ingest",
            Some(json!({ "retailerId": "target", "ediContent": SAMPLE_850, "fileName": "po.edi" })),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["correlationId"].as_str().unwrap().to_string();
        assert_eq!(body["auditTrailUrl"], format!("/api/v1/edi/audit/{}", id));
        assert!(body["acceptedAt"].is_string());

        let tracker = state.orchestrator.tracker().clone();
        let mut done = false;
        for _ in 0..100 {
            if tracker.current_status(&id).unwrap().map_or(false, |s| s.is_terminal()) {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(done, "pipeline did not finish");
        assert_eq!(tracker.current_status(&id).unwrap(), Some(EdiStatus::Acknowledged));

        let (status, trail) = send(app.clone(), "GET", &format!("/api/v1/edi/audit/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let statuses: Vec<&str> = trail
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["RECEIVED", "PARSED", "VALIDATED", "TRANSMITTED", "ACKNOWLEDGED"]);

        let (_, summary) = send(app, "GET", "/api/v1/edi/status/summary", None).await;
        assert_eq!(summary["acknowledged"], 1);
        assert_eq!(summary["received"], 0);
        println!("✅ Ingest over HTTP PASSED");
    }

    #[tokio::test]
    async fn test_ingest_rejects_blank_fields() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir, Environment::Test));

        let (status, body) = send(
            app,
            "POST",
            "/api/v1/edi/ingest",
            Some(json!({ "retailerId": " ", "ediContent": SAMPLE_850 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "MissingRequiredField");
    }

    #[tokio::test]
    async fn test_unknown_audit_trail_is_404() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir, Environment::Test));

        let (status, body) = send(app, "GET", "/api/v1/edi/audit/does-not-exist", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "UnknownCorrelation");
    }

    #[tokio::test]
    async fn test_mapping_lookup() {
        let dir = TempDir::new().unwrap();
        let app = router(state(&dir, Environment::Test));

        let (status, all) = send(app.clone(), "GET", "/api/v1/mappings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(all.get("TARGET:850").is_some());

        let (status, one) = send(app.clone(), "GET", "/api/v1/mappings/target/850", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(one["retailerId"], "TARGET");
        assert_eq!(one["headerMappings"][0]["targetField"], "poNumber");

        let (status, _) = send(app, "GET", "/api/v1/mappings/target/810", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_purge_guarded_by_environment() {
        let dir = TempDir::new().unwrap();
        let prod = state(&dir, Environment::Production);
        prod.orchestrator.tracker().mint("TARGET", None, "received").unwrap();

        let (status, body) = send(router(prod.clone()), "DELETE", "/dev/audit-log", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "PurgeDisabled");
        assert_eq!(prod.orchestrator.tracker().all_logs().unwrap().len(), 1);

        let local = AppState {
            environment: Environment::Local,
            ..prod
        };
        let (status, body) = send(router(local.clone()), "DELETE", "/dev/audit-log", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 1);
    }

    #[tokio::test]
    async fn test_dev_stats_count_rows() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Environment::Test);
        state.orchestrator.ingest(IngestRequest {
            retailer_id: "walmart".to_string(),
            edi_content: SAMPLE_850.to_string(),
            file_name: None,
        })
        .unwrap();

        let (status, stats) = send(router(state), "GET", "/dev/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["totalRecords"], 2);
        assert_eq!(stats["byStatus"]["RECEIVED"], 1);
        assert_eq!(stats["byStatus"]["FAILED"], 1);
    }

    async fn wait_until_terminal(state: &AppState, id: &str) -> EdiStatus {
        let tracker = state.orchestrator.tracker();
        for _ in 0..100 {
            if let Some(status) = tracker.current_status(id).unwrap().filter(|s| s.is_terminal()) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("pipeline did not finish for {}", id);
    }

    fn multipart_request(boundary: &str, parts: &[(&str, Option<&str>, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, file_name, value) in parts {
            body.push_str(&format!("--{}\r\n", boundary));
            match file_name {
                Some(f) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, f
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    name
                )),
            }
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", boundary));

        Request::builder()
            .method("POST")
            .uri("/api/v1/edi/ingest/upload")
            .header("content-type", format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap()
    }

    async fn read_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_upload_runs_the_pipeline() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Environment::Test);
        let request = multipart_request(
            "edi-boundary",
            &[("retailerId", None, "target"), ("file", Some("po-42.edi"), SAMPLE_850)],
        );

        let (status, body) = read_json(router(state.clone()).oneshot(request).await.unwrap()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["message"].as_str().unwrap().contains("po-42.edi"));

        let id = body["correlationId"].as_str().unwrap();
        assert_eq!(wait_until_terminal(&state, id).await, EdiStatus::Acknowledged);
        let history = state.orchestrator.tracker().history(id).unwrap();
        assert_eq!(history[0].retailer_id, "TARGET");
        println!("✅ Multipart upload PASSED");
    }

    #[tokio::test]
    async fn test_upload_without_file_name_or_retailer() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Environment::Test);

        let unnamed = multipart_request(
            "b1",
            &[("retailerId", None, "TARGET"), ("file", Some(""), SAMPLE_850)],
        );
        let (status, body) = read_json(router(state.clone()).oneshot(unnamed).await.unwrap()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["message"].as_str().unwrap().contains(UPLOAD_FILE_NAME));

        let no_retailer = multipart_request("b2", &[("file", Some("po.edi"), SAMPLE_850)]);
        let (status, body) = read_json(router(state).oneshot(no_retailer).await.unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "MissingRequiredField");
    }

    #[tokio::test]
    async fn test_dev_audit_log_by_correlation_id() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Environment::Test);
        let received = state.orchestrator.tracker().mint("TARGET", None, "received").unwrap();
        state.orchestrator.tracker().mint("TARGET", None, "other").unwrap();

        let app = router(state);
        let (status, rows) = send(
            app.clone(),
            "GET",
            &format!("/dev/audit-log/{}", received.correlation_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["correlationId"], received.correlation_id.as_str());

        let (status, rows) = send(app, "GET", "/dev/audit-log/unknown", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(rows.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_ids_are_decoded_once() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir, Environment::Test);
        state
            .orchestrator
            .tracker()
            .open("batch%41", "TARGET", None, "received", None)
            .unwrap();

        // %25 is a literal '%'; decoding twice would look up "batchA"
        let url = audit_trail_url("batch%41");
        assert_eq!(url, "/api/v1/edi/audit/batch%2541");
        let (status, trail) = send(router(state), "GET", &url, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(trail[0]["correlationId"], "batch%41");
    }

    #[tokio::test]
    async fn test_health_reports_up() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(router(state(&dir, Environment::Test)), "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "UP");
    }
}
