use crate::collectors::{Category, ProducerError, ScanScope, SnapshotProducer};
use crate::metrics::Metrics;
use crate::report::html;
use crate::store::{ResultMeta, ResultStore, StoreError};
use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

const HOME_PAGE_RESULTS: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ResultStore>,
    pub producer: Arc<dyn SnapshotProducer>,
    pub metrics: Arc<Metrics>,
    pub port: u16,
    pub default_scan_name: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error("некорректный запрос: {0}")]
    InvalidRequest(String),
    #[error("внутренняя ошибка: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Store(err) => err.kind(),
            ApiError::Producer(ProducerError::UnknownCategory(_)) => "invalid_request",
            ApiError::Producer(_) => "producer_failure",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_request" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn id(&self) -> Option<&str> {
        match self {
            ApiError::Store(err) => err.id(),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            kind: self.kind(),
            message: self.to_string(),
            id: self.id(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScanRequest {
    #[serde(default, alias = "test_name")]
    name: Option<String>,
    #[serde(default)]
    scan_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScanResponse {
    status: &'static str,
    id: Uuid,
    storage_key: String,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    count: usize,
    results: Vec<ResultMeta>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/api/health", get(health))
        .route("/api/apis", get(list_apis))
        .route("/api/scan", post(trigger_scan))
        .route("/api/scan/:id", get(get_result))
        .route("/api/results", get(list_results))
        .route("/api/results/summary/:id", get(get_summary))
        .route("/api/results/:id", delete(delete_result))
        .route("/api/statistics", get(statistics))
        .route("/api/download/:id", get(download))
        .route("/results/:id", get(view_result))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

impl AppState {
    fn respond<T: IntoResponse>(&self, result: Result<T, ApiError>) -> Response {
        match result {
            Ok(value) => value.into_response(),
            Err(err) => {
                self.metrics.inc_api_error(err.kind());
                match err.status() {
                    StatusCode::INTERNAL_SERVER_ERROR => {
                        error!(kind = err.kind(), error = %err, "запрос завершился ошибкой")
                    }
                    _ => debug!(kind = err.kind(), error = %err, "запрос отклонён"),
                }
                err.into_response()
            }
        }
    }

    fn refresh_store_gauges(&self) {
        self.metrics.update_from_statistics(&self.store.statistics());
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| ApiError::Internal(format!("фоновая задача прервана: {err}")))?
}

async fn home(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    let result = run_blocking(move || Ok(store.list(Some(HOME_PAGE_RESULTS)))).await;
    let port = state.port;
    state.respond(result.map(|results| Html(html::render_home_page(port, &results))))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "port": state.port,
        "timestamp": Utc::now(),
    }))
}

async fn list_apis() -> impl IntoResponse {
    let apis: Map<String, Value> = Category::ALL
        .into_iter()
        .map(|c| (c.as_str().to_string(), Value::from(c.description())))
        .collect();
    Json(json!({
        "status": "success",
        "apis": apis,
    }))
}

async fn trigger_scan(State(state): State<AppState>, body: Bytes) -> Response {
    let result = scan_and_save(&state, &body).await;
    match &result {
        Ok(saved) => {
            state.metrics.record_scan(saved.created_at.timestamp());
            state.refresh_store_gauges();
        }
        Err(err) => state.metrics.inc_scan_failure(err.kind()),
    }
    state.respond(result.map(Json))
}

async fn scan_and_save(state: &AppState, body: &[u8]) -> Result<ScanResponse, ApiError> {
    let request = parse_scan_request(body)?;
    let scope = ScanScope::parse(request.scan_type.as_deref())?;
    let name = request
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| state.default_scan_name.clone());

    let store = state.store.clone();
    let producer = state.producer.clone();
    let record = run_blocking(move || {
        let snapshot = producer.produce(scope)?;
        Ok(store.save(snapshot, &name)?)
    })
    .await?;
    state.metrics.inc_store_op("save");

    Ok(ScanResponse {
        status: "success",
        id: record.id,
        storage_key: record.storage_key,
        name: record.name,
        created_at: record.created_at,
    })
}

fn parse_scan_request(body: &[u8]) -> Result<ScanRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ScanRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| ApiError::InvalidRequest(format!("тело запроса не разобрано: {err}")))
}

async fn get_result(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = run_blocking(move || Ok(store.load(&id)?)).await;
    state.metrics.inc_store_op("load");
    state.respond(result.map(Json))
}

async fn get_summary(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = run_blocking(move || Ok(store.summarize(&id)?)).await;
    state.metrics.inc_store_op("summarize");
    state.respond(result.map(Json))
}

async fn list_results(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Response {
    let result = async {
        let Query(params) = params.map_err(|err| {
            ApiError::InvalidRequest(format!("параметры запроса не разобраны: {}", err.body_text()))
        })?;
        let limit = parse_limit(params.limit.as_deref())?;
        let store = state.store.clone();
        let results = run_blocking(move || Ok(store.list(limit))).await?;
        Ok::<_, ApiError>(ListResponse {
            count: results.len(),
            results,
        })
    }
    .await;
    state.metrics.inc_store_op("list");
    state.respond(result.map(Json))
}

fn parse_limit(raw: Option<&str>) -> Result<Option<usize>, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<usize>().map(Some).map_err(|_| {
            ApiError::InvalidRequest(format!(
                "limit должен быть неотрицательным целым числом, получено '{s}'"
            ))
        }),
    }
}

async fn delete_result(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = run_blocking(move || Ok(store.delete(&id)?)).await;
    state.metrics.inc_store_op("delete");
    if matches!(result, Ok(true)) {
        state.refresh_store_gauges();
    }
    state.respond(result.map(|deleted| Json(json!({ "deleted": deleted }))))
}

async fn statistics(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    let result = run_blocking(move || Ok(store.statistics())).await;
    if let Ok(stats) = &result {
        state.metrics.update_from_statistics(stats);
    }
    state.metrics.inc_store_op("statistics");
    state.respond(result.map(Json))
}

async fn download(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let store = state.store.clone();
    let result = run_blocking(move || Ok(store.export(&id)?)).await;
    state.metrics.inc_store_op("export");
    state.respond(result.map(|(storage_key, bytes)| {
        let mut response = Response::new(Body::from(bytes));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // storage_key состоит только из [A-Za-z0-9_.-], поэтому заголовок всегда валиден.
        if let Ok(value) =
            HeaderValue::from_str(&format!("attachment; filename=\"{storage_key}\""))
        {
            headers.insert(CONTENT_DISPOSITION, value);
        }
        response
    }))
}

async fn view_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let wants_json = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let store = state.store.clone();
    let result = run_blocking(move || Ok(store.load(&id)?)).await;
    state.metrics.inc_store_op("load");

    if wants_json {
        return state.respond(result.map(Json));
    }
    match result {
        Ok(record) => Html(html::render_detail_page(&record)).into_response(),
        Err(err) => {
            state.metrics.inc_api_error(err.kind());
            let status = err.status();
            let title = match status {
                StatusCode::NOT_FOUND => "Result Not Found",
                StatusCode::BAD_REQUEST => "Bad Request",
                _ => "Result Unavailable",
            };
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                warn!(kind = err.kind(), error = %err, "страница результата недоступна");
            }
            (status, Html(html::render_error_page(title, &err.to_string()))).into_response()
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    state.metrics.inc_scrape_count();
    state.refresh_store_gauges();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}
