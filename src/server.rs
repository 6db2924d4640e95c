//! HTTP front end.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::analysis::load_result;
use crate::ingest::IngestionService;
use crate::store::{self, TransactionRecord, TransactionStore};
use crate::Error;

const DEFAULT_FETCH_LIMIT: usize = 10;
const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TransactionStore>,
    pub ingestion: Arc<IngestionService>,
    pub result_path: PathBuf,
}

/// Error body: `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Upstream(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: e.to_string(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(status = self.status.as_u16(), "request failed: {}", self.detail);
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    transaction_count: u64,
}

#[derive(Debug, Serialize)]
struct FetchResponse {
    success: bool,
    address: String,
    total_fetched: usize,
    processed: usize,
    message: String,
}

#[derive(Debug, Serialize)]
struct TransactionsResponse {
    success: bool,
    count: usize,
    transactions: Vec<TransactionRecord>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/fetch_eth/:address", get(fetch_eth))
        .route("/transactions", get(transactions))
        .route("/analysis", get(analysis))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> crate::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Crypto Transaction Analysis API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "fetch_eth": "/fetch_eth/{address}",
            "transactions": "/transactions",
            "analysis": "/analysis",
            "health": "/health",
        }
    }))
}

async fn health(State(state): State<AppState>) -> ApiResult<Health> {
    let transaction_count = store::blocking(&state.store, |s| s.count()).await?;
    Ok(Json(Health {
        status: "healthy",
        transaction_count,
    }))
}

async fn fetch_eth(
    State(state): State<AppState>,
    Path(address): Path<String>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<FetchResponse> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_FETCH_LIMIT);
    let report = state.ingestion.ingest(&address, limit).await?;
    Ok(Json(FetchResponse {
        success: true,
        message: format!(
            "processed {} of {} transactions",
            report.processed, report.total_fetched
        ),
        address: report.address,
        total_fetched: report.total_fetched,
        processed: report.processed,
    }))
}

async fn transactions(
    State(state): State<AppState>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<TransactionsResponse> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let records = store::blocking(&state.store, move |s| s.list_recent(limit)).await?;
    Ok(Json(TransactionsResponse {
        success: true,
        count: records.len(),
        transactions: records,
    }))
}

async fn analysis(State(state): State<AppState>) -> ApiResult<Value> {
    let body = match load_result(&state.result_path)? {
        Some(result) => json!({ "success": true, "result": result }),
        None => json!({
            "success": false,
            "message": "no analysis result yet; run `chainsight analyze` first",
        }),
    };
    Ok(Json(body))
}
