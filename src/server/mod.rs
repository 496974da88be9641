//! JSON query surface.

use std::future::Future;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::query::{QueryEngine, QueryError, QueryRequest};
use crate::storage::{Column, PublicationRecord};

#[derive(Clone)]
pub struct AppState {
    pub engine: QueryEngine,
    pub default_page_size: u32,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Validation(msg) => Self::BadRequest(msg),
            QueryError::Storage(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => {
                debug!(%message, "rejected request");
                (StatusCode::BAD_REQUEST, message)
            }
            Self::Internal(message) => {
                error!(%message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    search: Option<String>,
    /// Comma-separated category substrings.
    filter: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/items", get(search_items))
        .route("/api/categories", get(list_categories))
        .route("/api/primary-categories", get(list_primary_categories))
        .route("/api/predicted-categories", get(list_predicted_categories))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "query server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn search_items(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<PublicationRecord>>, ApiError> {
    let Query(params) = params?;
    let request = QueryRequest::new(
        params.search.unwrap_or_default(),
        params.page.unwrap_or(1),
        params.limit.unwrap_or(state.default_page_size),
    )
    .with_filter_list(params.filter.as_deref().unwrap_or(""));

    let page = state.engine.search(&request).await?;
    Ok(Json(page.records))
}

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.engine.categories().await?))
}

async fn list_primary_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.engine.distinct(Column::PrimaryCategory).await?))
}

async fn list_predicted_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.engine.distinct(Column::PredictedCategory).await?))
}
