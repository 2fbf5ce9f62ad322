//! HTTP surface under `/unified-search`.
//!
//! Handlers share one [`AppContext`]. Store and history calls are synchronous
//! SQLite work, so they run on the blocking pool.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use unified_search::{SearchMode, SearchResults};

use crate::context::AppContext;
use crate::error::{IntelError, Result};
use crate::storage::OperationId;

type AppState = Arc<AppContext>;
type JsonReply = (StatusCode, Json<Value>);

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    /// Caller context; logged, not used for ranking.
    #[serde(default)]
    user_context: Option<Value>,
    #[serde(default)]
    include_local_only: bool,
    #[serde(default)]
    include_mcp_only: bool,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    #[serde(flatten)]
    results: SearchResults,
    total_results: usize,
}

#[derive(Debug, Deserialize)]
struct CreateVersionRequest {
    content: Value,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    content_id: Option<String>,
    #[serde(default = "default_user")]
    user: String,
}

#[derive(Debug, Deserialize)]
struct RollbackRequest {
    version_id: String,
    #[serde(default = "default_user")]
    user: String,
}

#[derive(Debug, Deserialize)]
struct CompareQuery {
    a: String,
    b: String,
}

fn default_user() -> String {
    "api".to_owned()
}

/// Build the router. Exposed separately from [`serve`] so tests can mount it
/// on their own listener.
pub fn router(ctx: AppState) -> Router {
    Router::new()
        .route("/unified-search/search", post(search))
        .route("/unified-search/search/local-only", post(search_local_only))
        .route("/unified-search/search/mcp-only", post(search_mcp_only))
        .route("/unified-search/health", get(health))
        .route("/unified-search/refresh-tools", post(refresh_tools))
        .route("/unified-search/cache/status", get(cache_status))
        .route("/unified-search/cache/clear", delete(cache_clear))
        .route("/unified-search/storage/metrics", get(storage_metrics))
        .route("/unified-search/storage/operations/{id}", get(operation_status))
        .route("/unified-search/versions", post(create_version))
        .route("/unified-search/versions/compare", get(compare_versions))
        .route("/unified-search/versions/{content_id}", get(version_history))
        .route("/unified-search/versions/{content_id}/rollback", post(rollback))
        .route("/unified-search/report/{entity}", get(report))
        .with_state(ctx)
}

/// Serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns an I/O error if the listener fails.
pub async fn serve(
    listener: TcpListener,
    ctx: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!("unified search listening on http://{local_addr}");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn error_reply(err: &IntelError) -> JsonReply {
    let status = match err {
        IntelError::NotFound(_) => StatusCode::NOT_FOUND,
        IntelError::Validation(_) | IntelError::Search(unified_search::SearchError::Validation(_)) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::warn!(error = %err, "request failed");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

fn json_reply<T: Serialize>(status: StatusCode, value: &T) -> JsonReply {
    match serde_json::to_value(value) {
        Ok(v) => (status, Json(v)),
        Err(e) => error_reply(&IntelError::from(e)),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IntelError::Storage(format!("blocking task failed: {e}")))?
}

async fn run_search(ctx: &AppContext, body: SearchRequest, mode: SearchMode) -> JsonReply {
    tracing::trace!(user_context = ?body.user_context, ?mode, "search request");
    let query = body.query.as_str();
    // Cancelled if the client goes away and the handler future is dropped.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let results = ctx.orchestrator().process_query(query, mode, &cancel).await;
    let status = if results.error.is_some() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    let total_results = results.len();
    json_reply(
        status,
        &SearchResponse {
            results,
            total_results,
        },
    )
}

async fn search(State(ctx): State<AppState>, Json(body): Json<SearchRequest>) -> impl IntoResponse {
    let mode = match SearchMode::from_flags(body.include_local_only, body.include_mcp_only) {
        Ok(mode) => mode,
        Err(e) => return error_reply(&IntelError::from(e)),
    };
    run_search(&ctx, body, mode).await
}

async fn search_local_only(
    State(ctx): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> impl IntoResponse {
    run_search(&ctx, body, SearchMode::LocalOnly).await
}

async fn search_mcp_only(
    State(ctx): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> impl IntoResponse {
    run_search(&ctx, body, SearchMode::RemoteOnly).await
}

async fn health(State(ctx): State<AppState>) -> impl IntoResponse {
    json_reply(StatusCode::OK, &ctx.orchestrator().registry().health_report())
}

async fn refresh_tools(State(ctx): State<AppState>) -> impl IntoResponse {
    let registry = ctx.orchestrator().registry();
    registry.refresh().await;
    let tools = registry.discover_tools().await;
    (
        StatusCode::OK,
        Json(json!({ "refreshed": true, "tools": tools.len() })),
    )
}

async fn cache_status(State(ctx): State<AppState>) -> impl IntoResponse {
    json_reply(StatusCode::OK, &ctx.orchestrator().cache().status().await)
}

async fn cache_clear(State(ctx): State<AppState>) -> impl IntoResponse {
    ctx.orchestrator().cache().clear().await;
    (StatusCode::OK, Json(json!({ "cleared": true })))
}

async fn storage_metrics(State(ctx): State<AppState>) -> impl IntoResponse {
    json_reply(StatusCode::OK, &ctx.storage().metrics())
}

async fn operation_status(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match ctx.storage().operation_status(&OperationId(id.clone())) {
        Some(status) => json_reply(StatusCode::OK, &status),
        None => error_reply(&IntelError::NotFound(format!("operation {id}"))),
    }
}

async fn create_version(
    State(ctx): State<AppState>,
    Json(body): Json<CreateVersionRequest>,
) -> impl IntoResponse {
    let versions = Arc::clone(ctx.versions());
    let outcome = blocking(move || {
        versions.create_version(body.content, body.metadata, body.content_id.as_deref(), &body.user)
    })
    .await;
    match outcome {
        Ok(outcome) if outcome.is_created() => json_reply(StatusCode::CREATED, &outcome),
        Ok(outcome) => json_reply(StatusCode::OK, &outcome),
        Err(e) => error_reply(&e),
    }
}

async fn version_history(
    State(ctx): State<AppState>,
    Path(content_id): Path<String>,
) -> impl IntoResponse {
    let versions = Arc::clone(ctx.versions());
    let found = blocking(move || {
        let history = versions.version_history(&content_id)?;
        if history.is_empty() {
            return Err(IntelError::NotFound(format!("content {content_id}")));
        }
        let statistics = versions.statistics(&content_id)?;
        Ok(json!({ "versions": history, "statistics": statistics }))
    })
    .await;
    match found {
        Ok(body) => (StatusCode::OK, Json(body)),
        Err(e) => error_reply(&e),
    }
}

async fn rollback(
    State(ctx): State<AppState>,
    Path(content_id): Path<String>,
    Json(body): Json<RollbackRequest>,
) -> impl IntoResponse {
    let versions = Arc::clone(ctx.versions());
    match blocking(move || versions.rollback_to_version(&content_id, &body.version_id, &body.user))
        .await
    {
        Ok(version) => json_reply(StatusCode::CREATED, &version),
        Err(e) => error_reply(&e),
    }
}

async fn compare_versions(
    State(ctx): State<AppState>,
    Query(q): Query<CompareQuery>,
) -> impl IntoResponse {
    let versions = Arc::clone(ctx.versions());
    match blocking(move || versions.compare_versions(&q.a, &q.b)).await {
        Ok(cmp) => json_reply(StatusCode::OK, &cmp),
        Err(e) => error_reply(&e),
    }
}

async fn report(State(ctx): State<AppState>, Path(entity): Path<String>) -> impl IntoResponse {
    let builder = Arc::clone(ctx.builder());
    match blocking(move || builder.build_report(&entity)).await {
        Ok(report) => json_reply(StatusCode::OK, &report),
        Err(e) => error_reply(&e),
    }
}
