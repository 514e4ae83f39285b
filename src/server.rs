//! HTTP server for streaming keyword suggestions.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search/stream` | Stream suggestions as server-sent events |
//! | `POST` | `/search` | Run one request and return every suggestion as JSON |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Caller identity
//!
//! Authentication happens upstream. The resolved caller id arrives in the
//! `x-caller-id` header and scopes every project lookup.
//!
//! # Error Contract
//!
//! Errors raised before the stream starts, including malformed request
//! bodies, use a JSON envelope:
//!
//! ```json
//! { "error": { "code": "rate_limited", "message": "too many requests", "retry_after": 42 } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `rate_limited` (429).
//! On `/search/stream`, failures after that point arrive as an `error` event.
//! `/search` also answers `not_found` (404) and `upstream_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use brainstormer_core::event::StreamEvent;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::llm::create_model;
use crate::orchestrator::{
    CollectError, Orchestrator, Rejection, SuggestRequest, SuggestionBatch,
};
use crate::projects::SqliteProjectStore;
use crate::rate_limit::RateLimiter;
use crate::session::{spawn_sweeper, SessionStore};

/// Header carrying the authenticated caller's id.
pub const CALLER_HEADER: &str = "x-caller-id";

/// Events buffered between the orchestrator and a slow client.
const EVENT_BUFFER: usize = 64;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            orchestrator,
            limiter,
        }
    }
}

/// Build the router; used by [`run_server`] and by tests that bind their own listener.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search/stream", post(handle_search_stream))
        .route("/search", post(handle_search))
        .route("/search/", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, opens the project database, selects the
/// configured model provider, and starts the background session sweeper.
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let projects = SqliteProjectStore::connect(config).await?;
    let model = create_model(&config.llm)?;
    let sessions = Arc::new(SessionStore::from_config(&config.sessions));
    let sweeper = spawn_sweeper(
        sessions.clone(),
        std::time::Duration::from_secs(config.sessions.sweep_interval_secs),
    );

    let orchestrator =
        Orchestrator::new(Arc::new(projects), model.clone(), sessions).with_config(config);
    let state = AppState::new(
        Arc::new(orchestrator),
        Arc::new(RateLimiter::new(config.rate_limit.search_per_minute)),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        model = model.model_name(),
        "suggestion server listening"
    );

    let served = axum::serve(listener, router(state)).await;
    sweeper.abort();
    served?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    retry_after: Option<u64>,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<CollectError> for AppError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::Rejected(Rejection::ProjectNotFound, message) => not_found(message),
            CollectError::Rejected(Rejection::InvalidRequest, message) => bad_request(message),
            CollectError::Upstream(message) => upstream_error(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                retry_after: self.retry_after,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        retry_after: None,
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
        retry_after: None,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
        retry_after: None,
    }
}

fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
        message: message.into(),
        retry_after: None,
    }
}

fn rate_limited(retry_after_secs: u64) -> AppError {
    AppError {
        status: StatusCode::TOO_MANY_REQUESTS,
        code: "rate_limited".to_string(),
        message: "too many requests".to_string(),
        retry_after: Some(retry_after_secs),
    }
}

// ============ Caller identity ============

/// The authenticated caller, taken from the [`CALLER_HEADER`] header.
#[derive(Debug, Clone)]
pub struct CallerId(pub String);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| unauthorized(format!("missing {} header", CALLER_HEADER)))?;
        Ok(CallerId(value.to_string()))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search/stream ============

/// Blank-field and quota checks shared by both search routes.
fn admit(
    state: &AppState,
    caller: &str,
    payload: Result<Json<SuggestRequest>, JsonRejection>,
) -> Result<SuggestRequest, AppError> {
    let Json(request) = payload?;
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if request.project_id.trim().is_empty() {
        return Err(bad_request("project_id must not be empty"));
    }

    state
        .limiter
        .check(caller)
        .map_err(|wait| rate_limited(wait.as_secs().max(1)))?;
    Ok(request)
}

/// Handler for `POST /search/stream`.
///
/// Spawns the orchestrator and forwards its events as SSE frames. When the
/// client disconnects, the response stream is dropped, which cancels the
/// orchestrator and with it the upstream model request.
async fn handle_search_stream(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    payload: Result<Json<SuggestRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let request = admit(&state, &caller, payload)?;

    let (tx, rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.run(&caller, request, tx, cancel).await;
    });

    let events = ReceiverStream::new(rx).map(move |event| {
        // Dropping the response drops the guard, which cancels the run.
        let _guard = &guard;
        Ok::<_, Infallible>(Event::default().data(event.to_json()))
    });

    Ok(Sse::new(events))
}

// ============ POST /search ============

/// Handler for `POST /search`.
///
/// Same request body and session rules as the stream; the reply waits for
/// the whole run. Every suggestion carries a score of 1.0.
async fn handle_search(
    State(state): State<AppState>,
    CallerId(caller): CallerId,
    payload: Result<Json<SuggestRequest>, JsonRejection>,
) -> Result<Json<SuggestionBatch>, AppError> {
    let request = admit(&state, &caller, payload)?;
    let batch = state.orchestrator.collect(&caller, request).await?;
    Ok(Json(batch))
}
