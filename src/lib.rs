//! Core library for SafeSurf Guard.  This module wires together the URL
//! normalizer, verdict cache, tab store and analysis pipeline, and exposes
//! them through a small HTTP bridge that an extension shim can drive.

pub mod analysis;
pub mod cache;
mod config;
pub mod events;
pub mod metrics;
pub mod normalize;
pub mod notify;
pub mod outcome;
pub mod pipeline;
pub mod tabs;
pub mod util;

pub use config::AppConfig;

use axum::extract::{
    rejection::{BytesRejection, FailedToBufferBody, JsonRejection},
    DefaultBodyLimit, Path, State,
};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::analysis::{AnalysisClient, HttpAnalysisClient};
use crate::cache::ResultCache;
use crate::events::{BrowserEvent, EventBindings, LastSeenUrls, PopupRequest};
use crate::metrics::Metrics;
use crate::notify::{Dispatcher, OutboxSink};
use crate::pipeline::Pipeline;
use crate::tabs::{TabId, TabStore};
use crate::util::{Clock, SystemClock};

pub use crate::normalize::{normalize, NormalizedUrl};
pub use crate::outcome::{AnalysisOutcome, RiskSet, Status};
pub use crate::pipeline::RunOutcome;
pub use crate::tabs::TabEvaluation;

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
}

/// Application state shared across handlers.  Everything mutable lives
/// behind `Arc` and is constructed once in [`build_state`].
#[derive(Clone)]
pub struct AppState {
    pub bindings: Arc<EventBindings>,
    pub outbox: Arc<OutboxSink>,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
    pub process_start_epoch: f64,
    pub process_start_instant: Instant,
}

impl AppState {
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        self.bindings.pipeline()
    }
}

/// Assemble the object graph from a parsed configuration.  The analysis
/// client and clock are injected so tests can substitute their own.
pub fn build_state(
    config: &AppConfig,
    client: Arc<dyn AnalysisClient>,
    clock: Arc<dyn Clock>,
) -> AppState {
    let metrics = Arc::new(Metrics::default());
    let cache = Arc::new(ResultCache::new(
        config.cache_ttl_ms,
        config.cache_capacity,
        clock.clone(),
    ));
    let store = Arc::new(TabStore::new());
    let outbox = Arc::new(OutboxSink::new(config.outbox_capacity));
    let dispatcher = Arc::new(Dispatcher::new(
        outbox.clone(),
        store.clone(),
        config.risk_statuses.clone(),
        clock.clone(),
        metrics.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(
        cache,
        store,
        client,
        dispatcher,
        clock,
        metrics,
    ));
    let bindings = Arc::new(EventBindings::new(
        pipeline,
        Arc::new(LastSeenUrls::new()),
        outbox.clone(),
    ));

    let start_time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();

    AppState {
        bindings,
        outbox,
        max_request_bytes: config.max_request_bytes,
        process_start_epoch: start_time.as_secs_f64(),
        process_start_instant: Instant::now(),
    }
}

/// Build state from environment variables.  See [`AppConfig::from_env`] for
/// the variables read.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    let client = HttpAnalysisClient::new(&config.analysis)?;
    tracing::info!(
        endpoint = %client.endpoint(),
        timeout_ms = config.analysis.timeout_ms,
        cache_ttl_ms = config.cache_ttl_ms,
        cache_capacity = config.cache_capacity,
        "analysis client configured"
    );
    Ok(build_state(&config, Arc::new(client), Arc::new(SystemClock)))
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route("/events", post(events_handler))
        .route("/messages", post(messages_handler))
        .route("/tabs/:tab_id/messages", get(tab_messages_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler));

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

fn respond_with_error(err: ErrorResponse) -> axum::response::Response {
    let status = StatusCode::from_u16(err.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err)).into_response()
}

/// Handler for `POST /events`.  The event is admitted before the response is
/// sent, so removals and tickets follow the order events were posted in.  The
/// lookup then runs detached, the way browser listeners fire and forget; the
/// caller only learns that the event was accepted.
async fn events_handler(
    State(state): State<AppState>,
    payload: Result<Json<BrowserEvent>, JsonRejection>,
) -> axum::response::Response {
    let event = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };
    let tab_id = event.tab_id();
    if let Some(pending) = state.bindings.admit(event).await {
        let pipeline = state.pipeline().clone();
        tokio::spawn(async move {
            pipeline.run(pending).await;
        });
    }
    tracing::trace!(tab_id, "event accepted");
    let body = serde_json::json!({ "accepted": true, "tabId": tab_id });
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

/// Handler for `POST /messages`.  Answers popup queries from the tab store;
/// the response body is the evaluation or `null`.
async fn messages_handler(
    State(state): State<AppState>,
    payload: Result<Json<PopupRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match payload {
        Ok(Json(inner)) => inner,
        Err(rejection) => return handle_json_rejection(&state, rejection),
    };
    let answer = state.bindings.answer(&request);
    (StatusCode::OK, Json(answer)).into_response()
}

/// Handler for `GET /tabs/{tabId}/messages`.  The content layer polls this to
/// receive pending WARNING/CLEAR messages.
async fn tab_messages_handler(
    State(state): State<AppState>,
    Path(tab_id): Path<TabId>,
) -> axum::response::Response {
    let messages = state.outbox.drain(tab_id);
    (StatusCode::OK, Json(messages)).into_response()
}

fn handle_json_rejection(state: &AppState, rejection: JsonRejection) -> axum::response::Response {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => {
            let message = match state.max_request_bytes {
                Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
                None => "Request too large".to_string(),
            };
            tracing::warn!(limit = ?state.max_request_bytes, "request body exceeded limit");
            respond_with_error(ErrorResponse {
                error_code: 4001,
                message,
                http_status: 413,
            })
        }
        JsonRejection::BytesRejection(bytes) => bytes.into_response(),
        other => {
            tracing::debug!(error = %other, "rejected malformed message");
            respond_with_error(ErrorResponse {
                error_code: 4000,
                message: other.body_text(),
                http_status: 400,
            })
        }
    }
}

/// Simple health endpoint for readiness / liveness checks.
async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let pipeline = state.pipeline();
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cacheEntries": pipeline.cache().len(),
        "trackedTabs": pipeline.store().len(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus-style metrics exposition.
async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    use std::fmt::Write as _;
    let mut buf = String::new();
    let pipeline = state.pipeline();
    pipeline.metrics().render(&mut buf);
    writeln!(
        &mut buf,
        "# HELP safesurf_cache_entries Live entries in the result cache\n# TYPE safesurf_cache_entries gauge"
    )
    .ok();
    writeln!(&mut buf, "safesurf_cache_entries {}", pipeline.cache().len()).ok();
    writeln!(
        &mut buf,
        "# HELP safesurf_tracked_tabs Tabs holding an evaluation\n# TYPE safesurf_tracked_tabs gauge"
    )
    .ok();
    writeln!(&mut buf, "safesurf_tracked_tabs {}", pipeline.store().len()).ok();
    writeln!(
        &mut buf,
        "# HELP safesurf_build_info Build information\n# TYPE safesurf_build_info gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "safesurf_build_info{{version=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION")
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP safesurf_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE safesurf_process_start_time_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "safesurf_process_start_time_seconds {}",
        state.process_start_epoch
    )
    .ok();
    writeln!(
        &mut buf,
        "# HELP safesurf_process_uptime_seconds Process uptime seconds\n# TYPE safesurf_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        &mut buf,
        "safesurf_process_uptime_seconds {}",
        state.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        buf,
    )
        .into_response()
}
