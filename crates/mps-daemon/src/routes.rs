//! Axum router and all HTTP handlers for mps-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Scenario tests in `tests/` compose the bare router.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use mps_ingest::{WebhookReply, SIGNATURE_HEADER};
use mps_schemas::MarketplaceId;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        ErrorResponse, HealthResponse, RetryUnresolvedResponse, SyncCancelResponse,
        SyncRunQuery, SyncRunResponse,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/sync/run", post(sync_run))
        .route("/v1/sync/cancel", post(sync_cancel))
        .route("/v1/reconcile/retry-unresolved", post(retry_unresolved))
        .route("/v1/webhooks/:marketplace", post(webhook))
        .with_state(state)
}

fn error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> Response {
    match st.snapshot().await {
        Ok(snap) => {
            let _ = st.bus.send(BusMsg::Status(snap.clone()));
            (StatusCode::OK, Json(snap)).into_response()
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "status snapshot failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/sync/run
// ---------------------------------------------------------------------------

/// Start a sync pass. `409` while another pass runs. Without `wait=true`
/// the pass runs in the background and the call returns `202`.
pub(crate) async fn sync_run(
    State(st): State<Arc<AppState>>,
    Query(q): Query<SyncRunQuery>,
) -> Response {
    let only = match q.marketplace.as_deref() {
        None => None,
        Some(raw) => match MarketplaceId::parse(raw) {
            Ok(m) => Some(m),
            Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
        },
    };
    if let Some(m) = only {
        if st.orchestrator.registry().get(m).is_none() {
            return error(StatusCode::NOT_FOUND, format!("marketplace {m} is not enabled"));
        }
    }
    if st.orchestrator.is_running() {
        return error(StatusCode::CONFLICT, "a sync pass is already running");
    }

    info!(marketplace = ?only, wait = q.wait, "sync/run");
    st.log("INFO", match only {
        Some(m) => format!("sync pass requested for {m}"),
        None => "sync pass requested for all marketplaces".to_string(),
    });

    if q.wait {
        let reports = st.orchestrator.run_pass(only).await;
        return (
            StatusCode::OK,
            Json(SyncRunResponse {
                started: true,
                marketplace: only,
                reports,
            }),
        )
            .into_response();
    }

    let orchestrator = Arc::clone(&st.orchestrator);
    tokio::spawn(async move {
        orchestrator.run_pass(only).await;
    });
    (
        StatusCode::ACCEPTED,
        Json(SyncRunResponse {
            started: true,
            marketplace: only,
            reports: Vec::new(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/sync/cancel
// ---------------------------------------------------------------------------

pub(crate) async fn sync_cancel(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let cancelled = st.orchestrator.cancel();
    info!(cancelled, "sync/cancel");
    if cancelled {
        st.log("WARN", "sync pass cancel requested");
    }
    (StatusCode::OK, Json(SyncCancelResponse { cancelled }))
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile/retry-unresolved
// ---------------------------------------------------------------------------

pub(crate) async fn retry_unresolved(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let report = st.engine().retry_unresolved().await;
    let remaining = st.engine().unresolved_count();
    info!(applied = report.applied, still_parked = report.still_parked, failed = report.failed, "reconcile/retry-unresolved");
    (StatusCode::OK, Json(RetryUnresolvedResponse { report, remaining }))
}

// ---------------------------------------------------------------------------
// POST /v1/webhooks/:marketplace
// ---------------------------------------------------------------------------

pub(crate) async fn webhook(
    State(st): State<Arc<AppState>>,
    Path(marketplace): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let m = match MarketplaceId::parse(&marketplace) {
        Ok(m) => m,
        Err(e) => return error(StatusCode::NOT_FOUND, e.to_string()),
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let result = st.ingestor.handle(m, &body, signature, Utc::now()).await;
    if let Err(rejected) = &result {
        warn!(marketplace = %m, ?rejected, "webhook rejected");
    }
    let reply = WebhookReply::from_result(&result);
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply.body)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::LogLine { .. } => "log",
                    BusMsg::SyncResult(_) => "sync_result",
                    BusMsg::PassReport(_) => "pass_report",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
