//! HTTP transport for MemoGarden, grounded on the teacher's Axum router
//! (`src/http.rs`) and the original implementation's Flask route table
//! (`original_source/api/main.py`'s `_register_routes`).
//!
//! # API Endpoints
//!
//! - `POST /mg` — run one verb through the audited dispatcher.
//! - `GET /mg/events` — subscribe to the event bus over SSE.
//! - `GET /mg/stats` — active subscription count and per-connection info.
//! - `GET /status` — consistency sweep / [`crate::transaction::SystemStatus`].
//! - `GET /health` — liveness probe.
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::audit;
use crate::core::MemoGarden;
use crate::dispatcher::Op;

/// The request body of `POST /mg`: a verb envelope plus its acting
/// operator and the audit bypass flag.
#[derive(Debug, Deserialize)]
struct WireRequest {
    actor: String,
    #[serde(default)]
    bypass_semantic_api: bool,
    #[serde(flatten)]
    op: Op,
}

async fn handle_verb(State(garden): State<Arc<MemoGarden>>, Json(request): Json<WireRequest>) -> impl IntoResponse {
    let envelope = audit::run(&garden, &request.actor, request.op, request.bypass_semantic_api);
    let status = if envelope.ok {
        axum::http::StatusCode::OK
    } else {
        match envelope.error.as_ref().map(|e| e.code) {
            Some("not_found") => axum::http::StatusCode::NOT_FOUND,
            Some("lock_conflict") => axum::http::StatusCode::CONFLICT,
            Some("validation_error") => axum::http::StatusCode::BAD_REQUEST,
            Some("permission_denied") => axum::http::StatusCode::FORBIDDEN,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    };
    (status, Json(envelope))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    client_id: String,
    actor: String,
    #[serde(default)]
    scopes: String,
}

async fn handle_events(
    State(garden): State<Arc<MemoGarden>>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let scopes: Vec<String> = params
        .scopes
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let (_id, receiver) = garden.events.subscribe(&params.client_id, &params.actor, scopes);
    let stream = ReceiverStream::new(receiver).map(|event| {
        Ok(SseEvent::default().event(event.event_type.clone()).data(
            serde_json::to_string(&event.data).unwrap_or_default(),
        ))
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(garden.config.context_event_keepalive_s)),
    )
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    active_connections: usize,
    connections: Vec<crate::events::ConnectionStats>,
}

async fn handle_stats(State(garden): State<Arc<MemoGarden>>) -> Json<StatsResponse> {
    let (active_connections, connections) = garden.events.stats();
    Json(StatsResponse { active_connections, connections })
}

#[derive(Debug, Serialize)]
struct DatabasePaths {
    fact: &'static str,
    entity: &'static str,
}

#[derive(Debug, Serialize)]
struct DatabasesStatus {
    fact: &'static str,
    entity: &'static str,
    paths: DatabasePaths,
}

#[derive(Debug, Serialize)]
struct ConsistencyStatus {
    status: crate::transaction::SystemStatus,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    databases: DatabasesStatus,
    consistency: ConsistencyStatus,
}

async fn handle_status(State(garden): State<Arc<MemoGarden>>) -> Json<StatusResponse> {
    let report = garden.status();
    let status = if report.status == crate::transaction::SystemStatus::Normal {
        "ok"
    } else {
        "error"
    };
    Json(StatusResponse {
        status,
        databases: DatabasesStatus {
            fact: "connected",
            entity: "connected",
            paths: DatabasePaths {
                fact: "in-memory",
                entity: "in-memory",
            },
        },
        consistency: ConsistencyStatus { status: report.status },
    })
}

async fn handle_health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

fn create_router(garden: Arc<MemoGarden>) -> Router {
    Router::new()
        .route("/mg", post(handle_verb))
        .route("/mg/events", get(handle_events))
        .route("/mg/stats", get(handle_stats))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .with_state(garden)
}

/// Bind and serve the MemoGarden HTTP transport until the process is killed.
pub async fn serve(garden: Arc<MemoGarden>) -> std::io::Result<()> {
    let addr: SocketAddr = garden
        .config
        .bind_address
        .parse()
        .expect("bind_address must be a valid socket address");
    let app = create_router(garden);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "http: listening");
    axum::serve(listener, app).await
}
