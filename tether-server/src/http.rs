//! Tether HTTP REST API
//!
//! Axum server exposing the session and messaging operations over HTTP,
//! alongside the Unix socket IPC server. Every endpoint has a thin axum
//! handler delegating to an `*_inner` function that builds the IPC request,
//! runs it through the shared router and maps the response to HTTP.
//!
//! Endpoints:
//! - GET  /health             — liveness plus store status
//! - GET  /version            — server version info
//! - POST /api/v1/connect     — start (or join) a tenant session
//! - POST /api/v1/disconnect  — tear a tenant session down
//! - GET  /api/v1/status      — persisted account row
//! - GET  /api/v1/qr          — current pairing artifact
//! - POST /api/v1/send        — send a message
//! - GET  /api/v1/messages    — recorded sends, newest first

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tether_core::error::status_for_kind;
use tether_core::ipc::{TetherRequest, TetherResponse};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::context::AppContext;
use crate::router::handle_request;
use crate::subsystems::dispatch::SendRequest;

/// Build the Axum router with all endpoints
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/v1/connect", post(connect_handler))
        .route("/api/v1/disconnect", post(disconnect_handler))
        .route("/api/v1/status", get(status_handler))
        .route("/api/v1/qr", get(qr_handler))
        .route("/api/v1/send", post(send_handler))
        .route("/api/v1/messages", get(messages_handler))
        .with_state(ctx)
}

/// Serve until the broadcast shutdown signal fires.
pub async fn start_http_server(
    ctx: AppContext,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.http.host, ctx.config.http.port);
    let app = build_router(ctx);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Tether HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectBody {
    #[serde(default)]
    pub organization_id: String,
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantQuery {
    #[serde(default)]
    pub organization_id: String,
    pub limit: Option<u32>,
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

pub async fn health_inner(ctx: &AppContext) -> (StatusCode, Value) {
    match ctx.store_health().await {
        Ok(store) => (
            StatusCode::OK,
            json!({
                "success": true,
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now(),
                "store": store,
                "liveSessions": ctx.sessions.live_count(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "success": false,
                "status": "unhealthy",
                "error": { "kind": e.kind(), "detail": e.detail() },
            }),
        ),
    }
}

pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "tether/1",
    })
}

pub async fn connect_inner(ctx: &AppContext, body: ConnectBody) -> (StatusCode, Value) {
    let request = TetherRequest::Connect {
        organization_id: body.organization_id,
        device_id: body.device_id,
    };
    response_to_http(handle_request(request, ctx).await)
}

pub async fn disconnect_inner(ctx: &AppContext, body: ConnectBody) -> (StatusCode, Value) {
    let request = TetherRequest::Disconnect {
        organization_id: body.organization_id,
    };
    response_to_http(handle_request(request, ctx).await)
}

pub async fn status_inner(ctx: &AppContext, query: TenantQuery) -> (StatusCode, Value) {
    let request = TetherRequest::Status {
        organization_id: query.organization_id,
    };
    response_to_http(handle_request(request, ctx).await)
}

pub async fn qr_inner(ctx: &AppContext, query: TenantQuery) -> (StatusCode, Value) {
    let request = TetherRequest::PairingCode {
        organization_id: query.organization_id,
    };
    response_to_http(handle_request(request, ctx).await)
}

pub async fn send_inner(ctx: &AppContext, body: SendRequest) -> (StatusCode, Value) {
    let request = TetherRequest::Send {
        organization_id: body.organization_id,
        to: body.to,
        message_type: body.message_type,
        message_text: body.message_text,
        media_url: body.media_url,
        lead_id: body.lead_id,
    };
    response_to_http(handle_request(request, ctx).await)
}

pub async fn messages_inner(ctx: &AppContext, query: TenantQuery) -> (StatusCode, Value) {
    let request = TetherRequest::Messages {
        organization_id: query.organization_id,
        limit: query.limit,
    };
    response_to_http(handle_request(request, ctx).await)
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn health_handler(State(ctx): State<AppContext>) -> impl IntoResponse {
    let (status, body) = health_inner(&ctx).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn connect_handler(
    State(ctx): State<AppContext>,
    Json(body): Json<ConnectBody>,
) -> impl IntoResponse {
    let (status, body) = connect_inner(&ctx, body).await;
    (status, Json(body))
}

pub async fn disconnect_handler(
    State(ctx): State<AppContext>,
    Json(body): Json<ConnectBody>,
) -> impl IntoResponse {
    let (status, body) = disconnect_inner(&ctx, body).await;
    (status, Json(body))
}

pub async fn status_handler(
    State(ctx): State<AppContext>,
    Query(query): Query<TenantQuery>,
) -> impl IntoResponse {
    let (status, body) = status_inner(&ctx, query).await;
    (status, Json(body))
}

pub async fn qr_handler(
    State(ctx): State<AppContext>,
    Query(query): Query<TenantQuery>,
) -> impl IntoResponse {
    let (status, body) = qr_inner(&ctx, query).await;
    (status, Json(body))
}

pub async fn send_handler(
    State(ctx): State<AppContext>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    let (status, body) = send_inner(&ctx, body).await;
    (status, Json(body))
}

pub async fn messages_handler(
    State(ctx): State<AppContext>,
    Query(query): Query<TenantQuery>,
) -> impl IntoResponse {
    let (status, body) = messages_inner(&ctx, query).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Map an IPC response to an HTTP status and `{success, ...}` body.
pub fn response_to_http(response: TetherResponse) -> (StatusCode, Value) {
    if response.is_ok() {
        let mut body = match response.data {
            Some(Value::Object(map)) => Value::Object(map),
            Some(other) => json!({ "data": other }),
            None => json!({}),
        };
        if let Some(obj) = body.as_object_mut() {
            obj.insert("success".to_string(), Value::Bool(true));
        }
        (StatusCode::OK, body)
    } else {
        let kind = response.error_kind.unwrap_or_else(|| "fatal".to_string());
        let status = StatusCode::from_u16(status_for_kind(&kind))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            json!({
                "success": false,
                "error": {
                    "kind": kind,
                    "detail": response.error.unwrap_or_else(|| "unknown error".to_string()),
                },
            }),
        )
    }
}
