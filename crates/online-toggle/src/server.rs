//! Axum admin API: router, listener, graceful shutdown.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::command::{CommandResponse, CommandStatus, CommandSurface, PermissionTable};
use crate::host::ServerHost;
use crate::probe::StatusProbe;

/// Sender name used when a request carries no known token.
pub const ANONYMOUS_SENDER: &str = "anonymous";

/// Shared application state.
pub struct AppState<H, P> {
    pub surface: CommandSurface<H, P, PermissionTable>,
}

#[derive(Debug, Default, Deserialize)]
struct ToggleRequest {
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommandBody<'a> {
    success: bool,
    message: &'a str,
}

pub fn router<H: ServerHost, P: StatusProbe>(state: Arc<AppState<H, P>>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/mode",
            get(handle_get_mode::<H, P>).put(handle_toggle::<H, P>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build and run the HTTP server until Ctrl-C.
pub async fn run<H: ServerHost, P: StatusProbe>(
    state: Arc<AppState<H, P>>,
    listen_addr: &str,
) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(address = %listen_addr, "online-toggle admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Admin API shut down gracefully");
    Ok(())
}

/// Resolve the sender from `Authorization: Bearer <token>`.
fn resolve_sender<'a>(table: &'a PermissionTable, headers: &HeaderMap) -> &'a str {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(|token| table.sender_for_token(token.trim()))
        .unwrap_or(ANONYMOUS_SENDER)
}

fn respond(response: CommandResponse) -> Response {
    let status = match response.status {
        CommandStatus::Ok => StatusCode::OK,
        CommandStatus::Denied => StatusCode::FORBIDDEN,
        CommandStatus::Rejected => StatusCode::BAD_REQUEST,
        CommandStatus::Disabled => StatusCode::CONFLICT,
        CommandStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = CommandBody {
        success: response.success(),
        message: &response.message,
    };
    (status, axum::Json(body)).into_response()
}

/// GET /api/mode — report the live online-mode.
async fn handle_get_mode<H: ServerHost, P: StatusProbe>(
    State(state): State<Arc<AppState<H, P>>>,
    headers: HeaderMap,
) -> Response {
    let surface = &state.surface;
    let sender = resolve_sender(surface.authorizer(), &headers);
    respond(surface.query_mode(sender).await)
}

/// PUT /api/mode — toggle to `{"mode": "<token>"}`, or flip when no mode is
/// given.
async fn handle_toggle<H: ServerHost, P: StatusProbe>(
    State(state): State<Arc<AppState<H, P>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ToggleRequest::default()
    } else {
        match serde_json::from_slice::<ToggleRequest>(&body) {
            Ok(req) => req,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({
                        "success": false,
                        "message": format!("invalid request body: {e}"),
                    })),
                )
                    .into_response();
            }
        }
    };

    let surface = &state.surface;
    let sender = resolve_sender(surface.authorizer(), &headers);
    respond(surface.request_toggle(sender, request.mode.as_deref()).await)
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler, running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
