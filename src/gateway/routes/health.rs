use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use crate::gateway::state::GatewayState;

/// Health check endpoint.
/// Returns 200 while the RPC client is connected to the broker, 503 otherwise.
pub async fn health_check(State(state): State<GatewayState>) -> impl IntoResponse {
    let connected = state.rpc.is_connected();
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let label = if connected { "healthy" } else { "degraded" };

    let body = Json(json!({
        "status": label,
        "service": "ocr-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "rpc": {
            "connected": connected,
            "work_queue": state.rpc.config().work_queue,
            "reply_queue": state.rpc.reply_queue().name(),
            "pending_calls": state.rpc.pending_calls(),
            "oldest_pending_ms": state
                .rpc
                .oldest_pending_age()
                .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX)),
        }
    }));

    (status, body)
}
