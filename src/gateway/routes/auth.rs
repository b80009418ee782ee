use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde_json::Value;

use crate::gateway::auth_service::{GenerateOtp, UserCredentials, UserRegistration};
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::state::GatewayState;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> GatewayResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| GatewayError::BadRequest(e.body_text()))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<GatewayState>,
    payload: Result<Json<UserCredentials>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let credentials = json_body(payload)?;
    state.auth_service.login(&credentials).await.map(Json)
}

/// `POST /auth/register`
pub async fn register(
    State(state): State<GatewayState>,
    payload: Result<Json<UserRegistration>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let registration = json_body(payload)?;
    state.auth_service.register(&registration).await.map(Json)
}

/// `POST /auth/generate_otp`
pub async fn generate_otp(
    State(state): State<GatewayState>,
    payload: Result<Json<GenerateOtp>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let request = json_body(payload)?;
    state.auth_service.generate_otp(&request).await.map(Json)
}
