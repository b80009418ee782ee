use axum::Json;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::token::TokenError;
use crate::rpc_queue::RpcError;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Everything an HTTP request to the gateway can fail with.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authorization failed: {0}")]
    Unauthorized(#[from] TokenError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("OCR call failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("Authentication service returned {status}")]
    AuthService { status: StatusCode, detail: Value },

    #[error("Authentication service is unavailable")]
    AuthServiceUnavailable,

    #[error("Not found")]
    NotFound,
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Rpc(err) => match err {
                RpcError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                RpcError::Remote { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                RpcError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
                RpcError::Decode(_) | RpcError::HandlerPanic => StatusCode::BAD_GATEWAY,
                RpcError::Transport(_) | RpcError::ConnectionClosed | RpcError::Cancelled => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            GatewayError::AuthService { status, .. } => *status,
            GatewayError::AuthServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "INVALID_TOKEN",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::Rpc(err) => match err {
                RpcError::Timeout(_) => "OCR_TIMEOUT",
                RpcError::Remote { .. } => "OCR_FAILED",
                RpcError::Encode(_) => "INTERNAL_ERROR",
                RpcError::Decode(_) | RpcError::HandlerPanic => "BAD_OCR_REPLY",
                RpcError::Transport(_) | RpcError::ConnectionClosed | RpcError::Cancelled => {
                    "OCR_UNAVAILABLE"
                }
            },
            GatewayError::AuthService { .. } => "AUTH_SERVICE_ERROR",
            GatewayError::AuthServiceUnavailable => "AUTH_SERVICE_UNAVAILABLE",
            GatewayError::NotFound => "NOT_FOUND",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            GatewayError::Rpc(RpcError::Remote { code, .. }) => {
                Some(serde_json::json!({ "code": code }))
            }
            GatewayError::AuthService { detail, .. } if !detail.is_null() => Some(detail.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
