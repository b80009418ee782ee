use axum::Json;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use tracing::{info, warn};

use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::state::GatewayState;
use crate::gateway::token::{TokenError, bearer_token};
use crate::ocr::{OcrRequest, OcrResponse};

/// Multipart field carrying the uploaded document.
pub const FILE_FIELD: &str = "file";

/// Run OCR on an uploaded document.
///
/// The bearer token is checked before the body is looked at, so an unauthorized or malformed
/// request never reaches the work queue. Exactly one RPC call is made per accepted request.
pub async fn ocr(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> GatewayResult<Json<OcrResponse>> {
    let token = bearer_token(&headers).ok_or(TokenError::Missing)?;
    let claims = state
        .tokens
        .validate(token)
        .inspect_err(|e| warn!(error = %e, "Rejected OCR request"))?;

    let mut multipart = multipart.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    let document = read_file_field(&mut multipart).await?;

    let request = OcrRequest {
        user_name: claims.username,
        user_email: claims.email,
        user_id: claims.id,
        file: STANDARD.encode(&document),
    };

    info!(
        user_id = request.user_id,
        bytes = document.len(),
        "Dispatching OCR request"
    );
    let response: OcrResponse = state
        .rpc
        .call_default(&request)
        .await
        .inspect_err(|e| warn!(user_id = request.user_id, error = %e, "OCR call failed"))?;

    Ok(Json(response))
}

async fn read_file_field(multipart: &mut Multipart) -> GatewayResult<Bytes> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let contents = field
            .bytes()
            .await
            .map_err(|e| GatewayError::BadRequest(e.body_text()))?;
        if contents.is_empty() {
            return Err(GatewayError::BadRequest("uploaded file is empty".to_string()));
        }
        return Ok(contents);
    }

    Err(GatewayError::BadRequest(format!(
        "missing multipart field `{FILE_FIELD}`"
    )))
}
