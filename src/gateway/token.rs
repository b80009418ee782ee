//! Bearer-token validation gating the RPC call.
//!
//! Tokens are HS256 JWTs issued by the authentication service with the claims
//! `{username, email, id, exp?}`.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const HS256_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Identity carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub email: String,
    pub id: i64,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("missing bearer token")]
    Missing,

    #[error("malformed token")]
    Malformed,

    #[error("unsupported token algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("invalid token claims")]
    InvalidClaims(#[source] serde_json::Error),
}

/// Turns a bearer token into [`Claims`] or refuses it.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate(&self, token: &str) -> Result<Claims, TokenError>;
}

#[derive(Deserialize)]
struct JwtHeader {
    alg: String,
}

/// HS256 JWT validator sharing its secret with the authentication service.
#[derive(Clone)]
pub struct Hs256Validator {
    secret: Arc<[u8]>,
}

impl fmt::Debug for Hs256Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hs256Validator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Hs256Validator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    /// Sign `claims` into a token this validator accepts.
    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = URL_SAFE_NO_PAD.encode(HS256_HEADER);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).map_err(TokenError::InvalidClaims)?);
        let signing_input = format!("{header}.{payload}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature}"))
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::InvalidSignature)
    }
}

impl TokenValidator for Hs256Validator {
    fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed);
        };

        let jwt_header: JwtHeader =
            serde_json::from_slice(&decode_segment(header)?).map_err(|_| TokenError::Malformed)?;
        if jwt_header.alg != "HS256" {
            return Err(TokenError::UnsupportedAlgorithm(jwt_header.alg));
        }

        let mut mac = self.mac()?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&decode_segment(signature)?)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims =
            serde_json::from_slice(&decode_segment(payload)?).map_err(TokenError::InvalidClaims)?;

        if let Some(exp) = claims.exp {
            if unix_now() >= exp {
                return Err(TokenError::Expired);
            }
        }

        Ok(claims)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, TokenError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim_start().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn claims(exp: Option<u64>) -> Claims {
        Claims {
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            id: 7,
            exp,
        }
    }

    #[test]
    fn test_issued_token_validates() {
        let validator = Hs256Validator::new("secret");
        let token = validator.issue(&claims(None)).unwrap();
        assert_eq!(validator.validate(&token).unwrap(), claims(None));
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let token = Hs256Validator::new("other").issue(&claims(None)).unwrap();
        let err = Hs256Validator::new("secret").validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let validator = Hs256Validator::new("secret");
        let token = validator.issue(&claims(None)).unwrap();
        let mut segments: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(r#"{"username":"eve","email":"e@x","id":1}"#);
        segments[1] = &forged;

        let err = validator.validate(&segments.join(".")).unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));
    }

    #[test]
    fn test_expiry_is_enforced() {
        let validator = Hs256Validator::new("secret");

        let expired = validator.issue(&claims(Some(1))).unwrap();
        assert!(matches!(validator.validate(&expired), Err(TokenError::Expired)));

        let fresh = validator.issue(&claims(Some(unix_now() + 3600))).unwrap();
        assert!(validator.validate(&fresh).is_ok());
    }

    #[test]
    fn test_other_algorithms_are_refused() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims(None)).unwrap());
        let token = format!("{header}.{payload}.");

        let err = Hs256Validator::new("secret").validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::UnsupportedAlgorithm(alg) if alg == "none"));
    }

    #[test]
    fn test_malformed_tokens() {
        let validator = Hs256Validator::new("secret");
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.**"] {
            assert!(
                matches!(validator.validate(token), Err(TokenError::Malformed)),
                "{token:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("BEARER  abc.def.ghi "));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearerabc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", Hs256Validator::new("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
