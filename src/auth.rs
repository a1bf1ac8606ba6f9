//! Bearer token gate shared by every protected endpoint

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use tracing::warn;

use crate::SharedState;
use crate::error::{ApiError, ControlError};

type HmacSha256 = Hmac<Sha256>;

/// The shared secret callers present as a bearer token.
///
/// Comparison goes through an HMAC keyed with the secret itself, so checking
/// a presented token costs the same regardless of where it first differs.
#[derive(Clone)]
pub struct Credential {
    secret: String,
    expected_tag: Vec<u8>,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Result<Self, ControlError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(ControlError::ConfigError(
                "API_KEY must be set to a non-empty value".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ControlError::ConfigError(format!("Invalid API_KEY: {}", e)))?;
        mac.update(secret.as_bytes());
        let expected_tag = mac.finalize().into_bytes().to_vec();

        Ok(Self {
            secret,
            expected_tag,
        })
    }

    /// Constant-time check of a caller supplied token
    pub fn matches(&self, presented: &str) -> bool {
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(presented.as_bytes());
        mac.verify_slice(&self.expected_tag).is_ok()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Pulls the token out of `Authorization: Bearer <token>`.
/// The scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Admits the request or rejects it with 401
pub fn verify_bearer(
    headers: &HeaderMap,
    credential: &Credential,
) -> Result<RequireBearer, ApiError> {
    match bearer_token(headers) {
        Some(token) if credential.matches(token) => Ok(RequireBearer),
        Some(_) => {
            warn!("Rejected request with invalid bearer token");
            Err(ApiError::Unauthorized)
        }
        None => {
            warn!("Rejected request without bearer token");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Extractor that must come first in a protected handler's argument list,
/// so the check runs before the body or query is looked at.
#[derive(Debug, Clone, Copy)]
pub struct RequireBearer;

impl FromRequestParts<SharedState> for RequireBearer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        verify_bearer(&parts.headers, &state.credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn credential_matches_only_exact_token() {
        let credential = Credential::new("T0k3n").unwrap();
        assert!(credential.matches("T0k3n"));
        assert!(!credential.matches("T0k3"));
        assert!(!credential.matches("T0k3n "));
        assert!(!credential.matches("t0k3n"));
        assert!(!credential.matches(""));
    }

    #[test]
    fn empty_credential_is_a_config_error() {
        assert!(matches!(
            Credential::new("  "),
            Err(ControlError::ConfigError(_))
        ));
    }

    #[test]
    fn debug_output_is_redacted() {
        let credential = Credential::new("super-secret").unwrap();
        let printed = format!("{:?}", credential);
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn extracts_bearer_token_case_insensitively() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("BEARER  abc ")), Some("abc"));
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert_eq!(bearer_token(&headers_with("Basic abc")), None);
        assert_eq!(bearer_token(&headers_with("Bearer")), None);
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn verify_bearer_outcomes() {
        let credential = Credential::new("T").unwrap();
        assert!(verify_bearer(&headers_with("Bearer T"), &credential).is_ok());
        assert!(matches!(
            verify_bearer(&headers_with("Bearer wrong"), &credential),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            verify_bearer(&HeaderMap::new(), &credential),
            Err(ApiError::Unauthorized)
        ));
    }
}
