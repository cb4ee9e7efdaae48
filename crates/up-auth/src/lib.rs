//! Bearer token utilities for Uptimizer services
//!
//! Extracts bearer tokens from request headers and maps them back to the
//! client they were issued for. Token issuance lives outside this crate;
//! services hand a client-id → token table to [`StaticTokenVerifier`].

use std::collections::HashMap;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Errors produced while checking a request's credentials
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication token is missing")]
    MissingToken,

    #[error("Invalid or unverifiable authentication token")]
    InvalidToken,

    #[error("Token does not match the requested client resource")]
    WrongClient,
}

/// Pull the bearer token out of the `Authorization` header, if any.
///
/// Returns `None` for a missing header, a non-bearer scheme, or an empty
/// token.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        tracing::warn!("Invalid Authorization header scheme '{}'", scheme);
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// Maps presented tokens back to client ids.
pub trait TokenVerifier: Send + Sync {
    /// Return the client id a token was issued for, or `None` if the token
    /// is unknown.
    fn identify(&self, token: &str) -> Option<String>;

    /// Confirm that `token` grants access to exactly `client_id`.
    fn verify(&self, token: &str, client_id: &str) -> bool {
        self.identify(token).as_deref() == Some(client_id)
    }
}

/// Checks a full request: header extraction, token lookup, and the
/// token-matches-resource rule. Returns the verified client id.
pub fn authorize_client(
    verifier: &dyn TokenVerifier,
    headers: &HeaderMap,
    client_id: &str,
) -> Result<String, AuthError> {
    let token = extract_bearer(headers).ok_or(AuthError::MissingToken)?;
    let verified = verifier.identify(token).ok_or_else(|| {
        tracing::warn!("API access denied: unverifiable token");
        AuthError::InvalidToken
    })?;
    if verified != client_id {
        tracing::warn!(
            "API access denied: token client id '{}' does not match requested '{}'",
            verified,
            client_id
        );
        return Err(AuthError::WrongClient);
    }
    Ok(verified)
}

/// Verifier backed by a fixed client-id → token table.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, String>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn identify(&self, token: &str) -> Option<String> {
        self.tokens
            .iter()
            .find(|(_, expected)| constant_time_eq(expected.as_bytes(), token.as_bytes()))
            .map(|(client_id, _)| client_id.clone())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn verifier() -> StaticTokenVerifier {
        let mut tokens = HashMap::new();
        tokens.insert("client_a".to_string(), "token-a".to_string());
        tokens.insert("client_b".to_string(), "token-b".to_string());
        StaticTokenVerifier::new(tokens)
    }

    #[test]
    fn extract_bearer_returns_token() {
        assert_eq!(
            extract_bearer(&headers_with("Bearer token-a")),
            Some("token-a")
        );
    }

    #[test]
    fn extract_bearer_is_scheme_case_insensitive() {
        assert_eq!(
            extract_bearer(&headers_with("bearer token-a")),
            Some("token-a")
        );
    }

    #[test]
    fn extract_bearer_rejects_other_schemes() {
        assert_eq!(extract_bearer(&headers_with("Basic dXNlcjpwdw==")), None);
    }

    #[test]
    fn extract_bearer_rejects_missing_header() {
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }

    #[test]
    fn extract_bearer_rejects_empty_token() {
        assert_eq!(extract_bearer(&headers_with("Bearer  ")), None);
    }

    #[test]
    fn identify_finds_owning_client() {
        let v = verifier();
        assert_eq!(v.identify("token-a"), Some("client_a".to_string()));
        assert_eq!(v.identify("token-b"), Some("client_b".to_string()));
        assert_eq!(v.identify("nope"), None);
    }

    #[test]
    fn verify_requires_exact_client() {
        let v = verifier();
        assert!(v.verify("token-a", "client_a"));
        assert!(!v.verify("token-a", "client_b"));
        assert!(!v.verify("unknown", "client_a"));
    }

    #[test]
    fn authorize_client_accepts_matching_token() {
        let v = verifier();
        let headers = headers_with("Bearer token-a");
        assert_eq!(
            authorize_client(&v, &headers, "client_a"),
            Ok("client_a".to_string())
        );
    }

    #[test]
    fn authorize_client_rejects_missing_token() {
        let v = verifier();
        assert_eq!(
            authorize_client(&v, &HeaderMap::new(), "client_a"),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn authorize_client_rejects_unknown_token() {
        let v = verifier();
        let headers = headers_with("Bearer forged");
        assert_eq!(
            authorize_client(&v, &headers, "client_a"),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn authorize_client_rejects_other_clients_token() {
        let v = verifier();
        let headers = headers_with("Bearer token-b");
        assert_eq!(
            authorize_client(&v, &headers, "client_a"),
            Err(AuthError::WrongClient)
        );
    }

    #[test]
    fn constant_time_eq_compares_lengths_first() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
