//! Linked-client status fetching from peer instances

use std::collections::HashMap;
use std::time::Duration;

use crate::io::{HttpClient, HttpError};
use crate::status::LiveStatus;

/// Remote calls tolerate more latency than local probes.
const MIN_REMOTE_TIMEOUT: u64 = 5;

/// Why a linked client's fetch failed, as shown to status readers.
///
/// One fetch yields either a complete statuses map or exactly one of
/// these; partial results are never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Remote link is not fully configured")]
    Misconfigured,

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("HTTP {0}: {1}")]
    HttpStatusMessage(u16, String),

    #[error("Timeout >{0}s")]
    Timeout(u64),

    #[error("Connection error")]
    Connection,

    #[error("Invalid JSON response")]
    InvalidJson,

    #[error("Invalid remote data format")]
    InvalidFormat,
}

/// Fetch the exposed status map for one linked client from its peer
/// instance. Requires the remote base URL, the API token, and the remote
/// client id; a missing piece is a configuration error reported without
/// any network call.
pub async fn fetch_remote_status(
    http: &dyn HttpClient,
    remote_url: Option<&str>,
    api_token: Option<&str>,
    client_id: &str,
    timeout_seconds: u64,
) -> Result<HashMap<String, LiveStatus>, FetchError> {
    let url = remote_url.unwrap_or("").trim_end_matches('/');
    let token = api_token.unwrap_or("");
    if url.is_empty() || token.is_empty() || client_id.is_empty() {
        return Err(FetchError::Misconfigured);
    }

    let timeout_seconds = timeout_seconds.max(MIN_REMOTE_TIMEOUT);
    let status_url = format!("{url}/api/v1/client/{client_id}/status");

    let response = match http
        .get_bearer(&status_url, token, Duration::from_secs(timeout_seconds))
        .await
    {
        Ok(response) => response,
        Err(HttpError::Timeout) => return Err(FetchError::Timeout(timeout_seconds)),
        Err(e) => {
            tracing::debug!("Remote fetch for '{}' failed: {}", client_id, e);
            return Err(FetchError::Connection);
        }
    };

    if !(200..300).contains(&response.status) {
        return Err(match peer_error_message(&response.body) {
            Some(message) => FetchError::HttpStatusMessage(response.status, message),
            None => FetchError::HttpStatus(response.status),
        });
    }

    let value: serde_json::Value =
        serde_json::from_str(&response.body).map_err(|_| FetchError::InvalidJson)?;
    // Do not trust the peer's schema blindly.
    let statuses = value
        .get("statuses")
        .filter(|s| s.is_object())
        .cloned()
        .ok_or(FetchError::InvalidFormat)?;
    serde_json::from_value(statuses).map_err(|_| FetchError::InvalidFormat)
}

fn peer_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.as_str())
        .map(str::to_string)
}
