//! Local endpoint health checks

use std::time::{Duration, Instant};

use crate::config::{EndpointConfig, GlobalSettings};
use crate::io::{HttpClient, HttpError};
use crate::status::{CheckResult, EndpointStatus};

/// Longest failure message carried into a check result
const MAX_DETAIL_LEN: usize = 200;

/// Run one HTTP health check against an endpoint.
///
/// An unreachable or unhealthy target is a normal DOWN/ERROR outcome, so
/// this never fails; the distinction between "target is unhealthy" (DOWN)
/// and "the checker itself malfunctioned" (ERROR) is carried in the status.
pub async fn probe(
    endpoint: &EndpointConfig,
    global: &GlobalSettings,
    http: &dyn HttpClient,
) -> CheckResult {
    if endpoint.url.is_empty() {
        return error_result("Missing URL");
    }

    let timeout_secs = endpoint.effective_timeout(global);
    let timeout = Duration::from_secs(timeout_secs);
    let started = Instant::now();

    match http.get(&endpoint.url, timeout).await {
        Ok(response) => {
            // Elapsed time is only meaningful for a completed exchange.
            let elapsed_ms = (started.elapsed().as_secs_f64() * 1000.0).round() as u64;
            let status = if (200..400).contains(&response.status) {
                EndpointStatus::Up
            } else {
                EndpointStatus::Down
            };
            let details = match status {
                EndpointStatus::Down => Some(format!("HTTP {}", response.status)),
                _ => None,
            };
            CheckResult {
                status,
                status_code: Some(response.status),
                response_time_ms: Some(elapsed_ms),
                details,
            }
        }
        Err(HttpError::Timeout) => down_result(format!("Timeout >{timeout_secs}s")),
        Err(HttpError::Connect) => down_result("Connection error".to_string()),
        Err(HttpError::TooManyRedirects) => down_result("Too many redirects".to_string()),
        Err(HttpError::Other(message)) => down_result(truncate(message)),
    }
}

fn down_result(details: String) -> CheckResult {
    CheckResult {
        status: EndpointStatus::Down,
        status_code: None,
        response_time_ms: None,
        details: Some(details),
    }
}

fn error_result(details: &str) -> CheckResult {
    CheckResult {
        status: EndpointStatus::Error,
        status_code: None,
        response_time_ms: None,
        details: Some(details.to_string()),
    }
}

fn truncate(message: String) -> String {
    if message.chars().count() > MAX_DETAIL_LEN {
        let mut truncated: String = message.chars().take(MAX_DETAIL_LEN).collect();
        truncated.push_str("...");
        truncated
    } else {
        message
    }
}
