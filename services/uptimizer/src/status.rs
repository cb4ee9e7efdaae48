//! Status types shared across probing, state, and persistence

use serde::{Deserialize, Serialize};
use std::fmt;

/// The observed state of a monitored endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointStatus {
    Pending,
    Up,
    Down,
    Error,
    #[serde(other)]
    Unknown,
}

impl EndpointStatus {
    /// Wire/storage form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Pending => "PENDING",
            EndpointStatus::Up => "UP",
            EndpointStatus::Down => "DOWN",
            EndpointStatus::Error => "ERROR",
            EndpointStatus::Unknown => "UNKNOWN",
        }
    }

    /// Parse a stored status string; anything unrecognized maps to
    /// `Unknown` rather than failing the read.
    pub fn parse(s: &str) -> Self {
        match s {
            "PENDING" => EndpointStatus::Pending,
            "UP" => EndpointStatus::Up,
            "DOWN" => EndpointStatus::Down,
            "ERROR" => EndpointStatus::Error,
            _ => EndpointStatus::Unknown,
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details attached to a live status entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of one local probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub status: EndpointStatus,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub details: Option<String>,
}

impl CheckResult {
    pub fn to_details(&self) -> StatusDetails {
        StatusDetails {
            status_code: self.status_code,
            response_time_ms: self.response_time_ms,
            message: self.details.clone(),
        }
    }
}

/// Current in-memory status of one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub status: EndpointStatus,
    #[serde(default)]
    pub last_check_ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
}

impl LiveStatus {
    /// Initial status for an endpoint that has never been checked.
    pub fn pending() -> Self {
        Self {
            status: EndpointStatus::Pending,
            last_check_ts: 0,
            details: None,
        }
    }

    pub fn from_check(result: &CheckResult, now: u64) -> Self {
        Self {
            status: result.status,
            last_check_ts: now,
            details: Some(result.to_details()),
        }
    }
}
