//! Uptime statistics computed from persisted history

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{Result, UptimizerError};
use crate::status::EndpointStatus;
use crate::store::{HistorySample, HistoryStore};

/// Resolve a chart period string to a window ending now. Unrecognized
/// periods fall back to 24h, mirroring what callers expect as default.
pub fn period_window(period: &str, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = match period {
        "1h" => now - TimeDelta::hours(1),
        "7d" => now - TimeDelta::days(7),
        _ => now - TimeDelta::hours(24),
    };
    (start, now)
}

/// Fractional uptime percentage over the last 24 hours, rounded to two
/// decimals.
pub async fn uptime_pct_24h(store: &HistoryStore, endpoint_id: &str) -> Result<f64> {
    let end = Utc::now();
    uptime_pct(store, endpoint_id, end - TimeDelta::hours(24), end).await
}

/// Continuous-time interval integration over `[start, end]`.
///
/// Each event's timestamp is the instant the status changed *to* that
/// value; the interval before an event carries the previous status. The
/// state at the window start is seeded from the latest record strictly
/// before the window (UNKNOWN when none exists).
pub async fn uptime_pct(
    store: &HistoryStore,
    endpoint_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<f64> {
    let initial = store.most_recent_before(endpoint_id, start).await?;
    let samples = store.range(endpoint_id, start, end).await?;

    if samples.is_empty() && initial.is_none() {
        return Err(UptimizerError::NoData);
    }

    let total_ms = (end - start).num_milliseconds();
    if total_ms <= 0 {
        return Err(UptimizerError::Stats("Zero duration window".to_string()));
    }

    let mut current_status = initial.unwrap_or(EndpointStatus::Unknown);
    let mut current_time = start;
    let mut up_ms: i64 = 0;

    for sample in &samples {
        if current_status == EndpointStatus::Up {
            up_ms += (sample.timestamp - current_time).num_milliseconds().max(0);
        }
        current_time = sample.timestamp;
        current_status = sample.status;
    }
    if current_status == EndpointStatus::Up {
        up_ms += (end - current_time).num_milliseconds().max(0);
    }

    let percentage = 100.0 * up_ms as f64 / total_ms as f64;
    Ok((percentage * 100.0).round() / 100.0)
}

/// Raw chronological samples for charting; no aggregation.
pub async fn history(
    store: &HistoryStore,
    endpoint_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<HistorySample>> {
    store.range(endpoint_id, start, end).await
}
