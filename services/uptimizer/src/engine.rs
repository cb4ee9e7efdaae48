//! Check cycle orchestration: due targets, probes, fetches, persistence

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ClientKind;
use crate::error::UptimizerError;
use crate::io::HttpClient;
use crate::probe;
use crate::remote;
use crate::state::{ClientSnapshot, StateHandle, StatusBatch};
use crate::status::{CheckResult, EndpointStatus, LiveStatus, StatusDetails};
use crate::store::{should_persist, HistoryRecord, HistoryStore, SavedStatus};

/// Runs check cycles against the shared state.
///
/// A cycle snapshots the state, probes every due local endpoint and
/// fetches every due linked client concurrently, persists meaningful
/// local transitions, and applies all results as one batch. At most one
/// cycle runs at a time; ticks that fire mid-cycle are skipped.
pub struct Engine {
    state: StateHandle,
    store: Arc<HistoryStore>,
    http: Arc<dyn HttpClient>,
    last_saved: tokio::sync::Mutex<HashMap<String, SavedStatus>>,
    cycle_guard: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        state: StateHandle,
        store: Arc<HistoryStore>,
        http: Arc<dyn HttpClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            store,
            http,
            last_saved: tokio::sync::Mutex::new(HashMap::new()),
            cycle_guard: tokio::sync::Mutex::new(()),
            cancel,
        }
    }

    /// Run the periodic check loop until cancelled. Performs one cycle
    /// immediately, then ticks at the global interval.
    pub async fn run(&self) {
        self.run_cycle().await;

        let interval_secs = {
            let state = self.state.read().await;
            state.global_settings.check_interval_seconds
        };
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_cycle().await,
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Check loop cancelled");
                    break;
                }
            }
        }
    }

    /// Execute one check cycle. Safe to call from the scheduler and from
    /// startup/reload paths; overlapping calls are coalesced into one.
    pub async fn run_cycle(&self) {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            tracing::warn!("Check cycle still running, skipping this tick");
            return;
        };

        let now = epoch_seconds();
        let snapshot = {
            let state = self.state.read().await;
            state.snapshot()
        };
        let global_interval = snapshot.global.check_interval_seconds;

        let mut due_probes = Vec::new();
        let mut due_fetches: Vec<ClientSnapshot> = Vec::new();
        for client in &snapshot.clients {
            match client.kind {
                ClientKind::Local => {
                    for ep in &client.endpoints {
                        if ep.id.is_empty() {
                            tracing::warn!(
                                "Skipping endpoint without id in client '{}'",
                                client.id
                            );
                            continue;
                        }
                        let interval = ep.effective_interval(&snapshot.global);
                        let last = client.last_checks.get(&ep.id).copied().unwrap_or(0);
                        if now.saturating_sub(last) >= interval {
                            due_probes.push((client.id.clone(), ep.clone()));
                        }
                    }
                }
                ClientKind::Linked => {
                    let last = client.last_checks.values().copied().max().unwrap_or(0);
                    if now.saturating_sub(last) >= global_interval {
                        due_fetches.push(client.clone());
                    }
                }
            }
        }

        if due_probes.is_empty() && due_fetches.is_empty() {
            tracing::debug!("No targets due this cycle");
            return;
        }

        tracing::debug!(
            "Checking {} endpoints and {} linked clients",
            due_probes.len(),
            due_fetches.len()
        );
        let cycle_start = Instant::now();

        let mut probe_tasks = JoinSet::new();
        for (client_id, endpoint) in due_probes {
            let http = Arc::clone(&self.http);
            let global = snapshot.global.clone();
            probe_tasks.spawn(async move {
                let result = probe::probe(&endpoint, &global, http.as_ref()).await;
                (client_id, endpoint.id, result)
            });
        }

        let mut fetch_tasks = JoinSet::new();
        for client in due_fetches {
            let http = Arc::clone(&self.http);
            let timeout = snapshot.global.check_timeout_seconds;
            fetch_tasks.spawn(async move {
                let result = remote::fetch_remote_status(
                    http.as_ref(),
                    client.remote_url.as_deref(),
                    client.api_token.as_deref(),
                    &client.remote_client_id,
                    timeout,
                )
                .await;
                (client, result)
            });
        }

        let mut batch = StatusBatch::default();

        let mut local_results: Vec<(String, String, CheckResult)> = Vec::new();
        while let Some(joined) = probe_tasks.join_next().await {
            match joined {
                Ok((client_id, endpoint_id, result)) => {
                    local_results.push((client_id, endpoint_id, result));
                }
                // One endpoint's failure never aborts the rest of the
                // cycle; the endpoint is retried next time it is due.
                Err(e) => tracing::error!("Probe task failed: {}", e),
            }
        }

        self.record_local_results(&mut batch, local_results, now).await;

        while let Some(joined) = fetch_tasks.join_next().await {
            let (client, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("Remote fetch task failed: {}", e);
                    continue;
                }
            };
            match result {
                Ok(mut statuses) => {
                    // The remote's own timestamps are not trusted for
                    // local staleness reasoning.
                    for status in statuses.values_mut() {
                        status.last_check_ts = now;
                    }
                    tracing::debug!(
                        "Fetched {} statuses for linked client '{}'",
                        statuses.len(),
                        client.id
                    );
                    batch.client_replacements.push((client.id, statuses));
                }
                Err(reason) => {
                    tracing::warn!("Link fetch for client '{}' failed: {}", client.id, reason);
                    let message = format!("Link Error: {reason}");
                    let statuses = client
                        .last_checks
                        .keys()
                        .map(|endpoint_id| {
                            (
                                endpoint_id.clone(),
                                LiveStatus {
                                    status: EndpointStatus::Error,
                                    last_check_ts: now,
                                    details: Some(StatusDetails {
                                        status_code: None,
                                        response_time_ms: None,
                                        message: Some(message.clone()),
                                    }),
                                },
                            )
                        })
                        .collect();
                    batch.client_replacements.push((client.id, statuses));
                }
            }
        }

        let cycle_duration = cycle_start.elapsed();
        if cycle_duration.as_secs_f64() > global_interval as f64 {
            tracing::warn!(
                "Check cycle took {:.2}s, exceeding the {}s interval",
                cycle_duration.as_secs_f64(),
                global_interval
            );
        }

        let mut state = self.state.write().await;
        state.apply(batch, now);
    }

    /// Run local results through the change filter and append the ones
    /// that matter; a failed write degrades statistics but never the
    /// cycle.
    async fn record_local_results(
        &self,
        batch: &mut StatusBatch,
        results: Vec<(String, String, CheckResult)>,
        now: u64,
    ) {
        let store_ready = self.store.is_ready();
        let mut last_saved = self.last_saved.lock().await;

        for (client_id, endpoint_id, result) in results {
            if store_ready && should_persist(last_saved.get(&endpoint_id), &result) {
                let record = HistoryRecord {
                    endpoint_id: endpoint_id.clone(),
                    timestamp: Utc::now(),
                    status: result.status,
                    status_code: result.status_code,
                    response_time_ms: result.response_time_ms,
                    details: result.details.clone(),
                };
                match self.store.append(&record).await {
                    Ok(()) => {
                        last_saved.insert(
                            endpoint_id.clone(),
                            SavedStatus {
                                status: result.status,
                                details: result.details.clone(),
                            },
                        );
                    }
                    Err(UptimizerError::StoreUnavailable) => {
                        tracing::debug!(
                            "History store unavailable, skipped write for '{}'",
                            endpoint_id
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Failed to record history for '{}': {}", endpoint_id, e);
                    }
                }
            }
            batch
                .endpoint_updates
                .push((client_id, endpoint_id, LiveStatus::from_check(&result, now)));
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::io::{HttpError, HttpResponse, MockHttpClient};
    use crate::state::new_state_handle;

    fn config(json: &str) -> Config {
        let mut config: Config = serde_json::from_str(json).unwrap();
        config.normalize();
        config
    }

    fn local_client_config() -> Config {
        config(
            r#"{
                "clients": {
                    "c1": {
                        "settings": {"name": "Local", "client_type": "local"},
                        "endpoints": [
                            {"id": "ep_1", "name": "a", "url": "http://a",
                             "check_interval_seconds": 5}
                        ]
                    }
                }
            }"#,
        )
    }

    fn engine_with(config: &Config, mock: MockHttpClient) -> (Engine, StateHandle) {
        let state = new_state_handle(config);
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        let engine = Engine::new(
            Arc::clone(&state),
            store,
            Arc::new(mock),
            CancellationToken::new(),
        );
        (engine, state)
    }

    fn ok_response() -> HttpResponse {
        HttpResponse {
            status: 200,
            body: String::new(),
        }
    }

    async fn history_rows(engine: &Engine, endpoint_id: &str) -> usize {
        let end = Utc::now() + chrono::TimeDelta::minutes(1);
        let start = end - chrono::TimeDelta::hours(1);
        engine
            .store
            .range(endpoint_id, start, end)
            .await
            .unwrap()
            .len()
    }

    /// Rewind an endpoint's last_check_ts to make it due again.
    async fn rewind(state: &StateHandle, client_id: &str, endpoint_id: &str, seconds: u64) {
        let mut state = state.write().await;
        let status = state
            .clients
            .get_mut(client_id)
            .unwrap()
            .statuses
            .get_mut(endpoint_id)
            .unwrap();
        status.last_check_ts -= seconds;
    }

    #[tokio::test]
    async fn first_cycle_probes_and_persists() {
        let mut mock = MockHttpClient::new();
        mock.expect_get()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(ok_response()) }));

        let (engine, state) = engine_with(&local_client_config(), mock);
        engine.run_cycle().await;

        let state = state.read().await;
        let status = &state.clients["c1"].statuses["ep_1"];
        assert_eq!(status.status, EndpointStatus::Up);
        assert!(status.last_check_ts > 0);
        assert!(state.last_updated > 0);
        drop(state);

        assert_eq!(history_rows(&engine, "ep_1").await, 1);
    }

    #[tokio::test]
    async fn second_immediate_cycle_is_a_no_op() {
        let mut mock = MockHttpClient::new();
        // times(1): a second network call would fail the test.
        mock.expect_get()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(ok_response()) }));

        let (engine, state) = engine_with(&local_client_config(), mock);
        engine.run_cycle().await;
        let last_updated_after_first = state.read().await.last_updated;

        engine.run_cycle().await;
        assert_eq!(state.read().await.last_updated, last_updated_after_first);
        assert_eq!(history_rows(&engine, "ep_1").await, 1);
    }

    #[tokio::test]
    async fn endpoint_due_again_after_interval_appends_new_up_row() {
        let mut mock = MockHttpClient::new();
        mock.expect_get()
            .times(2)
            .returning(|_, _| Box::pin(async { Ok(ok_response()) }));

        let (engine, state) = engine_with(&local_client_config(), mock);
        engine.run_cycle().await;
        rewind(&state, "c1", "ep_1", 5).await;
        engine.run_cycle().await;

        // UP always persists, so the second probe adds a second row.
        assert_eq!(history_rows(&engine, "ep_1").await, 2);
    }

    #[tokio::test]
    async fn unchanged_down_does_not_append_again() {
        let mut mock = MockHttpClient::new();
        mock.expect_get().times(2).returning(|_, _| {
            Box::pin(async {
                Ok(HttpResponse {
                    status: 500,
                    body: String::new(),
                })
            })
        });

        let (engine, state) = engine_with(&local_client_config(), mock);
        engine.run_cycle().await;
        rewind(&state, "c1", "ep_1", 5).await;
        engine.run_cycle().await;

        assert_eq!(history_rows(&engine, "ep_1").await, 1);
    }

    #[tokio::test]
    async fn one_failing_endpoint_does_not_block_others() {
        let config = config(
            r#"{
                "clients": {
                    "c1": {
                        "settings": {"name": "Local", "client_type": "local"},
                        "endpoints": [
                            {"id": "ep_ok", "name": "a", "url": "http://ok"},
                            {"id": "ep_bad", "name": "b", "url": "http://bad"}
                        ]
                    }
                }
            }"#,
        );
        let mut mock = MockHttpClient::new();
        mock.expect_get().returning(|url, _| {
            let fail = url.contains("bad");
            Box::pin(async move {
                if fail {
                    Err(HttpError::Connect)
                } else {
                    Ok(ok_response())
                }
            })
        });

        let (engine, state) = engine_with(&config, mock);
        engine.run_cycle().await;

        let state = state.read().await;
        let statuses = &state.clients["c1"].statuses;
        assert_eq!(statuses["ep_ok"].status, EndpointStatus::Up);
        assert_eq!(statuses["ep_bad"].status, EndpointStatus::Down);
        assert_eq!(
            statuses["ep_bad"]
                .details
                .as_ref()
                .unwrap()
                .message
                .as_deref(),
            Some("Connection error")
        );
    }

    #[tokio::test]
    async fn linked_fetch_success_replaces_statuses() {
        let config = config(
            r#"{
                "clients": {
                    "peer": {
                        "settings": {"name": "Peer", "client_type": "linked",
                                     "remote_url": "http://peer", "api_token": "t"}
                    }
                }
            }"#,
        );
        let mut mock = MockHttpClient::new();
        mock.expect_get_bearer().times(1).returning(|_, _, _| {
            Box::pin(async {
                Ok(HttpResponse {
                    status: 200,
                    body: r#"{"statuses": {"remote_ep": {"status": "UP", "last_check_ts": 1}}}"#
                        .to_string(),
                })
            })
        });

        let (engine, state) = engine_with(&config, mock);
        engine.run_cycle().await;

        let state = state.read().await;
        let statuses = &state.clients["peer"].statuses;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses["remote_ep"].status, EndpointStatus::Up);
        // The remote's own timestamp is replaced with local time.
        assert!(statuses["remote_ep"].last_check_ts > 1);
    }

    #[tokio::test]
    async fn linked_fetch_failure_marks_known_endpoints_error() {
        let config = config(
            r#"{
                "clients": {
                    "peer": {
                        "settings": {"name": "Peer", "client_type": "linked",
                                     "remote_url": "http://peer", "api_token": "t"}
                    }
                }
            }"#,
        );
        let mut mock = MockHttpClient::new();
        mock.expect_get_bearer()
            .returning(|_, _, _| Box::pin(async { Err(HttpError::Connect) }));

        let (engine, state) = engine_with(&config, mock);

        // Seed two known endpoints from an earlier successful fetch.
        {
            let mut state = state.write().await;
            let client = state.clients.get_mut("peer").unwrap();
            for id in ["remote_a", "remote_b"] {
                client
                    .statuses
                    .insert(id.to_string(), LiveStatus::pending());
            }
        }

        engine.run_cycle().await;

        let state = state.read().await;
        let statuses = &state.clients["peer"].statuses;
        assert_eq!(statuses.len(), 2);
        for status in statuses.values() {
            assert_eq!(status.status, EndpointStatus::Error);
            let message = status.details.as_ref().unwrap().message.as_deref().unwrap();
            assert_eq!(message, "Link Error: Connection error");
        }
        drop(state);

        // Remote-fetched data never reaches the history store.
        assert!(engine
            .store
            .distinct_endpoint_ids()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn misconfigured_link_reports_error_without_network_call() {
        let config = config(
            r#"{
                "clients": {
                    "peer": {
                        "settings": {"name": "Peer", "client_type": "linked"}
                    }
                }
            }"#,
        );
        // No expectations: any HTTP call would fail the test.
        let mock = MockHttpClient::new();
        let (engine, state) = engine_with(&config, mock);

        {
            let mut state = state.write().await;
            state
                .clients
                .get_mut("peer")
                .unwrap()
                .statuses
                .insert("remote_a".to_string(), LiveStatus::pending());
        }

        engine.run_cycle().await;

        let state = state.read().await;
        let status = &state.clients["peer"].statuses["remote_a"];
        assert_eq!(status.status, EndpointStatus::Error);
        assert!(status
            .details
            .as_ref()
            .unwrap()
            .message
            .as_deref()
            .unwrap()
            .starts_with("Link Error:"));
    }

    #[tokio::test]
    async fn disabled_store_still_updates_live_state() {
        let mut mock = MockHttpClient::new();
        mock.expect_get()
            .returning(|_, _| Box::pin(async { Ok(ok_response()) }));

        let config = local_client_config();
        let state = new_state_handle(&config);
        let engine = Engine::new(
            Arc::clone(&state),
            Arc::new(HistoryStore::disabled()),
            Arc::new(mock),
            CancellationToken::new(),
        );
        engine.run_cycle().await;

        let state = state.read().await;
        assert_eq!(
            state.clients["c1"].statuses["ep_1"].status,
            EndpointStatus::Up
        );
    }
}
