//! Status API: live snapshots, statistics, history, and the
//! authenticated per-client status export consumed by linked peers

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use up_auth::{authorize_client, AuthError, TokenVerifier};

use crate::config::ClientKind;
use crate::error::UptimizerError;
use crate::state::StateHandle;
use crate::stats;
use crate::store::HistoryStore;

/// API application state
#[derive(Clone)]
pub struct ApiState {
    pub state: StateHandle,
    pub store: Arc<HistoryStore>,
    pub verifier: Arc<dyn TokenVerifier>,
}

/// Build the status API router
pub fn build_router(
    state: StateHandle,
    store: Arc<HistoryStore>,
    verifier: Arc<dyn TokenVerifier>,
) -> Router {
    let api_state = ApiState {
        state,
        store,
        verifier,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/statistics", get(statistics_handler))
        .route(
            "/api/history/{endpoint_id}",
            get(history_handler).delete(purge_handler),
        )
        .route("/api/v1/client/{client_id}/status", get(client_status_handler))
        .with_state(api_state)
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// Live snapshot of every client's statuses.
async fn status_handler(State(api): State<ApiState>) -> impl IntoResponse {
    let state = api.state.read().await;

    let clients: HashMap<String, serde_json::Value> = state
        .clients
        .iter()
        .map(|(id, client)| {
            (
                id.clone(),
                serde_json::json!({
                    "name": client.settings.name,
                    "client_type": client.settings.kind,
                    "statuses": client.statuses,
                }),
            )
        })
        .collect();

    Json(serde_json::json!({
        "clients": clients,
        "last_updated": state.last_updated,
    }))
}

/// 24h uptime for every local endpoint. Linked clients' statistics live
/// on their owning instance.
async fn statistics_handler(State(api): State<ApiState>) -> impl IntoResponse {
    let endpoint_ids: Vec<String> = {
        let state = api.state.read().await;
        state
            .clients
            .values()
            .filter(|client| client.settings.kind == ClientKind::Local)
            .flat_map(|client| client.endpoints.iter().map(|ep| ep.id.clone()))
            .collect()
    };

    if endpoint_ids.is_empty() {
        return (StatusCode::OK, Json(serde_json::json!({})));
    }

    if !api.store.is_ready() {
        let unavailable: HashMap<String, serde_json::Value> = endpoint_ids
            .into_iter()
            .map(|id| {
                (
                    id,
                    serde_json::json!({
                        "uptime_percentage_24h": null,
                        "error": "History store unavailable",
                    }),
                )
            })
            .collect();
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!(unavailable)),
        );
    }

    let mut results = HashMap::new();
    for endpoint_id in endpoint_ids {
        let entry = match stats::uptime_pct_24h(&api.store, &endpoint_id).await {
            Ok(pct) => serde_json::json!({
                "uptime_percentage_24h": pct,
                "error": null,
            }),
            Err(e) => serde_json::json!({
                "uptime_percentage_24h": null,
                "error": e.to_string(),
            }),
        };
        results.insert(endpoint_id, entry);
    }

    (StatusCode::OK, Json(serde_json::json!(results)))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default)]
    period: Option<String>,
}

/// Raw history samples for one endpoint over a period (1h, 24h, 7d).
async fn history_handler(
    State(api): State<ApiState>,
    Path(endpoint_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    // History is recorded for local probes only.
    let known_locally = {
        let state = api.state.read().await;
        state
            .clients
            .values()
            .filter(|client| client.settings.kind == ClientKind::Local)
            .any(|client| client.endpoints.iter().any(|ep| ep.id == endpoint_id))
    };
    if !known_locally {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "Unknown or non-local endpoint id",
                "data": [],
            })),
        );
    }

    if !api.store.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "History store unavailable",
                "data": [],
            })),
        );
    }

    let period = params.period.as_deref().unwrap_or("24h");
    let (start, end) = stats::period_window(period, Utc::now());

    match stats::history(&api.store, &endpoint_id, start, end).await {
        Ok(samples) => {
            let data: Vec<serde_json::Value> = samples
                .iter()
                .map(|sample| {
                    serde_json::json!({
                        "timestamp": sample.timestamp.to_rfc3339(),
                        "status": sample.status,
                        "response_time_ms": sample.response_time_ms,
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({"data": data, "error": null})),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": format!("History fetch error: {e}"),
                "data": [],
            })),
        ),
    }
}

/// Drop all history rows for one endpoint.
async fn purge_handler(
    State(api): State<ApiState>,
    Path(endpoint_id): Path<String>,
) -> impl IntoResponse {
    match api.store.purge(&endpoint_id).await {
        Ok(purged) => (
            StatusCode::OK,
            Json(serde_json::json!({"endpoint_id": endpoint_id, "purged": purged})),
        ),
        Err(UptimizerError::StoreUnavailable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "History store unavailable"})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

/// Authenticated status export for one client, consumed by linked peers.
async fn client_status_handler(
    State(api): State<ApiState>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = authorize_client(api.verifier.as_ref(), &headers, &client_id) {
        let code = match e {
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::WrongClient => StatusCode::FORBIDDEN,
        };
        return (code, Json(serde_json::json!({"error": e.to_string()})));
    }

    let state = api.state.read().await;
    let Some(client) = state.clients.get(&client_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Client not found"})),
        );
    };
    if !client.settings.api_enabled {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "API access not enabled for this client."})),
        );
    }

    tracing::debug!("Authenticated status request for client '{}'", client_id);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "client_id": client_id,
            "client_name": client.settings.name,
            "statuses": client.statuses,
            "last_updated": state.last_updated,
        })),
    )
}
