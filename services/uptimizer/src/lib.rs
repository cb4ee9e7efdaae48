//! Uptimizer - multi-tenant uptime monitor
//!
//! Probes HTTP endpoints per client, fetches linked peers' statuses, and
//! serves live status and uptime statistics.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod probe;
pub mod remote;
pub mod state;
pub mod stats;
pub mod status;
pub mod store;

pub use config::{load_config, Config};
pub use error::{Result, UptimizerError};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use up_auth::StaticTokenVerifier;

use crate::engine::Engine;
use crate::io::ReqwestHttpClient;
use crate::store::HistoryStore;

/// Run the uptimizer service with the given configuration
pub async fn run(config: Config) -> Result<()> {
    let http: Arc<dyn io::HttpClient> = Arc::new(ReqwestHttpClient::new()?);
    let cancel = CancellationToken::new();

    // A store that cannot be opened degrades statistics, not monitoring.
    let store = if config.history.enabled {
        match HistoryStore::open(&config.history.db_path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(
                    "Failed to open history store at {:?}: {}. Continuing without history.",
                    config.history.db_path,
                    e
                );
                Arc::new(HistoryStore::disabled())
            }
        }
    } else {
        tracing::info!("History store disabled by configuration");
        Arc::new(HistoryStore::disabled())
    };

    if store.is_ready() {
        report_orphaned_history(&config, &store).await;
    }

    let state = state::new_state_handle(&config);

    let engine = Engine::new(
        Arc::clone(&state),
        Arc::clone(&store),
        http,
        cancel.clone(),
    );

    // Setup shutdown handler
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl-c");
        tracing::info!("Shutdown signal received");
        cancel_for_signal.cancel();
    });

    // Start the status API if enabled
    if config.api.enabled {
        let api_port = config.api.port;
        let api_state = Arc::clone(&state);
        let api_store = Arc::clone(&store);
        let verifier = Arc::new(StaticTokenVerifier::new(config.api_tokens()));
        let cancel_for_api = cancel.clone();

        tokio::spawn(async move {
            let router = api::build_router(api_state, api_store, verifier);
            let addr = SocketAddr::from(([0, 0, 0, 0], api_port));
            tracing::info!("Status API listening on http://{}", addr);

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(
                        "Failed to bind status API to port {}: {}. Continuing without API.",
                        api_port,
                        e
                    );
                    return;
                }
            };

            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    cancel_for_api.cancelled().await;
                })
                .await
                .ok();

            tracing::debug!("Status API stopped");
        });
    }

    tracing::info!("Uptimizer engine started");

    // Run the check loop (blocks until cancelled); the first cycle runs
    // immediately.
    engine.run().await;

    tracing::info!("Uptimizer engine stopped");

    Ok(())
}

/// Point out history rows whose endpoint no longer exists in the
/// configuration; they linger until purged via the API.
async fn report_orphaned_history(config: &Config, store: &store::HistoryStore) {
    let configured: std::collections::HashSet<&str> = config
        .clients
        .values()
        .flat_map(|client| client.endpoints.iter().map(|ep| ep.id.as_str()))
        .collect();

    match store.distinct_endpoint_ids().await {
        Ok(recorded) => {
            for endpoint_id in recorded {
                if !configured.contains(endpoint_id.as_str()) {
                    tracing::info!(
                        "History contains rows for unknown endpoint '{}'; delete via DELETE /api/history/{}",
                        endpoint_id,
                        endpoint_id
                    );
                }
            }
        }
        Err(e) => tracing::debug!("Could not enumerate recorded endpoints: {}", e),
    }
}
