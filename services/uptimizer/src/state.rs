//! Shared live state: the single source of truth for current statuses

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::{ClientKind, ClientSettings, Config, EndpointConfig, GlobalSettings};
use crate::status::LiveStatus;

/// One client's live view: settings, owned endpoints, current statuses
#[derive(Debug, Clone)]
pub struct ClientState {
    pub settings: ClientSettings,
    pub endpoints: Vec<EndpointConfig>,
    pub statuses: HashMap<String, LiveStatus>,
}

/// The in-memory state shared between the cycle runner and the API.
///
/// All mutation goes through [`SharedState::apply`]; the cycle runner
/// reads a consistent copy via [`SharedState::snapshot`]. The lock is
/// never held across network or store I/O.
#[derive(Debug)]
pub struct SharedState {
    pub global_settings: GlobalSettings,
    pub clients: HashMap<String, ClientState>,
    pub last_updated: u64,
}

impl SharedState {
    /// Build the initial state from configuration. Every known endpoint
    /// starts with exactly one PENDING status entry.
    pub fn from_config(config: &Config) -> Self {
        let clients = config
            .clients
            .iter()
            .map(|(id, client)| {
                let statuses = client
                    .endpoints
                    .iter()
                    .map(|ep| (ep.id.clone(), LiveStatus::pending()))
                    .collect();
                (
                    id.clone(),
                    ClientState {
                        settings: client.settings.clone(),
                        endpoints: client.endpoints.clone(),
                        statuses,
                    },
                )
            })
            .collect();

        Self {
            global_settings: config.global_settings.clone(),
            clients,
            last_updated: 0,
        }
    }

    /// Consistent copy of everything one check cycle needs. Cheap enough
    /// to take under the lock; the lock is released before any I/O.
    pub fn snapshot(&self) -> CycleSnapshot {
        let clients = self
            .clients
            .iter()
            .map(|(id, client)| ClientSnapshot {
                id: id.clone(),
                kind: client.settings.kind,
                remote_url: client.settings.remote_url.clone(),
                remote_client_id: client
                    .settings
                    .remote_client_id
                    .clone()
                    .unwrap_or_else(|| id.clone()),
                api_token: client.settings.api_token.clone(),
                endpoints: client.endpoints.clone(),
                last_checks: client
                    .statuses
                    .iter()
                    .map(|(ep_id, status)| (ep_id.clone(), status.last_check_ts))
                    .collect(),
            })
            .collect();

        CycleSnapshot {
            global: self.global_settings.clone(),
            clients,
        }
    }

    /// Apply one cycle's accumulated results in a single critical
    /// section; readers never observe a half-applied cycle.
    pub fn apply(&mut self, batch: StatusBatch, now: u64) {
        for (client_id, statuses) in batch.client_replacements {
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.statuses = statuses;
            }
        }
        for (client_id, endpoint_id, status) in batch.endpoint_updates {
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.statuses.insert(endpoint_id, status);
            }
        }
        self.last_updated = now;
    }
}

/// Per-cycle copy of the state, taken under the lock
#[derive(Debug, Clone)]
pub struct CycleSnapshot {
    pub global: GlobalSettings,
    pub clients: Vec<ClientSnapshot>,
}

#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    pub id: String,
    pub kind: ClientKind,
    pub remote_url: Option<String>,
    /// Client id to request on the peer; defaults to our own client id.
    pub remote_client_id: String,
    pub api_token: Option<String>,
    pub endpoints: Vec<EndpointConfig>,
    /// endpoint id → last_check_ts; the key set is the set of endpoints
    /// currently known for the client.
    pub last_checks: HashMap<String, u64>,
}

/// One cycle's accumulated results, applied atomically
#[derive(Debug, Default)]
pub struct StatusBatch {
    /// Individual local probe outcomes: (client id, endpoint id, status)
    pub endpoint_updates: Vec<(String, String, LiveStatus)>,
    /// Wholesale linked-client replacements: (client id, statuses)
    pub client_replacements: Vec<(String, HashMap<String, LiveStatus>)>,
}

impl StatusBatch {
    pub fn is_empty(&self) -> bool {
        self.endpoint_updates.is_empty() && self.client_replacements.is_empty()
    }
}

/// Thread-safe shared state handle
pub type StateHandle = Arc<RwLock<SharedState>>;

pub fn new_state_handle(config: &Config) -> StateHandle {
    Arc::new(RwLock::new(SharedState::from_config(config)))
}
