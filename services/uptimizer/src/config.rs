//! Configuration types for the uptimizer service

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHECK_INTERVAL: u64 = 30;
pub const DEFAULT_CHECK_TIMEOUT: u64 = 10;

/// Hard floor for any check interval, global or per-endpoint.
pub const MIN_CHECK_INTERVAL: u64 = 5;
/// Hard floor for any probe timeout.
pub const MIN_CHECK_TIMEOUT: u64 = 1;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global_settings: GlobalSettings,
    #[serde(default)]
    pub clients: HashMap<String, ClientConfig>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Global check cadence and timeout defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_check_timeout")]
    pub check_timeout_seconds: u64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            check_interval_seconds: default_check_interval(),
            check_timeout_seconds: default_check_timeout(),
        }
    }
}

/// Whether a client's endpoints are probed here or fetched from a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Local,
    Linked,
}

/// One tenant: its settings plus the endpoints it owns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub settings: ClientSettings,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_client_name")]
    pub name: String,
    #[serde(rename = "client_type", default = "default_client_kind")]
    pub kind: ClientKind,
    #[serde(default)]
    pub remote_url: Option<String>,
    /// Client id on the peer instance; defaults to the local client id.
    #[serde(default)]
    pub remote_client_id: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub api_enabled: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            kind: default_client_kind(),
            remote_url: None,
            remote_client_id: None,
            api_token: None,
            api_enabled: false,
        }
    }
}

/// One monitored HTTP endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_timeout_seconds: Option<u64>,
}

impl EndpointConfig {
    /// Override → floor → global fallback, per the documented resolution
    /// order.
    pub fn effective_interval(&self, global: &GlobalSettings) -> u64 {
        self.check_interval_seconds
            .unwrap_or(global.check_interval_seconds)
            .max(MIN_CHECK_INTERVAL)
    }

    pub fn effective_timeout(&self, global: &GlobalSettings) -> u64 {
        self.check_timeout_seconds
            .unwrap_or(global.check_timeout_seconds)
            .max(MIN_CHECK_TIMEOUT)
    }
}

/// History store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
        }
    }
}

/// Status API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL
}

fn default_check_timeout() -> u64 {
    DEFAULT_CHECK_TIMEOUT
}

fn default_client_name() -> String {
    "Default Client".to_string()
}

fn default_client_kind() -> ClientKind {
    ClientKind::Local
}

fn default_group() -> String {
    "Default Group".to_string()
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("uptimizer.db")
}

fn default_api_port() -> u16 {
    5000
}

impl Config {
    /// Clamp settings to their floors and clean up endpoint definitions.
    ///
    /// Endpoints without a name or URL are dropped; missing or duplicate
    /// ids get a generated one; linked clients keep no endpoint list.
    pub fn normalize(&mut self) {
        self.global_settings.check_interval_seconds = self
            .global_settings
            .check_interval_seconds
            .max(MIN_CHECK_INTERVAL);
        self.global_settings.check_timeout_seconds = self
            .global_settings
            .check_timeout_seconds
            .max(MIN_CHECK_TIMEOUT);

        let mut seen_ids = std::collections::HashSet::new();
        for (client_id, client) in &mut self.clients {
            if client.settings.kind == ClientKind::Linked {
                if !client.endpoints.is_empty() {
                    tracing::warn!(
                        "Client '{}' is linked but lists {} endpoints, ignoring them",
                        client_id,
                        client.endpoints.len()
                    );
                    client.endpoints.clear();
                }
                if client.settings.remote_url.as_deref().unwrap_or("").is_empty()
                    || client.settings.api_token.as_deref().unwrap_or("").is_empty()
                {
                    tracing::warn!(
                        "Linked client '{}' is missing remote_url or api_token, checks will report a link error",
                        client_id
                    );
                }
                continue;
            }

            client.endpoints.retain(|ep| {
                let keep = !ep.name.is_empty() && !ep.url.is_empty();
                if !keep {
                    tracing::warn!(
                        "Skipping endpoint without name/url in client '{}'",
                        client_id
                    );
                }
                keep
            });

            for ep in &mut client.endpoints {
                if ep.id.is_empty() || !seen_ids.insert(ep.id.clone()) {
                    let generated = format!("loaded_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
                    tracing::warn!(
                        "Generated unique id '{}' for endpoint '{}'",
                        generated,
                        ep.name
                    );
                    seen_ids.insert(generated.clone());
                    ep.id = generated;
                }
                if ep.group.is_empty() {
                    ep.group = default_group();
                }
                if let Some(interval) = ep.check_interval_seconds {
                    ep.check_interval_seconds = Some(interval.max(MIN_CHECK_INTERVAL));
                }
                if let Some(timeout) = ep.check_timeout_seconds {
                    ep.check_timeout_seconds = Some(timeout.max(MIN_CHECK_TIMEOUT));
                }
            }
        }
    }

    /// Client-id → token table for the exposed status API. Only local
    /// clients with API access enabled are listed.
    pub fn api_tokens(&self) -> HashMap<String, String> {
        self.clients
            .iter()
            .filter(|(_, client)| {
                client.settings.kind == ClientKind::Local && client.settings.api_enabled
            })
            .filter_map(|(id, client)| {
                client
                    .settings
                    .api_token
                    .as_ref()
                    .map(|token| (id.clone(), token.clone()))
            })
            .collect()
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::UptimizerError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let mut config: Config = serde_json::from_str(&content)?;
    config.normalize();
    Ok(config)
}
