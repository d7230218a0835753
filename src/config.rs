use crate::domain::entities::{Backend, Credentials};
use crate::domain::errors::FleetError;
use crate::domain::value_objects::PanelKind;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const DEFAULT_STRATEGY: &str = "least_load";
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_TOKEN_TTL_SECS: u64 = 23 * 60 * 60;
const DEFAULT_CONFIG_PATH: &str = "fleet.json";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FleetConfig {
    // Selection
    pub selection_strategy: String,

    // Health monitoring
    pub health_check_interval_secs: u64,

    // Panel HTTP settings
    pub request_timeout_secs: u64,
    pub token_ttl_secs: u64,

    pub debug: bool,

    pub backends: Vec<BackendConfig>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            selection_strategy: DEFAULT_STRATEGY.to_string(),
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            debug: false,
            backends: Vec::new(),
        }
    }
}

/// One backend entry of the config file.
#[derive(Deserialize, Clone)]
pub struct BackendConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: PanelKind,
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub capacity: u32,
    #[serde(default)]
    pub region: Option<String>,
    /// Clients already provisioned when the process starts
    #[serde(default)]
    pub current_clients: u32,
}

fn default_enabled() -> bool {
    true
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("enabled", &self.enabled)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl BackendConfig {
    pub fn to_backend(&self) -> Backend {
        Backend {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            kind: self.kind,
            base_url: self.base_url.clone(),
            credentials: Credentials::new(self.username.clone(), self.password.clone()),
            enabled: self.enabled,
            priority: self.priority,
            capacity: self.capacity,
            region: self.region.clone(),
            current_clients: self.current_clients,
        }
    }
}

impl FleetConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn to_backends(&self) -> Vec<Backend> {
        self.backends.iter().map(BackendConfig::to_backend).collect()
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Numbers that do not parse fall back to their defaults.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(strategy) = lookup("FLEET_SELECTION_STRATEGY") {
            self.selection_strategy = strategy;
        }

        if let Some(v) = lookup("FLEET_HEALTH_CHECK_INTERVAL_SECS") {
            self.health_check_interval_secs = v.trim().parse().unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL_SECS);
        }

        if let Some(v) = lookup("FLEET_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v.trim().parse().unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        }

        if let Some(v) = lookup("FLEET_TOKEN_TTL_SECS") {
            self.token_ttl_secs = v.trim().parse().unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        }

        if lookup("DEBUG").is_some() {
            self.debug = true;
        }
    }

    /// Reject configurations the fleet cannot run with.
    pub fn validate(&self) -> Result<(), FleetError> {
        if self.health_check_interval_secs == 0 {
            return Err(FleetError::Config(
                "health_check_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(FleetError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.token_ttl_secs == 0 {
            return Err(FleetError::Config(
                "token_ttl_secs must be greater than zero".to_string(),
            ));
        }
        validate_backends(&self.to_backends())
    }
}

/// Backend ids must be non-empty and unique; every backend needs a URL.
pub fn validate_backends(backends: &[Backend]) -> Result<(), FleetError> {
    let mut seen = HashSet::new();
    for backend in backends {
        if backend.id.trim().is_empty() {
            return Err(FleetError::Config("backend id must not be empty".to_string()));
        }
        if !seen.insert(backend.id.as_str()) {
            return Err(FleetError::Config(format!("duplicate backend id: {}", backend.id)));
        }
        if backend.base_url.trim().is_empty() {
            return Err(FleetError::Config(format!(
                "backend {} has an empty base_url",
                backend.id
            )));
        }
    }
    Ok(())
}

/// Parse a config file.
pub fn load_config_file(path: &Path) -> anyhow::Result<FleetConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(cfg)
}

/// Load configuration from `FLEET_CONFIG_PATH` (default `fleet.json`) and the
/// environment.
///
/// A missing default file is not an error; a missing explicit path is.
pub fn load_config() -> anyhow::Result<FleetConfig> {
    let explicit = std::env::var("FLEET_CONFIG_PATH").ok();
    let path = explicit
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let mut cfg = if explicit.is_some() || Path::new(&path).exists() {
        load_config_file(Path::new(&path))?
    } else {
        FleetConfig::default()
    };

    cfg.apply_env(|key| std::env::var(key).ok());
    Ok(cfg)
}
