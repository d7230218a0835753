//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the fleet domain.
//! They have no external dependencies and contain only business logic.

use crate::domain::value_objects::PanelKind;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Login credentials for one panel.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A remote VPN panel that can host provisioned clients.
///
/// Backends are loaded from configuration once. The only runtime mutation
/// is the recorded client count, which moves as provisioning succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    /// Unique identifier for this backend
    pub id: String,
    /// Human readable name
    pub name: String,
    /// REST dialect spoken by the panel
    pub kind: PanelKind,
    /// Base URL of the panel API (scheme + host + optional path prefix)
    pub base_url: String,
    pub credentials: Credentials,
    /// Disabled backends are never selected or probed
    pub enabled: bool,
    /// Lower value = higher precedence. `None` when not declared.
    pub priority: Option<u32>,
    /// Maximum number of clients (0 means the backend never has room)
    pub capacity: u32,
    /// Region tag used by geographic selection
    pub region: Option<String>,
    /// Clients currently recorded as provisioned on this backend
    pub current_clients: u32,
}

impl Backend {
    /// Fraction of capacity in use (0.0 = empty, 1.0 = full).
    pub fn load_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.current_clients as f64 / self.capacity as f64
    }

    /// Whether another client fits on this backend.
    pub fn has_capacity(&self) -> bool {
        self.current_clients < self.capacity
    }

    /// Whether strategies may choose this backend at all.
    pub fn is_available(&self) -> bool {
        self.enabled && self.has_capacity()
    }

    /// Case-insensitive region match.
    pub fn in_region(&self, region: &str) -> bool {
        self.region
            .as_deref()
            .map(|r| r.eq_ignore_ascii_case(region))
            .unwrap_or(false)
    }
}

/// An ingress group on a panel (XUI inbound, Marzban protocol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    /// Remark (XUI) or inbound tags (Marzban)
    pub remark: String,
    pub protocol: String,
    pub port: Option<u16>,
    pub enabled: bool,
}

/// A VPN account living on a remote panel.
///
/// The panel is the source of truth; callers only keep `id`/`uuid` as a
/// foreign key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteClient {
    /// Panel-side key (XUI client id, Marzban username)
    pub id: String,
    pub uuid: Option<String>,
    /// Email (XUI) or username (Marzban)
    pub email: String,
    /// Traffic quota in bytes, 0 = unlimited
    pub quota_bytes: u64,
    pub used_bytes: u64,
    /// Unix seconds, `None` = never expires
    pub expires_at: Option<i64>,
    pub enabled: bool,
    /// Panel status string when the panel reports one (active, disabled, limited...)
    pub status: Option<String>,
}

impl RemoteClient {
    /// Whether the expiry has passed at `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.expires_at {
            Some(at) if at > 0 => at <= now,
            _ => false,
        }
    }

    /// Whether the traffic quota is used up.
    pub fn is_quota_exhausted(&self) -> bool {
        self.quota_bytes > 0 && self.used_bytes >= self.quota_bytes
    }
}

/// Desired state of a remote client, sent on create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSpec {
    /// Email (XUI) or username (Marzban)
    pub user_key: String,
    /// Generated on create when absent
    pub uuid: Option<String>,
    /// 0 = unlimited
    pub quota_bytes: u64,
    /// Unix seconds, `None` = never
    pub expires_at: Option<i64>,
    pub enabled: bool,
    pub note: Option<String>,
}

impl ClientSpec {
    pub fn new(user_key: impl Into<String>) -> Self {
        Self {
            user_key: user_key.into(),
            uuid: None,
            quota_bytes: 0,
            expires_at: None,
            enabled: true,
            note: None,
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_quota_bytes(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Spec describing an existing client, used to toggle single fields.
    pub fn from_client(client: &RemoteClient) -> Self {
        Self {
            user_key: client.email.clone(),
            uuid: client.uuid.clone(),
            quota_bytes: client.quota_bytes,
            expires_at: client.expires_at,
            enabled: client.enabled,
            note: None,
        }
    }
}

/// Per-node traffic usage of one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub node: String,
    pub used_bytes: u64,
}

/// Traffic usage of one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientUsage {
    pub client_id: String,
    pub used_bytes: u64,
    pub nodes: Vec<NodeUsage>,
}

/// Point-in-time health of one backend.
///
/// Replaced wholesale on every probe; never patched field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub backend_id: String,
    pub healthy: bool,
    /// Wall clock of the probe, unix milliseconds
    pub last_check_ms: u64,
    /// Round trip of the login call
    pub latency_ms: u64,
    /// Consecutive failed probes
    pub error_count: u32,
    pub last_error: Option<String>,
    /// Active clients / capacity. `None` when occupancy could not be read.
    pub load_ratio: Option<f64>,
    pub active_clients: Option<u32>,
}

impl HealthSnapshot {
    /// Snapshot of a backend whose login failed.
    pub fn down(backend_id: &str, error: String, latency_ms: u64, error_count: u32) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            healthy: false,
            last_check_ms: unix_millis(),
            latency_ms,
            error_count,
            last_error: Some(error),
            load_ratio: Some(0.0),
            active_clients: Some(0),
        }
    }

    /// Snapshot of a reachable backend.
    pub fn up(backend_id: &str, latency_ms: u64, active_clients: Option<u32>, capacity: u32) -> Self {
        let load_ratio = active_clients.map(|active| {
            if capacity == 0 {
                0.0
            } else {
                active as f64 / capacity as f64
            }
        });
        Self {
            backend_id: backend_id.to_string(),
            healthy: true,
            last_check_ms: unix_millis(),
            latency_ms,
            error_count: 0,
            last_error: None,
            load_ratio,
            active_clients,
        }
    }
}

/// Aggregated client statistics of one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub backend_id: String,
    pub total_clients: u32,
    pub active_clients: u32,
    pub capacity: u32,
    /// total_clients / capacity * 100
    pub load_percentage: f64,
    pub quota_bytes: u64,
    pub used_bytes: u64,
    /// Set when the stats could not be collected
    pub error: Option<String>,
}

impl BackendStats {
    /// Aggregate stats from the full client list of a backend.
    pub fn from_clients(backend_id: &str, capacity: u32, clients: &[RemoteClient]) -> Self {
        let total_clients = clients.len() as u32;
        let active_clients = clients.iter().filter(|c| c.enabled).count() as u32;
        let load_percentage = if capacity == 0 {
            0.0
        } else {
            total_clients as f64 / capacity as f64 * 100.0
        };

        Self {
            backend_id: backend_id.to_string(),
            total_clients,
            active_clients,
            capacity,
            load_percentage,
            quota_bytes: clients.iter().map(|c| c.quota_bytes).sum(),
            used_bytes: clients.iter().map(|c| c.used_bytes).sum(),
            error: None,
        }
    }

    /// Placeholder entry for a backend whose stats failed.
    pub fn failed(backend_id: &str, capacity: u32, error: String) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            total_clients: 0,
            active_clients: 0,
            capacity,
            load_percentage: 0.0,
            quota_bytes: 0,
            used_bytes: 0,
            error: Some(error),
        }
    }
}

/// Constraints for one selection call. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub user_id: Option<i64>,
    pub region: Option<String>,
    pub exclude_ids: Vec<String>,
    /// Only backends whose declared priority value is at least this
    pub min_priority: Option<u32>,
    /// Only backends whose load ratio is at most this
    pub max_load: Option<f64>,
}

impl SelectionCriteria {
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Default::default()
        }
    }

    /// Whether a candidate passes the exclusion, priority and load filters.
    pub fn admits(&self, backend: &Backend) -> bool {
        if self.exclude_ids.iter().any(|id| id == &backend.id) {
            return false;
        }
        if let Some(min) = self.min_priority {
            match backend.priority {
                Some(p) if p >= min => {}
                _ => return false,
            }
        }
        if let Some(max) = self.max_load {
            if backend.load_ratio() > max {
                return false;
            }
        }
        true
    }
}

/// Current wall clock in unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current wall clock in unix seconds.
pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
