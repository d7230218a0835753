//! Shared test doubles for unit tests.

use crate::domain::entities::{Backend, ClientSpec, Credentials, RemoteClient, Target};
use crate::domain::errors::{FleetError, Result};
use crate::domain::ports::PanelClient;
use crate::domain::value_objects::PanelKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn create_backend(id: &str, current: u32, capacity: u32) -> Backend {
    Backend {
        id: id.to_string(),
        name: format!("Backend {}", id),
        kind: PanelKind::Xui,
        base_url: format!("http://{}.panel.test", id),
        credentials: Credentials::new("admin", "admin"),
        enabled: true,
        priority: None,
        capacity,
        region: None,
        current_clients: current,
    }
}

pub fn create_client(id: &str, enabled: bool, expires_at: Option<i64>) -> RemoteClient {
    RemoteClient {
        id: id.to_string(),
        uuid: Some(format!("uuid-{}", id)),
        email: format!("{}@vpn.local", id),
        quota_bytes: 0,
        used_bytes: 0,
        expires_at,
        enabled,
        status: None,
    }
}

/// Panel double keeping clients in memory under a single target `"1"`.
pub struct MockPanel {
    id: String,
    pub fail_login: AtomicBool,
    pub fail_listing: AtomicBool,
    pub logins: AtomicUsize,
    login_delay: Duration,
    clients: Mutex<Vec<RemoteClient>>,
}

impl MockPanel {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            fail_login: AtomicBool::new(false),
            fail_listing: AtomicBool::new(false),
            logins: AtomicUsize::new(0),
            login_delay: Duration::ZERO,
            clients: Mutex::new(Vec::new()),
        }
    }

    pub fn with_clients(self, clients: Vec<RemoteClient>) -> Self {
        *self.clients.lock() = clients;
        self
    }

    /// Every login sleeps this long before answering.
    pub fn with_login_delay(mut self, delay: Duration) -> Self {
        self.login_delay = delay;
        self
    }

    pub fn failing_login(self) -> Self {
        self.fail_login.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_listing(self) -> Self {
        self.fail_listing.store(true, Ordering::SeqCst);
        self
    }

    pub fn clients(&self) -> Vec<RemoteClient> {
        self.clients.lock().clone()
    }
}

#[async_trait]
impl PanelClient for MockPanel {
    fn backend_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> PanelKind {
        PanelKind::Xui
    }

    async fn authenticate(&self) -> Result<()> {
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(FleetError::auth(&self.id, "invalid credentials"));
        }
        self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_targets(&self) -> Result<Vec<Target>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(FleetError::Transport {
                backend: self.id.clone(),
                message: "connection reset".to_string(),
            });
        }
        Ok(vec![Target {
            id: "1".to_string(),
            remark: "main".to_string(),
            protocol: "vless".to_string(),
            port: Some(443),
            enabled: true,
        }])
    }

    async fn list_clients(&self, _target_id: &str) -> Result<Vec<RemoteClient>> {
        Ok(self.clients())
    }

    async fn get_client(&self, _target_id: &str, client_id: &str) -> Result<RemoteClient> {
        self.clients
            .lock()
            .iter()
            .find(|c| c.id == client_id)
            .cloned()
            .ok_or_else(|| FleetError::not_found(&self.id, format!("client {}", client_id)))
    }

    async fn add_client(&self, _target_id: &str, spec: &ClientSpec) -> Result<RemoteClient> {
        let mut clients = self.clients.lock();
        if clients.iter().any(|c| c.email == spec.user_key) {
            return Err(FleetError::rejected(&self.id, "duplicate email"));
        }
        let client = RemoteClient {
            id: spec.uuid.clone().unwrap_or_else(|| spec.user_key.clone()),
            uuid: spec.uuid.clone(),
            email: spec.user_key.clone(),
            quota_bytes: spec.quota_bytes,
            used_bytes: 0,
            expires_at: spec.expires_at,
            enabled: spec.enabled,
            status: None,
        };
        clients.push(client.clone());
        Ok(client)
    }

    async fn update_client(
        &self,
        _target_id: &str,
        client_id: &str,
        spec: &ClientSpec,
    ) -> Result<RemoteClient> {
        let mut clients = self.clients.lock();
        let client = clients
            .iter_mut()
            .find(|c| c.id == client_id)
            .ok_or_else(|| FleetError::not_found(&self.id, format!("client {}", client_id)))?;
        client.quota_bytes = spec.quota_bytes;
        client.expires_at = spec.expires_at;
        client.enabled = spec.enabled;
        Ok(client.clone())
    }

    async fn delete_client(&self, _target_id: &str, client_id: &str) -> Result<()> {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|c| c.id != client_id);
        if clients.len() == before {
            return Err(FleetError::not_found(&self.id, format!("client {}", client_id)));
        }
        Ok(())
    }
}
