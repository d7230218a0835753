//! Panel Client Port
//!
//! Defines the interface for talking to one remote VPN panel.
//! Implementations speak a concrete REST dialect (3X-UI, Marzban).

use crate::domain::entities::{ClientSpec, ClientUsage, RemoteClient, Target};
use crate::domain::errors::{FleetError, Result};
use crate::domain::value_objects::PanelKind;
use async_trait::async_trait;
use std::collections::HashSet;

/// Client for one backend panel.
///
/// Every operation obtains a valid session token first. An unauthorized
/// response triggers exactly one re-login and one replay of the request;
/// a second unauthorized response surfaces as `FleetError::Authentication`.
#[async_trait]
pub trait PanelClient: Send + Sync {
    /// Backend this client talks to.
    fn backend_id(&self) -> &str;

    /// REST dialect of the backend.
    fn kind(&self) -> PanelKind;

    /// Perform a fresh login and cache the resulting session.
    async fn authenticate(&self) -> Result<()>;

    /// List ingress targets (inbounds / protocols).
    async fn list_targets(&self) -> Result<Vec<Target>>;

    /// List remote clients grouped under one target.
    async fn list_clients(&self, target_id: &str) -> Result<Vec<RemoteClient>>;

    /// All clients on the backend, deduplicated by id.
    ///
    /// Targets whose listing fails are skipped; only a failure to list the
    /// targets themselves is an error.
    async fn list_all_clients(&self) -> Result<Vec<RemoteClient>> {
        let targets = self.list_targets().await?;
        let mut seen = HashSet::new();
        let mut clients = Vec::new();

        for target in targets {
            match self.list_clients(&target.id).await {
                Ok(batch) => {
                    for client in batch {
                        if seen.insert(client.id.clone()) {
                            clients.push(client);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        "backend {}: skipping target {}: {}",
                        self.backend_id(),
                        target.id,
                        e
                    );
                }
            }
        }

        Ok(clients)
    }

    /// Number of enabled clients on the backend.
    async fn active_client_count(&self) -> Result<u32> {
        let clients = self.list_all_clients().await?;
        Ok(clients.iter().filter(|c| c.enabled).count() as u32)
    }

    /// Fetch one client. Missing clients are `FleetError::NotFound`.
    async fn get_client(&self, target_id: &str, client_id: &str) -> Result<RemoteClient>;

    /// Create a client under a target.
    async fn add_client(&self, target_id: &str, spec: &ClientSpec) -> Result<RemoteClient>;

    /// Replace quota/expiry/enabled state of an existing client.
    async fn update_client(
        &self,
        target_id: &str,
        client_id: &str,
        spec: &ClientSpec,
    ) -> Result<RemoteClient>;

    /// Remove a client. Missing clients are `FleetError::NotFound`;
    /// callers decide whether that counts as success.
    async fn delete_client(&self, target_id: &str, client_id: &str) -> Result<()>;

    /// Traffic usage of one client.
    async fn client_usage(&self, target_id: &str, client_id: &str) -> Result<ClientUsage> {
        let client = self.get_client(target_id, client_id).await?;
        Ok(ClientUsage {
            client_id: client.id,
            used_bytes: client.used_bytes,
            nodes: Vec::new(),
        })
    }

    /// Zero the used-traffic counter of one client.
    async fn reset_client_traffic(&self, _target_id: &str, _client_id: &str) -> Result<()> {
        Err(FleetError::unsupported(self.backend_id(), "reset_client_traffic"))
    }

    /// Panel-reported system information.
    async fn system_info(&self) -> Result<serde_json::Value> {
        Err(FleetError::unsupported(self.backend_id(), "system_info"))
    }
}
