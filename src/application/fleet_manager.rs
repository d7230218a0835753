//! Fleet Manager - Main application use case
//!
//! Orchestrates backend selection, client provisioning and health probing
//! across every configured panel. This is the interface callers use.

use crate::adapters::outbound::{build_panel, MemoryBackendRepository};
use crate::config::{validate_backends, FleetConfig};
use crate::domain::entities::{
    unix_seconds, Backend, BackendStats, ClientSpec, ClientUsage, HealthSnapshot, RemoteClient,
    SelectionCriteria, Target,
};
use crate::domain::errors::{FleetError, Result};
use crate::domain::ports::{BackendRepository, PanelClient, SelectionStrategy};
use crate::domain::services::StrategySet;
use crate::domain::value_objects::StrategyKind;
use crate::infrastructure::{
    HealthMonitor, PanelMap, PanelRegistry, ShutdownController, DEFAULT_CHECK_INTERVAL,
    DEFAULT_TOKEN_TTL,
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Settings the manager is built with.
#[derive(Debug, Clone)]
pub struct FleetOptions {
    /// Configured strategy name; unknown names fall back to least-load
    pub strategy: String,
    pub health_check_interval: Duration,
    pub token_ttl: Duration,
    /// Shared HTTP client for every panel (carries the request timeout)
    pub http: reqwest::Client,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default().as_str().to_string(),
            health_check_interval: DEFAULT_CHECK_INTERVAL,
            token_ttl: DEFAULT_TOKEN_TTL,
            http: reqwest::Client::new(),
        }
    }
}

impl FleetOptions {
    pub fn from_config(cfg: &FleetConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| FleetError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            strategy: cfg.selection_strategy.clone(),
            health_check_interval: cfg.health_check_interval(),
            token_ttl: cfg.token_ttl(),
            http,
        })
    }
}

/// Fleet manager - main application use case.
///
/// Owns the backend registry, one panel client per backend, the selection
/// strategies and the health monitor.
pub struct FleetManager {
    backends: Arc<dyn BackendRepository>,
    panels: Arc<PanelRegistry>,
    strategies: StrategySet,
    strategy: Arc<dyn SelectionStrategy>,
    monitor: HealthMonitor,
    http: reqwest::Client,
    token_ttl: Duration,
}

impl FleetManager {
    /// Create a fleet manager over an existing registry and panel map.
    pub fn new(backends: Arc<dyn BackendRepository>, panels: PanelMap, options: FleetOptions) -> Self {
        let strategies = StrategySet::builtin();
        let (strategy, fell_back) = strategies.resolve(&options.strategy);
        if fell_back {
            tracing::warn!(
                "unknown selection strategy '{}', falling back to {}",
                options.strategy,
                strategy.kind()
            );
        }

        let panels = Arc::new(PanelRegistry::new(panels));
        let monitor = HealthMonitor::new(
            backends.clone(),
            panels.clone(),
            options.health_check_interval,
        );

        Self {
            backends,
            panels,
            strategies,
            strategy,
            monitor,
            http: options.http,
            token_ttl: options.token_ttl,
        }
    }

    /// Build the whole fleet from configuration.
    pub fn from_config(cfg: &FleetConfig) -> Result<Self> {
        cfg.validate()?;
        let options = FleetOptions::from_config(cfg)?;
        let backends = cfg.to_backends();
        let panels = Self::build_panels(&backends, &options.http, options.token_ttl);

        tracing::info!(
            "fleet configured: backends={} strategy={}",
            backends.len(),
            cfg.selection_strategy
        );
        Ok(Self::new(
            Arc::new(MemoryBackendRepository::new(backends)),
            panels,
            options,
        ))
    }

    fn build_panels(backends: &[Backend], http: &reqwest::Client, token_ttl: Duration) -> PanelMap {
        backends
            .iter()
            .map(|b| (b.id.clone(), build_panel(b, http.clone(), token_ttl)))
            .collect()
    }

    fn panel(&self, backend_id: &str) -> Result<Arc<dyn PanelClient>> {
        self.panels
            .get(backend_id)
            .ok_or_else(|| FleetError::UnknownBackend(backend_id.to_string()))
    }

    /// Strategy actually in use after resolving the configured name.
    pub fn effective_strategy(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub async fn backends(&self) -> Vec<Backend> {
        self.backends.get_all().await
    }

    pub async fn backend(&self, backend_id: &str) -> Result<Backend> {
        self.backends
            .get_by_id(backend_id)
            .await
            .ok_or_else(|| FleetError::UnknownBackend(backend_id.to_string()))
    }

    // ===== Selection =====

    /// Pick a backend for a new client with the configured strategy.
    pub async fn select_backend(&self, criteria: &SelectionCriteria) -> Result<Backend> {
        self.select_with(self.strategy.as_ref(), criteria).await
    }

    /// Pick a backend with an explicit strategy instead of the configured one.
    pub async fn select_backend_with(
        &self,
        kind: StrategyKind,
        criteria: &SelectionCriteria,
    ) -> Result<Backend> {
        let strategy = self.strategies.get(kind).unwrap_or_else(|| self.strategy.clone());
        self.select_with(strategy.as_ref(), criteria).await
    }

    async fn select_with(
        &self,
        strategy: &dyn SelectionStrategy,
        criteria: &SelectionCriteria,
    ) -> Result<Backend> {
        let candidates: Vec<Backend> = self
            .backends
            .get_available()
            .await
            .into_iter()
            .filter(|b| criteria.admits(b))
            .collect();

        if candidates.is_empty() {
            tracing::warn!("no available backend for criteria {:?}", criteria);
            return Err(FleetError::NoAvailableServer);
        }

        let backend = strategy.select(&candidates, criteria)?;
        tracing::debug!(
            "selected backend {} via {} (load {:.2})",
            backend.id,
            strategy.kind(),
            backend.load_ratio()
        );
        Ok(backend)
    }

    // ===== Client Lifecycle =====

    /// Create a client and record it against the backend's count.
    pub async fn create_client(
        &self,
        backend_id: &str,
        target_id: &str,
        spec: &ClientSpec,
    ) -> Result<RemoteClient> {
        let panel = self.panel(backend_id)?;
        let mut spec = spec.clone();
        if spec.uuid.is_none() {
            spec.uuid = Some(uuid::Uuid::new_v4().to_string());
        }

        let client = panel.add_client(target_id, &spec).await?;
        let count = self.backends.increment_clients(backend_id).await;
        tracing::info!(
            "client {} created on backend {} (clients={})",
            client.id,
            backend_id,
            count.unwrap_or_default()
        );
        Ok(client)
    }

    pub async fn update_client(
        &self,
        backend_id: &str,
        target_id: &str,
        client_id: &str,
        spec: &ClientSpec,
    ) -> Result<RemoteClient> {
        self.panel(backend_id)?
            .update_client(target_id, client_id, spec)
            .await
    }

    /// Delete a client. An already absent client counts as deleted.
    pub async fn delete_client(&self, backend_id: &str, target_id: &str, client_id: &str) -> Result<()> {
        let panel = self.panel(backend_id)?;
        match panel.delete_client(target_id, client_id).await {
            Ok(()) => {
                self.backends.decrement_clients(backend_id).await;
                tracing::info!("client {} deleted from backend {}", client_id, backend_id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(
                    "client {} already absent from backend {}",
                    client_id,
                    backend_id
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_client(&self, backend_id: &str, target_id: &str, client_id: &str) -> Result<RemoteClient> {
        self.panel(backend_id)?.get_client(target_id, client_id).await
    }

    pub async fn list_targets(&self, backend_id: &str) -> Result<Vec<Target>> {
        self.panel(backend_id)?.list_targets().await
    }

    pub async fn list_clients(&self, backend_id: &str, target_id: &str) -> Result<Vec<RemoteClient>> {
        self.panel(backend_id)?.list_clients(target_id).await
    }

    pub async fn client_usage(&self, backend_id: &str, target_id: &str, client_id: &str) -> Result<ClientUsage> {
        self.panel(backend_id)?.client_usage(target_id, client_id).await
    }

    pub async fn reset_client_traffic(&self, backend_id: &str, target_id: &str, client_id: &str) -> Result<()> {
        self.panel(backend_id)?
            .reset_client_traffic(target_id, client_id)
            .await
    }

    pub async fn system_info(&self, backend_id: &str) -> Result<serde_json::Value> {
        self.panel(backend_id)?.system_info().await
    }

    // ===== Expiry Cleanup =====

    /// Disable every enabled client on a backend whose expiry has passed.
    ///
    /// Returns how many clients were disabled. Failures on single clients
    /// are logged and skipped.
    pub async fn deactivate_expired_clients(&self, backend_id: &str) -> Result<u32> {
        let panel = self.panel(backend_id)?;
        let now = unix_seconds();
        let targets = panel.list_targets().await?;

        let mut handled = HashSet::new();
        let mut disabled = 0;
        for target in targets {
            let clients = match panel.list_clients(&target.id).await {
                Ok(clients) => clients,
                Err(e) => {
                    tracing::warn!(
                        "backend {}: cannot list target {} for cleanup: {}",
                        backend_id,
                        target.id,
                        e
                    );
                    continue;
                }
            };

            for client in clients {
                if !client.enabled || !client.is_expired_at(now) || !handled.insert(client.id.clone()) {
                    continue;
                }
                let spec = ClientSpec::from_client(&client).with_enabled(false);
                match panel.update_client(&target.id, &client.id, &spec).await {
                    Ok(_) => {
                        disabled += 1;
                        tracing::info!("backend {}: disabled expired client {}", backend_id, client.id);
                    }
                    Err(e) => tracing::warn!(
                        "backend {}: failed to disable expired client {}: {}",
                        backend_id,
                        client.id,
                        e
                    ),
                }
            }
        }

        Ok(disabled)
    }

    /// Run the expiry cleanup on every enabled backend.
    pub async fn sweep_expired_clients(&self) -> HashMap<String, Result<u32>> {
        let ids: Vec<String> = self
            .backends
            .get_all()
            .await
            .into_iter()
            .filter(|b| b.enabled)
            .map(|b| b.id)
            .collect();

        let results = join_all(ids.iter().map(|id| self.deactivate_expired_clients(id))).await;
        ids.into_iter().zip(results).collect()
    }

    // ===== Health & Stats =====

    /// Probe one backend; a failed login is returned as an error.
    pub async fn backend_health(&self, backend_id: &str) -> Result<HealthSnapshot> {
        self.monitor.check_backend(backend_id).await
    }

    /// Probe every enabled backend. Always complete.
    pub async fn fleet_health(&self) -> HashMap<String, HealthSnapshot> {
        self.monitor.probe_all().await
    }

    /// Snapshots cached by the most recent probes.
    pub async fn latest_health(&self) -> HashMap<String, HealthSnapshot> {
        self.monitor.latest().await
    }

    pub async fn backend_stats(&self, backend_id: &str) -> Result<BackendStats> {
        let backend = self.backend(backend_id).await?;
        let panel = self.panel(backend_id)?;
        let clients = panel.list_all_clients().await?;
        Ok(BackendStats::from_clients(&backend.id, backend.capacity, &clients))
    }

    /// Stats for every enabled backend. Failing backends carry their error.
    pub async fn fleet_stats(&self) -> HashMap<String, BackendStats> {
        let (backends, panels) = {
            let _generation = self.panels.consistent().await;
            let backends: Vec<Backend> = self
                .backends
                .get_all()
                .await
                .into_iter()
                .filter(|b| b.enabled)
                .collect();
            (backends, self.panels.snapshot())
        };

        let mut ids = Vec::with_capacity(backends.len());
        let mut tasks = Vec::with_capacity(backends.len());
        for backend in backends {
            let panel = panels.get(&backend.id).cloned();
            ids.push((backend.id.clone(), backend.capacity));
            tasks.push(tokio::spawn(async move {
                let panel = panel.ok_or_else(|| FleetError::UnknownBackend(backend.id.clone()))?;
                let clients = panel.list_all_clients().await?;
                Ok::<_, FleetError>(BackendStats::from_clients(&backend.id, backend.capacity, &clients))
            }));
        }

        let mut stats = HashMap::with_capacity(ids.len());
        for ((id, capacity), joined) in ids.into_iter().zip(join_all(tasks).await) {
            let entry = match joined {
                Ok(Ok(entry)) => entry,
                Ok(Err(e)) => {
                    tracing::warn!("stats unavailable for backend {}: {}", id, e);
                    BackendStats::failed(&id, capacity, e.to_string())
                }
                Err(e) => BackendStats::failed(&id, capacity, format!("stats task failed: {}", e)),
            };
            stats.insert(id, entry);
        }
        stats
    }

    // ===== Monitoring =====

    pub fn start_health_monitoring(&self, shutdown: &ShutdownController) -> Result<()> {
        self.monitor.start(shutdown)
    }

    pub async fn stop_health_monitoring(&self) {
        self.monitor.stop().await
    }

    pub fn is_health_monitoring_active(&self) -> bool {
        self.monitor.is_running()
    }

    // ===== Reconfiguration =====

    /// Replace the whole fleet: registry and panel clients swap together.
    pub async fn reconfigure(&self, backends: Vec<Backend>) -> Result<()> {
        validate_backends(&backends)?;
        let panels = Self::build_panels(&backends, &self.http, self.token_ttl);
        let count = backends.len();

        self.panels
            .replace_with(panels, self.backends.replace_all(backends))
            .await;
        tracing::info!("fleet reconfigured, backends={}", count);
        Ok(())
    }
}

/// `PartialFleet` naming the backends whose stats failed, if any.
pub fn stats_failures(stats: &HashMap<String, BackendStats>) -> Option<FleetError> {
    let failed = stats
        .values()
        .filter(|s| s.error.is_some())
        .map(|s| s.backend_id.clone())
        .collect();
    FleetError::partial(failed, stats.len())
}
