//! Fleet Health Monitor
//!
//! Probes every enabled backend concurrently: a login measures latency and
//! reachability, then the enabled remote clients are counted to derive load.
//! Probes run on demand and, once started, on a fixed interval.

use crate::domain::entities::{Backend, HealthSnapshot};
use crate::domain::errors::{FleetError, Result};
use crate::domain::ports::{BackendRepository, PanelClient};
use crate::infrastructure::panel_registry::PanelRegistry;
use crate::infrastructure::shutdown::ShutdownController;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Default interval between background probes.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Result of probing one backend.
struct ProbeOutcome {
    snapshot: HealthSnapshot,
    /// Login failure, kept typed for callers that fail hard
    login_error: Option<FleetError>,
}

/// State shared between the monitor handle and its background loop.
struct MonitorCore {
    backends: Arc<dyn BackendRepository>,
    panels: Arc<PanelRegistry>,
    /// Latest snapshot per backend id
    latest: RwLock<HashMap<String, HealthSnapshot>>,
}

impl MonitorCore {
    async fn probe_all(&self) -> HashMap<String, HealthSnapshot> {
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
        let previous = self.latest.read().await.clone();

        let mut ids = Vec::with_capacity(backends.len());
        let mut tasks = Vec::with_capacity(backends.len());
        for backend in backends {
            let panel = panels.get(&backend.id).cloned();
            let prior_errors = previous.get(&backend.id).map(|s| s.error_count).unwrap_or(0);
            ids.push(backend.id.clone());
            tasks.push(tokio::spawn(async move {
                match panel {
                    Some(panel) => Some(probe_backend(&backend, panel.as_ref(), prior_errors).await),
                    None => None,
                }
            }));
        }

        let mut fresh = HashMap::with_capacity(ids.len());
        for (id, joined) in ids.into_iter().zip(join_all(tasks).await) {
            let snapshot = match joined {
                Ok(Some(outcome)) => outcome.snapshot,
                Ok(None) | Err(_) => match previous.get(&id) {
                    Some(prior) => prior.clone(),
                    None => HealthSnapshot::down(&id, "probe could not run".to_string(), 0, 1),
                },
            };
            log_transition(previous.get(&id), &snapshot);
            fresh.insert(id, snapshot);
        }

        *self.latest.write().await = fresh.clone();
        fresh
    }

    async fn check_backend(&self, backend_id: &str) -> Result<HealthSnapshot> {
        let (backend, panel) = {
            let _generation = self.panels.consistent().await;
            let backend = self
                .backends
                .get_by_id(backend_id)
                .await
                .ok_or_else(|| FleetError::UnknownBackend(backend_id.to_string()))?;
            let panel = self
                .panels
                .get(backend_id)
                .ok_or_else(|| FleetError::UnknownBackend(backend_id.to_string()))?;
            (backend, panel)
        };

        let prior = self.latest.read().await.get(backend_id).cloned();
        let prior_errors = prior.as_ref().map(|s| s.error_count).unwrap_or(0);

        let outcome = probe_backend(&backend, panel.as_ref(), prior_errors).await;
        log_transition(prior.as_ref(), &outcome.snapshot);
        self.latest
            .write()
            .await
            .insert(backend_id.to_string(), outcome.snapshot.clone());

        match outcome.login_error {
            Some(e) => Err(e),
            None => Ok(outcome.snapshot),
        }
    }
}

/// Probe one backend: login first, then occupancy.
async fn probe_backend(backend: &Backend, panel: &dyn PanelClient, prior_errors: u32) -> ProbeOutcome {
    let start = Instant::now();
    let login = panel.authenticate().await;
    let latency_ms = start.elapsed().as_millis() as u64;

    if let Err(e) = login {
        return ProbeOutcome {
            snapshot: HealthSnapshot::down(
                &backend.id,
                e.to_string(),
                latency_ms,
                prior_errors.saturating_add(1),
            ),
            login_error: Some(e),
        };
    }

    let snapshot = match panel.active_client_count().await {
        Ok(active) => HealthSnapshot::up(&backend.id, latency_ms, Some(active), backend.capacity),
        Err(e) => {
            tracing::debug!("backend {}: occupancy unavailable: {}", backend.id, e);
            let mut snapshot = HealthSnapshot::up(&backend.id, latency_ms, None, backend.capacity);
            snapshot.last_error = Some(e.to_string());
            snapshot
        }
    };

    ProbeOutcome {
        snapshot,
        login_error: None,
    }
}

fn log_transition(prior: Option<&HealthSnapshot>, current: &HealthSnapshot) {
    let was_healthy = prior.map(|s| s.healthy).unwrap_or(true);
    match (was_healthy, current.healthy) {
        (true, false) => tracing::warn!(
            "backend {} is now unhealthy: {}",
            current.backend_id,
            current.last_error.as_deref().unwrap_or("unknown error")
        ),
        (false, true) => tracing::info!("backend {} is now healthy", current.backend_id),
        _ => {}
    }
}

/// Running background loop.
struct MonitorLoop {
    stop: ShutdownController,
    handle: JoinHandle<()>,
}

/// Health monitor for the whole fleet.
pub struct HealthMonitor {
    core: Arc<MonitorCore>,
    interval: Duration,
    running: parking_lot::Mutex<Option<MonitorLoop>>,
}

impl HealthMonitor {
    pub fn new(
        backends: Arc<dyn BackendRepository>,
        panels: Arc<PanelRegistry>,
        interval: Duration,
    ) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                backends,
                panels,
                latest: RwLock::new(HashMap::new()),
            }),
            interval,
            running: parking_lot::Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe every enabled backend once, in parallel.
    ///
    /// Always returns an entry per enabled backend. A backend whose probe
    /// could not run keeps its previous snapshot.
    pub async fn probe_all(&self) -> HashMap<String, HealthSnapshot> {
        self.core.probe_all().await
    }

    /// Probe one backend. Unlike `probe_all`, a failed login is an error.
    pub async fn check_backend(&self, backend_id: &str) -> Result<HealthSnapshot> {
        self.core.check_backend(backend_id).await
    }

    /// Cached snapshots from the most recent probes.
    pub async fn latest(&self) -> HashMap<String, HealthSnapshot> {
        self.core.latest.read().await.clone()
    }

    pub async fn latest_for(&self, backend_id: &str) -> Option<HealthSnapshot> {
        self.core.latest.read().await.get(backend_id).cloned()
    }

    /// Start the background loop: probe now, then every interval.
    ///
    /// The loop ends when `shutdown` fires or `stop` is called.
    pub fn start(&self, shutdown: &ShutdownController) -> Result<()> {
        if self.interval.is_zero() {
            return Err(FleetError::Config(
                "health check interval must be positive".to_string(),
            ));
        }
        let mut running = self.running.lock();
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                return Err(FleetError::MonitorAlreadyRunning);
            }
        }

        let stop = ShutdownController::new();
        let mut stop_rx = stop.subscribe();
        let mut shutdown_rx = shutdown.subscribe();
        let already_shut = shutdown.is_shutdown();
        let core = self.core.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            if already_shut {
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // an in-flight health check is abandoned on stop or shutdown
                        tokio::select! {
                            snapshots = core.probe_all() => {
                                let healthy = snapshots.values().filter(|s| s.healthy).count();
                                tracing::debug!(
                                    "health probe done, healthy={}/{}",
                                    healthy,
                                    snapshots.len()
                                );
                            }
                            _ = stop_rx.recv() => break,
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                    _ = stop_rx.recv() => break,
                    _ = shutdown_rx.recv() => break,
                }
            }
            tracing::info!("health monitoring loop exited");
        });

        *running = Some(MonitorLoop { stop, handle });
        tracing::info!("health monitoring started, interval={:?}", interval);
        Ok(())
    }

    /// Stop the background loop and wait for it to exit. No-op when idle.
    pub async fn stop(&self) {
        let current = self.running.lock().take();
        if let Some(current) = current {
            current.stop.shutdown();
            if let Err(e) = current.handle.await {
                tracing::warn!("health monitoring loop ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|current| !current.handle.is_finished())
            .unwrap_or(false)
    }
}

/// `PartialFleet` naming the unhealthy backends of a probe, if any.
pub fn health_failures(snapshots: &HashMap<String, HealthSnapshot>) -> Option<FleetError> {
    let failed = snapshots
        .values()
        .filter(|s| !s.healthy)
        .map(|s| s.backend_id.clone())
        .collect();
    FleetError::partial(failed, snapshots.len())
}
