//! Infrastructure Layer
//!
//! Session caching, panel registry, health monitoring and shutdown.

pub mod auth_session;
pub mod health_monitor;
pub mod panel_registry;
pub mod shutdown;

pub use auth_session::{AuthSession, SessionState, DEFAULT_TOKEN_TTL};
pub use health_monitor::{health_failures, HealthMonitor, DEFAULT_CHECK_INTERVAL};
pub use panel_registry::{PanelMap, PanelRegistry};
pub use shutdown::{shutdown_signal, ShutdownController};
