//! panel-fleet Library
//!
//! Backend selection, client provisioning and health monitoring over a
//! fleet of remote VPN panels (3x-ui and Marzban).

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use application::{stats_failures, FleetManager, FleetOptions};
pub use config::{load_config, FleetConfig};
pub use domain::entities::{
    Backend, BackendStats, ClientSpec, ClientUsage, Credentials, HealthSnapshot, RemoteClient,
    SelectionCriteria, Target,
};
pub use domain::errors::{FleetError, Result};
pub use domain::ports::{BackendRepository, PanelClient, SelectionStrategy};
pub use domain::value_objects::{PanelKind, StrategyKind};
pub use infrastructure::{health_failures, ShutdownController};
