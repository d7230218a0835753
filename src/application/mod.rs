//! Application Layer
//!
//! Use cases orchestrating the domain and its adapters.

mod fleet_manager;

pub use fleet_manager::{stats_failures, FleetManager, FleetOptions};
