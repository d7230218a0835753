//! Selection Strategy Port
//!
//! Defines the interface for picking one backend out of a candidate list.

use crate::domain::entities::{Backend, SelectionCriteria};
use crate::domain::errors::Result;
use crate::domain::value_objects::StrategyKind;

/// Policy choosing one backend for a new client.
///
/// Implementations are pure apart from round-robin's cursor and random's
/// RNG. An empty (or fully ineligible) candidate list yields
/// `FleetError::NoAvailableServer`.
pub trait SelectionStrategy: Send + Sync {
    /// Pick a backend.
    fn select(&self, candidates: &[Backend], criteria: &SelectionCriteria) -> Result<Backend>;

    /// Name this strategy is registered under.
    fn kind(&self) -> StrategyKind;
}
