//! Backend Selection Strategies
//!
//! Pure domain logic for choosing a backend for a new client.
//! Every strategy first drops candidates that are disabled or full, so the
//! capacity invariant holds no matter what the caller passes in.

use crate::domain::entities::{Backend, SelectionCriteria};
use crate::domain::errors::{FleetError, Result};
use crate::domain::ports::SelectionStrategy;
use crate::domain::value_objects::StrategyKind;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Candidates that may be chosen at all, in input order.
fn eligible(candidates: &[Backend]) -> Vec<&Backend> {
    candidates.iter().filter(|b| b.is_available()).collect()
}

fn by_load(a: &&Backend, b: &&Backend) -> Ordering {
    a.load_ratio()
        .partial_cmp(&b.load_ratio())
        .unwrap_or(Ordering::Equal)
}

/// Least loaded backend; ties keep input order.
fn least_loaded(mut pool: Vec<&Backend>) -> Result<Backend> {
    // sort_by is stable, so equal loads keep their input order
    pool.sort_by(by_load);
    pool.first()
        .map(|b| (*b).clone())
        .ok_or(FleetError::NoAvailableServer)
}

/// Picks the backend with the lowest `current_clients / capacity`.
#[derive(Debug, Default)]
pub struct LeastLoadStrategy;

impl SelectionStrategy for LeastLoadStrategy {
    fn select(&self, candidates: &[Backend], _criteria: &SelectionCriteria) -> Result<Backend> {
        least_loaded(eligible(candidates))
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastLoad
    }
}

/// Cycles through candidates with one shared cursor.
///
/// Candidates are ordered by backend id before indexing, so the cycle is
/// stable even when callers pass the list in a different order each time.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobinStrategy {
    fn select(&self, candidates: &[Backend], _criteria: &SelectionCriteria) -> Result<Backend> {
        let mut pool = eligible(candidates);
        if pool.is_empty() {
            return Err(FleetError::NoAvailableServer);
        }
        pool.sort_by(|a, b| a.id.cmp(&b.id));

        let index = self.cursor.fetch_add(1, AtomicOrdering::SeqCst) % pool.len();
        Ok(pool[index].clone())
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }
}

/// Uniform random pick.
#[derive(Debug, Default)]
pub struct RandomStrategy;

impl SelectionStrategy for RandomStrategy {
    fn select(&self, candidates: &[Backend], _criteria: &SelectionCriteria) -> Result<Backend> {
        let pool = eligible(candidates);
        pool.choose(&mut rand::thread_rng())
            .map(|b| (*b).clone())
            .ok_or(FleetError::NoAvailableServer)
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Random
    }
}

/// Least-load within the requested region.
///
/// Falls back to least-load over every candidate when no region is
/// requested or nothing matches it.
#[derive(Debug, Default)]
pub struct GeographicStrategy;

impl SelectionStrategy for GeographicStrategy {
    fn select(&self, candidates: &[Backend], criteria: &SelectionCriteria) -> Result<Backend> {
        let pool = eligible(candidates);

        if let Some(region) = criteria.region.as_deref().filter(|r| !r.is_empty()) {
            let regional: Vec<&Backend> =
                pool.iter().copied().filter(|b| b.in_region(region)).collect();
            if !regional.is_empty() {
                return least_loaded(regional);
            }
            tracing::debug!("no backend in region {}, using least load", region);
        }

        least_loaded(pool)
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Geographic
    }
}

/// Lowest declared priority value wins, load breaks ties.
///
/// Backends without a declared priority rank after all that have one.
/// When no candidate declares a priority this falls back to least-load.
#[derive(Debug, Default)]
pub struct PriorityStrategy;

impl SelectionStrategy for PriorityStrategy {
    fn select(&self, candidates: &[Backend], _criteria: &SelectionCriteria) -> Result<Backend> {
        let mut pool = eligible(candidates);

        if !pool.iter().any(|b| b.priority.is_some()) {
            tracing::debug!("no candidate declares a priority, using least load");
            return least_loaded(pool);
        }

        pool.sort_by(|a, b| {
            let pa = a.priority.unwrap_or(u32::MAX);
            let pb = b.priority.unwrap_or(u32::MAX);
            pa.cmp(&pb).then_with(|| by_load(a, b))
        });
        pool.first()
            .map(|b| (*b).clone())
            .ok_or(FleetError::NoAvailableServer)
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Priority
    }
}

/// Every strategy keyed by name. Built once and never mutated.
pub struct StrategySet {
    strategies: HashMap<StrategyKind, Arc<dyn SelectionStrategy>>,
}

impl StrategySet {
    /// Register all five built-in strategies.
    pub fn builtin() -> Self {
        let mut strategies: HashMap<StrategyKind, Arc<dyn SelectionStrategy>> = HashMap::new();
        strategies.insert(StrategyKind::LeastLoad, Arc::new(LeastLoadStrategy));
        strategies.insert(StrategyKind::RoundRobin, Arc::new(RoundRobinStrategy::new()));
        strategies.insert(StrategyKind::Random, Arc::new(RandomStrategy));
        strategies.insert(StrategyKind::Geographic, Arc::new(GeographicStrategy));
        strategies.insert(StrategyKind::Priority, Arc::new(PriorityStrategy));
        Self { strategies }
    }

    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn SelectionStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    /// Resolve a configured strategy name.
    ///
    /// Unknown names resolve to least-load; the second tuple element is
    /// `true` when that fallback was taken.
    pub fn resolve(&self, name: &str) -> (Arc<dyn SelectionStrategy>, bool) {
        match StrategyKind::parse(name).and_then(|kind| self.get(kind)) {
            Some(strategy) => (strategy, false),
            None => (Arc::new(LeastLoadStrategy), true),
        }
    }
}
