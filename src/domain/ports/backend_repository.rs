//! Backend Repository Port
//!
//! Defines the interface for accessing the backend registry.
//! The registry is read-mostly: selections read it concurrently, and only
//! client-count changes and explicit reconfiguration write to it.

use crate::domain::entities::Backend;
use async_trait::async_trait;

/// Repository for accessing backend configuration and occupancy.
#[async_trait]
pub trait BackendRepository: Send + Sync {
    /// Get all configured backends (including disabled ones), ordered by id.
    async fn get_all(&self) -> Vec<Backend>;

    /// Get a specific backend by ID.
    async fn get_by_id(&self, id: &str) -> Option<Backend>;

    /// Get enabled backends with free capacity, ordered by id.
    async fn get_available(&self) -> Vec<Backend>;

    /// Record one more client on a backend. Returns the new count.
    async fn increment_clients(&self, id: &str) -> Option<u32>;

    /// Record one client fewer on a backend (never below zero).
    async fn decrement_clients(&self, id: &str) -> Option<u32>;

    /// Replace the whole registry in one step.
    async fn replace_all(&self, backends: Vec<Backend>);
}
