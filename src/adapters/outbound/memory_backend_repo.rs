//! In-memory Backend Registry
//!
//! Implements BackendRepository over the configured backend list. The list
//! is loaded once at startup and only replaced by an explicit reconfigure.

use crate::domain::entities::Backend;
use crate::domain::ports::BackendRepository;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Backend registry held in process memory, kept sorted by id.
pub struct MemoryBackendRepository {
    backends: RwLock<Vec<Backend>>,
}

impl MemoryBackendRepository {
    pub fn new(mut backends: Vec<Backend>) -> Self {
        backends.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            backends: RwLock::new(backends),
        }
    }

    /// Apply `f` to the count of one backend. Returns the new count.
    async fn adjust(&self, id: &str, f: impl FnOnce(u32) -> u32) -> Option<u32> {
        let mut backends = self.backends.write().await;
        let backend = backends.iter_mut().find(|b| b.id == id)?;
        backend.current_clients = f(backend.current_clients);
        Some(backend.current_clients)
    }
}

impl Default for MemoryBackendRepository {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl BackendRepository for MemoryBackendRepository {
    async fn get_all(&self) -> Vec<Backend> {
        self.backends.read().await.clone()
    }

    async fn get_by_id(&self, id: &str) -> Option<Backend> {
        self.backends
            .read()
            .await
            .iter()
            .find(|b| b.id == id)
            .cloned()
    }

    async fn get_available(&self) -> Vec<Backend> {
        self.backends
            .read()
            .await
            .iter()
            .filter(|b| b.is_available())
            .cloned()
            .collect()
    }

    async fn increment_clients(&self, id: &str) -> Option<u32> {
        self.adjust(id, |n| n.saturating_add(1)).await
    }

    async fn decrement_clients(&self, id: &str) -> Option<u32> {
        self.adjust(id, |n| n.saturating_sub(1)).await
    }

    async fn replace_all(&self, mut backends: Vec<Backend>) {
        backends.sort_by(|a, b| a.id.cmp(&b.id));
        let count = backends.len();
        *self.backends.write().await = backends;
        tracing::info!("backend registry replaced, backends={}", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Credentials;
    use crate::domain::value_objects::PanelKind;
    use std::sync::Arc;

    fn create_backend(id: &str, current: u32, capacity: u32, enabled: bool) -> Backend {
        Backend {
            id: id.to_string(),
            name: format!("Backend {}", id),
            kind: PanelKind::Marzban,
            base_url: "http://10.0.0.1:8000".to_string(),
            credentials: Credentials::new("admin", "admin"),
            enabled,
            priority: None,
            capacity,
            region: None,
            current_clients: current,
        }
    }

    #[tokio::test]
    async fn test_get_all_sorted_by_id() {
        let repo = MemoryBackendRepository::new(vec![
            create_backend("c", 0, 10, true),
            create_backend("a", 0, 10, true),
            create_backend("b", 0, 10, false),
        ]);

        let ids: Vec<String> = repo.get_all().await.into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let repo = MemoryBackendRepository::new(vec![create_backend("a", 3, 10, true)]);

        assert_eq!(repo.get_by_id("a").await.unwrap().current_clients, 3);
        assert!(repo.get_by_id("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_get_available_skips_disabled_and_full() {
        let repo = MemoryBackendRepository::new(vec![
            create_backend("open", 1, 10, true),
            create_backend("full", 10, 10, true),
            create_backend("off", 0, 10, false),
            create_backend("zero", 0, 0, true),
        ]);

        let ids: Vec<String> = repo.get_available().await.into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["open"]);
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let repo = MemoryBackendRepository::new(vec![create_backend("a", 0, 10, true)]);

        assert_eq!(repo.increment_clients("a").await, Some(1));
        assert_eq!(repo.increment_clients("a").await, Some(2));
        assert_eq!(repo.decrement_clients("a").await, Some(1));
        assert_eq!(repo.increment_clients("missing").await, None);
    }

    #[tokio::test]
    async fn test_decrement_never_below_zero() {
        let repo = MemoryBackendRepository::new(vec![create_backend("a", 0, 10, true)]);
        assert_eq!(repo.decrement_clients("a").await, Some(0));
    }

    #[tokio::test]
    async fn test_increment_fills_backend() {
        let repo = MemoryBackendRepository::new(vec![create_backend("a", 9, 10, true)]);
        assert_eq!(repo.get_available().await.len(), 1);

        repo.increment_clients("a").await;
        assert!(repo.get_available().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_serialized() {
        let repo = Arc::new(MemoryBackendRepository::new(vec![create_backend("a", 0, 1000, true)]));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.increment_clients("a").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.get_by_id("a").await.unwrap().current_clients, 50);
    }

    #[tokio::test]
    async fn test_replace_all() {
        let repo = MemoryBackendRepository::new(vec![create_backend("old", 0, 10, true)]);
        repo.replace_all(vec![create_backend("z", 0, 10, true), create_backend("y", 0, 10, true)])
            .await;

        let ids: Vec<String> = repo.get_all().await.into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["y", "z"]);
        assert!(repo.get_by_id("old").await.is_none());
    }
}
