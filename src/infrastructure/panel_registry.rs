//! Panel Client Registry
//!
//! Maps backend ids to their panel clients. The map itself is immutable;
//! reconfiguration builds a new one and swaps the pointer, so readers never
//! observe a half-updated fleet. Readers that pair the map with the backend
//! registry hold `consistent()` so both come from the same generation.

use crate::domain::ports::PanelClient;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLockReadGuard;

pub type PanelMap = HashMap<String, Arc<dyn PanelClient>>;

pub struct PanelRegistry {
    panels: RwLock<Arc<PanelMap>>,
    /// Held exclusively while a fleet generation is being swapped
    generation: tokio::sync::RwLock<()>,
}

impl PanelRegistry {
    pub fn new(panels: PanelMap) -> Self {
        Self {
            panels: RwLock::new(Arc::new(panels)),
            generation: tokio::sync::RwLock::new(()),
        }
    }

    /// Keep the current generation while the guard lives.
    pub async fn consistent(&self) -> RwLockReadGuard<'_, ()> {
        self.generation.read().await
    }

    /// Run `companion` (the backend registry update) and swap the map as
    /// one step with respect to `consistent()` readers.
    pub async fn replace_with<Fut>(&self, panels: PanelMap, companion: Fut)
    where
        Fut: Future<Output = ()>,
    {
        let _swap = self.generation.write().await;
        companion.await;
        self.replace(panels);
    }

    pub fn get(&self, backend_id: &str) -> Option<Arc<dyn PanelClient>> {
        self.panels.read().get(backend_id).cloned()
    }

    /// The current map. Later swaps do not affect the returned snapshot.
    pub fn snapshot(&self) -> Arc<PanelMap> {
        self.panels.read().clone()
    }

    pub fn replace(&self, panels: PanelMap) {
        *self.panels.write() = Arc::new(panels);
    }

    pub fn len(&self) -> usize {
        self.panels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PanelRegistry {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}
