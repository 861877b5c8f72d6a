//! Adapter registry keyed by provider/model id

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::adapter::{AdapterInfo, ProviderAdapter};

/// Registry of available provider adapters.
///
/// Cloning is cheap and shares the underlying map. Registration normally happens once
/// at startup; lookups happen on every submit.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: Arc<RwLock<HashMap<String, Arc<dyn ProviderAdapter>>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an adapter under its own name, replacing any previous one
    pub async fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let name = adapter.name().to_string();
        let mut adapters = self.adapters.write().await;
        if adapters.insert(name.clone(), adapter).is_some() {
            tracing::warn!(provider = %name, "Replaced previously registered adapter");
        } else {
            tracing::debug!(provider = %name, "Registered adapter");
        }
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn ProviderAdapter>> {
        let adapters = self.adapters.read().await;

        adapters
            .get(name)
            .cloned()
            .with_context(|| format!("Provider '{}' not found", name))
    }

    /// Descriptors of all registered adapters, sorted by name
    pub async fn list(&self) -> Vec<AdapterInfo> {
        let adapters = self.adapters.read().await;
        let mut infos: Vec<AdapterInfo> = adapters.values().map(|a| a.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.adapters.read().await.contains_key(name)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
