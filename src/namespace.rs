//! Namespace Registry
//!
//! Explicit factory for named cache instances. Each namespace owns an
//! independent [`Cache`]; nothing is shared between them.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::info;

use crate::cache::Cache;
use crate::config::CacheConfig;

#[derive(Debug, Default)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<String, Cache>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache for `namespace`, creating it from `config` if absent.
    ///
    /// The config's own `namespace` field is overwritten with `namespace`.
    /// An existing cache is returned unchanged and `config` is ignored.
    pub fn get_or_create(&self, namespace: &str, config: CacheConfig) -> Cache {
        if let Some(cache) = self.caches.read().get(namespace) {
            return cache.clone();
        }

        let mut caches = self.caches.write();
        caches
            .entry(namespace.to_string())
            .or_insert_with(|| {
                info!(namespace, "creating cache namespace");
                Cache::new(CacheConfig {
                    namespace: namespace.to_string(),
                    ..config
                })
            })
            .clone()
    }

    pub fn get(&self, namespace: &str) -> Option<Cache> {
        self.caches.read().get(namespace).cloned()
    }

    /// Unregisters a namespace. Other handles to its cache stay usable.
    pub fn remove(&self, namespace: &str) -> Option<Cache> {
        self.caches.write().remove(namespace)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Destroys and unregisters every namespace.
    pub async fn destroy_all(&self) {
        let caches: Vec<Cache> = self.caches.write().drain().map(|(_, cache)| cache).collect();
        for cache in caches {
            cache.destroy().await;
        }
    }
}
