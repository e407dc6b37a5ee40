//! Get-or-create against the remote store
//!
//! Resolution order for a business key:
//! 1. Identity cache
//! 2. Remote lookup (equality filter, limit 1), skipped when `omit_get` is set
//! 3. Remote create
//!
//! Each successful remote step writes the id back to the cache. Remote errors
//! are returned to the caller unchanged.
//!
//! Concurrent callers asking for the same `(entity, key)` are serialized by a
//! per-key guard; the later caller re-reads the cache once the first has
//! finished, so a key is created at most once even when rows are dispatched
//! concurrently.

use crate::cache::{EntityType, IdentityCache};
use crate::store::{Filter, RemoteId, RemoteStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Where a resolved id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionOrigin {
    Cache,
    Found,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: RemoteId,
    pub origin: ResolutionOrigin,
}

impl Resolution {
    pub fn created(&self) -> bool {
        self.origin == ResolutionOrigin::Created
    }
}

type KeyGuard = Arc<tokio::sync::Mutex<()>>;

/// Cache-backed entity resolver for one migration run
pub struct EntityResolver<'a> {
    store: &'a dyn RemoteStore,
    cache: &'a IdentityCache,
    omit_get: bool,
    in_flight: Mutex<HashMap<(EntityType, String), KeyGuard>>,
}

impl<'a> EntityResolver<'a> {
    pub fn new(store: &'a dyn RemoteStore, cache: &'a IdentityCache, omit_get: bool) -> Self {
        Self {
            store,
            cache,
            omit_get,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &'a dyn RemoteStore {
        self.store
    }

    pub fn cache(&self) -> &'a IdentityCache {
        self.cache
    }

    pub fn omit_get(&self) -> bool {
        self.omit_get
    }

    /// Cache-only lookup
    pub fn cached(&self, entity: EntityType, key: &str) -> Option<RemoteId> {
        self.cache.get(entity, key)
    }

    /// Resolve `cache_key`, creating the entity from `payload` if needed
    pub async fn get_or_create(
        &self,
        entity: EntityType,
        lookup: &Filter,
        payload: Value,
        cache_key: &str,
    ) -> Result<Resolution, StoreError> {
        if let Some(id) = self.cache.get(entity, cache_key) {
            return Ok(Resolution {
                id,
                origin: ResolutionOrigin::Cache,
            });
        }

        let guard = self.acquire(entity, cache_key);
        let result = {
            let _held = guard.lock().await;
            match self.cache.get(entity, cache_key) {
                Some(id) => Ok(Resolution {
                    id,
                    origin: ResolutionOrigin::Cache,
                }),
                None => self.resolve_remote(entity, lookup, payload, cache_key).await,
            }
        };
        self.release(entity, cache_key, guard);

        result
    }

    async fn resolve_remote(
        &self,
        entity: EntityType,
        lookup: &Filter,
        payload: Value,
        cache_key: &str,
    ) -> Result<Resolution, StoreError> {
        let collection = entity.collection();

        if !self.omit_get {
            if let Some(id) = self.store.find(collection, lookup).await? {
                let id = self.cache.set(entity, cache_key, id);
                tracing::debug!(entity = %entity, key = %cache_key, id, "Found existing entity");
                return Ok(Resolution {
                    id,
                    origin: ResolutionOrigin::Found,
                });
            }
        }

        let id = self.store.create(collection, payload).await?;
        let id = self.cache.set(entity, cache_key, id);
        tracing::debug!(entity = %entity, key = %cache_key, id, "Created entity");

        Ok(Resolution {
            id,
            origin: ResolutionOrigin::Created,
        })
    }

    fn acquire(&self, entity: EntityType, key: &str) -> KeyGuard {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        in_flight
            .entry((entity, key.to_string()))
            .or_default()
            .clone()
    }

    fn release(&self, entity: EntityType, key: &str, guard: KeyGuard) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        // Map + this caller: nobody else is waiting on the key
        if Arc::strong_count(&guard) <= 2 {
            in_flight.remove(&(entity, key.to_string()));
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }
}
