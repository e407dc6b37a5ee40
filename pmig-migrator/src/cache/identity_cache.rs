//! Per-run identity cache
//!
//! Maps `(entity type, business key)` to the id assigned by the remote store.
//! It is the single record of what this run has already created or found.
//! The first id written for a key is kept; later writes for the same key are
//! ignored.

use super::business_key;
use crate::store::{Collection, RemoteId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Entity types held in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Program,
    Implementation,
    Cct,
    Survey,
    Module,
    Attendance,
    Work,
    Participant,
}

impl EntityType {
    pub fn collection(&self) -> Collection {
        match self {
            EntityType::Program => Collection::Programs,
            EntityType::Implementation => Collection::Implementations,
            EntityType::Cct => Collection::Ccts,
            EntityType::Survey => Collection::Surveys,
            EntityType::Module => Collection::Modules,
            EntityType::Attendance => Collection::Attendances,
            EntityType::Work => Collection::WorkItems,
            EntityType::Participant => Collection::Participants,
        }
    }

    /// Keyed by `field|implementationId`
    pub fn is_dependent(&self) -> bool {
        matches!(
            self,
            EntityType::Module | EntityType::Attendance | EntityType::Work
        )
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityType::Program => "program",
            EntityType::Implementation => "implementation",
            EntityType::Cct => "cct",
            EntityType::Survey => "survey",
            EntityType::Module => "module",
            EntityType::Attendance => "attendance",
            EntityType::Work => "work",
            EntityType::Participant => "participant",
        };
        f.write_str(name)
    }
}

/// Entry counts per entity type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub counts: BTreeMap<EntityType, usize>,
}

impl CacheStats {
    pub fn count(&self, entity: EntityType) -> usize {
        self.counts.get(&entity).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Referential check result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValidation {
    pub ok: bool,
    pub issues: Vec<String>,
}

/// Identity cache owned by one migration run
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: RwLock<HashMap<EntityType, IndexMap<String, RemoteId>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: EntityType, key: &str) -> Option<RemoteId> {
        self.read().get(&entity).and_then(|m| m.get(key)).copied()
    }

    /// Record an id, returning the id now held for the key
    ///
    /// An existing entry is never overwritten.
    pub fn set(&self, entity: EntityType, key: impl Into<String>, id: RemoteId) -> RemoteId {
        let key = key.into();
        let mut entries = self.write();
        let stored = *entries.entry(entity).or_default().entry(key.clone()).or_insert(id);
        if stored != id {
            tracing::debug!(
                entity = %entity,
                key = %key,
                kept = stored,
                ignored = id,
                "Cache entry already present, keeping first id"
            );
        }
        stored
    }

    /// Entries of one type in insertion order
    pub fn entries(&self, entity: EntityType) -> Vec<(String, RemoteId)> {
        self.read()
            .get(&entity)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            counts: self
                .read()
                .iter()
                .map(|(entity, m)| (*entity, m.len()))
                .collect(),
        }
    }

    /// Check that every dependent entry points at a cached implementation
    pub fn validate(&self) -> CacheValidation {
        let entries = self.read();
        let implementation_ids: HashSet<RemoteId> = entries
            .get(&EntityType::Implementation)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default();

        let mut issues = Vec::new();
        let mut dependents: Vec<_> = entries
            .iter()
            .filter(|(entity, _)| entity.is_dependent())
            .collect();
        dependents.sort_by_key(|(entity, _)| **entity);

        for (entity, keys) in dependents {
            for key in keys.keys() {
                match business_key::parse_dependent_key(key) {
                    Some((_, implementation_id))
                        if implementation_ids.contains(&implementation_id) => {}
                    Some((field, implementation_id)) => issues.push(format!(
                        "{} '{}' references implementation {} which is not cached",
                        entity, field, implementation_id
                    )),
                    None => issues.push(format!("{} key '{}' is not a dependent key", entity, key)),
                }
            }
        }

        CacheValidation {
            ok: issues.is_empty(),
            issues,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityType, IndexMap<String, RemoteId>>> {
        // Entries are plain ids, a poisoned lock still holds consistent data
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityType, IndexMap<String, RemoteId>>> {
        self.entries.write().unwrap_or_else(|p| p.into_inner())
    }
}
