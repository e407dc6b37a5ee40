//! In-process content store
//!
//! Behaves like the remote API (sequential ids, equality lookups, no
//! uniqueness constraints) and records every call it receives. Used by the
//! integration tests and by `--dry-run`.

use super::{Collection, Filter, RemoteId, RemoteStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Kind of call received by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Find,
    Create,
}

/// One recorded call
#[derive(Debug, Clone)]
pub struct StoreCall {
    pub kind: CallKind,
    pub collection: Collection,
}

#[derive(Debug, Clone)]
enum FailRule {
    All(Collection),
    Matching(Collection, Filter),
}

impl FailRule {
    fn applies(&self, collection: Collection, payload: &Value) -> bool {
        match self {
            FailRule::All(c) => *c == collection,
            FailRule::Matching(c, filter) => *c == collection && filter.matches(payload),
        }
    }
}

#[derive(Default)]
struct State {
    next_id: RemoteId,
    records: HashMap<Collection, Vec<(RemoteId, Value)>>,
    calls: Vec<StoreCall>,
    fail_rules: Vec<FailRule>,
}

/// In-memory implementation of [`RemoteStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, giving concurrent callers a chance to interleave
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert a record without recording a call
    pub fn seed(&self, collection: Collection, payload: Value) -> RemoteId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.records.entry(collection).or_default().push((id, payload));
        id
    }

    /// Make every create on `collection` fail
    pub fn fail_creates(&self, collection: Collection) {
        self.lock().fail_rules.push(FailRule::All(collection));
    }

    /// Make creates on `collection` fail when `field` equals `value`
    pub fn fail_creates_matching(&self, collection: Collection, field: &str, value: impl ToString) {
        self.lock()
            .fail_rules
            .push(FailRule::Matching(collection, Filter::eq(field, value)));
    }

    /// Payloads stored in a collection, in creation order
    pub fn records(&self, collection: Collection) -> Vec<Value> {
        self.lock()
            .records
            .get(&collection)
            .map(|rows| rows.iter().map(|(_, v)| v.clone()).collect())
            .unwrap_or_default()
    }

    /// Stored payload by id
    pub fn record(&self, collection: Collection, id: RemoteId) -> Option<Value> {
        self.lock()
            .records
            .get(&collection)
            .and_then(|rows| rows.iter().find(|(rid, _)| *rid == id))
            .map(|(_, v)| v.clone())
    }

    pub fn count(&self, collection: Collection) -> usize {
        self.lock().records.get(&collection).map_or(0, Vec::len)
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, kind: CallKind, collection: Collection) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.kind == kind && c.collection == collection)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock only happens in a failing test
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<RemoteId>, StoreError> {
        self.delay().await;
        let mut state = self.lock();
        state.calls.push(StoreCall {
            kind: CallKind::Find,
            collection,
        });

        Ok(state
            .records
            .get(&collection)
            .and_then(|rows| rows.iter().find(|(_, payload)| filter.matches(payload)))
            .map(|(id, _)| *id))
    }

    async fn create(&self, collection: Collection, payload: Value) -> Result<RemoteId, StoreError> {
        self.delay().await;
        let mut state = self.lock();
        state.calls.push(StoreCall {
            kind: CallKind::Create,
            collection,
        });

        if state.fail_rules.iter().any(|r| r.applies(collection, &payload)) {
            return Err(StoreError::Rejected {
                collection,
                reason: "injected failure".to_string(),
            });
        }

        state.next_id += 1;
        let id = state.next_id;
        state.records.entry(collection).or_default().push((id, payload));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_then_find() {
        let store = MemoryStore::new();
        let id = store
            .create(Collection::Programs, json!({"nombre": "P1"}))
            .await
            .unwrap();

        let found = store
            .find(Collection::Programs, &Filter::eq("nombre", "P1"))
            .await
            .unwrap();
        assert_eq!(found, Some(id));

        let missing = store
            .find(Collection::Programs, &Filter::eq("nombre", "P2"))
            .await
            .unwrap();
        assert_eq!(missing, None);

        assert_eq!(store.call_count(CallKind::Create, Collection::Programs), 1);
        assert_eq!(store.call_count(CallKind::Find, Collection::Programs), 2);
    }

    #[tokio::test]
    async fn test_no_uniqueness_constraint() {
        let store = MemoryStore::new();
        let a = store.create(Collection::Programs, json!({"nombre": "P1"})).await.unwrap();
        let b = store.create(Collection::Programs, json!({"nombre": "P1"})).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.count(Collection::Programs), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        store.fail_creates_matching(Collection::Participants, "id_externo", "13");

        assert!(store
            .create(Collection::Participants, json!({"id_externo": "12"}))
            .await
            .is_ok());
        let err = store
            .create(Collection::Participants, json!({"id_externo": "13"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));

        store.fail_creates(Collection::Programs);
        assert!(store.create(Collection::Programs, json!({})).await.is_err());
        assert_eq!(store.count(Collection::Programs), 0);
    }

    #[test]
    fn test_seed_is_not_recorded_as_call() {
        let store = MemoryStore::new();
        let id = store.seed(Collection::Ccts, json!({"clave": "09DPR0001A"}));
        assert_eq!(store.record(Collection::Ccts, id).unwrap()["clave"], "09DPR0001A");
        assert!(store.calls().is_empty());
    }
}
