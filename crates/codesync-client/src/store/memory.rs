//! In-process [`RemoteStore`] for tests and the simulator.
//!
//! Behaves like a hosted document store from a client's point of view:
//! writes are totally ordered, every subscriber (the writer included) receives
//! a snapshot after each accepted write, and collection records carry
//! server-assigned timestamps and sequence numbers taken from the store's
//! [`Clock`]. Fault injection hooks let tests fail writes, delete a room out
//! from under its subscribers, or break every open channel for a room.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use codesync_types::{Fields, RoomId};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    CollectionEvent, CollectionKind, CollectionSubscription, DocumentEvent, DocumentSubscription,
    RecordFilter, RemoteStore, StoreError, StoredRecord, Subscription, SubscriptionSender,
};
use crate::clock::{Clock, SystemClock};

#[derive(Default)]
struct RoomEntry {
    document: Option<Fields>,
    /// Every accepted document write, in order.
    history: Vec<Fields>,
    doc_watchers: Vec<SubscriptionSender<DocumentEvent>>,
    collections: HashMap<CollectionKind, Collection>,
}

impl RoomEntry {
    fn notify_document(&mut self) {
        let event = match &self.document {
            Some(fields) => DocumentEvent::Snapshot(fields.clone()),
            None => DocumentEvent::Deleted,
        };
        self.doc_watchers.retain(|w| w.send(event.clone()));
    }
}

#[derive(Default)]
struct Collection {
    records: Vec<StoredRecord>,
    watchers: Vec<CollectionWatcher>,
}

struct CollectionWatcher {
    sender: SubscriptionSender<CollectionEvent>,
    filter: Option<RecordFilter>,
}

impl Collection {
    fn notify(&mut self) {
        let records = &self.records;
        self.watchers.retain(|w| {
            w.sender
                .send(CollectionEvent::Snapshot(view(records, w.filter.as_ref())))
        });
    }
}

/// Records matching `filter`, ordered by creation time then sequence.
fn view(records: &[StoredRecord], filter: Option<&RecordFilter>) -> Vec<StoredRecord> {
    let mut out: Vec<StoredRecord> = records
        .iter()
        .filter(|r| filter.is_none_or(|f| f.matches(r)))
        .cloned()
        .collect();
    out.sort_by_key(|r| (r.created_at, r.seq));
    out
}

/// An in-memory document store.
pub struct MemoryStore {
    rooms: DashMap<RoomId, RoomEntry>,
    clock: Arc<dyn Clock>,
    next_seq: AtomicU64,
    write_fault: Mutex<Option<StoreError>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("rooms", &self.rooms.len())
            .field("clock", &self.clock)
            .field("write_fault", &*self.write_fault.lock())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    /// Create an empty store that timestamps records with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: DashMap::new(),
            clock,
            next_seq: AtomicU64::new(1),
            write_fault: Mutex::new(None),
        }
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Current document fields, bypassing subscriptions.
    pub fn document(&self, room: &RoomId) -> Option<Fields> {
        self.rooms.get(room).and_then(|e| e.document.clone())
    }

    /// Every accepted document write for `room`, oldest first.
    pub fn document_history(&self, room: &RoomId) -> Vec<Fields> {
        self.rooms
            .get(room)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    /// Number of accepted document writes for `room`.
    pub fn document_write_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|e| e.history.len()).unwrap_or(0)
    }

    /// Records of a sub-collection in query order.
    pub fn records(&self, room: &RoomId, kind: CollectionKind) -> Vec<StoredRecord> {
        self.rooms
            .get(room)
            .and_then(|e| e.collections.get(&kind).map(|c| view(&c.records, None)))
            .unwrap_or_default()
    }

    /// Whether `room` has a document.
    pub fn contains(&self, room: &RoomId) -> bool {
        self.document(room).is_some()
    }

    // ── Fault injection ─────────────────────────────────────────────────

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        let fault = fail.then(|| StoreError::Write("store is rejecting writes".into()));
        *self.write_fault.lock() = fault;
    }

    /// Make every subsequent write fail with `error`.
    pub fn fail_writes_with(&self, error: StoreError) {
        *self.write_fault.lock() = Some(error);
    }

    /// Remove a room document; subscribers receive [`DocumentEvent::Deleted`].
    pub fn delete_document(&self, room: &RoomId) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            entry.document = None;
            entry.notify_document();
            debug!(%room, "document deleted");
        }
    }

    /// Fail every open subscription on `room` with `reason` and drop them.
    pub fn break_subscriptions(&self, room: &RoomId, reason: &str) {
        let Some(mut entry) = self.rooms.get_mut(room) else {
            return;
        };
        let error = StoreError::Subscription(reason.to_string());
        for watcher in entry.doc_watchers.drain(..) {
            watcher.send(DocumentEvent::Error(error.clone()));
        }
        for collection in entry.collections.values_mut() {
            for watcher in collection.watchers.drain(..) {
                watcher.sender.send(CollectionEvent::Error(error.clone()));
            }
        }
        debug!(%room, reason, "subscriptions broken");
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        match &*self.write_fault.lock() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_document(&self, room: &RoomId) -> Result<Option<Fields>, StoreError> {
        Ok(self.document(room))
    }

    async fn set_document(
        &self,
        room: &RoomId,
        fields: Fields,
        merge: bool,
    ) -> Result<(), StoreError> {
        self.check_writable()?;

        let mut entry = self.rooms.entry(room.clone()).or_default();
        let next = match (merge, entry.document.take()) {
            (true, Some(mut existing)) => {
                existing.extend(fields);
                existing
            }
            _ => fields,
        };
        trace!(%room, merge, keys = next.len(), "document write accepted");
        entry.history.push(next.clone());
        entry.document = Some(next);
        entry.notify_document();
        Ok(())
    }

    async fn subscribe_document(&self, room: &RoomId) -> Result<DocumentSubscription, StoreError> {
        let (sender, subscription) = Subscription::channel();
        let mut entry = self.rooms.entry(room.clone()).or_default();
        let initial = match &entry.document {
            Some(fields) => DocumentEvent::Snapshot(fields.clone()),
            None => DocumentEvent::Deleted,
        };
        sender.send(initial);
        entry.doc_watchers.push(sender);
        Ok(subscription)
    }

    async fn append_record(
        &self,
        room: &RoomId,
        kind: CollectionKind,
        data: serde_json::Value,
    ) -> Result<String, StoreError> {
        self.check_writable()?;

        let now = self.clock.now_millis();
        let record = StoredRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            seq: self.next_seq(),
            created_at: now,
            updated_at: now,
            data,
        };
        let id = record.id.clone();

        let mut entry = self.rooms.entry(room.clone()).or_default();
        let collection = entry.collections.entry(kind).or_default();
        collection.records.push(record);
        collection.notify();
        Ok(id)
    }

    async fn put_record(
        &self,
        room: &RoomId,
        kind: CollectionKind,
        id: &str,
        data: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.check_writable()?;

        let now = self.clock.now_millis();
        let seq = self.next_seq();
        let mut entry = self.rooms.entry(room.clone()).or_default();
        let collection = entry.collections.entry(kind).or_default();
        match collection.records.iter_mut().find(|r| r.id == id) {
            Some(existing) => {
                existing.updated_at = now;
                existing.data = data;
            }
            None => collection.records.push(StoredRecord {
                id: id.to_string(),
                seq,
                created_at: now,
                updated_at: now,
                data,
            }),
        }
        collection.notify();
        Ok(())
    }

    async fn subscribe_collection(
        &self,
        room: &RoomId,
        kind: CollectionKind,
        filter: Option<RecordFilter>,
    ) -> Result<CollectionSubscription, StoreError> {
        let (sender, subscription) = Subscription::channel();
        let mut entry = self.rooms.entry(room.clone()).or_default();
        let collection = entry.collections.entry(kind).or_default();
        sender.send(CollectionEvent::Snapshot(view(
            &collection.records,
            filter.as_ref(),
        )));
        collection.watchers.push(CollectionWatcher { sender, filter });
        Ok(subscription)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn room() -> RoomId {
        RoomId::new("room1")
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_merge_keeps_other_fields() {
        let store = MemoryStore::default();
        store
            .set_document(&room(), fields(json!({"code": "a", "createdAt": 1})), false)
            .await
            .unwrap();
        store
            .set_document(&room(), fields(json!({"code": "b", "language": "python"})), true)
            .await
            .unwrap();

        let doc = store.document(&room()).unwrap();
        assert_eq!(doc["code"], json!("b"));
        assert_eq!(doc["language"], json!("python"));
        assert_eq!(doc["createdAt"], json!(1));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_document() {
        let store = MemoryStore::default();
        store
            .set_document(&room(), fields(json!({"code": "a", "language": "cpp"})), false)
            .await
            .unwrap();
        store
            .set_document(&room(), fields(json!({"code": "b"})), false)
            .await
            .unwrap();

        let doc = store.document(&room()).unwrap();
        assert!(doc.get("language").is_none());
        assert_eq!(store.document_write_count(&room()), 2);
    }

    #[tokio::test]
    async fn test_subscriber_sees_initial_state_then_own_echo() {
        let store = MemoryStore::default();
        let mut sub = store.subscribe_document(&room()).await.unwrap();
        assert_eq!(sub.recv().await, Some(DocumentEvent::Deleted));

        store
            .set_document(&room(), fields(json!({"code": "x"})), true)
            .await
            .unwrap();
        assert_eq!(
            sub.recv().await,
            Some(DocumentEvent::Snapshot(fields(json!({"code": "x"}))))
        );
    }

    #[tokio::test]
    async fn test_failed_write_is_not_applied() {
        let store = MemoryStore::default();
        store.set_fail_writes(true);
        let result = store
            .set_document(&room(), fields(json!({"code": "x"})), true)
            .await;
        assert!(matches!(result, Err(StoreError::Write(_))));
        assert!(!store.contains(&room()));
    }

    #[tokio::test]
    async fn test_put_record_refreshes_updated_at() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = MemoryStore::new(clock.clone());
        store
            .put_record(&room(), CollectionKind::Participants, "p1", json!({}))
            .await
            .unwrap();
        clock.set(5_000);
        store
            .put_record(&room(), CollectionKind::Participants, "p1", json!({"displayName": "ada"}))
            .await
            .unwrap();

        let records = store.records(&room(), CollectionKind::Participants);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].created_at, 1_000);
        assert_eq!(records[0].updated_at, 5_000);
        assert_eq!(records[0].data["displayName"], json!("ada"));
    }

    #[tokio::test]
    async fn test_collection_filter_applies_per_subscriber() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryStore::new(clock.clone());
        store
            .put_record(&room(), CollectionKind::Participants, "old", json!({}))
            .await
            .unwrap();
        clock.set(10_000);

        let mut filtered = store
            .subscribe_collection(
                &room(),
                CollectionKind::Participants,
                Some(RecordFilter::UpdatedAfter(5_000)),
            )
            .await
            .unwrap();
        assert_eq!(filtered.recv().await, Some(CollectionEvent::Snapshot(vec![])));

        store
            .put_record(&room(), CollectionKind::Participants, "new", json!({}))
            .await
            .unwrap();
        match filtered.recv().await {
            Some(CollectionEvent::Snapshot(records)) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].id, "new");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_break_subscriptions_sends_error() {
        let store = MemoryStore::default();
        let mut doc = store.subscribe_document(&room()).await.unwrap();
        let mut chat = store
            .subscribe_collection(&room(), CollectionKind::Messages, None)
            .await
            .unwrap();
        let _ = doc.recv().await;
        let _ = chat.recv().await;

        store.break_subscriptions(&room(), "network down");
        assert!(matches!(doc.recv().await, Some(DocumentEvent::Error(_))));
        assert!(matches!(chat.recv().await, Some(CollectionEvent::Error(_))));
        // Senders were dropped with the watchers.
        assert_eq!(doc.recv().await, None);
    }
}
