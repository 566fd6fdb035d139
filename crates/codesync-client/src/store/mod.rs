//! The backend contract the sync engine consumes.
//!
//! [`RemoteStore`] is a document/collection store with point reads, point
//! writes (optionally merging), and push subscriptions. Subscriptions are
//! cancellable asynchronous streams: a [`Subscription`] yields events until
//! the store closes it, the consumer calls [`Subscription::cancel`], or the
//! subscription is dropped.
//!
//! ```text
//!   store impl                         consumer task
//!   ┌────────────────────┐  mpsc   ┌──────────────────────────┐
//!   │ SubscriptionSender │ ──────▶ │ Subscription (Stream)    │
//!   │  .send(event)      │         │  .recv() / .next()       │
//!   └────────────────────┘         │  .cancel() / drop        │
//!            ▲                     └────────────┬─────────────┘
//!            └──── CancellationToken ───────────┘
//! ```

mod memory;

pub use memory::MemoryStore;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use codesync_types::{Fields, RoomId};
use futures::Stream;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Error Type
// ============================================================================

/// Errors reported by a [`RemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("write rejected: {0}")]
    Write(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("store unavailable")]
    Unavailable,
}

// ============================================================================
// Records and Events
// ============================================================================

/// Sub-collections that live under a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Messages,
    Participants,
}

impl CollectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Participants => "participants",
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record in a room sub-collection, with store-assigned metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Record key within its collection.
    pub id: String,
    /// Store-wide insertion sequence; breaks timestamp ties.
    pub seq: u64,
    /// Server time (Unix ms) of the first write.
    pub created_at: u64,
    /// Server time (Unix ms) of the latest write.
    pub updated_at: u64,
    /// Client payload.
    pub data: serde_json::Value,
}

impl StoredRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Server-side filter for collection queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    /// Records whose latest write is strictly after this Unix ms.
    UpdatedAfter(u64),
    /// Records created strictly after this Unix ms.
    CreatedAfter(u64),
}

impl RecordFilter {
    pub fn matches(&self, record: &StoredRecord) -> bool {
        match *self {
            Self::UpdatedAfter(ts) => record.updated_at > ts,
            Self::CreatedAfter(ts) => record.created_at > ts,
        }
    }
}

/// Pushed on every change to a room document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    /// The document's current fields.
    Snapshot(Fields),
    /// The document does not exist (never created, or deleted).
    Deleted,
    /// The channel failed; no further events follow.
    Error(StoreError),
}

/// Pushed on every change to a sub-collection: the full ordered record set.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    Snapshot(Vec<StoredRecord>),
    Error(StoreError),
}

// ============================================================================
// Subscription
// ============================================================================

/// Store-side half of a subscription.
#[derive(Debug)]
pub struct SubscriptionSender<T> {
    tx: mpsc::UnboundedSender<T>,
    cancel: CancellationToken,
}

impl<T> SubscriptionSender<T> {
    /// Deliver an event. Returns `false` once the consumer has gone away.
    pub fn send(&self, event: T) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// Consumer-side half: a cancellable stream of events.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    /// Create a connected sender/subscription pair.
    pub fn channel() -> (SubscriptionSender<T>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            SubscriptionSender {
                tx,
                cancel: cancel.clone(),
            },
            Self { rx, cancel },
        )
    }

    /// Next event, or `None` once cancelled or closed by the store.
    pub async fn recv(&mut self) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Unsubscribe. Events already queued are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A token that cancels this subscription from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

pub type DocumentSubscription = Subscription<DocumentEvent>;
pub type CollectionSubscription = Subscription<CollectionEvent>;

// ============================================================================
// RemoteStore
// ============================================================================

/// Document/collection backend shared by every client in a room.
///
/// Writes from different clients are totally ordered by the store; the last
/// accepted write wins. Implementations must deliver a client's own writes
/// back to its subscriptions (the echo the replica guards against).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Point read of a room document. `None` if it does not exist.
    async fn get_document(&self, room: &RoomId) -> Result<Option<Fields>, StoreError>;

    /// Write a room document.
    ///
    /// With `merge`, only the given fields are replaced; otherwise the whole
    /// document becomes `fields`.
    async fn set_document(&self, room: &RoomId, fields: Fields, merge: bool)
    -> Result<(), StoreError>;

    /// Subscribe to a room document. The current state is delivered first.
    async fn subscribe_document(&self, room: &RoomId) -> Result<DocumentSubscription, StoreError>;

    /// Append a record with a store-assigned id and timestamp. Returns the id.
    async fn append_record(
        &self,
        room: &RoomId,
        kind: CollectionKind,
        data: serde_json::Value,
    ) -> Result<String, StoreError>;

    /// Create or overwrite the record `id`, refreshing its update timestamp.
    async fn put_record(
        &self,
        room: &RoomId,
        kind: CollectionKind,
        id: &str,
        data: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Subscribe to a sub-collection, ordered by creation time then sequence.
    /// The current record set is delivered first.
    async fn subscribe_collection(
        &self,
        room: &RoomId,
        kind: CollectionKind,
        filter: Option<RecordFilter>,
    ) -> Result<CollectionSubscription, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscription_delivers_in_order() {
        let (tx, mut sub) = Subscription::<u32>::channel();
        assert!(tx.send(1));
        assert!(tx.send(2));
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.next().await, Some(2));
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        let (tx, mut sub) = Subscription::<u32>::channel();
        assert!(tx.send(1));
        sub.cancel();
        assert_eq!(sub.recv().await, None);
        assert!(!tx.send(2));
        assert!(tx.is_closed());
    }

    #[test]
    fn test_drop_closes_sender() {
        let (tx, sub) = Subscription::<u32>::channel();
        drop(sub);
        assert!(tx.is_closed());
    }

    #[test]
    fn test_record_filter() {
        let record = StoredRecord {
            id: "a".into(),
            seq: 1,
            created_at: 100,
            updated_at: 200,
            data: serde_json::Value::Null,
        };
        assert!(RecordFilter::UpdatedAfter(199).matches(&record));
        assert!(!RecordFilter::UpdatedAfter(200).matches(&record));
        assert!(!RecordFilter::CreatedAfter(100).matches(&record));
    }
}
