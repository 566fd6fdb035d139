//! Room chat: an append-only log ordered by server timestamp.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use codesync_types::{ChatMessage, Identity, MessageBody, MessageId, RoomId};
use futures::Stream;
use tracing::{debug, warn};

use crate::store::{
    CollectionEvent, CollectionKind, CollectionSubscription, RemoteStore, StoreError, StoredRecord,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Decode a message record. Records that do not decode are skipped.
pub fn message_from_record(record: &StoredRecord) -> Option<ChatMessage> {
    let body: MessageBody = match record.decode() {
        Ok(body) => body,
        Err(error) => {
            warn!(id = %record.id, %error, "skipping malformed message record");
            return None;
        }
    };
    Some(ChatMessage {
        id: MessageId::new(record.id.clone()),
        text: body.text,
        author_id: body.author_id,
        display_name: body.display_name,
        timestamp: record.created_at,
        seq: record.seq,
    })
}

/// Decode and order a full record set by `(timestamp, seq)`.
pub fn ordered_messages(records: &[StoredRecord]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = records.iter().filter_map(message_from_record).collect();
    messages.sort_by_key(ChatMessage::order_key);
    messages
}

#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn RemoteStore>,
    room: RoomId,
}

impl MessageLog {
    pub fn new(store: Arc<dyn RemoteStore>, room: RoomId) -> Self {
        Self { store, room }
    }

    /// Append a message. Blank text is rejected; the store assigns the
    /// timestamp.
    pub async fn send(&self, text: &str, author: &Identity) -> Result<MessageId, MessageError> {
        if text.trim().is_empty() {
            return Err(MessageError::EmptyMessage);
        }
        let body = MessageBody {
            text: text.to_string(),
            author_id: author.participant_id.clone(),
            display_name: author.display_name.clone(),
        };
        let data = serde_json::to_value(&body).map_err(|e| MessageError::Encode(e.to_string()))?;
        let id = self
            .store
            .append_record(&self.room, CollectionKind::Messages, data)
            .await?;
        debug!(room = %self.room, %id, "message sent");
        Ok(MessageId::new(id))
    }

    /// Stream of the full ordered message list, redelivered on every change.
    pub async fn subscribe(&self) -> Result<MessageStream, StoreError> {
        let inner = self
            .store
            .subscribe_collection(&self.room, CollectionKind::Messages, None)
            .await?;
        Ok(MessageStream { inner })
    }
}

/// Ordered message snapshots. Ends after yielding a subscription error.
pub struct MessageStream {
    inner: CollectionSubscription,
}

impl MessageStream {
    pub async fn recv(&mut self) -> Option<Result<Vec<ChatMessage>, StoreError>> {
        self.inner.recv().await.map(into_messages)
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

fn into_messages(event: CollectionEvent) -> Result<Vec<ChatMessage>, StoreError> {
    match event {
        CollectionEvent::Snapshot(records) => Ok(ordered_messages(&records)),
        CollectionEvent::Error(error) => Err(error),
    }
}

impl Stream for MessageStream {
    type Item = Result<Vec<ChatMessage>, StoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner)
            .poll_next(cx)
            .map(|event| event.map(into_messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codesync_types::ParticipantId;
    use serde_json::json;

    fn record(id: &str, seq: u64, created_at: u64, text: &str) -> StoredRecord {
        StoredRecord {
            id: id.into(),
            seq,
            created_at,
            updated_at: created_at,
            data: json!({"text": text, "authorId": "p1", "displayName": "ada"}),
        }
    }

    #[test]
    fn test_ordering_by_timestamp_then_seq() {
        let records = vec![
            record("c", 3, 200, "third"),
            record("a", 2, 100, "second"),
            record("b", 1, 100, "first"),
        ];
        let texts: Vec<_> = ordered_messages(&records)
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_malformed_record_skipped() {
        let mut bad = record("x", 1, 1, "");
        bad.data = json!({"nope": 1});
        assert!(message_from_record(&bad).is_none());
    }

    #[test]
    fn test_missing_display_name_defaults() {
        let mut r = record("x", 1, 1, "hi");
        r.data = json!({"text": "hi", "authorId": "p1"});
        let msg = message_from_record(&r).unwrap();
        assert_eq!(msg.display_name, "Anonymous");
        assert!(msg.is_from(&ParticipantId::new("p1")));
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let store = Arc::new(crate::store::MemoryStore::default());
        let log = MessageLog::new(store.clone(), RoomId::new("r"));
        let me = Identity::anonymous(ParticipantId::new("p1"));

        assert_eq!(log.send("  \n", &me).await, Err(MessageError::EmptyMessage));
        assert!(store.records(&RoomId::new("r"), CollectionKind::Messages).is_empty());
    }
}
