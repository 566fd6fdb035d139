//! Creating and joining rooms.

use std::sync::Arc;

use codesync_types::{Fields, IdError, RoomDocument, RoomId};
use rand::Rng;
use tracing::info;

use crate::clock::Clock;
use crate::constants::{ROOM_ID_ALPHABET, ROOM_ID_LEN};
use crate::store::{RemoteStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid room id: {0}")]
    InvalidRoomId(#[from] IdError),
    #[error("room {0} not found")]
    NotFound(RoomId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A fresh room id: [`ROOM_ID_LEN`] characters from `[0-9a-z]`.
///
/// Collisions are not checked. With 36^7 ids a clash is unlikely enough to
/// accept, and creation overwrites rather than merges.
pub fn generate_room_id<R: Rng + ?Sized>(rng: &mut R) -> RoomId {
    let id: String = (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect();
    RoomId::new(id)
}

/// A successfully joined room and its document at join time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedSession {
    pub room: RoomId,
    pub document: RoomDocument,
}

#[derive(Clone)]
pub struct RoomLifecycle {
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
}

impl RoomLifecycle {
    pub fn new(store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Create a room holding the welcome document. Not retried on failure.
    pub async fn create_session(&self) -> Result<RoomId, LifecycleError> {
        let room = generate_room_id(&mut rand::thread_rng());
        self.create_with_id(room).await
    }

    /// Create a room under a caller-chosen id, overwriting any document there.
    pub async fn create_with_id(&self, room: RoomId) -> Result<RoomId, LifecycleError> {
        let document = RoomDocument::initial(self.clock.now_millis());
        self.store
            .set_document(&room, document.to_fields(), false)
            .await?;
        info!(%room, "room created");
        Ok(room)
    }

    /// Look up an existing room. Never creates one.
    pub async fn join_session(&self, raw: &str) -> Result<JoinedSession, LifecycleError> {
        let room = RoomId::parse(raw)?;
        let fields: Fields = self
            .store
            .get_document(&room)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(room.clone()))?;
        info!(%room, "room joined");
        Ok(JoinedSession {
            document: RoomDocument::from_fields(&fields),
            room,
        })
    }
}
