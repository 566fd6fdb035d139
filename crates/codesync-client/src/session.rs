//! One client in one room: replica, presence and chat wired together.
//!
//! ```text
//! CollabClient ── create_room / join_room ──▶ RoomSession
//!                                              ├── ReplicaHandle   (document)
//!                                              ├── PresenceHandle  (roster)
//!                                              └── MessageLog      (chat)
//! ```
//!
//! A terminal replica failure (room deleted, subscription lost) ends the whole
//! session: presence stops heartbeating so nothing is written under a room
//! that no longer exists.

use std::sync::Arc;

use codesync_types::{Identity, MessageId, RoomDocument, RoomId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actor::{ReplicaHandle, spawn_replica};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, SyncConfig};
use crate::identity::{IdentityError, IdentityProvider};
use crate::lifecycle::{LifecycleError, RoomLifecycle};
use crate::messages::{MessageError, MessageLog, MessageStream};
use crate::presence::{PresenceHandle, PresenceRegistry};
use crate::replica::TerminationReason;
use crate::store::{RemoteStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("display name must not be blank")]
    BlankDisplayName,
}

/// Entry point: creates and joins rooms against one store.
#[derive(Clone)]
pub struct CollabClient {
    store: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl CollabClient {
    pub fn new(store: Arc<dyn RemoteStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            clock: Arc::new(SystemClock),
            config: SyncConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `config` for every session. Rejected if it fails
    /// [`SyncConfig::validate`].
    pub fn with_config(mut self, config: SyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> RoomLifecycle {
        RoomLifecycle::new(Arc::clone(&self.store), Arc::clone(&self.clock))
    }

    /// Create a fresh room and join it.
    pub async fn create_room(&self) -> Result<RoomSession, SessionError> {
        let room = self.lifecycle().create_session().await?;
        self.join_room(room.as_str()).await
    }

    /// Join an existing room by its (user-typed) id.
    pub async fn join_room(&self, raw: &str) -> Result<RoomSession, SessionError> {
        let joined = self.lifecycle().join_session(raw).await?;
        let identity = self.identity.identity().await?;
        let room = joined.room;

        let replica = spawn_replica(Arc::clone(&self.store), room.clone(), &self.config).await?;
        let presence = PresenceRegistry::new(
            Arc::clone(&self.store),
            room.clone(),
            identity.clone(),
            Arc::clone(&self.clock),
            self.config.clone(),
        )
        .start()
        .await;
        let presence = match presence {
            Ok(presence) => presence,
            Err(error) => {
                replica.leave().await;
                return Err(error.into());
            }
        };
        let messages = MessageLog::new(Arc::clone(&self.store), room.clone());
        tokio::spawn(stop_presence_on_termination(replica.clone(), presence.stop_token()));

        Ok(RoomSession {
            room,
            identity,
            initial: joined.document,
            replica,
            presence,
            messages,
        })
    }
}

async fn stop_presence_on_termination(
    replica: ReplicaHandle,
    presence: CancellationToken,
) {
    tokio::select! {
        _ = presence.cancelled() => {}
        reason = replica.terminated() => {
            if reason == TerminationReason::Left {
                debug!(room = %replica.room(), "session left");
            } else {
                info!(room = %replica.room(), %reason, "session ended, stopping presence");
            }
            presence.cancel();
        }
    }
}

/// A joined room.
pub struct RoomSession {
    room: RoomId,
    identity: Identity,
    initial: RoomDocument,
    replica: ReplicaHandle,
    presence: PresenceHandle,
    messages: MessageLog,
}

impl RoomSession {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The document as read when joining.
    pub fn initial_document(&self) -> &RoomDocument {
        &self.initial
    }

    pub fn replica(&self) -> &ReplicaHandle {
        &self.replica
    }

    pub fn presence(&self) -> &PresenceHandle {
        &self.presence
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    /// Why the session ended, once it has.
    pub fn termination(&self) -> Option<TerminationReason> {
        self.replica.termination()
    }

    /// Resolves when the session ends: room deleted, subscription lost, or
    /// left.
    pub async fn terminated(&self) -> TerminationReason {
        self.replica.terminated().await
    }

    /// Rename the local participant for chat and presence. The new name is
    /// heartbeated right away.
    pub fn set_display_name(&mut self, name: &str) -> Result<(), SessionError> {
        if name.trim().is_empty() {
            return Err(SessionError::BlankDisplayName);
        }
        self.identity = self.identity.clone().with_display_name(name);
        self.presence.set_identity(self.identity.clone());
        Ok(())
    }

    pub async fn send_message(&self, text: &str) -> Result<MessageId, MessageError> {
        self.messages.send(text, &self.identity).await
    }

    pub async fn subscribe_messages(&self) -> Result<MessageStream, StoreError> {
        self.messages.subscribe().await
    }

    /// Stop the replica (dropping any unpublished edit) and presence.
    pub async fn leave(self) {
        self.replica.leave().await;
        self.presence.leave().await;
    }
}
