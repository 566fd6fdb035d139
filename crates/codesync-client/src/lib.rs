//! Client-side synchronization engine for CodeSync rooms.
//!
//! A room is one shared `{code, language}` document plus a participant roster
//! and a chat log, all held by a [`RemoteStore`]. This crate keeps a local
//! replica of the document consistent with the store, publishes local edits
//! with debouncing, ignores the echo of its own writes, and derives presence
//! from heartbeats.
//!
//! # Modules
//!
//! |----------------|-----------------------------------------------------|
//! | Module         | Purpose                                             |
//! |----------------|-----------------------------------------------------|
//! | [`replica`]    | Pure document state machine                         |
//! | [`actor`]      | Tokio event loop driving a replica                  |
//! | [`coalescer`]  | Trailing-edge debounce of outbound publishes        |
//! | [`echo`]       | Suppression of our own writes coming back           |
//! | [`presence`]   | Heartbeats and liveness-filtered roster             |
//! | [`lifecycle`]  | Room creation and lookup                            |
//! | [`messages`]   | Append-only chat log                                |
//! | [`store`]      | Backend contract and an in-memory implementation    |
//! | [`session`]    | Everything above wired together per room            |
//! |----------------|-----------------------------------------------------|
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use codesync_client::{AnonymousIdentity, CollabClient, MemoryStore};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::default());
//! let client = CollabClient::new(store, Arc::new(AnonymousIdentity::new()));
//! let session = client.create_room().await?;
//! session.replica().edit("console.log('hi');")?;
//! session.leave().await;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod clock;
pub mod coalescer;
pub mod config;
pub mod constants;
pub mod echo;
pub mod identity;
pub mod lifecycle;
pub mod messages;
pub mod presence;
pub mod replica;
pub mod session;
pub mod store;

pub use actor::{ReplicaEvent, ReplicaHandle, ReplicaSnapshot, spawn_replica};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use identity::{AnonymousIdentity, IdentityError, IdentityProvider};
pub use lifecycle::{JoinedSession, LifecycleError, RoomLifecycle, generate_room_id};
pub use messages::{MessageError, MessageLog, MessageStream};
pub use presence::{PresenceEvent, PresenceHandle, PresenceRegistry, derive_active};
pub use replica::{DocumentReplica, ReplicaError, ReplicaPhase, TerminationReason};
pub use session::{CollabClient, RoomSession, SessionError};
pub use store::{
    CollectionEvent, CollectionKind, DocumentEvent, MemoryStore, RecordFilter, RemoteStore,
    StoreError, StoredRecord, Subscription,
};

// Re-export types for convenience
pub use codesync_types::{
    ChatMessage, DocumentFields, Identity, Language, Participant, ParticipantId, RoomDocument,
    RoomId,
};
