//! Shared room, participant, and message types for CodeSync.
//!
//! This crate is the leaf of the workspace: typed identifiers, the shared
//! document model, and the wire shape of the records that live under a room.
//! It has **no internal codesync dependencies**.
//!
//! # Entity Overview
//!
//! ```text
//! Room (RoomId) ← unit of collaboration
//!     └── document: DocumentFields { code, language } + createdAt
//!     └── participants/ (ParticipantId → displayName, lastSeen)
//!     └── messages/     (MessageId → text, author, timestamp)
//! ```
//!
//! # Key Types
//!
//! |--------------------|---------------------------------------------|
//! | Type               | Purpose                                     |
//! |--------------------|---------------------------------------------|
//! | [`RoomId`]         | Short room identifier shared out-of-band    |
//! | [`ParticipantId`]  | Anonymous, stable-per-session identity      |
//! | [`Language`]       | Document language tag + canned templates    |
//! | [`DocumentFields`] | The publishable `{code, language}` pair     |
//! | [`RoomDocument`]   | Full persisted room document                |
//! | [`Participant`]    | Presence record with liveness check         |
//! | [`ChatMessage`]    | Immutable chat entry                        |
//! |--------------------|---------------------------------------------|

pub mod document;
pub mod identity;
pub mod ids;
pub mod language;
pub mod message;
pub mod participant;

pub use document::{DocumentFields, Fields, RoomDocument};
pub use identity::Identity;
pub use ids::{IdError, MessageId, ParticipantId, RoomId};
pub use language::{Language, WELCOME_TEMPLATE};
pub use message::{ChatMessage, MessageBody};
pub use participant::{Participant, ParticipantBody};

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
