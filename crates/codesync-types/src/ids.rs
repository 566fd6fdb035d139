//! Typed identifiers for rooms, participants, and messages.
//!
//! All three are opaque strings on the wire. A [`RoomId`] is generated by the
//! room lifecycle and typed in by humans, so parsing trims whitespace and
//! rejects anything outside a conservative character set. Participant and
//! message ids are assigned by collaborators (identity provider, store) and are
//! accepted as-is.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest room id accepted from user input.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// A room identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

/// A participant identifier (derived from the anonymous identity).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

/// A chat message identifier (assigned by the store).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

/// Errors from parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier is longer than {max} characters")]
    TooLong { max: usize },
    #[error("identifier contains invalid character {0:?}")]
    InvalidChar(char),
}

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_string_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap an already-validated string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First 4 characters, for human display only, not lookup.
            pub fn short(&self) -> &str {
                let end = self
                    .0
                    .char_indices()
                    .nth(4)
                    .map(|(i, _)| i)
                    .unwrap_or(self.0.len());
                &self.0[..end]
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$T> for String {
            fn from(id: $T) -> String {
                id.0
            }
        }
    };
}

impl_string_id!(RoomId, "RoomId");
impl_string_id!(ParticipantId, "ParticipantId");
impl_string_id!(MessageId, "MessageId");

impl RoomId {
    /// Parse user input into a room id.
    ///
    /// Surrounding whitespace is ignored. Allowed characters are ASCII
    /// alphanumerics, `-` and `_`.
    pub fn parse(input: &str) -> Result<Self, IdError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        if trimmed.len() > MAX_ROOM_ID_LEN {
            return Err(IdError::TooLong { max: MAX_ROOM_ID_LEN });
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdError::InvalidChar(c));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl std::str::FromStr for RoomId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Tests
// ============================================================================
