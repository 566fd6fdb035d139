//! Chat messages.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ParticipantId};
use crate::participant::ANONYMOUS_NAME;

/// Client-written payload of a chat record.
///
/// The timestamp is assigned by the store when the record is appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    pub text: String,
    pub author_id: ParticipantId,
    #[serde(default = "anonymous_name")]
    pub display_name: String,
}

fn anonymous_name() -> String {
    ANONYMOUS_NAME.to_string()
}

/// An immutable chat entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub text: String,
    pub author_id: ParticipantId,
    pub display_name: String,
    /// Server-assigned Unix ms.
    pub timestamp: u64,
    /// Store-assigned sequence, breaks timestamp ties.
    pub seq: u64,
}

impl ChatMessage {
    /// Sort key: timestamp ascending, then store sequence.
    pub fn order_key(&self) -> (u64, u64) {
        (self.timestamp, self.seq)
    }

    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        &self.author_id == participant
    }
}
