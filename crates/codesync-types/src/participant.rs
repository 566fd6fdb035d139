//! Presence records.
//!
//! A participant is never removed explicitly. It stays in the store and
//! simply stops counting as active once its `last_seen` falls outside the
//! liveness window.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// Display name used when a record carries none.
pub const ANONYMOUS_NAME: &str = "Anonymous";

/// Client-written payload of a participant record.
///
/// `lastSeen` is not part of the payload: it is the store-assigned update
/// time of the record, so every heartbeat refreshes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantBody {
    #[serde(default = "anonymous_name")]
    pub display_name: String,
}

fn anonymous_name() -> String {
    ANONYMOUS_NAME.to_string()
}

/// A participant as seen by an observer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    /// Unix ms of the most recent heartbeat.
    pub last_seen: u64,
}

impl Participant {
    /// Whether the last heartbeat is strictly younger than `window` at `now_ms`.
    ///
    /// A `last_seen` in the future (clock skew) counts as fresh.
    pub fn is_active(&self, now_ms: u64, window: Duration) -> bool {
        (now_ms.saturating_sub(self.last_seen) as u128) < window.as_millis()
    }

    /// Upper-cased first character of the display name, for avatars.
    pub fn initial(&self) -> char {
        self.display_name
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or('?')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(last_seen: u64) -> Participant {
        Participant {
            id: ParticipantId::new("p1"),
            display_name: "ada".into(),
            last_seen,
        }
    }

    #[test]
    fn test_liveness_boundary() {
        let window = Duration::from_millis(30_000);
        let p = participant(0);
        assert!(p.is_active(29_000, window));
        assert!(!p.is_active(30_000, window));
        assert!(!p.is_active(31_000, window));
    }

    #[test]
    fn test_future_heartbeat_is_active() {
        let p = participant(10_000);
        assert!(p.is_active(5_000, Duration::from_secs(30)));
    }

    #[test]
    fn test_body_missing_name_is_anonymous() {
        let body: ParticipantBody = serde_json::from_str("{}").unwrap();
        assert_eq!(body.display_name, ANONYMOUS_NAME);
    }

    #[test]
    fn test_initial() {
        assert_eq!(participant(0).initial(), 'A');
    }
}
