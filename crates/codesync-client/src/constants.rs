//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.
//! Every duration here is a default for the matching [`SyncConfig`](crate::SyncConfig) field.

use std::time::Duration;

/// Quiet period after the last local edit before it is published.
pub const COALESCE_DELAY: Duration = Duration::from_millis(500);

/// How long after a publish the next inbound snapshot is treated as our echo.
pub const ECHO_WINDOW: Duration = Duration::from_millis(100);

/// Cadence of the local participant's presence heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// A participant whose last heartbeat is older than this is not active.
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(30);

/// How often the active set is re-derived without any store change, so that
/// silent participants age out.
pub const PRESENCE_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the replica and presence event broadcast channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Length of generated room ids.
pub const ROOM_ID_LEN: usize = 7;

/// Alphabet room ids are sampled from.
pub const ROOM_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
