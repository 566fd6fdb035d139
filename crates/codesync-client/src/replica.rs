//! The client's copy of a room document and its sync decisions.
//!
//! [`DocumentReplica`] is a pure state machine: it owns the working copy, the
//! [`Coalescer`] for outbound edits, and the [`EchoGuard`] for inbound
//! snapshots, and it performs no I/O. The replica actor feeds it local
//! commands, subscription events, timer wake-ups, and publish completions, and
//! carries out the [`PublishRequest`]s it hands back.
//!
//! # State Machine
//!
//! ```text
//! +-----------+  first snapshot (always adopted)
//! |  Syncing  | ------------------------------------+
//! +-----------+                                     v
//!                    local edit / language /   +----------+
//!        +---------- replace / suggestion ---- |   Idle   |
//!        v                                     +----------+
//! +-----------+  latest publish saved,              ^
//! |   Dirty   |  nothing pending ------------------>|
//! +-----------+  differing remote snapshot -------->+
//!       |
//!       |   room deleted / subscription error / leave (from any state)
//!       v
//! +-----------+
//! |  Closed   |  terminal
//! +-----------+
//! ```
//!
//! Last write wins at the store. An accepted remote snapshot replaces the
//! working copy wholesale and drops any coalesced publish that had not fired
//! yet, so a remote write is never silently overwritten by a stale local one.

use std::fmt;
use std::time::Duration;

use codesync_types::{DocumentFields, Language};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::coalescer::Coalescer;
use crate::echo::{EchoCheck, EchoGuard};
use crate::store::{DocumentEvent, StoreError};

// ============================================================================
// Types
// ============================================================================

/// Errors from replica operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplicaError {
    #[error("replica is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicaPhase {
    /// Waiting for the first snapshot.
    Syncing,
    /// Working copy matches the last known remote state.
    Idle,
    /// Local changes not yet confirmed by the store.
    Dirty,
    /// Terminated; no further events are processed.
    Closed,
}

impl fmt::Display for ReplicaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Syncing => "syncing",
            Self::Idle => "idle",
            Self::Dirty => "dirty",
            Self::Closed => "closed",
        })
    }
}

/// Why a replica stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The room document no longer exists.
    RoomDeleted,
    /// The document subscription failed.
    SubscriptionLost(String),
    /// The owner left the room.
    Left,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoomDeleted => f.write_str("room deleted"),
            Self::SubscriptionLost(reason) => write!(f, "subscription lost: {reason}"),
            Self::Left => f.write_str("left"),
        }
    }
}

/// A write the owner must issue to the store (merge = true).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub fields: DocumentFields,
    /// Monotonic per replica; identifies the completion.
    pub ticket: u64,
}

/// Result of feeding a publish completion back in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted by the store.
    Saved,
    /// Rejected; the working copy is retained.
    Failed(StoreError),
    /// The replica closed while the write was in flight.
    Stale,
}

/// Result of feeding a subscription event in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Treated as the echo of our own publish.
    Suppressed,
    /// Identical to the working copy.
    Unchanged,
    /// Replaced the working copy; the editing surface should show it.
    Adopted(DocumentFields),
    /// The replica is now closed.
    Terminated(TerminationReason),
    /// The replica was already closed.
    Ignored,
}

// ============================================================================
// DocumentReplica
// ============================================================================

#[derive(Debug, Clone)]
pub struct DocumentReplica {
    phase: ReplicaPhase,
    working: DocumentFields,
    coalescer: Coalescer<DocumentFields>,
    echo: EchoGuard,
    /// Ticket of the most recently issued publish (0 = none yet).
    latest_ticket: u64,
    termination: Option<TerminationReason>,
}

impl DocumentReplica {
    pub fn new(coalesce_delay: Duration, echo_window: Duration) -> Self {
        Self {
            phase: ReplicaPhase::Syncing,
            working: DocumentFields::default(),
            coalescer: Coalescer::new(coalesce_delay),
            echo: EchoGuard::new(echo_window),
            latest_ticket: 0,
            termination: None,
        }
    }

    pub fn phase(&self) -> ReplicaPhase {
        self.phase
    }

    pub fn working(&self) -> &DocumentFields {
        &self.working
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ReplicaPhase::Closed
    }

    pub fn termination(&self) -> Option<&TerminationReason> {
        self.termination.as_ref()
    }

    /// Whether a coalesced publish is waiting for its quiet period.
    pub fn has_pending_publish(&self) -> bool {
        self.coalescer.is_pending()
    }

    /// When the pending coalesced publish is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.coalescer.deadline()
    }

    fn ensure_open(&self) -> Result<(), ReplicaError> {
        if self.is_closed() {
            Err(ReplicaError::Closed)
        } else {
            Ok(())
        }
    }

    fn issue(&mut self, fields: DocumentFields, now: Instant) -> PublishRequest {
        self.echo.arm(now);
        self.latest_ticket += 1;
        trace!(ticket = self.latest_ticket, "issuing publish");
        PublishRequest {
            fields,
            ticket: self.latest_ticket,
        }
    }

    // ── Local changes ───────────────────────────────────────────────────

    /// Record an edit to the code and (re)start the quiet period.
    pub fn apply_local_edit(
        &mut self,
        code: impl Into<String>,
        now: Instant,
    ) -> Result<(), ReplicaError> {
        self.ensure_open()?;
        self.working.code = code.into();
        self.phase = ReplicaPhase::Dirty;
        self.coalescer.schedule(self.working.clone(), now);
        Ok(())
    }

    /// Append an assistant suggestion on a new line, as a local edit.
    pub fn append_suggestion(&mut self, suggestion: &str, now: Instant) -> Result<(), ReplicaError> {
        self.ensure_open()?;
        let code = format!("{}\n{}", self.working.code, suggestion);
        self.apply_local_edit(code, now)
    }

    /// Switch language: the code becomes that language's template and the
    /// pair is published at once, superseding any coalesced edit.
    pub fn change_language(
        &mut self,
        language: Language,
        now: Instant,
    ) -> Result<PublishRequest, ReplicaError> {
        self.replace_document(DocumentFields::template(language), now)
    }

    /// Replace the whole pair and publish at once.
    pub fn replace_document(
        &mut self,
        fields: DocumentFields,
        now: Instant,
    ) -> Result<PublishRequest, ReplicaError> {
        self.ensure_open()?;
        if self.coalescer.cancel() {
            debug!("immediate publish supersedes pending edit");
        }
        self.working = fields;
        self.phase = ReplicaPhase::Dirty;
        Ok(self.issue(self.working.clone(), now))
    }

    /// Timer wake-up: the coalesced publish, if its quiet period is over.
    pub fn poll_publish(&mut self, now: Instant) -> Option<PublishRequest> {
        if self.is_closed() {
            return None;
        }
        let fields = self.coalescer.fire(now)?;
        Some(self.issue(fields, now))
    }

    /// Publish a pending coalesced value without waiting.
    pub fn flush_now(&mut self, now: Instant) -> Option<PublishRequest> {
        if self.is_closed() {
            return None;
        }
        let fields = self.coalescer.flush_now()?;
        Some(self.issue(fields, now))
    }

    /// Feed back the store's answer to a publish.
    pub fn publish_completed(
        &mut self,
        ticket: u64,
        result: Result<(), StoreError>,
    ) -> PublishOutcome {
        if self.is_closed() {
            return PublishOutcome::Stale;
        }
        let latest = ticket == self.latest_ticket;
        match result {
            Ok(()) => {
                if latest && self.phase == ReplicaPhase::Dirty && !self.coalescer.is_pending() {
                    self.phase = ReplicaPhase::Idle;
                }
                PublishOutcome::Saved
            }
            Err(error) => {
                // No echo is coming for a rejected write.
                if latest {
                    self.echo.disarm();
                    if self.phase == ReplicaPhase::Idle {
                        self.phase = ReplicaPhase::Dirty;
                    }
                }
                PublishOutcome::Failed(error)
            }
        }
    }

    // ── Remote changes ──────────────────────────────────────────────────

    pub fn on_remote_event(&mut self, event: DocumentEvent, now: Instant) -> RemoteOutcome {
        if self.is_closed() {
            return RemoteOutcome::Ignored;
        }
        match event {
            DocumentEvent::Snapshot(fields) => {
                self.on_remote_snapshot(DocumentFields::from_fields(&fields), now)
            }
            DocumentEvent::Deleted => self.terminate(TerminationReason::RoomDeleted),
            DocumentEvent::Error(error) => {
                self.terminate(TerminationReason::SubscriptionLost(error.to_string()))
            }
        }
    }

    pub fn on_remote_snapshot(&mut self, remote: DocumentFields, now: Instant) -> RemoteOutcome {
        if self.is_closed() {
            return RemoteOutcome::Ignored;
        }
        if self.phase == ReplicaPhase::Syncing {
            return self.adopt(remote);
        }
        if self.echo.check_inbound(now) == EchoCheck::Suppress {
            trace!("suppressed echo of own publish");
            return RemoteOutcome::Suppressed;
        }
        if remote == self.working {
            return RemoteOutcome::Unchanged;
        }
        self.adopt(remote)
    }

    fn adopt(&mut self, remote: DocumentFields) -> RemoteOutcome {
        if self.coalescer.cancel() {
            debug!("remote snapshot dropped pending local edit");
        }
        self.working = remote.clone();
        self.phase = ReplicaPhase::Idle;
        RemoteOutcome::Adopted(remote)
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Leave the room: any pending coalesced value is dropped unpublished.
    pub fn leave(&mut self) -> RemoteOutcome {
        if self.is_closed() {
            return RemoteOutcome::Ignored;
        }
        self.terminate(TerminationReason::Left)
    }

    fn terminate(&mut self, reason: TerminationReason) -> RemoteOutcome {
        self.coalescer.cancel();
        self.echo.disarm();
        self.phase = ReplicaPhase::Closed;
        self.termination = Some(reason.clone());
        debug!(%reason, "replica closed");
        RemoteOutcome::Terminated(reason)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const D: Duration = Duration::from_millis(500);
    const W: Duration = Duration::from_millis(100);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn synced(t0: Instant, code: &str) -> DocumentReplica {
        let mut r = DocumentReplica::new(D, W);
        let outcome = r.on_remote_snapshot(DocumentFields::new(code, Language::Javascript), t0);
        assert!(matches!(outcome, RemoteOutcome::Adopted(_)));
        r
    }

    #[test]
    fn test_first_snapshot_always_adopted() {
        let t0 = Instant::now();
        let mut r = DocumentReplica::new(D, W);
        assert_eq!(r.phase(), ReplicaPhase::Syncing);

        let doc = DocumentFields::default();
        assert_eq!(
            r.on_remote_snapshot(doc.clone(), t0),
            RemoteOutcome::Adopted(doc)
        );
        assert_eq!(r.phase(), ReplicaPhase::Idle);
    }

    #[test]
    fn test_edits_coalesce_into_one_publish() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");

        for (i, code) in ["a", "ab", "abc"].iter().enumerate() {
            r.apply_local_edit(*code, t0 + ms(100 * i as u64)).unwrap();
            assert_eq!(r.phase(), ReplicaPhase::Dirty);
        }
        assert_eq!(r.poll_publish(t0 + ms(600)), None);

        let publish = r.poll_publish(t0 + ms(700)).unwrap();
        assert_eq!(publish.fields.code, "abc");
        assert_eq!(publish.ticket, 1);
        assert_eq!(r.poll_publish(t0 + ms(2_000)), None);
    }

    #[test]
    fn test_saved_publish_returns_to_idle() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        r.apply_local_edit("x", t0).unwrap();
        let publish = r.poll_publish(t0 + D).unwrap();

        assert_eq!(r.publish_completed(publish.ticket, Ok(())), PublishOutcome::Saved);
        assert_eq!(r.phase(), ReplicaPhase::Idle);
    }

    #[test]
    fn test_save_of_older_ticket_keeps_dirty() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        let first = r.change_language(Language::Python, t0).unwrap();
        let second = r.change_language(Language::Cpp, t0 + ms(10)).unwrap();
        assert!(second.ticket > first.ticket);

        r.publish_completed(first.ticket, Ok(()));
        assert_eq!(r.phase(), ReplicaPhase::Dirty);
        r.publish_completed(second.ticket, Ok(()));
        assert_eq!(r.phase(), ReplicaPhase::Idle);
    }

    #[test]
    fn test_save_while_edit_pending_keeps_dirty() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        r.apply_local_edit("x", t0).unwrap();
        let publish = r.poll_publish(t0 + D).unwrap();
        r.apply_local_edit("xy", t0 + D + ms(10)).unwrap();

        r.publish_completed(publish.ticket, Ok(()));
        assert_eq!(r.phase(), ReplicaPhase::Dirty);
        assert!(r.has_pending_publish());
    }

    #[test]
    fn test_failed_publish_keeps_working_copy() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        r.apply_local_edit("draft", t0).unwrap();
        let publish = r.poll_publish(t0 + D).unwrap();

        let outcome = r.publish_completed(publish.ticket, Err(StoreError::Unavailable));
        assert_eq!(outcome, PublishOutcome::Failed(StoreError::Unavailable));
        assert_eq!(r.phase(), ReplicaPhase::Dirty);
        assert_eq!(r.working().code, "draft");

        // The guard was disarmed, so a genuine remote change is not eaten.
        let remote = DocumentFields::new("theirs", Language::Javascript);
        assert_eq!(
            r.on_remote_snapshot(remote.clone(), t0 + D + ms(10)),
            RemoteOutcome::Adopted(remote)
        );
    }

    #[test]
    fn test_echo_suppressed_once() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        r.apply_local_edit("mine", t0).unwrap();
        let publish = r.poll_publish(t0 + D).unwrap();

        assert_eq!(
            r.on_remote_snapshot(publish.fields.clone(), t0 + D + ms(20)),
            RemoteOutcome::Suppressed
        );
        let other = DocumentFields::new("theirs", Language::Javascript);
        assert_eq!(
            r.on_remote_snapshot(other.clone(), t0 + D + ms(40)),
            RemoteOutcome::Adopted(other)
        );
    }

    #[test]
    fn test_identical_snapshot_is_unchanged() {
        let t0 = Instant::now();
        let mut r = synced(t0, "same");
        assert_eq!(
            r.on_remote_snapshot(DocumentFields::new("same", Language::Javascript), t0),
            RemoteOutcome::Unchanged
        );
    }

    #[test]
    fn test_remote_snapshot_drops_pending_edit() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        r.apply_local_edit("local", t0).unwrap();

        let remote = DocumentFields::new("remote", Language::Python);
        r.on_remote_snapshot(remote.clone(), t0 + ms(100));
        assert_eq!(r.working(), &remote);
        assert_eq!(r.phase(), ReplicaPhase::Idle);
        assert_eq!(r.poll_publish(t0 + ms(5_000)), None);
    }

    #[test]
    fn test_change_language_bypasses_coalescer() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        r.apply_local_edit("typed", t0).unwrap();

        let publish = r.change_language(Language::Python, t0 + ms(50)).unwrap();
        assert_eq!(publish.fields, DocumentFields::template(Language::Python));
        assert!(!r.has_pending_publish());
        assert_eq!(r.poll_publish(t0 + ms(5_000)), None);
    }

    #[test]
    fn test_append_suggestion_joins_with_newline() {
        let t0 = Instant::now();
        let mut r = synced(t0, "let a = 1;");
        r.append_suggestion("let b = 2;", t0).unwrap();
        assert_eq!(r.working().code, "let a = 1;\nlet b = 2;");
        assert_eq!(r.phase(), ReplicaPhase::Dirty);
    }

    #[test]
    fn test_leave_drops_pending_and_rejects_edits() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        r.apply_local_edit("x", t0).unwrap();

        assert_eq!(r.leave(), RemoteOutcome::Terminated(TerminationReason::Left));
        assert_eq!(r.poll_publish(t0 + D), None);
        assert_eq!(r.flush_now(t0 + D), None);
        assert_eq!(r.apply_local_edit("y", t0 + D), Err(ReplicaError::Closed));
        assert_eq!(r.leave(), RemoteOutcome::Ignored);
    }

    #[test]
    fn test_deleted_and_error_terminate() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        assert_eq!(
            r.on_remote_event(DocumentEvent::Deleted, t0),
            RemoteOutcome::Terminated(TerminationReason::RoomDeleted)
        );
        assert_eq!(r.phase(), ReplicaPhase::Closed);

        let mut r = synced(t0, "");
        let outcome = r.on_remote_event(
            DocumentEvent::Error(StoreError::Subscription("gone".into())),
            t0,
        );
        assert!(matches!(
            outcome,
            RemoteOutcome::Terminated(TerminationReason::SubscriptionLost(_))
        ));
    }

    #[test]
    fn test_completion_after_close_is_stale() {
        let t0 = Instant::now();
        let mut r = synced(t0, "");
        let publish = r.change_language(Language::Cpp, t0).unwrap();
        r.leave();
        assert_eq!(r.publish_completed(publish.ticket, Ok(())), PublishOutcome::Stale);
    }

    #[test]
    fn test_malformed_remote_payload_defaults() {
        let t0 = Instant::now();
        let mut r = DocumentReplica::new(D, W);
        let mut fields = codesync_types::Fields::new();
        fields.insert("language".into(), serde_json::json!("cobol"));

        let outcome = r.on_remote_event(DocumentEvent::Snapshot(fields), t0);
        assert_eq!(
            outcome,
            RemoteOutcome::Adopted(DocumentFields::new("", Language::Javascript))
        );
    }
}
