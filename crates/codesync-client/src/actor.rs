//! Event loop that owns a [`DocumentReplica`] and talks to the store.
//!
//! The loop is the only place the replica state lives. Everything that can
//! change it arrives as an event and is processed one at a time:
//!
//! ```text
//!   ReplicaHandle (Clone+Send)   mpsc     ReplicaActor (tokio task)
//!   ┌──────────────────────┐  ───────▶  ┌─────────────────────────────────┐
//!   │ .edit()              │            │ select! {                       │
//!   │ .change_language()   │            │   command                       │
//!   │ .snapshot() / leave()│  ◀───────  │   document subscription event   │
//!   └──────────────────────┘  oneshot   │   publish completion            │
//!              ▲                        │   coalescing deadline           │
//!              │        broadcast       │ }                               │
//!              └─────── ReplicaEvent ── └─────────────────────────────────┘
//! ```
//!
//! Publishes run as spawned tasks so a slow store never stalls the loop;
//! their results come back through a completion channel. Leaving cancels the
//! timer and the subscription. A publish already in flight is not aborted,
//! its completion is just never observed.

use std::sync::Arc;

use codesync_types::{DocumentFields, Language, RoomId};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::replica::{
    DocumentReplica, PublishOutcome, PublishRequest, RemoteOutcome, ReplicaError, ReplicaPhase,
    TerminationReason,
};
use crate::store::{DocumentEvent, DocumentSubscription, RemoteStore, StoreError};

// ============================================================================
// Events
// ============================================================================

/// Notifications for the editing surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaEvent {
    /// The working copy was replaced by remote content.
    RemoteUpdate(DocumentFields),
    PhaseChanged(ReplicaPhase),
    /// A publish was accepted by the store.
    Published { ticket: u64 },
    /// A publish was rejected. The working copy is kept; nothing is retried
    /// until the next local change.
    WriteFailed { ticket: u64, error: StoreError },
    /// The replica stopped. The owner should leave the room.
    Terminated(TerminationReason),
}

/// Point-in-time view of a replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    pub phase: ReplicaPhase,
    pub fields: DocumentFields,
    pub pending_publish: bool,
}

// ============================================================================
// Commands (internal)
// ============================================================================

enum ReplicaCommand {
    LocalEdit {
        code: String,
    },
    AppendSuggestion {
        text: String,
    },
    ChangeLanguage {
        language: Language,
    },
    ReplaceDocument {
        fields: DocumentFields,
    },
    Flush,
    Snapshot {
        reply: oneshot::Sender<ReplicaSnapshot>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

type Completion = (u64, Result<(), StoreError>);

// ============================================================================
// ReplicaHandle (public, Clone + Send + Sync)
// ============================================================================

/// Handle to a running replica. Cloning shares the same replica.
#[derive(Clone)]
pub struct ReplicaHandle {
    room: RoomId,
    tx: mpsc::UnboundedSender<ReplicaCommand>,
    events: broadcast::Sender<ReplicaEvent>,
    termination: watch::Receiver<Option<TerminationReason>>,
}

impl std::fmt::Debug for ReplicaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaHandle")
            .field("room", &self.room)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ReplicaHandle {
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Whether the event loop has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Receive replica events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.events.subscribe()
    }

    /// Why the replica stopped, once it has.
    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination.borrow().clone()
    }

    /// Resolves when the replica stops, including by [`leave`](Self::leave).
    ///
    /// Unlike [`ReplicaEvent::Terminated`] this cannot be missed by a late
    /// subscriber.
    pub async fn terminated(&self) -> TerminationReason {
        let mut rx = self.termination.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or(TerminationReason::Left),
            // Actor gone without recording a reason.
            Err(_) => TerminationReason::Left,
        }
    }

    fn send(&self, cmd: ReplicaCommand) -> Result<(), ReplicaError> {
        self.tx.send(cmd).map_err(|_| ReplicaError::Closed)
    }

    /// Replace the code with `code` (one keystroke's worth of change).
    pub fn edit(&self, code: impl Into<String>) -> Result<(), ReplicaError> {
        self.send(ReplicaCommand::LocalEdit { code: code.into() })
    }

    /// Append an assistant suggestion on a new line.
    pub fn append_suggestion(&self, text: impl Into<String>) -> Result<(), ReplicaError> {
        self.send(ReplicaCommand::AppendSuggestion { text: text.into() })
    }

    /// Switch language; publishes the template immediately.
    pub fn change_language(&self, language: Language) -> Result<(), ReplicaError> {
        self.send(ReplicaCommand::ChangeLanguage { language })
    }

    /// Publish a whole new `{code, language}` pair immediately.
    pub fn replace_document(&self, fields: DocumentFields) -> Result<(), ReplicaError> {
        self.send(ReplicaCommand::ReplaceDocument { fields })
    }

    /// Publish a pending coalesced edit without waiting for the quiet period.
    pub fn flush(&self) -> Result<(), ReplicaError> {
        self.send(ReplicaCommand::Flush)
    }

    pub async fn snapshot(&self) -> Result<ReplicaSnapshot, ReplicaError> {
        let (reply, rx) = oneshot::channel();
        self.send(ReplicaCommand::Snapshot { reply })?;
        rx.await.map_err(|_| ReplicaError::Closed)
    }

    /// Stop the replica. A pending coalesced edit is dropped unpublished.
    /// Leaving an already-closed replica is a no-op.
    pub async fn leave(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(ReplicaCommand::Leave { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

// ============================================================================
// ReplicaActor (internal, runs in a tokio task)
// ============================================================================

struct ReplicaActor {
    room: RoomId,
    store: Arc<dyn RemoteStore>,
    replica: DocumentReplica,
    events: broadcast::Sender<ReplicaEvent>,
    completions: mpsc::UnboundedSender<Completion>,
    termination: watch::Sender<Option<TerminationReason>>,
    /// Answered once the Terminated event is out.
    leave_reply: Option<oneshot::Sender<()>>,
}

impl ReplicaActor {
    fn emit(&self, event: ReplicaEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ReplicaCommand>,
        mut subscription: DocumentSubscription,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        debug!(room = %self.room, "replica started");
        while !self.replica.is_closed() {
            let before = self.replica.phase();
            let deadline = self.replica.next_deadline();

            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    // Every handle dropped.
                    None => {
                        self.replica.leave();
                    }
                },
                event = subscription.recv() => {
                    let event = event.unwrap_or_else(|| {
                        DocumentEvent::Error(StoreError::Subscription("closed by store".into()))
                    });
                    self.handle_remote(event);
                }
                Some((ticket, result)) = completions.recv() => {
                    self.handle_completion(ticket, result);
                }
                _ = sleep_until_opt(deadline) => {
                    if let Some(request) = self.replica.poll_publish(Instant::now()) {
                        self.publish(request);
                    }
                }
            }

            let after = self.replica.phase();
            if after != before {
                self.emit(ReplicaEvent::PhaseChanged(after));
            }
        }

        subscription.cancel();
        if let Some(reason) = self.replica.termination().cloned() {
            info!(room = %self.room, %reason, "replica terminated");
            self.termination.send_replace(Some(reason.clone()));
            self.emit(ReplicaEvent::Terminated(reason));
        }
        if let Some(reply) = self.leave_reply.take() {
            let _ = reply.send(());
        }
    }

    fn handle_command(&mut self, cmd: ReplicaCommand) {
        let now = Instant::now();
        match cmd {
            ReplicaCommand::LocalEdit { code } => {
                let _ = self.replica.apply_local_edit(code, now);
            }
            ReplicaCommand::AppendSuggestion { text } => {
                let _ = self.replica.append_suggestion(&text, now);
            }
            ReplicaCommand::ChangeLanguage { language } => {
                if let Ok(request) = self.replica.change_language(language, now) {
                    self.publish(request);
                }
            }
            ReplicaCommand::ReplaceDocument { fields } => {
                if let Ok(request) = self.replica.replace_document(fields, now) {
                    self.publish(request);
                }
            }
            ReplicaCommand::Flush => {
                if let Some(request) = self.replica.flush_now(now) {
                    self.publish(request);
                }
            }
            ReplicaCommand::Snapshot { reply } => {
                let _ = reply.send(ReplicaSnapshot {
                    phase: self.replica.phase(),
                    fields: self.replica.working().clone(),
                    pending_publish: self.replica.has_pending_publish(),
                });
            }
            ReplicaCommand::Leave { reply } => {
                self.replica.leave();
                self.leave_reply = Some(reply);
            }
        }
    }

    fn handle_remote(&mut self, event: DocumentEvent) {
        match self.replica.on_remote_event(event, Instant::now()) {
            RemoteOutcome::Adopted(fields) => self.emit(ReplicaEvent::RemoteUpdate(fields)),
            RemoteOutcome::Terminated(reason) => {
                warn!(room = %self.room, %reason, "document subscription ended");
            }
            RemoteOutcome::Suppressed | RemoteOutcome::Unchanged | RemoteOutcome::Ignored => {}
        }
    }

    fn handle_completion(&mut self, ticket: u64, result: Result<(), StoreError>) {
        match self.replica.publish_completed(ticket, result) {
            PublishOutcome::Saved => self.emit(ReplicaEvent::Published { ticket }),
            PublishOutcome::Failed(error) => {
                warn!(room = %self.room, ticket, %error, "publish failed");
                self.emit(ReplicaEvent::WriteFailed { ticket, error });
            }
            PublishOutcome::Stale => {}
        }
    }

    fn publish(&self, request: PublishRequest) {
        let store = Arc::clone(&self.store);
        let room = self.room.clone();
        let done = self.completions.clone();
        debug!(%room, ticket = request.ticket, "publishing");
        tokio::spawn(async move {
            let result = store
                .set_document(&room, request.fields.to_fields(), true)
                .await;
            let _ = done.send((request.ticket, result));
        });
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Subscribe to `room` and start its replica.
///
/// The replica starts in [`ReplicaPhase::Syncing`]; the store's first
/// snapshot moves it to `Idle` and arrives as [`ReplicaEvent::RemoteUpdate`].
pub async fn spawn_replica(
    store: Arc<dyn RemoteStore>,
    room: RoomId,
    config: &SyncConfig,
) -> Result<ReplicaHandle, StoreError> {
    let subscription = store.subscribe_document(&room).await?;

    let (tx, commands) = mpsc::unbounded_channel();
    let (completions_tx, completions) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(config.event_capacity);
    let (termination_tx, termination) = watch::channel(None);

    let actor = ReplicaActor {
        room: room.clone(),
        store,
        replica: DocumentReplica::new(config.coalesce_delay(), config.echo_window()),
        events: events.clone(),
        completions: completions_tx,
        termination: termination_tx,
        leave_reply: None,
    };
    tokio::spawn(actor.run(commands, subscription, completions));

    Ok(ReplicaHandle {
        room,
        tx,
        events,
        termination,
    })
}
