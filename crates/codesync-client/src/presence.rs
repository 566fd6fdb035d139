//! Who is in the room right now.
//!
//! Presence is soft state. Each client upserts its own participant record on a
//! fixed heartbeat, and the store stamps the record's update time. Observers
//! subscribe to every participant record and decide liveness locally: a
//! participant is active while `now - last_seen < liveness_window`. Nothing is
//! ever deleted, so a closed tab simply ages out.
//!
//! Liveness depends on the clock as well as the store, so the active set is
//! re-derived on every record delivery *and* on a periodic recheck tick.
//! Without the tick, a participant who stops heartbeating would stay listed
//! until some unrelated record changed.

use std::sync::Arc;
use std::time::Duration;

use codesync_types::participant::ANONYMOUS_NAME;
use codesync_types::{Identity, Participant, ParticipantBody, ParticipantId, RoomId};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::store::{CollectionEvent, CollectionKind, RemoteStore, StoreError, StoredRecord};

/// Non-fatal presence notices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A heartbeat write failed; the next tick retries.
    HeartbeatFailed(StoreError),
    /// The participant subscription ended; the active set is frozen.
    SubscriptionLost(StoreError),
}

/// Decode a participant record. `last_seen` is the record's update time.
pub fn participant_from_record(record: &StoredRecord) -> Participant {
    let display_name = record
        .decode::<ParticipantBody>()
        .map(|body| body.display_name)
        .unwrap_or_else(|_| ANONYMOUS_NAME.to_string());
    Participant {
        id: ParticipantId::new(record.id.clone()),
        display_name,
        last_seen: record.updated_at,
    }
}

/// The active subset of `participants` at `now_ms`, ordered by display name.
pub fn derive_active(participants: &[Participant], now_ms: u64, window: Duration) -> Vec<Participant> {
    let mut active: Vec<Participant> = participants
        .iter()
        .filter(|p| p.is_active(now_ms, window))
        .cloned()
        .collect();
    active.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.id.cmp(&b.id))
    });
    active
}

// ============================================================================
// PresenceRegistry
// ============================================================================

/// Heartbeats the local participant and observes everyone else.
pub struct PresenceRegistry {
    store: Arc<dyn RemoteStore>,
    room: RoomId,
    identity: Identity,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl PresenceRegistry {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        room: RoomId,
        identity: Identity,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            room,
            identity,
            clock,
            config,
        }
    }

    /// Upsert the local participant record once.
    pub async fn heartbeat(&self) -> Result<(), StoreError> {
        heartbeat(self.store.as_ref(), &self.room, &self.identity).await
    }

    /// Start heartbeating and observing. Stops when the handle is left or
    /// dropped.
    pub async fn start(self) -> Result<PresenceHandle, StoreError> {
        let subscription = self
            .store
            .subscribe_collection(&self.room, CollectionKind::Participants, None)
            .await?;

        let cancel = CancellationToken::new();
        let (active_tx, active_rx) = watch::channel(Vec::new());
        let (events, _) = broadcast::channel(self.config.event_capacity);

        let (identity, identity_rx) = watch::channel(self.identity.clone());
        let heartbeat_task = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.store),
            self.room.clone(),
            identity_rx,
            self.config.heartbeat_interval(),
            events.clone(),
            cancel.clone(),
        ));

        let observer = Observer {
            room: self.room.clone(),
            clock: Arc::clone(&self.clock),
            window: self.config.liveness_window(),
            records: Vec::new(),
            active: active_tx,
            events: events.clone(),
        };
        let observer_task = tokio::spawn(observer.run(
            subscription,
            self.config.presence_recheck(),
            cancel.clone(),
        ));

        debug!(room = %self.room, participant = %self.identity.participant_id, "presence started");
        Ok(PresenceHandle {
            identity,
            active: active_rx,
            events,
            cancel,
            tasks: vec![heartbeat_task, observer_task],
        })
    }
}

async fn heartbeat(
    store: &dyn RemoteStore,
    room: &RoomId,
    identity: &Identity,
) -> Result<(), StoreError> {
    let body = ParticipantBody {
        display_name: identity.display_name.clone(),
    };
    let data = serde_json::to_value(&body).map_err(|e| StoreError::Write(e.to_string()))?;
    store
        .put_record(room, CollectionKind::Participants, identity.participant_id.as_str(), data)
        .await
}

/// Heartbeats on every tick, and at once whenever the identity changes.
async fn heartbeat_loop(
    store: Arc<dyn RemoteStore>,
    room: RoomId,
    mut identity: watch::Receiver<Identity>,
    every: Duration,
    events: broadcast::Sender<PresenceEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            changed = identity.changed() => {
                if changed.is_err() {
                    break;
                }
                ticker.reset();
            }
        }
        let current = identity.borrow_and_update().clone();
        if let Err(error) = heartbeat(store.as_ref(), &room, &current).await {
            warn!(%room, %error, "presence heartbeat failed");
            let _ = events.send(PresenceEvent::HeartbeatFailed(error));
        }
    }
}

struct Observer {
    room: RoomId,
    clock: Arc<dyn Clock>,
    window: Duration,
    records: Vec<Participant>,
    active: watch::Sender<Vec<Participant>>,
    events: broadcast::Sender<PresenceEvent>,
}

impl Observer {
    async fn run(
        mut self,
        mut subscription: crate::store::CollectionSubscription,
        recheck: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(recheck);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = subscription.recv() => match event {
                    Some(CollectionEvent::Snapshot(records)) => {
                        self.records = records.iter().map(participant_from_record).collect();
                        self.refresh();
                    }
                    Some(CollectionEvent::Error(error)) => {
                        self.lost(error);
                        break;
                    }
                    None => {
                        self.lost(StoreError::Subscription("closed by store".into()));
                        break;
                    }
                },
                _ = ticker.tick() => self.refresh(),
            }
        }
    }

    fn refresh(&self) {
        let active = derive_active(&self.records, self.clock.now_millis(), self.window);
        self.active.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
    }

    fn lost(&self, error: StoreError) {
        warn!(room = %self.room, %error, "participant subscription lost");
        let _ = self.events.send(PresenceEvent::SubscriptionLost(error));
    }
}

// ============================================================================
// PresenceHandle
// ============================================================================

/// A running presence registry.
pub struct PresenceHandle {
    identity: watch::Sender<Identity>,
    active: watch::Receiver<Vec<Participant>>,
    events: broadcast::Sender<PresenceEvent>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PresenceHandle {
    /// Currently active participants.
    pub fn active(&self) -> Vec<Participant> {
        self.active.borrow().clone()
    }

    /// A receiver that is notified whenever the active set changes.
    pub fn watch(&self) -> watch::Receiver<Vec<Participant>> {
        self.active.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }

    /// The identity heartbeats are written with.
    pub fn identity(&self) -> Identity {
        self.identity.borrow().clone()
    }

    /// Heartbeat as `identity` from now on, starting immediately.
    pub fn set_identity(&self, identity: Identity) {
        self.identity.send_replace(identity);
    }

    /// Whether heartbeating and observing have stopped.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop heartbeating and observing.
    pub async fn leave(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for PresenceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use serde_json::json;

    const WINDOW: Duration = Duration::from_millis(30_000);

    fn participant(id: &str, name: &str, last_seen: u64) -> Participant {
        Participant {
            id: ParticipantId::new(id),
            display_name: name.into(),
            last_seen,
        }
    }

    #[test]
    fn test_derive_active_filters_and_sorts() {
        let all = vec![
            participant("p1", "zed", 0),
            participant("p2", "ada", 10_000),
            participant("p3", "bob", 25_000),
        ];
        let active = derive_active(&all, 31_000, WINDOW);
        let names: Vec<_> = active.iter().map(|p| p.display_name.as_str()).collect();
        assert_eq!(names, vec!["ada", "bob"]);
    }

    #[test]
    fn test_record_without_display_name_is_anonymous() {
        let record = StoredRecord {
            id: "p1".into(),
            seq: 1,
            created_at: 5,
            updated_at: 9,
            data: json!({}),
        };
        let p = participant_from_record(&record);
        assert_eq!(p.display_name, ANONYMOUS_NAME);
        assert_eq!(p.last_seen, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_upserts_single_record() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let identity = Identity::anonymous(ParticipantId::new("abcd1234"));
        let registry = PresenceRegistry::new(
            store.clone(),
            RoomId::new("r1"),
            identity,
            clock.clone(),
            SyncConfig::default(),
        );

        registry.heartbeat().await.unwrap();
        clock.set(2_000);
        registry.heartbeat().await.unwrap();

        let records = store.records(&RoomId::new("r1"), CollectionKind::Participants);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].updated_at, 2_000);
        assert_eq!(records[0].data["displayName"], json!("Guest-ABCD"));
    }
}
