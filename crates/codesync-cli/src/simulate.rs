//! Simulated clients typing into one room.
//!
//! Every client joins the same room on a shared [`MemoryStore`], types random
//! characters at its own pace, says hello in chat, and flushes. After a quiet
//! period the replicas are compared with the stored document.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Args;
use codesync_client::{
    AnonymousIdentity, CollabClient, DocumentFields, MemoryStore, ReplicaEvent, ReplicaHandle,
    ReplicaPhase, RoomId, RoomSession, SyncConfig,
};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Number of simulated clients
    #[arg(long, default_value_t = 3)]
    pub clients: usize,

    /// Keystrokes per client
    #[arg(long, default_value_t = 20)]
    pub edits: usize,

    /// Mean pause between keystrokes
    #[arg(long, default_value_t = 120)]
    pub typing_interval_ms: u64,

    /// RNG seed for reproducible typing
    #[arg(long)]
    pub seed: Option<u64>,

    /// Sync configuration (RON); defaults apply when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Exit non-zero if the replicas do not converge
    #[arg(long)]
    pub strict: bool,
}

/// Event counts observed by one replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub published: usize,
    pub remote_updates: usize,
    pub write_failures: usize,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub room: RoomId,
    pub clients: usize,
    /// Accepted document writes, room creation included.
    pub store_writes: usize,
    pub tallies: Vec<Tally>,
    pub converged: bool,
    pub final_document: DocumentFields,
    pub active_participants: usize,
    pub messages: usize,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "room:          {}", self.room)?;
        writeln!(f, "clients:       {}", self.clients)?;
        writeln!(f, "store writes:  {}", self.store_writes)?;
        for (i, t) in self.tallies.iter().enumerate() {
            writeln!(
                f,
                "  client-{i}: published={} remote_updates={} write_failures={}",
                t.published, t.remote_updates, t.write_failures
            )?;
        }
        writeln!(f, "participants:  {}", self.active_participants)?;
        writeln!(f, "messages:      {}", self.messages)?;
        writeln!(
            f,
            "document:      {} chars of {}",
            self.final_document.code.len(),
            self.final_document.language.label()
        )?;
        write!(f, "converged:     {}", if self.converged { "yes" } else { "no" })
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    match path {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading sync config from {}", path.display())),
        None => Ok(SyncConfig::default()),
    }
}

#[instrument(skip_all, name = "simulate", fields(clients = args.clients, edits = args.edits))]
pub async fn run(args: &SimulateArgs) -> Result<Report> {
    ensure!(args.clients > 0, "at least one client is required");
    let config = load_config(args.config.as_ref())?;
    let seed = args.seed.unwrap_or_else(rand::random);
    info!(seed, "starting simulation");

    let store = Arc::new(MemoryStore::default());
    let client = |i: usize| {
        let identity = AnonymousIdentity::new().with_display_name(&format!("client-{i}"));
        CollabClient::new(store.clone(), Arc::new(identity)).with_config(config.clone())
    };

    let host = client(0)?.create_room().await.context("creating room")?;
    let room = host.room().clone();
    let mut sessions = vec![host];
    for i in 1..args.clients {
        let session = client(i)?
            .join_room(room.as_str())
            .await
            .with_context(|| format!("client-{i} joining {room}"))?;
        sessions.push(session);
    }

    let tallies: Vec<_> = sessions
        .iter()
        .map(|s| tokio::spawn(tally(s.replica().subscribe())))
        .collect();

    let interval = Duration::from_millis(args.typing_interval_ms);
    let typists: Vec<_> = sessions
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            tokio::spawn(type_into(s.replica().clone(), args.edits, interval, rng))
        })
        .collect();

    for session in &sessions {
        let greeting = format!("hello from {}", session.identity().display_name);
        session.send_message(&greeting).await?;
    }
    for typist in typists {
        typist.await.context("typist panicked")??;
    }

    // Let the last publishes land and their snapshots fan out.
    tokio::time::sleep(config.coalesce_delay() + config.echo_window() * 2 + Duration::from_millis(200))
        .await;

    let mut report = collect(&store, &room, &sessions).await?;
    for session in sessions {
        session.leave().await;
    }
    for handle in tallies {
        report.tallies.push(handle.await.unwrap_or_default());
    }

    if report.converged {
        info!(%room, writes = report.store_writes, "replicas converged");
    } else {
        warn!(%room, "replicas diverged");
    }
    Ok(report)
}

async fn collect(
    store: &MemoryStore,
    room: &RoomId,
    sessions: &[RoomSession],
) -> Result<Report> {
    let stored = store
        .document(room)
        .map(|fields| DocumentFields::from_fields(&fields))
        .context("room document disappeared")?;

    let mut converged = true;
    for (i, session) in sessions.iter().enumerate() {
        let snapshot = session.replica().snapshot().await?;
        if snapshot.fields != stored {
            warn!(client = i, phase = %snapshot.phase, "replica differs from store");
            converged = false;
        }
    }

    let mut stream = sessions[0].subscribe_messages().await?;
    let messages = match stream.recv().await {
        Some(Ok(messages)) => messages.len(),
        Some(Err(error)) => return Err(error.into()),
        None => 0,
    };

    Ok(Report {
        room: room.clone(),
        clients: sessions.len(),
        store_writes: store.document_write_count(room),
        tallies: Vec::new(),
        converged,
        final_document: stored,
        active_participants: sessions[0].presence().active().len(),
        messages,
    })
}

async fn type_into(
    replica: ReplicaHandle,
    edits: usize,
    interval: Duration,
    mut rng: StdRng,
) -> Result<()> {
    while replica.snapshot().await?.phase == ReplicaPhase::Syncing {
        tokio::task::yield_now().await;
    }

    let max_jitter = interval.as_millis() as u64;
    for _ in 0..edits {
        let mut code = replica.snapshot().await?.fields.code;
        code.push(rng.sample(Alphanumeric) as char);
        replica.edit(code)?;

        let jitter = rng.gen_range(0..=max_jitter);
        tokio::time::sleep(interval / 2 + Duration::from_millis(jitter / 2)).await;
    }
    replica.flush()?;
    Ok(())
}

async fn tally(mut events: broadcast::Receiver<ReplicaEvent>) -> Tally {
    let mut tally = Tally::default();
    loop {
        match events.recv().await {
            Ok(ReplicaEvent::Published { .. }) => tally.published += 1,
            Ok(ReplicaEvent::RemoteUpdate(_)) => tally.remote_updates += 1,
            Ok(ReplicaEvent::WriteFailed { .. }) => tally.write_failures += 1,
            Ok(ReplicaEvent::Terminated(_)) | Err(broadcast::error::RecvError::Closed) => break,
            Ok(ReplicaEvent::PhaseChanged(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        }
    }
    tally
}
