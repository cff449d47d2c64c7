//! Per-tournament actor.
//!
//! Each tournament's scheduler is owned by one spawned task that drains a
//! bounded command channel, so all operations on a tournament run
//! serially without a mutex. Different tournaments run independently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{SchedulerError, TournamentScheduler};
use crate::config::{RetryPolicy, SchedulerConfig};
use crate::engine::CompletionOutcome;
use crate::models::{
    MatchRecord, Participant, ParticipantId, PlayerId, RoundPairings, Standing, Tournament,
    TournamentId,
};
use crate::storage::TournamentStore;

type Reply<T> = oneshot::Sender<Result<T, SchedulerError>>;

enum Command {
    Join {
        player: PlayerId,
        reply: Reply<Participant>,
    },
    Leave {
        participant: ParticipantId,
        reply: Reply<()>,
    },
    Start {
        organizer: PlayerId,
        rounds_total: u32,
        reply: Reply<RoundPairings>,
    },
    MatchEvent {
        record: MatchRecord,
        reply: Reply<CompletionOutcome>,
    },
    Standings {
        reply: oneshot::Sender<Vec<Standing>>,
    },
    Status {
        reply: oneshot::Sender<Tournament>,
    },
}

/// Cloneable handle to a running tournament actor.
#[derive(Clone)]
pub struct TournamentHandle {
    id: TournamentId,
    tx: mpsc::Sender<Command>,
}

impl TournamentHandle {
    /// Move a scheduler into its own task.
    pub fn spawn(scheduler: TournamentScheduler, buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(buffer);
        let id = scheduler.id().clone();
        let task = tokio::spawn(run(scheduler, rx));
        (Self { id, tx }, task)
    }

    pub fn id(&self) -> &TournamentId {
        &self.id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SchedulerError::Stopped(self.id.clone()))?;
        rx.await.map_err(|_| SchedulerError::Stopped(self.id.clone()))
    }

    pub async fn join(&self, player: PlayerId) -> Result<Participant, SchedulerError> {
        self.request(|reply| Command::Join { player, reply }).await?
    }

    pub async fn leave(&self, participant: ParticipantId) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Leave { participant, reply })
            .await?
    }

    pub async fn start(
        &self,
        organizer: PlayerId,
        rounds_total: u32,
    ) -> Result<RoundPairings, SchedulerError> {
        self.request(|reply| Command::Start {
            organizer,
            rounds_total,
            reply,
        })
        .await?
    }

    /// Process one match notification and wait for its outcome.
    pub async fn on_match_event(
        &self,
        record: MatchRecord,
    ) -> Result<CompletionOutcome, SchedulerError> {
        self.request(|reply| Command::MatchEvent { record, reply })
            .await?
    }

    pub async fn standings(&self) -> Result<Vec<Standing>, SchedulerError> {
        self.request(|reply| Command::Standings { reply }).await
    }

    pub async fn status(&self) -> Result<Tournament, SchedulerError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Forward a match status stream into this actor.
    ///
    /// Transient failures are retried per `retry`. A record that still
    /// fails is parked and retried on a timer, so a result is not dropped
    /// while the stream is quiet. Anything else is logged and the feed
    /// moves on. The task ends when the stream closes or the actor stops.
    pub fn attach_feed(
        &self,
        mut feed: mpsc::UnboundedReceiver<MatchRecord>,
        retry: RetryPolicy,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let period = retry.delay(retry.max_retries).max(Duration::from_millis(1));
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let once = RetryPolicy {
                max_retries: 0,
                ..retry.clone()
            };
            let mut stalled: Vec<MatchRecord> = Vec::new();

            loop {
                tokio::select! {
                    next = feed.recv() => {
                        let Some(record) = next else { break };
                        match handle.deliver(record, &retry).await {
                            Delivery::Done => {}
                            Delivery::Stalled(record) => stalled.push(record),
                            Delivery::Stopped => return,
                        }
                    }
                    _ = ticker.tick(), if !stalled.is_empty() => {
                        debug!("Retrying {} stalled match(es)", stalled.len());
                        for record in std::mem::take(&mut stalled) {
                            match handle.deliver(record, &once).await {
                                Delivery::Done => {}
                                Delivery::Stalled(record) => stalled.push(record),
                                Delivery::Stopped => return,
                            }
                        }
                    }
                }
            }

            if !stalled.is_empty() {
                warn!(
                    "Match feed for {} closed with {} unapplied result(s); they apply on next load",
                    handle.id,
                    stalled.len()
                );
            }
            debug!("Match feed for {} closed", handle.id);
        })
    }

    async fn deliver(&self, record: MatchRecord, retry: &RetryPolicy) -> Delivery {
        let mut attempt = 0;
        loop {
            match self.on_match_event(record.clone()).await {
                Ok(outcome) => {
                    debug!("Match {} -> {:?}", record.id, outcome);
                    return Delivery::Done;
                }
                Err(SchedulerError::Stopped(id)) => {
                    debug!("Tournament {} stopped, detaching feed", id);
                    return Delivery::Stopped;
                }
                Err(e) if e.is_transient() && attempt < retry.max_retries => {
                    let delay = retry.delay(attempt);
                    warn!(
                        "Match {} failed ({}), retrying in {:?}",
                        record.id, e, delay
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!("Match {} still failing ({}), parking it", record.id, e);
                    return Delivery::Stalled(record);
                }
                Err(e) => {
                    error!("Match {} rejected: {}", record.id, e);
                    return Delivery::Done;
                }
            }
        }
    }
}

enum Delivery {
    Done,
    Stalled(MatchRecord),
    Stopped,
}

async fn run(mut scheduler: TournamentScheduler, mut rx: mpsc::Receiver<Command>) {
    info!("Scheduler for tournament {} started", scheduler.id());

    while let Some(command) = rx.recv().await {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::Join { player, reply } => {
                let _ = reply.send(scheduler.join(player).await);
            }
            Command::Leave { participant, reply } => {
                let _ = reply.send(scheduler.leave(&participant).await);
            }
            Command::Start {
                organizer,
                rounds_total,
                reply,
            } => {
                let _ = reply.send(scheduler.start(organizer, rounds_total).await);
            }
            Command::MatchEvent { record, reply } => {
                let _ = reply.send(scheduler.on_match_event(&record).await);
            }
            Command::Standings { reply } => {
                let _ = reply.send(scheduler.standings());
            }
            Command::Status { reply } => {
                let _ = reply.send(scheduler.tournament().clone());
            }
        }
    }

    info!("Scheduler for tournament {} stopped", scheduler.id());
}

/// Live tournament actors keyed by id.
pub struct TournamentRegistry {
    store: Arc<dyn TournamentStore>,
    config: SchedulerConfig,
    handles: RwLock<HashMap<TournamentId, TournamentHandle>>,
}

impl TournamentRegistry {
    pub fn new(store: Arc<dyn TournamentStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            config,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TournamentStore> {
        &self.store
    }

    /// Create a tournament and spawn its actor.
    pub async fn create(&self, id: TournamentId) -> Result<TournamentHandle, SchedulerError> {
        let scheduler = TournamentScheduler::create(self.store.clone(), &self.config, id).await?;
        Ok(self.register(scheduler).await)
    }

    /// Handle for an existing tournament, loading it from storage if needed.
    pub async fn open(&self, id: &TournamentId) -> Result<TournamentHandle, SchedulerError> {
        if let Some(handle) = self.get(id).await {
            return Ok(handle);
        }
        let scheduler = TournamentScheduler::load(self.store.clone(), &self.config, id).await?;
        Ok(self.register(scheduler).await)
    }

    pub async fn get(&self, id: &TournamentId) -> Option<TournamentHandle> {
        self.handles.read().await.get(id).cloned()
    }

    /// Wire the store's match status stream for `id` into its actor.
    pub async fn subscribe(&self, id: &TournamentId) -> Result<JoinHandle<()>, SchedulerError> {
        let handle = self.open(id).await?;
        let feed = self.store.subscribe_match_status(id).await?;
        Ok(handle.attach_feed(feed, self.config.retry.clone()))
    }

    /// Stop tracking a tournament. Its actor exits once other handles drop.
    pub async fn remove(&self, id: &TournamentId) -> Option<TournamentHandle> {
        self.handles.write().await.remove(id)
    }

    async fn register(&self, scheduler: TournamentScheduler) -> TournamentHandle {
        let mut handles = self.handles.write().await;
        // A concurrent open may have won; keep its actor.
        if let Some(existing) = handles.get(scheduler.id()) {
            return existing.clone();
        }
        let (handle, _task) = TournamentHandle::spawn(scheduler, self.config.event_buffer);
        handles.insert(handle.id().clone(), handle.clone());
        handle
    }
}
