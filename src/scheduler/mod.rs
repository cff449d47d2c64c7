//! Tournament scheduler.
//!
//! Composes the engine for one tournament:
//! 1. `start` pairs round 1, creates its matches, then marks the tournament running
//! 2. `on_match_event` applies results exactly once
//! 3. when a round closes, the next round is paired or the tournament finishes
//!
//! A round's pairings are fixed before its first write. If creating it is
//! interrupted, the same pairings are written again on retry, and `load`
//! adopts whatever part of it was already stored.
//!
//! A scheduler is a single-writer aggregate (`&mut self`); see [`runtime`]
//! for the per-tournament actor that serializes access to it.

pub mod runtime;

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::engine::{
    Action, CompletionError, CompletionOutcome, GameCompletionProcessor, PairingError,
    RoundTransition, StandingsTracker, SwissPairing, TournamentStateMachine, TransitionError,
};
use crate::models::{
    MatchRecord, Pairing, PairingHistory, Participant, ParticipantId, PlayerId, RoundPairings,
    ScoreRecord, ScoreSource, Standing, Tournament, TournamentId, TournamentStatus,
};
use crate::storage::{StorageError, TournamentStore};

/// Errors surfaced by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Tournament not found: {0}")]
    NotFound(TournamentId),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Player {0} already joined")]
    AlreadyJoined(PlayerId),

    #[error("Round {0} is being created; the roster is fixed")]
    RoundPending(u32),

    #[error("Illegal transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("Pairing failed: {0}")]
    Pairing(#[from] PairingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),

    #[error("Scheduler for tournament {0} has stopped")]
    Stopped(TournamentId),
}

impl SchedulerError {
    /// Rejected operations; retrying will not help.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::NotFound(_)
                | SchedulerError::UnknownParticipant(_)
                | SchedulerError::AlreadyJoined(_)
                | SchedulerError::RoundPending(_)
                | SchedulerError::Transition(_)
                | SchedulerError::Pairing(_)
                | SchedulerError::Completion(
                    CompletionError::ForeignMatch { .. } | CompletionError::Mismatch { .. }
                )
        )
    }

    /// Collaborator failures that resolve by retrying the operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Storage(StorageError::Unavailable(_) | StorageError::Io(_))
                | SchedulerError::Completion(CompletionError::Storage(
                    StorageError::Unavailable(_) | StorageError::Io(_)
                ))
        )
    }
}

/// Per-tournament scheduling aggregate.
pub struct TournamentScheduler {
    store: Arc<dyn TournamentStore>,
    pairing: SwissPairing,
    machine: TournamentStateMachine,
    standings: StandingsTracker,
    history: PairingHistory,
    processor: GameCompletionProcessor,
    participants: Vec<Participant>,
    /// Pairings of the next round, fixed until the round is committed
    prepared: Option<RoundPairings>,
}

impl TournamentScheduler {
    /// Register a new tournament in the `awaiting` state.
    pub async fn create(
        store: Arc<dyn TournamentStore>,
        config: &SchedulerConfig,
        id: TournamentId,
    ) -> Result<Self, SchedulerError> {
        let tournament = Tournament::new(id, config.min_participants);
        store.insert_tournament(&tournament).await?;
        info!("Created tournament {}", tournament.id);
        Ok(Self::assemble(store, config, tournament))
    }

    fn assemble(
        store: Arc<dyn TournamentStore>,
        config: &SchedulerConfig,
        tournament: Tournament,
    ) -> Self {
        let processor = GameCompletionProcessor::new(tournament.id.clone());
        Self {
            store,
            pairing: SwissPairing::new(config.pairing),
            machine: TournamentStateMachine::new(tournament),
            standings: StandingsTracker::new(),
            history: PairingHistory::new(),
            processor,
            participants: Vec::new(),
            prepared: None,
        }
    }

    /// Rebuild a scheduler from storage.
    ///
    /// Closed matches whose result never got applied are applied here. If
    /// an earlier advance was interrupted, the partly created round is
    /// adopted and the advance is retried.
    pub async fn load(
        store: Arc<dyn TournamentStore>,
        config: &SchedulerConfig,
        id: &TournamentId,
    ) -> Result<Self, SchedulerError> {
        let tournament = store
            .get_tournament(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.clone()))?;
        let participants = store.list_participants(id).await?;
        let records = store.query_standings(id).await?;
        let matches = store.query_matches(id).await?;
        let processed = store.processed_results(id).await?;

        // Anything past the current round belongs to an uncommitted advance.
        let current = tournament.current_round;
        let next = current + 1;
        let played: Vec<&MatchRecord> = matches
            .iter()
            .filter(|m| m.round.is_some_and(|r| r <= current))
            .collect();
        let byes = records
            .iter()
            .filter(|r| r.round <= current)
            .filter_map(|r| bye_recipient(&r.source));
        let next_bye = records
            .iter()
            .filter(|r| r.round == next)
            .find_map(|r| bye_recipient(&r.source));
        let finished = tournament.status == TournamentStatus::Finished;

        let mut scheduler = Self::assemble(store, config, tournament);
        scheduler.history = PairingHistory::from_matches(played.iter().copied(), byes);
        scheduler.standings = StandingsTracker::load(participants.iter(), records);
        scheduler
            .processor
            .restore(processed.iter(), played.iter().copied());
        scheduler.participants = participants;
        if !finished {
            scheduler.prepared = scheduler.adopt_round(next, &matches, next_bye)?;
        }

        debug!(
            "Loaded tournament {} ({}, {} matches, {} results)",
            id,
            scheduler.status(),
            matches.len(),
            processed.len()
        );

        scheduler.settle().await?;
        Ok(scheduler)
    }

    /// Pairings of a round whose creation was interrupted, built from the
    /// matches and bye already stored for it. Participants the stored part
    /// does not cover are paired among themselves.
    fn adopt_round(
        &self,
        round: u32,
        matches: &[MatchRecord],
        bye: Option<ParticipantId>,
    ) -> Result<Option<RoundPairings>, SchedulerError> {
        let pairings: Vec<Pairing> = matches
            .iter()
            .filter(|m| m.round == Some(round))
            .map(|m| Pairing::new(m.white.clone(), m.black.clone()))
            .collect();
        if pairings.is_empty() && bye.is_none() {
            return Ok(None);
        }

        let mut adopted = RoundPairings {
            round,
            pairings,
            bye,
            rematches: 0,
        };
        let taken: HashSet<ParticipantId> = adopted.participants().cloned().collect();
        let rest: Vec<Standing> = self
            .standings
            .standings_snapshot()
            .into_iter()
            .filter(|s| !taken.contains(&s.participant_id))
            .collect();

        if rest.len() == 1 && adopted.bye.is_none() {
            adopted.bye = Some(rest[0].participant_id.clone());
        } else if !rest.is_empty() {
            let extra = self.pairing.next_round(round, &rest, &self.history)?;
            if extra.bye.is_some() && adopted.bye.is_some() {
                return Err(PairingError::Unsatisfiable { round }.into());
            }
            adopted.pairings.extend(extra.pairings);
            adopted.bye = adopted.bye.or(extra.bye);
        }
        adopted.rematches = adopted
            .pairings
            .iter()
            .filter(|p| self.history.has_played(&p.white, &p.black))
            .count();

        warn!(
            "Tournament {} round {} was partly created ({} stored match(es)); resuming it",
            self.id(),
            round,
            matches.iter().filter(|m| m.round == Some(round)).count()
        );
        Ok(Some(adopted))
    }

    pub fn id(&self) -> &TournamentId {
        &self.machine.tournament().id
    }

    pub fn tournament(&self) -> &Tournament {
        self.machine.tournament()
    }

    pub fn status(&self) -> TournamentStatus {
        self.machine.status()
    }

    /// Current standings of active participants, best first.
    pub fn standings(&self) -> Vec<Standing> {
        self.standings.standings_snapshot()
    }

    pub fn history(&self) -> &PairingHistory {
        &self.history
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Matches of one round as currently stored.
    pub async fn round_matches(&self, round: u32) -> Result<Vec<MatchRecord>, SchedulerError> {
        Ok(self.store.query_matches_by_round(self.id(), round).await?)
    }

    /// Add a player before the tournament starts.
    pub async fn join(&mut self, player_id: PlayerId) -> Result<Participant, SchedulerError> {
        self.machine.ensure_roster_open(Action::Join)?;
        self.ensure_no_round_pending()?;

        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.player_id == player_id)
        {
            if existing.active {
                return Err(SchedulerError::AlreadyJoined(player_id));
            }
            let mut rejoined = existing.clone();
            rejoined.active = true;
            self.store.update_participant(&rejoined).await?;
            *existing = rejoined.clone();
            self.standings.register(&rejoined);
            info!("Player {} rejoined as {}", player_id, rejoined.id);
            return Ok(rejoined);
        }

        let seed = self.participants.len() as u32;
        let participant = Participant::new(self.id().clone(), player_id, seed);
        self.store.insert_participant(&participant).await?;

        self.standings.register(&participant);
        self.participants.push(participant.clone());
        info!(
            "Player {} joined tournament {} (seed {})",
            participant.player_id, participant.tournament_id, seed
        );
        Ok(participant)
    }

    /// Withdraw a participant before the tournament starts.
    pub async fn leave(&mut self, participant_id: &ParticipantId) -> Result<(), SchedulerError> {
        self.machine.ensure_roster_open(Action::Leave)?;
        self.ensure_no_round_pending()?;

        let existing = self
            .participants
            .iter_mut()
            .find(|p| &p.id == participant_id && p.active)
            .ok_or_else(|| SchedulerError::UnknownParticipant(participant_id.clone()))?;

        let mut left = existing.clone();
        left.active = false;
        self.store.update_participant(&left).await?;
        *existing = left;
        self.standings.deactivate(participant_id);
        info!("Participant {} left tournament", participant_id);
        Ok(())
    }

    fn ensure_no_round_pending(&self) -> Result<(), SchedulerError> {
        match &self.prepared {
            Some(round) => Err(SchedulerError::RoundPending(round.round)),
            None => Ok(()),
        }
    }

    /// Pair round 1, create its matches and mark the tournament running.
    ///
    /// Matches are written before the status, so `running` is never
    /// observable without round 1 in place.
    pub async fn start(
        &mut self,
        organizer: PlayerId,
        rounds_total: u32,
    ) -> Result<RoundPairings, SchedulerError> {
        let pool = self.standings.standings_snapshot();

        let mut machine = self.machine.clone();
        machine.check_start(pool.len(), rounds_total)?;
        self.pairing.check_pool(pool.len())?;

        let round = self.prepare_round(1)?;
        let bye = self.create_round(&round).await?;

        machine.start(organizer, pool.len(), rounds_total)?;
        self.store.update_tournament(machine.tournament()).await?;

        self.machine = machine;
        self.commit_round(&round, bye);
        self.settle().await?;
        Ok(round)
    }

    /// Entry point for match status notifications.
    pub async fn on_match_event(
        &mut self,
        record: &MatchRecord,
    ) -> Result<CompletionOutcome, SchedulerError> {
        self.machine.ensure_accepts_results()?;

        let outcome = self
            .processor
            .on_match_closed(self.store.as_ref(), &mut self.standings, record)
            .await?;
        self.settle().await?;
        Ok(outcome)
    }

    /// Apply closed matches of the current round, close it once fully
    /// applied and retry deferred events, until nothing makes progress.
    async fn settle(&mut self) -> Result<(), SchedulerError> {
        loop {
            if self.status() != TournamentStatus::Running {
                if !self.processor.pending().is_empty() {
                    warn!(
                        "Tournament {} is {} with {} deferred match(es) outside any round",
                        self.id(),
                        self.status(),
                        self.processor.pending().len()
                    );
                }
                return Ok(());
            }

            let current = self.tournament().current_round;
            self.processor
                .reconcile(self.store.as_ref(), &mut self.standings, current)
                .await?;
            if self
                .processor
                .is_round_complete(self.store.as_ref(), current)
                .await?
            {
                self.close_round().await?;
                continue;
            }

            let outcomes = self
                .processor
                .retry_pending(self.store.as_ref(), &mut self.standings)
                .await?;
            if !outcomes
                .iter()
                .any(|o| matches!(o, CompletionOutcome::Applied { .. }))
            {
                return Ok(());
            }
        }
    }

    /// Advance past the current round, or finish the tournament.
    async fn close_round(&mut self) -> Result<(), SchedulerError> {
        let mut machine = self.machine.clone();

        match machine.complete_round()? {
            RoundTransition::Finished => {
                self.store.update_tournament(machine.tournament()).await?;
                self.machine = machine;
            }
            RoundTransition::Advanced { next_round } => {
                let round = self.prepare_round(next_round)?;
                let bye = self.create_round(&round).await?;

                self.store.update_tournament(machine.tournament()).await?;
                self.machine = machine;
                self.commit_round(&round, bye);
            }
        }
        Ok(())
    }

    /// Pairings for `round`, reusing the ones fixed by an earlier attempt.
    fn prepare_round(&mut self, round: u32) -> Result<RoundPairings, SchedulerError> {
        if let Some(prepared) = self.prepared.as_ref().filter(|p| p.round == round) {
            return Ok(prepared.clone());
        }
        let pool = self.standings.standings_snapshot();
        let pairings = self.pairing.next_round(round, &pool, &self.history)?;
        self.prepared = Some(pairings.clone());
        Ok(pairings)
    }

    /// Durable writes for a new round: its matches, then the bye result.
    ///
    /// Every write is idempotent, so a retry with the same pairings leaves
    /// one match per pairing and one bye record.
    async fn create_round(
        &self,
        round: &RoundPairings,
    ) -> Result<Option<ScoreRecord>, SchedulerError> {
        for pairing in &round.pairings {
            let record = MatchRecord::new(
                self.id().clone(),
                round.round,
                pairing.white.clone(),
                pairing.black.clone(),
            );
            self.store.insert_match(&record).await?;
            debug!(
                "Requested match {} for round {}: {} vs {}",
                record.id, round.round, record.white, record.black
            );
        }

        let Some(bye) = &round.bye else {
            return Ok(None);
        };
        let Some(score) = self.pairing.policy().bye.score() else {
            return Ok(None);
        };

        let record = ScoreRecord::for_bye(self.id().clone(), bye.clone(), round.round, score);
        self.store
            .record_result(self.id(), &record.source, std::slice::from_ref(&record))
            .await?;
        info!("Participant {} has a bye in round {}", bye, round.round);
        Ok(Some(record))
    }

    fn commit_round(&mut self, round: &RoundPairings, bye: Option<ScoreRecord>) {
        self.prepared = None;
        self.history.record_round(round);
        self.processor
            .register_round(round.round, round.pairings.len());
        if let Some(record) = bye {
            self.standings.record_result(record);
        }
        info!(
            "Tournament {} round {} created with {} match(es)",
            self.id(),
            round.round,
            round.pairings.len()
        );
    }
}

fn bye_recipient(source: &ScoreSource) -> Option<ParticipantId> {
    match source {
        ScoreSource::Bye { participant_id, .. } => Some(participant_id.clone()),
        ScoreSource::Match { .. } => None,
    }
}
