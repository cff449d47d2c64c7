//! Game completion processing.
//!
//! Turns match-closed events into score records exactly once and reports
//! when the round a match belongs to has fully closed. Events are expected
//! to arrive more than once and out of order.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::StandingsTracker;
use crate::models::{MatchId, MatchRecord, ScoreRecord, ScoreSource, Side, TournamentId};
use crate::storage::{StorageError, TournamentStore};

/// Errors raised while applying a result.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Match {match_id} belongs to tournament {actual}, not {expected}")]
    ForeignMatch {
        match_id: MatchId,
        expected: TournamentId,
        actual: TournamentId,
    },

    #[error("Match {match_id} does not agree with the stored match")]
    Mismatch { match_id: MatchId },
}

/// What happened to one observed match event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The match is still in progress
    Open,
    /// The result was applied earlier
    Duplicate,
    /// The match or its round is not known yet; queued for retry
    Deferred,
    /// The result was applied now
    Applied { round: u32, round_complete: bool },
}

impl CompletionOutcome {
    /// Whether this outcome closed the round being played.
    pub fn closes_round(&self) -> bool {
        matches!(
            self,
            CompletionOutcome::Applied {
                round_complete: true,
                ..
            }
        )
    }
}

/// Applies match results to standings, once per match.
#[derive(Debug)]
pub struct GameCompletionProcessor {
    tournament_id: TournamentId,
    processed: HashSet<MatchId>,
    /// Number of matches created per round
    round_sizes: BTreeMap<u32, usize>,
    pending: Vec<MatchRecord>,
}

impl GameCompletionProcessor {
    pub fn new(tournament_id: TournamentId) -> Self {
        Self {
            tournament_id,
            processed: HashSet::new(),
            round_sizes: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    /// Restore processed markers and round sizes from storage.
    pub fn restore<'a>(
        &mut self,
        processed: impl IntoIterator<Item = &'a ScoreSource>,
        matches: impl IntoIterator<Item = &'a MatchRecord>,
    ) {
        for source in processed {
            if let ScoreSource::Match { match_id } = source {
                self.processed.insert(match_id.clone());
            }
        }
        for m in matches {
            if let Some(round) = m.round {
                *self.round_sizes.entry(round).or_insert(0) += 1;
            }
        }
    }

    /// Record how many matches were created for a round.
    pub fn register_round(&mut self, round: u32, matches: usize) {
        self.round_sizes.insert(round, matches);
    }

    pub fn is_processed(&self, id: &MatchId) -> bool {
        self.processed.contains(id)
    }

    pub fn pending(&self) -> &[MatchRecord] {
        &self.pending
    }

    /// Handle one observed match record.
    ///
    /// Standings and the processed set change only after the store has
    /// accepted the result, so a failed write can simply be retried.
    pub async fn on_match_closed(
        &mut self,
        store: &dyn TournamentStore,
        standings: &mut StandingsTracker,
        record: &MatchRecord,
    ) -> Result<CompletionOutcome, CompletionError> {
        if record.tournament_id != self.tournament_id {
            return Err(CompletionError::ForeignMatch {
                match_id: record.id.clone(),
                expected: self.tournament_id.clone(),
                actual: record.tournament_id.clone(),
            });
        }

        let Some((white_score, black_score)) = record.status.scores() else {
            debug!("Match {} still open ({})", record.id, record.status);
            return Ok(CompletionOutcome::Open);
        };

        if self.processed.contains(&record.id) {
            debug!("Match {} already applied, ignoring", record.id);
            return Ok(CompletionOutcome::Duplicate);
        }

        // Sides and round come from the stored match.
        let Some(stored) = store.get_match(&record.id).await? else {
            return Ok(self.defer(record));
        };
        if stored.tournament_id != self.tournament_id
            || stored.white != record.white
            || stored.black != record.black
            || record.round.is_some_and(|r| stored.round != Some(r))
        {
            warn!("Match {} event disagrees with stored match", record.id);
            return Err(CompletionError::Mismatch {
                match_id: record.id.clone(),
            });
        }
        let Some(round) = stored.round.filter(|r| self.round_sizes.contains_key(r)) else {
            return Ok(self.defer(record));
        };

        let records = [
            self.score_record(&stored, Side::White, round, white_score),
            self.score_record(&stored, Side::Black, round, black_score),
        ];
        let source = ScoreSource::Match {
            match_id: record.id.clone(),
        };
        let written = store
            .record_result(&self.tournament_id, &source, &records)
            .await?;
        if !written {
            debug!("Result for match {} was already stored", record.id);
        }

        for r in records {
            standings.record_result(r);
        }
        self.processed.insert(record.id.clone());
        self.pending.retain(|p| p.id != record.id);

        let round_complete = self.is_round_complete(store, round).await?;
        info!(
            "Applied match {} (round {}): {}{}",
            record.id,
            round,
            record.status,
            if round_complete { ", round complete" } else { "" }
        );

        Ok(CompletionOutcome::Applied {
            round,
            round_complete,
        })
    }

    /// Retry every deferred match. Matches whose round is still unknown stay
    /// queued.
    pub async fn retry_pending(
        &mut self,
        store: &dyn TournamentStore,
        standings: &mut StandingsTracker,
    ) -> Result<Vec<CompletionOutcome>, CompletionError> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let queued = std::mem::take(&mut self.pending);
        debug!("Retrying {} deferred match(es)", queued.len());

        let mut outcomes = Vec::with_capacity(queued.len());
        let mut queued = queued.into_iter();
        while let Some(record) = queued.next() {
            match self.on_match_closed(store, standings, &record).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    // Keep the rest queued so nothing is lost.
                    self.pending.push(record);
                    self.pending.extend(queued);
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }

    /// Apply every stored match of `round` that closed without its result
    /// being applied, e.g. because the event was lost or its write failed.
    pub async fn reconcile(
        &mut self,
        store: &dyn TournamentStore,
        standings: &mut StandingsTracker,
        round: u32,
    ) -> Result<Vec<CompletionOutcome>, CompletionError> {
        let matches = store
            .query_matches_by_round(&self.tournament_id, round)
            .await?;

        let mut outcomes = Vec::new();
        for m in matches.iter() {
            if !(m.is_closed() && !self.processed.contains(&m.id)) {
                continue;
            }
            info!("Match {} closed without an applied result, applying", m.id);
            outcomes.push(self.on_match_closed(store, standings, m).await?);
        }
        Ok(outcomes)
    }

    /// Whether every match created for `round` has been applied.
    pub async fn is_round_complete(
        &self,
        store: &dyn TournamentStore,
        round: u32,
    ) -> Result<bool, CompletionError> {
        let Some(&expected) = self.round_sizes.get(&round) else {
            return Ok(false);
        };
        let matches = store
            .query_matches_by_round(&self.tournament_id, round)
            .await?;

        Ok(matches.len() >= expected && matches.iter().all(|m| self.processed.contains(&m.id)))
    }

    fn defer(&mut self, record: &MatchRecord) -> CompletionOutcome {
        warn!(
            "Match {} closed before its round is known, deferring",
            record.id
        );
        if !self.pending.iter().any(|p| p.id == record.id) {
            self.pending.push(record.clone());
        }
        CompletionOutcome::Deferred
    }

    fn score_record(&self, record: &MatchRecord, side: Side, round: u32, score: f64) -> ScoreRecord {
        ScoreRecord::for_match(
            self.tournament_id.clone(),
            record.participant(side).clone(),
            record.id.clone(),
            round,
            record.participant(side.opposite()).clone(),
            score,
        )
    }
}
