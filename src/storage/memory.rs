//! In-memory store.
//!
//! Everything lives behind one `RwLock`, so each call is atomic. Failure
//! points can be armed to exercise the retry paths.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use super::{StorageError, Subscribers, TournamentStore};
use crate::models::{
    MatchId, MatchRecord, MatchStatus, Participant, ParticipantId, ScoreRecord, ScoreSource,
    Tournament, TournamentId,
};

/// Writes that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertMatch,
    RecordResult,
    UpdateTournament,
}

#[derive(Debug, Default)]
struct Inner {
    tournaments: BTreeMap<TournamentId, Tournament>,
    participants: BTreeMap<ParticipantId, Participant>,
    matches: BTreeMap<MatchId, MatchRecord>,
    scores: Vec<ScoreRecord>,
    processed: HashSet<(TournamentId, ScoreSource)>,
    subscribers: Subscribers,
    fail_points: HashSet<FailPoint>,
}

impl Inner {
    fn trip(&mut self, point: FailPoint) -> Result<(), StorageError> {
        if self.fail_points.remove(&point) {
            warn!("Injected failure at {:?}", point);
            return Err(StorageError::Unavailable(format!("{:?}", point)));
        }
        Ok(())
    }
}

/// Process-local [`TournamentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write at `point` fail with [`StorageError::Unavailable`].
    pub async fn fail_next(&self, point: FailPoint) {
        self.inner.write().await.fail_points.insert(point);
    }
}

#[async_trait]
impl TournamentStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_tournament(&self, tournament: &Tournament) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if inner.tournaments.contains_key(&tournament.id) {
            return Err(StorageError::Conflict(format!(
                "tournament {} already exists",
                tournament.id
            )));
        }
        inner
            .tournaments
            .insert(tournament.id.clone(), tournament.clone());
        Ok(())
    }

    async fn get_tournament(&self, id: &TournamentId) -> Result<Option<Tournament>, StorageError> {
        Ok(self.inner.read().await.tournaments.get(id).cloned())
    }

    async fn update_tournament(&self, tournament: &Tournament) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        inner.trip(FailPoint::UpdateTournament)?;
        let stored = inner
            .tournaments
            .get_mut(&tournament.id)
            .ok_or_else(|| StorageError::NotFound(format!("tournament {}", tournament.id)))?;
        *stored = tournament.clone();
        Ok(())
    }

    async fn insert_participant(&self, participant: &Participant) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        if inner.participants.contains_key(&participant.id) {
            return Err(StorageError::Conflict(format!(
                "participant {} already exists",
                participant.id
            )));
        }
        inner
            .participants
            .insert(participant.id.clone(), participant.clone());
        Ok(())
    }

    async fn update_participant(&self, participant: &Participant) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .participants
            .get_mut(&participant.id)
            .ok_or_else(|| StorageError::NotFound(format!("participant {}", participant.id)))?;
        *stored = participant.clone();
        Ok(())
    }

    async fn list_participants(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<Participant>, StorageError> {
        let inner = self.inner.read().await;
        let mut participants: Vec<Participant> = inner
            .participants
            .values()
            .filter(|p| &p.tournament_id == tournament_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| p.seed);
        Ok(participants)
    }

    async fn insert_match(&self, record: &MatchRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.write().await;
        inner.trip(FailPoint::InsertMatch)?;
        inner
            .matches
            .entry(record.id.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn update_match_status(
        &self,
        id: &MatchId,
        status: MatchStatus,
    ) -> Result<MatchRecord, StorageError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .matches
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("match {}", id)))?;
        record.status = status;
        let record = record.clone();
        inner.subscribers.publish(&record);
        Ok(record)
    }

    async fn get_match(&self, id: &MatchId) -> Result<Option<MatchRecord>, StorageError> {
        Ok(self.inner.read().await.matches.get(id).cloned())
    }

    async fn query_matches_by_round(
        &self,
        tournament_id: &TournamentId,
        round: u32,
    ) -> Result<Vec<MatchRecord>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .matches
            .values()
            .filter(|m| &m.tournament_id == tournament_id && m.round == Some(round))
            .cloned()
            .collect())
    }

    async fn query_matches(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<MatchRecord>, StorageError> {
        let inner = self.inner.read().await;
        let mut matches: Vec<MatchRecord> = inner
            .matches
            .values()
            .filter(|m| &m.tournament_id == tournament_id)
            .cloned()
            .collect();
        matches.sort_by_key(|m| m.round);
        Ok(matches)
    }

    async fn record_result(
        &self,
        tournament_id: &TournamentId,
        source: &ScoreSource,
        records: &[ScoreRecord],
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.write().await;
        inner.trip(FailPoint::RecordResult)?;

        let marker = (tournament_id.clone(), source.clone());
        if inner.processed.contains(&marker) {
            return Ok(false);
        }
        inner.scores.extend_from_slice(records);
        inner.processed.insert(marker);
        Ok(true)
    }

    async fn query_standings(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<ScoreRecord>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .scores
            .iter()
            .filter(|s| &s.tournament_id == tournament_id)
            .cloned()
            .collect())
    }

    async fn processed_results(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<ScoreSource>, StorageError> {
        let inner = self.inner.read().await;
        let mut sources: Vec<ScoreSource> = inner
            .processed
            .iter()
            .filter(|(t, _)| t == tournament_id)
            .map(|(_, s)| s.clone())
            .collect();
        sources.sort();
        Ok(sources)
    }

    async fn subscribe_match_status(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<mpsc::UnboundedReceiver<MatchRecord>, StorageError> {
        Ok(self.inner.write().await.subscribers.subscribe(tournament_id))
    }
}
