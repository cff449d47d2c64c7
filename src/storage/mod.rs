//! Persistence and notification collaborator.
//!
//! The scheduler talks to storage only through [`TournamentStore`]:
//! - durable writes (tournaments, participants, matches, score records)
//! - consistent reads at call time
//! - a per-tournament stream of match status updates
//!
//! Two implementations are provided: [`MemoryStore`] for tests and embedding,
//! and [`JsonlStore`], a JSON Lines data directory.

mod jsonl;
mod memory;

pub use jsonl::*;
pub use memory::*;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{
    MatchId, MatchRecord, MatchStatus, Participant, ScoreRecord, ScoreSource, Tournament,
    TournamentId,
};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transient failure; the caller may retry.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage capabilities required by the scheduler.
#[async_trait]
pub trait TournamentStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    async fn insert_tournament(&self, tournament: &Tournament) -> Result<(), StorageError>;

    async fn get_tournament(&self, id: &TournamentId) -> Result<Option<Tournament>, StorageError>;

    /// Persist a tournament's status and round counters.
    async fn update_tournament(&self, tournament: &Tournament) -> Result<(), StorageError>;

    async fn insert_participant(&self, participant: &Participant) -> Result<(), StorageError>;

    async fn update_participant(&self, participant: &Participant) -> Result<(), StorageError>;

    /// All participants, active or not, in seed order.
    async fn list_participants(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<Participant>, StorageError>;

    /// Insert a match. Inserting an id that already exists is a no-op.
    async fn insert_match(&self, record: &MatchRecord) -> Result<(), StorageError>;

    /// Change a match's status and notify subscribers.
    async fn update_match_status(
        &self,
        id: &MatchId,
        status: MatchStatus,
    ) -> Result<MatchRecord, StorageError>;

    async fn get_match(&self, id: &MatchId) -> Result<Option<MatchRecord>, StorageError>;

    async fn query_matches_by_round(
        &self,
        tournament_id: &TournamentId,
        round: u32,
    ) -> Result<Vec<MatchRecord>, StorageError>;

    async fn query_matches(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<MatchRecord>, StorageError>;

    /// Write the score records of one result together with its processed
    /// marker. Both are stored or neither is. Returns false if the marker
    /// already existed, in which case nothing is written.
    async fn record_result(
        &self,
        tournament_id: &TournamentId,
        source: &ScoreSource,
        records: &[ScoreRecord],
    ) -> Result<bool, StorageError>;

    /// Every score record of a tournament.
    async fn query_standings(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<ScoreRecord>, StorageError>;

    /// Processed markers of a tournament.
    async fn processed_results(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<ScoreSource>, StorageError>;

    /// Stream of match records whose status changed.
    async fn subscribe_match_status(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<mpsc::UnboundedReceiver<MatchRecord>, StorageError>;
}

/// Per-tournament fan-out of match status updates.
#[derive(Debug, Default)]
pub struct Subscribers {
    senders: HashMap<TournamentId, Vec<mpsc::UnboundedSender<MatchRecord>>>,
}

impl Subscribers {
    pub fn subscribe(&mut self, tournament_id: &TournamentId) -> mpsc::UnboundedReceiver<MatchRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .entry(tournament_id.clone())
            .or_default()
            .push(tx);
        rx
    }

    /// Send a record to every live subscriber, dropping closed ones.
    pub fn publish(&mut self, record: &MatchRecord) {
        if let Some(senders) = self.senders.get_mut(&record.tournament_id) {
            senders.retain(|tx| tx.send(record.clone()).is_ok());
            debug!(
                "Published match {} to {} subscriber(s)",
                record.id,
                senders.len()
            );
        }
    }
}

/// Configuration for storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn tournaments_dir(&self) -> PathBuf {
        self.data_dir.join("tournaments")
    }

    /// Directory holding one tournament's files.
    pub fn tournament_dir(&self, id: &TournamentId) -> PathBuf {
        self.tournaments_dir().join(id.as_str())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}
