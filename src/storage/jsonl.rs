//! JSONL (JSON Lines) storage.
//!
//! Each tournament gets a directory under `<data_dir>/tournaments/<id>/`.
//! Files are append-only; for mutable entities (tournament, participants,
//! matches) the last line for an id wins. A result is one line holding both
//! its processed marker and its score records, so it lands whole or not at all.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{StorageConfig, StorageError, Subscribers, TournamentStore};
use crate::models::{
    MatchId, MatchRecord, MatchStatus, Participant, ScoreRecord, ScoreSource, Tournament,
    TournamentId,
};

/// Entity types for JSONL storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Tournament,
    Participant,
    Match,
    Result,
}

impl EntityType {
    /// Get the filename for this entity type.
    pub fn filename(&self) -> &'static str {
        match self {
            EntityType::Tournament => "tournament.jsonl",
            EntityType::Participant => "participants.jsonl",
            EntityType::Match => "matches.jsonl",
            EntityType::Result => "results.jsonl",
        }
    }
}

/// JSONL file writer.
pub struct JsonlWriter<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Serialize> JsonlWriter<T> {
    /// Create a new JSONL writer for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    /// Create a writer for a specific entity type and tournament.
    pub fn for_entity(config: &StorageConfig, entity: EntityType, tournament: &TournamentId) -> Self {
        Self::new(entity_path(config, entity, tournament))
    }

    /// Ensure the parent directory exists.
    fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Append a single entity to the file.
    pub fn append(&self, entity: &T) -> Result<(), StorageError> {
        self.ensure_dir()?;

        // Serialize first so a failure leaves the file untouched.
        let json = serde_json::to_string(entity)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        debug!("Appended entity to {:?}", self.path);
        Ok(())
    }
}

/// JSONL file reader.
pub struct JsonlReader<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> JsonlReader<T> {
    /// Create a new JSONL reader for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    /// Create a reader for a specific entity type and tournament.
    pub fn for_entity(config: &StorageConfig, entity: EntityType, tournament: &TournamentId) -> Self {
        Self::new(entity_path(config, entity, tournament))
    }

    /// Check if the file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read all entities from the file.
    pub fn read_all(&self) -> Result<Vec<T>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entities = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str(&line) {
                Ok(entity) => entities.push(entity),
                Err(e) => {
                    // A torn final line from an interrupted append is skipped.
                    warn!(
                        "Failed to parse line {} in {:?}: {}",
                        line_num + 1,
                        self.path,
                        e
                    );
                }
            }
        }

        debug!("Read {} entities from {:?}", entities.len(), self.path);
        Ok(entities)
    }

    /// Read entities matching a predicate.
    pub fn read_where<F>(&self, predicate: F) -> Result<Vec<T>, StorageError>
    where
        F: Fn(&T) -> bool,
    {
        let all = self.read_all()?;
        Ok(all.into_iter().filter(predicate).collect())
    }
}

/// Get the path for a tournament's entity file.
pub fn entity_path(config: &StorageConfig, entity: EntityType, tournament: &TournamentId) -> PathBuf {
    config.tournament_dir(tournament).join(entity.filename())
}

/// Find all tournament directories.
pub fn list_tournaments(config: &StorageConfig) -> Result<Vec<TournamentId>, StorageError> {
    let dir = config.tournaments_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut tournaments = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                tournaments.push(TournamentId::from(name));
            }
        }
    }

    tournaments.sort();
    Ok(tournaments)
}

/// One applied result: processed marker plus its score records.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResultEntry {
    source: ScoreSource,
    records: Vec<ScoreRecord>,
}

/// Keep the last line per key, preserving first-seen order.
fn latest_by<T, K: Ord>(entities: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut order = Vec::new();
    let mut latest: BTreeMap<K, T> = BTreeMap::new();
    for entity in entities {
        let k = key(&entity);
        if !latest.contains_key(&k) {
            order.push(key(&entity));
        }
        latest.insert(k, entity);
    }
    order
        .into_iter()
        .filter_map(|k| latest.remove(&k))
        .collect()
}

/// [`TournamentStore`] over a directory of JSONL files.
pub struct JsonlStore {
    config: StorageConfig,
    /// Serializes writers so read-modify-append sequences don't interleave.
    write_lock: Mutex<()>,
    subscribers: Mutex<Subscribers>,
}

impl JsonlStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            write_lock: Mutex::new(()),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn reader<T: DeserializeOwned>(&self, entity: EntityType, t: &TournamentId) -> JsonlReader<T> {
        JsonlReader::for_entity(&self.config, entity, t)
    }

    fn writer<T: Serialize>(&self, entity: EntityType, t: &TournamentId) -> JsonlWriter<T> {
        JsonlWriter::for_entity(&self.config, entity, t)
    }

    fn read_matches(&self, t: &TournamentId) -> Result<Vec<MatchRecord>, StorageError> {
        let matches: Vec<MatchRecord> = self.reader(EntityType::Match, t).read_all()?;
        Ok(latest_by(matches, |m: &MatchRecord| m.id.clone()))
    }

    fn read_results(&self, t: &TournamentId) -> Result<Vec<ResultEntry>, StorageError> {
        self.reader(EntityType::Result, t).read_all()
    }

    /// Locate a match across all tournaments.
    fn find_match(&self, id: &MatchId) -> Result<Option<MatchRecord>, StorageError> {
        for t in list_tournaments(&self.config)? {
            if let Some(found) = self.read_matches(&t)?.into_iter().find(|m| &m.id == id) {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl TournamentStore for JsonlStore {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn insert_tournament(&self, tournament: &Tournament) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let reader: JsonlReader<Tournament> = self.reader(EntityType::Tournament, &tournament.id);
        if reader.exists() {
            return Err(StorageError::Conflict(format!(
                "tournament {} already exists",
                tournament.id
            )));
        }
        self.writer(EntityType::Tournament, &tournament.id)
            .append(tournament)
    }

    async fn get_tournament(&self, id: &TournamentId) -> Result<Option<Tournament>, StorageError> {
        let versions: Vec<Tournament> = self.reader(EntityType::Tournament, id).read_all()?;
        Ok(versions.into_iter().last())
    }

    async fn update_tournament(&self, tournament: &Tournament) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let reader: JsonlReader<Tournament> = self.reader(EntityType::Tournament, &tournament.id);
        if !reader.exists() {
            return Err(StorageError::NotFound(format!("tournament {}", tournament.id)));
        }
        self.writer(EntityType::Tournament, &tournament.id)
            .append(tournament)
    }

    async fn insert_participant(&self, participant: &Participant) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let t = &participant.tournament_id;
        let existing: Vec<Participant> = self
            .reader(EntityType::Participant, t)
            .read_where(|p: &Participant| p.id == participant.id)?;
        if !existing.is_empty() {
            return Err(StorageError::Conflict(format!(
                "participant {} already exists",
                participant.id
            )));
        }
        self.writer(EntityType::Participant, t).append(participant)
    }

    async fn update_participant(&self, participant: &Participant) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let t = &participant.tournament_id;
        let existing: Vec<Participant> = self
            .reader(EntityType::Participant, t)
            .read_where(|p: &Participant| p.id == participant.id)?;
        if existing.is_empty() {
            return Err(StorageError::NotFound(format!(
                "participant {}",
                participant.id
            )));
        }
        self.writer(EntityType::Participant, t).append(participant)
    }

    async fn list_participants(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<Participant>, StorageError> {
        let all: Vec<Participant> = self
            .reader(EntityType::Participant, tournament_id)
            .read_all()?;
        let mut participants = latest_by(all, |p: &Participant| p.id.clone());
        participants.sort_by_key(|p| p.seed);
        Ok(participants)
    }

    async fn insert_match(&self, record: &MatchRecord) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let exists = self
            .read_matches(&record.tournament_id)?
            .iter()
            .any(|m| m.id == record.id);
        if exists {
            debug!("Match {} already stored", record.id);
            return Ok(());
        }
        self.writer(EntityType::Match, &record.tournament_id)
            .append(record)
    }

    async fn update_match_status(
        &self,
        id: &MatchId,
        status: MatchStatus,
    ) -> Result<MatchRecord, StorageError> {
        let record = {
            let _guard = self.write_lock.lock().await;
            let mut record = self
                .find_match(id)?
                .ok_or_else(|| StorageError::NotFound(format!("match {}", id)))?;
            record.status = status;
            self.writer(EntityType::Match, &record.tournament_id)
                .append(&record)?;
            record
        };
        self.subscribers.lock().await.publish(&record);
        Ok(record)
    }

    async fn get_match(&self, id: &MatchId) -> Result<Option<MatchRecord>, StorageError> {
        self.find_match(id)
    }

    async fn query_matches_by_round(
        &self,
        tournament_id: &TournamentId,
        round: u32,
    ) -> Result<Vec<MatchRecord>, StorageError> {
        Ok(self
            .read_matches(tournament_id)?
            .into_iter()
            .filter(|m| m.round == Some(round))
            .collect())
    }

    async fn query_matches(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<MatchRecord>, StorageError> {
        self.read_matches(tournament_id)
    }

    async fn record_result(
        &self,
        tournament_id: &TournamentId,
        source: &ScoreSource,
        records: &[ScoreRecord],
    ) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().await;
        if self
            .read_results(tournament_id)?
            .iter()
            .any(|r| &r.source == source)
        {
            return Ok(false);
        }

        let entry = ResultEntry {
            source: source.clone(),
            records: records.to_vec(),
        };
        self.writer(EntityType::Result, tournament_id)
            .append(&entry)?;
        Ok(true)
    }

    async fn query_standings(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<ScoreRecord>, StorageError> {
        Ok(self
            .read_results(tournament_id)?
            .into_iter()
            .flat_map(|r| r.records)
            .collect())
    }

    async fn processed_results(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<Vec<ScoreSource>, StorageError> {
        Ok(self
            .read_results(tournament_id)?
            .into_iter()
            .map(|r| r.source)
            .collect())
    }

    async fn subscribe_match_status(
        &self,
        tournament_id: &TournamentId,
    ) -> Result<mpsc::UnboundedReceiver<MatchRecord>, StorageError> {
        Ok(self.subscribers.lock().await.subscribe(tournament_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParticipantId, PlayerId, TournamentStatus};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestEntity {
        id: String,
        value: u32,
    }

    fn store(temp_dir: &TempDir) -> JsonlStore {
        JsonlStore::new(StorageConfig::new(temp_dir.path().to_path_buf()))
    }

    #[test]
    fn test_jsonl_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.jsonl");

        let entities = vec![
            TestEntity {
                id: "1".to_string(),
                value: 100,
            },
            TestEntity {
                id: "2".to_string(),
                value: 200,
            },
        ];

        let writer: JsonlWriter<TestEntity> = JsonlWriter::new(path.clone());
        for entity in entities.iter().chain(&entities[..1]) {
            writer.append(entity).unwrap();
        }

        let reader: JsonlReader<TestEntity> = JsonlReader::new(path);
        let read_entities = reader.read_all().unwrap();
        assert_eq!(read_entities.len(), 3);
        assert_eq!(read_entities[2], entities[0]);
    }

    #[test]
    fn test_jsonl_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let reader: JsonlReader<TestEntity> =
            JsonlReader::new(temp_dir.path().join("nonexistent.jsonl"));

        assert!(!reader.exists());
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_jsonl_skips_torn_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("torn.jsonl");
        fs::write(&path, "{\"id\":\"1\",\"value\":1}\n{\"id\":\"2\",\"va").unwrap();

        let reader: JsonlReader<TestEntity> = JsonlReader::new(path);
        assert_eq!(reader.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_latest_by_keeps_last_version() {
        let entities = vec![
            TestEntity {
                id: "a".to_string(),
                value: 1,
            },
            TestEntity {
                id: "b".to_string(),
                value: 1,
            },
            TestEntity {
                id: "a".to_string(),
                value: 2,
            },
        ];

        let latest = latest_by(entities, |e| e.id.clone());
        let values: Vec<_> = latest.iter().map(|e| (e.id.as_str(), e.value)).collect();
        assert_eq!(values, vec![("a", 2), ("b", 1)]);
    }

    #[tokio::test]
    async fn test_tournament_versions() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let mut tournament = Tournament::new(TournamentId::from("t-1"), 2);

        store.insert_tournament(&tournament).await.unwrap();
        assert!(store.insert_tournament(&tournament).await.is_err());

        tournament.status = TournamentStatus::Running;
        store.update_tournament(&tournament).await.unwrap();

        let loaded = store.get_tournament(&tournament.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TournamentStatus::Running);
        assert_eq!(
            list_tournaments(store.config()).unwrap(),
            vec![TournamentId::from("t-1")]
        );
    }

    #[tokio::test]
    async fn test_participant_updates() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let t = TournamentId::from("t-1");
        let mut alice = Participant::new(t.clone(), PlayerId::from("alice"), 0);

        store.insert_participant(&alice).await.unwrap();
        assert!(store.insert_participant(&alice).await.is_err());

        alice.active = false;
        store.update_participant(&alice).await.unwrap();

        let listed = store.list_participants(&t).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].active);
    }

    #[tokio::test]
    async fn test_match_status_updates_and_notifies() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let t = TournamentId::from("t-1");
        store
            .insert_tournament(&Tournament::new(t.clone(), 2))
            .await
            .unwrap();

        let record = MatchRecord::new(t.clone(), 1, ParticipantId::from("a"), ParticipantId::from("b"));
        store.insert_match(&record).await.unwrap();
        store.insert_match(&record).await.unwrap();

        let mut rx = store.subscribe_match_status(&t).await.unwrap();
        store
            .update_match_status(&record.id, MatchStatus::Draw)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().status, MatchStatus::Draw);
        let round = store.query_matches_by_round(&t, 1).await.unwrap();
        assert_eq!(round.len(), 1);
        assert_eq!(round[0].status, MatchStatus::Draw);
        assert!(store
            .update_match_status(&MatchId::from("missing"), MatchStatus::Draw)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_results_written_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);
        let t = TournamentId::from("t-1");
        let source = ScoreSource::Match {
            match_id: MatchId::from("m-1"),
        };
        let records = vec![
            ScoreRecord::for_match(
                t.clone(),
                ParticipantId::from("a"),
                MatchId::from("m-1"),
                1,
                ParticipantId::from("b"),
                1.0,
            ),
            ScoreRecord::for_match(
                t.clone(),
                ParticipantId::from("b"),
                MatchId::from("m-1"),
                1,
                ParticipantId::from("a"),
                0.0,
            ),
        ];

        assert!(store.record_result(&t, &source, &records).await.unwrap());
        assert!(!store.record_result(&t, &source, &records).await.unwrap());

        assert_eq!(store.query_standings(&t).await.unwrap(), records);
        assert_eq!(store.processed_results(&t).await.unwrap(), vec![source]);
    }
}
