//! Standings tracker.
//!
//! Holds one score entry per `(participant, source)` key. Recording the
//! same key twice is a no-op, so standings are idempotent by construction.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::models::{Participant, ParticipantId, ScoreKey, ScoreRecord, ScoreSource, Standing};

#[derive(Debug, Clone, Copy)]
struct Enrolment {
    seed: u32,
    active: bool,
}

/// Cumulative scores and opponent history per participant.
#[derive(Debug, Clone, Default)]
pub struct StandingsTracker {
    participants: BTreeMap<ParticipantId, Enrolment>,
    records: Vec<ScoreRecord>,
    keys: HashSet<ScoreKey>,
}

impl StandingsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tracker from participants and persisted score records.
    pub fn load<'a>(
        participants: impl IntoIterator<Item = &'a Participant>,
        records: impl IntoIterator<Item = ScoreRecord>,
    ) -> Self {
        let mut tracker = Self::new();
        for participant in participants {
            tracker.register(participant);
        }
        for record in records {
            tracker.record_result(record);
        }
        tracker
    }

    /// Enrol a participant so it shows up with a zero score.
    pub fn register(&mut self, participant: &Participant) {
        self.participants.insert(
            participant.id.clone(),
            Enrolment {
                seed: participant.seed,
                active: participant.active,
            },
        );
    }

    /// Drop a participant from future snapshots. Its entries are kept.
    pub fn deactivate(&mut self, id: &ParticipantId) {
        if let Some(enrolment) = self.participants.get_mut(id) {
            enrolment.active = false;
        }
    }

    /// Add a score entry. Returns false when the key was already present.
    pub fn record_result(&mut self, record: ScoreRecord) -> bool {
        let key = record.key();
        if !self.keys.insert(key) {
            debug!(
                "Score for {} from {:?} already recorded",
                record.participant_id, record.source
            );
            return false;
        }
        self.records.push(record);
        true
    }

    /// Cumulative score of one participant.
    pub fn score_of(&self, id: &ParticipantId) -> f64 {
        self.records
            .iter()
            .filter(|r| &r.participant_id == id)
            .map(|r| r.score)
            .sum()
    }

    /// Sum of every recorded entry.
    pub fn total_points(&self) -> f64 {
        self.records.iter().map(|r| r.score).sum()
    }

    pub fn records(&self) -> &[ScoreRecord] {
        &self.records
    }

    /// Standings of every active participant, best first.
    ///
    /// Ties are broken by seed so the order is reproducible.
    pub fn standings_snapshot(&self) -> Vec<Standing> {
        let mut standings: BTreeMap<&ParticipantId, Standing> = self
            .participants
            .iter()
            .filter(|(_, e)| e.active)
            .map(|(id, e)| (id, Standing::new(id.clone(), e.seed)))
            .collect();

        let mut records: Vec<&ScoreRecord> = self.records.iter().collect();
        records.sort_by_key(|r| r.round);

        for record in records {
            let Some(standing) = standings.get_mut(&record.participant_id) else {
                continue;
            };
            standing.score += record.score;
            match (&record.source, &record.opponent) {
                (ScoreSource::Bye { .. }, _) => standing.byes += 1,
                (ScoreSource::Match { .. }, Some(opponent)) => {
                    standing.opponents.push(opponent.clone())
                }
                (ScoreSource::Match { .. }, None) => {}
            }
        }

        let mut sorted: Vec<Standing> = standings.into_values().collect();
        sorted.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.seed.cmp(&b.seed)));
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchId, PlayerId, TournamentId};
    use pretty_assertions::assert_eq;

    fn participant(name: &str, seed: u32) -> Participant {
        let mut p = Participant::new(TournamentId::from("t"), PlayerId::from(name), seed);
        p.id = ParticipantId::from(name);
        p
    }

    fn result(who: &str, against: &str, match_id: &str, round: u32, score: f64) -> ScoreRecord {
        ScoreRecord::for_match(
            TournamentId::from("t"),
            ParticipantId::from(who),
            MatchId::from(match_id),
            round,
            ParticipantId::from(against),
            score,
        )
    }

    fn tracker() -> StandingsTracker {
        let players = [
            participant("a", 0),
            participant("b", 1),
            participant("c", 2),
            participant("d", 3),
        ];
        StandingsTracker::load(players.iter(), Vec::new())
    }

    #[test]
    fn test_empty_snapshot_in_seed_order() {
        let snapshot = tracker().standings_snapshot();
        let order: Vec<_> = snapshot.iter().map(|s| s.participant_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert!(snapshot.iter().all(|s| s.score == 0.0));
    }

    #[test]
    fn test_record_result_is_idempotent() {
        let mut tracker = tracker();
        assert!(tracker.record_result(result("a", "b", "m1", 1, 1.0)));
        for _ in 0..99 {
            assert!(!tracker.record_result(result("a", "b", "m1", 1, 1.0)));
        }

        assert_eq!(tracker.score_of(&ParticipantId::from("a")), 1.0);
        assert_eq!(tracker.records().len(), 1);
    }

    #[test]
    fn test_snapshot_orders_by_score_then_seed() {
        let mut tracker = tracker();
        tracker.record_result(result("a", "b", "m1", 1, 1.0));
        tracker.record_result(result("b", "a", "m1", 1, 0.0));
        tracker.record_result(result("c", "d", "m2", 1, 0.5));
        tracker.record_result(result("d", "c", "m2", 1, 0.5));

        let snapshot = tracker.standings_snapshot();
        let order: Vec<_> = snapshot
            .iter()
            .map(|s| (s.participant_id.as_str(), s.score))
            .collect();
        assert_eq!(order, vec![("a", 1.0), ("c", 0.5), ("d", 0.5), ("b", 0.0)]);
        assert_eq!(snapshot[0].opponents, vec![ParticipantId::from("b")]);
        assert_eq!(tracker.total_points(), 2.0);
    }

    #[test]
    fn test_opponents_follow_round_order() {
        let mut tracker = tracker();
        tracker.record_result(result("a", "c", "m3", 2, 1.0));
        tracker.record_result(result("a", "b", "m1", 1, 1.0));

        let a = tracker
            .standings_snapshot()
            .into_iter()
            .find(|s| s.participant_id.as_str() == "a")
            .unwrap();
        assert_eq!(
            a.opponents,
            vec![ParticipantId::from("b"), ParticipantId::from("c")]
        );
    }

    #[test]
    fn test_bye_counts_without_opponent() {
        let mut tracker = tracker();
        tracker.record_result(ScoreRecord::for_bye(
            TournamentId::from("t"),
            ParticipantId::from("d"),
            1,
            1.0,
        ));

        let top = &tracker.standings_snapshot()[0];
        assert_eq!(top.participant_id.as_str(), "d");
        assert_eq!(top.byes, 1);
        assert!(top.opponents.is_empty());
    }

    #[test]
    fn test_deactivated_participant_hidden() {
        let mut tracker = tracker();
        tracker.deactivate(&ParticipantId::from("b"));

        let snapshot = tracker.standings_snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|s| s.participant_id.as_str() != "b"));
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let mut tracker = tracker();
        tracker.record_result(result("a", "b", "m1", 1, 1.0));

        let first = tracker.standings_snapshot();
        let second = tracker.standings_snapshot();
        assert_eq!(first, second);
    }
}
