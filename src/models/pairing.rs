//! Pairing model: who plays whom in a round, and who has already met.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{MatchRecord, ParticipantId};

/// A single pairing. `white` is the owner side for match creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub white: ParticipantId,
    pub black: ParticipantId,
}

impl Pairing {
    pub fn new(white: ParticipantId, black: ParticipantId) -> Self {
        Self { white, black }
    }

    /// Unordered key used by the history.
    pub fn key(&self) -> (ParticipantId, ParticipantId) {
        unordered(&self.white, &self.black)
    }
}

/// Output of one invocation of the pairing algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundPairings {
    /// Round number (1-based)
    pub round: u32,

    pub pairings: Vec<Pairing>,

    /// Participant sitting out this round, if the pool is odd
    pub bye: Option<ParticipantId>,

    /// Number of pairings that repeat an earlier one
    pub rematches: usize,
}

impl RoundPairings {
    /// Every participant scheduled this round, including the bye.
    pub fn participants(&self) -> impl Iterator<Item = &ParticipantId> {
        self.pairings
            .iter()
            .flat_map(|p| [&p.white, &p.black])
            .chain(self.bye.iter())
    }
}

fn unordered(a: &ParticipantId, b: &ParticipantId) -> (ParticipantId, ParticipantId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Append-only record of pairings and byes handed out in a tournament.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PairingHistory {
    /// Unordered pair -> number of times paired
    pairs: BTreeMap<(ParticipantId, ParticipantId), u32>,

    /// Participant -> number of byes received
    byes: BTreeMap<ParticipantId, u32>,
}

impl PairingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild history from created matches and awarded byes.
    pub fn from_matches<'a>(
        matches: impl IntoIterator<Item = &'a MatchRecord>,
        byes: impl IntoIterator<Item = ParticipantId>,
    ) -> Self {
        let mut history = Self::new();
        for m in matches {
            history.record_pair(&m.white, &m.black);
        }
        for bye in byes {
            history.record_bye(bye);
        }
        history
    }

    fn record_bye(&mut self, id: ParticipantId) {
        *self.byes.entry(id).or_insert(0) += 1;
    }

    fn record_pair(&mut self, a: &ParticipantId, b: &ParticipantId) {
        *self.pairs.entry(unordered(a, b)).or_insert(0) += 1;
    }

    /// Append a round's pairings.
    pub fn record_round(&mut self, round: &RoundPairings) {
        for pairing in &round.pairings {
            self.record_pair(&pairing.white, &pairing.black);
        }
        if let Some(bye) = &round.bye {
            self.record_bye(bye.clone());
        }
    }

    pub fn has_played(&self, a: &ParticipantId, b: &ParticipantId) -> bool {
        self.times_played(a, b) > 0
    }

    pub fn times_played(&self, a: &ParticipantId, b: &ParticipantId) -> u32 {
        self.pairs.get(&unordered(a, b)).copied().unwrap_or(0)
    }

    pub fn has_bye(&self, id: &ParticipantId) -> bool {
        self.bye_count(id) > 0
    }

    pub fn bye_count(&self, id: &ParticipantId) -> u32 {
        self.byes.get(id).copied().unwrap_or(0)
    }

    /// Number of distinct pairs that have met more than once.
    pub fn repeated_pairs(&self) -> usize {
        self.pairs.values().filter(|&&n| n > 1).count()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.byes.is_empty()
    }
}
