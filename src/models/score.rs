//! Score records and derived standings.

use serde::{Deserialize, Serialize};

use super::{MatchId, ParticipantId, TournamentId};

/// What a score entry was awarded for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreSource {
    Match {
        match_id: MatchId,
    },
    /// Keyed by recipient so two byes in one round can never collide.
    Bye {
        round: u32,
        participant_id: ParticipantId,
    },
}

/// Idempotency key of a score entry.
pub type ScoreKey = (ParticipantId, ScoreSource);

/// One persisted score entry for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub tournament_id: TournamentId,

    pub participant_id: ParticipantId,

    pub source: ScoreSource,

    pub round: u32,

    /// Opponent faced; `None` for byes
    pub opponent: Option<ParticipantId>,

    pub score: f64,
}

impl ScoreRecord {
    pub fn for_match(
        tournament_id: TournamentId,
        participant_id: ParticipantId,
        match_id: MatchId,
        round: u32,
        opponent: ParticipantId,
        score: f64,
    ) -> Self {
        Self {
            tournament_id,
            participant_id,
            source: ScoreSource::Match { match_id },
            round,
            opponent: Some(opponent),
            score,
        }
    }

    pub fn for_bye(
        tournament_id: TournamentId,
        participant_id: ParticipantId,
        round: u32,
        score: f64,
    ) -> Self {
        Self {
            source: ScoreSource::Bye {
                round,
                participant_id: participant_id.clone(),
            },
            tournament_id,
            participant_id,
            round,
            opponent: None,
            score,
        }
    }

    pub fn key(&self) -> ScoreKey {
        (self.participant_id.clone(), self.source.clone())
    }
}

/// A participant's cumulative position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub participant_id: ParticipantId,

    /// Join order, tie-break key
    pub seed: u32,

    pub score: f64,

    /// Opponents faced, in round order
    pub opponents: Vec<ParticipantId>,

    /// Byes received
    pub byes: u32,
}

impl Standing {
    pub fn new(participant_id: ParticipantId, seed: u32) -> Self {
        Self {
            participant_id,
            seed,
            score: 0.0,
            opponents: Vec::new(),
            byes: 0,
        }
    }
}
