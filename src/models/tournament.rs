//! Tournament and participant models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ParticipantId, PlayerId, TournamentId};

/// Lifecycle status of a tournament.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    /// Accepting participants, no rounds yet
    #[default]
    Awaiting,
    /// Participants frozen, rounds in progress
    Running,
    /// Terminal
    Finished,
}

impl fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TournamentStatus::Awaiting => "awaiting",
            TournamentStatus::Running => "running",
            TournamentStatus::Finished => "finished",
        };
        write!(f, "{}", s)
    }
}

/// A Swiss-system tournament.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    /// Unique identifier
    pub id: TournamentId,

    /// Player who started the tournament
    pub organizer_id: Option<PlayerId>,

    /// Lifecycle status
    pub status: TournamentStatus,

    /// Number of rounds to play, fixed at start
    pub rounds_total: u32,

    /// Rounds whose results are fully applied
    pub rounds_completed: u32,

    /// Round currently being played (0 before start)
    pub current_round: u32,

    /// Minimum participant count required to start
    pub min_participants: usize,

    /// When this record was created
    pub created_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl Tournament {
    /// Create a new tournament in the `awaiting` state.
    pub fn new(id: TournamentId, min_participants: usize) -> Self {
        Self {
            id,
            organizer_id: None,
            status: TournamentStatus::Awaiting,
            rounds_total: 0,
            rounds_completed: 0,
            current_round: 0,
            min_participants,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == TournamentStatus::Finished
    }

    /// Whether the round in progress is the last one.
    pub fn is_final_round(&self) -> bool {
        self.current_round >= self.rounds_total
    }
}

/// A player's entry in a tournament.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Unique identifier
    pub id: ParticipantId,

    /// Tournament this participant belongs to
    pub tournament_id: TournamentId,

    /// Underlying player account
    pub player_id: PlayerId,

    /// Join order, used as the deterministic tie-break
    pub seed: u32,

    /// False once the participant has left
    pub active: bool,

    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// Create a new participant. The ID is derived from tournament and player.
    pub fn new(tournament_id: TournamentId, player_id: PlayerId, seed: u32) -> Self {
        let id = ParticipantId::generate(&[tournament_id.as_str(), player_id.as_str()]);
        Self {
            id,
            tournament_id,
            player_id,
            seed,
            active: true,
            joined_at: Utc::now(),
        }
    }
}
