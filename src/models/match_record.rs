//! Match model: the external match entity as observed by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{MatchId, ParticipantId, TournamentId};

/// Score for a win (including a forfeit in one's favour).
pub const WIN: f64 = 1.0;

/// Score for a draw.
pub const DRAW: f64 = 0.5;

/// Score for a loss (including a forfeit against).
pub const LOSS: f64 = 0.0;

/// Board side. White is the first participant of a created pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

/// Status of a match as reported by the match engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    Ongoing,
    Checkmate {
        winner: Side,
    },
    Stalemate,
    Draw,
    /// White resigned or forfeited
    SurrenderWhite,
    /// Black resigned or forfeited
    SurrenderBlack,
    /// Generic terminal outcome; `None` scores as a draw
    Finished {
        winner: Option<Side>,
    },
}

impl MatchStatus {
    /// A match is closed once its status is terminal.
    pub fn is_closed(&self) -> bool {
        !matches!(self, MatchStatus::Ongoing)
    }

    /// Winning side, if the result is decisive.
    pub fn winner(&self) -> Option<Side> {
        match *self {
            MatchStatus::Checkmate { winner } => Some(winner),
            MatchStatus::SurrenderWhite => Some(Side::Black),
            MatchStatus::SurrenderBlack => Some(Side::White),
            MatchStatus::Finished { winner } => winner,
            MatchStatus::Ongoing | MatchStatus::Stalemate | MatchStatus::Draw => None,
        }
    }

    /// Score pair `(white, black)` for a closed match, `None` while ongoing.
    ///
    /// Decisive results and forfeits give 1.0 / 0.0; everything else
    /// terminal is split 0.5 / 0.5. Both sides always sum to 1.0.
    pub fn scores(&self) -> Option<(f64, f64)> {
        if !self.is_closed() {
            return None;
        }

        Some(match self.winner() {
            Some(Side::White) => (WIN, LOSS),
            Some(Side::Black) => (LOSS, WIN),
            None => (DRAW, DRAW),
        })
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Ongoing => write!(f, "ongoing"),
            MatchStatus::Checkmate { winner: Side::White } => write!(f, "checkmate-white"),
            MatchStatus::Checkmate { winner: Side::Black } => write!(f, "checkmate-black"),
            MatchStatus::Stalemate => write!(f, "stalemate"),
            MatchStatus::Draw => write!(f, "draw"),
            MatchStatus::SurrenderWhite => write!(f, "surrender-white"),
            MatchStatus::SurrenderBlack => write!(f, "surrender-black"),
            MatchStatus::Finished { winner: None } => write!(f, "finished"),
            MatchStatus::Finished {
                winner: Some(Side::White),
            } => write!(f, "finished-white"),
            MatchStatus::Finished {
                winner: Some(Side::Black),
            } => write!(f, "finished-black"),
        }
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.trim().to_lowercase().as_str() {
            "ongoing" => MatchStatus::Ongoing,
            "checkmate-white" => MatchStatus::Checkmate {
                winner: Side::White,
            },
            "checkmate-black" => MatchStatus::Checkmate {
                winner: Side::Black,
            },
            "stalemate" => MatchStatus::Stalemate,
            "draw" => MatchStatus::Draw,
            "surrender-white" => MatchStatus::SurrenderWhite,
            "surrender-black" => MatchStatus::SurrenderBlack,
            "finished" => MatchStatus::Finished { winner: None },
            "finished-white" => MatchStatus::Finished {
                winner: Some(Side::White),
            },
            "finished-black" => MatchStatus::Finished {
                winner: Some(Side::Black),
            },
            other => return Err(format!("unknown match status: {}", other)),
        };
        Ok(status)
    }
}

/// A match between two participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Unique identifier
    pub id: MatchId,

    /// Tournament this match belongs to
    pub tournament_id: TournamentId,

    /// Round number; `None` until the tournament-match link is visible
    pub round: Option<u32>,

    /// Owner side of the pairing
    pub white: ParticipantId,

    pub black: ParticipantId,

    pub status: MatchStatus,

    /// When this record was created
    pub created_at: DateTime<Utc>,
}

impl MatchRecord {
    /// Create a new ongoing match with a deterministic ID.
    pub fn new(
        tournament_id: TournamentId,
        round: u32,
        white: ParticipantId,
        black: ParticipantId,
    ) -> Self {
        let id = MatchId::generate(&[
            tournament_id.as_str(),
            &round.to_string(),
            white.as_str(),
            black.as_str(),
        ]);

        Self {
            id,
            tournament_id,
            round: Some(round),
            white,
            black,
            status: MatchStatus::Ongoing,
            created_at: Utc::now(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    /// Participant playing the given side.
    pub fn participant(&self, side: Side) -> &ParticipantId {
        match side {
            Side::White => &self.white,
            Side::Black => &self.black,
        }
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: MatchStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ongoing_is_open() {
        assert!(!MatchStatus::Ongoing.is_closed());
        assert_eq!(MatchStatus::Ongoing.scores(), None);
    }

    #[test]
    fn test_decisive_scores() {
        let mate = MatchStatus::Checkmate {
            winner: Side::Black,
        };
        assert!(mate.is_closed());
        assert_eq!(mate.scores(), Some((0.0, 1.0)));
        assert_eq!(
            MatchStatus::Finished {
                winner: Some(Side::White)
            }
            .scores(),
            Some((1.0, 0.0))
        );
    }

    #[test]
    fn test_forfeit_scores_like_decisive() {
        assert_eq!(MatchStatus::SurrenderWhite.scores(), Some((0.0, 1.0)));
        assert_eq!(MatchStatus::SurrenderBlack.scores(), Some((1.0, 0.0)));
    }

    #[test]
    fn test_drawn_outcomes() {
        for status in [
            MatchStatus::Stalemate,
            MatchStatus::Draw,
            MatchStatus::Finished { winner: None },
        ] {
            assert_eq!(status.scores(), Some((0.5, 0.5)));
        }
    }

    #[test]
    fn test_scores_conserve_one_point() {
        let closed = [
            MatchStatus::Checkmate {
                winner: Side::White,
            },
            MatchStatus::Stalemate,
            MatchStatus::Draw,
            MatchStatus::SurrenderWhite,
            MatchStatus::SurrenderBlack,
            MatchStatus::Finished { winner: None },
        ];
        for status in closed {
            let (w, b) = status.scores().unwrap();
            assert_eq!(w + b, 1.0, "{} does not sum to 1", status);
        }
    }

    #[test]
    fn test_status_parse_display() {
        for s in [
            "ongoing",
            "checkmate-white",
            "stalemate",
            "surrender-black",
            "finished",
            "finished-black",
        ] {
            let status: MatchStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("resigned".parse::<MatchStatus>().is_err());
    }

    #[test]
    fn test_status_serialization() {
        let status = MatchStatus::Checkmate {
            winner: Side::White,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"kind":"checkmate","winner":"white"}"#);

        let parsed: MatchStatus = serde_json::from_str(r#"{"kind":"draw"}"#).unwrap();
        assert_eq!(parsed, MatchStatus::Draw);
    }

    #[test]
    fn test_match_creation() {
        let record = MatchRecord::new(
            TournamentId::from("t-1"),
            2,
            ParticipantId::from("a"),
            ParticipantId::from("b"),
        );

        assert_eq!(record.round, Some(2));
        assert!(!record.is_closed());
        assert_eq!(record.participant(Side::Black).as_str(), "b");
        assert_eq!(Side::White.opposite(), Side::Black);
    }
}
