//! Tournament lifecycle: `awaiting` -> `running` -> `finished`.
//!
//! Transitions are pure; persisting the result is the caller's job.

use chrono::Utc;
use std::fmt;
use thiserror::Error;
use tracing::info;

use crate::models::{PlayerId, Tournament, TournamentStatus};

/// Operations gated by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Join,
    Leave,
    Start,
    CompleteRound,
    RecordResult,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Join => "join",
            Action::Leave => "leave",
            Action::Start => "start",
            Action::CompleteRound => "complete a round of",
            Action::RecordResult => "record a result in",
        };
        write!(f, "{}", s)
    }
}

/// Rejected transitions.
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Cannot {action} a tournament that is {from}")]
    Illegal {
        from: TournamentStatus,
        action: Action,
    },

    #[error("Rounds total must be at least 1")]
    NoRounds,

    #[error("Need at least {required} participants, have {actual}")]
    NotEnoughParticipants { required: usize, actual: usize },
}

/// Result of closing a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTransition {
    /// Another round follows
    Advanced { next_round: u32 },
    /// The final round closed
    Finished,
}

/// Owns a tournament record and applies lifecycle transitions to it.
#[derive(Debug, Clone)]
pub struct TournamentStateMachine {
    tournament: Tournament,
}

impl TournamentStateMachine {
    pub fn new(tournament: Tournament) -> Self {
        Self { tournament }
    }

    pub fn tournament(&self) -> &Tournament {
        &self.tournament
    }

    pub fn status(&self) -> TournamentStatus {
        self.tournament.status
    }

    fn require(&self, status: TournamentStatus, action: Action) -> Result<(), TransitionError> {
        if self.tournament.status != status {
            return Err(TransitionError::Illegal {
                from: self.tournament.status,
                action,
            });
        }
        Ok(())
    }

    /// Participants may only join or leave before the start.
    pub fn ensure_roster_open(&self, action: Action) -> Result<(), TransitionError> {
        self.require(TournamentStatus::Awaiting, action)
    }

    pub fn ensure_accepts_results(&self) -> Result<(), TransitionError> {
        self.require(TournamentStatus::Running, Action::RecordResult)
    }

    /// Check the start preconditions without changing anything.
    pub fn check_start(
        &self,
        participant_count: usize,
        rounds_total: u32,
    ) -> Result<(), TransitionError> {
        self.require(TournamentStatus::Awaiting, Action::Start)?;
        if rounds_total == 0 {
            return Err(TransitionError::NoRounds);
        }
        let required = self.tournament.min_participants.max(2);
        if participant_count < required {
            return Err(TransitionError::NotEnoughParticipants {
                required,
                actual: participant_count,
            });
        }
        Ok(())
    }

    /// `awaiting -> running`. Round 1 becomes the current round.
    pub fn start(
        &mut self,
        organizer: PlayerId,
        participant_count: usize,
        rounds_total: u32,
    ) -> Result<(), TransitionError> {
        self.check_start(participant_count, rounds_total)?;

        let t = &mut self.tournament;
        t.status = TournamentStatus::Running;
        t.organizer_id = Some(organizer);
        t.rounds_total = rounds_total;
        t.rounds_completed = 0;
        t.current_round = 1;
        t.started_at = Some(Utc::now());

        info!(
            "Tournament {} running: {} participants, {} rounds",
            t.id, participant_count, rounds_total
        );
        Ok(())
    }

    /// Close the current round: `running -> running` or `running -> finished`.
    pub fn complete_round(&mut self) -> Result<RoundTransition, TransitionError> {
        self.require(TournamentStatus::Running, Action::CompleteRound)?;

        let t = &mut self.tournament;
        t.rounds_completed += 1;

        if t.rounds_completed >= t.rounds_total {
            t.status = TournamentStatus::Finished;
            t.finished_at = Some(Utc::now());
            info!(
                "Tournament {} finished after {} rounds",
                t.id, t.rounds_completed
            );
            return Ok(RoundTransition::Finished);
        }

        t.current_round += 1;
        info!(
            "Tournament {} closed round {}, advancing to round {}",
            t.id, t.rounds_completed, t.current_round
        );
        Ok(RoundTransition::Advanced {
            next_round: t.current_round,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TournamentId;

    fn machine() -> TournamentStateMachine {
        TournamentStateMachine::new(Tournament::new(TournamentId::from("t"), 2))
    }

    #[test]
    fn test_start_transitions_to_running() {
        let mut sm = machine();
        sm.start(PlayerId::from("org"), 4, 3).unwrap();

        let t = sm.tournament();
        assert_eq!(t.status, TournamentStatus::Running);
        assert_eq!(t.current_round, 1);
        assert_eq!(t.rounds_total, 3);
        assert!(t.started_at.is_some());
    }

    #[test]
    fn test_start_requires_participants() {
        let mut sm = machine();
        assert_eq!(
            sm.start(PlayerId::from("org"), 1, 3),
            Err(TransitionError::NotEnoughParticipants {
                required: 2,
                actual: 1
            })
        );
        assert_eq!(sm.status(), TournamentStatus::Awaiting);
    }

    #[test]
    fn test_start_requires_rounds() {
        let mut sm = machine();
        assert_eq!(
            sm.start(PlayerId::from("org"), 4, 0),
            Err(TransitionError::NoRounds)
        );
    }

    #[test]
    fn test_double_start_rejected() {
        let mut sm = machine();
        sm.start(PlayerId::from("org"), 4, 3).unwrap();

        let err = sm.start(PlayerId::from("org"), 4, 3).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: TournamentStatus::Running,
                action: Action::Start
            }
        );
        assert_eq!(err.to_string(), "Cannot start a tournament that is running");
    }

    #[test]
    fn test_rounds_advance_then_finish() {
        let mut sm = machine();
        sm.start(PlayerId::from("org"), 4, 2).unwrap();

        assert_eq!(
            sm.complete_round(),
            Ok(RoundTransition::Advanced { next_round: 2 })
        );
        assert_eq!(sm.complete_round(), Ok(RoundTransition::Finished));

        let t = sm.tournament();
        assert_eq!(t.status, TournamentStatus::Finished);
        assert_eq!(t.rounds_completed, 2);
        assert!(t.finished_at.is_some());
    }

    #[test]
    fn test_finished_rejects_everything() {
        let mut sm = machine();
        sm.start(PlayerId::from("org"), 2, 1).unwrap();
        sm.complete_round().unwrap();

        assert!(sm.complete_round().is_err());
        assert!(sm.ensure_accepts_results().is_err());
        assert!(sm.ensure_roster_open(Action::Join).is_err());
    }

    #[test]
    fn test_roster_closed_once_running() {
        let mut sm = machine();
        assert!(sm.ensure_roster_open(Action::Join).is_ok());
        assert!(sm.ensure_accepts_results().is_err());

        sm.start(PlayerId::from("org"), 2, 1).unwrap();
        assert!(sm.ensure_roster_open(Action::Leave).is_err());
        assert!(sm.ensure_accepts_results().is_ok());
    }
}
