//! Swiss pairing algorithm.
//!
//! Participants are ordered by score (round 1: by seed) and each unpaired
//! participant is matched with the nearest-standing opponent it has not
//! met yet. A memoized search finds the fewest rematches any perfect
//! pairing needs, so a rematch is only produced when it is forced. Among
//! pairings with that many rematches the nearest-first one is returned.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Pairing, PairingHistory, ParticipantId, RoundPairings, Standing};

/// Errors that can occur while computing a round.
#[derive(Debug, Error, PartialEq)]
pub enum PairingError {
    #[error("Not enough participants to pair: {0}")]
    NotEnoughParticipants(usize),

    #[error("Odd participant count ({0}) and byes are disabled")]
    OddWithoutBye(usize),

    #[error("No legal pairing exists for round {round}")]
    Unsatisfiable { round: u32 },

    #[error("Pairing search for round {round} hit its state limit")]
    SearchLimit { round: u32 },
}

/// Upper bound on memoized search states explored for one round.
pub const SEARCH_LIMIT: usize = 250_000;

/// How odd pools are handled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ByePolicy {
    /// Odd pools are rejected
    Disabled,

    /// The lowest-standing eligible participant sits out and is awarded `score`
    Award {
        score: f64,
        /// Hand out a second bye only once everybody has had one
        avoid_repeat: bool,
    },
}

impl Default for ByePolicy {
    fn default() -> Self {
        ByePolicy::Award {
            score: 1.0,
            avoid_repeat: true,
        }
    }
}

impl ByePolicy {
    /// Score awarded for a bye, if byes are enabled.
    pub fn score(&self) -> Option<f64> {
        match self {
            ByePolicy::Disabled => None,
            ByePolicy::Award { score, .. } => Some(*score),
        }
    }
}

/// Pairing policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairingPolicy {
    #[serde(default)]
    pub bye: ByePolicy,

    /// Allow forced rematches once the pool is exhausted
    #[serde(default = "default_allow_rematches")]
    pub allow_rematches: bool,
}

fn default_allow_rematches() -> bool {
    true
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            bye: ByePolicy::default(),
            allow_rematches: default_allow_rematches(),
        }
    }
}

/// Swiss-system pairing.
#[derive(Debug, Clone, Default)]
pub struct SwissPairing {
    policy: PairingPolicy,
}

impl SwissPairing {
    pub fn new(policy: PairingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PairingPolicy {
        &self.policy
    }

    /// Check that a pool of `count` participants can be paired at all.
    pub fn check_pool(&self, count: usize) -> Result<(), PairingError> {
        if count < 2 {
            return Err(PairingError::NotEnoughParticipants(count));
        }
        if count % 2 == 1 && self.policy.bye == ByePolicy::Disabled {
            return Err(PairingError::OddWithoutBye(count));
        }
        Ok(())
    }

    /// Compute the pairings of `round` from the current standings.
    ///
    /// `standings` must hold the active participants only. Input order does
    /// not matter; the result depends only on scores, seeds and history.
    pub fn next_round(
        &self,
        round: u32,
        standings: &[Standing],
        history: &PairingHistory,
    ) -> Result<RoundPairings, PairingError> {
        self.check_pool(standings.len())?;

        let mut order: Vec<&Standing> = standings.iter().collect();
        if round <= 1 {
            order.sort_by_key(|s| s.seed);
        } else {
            order.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.seed.cmp(&b.seed)));
        }
        let ids: Vec<&ParticipantId> = order.iter().map(|s| &s.participant_id).collect();

        let bye_candidates = self.bye_candidates(&ids, history);

        // Fewest rematches wins; ties keep the earlier bye candidate.
        let mut states = 0;
        let mut best: Option<(Option<usize>, Vec<&ParticipantId>, Matcher, usize)> = None;
        for &bye in &bye_candidates {
            let pool: Vec<&ParticipantId> = ids
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != bye)
                .map(|(_, id)| *id)
                .collect();

            let mut matcher = Matcher::new(&pool, history);
            let cost = matcher
                .min_rematches(&mut states)
                .ok_or(PairingError::SearchLimit { round })?;
            if best.as_ref().map_or(true, |(.., least)| cost < *least) {
                best = Some((bye, pool, matcher, cost));
            }
            if cost == 0 {
                break;
            }
        }

        let Some((bye, pool, mut matcher, rematches)) = best else {
            return Err(PairingError::Unsatisfiable { round });
        };
        if rematches > 0 && !self.policy.allow_rematches {
            return Err(PairingError::Unsatisfiable { round });
        }
        let found = matcher
            .assignment(rematches, &mut states)
            .ok_or(PairingError::SearchLimit { round })?
            .ok_or(PairingError::Unsatisfiable { round })?;

        let pairings: Vec<Pairing> = found
            .into_iter()
            .map(|(i, j)| Pairing::new(pool[i].clone(), pool[j].clone()))
            .collect();
        if rematches > 0 {
            warn!(
                "Round {} needs {} forced rematch(es); pool exhausted",
                round, rematches
            );
        }

        let bye = bye.map(|i| ids[i].clone());
        debug!(
            "Paired round {}: {} pairings, bye {:?}, {} search states",
            round,
            pairings.len(),
            bye,
            states
        );
        Ok(RoundPairings {
            round,
            pairings,
            bye,
            rematches,
        })
    }

    /// Indices (into the ordered list) that may sit out, most preferred first.
    /// `None` means nobody sits out.
    fn bye_candidates(
        &self,
        ids: &[&ParticipantId],
        history: &PairingHistory,
    ) -> Vec<Option<usize>> {
        if ids.len() % 2 == 0 {
            return vec![None];
        }

        let mut bottom_up: Vec<usize> = (0..ids.len()).rev().collect();
        if let ByePolicy::Award {
            avoid_repeat: true, ..
        } = self.policy.bye
        {
            // Stable, so equal counts stay lowest-standing first.
            bottom_up.sort_by_key(|&i| history.bye_count(ids[i]));
        }
        bottom_up.into_iter().map(Some).collect()
    }
}

type Mask = Vec<u64>;

fn is_set(mask: &[u64], i: usize) -> bool {
    mask[i / 64] & (1 << (i % 64)) != 0
}

fn set(mask: &mut [u64], i: usize) {
    mask[i / 64] |= 1 << (i % 64);
}

fn clear(mask: &mut [u64], i: usize) {
    mask[i / 64] &= !(1 << (i % 64));
}

/// Minimum-rematch perfect matching over one ordered pool.
///
/// A state is the set of already paired positions; the lowest unpaired
/// position always pairs next, so each state has one memoized answer.
struct Matcher {
    len: usize,
    /// Per position, the positions it has not met yet
    fresh: Vec<Mask>,
    memo: HashMap<Mask, usize>,
}

impl Matcher {
    fn new(pool: &[&ParticipantId], history: &PairingHistory) -> Self {
        let len = pool.len();
        let words = len.div_ceil(64).max(1);
        let mut fresh = vec![vec![0; words]; len];
        for i in 0..len {
            for j in (i + 1)..len {
                if !history.has_played(pool[i], pool[j]) {
                    set(&mut fresh[i], j);
                    set(&mut fresh[j], i);
                }
            }
        }
        Self {
            len,
            fresh,
            memo: HashMap::new(),
        }
    }

    fn empty_mask(&self) -> Mask {
        vec![0; self.len.div_ceil(64).max(1)]
    }

    fn first_free(&self, mask: &[u64]) -> Option<usize> {
        (0..self.len).find(|&i| !is_set(mask, i))
    }

    fn is_rematch(&self, i: usize, j: usize) -> bool {
        !is_set(&self.fresh[i], j)
    }

    /// Free participants who already met every other free participant each
    /// need a rematch, and one rematch covers at most two of them.
    fn lower_bound(&self, mask: &[u64]) -> usize {
        let stuck = (0..self.len)
            .filter(|&i| !is_set(mask, i))
            .filter(|&i| {
                self.fresh[i]
                    .iter()
                    .zip(mask)
                    .all(|(fresh, paired)| fresh & !paired == 0)
            })
            .count();
        stuck.div_ceil(2)
    }

    /// Fewest rematches needed to pair everyone, or `None` past the limit.
    fn min_rematches(&mut self, states: &mut usize) -> Option<usize> {
        let mut mask = self.empty_mask();
        self.best(&mut mask, states)
    }

    fn best(&mut self, mask: &mut Mask, states: &mut usize) -> Option<usize> {
        let Some(i) = self.first_free(mask) else {
            return Some(0);
        };
        if let Some(&cost) = self.memo.get(mask.as_slice()) {
            return Some(cost);
        }
        *states += 1;
        if *states > SEARCH_LIMIT {
            return None;
        }

        let floor = self.lower_bound(mask);
        set(mask, i);
        // Unmet opponents first; they are the likeliest to reach the floor.
        let mut candidates: Vec<usize> = ((i + 1)..self.len)
            .filter(|&j| !is_set(mask, j))
            .collect();
        candidates.sort_by_key(|&j| self.is_rematch(i, j));

        let mut least = usize::MAX;
        for j in candidates {
            let cost = usize::from(self.is_rematch(i, j));
            if cost >= least {
                continue;
            }
            set(mask, j);
            let rest = self.best(mask, states);
            clear(mask, j);
            let total = cost + rest?;
            if total < least {
                least = total;
                if least == floor {
                    break;
                }
            }
        }
        clear(mask, i);

        self.memo.insert(mask.clone(), least);
        Some(least)
    }

    /// The nearest-first pairing using at most `budget` rematches.
    ///
    /// Outer `None` means the search limit was hit; inner `None` means no
    /// pairing fits the budget.
    fn assignment(
        &mut self,
        mut budget: usize,
        states: &mut usize,
    ) -> Option<Option<Vec<(usize, usize)>>> {
        let mut mask = self.empty_mask();
        let mut found = Vec::with_capacity(self.len / 2);

        while let Some(i) = self.first_free(&mask) {
            set(&mut mask, i);
            let mut partner = None;
            for j in (i + 1)..self.len {
                if is_set(&mask, j) {
                    continue;
                }
                let cost = usize::from(self.is_rematch(i, j));
                if cost > budget {
                    continue;
                }
                set(&mut mask, j);
                if cost + self.best(&mut mask, states)? <= budget {
                    budget -= cost;
                    partner = Some(j);
                    break;
                }
                clear(&mut mask, j);
            }
            let Some(j) = partner else {
                return Some(None);
            };
            found.push((i, j));
        }

        Some(Some(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn standing(name: &str, seed: u32, score: f64) -> Standing {
        let mut s = Standing::new(ParticipantId::from(name), seed);
        s.score = score;
        s
    }

    fn pairs(round: &RoundPairings) -> Vec<(&str, &str)> {
        round
            .pairings
            .iter()
            .map(|p| (p.white.as_str(), p.black.as_str()))
            .collect()
    }

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn test_round_one_pairs_consecutively_by_seed() {
        let standings = vec![
            standing("d", 3, 0.0),
            standing("b", 1, 0.0),
            standing("a", 0, 0.0),
            standing("c", 2, 0.0),
        ];
        let round = SwissPairing::default()
            .next_round(1, &standings, &PairingHistory::new())
            .unwrap();

        assert_eq!(pairs(&round), vec![("a", "b"), ("c", "d")]);
        assert_eq!(round.bye, None);
        assert_eq!(round.rematches, 0);
    }

    #[test]
    fn test_round_two_avoids_rematches() {
        let mut history = PairingHistory::new();
        history.record_round(&RoundPairings {
            round: 1,
            pairings: vec![Pairing::new(id("a"), id("b")), Pairing::new(id("c"), id("d"))],
            bye: None,
            rematches: 0,
        });
        let standings = vec![
            standing("a", 0, 1.0),
            standing("b", 1, 0.0),
            standing("c", 2, 0.5),
            standing("d", 3, 0.5),
        ];

        let round = SwissPairing::default()
            .next_round(2, &standings, &history)
            .unwrap();
        assert_eq!(pairs(&round), vec![("a", "c"), ("d", "b")]);
    }

    #[test]
    fn test_backtracks_instead_of_greedy_dead_end() {
        // Greedy a-c would leave b-d, which already met.
        let mut history = PairingHistory::new();
        history.record_round(&RoundPairings {
            round: 1,
            pairings: vec![Pairing::new(id("a"), id("b")), Pairing::new(id("b"), id("d"))],
            bye: None,
            rematches: 0,
        });
        let standings = vec![
            standing("a", 0, 2.0),
            standing("b", 1, 1.0),
            standing("c", 2, 1.0),
            standing("d", 3, 0.0),
        ];

        let round = SwissPairing::default()
            .next_round(3, &standings, &history)
            .unwrap();
        assert_eq!(pairs(&round), vec![("a", "d"), ("b", "c")]);
        assert_eq!(round.rematches, 0);
    }

    #[test]
    fn test_forced_rematch_is_minimal() {
        // Four players after a full round robin: every pair has met.
        let mut history = PairingHistory::new();
        let all = ["a", "b", "c", "d"];
        for (n, x) in all.iter().enumerate() {
            for y in &all[n + 1..] {
                history.record_round(&RoundPairings {
                    round: 1,
                    pairings: vec![Pairing::new(id(x), id(y))],
                    bye: None,
                    rematches: 0,
                });
            }
        }
        let standings: Vec<_> = all
            .iter()
            .enumerate()
            .map(|(i, n)| standing(n, i as u32, 0.0))
            .collect();

        let round = SwissPairing::default()
            .next_round(4, &standings, &history)
            .unwrap();
        assert_eq!(round.pairings.len(), 2);
        assert_eq!(round.rematches, 2);
    }

    #[test]
    fn test_rematches_disallowed_is_unsatisfiable() {
        let mut history = PairingHistory::new();
        history.record_round(&RoundPairings {
            round: 1,
            pairings: vec![Pairing::new(id("a"), id("b"))],
            bye: None,
            rematches: 0,
        });
        let standings = vec![standing("a", 0, 1.0), standing("b", 1, 0.0)];
        let pairing = SwissPairing::new(PairingPolicy {
            allow_rematches: false,
            ..Default::default()
        });

        assert_eq!(
            pairing.next_round(2, &standings, &history),
            Err(PairingError::Unsatisfiable { round: 2 })
        );
    }

    #[test]
    fn test_odd_pool_gives_bye_to_lowest() {
        let standings = vec![
            standing("a", 0, 0.0),
            standing("b", 1, 0.0),
            standing("c", 2, 0.0),
        ];
        let round = SwissPairing::default()
            .next_round(1, &standings, &PairingHistory::new())
            .unwrap();

        assert_eq!(pairs(&round), vec![("a", "b")]);
        assert_eq!(round.bye, Some(id("c")));
    }

    #[test]
    fn test_second_bye_skips_previous_recipient() {
        let mut history = PairingHistory::new();
        history.record_round(&RoundPairings {
            round: 1,
            pairings: vec![Pairing::new(id("a"), id("b"))],
            bye: Some(id("c")),
            rematches: 0,
        });
        // c is still last but already had a bye; b is next lowest.
        let standings = vec![
            standing("a", 0, 1.0),
            standing("b", 1, 0.0),
            standing("c", 2, 0.0),
        ];

        let round = SwissPairing::default()
            .next_round(2, &standings, &history)
            .unwrap();
        assert_eq!(round.bye, Some(id("b")));
        assert_eq!(pairs(&round), vec![("a", "c")]);
    }

    #[test]
    fn test_repeat_bye_allowed_when_policy_permits() {
        let history = PairingHistory::from_matches(std::iter::empty(), [id("c")]);
        let standings = vec![
            standing("a", 0, 1.0),
            standing("b", 1, 0.0),
            standing("c", 2, 0.0),
        ];
        let lenient = SwissPairing::new(PairingPolicy {
            bye: ByePolicy::Award {
                score: 1.0,
                avoid_repeat: false,
            },
            allow_rematches: true,
        });

        let round = lenient.next_round(2, &standings, &history).unwrap();
        assert_eq!(round.bye, Some(id("c")));

        let strict = SwissPairing::default();
        let round = strict.next_round(2, &standings, &history).unwrap();
        assert_eq!(round.bye, Some(id("b")));
    }

    #[test]
    fn test_rematch_avoidance_outranks_bye_position() {
        let mut history = PairingHistory::new();
        history.record_round(&RoundPairings {
            round: 1,
            pairings: vec![Pairing::new(id("a"), id("b"))],
            bye: None,
            rematches: 0,
        });
        let standings = vec![
            standing("a", 0, 1.0),
            standing("b", 1, 0.0),
            standing("c", 2, 0.0),
        ];

        // Giving c the bye would force a-b again.
        let round = SwissPairing::default()
            .next_round(2, &standings, &history)
            .unwrap();
        assert_eq!(round.bye, Some(id("b")));
        assert_eq!(round.rematches, 0);
    }

    #[test]
    fn test_pool_validation() {
        let pairing = SwissPairing::default();
        assert_eq!(
            pairing.check_pool(1),
            Err(PairingError::NotEnoughParticipants(1))
        );
        assert!(pairing.check_pool(3).is_ok());

        let strict = SwissPairing::new(PairingPolicy {
            bye: ByePolicy::Disabled,
            allow_rematches: true,
        });
        assert_eq!(strict.check_pool(5), Err(PairingError::OddWithoutBye(5)));
        assert!(strict.check_pool(6).is_ok());
    }

    #[test]
    fn test_deterministic_output() {
        let standings: Vec<_> = (0..8)
            .map(|i| standing(&format!("p{}", i), i, f64::from(i % 3) * 0.5))
            .collect();
        let mut reversed = standings.clone();
        reversed.reverse();

        let pairing = SwissPairing::default();
        let history = PairingHistory::new();
        assert_eq!(
            pairing.next_round(2, &standings, &history).unwrap(),
            pairing.next_round(2, &reversed, &history).unwrap()
        );
    }

    #[test]
    fn test_no_participant_paired_twice_in_round() {
        let standings: Vec<_> = (0..9)
            .map(|i| standing(&format!("p{}", i), i, 0.0))
            .collect();
        let round = SwissPairing::default()
            .next_round(1, &standings, &PairingHistory::new())
            .unwrap();

        let mut seen: Vec<_> = round.participants().collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 9);
        assert_eq!(round.pairings.len(), 4);
    }

    #[test]
    fn test_bye_goes_to_fewest_previous_byes() {
        // Everybody already sat out; a has done so least often.
        let history =
            PairingHistory::from_matches(std::iter::empty(), [id("a"), id("b"), id("b"), id("c"), id("c")]);
        let standings = vec![
            standing("a", 0, 2.0),
            standing("b", 1, 1.0),
            standing("c", 2, 0.0),
        ];

        let round = SwissPairing::default()
            .next_round(6, &standings, &history)
            .unwrap();
        assert_eq!(round.bye, Some(id("a")));
        assert_eq!(pairs(&round), vec![("b", "c")]);
    }

    fn names(count: u32) -> Vec<String> {
        (0..count).map(|i| format!("p{:02}", i)).collect()
    }

    fn history_without(names: &[String], skip: impl Fn(usize, usize) -> bool) -> PairingHistory {
        let mut history = PairingHistory::new();
        for (x, white) in names.iter().enumerate() {
            for (y, black) in names.iter().enumerate().skip(x + 1) {
                if skip(x, y) {
                    continue;
                }
                history.record_round(&RoundPairings {
                    round: 1,
                    pairings: vec![Pairing::new(id(white), id(black))],
                    bye: None,
                    rematches: 0,
                });
            }
        }
        history
    }

    #[test]
    fn test_exhausted_pool_pairs_quickly() {
        for count in [18, 40] {
            let all = names(count);
            let history = history_without(&all, |_, _| false);
            let standings: Vec<_> = all
                .iter()
                .enumerate()
                .map(|(i, n)| standing(n, i as u32, f64::from(i as u32 % 4) * 0.5))
                .collect();

            let started = std::time::Instant::now();
            let round = SwissPairing::default()
                .next_round(count, &standings, &history)
                .unwrap();

            assert!(started.elapsed() < std::time::Duration::from_secs(2));
            assert_eq!(round.pairings.len(), count as usize / 2);
            assert_eq!(round.rematches, count as usize / 2);
        }
    }

    #[test]
    fn test_finds_only_rematch_free_pairing() {
        // Each player has exactly one opponent left: the one ten seeds away.
        let all = names(20);
        let history = history_without(&all, |x, y| y == x + 10);
        let standings: Vec<_> = all
            .iter()
            .enumerate()
            .map(|(i, n)| standing(n, i as u32, 1.0))
            .collect();

        let started = std::time::Instant::now();
        let round = SwissPairing::default()
            .next_round(19, &standings, &history)
            .unwrap();

        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(round.rematches, 0);
        let expected: Vec<(String, String)> = (0..10)
            .map(|i| (all[i].clone(), all[i + 10].clone()))
            .collect();
        let actual: Vec<(String, String)> = pairs(&round)
            .into_iter()
            .map(|(w, b)| (w.to_string(), b.to_string()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_policy_deserializes_from_toml() {
        let policy: PairingPolicy = toml::from_str(
            r#"
            allow_rematches = false
            [bye]
            mode = "award"
            score = 0.5
            avoid_repeat = true
            "#,
        )
        .unwrap();

        assert!(!policy.allow_rematches);
        assert_eq!(policy.bye.score(), Some(0.5));
    }
}
