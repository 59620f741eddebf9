use crate::error::GameError;
use serde::{Deserialize, Serialize};

/// An ordered record of the votes cast during a single phase.
/// Casting order is preserved because both resolution policies depend on it.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct Votes {
    votes: Vec<(usize, usize)>,
}

impl Votes {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self { votes: vec![] }
    }

    /// The number of votes cast so far.
    pub fn count(&self) -> usize {
        self.votes.len()
    }

    /// Returns whether the given player has cast their vote.
    pub fn has_voted(&self, voter: usize) -> bool {
        self.votes.iter().any(|(v, _)| *v == voter)
    }

    /// Records a vote, rejecting a second vote from the same voter.
    pub fn cast(&mut self, voter: usize, target: usize) -> Result<(), GameError> {
        if self.has_voted(voter) {
            return Err(GameError::DuplicateAction);
        }
        self.votes.push((voter, target));
        Ok(())
    }

    /// Discards all recorded votes.
    pub fn clear(&mut self) {
        self.votes.clear();
    }

    /// Resolution policy for the mafia's kill vote: the target with the most
    /// votes wins, and a tie goes to the most recently cast vote among the
    /// tied targets.
    pub fn majority_latest(&self) -> Option<usize> {
        let mut counts: Vec<(usize, usize)> = vec![];
        let mut leader: Option<(usize, usize)> = None;
        for (_, target) in &self.votes {
            let count = match counts.iter_mut().find(|(t, _)| t == target) {
                Some((_, count)) => {
                    *count += 1;
                    *count
                }
                None => {
                    counts.push((*target, 1));
                    1
                }
            };
            // A target that pulls even with the leader takes the lead,
            // because its vote is the more recent one.
            match leader {
                Some((_, best)) if count < best => {}
                _ => leader = Some((*target, count)),
            }
        }
        leader.map(|(target, _)| target)
    }

    /// Resolution policy for the day vote: the tally is walked in roster
    /// order, and the first target holding the highest count wins a tie.
    /// Returns the leading target and its vote count.
    pub fn tally_leader(&self, num_players: usize) -> Option<(usize, usize)> {
        let mut counts = vec![0usize; num_players];
        for (_, target) in &self.votes {
            counts[*target] += 1;
        }
        let mut leader: Option<(usize, usize)> = None;
        for (target, &count) in counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            match leader {
                Some((_, best)) if count <= best => {}
                _ => leader = Some((target, count)),
            }
        }
        leader
    }
}
