//! Per-round committee cache.
//!
//! Sortition is deterministic but not free; the cache pre-generates a
//! window of committees ahead of the current step and re-derives nothing.
//! It is rebuilt from scratch on every round update and must be flushed if
//! the provisioner snapshot it was built from changes.

use opal_messages::RoundUpdate;
use opal_types::{BlsSignature, Provisioners, VotingCommittee};

/// How many steps ahead to pre-generate when the cache misses.
const PREGENERATE_WINDOW: u8 = 8;

/// Memoized voting committees for one round.
pub struct CommitteeCache {
    round: u64,
    seed: BlsSignature,
    committees: Vec<VotingCommittee>,
}

impl CommitteeCache {
    pub fn new(ru: &RoundUpdate) -> Self {
        Self {
            round: ru.round,
            seed: ru.seed,
            committees: Vec::new(),
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// The committee for `step`, extending the cache window as needed.
    pub fn committee(&mut self, provisioners: &Provisioners, step: u8) -> &VotingCommittee {
        debug_assert!(step >= 1);
        if step as usize > self.committees.len() {
            let starting_step = self.committees.len() as u8 + 1;
            let count = step - starting_step + PREGENERATE_WINDOW;
            self.pregenerate(provisioners, starting_step, count);
        }
        &self.committees[step as usize - 1]
    }

    /// Fill the cache for `count` steps starting at `starting_step`.
    pub fn pregenerate(&mut self, provisioners: &Provisioners, starting_step: u8, count: u8) {
        for step in starting_step..starting_step.saturating_add(count) {
            if (step as usize) > self.committees.len() {
                self.committees
                    .push(provisioners.voting_committee(&self.seed, self.round, step));
            }
        }
    }

    /// Drop every memoized committee. Call after the provisioner set the
    /// cache was built from has been mutated.
    pub fn flush(&mut self) {
        self.committees.clear();
    }
}
