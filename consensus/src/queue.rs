//! Buffering for consensus messages that arrive before their phase.
//!
//! Messages are keyed by `(round, step)` and drained when the matching
//! phase starts. Entries for future rounds are bounded per round so a
//! hostile peer cannot grow the queue without limit; past-round entries
//! are dropped on every round transition.

use std::collections::{BTreeMap, HashMap};

use opal_messages::Message;
use opal_types::MAX_COMMITTEE_SIZE;

/// Out-of-order message buffer.
pub struct Queue {
    rounds: BTreeMap<u64, HashMap<u8, Vec<Message>>>,
    cap_per_round: usize,
}

impl Queue {
    pub fn new() -> Self {
        Self {
            rounds: BTreeMap::new(),
            cap_per_round: MAX_COMMITTEE_SIZE,
        }
    }

    /// Buffer `msg` under `(round, step)`. Silently drops the message when
    /// the round's buffer is full.
    pub fn put(&mut self, round: u64, step: u8, msg: Message) {
        let steps = self.rounds.entry(round).or_default();
        let total: usize = steps.values().map(Vec::len).sum();
        if total >= self.cap_per_round {
            tracing::debug!(round, step, "queue full for round, dropping message");
            return;
        }
        steps.entry(step).or_default().push(msg);
    }

    /// Remove and return everything buffered for `(round, step)`.
    pub fn drain(&mut self, round: u64, step: u8) -> Vec<Message> {
        self.rounds
            .get_mut(&round)
            .and_then(|steps| steps.remove(&step))
            .unwrap_or_default()
    }

    /// Drop every entry for rounds before `round`.
    pub fn drop_before(&mut self, round: u64) {
        self.rounds = self.rounds.split_off(&round);
    }

    /// Buffered message count for `round`.
    pub fn round_len(&self, round: u64) -> usize {
        self.rounds
            .get(&round)
            .map_or(0, |steps| steps.values().map(Vec::len).sum())
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}
