//! The reputation moderator.
//!
//! Counts one strike per absentee notification within the current round.
//! A provisioner reaching [`MAX_STRIKES`] gets a removal request published
//! for the chain driver to act on. The strike map is cleared on every
//! round update.

use std::collections::HashMap;

use opal_bus::EventBus;
use opal_messages::{Message, Topic};
use opal_types::BlsPublicKey;
use tokio::sync::broadcast;

/// Strikes within one round before a removal request goes out.
pub const MAX_STRIKES: u8 = 3;

/// Absentee strike tracker.
pub struct Moderator {
    strikes: HashMap<BlsPublicKey, u8>,
}

impl Moderator {
    pub fn new() -> Self {
        Self {
            strikes: HashMap::new(),
        }
    }

    /// Record one strike. Returns `true` when the strike count has reached
    /// the removal threshold.
    pub fn add_strike(&mut self, absentee: BlsPublicKey) -> bool {
        let count = self.strikes.entry(absentee).or_insert(0);
        *count = count.saturating_add(1);
        *count >= MAX_STRIKES
    }

    /// Current strike count for a provisioner.
    pub fn strikes(&self, pk: &BlsPublicKey) -> u8 {
        self.strikes.get(pk).copied().unwrap_or(0)
    }

    /// Clear all strikes (round transition).
    pub fn reset(&mut self) {
        self.strikes.clear();
    }

    /// Whether any strikes are currently recorded.
    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }
}

impl Default for Moderator {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the moderator loop: strikes come in on the absentee topic,
/// removal requests go out, and every round update wipes the slate.
pub fn spawn(bus: EventBus, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
    let (_, mut absentees) = bus.subscribe(Topic::Absentees);
    let (_, mut rounds) = bus.subscribe(Topic::RoundUpdate);

    tokio::spawn(async move {
        let mut moderator = Moderator::new();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::debug!("moderator shutting down");
                    return;
                }
                msg = rounds.recv() => {
                    if msg.is_none() {
                        return;
                    }
                    moderator.reset();
                }
                msg = absentees.recv() => {
                    let list = match msg {
                        Some(Message::Absentees(list)) => list,
                        Some(_) => continue,
                        None => return,
                    };
                    for absentee in list {
                        if moderator.add_strike(absentee) {
                            tracing::debug!(provisioner = %absentee, "requesting provisioner removal");
                            bus.publish(
                                Topic::RemoveProvisioner,
                                Message::RemoveProvisioner(absentee),
                            );
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_types::{BlockHash, BlsSignature, Provisioners};
    use std::time::Duration;

    fn pk(byte: u8) -> BlsPublicKey {
        BlsPublicKey([byte; 48])
    }

    #[test]
    fn third_strike_trips_the_threshold() {
        let mut m = Moderator::new();
        assert!(!m.add_strike(pk(1)));
        assert!(!m.add_strike(pk(1)));
        assert!(m.add_strike(pk(1)));
    }

    #[test]
    fn strikes_are_per_provisioner() {
        let mut m = Moderator::new();
        m.add_strike(pk(1));
        m.add_strike(pk(2));
        assert_eq!(m.strikes(&pk(1)), 1);
        assert_eq!(m.strikes(&pk(2)), 1);
        assert_eq!(m.strikes(&pk(3)), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut m = Moderator::new();
        m.add_strike(pk(1));
        m.add_strike(pk(1));
        m.reset();
        assert!(m.is_empty());
        assert_eq!(m.strikes(&pk(1)), 0);
        // Two more strikes after the reset stay below the threshold.
        assert!(!m.add_strike(pk(1)));
        assert!(!m.add_strike(pk(1)));
    }

    #[tokio::test]
    async fn removal_published_on_third_absentee_event() {
        let bus = EventBus::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let _task = spawn(bus.clone(), shutdown_tx.subscribe());
        let (_, mut removals) = bus.subscribe(Topic::RemoveProvisioner);

        for _ in 0..3 {
            bus.publish(Topic::Absentees, Message::Absentees(vec![pk(9)]));
        }

        match tokio::time::timeout(Duration::from_secs(1), removals.recv()).await {
            Ok(Some(Message::RemoveProvisioner(removed))) => assert_eq!(removed, pk(9)),
            other => panic!("expected removal event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn round_update_resets_strikes_across_rounds() {
        let bus = EventBus::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let _task = spawn(bus.clone(), shutdown_tx.subscribe());
        let (_, mut removals) = bus.subscribe(Topic::RemoveProvisioner);

        // Two strikes in round 10.
        for _ in 0..2 {
            bus.publish(Topic::Absentees, Message::Absentees(vec![pk(9)]));
        }
        // Let the strikes land before the round transition; the two
        // channels carry no cross-topic ordering guarantee.
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Round transition, then two more strikes.
        bus.publish(
            Topic::RoundUpdate,
            Message::RoundUpdate(opal_messages::RoundUpdate {
                round: 11,
                hash: BlockHash::new([1; 32]),
                seed: BlsSignature([2; 48]),
                provisioners: Provisioners::new(),
            }),
        );
        // Give the moderator task a beat to process the reset before the
        // follow-up strikes.
        tokio::time::sleep(Duration::from_millis(50)).await;
        for _ in 0..2 {
            bus.publish(Topic::Absentees, Message::Absentees(vec![pk(9)]));
        }

        let outcome = tokio::time::timeout(Duration::from_millis(300), removals.recv()).await;
        assert!(outcome.is_err(), "no removal expected after reset");
    }
}
