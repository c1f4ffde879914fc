//! The provisioner set and deterministic committee sortition.
//!
//! The registry is owned by the chain driver; consensus receives a cloned
//! snapshot inside every round update, so in-flight rounds never observe
//! membership changes. Committee extraction walks members in ascending
//! public-key order, assigning each slot to the member whose cumulative
//! stake interval contains the slot's sortition score.

use crate::hash::BlockHash;
use crate::keys::{BlsPublicKey, BlsSignature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum number of slots in a voting committee.
pub const MAX_COMMITTEE_SIZE: usize = 64;

/// Quorum ratio for reductions and agreement, in basis points.
const QUORUM_BPS: u64 = 7_500;
const BPS_DENOMINATOR: u64 = 10_000;

#[derive(Debug, Error)]
pub enum ProvisionerError {
    #[error("stake must be positive")]
    ZeroStake,

    #[error("activation window is empty: start {start} >= end {end}")]
    EmptyWindow { start: u64, end: u64 },

    #[error("provisioner {0} not found")]
    NotFound(BlsPublicKey),
}

/// A staked committee-eligible member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioner {
    pub public_key: BlsPublicKey,
    pub stake: u64,
    pub start_height: u64,
    pub end_height: u64,
}

impl Provisioner {
    /// Whether the stake is active at `round`.
    pub fn is_active(&self, round: u64) -> bool {
        self.start_height <= round && round < self.end_height
    }
}

/// The provisioner registry: a deterministic map from public key to stake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioners {
    members: BTreeMap<BlsPublicKey, Provisioner>,
}

impl Provisioners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provisioner. Replaces any previous entry for the key.
    pub fn add(
        &mut self,
        public_key: BlsPublicKey,
        stake: u64,
        start_height: u64,
        end_height: u64,
    ) -> Result<(), ProvisionerError> {
        if stake == 0 {
            return Err(ProvisionerError::ZeroStake);
        }
        if start_height >= end_height {
            return Err(ProvisionerError::EmptyWindow {
                start: start_height,
                end: end_height,
            });
        }
        self.members.insert(
            public_key,
            Provisioner {
                public_key,
                stake,
                start_height,
                end_height,
            },
        );
        Ok(())
    }

    /// Remove a provisioner from the registry.
    pub fn remove(&mut self, public_key: &BlsPublicKey) -> Result<(), ProvisionerError> {
        self.members
            .remove(public_key)
            .map(|_| ())
            .ok_or(ProvisionerError::NotFound(*public_key))
    }

    pub fn contains(&self, public_key: &BlsPublicKey) -> bool {
        self.members.contains_key(public_key)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Stake of a member if active at `round`, zero otherwise.
    pub fn stake_of(&self, public_key: &BlsPublicKey, round: u64) -> u64 {
        self.members
            .get(public_key)
            .filter(|p| p.is_active(round))
            .map_or(0, |p| p.stake)
    }

    /// Sum of all active stakes at `round`.
    pub fn total_stake(&self, round: u64) -> u64 {
        self.active_members(round).map(|p| p.stake).sum()
    }

    /// Number of members with active stake at `round`.
    pub fn active_count(&self, round: u64) -> usize {
        self.active_members(round).count()
    }

    /// Active members in ascending public-key order.
    pub fn active_members(&self, round: u64) -> impl Iterator<Item = &Provisioner> {
        self.members.values().filter(move |p| p.is_active(round))
    }

    /// Derive the voting committee for `(round, step)` from the previous
    /// block's seed.
    ///
    /// For each slot `i`, the sortition score is the first 16 bytes of
    /// `SHA-256(seed ‖ round ‖ step ‖ i)` (all integers little-endian on
    /// input, the digest prefix read big-endian) reduced modulo the total
    /// active stake; the slot goes to the member whose cumulative stake
    /// interval contains the score.
    pub fn voting_committee(
        &self,
        seed: &BlsSignature,
        round: u64,
        step: u8,
    ) -> VotingCommittee {
        let actives: Vec<&Provisioner> = self.active_members(round).collect();
        let total: u64 = actives.iter().map(|p| p.stake).sum();
        if actives.is_empty() || total == 0 {
            return VotingCommittee::default();
        }

        let size = actives.len().min(MAX_COMMITTEE_SIZE);
        let mut slots = Vec::with_capacity(size);
        for i in 0..size as u64 {
            let mut input = Vec::with_capacity(48 + 24);
            input.extend_from_slice(seed.as_bytes());
            input.extend_from_slice(&round.to_le_bytes());
            input.extend_from_slice(&(step as u64).to_le_bytes());
            input.extend_from_slice(&i.to_le_bytes());
            let digest = BlockHash::compute(&input);
            let prefix: [u8; 16] = digest.as_bytes()[..16]
                .try_into()
                .expect("16-byte prefix of a 32-byte digest");
            let score = u128::from_be_bytes(prefix) % total as u128;

            let mut cumulative = 0u128;
            let mut assigned = actives[actives.len() - 1].public_key;
            for p in &actives {
                cumulative += p.stake as u128;
                if score < cumulative {
                    assigned = p.public_key;
                    break;
                }
            }
            slots.push(assigned);
        }

        VotingCommittee { slots }
    }
}

/// The slot-weighted committee extracted for one `(round, step)`.
///
/// A member may occupy several slots; its vote weight is its slot count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VotingCommittee {
    slots: Vec<BlsPublicKey>,
}

impl VotingCommittee {
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_member(&self, public_key: &BlsPublicKey) -> bool {
        self.slots.contains(public_key)
    }

    /// Number of slots held by `public_key`.
    pub fn weight(&self, public_key: &BlsPublicKey) -> usize {
        self.slots.iter().filter(|pk| *pk == public_key).count()
    }

    /// Bitset with one bit per slot held by `public_key`.
    pub fn bits(&self, public_key: &BlsPublicKey) -> u64 {
        let mut mask = 0u64;
        for (i, pk) in self.slots.iter().enumerate() {
            if pk == public_key {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Slot-votes required to reach quorum: `ceil(0.75 · size)`.
    pub fn quorum(&self) -> usize {
        let size = self.slots.len() as u64;
        (size * QUORUM_BPS).div_ceil(BPS_DENOMINATOR) as usize
    }

    /// Distinct members, ascending by public key.
    pub fn members(&self) -> Vec<BlsPublicKey> {
        let mut members: Vec<BlsPublicKey> = self.slots.clone();
        members.sort();
        members.dedup();
        members
    }

    /// Members whose bit is set in `bitset`, ascending by slot index with
    /// duplicates removed.
    pub fn members_in_bitset(&self, bitset: u64) -> Vec<BlsPublicKey> {
        let mut members = Vec::new();
        for (i, pk) in self.slots.iter().enumerate() {
            if bitset & (1 << i) != 0 && !members.contains(pk) {
                members.push(*pk);
            }
        }
        members
    }
}
