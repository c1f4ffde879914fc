//! The chain driver: block acceptance, certificate handling, and sync.
//!
//! The driver owns the provisioner registry, the chain tip, and the
//! intermediate block. It runs as a single event loop; every mutation of
//! chain state happens there, and consensus only ever sees provisioner
//! snapshots delivered through round updates.

pub mod chain;
pub mod genesis;
pub mod sync;
pub mod verifiers;

pub use chain::{Chain, ChainStatus, Executor};
pub use sync::Synchronizer;

use opal_types::BlockHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("sanity check failed: {0}")]
    Sanity(String),

    #[error("certificate verification failed: {0}")]
    Certificate(String),

    #[error("state transition failed: {0}")]
    Executor(String),

    #[error("store error: {0}")]
    Store(#[from] opal_store::StoreError),

    #[error("bus error: {0}")]
    Bus(#[from] opal_bus::BusError),

    #[error("no intermediate block currently known")]
    NoIntermediateBlock,

    #[error("round results request timed out")]
    RoundResultsTimeout,

    #[error("candidate block {0} not found")]
    CandidateNotFound(BlockHash),

    #[error("{0}")]
    Other(String),
}
