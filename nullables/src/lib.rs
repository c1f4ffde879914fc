//! Nullable implementations of the node's external collaborators.
//!
//! The score prover, the state-transition executor, the candidate store,
//! and the wallet are separate systems in production. These stand-ins are
//! deterministic, never touch disk or network, and can be swapped in for
//! tests and dev runs.

pub mod candidate_store;
pub mod executor;
pub mod prover;
pub mod wallet;

pub use candidate_store::NullCandidateStore;
pub use executor::NullExecutor;
pub use prover::NullProver;
pub use wallet::NullWallet;
