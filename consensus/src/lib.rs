//! Committee-based consensus for the Opal chain.
//!
//! Each round runs a fixed sequence of phases: a block generator score is
//! selected, two reduction steps vote the candidate down to one hash, and
//! agreement collection turns the two vote bundles into a certificate.
//!
//! ## Module overview
//!
//! - [`round`] — the round state machine driving the phases, with
//!   per-phase timeouts and cancellation.
//! - [`selection`] — best-score collection during step 1.
//! - [`reduction`] — the shared reduction handler plus both reduction
//!   phase drivers.
//! - [`aggregator`] — per-step vote accumulation and quorum detection.
//! - [`agreement`] — agreement collection and certificate assembly.
//! - [`committee`] — per-round committee cache over the sortition in
//!   `opal_types::provisioners`.
//! - [`queue`] — buffering for messages that arrive ahead of their phase.
//! - [`generator`] — score production behind the external prover seam.
//! - [`moderator`] — absentee strike tracking and removal requests.

pub mod aggregator;
pub mod agreement;
pub mod committee;
pub mod error;
pub mod generator;
pub mod moderator;
pub mod queue;
pub mod reduction;
pub mod round;
pub mod selection;

pub use aggregator::Aggregator;
pub use agreement::AgreementCollector;
pub use committee::CommitteeCache;
pub use error::ConsensusError;
pub use generator::{Bid, Generator, Prover, ScoreProof};
pub use moderator::{Moderator, MAX_STRIKES};
pub use queue::Queue;
pub use round::{Consensus, ConsensusInbox, Emitter, RoundOutcome, Timeouts};
