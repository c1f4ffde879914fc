//! Typed messages travelling the event bus and the wire.
//!
//! Every consensus message embeds a shared [`ConsensusHeader`] by
//! composition and is carried as one variant of [`Message`]. Payloads that
//! cross the network have hand-written little-endian codecs in [`wire`];
//! in-process traffic stays typed end to end.

pub mod frame;
pub mod header;
pub mod rpc;
pub mod topics;
pub mod wire;

use opal_types::{
    BlockHash, BlsPublicKey, BlsSignature, Block, Certificate, Provisioners, StepVotes,
};
use thiserror::Error;

pub use frame::{read_frame, write_frame, Frame, MAGIC_MAINNET, MAGIC_TESTNET};
pub use header::{ConsensusHeader, ConsensusMsg};
pub use rpc::{CallParams, CallResponse};
pub use topics::{Topic, TOPIC_TAG_LEN};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("encoding error: {0}")]
    Encoding(#[from] opal_types::EncodingError),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("topic {0:?} has no wire representation")]
    NotWireable(Topic),

    #[error("bad magic: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },

    #[error("checksum mismatch")]
    BadChecksum,

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A score broadcast by a block generator during selection.
///
/// `header.block_hash` is the candidate block the generator is voting
/// toward; the score value decides the selection winner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScoreMessage {
    pub header: ConsensusHeader,
    /// 32-byte big-endian score value produced by the score prover.
    pub score: BlockHash,
    /// Opaque score proof, checked by the external prover.
    pub proof: Vec<u8>,
    /// Fingerprint of the bid-list subset the proof was built against.
    pub bid_subset: Vec<u8>,
    /// Random seed the proof committed to.
    pub seed: Vec<u8>,
}

/// A committee member's signed vote in a reduction step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReductionMessage {
    pub header: ConsensusHeader,
    pub signature: BlsSignature,
}

/// The final consensus message bundling both reduction outcomes.
///
/// Only the header is signed; the embedded step votes are carried as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgreementMessage {
    pub header: ConsensusHeader,
    pub signature: BlsSignature,
    pub votes_per_step: [StepVotes; 2],
}

/// Internal phase product: the aggregated votes of one reduction step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepVotesMessage {
    pub header: ConsensusHeader,
    pub votes: StepVotes,
}

/// Internal selection outcome delivered to the first reduction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BestScoreMessage {
    pub round: u64,
    pub step: u8,
    /// The winning score, if any score survived selection.
    pub winner: Option<ScoreMessage>,
}

/// A candidate block with its certificate (empty until finalized).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateMessage {
    pub block: Block,
    pub certificate: Certificate,
}

/// Emitted by agreement collection once a block hash reaches quorum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateMessage {
    pub round: u64,
    pub block_hash: BlockHash,
    pub certificate: Certificate,
    /// Committee members whose agreement signatures were collected.
    pub signers: Vec<BlsPublicKey>,
    /// Committee members that never showed up.
    pub absentees: Vec<BlsPublicKey>,
}

/// Inventory advertisement of newly accepted blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvMessage {
    pub blocks: Vec<BlockHash>,
}

/// Broadcast once per successful finalization; consensus components
/// re-instantiate from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundUpdate {
    pub round: u64,
    pub hash: BlockHash,
    pub seed: BlsSignature,
    pub provisioners: Provisioners,
}

/// Every message the event bus carries.
#[derive(Clone, Debug)]
pub enum Message {
    Score(ScoreMessage),
    Reduction(ReductionMessage),
    Agreement(AgreementMessage),
    StepVotes(StepVotesMessage),
    BestScore(BestScoreMessage),
    Certificate(CertificateMessage),
    Candidate(CandidateMessage),
    Block(Box<Block>),
    AcceptedBlock(Box<Block>),
    IntermediateBlock(Box<Block>),
    RoundUpdate(RoundUpdate),
    HighestSeen(u64),
    Inv(InvMessage),
    GetRoundResults(u64),
    RoundResults(CandidateMessage),
    Absentees(Vec<BlsPublicKey>),
    RemoveProvisioner(BlsPublicKey),
    StopConsensus,
    Initialization,
}

impl Message {
    /// The topic this message naturally belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            Message::Score(_) => Topic::Score,
            Message::Reduction(_) => Topic::Reduction,
            Message::Agreement(_) => Topic::Agreement,
            Message::StepVotes(_) => Topic::StepVotes,
            Message::BestScore(_) => Topic::BestScore,
            Message::Certificate(_) => Topic::Certificate,
            Message::Candidate(_) => Topic::Candidate,
            Message::Block(_) => Topic::Block,
            Message::AcceptedBlock(_) => Topic::AcceptedBlock,
            Message::IntermediateBlock(_) => Topic::IntermediateBlock,
            Message::RoundUpdate(_) => Topic::RoundUpdate,
            Message::HighestSeen(_) => Topic::HighestSeen,
            Message::Inv(_) => Topic::Inv,
            Message::GetRoundResults(_) => Topic::GetRoundResults,
            Message::RoundResults(_) => Topic::RoundResults,
            Message::Absentees(_) => Topic::Absentees,
            Message::RemoveProvisioner(_) => Topic::RemoveProvisioner,
            Message::StopConsensus => Topic::StopConsensus,
            Message::Initialization => Topic::Initialization,
        }
    }
}

impl ConsensusMsg for ScoreMessage {
    fn header(&self) -> &ConsensusHeader {
        &self.header
    }
}

impl ConsensusMsg for ReductionMessage {
    fn header(&self) -> &ConsensusHeader {
        &self.header
    }
}

impl ConsensusMsg for AgreementMessage {
    fn header(&self) -> &ConsensusHeader {
        &self.header
    }
}

impl ConsensusMsg for StepVotesMessage {
    fn header(&self) -> &ConsensusHeader {
        &self.header
    }
}
