//! Message topics and their wire tags.
//!
//! Gossiped payloads carry a 15-byte NUL-padded ASCII topic tag in front of
//! the payload body; the peer read loop strips the tag to route the message
//! to the right subscribers.

use crate::MessageError;

/// Width of the topic tag prepended to gossip payloads.
pub const TOPIC_TAG_LEN: usize = 15;

/// Every topic messages travel under, on the bus or on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    // Consensus message flow
    Score,
    Reduction,
    Agreement,
    BestScore,
    StepVotes,
    Certificate,
    Absentees,
    RemoveProvisioner,

    // Chain / lifecycle
    Block,
    Candidate,
    AcceptedBlock,
    IntermediateBlock,
    RoundUpdate,
    StopConsensus,
    Initialization,
    HighestSeen,

    // Sync
    Inv,
    GetRoundResults,
    RoundResults,

    // Outbound fan-out
    Gossip,

    // RPC-bus call topics
    GetCandidate,
    GetLastBlock,
    GetLastCertificate,
    VerifyCandidateBlock,
    ClearWalletDatabase,
}

impl Topic {
    /// Canonical ASCII name, at most [`TOPIC_TAG_LEN`] bytes.
    pub fn name(&self) -> &'static str {
        match self {
            Topic::Score => "score",
            Topic::Reduction => "reduction",
            Topic::Agreement => "agreement",
            Topic::BestScore => "bestscore",
            Topic::StepVotes => "stepvotes",
            Topic::Certificate => "certificate",
            Topic::Absentees => "absentees",
            Topic::RemoveProvisioner => "removeprov",
            Topic::Block => "block",
            Topic::Candidate => "candidate",
            Topic::AcceptedBlock => "acceptedblock",
            Topic::IntermediateBlock => "intermblock",
            Topic::RoundUpdate => "roundupdate",
            Topic::StopConsensus => "stopconsensus",
            Topic::Initialization => "initialization",
            Topic::HighestSeen => "highestseen",
            Topic::Inv => "inv",
            Topic::GetRoundResults => "getroundresults",
            Topic::RoundResults => "roundresults",
            Topic::Gossip => "gossip",
            Topic::GetCandidate => "getcandidate",
            Topic::GetLastBlock => "getlastblock",
            Topic::GetLastCertificate => "getlastcert",
            Topic::VerifyCandidateBlock => "verifycandidate",
            Topic::ClearWalletDatabase => "clearwalletdb",
        }
    }

    /// The 15-byte NUL-padded wire tag.
    pub fn tag(&self) -> [u8; TOPIC_TAG_LEN] {
        let mut tag = [0u8; TOPIC_TAG_LEN];
        let name = self.name().as_bytes();
        tag[..name.len()].copy_from_slice(name);
        tag
    }

    /// Parse a wire tag back into a topic.
    pub fn from_tag(tag: &[u8]) -> Result<Self, MessageError> {
        let end = tag.iter().position(|b| *b == 0).unwrap_or(tag.len());
        let name = std::str::from_utf8(&tag[..end])
            .map_err(|_| MessageError::UnknownTopic("<non-utf8>".into()))?;
        Self::from_name(name)
    }

    fn from_name(name: &str) -> Result<Self, MessageError> {
        let topic = match name {
            "score" => Topic::Score,
            "reduction" => Topic::Reduction,
            "agreement" => Topic::Agreement,
            "bestscore" => Topic::BestScore,
            "stepvotes" => Topic::StepVotes,
            "certificate" => Topic::Certificate,
            "absentees" => Topic::Absentees,
            "removeprov" => Topic::RemoveProvisioner,
            "block" => Topic::Block,
            "candidate" => Topic::Candidate,
            "acceptedblock" => Topic::AcceptedBlock,
            "intermblock" => Topic::IntermediateBlock,
            "roundupdate" => Topic::RoundUpdate,
            "stopconsensus" => Topic::StopConsensus,
            "initialization" => Topic::Initialization,
            "highestseen" => Topic::HighestSeen,
            "inv" => Topic::Inv,
            "getroundresults" => Topic::GetRoundResults,
            "roundresults" => Topic::RoundResults,
            "gossip" => Topic::Gossip,
            "getcandidate" => Topic::GetCandidate,
            "getlastblock" => Topic::GetLastBlock,
            "getlastcert" => Topic::GetLastCertificate,
            "verifycandidate" => Topic::VerifyCandidateBlock,
            "clearwalletdb" => Topic::ClearWalletDatabase,
            other => return Err(MessageError::UnknownTopic(other.to_string())),
        };
        Ok(topic)
    }

    /// Prepend this topic's tag to `payload`.
    pub fn prepend(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(TOPIC_TAG_LEN + payload.len());
        out.extend_from_slice(&self.tag());
        out.extend_from_slice(payload);
        out
    }

    /// Split a tagged payload into its topic and body.
    pub fn strip(tagged: &[u8]) -> Result<(Self, &[u8]), MessageError> {
        if tagged.len() < TOPIC_TAG_LEN {
            return Err(MessageError::UnknownTopic("<short payload>".into()));
        }
        let topic = Self::from_tag(&tagged[..TOPIC_TAG_LEN])?;
        Ok((topic, &tagged[TOPIC_TAG_LEN..]))
    }
}
