//! Little-endian wire codecs for the payloads that cross the network.
//!
//! Only a subset of [`Message`] is wireable: consensus votes, blocks,
//! inventory, and round-results sync traffic. Internal bus messages
//! (round updates, phase products, control signals) never leave the
//! process.

use opal_types::encoding::{
    write_256, write_bls_signature, write_u64_le, write_u8, write_varbytes, write_varint,
    EncodingError, Reader,
};
use opal_types::{Block, BlockHash, Certificate, StepVotes};

use crate::{
    AgreementMessage, CandidateMessage, ConsensusHeader, InvMessage, Message, MessageError,
    ReductionMessage, ScoreMessage, Topic,
};

/// Encode a message for gossip. Returns the topic to tag it with and the
/// payload body.
pub fn encode_message(msg: &Message) -> Result<(Topic, Vec<u8>), MessageError> {
    let mut buf = Vec::new();
    match msg {
        Message::Score(score) => {
            score.header.encode(&mut buf);
            write_256(&mut buf, &score.score);
            write_varbytes(&mut buf, &score.proof);
            write_varbytes(&mut buf, &score.bid_subset);
            write_varbytes(&mut buf, &score.seed);
        }
        Message::Reduction(red) => {
            red.header.encode(&mut buf);
            write_bls_signature(&mut buf, &red.signature);
        }
        Message::Agreement(agr) => {
            agr.header.encode(&mut buf);
            write_bls_signature(&mut buf, &agr.signature);
            for votes in &agr.votes_per_step {
                encode_step_votes(&mut buf, votes);
            }
        }
        Message::Block(block) => block.encode(&mut buf),
        Message::Inv(inv) => {
            write_varint(&mut buf, inv.blocks.len() as u64);
            for hash in &inv.blocks {
                write_256(&mut buf, hash);
            }
        }
        Message::GetRoundResults(round) => write_u64_le(&mut buf, *round),
        Message::RoundResults(cm) => {
            cm.block.encode(&mut buf);
            cm.certificate.encode(&mut buf);
        }
        other => return Err(MessageError::NotWireable(other.topic())),
    }
    Ok((msg.topic(), buf))
}

/// Decode a gossip payload body for `topic` back into a typed message.
pub fn decode_message(topic: Topic, body: &[u8]) -> Result<Message, MessageError> {
    let mut r = Reader::new(body);
    let msg = match topic {
        Topic::Score => {
            let header = ConsensusHeader::decode(&mut r)?;
            Message::Score(ScoreMessage {
                header,
                score: r.read_256()?,
                proof: r.read_varbytes()?,
                bid_subset: r.read_varbytes()?,
                seed: r.read_varbytes()?,
            })
        }
        Topic::Reduction => {
            let header = ConsensusHeader::decode(&mut r)?;
            Message::Reduction(ReductionMessage {
                header,
                signature: r.read_bls_signature()?,
            })
        }
        Topic::Agreement => {
            let header = ConsensusHeader::decode(&mut r)?;
            let signature = r.read_bls_signature()?;
            let first = decode_step_votes(&mut r)?;
            let second = decode_step_votes(&mut r)?;
            Message::Agreement(AgreementMessage {
                header,
                signature,
                votes_per_step: [first, second],
            })
        }
        Topic::Block => Message::Block(Box::new(Block::decode(&mut r)?)),
        Topic::Inv => {
            let count = r.read_varint()?;
            if count > 4_096 {
                return Err(EncodingError::LengthOutOfRange(count, 4_096).into());
            }
            let mut blocks = Vec::with_capacity(count as usize);
            for _ in 0..count {
                blocks.push(r.read_256()?);
            }
            Message::Inv(InvMessage { blocks })
        }
        Topic::GetRoundResults => Message::GetRoundResults(r.read_u64_le()?),
        Topic::RoundResults => {
            let block = Block::decode(&mut r)?;
            let certificate = Certificate::decode(&mut r)?;
            Message::RoundResults(CandidateMessage { block, certificate })
        }
        other => return Err(MessageError::NotWireable(other)),
    };
    Ok(msg)
}

pub fn encode_step_votes(w: &mut Vec<u8>, votes: &StepVotes) {
    write_u8(w, votes.step);
    write_bls_signature(w, &votes.signature);
    write_u64_le(w, votes.bitset);
    write_256(w, &votes.block_hash);
}

pub fn decode_step_votes(r: &mut Reader<'_>) -> Result<StepVotes, EncodingError> {
    Ok(StepVotes {
        step: r.read_u8()?,
        signature: r.read_bls_signature()?,
        bitset: r.read_u64_le()?,
        block_hash: r.read_256()?,
    })
}
