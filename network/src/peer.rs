//! Per-peer read loop and the outbound gossip drain.
//!
//! One reader task per peer: frames come in, magic and checksum are
//! validated by the frame codec, the 15-byte topic tag is stripped, and
//! the decoded message is published on its topic. Malformed traffic is
//! logged and dropped; the connection survives bad payloads but dies on
//! IO errors.

use std::sync::Arc;

use opal_bus::EventBus;
use opal_messages::{frame, wire, MessageError, Topic};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::RwLock;

use crate::registry::ConnectionRegistry;

/// Spawn the read loop for one peer.
///
/// On disconnect or IO error the peer is removed from the registry.
pub fn spawn_peer_reader(
    peer_id: String,
    mut reader: OwnedReadHalf,
    magic: u32,
    bus: EventBus,
    registry: Arc<RwLock<ConnectionRegistry>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let result = read_loop(&peer_id, &mut reader, magic, &bus).await;
        match &result {
            Ok(()) => tracing::info!(peer = %peer_id, "peer disconnected (clean close)"),
            Err(e) => tracing::warn!(peer = %peer_id, error = %e, "peer disconnected with error"),
        }
        let mut reg = registry.write().await;
        reg.remove(&peer_id);
    })
}

async fn read_loop(
    peer_id: &str,
    reader: &mut OwnedReadHalf,
    magic: u32,
    bus: &EventBus,
) -> Result<(), MessageError> {
    loop {
        let framed = match frame::read_frame(reader, magic).await {
            Ok(framed) => framed,
            Err(MessageError::BadChecksum) => {
                // The frame was fully consumed; the stream is still
                // aligned, so just discard it.
                tracing::warn!(peer = %peer_id, "discarding frame with bad checksum");
                continue;
            }
            // Bad magic or an oversized length leaves the stream
            // unusable; IO errors end the peer anyway.
            Err(e) => return Err(e),
        };

        let (topic, body) = match Topic::strip(&framed.payload) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::debug!(peer = %peer_id, error = %e, "unroutable payload");
                continue;
            }
        };

        match wire::decode_message(topic, body) {
            Ok(msg) => {
                tracing::trace!(peer = %peer_id, ?topic, "received message");
                bus.publish(topic, msg);
            }
            Err(e) => {
                tracing::debug!(peer = %peer_id, ?topic, error = %e, "failed to decode payload");
            }
        }
    }
}

/// Spawn the gossip drain: every message published on the gossip topic is
/// encoded, topic-tagged, framed, and written to every registered peer.
/// A failed write only drops that peer.
pub fn spawn_gossip_drain(
    bus: EventBus,
    magic: u32,
    registry: Arc<RwLock<ConnectionRegistry>>,
) -> tokio::task::JoinHandle<()> {
    let (_, mut gossip) = bus.subscribe(Topic::Gossip);
    tokio::spawn(async move {
        while let Some(msg) = gossip.recv().await {
            let (topic, body) = match wire::encode_message(&msg) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::debug!(error = %e, "unwireable message on gossip topic");
                    continue;
                }
            };
            let tagged = topic.prepend(&body);

            let writers = {
                let reg = registry.read().await;
                reg.writers()
            };
            for (peer_id, writer) in writers {
                let mut w = writer.lock().await;
                if let Err(e) = frame::write_frame(&mut *w, magic, topic.name(), &tagged).await {
                    tracing::warn!(peer = %peer_id, error = %e, "gossip write failed");
                    continue;
                }
                let _ = w.flush().await;
            }
        }
    })
}
