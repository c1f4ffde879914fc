//! Peer networking for the Opal node.
//!
//! Covers the connection manager (accept loop and outbound dialing), the
//! voucher seeder handshake used for initial peer discovery, and the
//! per-peer read/write plumbing that bridges TCP frames onto the event
//! bus. Each peer gets its own reader task; ordering is preserved per
//! peer, never across peers.

pub mod connmgr;
pub mod peer;
pub mod registry;
pub mod voucher;

pub use connmgr::{ConnectionManager, ConnMgrConfig};
pub use peer::{spawn_gossip_drain, spawn_peer_reader};
pub use registry::ConnectionRegistry;
pub use voucher::VoucherClient;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("dial timeout to {0}")]
    DialTimeout(String),

    #[error("no seeder addresses configured")]
    NoSeeders,

    #[error("message error: {0}")]
    Message(#[from] opal_messages::MessageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
