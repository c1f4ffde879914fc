//! Voucher seeder client: initial peer discovery.
//!
//! The seeder sends a 64-byte challenge; the node answers with the
//! uppercase hex SHA-256 of the challenge line concatenated with the
//! `SEEDER_KEY` secret, a comma, and its listen port. The seeder then
//! returns a comma-separated peer list in a single 2048-byte read; a
//! short read or EOF simply means no peers. A one-byte keepalive goes out
//! every four seconds so the seeder notices when the node goes away.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::NetworkError;

/// Keepalive interval on the seeder connection.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(4);

/// Width of the seeder challenge.
const CHALLENGE_LEN: usize = 64;

/// Width of the peer-list read. The protocol has no length prefix; the
/// list is whatever fits, with trailing zeros trimmed.
const PEER_LIST_LEN: usize = 2048;

/// Client for the voucher seeder bootstrap protocol.
pub struct VoucherClient {
    seeders: Vec<String>,
    fixed: Vec<String>,
    testnet: bool,
    port: String,
}

impl VoucherClient {
    pub fn new(seeders: Vec<String>, fixed: Vec<String>, testnet: bool, port: String) -> Self {
        Self {
            seeders,
            fixed,
            testnet,
            port,
        }
    }

    /// Discover initial peers.
    ///
    /// On testnet a configured fixed peer list short-circuits the seeder
    /// entirely. Otherwise the first configured seeder is dialed, the
    /// challenge is answered, and the returned peer list is parsed. The
    /// connection stays alive in a background keepalive task.
    pub async fn discover_peers(&self) -> Result<Vec<String>, NetworkError> {
        if self.testnet && !self.fixed.is_empty() {
            tracing::info!("fixed-network config activated");
            return Ok(self.fixed.clone());
        }

        let Some(seeder) = self.seeders.first() else {
            tracing::error!("empty list of seeder addresses");
            return Err(NetworkError::NoSeeders);
        };

        let mut conn = TcpStream::connect(seeder.as_str())
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("{seeder}: {e}")))?;
        tracing::debug!(%seeder, "connected to voucher seeder");

        self.complete_challenge(&mut conn).await?;
        tracing::debug!("voucher seeder challenge completed");

        let mut buf = vec![0u8; PEER_LIST_LEN];
        let n = match conn.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "error reading IPs from voucher seeder");
                return Ok(Vec::new());
            }
        };
        buf.truncate(n);

        spawn_keepalive(conn);

        // Trim trailing zero padding, then split the address list.
        while buf.last() == Some(&0) {
            buf.pop();
        }
        if buf.is_empty() {
            return Ok(Vec::new());
        }
        let list = String::from_utf8_lossy(&buf);
        Ok(list
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn complete_challenge(&self, conn: &mut TcpStream) -> Result<(), NetworkError> {
        let mut buf = [0u8; CHALLENGE_LEN];
        let n = conn.read(&mut buf).await?;
        let key = std::env::var("SEEDER_KEY").unwrap_or_default();
        let response = challenge_response(&buf[..n], &key, &self.port);
        conn.write_all(&response).await?;
        Ok(())
    }
}

/// Compute the challenge response:
/// `UPPERCASE_HEX(SHA-256(challenge_line ‖ key)) ‖ "," ‖ port ‖ "\n"`,
/// where the challenge line is everything before the first newline.
pub fn challenge_response(challenge: &[u8], key: &str, port: &str) -> Vec<u8> {
    let line_end = challenge
        .iter()
        .position(|b| *b == b'\n')
        .unwrap_or(challenge.len());
    let generated = &challenge[..line_end];

    let mut hasher = Sha256::new();
    hasher.update(generated);
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    let mut response = hex::encode_upper(digest).into_bytes();
    response.push(b',');
    response.extend_from_slice(port.as_bytes());
    response.push(b'\n');
    response
}

fn spawn_keepalive(mut conn: TcpStream) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(KEEPALIVE_INTERVAL).await;
            if let Err(e) = conn.write_all(&[1u8]).await {
                tracing::warn!(error = %e, "error pinging voucher seeder");
                return;
            }
        }
    });
}
