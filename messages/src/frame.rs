//! The P2P message frame.
//!
//! Layout: `[magic:4 LE][command:12 ASCII, NUL-padded][length:4 LE]
//! [checksum:4 = first 4 bytes of SHA-256(payload)][payload]`.
//! A frame is discarded when the magic mismatches or the checksum fails.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MessageError;

/// Width of the command field.
pub const COMMAND_LEN: usize = 12;

/// Upper bound on a frame payload.
pub const MAX_FRAME_PAYLOAD: usize = 4 * 1024 * 1024;

/// Wire magic for the main network ("OPAL", little-endian on the wire).
pub const MAGIC_MAINNET: u32 = 0x4C41_504F;
/// Wire magic for the test network.
pub const MAGIC_TESTNET: u32 = 0x4C41_5054;

/// A decoded frame: the command string and the raw payload (topic tag
/// still attached for gossip traffic).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub payload: Vec<u8>,
}

fn command_field(command: &str) -> [u8; COMMAND_LEN] {
    let mut field = [0u8; COMMAND_LEN];
    let bytes = command.as_bytes();
    let len = bytes.len().min(COMMAND_LEN);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(payload);
    digest[..4].try_into().expect("4-byte digest prefix")
}

/// Write one frame to `w`.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    magic: u32,
    command: &str,
    payload: &[u8],
) -> Result<(), MessageError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(MessageError::FrameTooLarge(payload.len()));
    }
    w.write_all(&magic.to_le_bytes()).await?;
    w.write_all(&command_field(command)).await?;
    w.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    w.write_all(&checksum(payload)).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one frame from `r`, validating magic and checksum.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    expected_magic: u32,
) -> Result<Frame, MessageError> {
    let mut magic_buf = [0u8; 4];
    r.read_exact(&mut magic_buf).await?;
    let magic = u32::from_le_bytes(magic_buf);
    if magic != expected_magic {
        return Err(MessageError::BadMagic {
            expected: expected_magic,
            got: magic,
        });
    }

    let mut command_buf = [0u8; COMMAND_LEN];
    r.read_exact(&mut command_buf).await?;
    let end = command_buf
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(COMMAND_LEN);
    let command = String::from_utf8_lossy(&command_buf[..end]).into_owned();

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let length = u32::from_le_bytes(len_buf) as usize;
    if length > MAX_FRAME_PAYLOAD {
        return Err(MessageError::FrameTooLarge(length));
    }

    let mut checksum_buf = [0u8; 4];
    r.read_exact(&mut checksum_buf).await?;

    let mut payload = vec![0u8; length];
    r.read_exact(&mut payload).await?;

    if checksum(&payload) != checksum_buf {
        return Err(MessageError::BadChecksum);
    }

    Ok(Frame { command, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, MAGIC_MAINNET, "gossip", b"hello")
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let frame = read_frame(&mut cursor, MAGIC_MAINNET).await.unwrap();
        assert_eq!(frame.command, "gossip");
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn wrong_magic_rejected() {
        let mut buf = Vec::new();
        write_frame(&mut buf, MAGIC_TESTNET, "gossip", b"hello")
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, MAGIC_MAINNET).await.unwrap_err();
        assert!(matches!(err, MessageError::BadMagic { .. }));
    }

    #[tokio::test]
    async fn corrupted_payload_fails_checksum() {
        let mut buf = Vec::new();
        write_frame(&mut buf, MAGIC_MAINNET, "gossip", b"hello")
            .await
            .unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, MAGIC_MAINNET).await.unwrap_err();
        assert!(matches!(err, MessageError::BadChecksum));
    }

    #[tokio::test]
    async fn long_command_is_truncated() {
        let mut buf = Vec::new();
        write_frame(&mut buf, MAGIC_MAINNET, "averylongcommandname", b"")
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let frame = read_frame(&mut cursor, MAGIC_MAINNET).await.unwrap();
        assert_eq!(frame.command.len(), COMMAND_LEN);
    }

    #[tokio::test]
    async fn oversized_length_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC_MAINNET.to_le_bytes());
        buf.extend_from_slice(&[0u8; COMMAND_LEN]);
        buf.extend_from_slice(&(MAX_FRAME_PAYLOAD as u32 + 1).to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);

        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame(&mut cursor, MAGIC_MAINNET).await.unwrap_err();
        assert!(matches!(err, MessageError::FrameTooLarge(_)));
    }
}
