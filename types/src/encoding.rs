//! Wire encoding primitives for consensus payloads.
//!
//! All integers are little-endian. `VarInt` follows the classical
//! length-prefix scheme: values below 0xFD are a single byte; otherwise a
//! marker byte (0xFD/0xFE/0xFF) is followed by a u16/u32/u64. `VarBytes`
//! is a `VarInt` length followed by the raw bytes.

use crate::hash::BlockHash;
use crate::keys::{BlsPublicKey, BlsSignature};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("unexpected end of input: needed {needed} more bytes")]
    UnexpectedEnd { needed: usize },

    #[error("length {0} exceeds the maximum allowed ({1})")]
    LengthOutOfRange(u64, u64),

    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Upper bound on any single `VarBytes` field. Keeps a malformed length
/// prefix from triggering a huge allocation.
pub const MAX_VAR_BYTES: u64 = 1 << 22; // 4 MiB

// ── Writers ────────────────────────────────────────────────────────────

pub fn write_u8(w: &mut Vec<u8>, v: u8) {
    w.push(v);
}

pub fn write_u32_le(w: &mut Vec<u8>, v: u32) {
    w.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u64_le(w: &mut Vec<u8>, v: u64) {
    w.extend_from_slice(&v.to_le_bytes());
}

pub fn write_i64_le(w: &mut Vec<u8>, v: i64) {
    w.extend_from_slice(&v.to_le_bytes());
}

pub fn write_varint(w: &mut Vec<u8>, v: u64) {
    match v {
        0..=0xFC => w.push(v as u8),
        0xFD..=0xFFFF => {
            w.push(0xFD);
            w.extend_from_slice(&(v as u16).to_le_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            w.push(0xFE);
            w.extend_from_slice(&(v as u32).to_le_bytes());
        }
        _ => {
            w.push(0xFF);
            w.extend_from_slice(&v.to_le_bytes());
        }
    }
}

pub fn write_varbytes(w: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(w, bytes.len() as u64);
    w.extend_from_slice(bytes);
}

pub fn write_256(w: &mut Vec<u8>, h: &BlockHash) {
    w.extend_from_slice(h.as_bytes());
}

pub fn write_bls_signature(w: &mut Vec<u8>, sig: &BlsSignature) {
    w.extend_from_slice(sig.as_bytes());
}

pub fn write_bls_pubkey(w: &mut Vec<u8>, pk: &BlsPublicKey) {
    w.extend_from_slice(pk.as_bytes());
}

// ── Reader ─────────────────────────────────────────────────────────────

/// A cursor over a byte slice with checked reads.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EncodingError> {
        if self.remaining() < n {
            return Err(EncodingError::UnexpectedEnd {
                needed: n - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, EncodingError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32, EncodingError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().expect("4-byte slice")))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, EncodingError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }

    pub fn read_i64_le(&mut self) -> Result<i64, EncodingError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().expect("8-byte slice")))
    }

    pub fn read_varint(&mut self) -> Result<u64, EncodingError> {
        match self.read_u8()? {
            v @ 0..=0xFC => Ok(v as u64),
            0xFD => {
                let b = self.take(2)?;
                Ok(u16::from_le_bytes(b.try_into().expect("2-byte slice")) as u64)
            }
            0xFE => Ok(self.read_u32_le()? as u64),
            0xFF => self.read_u64_le(),
        }
    }

    pub fn read_varbytes(&mut self) -> Result<Vec<u8>, EncodingError> {
        let len = self.read_varint()?;
        if len > MAX_VAR_BYTES {
            return Err(EncodingError::LengthOutOfRange(len, MAX_VAR_BYTES));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    pub fn read_256(&mut self) -> Result<BlockHash, EncodingError> {
        let b = self.take(32)?;
        Ok(BlockHash::new(b.try_into().expect("32-byte slice")))
    }

    pub fn read_bls_signature(&mut self) -> Result<BlsSignature, EncodingError> {
        let b = self.take(48)?;
        Ok(BlsSignature(b.try_into().expect("48-byte slice")))
    }

    pub fn read_bls_pubkey(&mut self) -> Result<BlsPublicKey, EncodingError> {
        let b = self.take(48)?;
        Ok(BlsPublicKey(b.try_into().expect("48-byte slice")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varint_boundaries() {
        for v in [0u64, 0xFC, 0xFD, 0xFFFF, 0x1_0000, 0xFFFF_FFFF, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            let mut r = Reader::new(&buf);
            assert_eq!(r.read_varint().unwrap(), v);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn varint_compact_encoding_sizes() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 0x20);
        assert_eq!(buf.len(), 1);

        buf.clear();
        write_varint(&mut buf, 0x1234);
        assert_eq!(buf.len(), 3);

        buf.clear();
        write_varint(&mut buf, 0x12_3456);
        assert_eq!(buf.len(), 5);

        buf.clear();
        write_varint(&mut buf, 0x1_0000_0000);
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn varbytes_roundtrip() {
        let mut buf = Vec::new();
        write_varbytes(&mut buf, b"opal");
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_varbytes().unwrap(), b"opal");
    }

    #[test]
    fn short_read_fails() {
        let buf = [0u8; 3];
        let mut r = Reader::new(&buf);
        assert!(r.read_u32_le().is_err());
    }

    #[test]
    fn oversized_varbytes_rejected() {
        let mut buf = Vec::new();
        write_varint(&mut buf, MAX_VAR_BYTES + 1);
        let mut r = Reader::new(&buf);
        assert!(matches!(
            r.read_varbytes(),
            Err(EncodingError::LengthOutOfRange(_, _))
        ));
    }

    proptest! {
        #[test]
        fn varint_roundtrip_any(v in any::<u64>()) {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            let mut r = Reader::new(&buf);
            prop_assert_eq!(r.read_varint().unwrap(), v);
        }

        #[test]
        fn varbytes_roundtrip_any(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut buf = Vec::new();
            write_varbytes(&mut buf, &data);
            let mut r = Reader::new(&buf);
            prop_assert_eq!(r.read_varbytes().unwrap(), data);
        }
    }
}
