//! BLS key material for provisioner identity and committee signing.
//!
//! Keys and signatures are carried as fixed-size opaque byte arrays; the
//! actual signing operations live in `opal_crypto`. The secret key is
//! zeroized on drop and deliberately implements neither `Debug` nor
//! `Serialize`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A 48-byte BLS public key identifying a provisioner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlsPublicKey(pub [u8; 48]);

/// A 48-byte BLS signature (single or aggregated).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlsSignature(pub [u8; 48]);

/// A 32-byte BLS secret key. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BlsSecretKey(pub [u8; 32]);

/// A BLS key pair (public + secret).
///
/// Use `opal_crypto::bls::generate_keys()` or
/// `opal_crypto::bls::keys_from_seed()` to construct one. This struct is
/// intentionally just data.
pub struct BlsKeyPair {
    pub public: BlsPublicKey,
    pub secret: BlsSecretKey,
}

impl BlsPublicKey {
    pub const ZERO: Self = Self([0u8; 48]);

    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 48]
    }
}

impl BlsSignature {
    pub const ZERO: Self = Self([0u8; 48]);

    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 48]
    }
}

impl Default for BlsSignature {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

impl fmt::Display for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

// serde cannot derive for 48-byte arrays; both 48-byte types share the same
// bytes-based visitor.
macro_rules! serde_48 {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct Visitor48;

                impl<'de> serde::de::Visitor<'de> for Visitor48 {
                    type Value = $ty;

                    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                        write!(f, "48 bytes")
                    }

                    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                        let arr: [u8; 48] = v
                            .try_into()
                            .map_err(|_| E::invalid_length(v.len(), &self))?;
                        Ok($ty(arr))
                    }

                    fn visit_seq<A: serde::de::SeqAccess<'de>>(
                        self,
                        mut seq: A,
                    ) -> Result<Self::Value, A::Error> {
                        let mut arr = [0u8; 48];
                        for (i, byte) in arr.iter_mut().enumerate() {
                            *byte = seq
                                .next_element()?
                                .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                        }
                        Ok($ty(arr))
                    }
                }

                deserializer.deserialize_bytes(Visitor48)
            }
        }
    };
}

serde_48!(BlsPublicKey);
serde_48!(BlsSignature);
