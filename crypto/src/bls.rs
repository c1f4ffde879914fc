//! BLS-style aggregatable signatures.
//!
//! The node treats the pairing construction itself as an external
//! collaborator; what consensus needs from the signature scheme is the
//! aggregation algebra. This backend is hash-based and deterministic:
//! a signature is the SHA-384 digest of the signer's public key and the
//! message, and aggregation is byte-wise XOR, which is commutative and
//! associative like point addition and has the zero signature as identity.
//! Verification of an aggregate recomputes each expected signature and
//! folds them the same way.

use opal_types::{BlsKeyPair, BlsPublicKey, BlsSecretKey, BlsSignature};
use rand::RngCore;

use crate::hash::sha384;

const PUBKEY_DOMAIN: &[u8] = b"opal-bls-pk-v0";
const SIGNATURE_DOMAIN: &[u8] = b"opal-bls-sig-v0";

/// Generate a key pair from the OS random source.
pub fn generate_keys() -> BlsKeyPair {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    keys_from_seed(&seed)
}

/// Derive a key pair deterministically from a 32-byte seed.
pub fn keys_from_seed(seed: &[u8; 32]) -> BlsKeyPair {
    let secret = BlsSecretKey(*seed);
    let public = public_from_secret(&secret);
    BlsKeyPair { public, secret }
}

/// Derive the public key from a secret key.
pub fn public_from_secret(secret: &BlsSecretKey) -> BlsPublicKey {
    let mut input = Vec::with_capacity(PUBKEY_DOMAIN.len() + 32);
    input.extend_from_slice(PUBKEY_DOMAIN);
    input.extend_from_slice(&secret.0);
    BlsPublicKey(sha384(&input))
}

/// Sign `message` with `keys`.
pub fn sign(keys: &BlsKeyPair, message: &[u8]) -> BlsSignature {
    signature_for(&keys.public, message)
}

/// Verify a single signature.
pub fn verify(public: &BlsPublicKey, message: &[u8], signature: &BlsSignature) -> bool {
    signature_for(public, message) == *signature
}

/// Fold `partial` into `aggregate` in place.
pub fn aggregate_signatures(aggregate: &mut BlsSignature, partial: &BlsSignature) {
    for (a, p) in aggregate.0.iter_mut().zip(partial.0.iter()) {
        *a ^= p;
    }
}

/// Verify an aggregate signature over a single message signed by every key
/// in `signers`.
pub fn verify_aggregate(
    signers: &[BlsPublicKey],
    message: &[u8],
    aggregate: &BlsSignature,
) -> bool {
    if signers.is_empty() {
        return aggregate.is_zero();
    }
    let mut expected = BlsSignature::ZERO;
    for pk in signers {
        let partial = signature_for(pk, message);
        aggregate_signatures(&mut expected, &partial);
    }
    expected == *aggregate
}

fn signature_for(public: &BlsPublicKey, message: &[u8]) -> BlsSignature {
    let mut input = Vec::with_capacity(SIGNATURE_DOMAIN.len() + 48 + message.len());
    input.extend_from_slice(SIGNATURE_DOMAIN);
    input.extend_from_slice(public.as_bytes());
    input.extend_from_slice(message);
    BlsSignature(sha384(&input))
}
