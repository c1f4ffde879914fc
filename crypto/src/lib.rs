//! Cryptographic operations for the Opal protocol.
//!
//! - **SHA-256** for block hashes, sortition scores, frame checksums, and
//!   the voucher challenge response.
//! - **BLS-style aggregatable signatures** over the 48-byte key types from
//!   `opal_types`; see [`bls`] for the backend notes.

pub mod bls;
pub mod hash;

pub use bls::{
    aggregate_signatures, generate_keys, keys_from_seed, public_from_secret, sign, verify,
    verify_aggregate,
};
pub use hash::{sha256, sha384};
