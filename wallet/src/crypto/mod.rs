//! # Cryptographic Helpers
//!
//! Thin wrappers around BLAKE3, SHA-256, and the BN254 field types. The
//! commitment scheme itself lives in [`crate::mint::commitment`]; this module
//! only provides the hashing it is built from.

pub mod hash;

pub use hash::{
    blake3_hash, domain_separated_hash, double_sha256, hash_to_field_with, merkle_root, sha256,
};
