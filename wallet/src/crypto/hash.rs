//! # Hashing Utilities
//!
//! Two hash functions, no more:
//!
//! - **BLAKE3** — the default. Seed derivation, generator derivation, block
//!   hashes, Merkle roots. Its `derive_key` mode gives us domain separation
//!   for free, which the mint derivation leans on heavily.
//!
//! - **SHA-256** — only where something outside the wallet expects it. Here
//!   that is the seed fingerprint shown to operators, which follows the
//!   familiar double-SHA-256 construction.
//!
//! ## hash_to_field_with / hash_to_base
//!
//! Both map bytes to a BN254 field element by hashing with BLAKE3 and
//! reducing modulo the field order. The 256-bit digest against a ~254-bit
//! modulus keeps the bias below 2^-128.

use ark_bn254::{Fq, Fr};
use ark_ff::PrimeField;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Compute `SHA-256(SHA-256(data))`.
///
/// # Example
///
/// ```
/// use sigma_wallet::crypto::double_sha256;
///
/// let digest = double_sha256(b"seed bytes");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// Compute the BLAKE3 hash of the input data.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash multiple byte slices together without concatenating them first.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Domain-separated BLAKE3 over several parts.
///
/// Uses BLAKE3's `derive_key` mode: the context string selects a different
/// internal IV, so two contexts can never collide on the same input.
pub fn domain_separated_hash(context: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Domain-separated BLAKE3 in XOF mode, filling `out` completely.
pub fn domain_separated_xof(context: &str, parts: &[&[u8]], out: &mut [u8]) {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize_xof().fill(out);
}

/// Hash to the BN254 scalar field under a domain-separation context.
///
/// # Example
///
/// ```
/// use sigma_wallet::crypto::hash::hash_to_field_with;
///
/// let a = hash_to_field_with("example", &[b"serial secret"]);
/// assert_eq!(a, hash_to_field_with("example", &[b"serial secret"]));
/// ```
pub fn hash_to_field_with(context: &str, parts: &[&[u8]]) -> Fr {
    Fr::from_le_bytes_mod_order(&domain_separated_hash(context, parts))
}

/// Hash to the BN254 base field. Used to pick x-coordinates when hashing
/// onto the curve.
pub fn hash_to_base(context: &str, parts: &[&[u8]]) -> Fq {
    Fq::from_le_bytes_mod_order(&domain_separated_hash(context, parts))
}

/// Binary BLAKE3 Merkle root over 32-byte leaves.
///
/// An odd node is paired with itself. An empty list yields all zeros.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    if level.len() == 1 {
        return blake3_hash_multi(&[level[0].as_slice(), level[0].as_slice()]);
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                blake3_hash_multi(&[pair[0].as_slice(), right.as_slice()])
            })
            .collect();
    }

    level[0]
}
