//! # Seed Derivation
//!
//! One 32-byte master seed per wallet; every mint secret is a pure function
//! of `(master seed, index)`:
//!
//! ```text
//! okm             = BLAKE3-derive_key(MINT_SEED_CONTEXT, master || index_be)[0..64]
//! serial_secret   = okm[0..32]
//! blinding_secret = okm[32..64]
//! ```
//!
//! Nothing derived here is ever written to disk. The ledger stores only the
//! public commitment and serial number; a zap throws those away and calls
//! [`SeedDeriver::derive`] again.
//!
//! Secret bytes are zeroized on drop and never appear in `Debug` output or
//! logs.

use std::fmt;

use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::MINT_SEED_CONTEXT;
use crate::crypto::hash::{domain_separated_xof, double_sha256};
use crate::error::{WalletError, WalletResult};

/// Length of the wallet master seed in bytes.
pub const MASTER_SEED_LEN: usize = 32;

// ---------------------------------------------------------------------------
// MasterSeed
// ---------------------------------------------------------------------------

/// The wallet's master secret.
///
/// Deliberately not `Serialize`. Writing a seed somewhere should be a
/// conscious call to [`MasterSeed::to_hex`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSeed([u8; MASTER_SEED_LEN]);

impl MasterSeed {
    /// Draw a fresh seed from a cryptographic RNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; MASTER_SEED_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw seed bytes.
    pub fn from_bytes(bytes: [u8; MASTER_SEED_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a hex-encoded seed, as written by [`MasterSeed::to_hex`].
    ///
    /// Surrounding whitespace is ignored so a seed file with a trailing
    /// newline loads fine.
    pub fn from_hex(encoded: &str) -> WalletResult<Self> {
        let mut raw = hex::decode(encoded.trim())
            .map_err(|e| WalletError::InvalidSeed(format!("not hex: {e}")))?;
        if raw.len() != MASTER_SEED_LEN {
            let len = raw.len();
            raw.zeroize();
            return Err(WalletError::InvalidSeed(format!(
                "expected {MASTER_SEED_LEN} bytes, got {len}"
            )));
        }
        let mut bytes = [0u8; MASTER_SEED_LEN];
        bytes.copy_from_slice(&raw);
        raw.zeroize();
        Ok(Self(bytes))
    }

    /// Hex-encode the seed for storage.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw seed bytes.
    pub fn as_bytes(&self) -> &[u8; MASTER_SEED_LEN] {
        &self.0
    }

    /// Short public identifier of the seed: first 4 bytes of
    /// `SHA-256(SHA-256(seed))`, hex-encoded.
    pub fn fingerprint(&self) -> String {
        hex::encode(&double_sha256(&self.0)[..4])
    }
}

impl fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterSeed({})", self.fingerprint())
    }
}

// ---------------------------------------------------------------------------
// MintSeed
// ---------------------------------------------------------------------------

/// Per-mint secret material for one derivation index.
///
/// Denomination-independent: the same `MintSeed` produces a different
/// commitment for every denomination but the same serial number.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MintSeed {
    #[zeroize(skip)]
    index: u32,
    serial_secret: [u8; 32],
    blinding_secret: [u8; 32],
}

impl MintSeed {
    /// Derivation index this seed belongs to.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Secret input to the serial number.
    pub fn serial_secret(&self) -> &[u8; 32] {
        &self.serial_secret
    }

    /// Secret input to the commitment blinding factor.
    pub fn blinding_secret(&self) -> &[u8; 32] {
        &self.blinding_secret
    }
}

impl PartialEq for MintSeed {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.serial_secret == other.serial_secret
            && self.blinding_secret == other.blinding_secret
    }
}

impl Eq for MintSeed {}

impl fmt::Debug for MintSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MintSeed")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SeedDeriver
// ---------------------------------------------------------------------------

/// Derives per-index mint seeds from a wallet master seed.
#[derive(Clone, Debug)]
pub struct SeedDeriver {
    master: MasterSeed,
}

impl SeedDeriver {
    /// Create a deriver that owns the master seed.
    pub fn new(master: MasterSeed) -> Self {
        Self { master }
    }

    /// Derive the mint seed for `index`. Pure; never fails for any `u32`.
    pub fn derive(&self, index: u32) -> MintSeed {
        let mut okm = [0u8; 64];
        domain_separated_xof(
            MINT_SEED_CONTEXT,
            &[self.master.as_bytes(), &index.to_be_bytes()],
            &mut okm,
        );

        let mut seed = MintSeed {
            index,
            serial_secret: [0u8; 32],
            blinding_secret: [0u8; 32],
        };
        seed.serial_secret.copy_from_slice(&okm[..32]);
        seed.blinding_secret.copy_from_slice(&okm[32..]);
        okm.zeroize();
        seed
    }

    /// Next unused index: `1 + max(indices)`, or 0 when there are none.
    ///
    /// # Errors
    ///
    /// [`WalletError::IndexSpaceExhausted`] once `u32::MAX` has been used.
    pub fn next_index<I>(indices: I) -> WalletResult<u32>
    where
        I: IntoIterator<Item = u32>,
    {
        match indices.into_iter().max() {
            None => Ok(0),
            Some(max) => max.checked_add(1).ok_or(WalletError::IndexSpaceExhausted),
        }
    }

    /// Fingerprint of the underlying master seed.
    pub fn fingerprint(&self) -> String {
        self.master.fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn deriver() -> SeedDeriver {
        SeedDeriver::new(MasterSeed::from_bytes([7u8; 32]))
    }

    #[test]
    fn derive_is_deterministic() {
        let d = deriver();
        for index in [0u32, 1, 42, u32::MAX] {
            assert_eq!(d.derive(index), d.derive(index));
        }
    }

    #[test]
    fn distinct_indices_give_distinct_secrets() {
        let d = deriver();
        let a = d.derive(0);
        let b = d.derive(1);
        assert_ne!(a.serial_secret(), b.serial_secret());
        assert_ne!(a.blinding_secret(), b.blinding_secret());
        assert_ne!(a.serial_secret(), a.blinding_secret());
    }

    #[test]
    fn distinct_masters_give_distinct_secrets() {
        let a = SeedDeriver::new(MasterSeed::from_bytes([1u8; 32])).derive(0);
        let b = SeedDeriver::new(MasterSeed::from_bytes([2u8; 32])).derive(0);
        assert_ne!(a, b);
    }

    #[test]
    fn next_index_is_one_past_max() {
        assert_eq!(SeedDeriver::next_index(Vec::<u32>::new()).unwrap(), 0);
        assert_eq!(SeedDeriver::next_index([0, 1, 2]).unwrap(), 3);
        assert_eq!(SeedDeriver::next_index([5, 2]).unwrap(), 6);
        assert!(matches!(
            SeedDeriver::next_index([u32::MAX]),
            Err(WalletError::IndexSpaceExhausted)
        ));
    }

    #[test]
    fn hex_round_trip() {
        let seed = MasterSeed::generate(&mut OsRng);
        let restored = MasterSeed::from_hex(&format!("{}\n", seed.to_hex())).unwrap();
        assert_eq!(seed.as_bytes(), restored.as_bytes());
        assert_eq!(seed.fingerprint(), restored.fingerprint());
    }

    #[test]
    fn from_hex_rejects_bad_input() {
        assert!(matches!(
            MasterSeed::from_hex("zz"),
            Err(WalletError::InvalidSeed(_))
        ));
        assert!(matches!(
            MasterSeed::from_hex("abcd"),
            Err(WalletError::InvalidSeed(_))
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let seed = MasterSeed::from_bytes([0xab; 32]);
        let shown = format!("{seed:?}");
        assert!(!shown.contains(&"ab".repeat(32)));
        assert_eq!(seed.fingerprint().len(), 8);

        let mint = deriver().derive(3);
        let shown = format!("{mint:?}");
        assert!(shown.contains("index: 3"));
        assert!(!shown.contains("serial_secret"));
    }
}
