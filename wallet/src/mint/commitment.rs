//! # Mint Commitments over BN254
//!
//! A mint of denomination `d` at index `i` publishes
//!
//! ```text
//! S = H_serial(serial_secret(i))               in Fr
//! r = H_blind(blinding_secret(i) || d)         in Fr
//! C = S * G + r * H                            on BN254/G1
//! ```
//!
//! `C` goes on chain when the coin is minted. `S` is revealed when the coin
//! is spent. Without `r` the two cannot be linked.
//!
//! `G` and `H` come from try-and-increment hashing onto G1 with fixed context
//! strings, so nobody knows `log_G(H)`. BN254/G1 has cofactor 1: every point
//! found this way is already in the prime-order group.
//!
//! Both public values are stored as 32-byte compressed encodings.

use std::fmt;
use std::ops::Mul;

use ark_bn254::{Fr, G1Affine};
use ark_ec::{AffineRepr, CurveGroup};
use ark_serialize::CanonicalSerialize;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::config::{BLINDING_CONTEXT, GENERATOR_G_CONTEXT, GENERATOR_H_CONTEXT, SERIAL_CONTEXT};
use crate::crypto::hash::{hash_to_base, hash_to_field_with};
use crate::error::{WalletError, WalletResult};
use crate::mint::denomination::Denomination;
use crate::mint::seed::MintSeed;

// ---------------------------------------------------------------------------
// Public values
// ---------------------------------------------------------------------------

/// Defines a 32-byte public value with hex `Display` and serde that is hex in
/// human-readable formats and raw bytes otherwise.
macro_rules! public_bytes32 {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Wrap raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Raw bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Hex encoding.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex.
            pub fn from_hex(encoded: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(encoded, &mut bytes)?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}..)", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    self.0.serialize(serializer)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    Self::from_hex(&s).map_err(de::Error::custom)
                } else {
                    <[u8; 32]>::deserialize(deserializer).map(Self)
                }
            }
        }
    };
}

public_bytes32!(
    /// Compressed G1 point published when a coin is minted.
    MintCommitment
);

public_bytes32!(
    /// Compressed scalar revealed when a coin is spent.
    SerialNumber
);

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Generators for the commitment scheme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PedersenParams {
    /// Serial generator.
    pub g: G1Affine,
    /// Blinding generator.
    pub h: G1Affine,
}

impl PedersenParams {
    /// Derive the fixed generators. Same output on every call.
    pub fn derive() -> Self {
        let g = hash_to_curve(GENERATOR_G_CONTEXT);
        let h = hash_to_curve(GENERATOR_H_CONTEXT);
        debug_assert_ne!(g, h);
        Self { g, h }
    }
}

/// Try-and-increment onto BN254/G1.
fn hash_to_curve(context: &str) -> G1Affine {
    let mut counter: u32 = 0;
    loop {
        let x = hash_to_base(context, &[&counter.to_be_bytes()]);
        if let Some(point) = G1Affine::get_point_from_x_unchecked(x, false) {
            if !point.is_zero() && point.is_on_curve() {
                return point;
            }
        }
        counter = counter.wrapping_add(1);
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Turns mint seeds into `(commitment, serial number)` pairs.
#[derive(Clone, Debug)]
pub struct CommitmentBuilder {
    params: PedersenParams,
}

impl Default for CommitmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitmentBuilder {
    /// Builder over the standard generators.
    pub fn new() -> Self {
        Self {
            params: PedersenParams::derive(),
        }
    }

    /// The generators in use.
    pub fn params(&self) -> &PedersenParams {
        &self.params
    }

    /// Compute the commitment and serial number for `seed` at `denomination`.
    ///
    /// The serial number depends only on the seed; the commitment depends on
    /// both.
    pub fn commit(
        &self,
        seed: &MintSeed,
        denomination: Denomination,
    ) -> WalletResult<(MintCommitment, SerialNumber)> {
        let serial = serial_scalar(seed);
        let blinding = blinding_scalar(seed, denomination);
        let point = (self.params.g.mul(serial) + self.params.h.mul(blinding)).into_affine();

        Ok((
            MintCommitment(compress(&point)?),
            SerialNumber(compress(&serial)?),
        ))
    }

    /// Like [`commit`](Self::commit) but takes a raw denomination value.
    ///
    /// # Errors
    ///
    /// [`WalletError::InvalidDenomination`] if `units` is not in the table.
    pub fn commit_units(
        &self,
        seed: &MintSeed,
        units: u64,
    ) -> WalletResult<(MintCommitment, SerialNumber)> {
        self.commit(seed, Denomination::from_units(units)?)
    }

    /// Serial number alone. Cheaper than a full commit when scanning spends.
    pub fn serial_number(&self, seed: &MintSeed) -> WalletResult<SerialNumber> {
        Ok(SerialNumber(compress(&serial_scalar(seed))?))
    }

    /// Check that `commitment` opens to `seed` at `denomination`.
    pub fn verify(
        &self,
        commitment: &MintCommitment,
        seed: &MintSeed,
        denomination: Denomination,
    ) -> WalletResult<bool> {
        let (expected, _) = self.commit(seed, denomination)?;
        Ok(&expected == commitment)
    }
}

fn serial_scalar(seed: &MintSeed) -> Fr {
    hash_to_field_with(SERIAL_CONTEXT, &[seed.serial_secret()])
}

fn blinding_scalar(seed: &MintSeed, denomination: Denomination) -> Fr {
    hash_to_field_with(
        BLINDING_CONTEXT,
        &[seed.blinding_secret(), &denomination.units().to_be_bytes()],
    )
}

fn compress<T: CanonicalSerialize>(value: &T) -> WalletResult<[u8; 32]> {
    let mut buf = Vec::with_capacity(32);
    value
        .serialize_compressed(&mut buf)
        .map_err(|e| WalletError::Serialization(e.to_string()))?;
    buf.try_into().map_err(|raw: Vec<u8>| {
        WalletError::Serialization(format!("expected 32 bytes, got {}", raw.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mint::seed::{MasterSeed, SeedDeriver};
    use std::collections::HashSet;

    fn setup() -> (SeedDeriver, CommitmentBuilder) {
        (
            SeedDeriver::new(MasterSeed::from_bytes([3u8; 32])),
            CommitmentBuilder::new(),
        )
    }

    #[test]
    fn generators_are_stable_and_independent() {
        let a = PedersenParams::derive();
        let b = PedersenParams::derive();
        assert_eq!(a, b);
        assert_ne!(a.g, a.h);
        assert!(a.g.is_in_correct_subgroup_assuming_on_curve());
    }

    #[test]
    fn commit_is_deterministic() {
        let (deriver, builder) = setup();
        let seed = deriver.derive(9);
        let first = builder.commit(&seed, Denomination::Ten).unwrap();
        let second = builder.commit(&deriver.derive(9), Denomination::Ten).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn serial_is_denomination_independent_commitment_is_not() {
        let (deriver, builder) = setup();
        let seed = deriver.derive(0);
        let mut commitments = HashSet::new();
        let mut serials = HashSet::new();
        for d in Denomination::ALL {
            let (c, s) = builder.commit(&seed, d).unwrap();
            commitments.insert(c);
            serials.insert(s);
        }
        assert_eq!(commitments.len(), Denomination::ALL.len());
        assert_eq!(serials.len(), 1);
        assert_eq!(
            serials.into_iter().next().unwrap(),
            builder.serial_number(&seed).unwrap()
        );
    }

    #[test]
    fn same_denomination_distinct_indices_never_collide() {
        let (deriver, builder) = setup();
        let mut commitments = HashSet::new();
        let mut serials = HashSet::new();
        for i in 0..64 {
            let (c, s) = builder.commit(&deriver.derive(i), Denomination::Twentieth).unwrap();
            assert!(commitments.insert(c), "commitment collision at {i}");
            assert!(serials.insert(s), "serial collision at {i}");
        }
    }

    #[test]
    fn commit_units_rejects_unknown_denomination() {
        let (deriver, builder) = setup();
        let seed = deriver.derive(0);
        assert!(matches!(
            builder.commit_units(&seed, 12_345),
            Err(WalletError::InvalidDenomination(12_345))
        ));
        assert!(builder.commit_units(&seed, Denomination::Half.units()).is_ok());
    }

    #[test]
    fn verify_opens_only_matching_inputs() {
        let (deriver, builder) = setup();
        let seed = deriver.derive(4);
        let (c, _) = builder.commit(&seed, Denomination::One).unwrap();
        assert!(builder.verify(&c, &seed, Denomination::One).unwrap());
        assert!(!builder.verify(&c, &seed, Denomination::Ten).unwrap());
        assert!(!builder.verify(&c, &deriver.derive(5), Denomination::One).unwrap());
    }

    #[test]
    fn public_values_serialize_as_hex_in_json() {
        let (deriver, builder) = setup();
        let (c, s) = builder.commit(&deriver.derive(1), Denomination::Hundred).unwrap();

        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, format!("\"{}\"", c.to_hex()));
        assert_eq!(serde_json::from_str::<MintCommitment>(&json).unwrap(), c);

        let raw = bincode::serialize(&s).unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(bincode::deserialize::<SerialNumber>(&raw).unwrap(), s);
    }
}
