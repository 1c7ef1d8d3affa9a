//! # Mint Derivation
//!
//! Everything needed to go from a wallet seed and an index to the public
//! values that identify a coin on chain:
//!
//! - [`denomination`] — the fixed coin sizes and amount arithmetic.
//! - [`seed`] — master seed handling and per-index derivation.
//! - [`commitment`] — commitments and serial numbers.
//!
//! All of it is pure. The only state lives in [`crate::ledger`].

pub mod commitment;
pub mod denomination;
pub mod seed;

pub use commitment::{CommitmentBuilder, MintCommitment, PedersenParams, SerialNumber};
pub use denomination::{format_amount, parse_amount, Denomination};
pub use seed::{MasterSeed, MintSeed, SeedDeriver};
