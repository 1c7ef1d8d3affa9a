//! Error taxonomy for wallet operations.
//!
//! Derivation and commitment errors are caller bugs and surface immediately.
//! Chain faults abort a rebuild and leave the wallet read-only. Consistency
//! faults seen during ordinary scanning are logged and counted, never raised
//! out of block processing.

use thiserror::Error;

use crate::chain::ChainError;
use crate::ledger::store::StoreError;
use crate::mint::MintCommitment;

/// Errors returned by the wallet and its components.
#[derive(Debug, Error)]
pub enum WalletError {
    /// The value does not match any of the fixed denominations.
    #[error("invalid denomination: {0} base units")]
    InvalidDenomination(u64),

    /// A mint or spend amount that cannot be represented in coins.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A record already exists at this derivation index.
    #[error("duplicate mint index: {0}")]
    DuplicateIndex(u32),

    /// A record would leave a hole in the index sequence.
    #[error("mint index {index} out of sequence, expected {expected}")]
    IndexGap {
        /// Index being inserted.
        index: u32,
        /// The only index that may be inserted next.
        expected: u32,
    },

    /// A commitment was confirmed that this ledger never derived.
    #[error("unknown commitment: {0}")]
    UnknownCommitment(MintCommitment),

    /// Two derivation indices produced the same commitment. Fatal.
    #[error("commitment collision between index {index} and index {existing}")]
    CommitmentCollision {
        /// Index being inserted.
        index: u32,
        /// Index already holding the commitment.
        existing: u32,
    },

    /// Not enough confirmed, unspent mints to cover the request.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Requested amount in base units.
        requested: u64,
        /// Spendable amount in base units.
        available: u64,
    },

    /// The smallest covering selection needs more inputs than one spend allows.
    #[error("spend needs {needed} inputs, limit is {max}")]
    TooManyInputs {
        /// Inputs the selection needs.
        needed: usize,
        /// Per-transaction input limit.
        max: usize,
    },

    /// The spend exceeds the per-transaction value limit.
    #[error("spend of {requested} exceeds per-transaction limit {max}")]
    SpendLimitExceeded {
        /// Requested amount in base units.
        requested: u64,
        /// Per-transaction value limit in base units.
        max: u64,
    },

    /// A rebuild currently owns the ledger.
    #[error("mint ledger rebuild in progress")]
    RebuildInProgress,

    /// The last rebuild failed or never finished; the ledger is not usable.
    #[error("mint ledger rebuild failed: {0}")]
    RebuildFailed(String),

    /// Chain data could not be read or failed integrity checks.
    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    /// No wallet seed is loaded.
    #[error("wallet seed unavailable")]
    SeedUnavailable,

    /// Seed material could not be decoded.
    #[error("invalid wallet seed: {0}")]
    InvalidSeed(String),

    /// Every index in `[0, 2^32)` has been used.
    #[error("mint index space exhausted")]
    IndexSpaceExhausted,

    /// The spend prover could not produce a proof.
    #[error("spend proof failed: {0}")]
    Proof(String),

    /// The broadcast layer rejected a mint or spend.
    #[error("broadcast rejected: {0}")]
    Broadcast(String),

    /// A cryptographic value could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The ledger store failed.
    #[error("ledger storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<ChainError> for WalletError {
    fn from(e: ChainError) -> Self {
        WalletError::ChainUnavailable(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type WalletResult<T> = Result<T, WalletError>;
