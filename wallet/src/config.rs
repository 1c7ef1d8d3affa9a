//! # Wallet Configuration & Constants
//!
//! Every magic number in the mint wallet lives here: the denomination table,
//! derivation context strings, and the defaults for the tunable knobs in
//! [`WalletConfig`].
//!
//! The derivation contexts are consensus-critical in a different sense than
//! usual: change one and every existing wallet seed derives a different set of
//! coins, so a zap would rebuild an empty ledger. Don't.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Units & Denominations
// ---------------------------------------------------------------------------

/// Base units per coin. 8 decimals, same as Bitcoin.
pub const COIN: u64 = 100_000_000;

/// Number of decimal places used when parsing and displaying amounts.
pub const COIN_DECIMALS: u32 = 8;

/// The fixed denomination table in base units, ascending:
/// 0.05, 0.1, 0.5, 1, 10, 25, 100.
pub const DENOMINATION_UNITS: [u64; 7] = [
    5_000_000,
    10_000_000,
    50_000_000,
    COIN,
    10 * COIN,
    25 * COIN,
    100 * COIN,
];

// ---------------------------------------------------------------------------
// Derivation Contexts
// ---------------------------------------------------------------------------

/// BLAKE3 `derive_key` context for per-index mint seeds.
pub const MINT_SEED_CONTEXT: &str = "sigma-wallet 2026-01-01 mint seed v1";

/// Context for the serial-number scalar.
pub const SERIAL_CONTEXT: &str = "sigma-wallet 2026-01-01 serial number v1";

/// Context for the per-denomination blinding scalar.
pub const BLINDING_CONTEXT: &str = "sigma-wallet 2026-01-01 commitment blinding v1";

/// Hash-to-curve context for the serial generator `G`.
pub const GENERATOR_G_CONTEXT: &str = "sigma-wallet 2026-01-01 generator G";

/// Hash-to-curve context for the blinding generator `H`.
pub const GENERATOR_H_CONTEXT: &str = "sigma-wallet 2026-01-01 generator H";

/// Context for devnet spend proofs.
pub const SPEND_PROOF_CONTEXT: &str = "sigma-wallet 2026-01-01 devnet spend proof";

/// Context for devnet block hashes.
pub const BLOCK_HASH_CONTEXT: &str = "sigma-wallet 2026-01-01 block header";

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Consecutive unused indices probed before a rebuild stops deriving.
/// Same number BIP-44 wallets use for addresses.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Maximum mint inputs per spend transaction.
pub const DEFAULT_MAX_SPEND_INPUTS: usize = 35;

/// Maximum value spent per transaction, in base units.
pub const DEFAULT_MAX_SPEND_VALUE: u64 = 500 * COIN;

/// Blocks fetched per chain query while scanning.
pub const DEFAULT_SCAN_BATCH_SIZE: u64 = 500;

/// Unrecorded indices past the last record that an ordinary sync watches.
/// A hit means another holder of the seed minted there.
pub const SYNC_LOOKAHEAD: u32 = 2;

/// How often the node daemon syncs the wallet against the chain.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// WalletConfig
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`WalletConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime knobs for a wallet instance.
///
/// Missing fields in a config file fall back to their defaults, so an empty
/// JSON object is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Consecutive absent indices after which a rebuild stops probing.
    pub gap_limit: u32,

    /// Height a rebuild starts scanning from. Mints can't exist below the
    /// height sigma was activated, so this is a safe checkpoint.
    pub rebuild_start_height: u64,

    /// Maximum inputs in one spend.
    pub max_spend_inputs: usize,

    /// Maximum value of one spend, in base units.
    pub max_spend_value: u64,

    /// Blocks fetched per chain query.
    pub scan_batch_size: u64,

    /// Run a full rebuild once when the wallet opens, before it accepts
    /// mint or spend requests.
    pub zap_mints_on_open: bool,

    /// Daemon sync period in milliseconds.
    pub sync_interval_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            gap_limit: DEFAULT_GAP_LIMIT,
            rebuild_start_height: 0,
            max_spend_inputs: DEFAULT_MAX_SPEND_INPUTS,
            max_spend_value: DEFAULT_MAX_SPEND_VALUE,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            zap_mints_on_open: false,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL.as_millis() as u64,
        }
    }
}

impl WalletConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: WalletConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the wallet unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gap_limit == 0 {
            return Err(ConfigError::Invalid(
                "gap_limit must be at least 1".to_string(),
            ));
        }
        if self.max_spend_inputs == 0 {
            return Err(ConfigError::Invalid(
                "max_spend_inputs must be at least 1".to_string(),
            ));
        }
        if self.max_spend_value == 0 {
            return Err(ConfigError::Invalid(
                "max_spend_value must be positive".to_string(),
            ));
        }
        if self.scan_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "scan_batch_size must be at least 1".to_string(),
            ));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Daemon sync period.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}
