//! # CLI Interface
//!
//! Command-line structure for `sigma-node`, built with `clap` derive.
//! Global flags select the data directory and configuration and can request
//! a zap before the subcommand runs.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Sigma mint wallet node.
///
/// Manages a deterministic mint wallet against a local devnet chain: mint
/// and spend coins, generate blocks, list the unspent set, and rebuild the
/// mint ledger from the seed and the chain.
#[derive(Parser, Debug)]
#[command(
    name = "sigma-node",
    about = "Sigma mint wallet node",
    version,
    propagate_version = true
)]
pub struct SigmaNodeCli {
    /// Data directory holding the wallet seed, mint ledger and chain.
    #[arg(
        long,
        short = 'd',
        env = "SIGMA_DATA_DIR",
        default_value = ".sigma",
        global = true
    )]
    pub data_dir: PathBuf,

    /// Wallet configuration file (JSON).
    ///
    /// When omitted, `config.json` in the data directory is used if present.
    #[arg(long, short = 'c', env = "SIGMA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Throw away the mint ledger and rebuild it from the chain before the
    /// command runs.
    #[arg(long, global = true)]
    pub zap_mints: bool,

    /// Consecutive unused indices probed before a rebuild stops.
    #[arg(long, env = "SIGMA_GAP_LIMIT", global = true)]
    pub gap_limit: Option<u32>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory, a fresh wallet seed, and the genesis block.
    Init(InitArgs),
    /// Mint coins. The amount is split across denominations.
    Mint(AmountArgs),
    /// Spend confirmed coins.
    Spend(AmountArgs),
    /// List confirmed, unspent mints.
    ListUnspent(OutputArgs),
    /// List every mint record.
    ListMints(OutputArgs),
    /// Append blocks to the devnet chain, then sync.
    Generate(GenerateArgs),
    /// Show wallet and ledger status.
    Status(OutputArgs),
    /// Sync periodically until interrupted.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for `init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Replace an existing seed. Every coin derived from the old one is lost
    /// to this wallet.
    #[arg(long)]
    pub force: bool,
}

/// An amount in coins, e.g. `0.05` or `136.65`.
#[derive(Args, Debug)]
pub struct AmountArgs {
    /// Amount in coins.
    #[arg(long, short = 'a')]
    pub amount: String,
}

/// Output selection for listing commands.
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Print JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `generate`.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Number of blocks.
    #[arg(long, short = 'n', default_value_t = 1)]
    pub blocks: u32,
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Generate a block whenever the mempool is not empty.
    #[arg(long)]
    pub auto_mine: bool,

    /// Sync period in milliseconds. Overrides the configuration.
    #[arg(long, env = "SIGMA_SYNC_INTERVAL_MS")]
    pub sync_interval_ms: Option<u64>,
}
