// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Sigma Wallet Node
//!
//! Entry point for the `sigma-node` binary. Parses CLI arguments, initializes
//! logging, opens the wallet over the devnet chain in the data directory, and
//! runs one command.
//!
//! Data directory layout:
//!
//! ```text
//! <data-dir>/
//!   wallet.seed   hex master seed, mode 0600
//!   config.json   optional WalletConfig
//!   ledger/       sled mint ledger
//!   chain/        sled devnet chain and mempool
//! ```
//!
//! `--zap-mints` is applied when the wallet opens, so the rebuild runs once
//! before the command itself.

mod cli;
mod logging;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;

use sigma_wallet::chain::{ChainStore, DevnetMiner};
use sigma_wallet::config::WalletConfig;
use sigma_wallet::ledger::{MintLedger, MintRecord};
use sigma_wallet::mint::{format_amount, parse_amount, MasterSeed};
use sigma_wallet::wallet::{DevnetProver, WalletHealth};
use sigma_wallet::MintWallet;

use cli::{Commands, SigmaNodeCli};
use logging::DEFAULT_FILTER;

const SEED_FILE: &str = "wallet.seed";
const CONFIG_FILE: &str = "config.json";
const LEDGER_DIR: &str = "ledger";
const CHAIN_DIR: &str = "chain";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SigmaNodeCli::parse();
    logging::init_logging(DEFAULT_FILTER, cli.log_format);

    match &cli.command {
        Commands::Init(args) => {
            let seed = init_data_dir(&cli.data_dir, args.force)?;
            println!("Wallet initialized.");
            println!("  Data directory : {}", cli.data_dir.display());
            println!("  Seed file      : {}", cli.data_dir.join(SEED_FILE).display());
            println!("  Fingerprint    : {}", seed.fingerprint());
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Run(args) => {
            let node = Arc::new(Node::open(&cli)?);
            let period = args
                .sync_interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| node.wallet.config().sync_interval());
            run_daemon(node, period, args.auto_mine).await
        }
        command => {
            let node = Node::open(&cli)?;
            node.execute(command)
        }
    }
}

// ---------------------------------------------------------------------------
// Data directory
// ---------------------------------------------------------------------------

/// Create the data directory, write a fresh seed, and store genesis.
fn init_data_dir(data_dir: &Path, force: bool) -> Result<MasterSeed> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let seed_path = data_dir.join(SEED_FILE);
    if seed_path.exists() && !force {
        bail!(
            "{} already exists; pass --force to replace it",
            seed_path.display()
        );
    }

    let seed = MasterSeed::generate(&mut rand::rngs::OsRng);
    std::fs::write(&seed_path, seed.to_hex())
        .with_context(|| format!("failed to write seed to {}", seed_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&seed_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", seed_path.display()))?;
    }

    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        let json = serde_json::to_string_pretty(&WalletConfig::default())?;
        std::fs::write(&config_path, json)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
    }

    let chain = ChainStore::open(data_dir.join(CHAIN_DIR)).context("failed to open chain store")?;
    DevnetMiner::new(Arc::new(chain))
        .ensure_genesis()
        .context("failed to create genesis block")?;

    tracing::info!(
        data_dir = %data_dir.display(),
        fingerprint = %seed.fingerprint(),
        "wallet seed generated"
    );
    Ok(seed)
}

fn load_seed(data_dir: &Path) -> Result<MasterSeed> {
    let path = data_dir.join(SEED_FILE);
    let encoded = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "failed to read {}; run `sigma-node init` first",
            path.display()
        )
    })?;
    MasterSeed::from_hex(&encoded).with_context(|| format!("bad seed in {}", path.display()))
}

/// Configuration file, then CLI overrides.
fn load_config(cli: &SigmaNodeCli) -> Result<WalletConfig> {
    let path: Option<PathBuf> = match &cli.config {
        Some(path) => Some(path.clone()),
        None => Some(cli.data_dir.join(CONFIG_FILE)).filter(|p| p.exists()),
    };

    let mut config = match &path {
        Some(path) => WalletConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => WalletConfig::default(),
    };
    if let Some(gap_limit) = cli.gap_limit {
        config.gap_limit = gap_limit;
    }
    if cli.zap_mints {
        config.zap_mints_on_open = true;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A wallet opened over the devnet chain in one data directory.
struct Node {
    chain: Arc<ChainStore>,
    miner: DevnetMiner,
    wallet: MintWallet,
}

impl Node {
    fn open(cli: &SigmaNodeCli) -> Result<Self> {
        let config = load_config(cli)?;
        let seed = load_seed(&cli.data_dir)?;

        let chain_path = cli.data_dir.join(CHAIN_DIR);
        let chain = Arc::new(
            ChainStore::open(&chain_path)
                .with_context(|| format!("failed to open chain at {}", chain_path.display()))?,
        );
        let miner = DevnetMiner::new(Arc::clone(&chain));
        miner.ensure_genesis().context("failed to create genesis block")?;

        let ledger_path = cli.data_dir.join(LEDGER_DIR);
        let ledger = MintLedger::open_path(&ledger_path)
            .with_context(|| format!("failed to open ledger at {}", ledger_path.display()))?;

        let wallet = MintWallet::open(
            config,
            Some(seed),
            ledger,
            Arc::clone(&chain) as _,
            Arc::clone(&chain) as _,
        )
        .context("failed to open wallet")?;

        Ok(Self {
            chain,
            miner,
            wallet,
        })
    }

    /// Sync, logging rather than failing: commands still run on a stale view.
    fn sync_quietly(&self) {
        if let Err(e) = self.wallet.sync() {
            tracing::warn!(error = %e, "sync failed");
        }
    }

    fn execute(&self, command: &Commands) -> Result<()> {
        match command {
            Commands::Mint(args) => {
                let amount = parse_amount(&args.amount)?;
                self.sync_quietly();
                let receipts = self.wallet.mint(amount).context("mint failed")?;
                for r in &receipts {
                    println!(
                        "minted {:>7} index {:>5} {}",
                        r.denomination.to_string(),
                        r.index,
                        r.commitment
                    );
                }
                println!("{} coin(s) pending; generate a block to confirm", receipts.len());
            }
            Commands::Spend(args) => {
                let amount = parse_amount(&args.amount)?;
                self.sync_quietly();
                let receipt = self
                    .wallet
                    .spend(amount, &DevnetProver)
                    .context("spend failed")?;
                println!(
                    "spent {} using {} coin(s) worth {}: indices {:?}",
                    format_amount(receipt.requested),
                    receipt.inputs.len(),
                    format_amount(receipt.total),
                    receipt.inputs
                );
            }
            Commands::ListUnspent(args) => {
                self.sync_quietly();
                let view = self.wallet.list_unspent();
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&UnspentOutput::from(&view))?);
                } else {
                    if let Some(reason) = describe_health(&view.health) {
                        println!("ledger unavailable: {reason}");
                    }
                    print_records(&view.mints);
                    println!("total {}", format_amount(view.total()));
                }
            }
            Commands::ListMints(args) => {
                self.sync_quietly();
                let records = self.wallet.list_mints();
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else {
                    print_records(&records);
                }
            }
            Commands::Generate(args) => {
                let produced = self.miner.generate(args.blocks).context("generate failed")?;
                self.sync_quietly();
                if let Some(last) = produced.last() {
                    println!("generated {} block(s), tip {}", produced.len(), last);
                }
            }
            Commands::Status(args) => {
                self.sync_quietly();
                let status = self.wallet.status();
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                } else {
                    println!(
                        "health       : {}",
                        describe_health(&status.health).unwrap_or_else(|| "ready".to_string())
                    );
                    println!("reconciler   : {}", status.reconciler);
                    println!("ledger       : {:?}", status.ledger);
                    println!(
                        "scan tip     : {}",
                        status.scan_tip.map_or("none".to_string(), |t| t.to_string())
                    );
                    println!(
                        "chain tip    : {}",
                        self.chain
                            .tip_height()?
                            .map_or("none".to_string(), |h| h.to_string())
                    );
                    println!(
                        "mints        : {} pending, {} confirmed, {} spent",
                        status.counts.pending, status.counts.confirmed, status.counts.spent
                    );
                    println!("unspent      : {}", format_amount(status.unspent_value));
                    println!("mempool      : {}", self.chain.mempool_len());
                    if let Some(fp) = &status.seed_fingerprint {
                        println!("seed         : {fp}");
                    }
                    if let Some(rebuild) = &status.last_rebuild {
                        println!(
                            "last rebuild : {} ({}, {} recovered)",
                            rebuild.finished_at.to_rfc3339(),
                            rebuild.trigger,
                            rebuild.recovered
                        );
                    }
                }
            }
            Commands::Init(_) | Commands::Run(_) | Commands::Version => {
                bail!("command must be run from main")
            }
        }
        Ok(())
    }

    /// One daemon tick: optionally mine, then sync.
    fn tick(&self, auto_mine: bool) -> Result<()> {
        if auto_mine && self.chain.mempool_len() > 0 {
            self.miner.generate(1).context("auto-mine failed")?;
        }
        let report = self.wallet.sync()?;
        if report.blocks > 0 || report.rebuild.is_some() {
            tracing::info!(
                blocks = report.blocks,
                confirmed = report.confirmed,
                spent = report.spent,
                rebuilt = report.rebuild.is_some(),
                tip = ?report.tip.map(|t| t.height),
                "sync"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct UnspentRow {
    index: u32,
    denomination: String,
    commitment: String,
    state: String,
    confirmed_height: Option<u64>,
}

#[derive(Serialize)]
struct UnspentOutput {
    health: WalletHealth,
    total: String,
    mints: Vec<UnspentRow>,
}

impl From<&sigma_wallet::wallet::UnspentView> for UnspentOutput {
    fn from(view: &sigma_wallet::wallet::UnspentView) -> Self {
        Self {
            health: view.health.clone(),
            total: format_amount(view.total()),
            mints: view
                .mints
                .iter()
                .map(|r| UnspentRow {
                    index: r.index,
                    denomination: r.denomination.to_string(),
                    commitment: r.commitment.to_hex(),
                    state: r.state.to_string(),
                    confirmed_height: r.confirmed_height,
                })
                .collect(),
        }
    }
}

fn describe_health(health: &WalletHealth) -> Option<String> {
    match health {
        WalletHealth::Ready => None,
        WalletHealth::Rebuilding => Some("rebuild in progress".to_string()),
        WalletHealth::RebuildFailed { reason } => Some(format!("rebuild failed: {reason}")),
        WalletHealth::RebuildRequired => Some("rebuild required".to_string()),
    }
}

fn print_records(records: &[MintRecord]) {
    println!(
        "{:>5}  {:>7}  {:<9}  {:>9}  commitment",
        "index", "denom", "state", "confirmed"
    );
    for r in records {
        println!(
            "{:>5}  {:>7}  {:<9}  {:>9}  {}",
            r.index,
            r.denomination.to_string(),
            r.state.to_string(),
            r.confirmed_height.map_or("-".to_string(), |h| h.to_string()),
            r.commitment
        );
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Sync every `period` until Ctrl+C or SIGTERM.
async fn run_daemon(node: Arc<Node>, period: std::time::Duration, auto_mine: bool) -> Result<()> {
    tracing::info!(
        period_ms = period.as_millis() as u64,
        auto_mine,
        "sigma-node running"
    );

    let mut interval = tokio::time::interval(period);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let node = Arc::clone(&node);
                let result = tokio::task::spawn_blocking(move || node.tick(auto_mine))
                    .await
                    .context("sync task panicked")?;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "sync tick failed");
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    tracing::info!("sigma-node stopped");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("sigma-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc      {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_for(dir: &Path, args: &[&str]) -> SigmaNodeCli {
        let data_dir = dir.to_string_lossy().to_string();
        let mut argv = vec!["sigma-node", "--data-dir", data_dir.as_str()];
        argv.extend_from_slice(args);
        SigmaNodeCli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn init_refuses_to_overwrite_a_seed() {
        let dir = tempfile::tempdir().unwrap();
        let first = init_data_dir(dir.path(), false).unwrap();
        assert!(init_data_dir(dir.path(), false).is_err());
        assert_eq!(load_seed(dir.path()).unwrap().fingerprint(), first.fingerprint());

        let replaced = init_data_dir(dir.path(), true).unwrap();
        assert_ne!(replaced.fingerprint(), first.fingerprint());
    }

    #[test]
    fn open_without_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Node::open(&cli_for(dir.path(), &["status"])).is_err());
    }

    #[test]
    fn mint_generate_and_zap_through_the_node() {
        let dir = tempfile::tempdir().unwrap();
        init_data_dir(dir.path(), false).unwrap();

        {
            let cli = cli_for(dir.path(), &["mint", "--amount", "11"]);
            let node = Node::open(&cli).unwrap();
            node.execute(&cli.command).unwrap();
            node.miner.generate(1).unwrap();
            node.wallet.sync().unwrap();
            assert_eq!(node.wallet.list_unspent().mints.len(), 2);
        }

        let cli = cli_for(dir.path(), &["--zap-mints", "list-unspent"]);
        let node = Node::open(&cli).unwrap();
        let view = node.wallet.list_unspent();
        assert_eq!(view.mints.len(), 2);
        assert_eq!(view.total(), parse_amount("11").unwrap());
        assert!(node.wallet.status().last_rebuild.is_some());
    }

    #[test]
    fn cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        init_data_dir(dir.path(), false).unwrap();
        let config = load_config(&cli_for(dir.path(), &["--gap-limit", "7", "status"])).unwrap();
        assert_eq!(config.gap_limit, 7);
        assert!(!config.zap_mints_on_open);

        assert!(load_config(&cli_for(dir.path(), &["--gap-limit", "0", "status"])).is_err());
    }
}
