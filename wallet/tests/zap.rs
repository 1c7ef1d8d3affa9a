//! End-to-end tests for minting, zapping and rebuilding.
//!
//! Each test runs a wallet against its own devnet chain: mint, generate
//! blocks, sync, list, zap, list again. Chain wrappers below inject latency
//! and outages where a test needs them.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sigma_wallet::chain::{
    BlockRef, Broadcaster, ChainBlock, ChainError, ChainResult, ChainSource, ChainStore,
    DevnetMiner, MintOutput, SpendInput,
};
use sigma_wallet::config::{WalletConfig, COIN};
use sigma_wallet::ledger::{LedgerStore, MintLedger, MintState};
use sigma_wallet::mint::{parse_amount, CommitmentBuilder, Denomination, MasterSeed, SeedDeriver};
use sigma_wallet::reconciler::ReconcilerState;
use sigma_wallet::wallet::{DevnetProver, WalletHealth};
use sigma_wallet::{MintWallet, WalletError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const SEED: [u8; 32] = [42u8; 32];

/// The denominations the zap scenario mints, one coin each.
const SCENARIO_AMOUNTS: [&str; 7] = ["0.05", "0.1", "0.5", "1", "10", "25", "100"];

struct Devnet {
    store: Arc<ChainStore>,
    miner: DevnetMiner,
}

impl Devnet {
    fn new() -> Self {
        let store = Arc::new(ChainStore::open_temporary().expect("temp chain"));
        let miner = DevnetMiner::new(store.clone());
        miner.ensure_genesis().expect("genesis");
        Self { store, miner }
    }

    fn wallet(&self, ledger: MintLedger, config: WalletConfig) -> MintWallet {
        self.wallet_over(self.store.clone(), ledger, config)
    }

    fn wallet_over(
        &self,
        source: Arc<dyn ChainSource>,
        ledger: MintLedger,
        config: WalletConfig,
    ) -> MintWallet {
        MintWallet::open(
            config,
            Some(MasterSeed::from_bytes(SEED)),
            ledger,
            source,
            self.store.clone(),
        )
        .expect("open wallet")
    }

    fn confirm(&self, wallet: &MintWallet, blocks: u32) {
        self.miner.generate(blocks).expect("generate");
        wallet.sync().expect("sync");
    }
}

fn temp_ledger() -> MintLedger {
    MintLedger::open_temporary().expect("temp ledger")
}

/// `(denomination, commitment)` pairs of the unspent set.
fn unspent_set(wallet: &MintWallet) -> BTreeSet<(Denomination, String)> {
    wallet
        .list_unspent()
        .mints
        .iter()
        .map(|r| (r.denomination, r.commitment.to_hex()))
        .collect()
}

/// Mints one coin of every denomination and confirms them.
fn mint_scenario_coins(net: &Devnet, wallet: &MintWallet) {
    for amount in SCENARIO_AMOUNTS {
        wallet
            .mint(parse_amount(amount).expect("amount"))
            .expect("mint");
    }
    net.confirm(wallet, 6);
}

/// Delegates to a chain store, sleeping on every block query.
struct SlowChain {
    inner: Arc<ChainStore>,
    delay: Duration,
}

impl ChainSource for SlowChain {
    fn tip(&self) -> ChainResult<Option<BlockRef>> {
        self.inner.tip()
    }

    fn block_hash(&self, height: u64) -> ChainResult<Option<[u8; 32]>> {
        self.inner.block_hash(height)
    }

    fn blocks(&self, from: u64, to: u64) -> ChainResult<Vec<ChainBlock>> {
        std::thread::sleep(self.delay);
        self.inner.blocks(from, to)
    }

    fn pending_mints(&self) -> ChainResult<Vec<MintOutput>> {
        self.inner.pending_mints()
    }

    fn pending_spends(&self) -> ChainResult<Vec<SpendInput>> {
        self.inner.pending_spends()
    }
}

/// Delegates to a chain store until switched off.
struct FlakyChain {
    inner: Arc<ChainStore>,
    down: AtomicBool,
}

impl FlakyChain {
    fn check(&self) -> ChainResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("node offline".to_string()));
        }
        Ok(())
    }
}

impl ChainSource for FlakyChain {
    fn tip(&self) -> ChainResult<Option<BlockRef>> {
        self.check()?;
        self.inner.tip()
    }

    fn block_hash(&self, height: u64) -> ChainResult<Option<[u8; 32]>> {
        self.check()?;
        self.inner.block_hash(height)
    }

    fn blocks(&self, from: u64, to: u64) -> ChainResult<Vec<ChainBlock>> {
        self.check()?;
        self.inner.blocks(from, to)
    }

    fn pending_mints(&self) -> ChainResult<Vec<MintOutput>> {
        self.check()?;
        self.inner.pending_mints()
    }

    fn pending_spends(&self) -> ChainResult<Vec<SpendInput>> {
        self.check()?;
        self.inner.pending_spends()
    }
}

/// Delegates to a chain store, mining one block the next time the mempool
/// is read, so a mint moves into a block in the middle of a recovery scan.
struct MiningChain {
    inner: Arc<ChainStore>,
    miner: DevnetMiner,
    armed: AtomicBool,
}

impl ChainSource for MiningChain {
    fn tip(&self) -> ChainResult<Option<BlockRef>> {
        self.inner.tip()
    }

    fn block_hash(&self, height: u64) -> ChainResult<Option<[u8; 32]>> {
        self.inner.block_hash(height)
    }

    fn blocks(&self, from: u64, to: u64) -> ChainResult<Vec<ChainBlock>> {
        self.inner.blocks(from, to)
    }

    fn pending_mints(&self) -> ChainResult<Vec<MintOutput>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.miner.generate(1)?;
        }
        self.inner.pending_mints()
    }

    fn pending_spends(&self) -> ChainResult<Vec<SpendInput>> {
        self.inner.pending_spends()
    }
}

// ---------------------------------------------------------------------------
// 1-3. Mint, Zap, Mint Again
// ---------------------------------------------------------------------------

#[test]
fn mint_every_denomination_then_zap_then_mint_again() {
    let net = Devnet::new();
    let wallet = net.wallet(temp_ledger(), WalletConfig::default());

    mint_scenario_coins(&net, &wallet);
    let before = wallet.list_unspent();
    assert_eq!(before.health, WalletHealth::Ready);
    assert!(before.mints.len() >= 7);
    assert!(before.mints.iter().all(|r| r.state == MintState::Confirmed));
    assert_eq!(before.total(), parse_amount("136.65").expect("amount"));
    let before_set = unspent_set(&wallet);

    let report = wallet.zap().expect("zap");
    assert_eq!(report.cleared, 7);
    assert_eq!(report.recovered, 7);
    assert_eq!(wallet.reconciler_state(), ReconcilerState::Idle);
    assert_eq!(wallet.list_unspent().mints.len(), before.mints.len());
    assert_eq!(unspent_set(&wallet), before_set);

    let receipt = wallet
        .mint(parse_amount("0.05").expect("amount"))
        .expect("mint after zap");
    assert_eq!(receipt[0].index, 7);
    net.confirm(&wallet, 1);
    assert_eq!(wallet.list_unspent().mints.len(), before.mints.len() + 1);
}

#[test]
fn zap_is_idempotent() {
    let net = Devnet::new();
    let wallet = net.wallet(temp_ledger(), WalletConfig::default());
    mint_scenario_coins(&net, &wallet);

    wallet.zap().expect("first zap");
    let once = unspent_set(&wallet);
    let tip_once = wallet.ledger().scan_tip();
    wallet.zap().expect("second zap");
    assert_eq!(unspent_set(&wallet), once);
    assert_eq!(wallet.ledger().scan_tip(), tip_once);
}

#[test]
fn zap_on_open_rebuilds_a_fresh_ledger() {
    let net = Devnet::new();
    let first = net.wallet(temp_ledger(), WalletConfig::default());
    mint_scenario_coins(&net, &first);
    let expected = unspent_set(&first);
    drop(first);

    let config = WalletConfig {
        zap_mints_on_open: true,
        ..WalletConfig::default()
    };
    let restored = net.wallet(temp_ledger(), config);
    assert_eq!(unspent_set(&restored), expected);
    assert!(restored.status().last_rebuild.is_some());
}

// ---------------------------------------------------------------------------
// 4. Rebuild Racing a Mint
// ---------------------------------------------------------------------------

#[test]
fn mint_during_rebuild_completes_or_is_refused_never_lost() {
    let net = Devnet::new();
    let config = WalletConfig {
        scan_batch_size: 1,
        ..WalletConfig::default()
    };
    let slow = Arc::new(SlowChain {
        inner: net.store.clone(),
        delay: Duration::from_millis(15),
    });
    let wallet = net.wallet_over(slow, temp_ledger(), config);
    wallet.mint(COIN).expect("mint");
    net.confirm(&wallet, 10);

    let minted = std::thread::scope(|s| {
        let rebuild = s.spawn(|| wallet.zap());
        let mint = s.spawn(|| {
            std::thread::sleep(Duration::from_millis(20));
            wallet.mint_denomination(Denomination::Half)
        });
        rebuild.join().expect("rebuild thread").expect("rebuild");
        mint.join().expect("mint thread")
    });

    match minted {
        Ok(receipt) => {
            net.confirm(&wallet, 1);
            let record = wallet
                .list_mints()
                .into_iter()
                .find(|r| r.index == receipt.index)
                .expect("minted coin survives the rebuild");
            assert_eq!(record.commitment, receipt.commitment);
            assert_eq!(record.state, MintState::Confirmed);
        }
        Err(e) => assert!(matches!(e, WalletError::RebuildInProgress), "unexpected: {e}"),
    }
    assert!(wallet.ledger().read().is_contiguous());
}

#[test]
fn concurrent_zap_is_refused() {
    let net = Devnet::new();
    let config = WalletConfig {
        scan_batch_size: 1,
        ..WalletConfig::default()
    };
    let slow = Arc::new(SlowChain {
        inner: net.store.clone(),
        delay: Duration::from_millis(15),
    });
    let wallet = net.wallet_over(slow, temp_ledger(), config);
    net.confirm(&wallet, 8);

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| wallet.zap());
        let b = s.spawn(|| {
            std::thread::sleep(Duration::from_millis(20));
            wallet.zap()
        });
        (a.join().expect("a"), b.join().expect("b"))
    });
    assert!(a.is_ok());
    assert!(matches!(b, Err(WalletError::RebuildInProgress)));
}

// ---------------------------------------------------------------------------
// 5. Same-Denomination Mints Are Distinct
// ---------------------------------------------------------------------------

#[test]
fn repeated_denomination_mints_are_distinct() {
    let net = Devnet::new();
    let wallet = net.wallet(temp_ledger(), WalletConfig::default());
    let a = wallet.mint_denomination(Denomination::Ten).expect("first");
    let b = wallet.mint_denomination(Denomination::Ten).expect("second");
    assert_ne!(a.commitment, b.commitment);

    let records = wallet.list_mints();
    assert_ne!(records[0].serial, records[1].serial);
    net.confirm(&wallet, 1);
    assert_eq!(wallet.list_unspent().mints.len(), 2);
}

// ---------------------------------------------------------------------------
// Spends Across a Zap
// ---------------------------------------------------------------------------

#[test]
fn spent_coins_stay_spent_after_zap() {
    let net = Devnet::new();
    let wallet = net.wallet(temp_ledger(), WalletConfig::default());
    wallet.mint(11 * COIN).expect("mint");
    net.confirm(&wallet, 1);

    let receipt = wallet.spend(10 * COIN, &DevnetProver).expect("spend");
    assert_eq!(receipt.total, 10 * COIN);
    net.confirm(&wallet, 1);

    let counts = wallet.status().counts;
    assert_eq!((counts.confirmed, counts.spent), (1, 1));

    wallet.zap().expect("zap");
    let counts = wallet.status().counts;
    assert_eq!((counts.confirmed, counts.spent), (1, 1));
    assert_eq!(wallet.list_unspent().total(), COIN);
}

#[test]
fn broadcast_spends_stay_held_across_zap() {
    let net = Devnet::new();
    let wallet = net.wallet(temp_ledger(), WalletConfig::default());
    wallet.mint(2 * COIN).expect("mint");
    net.confirm(&wallet, 1);

    let first = wallet.spend(COIN, &DevnetProver).expect("first spend");
    assert_eq!(first.inputs, vec![0]);

    let report = wallet.zap().expect("zap");
    assert_eq!(report.in_flight, vec![0]);
    assert_eq!(wallet.status().in_flight, 1);

    let second = wallet.spend(COIN, &DevnetProver).expect("second spend");
    assert_eq!(second.inputs, vec![1]);

    net.confirm(&wallet, 1);
    let status = wallet.status();
    assert_eq!(status.counts.spent, 2);
    assert_eq!(status.in_flight, 0);
}

#[test]
fn mint_mined_during_recovery_is_not_lost() {
    let net = Devnet::new();
    let chain = Arc::new(MiningChain {
        inner: net.store.clone(),
        miner: DevnetMiner::new(net.store.clone()),
        armed: AtomicBool::new(false),
    });
    let wallet = net.wallet_over(chain.clone(), temp_ledger(), WalletConfig::default());
    wallet.mint(COIN).expect("mint");
    net.confirm(&wallet, 1);
    wallet.mint(10 * COIN).expect("mint left in the mempool");

    chain.armed.store(true, Ordering::SeqCst);
    wallet.zap().expect("zap");
    wallet.sync().expect("sync");

    let records: Vec<_> = wallet
        .list_mints()
        .into_iter()
        .map(|r| (r.index, r.denomination, r.state))
        .collect();
    assert_eq!(
        records,
        vec![
            (0, Denomination::One, MintState::Confirmed),
            (1, Denomination::Ten, MintState::Confirmed),
        ]
    );

    let next = wallet
        .mint_denomination(Denomination::One)
        .expect("mint after zap");
    assert_eq!(next.index, 2);
}

#[test]
fn unconfirmed_mints_come_back_pending() {
    let net = Devnet::new();
    let wallet = net.wallet(temp_ledger(), WalletConfig::default());
    wallet.mint(COIN).expect("mint");
    net.confirm(&wallet, 1);
    wallet.mint(10 * COIN).expect("mint still in mempool");

    wallet.zap().expect("zap");
    let records = wallet.list_mints();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].state, MintState::Pending);
    assert_eq!(wallet.list_unspent().total(), COIN);

    net.confirm(&wallet, 1);
    assert_eq!(wallet.list_unspent().total(), 11 * COIN);
}

// ---------------------------------------------------------------------------
// Reorg & Crash Recovery
// ---------------------------------------------------------------------------

#[test]
fn reorg_below_scan_tip_triggers_rebuild() {
    let net = Devnet::new();
    let wallet = net.wallet(temp_ledger(), WalletConfig::default());
    wallet.mint(COIN).expect("mint");
    net.confirm(&wallet, 2);
    let old_tip = wallet.ledger().scan_tip().expect("tip");

    // Replace blocks 1-2 with a branch that also carries someone else's mint.
    net.store.rewind_to(0).expect("rewind");
    let stranger = SeedDeriver::new(MasterSeed::from_bytes([7u8; 32]));
    let (commitment, _) = CommitmentBuilder::new()
        .commit(&stranger.derive(0), Denomination::One)
        .expect("commit");
    net.store
        .broadcast_mint(MintOutput {
            commitment,
            denomination: Denomination::One,
        })
        .expect("broadcast");
    net.miner.generate(3).expect("generate");

    let report = wallet.sync().expect("sync");
    let rebuild = report.rebuild.expect("sync rebuilt the ledger");
    assert!(rebuild.trigger.contains("consistency fault"));
    assert_ne!(wallet.ledger().scan_tip(), Some(old_tip));
    assert_eq!(wallet.ledger().scan_tip().map(|t| t.height), Some(3));
    assert_eq!(wallet.list_unspent().total(), COIN);
}

#[test]
fn interrupted_rebuild_is_rerun_on_open() {
    let net = Devnet::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let expected = {
        let wallet = net.wallet(
            MintLedger::open_path(dir.path()).expect("ledger"),
            WalletConfig::default(),
        );
        mint_scenario_coins(&net, &wallet);
        unspent_set(&wallet)
    };

    // A crash right after the clear leaves an empty ledger with the marker.
    {
        let store = LedgerStore::open(dir.path()).expect("store");
        store.clear_all().expect("clear");
    }

    let wallet = net.wallet(
        MintLedger::open_path(dir.path()).expect("ledger"),
        WalletConfig::default(),
    );
    assert_eq!(wallet.health(), WalletHealth::Ready);
    assert_eq!(unspent_set(&wallet), expected);
    let rebuild = wallet.status().last_rebuild.expect("rebuilt on open");
    assert_eq!(rebuild.trigger, "interrupted rebuild");
}

#[test]
fn failed_rebuild_leaves_wallet_read_only_until_retry() {
    let net = Devnet::new();
    let chain = Arc::new(FlakyChain {
        inner: net.store.clone(),
        down: AtomicBool::new(false),
    });
    let wallet = net.wallet_over(chain.clone(), temp_ledger(), WalletConfig::default());
    mint_scenario_coins(&net, &wallet);
    let expected = unspent_set(&wallet);

    chain.down.store(true, Ordering::SeqCst);
    assert!(matches!(wallet.zap(), Err(WalletError::ChainUnavailable(_))));

    let view = wallet.list_unspent();
    assert!(view.mints.is_empty());
    assert!(matches!(view.health, WalletHealth::RebuildFailed { .. }));
    assert!(matches!(wallet.mint(COIN), Err(WalletError::RebuildFailed(_))));
    assert!(matches!(
        wallet.spend(COIN, &DevnetProver),
        Err(WalletError::RebuildFailed(_))
    ));

    chain.down.store(false, Ordering::SeqCst);
    let report = wallet.sync().expect("sync retries the rebuild");
    assert!(report.rebuild.is_some());
    assert_eq!(wallet.health(), WalletHealth::Ready);
    assert_eq!(unspent_set(&wallet), expected);
}
