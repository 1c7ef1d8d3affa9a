//! # MintWallet — The Wallet Context
//!
//! Owns one [`MintLedger`] and everything that acts on it: the seed deriver,
//! the commitment builder, the chain scanner, the reconciler and the
//! broadcaster. There is no global ledger; a wallet is opened, used, and
//! dropped.
//!
//! ## Gating
//!
//! Mints and spends are refused unless the ledger can be trusted:
//!
//! | Reconciler   | Ledger status     | mint / spend               | list_unspent        |
//! |--------------|-------------------|----------------------------|---------------------|
//! | `Idle`       | `Ready`           | allowed                    | records             |
//! | `Idle`       | `RebuildRequired` | `RebuildFailed`            | empty, flagged      |
//! | `Rebuilding` | any               | `RebuildInProgress`        | empty, flagged      |
//! | `Failed`     | any               | `RebuildFailed`            | empty, flagged      |
//!
//! A mint holds the ledger writer from index allocation through broadcast,
//! so a rebuild that starts meanwhile waits for it. Either the mint lands
//! before the clear and is recovered from the chain, or it is refused.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chain::{BlockRef, Broadcaster, ChainSource, MintOutput, SpendInput};
use crate::config::{WalletConfig, SPEND_PROOF_CONTEXT, SYNC_LOOKAHEAD};
use crate::crypto::domain_separated_hash;
use crate::error::{WalletError, WalletResult};
use crate::ledger::{LedgerCounts, LedgerStatus, LedgerWriter, MintLedger, MintRecord, MintState};
use crate::mint::{
    format_amount, CommitmentBuilder, Denomination, MasterSeed, MintCommitment, MintSeed,
    SeedDeriver, SerialNumber,
};
use crate::reconciler::{ReconcileReport, RebuildTrigger, Reconciler, ReconcilerState};
use crate::scanner::{ChainScanner, WatchSet};
use crate::selector::SpendSelector;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Produces the opaque proof that authorizes spending one mint.
pub trait SpendProver: Send + Sync {
    /// Proof for spending `record`, whose secrets are in `seed`.
    fn prove(&self, record: &MintRecord, seed: &MintSeed) -> WalletResult<Vec<u8>>;
}

/// Devnet prover: a keyed hash over the coin's public values. Binds the
/// proof to the seed without being a zero-knowledge proof of anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct DevnetProver;

impl SpendProver for DevnetProver {
    fn prove(&self, record: &MintRecord, seed: &MintSeed) -> WalletResult<Vec<u8>> {
        let proof = domain_separated_hash(
            SPEND_PROOF_CONTEXT,
            &[
                seed.serial_secret(),
                record.commitment.as_bytes(),
                record.serial.as_bytes(),
            ],
        );
        Ok(proof.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Whether the wallet's view of its mints can be used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "health", rename_all = "snake_case")]
pub enum WalletHealth {
    /// Ledger is current and writable.
    Ready,
    /// A rebuild is running.
    Rebuilding,
    /// The last rebuild failed. Read-only until a retry succeeds.
    RebuildFailed {
        /// Why it failed.
        reason: String,
    },
    /// The ledger needs a rebuild that has not run yet.
    RebuildRequired,
}

impl WalletHealth {
    /// True for [`WalletHealth::Ready`].
    pub fn is_ready(&self) -> bool {
        *self == WalletHealth::Ready
    }
}

/// Result of [`MintWallet::list_unspent`].
#[derive(Clone, Debug, Serialize)]
pub struct UnspentView {
    /// Wallet health when the list was taken.
    pub health: WalletHealth,
    /// Confirmed, unspent mints. Empty unless `health` is `Ready`.
    pub mints: Vec<MintRecord>,
}

impl UnspentView {
    /// Total value of the listed mints.
    pub fn total(&self) -> u64 {
        self.mints.iter().map(MintRecord::value).sum()
    }
}

/// One mint created by [`MintWallet::mint`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MintReceipt {
    /// Derivation index.
    pub index: u32,
    /// Coin size.
    pub denomination: Denomination,
    /// Published commitment.
    pub commitment: MintCommitment,
}

/// Result of [`MintWallet::spend`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpendReceipt {
    /// Amount requested.
    pub requested: u64,
    /// Value of the coins spent. At least `requested`.
    pub total: u64,
    /// Indices of the spent coins.
    pub inputs: Vec<u32>,
    /// Serials revealed.
    pub serials: Vec<SerialNumber>,
}

/// Result of [`MintWallet::sync`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncReport {
    /// Blocks applied.
    pub blocks: u64,
    /// Mints confirmed.
    pub confirmed: usize,
    /// Mints spent.
    pub spent: usize,
    /// Mints of this seed found on chain with no record. Nonzero means the
    /// sync went on to rebuild.
    pub faults: usize,
    /// Scan tip afterwards.
    pub tip: Option<BlockRef>,
    /// Set when the sync ran a rebuild instead of a scan.
    pub rebuild: Option<ReconcileReport>,
}

/// Snapshot for operators.
#[derive(Clone, Debug, Serialize)]
pub struct WalletStatus {
    /// Overall health.
    pub health: WalletHealth,
    /// Reconciler state.
    pub reconciler: ReconcilerState,
    /// Persisted ledger status.
    pub ledger: LedgerStatus,
    /// Last applied block.
    pub scan_tip: Option<BlockRef>,
    /// Records per state.
    pub counts: LedgerCounts,
    /// Value of confirmed, unspent mints.
    pub unspent_value: u64,
    /// Spends broadcast but not yet seen on chain.
    pub in_flight: usize,
    /// Fingerprint of the loaded seed.
    pub seed_fingerprint: Option<String>,
    /// Outcome of the last successful rebuild in this session.
    pub last_rebuild: Option<ReconcileReport>,
}

// ---------------------------------------------------------------------------
// MintWallet
// ---------------------------------------------------------------------------

/// A sigma mint wallet bound to one seed, one ledger, and one chain.
pub struct MintWallet {
    config: WalletConfig,
    deriver: Option<SeedDeriver>,
    builder: CommitmentBuilder,
    ledger: MintLedger,
    reconciler: Reconciler,
    scanner: ChainScanner,
    selector: SpendSelector,
    broadcaster: Arc<dyn Broadcaster>,
    in_flight: Mutex<HashSet<u32>>,
    last_rebuild: Mutex<Option<ReconcileReport>>,
}

impl std::fmt::Debug for MintWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintWallet")
            .field("config", &self.config)
            .field("seed", &self.deriver.as_ref().map(SeedDeriver::fingerprint))
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl MintWallet {
    /// Open a wallet.
    ///
    /// Runs a rebuild before returning when the ledger was left mid-rebuild,
    /// or when `config.zap_mints_on_open` is set. A rebuild that fails here
    /// does not fail the open: the wallet comes up read-only and reports the
    /// failure through [`MintWallet::health`].
    ///
    /// `seed` may be `None` for a watch-only wallet, which can list and sync
    /// but not mint, spend, or rebuild.
    pub fn open(
        config: WalletConfig,
        seed: Option<MasterSeed>,
        ledger: MintLedger,
        source: Arc<dyn ChainSource>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> WalletResult<Self> {
        let wallet = Self {
            deriver: seed.map(SeedDeriver::new),
            builder: CommitmentBuilder::new(),
            reconciler: Reconciler::new(config.gap_limit, config.rebuild_start_height),
            scanner: ChainScanner::new(source, config.scan_batch_size),
            selector: SpendSelector::new(config.max_spend_inputs, config.max_spend_value),
            ledger,
            broadcaster,
            in_flight: Mutex::new(HashSet::new()),
            last_rebuild: Mutex::new(None),
            config,
        };

        let trigger = if wallet.ledger.status() == LedgerStatus::RebuildRequired {
            Some(RebuildTrigger::Interrupted)
        } else if wallet.config.zap_mints_on_open {
            Some(RebuildTrigger::Operator)
        } else {
            None
        };

        match (trigger, &wallet.deriver) {
            (Some(trigger), Some(_)) => {
                if let Err(e) = wallet.rebuild(trigger) {
                    warn!(error = %e, "startup rebuild failed, wallet opened read-only");
                }
            }
            (Some(trigger), None) => {
                warn!(%trigger, "rebuild needed but no seed is loaded");
            }
            (None, _) => match wallet.restore_in_flight() {
                Ok(0) => {}
                Ok(restored) => debug!(restored, "spends still in the mempool held in flight"),
                Err(e) => warn!(error = %e, "could not read pending spends"),
            },
        }

        info!(
            seed = ?wallet.deriver.as_ref().map(SeedDeriver::fingerprint),
            health = ?wallet.health(),
            "mint wallet opened"
        );
        Ok(wallet)
    }

    /// Runtime configuration.
    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &MintLedger {
        &self.ledger
    }

    /// Reconciler state.
    pub fn reconciler_state(&self) -> ReconcilerState {
        self.reconciler.state()
    }

    /// Overall health.
    pub fn health(&self) -> WalletHealth {
        match self.reconciler.state() {
            ReconcilerState::Rebuilding => WalletHealth::Rebuilding,
            ReconcilerState::Failed { reason } => WalletHealth::RebuildFailed { reason },
            ReconcilerState::Idle => match self.ledger.status() {
                LedgerStatus::Ready => WalletHealth::Ready,
                LedgerStatus::RebuildRequired => WalletHealth::RebuildRequired,
            },
        }
    }

    fn deriver(&self) -> WalletResult<&SeedDeriver> {
        self.deriver.as_ref().ok_or(WalletError::SeedUnavailable)
    }

    fn ensure_writable(&self) -> WalletResult<()> {
        match self.health() {
            WalletHealth::Ready => Ok(()),
            WalletHealth::Rebuilding => Err(WalletError::RebuildInProgress),
            WalletHealth::RebuildFailed { reason } => Err(WalletError::RebuildFailed(reason)),
            WalletHealth::RebuildRequired => Err(WalletError::RebuildFailed(
                "ledger requires a rebuild".to_string(),
            )),
        }
    }

    /// Writer for a mint. Never queues behind a running rebuild.
    fn mint_writer(&self) -> WalletResult<LedgerWriter<'_>> {
        let writer = match self.ledger.try_write() {
            Some(writer) => writer,
            None => {
                if self.reconciler.is_rebuilding() {
                    return Err(WalletError::RebuildInProgress);
                }
                self.ledger.write()
            }
        };
        // A rebuild may have run while this thread waited.
        if writer.status() != LedgerStatus::Ready {
            return Err(WalletError::RebuildFailed(
                "ledger requires a rebuild".to_string(),
            ));
        }
        if let ReconcilerState::Failed { reason } = self.reconciler.state() {
            return Err(WalletError::RebuildFailed(reason));
        }
        Ok(writer)
    }

    // -----------------------------------------------------------------------
    // Rebuild
    // -----------------------------------------------------------------------

    /// Throw away the ledger and rebuild it from the seed and the chain.
    pub fn zap(&self) -> WalletResult<ReconcileReport> {
        self.rebuild(RebuildTrigger::Operator)
    }

    /// Marks held before the rebuild are replaced by the spends the mempool
    /// still carries. Marks added by a spend that ran after the rebuild
    /// released the ledger are kept.
    fn rebuild(&self, trigger: RebuildTrigger) -> WalletResult<ReconcileReport> {
        let deriver = self.deriver()?;
        let stale = self.in_flight.lock().clone();
        let report = self.reconciler.rebuild(
            &self.ledger,
            &self.scanner,
            deriver,
            &self.builder,
            trigger,
        )?;
        {
            let mut in_flight = self.in_flight.lock();
            in_flight.retain(|index| !stale.contains(index));
            in_flight.extend(report.in_flight.iter().copied());
        }
        self.prune_in_flight();
        *self.last_rebuild.lock() = Some(report.clone());
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Mint
    // -----------------------------------------------------------------------

    /// Mint `amount` base units, split greedily into denominations.
    ///
    /// All coins of one call are allocated under a single writer, so their
    /// indices are consecutive. If a broadcast fails, the coins before it
    /// stay minted and the failing coin stays `Pending`.
    pub fn mint(&self, amount: u64) -> WalletResult<Vec<MintReceipt>> {
        let denominations = Denomination::split_amount(amount)?;
        let deriver = self.deriver()?;
        self.ensure_writable()?;

        let mut writer = self.mint_writer()?;
        let mut receipts = Vec::with_capacity(denominations.len());
        for denomination in denominations {
            receipts.push(self.mint_one(&mut writer, deriver, denomination)?);
        }
        info!(
            amount = %format_amount(amount),
            coins = receipts.len(),
            "mint submitted"
        );
        Ok(receipts)
    }

    /// Mint a single coin.
    pub fn mint_denomination(&self, denomination: Denomination) -> WalletResult<MintReceipt> {
        let deriver = self.deriver()?;
        self.ensure_writable()?;
        let mut writer = self.mint_writer()?;
        self.mint_one(&mut writer, deriver, denomination)
    }

    fn mint_one(
        &self,
        writer: &mut LedgerWriter<'_>,
        deriver: &SeedDeriver,
        denomination: Denomination,
    ) -> WalletResult<MintReceipt> {
        let index = writer.next_index()?;
        let seed = deriver.derive(index);
        let (commitment, serial) = self.builder.commit(&seed, denomination)?;
        writer.record_pending(index, denomination, commitment, serial)?;

        self.broadcaster
            .broadcast_mint(MintOutput {
                commitment,
                denomination,
            })
            .map_err(|e| {
                warn!(index, error = %e, "mint broadcast failed, record stays pending");
                WalletError::Broadcast(e.to_string())
            })?;

        debug!(index, %denomination, %commitment, "mint broadcast");
        Ok(MintReceipt {
            index,
            denomination,
            commitment,
        })
    }

    // -----------------------------------------------------------------------
    // Spend
    // -----------------------------------------------------------------------

    /// Spend at least `amount` base units of confirmed coins.
    ///
    /// Chosen coins are held in flight until the chain reveals their serials,
    /// so a second spend cannot pick them again. Marks live in memory; open
    /// and rebuild restore them from the spends still in the mempool.
    pub fn spend(&self, amount: u64, prover: &dyn SpendProver) -> WalletResult<SpendReceipt> {
        let deriver = self.deriver()?;
        self.ensure_writable()?;

        let mut in_flight = self.in_flight.lock();
        let candidates: Vec<MintRecord> = self
            .ledger
            .list_unspent()
            .into_iter()
            .filter(|r| !in_flight.contains(&r.index))
            .collect();
        let selected = self.selector.select(&candidates, amount)?;

        let mut inputs = Vec::with_capacity(selected.len());
        for record in &selected {
            let seed = deriver.derive(record.index);
            if self.builder.serial_number(&seed)? != record.serial {
                return Err(WalletError::Proof(format!(
                    "seed does not open mint {}",
                    record.index
                )));
            }
            inputs.push(SpendInput {
                serial: record.serial,
                denomination: record.denomination,
                proof: prover.prove(record, &seed)?,
            });
        }

        for (record, input) in selected.iter().zip(inputs) {
            self.broadcaster
                .broadcast_spend(input)
                .map_err(|e| WalletError::Broadcast(e.to_string()))?;
            in_flight.insert(record.index);
        }

        let receipt = SpendReceipt {
            requested: amount,
            total: selected.iter().map(MintRecord::value).sum(),
            inputs: selected.iter().map(|r| r.index).collect(),
            serials: selected.iter().map(|r| r.serial).collect(),
        };
        info!(
            amount = %format_amount(amount),
            total = %format_amount(receipt.total),
            inputs = receipt.inputs.len(),
            "spend broadcast"
        );
        Ok(receipt)
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Bring the ledger up to the chain tip.
    ///
    /// Each block is applied under its own writer. If the block stored as
    /// the scan tip is no longer on the chain, or the ledger still needs a
    /// rebuild, this rebuilds instead of scanning.
    pub fn sync(&self) -> WalletResult<SyncReport> {
        match self.health() {
            WalletHealth::Rebuilding => return Err(WalletError::RebuildInProgress),
            WalletHealth::RebuildFailed { .. } | WalletHealth::RebuildRequired => {
                return self.sync_by_rebuild(RebuildTrigger::Interrupted);
            }
            WalletHealth::Ready => {}
        }

        let source = self.scanner.source();
        let stored = self.ledger.scan_tip();
        if let Some(stored) = stored {
            if source.block_hash(stored.height)? != Some(stored.hash) {
                warn!(
                    height = stored.height,
                    hash = %stored.hash_hex(),
                    "scan tip no longer on chain"
                );
                return self.sync_by_rebuild(RebuildTrigger::ConsistencyFault(format!(
                    "block {} was reorganized away",
                    stored.height
                )));
            }
        }

        let mut report = SyncReport {
            tip: stored,
            ..SyncReport::default()
        };
        let Some(chain_tip) = source.tip()? else {
            return Ok(report);
        };
        let from = stored.map_or(self.config.rebuild_start_height, |t| t.height + 1);

        let watch = {
            let view = self.ledger.read();
            let mut watch = WatchSet::from_ledger(&view);
            if from <= chain_tip.height {
                if let (Some(deriver), Ok(next)) = (&self.deriver, view.next_index()) {
                    self.watch_unrecorded(&mut watch, deriver, next)?;
                }
            }
            watch
        };
        let summary = self.scanner.scan(from, chain_tip.height, &watch, |block| {
            if self.reconciler.is_rebuilding() {
                return Err(WalletError::RebuildInProgress);
            }
            let outcome = self.ledger.write().apply_block(block.block, &block.events)?;
            report.confirmed += outcome.confirmed;
            report.spent += outcome.spent;
            report.faults += outcome.faults;
            Ok(())
        })?;
        report.blocks = summary.blocks;
        report.tip = self.ledger.scan_tip();

        if report.faults > 0 {
            warn!(faults = report.faults, "chain carries mints this ledger never recorded");
            let mut rebuilt = self.sync_by_rebuild(RebuildTrigger::ConsistencyFault(format!(
                "{} unrecorded mints on chain",
                report.faults
            )))?;
            rebuilt.faults = report.faults;
            return Ok(rebuilt);
        }

        self.prune_in_flight();
        if report.blocks > 0 {
            debug!(
                blocks = report.blocks,
                confirmed = report.confirmed,
                spent = report.spent,
                tip = ?report.tip.map(|t| t.height),
                "wallet synced"
            );
        }
        Ok(report)
    }

    /// Watch the commitments every denomination would give the next few
    /// unrecorded indices. Applying one of them is a fault.
    fn watch_unrecorded(
        &self,
        watch: &mut WatchSet,
        deriver: &SeedDeriver,
        next: u32,
    ) -> WalletResult<()> {
        for offset in 0..SYNC_LOOKAHEAD {
            let Some(index) = next.checked_add(offset) else {
                break;
            };
            let seed = deriver.derive(index);
            for denomination in Denomination::ALL {
                let (commitment, _) = self.builder.commit(&seed, denomination)?;
                watch.watch_commitment(commitment);
            }
        }
        Ok(())
    }

    fn sync_by_rebuild(&self, trigger: RebuildTrigger) -> WalletResult<SyncReport> {
        let rebuild = self.rebuild(trigger)?;
        let counts = self.ledger.read().counts();
        Ok(SyncReport {
            blocks: rebuild.blocks_scanned,
            confirmed: counts.confirmed,
            spent: counts.spent,
            faults: 0,
            tip: self.ledger.scan_tip(),
            rebuild: Some(rebuild),
        })
    }

    /// Mark coins whose spend is already in the mempool.
    fn restore_in_flight(&self) -> WalletResult<usize> {
        let pending = self.scanner.source().pending_spends()?;
        let mut in_flight = self.in_flight.lock();
        let view = self.ledger.read();
        let before = in_flight.len();
        for spend in &pending {
            if let Some(record) = view.find_by_serial(&spend.serial) {
                if record.state == MintState::Confirmed {
                    in_flight.insert(record.index);
                }
            }
        }
        Ok(in_flight.len() - before)
    }

    fn prune_in_flight(&self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.is_empty() {
            return;
        }
        let view = self.ledger.read();
        in_flight.retain(|index| {
            view.get(*index)
                .map_or(false, |r| r.state != MintState::Spent)
        });
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Confirmed, unspent mints, or an empty list with the reason the ledger
    /// cannot be trusted.
    pub fn list_unspent(&self) -> UnspentView {
        let health = self.health();
        let mints = if health.is_ready() {
            self.ledger.list_unspent()
        } else {
            Vec::new()
        };
        UnspentView { health, mints }
    }

    /// Every record, in index order.
    ///
    /// After a rebuild, an index that was requested but never reached the
    /// chain or mempool comes back as a `Pending` placeholder of the smallest
    /// denomination, whatever it held before.
    pub fn list_mints(&self) -> Vec<MintRecord> {
        self.ledger.read().records().cloned().collect()
    }

    /// Operator snapshot.
    pub fn status(&self) -> WalletStatus {
        let health = self.health();
        let (counts, unspent_value, scan_tip, ledger) = {
            let view = self.ledger.read();
            (view.counts(), view.unspent_value(), view.scan_tip(), view.status())
        };
        WalletStatus {
            health,
            reconciler: self.reconciler.state(),
            ledger,
            scan_tip,
            counts,
            unspent_value,
            in_flight: self.in_flight.lock().len(),
            seed_fingerprint: self.deriver.as_ref().map(SeedDeriver::fingerprint),
            last_rebuild: self.last_rebuild.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainStore, DevnetMiner};
    use crate::config::COIN;

    struct Harness {
        store: Arc<ChainStore>,
        miner: DevnetMiner,
        wallet: MintWallet,
    }

    fn harness() -> Harness {
        let store = Arc::new(ChainStore::open_temporary().unwrap());
        let miner = DevnetMiner::new(store.clone());
        miner.ensure_genesis().unwrap();
        let wallet = MintWallet::open(
            WalletConfig::default(),
            Some(MasterSeed::from_bytes([3u8; 32])),
            MintLedger::open_temporary().unwrap(),
            store.clone(),
            store.clone(),
        )
        .unwrap();
        Harness {
            store,
            miner,
            wallet,
        }
    }

    #[test]
    fn mint_records_pending_until_confirmed() {
        let h = harness();
        let receipts = h.wallet.mint(11 * COIN).unwrap();
        assert_eq!(
            receipts.iter().map(|r| r.denomination).collect::<Vec<_>>(),
            vec![Denomination::Ten, Denomination::One]
        );
        assert_eq!(receipts.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1]);
        assert!(h.wallet.list_unspent().mints.is_empty());
        assert_eq!(h.store.mempool_len(), 2);

        h.miner.generate(1).unwrap();
        let report = h.wallet.sync().unwrap();
        assert_eq!(report.confirmed, 2);

        let view = h.wallet.list_unspent();
        assert!(view.health.is_ready());
        assert_eq!(view.total(), 11 * COIN);
    }

    #[test]
    fn spend_holds_coins_in_flight_until_revealed() {
        let h = harness();
        h.wallet.mint(2 * COIN).unwrap();
        h.miner.generate(1).unwrap();
        h.wallet.sync().unwrap();

        let receipt = h.wallet.spend(COIN, &DevnetProver).unwrap();
        assert_eq!(receipt.inputs.len(), 1);
        assert_eq!(receipt.total, COIN);
        assert_eq!(h.wallet.status().in_flight, 1);

        // The other coin is still free; the first is held.
        h.wallet.spend(COIN, &DevnetProver).unwrap();
        assert!(matches!(
            h.wallet.spend(COIN, &DevnetProver),
            Err(WalletError::InsufficientFunds { .. })
        ));

        h.miner.generate(1).unwrap();
        let report = h.wallet.sync().unwrap();
        assert_eq!(report.spent, 2);
        assert_eq!(h.wallet.status().in_flight, 0);
        assert_eq!(h.wallet.status().counts.spent, 2);
    }

    #[test]
    fn sync_rebuilds_when_another_holder_of_the_seed_minted() {
        let h = harness();
        h.wallet.mint(COIN).unwrap();
        h.miner.generate(1).unwrap();
        h.wallet.sync().unwrap();

        let twin = MintWallet::open(
            WalletConfig::default(),
            Some(MasterSeed::from_bytes([3u8; 32])),
            MintLedger::open_temporary().unwrap(),
            h.store.clone(),
            h.store.clone(),
        )
        .unwrap();
        let report = twin.sync().unwrap();
        assert_eq!(report.faults, 1);
        assert!(report.rebuild.is_some());
        assert_eq!(twin.list_unspent().mints.len(), 1);

        // The index minted elsewhere is not handed out again.
        let receipt = twin.mint_denomination(Denomination::Ten).unwrap();
        assert_eq!(receipt.index, 1);
    }

    #[test]
    fn reopen_holds_spends_still_in_the_mempool() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ChainStore::open_temporary().unwrap());
        let miner = DevnetMiner::new(store.clone());
        miner.ensure_genesis().unwrap();
        let open = || {
            MintWallet::open(
                WalletConfig::default(),
                Some(MasterSeed::from_bytes([3u8; 32])),
                MintLedger::open_path(dir.path()).unwrap(),
                store.clone(),
                store.clone(),
            )
            .unwrap()
        };

        let wallet = open();
        wallet.mint(2 * COIN).unwrap();
        miner.generate(1).unwrap();
        wallet.sync().unwrap();
        let first = wallet.spend(COIN, &DevnetProver).unwrap();
        drop(wallet);

        let wallet = open();
        assert_eq!(wallet.status().in_flight, 1);
        let second = wallet.spend(COIN, &DevnetProver).unwrap();
        assert_ne!(first.inputs, second.inputs);
    }

    #[test]
    fn watch_only_wallet_cannot_mint() {
        let store = Arc::new(ChainStore::open_temporary().unwrap());
        let wallet = MintWallet::open(
            WalletConfig::default(),
            None,
            MintLedger::open_temporary().unwrap(),
            store.clone(),
            store,
        )
        .unwrap();
        assert!(matches!(wallet.mint(COIN), Err(WalletError::SeedUnavailable)));
        assert!(matches!(wallet.zap(), Err(WalletError::SeedUnavailable)));
        assert!(wallet.status().seed_fingerprint.is_none());
    }

    #[test]
    fn invalid_amounts_are_rejected_before_anything_is_recorded() {
        let h = harness();
        assert!(matches!(h.wallet.mint(0), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(
            h.wallet.mint(COIN / 100),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(h.wallet.list_mints().is_empty());
    }

    #[test]
    fn devnet_prover_is_deterministic_and_binds_the_seed() {
        let deriver = SeedDeriver::new(MasterSeed::from_bytes([8u8; 32]));
        let builder = CommitmentBuilder::new();
        let seed = deriver.derive(0);
        let (commitment, serial) = builder.commit(&seed, Denomination::One).unwrap();
        let record = MintRecord::pending(0, Denomination::One, commitment, serial);

        let a = DevnetProver.prove(&record, &seed).unwrap();
        let b = DevnetProver.prove(&record, &seed).unwrap();
        let other = DevnetProver.prove(&record, &deriver.derive(1)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, other);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn status_reports_counts_and_fingerprint() {
        let h = harness();
        h.wallet.mint(COIN / 2).unwrap();
        let status = h.wallet.status();
        assert_eq!(status.health, WalletHealth::Ready);
        assert_eq!(status.counts.pending, 1);
        assert_eq!(status.unspent_value, 0);
        assert_eq!(
            status.seed_fingerprint,
            Some(MasterSeed::from_bytes([3u8; 32]).fingerprint())
        );
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["health"]["health"], "ready");
    }
}
