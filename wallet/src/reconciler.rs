//! # Reconciler — Zap and Rebuild
//!
//! Throws the ledger away and rebuilds it from the seed and the chain.
//!
//! ```text
//!            rebuild()                  ok
//!   Idle ──────────────▶ Rebuilding ──────────▶ Idle
//!    ▲                        │
//!    │        rebuild()       │ chain or store error
//!    └──────── Failed ◀───────┘
//! ```
//!
//! The state flips to `Rebuilding` before the ledger lock is taken, so a
//! mint arriving in between sees the flag and backs off instead of queueing
//! behind the rebuild. The write lock is then held from the clear until the
//! last record is in.
//!
//! A failed rebuild leaves the ledger empty with its rebuild marker set. The
//! old records are not restored. Calling `rebuild` again from `Failed`
//! starts over with a fresh clear.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{WalletError, WalletResult};
use crate::ledger::{LedgerWriter, MintLedger};
use crate::mint::{CommitmentBuilder, Denomination, SeedDeriver};
use crate::scanner::{ChainScanner, Recovery};

/// Where the reconciler is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconcilerState {
    /// No rebuild running. The ledger is whatever it last was.
    Idle,
    /// A rebuild owns the ledger.
    Rebuilding,
    /// The last rebuild failed. The ledger is empty until a retry succeeds.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl fmt::Display for ReconcilerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcilerState::Idle => f.write_str("idle"),
            ReconcilerState::Rebuilding => f.write_str("rebuilding"),
            ReconcilerState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Why a rebuild was started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebuildTrigger {
    /// Asked for by the operator, such as a zap flag at startup.
    Operator,
    /// The wallet noticed its cache disagrees with the chain.
    ConsistencyFault(String),
    /// A previous rebuild never finished.
    Interrupted,
}

impl fmt::Display for RebuildTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildTrigger::Operator => f.write_str("operator request"),
            RebuildTrigger::ConsistencyFault(why) => write!(f, "consistency fault: {why}"),
            RebuildTrigger::Interrupted => f.write_str("interrupted rebuild"),
        }
    }
}

/// Summary of a completed rebuild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Why it ran.
    pub trigger: String,
    /// When the clear happened.
    pub started_at: DateTime<Utc>,
    /// When the ledger became ready again.
    pub finished_at: DateTime<Utc>,
    /// Records dropped by the clear.
    pub cleared: usize,
    /// Records written back.
    pub recovered: usize,
    /// Of those, confirmed and unspent.
    pub confirmed: usize,
    /// Of those, spent.
    pub spent: usize,
    /// Of those, pending.
    pub pending: usize,
    /// Unused indices below the highest used one, kept as pending
    /// placeholders so the index sequence has no holes.
    pub placeholders: usize,
    /// Indices whose spend was broadcast but is not in a block yet.
    pub in_flight: Vec<u32>,
    /// Indices derived while probing.
    pub probed: u32,
    /// Blocks read.
    pub blocks_scanned: u64,
    /// Chain height the ledger is now current to.
    pub tip_height: Option<u64>,
}

/// Runs rebuilds and tracks their state.
#[derive(Debug)]
pub struct Reconciler {
    state: Mutex<ReconcilerState>,
    gap_limit: u32,
    start_height: u64,
}

impl Reconciler {
    /// Reconciler probing up to `gap_limit` unused indices past the last
    /// used one, scanning from `start_height`.
    pub fn new(gap_limit: u32, start_height: u64) -> Self {
        Self {
            state: Mutex::new(ReconcilerState::Idle),
            gap_limit: gap_limit.max(1),
            start_height,
        }
    }

    /// Current state.
    pub fn state(&self) -> ReconcilerState {
        self.state.lock().clone()
    }

    /// True while a rebuild holds the ledger.
    pub fn is_rebuilding(&self) -> bool {
        *self.state.lock() == ReconcilerState::Rebuilding
    }

    /// True when the last rebuild failed.
    pub fn is_failed(&self) -> bool {
        matches!(*self.state.lock(), ReconcilerState::Failed { .. })
    }

    /// Configured gap limit.
    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    /// Clear `ledger` and repopulate it from chain evidence.
    ///
    /// # Errors
    ///
    /// - [`WalletError::RebuildInProgress`] if another rebuild is running.
    /// - [`WalletError::ChainUnavailable`] if chain data could not be read
    ///   or failed its checks. The reconciler is then `Failed`.
    pub fn rebuild(
        &self,
        ledger: &MintLedger,
        scanner: &ChainScanner,
        deriver: &SeedDeriver,
        builder: &CommitmentBuilder,
        trigger: RebuildTrigger,
    ) -> WalletResult<ReconcileReport> {
        {
            let mut state = self.state.lock();
            if *state == ReconcilerState::Rebuilding {
                return Err(WalletError::RebuildInProgress);
            }
            *state = ReconcilerState::Rebuilding;
        }
        match &trigger {
            RebuildTrigger::Operator => info!(%trigger, "mint ledger rebuild starting"),
            _ => warn!(%trigger, "mint ledger rebuild starting"),
        }

        let result = self.run(ledger, scanner, deriver, builder, &trigger);

        let mut state = self.state.lock();
        match result {
            Ok(report) => {
                *state = ReconcilerState::Idle;
                info!(
                    recovered = report.recovered,
                    confirmed = report.confirmed,
                    spent = report.spent,
                    pending = report.pending,
                    tip = ?report.tip_height,
                    "mint ledger rebuilt"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "mint ledger rebuild failed, wallet is read-only");
                *state = ReconcilerState::Failed {
                    reason: e.to_string(),
                };
                Err(e)
            }
        }
    }

    fn run(
        &self,
        ledger: &MintLedger,
        scanner: &ChainScanner,
        deriver: &SeedDeriver,
        builder: &CommitmentBuilder,
        trigger: &RebuildTrigger,
    ) -> WalletResult<ReconcileReport> {
        let mut writer = ledger.write();
        let started_at = Utc::now();
        let cleared = writer.len();
        writer.clear_all()?;

        let recovery = scanner.recover(deriver, builder, self.gap_limit, self.start_height)?;
        let placeholders = repopulate(&mut writer, &recovery, deriver, builder)?;
        writer.finish_rebuild(recovery.tip)?;

        let counts = writer.counts();
        Ok(ReconcileReport {
            trigger: trigger.to_string(),
            started_at,
            finished_at: Utc::now(),
            cleared,
            recovered: writer.len(),
            confirmed: counts.confirmed,
            spent: counts.spent,
            pending: counts.pending,
            placeholders,
            in_flight: recovery
                .mints
                .iter()
                .filter(|m| m.spend_pending)
                .map(|m| m.index)
                .collect(),
            probed: recovery.probed,
            blocks_scanned: recovery.blocks_scanned,
            tip_height: recovery.tip.map(|t| t.height),
        })
    }
}

/// Write recovered mints back in index order. Returns the number of
/// placeholders inserted for unused interior indices.
///
/// The chain holds nothing for an unused index, so its placeholder takes the
/// smallest denomination whatever was requested there before the clear.
fn repopulate(
    writer: &mut LedgerWriter<'_>,
    recovery: &Recovery,
    deriver: &SeedDeriver,
    builder: &CommitmentBuilder,
) -> WalletResult<usize> {
    let mut placeholders = 0;
    let mut next: u32 = 0;

    for mint in &recovery.mints {
        while next < mint.index {
            let filler = Denomination::smallest();
            let (commitment, serial) = builder.commit(&deriver.derive(next), filler)?;
            writer.record_pending(next, filler, commitment, serial)?;
            placeholders += 1;
            next += 1;
        }

        writer.record_pending(mint.index, mint.denomination, mint.commitment, mint.serial)?;
        if let Some(height) = mint.confirmed_height {
            writer.mark_confirmed(&mint.commitment, height)?;
        }
        if let Some(height) = mint.spent_height {
            writer.mark_spent(&mint.serial, height)?;
        }
        next = match mint.index.checked_add(1) {
            Some(n) => n,
            None => break,
        };
    }

    if placeholders > 0 {
        warn!(placeholders, "unused indices below the last mint kept as pending");
    }
    Ok(placeholders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{
        BlockRef, Broadcaster, ChainBlock, ChainError, ChainResult, ChainSource, ChainStore,
        DevnetMiner, MintOutput,
    };
    use crate::ledger::{LedgerStatus, MintState};
    use crate::mint::MasterSeed;
    use std::sync::Arc;

    struct BrokenChain;

    impl ChainSource for BrokenChain {
        fn tip(&self) -> ChainResult<Option<BlockRef>> {
            Err(ChainError::Unavailable("disk gone".to_string()))
        }
        fn block_hash(&self, _height: u64) -> ChainResult<Option<[u8; 32]>> {
            Err(ChainError::Unavailable("disk gone".to_string()))
        }
        fn blocks(&self, _from: u64, _to: u64) -> ChainResult<Vec<ChainBlock>> {
            Err(ChainError::Unavailable("disk gone".to_string()))
        }
    }

    fn deriver() -> SeedDeriver {
        SeedDeriver::new(MasterSeed::from_bytes([11u8; 32]))
    }

    fn publish(store: &ChainStore, index: u32, denomination: Denomination) {
        let (commitment, _) = CommitmentBuilder::new()
            .commit(&deriver().derive(index), denomination)
            .unwrap();
        store
            .broadcast_mint(MintOutput {
                commitment,
                denomination,
            })
            .unwrap();
    }

    #[test]
    fn rebuild_restores_confirmed_mints() {
        let store = Arc::new(ChainStore::open_temporary().unwrap());
        let miner = DevnetMiner::new(store.clone());
        miner.ensure_genesis().unwrap();
        publish(&store, 0, Denomination::One);
        publish(&store, 1, Denomination::Ten);
        miner.generate(1).unwrap();

        let ledger = MintLedger::open_temporary().unwrap();
        let scanner = ChainScanner::new(store, 50);
        let reconciler = Reconciler::new(5, 0);

        let report = reconciler
            .rebuild(&ledger, &scanner, &deriver(), &CommitmentBuilder::new(), RebuildTrigger::Operator)
            .unwrap();
        assert_eq!(report.recovered, 2);
        assert_eq!(report.confirmed, 2);
        assert_eq!(report.placeholders, 0);
        assert_eq!(report.tip_height, Some(1));
        assert_eq!(reconciler.state(), ReconcilerState::Idle);
        assert_eq!(ledger.status(), LedgerStatus::Ready);
        assert_eq!(ledger.list_unspent().len(), 2);
    }

    #[test]
    fn interior_gaps_become_pending_placeholders() {
        let store = Arc::new(ChainStore::open_temporary().unwrap());
        let miner = DevnetMiner::new(store.clone());
        miner.ensure_genesis().unwrap();
        publish(&store, 0, Denomination::One);
        publish(&store, 3, Denomination::One);
        miner.generate(1).unwrap();

        let ledger = MintLedger::open_temporary().unwrap();
        let report = Reconciler::new(5, 0)
            .rebuild(
                &ledger,
                &ChainScanner::new(store, 50),
                &deriver(),
                &CommitmentBuilder::new(),
                RebuildTrigger::Operator,
            )
            .unwrap();

        assert_eq!(report.placeholders, 2);
        let view = ledger.read();
        assert!(view.is_contiguous());
        assert_eq!(view.len(), 4);
        assert_eq!(view.get(1).unwrap().state, MintState::Pending);
        assert_eq!(view.get(1).unwrap().denomination, Denomination::smallest());
        assert_eq!(view.next_index().unwrap(), 4);
    }

    #[test]
    fn chain_failure_leaves_ledger_empty_and_failed() {
        let ledger = MintLedger::open_temporary().unwrap();
        {
            let mut w = ledger.write();
            let (c, s) = CommitmentBuilder::new()
                .commit(&deriver().derive(0), Denomination::Half)
                .unwrap();
            w.record_pending(0, Denomination::Half, c, s).unwrap();
        }

        let reconciler = Reconciler::new(5, 0);
        let err = reconciler
            .rebuild(
                &ledger,
                &ChainScanner::new(Arc::new(BrokenChain), 10),
                &deriver(),
                &CommitmentBuilder::new(),
                RebuildTrigger::Operator,
            )
            .unwrap_err();

        assert!(matches!(err, WalletError::ChainUnavailable(_)));
        assert!(reconciler.is_failed());
        assert!(ledger.read().is_empty());
        assert_eq!(ledger.status(), LedgerStatus::RebuildRequired);
    }

    #[test]
    fn retry_after_failure_is_allowed() {
        let ledger = MintLedger::open_temporary().unwrap();
        let reconciler = Reconciler::new(3, 0);
        let builder = CommitmentBuilder::new();

        let broken = ChainScanner::new(Arc::new(BrokenChain), 10);
        assert!(reconciler
            .rebuild(&ledger, &broken, &deriver(), &builder, RebuildTrigger::Operator)
            .is_err());

        let store = Arc::new(ChainStore::open_temporary().unwrap());
        let healthy = ChainScanner::new(store, 10);
        reconciler
            .rebuild(&ledger, &healthy, &deriver(), &builder, RebuildTrigger::Interrupted)
            .unwrap();
        assert_eq!(reconciler.state(), ReconcilerState::Idle);
        assert_eq!(ledger.status(), LedgerStatus::Ready);
    }

    #[test]
    fn state_serializes_with_tag() {
        let failed = ReconcilerState::Failed {
            reason: "x".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "x");
        assert_eq!(ReconcilerState::Idle.to_string(), "idle");
    }
}
