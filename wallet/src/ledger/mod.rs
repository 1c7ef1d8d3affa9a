//! # Mint Ledger
//!
//! The wallet's record of every mint it has derived, and the only cache of
//! chain state it keeps.
//!
//! ## Concurrency
//!
//! One `parking_lot::RwLock` guards the in-memory view. Readers take
//! [`MintLedger::read`] and see a consistent snapshot. Every mutation goes
//! through a [`LedgerWriter`], which holds the write guard for as long as it
//! lives, so a caller that needs several mutations to appear as one (a block
//! of events, or a whole rebuild) simply keeps its writer.
//!
//! Each mutation is persisted before the in-memory view changes. A failed
//! write leaves both untouched.
//!
//! ## Invariants
//!
//! - Indices are exactly `0..n`: [`LedgerWriter::record_pending`] only
//!   accepts the next index.
//! - Commitments and serials are unique across records.
//! - States only move forward. [`LedgerWriter::clear_all`] is the one way
//!   back.

pub mod record;
pub mod store;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::path::Path;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::chain::BlockRef;
use crate::error::{WalletError, WalletResult};
use crate::mint::{Denomination, MintCommitment, SeedDeriver, SerialNumber};
use crate::scanner::ScanEvent;

pub use record::{MintRecord, MintState};
pub use store::{LedgerStore, StoreError};

// ---------------------------------------------------------------------------
// Status & snapshots
// ---------------------------------------------------------------------------

/// Whether the persisted ledger can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Records reflect the chain up to the scan tip.
    Ready,
    /// A rebuild cleared the ledger without finishing, or the stored indexes
    /// disagree with the records. Only a rebuild makes it usable again.
    RebuildRequired,
}

/// Record counts per state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounts {
    /// Pending records.
    pub pending: usize,
    /// Confirmed, unspent records.
    pub confirmed: usize,
    /// Spent records.
    pub spent: usize,
}

/// What one block did to the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    /// Records moved to `Confirmed`.
    pub confirmed: usize,
    /// Records moved to `Spent`.
    pub spent: usize,
    /// Commitments reported as ours that no record matches.
    pub faults: usize,
}

/// In-memory view of the ledger.
#[derive(Debug)]
pub struct LedgerState {
    records: BTreeMap<u32, MintRecord>,
    by_commitment: HashMap<MintCommitment, u32>,
    by_serial: HashMap<SerialNumber, u32>,
    scan_tip: Option<BlockRef>,
    status: LedgerStatus,
}

impl LedgerState {
    fn empty(status: LedgerStatus) -> Self {
        Self {
            records: BTreeMap::new(),
            by_commitment: HashMap::new(),
            by_serial: HashMap::new(),
            scan_tip: None,
            status,
        }
    }

    fn insert(&mut self, record: MintRecord) {
        self.by_commitment.insert(record.commitment, record.index);
        self.by_serial.insert(record.serial, record.index);
        self.records.insert(record.index, record);
    }

    /// Record at `index`.
    pub fn get(&self, index: u32) -> Option<&MintRecord> {
        self.records.get(&index)
    }

    /// All records, ascending by index.
    pub fn records(&self) -> impl Iterator<Item = &MintRecord> + '_ {
        self.records.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Confirmed, unspent records in ascending index order.
    pub fn list_unspent(&self) -> Vec<MintRecord> {
        self.records
            .values()
            .filter(|r| r.is_spendable())
            .cloned()
            .collect()
    }

    /// Total value of confirmed, unspent records.
    pub fn unspent_value(&self) -> u64 {
        self.records
            .values()
            .filter(|r| r.is_spendable())
            .map(MintRecord::value)
            .sum()
    }

    /// Record counts per state.
    pub fn counts(&self) -> LedgerCounts {
        let mut counts = LedgerCounts::default();
        for r in self.records.values() {
            match r.state {
                MintState::Pending => counts.pending += 1,
                MintState::Confirmed => counts.confirmed += 1,
                MintState::Spent => counts.spent += 1,
            }
        }
        counts
    }

    /// Next index to derive: one past the highest, or 0.
    pub fn next_index(&self) -> WalletResult<u32> {
        SeedDeriver::next_index(self.records.keys().next_back().copied())
    }

    /// True when the indices are exactly `0..len`.
    pub fn is_contiguous(&self) -> bool {
        self.records
            .keys()
            .enumerate()
            .all(|(position, index)| position as u64 == u64::from(*index))
    }

    /// Record holding `commitment`.
    pub fn find_by_commitment(&self, commitment: &MintCommitment) -> Option<&MintRecord> {
        self.by_commitment
            .get(commitment)
            .and_then(|i| self.records.get(i))
    }

    /// Record holding `serial`.
    pub fn find_by_serial(&self, serial: &SerialNumber) -> Option<&MintRecord> {
        self.by_serial.get(serial).and_then(|i| self.records.get(i))
    }

    /// Last applied block.
    pub fn scan_tip(&self) -> Option<BlockRef> {
        self.scan_tip
    }

    /// Trust status.
    pub fn status(&self) -> LedgerStatus {
        self.status
    }
}

// ---------------------------------------------------------------------------
// MintLedger
// ---------------------------------------------------------------------------

/// Persisted mint records behind a single-writer lock.
#[derive(Debug)]
pub struct MintLedger {
    store: LedgerStore,
    state: RwLock<LedgerState>,
}

impl MintLedger {
    /// Load a ledger from `store`.
    ///
    /// An unfinished rebuild or an index inconsistency opens the ledger in
    /// [`LedgerStatus::RebuildRequired`].
    pub fn open(store: LedgerStore) -> WalletResult<Self> {
        let loaded = store.load()?;

        let mut status = LedgerStatus::Ready;
        if loaded.rebuild_in_progress {
            warn!(records = loaded.records.len(), "previous rebuild did not finish");
            status = LedgerStatus::RebuildRequired;
        }
        if let Some(fault) = &loaded.index_fault {
            warn!(%fault, "ledger indexes inconsistent");
            status = LedgerStatus::RebuildRequired;
        }

        let mut state = LedgerState::empty(status);
        for record in loaded.records {
            state.insert(record);
        }
        state.scan_tip = loaded.scan_tip;

        if !state.is_contiguous() {
            warn!(records = state.len(), "ledger indices have gaps");
            state.status = LedgerStatus::RebuildRequired;
        }

        info!(
            records = state.len(),
            scan_tip = ?state.scan_tip.map(|t| t.height),
            status = ?state.status,
            "mint ledger opened"
        );
        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    /// Open the ledger stored at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P) -> WalletResult<Self> {
        Self::open(LedgerStore::open(path)?)
    }

    /// Ledger over a temporary store. For tests.
    pub fn open_temporary() -> WalletResult<Self> {
        Self::open(LedgerStore::open_temporary()?)
    }

    /// Shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read()
    }

    /// Exclusive write access. Blocks until available.
    pub fn write(&self) -> LedgerWriter<'_> {
        LedgerWriter {
            store: &self.store,
            state: self.state.write(),
        }
    }

    /// Exclusive write access if nobody else holds the lock.
    pub fn try_write(&self) -> Option<LedgerWriter<'_>> {
        self.state.try_write().map(|state| LedgerWriter {
            store: &self.store,
            state,
        })
    }

    /// Confirmed, unspent records in ascending index order.
    pub fn list_unspent(&self) -> Vec<MintRecord> {
        self.read().list_unspent()
    }

    /// Trust status.
    pub fn status(&self) -> LedgerStatus {
        self.read().status()
    }

    /// Last applied block.
    pub fn scan_tip(&self) -> Option<BlockRef> {
        self.read().scan_tip()
    }
}

// ---------------------------------------------------------------------------
// LedgerWriter
// ---------------------------------------------------------------------------

/// Holds the ledger's write lock. Dropping it releases the lock.
pub struct LedgerWriter<'a> {
    store: &'a LedgerStore,
    state: RwLockWriteGuard<'a, LedgerState>,
}

impl Deref for LedgerWriter<'_> {
    type Target = LedgerState;

    fn deref(&self) -> &LedgerState {
        &self.state
    }
}

impl LedgerWriter<'_> {
    /// Insert a new `Pending` record.
    ///
    /// # Errors
    ///
    /// - [`WalletError::DuplicateIndex`] if `index` already exists.
    /// - [`WalletError::IndexGap`] if `index` is not the next index.
    /// - [`WalletError::CommitmentCollision`] if another record holds the
    ///   same commitment or serial.
    pub fn record_pending(
        &mut self,
        index: u32,
        denomination: Denomination,
        commitment: MintCommitment,
        serial: SerialNumber,
    ) -> WalletResult<()> {
        if self.state.records.contains_key(&index) {
            return Err(WalletError::DuplicateIndex(index));
        }
        let expected = self.state.next_index()?;
        if index != expected {
            return Err(WalletError::IndexGap { index, expected });
        }
        let existing = self
            .state
            .by_commitment
            .get(&commitment)
            .or_else(|| self.state.by_serial.get(&serial))
            .copied();
        if let Some(existing) = existing {
            error!(index, existing, %commitment, "derived values collide");
            return Err(WalletError::CommitmentCollision { index, existing });
        }

        let record = MintRecord::pending(index, denomination, commitment, serial);
        self.store.insert_record(&record)?;
        debug!(index, %denomination, %commitment, "mint recorded as pending");
        self.state.insert(record);
        Ok(())
    }

    /// Move the record holding `commitment` to `Confirmed` at `height`.
    ///
    /// Returns `Ok(false)` if the record was already confirmed or spent.
    ///
    /// # Errors
    ///
    /// [`WalletError::UnknownCommitment`] if no record matches. Logged as a
    /// consistency fault.
    pub fn mark_confirmed(&mut self, commitment: &MintCommitment, height: u64) -> WalletResult<bool> {
        let Some(index) = self.state.by_commitment.get(commitment).copied() else {
            warn!(%commitment, height, "confirmation for unknown commitment");
            return Err(WalletError::UnknownCommitment(*commitment));
        };
        self.update(index, |r| r.confirm(height))
    }

    /// Move the record holding `serial` to `Spent` at `height`.
    ///
    /// Serials belonging to nobody in this ledger are ignored and return
    /// `Ok(false)`, as does a record that is already spent.
    pub fn mark_spent(&mut self, serial: &SerialNumber, height: u64) -> WalletResult<bool> {
        let Some(index) = self.state.by_serial.get(serial).copied() else {
            return Ok(false);
        };
        self.update(index, |r| r.spend(height))
    }

    fn update<F>(&mut self, index: u32, transition: F) -> WalletResult<bool>
    where
        F: FnOnce(&mut MintRecord) -> bool,
    {
        let Some(current) = self.state.records.get(&index) else {
            return Ok(false);
        };
        let mut next = current.clone();
        if !transition(&mut next) {
            return Ok(false);
        }
        self.store.write_records(std::slice::from_ref(&next), None)?;
        debug!(index, state = %next.state, "mint state advanced");
        self.state.records.insert(index, next);
        Ok(true)
    }

    /// Apply every event of one block and advance the scan tip, as a single
    /// persisted step.
    ///
    /// Commitments are applied before serials, so a coin minted and spent in
    /// the same block ends up `Spent`. Unknown commitments are counted as
    /// faults and do not stop the block.
    pub fn apply_block(&mut self, block: BlockRef, events: &[ScanEvent]) -> WalletResult<BlockOutcome> {
        let mut outcome = BlockOutcome::default();
        let mut staged: BTreeMap<u32, MintRecord> = BTreeMap::new();
        let state = &*self.state;

        let commitments = events.iter().filter_map(|e| match e {
            ScanEvent::CommitmentSeen { commitment, height } => Some((commitment, *height)),
            ScanEvent::SerialSeen { .. } => None,
        });
        for (commitment, height) in commitments {
            let Some(index) = state.by_commitment.get(commitment).copied() else {
                warn!(%commitment, height, "confirmation for unknown commitment");
                outcome.faults += 1;
                continue;
            };
            let Some(record) = stage(&mut staged, &state.records, index) else {
                continue;
            };
            if record.confirm(height) {
                outcome.confirmed += 1;
            }
        }

        let serials = events.iter().filter_map(|e| match e {
            ScanEvent::SerialSeen { serial, height } => Some((serial, *height)),
            ScanEvent::CommitmentSeen { .. } => None,
        });
        for (serial, height) in serials {
            let Some(index) = state.by_serial.get(serial).copied() else {
                continue;
            };
            let Some(record) = stage(&mut staged, &state.records, index) else {
                continue;
            };
            if record.spend(height) {
                outcome.spent += 1;
            }
        }

        let advance_tip = state.scan_tip.map_or(true, |tip| block.height >= tip.height);
        let changed: Vec<MintRecord> = staged.into_values().collect();
        if changed.is_empty() && !advance_tip {
            return Ok(outcome);
        }

        self.store
            .write_records(&changed, advance_tip.then_some(block))?;
        for record in changed {
            self.state.records.insert(record.index, record);
        }
        if advance_tip {
            self.state.scan_tip = Some(block);
        }

        if outcome.confirmed + outcome.spent > 0 {
            debug!(
                height = block.height,
                confirmed = outcome.confirmed,
                spent = outcome.spent,
                "block applied"
            );
        }
        Ok(outcome)
    }

    /// Delete every record and mark the ledger as mid-rebuild.
    pub fn clear_all(&mut self) -> WalletResult<()> {
        let dropped = self.state.len();
        self.store.clear_all()?;
        *self.state = LedgerState::empty(LedgerStatus::RebuildRequired);
        info!(dropped, "mint ledger cleared");
        Ok(())
    }

    /// Mark a rebuild complete at `tip`.
    pub fn finish_rebuild(&mut self, tip: Option<BlockRef>) -> WalletResult<()> {
        self.store.finish_rebuild(tip)?;
        self.state.scan_tip = tip;
        self.state.status = LedgerStatus::Ready;
        Ok(())
    }
}

/// Working copy of `index` for a block being applied.
fn stage<'s>(
    staged: &'s mut BTreeMap<u32, MintRecord>,
    records: &BTreeMap<u32, MintRecord>,
    index: u32,
) -> Option<&'s mut MintRecord> {
    match staged.entry(index) {
        Entry::Occupied(entry) => Some(entry.into_mut()),
        Entry::Vacant(entry) => records.get(&index).map(|r| entry.insert(r.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment(i: u32) -> MintCommitment {
        let mut b = [0u8; 32];
        b[..4].copy_from_slice(&i.to_be_bytes());
        MintCommitment::from_bytes(b)
    }

    fn serial(i: u32) -> SerialNumber {
        let mut b = [0xffu8; 32];
        b[..4].copy_from_slice(&i.to_be_bytes());
        SerialNumber::from_bytes(b)
    }

    fn block(height: u64) -> BlockRef {
        BlockRef {
            height,
            hash: [height as u8; 32],
        }
    }

    fn ledger_with(n: u32) -> MintLedger {
        let ledger = MintLedger::open_temporary().unwrap();
        {
            let mut w = ledger.write();
            for i in 0..n {
                w.record_pending(i, Denomination::One, commitment(i), serial(i))
                    .unwrap();
            }
        }
        ledger
    }

    #[test]
    fn record_pending_enforces_sequence_and_uniqueness() {
        let ledger = ledger_with(2);
        let mut w = ledger.write();

        assert!(matches!(
            w.record_pending(1, Denomination::One, commitment(9), serial(9)),
            Err(WalletError::DuplicateIndex(1))
        ));
        assert!(matches!(
            w.record_pending(5, Denomination::One, commitment(5), serial(5)),
            Err(WalletError::IndexGap { index: 5, expected: 2 })
        ));
        assert!(matches!(
            w.record_pending(2, Denomination::One, commitment(0), serial(2)),
            Err(WalletError::CommitmentCollision { index: 2, existing: 0 })
        ));
        assert_eq!(w.next_index().unwrap(), 2);
        assert!(w.is_contiguous());
    }

    #[test]
    fn pending_records_are_not_unspent() {
        let ledger = ledger_with(3);
        assert!(ledger.list_unspent().is_empty());

        let mut w = ledger.write();
        assert!(w.mark_confirmed(&commitment(2), 10).unwrap());
        assert!(w.mark_confirmed(&commitment(0), 11).unwrap());
        drop(w);

        let unspent = ledger.list_unspent();
        assert_eq!(unspent.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(unspent[1].confirmed_height, Some(10));
    }

    #[test]
    fn transitions_are_idempotent() {
        let ledger = ledger_with(1);
        let mut w = ledger.write();
        assert!(w.mark_confirmed(&commitment(0), 5).unwrap());
        assert!(!w.mark_confirmed(&commitment(0), 6).unwrap());
        assert!(w.mark_spent(&serial(0), 7).unwrap());
        assert!(!w.mark_spent(&serial(0), 8).unwrap());
        assert!(!w.mark_confirmed(&commitment(0), 9).unwrap());

        let r = w.get(0).unwrap();
        assert_eq!(r.state, MintState::Spent);
        assert_eq!(r.confirmed_height, Some(5));
        assert_eq!(r.spent_height, Some(7));
    }

    #[test]
    fn unknown_commitment_errors_unknown_serial_is_ignored() {
        let ledger = ledger_with(1);
        let mut w = ledger.write();
        assert!(matches!(
            w.mark_confirmed(&commitment(42), 1),
            Err(WalletError::UnknownCommitment(_))
        ));
        assert!(!w.mark_spent(&serial(42), 1).unwrap());
    }

    #[test]
    fn apply_block_confirms_then_spends_and_moves_tip() {
        let ledger = ledger_with(3);
        let events = vec![
            ScanEvent::SerialSeen { serial: serial(1), height: 4 },
            ScanEvent::CommitmentSeen { commitment: commitment(0), height: 4 },
            ScanEvent::CommitmentSeen { commitment: commitment(1), height: 4 },
            ScanEvent::CommitmentSeen { commitment: commitment(77), height: 4 },
            ScanEvent::SerialSeen { serial: serial(99), height: 4 },
        ];
        let outcome = ledger.write().apply_block(block(4), &events).unwrap();
        assert_eq!(outcome, BlockOutcome { confirmed: 2, spent: 1, faults: 1 });

        let view = ledger.read();
        assert_eq!(view.scan_tip(), Some(block(4)));
        assert_eq!(view.get(0).unwrap().state, MintState::Confirmed);
        assert_eq!(view.get(1).unwrap().state, MintState::Spent);
        assert_eq!(view.get(2).unwrap().state, MintState::Pending);
        assert_eq!(
            view.counts(),
            LedgerCounts { pending: 1, confirmed: 1, spent: 1 }
        );
    }

    #[test]
    fn reapplying_an_old_block_changes_nothing() {
        let ledger = ledger_with(1);
        let events = vec![ScanEvent::CommitmentSeen { commitment: commitment(0), height: 2 }];
        ledger.write().apply_block(block(2), &events).unwrap();
        ledger.write().apply_block(block(3), &[]).unwrap();

        let outcome = ledger.write().apply_block(block(2), &events).unwrap();
        assert_eq!(outcome, BlockOutcome::default());
        assert_eq!(ledger.scan_tip(), Some(block(3)));
        assert_eq!(ledger.read().get(0).unwrap().confirmed_height, Some(2));
    }

    #[test]
    fn clear_and_finish_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = MintLedger::open_path(dir.path()).unwrap();
            let mut w = ledger.write();
            w.record_pending(0, Denomination::Ten, commitment(0), serial(0))
                .unwrap();
            w.clear_all().unwrap();
            assert!(w.is_empty());
            assert_eq!(w.status(), LedgerStatus::RebuildRequired);
        }

        let ledger = MintLedger::open_path(dir.path()).unwrap();
        assert_eq!(ledger.status(), LedgerStatus::RebuildRequired);
        ledger.write().finish_rebuild(Some(block(8))).unwrap();
        drop(ledger);

        let ledger = MintLedger::open_path(dir.path()).unwrap();
        assert_eq!(ledger.status(), LedgerStatus::Ready);
        assert_eq!(ledger.scan_tip(), Some(block(8)));
    }

    #[test]
    fn try_write_fails_while_writer_is_held() {
        let ledger = ledger_with(0);
        let held = ledger.write();
        assert!(ledger.try_write().is_none());
        drop(held);
        assert!(ledger.try_write().is_some());
    }

    #[test]
    fn unspent_value_sums_confirmed_only() {
        let ledger = ledger_with(3);
        let mut w = ledger.write();
        w.mark_confirmed(&commitment(0), 1).unwrap();
        w.mark_confirmed(&commitment(1), 1).unwrap();
        w.mark_spent(&serial(1), 2).unwrap();
        assert_eq!(w.unspent_value(), Denomination::One.units());
    }
}
