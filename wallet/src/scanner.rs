//! # Chain Scanner
//!
//! Walks blocks from a [`ChainSource`] and reports what matters to this
//! wallet. Two modes:
//!
//! - **Ordinary** ([`ChainScanner::scan`]): match each block against a
//!   [`WatchSet`] of commitments and serials the ledger already knows, and
//!   hand the events to the caller one block at a time.
//! - **Recovery** ([`ChainScanner::recover`]): know nothing, derive
//!   candidates from the seed. Index the chain once, then probe indices
//!   `0, 1, 2, …` across every denomination until `gap_limit` indices in a
//!   row turn up nothing.
//!
//! Both modes check that consecutive blocks link by parent hash. A break is
//! [`ChainError::Corrupt`] and aborts the scan.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chain::{BlockRef, ChainBlock, ChainError, ChainSource};
use crate::error::WalletResult;
use crate::ledger::{LedgerState, MintState};
use crate::mint::{CommitmentBuilder, Denomination, MintCommitment, SeedDeriver, SerialNumber};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something in a block that concerns this wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanEvent {
    /// A watched commitment was published.
    CommitmentSeen {
        /// The commitment.
        commitment: MintCommitment,
        /// Block height.
        height: u64,
    },
    /// A watched serial was revealed.
    SerialSeen {
        /// The serial number.
        serial: SerialNumber,
        /// Block height.
        height: u64,
    },
}

/// All events from one block. Empty blocks still produce one of these so
/// the caller can advance its scan tip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEvents {
    /// The block.
    pub block: BlockRef,
    /// Events in block order, mints first.
    pub events: Vec<ScanEvent>,
}

/// Commitments and serials an ordinary scan looks for.
#[derive(Clone, Debug, Default)]
pub struct WatchSet {
    commitments: HashSet<MintCommitment>,
    serials: HashSet<SerialNumber>,
}

impl WatchSet {
    /// Empty watch set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch set for a ledger: commitments still awaiting confirmation and
    /// serials of every coin not yet spent.
    pub fn from_ledger(state: &LedgerState) -> Self {
        let mut watch = Self::new();
        for record in state.records() {
            match record.state {
                MintState::Pending => {
                    watch.commitments.insert(record.commitment);
                    watch.serials.insert(record.serial);
                }
                MintState::Confirmed => {
                    watch.serials.insert(record.serial);
                }
                MintState::Spent => {}
            }
        }
        watch
    }

    /// Watch a commitment.
    pub fn watch_commitment(&mut self, commitment: MintCommitment) {
        self.commitments.insert(commitment);
    }

    /// Watch a serial.
    pub fn watch_serial(&mut self, serial: SerialNumber) {
        self.serials.insert(serial);
    }

    /// True when nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty() && self.serials.is_empty()
    }

    fn events_for(&self, block: &ChainBlock) -> Vec<ScanEvent> {
        let height = block.height();
        let mints = block
            .mints
            .iter()
            .filter(|m| self.commitments.contains(&m.commitment))
            .map(|m| ScanEvent::CommitmentSeen {
                commitment: m.commitment,
                height,
            });
        let spends = block
            .spends
            .iter()
            .filter(|s| self.serials.contains(&s.serial))
            .map(|s| ScanEvent::SerialSeen {
                serial: s.serial,
                height,
            });
        mints.chain(spends).collect()
    }
}

/// Totals from an ordinary scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Blocks visited.
    pub blocks: u64,
    /// Events emitted.
    pub events: usize,
    /// Last block visited.
    pub last: Option<BlockRef>,
}

// ---------------------------------------------------------------------------
// Recovery results
// ---------------------------------------------------------------------------

/// One derivation index found to be in use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveredMint {
    /// Derivation index.
    pub index: u32,
    /// Denomination whose commitment was found.
    pub denomination: Denomination,
    /// The commitment.
    pub commitment: MintCommitment,
    /// The serial number.
    pub serial: SerialNumber,
    /// Height the commitment was published, `None` if only in the mempool.
    pub confirmed_height: Option<u64>,
    /// Height the serial was revealed, if spent.
    pub spent_height: Option<u64>,
    /// The serial sits in the mempool: a spend was broadcast but is not in a
    /// block yet.
    pub spend_pending: bool,
}

/// Result of a recovery scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Indices in use, ascending.
    pub mints: Vec<RecoveredMint>,
    /// Indices probed, including the trailing gap.
    pub probed: u32,
    /// Chain tip the scan indexed up to.
    pub tip: Option<BlockRef>,
    /// Blocks indexed.
    pub blocks_scanned: u64,
}

/// Everything on chain a recovery probe can match against.
#[derive(Default)]
struct ChainIndex {
    commitments: HashMap<MintCommitment, (u64, Denomination)>,
    serials: HashMap<SerialNumber, u64>,
    mempool: HashMap<MintCommitment, Denomination>,
    mempool_serials: HashSet<SerialNumber>,
}

// ---------------------------------------------------------------------------
// ChainScanner
// ---------------------------------------------------------------------------

/// Reads blocks in batches and classifies their contents.
#[derive(Clone)]
pub struct ChainScanner {
    source: Arc<dyn ChainSource>,
    batch_size: u64,
}

impl std::fmt::Debug for ChainScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainScanner")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl ChainScanner {
    /// Scanner over `source`, fetching `batch_size` blocks per query.
    pub fn new(source: Arc<dyn ChainSource>, batch_size: u64) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
        }
    }

    /// The chain being scanned.
    pub fn source(&self) -> &Arc<dyn ChainSource> {
        &self.source
    }

    /// Visit blocks `from..=to` in order, linkage-checked.
    fn walk<F>(&self, from: u64, to: u64, mut visit: F) -> WalletResult<u64>
    where
        F: FnMut(&ChainBlock) -> WalletResult<()>,
    {
        if from > to {
            return Ok(0);
        }

        let mut parent = match from.checked_sub(1) {
            Some(prev) => self.source.block_hash(prev)?,
            None => None,
        };
        let mut visited = 0u64;
        let mut start = from;

        while start <= to {
            let end = start.saturating_add(self.batch_size - 1).min(to);
            let blocks = self.source.blocks(start, end)?;
            if blocks.len() as u64 != end - start + 1 {
                return Err(ChainError::Missing(start + blocks.len() as u64).into());
            }

            for block in &blocks {
                if let Some(expected) = parent {
                    if block.header.parent_hash != expected {
                        return Err(ChainError::Corrupt(format!(
                            "block {} does not link to block {}",
                            block.height(),
                            block.height().saturating_sub(1)
                        ))
                        .into());
                    }
                }
                visit(block)?;
                parent = Some(block.header.hash);
                visited += 1;
            }

            match end.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }
        Ok(visited)
    }

    /// Ordinary scan of `from..=to` against `watch`.
    ///
    /// `on_block` runs once per block, in height order, and may stop the
    /// scan by returning an error. Re-running over the same range emits the
    /// same events; applying them again is a no-op for the ledger.
    pub fn scan<F>(&self, from: u64, to: u64, watch: &WatchSet, mut on_block: F) -> WalletResult<ScanSummary>
    where
        F: FnMut(BlockEvents) -> WalletResult<()>,
    {
        let mut summary = ScanSummary::default();
        let blocks = self.walk(from, to, |block| {
            let events = watch.events_for(block);
            summary.events += events.len();
            summary.last = Some(block.block_ref());
            on_block(BlockEvents {
                block: block.block_ref(),
                events,
            })
        })?;
        summary.blocks = blocks;
        if summary.blocks > 0 {
            debug!(from, to, events = summary.events, "scan complete");
        }
        Ok(summary)
    }

    /// Index the mempool, then the chain up to its tip.
    ///
    /// The mempool is read first. An entry mined between the two reads then
    /// shows up in both, and the block wins. Read the other way round it
    /// could be in neither.
    fn index_chain(&self, start_height: u64) -> WalletResult<(ChainIndex, Option<BlockRef>, u64)> {
        let mut index = ChainIndex::default();
        for m in self.source.pending_mints()? {
            index.mempool.insert(m.commitment, m.denomination);
        }
        for s in self.source.pending_spends()? {
            index.mempool_serials.insert(s.serial);
        }

        let tip = self.source.tip()?;
        let mut scanned = 0;
        if let Some(tip) = tip {
            scanned = self.walk(start_height, tip.height, |block| {
                let height = block.height();
                for m in &block.mints {
                    index
                        .commitments
                        .entry(m.commitment)
                        .or_insert((height, m.denomination));
                }
                for s in &block.spends {
                    index.serials.entry(s.serial).or_insert(height);
                }
                Ok(())
            })?;
        }
        Ok((index, tip, scanned))
    }

    /// Recovery scan: find every index derived from `deriver` that the chain
    /// (or its mempool) knows about.
    ///
    /// Stops after `gap_limit` consecutive unused indices. A gap shorter than
    /// the limit is crossed, so sparse usage is still recovered.
    pub fn recover(
        &self,
        deriver: &SeedDeriver,
        builder: &CommitmentBuilder,
        gap_limit: u32,
        start_height: u64,
    ) -> WalletResult<Recovery> {
        let (chain, tip, blocks_scanned) = self.index_chain(start_height)?;
        info!(
            blocks = blocks_scanned,
            commitments = chain.commitments.len(),
            mempool = chain.mempool.len(),
            gap_limit,
            "recovery scan started"
        );

        let mut recovery = Recovery {
            tip,
            blocks_scanned,
            ..Recovery::default()
        };
        let mut misses = 0u32;
        let mut index = 0u32;

        while misses < gap_limit {
            let seed = deriver.derive(index);
            let mut found = None;

            for denomination in Denomination::ALL {
                let (commitment, serial) = builder.commit(&seed, denomination)?;
                let confirmed_height = match chain.commitments.get(&commitment) {
                    Some(&(height, published)) => {
                        if published != denomination {
                            warn!(index, %commitment, "commitment published under a different denomination");
                        }
                        Some(height)
                    }
                    None if chain.mempool.contains_key(&commitment) => None,
                    None => continue,
                };
                let spent_height = chain.serials.get(&serial).copied();
                found = Some(RecoveredMint {
                    index,
                    denomination,
                    commitment,
                    serial,
                    confirmed_height,
                    spent_height,
                    spend_pending: spent_height.is_none()
                        && chain.mempool_serials.contains(&serial),
                });
                break;
            }
            recovery.probed += 1;

            match found {
                Some(mint) => {
                    debug!(
                        index,
                        denomination = %mint.denomination,
                        confirmed = ?mint.confirmed_height,
                        spent = ?mint.spent_height,
                        "recovered mint"
                    );
                    recovery.mints.push(mint);
                    misses = 0;
                }
                None => misses += 1,
            }

            match index.checked_add(1) {
                Some(next) => index = next,
                None => break,
            }
        }

        info!(
            found = recovery.mints.len(),
            probed = recovery.probed,
            "recovery scan finished"
        );
        Ok(recovery)
    }
}
