//! # ChainStore — Local Block Storage
//!
//! A sled-backed block store that doubles as the wallet's chain source and
//! broadcast target on a devnet.
//!
//! ## Tree Layout
//!
//! | Tree             | Key                  | Value                  |
//! |------------------|----------------------|------------------------|
//! | `blocks`         | `height` (8B BE)     | `bincode(ChainBlock)`  |
//! | `block_hashes`   | `hash` (32B)         | `height` (8B BE)       |
//! | `commitments`    | commitment (32B)     | `height` (8B BE)       |
//! | `serials`        | serial (32B)         | `height` (8B BE)       |
//! | `mempool_mints`  | commitment (32B)     | `bincode(MintOutput)`  |
//! | `mempool_spends` | serial (32B)         | `bincode(SpendInput)`  |
//! | `metadata`       | key (UTF-8)          | value (bytes)          |
//!
//! Heights are big-endian so sled's byte ordering matches numeric ordering.
//!
//! ## Atomicity
//!
//! Appending a block writes the block, its hash and entry indexes, removes
//! its entries from the mempool, and moves the tip in one sled transaction.
//! Rewinding does the reverse, also in one transaction.

use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use super::block::{BlockRef, ChainBlock, MintOutput, SpendInput};
use super::source::{Broadcaster, ChainError, ChainResult, ChainSource};

/// Well-known key in the `metadata` tree for the tip height.
const META_TIP_HEIGHT: &[u8] = b"tip_height";

fn corrupt<E: std::fmt::Display>(e: E) -> ChainError {
    ChainError::Corrupt(e.to_string())
}

fn decode_height(bytes: &[u8]) -> ChainResult<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ChainError::Corrupt("invalid height bytes".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

fn map_tx_error(e: TransactionError<ChainError>) -> ChainError {
    match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(inner) => ChainError::from(inner),
    }
}

// ---------------------------------------------------------------------------
// ChainStore
// ---------------------------------------------------------------------------

/// Persistent block store with a mempool for broadcast entries.
///
/// sled trees are thread-safe, so a `ChainStore` can be shared through an
/// `Arc` by the wallet, the miner, and the node daemon at once.
#[derive(Debug, Clone)]
pub struct ChainStore {
    db: Db,
    blocks: Tree,
    block_hashes: Tree,
    commitments: Tree,
    serials: Tree,
    mempool_mints: Tree,
    mempool_spends: Tree,
    metadata: Tree,
}

impl ChainStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> ChainResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store removed on drop. For tests.
    pub fn open_temporary() -> ChainResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> ChainResult<Self> {
        Ok(Self {
            blocks: db.open_tree("blocks")?,
            block_hashes: db.open_tree("block_hashes")?,
            commitments: db.open_tree("commitments")?,
            serials: db.open_tree("serials")?,
            mempool_mints: db.open_tree("mempool_mints")?,
            mempool_spends: db.open_tree("mempool_spends")?,
            metadata: db.open_tree("metadata")?,
            db,
        })
    }

    // -- Blocks -------------------------------------------------------------

    /// Append a block on top of the current tip.
    ///
    /// # Errors
    ///
    /// [`ChainError::Rejected`] if the block does not extend the tip, fails
    /// its own integrity check, or repeats a commitment or serial already on
    /// chain.
    pub fn put_block(&self, block: &ChainBlock) -> ChainResult<()> {
        block.verify().map_err(ChainError::Rejected)?;

        match self.tip_block()? {
            None if block.height() != 0 => {
                return Err(ChainError::Rejected(format!(
                    "first block must be genesis, got height {}",
                    block.height()
                )));
            }
            Some(tip) if block.height() != tip.height() + 1 => {
                return Err(ChainError::Rejected(format!(
                    "block {} does not extend tip {}",
                    block.height(),
                    tip.height()
                )));
            }
            Some(tip) if block.header.parent_hash != tip.header.hash => {
                return Err(ChainError::Rejected(format!(
                    "block {} parent hash does not match tip",
                    block.height()
                )));
            }
            _ => {}
        }

        for m in &block.mints {
            if self.commitments.contains_key(m.commitment.as_bytes())? {
                return Err(ChainError::Rejected(format!(
                    "commitment {} already on chain",
                    m.commitment
                )));
            }
        }
        for s in &block.spends {
            if self.serials.contains_key(s.serial.as_bytes())? {
                return Err(ChainError::Rejected(format!(
                    "serial {} already revealed",
                    s.serial
                )));
            }
        }

        let height_key = block.height().to_be_bytes();
        let block_bytes = bincode::serialize(block).map_err(corrupt)?;

        (
            &self.blocks,
            &self.block_hashes,
            &self.commitments,
            &self.serials,
            &self.mempool_mints,
            &self.mempool_spends,
            &self.metadata,
        )
            .transaction(
                |(blocks, hashes, commitments, serials, mempool_mints, mempool_spends, meta)| {
                    blocks.insert(&height_key[..], block_bytes.as_slice())?;
                    hashes.insert(&block.header.hash[..], &height_key[..])?;
                    for m in &block.mints {
                        commitments.insert(&m.commitment.as_bytes()[..], &height_key[..])?;
                        mempool_mints.remove(&m.commitment.as_bytes()[..])?;
                    }
                    for s in &block.spends {
                        serials.insert(&s.serial.as_bytes()[..], &height_key[..])?;
                        mempool_spends.remove(&s.serial.as_bytes()[..])?;
                    }
                    meta.insert(META_TIP_HEIGHT, &height_key[..])?;
                    Ok::<_, ConflictableTransactionError<ChainError>>(())
                },
            )
            .map_err(map_tx_error)?;

        self.db.flush()?;
        debug!(
            height = block.height(),
            mints = block.mints.len(),
            spends = block.spends.len(),
            "block stored"
        );
        Ok(())
    }

    /// Block at `height`.
    pub fn get_block(&self, height: u64) -> ChainResult<Option<ChainBlock>> {
        match self.blocks.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(corrupt)?)),
            None => Ok(None),
        }
    }

    /// Blocks `start..=end` that exist, ascending.
    pub fn get_block_range(&self, start: u64, end: u64) -> ChainResult<Vec<ChainBlock>> {
        let mut blocks = Vec::new();
        for item in self.blocks.range(start.to_be_bytes()..=end.to_be_bytes()) {
            let (_key, value) = item?;
            blocks.push(bincode::deserialize(&value).map_err(corrupt)?);
        }
        Ok(blocks)
    }

    /// Height of the tip, if any.
    pub fn tip_height(&self) -> ChainResult<Option<u64>> {
        match self.metadata.get(META_TIP_HEIGHT)? {
            Some(bytes) => Ok(Some(decode_height(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The tip block, if any.
    pub fn tip_block(&self) -> ChainResult<Option<ChainBlock>> {
        match self.tip_height()? {
            Some(height) => self.get_block(height)?.map(Some).ok_or(ChainError::Missing(height)),
            None => Ok(None),
        }
    }

    /// Height at which `commitment` was published, if on chain.
    pub fn commitment_height(&self, commitment: &[u8; 32]) -> ChainResult<Option<u64>> {
        match self.commitments.get(commitment)? {
            Some(bytes) => Ok(Some(decode_height(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Drop every block above `height` and return their entries to the
    /// mempool. Returns the number of blocks removed.
    ///
    /// Simulates a reorg: the next blocks mined at those heights get new
    /// hashes.
    pub fn rewind_to(&self, height: u64) -> ChainResult<usize> {
        let tip = match self.tip_height()? {
            Some(tip) if tip > height => tip,
            _ => return Ok(0),
        };
        let dropped = self.get_block_range(height + 1, tip)?;

        let mut mempool_mints = Vec::new();
        let mut mempool_spends = Vec::new();
        for block in &dropped {
            for m in &block.mints {
                mempool_mints.push((m.commitment, bincode::serialize(m).map_err(corrupt)?));
            }
            for s in &block.spends {
                mempool_spends.push((s.serial, bincode::serialize(s).map_err(corrupt)?));
            }
        }
        let new_tip = height.to_be_bytes();

        (
            &self.blocks,
            &self.block_hashes,
            &self.commitments,
            &self.serials,
            &self.mempool_mints,
            &self.mempool_spends,
            &self.metadata,
        )
            .transaction(
                |(blocks, hashes, commitments, serials, pool_mints, pool_spends, meta)| {
                    for block in &dropped {
                        blocks.remove(&block.height().to_be_bytes()[..])?;
                        hashes.remove(&block.header.hash[..])?;
                        for m in &block.mints {
                            commitments.remove(&m.commitment.as_bytes()[..])?;
                        }
                        for s in &block.spends {
                            serials.remove(&s.serial.as_bytes()[..])?;
                        }
                    }
                    for (commitment, bytes) in &mempool_mints {
                        pool_mints.insert(&commitment.as_bytes()[..], bytes.as_slice())?;
                    }
                    for (serial, bytes) in &mempool_spends {
                        pool_spends.insert(&serial.as_bytes()[..], bytes.as_slice())?;
                    }
                    meta.insert(META_TIP_HEIGHT, &new_tip[..])?;
                    Ok::<_, ConflictableTransactionError<ChainError>>(())
                },
            )
            .map_err(map_tx_error)?;

        self.db.flush()?;
        info!(from = tip, to = height, removed = dropped.len(), "chain rewound");
        Ok(dropped.len())
    }

    /// Check integrity and linkage of blocks `from..=to`.
    ///
    /// # Errors
    ///
    /// [`ChainError::Missing`] for a hole in the range, [`ChainError::Corrupt`]
    /// for a bad hash, a bad entry root, or a broken parent link.
    pub fn verify_range(&self, from: u64, to: u64) -> ChainResult<()> {
        let mut parent: Option<[u8; 32]> = match from.checked_sub(1) {
            Some(prev) => self.get_block(prev)?.map(|b| b.header.hash),
            None => None,
        };
        for height in from..=to {
            let block = self.get_block(height)?.ok_or(ChainError::Missing(height))?;
            block.verify().map_err(ChainError::Corrupt)?;
            if block.height() != height {
                return Err(ChainError::Corrupt(format!(
                    "block stored at {height} claims height {}",
                    block.height()
                )));
            }
            if let Some(expected) = parent {
                if block.header.parent_hash != expected {
                    return Err(ChainError::Corrupt(format!(
                        "block {height} does not link to its parent"
                    )));
                }
            }
            parent = Some(block.header.hash);
        }
        Ok(())
    }

    // -- Mempool ------------------------------------------------------------

    /// Broadcast entries not yet in a block.
    pub fn mempool(&self) -> ChainResult<(Vec<MintOutput>, Vec<SpendInput>)> {
        let mut mints = Vec::new();
        for item in self.mempool_mints.iter() {
            let (_key, value) = item?;
            mints.push(bincode::deserialize(&value).map_err(corrupt)?);
        }
        let mut spends = Vec::new();
        for item in self.mempool_spends.iter() {
            let (_key, value) = item?;
            spends.push(bincode::deserialize(&value).map_err(corrupt)?);
        }
        Ok((mints, spends))
    }

    /// Number of entries waiting for a block.
    pub fn mempool_len(&self) -> usize {
        self.mempool_mints.len() + self.mempool_spends.len()
    }

    /// Number of stored blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

// ---------------------------------------------------------------------------
// Trait impls
// ---------------------------------------------------------------------------

impl ChainSource for ChainStore {
    fn tip(&self) -> ChainResult<Option<BlockRef>> {
        Ok(self.tip_block()?.map(|b| b.block_ref()))
    }

    fn block_hash(&self, height: u64) -> ChainResult<Option<[u8; 32]>> {
        Ok(self.get_block(height)?.map(|b| b.header.hash))
    }

    fn blocks(&self, from: u64, to: u64) -> ChainResult<Vec<ChainBlock>> {
        let blocks = self.get_block_range(from, to)?;
        for (offset, block) in blocks.iter().enumerate() {
            let expected = from + offset as u64;
            if block.height() != expected {
                return Err(ChainError::Missing(expected));
            }
            block.verify().map_err(ChainError::Corrupt)?;
        }
        let wanted = to.saturating_sub(from) + 1;
        if (blocks.len() as u64) < wanted {
            return Err(ChainError::Missing(from + blocks.len() as u64));
        }
        Ok(blocks)
    }

    fn pending_mints(&self) -> ChainResult<Vec<MintOutput>> {
        Ok(self.mempool()?.0)
    }

    fn pending_spends(&self) -> ChainResult<Vec<SpendInput>> {
        Ok(self.mempool()?.1)
    }
}

impl Broadcaster for ChainStore {
    fn broadcast_mint(&self, mint: MintOutput) -> ChainResult<()> {
        let key = mint.commitment.as_bytes();
        if self.commitments.contains_key(key)? || self.mempool_mints.contains_key(key)? {
            return Err(ChainError::Rejected(format!(
                "commitment {} already published",
                mint.commitment
            )));
        }
        let bytes = bincode::serialize(&mint).map_err(corrupt)?;
        self.mempool_mints.insert(key, bytes)?;
        self.db.flush()?;
        debug!(commitment = %mint.commitment, denomination = %mint.denomination, "mint accepted");
        Ok(())
    }

    fn broadcast_spend(&self, spend: SpendInput) -> ChainResult<()> {
        if spend.proof.is_empty() {
            return Err(ChainError::Rejected("spend carries no proof".to_string()));
        }
        let key = spend.serial.as_bytes();
        if self.serials.contains_key(key)? || self.mempool_spends.contains_key(key)? {
            return Err(ChainError::Rejected(format!(
                "serial {} already revealed",
                spend.serial
            )));
        }
        let bytes = bincode::serialize(&spend).map_err(corrupt)?;
        self.mempool_spends.insert(key, bytes)?;
        self.db.flush()?;
        debug!(serial = %spend.serial, denomination = %spend.denomination, "spend accepted");
        Ok(())
    }
}
