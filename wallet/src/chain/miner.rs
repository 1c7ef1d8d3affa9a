//! Devnet block production.
//!
//! Stands in for mining on a local chain: every call to
//! [`DevnetMiner::generate`] appends blocks immediately. The first block of a
//! batch takes the whole mempool; the rest are empty, like the confirmation
//! blocks a regtest node generates.

use std::sync::Arc;

use tracing::info;

use super::block::{BlockRef, ChainBlock};
use super::source::{ChainError, ChainResult};
use super::store::ChainStore;

/// Appends blocks to a [`ChainStore`] on demand.
#[derive(Debug, Clone)]
pub struct DevnetMiner {
    store: Arc<ChainStore>,
}

impl DevnetMiner {
    /// Miner over `store`.
    pub fn new(store: Arc<ChainStore>) -> Self {
        Self { store }
    }

    /// Store genesis if the chain is empty. Returns the tip.
    pub fn ensure_genesis(&self) -> ChainResult<ChainBlock> {
        if let Some(tip) = self.store.tip_block()? {
            return Ok(tip);
        }
        let genesis = ChainBlock::genesis();
        self.store.put_block(&genesis)?;
        info!(hash = %genesis.block_ref().hash_hex(), "genesis block created");
        Ok(genesis)
    }

    /// Append `count` blocks and return references to them.
    pub fn generate(&self, count: u32) -> ChainResult<Vec<BlockRef>> {
        let mut parent = self.ensure_genesis()?;
        let mut produced = Vec::with_capacity(count as usize);

        for i in 0..count {
            let (mints, spends) = if i == 0 {
                self.store.mempool()?
            } else {
                (Vec::new(), Vec::new())
            };
            let block = ChainBlock::new(&parent, mints, spends);
            self.store.put_block(&block)?;
            if !block.is_empty() {
                info!(
                    height = block.height(),
                    mints = block.mints.len(),
                    spends = block.spends.len(),
                    "block produced"
                );
            }
            produced.push(block.block_ref());
            parent = block;
        }

        if let Some(last) = produced.last() {
            info!(count, tip = last.height, "generated blocks");
        }
        Ok(produced)
    }

    /// Current tip height.
    pub fn height(&self) -> ChainResult<u64> {
        self.store
            .tip_height()?
            .ok_or_else(|| ChainError::Unavailable("chain has no blocks".to_string()))
    }
}
