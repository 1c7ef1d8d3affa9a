//! Interfaces the wallet consumes from the chain and the network.

use thiserror::Error;

use super::block::{BlockRef, ChainBlock, MintOutput, SpendInput};

/// Failures reading chain data or publishing to it.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The backing store or node could not be reached.
    #[error("chain source unavailable: {0}")]
    Unavailable(String),

    /// Blocks failed integrity or linkage checks.
    #[error("chain data corrupt: {0}")]
    Corrupt(String),

    /// A block inside the reported range is missing.
    #[error("block {0} missing")]
    Missing(u64),

    /// A broadcast was refused.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<sled::Error> for ChainError {
    fn from(e: sled::Error) -> Self {
        ChainError::Unavailable(e.to_string())
    }
}

/// Result alias for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Read access to final, ordered block data.
pub trait ChainSource: Send + Sync {
    /// Current tip, or `None` for an empty chain.
    fn tip(&self) -> ChainResult<Option<BlockRef>>;

    /// Hash of the block at `height`, if it exists.
    fn block_hash(&self, height: u64) -> ChainResult<Option<[u8; 32]>>;

    /// Blocks `from..=to` in ascending height order.
    fn blocks(&self, from: u64, to: u64) -> ChainResult<Vec<ChainBlock>>;

    /// Mints accepted for publication but not yet in a block.
    fn pending_mints(&self) -> ChainResult<Vec<MintOutput>> {
        Ok(Vec::new())
    }

    /// Spends accepted for publication but not yet in a block.
    fn pending_spends(&self) -> ChainResult<Vec<SpendInput>> {
        Ok(Vec::new())
    }
}

/// Publication of mints and spends.
pub trait Broadcaster: Send + Sync {
    /// Publish a mint.
    fn broadcast_mint(&self, mint: MintOutput) -> ChainResult<()>;

    /// Publish a spend.
    fn broadcast_spend(&self, spend: SpendInput) -> ChainResult<()>;
}
