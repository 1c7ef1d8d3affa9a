//! # Block Structure
//!
//! The wallet only cares about two things in a block: the mint commitments it
//! publishes and the serial numbers its spends reveal. Blocks here carry
//! exactly that.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  BlockHeader                                 │
//! │  ├── height: u64                             │
//! │  ├── hash: [u8; 32]     (BLAKE3 of header)   │
//! │  ├── parent_hash: [u8; 32]                   │
//! │  ├── timestamp: u64                          │
//! │  └── entry_root: [u8; 32] (Merkle root)      │
//! ├──────────────────────────────────────────────┤
//! │  mints:  Vec<MintOutput>                     │
//! │  spends: Vec<SpendInput>                     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The hash covers `height || parent_hash || timestamp || entry_root` under
//! a dedicated derivation context.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::BLOCK_HASH_CONTEXT;
use crate::crypto::hash::{blake3_hash_multi, domain_separated_hash, merkle_root};
use crate::mint::{Denomination, MintCommitment, SerialNumber};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A published mint: one commitment of one denomination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintOutput {
    /// The coin commitment.
    pub commitment: MintCommitment,
    /// Coin size.
    pub denomination: Denomination,
}

impl MintOutput {
    fn leaf(&self) -> [u8; 32] {
        blake3_hash_multi(&[
            b"mint",
            self.commitment.as_bytes(),
            &self.denomination.units().to_be_bytes(),
        ])
    }
}

/// A published spend: the revealed serial plus an opaque proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendInput {
    /// Serial number revealed by the spend.
    pub serial: SerialNumber,
    /// Denomination of the coin being spent.
    pub denomination: Denomination,
    /// Proof bytes. Opaque to the wallet.
    pub proof: Vec<u8>,
}

impl SpendInput {
    fn leaf(&self) -> [u8; 32] {
        blake3_hash_multi(&[
            b"spend",
            self.serial.as_bytes(),
            &self.denomination.units().to_be_bytes(),
            &self.proof,
        ])
    }
}

// ---------------------------------------------------------------------------
// BlockRef
// ---------------------------------------------------------------------------

/// A block identified by height and hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: [u8; 32],
}

impl BlockRef {
    /// Hex encoding of the hash.
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.height, &self.hash_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// BlockHeader / ChainBlock
// ---------------------------------------------------------------------------

/// Block metadata and chain linkage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height, genesis = 0.
    pub height: u64,
    /// Hash of the header fields.
    pub hash: [u8; 32],
    /// Parent hash. All zeros for genesis.
    pub parent_hash: [u8; 32],
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Merkle root over mint and spend entries.
    pub entry_root: [u8; 32],
}

/// A block as the wallet sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    /// Header.
    pub header: BlockHeader,
    /// Mints published in this block.
    pub mints: Vec<MintOutput>,
    /// Spends published in this block.
    pub spends: Vec<SpendInput>,
}

impl ChainBlock {
    /// The genesis block: height 0, no entries, fixed timestamp.
    pub fn genesis() -> Self {
        let entry_root = [0u8; 32];
        let hash = compute_header_hash(0, &[0u8; 32], 0, &entry_root);
        ChainBlock {
            header: BlockHeader {
                height: 0,
                hash,
                parent_hash: [0u8; 32],
                timestamp: 0,
                entry_root,
            },
            mints: Vec::new(),
            spends: Vec::new(),
        }
    }

    /// Build a block on top of `parent`.
    pub fn new(parent: &ChainBlock, mints: Vec<MintOutput>, spends: Vec<SpendInput>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::with_timestamp(parent, mints, spends, timestamp)
    }

    /// Build a block with an explicit timestamp. Same inputs give the same
    /// hash, which tests and reorg simulations rely on.
    pub fn with_timestamp(
        parent: &ChainBlock,
        mints: Vec<MintOutput>,
        spends: Vec<SpendInput>,
        timestamp: u64,
    ) -> Self {
        let height = parent.header.height + 1;
        let parent_hash = parent.header.hash;
        let entry_root = compute_entry_root(&mints, &spends);
        let hash = compute_header_hash(height, &parent_hash, timestamp, &entry_root);
        ChainBlock {
            header: BlockHeader {
                height,
                hash,
                parent_hash,
                timestamp,
                entry_root,
            },
            mints,
            spends,
        }
    }

    /// Recompute the header hash.
    pub fn compute_hash(&self) -> [u8; 32] {
        compute_header_hash(
            self.header.height,
            &self.header.parent_hash,
            self.header.timestamp,
            &self.header.entry_root,
        )
    }

    /// Check the stored hash and entry root against the contents.
    pub fn verify(&self) -> Result<(), String> {
        let expected_hash = self.compute_hash();
        if self.header.hash != expected_hash {
            return Err(format!(
                "block {} hash mismatch: stored={}, computed={}",
                self.header.height,
                hex::encode(self.header.hash),
                hex::encode(expected_hash),
            ));
        }

        let expected_root = compute_entry_root(&self.mints, &self.spends);
        if self.header.entry_root != expected_root {
            return Err(format!(
                "block {} entry_root mismatch: stored={}, computed={}",
                self.header.height,
                hex::encode(self.header.entry_root),
                hex::encode(expected_root),
            ));
        }

        if self.header.height == 0 && self.header.parent_hash != [0u8; 32] {
            return Err("genesis block must have zeroed parent_hash".to_string());
        }

        Ok(())
    }

    /// Height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Height and hash.
    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            height: self.header.height,
            hash: self.header.hash,
        }
    }

    /// True when the block has neither mints nor spends.
    pub fn is_empty(&self) -> bool {
        self.mints.is_empty() && self.spends.is_empty()
    }
}

fn compute_header_hash(
    height: u64,
    parent_hash: &[u8; 32],
    timestamp: u64,
    entry_root: &[u8; 32],
) -> [u8; 32] {
    domain_separated_hash(
        BLOCK_HASH_CONTEXT,
        &[
            &height.to_be_bytes(),
            parent_hash,
            &timestamp.to_be_bytes(),
            entry_root,
        ],
    )
}

fn compute_entry_root(mints: &[MintOutput], spends: &[SpendInput]) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = mints
        .iter()
        .map(MintOutput::leaf)
        .chain(spends.iter().map(SpendInput::leaf))
        .collect();
    merkle_root(&leaves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint(byte: u8) -> MintOutput {
        MintOutput {
            commitment: MintCommitment::from_bytes([byte; 32]),
            denomination: Denomination::One,
        }
    }

    #[test]
    fn genesis_is_fixed_and_valid() {
        let a = ChainBlock::genesis();
        let b = ChainBlock::genesis();
        assert_eq!(a.header.hash, b.header.hash);
        assert_eq!(a.height(), 0);
        assert!(a.is_empty());
        assert!(a.verify().is_ok());
    }

    #[test]
    fn child_links_to_parent() {
        let genesis = ChainBlock::genesis();
        let child = ChainBlock::new(&genesis, vec![mint(1)], Vec::new());
        assert_eq!(child.height(), 1);
        assert_eq!(child.header.parent_hash, genesis.header.hash);
        assert!(child.verify().is_ok());
    }

    #[test]
    fn tampered_entries_fail_verification() {
        let genesis = ChainBlock::genesis();
        let mut block = ChainBlock::with_timestamp(&genesis, vec![mint(1)], Vec::new(), 7);
        block.mints.push(mint(2));
        assert!(block.verify().unwrap_err().contains("entry_root"));

        let mut block = ChainBlock::with_timestamp(&genesis, vec![mint(1)], Vec::new(), 7);
        block.header.timestamp = 8;
        assert!(block.verify().unwrap_err().contains("hash mismatch"));
    }

    #[test]
    fn entries_change_the_hash() {
        let genesis = ChainBlock::genesis();
        let a = ChainBlock::with_timestamp(&genesis, vec![mint(1)], Vec::new(), 7);
        let b = ChainBlock::with_timestamp(&genesis, vec![mint(2)], Vec::new(), 7);
        let c = ChainBlock::with_timestamp(&genesis, vec![mint(1)], Vec::new(), 7);
        assert_ne!(a.header.hash, b.header.hash);
        assert_eq!(a.header.hash, c.header.hash);
        assert_eq!(a.block_ref().height, 1);
    }
}
