//! # Chain Access
//!
//! - [`block`] — the block format the wallet scans.
//! - [`source`] — [`ChainSource`] and [`Broadcaster`], the two seams between
//!   the wallet and whatever chain it runs against.
//! - [`store`] — a sled-backed block store implementing both.
//! - [`miner`] — devnet block production over that store.

pub mod block;
pub mod miner;
pub mod source;
pub mod store;

pub use block::{BlockHeader, BlockRef, ChainBlock, MintOutput, SpendInput};
pub use miner::DevnetMiner;
pub use source::{Broadcaster, ChainError, ChainResult, ChainSource};
pub use store::ChainStore;
