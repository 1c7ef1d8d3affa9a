// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Sigma Wallet — Mint Derivation & Reconciliation Engine
//!
//! The wallet side of a sigma-style anonymity-set coin: every coin the wallet
//! mints is a Pedersen commitment derived deterministically from one master
//! seed and an integer index. Because nothing about a mint is random, the
//! wallet can throw away everything it has cached about its mints ("zap") and
//! rebuild an equivalent view from the seed plus the chain.
//!
//! ## Architecture
//!
//! - **crypto** — BLAKE3/SHA-256 helpers and hash-to-field.
//! - **mint** — denominations, seed derivation, commitment building.
//! - **ledger** — the persisted mint ledger (sled) and its single-writer lock.
//! - **chain** — the chain-data and broadcast interfaces, plus a sled-backed
//!   devnet chain with a mempool and a block generator.
//! - **scanner** — block scanning, both incremental and full recovery.
//! - **reconciler** — the zap/rebuild state machine.
//! - **selector** — coin selection for spends.
//! - **wallet** — the wallet context tying it all together.
//! - **config** — constants and runtime configuration.
//!
//! ## Ground Rules
//!
//! 1. Amounts are `u64` base units. No floating point anywhere.
//! 2. The chain is the truth; the ledger is a cache of it.
//! 3. A mint that cannot be re-derived from `(seed, index)` does not exist.

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod mint;
pub mod reconciler;
pub mod scanner;
pub mod selector;
pub mod wallet;

pub use error::{WalletError, WalletResult};
pub use wallet::MintWallet;
