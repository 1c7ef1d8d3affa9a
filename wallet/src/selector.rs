//! # Spend Selection
//!
//! Picks confirmed coins to cover a spend. Policy:
//!
//! 1. Use as few coins as possible. Taking the `k` largest coins maximizes
//!    the value of any `k`-coin set, so the smallest `k` whose largest coins
//!    cover the target is the minimum count.
//! 2. Among `k`-coin sets, shrink the overshoot: each chosen coin is swapped
//!    for the smallest unchosen coin that still keeps the total at or above
//!    the target.
//!
//! Ties go to the lower index, so a given ledger always yields the same
//! selection.

use std::cmp::Reverse;

use crate::config::{DEFAULT_MAX_SPEND_INPUTS, DEFAULT_MAX_SPEND_VALUE};
use crate::error::{WalletError, WalletResult};
use crate::ledger::MintRecord;
use crate::mint::format_amount;

/// Coin selection under per-transaction limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpendSelector {
    /// Maximum coins in one spend.
    pub max_inputs: usize,
    /// Maximum value of one spend, in base units.
    pub max_value: u64,
}

impl Default for SpendSelector {
    fn default() -> Self {
        Self {
            max_inputs: DEFAULT_MAX_SPEND_INPUTS,
            max_value: DEFAULT_MAX_SPEND_VALUE,
        }
    }
}

impl SpendSelector {
    /// Selector with explicit limits.
    pub fn new(max_inputs: usize, max_value: u64) -> Self {
        Self {
            max_inputs,
            max_value,
        }
    }

    /// Choose coins from `unspent` totalling at least `target`.
    ///
    /// Records that are not `Confirmed` are never chosen, whatever the caller
    /// passes in. The result is sorted by index.
    ///
    /// # Errors
    ///
    /// - [`WalletError::InvalidAmount`] for a zero target.
    /// - [`WalletError::SpendLimitExceeded`] above `max_value`.
    /// - [`WalletError::InsufficientFunds`] when all coins together fall short.
    /// - [`WalletError::TooManyInputs`] when the minimum count exceeds
    ///   `max_inputs`.
    pub fn select(&self, unspent: &[MintRecord], target: u64) -> WalletResult<Vec<MintRecord>> {
        if target == 0 {
            return Err(WalletError::InvalidAmount(
                "spend amount must be positive".to_string(),
            ));
        }
        if target > self.max_value {
            return Err(WalletError::SpendLimitExceeded {
                requested: target,
                max: self.max_value,
            });
        }

        let mut candidates: Vec<&MintRecord> = unspent.iter().filter(|r| r.is_spendable()).collect();
        let available: u64 = candidates.iter().map(|r| r.value()).sum();
        if available < target {
            return Err(WalletError::InsufficientFunds {
                requested: target,
                available,
            });
        }

        candidates.sort_by_key(|r| (Reverse(r.value()), r.index));

        let mut running = 0u64;
        let mut needed = 0usize;
        for r in &candidates {
            running += r.value();
            needed += 1;
            if running >= target {
                break;
            }
        }
        if needed > self.max_inputs {
            return Err(WalletError::TooManyInputs {
                needed,
                max: self.max_inputs,
            });
        }

        let (chosen, rest) = candidates.split_at_mut(needed);
        let mut total = running;
        for slot in chosen.iter_mut() {
            let current = slot.value();
            let replacement = rest
                .iter_mut()
                .filter(|c| c.value() < current && total - current + c.value() >= target)
                .min_by_key(|c| (c.value(), c.index));
            if let Some(replacement) = replacement {
                total = total - current + replacement.value();
                std::mem::swap(slot, replacement);
            }
        }

        let mut selected: Vec<MintRecord> = chosen.iter().map(|r| (*r).clone()).collect();
        selected.sort_by_key(|r| r.index);
        tracing::debug!(
            target = %format_amount(target),
            inputs = selected.len(),
            total = %format_amount(total),
            "coins selected"
        );
        Ok(selected)
    }
}
