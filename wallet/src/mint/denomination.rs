//! Fixed coin denominations and integer amount handling.
//!
//! Every mint is exactly one coin of one denomination. Amounts given by an
//! operator ("mint 136.65") are split into denominations here, and decimal
//! strings are parsed into base units without ever touching a float.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{COIN, COIN_DECIMALS, DENOMINATION_UNITS};
use crate::error::{WalletError, WalletResult};

/// One of the seven fixed coin sizes. Declaration order is ascending value,
/// so the derived `Ord` sorts by value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum Denomination {
    /// 0.05 coin.
    Twentieth,
    /// 0.1 coin.
    Tenth,
    /// 0.5 coin.
    Half,
    /// 1 coin.
    One,
    /// 10 coins.
    Ten,
    /// 25 coins.
    TwentyFive,
    /// 100 coins.
    Hundred,
}

impl Denomination {
    /// All denominations, ascending.
    pub const ALL: [Denomination; 7] = [
        Denomination::Twentieth,
        Denomination::Tenth,
        Denomination::Half,
        Denomination::One,
        Denomination::Ten,
        Denomination::TwentyFive,
        Denomination::Hundred,
    ];

    /// Value in base units.
    pub const fn units(self) -> u64 {
        DENOMINATION_UNITS[self as usize]
    }

    /// Look up a denomination by its value in base units.
    ///
    /// # Errors
    ///
    /// [`WalletError::InvalidDenomination`] for any value outside the table.
    pub fn from_units(units: u64) -> WalletResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.units() == units)
            .ok_or(WalletError::InvalidDenomination(units))
    }

    /// The smallest denomination (0.05).
    pub const fn smallest() -> Self {
        Denomination::Twentieth
    }

    /// Split a mint amount into denominations, largest first.
    ///
    /// The greedy split is exact for this table because every denomination
    /// is a multiple of the smallest one.
    ///
    /// # Errors
    ///
    /// [`WalletError::InvalidAmount`] if the amount is zero or not a multiple
    /// of 0.05.
    pub fn split_amount(amount: u64) -> WalletResult<Vec<Denomination>> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount(
                "mint amount must be positive".to_string(),
            ));
        }
        let step = Self::smallest().units();
        if amount % step != 0 {
            return Err(WalletError::InvalidAmount(format!(
                "{} is not a multiple of {}",
                format_amount(amount),
                format_amount(step)
            )));
        }

        let mut remaining = amount;
        let mut coins = Vec::new();
        for denom in Self::ALL.iter().rev() {
            let count = remaining / denom.units();
            for _ in 0..count {
                coins.push(*denom);
            }
            remaining -= count * denom.units();
        }
        debug_assert_eq!(remaining, 0);
        Ok(coins)
    }
}

impl TryFrom<u64> for Denomination {
    type Error = WalletError;

    fn try_from(units: u64) -> Result<Self, Self::Error> {
        Self::from_units(units)
    }
}

impl From<Denomination> for u64 {
    fn from(d: Denomination) -> Self {
        d.units()
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_amount(self.units()))
    }
}

/// Format base units as a decimal coin amount with trailing zeros trimmed.
///
/// `5_000_000` becomes `"0.05"`, `100 * COIN` becomes `"100"`.
pub fn format_amount(units: u64) -> String {
    let whole = units / COIN;
    let frac = units % COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0>width$}", frac, width = COIN_DECIMALS as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Parse a decimal coin amount (`"0.05"`, `"136.65"`, `"7"`) into base units.
///
/// # Errors
///
/// [`WalletError::InvalidAmount`] for signs, stray characters, more than
/// eight decimals, or overflow.
pub fn parse_amount(input: &str) -> WalletResult<u64> {
    let invalid = |why: &str| WalletError::InvalidAmount(format!("{input:?}: {why}"));
    let s = input.trim();

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("no digits"));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("expected a plain decimal number"));
    }
    if frac.len() > COIN_DECIMALS as usize {
        return Err(invalid("more than 8 decimal places"));
    }

    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u64>()
            .map_err(|_| invalid("too large"))?
            .checked_mul(COIN)
            .ok_or_else(|| invalid("too large"))?
    };
    let frac_units = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = COIN_DECIMALS as usize);
        padded.parse::<u64>().map_err(|_| invalid("bad fraction"))?
    };

    whole_units
        .checked_add(frac_units)
        .ok_or_else(|| invalid("too large"))
}
