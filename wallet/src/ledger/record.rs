//! The persisted unit of the mint ledger.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mint::{Denomination, MintCommitment, SerialNumber};

/// Lifecycle of a mint. Transitions only move forward outside a rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MintState {
    /// Requested and broadcast, not yet seen in a block.
    Pending,
    /// Commitment seen in an accepted block.
    Confirmed,
    /// Serial number revealed in an accepted block.
    Spent,
}

impl fmt::Display for MintState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MintState::Pending => "pending",
            MintState::Confirmed => "confirmed",
            MintState::Spent => "spent",
        };
        f.write_str(s)
    }
}

/// Everything the wallet remembers about one derived mint.
///
/// The commitment and serial are derivable from `(seed, index, denomination)`;
/// they are stored so scanning does not need the seed. A rebuild fills an
/// unused index below the last mint with a `Pending` record of the smallest
/// denomination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRecord {
    /// Derivation index. Unique per wallet.
    pub index: u32,
    /// Coin size.
    pub denomination: Denomination,
    /// Public commitment published at mint time.
    pub commitment: MintCommitment,
    /// Serial number revealed at spend time.
    pub serial: SerialNumber,
    /// Lifecycle state.
    pub state: MintState,
    /// Height the commitment was first seen on chain.
    pub confirmed_height: Option<u64>,
    /// Height the serial was first seen on chain.
    pub spent_height: Option<u64>,
}

impl MintRecord {
    /// A freshly requested mint.
    pub fn pending(
        index: u32,
        denomination: Denomination,
        commitment: MintCommitment,
        serial: SerialNumber,
    ) -> Self {
        Self {
            index,
            denomination,
            commitment,
            serial,
            state: MintState::Pending,
            confirmed_height: None,
            spent_height: None,
        }
    }

    /// Value in base units.
    pub fn value(&self) -> u64 {
        self.denomination.units()
    }

    /// Confirmed and not yet spent.
    pub fn is_spendable(&self) -> bool {
        self.state == MintState::Confirmed
    }

    /// Move to `Confirmed`. Returns `false` when the record is already
    /// confirmed or spent.
    pub(crate) fn confirm(&mut self, height: u64) -> bool {
        if self.state != MintState::Pending {
            return false;
        }
        self.state = MintState::Confirmed;
        self.confirmed_height = Some(height);
        true
    }

    /// Move to `Spent`. Returns `false` when already spent.
    ///
    /// A pending record can be spent directly when its confirmation and
    /// spend arrive together; it keeps no confirmed height in that case.
    pub(crate) fn spend(&mut self, height: u64) -> bool {
        if self.state == MintState::Spent {
            return false;
        }
        self.state = MintState::Spent;
        self.spent_height = Some(height);
        true
    }
}
