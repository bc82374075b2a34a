use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::Amount;

/// spec.md §3: `{address, balance, last_updated}`. Invariant `balance >= 0`
/// is enforced by `staeon-consensus::ledger`, not by this plain value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub address: Address,
    pub balance: Amount,
    pub last_updated: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn fresh(address: Address, at: DateTime<Utc>) -> Self {
        LedgerEntry {
            address,
            balance: Amount::ZERO,
            last_updated: at,
        }
    }
}
