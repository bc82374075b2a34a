use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::Amount;
use crate::hash::Sha256Hash;

/// spec.md §3: `{txid, timestamp, applied}`, carrying a multiset of
/// [`Movement`]s. Created on `accept_tx`, destroyed on epoch rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedTransaction {
    pub txid: Sha256Hash,
    pub timestamp: DateTime<Utc>,
    pub applied: bool,
}

/// `{txid, address, amount}`. Inputs contribute negative amounts, outputs
/// positive; for any validated tx, `sum(movements) == -fee`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    pub txid: Sha256Hash,
    pub address: Address,
    pub amount: Amount,
}

/// spec.md §3: `{txid, rejecting_domain, signature}` — an attestation that a
/// transaction is invalid against the rejecting peer's ledger view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub txid: Sha256Hash,
    pub rejecting_domain: String,
    pub signature: String,
}
