//! spec.md §4.3: address → (balance, last-updated) and the apply-epoch
//! operation. `balance_at` is the view transaction validation uses so two
//! conflicting spends within a single epoch cannot both validate.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use staeon_core::{Address, Amount, LedgerEntry, Movement};

pub struct Ledger {
    entries: RwLock<HashMap<Address, LedgerEntry>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn seed(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        let map = entries.into_iter().map(|e| (e.address.clone(), e)).collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    pub fn entry(&self, address: &Address) -> Option<LedgerEntry> {
        self.entries.read().get(address).cloned()
    }

    fn stored_balance(&self, address: &Address) -> Amount {
        self.entries
            .read()
            .get(address)
            .map(|e| e.balance)
            .unwrap_or(Amount::ZERO)
    }

    /// spec.md §4.3 `balance_at(address, ts)`: the stored balance plus every
    /// pending-epoch movement whose owning tx is old enough
    /// (`tx.timestamp < ts - propagation_window`) to have safely propagated.
    /// `pending` is the current epoch's movements paired with their tx
    /// timestamp, typically from [`crate::mempool::Mempool::movements_for_epoch`].
    pub fn balance_at(
        &self,
        address: &Address,
        ts: DateTime<Utc>,
        propagation_window: Duration,
        pending: &[(Movement, DateTime<Utc>)],
    ) -> (Amount, DateTime<Utc>) {
        let cutoff = ts - propagation_window;
        let mut balance = self.stored_balance(address);
        let mut last_touch = self
            .entries
            .read()
            .get(address)
            .map(|e| e.last_updated)
            .unwrap_or(ts);
        for (movement, tx_ts) in pending {
            if &movement.address == address && *tx_ts < cutoff {
                balance = balance.checked_add(movement.amount).unwrap_or(balance);
                if *tx_ts > last_touch {
                    last_touch = *tx_ts;
                }
            }
        }
        (balance, last_touch)
    }

    /// spec.md §4.3 `apply_epoch`: `movements` must already be sorted by
    /// `(timestamp, txid)` by the caller (the per-epoch total order spec.md
    /// §5(i) requires). Idempotent only if called once per epoch — the
    /// caller (`EpochCloser`) enforces at-most-once via `CloseError::AlreadyClosed`.
    pub fn apply_movements(&self, movements: &[(Movement, DateTime<Utc>)]) {
        let mut entries = self.entries.write();
        for (movement, ts) in movements {
            let entry = entries
                .entry(movement.address.clone())
                .or_insert_with(|| LedgerEntry::fresh(movement.address.clone(), *ts));
            entry.balance = entry
                .balance
                .checked_add(movement.amount)
                .unwrap_or(entry.balance);
            entry.last_updated = *ts;
        }
    }

    pub fn total_balance(&self) -> Amount {
        self.entries
            .read()
            .values()
            .fold(Amount::ZERO, |acc, e| acc.checked_add(e.balance).unwrap_or(acc))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ledger entries sorted balance desc, address asc — the order
    /// `make_epoch_seed` (spec.md §4.7) hashes over.
    pub fn entries_sorted_for_seed(&self) -> Vec<LedgerEntry> {
        let mut v: Vec<_> = self.entries.read().values().cloned().collect();
        v.sort_by(|a, b| {
            b.balance
                .units()
                .cmp(&a.balance.units())
                .then_with(|| a.address.as_str().cmp(b.address.as_str()))
        });
        v
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staeon_core::Sha256Hash;

    fn addr(n: u8) -> Address {
        Address::from_payload(&[n; 20])
    }

    #[test]
    fn balance_at_excludes_movements_inside_propagation_window() {
        let ledger = Ledger::new();
        let a = addr(1);
        let ts = chrono::Utc::now();
        let movement = Movement {
            txid: Sha256Hash::of(b"tx"),
            address: a.clone(),
            amount: Amount::from_units(500_000_000),
        };
        let pending = vec![(movement, ts)];
        let (balance, _) = ledger.balance_at(&a, ts + Duration::seconds(5), Duration::seconds(10), &pending);
        assert_eq!(balance, Amount::ZERO);
        let (balance, _) = ledger.balance_at(&a, ts + Duration::seconds(11), Duration::seconds(10), &pending);
        assert_eq!(balance, Amount::from_units(500_000_000));
    }

    #[test]
    fn apply_movements_creates_and_updates_entries() {
        let ledger = Ledger::new();
        let a = addr(2);
        let ts = chrono::Utc::now();
        let movements = vec![(
            Movement {
                txid: Sha256Hash::of(b"tx"),
                address: a.clone(),
                amount: Amount::from_units(200_000_000),
            },
            ts,
        )];
        ledger.apply_movements(&movements);
        assert_eq!(ledger.entry(&a).unwrap().balance, Amount::from_units(200_000_000));
    }
}
