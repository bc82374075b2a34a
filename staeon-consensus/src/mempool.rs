//! spec.md §4.4: the set of validated transactions for the current/recent
//! epoch and the per-tx rejection tally, plus `accept_tx`'s validation
//! pipeline (syntactic, timestamp, then state).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use staeon_core::{clock, min_fee, Address, Amount, Movement, Rejection, Sha256Hash, Transaction, TxError, ValidatedTransaction};

use crate::error::AcceptError;
use crate::ledger::Ledger;

/// `tx_util.py::make_transaction_authorization`/`validate_transaction_authorization`
/// (spec.md "Supplemented from original_source"): a node signs `txid ||
/// domain` with its payout key when forwarding a transaction it has already
/// validated against its own ledger state, so the receiving peer can skip
/// re-running `balance_at` for a transaction a trusted peer already vouches
/// for. Optional on the wire — a receiver that doesn't recognize the field
/// just falls back to full state validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxAuthorization {
    pub txid: Sha256Hash,
    pub domain: String,
    pub signature: String,
}

impl TxAuthorization {
    pub fn signing_message(txid: Sha256Hash, domain: &str) -> Vec<u8> {
        let mut msg = txid.to_hex();
        msg.push_str(domain);
        msg.into_bytes()
    }
}

/// Builds a signed authorization for `txid`, as the forwarding peer named
/// `domain`.
pub fn build_tx_authorization(txid: Sha256Hash, domain: &str, sign: impl FnOnce(&[u8]) -> String) -> TxAuthorization {
    let message = TxAuthorization::signing_message(txid, domain);
    TxAuthorization {
        txid,
        domain: domain.to_string(),
        signature: sign(&message),
    }
}

/// Verifies that `authorization` recovers to `authorizer_payout_address` —
/// the caller looks up that address from its own [`crate::peerset::PeerSet`]
/// for `authorization.domain` before trusting the vouch.
pub fn verify_tx_authorization(authorization: &TxAuthorization, authorizer_payout_address: &Address) -> bool {
    let message = TxAuthorization::signing_message(authorization.txid, &authorization.domain);
    staeon_crypto::recover(&message, &authorization.signature)
        .map(|pk| &staeon_crypto::pubkey_to_address(&pk) == authorizer_payout_address)
        .unwrap_or(false)
}

pub enum AcceptOutcome {
    /// spec.md §4.4 step 1: txid already known, at-most-once no-op.
    AlreadyKnown,
    Accepted(ValidatedTransaction),
    /// RejectedTransaction: well-formed but state-invalid. Carries the
    /// self-Rejection this node records and gossips.
    Rejected(ValidatedTransaction, Rejection),
}

struct MempoolEntry {
    epoch: i64,
    validated: ValidatedTransaction,
    movements: Vec<Movement>,
    rejections: Vec<Rejection>,
}

pub struct Mempool {
    ledger: Arc<Ledger>,
    entries: RwLock<HashMap<Sha256Hash, MempoolEntry>>,
}

impl Mempool {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn pending_for_epoch(
        &self,
        epoch: i64,
        include: impl Fn(&Sha256Hash) -> bool,
    ) -> Vec<(Movement, DateTime<Utc>)> {
        self.entries
            .read()
            .values()
            .filter(|e| e.epoch == epoch && include(&e.validated.txid))
            .flat_map(|e| {
                let ts = e.validated.timestamp;
                e.movements.iter().cloned().map(move |m| (m, ts))
            })
            .collect()
    }

    /// All pending movements for `epoch`, used by ledger state validation
    /// during `accept_tx` (every candidate tx is eligible regardless of
    /// rejection status — §4.3's rejection-dominance filter only matters at
    /// `apply_epoch`, not during admission).
    pub fn movements_for_epoch(&self, epoch: i64) -> Vec<(Movement, DateTime<Utc>)> {
        self.pending_for_epoch(epoch, |_| true)
    }

    pub fn movements_for_epoch_filtered(
        &self,
        epoch: i64,
        include: impl Fn(&Sha256Hash) -> bool,
    ) -> Vec<(Movement, DateTime<Utc>)> {
        self.pending_for_epoch(epoch, include)
    }

    pub fn filter_for_epoch(&self, epoch: i64) -> Vec<ValidatedTransaction> {
        self.entries
            .read()
            .values()
            .filter(|e| e.epoch == epoch)
            .map(|e| e.validated.clone())
            .collect()
    }

    pub fn clear_epoch(&self, epoch: i64) {
        self.entries.write().retain(|_, e| e.epoch != epoch);
    }

    /// The input/output movements recorded for `txid`, if known — used to
    /// persist the `Movement` rows a just-accepted transaction produces
    /// (spec.md §6 "Persisted state layout": `Movement` indexed by `(tx,
    /// address)` and by `address`, backing `/staeon/ledger/?sync_start=`).
    pub fn movements_for_txid(&self, txid: &Sha256Hash) -> Vec<Movement> {
        self.entries
            .read()
            .get(txid)
            .map(|e| e.movements.clone())
            .unwrap_or_default()
    }

    pub fn rejections_for(&self, txid: &Sha256Hash) -> Vec<Rejection> {
        self.entries
            .read()
            .get(txid)
            .map(|e| e.rejections.clone())
            .unwrap_or_default()
    }

    /// Records a Rejection received from a peer (or self). Returns `false`
    /// if that domain already rejected this tx (at-most-once per domain).
    pub fn record_rejection(&self, rejection: Rejection) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&rejection.txid) else {
            return false;
        };
        if entry
            .rejections
            .iter()
            .any(|r| r.rejecting_domain == rejection.rejecting_domain)
        {
            return false;
        }
        entry.rejections.push(rejection);
        true
    }

    /// spec.md §4.4 `accept_tx`. `now` is wall-clock time for timestamp
    /// validation; `my_domain`/`sign_rejection` produce the self-Rejection
    /// attestation on state-invalid (but well-formed) transactions.
    pub fn accept_tx(
        &self,
        tx: Transaction,
        now: DateTime<Utc>,
        my_domain: &str,
        sign_rejection: impl FnOnce(&[u8]) -> String,
    ) -> Result<AcceptOutcome, AcceptError> {
        self.accept_tx_inner(tx, now, my_domain, sign_rejection, false)
    }

    /// As [`Mempool::accept_tx`], but `vouched` means the caller has already
    /// verified a [`TxAuthorization`] from a known peer for this tx — skips
    /// the `balance_at` state-validity recheck, trusting the forwarding
    /// peer's own prior validation (spec.md supplement, see module docs).
    pub fn accept_tx_authorized(
        &self,
        tx: Transaction,
        now: DateTime<Utc>,
        my_domain: &str,
        sign_rejection: impl FnOnce(&[u8]) -> String,
    ) -> Result<AcceptOutcome, AcceptError> {
        self.accept_tx_inner(tx, now, my_domain, sign_rejection, true)
    }

    fn accept_tx_inner(
        &self,
        tx: Transaction,
        now: DateTime<Utc>,
        my_domain: &str,
        sign_rejection: impl FnOnce(&[u8]) -> String,
        vouched: bool,
    ) -> Result<AcceptOutcome, AcceptError> {
        if self.entries.read().contains_key(&tx.txid) {
            return Ok(AcceptOutcome::AlreadyKnown);
        }

        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(TxError::Empty.into());
        }

        let mut total_in = Amount::ZERO;
        for input in &tx.inputs {
            if !input.amount.is_positive() {
                return Err(TxError::NonPositiveInput.into());
            }
            let msg = staeon_core::input_signing_message(
                &input.address,
                input.amount,
                &tx.outputs,
                tx.timestamp,
            );
            let recovers = staeon_crypto::recover(&msg, &input.signature)
                .map(|pk| staeon_crypto::pubkey_to_address(&pk) == input.address)
                .unwrap_or(false);
            if !recovers {
                return Err(TxError::BadSignature.into());
            }
            total_in = total_in
                .checked_add(input.amount)
                .ok_or(TxError::InsufficientInputs)?;
        }

        let mut total_out = Amount::ZERO;
        for output in &tx.outputs {
            if !output.amount.is_positive() {
                return Err(TxError::NonPositiveOutput.into());
            }
            total_out = total_out
                .checked_add(output.amount)
                .ok_or(TxError::InsufficientInputs)?;
        }

        let fee = total_in
            .checked_sub(total_out)
            .ok_or(TxError::InsufficientInputs)?;
        if fee.is_negative() {
            return Err(TxError::InsufficientInputs.into());
        }
        let floor = min_fee();
        if fee.units() < floor.units() {
            return Err(TxError::BelowMinFee {
                actual: fee.fixed8(),
                min: floor.fixed8(),
            }
            .into());
        }

        clock::validate_timestamp(tx.timestamp, now).map_err(TxError::from)?;

        let epoch = clock::epoch_of(tx.timestamp);
        let pending = self.movements_for_epoch(epoch);
        let propagation_window = Duration::seconds(clock::PROPAGATION_WINDOW_SECS);
        let mut state_valid = true;
        if !vouched {
            for input in &tx.inputs {
                let (balance, last_used) =
                    self.ledger
                        .balance_at(&input.address, tx.timestamp, propagation_window, &pending);
                if balance.units() < input.amount.units() || last_used >= tx.timestamp {
                    state_valid = false;
                    break;
                }
            }
        }

        let mut movements: Vec<Movement> = tx
            .inputs
            .iter()
            .map(|i| Movement {
                txid: tx.txid,
                address: i.address.clone(),
                amount: i.amount.neg(),
            })
            .collect();
        movements.extend(tx.outputs.iter().map(|o| Movement {
            txid: tx.txid,
            address: o.address.clone(),
            amount: o.amount,
        }));

        let validated = ValidatedTransaction {
            txid: tx.txid,
            timestamp: tx.timestamp,
            applied: false,
        };

        let mut entries = self.entries.write();
        if !state_valid {
            let rejection = Rejection {
                txid: tx.txid,
                rejecting_domain: my_domain.to_string(),
                signature: sign_rejection(tx.txid.as_bytes()),
            };
            entries.insert(
                tx.txid,
                MempoolEntry {
                    epoch,
                    validated: validated.clone(),
                    movements,
                    rejections: vec![rejection.clone()],
                },
            );
            return Ok(AcceptOutcome::Rejected(validated, rejection));
        }

        entries.insert(
            tx.txid,
            MempoolEntry {
                epoch,
                validated: validated.clone(),
                movements,
                rejections: Vec::new(),
            },
        );
        Ok(AcceptOutcome::Accepted(validated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staeon_core::{clock::GENESIS, Address, LedgerEntry, TxInput, TxOutput};

    fn sample_tx(ts: DateTime<Utc>) -> (Transaction, staeon_crypto::KeyMaterial) {
        let kp = staeon_crypto::generate_keypair();
        let from = staeon_crypto::pubkey_to_address(&kp.public_key);
        let to = Address::from_payload(&[9u8; 20]);
        let outputs = vec![TxOutput {
            address: to,
            amount: Amount::from_f64(1.0).unwrap(),
        }];
        let amount = Amount::from_f64(1.01).unwrap();
        let msg = staeon_core::input_signing_message(&from, amount, &outputs, ts);
        let sig = staeon_crypto::sign(&msg, &kp.secret_key);
        let inputs = vec![TxInput {
            address: from,
            amount,
            signature: sig,
        }];
        (
            Transaction {
                txid: staeon_core::make_txid(&inputs, &outputs, ts),
                inputs,
                outputs,
                timestamp: ts,
            },
            kp,
        )
    }

    #[test]
    fn rejects_insufficient_balance() {
        let ledger = Arc::new(Ledger::new());
        let mempool = Mempool::new(ledger);
        let ts = *GENESIS + Duration::minutes(5);
        let (tx, _kp) = sample_tx(ts);
        let now = ts;
        let outcome = mempool
            .accept_tx(tx, now, "node.example", |_| String::new())
            .unwrap();
        match outcome {
            AcceptOutcome::Rejected(_, rejection) => {
                assert_eq!(rejection.rejecting_domain, "node.example");
            }
            _ => panic!("expected rejection for unfunded input"),
        }
    }

    #[test]
    fn at_most_once_recording() {
        let ledger = Arc::new(Ledger::new());
        let mempool = Mempool::new(ledger);
        let ts = *GENESIS + Duration::minutes(5);
        let (tx, _kp) = sample_tx(ts);
        let now = ts;
        mempool
            .accept_tx(tx.clone(), now, "node.example", |_| String::new())
            .unwrap();
        let second = mempool
            .accept_tx(tx, now, "node.example", |_| String::new())
            .unwrap();
        assert!(matches!(second, AcceptOutcome::AlreadyKnown));
    }

    #[test]
    fn accepted_tx_records_input_and_output_movements() {
        let kp = staeon_crypto::generate_keypair();
        let from = staeon_crypto::pubkey_to_address(&kp.public_key);
        let ts = *GENESIS + Duration::minutes(5);
        let funded = LedgerEntry {
            address: from.clone(),
            balance: Amount::from_f64(5.0).unwrap(),
            last_updated: ts - Duration::minutes(1),
        };
        let ledger = Arc::new(Ledger::seed([funded]));
        let mempool = Mempool::new(ledger);

        let to = Address::from_payload(&[9u8; 20]);
        let outputs = vec![TxOutput {
            address: to,
            amount: Amount::from_f64(1.0).unwrap(),
        }];
        let amount = Amount::from_f64(1.01).unwrap();
        let msg = staeon_core::input_signing_message(&from, amount, &outputs, ts);
        let sig = staeon_crypto::sign(&msg, &kp.secret_key);
        let inputs = vec![TxInput {
            address: from,
            amount,
            signature: sig,
        }];
        let tx = Transaction {
            txid: staeon_core::make_txid(&inputs, &outputs, ts),
            inputs,
            outputs,
            timestamp: ts,
        };
        let txid = tx.txid;

        let outcome = mempool.accept_tx(tx, ts, "node.example", |_| String::new()).unwrap();
        assert!(matches!(outcome, AcceptOutcome::Accepted(_)));

        let movements = mempool.movements_for_txid(&txid);
        assert_eq!(movements.len(), 2);
        assert!(movements.iter().any(|m| m.amount.is_negative()));
        assert!(movements.iter().any(|m| m.amount.is_positive()));
    }
}
