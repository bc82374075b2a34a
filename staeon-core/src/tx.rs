use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::address::Address;
use crate::amount::Amount;
use crate::hash::Sha256Hash;

pub const MIN_FEE_FIXED8: &str = "0.01000000";

pub fn min_fee() -> Amount {
    Amount::parse_fixed8(MIN_FEE_FIXED8).expect("min fee literal is well-formed")
}

/// One spending reference: `[address, amount, signature_b64]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub address: Address,
    pub amount: Amount,
    pub signature: String,
}

/// One payment destination: `[address, amount]` on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub timestamp: DateTime<Utc>,
    pub txid: Sha256Hash,
}

impl Serialize for TxInput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.address)?;
        seq.serialize_element(&self.amount)?;
        seq.serialize_element(&self.signature)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TxInput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TxInputVisitor;
        impl<'de> Visitor<'de> for TxInputVisitor {
            type Value = TxInput;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [address, amount, signature] triple")
            }
            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TxInput, A::Error> {
                let address: Address = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                let amount: Amount = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?;
                let signature: String = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(2, &self))?;
                Ok(TxInput {
                    address,
                    amount,
                    signature,
                })
            }
        }
        deserializer.deserialize_seq(TxInputVisitor)
    }
}

impl Serialize for TxOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.address)?;
        seq.serialize_element(&self.amount)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TxOutput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TxOutputVisitor;
        impl<'de> Visitor<'de> for TxOutputVisitor {
            type Value = TxOutput;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an [address, amount] pair")
            }
            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TxOutput, A::Error> {
                let address: Address = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                let amount: Amount = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?;
                Ok(TxOutput { address, amount })
            }
        }
        deserializer.deserialize_seq(TxOutputVisitor)
    }
}

fn timestamp_str(ts: DateTime<Utc>) -> String {
    // Matches the Python ISO format with microsecond precision the original
    // node's `datetime.isoformat()` produces.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Outputs taken in ascending order by address, per spec.md §4.2.
fn outputs_in_canonical_order(outputs: &[TxOutput]) -> Vec<&TxOutput> {
    let mut sorted: Vec<&TxOutput> = outputs.iter().collect();
    sorted.sort_by(|a, b| a.address.as_str().cmp(b.address.as_str()));
    sorted
}

/// `make_txid(tx)` from spec.md §4.2: SHA-256 of
/// `timestamp || sum(out.address || fixed8(amount)) || sum(in.address || fixed8(amount))`,
/// outputs sorted ascending by address, inputs in maker-supplied order.
pub fn make_txid(
    inputs: &[TxInput],
    outputs: &[TxOutput],
    timestamp: DateTime<Utc>,
) -> Sha256Hash {
    let mut msg = timestamp_str(timestamp);
    for out in outputs_in_canonical_order(outputs) {
        msg.push_str(out.address.as_str());
        msg.push_str(&out.amount.fixed8());
    }
    for input in inputs {
        msg.push_str(input.address.as_str());
        msg.push_str(&input.amount.fixed8());
    }
    Sha256Hash::of(msg.as_bytes())
}

/// The output half of the per-input signing message: `addr,amount` pairs in
/// canonical order joined by `;`, with the timestamp appended as the final
/// joined element — matching `tx_util.py::_process_outputs`.
fn canonical_output_message(outputs: &[TxOutput], timestamp: DateTime<Utc>) -> String {
    let mut parts: Vec<String> = outputs_in_canonical_order(outputs)
        .into_iter()
        .map(|out| format!("{},{}", out.address, out.amount.fixed8()))
        .collect();
    parts.push(timestamp_str(timestamp));
    parts.join(";")
}

/// The exact message an input's signature must cover (spec.md §4.2):
/// `address || fixed8(amount) || ";".join(out.address "," fixed8(out.amount)) || timestamp`.
pub fn input_signing_message(
    address: &Address,
    amount: Amount,
    outputs: &[TxOutput],
    timestamp: DateTime<Utc>,
) -> Vec<u8> {
    let mut msg = String::new();
    msg.push_str(address.as_str());
    msg.push_str(&amount.fixed8());
    msg.push_str(&canonical_output_message(outputs, timestamp));
    msg.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn addr(n: u8) -> Address {
        Address::from_payload(&[n; 20])
    }

    #[test]
    fn txid_is_stable_for_fixed_inputs() {
        let ts = Utc.with_ymd_and_hms(2019, 2, 14, 10, 5, 0).unwrap();
        let outputs = vec![
            TxOutput {
                address: addr(2),
                amount: Amount::from_f64(2.2).unwrap(),
            },
            TxOutput {
                address: addr(1),
                amount: Amount::from_f64(0.99).unwrap(),
            },
        ];
        let inputs = vec![TxInput {
            address: addr(3),
            amount: Amount::from_f64(3.2).unwrap(),
            signature: "sig".into(),
        }];
        let txid1 = make_txid(&inputs, &outputs, ts);
        let txid2 = make_txid(&inputs, &outputs, ts);
        assert_eq!(txid1, txid2);
    }

    #[test]
    fn txid_independent_of_output_array_order() {
        let ts = Utc.with_ymd_and_hms(2019, 2, 14, 10, 5, 0).unwrap();
        let a = addr(1);
        let b = addr(2);
        let amt = Amount::from_f64(1.0).unwrap();
        let forward = vec![
            TxOutput { address: a.clone(), amount: amt },
            TxOutput { address: b.clone(), amount: amt },
        ];
        let backward = vec![
            TxOutput { address: b, amount: amt },
            TxOutput { address: a, amount: amt },
        ];
        assert_eq!(
            make_txid(&[], &forward, ts),
            make_txid(&[], &backward, ts)
        );
    }

    #[test]
    fn signing_message_changes_with_any_field() {
        let ts = Utc.with_ymd_and_hms(2019, 2, 14, 10, 5, 0).unwrap();
        let outputs = vec![TxOutput {
            address: addr(1),
            amount: Amount::from_f64(1.0).unwrap(),
        }];
        let base = input_signing_message(&addr(9), Amount::from_f64(2.0).unwrap(), &outputs, ts);
        let mutated_amount =
            input_signing_message(&addr(9), Amount::from_f64(2.00000001).unwrap(), &outputs, ts);
        assert_ne!(base, mutated_amount);
    }
}
