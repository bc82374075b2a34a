use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::AddressError;

/// The version byte whose base58check encoding always begins with "1",
/// mirroring Bitcoin's P2PKH class (spec.md §3: "restricted to the '1'
/// prefix class").
pub const VERSION_BYTE: u8 = 0x00;

/// A validated base58check address string of the "1" prefix class.
///
/// Validation is purely syntactic (length, prefix, checksum) — it does not
/// imply the address was ever derived from a real public key. That guarantee
/// only holds for addresses recovered from a verified signature.
///
/// Deserialization always re-runs [`Address::parse`], so any `Address` field
/// that has come off the wire (a `Transaction`'s inputs/outputs, a `Peer`'s
/// `payout_address`, …) is already guaranteed to be class-"1" and
/// checksum-valid — the "every output address is of the '1' class"
/// invariant (spec.md §3) is enforced here rather than re-checked by callers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        if s.len() < 25 || s.len() > 35 {
            return Err(AddressError::BadLength(s.len()));
        }
        if !s.starts_with('1') {
            return Err(AddressError::WrongClass);
        }
        let payload = bs58::decode(s)
            .into_vec()
            .map_err(|_| AddressError::BadEncoding)?;
        if payload.len() < 5 {
            return Err(AddressError::BadEncoding);
        }
        let (body, checksum) = payload.split_at(payload.len() - 4);
        let digest1 = Sha256::digest(body);
        let digest2 = Sha256::digest(digest1);
        if &digest2[0..4] != checksum {
            return Err(AddressError::BadChecksum);
        }
        if body.first().copied() != Some(VERSION_BYTE) {
            return Err(AddressError::WrongClass);
        }
        Ok(Address(s.to_string()))
    }

    /// Builds the base58check string for a 20-byte public-key hash under
    /// [`VERSION_BYTE`]. Used by `staeon-crypto::pubkey_to_address`.
    pub fn from_payload(hash160: &[u8; 20]) -> Self {
        let mut body = Vec::with_capacity(21);
        body.push(VERSION_BYTE);
        body.extend_from_slice(hash160);
        let digest1 = Sha256::digest(&body);
        let digest2 = Sha256::digest(digest1);
        body.extend_from_slice(&digest2[0..4]);
        Address(bs58::encode(body).into_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl TryFrom<&str> for Address {
    type Error = AddressError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Address::parse(value)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_payload() {
        let addr = Address::from_payload(&[7u8; 20]);
        assert!(addr.as_str().starts_with('1'));
        let reparsed = Address::parse(addr.as_str()).unwrap();
        assert_eq!(addr, reparsed);
    }

    #[test]
    fn rejects_wrong_class() {
        // version byte 5 (P2SH-style "3...") re-encoded should fail class check.
        let mut body = vec![0x05u8];
        body.extend_from_slice(&[1u8; 20]);
        let digest1 = Sha256::digest(&body);
        let digest2 = Sha256::digest(digest1);
        body.extend_from_slice(&digest2[0..4]);
        let s = bs58::encode(body).into_string();
        assert!(matches!(Address::parse(&s), Err(AddressError::WrongClass)));
    }

    #[test]
    fn rejects_bad_checksum() {
        let addr = Address::from_payload(&[9u8; 20]);
        let mut corrupted = addr.into_string();
        corrupted.push('x');
        assert!(Address::parse(&corrupted).is_err());
    }
}
