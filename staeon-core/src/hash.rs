use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest, serialized as 64 lowercase hex characters
/// (spec.md §3: `txid: Hash`, §6: `"txid":"<64 hex>"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Sha256Hash(out)
    }

    pub fn of_hash(bytes: &Sha256Hash) -> Self {
        Self::of(&bytes.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// The leading `width` hex characters, used for mini-hashes (spec.md §4.7).
    pub fn hex_prefix(self, width: usize) -> String {
        let full = self.to_hex();
        full[..width.min(full.len())].to_string()
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Sha256Hash(arr))
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Sha256Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha256Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Sha256Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Iteratively hashes `seed` `count` times, taking an 8-hex-char prefix of
/// each successive digest. spec.md §4.7 / §9 open question (e): width fixed
/// at 8 hex chars (4 bytes), count is the `limit` parameter (default 5).
pub fn mini_hashes(seed: Sha256Hash, count: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(count);
    let mut current = seed;
    for _ in 0..count {
        current = Sha256Hash::of_hash(&current);
        out.push(current.hex_prefix(8));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let h = Sha256Hash::of(b"hello");
        let s = h.to_hex();
        assert_eq!(s.len(), 64);
        assert_eq!(Sha256Hash::from_hex(&s).unwrap(), h);
    }

    #[test]
    fn mini_hashes_are_deterministic_and_distinct() {
        let seed = Sha256Hash::of(b"epoch-seed");
        let a = mini_hashes(seed, 5);
        let b = mini_hashes(seed, 5);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        assert!(a.iter().all(|h| h.len() == 8));
        let unique: std::collections::HashSet<_> = a.iter().collect();
        assert_eq!(unique.len(), 5);
    }
}
