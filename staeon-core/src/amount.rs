use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::AmountError;

/// A fixed-point amount with exactly 8 fractional digits, per spec.md §3.
///
/// Stored as an integer count of 1e-8 units so that `fixed8()` — the
/// canonical string form fed into txid/signature hashing — never passes
/// through float rounding. The wire format (`amount_float` in JSON) is a
/// float, but the hash inputs are always derived from this integer form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub const SCALE: i64 = 100_000_000;
    pub const ZERO: Amount = Amount(0);

    pub fn from_units(units: i64) -> Self {
        Amount(units)
    }

    pub fn units(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn neg(self) -> Amount {
        Amount(-self.0)
    }

    /// `fixed8(x) = printf("%.8f", x)` from spec.md §4.2, computed from an f64.
    /// Rounds the same way `printf`/Python's `"%.8f" %` would: to the nearest
    /// 1e-8 unit, half away from zero.
    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::NotFinite);
        }
        let formatted = format!("{:.8}", value);
        Self::parse_fixed8(&formatted)
    }

    /// Parses a string already in `fixed8` form (`-?\d+\.\d{8}`).
    pub fn parse_fixed8(s: &str) -> Result<Self, AmountError> {
        let negative = s.starts_with('-');
        let unsigned = s.strip_prefix('-').unwrap_or(s);
        let mut parts = unsigned.splitn(2, '.');
        let int_part = parts.next().unwrap_or("");
        let frac_part = parts.next().unwrap_or("");
        if int_part.is_empty()
            || frac_part.len() != 8
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(AmountError::BadFormat(s.to_string()));
        }
        let int_val: i64 = int_part
            .parse()
            .map_err(|_| AmountError::BadFormat(s.to_string()))?;
        let frac_val: i64 = frac_part
            .parse()
            .map_err(|_| AmountError::BadFormat(s.to_string()))?;
        let magnitude = int_val
            .checked_mul(Self::SCALE)
            .and_then(|v| v.checked_add(frac_val))
            .ok_or(AmountError::Overflow)?;
        Ok(Amount(if negative { -magnitude } else { magnitude }))
    }

    /// The canonical `%.8f`-equivalent string, computed without float rounding.
    pub fn fixed8(self) -> String {
        let negative = self.0 < 0;
        let abs = self.0.unsigned_abs();
        let int_part = abs / Self::SCALE as u64;
        let frac_part = abs % Self::SCALE as u64;
        format!(
            "{}{}.{:08}",
            if negative { "-" } else { "" },
            int_part,
            frac_part
        )
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fixed8())
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Amount::from_f64(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed8_roundtrip() {
        let a = Amount::from_f64(3.2).unwrap();
        assert_eq!(a.fixed8(), "3.20000000");
        assert_eq!(Amount::parse_fixed8(&a.fixed8()).unwrap(), a);
    }

    #[test]
    fn fee_arithmetic() {
        let inputs = Amount::from_f64(3.2).unwrap();
        let outputs = Amount::from_f64(2.2).unwrap()
            .checked_add(Amount::from_f64(0.99).unwrap())
            .unwrap();
        let fee = inputs.checked_sub(outputs).unwrap();
        assert_eq!(fee.fixed8(), "0.01000000");
    }

    #[test]
    fn rejects_non_finite() {
        assert!(Amount::from_f64(f64::NAN).is_err());
        assert!(Amount::from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn rejects_malformed_string() {
        assert!(Amount::parse_fixed8("1.2").is_err());
        assert!(Amount::parse_fixed8("abc.12345678").is_err());
    }
}
