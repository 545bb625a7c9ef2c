use alloy::primitives::{
    B256,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    str::FromStr,
};

/// Canonical 32-byte identifier: a transaction hash, a published option hash,
/// or a call-selector seed padded to full width.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(B256);

impl Identifier {
    pub const ZERO: Identifier = Identifier(B256::ZERO);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(B256::new(bytes))
    }

    /// Left-pads a 4-byte method selector to 32 bytes.
    pub fn from_selector(selector: [u8; 4]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[28..].copy_from_slice(&selector);
        Self::new(bytes)
    }

    pub fn as_b256(&self) -> B256 {
        self.0
    }

    pub fn as_u256(&self) -> U256 {
        U256::from_be_bytes(self.0.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0.0
    }
}

impl From<B256> for Identifier {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl From<U256> for Identifier {
    fn from(value: U256) -> Self {
        Self(B256::from(value.to_be_bytes::<32>()))
    }
}

impl From<Identifier> for B256 {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierParseError {
    #[error("identifier has {0} hex digits, at most 64 allowed")]
    TooLong(usize),
    #[error("identifier is not valid hex: {0}")]
    InvalidHex(String),
}

impl FromStr for Identifier {
    type Err = IdentifierParseError;

    /// Accepts any hex string up to 64 digits, with or without `0x`, and
    /// left-pads it to 32 bytes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);
        if digits.len() > 64 {
            return Err(IdentifierParseError::TooLong(digits.len()));
        }
        let padded = format!("{digits:0>64}");
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&padded, &mut bytes)
            .map_err(|e| IdentifierParseError::InvalidHex(e.to_string()))?;
        Ok(Self::new(bytes))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The method selector of `input`, padded to an identifier. Absent for
/// call-data shorter than a selector.
pub fn short_seed(input: &[u8]) -> Option<Identifier> {
    let selector: [u8; 4] = input.get(..4)?.try_into().ok()?;
    Some(Identifier::from_selector(selector))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn from_str__left_pads_short_hex() {
        // given
        let short = "0x9";

        // when
        let id: Identifier = short.parse().unwrap();

        // then
        assert_eq!(id.as_u256(), U256::from(9u64));
        assert_eq!(
            id.to_string(),
            "0x0000000000000000000000000000000000000000000000000000000000000009"
        );
    }

    #[test]
    fn from_str__accepts_odd_length_and_missing_prefix() {
        let id: Identifier = "abc".parse().unwrap();
        assert_eq!(id.as_u256(), U256::from(0xabcu64));
    }

    #[test]
    fn from_str__rejects_overlong_and_non_hex() {
        let long = format!("0x{}", "1".repeat(65));
        assert_eq!(
            long.parse::<Identifier>(),
            Err(IdentifierParseError::TooLong(65))
        );
        assert!(matches!(
            "0xzz".parse::<Identifier>(),
            Err(IdentifierParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn from_u256__round_trips_through_b256() {
        let value = U256::from(0xdead_beefu64) << 200usize;
        let id = Identifier::from(value);
        assert_eq!(id.as_u256(), value);
        assert_eq!(Identifier::from(id.as_b256()), id);
    }

    #[test]
    fn short_seed__takes_selector_of_call_data() {
        // given
        let input = [0xa9, 0x05, 0x9c, 0xbb, 0x00, 0x01];

        // when
        let seed = short_seed(&input).unwrap();

        // then
        assert_eq!(seed.as_u256(), U256::from(0xa9059cbbu64));
    }

    #[test]
    fn short_seed__is_absent_for_short_input() {
        assert_eq!(short_seed(&[]), None);
        assert_eq!(short_seed(&[0x01, 0x02, 0x03]), None);
    }
}
