#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::validate_token;
use crate::{ContractViolation, Validate};

/// 20-byte chain address, always held as lowercase `0x`-prefixed hex so that
/// equality and ordering are case-insensitive by construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainAddress(String);

impl ChainAddress {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ContractViolation> {
        let v = Self(raw.as_ref().trim().to_ascii_lowercase());
        v.validate()?;
        Ok(v)
    }

    /// Builds an address from the trailing 20 bytes of a 32-byte ABI word.
    pub fn from_word_bytes(bytes: &[u8; 20]) -> Self {
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for b in bytes {
            out.push_str(&format!("{b:02x}"));
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hex_body(&self) -> &str {
        &self.0[2..]
    }

    pub fn is_zero(&self) -> bool {
        self.hex_body().bytes().all(|b| b == b'0')
    }

    /// Shortened form for logs and user-visible diagnostics.
    pub fn redacted(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[36..])
    }
}

impl Validate for ChainAddress {
    fn validate(&self) -> Result<(), ContractViolation> {
        let valid = self.0.len() == 42
            && self.0.starts_with("0x")
            && self.0.bytes().skip(2).all(|b| b.is_ascii_hexdigit())
            && !self.0.bytes().skip(2).any(|b| b.is_ascii_uppercase());
        if !valid {
            return Err(ContractViolation::InvalidValue {
                field: "chain_address",
                reason: "must be a 0x-prefixed 20-byte hex string",
            });
        }
        Ok(())
    }
}

impl TryFrom<String> for ChainAddress {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChainAddress> for String {
    fn from(value: ChainAddress) -> Self {
        value.0
    }
}

impl FromStr for ChainAddress {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for RoomId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("room_id", &self.0, 128)
    }
}

impl TryFrom<String> for RoomId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-unit token amount ("1.5" tokens, not base units). Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenAmount(Decimal);

impl TokenAmount {
    pub fn parse(raw: &str) -> Result<Self, ContractViolation> {
        let d = Decimal::from_str(raw.trim()).map_err(|_| ContractViolation::InvalidValue {
            field: "token_amount",
            reason: "must be a plain decimal number",
        })?;
        let v = Self(d);
        v.validate()?;
        Ok(v)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl Validate for TokenAmount {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_sign_negative() && !self.0.is_zero() {
            return Err(ContractViolation::InvalidValue {
                field: "token_amount",
                reason: "must not be negative",
            });
        }
        Ok(())
    }
}

impl TryFrom<String> for TokenAmount {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TokenAmount> for String {
    fn from(value: TokenAmount) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_addr_01_addresses_are_canonicalized_lowercase() {
        let a = ChainAddress::new("0xAbCdEf0000000000000000000000000000000001").unwrap();
        let b = ChainAddress::new("0xabcdef0000000000000000000000000000000001").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabcdef0000000000000000000000000000000001");
    }

    #[test]
    fn at_addr_02_malformed_addresses_are_rejected() {
        assert!(ChainAddress::new("0x1234").is_err());
        assert!(ChainAddress::new("abcdef0000000000000000000000000000000001").is_err());
        assert!(ChainAddress::new("0xzzcdef0000000000000000000000000000000001").is_err());
    }

    #[test]
    fn at_addr_03_deserialization_goes_through_validation() {
        let ok: ChainAddress =
            serde_json::from_str("\"0xAAAA000000000000000000000000000000000001\"").unwrap();
        assert_eq!(ok.as_str(), "0xaaaa000000000000000000000000000000000001");
        assert!(serde_json::from_str::<ChainAddress>("\"0x12\"").is_err());
        assert!(serde_json::from_str::<RoomId>("\"has space\"").is_err());
    }

    #[test]
    fn at_addr_04_token_amount_rejects_negative_and_garbage() {
        assert_eq!(TokenAmount::parse("1.50").unwrap().to_string(), "1.5");
        assert!(TokenAmount::parse("-1").is_err());
        assert!(TokenAmount::parse("1e18x").is_err());
        assert!(TokenAmount::parse("").is_err());
    }

    #[test]
    fn at_addr_05_redacted_keeps_prefix_and_suffix() {
        let a = ChainAddress::new("0x1234560000000000000000000000000000abcdef").unwrap();
        assert_eq!(a.redacted(), "0x1234…abcdef");
    }
}
