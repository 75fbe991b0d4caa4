#![forbid(unsafe_code)]

use std::fmt;

use alloy_primitives::{keccak256, U256};
use thiserror::Error;
use vaultgate_kernel_contracts::address::ChainAddress;
use vaultgate_kernel_contracts::cache::MAX_TOKEN_DECIMALS;

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("invalid function signature")]
    InvalidSignature,
    #[error("payload truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("{field} does not fit")]
    Overflow { field: &'static str },
    #[error("word is not a left-padded address")]
    NotAnAddress,
    #[error("boolean word is not 0 or 1")]
    NotABool,
    #[error("string is not valid utf-8")]
    InvalidUtf8,
    #[error("decimals {0} exceeds the supported maximum")]
    DecimalsOutOfRange(u64),
}

/// First four bytes of keccak-256 over the canonical signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionSelector([u8; 4]);

impl FunctionSelector {
    pub fn from_signature(signature: &str) -> Result<Self, AbiError> {
        let sig = signature.trim();
        let open = sig.find('(').ok_or(AbiError::InvalidSignature)?;
        if open == 0 || !sig.ends_with(')') || sig.contains(char::is_whitespace) {
            return Err(AbiError::InvalidSignature);
        }
        let hash = keccak256(sig.as_bytes());
        let mut out = [0u8; 4];
        out.copy_from_slice(&hash[..4]);
        Ok(Self(out))
    }

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FunctionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Well-known ERC-20 read selectors.
pub mod erc20 {
    use super::FunctionSelector;

    pub const BALANCE_OF: FunctionSelector = FunctionSelector::from_bytes([0x70, 0xa0, 0x82, 0x31]);
    pub const DECIMALS: FunctionSelector = FunctionSelector::from_bytes([0x31, 0x3c, 0xe5, 0x67]);
    pub const SYMBOL: FunctionSelector = FunctionSelector::from_bytes([0x95, 0xd8, 0x9b, 0x41]);
    pub const NAME: FunctionSelector = FunctionSelector::from_bytes([0x06, 0xfd, 0xde, 0x03]);
}

pub fn encode_address(address: &ChainAddress) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    // ChainAddress guarantees 40 lowercase hex digits.
    if let Ok(bytes) = hex::decode(address.hex_body()) {
        word[WORD - bytes.len()..].copy_from_slice(&bytes);
    }
    word
}

pub fn encode_call(selector: FunctionSelector, args: &[[u8; WORD]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + args.len() * WORD);
    out.extend_from_slice(selector.as_bytes());
    for a in args {
        out.extend_from_slice(a);
    }
    out
}

pub fn encode_uint256(value: U256) -> [u8; WORD] {
    value.to_be_bytes::<WORD>()
}

/// Return-data encoding of a single dynamic `string`.
pub fn encode_string(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 * WORD + value.len());
    out.extend_from_slice(&encode_uint256(U256::from(WORD)));
    out.extend_from_slice(&encode_uint256(U256::from(value.len())));
    let mut body = value.as_bytes().to_vec();
    body.resize(value.len().div_ceil(WORD).max(1) * WORD, 0);
    out.extend_from_slice(&body);
    out
}

/// Return-data encoding of a single `address[]`.
pub fn encode_address_array(items: &[ChainAddress]) -> Vec<u8> {
    let mut out = Vec::with_capacity((items.len() + 2) * WORD);
    out.extend_from_slice(&encode_uint256(U256::from(WORD)));
    out.extend_from_slice(&encode_uint256(U256::from(items.len())));
    for a in items {
        out.extend_from_slice(&encode_address(a));
    }
    out
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    let end = offset.checked_add(WORD).ok_or(AbiError::Overflow {
        field: "offset",
    })?;
    data.get(offset..end).ok_or(AbiError::Truncated {
        need: end,
        got: data.len(),
    })
}

fn usize_word(data: &[u8], offset: usize, field: &'static str) -> Result<usize, AbiError> {
    let v = U256::from_be_slice(word_at(data, offset)?);
    if v > U256::from(u32::MAX) {
        return Err(AbiError::Overflow { field });
    }
    Ok(v.as_limbs()[0] as usize)
}

pub fn decode_uint256(data: &[u8]) -> Result<U256, AbiError> {
    Ok(U256::from_be_slice(word_at(data, 0)?))
}

/// Decodes an ERC-20 `decimals()` answer. Anything above 77 cannot be scaled
/// inside a uint256 and is rejected as malformed.
pub fn decode_decimals(data: &[u8]) -> Result<u8, AbiError> {
    let v = decode_uint256(data)?;
    if v > U256::from(MAX_TOKEN_DECIMALS) {
        let shown = if v > U256::from(u64::MAX) {
            u64::MAX
        } else {
            v.as_limbs()[0]
        };
        return Err(AbiError::DecimalsOutOfRange(shown));
    }
    Ok(v.as_limbs()[0] as u8)
}

pub fn decode_bool(data: &[u8]) -> Result<bool, AbiError> {
    let v = decode_uint256(data)?;
    if v == U256::ZERO {
        Ok(false)
    } else if v == U256::from(1u8) {
        Ok(true)
    } else {
        Err(AbiError::NotABool)
    }
}

fn address_from_word(word: &[u8]) -> Result<ChainAddress, AbiError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(AbiError::NotAnAddress);
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(ChainAddress::from_word_bytes(&bytes))
}

pub fn decode_address(data: &[u8]) -> Result<ChainAddress, AbiError> {
    address_from_word(word_at(data, 0)?)
}

/// Decodes a dynamic `string`. Legacy tokens that return `bytes32` for
/// `symbol()`/`name()` answer with exactly one word; that word is read as
/// NUL-padded text.
pub fn decode_string(data: &[u8]) -> Result<String, AbiError> {
    if data.len() == WORD {
        return decode_bytes32_text(data);
    }
    let offset = usize_word(data, 0, "string offset")?;
    let len = usize_word(data, offset, "string length")?;
    let start = offset + WORD;
    let end = start.checked_add(len).ok_or(AbiError::Overflow {
        field: "string length",
    })?;
    let raw = data.get(start..end).ok_or(AbiError::Truncated {
        need: end,
        got: data.len(),
    })?;
    String::from_utf8(raw.to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

fn decode_bytes32_text(word: &[u8]) -> Result<String, AbiError> {
    let end = word.iter().position(|b| *b == 0).unwrap_or(word.len());
    std::str::from_utf8(&word[..end])
        .map(str::to_string)
        .map_err(|_| AbiError::InvalidUtf8)
}

pub fn decode_address_array(data: &[u8]) -> Result<Vec<ChainAddress>, AbiError> {
    let offset = usize_word(data, 0, "array offset")?;
    let len = usize_word(data, offset, "array length")?;
    let need = len
        .checked_mul(WORD)
        .and_then(|n| n.checked_add(offset + WORD))
        .ok_or(AbiError::Overflow {
            field: "array length",
        })?;
    if need > data.len() {
        return Err(AbiError::Truncated {
            need,
            got: data.len(),
        });
    }
    (0..len)
        .map(|i| address_from_word(word_at(data, offset + WORD + i * WORD)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint(v: u64) -> [u8; WORD] {
        encode_uint256(U256::from(v))
    }

    fn addr(n: u8) -> ChainAddress {
        ChainAddress::new(format!("0x{:040x}", n)).unwrap()
    }

    #[test]
    fn at_abi_01_selectors_match_erc20_constants() {
        let cases = [
            ("balanceOf(address)", "0x70a08231", erc20::BALANCE_OF),
            ("decimals()", "0x313ce567", erc20::DECIMALS),
            ("symbol()", "0x95d89b41", erc20::SYMBOL),
            ("name()", "0x06fdde03", erc20::NAME),
        ];
        for (sig, want, constant) in cases {
            let sel = FunctionSelector::from_signature(sig).unwrap();
            assert_eq!(sel.to_string(), want);
            assert_eq!(sel, constant);
        }
        assert!(FunctionSelector::from_signature("balanceOf").is_err());
        assert!(FunctionSelector::from_signature("balanceOf( address)").is_err());
    }

    #[test]
    fn at_abi_02_address_round_trips_through_a_word() {
        let a = addr(0xab);
        let word = encode_address(&a);
        assert_eq!(decode_address(&word).unwrap(), a);
        let mut dirty = word;
        dirty[0] = 1;
        assert_eq!(decode_address(&dirty), Err(AbiError::NotAnAddress));
    }

    #[test]
    fn at_abi_03_string_and_legacy_bytes32() {
        assert_eq!(decode_string(&encode_string("Vault Token")).unwrap(), "Vault Token");
        let mut legacy = [0u8; 32];
        legacy[..3].copy_from_slice(b"MKR");
        assert_eq!(decode_string(&legacy).unwrap(), "MKR");
    }

    #[test]
    fn at_abi_04_truncated_payloads_are_malformed() {
        assert!(matches!(
            decode_uint256(&[0u8; 31]),
            Err(AbiError::Truncated { .. })
        ));
        let mut arr = encode_address_array(&[addr(1), addr(2)]);
        arr.truncate(arr.len() - 1);
        assert!(decode_address_array(&arr).is_err());
    }

    #[test]
    fn at_abi_05_address_array_decodes_in_order() {
        let arr = encode_address_array(&[addr(3), addr(1), addr(2)]);
        assert_eq!(
            decode_address_array(&arr).unwrap(),
            vec![addr(3), addr(1), addr(2)]
        );
    }

    #[test]
    fn at_abi_06_decimals_above_77_rejected() {
        assert_eq!(decode_decimals(&uint(18)).unwrap(), 18);
        assert_eq!(
            decode_decimals(&uint(78)),
            Err(AbiError::DecimalsOutOfRange(78))
        );
        assert_eq!(decode_bool(&uint(1)), Ok(true));
        assert_eq!(decode_bool(&uint(2)), Err(AbiError::NotABool));
    }
}
