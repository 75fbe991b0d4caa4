#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::address::{ChainAddress, RoomId};
use crate::{ContractViolation, UnixTimeMs, Validate};

pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;
/// Largest decimals value whose scale factor still fits in a uint256.
pub const MAX_TOKEN_DECIMALS: u8 = 77;
pub const MAX_TOKEN_SYMBOL_CHARS: usize = 32;
pub const MAX_TOKEN_NAME_CHARS: usize = 128;

/// A vault joined with its base token and the current authorized set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub vault_address: ChainAddress,
    pub base_token_address: ChainAddress,
    pub authorized_addresses: BTreeSet<ChainAddress>,
}

impl VaultRecord {
    pub fn v1(
        vault_address: ChainAddress,
        base_token_address: ChainAddress,
        authorized: &[ChainAddress],
    ) -> Self {
        Self {
            vault_address,
            base_token_address,
            authorized_addresses: authorized.iter().cloned().collect(),
        }
    }

    pub fn is_authorized(&self, address: &ChainAddress) -> bool {
        self.authorized_addresses.contains(address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCacheEntry {
    pub vault_address: ChainAddress,
    pub authorized_addresses: Vec<ChainAddress>,
    /// `None` until the first successful refresh lands.
    pub last_refreshed: Option<UnixTimeMs>,
    pub refresh_in_progress: bool,
    pub refresh_started_at: Option<UnixTimeMs>,
}

impl AuthorizationCacheEntry {
    pub fn empty(vault_address: ChainAddress) -> Self {
        Self {
            vault_address,
            authorized_addresses: Vec::new(),
            last_refreshed: None,
            refresh_in_progress: false,
            refresh_started_at: None,
        }
    }
}

impl Validate for AuthorizationCacheEntry {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.vault_address.validate()?;
        if self.refresh_in_progress != self.refresh_started_at.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "authorization_cache_entry.refresh_started_at",
                reason: "must be present exactly when refresh_in_progress=true",
            });
        }
        let mut seen = BTreeSet::new();
        for a in &self.authorized_addresses {
            if !seen.insert(a) {
                return Err(ContractViolation::InvalidValue {
                    field: "authorization_cache_entry.authorized_addresses",
                    reason: "must not contain duplicates",
                });
            }
        }
        Ok(())
    }
}

/// What a cache read hands back to callers: the data plus its age verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationSnapshot {
    pub vault_address: ChainAddress,
    pub addresses: Vec<ChainAddress>,
    pub last_refreshed: UnixTimeMs,
    pub is_stale: bool,
}

impl AuthorizationSnapshot {
    pub fn contains(&self, address: &ChainAddress) -> bool {
        self.addresses.iter().any(|a| a == address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCacheEntry {
    pub base_token_address: ChainAddress,
    pub vault_address: ChainAddress,
    pub room_id: Option<RoomId>,
    pub symbol: String,
    pub name: Option<String>,
    pub decimals: u8,
    /// False when `decimals` is the 18 default rather than an observed value.
    pub decimals_known: bool,
    pub updated_at: UnixTimeMs,
}

impl TokenCacheEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        base_token_address: ChainAddress,
        vault_address: ChainAddress,
        room_id: Option<RoomId>,
        symbol: String,
        name: Option<String>,
        decimals: Option<u8>,
        updated_at: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let entry = Self {
            base_token_address,
            vault_address,
            room_id,
            symbol,
            name,
            decimals: decimals.unwrap_or(DEFAULT_TOKEN_DECIMALS),
            decimals_known: decimals.is_some(),
            updated_at,
        };
        entry.validate()?;
        Ok(entry)
    }
}

impl Validate for TokenCacheEntry {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.base_token_address.validate()?;
        self.vault_address.validate()?;
        if let Some(room_id) = &self.room_id {
            room_id.validate()?;
        }
        validate_display_text("token_cache_entry.symbol", &self.symbol, MAX_TOKEN_SYMBOL_CHARS)?;
        if let Some(name) = &self.name {
            validate_display_text("token_cache_entry.name", name, MAX_TOKEN_NAME_CHARS)?;
        }
        if self.decimals > MAX_TOKEN_DECIMALS {
            return Err(ContractViolation::InvalidRange {
                field: "token_cache_entry.decimals",
                min: 0.0,
                max: f64::from(MAX_TOKEN_DECIMALS),
                got: f64::from(self.decimals),
            });
        }
        Ok(())
    }
}

fn validate_display_text(
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be non-empty",
        });
    }
    if value.chars().count() > max_chars {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    if value.chars().any(char::is_control) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain control characters",
        });
    }
    Ok(())
}
