#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{ChainAddress, TokenAmount};
use crate::policy::FailureKind;
use crate::{ContractViolation, UnixTimeMs, Validate};

/// One configured network path, identified by position and label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolverTier {
    pub index: u8,
    pub label: String,
}

impl ResolverTier {
    pub fn new(index: u8, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
        }
    }
}

impl fmt::Display for ResolverTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStep {
    VaultResolution,
    Authorization,
    SetupAuthority,
    Balance,
}

impl ValidationStep {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStep::VaultResolution => "vault_resolution",
            ValidationStep::Authorization => "authorization",
            ValidationStep::SetupAuthority => "setup_authority",
            ValidationStep::Balance => "balance",
        }
    }
}

impl fmt::Display for ValidationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure that short-circuited a validation, tagged with where it began.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub kind: FailureKind,
    pub step: ValidationStep,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(kind: FailureKind, step: ValidationStep, message: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.step, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SetupAuthorityOutcome {
    NotChecked,
    Matched,
    NotMatched { authority: ChainAddress },
    Unavailable { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationSource {
    Fresh,
    /// Served past its TTL; a background refresh was scheduled.
    Stale,
    /// Fetched synchronously because nothing usable was cached.
    Refreshed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTier {
    pub step: ValidationStep,
    pub tier: ResolverTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub vault_address: ChainAddress,
    pub user_address: ChainAddress,
    pub minimum_balance: TokenAmount,
    pub base_token_address: Option<ChainAddress>,
    pub authorized_count: Option<usize>,
    pub authorization_source: Option<AuthorizationSource>,
    pub authorization_last_refreshed: Option<UnixTimeMs>,
    pub raw_balance: Option<String>,
    pub token_decimals: Option<u8>,
    pub decimals_fallback: bool,
    pub setup_authority: SetupAuthorityOutcome,
    /// Which tier answered each chain-backed step. Cached steps have no entry.
    pub tiers: Vec<StepTier>,
}

impl ValidationDetails {
    pub fn start(
        vault_address: ChainAddress,
        user_address: ChainAddress,
        minimum_balance: TokenAmount,
    ) -> Self {
        Self {
            vault_address,
            user_address,
            minimum_balance,
            base_token_address: None,
            authorized_count: None,
            authorization_source: None,
            authorization_last_refreshed: None,
            raw_balance: None,
            token_decimals: None,
            decimals_fallback: false,
            setup_authority: SetupAuthorityOutcome::NotChecked,
            tiers: Vec::new(),
        }
    }

    pub fn record_tier(&mut self, step: ValidationStep, tier: ResolverTier) {
        self.tiers.push(StepTier { step, tier });
    }

    pub fn tier_for(&self, step: ValidationStep) -> Option<&ResolverTier> {
        self.tiers.iter().find(|t| t.step == step).map(|t| &t.tier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub is_authorized: bool,
    pub has_token_balance: bool,
    /// Normalized human-unit balance, `"0"` until a balance was read.
    pub token_balance: String,
    pub token_symbol: String,
    pub error: Option<ValidationFailure>,
    pub details: ValidationDetails,
}

impl ValidationResult {
    /// All-false result carrying only the details gathered so far.
    pub fn failed(details: ValidationDetails, failure: Option<ValidationFailure>) -> Self {
        Self {
            is_valid: false,
            is_authorized: false,
            has_token_balance: false,
            token_balance: "0".to_string(),
            token_symbol: String::new(),
            error: failure,
            details,
        }
    }

    pub fn decided(
        details: ValidationDetails,
        is_authorized: bool,
        has_token_balance: bool,
        token_balance: String,
        token_symbol: String,
    ) -> Self {
        Self {
            is_valid: is_authorized && has_token_balance,
            is_authorized,
            has_token_balance,
            token_balance,
            token_symbol,
            error: None,
            details,
        }
    }
}

impl Validate for ValidationResult {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.is_valid != (self.is_authorized && self.has_token_balance) {
            return Err(ContractViolation::InvalidValue {
                field: "validation_result.is_valid",
                reason: "must equal is_authorized AND has_token_balance",
            });
        }
        if self.is_valid && self.error.is_some() {
            return Err(ContractViolation::InvalidValue {
                field: "validation_result.error",
                reason: "must be absent when is_valid=true",
            });
        }
        if TokenAmount::parse(&self.token_balance).is_err() {
            return Err(ContractViolation::InvalidValue {
                field: "validation_result.token_balance",
                reason: "must be a non-negative decimal string",
            });
        }
        Ok(())
    }
}
