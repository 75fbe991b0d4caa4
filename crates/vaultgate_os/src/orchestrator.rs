#![forbid(unsafe_code)]

use std::time::Instant;

use tracing::{info, warn};
use vaultgate_engines::abi::{decode_address, AbiError, FunctionSelector};
use vaultgate_engines::balance::BalanceValidator;
use vaultgate_engines::remote_reader::ReadRequest;
use vaultgate_engines::resolver::{ResolveError, TieredResolver};
use vaultgate_kernel_contracts::address::{ChainAddress, TokenAmount};
use vaultgate_kernel_contracts::cache::VaultRecord;
use vaultgate_kernel_contracts::policy::FailureKind;
use vaultgate_kernel_contracts::validation::{
    SetupAuthorityOutcome, ValidationDetails, ValidationFailure, ValidationResult, ValidationStep,
};

use crate::auth_cache::AuthorizationCache;
use crate::token_cache::TokenMetadataCache;

pub mod reason_codes {
    use vaultgate_kernel_contracts::ReasonCodeId;

    pub const ORCH_VALID: ReasonCodeId = ReasonCodeId(0x4F52_0001);
    pub const ORCH_DENIED: ReasonCodeId = ReasonCodeId(0x4F52_0002);
    pub const ORCH_HARD_FAILURE: ReasonCodeId = ReasonCodeId(0x4F52_0003);
    pub const ORCH_SETUP_AUTHORITY_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4F52_0004);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Vault function naming the setup authority. `None` skips the check.
    pub setup_authority_signature: Option<String>,
}

impl OrchestratorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            setup_authority_signature: Some("setupAuthority()".to_string()),
        }
    }
}

/// Runs vault resolution, authorization, the setup-authority check and the
/// balance check in that order, recording every intermediate fact.
#[derive(Debug, Clone)]
pub struct ValidationOrchestrator {
    authorizations: AuthorizationCache,
    tokens: TokenMetadataCache,
    balances: BalanceValidator,
    resolver: TieredResolver,
    setup_authority: Option<FunctionSelector>,
}

impl ValidationOrchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        authorizations: AuthorizationCache,
        tokens: TokenMetadataCache,
        resolver: TieredResolver,
    ) -> Result<Self, AbiError> {
        let setup_authority = config
            .setup_authority_signature
            .as_deref()
            .map(FunctionSelector::from_signature)
            .transpose()?;
        Ok(Self {
            authorizations,
            tokens,
            balances: BalanceValidator::new(resolver.clone()),
            resolver,
            setup_authority,
        })
    }

    pub fn validate(
        &self,
        vault: &ChainAddress,
        user: &ChainAddress,
        minimum: &TokenAmount,
    ) -> ValidationResult {
        self.validate_with_deadline(vault, user, minimum, None)
    }

    pub fn validate_with_deadline(
        &self,
        vault: &ChainAddress,
        user: &ChainAddress,
        minimum: &TokenAmount,
        deadline: Option<Instant>,
    ) -> ValidationResult {
        let mut details = ValidationDetails::start(vault.clone(), user.clone(), minimum.clone());

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return hard_failure(
                details,
                FailureKind::DeadlineExceeded,
                ValidationStep::VaultResolution,
                "deadline passed before validation started",
            );
        }

        let token = match self.tokens.resolve_vault_token(vault, deadline) {
            Ok(t) => t,
            Err(e) => {
                return hard_failure(details, e.kind(), ValidationStep::VaultResolution, e)
            }
        };
        details.base_token_address = Some(token.entry.base_token_address.clone());
        if let Some(tier) = token.tier {
            details.record_tier(ValidationStep::VaultResolution, tier);
        }

        let lookup = match self.authorizations.get_or_refresh(vault, deadline) {
            Ok(l) => l,
            Err(e) => return hard_failure(details, e.kind(), ValidationStep::Authorization, e),
        };
        details.authorized_count = Some(lookup.snapshot.addresses.len());
        details.authorization_source = Some(lookup.source);
        details.authorization_last_refreshed = Some(lookup.snapshot.last_refreshed);
        if let Some(tier) = lookup.tier {
            details.record_tier(ValidationStep::Authorization, tier);
        }
        let record = VaultRecord::v1(
            vault.clone(),
            token.entry.base_token_address.clone(),
            &lookup.snapshot.addresses,
        );
        let listed = record.is_authorized(user);

        if let Some(selector) = self.setup_authority {
            match self.resolver.read_decoded(
                &ReadRequest::new(vault.clone(), selector),
                deadline,
                decode_address,
            ) {
                Ok(r) => {
                    details.record_tier(ValidationStep::SetupAuthority, r.tier);
                    details.setup_authority = if &r.value == user {
                        SetupAuthorityOutcome::Matched
                    } else {
                        SetupAuthorityOutcome::NotMatched { authority: r.value }
                    };
                }
                Err(e @ ResolveError::DeadlineExceeded { .. }) => {
                    return hard_failure(
                        details,
                        FailureKind::DeadlineExceeded,
                        ValidationStep::SetupAuthority,
                        e,
                    );
                }
                Err(e) => {
                    warn!(
                        vault = %vault.redacted(),
                        reason_code = reason_codes::ORCH_SETUP_AUTHORITY_UNAVAILABLE.0,
                        detail = %e,
                        "setup authority check unavailable"
                    );
                    details.setup_authority = SetupAuthorityOutcome::Unavailable {
                        message: e.to_string(),
                    };
                }
            }
        }
        let is_authorized = listed || details.setup_authority == SetupAuthorityOutcome::Matched;

        let balance = match self.balances.check_balance(
            &token.entry.base_token_address,
            user,
            minimum,
            token.entry.decimals_known.then_some(token.entry.decimals),
            deadline,
        ) {
            Ok(b) => b,
            Err(e) => {
                let kind = match e {
                    ResolveError::DeadlineExceeded { .. } => FailureKind::DeadlineExceeded,
                    ResolveError::Exhausted { .. } => FailureKind::ResolutionExhausted,
                };
                return hard_failure(details, kind, ValidationStep::Balance, e);
            }
        };
        details.raw_balance = Some(balance.raw.to_string());
        details.token_decimals = Some(balance.decimals);
        details.decimals_fallback = balance.decimals_fallback;
        details.record_tier(ValidationStep::Balance, balance.tier);

        let result = ValidationResult::decided(
            details,
            is_authorized,
            balance.meets_minimum,
            balance.normalized,
            token.entry.symbol,
        );
        let code = if result.is_valid {
            reason_codes::ORCH_VALID
        } else {
            reason_codes::ORCH_DENIED
        };
        info!(
            vault = %vault.redacted(),
            user = %user.redacted(),
            is_valid = result.is_valid,
            is_authorized = result.is_authorized,
            has_token_balance = result.has_token_balance,
            reason_code = code.0,
            "access validated"
        );
        result
    }
}

fn hard_failure(
    details: ValidationDetails,
    kind: FailureKind,
    step: ValidationStep,
    message: impl std::fmt::Display,
) -> ValidationResult {
    warn!(
        vault = %details.vault_address.redacted(),
        %step,
        %kind,
        reason_code = reason_codes::ORCH_HARD_FAILURE.0,
        detail = %message,
        "validation aborted"
    );
    ValidationResult::failed(
        details,
        Some(ValidationFailure::new(kind, step, message.to_string())),
    )
}
