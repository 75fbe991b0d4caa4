#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};
use vaultgate_engines::moderation::{text_fingerprint, ModerationGate, TextClassifier};
use vaultgate_engines::rate_limit::RateLimiter;
use vaultgate_engines::resolver::TieredResolver;
use vaultgate_kernel_contracts::access::{
    CanSendMessageRequest, CreateRoomRequest, DirectChannelDecision, MessageAdmission,
    ModerateMessageRequest, OpenDirectChannelRequest, SendMessageRequest, ValidateAccessRequest,
};
use vaultgate_kernel_contracts::address::{ChainAddress, TokenAmount};
use vaultgate_kernel_contracts::moderation::ModerationVerdict;
use vaultgate_kernel_contracts::policy::FailureKind;
use vaultgate_kernel_contracts::ratelimit::SendDecision;
use vaultgate_kernel_contracts::validation::{ValidationResult, ValidationStep};
use vaultgate_kernel_contracts::{ContractViolation, Validate};
use vaultgate_storage::repo::{AuthorizationCacheRepo, TokenMetadataRepo};
use vaultgate_storage::store::InMemoryCacheStore;

use crate::auth_cache::AuthorizationCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{GateBuildError, GateConfig};
use crate::orchestrator::ValidationOrchestrator;
use crate::token_cache::TokenMetadataCache;

/// The only failures the access API raises. Policy denials and chain or
/// storage trouble come back inside the result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ContractViolation),
    #[error("deadline exceeded during {step}")]
    DeadlineExceeded { step: ValidationStep },
}

/// Request-level entry point: validation for room and channel creation,
/// rate limiting and moderation for messages.
#[derive(Debug)]
pub struct AccessGate {
    orchestrator: ValidationOrchestrator,
    rate_limiter: RateLimiter,
    moderation: ModerationGate,
    clock: Arc<dyn Clock>,
    request_deadline: Option<Duration>,
}

impl AccessGate {
    pub fn new(
        orchestrator: ValidationOrchestrator,
        rate_limiter: RateLimiter,
        moderation: ModerationGate,
        clock: Arc<dyn Clock>,
        request_deadline: Option<Duration>,
    ) -> Self {
        Self {
            orchestrator,
            rate_limiter,
            moderation,
            clock,
            request_deadline,
        }
    }

    /// Wires every component from `config` over the given collaborators.
    pub fn assemble<S>(
        config: &GateConfig,
        resolver: TieredResolver,
        store: Arc<S>,
        classifier: Box<dyn TextClassifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateBuildError>
    where
        S: AuthorizationCacheRepo + TokenMetadataRepo + 'static,
    {
        let authorizations = AuthorizationCache::new(
            config.auth_cache.clone(),
            store.clone(),
            resolver.clone(),
            clock.clone(),
        )?;
        let tokens =
            TokenMetadataCache::new(&config.token_cache, store, resolver.clone(), clock.clone())?;
        let orchestrator =
            ValidationOrchestrator::new(&config.orchestrator, authorizations, tokens, resolver)?;
        Ok(Self::new(
            orchestrator,
            RateLimiter::new(config.rate_limit.clone())?,
            ModerationGate::new(config.moderation.clone(), classifier)?,
            clock,
            config.request_deadline,
        ))
    }

    /// JSON-RPC tiers, the configured classifier and a process-local cache
    /// store.
    pub fn from_config(config: &GateConfig) -> Result<Self, GateBuildError> {
        Self::assemble(
            config,
            config.build_resolver()?,
            Arc::new(InMemoryCacheStore::new_in_memory()),
            config.build_classifier()?,
            Arc::new(SystemClock),
        )
    }

    fn deadline(&self) -> Option<Instant> {
        self.request_deadline.map(|d| Instant::now() + d)
    }

    pub fn validate_access(
        &self,
        request: &ValidateAccessRequest,
    ) -> Result<ValidationResult, GateError> {
        request.validate()?;
        self.validate_one(
            &request.vault_address,
            &request.user_address,
            &request.min_balance,
            self.deadline(),
        )
    }

    pub fn can_send_message(
        &self,
        request: &CanSendMessageRequest,
    ) -> Result<SendDecision, GateError> {
        request.validate()?;
        Ok(self
            .rate_limiter
            .can_send(&request.user_address, &request.room_id, self.clock.now()))
    }

    pub fn moderate_message(
        &self,
        request: &ModerateMessageRequest,
    ) -> Result<ModerationVerdict, GateError> {
        request.validate()?;
        Ok(self.moderation.moderate(&request.text))
    }

    /// Rate limit first, then moderation. A message refused by the limiter is
    /// never sent to the classifier.
    pub fn admit_message(&self, request: &SendMessageRequest) -> Result<MessageAdmission, GateError> {
        request.validate()?;
        let rate = self.rate_limiter.can_send(
            &request.sender_address,
            &request.room_id,
            self.clock.now(),
        );
        if !rate.allowed {
            debug!(
                room = %request.room_id,
                sender = %request.sender_address.redacted(),
                reason = ?rate.reason,
                "message refused by rate limiter"
            );
            return Ok(MessageAdmission {
                admitted: false,
                rate,
                moderation: None,
            });
        }
        let verdict = self.moderation.moderate(&request.text);
        info!(
            room = %request.room_id,
            sender = %request.sender_address.redacted(),
            text = %text_fingerprint(&request.text),
            admitted = verdict.allowed,
            "message admission decided"
        );
        Ok(MessageAdmission {
            admitted: verdict.allowed,
            rate,
            moderation: Some(verdict),
        })
    }

    pub fn check_room_creation(
        &self,
        request: &CreateRoomRequest,
    ) -> Result<ValidationResult, GateError> {
        request.validate()?;
        self.validate_one(
            &request.vault_address,
            &request.creator_address,
            &request.min_balance,
            self.deadline(),
        )
    }

    /// Both participants must pass. The recipient is only checked once the
    /// initiator has; both share one deadline.
    pub fn check_direct_channel(
        &self,
        request: &OpenDirectChannelRequest,
    ) -> Result<DirectChannelDecision, GateError> {
        request.validate()?;
        let deadline = self.deadline();
        let initiator = self.validate_one(
            &request.vault_address,
            &request.initiator_address,
            &request.min_balance,
            deadline,
        )?;
        if !initiator.is_valid {
            return Ok(DirectChannelDecision {
                allowed: false,
                initiator,
                recipient: None,
            });
        }
        let recipient = self.validate_one(
            &request.vault_address,
            &request.recipient_address,
            &request.min_balance,
            deadline,
        )?;
        Ok(DirectChannelDecision {
            allowed: recipient.is_valid,
            initiator,
            recipient: Some(recipient),
        })
    }

    fn validate_one(
        &self,
        vault: &ChainAddress,
        user: &ChainAddress,
        minimum: &TokenAmount,
        deadline: Option<Instant>,
    ) -> Result<ValidationResult, GateError> {
        let result = self
            .orchestrator
            .validate_with_deadline(vault, user, minimum, deadline);
        match &result.error {
            Some(f) if f.kind == FailureKind::DeadlineExceeded => {
                Err(GateError::DeadlineExceeded { step: f.step })
            }
            Some(f) if f.kind == FailureKind::InvalidInput => {
                debug!(
                    vault = %vault.redacted(),
                    step = %f.step,
                    detail = %f.message,
                    "vault rejected as input"
                );
                Err(GateError::InvalidInput(ContractViolation::InvalidValue {
                    field: "vault_address",
                    reason: "vault does not expose a usable base token",
                }))
            }
            _ => Ok(result),
        }
    }
}
