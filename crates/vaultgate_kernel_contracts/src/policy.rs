#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Expected, correct refusals. These are results, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    RateLimited,
    Cooldown,
    ModerationBlocked,
    NotAuthorized,
    InsufficientBalance,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::RateLimited => "RATE_LIMITED",
            DenialReason::Cooldown => "COOLDOWN",
            DenialReason::ModerationBlocked => "MODERATION_BLOCKED",
            DenialReason::NotAuthorized => "NOT_AUTHORIZED",
            DenialReason::InsufficientBalance => "INSUFFICIENT_BALANCE",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            DenialReason::RateLimited => "You are sending messages too quickly.",
            DenialReason::Cooldown => "Sending is paused after repeated rate-limit violations.",
            DenialReason::ModerationBlocked => "This message was blocked by content moderation.",
            DenialReason::NotAuthorized => "Your address is not authorized for this vault.",
            DenialReason::InsufficientBalance => {
                "Your token balance is below the required minimum."
            }
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System failure classes. Only `InvalidInput` and `DeadlineExceeded` escape
/// the access API as errors; the rest ride inside `ValidationResult.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    TransportError,
    ResolutionExhausted,
    RefreshInProgress,
    NeedsRefresh,
    InvalidInput,
    DeadlineExceeded,
    StorageFailure,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::TransportError => "TRANSPORT_ERROR",
            FailureKind::ResolutionExhausted => "RESOLUTION_EXHAUSTED",
            FailureKind::RefreshInProgress => "REFRESH_IN_PROGRESS",
            FailureKind::NeedsRefresh => "NEEDS_REFRESH",
            FailureKind::InvalidInput => "INVALID_INPUT",
            FailureKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            FailureKind::StorageFailure => "STORAGE_FAILURE",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
