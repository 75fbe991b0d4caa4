#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::DenialReason;
use crate::{ContractViolation, UnixTimeMs, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitPhase {
    Idle,
    Active,
    Cooldown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub message_count: u32,
    pub window_start: UnixTimeMs,
    pub cooldown_until: Option<UnixTimeMs>,
    /// Denials recorded since `window_start`.
    pub violations: u32,
}

impl RateLimitWindow {
    pub fn opened_at(now: UnixTimeMs) -> Self {
        Self {
            message_count: 1,
            window_start: now,
            cooldown_until: None,
            violations: 0,
        }
    }

    pub fn is_expired(&self, now: UnixTimeMs, window: Duration) -> bool {
        now.since(self.window_start) >= window
    }

    pub fn in_cooldown(&self, now: UnixTimeMs) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    pub fn phase(&self, now: UnixTimeMs, window: Duration) -> RateLimitPhase {
        if self.in_cooldown(now) {
            RateLimitPhase::Cooldown
        } else if self.cooldown_until.is_some() || self.is_expired(now, window) {
            RateLimitPhase::Idle
        } else {
            RateLimitPhase::Active
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDecision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub retry_after_ms: Option<u64>,
}

impl SendDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_ms: None,
        }
    }

    pub fn deny(reason: DenialReason, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after_ms: Some(crate::common::duration_ms(retry_after).max(1)),
        }
    }
}

impl Validate for SendDecision {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.allowed && (self.reason.is_some() || self.retry_after_ms.is_some()) {
            return Err(ContractViolation::InvalidValue {
                field: "send_decision.reason",
                reason: "must be absent when allowed=true",
            });
        }
        if !self.allowed {
            match self.reason {
                Some(DenialReason::RateLimited) | Some(DenialReason::Cooldown) => {}
                _ => {
                    return Err(ContractViolation::InvalidValue {
                        field: "send_decision.reason",
                        reason: "must be RATE_LIMITED or COOLDOWN when allowed=false",
                    })
                }
            }
            if self.retry_after_ms.unwrap_or(0) == 0 {
                return Err(ContractViolation::InvalidValue {
                    field: "send_decision.retry_after_ms",
                    reason: "must be > 0 when allowed=false",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_rl_contract_01_phase_follows_window_and_cooldown() {
        let window = Duration::from_secs(60);
        let mut w = RateLimitWindow::opened_at(UnixTimeMs(1_000));
        assert_eq!(w.phase(UnixTimeMs(2_000), window), RateLimitPhase::Active);
        assert_eq!(w.phase(UnixTimeMs(61_000), window), RateLimitPhase::Idle);
        w.cooldown_until = Some(UnixTimeMs(10_000));
        assert_eq!(w.phase(UnixTimeMs(5_000), window), RateLimitPhase::Cooldown);
        assert_eq!(w.phase(UnixTimeMs(10_000), window), RateLimitPhase::Idle);
    }

    #[test]
    fn at_rl_contract_02_denials_always_carry_retry_hint() {
        let d = SendDecision::deny(DenialReason::RateLimited, Duration::ZERO);
        assert_eq!(d.retry_after_ms, Some(1));
        assert!(d.validate().is_ok());
        assert!(SendDecision::allow().validate().is_ok());
    }
}
