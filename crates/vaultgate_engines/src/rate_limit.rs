#![forbid(unsafe_code)]

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};
use vaultgate_kernel_contracts::address::{ChainAddress, RoomId};
use vaultgate_kernel_contracts::policy::DenialReason;
use vaultgate_kernel_contracts::ratelimit::{RateLimitPhase, RateLimitWindow, SendDecision};
use vaultgate_kernel_contracts::{ContractViolation, UnixTimeMs, Validate};

pub mod reason_codes {
    use vaultgate_kernel_contracts::ReasonCodeId;

    pub const RL_DENIED_WINDOW: ReasonCodeId = ReasonCodeId(0x524C_0001);
    pub const RL_COOLDOWN_STARTED: ReasonCodeId = ReasonCodeId(0x524C_0002);
    pub const RL_DENIED_COOLDOWN: ReasonCodeId = ReasonCodeId(0x524C_0003);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_per_window: u32,
    pub window: Duration,
    /// Denials within one window that start a cooldown. Zero disables cooldown.
    pub violations_before_cooldown: u32,
    pub cooldown: Duration,
    pub max_tracked_windows: usize,
}

impl RateLimitConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_per_window: 10,
            window: Duration::from_secs(60),
            violations_before_cooldown: 3,
            cooldown: Duration::from_secs(300),
            max_tracked_windows: 100_000,
        }
    }
}

impl Validate for RateLimitConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.max_per_window == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "rate_limit_config.max_per_window",
                reason: "must be > 0",
            });
        }
        if self.window.is_zero() {
            return Err(ContractViolation::InvalidValue {
                field: "rate_limit_config.window",
                reason: "must be > 0",
            });
        }
        if self.violations_before_cooldown > 0 && self.cooldown.is_zero() {
            return Err(ContractViolation::InvalidValue {
                field: "rate_limit_config.cooldown",
                reason: "must be > 0 when cooldown is enabled",
            });
        }
        if self.max_tracked_windows == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "rate_limit_config.max_tracked_windows",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

type WindowKey = (ChainAddress, RoomId);

/// Per `(user, room)` window table. Windows reset lazily on the next send.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<BTreeMap<WindowKey, RateLimitWindow>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            config,
            windows: Arc::new(Mutex::new(BTreeMap::new())),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<WindowKey, RateLimitWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decides one send and records it when allowed.
    pub fn can_send(&self, user: &ChainAddress, room: &RoomId, now: UnixTimeMs) -> SendDecision {
        let mut table = self.table();
        if table.len() >= self.config.max_tracked_windows {
            prune_idle(&mut table, now, self.config.window);
        }
        let w = match table.entry((user.clone(), room.clone())) {
            Entry::Vacant(slot) => {
                slot.insert(RateLimitWindow::opened_at(now));
                return SendDecision::allow();
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        if let Some(until) = w.cooldown_until.filter(|until| now < *until) {
            debug!(
                user = %user.redacted(),
                room = %room,
                reason_code = reason_codes::RL_DENIED_COOLDOWN.0,
                "send denied during cooldown"
            );
            return SendDecision::deny(DenialReason::Cooldown, until.since(now));
        }
        if w.cooldown_until.is_some() || w.is_expired(now, self.config.window) {
            *w = RateLimitWindow::opened_at(now);
            return SendDecision::allow();
        }
        if w.message_count < self.config.max_per_window {
            w.message_count += 1;
            return SendDecision::allow();
        }

        w.violations = w.violations.saturating_add(1);
        if self.config.violations_before_cooldown > 0
            && w.violations >= self.config.violations_before_cooldown
        {
            w.cooldown_until = Some(now.saturating_add(self.config.cooldown));
            info!(
                user = %user.redacted(),
                room = %room,
                violations = w.violations,
                reason_code = reason_codes::RL_COOLDOWN_STARTED.0,
                "rate limit cooldown started"
            );
            return SendDecision::deny(DenialReason::Cooldown, self.config.cooldown);
        }
        let window_end = w.window_start.saturating_add(self.config.window);
        debug!(
            user = %user.redacted(),
            room = %room,
            reason_code = reason_codes::RL_DENIED_WINDOW.0,
            "send denied, window full"
        );
        SendDecision::deny(DenialReason::RateLimited, window_end.since(now))
    }

    pub fn phase(&self, user: &ChainAddress, room: &RoomId, now: UnixTimeMs) -> RateLimitPhase {
        self.table()
            .get(&(user.clone(), room.clone()))
            .map(|w| w.phase(now, self.config.window))
            .unwrap_or(RateLimitPhase::Idle)
    }

    /// Drops windows that no longer constrain anything. Returns how many.
    pub fn prune(&self, now: UnixTimeMs) -> usize {
        prune_idle(&mut self.table(), now, self.config.window)
    }

    pub fn tracked_windows(&self) -> usize {
        self.table().len()
    }
}

fn prune_idle(
    table: &mut BTreeMap<WindowKey, RateLimitWindow>,
    now: UnixTimeMs,
    window: Duration,
) -> usize {
    let before = table.len();
    table.retain(|_, w| w.phase(now, window) != RateLimitPhase::Idle);
    before - table.len()
}
