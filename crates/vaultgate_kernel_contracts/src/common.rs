#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wall-clock milliseconds since the unix epoch. Cache rows are persisted with
/// this, so it must survive process restarts (a monotonic clock would not).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0);
        Self(ms)
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(duration_ms(d)))
    }

    /// Elapsed time from `earlier` to `self`; zero when `earlier` is in the future.
    pub fn since(self, earlier: UnixTimeMs) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

pub fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReasonCodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("{field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{field}: {got} outside {min}..={max}")]
    InvalidRange {
        field: &'static str,
        min: f64,
        max: f64,
        got: f64,
    },
    #[error("{field}: must be finite")]
    NotFinite { field: &'static str },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

pub(crate) fn validate_token(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be non-empty",
        });
    }
    if value.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    if value.chars().any(|c| {
        !(c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':' || c == '.' || c == '/')
    }) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must contain token-safe ASCII only",
        });
    }
    Ok(())
}

pub(crate) fn validate_unit_score(field: &'static str, value: f32) -> Result<(), ContractViolation> {
    if !value.is_finite() {
        return Err(ContractViolation::NotFinite { field });
    }
    if !(0.0..=1.0).contains(&value) {
        return Err(ContractViolation::InvalidRange {
            field,
            min: 0.0,
            max: 1.0,
            got: f64::from(value),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_common_01_since_saturates_when_clock_went_backwards() {
        assert_eq!(UnixTimeMs(10).since(UnixTimeMs(50)), Duration::ZERO);
        assert_eq!(
            UnixTimeMs(1_500).since(UnixTimeMs(500)),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn at_common_02_token_validation_rejects_spaces_and_empty() {
        assert!(validate_token("room_id", "general-chat", 64).is_ok());
        assert!(validate_token("room_id", "", 64).is_err());
        assert!(validate_token("room_id", "two words", 64).is_err());
    }

    #[test]
    fn at_common_03_unit_score_rejects_nan_and_out_of_range() {
        assert!(validate_unit_score("score", 0.5).is_ok());
        assert!(matches!(
            validate_unit_score("score", f32::NAN),
            Err(ContractViolation::NotFinite { .. })
        ));
        assert!(matches!(
            validate_unit_score("score", 1.2),
            Err(ContractViolation::InvalidRange { .. })
        ));
    }
}
