#![forbid(unsafe_code)]

use std::time::Instant;

use alloy_primitives::U256;
use tracing::{debug, warn};
use vaultgate_kernel_contracts::address::{ChainAddress, TokenAmount};
use vaultgate_kernel_contracts::cache::DEFAULT_TOKEN_DECIMALS;
use vaultgate_kernel_contracts::validation::ResolverTier;

use crate::abi::{decode_decimals, decode_uint256, erc20};
use crate::remote_reader::ReadRequest;
use crate::resolver::{ResolveError, TieredResolver};

pub mod reason_codes {
    use vaultgate_kernel_contracts::ReasonCodeId;

    pub const BAL_DECIMALS_FALLBACK: ReasonCodeId = ReasonCodeId(0x4241_0001);
    pub const BAL_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4241_0002);
    pub const BAL_DECIMALS_FROM_CACHE: ReasonCodeId = ReasonCodeId(0x4241_0003);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceCheck {
    pub raw: U256,
    pub decimals: u8,
    /// `raw / 10^decimals` without trailing zeros.
    pub normalized: String,
    pub meets_minimum: bool,
    /// True when `decimals()` could not be read, no known value was supplied,
    /// and 18 was assumed.
    pub decimals_fallback: bool,
    pub tier: ResolverTier,
}

#[derive(Debug, Clone)]
pub struct BalanceValidator {
    resolver: TieredResolver,
}

impl BalanceValidator {
    pub fn new(resolver: TieredResolver) -> Self {
        Self { resolver }
    }

    /// `known_decimals` is a previously observed `decimals()` value. It is
    /// only used when the paired read fails on every tier.
    pub fn check_balance(
        &self,
        token: &ChainAddress,
        user: &ChainAddress,
        minimum: &TokenAmount,
        known_decimals: Option<u8>,
        deadline: Option<Instant>,
    ) -> Result<BalanceCheck, ResolveError> {
        let balance_req = ReadRequest::new(token.clone(), erc20::BALANCE_OF).with_address_arg(user);
        let decimals_req = ReadRequest::new(token.clone(), erc20::DECIMALS);

        let paired = self.resolver.read_batch_decoded(
            &[balance_req.clone(), decimals_req],
            deadline,
            |raw| Ok((decode_uint256(raw[0].as_bytes())?, decode_decimals(raw[1].as_bytes())?)),
        );
        let (raw, decimals, decimals_fallback, tier) = match paired {
            Ok(r) => (r.value.0, r.value.1, false, r.tier),
            Err(ResolveError::Exhausted { .. }) => {
                let alone = self
                    .resolver
                    .read_decoded(&balance_req, deadline, decode_uint256)
                    .map_err(|e| {
                        warn!(
                            token = %token.redacted(),
                            reason_code = reason_codes::BAL_UNAVAILABLE.0,
                            detail = %e,
                            "balance unavailable on every tier"
                        );
                        e
                    })?;
                match known_decimals {
                    Some(decimals) => {
                        debug!(
                            token = %token.redacted(),
                            tier = %alone.tier.label,
                            decimals,
                            reason_code = reason_codes::BAL_DECIMALS_FROM_CACHE.0,
                            "decimals unreadable, using known value"
                        );
                        (alone.value, decimals, false, alone.tier)
                    }
                    None => {
                        warn!(
                            token = %token.redacted(),
                            tier = %alone.tier.label,
                            reason_code = reason_codes::BAL_DECIMALS_FALLBACK.0,
                            "decimals unreadable, assuming {}",
                            DEFAULT_TOKEN_DECIMALS
                        );
                        (alone.value, DEFAULT_TOKEN_DECIMALS, true, alone.tier)
                    }
                }
            }
            Err(e) => return Err(e),
        };

        let meets_minimum = match minimum_in_base_units(minimum, decimals) {
            Some(min_raw) => raw >= min_raw,
            None => false,
        };
        let normalized = normalize_units(raw, decimals);
        debug!(
            token = %token.redacted(),
            user = %user.redacted(),
            %normalized,
            minimum = %minimum,
            meets_minimum,
            "balance checked"
        );
        Ok(BalanceCheck {
            raw,
            decimals,
            normalized,
            meets_minimum,
            decimals_fallback,
            tier,
        })
    }
}

fn pow10(exp: u32) -> Option<U256> {
    let ten = U256::from(10u8);
    (0..exp).try_fold(U256::from(1u8), |acc, _| acc.checked_mul(ten))
}

/// Exact `raw / 10^decimals` rendered as a plain decimal string.
pub fn normalize_units(raw: U256, decimals: u8) -> String {
    let Some(scale) = pow10(u32::from(decimals)) else {
        return "0".to_string();
    };
    let whole = raw / scale;
    let frac = raw % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let digits = frac.to_string();
    let padded = format!("{}{}", "0".repeat(usize::from(decimals) - digits.len()), digits);
    format!("{}.{}", whole, padded.trim_end_matches('0'))
}

/// Converts a human-unit minimum into base units, rounding up so that a
/// minimum finer than the token's precision is never undercut. `None` when the
/// result would not fit in a uint256.
pub fn minimum_in_base_units(minimum: &TokenAmount, decimals: u8) -> Option<U256> {
    let d = minimum.as_decimal();
    let mantissa = u128::try_from(d.mantissa()).ok()?;
    let numerator = U256::from(mantissa).checked_mul(pow10(u32::from(decimals))?)?;
    let denominator = pow10(d.scale())?;
    let quotient = numerator / denominator;
    if (numerator % denominator).is_zero() {
        Some(quotient)
    } else {
        quotient.checked_add(U256::from(1u8))
    }
}
