#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};
use vaultgate_kernel_contracts::validation::ResolverTier;

use crate::abi::AbiError;
use crate::remote_reader::{RawValue, ReadError, ReadRequest, RemoteStateReader};

pub mod reason_codes {
    use vaultgate_kernel_contracts::ReasonCodeId;

    pub const RESOLVE_TIER_FAILED: ReasonCodeId = ReasonCodeId(0x5253_0001);
    pub const RESOLVE_ESCALATED_OK: ReasonCodeId = ReasonCodeId(0x5253_0002);
    pub const RESOLVE_EXHAUSTED: ReasonCodeId = ReasonCodeId(0x5253_0003);
    pub const RESOLVE_DEADLINE: ReasonCodeId = ReasonCodeId(0x5253_0004);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    pub label: String,
    pub timeout: Duration,
    /// Extra attempts on the same tier before escalating.
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl TierConfig {
    pub fn primary_v1() -> Self {
        Self {
            label: "primary".to_string(),
            timeout: Duration::from_millis(4_000),
            retry_count: 2,
            retry_delay: Duration::from_millis(200),
        }
    }

    pub fn fallback_v1() -> Self {
        Self {
            label: "fallback".to_string(),
            timeout: Duration::from_millis(4_000),
            retry_count: 1,
            retry_delay: Duration::from_millis(300),
        }
    }

    /// Last resort: shorter timeout, no retries.
    pub fn emergency_v1() -> Self {
        Self {
            label: "emergency".to_string(),
            timeout: Duration::from_millis(2_500),
            retry_count: 0,
            retry_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverConfigError {
    #[error("at least one tier is required")]
    NoTiers,
    #[error("too many tiers")]
    TooManyTiers,
    #[error("duplicate tier label {0}")]
    DuplicateLabel(String),
    #[error("tier {0} must have a non-zero timeout")]
    ZeroTimeout(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: ResolverTier,
    pub attempts: u32,
    pub error: ReadError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("all tiers failed: {}", summarize(.failures))]
    Exhausted { failures: Vec<TierFailure> },
    #[error("deadline exceeded: {}", summarize(.failures))]
    DeadlineExceeded { failures: Vec<TierFailure> },
}

impl ResolveError {
    pub fn failures(&self) -> &[TierFailure] {
        match self {
            ResolveError::Exhausted { failures } | ResolveError::DeadlineExceeded { failures } => {
                failures
            }
        }
    }
}

fn summarize(failures: &[TierFailure]) -> String {
    if failures.is_empty() {
        return "no tier attempted".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{}={}x{}", f.tier.label, f.error.kind(), f.attempts))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub tier: ResolverTier,
}

pub type ResolvedRead = Resolved<RawValue>;
pub type ResolvedBatch = Resolved<Vec<RawValue>>;

struct Tier {
    config: TierConfig,
    reader: Arc<dyn RemoteStateReader>,
}

/// Ordered escalation over redundant readers. Every tier answers a whole
/// request (or batch) on its own; results from different tiers never mix.
#[derive(Clone)]
pub struct TieredResolver {
    tiers: Arc<Vec<Tier>>,
}

impl std::fmt::Debug for TieredResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredResolver")
            .field(
                "tiers",
                &self.tiers.iter().map(|t| &t.config).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TieredResolver {
    pub fn new(
        tiers: Vec<(TierConfig, Arc<dyn RemoteStateReader>)>,
    ) -> Result<Self, ResolverConfigError> {
        if tiers.is_empty() {
            return Err(ResolverConfigError::NoTiers);
        }
        if tiers.len() > usize::from(u8::MAX) {
            return Err(ResolverConfigError::TooManyTiers);
        }
        let mut labels = BTreeSet::new();
        for (config, _) in &tiers {
            if !labels.insert(config.label.clone()) {
                return Err(ResolverConfigError::DuplicateLabel(config.label.clone()));
            }
            if config.timeout.is_zero() {
                return Err(ResolverConfigError::ZeroTimeout(config.label.clone()));
            }
        }
        Ok(Self {
            tiers: Arc::new(
                tiers
                    .into_iter()
                    .map(|(config, reader)| Tier { config, reader })
                    .collect(),
            ),
        })
    }

    pub fn tier_ids(&self) -> Vec<ResolverTier> {
        self.tiers
            .iter()
            .enumerate()
            .map(|(i, t)| ResolverTier::new(i as u8, t.config.label.clone()))
            .collect()
    }

    pub fn read(&self, request: &ReadRequest) -> Result<ResolvedRead, ResolveError> {
        self.read_decoded(request, None, |raw| Ok(RawValue(raw.to_vec())))
    }

    pub fn read_batch(&self, requests: &[ReadRequest]) -> Result<ResolvedBatch, ResolveError> {
        self.read_batch_decoded(requests, None, |raw| Ok(raw.to_vec()))
    }

    /// Reads and decodes on one tier. A decode failure counts as a malformed
    /// response from that tier and escalates like any transport failure.
    pub fn read_decoded<T>(
        &self,
        request: &ReadRequest,
        deadline: Option<Instant>,
        decode: impl Fn(&[u8]) -> Result<T, AbiError>,
    ) -> Result<Resolved<T>, ResolveError> {
        self.resolve(std::slice::from_ref(request), deadline, &|raw: &[RawValue]| {
            decode(raw[0].as_bytes())
        })
    }

    pub fn read_batch_decoded<T>(
        &self,
        requests: &[ReadRequest],
        deadline: Option<Instant>,
        decode: impl Fn(&[RawValue]) -> Result<T, AbiError>,
    ) -> Result<Resolved<T>, ResolveError> {
        self.resolve(requests, deadline, &decode)
    }

    fn resolve<T>(
        &self,
        requests: &[ReadRequest],
        deadline: Option<Instant>,
        decode: &dyn Fn(&[RawValue]) -> Result<T, AbiError>,
    ) -> Result<Resolved<T>, ResolveError> {
        let mut failures = Vec::new();
        for (index, tier) in self.tiers.iter().enumerate() {
            let id = ResolverTier::new(index as u8, tier.config.label.clone());
            let mut attempts = 0u32;
            let mut last_error = None;
            for attempt in 0..=tier.config.retry_count {
                if attempt > 0 && !tier.config.retry_delay.is_zero() {
                    match remaining(deadline) {
                        Some(left) if left > tier.config.retry_delay => {
                            thread::sleep(tier.config.retry_delay)
                        }
                        Some(_) | None => {
                            return Err(deadline_hit(failures, id, attempts, last_error))
                        }
                    }
                }
                let Some(budget) = remaining(deadline).map(|left| left.min(tier.config.timeout))
                else {
                    return Err(deadline_hit(failures, id, attempts, last_error));
                };
                attempts += 1;
                match attempt_tier(tier, requests, budget, decode) {
                    Ok(value) => {
                        if index > 0 {
                            info!(
                                tier = %id.label,
                                reason_code = reason_codes::RESOLVE_ESCALATED_OK.0,
                                failed_tiers = failures.len(),
                                "resolver escalation succeeded"
                            );
                        }
                        return Ok(Resolved { value, tier: id });
                    }
                    Err(err) => {
                        debug!(tier = %id.label, attempt, error_kind = err.kind(), "tier attempt failed");
                        last_error = Some(err);
                    }
                }
            }
            let error = last_error.unwrap_or(ReadError::Transport);
            warn!(
                tier = %id.label,
                error_kind = error.kind(),
                attempts,
                reason_code = reason_codes::RESOLVE_TIER_FAILED.0,
                "resolver tier failed"
            );
            failures.push(TierFailure {
                tier: id,
                attempts,
                error,
            });
        }
        if remaining(deadline).is_none() {
            warn!(
                reason_code = reason_codes::RESOLVE_DEADLINE.0,
                detail = %summarize(&failures),
                "resolver ran out of tiers after caller deadline"
            );
            return Err(ResolveError::DeadlineExceeded { failures });
        }
        warn!(
            reason_code = reason_codes::RESOLVE_EXHAUSTED.0,
            detail = %summarize(&failures),
            "resolution exhausted"
        );
        Err(ResolveError::Exhausted { failures })
    }
}

/// Time left before `deadline`, or `None` once it has passed. No deadline
/// means unbounded.
fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        None => Some(Duration::MAX),
        Some(d) => d
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero()),
    }
}

fn deadline_hit(
    mut failures: Vec<TierFailure>,
    tier: ResolverTier,
    attempts: u32,
    last_error: Option<ReadError>,
) -> ResolveError {
    if let Some(error) = last_error {
        failures.push(TierFailure {
            tier,
            attempts,
            error,
        });
    }
    warn!(
        reason_code = reason_codes::RESOLVE_DEADLINE.0,
        detail = %summarize(&failures),
        "resolver stopped at caller deadline"
    );
    ResolveError::DeadlineExceeded { failures }
}

fn attempt_tier<T>(
    tier: &Tier,
    requests: &[ReadRequest],
    budget: Duration,
    decode: &dyn Fn(&[RawValue]) -> Result<T, AbiError>,
) -> Result<T, ReadError> {
    let started = Instant::now();
    let mut raw = Vec::with_capacity(requests.len());
    for req in requests {
        let left = budget
            .checked_sub(started.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ReadError::Timeout)?;
        raw.push(tier.reader.read(req, left)?);
    }
    decode(&raw).map_err(|e| ReadError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{decode_uint256, encode_uint256, FunctionSelector};
    use crate::remote_reader::FixtureStateReader;
    use alloy_primitives::U256;
    use vaultgate_kernel_contracts::address::ChainAddress;

    fn addr(n: u8) -> ChainAddress {
        ChainAddress::new(format!("0x{:040x}", n)).unwrap()
    }

    fn word(v: u64) -> Vec<u8> {
        encode_uint256(U256::from(v)).to_vec()
    }

    fn quick(label: &str, retries: u32) -> TierConfig {
        TierConfig {
            label: label.to_string(),
            timeout: Duration::from_millis(200),
            retry_count: retries,
            retry_delay: Duration::ZERO,
        }
    }

    fn req(sig: &str) -> ReadRequest {
        ReadRequest::new(addr(1), FunctionSelector::from_signature(sig).unwrap())
    }

    fn three_tiers() -> (TieredResolver, [FixtureStateReader; 3]) {
        let readers = [
            FixtureStateReader::new(),
            FixtureStateReader::new(),
            FixtureStateReader::new(),
        ];
        let r = TieredResolver::new(vec![
            (quick("primary", 1), Arc::new(readers[0].clone()) as _),
            (quick("fallback", 0), Arc::new(readers[1].clone()) as _),
            (quick("emergency", 0), Arc::new(readers[2].clone()) as _),
        ])
        .unwrap();
        (r, readers)
    }

    #[test]
    fn at_resolver_01_primary_timeout_escalates_to_fallback_value() {
        let (r, readers) = three_tiers();
        let q = req("totalSupply()");
        readers[0].answer(&q, word(1));
        readers[0].fail_always(Some(ReadError::Timeout));
        readers[1].answer(&q, word(42));
        readers[2].answer(&q, word(99));
        let out = r.read_decoded(&q, None, decode_uint256).unwrap();
        assert_eq!(out.value, U256::from(42u8));
        assert_eq!(out.tier, ResolverTier::new(1, "fallback"));
        assert_eq!(readers[0].calls(), 2);
        assert_eq!(readers[2].calls(), 0);
    }

    #[test]
    fn at_resolver_02_all_tiers_failing_is_exhausted_never_a_default() {
        let (r, readers) = three_tiers();
        for f in &readers {
            f.fail_always(Some(ReadError::Connection));
        }
        let err = r.read(&req("totalSupply()")).unwrap_err();
        match &err {
            ResolveError::Exhausted { failures } => {
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[0].attempts, 2);
                assert_eq!(failures[2].tier.label, "emergency");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("primary=connectionx2"));
    }

    #[test]
    fn at_resolver_03_batch_escalates_as_a_unit() {
        let (r, readers) = three_tiers();
        let a = req("balanceOf(address)");
        let b = req("decimals()");
        readers[0].answer(&a, word(5));
        readers[1].answer(&a, word(7));
        readers[1].answer(&b, word(6));
        let out = r.read_batch(&[a, b]).unwrap();
        assert_eq!(out.tier.index, 1);
        assert_eq!(out.value[0].0, word(7));
        assert_eq!(out.value[1].0, word(6));
    }

    #[test]
    fn at_resolver_04_malformed_answer_counts_as_tier_failure() {
        let (r, readers) = three_tiers();
        let q = req("totalSupply()");
        readers[0].answer(&q, vec![1, 2, 3]);
        readers[1].answer(&q, word(3));
        let out = r.read_decoded(&q, None, decode_uint256).unwrap();
        assert_eq!(out.tier.label, "fallback");
    }

    #[test]
    fn at_resolver_05_passed_deadline_stops_before_any_call() {
        let (r, readers) = three_tiers();
        let past = Instant::now()
            .checked_sub(Duration::from_millis(1))
            .unwrap_or_else(Instant::now);
        let err = r
            .read_decoded(&req("totalSupply()"), Some(past), decode_uint256)
            .unwrap_err();
        assert!(matches!(err, ResolveError::DeadlineExceeded { .. }));
        assert_eq!(readers[0].calls(), 0);
    }

    #[test]
    fn at_resolver_07_timeouts_running_past_deadline_report_deadline() {
        let slow = FixtureStateReader::new();
        slow.set_latency(Duration::from_millis(500));
        let r = TieredResolver::new(vec![(
            TierConfig {
                timeout: Duration::from_secs(2),
                ..quick("primary", 0)
            },
            Arc::new(slow) as _,
        )])
        .unwrap();
        let deadline = Instant::now() + Duration::from_millis(40);
        let err = r
            .read_decoded(&req("totalSupply()"), Some(deadline), decode_uint256)
            .unwrap_err();
        assert!(matches!(err, ResolveError::DeadlineExceeded { .. }));
        assert_eq!(err.failures().len(), 1);
    }

    #[test]
    fn at_resolver_06_construction_rejects_bad_tier_lists() {
        assert_eq!(
            TieredResolver::new(Vec::new()).unwrap_err(),
            ResolverConfigError::NoTiers
        );
        let f: Arc<dyn RemoteStateReader> = Arc::new(FixtureStateReader::new());
        let dup = TieredResolver::new(vec![
            (quick("primary", 0), f.clone()),
            (quick("primary", 0), f.clone()),
        ]);
        assert_eq!(
            dup.unwrap_err(),
            ResolverConfigError::DuplicateLabel("primary".to_string())
        );
        let mut zero = quick("primary", 0);
        zero.timeout = Duration::ZERO;
        assert!(TieredResolver::new(vec![(zero, f)]).is_err());
    }
}
