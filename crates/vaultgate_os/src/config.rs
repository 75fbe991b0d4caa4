#![forbid(unsafe_code)]

use std::env;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use url::Url;
use vaultgate_engines::abi::AbiError;
use vaultgate_engines::moderation::{
    ClassifierError, HttpModerationClassifier, ModerationConfig, TextClassifier,
};
use vaultgate_engines::rate_limit::RateLimitConfig;
use vaultgate_engines::remote_reader::{JsonRpcStateReader, ReadError, RemoteStateReader};
use vaultgate_engines::resolver::{ResolverConfigError, TierConfig, TieredResolver};
use vaultgate_kernel_contracts::moderation::{Classification, OutageMode};
use vaultgate_kernel_contracts::ContractViolation;

use crate::auth_cache::AuthCacheConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::token_cache::TokenCacheConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTierSettings {
    pub tier: TierConfig,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Escalation order: primary, fallback, emergency.
    pub tiers: Vec<RpcTierSettings>,
    pub auth_cache: AuthCacheConfig,
    pub token_cache: TokenCacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub rate_limit: RateLimitConfig,
    pub moderation: ModerationConfig,
    pub moderation_endpoint: Option<String>,
    pub moderation_api_key: Option<String>,
    pub moderation_model: Option<String>,
    pub moderation_timeout: Duration,
    /// Budget for one validation request. `None` waits as long as the tiers do.
    pub request_deadline: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateBuildError {
    #[error("no RPC endpoint configured for any tier")]
    NoRpcEndpoints,
    #[error("tier {tier}: {error}")]
    Endpoint { tier: String, error: ReadError },
    #[error(transparent)]
    Resolver(#[from] ResolverConfigError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

impl GateConfig {
    pub fn mvp_v1() -> Self {
        Self {
            tiers: vec![
                RpcTierSettings {
                    tier: TierConfig::primary_v1(),
                    endpoint: None,
                },
                RpcTierSettings {
                    tier: TierConfig::fallback_v1(),
                    endpoint: None,
                },
                RpcTierSettings {
                    tier: TierConfig::emergency_v1(),
                    endpoint: None,
                },
            ],
            auth_cache: AuthCacheConfig::mvp_v1(),
            token_cache: TokenCacheConfig::mvp_v1(),
            orchestrator: OrchestratorConfig::mvp_v1(),
            rate_limit: RateLimitConfig::mvp_v1(),
            moderation: ModerationConfig::mvp_v1(),
            moderation_endpoint: None,
            moderation_api_key: None,
            moderation_model: None,
            moderation_timeout: Duration::from_millis(5_000),
            request_deadline: Some(Duration::from_millis(10_000)),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// `mvp_v1()` overlaid with `VAULTGATE_*` values. Out-of-range or
    /// unparsable values fall back to the baseline.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut c = Self::mvp_v1();
        let num = |key: &str, range: RangeInclusive<u64>, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| range.contains(v))
                .unwrap_or(default)
        };
        let text = |key: &str| -> Option<String> {
            lookup(key).and_then(|v| {
                let s = v.trim().to_string();
                if s.is_empty() {
                    None
                } else {
                    Some(s)
                }
            })
        };

        for (settings, prefix) in c
            .tiers
            .iter_mut()
            .zip(["VAULTGATE_RPC_PRIMARY", "VAULTGATE_RPC_FALLBACK", "VAULTGATE_RPC_EMERGENCY"])
        {
            settings.endpoint = text(&format!("{prefix}_URL")).and_then(|raw| http_url(prefix, raw));
            let t = &mut settings.tier;
            t.timeout = Duration::from_millis(num(
                &format!("{prefix}_TIMEOUT_MS"),
                100..=60_000,
                t.timeout.as_millis() as u64,
            ));
            t.retry_count = num(
                &format!("{prefix}_RETRIES"),
                0..=10,
                u64::from(t.retry_count),
            ) as u32;
            t.retry_delay = Duration::from_millis(num(
                &format!("{prefix}_RETRY_DELAY_MS"),
                0..=10_000,
                t.retry_delay.as_millis() as u64,
            ));
        }

        c.auth_cache.ttl = Duration::from_secs(num(
            "VAULTGATE_AUTH_CACHE_TTL_SECS",
            1..=2_592_000,
            86_400,
        ));
        c.auth_cache.refresh_lease =
            Duration::from_secs(num("VAULTGATE_REFRESH_LEASE_SECS", 5..=86_400, 300));
        c.auth_cache.cold_refresh_wait =
            Duration::from_millis(num("VAULTGATE_COLD_REFRESH_WAIT_MS", 0..=60_000, 2_000));
        if let Some(sig) = text("VAULTGATE_VAULT_AUTHORIZED_SIG") {
            c.auth_cache.authorized_signature = sig;
        }
        if let Some(sig) = text("VAULTGATE_VAULT_BASE_TOKEN_SIG") {
            c.token_cache.base_token_signature = sig;
        }
        if let Some(sig) = text("VAULTGATE_VAULT_SETUP_AUTHORITY_SIG") {
            c.orchestrator.setup_authority_signature = match sig.as_str() {
                "none" | "off" => None,
                _ => Some(sig),
            };
        }

        c.rate_limit.max_per_window = num("VAULTGATE_RATE_MAX_PER_WINDOW", 1..=10_000, 10) as u32;
        c.rate_limit.window = Duration::from_secs(num("VAULTGATE_RATE_WINDOW_SECS", 1..=86_400, 60));
        c.rate_limit.violations_before_cooldown =
            num("VAULTGATE_RATE_VIOLATIONS_BEFORE_COOLDOWN", 0..=1_000, 3) as u32;
        c.rate_limit.cooldown =
            Duration::from_secs(num("VAULTGATE_RATE_COOLDOWN_SECS", 1..=86_400, 300));

        c.moderation.threshold = lookup("VAULTGATE_MODERATION_THRESHOLD")
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|v| (0.0..=1.0).contains(v))
            .unwrap_or(c.moderation.threshold);
        if let Some(raw) = text("VAULTGATE_MODERATION_BLOCKED_CATEGORIES") {
            let parsed = ModerationConfig::parse_categories(&raw);
            if !parsed.is_empty() {
                c.moderation.blocked_categories = parsed;
            }
        }
        if let Some(mode) = text("VAULTGATE_MODERATION_OUTAGE_MODE").and_then(|v| OutageMode::parse(&v)) {
            c.moderation.outage_mode = mode;
        }
        c.moderation_endpoint = text("VAULTGATE_MODERATION_URL")
            .and_then(|raw| http_url("VAULTGATE_MODERATION", raw));
        c.moderation_api_key = text("VAULTGATE_MODERATION_API_KEY");
        c.moderation_model = text("VAULTGATE_MODERATION_MODEL");
        c.moderation_timeout =
            Duration::from_millis(num("VAULTGATE_MODERATION_TIMEOUT_MS", 100..=60_000, 5_000));

        c.request_deadline = match num("VAULTGATE_REQUEST_DEADLINE_MS", 0..=600_000, 10_000) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        c
    }

    /// One JSON-RPC reader per tier that has an endpoint; tiers without one
    /// are skipped.
    pub fn build_resolver(&self) -> Result<TieredResolver, GateBuildError> {
        let mut tiers: Vec<(TierConfig, Arc<dyn RemoteStateReader>)> = Vec::new();
        for settings in &self.tiers {
            let Some(endpoint) = &settings.endpoint else {
                continue;
            };
            let reader =
                JsonRpcStateReader::new(endpoint).map_err(|error| GateBuildError::Endpoint {
                    tier: settings.tier.label.clone(),
                    error,
                })?;
            tiers.push((settings.tier.clone(), Arc::new(reader)));
        }
        if tiers.is_empty() {
            return Err(GateBuildError::NoRpcEndpoints);
        }
        Ok(TieredResolver::new(tiers)?)
    }

    /// HTTP classifier when both URL and key are set; otherwise a classifier
    /// that is always unavailable, so the outage mode decides.
    pub fn build_classifier(&self) -> Result<Box<dyn TextClassifier>, GateBuildError> {
        match (&self.moderation_endpoint, &self.moderation_api_key) {
            (Some(endpoint), Some(key)) => Ok(Box::new(HttpModerationClassifier::new(
                endpoint,
                key.clone(),
                self.moderation_model.clone(),
                self.moderation_timeout,
            )?)),
            _ => {
                warn!(
                    outage_mode = ?self.moderation.outage_mode,
                    "no moderation classifier configured"
                );
                Ok(Box::new(UnconfiguredClassifier))
            }
        }
    }
}

fn http_url(prefix: &str, raw: String) -> Option<String> {
    match Url::parse(&raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Some(raw),
        _ => {
            warn!(setting = prefix, "ignoring malformed endpoint url");
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UnconfiguredClassifier;

impl TextClassifier for UnconfiguredClassifier {
    fn classify(&self, _text: &str) -> Result<Classification, ClassifierError> {
        Err(ClassifierError::Unavailable("not configured"))
    }
}
