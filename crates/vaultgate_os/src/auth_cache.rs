#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use vaultgate_engines::abi::{decode_address_array, AbiError, FunctionSelector};
use vaultgate_engines::remote_reader::ReadRequest;
use vaultgate_engines::resolver::{ResolveError, TieredResolver};
use vaultgate_kernel_contracts::address::ChainAddress;
use vaultgate_kernel_contracts::cache::AuthorizationSnapshot;
use vaultgate_kernel_contracts::policy::FailureKind;
use vaultgate_kernel_contracts::validation::{AuthorizationSource, ResolverTier};
use vaultgate_kernel_contracts::UnixTimeMs;
use vaultgate_storage::repo::AuthorizationCacheRepo;
use vaultgate_storage::store::{BeginRefresh, StorageError};

use crate::clock::Clock;

pub mod reason_codes {
    use vaultgate_kernel_contracts::ReasonCodeId;

    pub const AUTH_REFRESH_OK: ReasonCodeId = ReasonCodeId(0x4143_0001);
    pub const AUTH_REFRESH_FAILED: ReasonCodeId = ReasonCodeId(0x4143_0002);
    pub const AUTH_REFRESH_BUSY: ReasonCodeId = ReasonCodeId(0x4143_0003);
    pub const AUTH_LEASE_TAKEOVER: ReasonCodeId = ReasonCodeId(0x4143_0004);
    pub const AUTH_BACKGROUND_FAILED: ReasonCodeId = ReasonCodeId(0x4143_0005);
    pub const AUTH_CLAIM_LOST: ReasonCodeId = ReasonCodeId(0x4143_0006);
    pub const AUTH_FLAG_RELEASE_FAILED: ReasonCodeId = ReasonCodeId(0x4143_00F1);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCacheConfig {
    pub ttl: Duration,
    /// Age after which a held refresh flag counts as abandoned.
    pub refresh_lease: Duration,
    /// How long a cold-cache caller waits for someone else's first refresh.
    pub cold_refresh_wait: Duration,
    pub cold_refresh_poll: Duration,
    /// Vault function returning the authorized `address[]`.
    pub authorized_signature: String,
}

impl AuthCacheConfig {
    pub fn mvp_v1() -> Self {
        Self {
            ttl: Duration::from_secs(86_400),
            refresh_lease: Duration::from_secs(300),
            cold_refresh_wait: Duration::from_millis(2_000),
            cold_refresh_poll: Duration::from_millis(25),
            authorized_signature: "getAuthorizedAddresses()".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthCacheError {
    #[error("authorization list not cached yet")]
    NeedsRefresh,
    #[error("authorization refresh already running since {}", .started_at.0)]
    RefreshInProgress { started_at: UnixTimeMs },
    #[error("deadline exceeded before authorization was available")]
    DeadlineExceeded,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthCacheError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AuthCacheError::NeedsRefresh => FailureKind::NeedsRefresh,
            AuthCacheError::RefreshInProgress { .. } => FailureKind::RefreshInProgress,
            AuthCacheError::DeadlineExceeded
            | AuthCacheError::Resolve(ResolveError::DeadlineExceeded { .. }) => {
                FailureKind::DeadlineExceeded
            }
            AuthCacheError::Resolve(ResolveError::Exhausted { .. }) => {
                FailureKind::ResolutionExhausted
            }
            AuthCacheError::Storage(_) => FailureKind::StorageFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub addresses: Vec<ChainAddress>,
    pub refreshed_at: UnixTimeMs,
    pub tier: ResolverTier,
}

/// What `get_or_refresh` served and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthLookup {
    pub snapshot: AuthorizationSnapshot,
    pub source: AuthorizationSource,
    /// Set only when this call read the list from chain.
    pub tier: Option<ResolverTier>,
}

struct Shared {
    repo: Arc<dyn AuthorizationCacheRepo>,
    resolver: TieredResolver,
    clock: Arc<dyn Clock>,
    config: AuthCacheConfig,
    selector: FunctionSelector,
}

/// Vault authorization lists with TTL staleness and a single-refresher flag
/// kept in the store.
#[derive(Clone)]
pub struct AuthorizationCache {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AuthorizationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCache")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl AuthorizationCache {
    pub fn new(
        config: AuthCacheConfig,
        repo: Arc<dyn AuthorizationCacheRepo>,
        resolver: TieredResolver,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AbiError> {
        let selector = FunctionSelector::from_signature(&config.authorized_signature)?;
        Ok(Self {
            shared: Arc::new(Shared {
                repo,
                resolver,
                clock,
                config,
                selector,
            }),
        })
    }

    pub fn config(&self) -> &AuthCacheConfig {
        &self.shared.config
    }

    /// Serves whatever is cached. A stale entry is returned as-is and a
    /// background refresh is started; the caller never waits for it.
    pub fn get(&self, vault: &ChainAddress) -> Result<AuthorizationSnapshot, AuthCacheError> {
        let s = &self.shared;
        let Some(row) = s.repo.get_authorization(vault)? else {
            return Err(AuthCacheError::NeedsRefresh);
        };
        let Some(last_refreshed) = row.last_refreshed else {
            return Err(AuthCacheError::NeedsRefresh);
        };
        let now = s.clock.now();
        let is_stale = now.since(last_refreshed) > s.config.ttl;
        if is_stale {
            let busy = row
                .refresh_started_at
                .filter(|_| row.refresh_in_progress)
                .is_some_and(|started| now.since(started) < s.config.refresh_lease);
            if !busy {
                self.spawn_background_refresh(vault.clone());
            }
        } else {
            debug!(vault = %vault.redacted(), entries = row.authorized_addresses.len(), "authorization cache hit");
        }
        Ok(AuthorizationSnapshot {
            vault_address: row.vault_address,
            addresses: row.authorized_addresses,
            last_refreshed,
            is_stale,
        })
    }

    /// Reads the list from chain and stores it. Refuses, rather than queues,
    /// when another refresh holds the flag. The flag is released on every
    /// exit path.
    pub fn refresh(
        &self,
        vault: &ChainAddress,
        deadline: Option<Instant>,
    ) -> Result<RefreshOutcome, AuthCacheError> {
        let s = &self.shared;
        let claim = match s
            .repo
            .try_begin_refresh(vault, s.clock.now(), s.config.refresh_lease)?
        {
            BeginRefresh::Acquired {
                started_at,
                took_over_abandoned,
            } => {
                if took_over_abandoned {
                    warn!(
                        vault = %vault.redacted(),
                        reason_code = reason_codes::AUTH_LEASE_TAKEOVER.0,
                        "refresh flag lease expired, taking over"
                    );
                }
                started_at
            }
            BeginRefresh::Busy { started_at } => {
                debug!(
                    vault = %vault.redacted(),
                    reason_code = reason_codes::AUTH_REFRESH_BUSY.0,
                    "refresh already in progress"
                );
                return Err(AuthCacheError::RefreshInProgress { started_at });
            }
        };
        let guard = RefreshGuard {
            repo: s.repo.as_ref(),
            vault,
            claim,
            armed: true,
        };

        let request = ReadRequest::new(vault.clone(), s.selector);
        let resolved = s
            .resolver
            .read_decoded(&request, deadline, decode_address_array)
            .map_err(|e| {
                warn!(
                    vault = %vault.redacted(),
                    reason_code = reason_codes::AUTH_REFRESH_FAILED.0,
                    detail = %e,
                    "authorization refresh failed, keeping cached list"
                );
                e
            })?;
        let addresses = dedupe_preserving_order(resolved.value);
        let refreshed_at = s.clock.now();
        let held = guard.complete(addresses.clone(), refreshed_at)?;
        if held {
            info!(
                vault = %vault.redacted(),
                entries = addresses.len(),
                tier = %resolved.tier,
                reason_code = reason_codes::AUTH_REFRESH_OK.0,
                "authorization list refreshed"
            );
        } else {
            warn!(
                vault = %vault.redacted(),
                reason_code = reason_codes::AUTH_CLAIM_LOST.0,
                "refresh finished after its claim was taken over"
            );
        }
        Ok(RefreshOutcome {
            addresses,
            refreshed_at,
            tier: resolved.tier,
        })
    }

    /// Fresh or stale data when cached; otherwise a synchronous first refresh.
    /// When another caller holds that first refresh, waits a bounded time for
    /// it to land.
    pub fn get_or_refresh(
        &self,
        vault: &ChainAddress,
        deadline: Option<Instant>,
    ) -> Result<AuthLookup, AuthCacheError> {
        match self.get(vault) {
            Ok(snapshot) => {
                let source = if snapshot.is_stale {
                    AuthorizationSource::Stale
                } else {
                    AuthorizationSource::Fresh
                };
                return Ok(AuthLookup {
                    snapshot,
                    source,
                    tier: None,
                });
            }
            Err(AuthCacheError::NeedsRefresh) => {}
            Err(e) => return Err(e),
        }
        if deadline_passed(deadline) {
            return Err(AuthCacheError::DeadlineExceeded);
        }
        match self.refresh(vault, deadline) {
            Ok(outcome) => Ok(AuthLookup {
                snapshot: AuthorizationSnapshot {
                    vault_address: vault.clone(),
                    addresses: outcome.addresses,
                    last_refreshed: outcome.refreshed_at,
                    is_stale: false,
                },
                source: AuthorizationSource::Refreshed,
                tier: Some(outcome.tier),
            }),
            Err(AuthCacheError::RefreshInProgress { started_at }) => {
                self.wait_for_first_refresh(vault, deadline, started_at)
            }
            Err(e) => Err(e),
        }
    }

    fn wait_for_first_refresh(
        &self,
        vault: &ChainAddress,
        deadline: Option<Instant>,
        started_at: UnixTimeMs,
    ) -> Result<AuthLookup, AuthCacheError> {
        let s = &self.shared;
        let mut until = Instant::now() + s.config.cold_refresh_wait;
        let bounded_by_deadline = matches!(deadline, Some(d) if d < until);
        if let Some(d) = deadline {
            until = until.min(d);
        }
        loop {
            if let Some(row) = s.repo.get_authorization(vault)? {
                if let Some(last_refreshed) = row.last_refreshed {
                    return Ok(AuthLookup {
                        snapshot: AuthorizationSnapshot {
                            vault_address: row.vault_address,
                            addresses: row.authorized_addresses,
                            last_refreshed,
                            is_stale: false,
                        },
                        source: AuthorizationSource::Fresh,
                        tier: None,
                    });
                }
            }
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(if bounded_by_deadline {
                    AuthCacheError::DeadlineExceeded
                } else {
                    AuthCacheError::RefreshInProgress { started_at }
                });
            }
            thread::sleep(left.min(s.config.cold_refresh_poll));
        }
    }

    fn spawn_background_refresh(&self, vault: ChainAddress) {
        let cache = self.clone();
        let spawned = thread::Builder::new()
            .name("vaultgate-auth-refresh".to_string())
            .spawn(move || match cache.refresh(&vault, None) {
                Ok(_) | Err(AuthCacheError::RefreshInProgress { .. }) => {}
                Err(e) => error!(
                    vault = %vault.redacted(),
                    reason_code = reason_codes::AUTH_BACKGROUND_FAILED.0,
                    detail = %e,
                    "background authorization refresh failed"
                ),
            });
        if let Err(e) = spawned {
            error!(
                reason_code = reason_codes::AUTH_BACKGROUND_FAILED.0,
                detail = %e,
                "could not start background authorization refresh"
            );
        }
    }
}

/// Owns a refresh claim until `complete` succeeds; dropping it any other way
/// (error, deadline, unwind) releases the flag without touching cached data.
struct RefreshGuard<'a> {
    repo: &'a dyn AuthorizationCacheRepo,
    vault: &'a ChainAddress,
    claim: UnixTimeMs,
    armed: bool,
}

impl RefreshGuard<'_> {
    fn complete(
        mut self,
        addresses: Vec<ChainAddress>,
        refreshed_at: UnixTimeMs,
    ) -> Result<bool, StorageError> {
        let held = self
            .repo
            .complete_refresh(self.vault, self.claim, addresses, refreshed_at)?;
        self.armed = false;
        Ok(held)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.repo.abort_refresh(self.vault, self.claim) {
            error!(
                vault = %self.vault.redacted(),
                reason_code = reason_codes::AUTH_FLAG_RELEASE_FAILED.0,
                detail = %e,
                "could not release refresh flag; lease expiry will reclaim it"
            );
        }
    }
}

fn dedupe_preserving_order(addresses: Vec<ChainAddress>) -> Vec<ChainAddress> {
    let mut seen = BTreeSet::new();
    addresses
        .into_iter()
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
