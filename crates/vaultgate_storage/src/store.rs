#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use vaultgate_kernel_contracts::address::ChainAddress;
use vaultgate_kernel_contracts::cache::{AuthorizationCacheEntry, TokenCacheEntry};
use vaultgate_kernel_contracts::{ContractViolation, UnixTimeMs, Validate};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("cache store unavailable")]
    Unavailable,
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

/// Outcome of the atomic check-and-set on a vault's refresh flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginRefresh {
    /// The caller now owns the flag. `started_at` identifies the claim.
    Acquired {
        started_at: UnixTimeMs,
        took_over_abandoned: bool,
    },
    Busy {
        started_at: UnixTimeMs,
    },
}

#[derive(Debug, Default)]
struct Tables {
    authorization: BTreeMap<ChainAddress, AuthorizationCacheEntry>,
    tokens: BTreeMap<ChainAddress, TokenCacheEntry>,
    vault_token: BTreeMap<ChainAddress, ChainAddress>,
}

/// Process-local cache store. Every operation is one critical section, which
/// is what makes the refresh flag check-and-set atomic.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

impl InMemoryCacheStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Simulates the backing store going away; every call fails until cleared.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable);
        }
        self.tables.lock().map_err(|_| StorageError::Unavailable)
    }

    pub(crate) fn authorization_row(
        &self,
        vault: &ChainAddress,
    ) -> Result<Option<AuthorizationCacheEntry>, StorageError> {
        Ok(self.tables()?.authorization.get(vault).cloned())
    }

    pub(crate) fn begin_refresh(
        &self,
        vault: &ChainAddress,
        now: UnixTimeMs,
        lease: Duration,
    ) -> Result<BeginRefresh, StorageError> {
        let mut t = self.tables()?;
        let row = t
            .authorization
            .entry(vault.clone())
            .or_insert_with(|| AuthorizationCacheEntry::empty(vault.clone()));
        let mut took_over_abandoned = false;
        if let (true, Some(started_at)) = (row.refresh_in_progress, row.refresh_started_at) {
            if now.since(started_at) < lease {
                return Ok(BeginRefresh::Busy { started_at });
            }
            warn!(
                vault = %vault.redacted(),
                held_ms = now.since(started_at).as_millis() as u64,
                "taking over abandoned refresh flag"
            );
            took_over_abandoned = true;
        }
        // Claims are keyed by start time; bump past a taken-over claim so the
        // stale holder can no longer release ours.
        let started_at = match row.refresh_started_at {
            Some(prev) if prev >= now => UnixTimeMs(prev.0 + 1),
            _ => now,
        };
        row.refresh_in_progress = true;
        row.refresh_started_at = Some(started_at);
        Ok(BeginRefresh::Acquired {
            started_at,
            took_over_abandoned,
        })
    }

    /// Writes the refresh result, if any, and releases the flag when `claim`
    /// still owns it. Returns whether the claim was still held.
    pub(crate) fn finish_refresh(
        &self,
        vault: &ChainAddress,
        claim: UnixTimeMs,
        result: Option<(Vec<ChainAddress>, UnixTimeMs)>,
    ) -> Result<bool, StorageError> {
        let mut t = self.tables()?;
        let row = t
            .authorization
            .entry(vault.clone())
            .or_insert_with(|| AuthorizationCacheEntry::empty(vault.clone()));
        let held = row.refresh_started_at == Some(claim);
        let mut next = row.clone();
        if let Some((addresses, refreshed_at)) = result {
            next.authorized_addresses = addresses;
            next.last_refreshed = Some(refreshed_at);
        }
        if held {
            next.refresh_in_progress = false;
            next.refresh_started_at = None;
        }
        next.validate()?;
        *row = next;
        Ok(held)
    }

    pub(crate) fn upsert_token_row(&self, entry: TokenCacheEntry) -> Result<(), StorageError> {
        entry.validate()?;
        let mut guard = self.tables()?;
        let t = &mut *guard;
        let mut entry = entry;
        if let Some(existing) = t.tokens.get(&entry.base_token_address) {
            if entry.room_id.is_none() {
                entry.room_id = existing.room_id.clone();
            }
            if existing.vault_address != entry.vault_address {
                t.vault_token.remove(&existing.vault_address);
            }
        }
        t.vault_token
            .insert(entry.vault_address.clone(), entry.base_token_address.clone());
        t.tokens.insert(entry.base_token_address.clone(), entry);
        Ok(())
    }

    pub(crate) fn token_row(
        &self,
        token: &ChainAddress,
    ) -> Result<Option<TokenCacheEntry>, StorageError> {
        Ok(self.tables()?.tokens.get(token).cloned())
    }

    pub(crate) fn token_row_for_vault(
        &self,
        vault: &ChainAddress,
    ) -> Result<Option<TokenCacheEntry>, StorageError> {
        let t = self.tables()?;
        Ok(t.vault_token
            .get(vault)
            .and_then(|token| t.tokens.get(token))
            .cloned())
    }

    pub(crate) fn token_rows_where(
        &self,
        keep: impl Fn(&TokenCacheEntry) -> bool,
    ) -> Result<Vec<TokenCacheEntry>, StorageError> {
        Ok(self
            .tables()?
            .tokens
            .values()
            .filter(|e| keep(e))
            .cloned()
            .collect())
    }
}
