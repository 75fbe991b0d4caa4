#![forbid(unsafe_code)]

use std::time::Duration;

use vaultgate_kernel_contracts::address::{ChainAddress, RoomId};
use vaultgate_kernel_contracts::cache::{AuthorizationCacheEntry, TokenCacheEntry};
use vaultgate_kernel_contracts::UnixTimeMs;

use crate::store::{BeginRefresh, InMemoryCacheStore, StorageError};

/// Persistence contract for vault authorization lists.
pub trait AuthorizationCacheRepo: Send + Sync {
    fn get_authorization(
        &self,
        vault: &ChainAddress,
    ) -> Result<Option<AuthorizationCacheEntry>, StorageError>;

    /// Atomically checks the refresh flag and sets it when free (or when the
    /// holder's lease has run out). Creates the row on first use.
    fn try_begin_refresh(
        &self,
        vault: &ChainAddress,
        now: UnixTimeMs,
        lease: Duration,
    ) -> Result<BeginRefresh, StorageError>;

    /// Replaces the address list and `last_refreshed`, then releases `claim`.
    fn complete_refresh(
        &self,
        vault: &ChainAddress,
        claim: UnixTimeMs,
        addresses: Vec<ChainAddress>,
        refreshed_at: UnixTimeMs,
    ) -> Result<bool, StorageError>;

    /// Releases `claim` without touching cached data.
    fn abort_refresh(&self, vault: &ChainAddress, claim: UnixTimeMs)
        -> Result<bool, StorageError>;
}

/// Persistence contract for token metadata, keyed by token address.
pub trait TokenMetadataRepo: Send + Sync {
    /// Create-or-update. An update without a room keeps the stored room.
    fn upsert_token(&self, entry: TokenCacheEntry) -> Result<(), StorageError>;
    fn get_token(&self, token: &ChainAddress) -> Result<Option<TokenCacheEntry>, StorageError>;
    fn token_for_vault(
        &self,
        vault: &ChainAddress,
    ) -> Result<Option<TokenCacheEntry>, StorageError>;
    fn tokens_for_room(&self, room: &RoomId) -> Result<Vec<TokenCacheEntry>, StorageError>;
    /// Cached entries among `tokens`, in the order asked. Unknown tokens are skipped.
    fn lookup_tokens(&self, tokens: &[ChainAddress])
        -> Result<Vec<TokenCacheEntry>, StorageError>;
}

impl AuthorizationCacheRepo for InMemoryCacheStore {
    fn get_authorization(
        &self,
        vault: &ChainAddress,
    ) -> Result<Option<AuthorizationCacheEntry>, StorageError> {
        self.authorization_row(vault)
    }

    fn try_begin_refresh(
        &self,
        vault: &ChainAddress,
        now: UnixTimeMs,
        lease: Duration,
    ) -> Result<BeginRefresh, StorageError> {
        self.begin_refresh(vault, now, lease)
    }

    fn complete_refresh(
        &self,
        vault: &ChainAddress,
        claim: UnixTimeMs,
        addresses: Vec<ChainAddress>,
        refreshed_at: UnixTimeMs,
    ) -> Result<bool, StorageError> {
        self.finish_refresh(vault, claim, Some((addresses, refreshed_at)))
    }

    fn abort_refresh(
        &self,
        vault: &ChainAddress,
        claim: UnixTimeMs,
    ) -> Result<bool, StorageError> {
        self.finish_refresh(vault, claim, None)
    }
}

impl TokenMetadataRepo for InMemoryCacheStore {
    fn upsert_token(&self, entry: TokenCacheEntry) -> Result<(), StorageError> {
        self.upsert_token_row(entry)
    }

    fn get_token(&self, token: &ChainAddress) -> Result<Option<TokenCacheEntry>, StorageError> {
        self.token_row(token)
    }

    fn token_for_vault(
        &self,
        vault: &ChainAddress,
    ) -> Result<Option<TokenCacheEntry>, StorageError> {
        self.token_row_for_vault(vault)
    }

    fn tokens_for_room(&self, room: &RoomId) -> Result<Vec<TokenCacheEntry>, StorageError> {
        self.token_rows_where(|e| e.room_id.as_ref() == Some(room))
    }

    fn lookup_tokens(
        &self,
        tokens: &[ChainAddress],
    ) -> Result<Vec<TokenCacheEntry>, StorageError> {
        let mut out = Vec::with_capacity(tokens.len());
        for t in tokens {
            if let Some(e) = self.token_row(t)? {
                out.push(e);
            }
        }
        Ok(out)
    }
}
