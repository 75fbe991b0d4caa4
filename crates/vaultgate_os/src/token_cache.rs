#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};
use vaultgate_engines::abi::{
    decode_address, decode_decimals, decode_string, erc20, AbiError, FunctionSelector,
};
use vaultgate_engines::remote_reader::ReadRequest;
use vaultgate_engines::resolver::{ResolveError, TieredResolver};
use vaultgate_kernel_contracts::address::{ChainAddress, RoomId};
use vaultgate_kernel_contracts::cache::{
    TokenCacheEntry, MAX_TOKEN_NAME_CHARS, MAX_TOKEN_SYMBOL_CHARS,
};
use vaultgate_kernel_contracts::policy::FailureKind;
use vaultgate_kernel_contracts::validation::ResolverTier;
use vaultgate_kernel_contracts::ContractViolation;
use vaultgate_storage::repo::TokenMetadataRepo;
use vaultgate_storage::store::StorageError;

use crate::clock::Clock;

/// Stored in place of a `symbol()` that is empty after cleanup.
pub const UNKNOWN_TOKEN_SYMBOL: &str = "UNKNOWN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCacheConfig {
    /// Vault function returning its base token address.
    pub base_token_signature: String,
}

impl TokenCacheConfig {
    pub fn mvp_v1() -> Self {
        Self {
            base_token_signature: "baseToken()".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TokenCacheError {
    #[error("vault reports no base token")]
    NoBaseToken,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

impl TokenCacheError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TokenCacheError::NoBaseToken | TokenCacheError::ContractViolation(_) => {
                FailureKind::InvalidInput
            }
            TokenCacheError::Resolve(ResolveError::Exhausted { .. }) => {
                FailureKind::ResolutionExhausted
            }
            TokenCacheError::Resolve(ResolveError::DeadlineExceeded { .. }) => {
                FailureKind::DeadlineExceeded
            }
            TokenCacheError::Storage(_) => FailureKind::StorageFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToken {
    pub entry: TokenCacheEntry,
    /// Tier that answered `baseToken()`; `None` on a cache hit.
    pub tier: Option<ResolverTier>,
}

/// Token metadata keyed by token address, with a vault index used to resolve
/// a vault's base token without going to chain.
#[derive(Clone)]
pub struct TokenMetadataCache {
    repo: Arc<dyn TokenMetadataRepo>,
    resolver: TieredResolver,
    clock: Arc<dyn Clock>,
    base_token_selector: FunctionSelector,
}

impl std::fmt::Debug for TokenMetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMetadataCache")
            .field("base_token_selector", &self.base_token_selector)
            .finish_non_exhaustive()
    }
}

impl TokenMetadataCache {
    pub fn new(
        config: &TokenCacheConfig,
        repo: Arc<dyn TokenMetadataRepo>,
        resolver: TieredResolver,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AbiError> {
        Ok(Self {
            base_token_selector: FunctionSelector::from_signature(&config.base_token_signature)?,
            repo,
            resolver,
            clock,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upsert(
        &self,
        token: ChainAddress,
        vault: ChainAddress,
        room_id: Option<RoomId>,
        symbol: String,
        name: Option<String>,
        decimals: Option<u8>,
    ) -> Result<TokenCacheEntry, TokenCacheError> {
        let entry = TokenCacheEntry::v1(
            token,
            vault,
            room_id,
            symbol,
            name,
            decimals,
            self.clock.now(),
        )?;
        self.repo.upsert_token(entry.clone())?;
        Ok(self.repo.get_token(&entry.base_token_address)?.unwrap_or(entry))
    }

    /// Cached entries only. Unknown tokens are skipped, never fetched.
    pub fn lookup_many(
        &self,
        tokens: &[ChainAddress],
    ) -> Result<Vec<TokenCacheEntry>, TokenCacheError> {
        Ok(self.repo.lookup_tokens(tokens)?)
    }

    pub fn tokens_for_room(&self, room: &RoomId) -> Result<Vec<TokenCacheEntry>, TokenCacheError> {
        Ok(self.repo.tokens_for_room(room)?)
    }

    pub fn resolve_vault_token(
        &self,
        vault: &ChainAddress,
        deadline: Option<Instant>,
    ) -> Result<ResolvedToken, TokenCacheError> {
        if let Some(entry) = self.repo.token_for_vault(vault)? {
            debug!(vault = %vault.redacted(), symbol = %entry.symbol, "vault token cache hit");
            return Ok(ResolvedToken { entry, tier: None });
        }

        let base = self.resolver.read_decoded(
            &ReadRequest::new(vault.clone(), self.base_token_selector),
            deadline,
            decode_address,
        )?;
        if base.value.is_zero() {
            return Err(TokenCacheError::NoBaseToken);
        }
        let token = base.value;

        let meta = self.resolver.read_batch_decoded(
            &[
                ReadRequest::new(token.clone(), erc20::SYMBOL),
                ReadRequest::new(token.clone(), erc20::DECIMALS),
            ],
            deadline,
            |raw| {
                Ok((
                    decode_string(raw[0].as_bytes())?,
                    decode_decimals(raw[1].as_bytes())?,
                ))
            },
        )?;
        let (raw_symbol, decimals) = meta.value;
        let symbol = clean_chain_text(&raw_symbol, MAX_TOKEN_SYMBOL_CHARS).unwrap_or_else(|| {
            debug!(token = %token.redacted(), "token symbol unusable, storing placeholder");
            UNKNOWN_TOKEN_SYMBOL.to_string()
        });

        let name = match self.resolver.read_decoded(
            &ReadRequest::new(token.clone(), erc20::NAME),
            deadline,
            decode_string,
        ) {
            Ok(n) => chain_name(&n.value),
            Err(e) => {
                debug!(token = %token.redacted(), detail = %e, "token has no readable name()");
                None
            }
        };

        let entry = self.upsert(
            token,
            vault.clone(),
            None,
            symbol,
            name,
            Some(decimals),
        )?;
        info!(
            vault = %vault.redacted(),
            token = %entry.base_token_address.redacted(),
            symbol = %entry.symbol,
            decimals = entry.decimals,
            tier = %base.tier,
            "vault token resolved from chain"
        );
        Ok(ResolvedToken {
            entry,
            tier: Some(base.tier),
        })
    }
}

/// Strips control characters and surrounding whitespace from a
/// chain-reported string, then truncates to `max_chars`. `None` when nothing
/// printable is left.
fn clean_chain_text(raw: &str, max_chars: usize) -> Option<String> {
    let printable: String = raw.chars().filter(|c| !c.is_control()).collect();
    let trimmed = printable.trim();
    if trimmed.is_empty() {
        return None;
    }
    let truncated: String = trimmed.chars().take(max_chars).collect();
    Some(truncated.trim_end().to_string())
}

/// Names are optional, so an oversized one is dropped rather than cut.
fn chain_name(raw: &str) -> Option<String> {
    let printable: String = raw.chars().filter(|c| !c.is_control()).collect();
    if printable.trim().chars().count() > MAX_TOKEN_NAME_CHARS {
        return None;
    }
    clean_chain_text(&printable, MAX_TOKEN_NAME_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultgate_engines::remote_reader::ReadError;
    use vaultgate_kernel_contracts::UnixTimeMs;
    use vaultgate_storage::store::InMemoryCacheStore;

    use crate::clock::ManualClock;
    use crate::testkit::{addr, Ledger};

    fn cache(store: &Arc<InMemoryCacheStore>, ledger: &Ledger) -> TokenMetadataCache {
        TokenMetadataCache::new(
            &TokenCacheConfig::mvp_v1(),
            store.clone(),
            ledger.resolver.clone(),
            Arc::new(ManualClock::starting_at(UnixTimeMs(1_000))),
        )
        .unwrap()
    }

    #[test]
    fn at_tokencache_01_resolves_from_chain_then_serves_from_cache() {
        let store = Arc::new(InMemoryCacheStore::new_in_memory());
        let ledger = Ledger::new();
        ledger.set_base_token(&addr(1), &addr(20));
        ledger.set_token_meta(&addr(20), "GATE", 6, Some("Gate Token"));
        let c = cache(&store, &ledger);

        let first = c.resolve_vault_token(&addr(1), None).unwrap();
        assert_eq!(first.entry.base_token_address, addr(20));
        assert_eq!(first.entry.symbol, "GATE");
        assert_eq!(first.entry.decimals, 6);
        assert!(first.entry.decimals_known);
        assert_eq!(first.entry.name.as_deref(), Some("Gate Token"));
        assert_eq!(first.entry.room_id, None);
        assert_eq!(first.tier.map(|t| t.index), Some(0));

        let calls = ledger.calls();
        let second = c.resolve_vault_token(&addr(1), None).unwrap();
        assert_eq!(second.tier, None);
        assert_eq!(second.entry, first.entry);
        assert_eq!(ledger.calls(), calls);
    }

    #[test]
    fn at_tokencache_02_token_without_name_is_stored_with_none() {
        let store = Arc::new(InMemoryCacheStore::new_in_memory());
        let ledger = Ledger::new();
        ledger.set_base_token(&addr(1), &addr(20));
        ledger.set_token_meta(&addr(20), "GATE", 18, None);
        let got = cache(&store, &ledger)
            .resolve_vault_token(&addr(1), None)
            .unwrap();
        assert_eq!(got.entry.name, None);
        assert_eq!(got.entry.symbol, "GATE");
    }

    #[test]
    fn at_tokencache_03_zero_base_token_is_refused() {
        let store = Arc::new(InMemoryCacheStore::new_in_memory());
        let ledger = Ledger::new();
        ledger.set_base_token(&addr(1), &ChainAddress::from_word_bytes(&[0u8; 20]));
        let err = cache(&store, &ledger)
            .resolve_vault_token(&addr(1), None)
            .unwrap_err();
        assert_eq!(err, TokenCacheError::NoBaseToken);
        assert!(store.token_for_vault(&addr(1)).unwrap().is_none());
    }

    #[test]
    fn at_tokencache_04_unreachable_chain_is_resolution_exhausted() {
        let store = Arc::new(InMemoryCacheStore::new_in_memory());
        let ledger = Ledger::new();
        ledger.primary.fail_always(Some(ReadError::Timeout));
        ledger.fallback.fail_always(Some(ReadError::HttpStatus(503)));
        let err = cache(&store, &ledger)
            .resolve_vault_token(&addr(1), None)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::ResolutionExhausted);
    }

    #[test]
    fn at_tokencache_05_lookup_many_never_touches_chain() {
        let store = Arc::new(InMemoryCacheStore::new_in_memory());
        let ledger = Ledger::new();
        let c = cache(&store, &ledger);
        c.upsert(
            addr(20),
            addr(1),
            Some(RoomId::new("lobby").unwrap()),
            "GATE".to_string(),
            None,
            None,
        )
        .unwrap();
        let got = c.lookup_many(&[addr(21), addr(20)]).unwrap();
        assert_eq!(got.len(), 1);
        assert!(!got[0].decimals_known);
        assert_eq!(got[0].decimals, 18);
        assert_eq!(ledger.calls(), 0);
        assert_eq!(
            c.tokens_for_room(&RoomId::new("lobby").unwrap())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn at_tokencache_06_room_registration_survives_chain_rediscovery() {
        let store = Arc::new(InMemoryCacheStore::new_in_memory());
        let ledger = Ledger::new();
        let c = cache(&store, &ledger);
        let lobby = RoomId::new("lobby").unwrap();
        c.upsert(
            addr(20),
            addr(1),
            Some(lobby.clone()),
            "GATE".to_string(),
            None,
            Some(18),
        )
        .unwrap();
        c.upsert(addr(20), addr(1), None, "GATE2".to_string(), None, Some(18))
            .unwrap();
        let got = c.lookup_many(&[addr(20)]).unwrap();
        assert_eq!(got[0].room_id, Some(lobby));
        assert_eq!(got[0].symbol, "GATE2");
    }

    #[test]
    fn at_tokencache_07_oversized_or_empty_symbol_is_cleaned_not_rejected() {
        let store = Arc::new(InMemoryCacheStore::new_in_memory());
        let ledger = Ledger::new();
        ledger.set_base_token(&addr(1), &addr(20));
        ledger.set_token_meta(&addr(20), "A_VERY_LONG_COMMUNITY_TOKEN_SYMBOL_X", 18, None);
        ledger.set_base_token(&addr(2), &addr(21));
        ledger.set_token_meta(&addr(21), "  \u{0}\t ", 6, None);
        let c = cache(&store, &ledger);

        let long = c.resolve_vault_token(&addr(1), None).unwrap();
        assert_eq!(long.entry.symbol.chars().count(), MAX_TOKEN_SYMBOL_CHARS);
        assert!(long.entry.symbol.starts_with("A_VERY_LONG"));

        let blank = c.resolve_vault_token(&addr(2), None).unwrap();
        assert_eq!(blank.entry.symbol, UNKNOWN_TOKEN_SYMBOL);
        assert_eq!(blank.entry.decimals, 6);
    }

    #[test]
    fn at_tokencache_08_unusable_name_is_stored_as_none() {
        let store = Arc::new(InMemoryCacheStore::new_in_memory());
        let ledger = Ledger::new();
        let long_name = "N".repeat(200);
        ledger.set_base_token(&addr(1), &addr(20));
        ledger.set_token_meta(&addr(20), "GATE", 18, Some(&long_name));
        ledger.set_base_token(&addr(2), &addr(21));
        ledger.set_token_meta(&addr(21), "G\u{7}X", 18, Some("Gate\nToken"));
        let c = cache(&store, &ledger);

        let long = c.resolve_vault_token(&addr(1), None).unwrap();
        assert_eq!(long.entry.name, None);
        assert_eq!(long.entry.symbol, "GATE");

        let noisy = c.resolve_vault_token(&addr(2), None).unwrap();
        assert_eq!(noisy.entry.symbol, "GX");
        assert_eq!(noisy.entry.name.as_deref(), Some("GateToken"));
    }
}
