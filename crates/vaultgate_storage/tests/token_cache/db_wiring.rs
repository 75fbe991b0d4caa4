#![forbid(unsafe_code)]

use vaultgate_kernel_contracts::address::{ChainAddress, RoomId};
use vaultgate_kernel_contracts::cache::TokenCacheEntry;
use vaultgate_kernel_contracts::UnixTimeMs;
use vaultgate_storage::repo::TokenMetadataRepo;
use vaultgate_storage::store::{InMemoryCacheStore, StorageError};

fn addr(n: u8) -> ChainAddress {
    ChainAddress::new(format!("0x{:040x}", n)).unwrap()
}

fn entry(token: u8, vault: u8, room: Option<&str>, symbol: &str, at: u64) -> TokenCacheEntry {
    TokenCacheEntry::v1(
        addr(token),
        addr(vault),
        room.map(|r| RoomId::new(r).unwrap()),
        symbol.to_string(),
        None,
        Some(18),
        UnixTimeMs(at),
    )
    .unwrap()
}

#[test]
fn at_token_db_01_upsert_is_keyed_by_token_address() {
    let s = InMemoryCacheStore::new_in_memory();
    s.upsert_token(entry(1, 9, Some("lobby"), "OLD", 1)).unwrap();
    s.upsert_token(entry(1, 9, Some("lobby"), "NEW", 2)).unwrap();
    let got = s.get_token(&addr(1)).unwrap().unwrap();
    assert_eq!(got.symbol, "NEW");
    assert_eq!(got.updated_at, UnixTimeMs(2));
    assert_eq!(s.lookup_tokens(&[addr(1)]).unwrap().len(), 1);
}

#[test]
fn at_token_db_02_update_without_room_keeps_stored_room() {
    let s = InMemoryCacheStore::new_in_memory();
    s.upsert_token(entry(1, 9, Some("lobby"), "GATE", 1)).unwrap();
    s.upsert_token(entry(1, 9, None, "GATE", 2)).unwrap();
    assert_eq!(
        s.get_token(&addr(1)).unwrap().unwrap().room_id,
        Some(RoomId::new("lobby").unwrap())
    );
}

#[test]
fn at_token_db_03_vault_index_follows_the_latest_owner() {
    let s = InMemoryCacheStore::new_in_memory();
    s.upsert_token(entry(1, 9, None, "GATE", 1)).unwrap();
    assert_eq!(
        s.token_for_vault(&addr(9)).unwrap().unwrap().base_token_address,
        addr(1)
    );
    s.upsert_token(entry(1, 8, None, "GATE", 2)).unwrap();
    assert!(s.token_for_vault(&addr(9)).unwrap().is_none());
    assert!(s.token_for_vault(&addr(8)).unwrap().is_some());
}

#[test]
fn at_token_db_04_lookup_skips_unknown_tokens_and_keeps_order() {
    let s = InMemoryCacheStore::new_in_memory();
    s.upsert_token(entry(1, 9, Some("a"), "ONE", 1)).unwrap();
    s.upsert_token(entry(2, 8, Some("b"), "TWO", 1)).unwrap();
    let got = s.lookup_tokens(&[addr(2), addr(5), addr(1)]).unwrap();
    let symbols: Vec<&str> = got.iter().map(|e| e.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["TWO", "ONE"]);
}

#[test]
fn at_token_db_05_tokens_for_room_filters_by_room() {
    let s = InMemoryCacheStore::new_in_memory();
    s.upsert_token(entry(1, 9, Some("a"), "ONE", 1)).unwrap();
    s.upsert_token(entry(2, 8, Some("b"), "TWO", 1)).unwrap();
    s.upsert_token(entry(3, 7, None, "THREE", 1)).unwrap();
    let room_a = s.tokens_for_room(&RoomId::new("a").unwrap()).unwrap();
    assert_eq!(room_a.len(), 1);
    assert_eq!(room_a[0].symbol, "ONE");
}

#[test]
fn at_token_db_06_invalid_entry_is_refused() {
    let s = InMemoryCacheStore::new_in_memory();
    let mut bad = entry(1, 9, None, "GATE", 1);
    bad.symbol = "   ".to_string();
    assert!(matches!(
        s.upsert_token(bad),
        Err(StorageError::ContractViolation(_))
    ));
}
