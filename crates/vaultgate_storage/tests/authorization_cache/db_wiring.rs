#![forbid(unsafe_code)]

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use vaultgate_kernel_contracts::address::ChainAddress;
use vaultgate_kernel_contracts::UnixTimeMs;
use vaultgate_storage::repo::AuthorizationCacheRepo;
use vaultgate_storage::store::{BeginRefresh, InMemoryCacheStore, StorageError};

const LEASE: Duration = Duration::from_secs(300);

fn addr(n: u8) -> ChainAddress {
    ChainAddress::new(format!("0x{:040x}", n)).unwrap()
}

fn acquire(store: &InMemoryCacheStore, vault: &ChainAddress, now: u64) -> UnixTimeMs {
    match store.try_begin_refresh(vault, UnixTimeMs(now), LEASE).unwrap() {
        BeginRefresh::Acquired { started_at, .. } => started_at,
        other => panic!("expected acquire, got {other:?}"),
    }
}

#[test]
fn at_auth_db_01_first_begin_creates_unrefreshed_row() {
    let s = InMemoryCacheStore::new_in_memory();
    assert!(s.get_authorization(&addr(1)).unwrap().is_none());
    acquire(&s, &addr(1), 10);
    let row = s.get_authorization(&addr(1)).unwrap().unwrap();
    assert!(row.refresh_in_progress);
    assert_eq!(row.refresh_started_at, Some(UnixTimeMs(10)));
    assert_eq!(row.last_refreshed, None);
}

#[test]
fn at_auth_db_02_second_begin_is_busy_not_queued() {
    let s = InMemoryCacheStore::new_in_memory();
    acquire(&s, &addr(1), 10);
    assert_eq!(
        s.try_begin_refresh(&addr(1), UnixTimeMs(20), LEASE).unwrap(),
        BeginRefresh::Busy {
            started_at: UnixTimeMs(10)
        }
    );
}

#[test]
fn at_auth_db_03_complete_replaces_data_and_clears_flag() {
    let s = InMemoryCacheStore::new_in_memory();
    let claim = acquire(&s, &addr(1), 10);
    assert!(s
        .complete_refresh(&addr(1), claim, vec![addr(7), addr(8)], UnixTimeMs(15))
        .unwrap());
    let row = s.get_authorization(&addr(1)).unwrap().unwrap();
    assert_eq!(row.authorized_addresses, vec![addr(7), addr(8)]);
    assert_eq!(row.last_refreshed, Some(UnixTimeMs(15)));
    assert!(!row.refresh_in_progress);
    assert_eq!(row.refresh_started_at, None);
}

#[test]
fn at_auth_db_04_abort_keeps_stale_data() {
    let s = InMemoryCacheStore::new_in_memory();
    let claim = acquire(&s, &addr(1), 10);
    s.complete_refresh(&addr(1), claim, vec![addr(7)], UnixTimeMs(11))
        .unwrap();
    let claim = acquire(&s, &addr(1), 100);
    assert!(s.abort_refresh(&addr(1), claim).unwrap());
    let row = s.get_authorization(&addr(1)).unwrap().unwrap();
    assert_eq!(row.authorized_addresses, vec![addr(7)]);
    assert_eq!(row.last_refreshed, Some(UnixTimeMs(11)));
    assert!(!row.refresh_in_progress);
}

#[test]
fn at_auth_db_05_abandoned_flag_is_taken_over_after_lease() {
    let s = InMemoryCacheStore::new_in_memory();
    let stale_claim = acquire(&s, &addr(1), 1_000);
    let later = 1_000 + LEASE.as_millis() as u64;
    match s.try_begin_refresh(&addr(1), UnixTimeMs(later), LEASE).unwrap() {
        BeginRefresh::Acquired {
            started_at,
            took_over_abandoned,
        } => {
            assert!(took_over_abandoned);
            assert_eq!(started_at, UnixTimeMs(later));
        }
        other => panic!("expected takeover, got {other:?}"),
    }
    // A late release from the old holder must not free the new claim.
    assert!(!s.abort_refresh(&addr(1), stale_claim).unwrap());
    assert!(s.get_authorization(&addr(1)).unwrap().unwrap().refresh_in_progress);
}

#[test]
fn at_auth_db_06_duplicate_addresses_are_rejected() {
    let s = InMemoryCacheStore::new_in_memory();
    let claim = acquire(&s, &addr(1), 10);
    let err = s
        .complete_refresh(&addr(1), claim, vec![addr(7), addr(7)], UnixTimeMs(11))
        .unwrap_err();
    assert!(matches!(err, StorageError::ContractViolation(_)));
}

#[test]
fn at_auth_db_07_offline_store_fails_every_call() {
    let s = InMemoryCacheStore::new_in_memory();
    s.set_offline(true);
    assert_eq!(
        s.get_authorization(&addr(1)).unwrap_err(),
        StorageError::Unavailable
    );
    assert_eq!(
        s.try_begin_refresh(&addr(1), UnixTimeMs(1), LEASE)
            .unwrap_err(),
        StorageError::Unavailable
    );
    s.set_offline(false);
    assert!(s.get_authorization(&addr(1)).is_ok());
}

#[test]
fn at_auth_db_08_concurrent_begins_grant_exactly_one_claim() {
    let s = Arc::new(InMemoryCacheStore::new_in_memory());
    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let s = s.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                s.try_begin_refresh(&addr(1), UnixTimeMs(50), LEASE).unwrap()
            })
        })
        .collect();
    let acquired = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|o| matches!(o, BeginRefresh::Acquired { .. }))
        .count();
    assert_eq!(acquired, 1);
}
