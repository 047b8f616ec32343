//! Storage backend selection.

use payledger_core::{Account, UserId};
use payledger_service::{open_store, ServiceConfig, StoreBackend};

fn config(backend: StoreBackend, data_dir: &str) -> ServiceConfig {
    ServiceConfig {
        store_backend: backend,
        data_dir: data_dir.to_string(),
        ..ServiceConfig::default()
    }
}

#[test]
fn memory_backend_opens() {
    let store = open_store(&config(StoreBackend::Memory, "/nonexistent")).unwrap();
    let account = Account::new(UserId::generate(), "owner@example.com");

    store.insert_account_if_absent(&account).unwrap();
    assert_eq!(store.list_accounts().unwrap().len(), 1);
}

#[cfg(feature = "rocksdb-backend")]
#[test]
fn rocks_backend_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_string_lossy().to_string();
    let account = Account::new(UserId::generate(), "owner@example.com");

    {
        let store = open_store(&config(StoreBackend::Rocks, &path)).unwrap();
        store.insert_account_if_absent(&account).unwrap();
    }

    let store = open_store(&config(StoreBackend::Rocks, &path)).unwrap();
    let loaded = store.get_account(&account.account_id).unwrap().unwrap();
    assert_eq!(loaded.owner, account.owner);
}

#[cfg(not(feature = "rocksdb-backend"))]
#[test]
fn rocks_backend_requires_feature() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_string_lossy().to_string();

    let err = open_store(&config(StoreBackend::Rocks, &path)).err().unwrap();
    assert!(matches!(err, payledger_core::LedgerError::Configuration(_)));
}
