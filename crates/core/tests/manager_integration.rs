//! Integration tests for `IdentityCacheManager`: persistence of the identity
//! key list, restart behaviour and reconciliation with other processes.

mod support;

use std::sync::Arc;
use std::time::Duration;

use credcache_common::testing::wait_for;
use credcache_core::testing::account;
use credcache_domain::{AccountsChangeEvent, IdentityKey};
use futures::future::join_all;
use parking_lot::Mutex;
use support::{default_key, Harness, AUTHORITY, CLIENT};

const WAIT: Duration = Duration::from_secs(2);

/// Validates that identities with accounts survive a restart.
///
/// Assertions:
/// - the first manager persists the key of the identity it created
/// - a second manager over the same storage restores that identity
/// - the restored identity already knows its accounts
#[tokio::test]
async fn test_identity_list_survives_restart() {
    let h = Harness::new();
    h.backend().add_account(account("alice"));

    let first = h.manager();
    first.initialize().await.unwrap();
    first.get_or_create(CLIENT, AUTHORITY).await.unwrap();
    assert_eq!(h.stored_keys(), Some(vec![default_key().to_storage_key()]));
    first.dispose();

    let second = h.manager();
    second.initialize().await.unwrap();
    assert_eq!(second.keys(), vec![default_key()]);
    let identity = second.get_or_create(CLIENT, AUTHORITY).await.unwrap();
    assert_eq!(identity.accounts()[0].home_account_id, "alice");
    assert_eq!(h.factory.created(), 2);
}

#[tokio::test]
async fn test_initialize_prunes_identities_without_accounts() {
    let h = Harness::new();
    let empty = IdentityKey::new("empty-client", AUTHORITY);
    h.backend().add_account(account("alice"));
    h.write_keys_external(&[default_key(), empty]);

    let manager = h.manager();
    manager.initialize().await.unwrap();

    assert_eq!(manager.keys(), vec![default_key()]);
    assert_eq!(h.stored_keys(), Some(vec![default_key().to_storage_key()]));
}

#[tokio::test]
async fn test_corrupt_identity_list_is_cleared() {
    let h = Harness::new();
    h.write_raw_keys_external("not json");

    let manager = h.manager();
    manager.initialize().await.unwrap();

    assert!(manager.keys().is_empty());
    assert_eq!(h.stored_keys(), None);
}

/// Validates that one identity failing to restore does not stop the rest.
///
/// Assertions:
/// - initialize succeeds
/// - only the healthy identity is registered
/// - the failed key is dropped from the persisted list
#[tokio::test]
async fn test_failed_identity_does_not_abort_initialize() {
    let h = Harness::new();
    let broken = IdentityKey::new("broken-client", AUTHORITY);
    h.factory.fail_creation_for("broken-client", AUTHORITY);
    h.backend().add_account(account("alice"));
    h.write_keys_external(&[default_key(), broken]);

    let manager = h.manager();
    manager.initialize().await.unwrap();

    assert_eq!(manager.keys(), vec![default_key()]);
    assert_eq!(h.stored_keys(), Some(vec![default_key().to_storage_key()]));
}

#[tokio::test]
async fn test_concurrent_get_or_create_builds_one_identity() {
    let h = Harness::new();
    h.backend().add_account(account("alice"));
    let manager = h.manager();

    let identities =
        join_all((0..8).map(|_| manager.get_or_create(CLIENT, AUTHORITY))).await;

    let first = identities[0].as_ref().unwrap();
    for identity in &identities {
        assert!(Arc::ptr_eq(first, identity.as_ref().unwrap()));
    }
    assert_eq!(h.factory.created(), 1);
    assert_eq!(manager.get_all().len(), 1);
}

/// Validates that removing the last account retires the identity.
///
/// Assertions:
/// - the manager forwards the deletion
/// - the identity is unregistered
/// - the persisted list becomes empty
#[tokio::test]
async fn test_removing_last_account_retires_identity() {
    let h = Harness::new();
    h.backend().add_account(account("alice"));
    let manager = h.manager();
    let identity = manager.get_or_create(CLIENT, AUTHORITY).await.unwrap();

    let events: Arc<Mutex<Vec<AccountsChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _sub = manager.on_did_accounts_change(move |e| sink.lock().push(e.clone()));

    identity.remove_account(&account("alice")).await.unwrap();

    assert!(manager.keys().is_empty());
    assert!(wait_for(WAIT, || h.stored_keys() == Some(Vec::new())).await);
    let deleted: Vec<String> = events
        .lock()
        .iter()
        .flat_map(|e| e.deleted.iter().map(|a| a.home_account_id.clone()))
        .collect();
    assert_eq!(deleted, vec!["alice".to_string()]);

    // Echoes of the earlier writes must not bring the identity back.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(manager.keys().is_empty());
    assert_eq!(h.stored_keys(), Some(Vec::new()));
    assert_eq!(h.factory.created(), 1);
}

/// Validates reconciliation that reads the list while a retirement is still
/// being persisted.
///
/// Assertions:
/// - a list still carrying the retired key does not recreate it
/// - other keys in that list are still picked up
/// - once a list without the key is seen, a later re-add is honoured
#[tokio::test]
async fn test_reconcile_during_pending_retirement_keeps_identity_retired() {
    let h = Harness::new();
    h.backend().add_account(account("alice"));
    let other = IdentityKey::new("other-client", AUTHORITY);
    h.backend_for("other-client", AUTHORITY).add_account(account("bob"));
    let manager = h.manager();
    let identity = manager.get_or_create(CLIENT, AUTHORITY).await.unwrap();

    identity.remove_account(&account("alice")).await.unwrap();
    assert!(manager.keys().is_empty());

    // Another process writes before our shrunken list lands.
    h.write_keys_external(&[default_key(), other.clone()]);
    manager.handle_secret_storage_change().await;
    assert_eq!(manager.keys(), vec![other.clone()]);
    assert_eq!(h.factory.created(), 2);

    h.write_keys_external(std::slice::from_ref(&other));
    manager.handle_secret_storage_change().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.keys(), vec![other.clone()]);

    h.backend().add_account(account("alice"));
    h.write_keys_external(&[default_key(), other]);
    manager.handle_secret_storage_change().await;
    assert_eq!(manager.keys().len(), 2);
    assert_eq!(h.factory.created(), 3);
}

#[tokio::test]
async fn test_identity_added_by_another_process_is_created() {
    let h = Harness::new();
    let manager = h.manager();
    manager.initialize().await.unwrap();

    let other = IdentityKey::new("other-client", AUTHORITY);
    h.backend_for("other-client", AUTHORITY).add_account(account("bob"));
    h.write_keys_external(&[other.clone()]);

    assert!(wait_for(WAIT, || manager.keys() == vec![other.clone()]).await);
    let identity = manager.get_or_create("other-client", AUTHORITY).await.unwrap();
    assert_eq!(identity.accounts()[0].home_account_id, "bob");
}

#[tokio::test]
async fn test_deleted_identity_list_disposes_everything() {
    let h = Harness::new();
    h.backend().add_account(account("alice"));
    let manager = h.manager();
    manager.get_or_create(CLIENT, AUTHORITY).await.unwrap();

    h.remove_keys_external();

    assert!(wait_for(WAIT, || manager.get_all().is_empty()).await);
}

#[tokio::test]
async fn test_corrupt_external_write_is_replaced_with_local_keys() {
    let h = Harness::new();
    h.backend().add_account(account("alice"));
    let manager = h.manager();
    manager.get_or_create(CLIENT, AUTHORITY).await.unwrap();

    h.write_raw_keys_external("{broken");

    let expected = Some(vec![default_key().to_storage_key()]);
    assert!(wait_for(WAIT, || h.stored_keys() == expected).await);
    assert_eq!(manager.keys(), vec![default_key()]);
}

/// Validates refresh-token migration into a fresh identity.
///
/// Assertions:
/// - every token is attempted, including ones the server rejects
/// - the redeemed account is visible on the identity
#[tokio::test]
async fn test_migration_redeems_refresh_tokens() {
    let h = Harness::new();
    let backend = h.backend();
    backend.register_refresh_token("rt-alice", account("alice"));
    let manager = h.manager();

    let tokens = vec!["rt-alice".to_string(), "rt-unknown".to_string()];
    let identity =
        manager.get_or_create_with_migration(CLIENT, AUTHORITY, &tokens).await.unwrap();

    assert_eq!(backend.refresh_token_calls(), 2);
    assert_eq!(identity.accounts().len(), 1);
    assert_eq!(identity.accounts()[0].home_account_id, "alice");
    assert_eq!(identity.pending_refreshes(), 1);
}
