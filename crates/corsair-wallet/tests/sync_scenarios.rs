//! End-to-end reconciliation against the in-process backend: first
//! uploads, pull-overwrite, live pushes, conflicts, password rotation, and
//! remote deletion.

mod common;

use common::*;
use corsair_net::MemoryBackend;
use corsair_wallet::{Error, RemoteStatus};
use serde_json::{json, Value};

/// A second device for the same account: fresh store, same backend, pulls
/// the server copy at login, then records its own remote-copy intent.
async fn second_device(
    backend: &MemoryBackend,
    email: &str,
    username: &str,
    password: &str,
) -> corsair_wallet::WalletVault {
    let v = vault(backend);
    v.use_backup_server(Some(SERVER_URL)).await.unwrap();
    v.login(email, username, password, None).await.unwrap();
    v.keep_remote_copy(true, None).await.unwrap();
    v
}

// ============================================================================
// First login against a server
// ============================================================================

#[tokio::test]
async fn first_login_with_remote_copy_disabled_stays_local() {
    let backend = MemoryBackend::new();
    let v = vault(&backend);
    v.use_backup_server(Some(SERVER_URL)).await.unwrap();
    v.keep_remote_copy(false, None).await.unwrap();

    v.login("a@x", "alice", "pw", Some(CHAIN)).await.unwrap();

    assert_eq!(v.remote_status().await, Some(RemoteStatus::NoContent));
    assert!(!v.is_empty().await);
    assert!(v.remote_hash().await.unwrap().is_none());
    let pubkey = key_for("a@x", "alice", "pw").public_key();
    assert!(!backend.has_wallet(&pubkey), "nothing was uploaded");
}

#[tokio::test]
async fn first_login_with_token_creates_the_server_wallet() {
    let backend = MemoryBackend::new();
    let v = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();

    let pubkey = key_for("a@x", "alice", "pw").public_key();
    assert!(backend.has_wallet(&pubkey));
    assert_eq!(v.remote_status().await, Some(RemoteStatus::NotModified));

    // The acknowledged hash is the local ciphertext hash, and the token is
    // spent.
    let local = v.local_hash().await.unwrap().unwrap();
    assert_eq!(v.remote_hash().await.unwrap(), Some(local));
    assert_eq!(backend.wallet_hash(&pubkey), Some(local.to_base64()));
}

#[tokio::test]
async fn saves_keep_the_server_in_lockstep() {
    let backend = MemoryBackend::new();
    let v = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    let pubkey = key_for("a@x", "alice", "pw").public_key();

    v.set_state(obj(json!({"k": 1}))).await.unwrap();
    let local = v.local_hash().await.unwrap().unwrap();
    assert_eq!(v.remote_hash().await.unwrap(), Some(local));
    assert_eq!(backend.wallet_hash(&pubkey), Some(local.to_base64()));
    assert_eq!(v.remote_status().await, Some(RemoteStatus::NotModified));
}

// ============================================================================
// Pull overwrite (second device)
// ============================================================================

#[tokio::test]
async fn second_device_pulls_the_server_copy() {
    let backend = MemoryBackend::new();
    let a = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    a.set_state(obj(json!({"k": 1}))).await.unwrap();

    let b = vault(&backend);
    b.use_backup_server(Some(SERVER_URL)).await.unwrap();
    b.login("a@x", "alice", "pw", None).await.unwrap();

    let tree = b.get_state().await.unwrap();
    assert_eq!(tree.get("k"), Some(&json!(1)));
    assert_eq!(tree.get("chain_id"), Some(&json!(CHAIN)));

    // The pulled ciphertext is byte-identical to the server copy.
    let pubkey = key_for("a@x", "alice", "pw").public_key();
    let local = b.local_hash().await.unwrap().unwrap();
    assert_eq!(b.remote_hash().await.unwrap(), Some(local));
    assert_eq!(backend.wallet_hash(&pubkey), Some(local.to_base64()));
    assert_eq!(
        local,
        corsair_core::Sha256Digest::compute(&backend.wallet_ciphertext(&pubkey).unwrap())
    );
}

#[tokio::test]
async fn pushes_propagate_to_subscribed_devices() {
    let backend = MemoryBackend::new();
    let a = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    let b = second_device(&backend, "a@x", "alice", "pw").await;

    a.set_state(obj(json!({"k": 2}))).await.unwrap();
    settle().await;

    let tree = b.get_state().await.unwrap();
    assert_eq!(tree.get("k"), Some(&json!(2)));
    assert_eq!(b.remote_hash().await.unwrap(), a.remote_hash().await.unwrap());
    assert_eq!(b.remote_status().await, Some(RemoteStatus::NotModified));
}

#[tokio::test]
async fn server_side_deletion_is_observed_as_no_content() {
    let backend = MemoryBackend::new();
    let a = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    let b = second_device(&backend, "a@x", "alice", "pw").await;

    // A turns its server copy off; B learns about it through the push.
    a.keep_remote_copy(false, None).await.unwrap();
    settle().await;

    assert_eq!(b.remote_status().await, Some(RemoteStatus::NoContent));
    assert!(b.remote_hash().await.unwrap().is_none());
    assert!(!b.is_empty().await, "local copy is retained");
}

// ============================================================================
// Conflict
// ============================================================================

#[tokio::test]
async fn concurrent_edits_conflict_and_keep_the_local_copy() {
    let backend = MemoryBackend::new();
    let a = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    let b = second_device(&backend, "a@x", "alice", "pw").await;
    let b_acknowledged = b.remote_hash().await.unwrap();

    // A wins the race; B edits against a stale acknowledged hash.
    a.set_state(obj(json!({"k": "A"}))).await.unwrap();
    let err = b.set_state(obj(json!({"k": "B"}))).await.unwrap_err();
    assert!(matches!(err, Error::Conflict));
    assert_eq!(b.remote_status().await, Some(RemoteStatus::Conflict));

    // B's local edit survives, persisted and un-acknowledged.
    let tree = b.get_state().await.unwrap();
    assert_eq!(tree.get("k"), Some(&json!("B")));
    assert_eq!(b.remote_hash().await.unwrap(), b_acknowledged);
    assert_ne!(b.local_hash().await.unwrap(), b_acknowledged);

    // The push for A's save arrives later and cannot resolve anything.
    settle().await;
    assert_eq!(b.remote_status().await, Some(RemoteStatus::Conflict));
    assert_eq!(
        b.get_state().await.unwrap().get("k"),
        Some(&json!("B"))
    );
    // The pushed hash was still recorded as server truth.
    assert_eq!(b.remote_hash().await.unwrap(), a.remote_hash().await.unwrap());
}

#[tokio::test]
async fn conflict_rejection_still_notifies_subscribers() {
    let backend = MemoryBackend::new();
    let a = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    let b = second_device(&backend, "a@x", "alice", "pw").await;

    a.set_state(obj(json!({"k": "A"}))).await.unwrap();
    let notifications = NotificationCounter::attach(&b);
    let _ = b.set_state(obj(json!({"k": "B"}))).await.unwrap_err();
    assert!(notifications.get() >= 1, "failure still dispatched an update");
}

// ============================================================================
// Change password
// ============================================================================

#[tokio::test]
async fn change_password_rotates_key_and_server_copy() {
    let backend = MemoryBackend::new();
    let v = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    v.set_state(obj(json!({"k": 5}))).await.unwrap();
    let before = v.get_state().await.unwrap();

    v.change_password("pw2", "a@x", "alice").await.unwrap();

    let old_pubkey = key_for("a@x", "alice", "pw").public_key();
    let new_pubkey = key_for("a@x", "alice", "pw2").public_key();
    assert!(!backend.has_wallet(&old_pubkey));
    assert!(backend.has_wallet(&new_pubkey));

    let local = v.local_hash().await.unwrap().unwrap();
    assert_eq!(v.remote_hash().await.unwrap(), Some(local));
    assert_eq!(backend.wallet_hash(&new_pubkey), Some(local.to_base64()));

    // Unlocked under the new key; the tree only moved its timestamp.
    assert!(!v.is_locked().await);
    assert!(v.verify_password("a@x", "alice", "pw2").await.unwrap());
    assert!(!v.verify_password("a@x", "alice", "pw").await.unwrap());
    let after = v.get_state().await.unwrap();
    assert_eq!(
        Value::Object(without_last_modified(&before)),
        Value::Object(without_last_modified(&after))
    );
}

#[tokio::test]
async fn rotated_wallet_opens_on_a_fresh_device_with_the_new_password() {
    let backend = MemoryBackend::new();
    let v = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    v.change_password("pw2", "a@x", "alice").await.unwrap();

    let fresh = vault(&backend);
    fresh.use_backup_server(Some(SERVER_URL)).await.unwrap();
    let err = fresh.login("a@x", "alice", "pw", None).await.unwrap_err();
    assert!(matches!(err, Error::MissingField(field) if field == "chain_id"));

    let fresh = vault(&backend);
    fresh.use_backup_server(Some(SERVER_URL)).await.unwrap();
    fresh.login("a@x", "alice", "pw2", None).await.unwrap();
    assert_eq!(
        fresh.get_state().await.unwrap().get("chain_id"),
        Some(&json!(CHAIN))
    );
}

#[tokio::test]
async fn change_password_refuses_unsynced_local_edits() {
    let backend = MemoryBackend::new();
    let v = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();

    // Go offline and edit: the local hash drifts from the acknowledged one.
    v.use_backup_server(None).await.unwrap();
    v.set_state(obj(json!({"k": "offline edit"}))).await.unwrap();
    let hash_before = v.local_hash().await.unwrap();

    let err = v.change_password("pw2", "a@x", "alice").await.unwrap_err();
    assert!(matches!(err, Error::WalletModified));
    assert_eq!(v.local_hash().await.unwrap(), hash_before, "no re-encryption");
    assert!(v.verify_password("a@x", "alice", "pw").await.unwrap());
}

#[tokio::test]
async fn change_password_refuses_weak_credentials_with_remote_copy() {
    let backend = MemoryBackend::new();
    let v = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    let err = v.change_password("pw2", "", "alice").await.unwrap_err();
    assert!(matches!(err, Error::WeakPassword));
}

#[tokio::test]
async fn change_password_without_remote_copy_is_local_only() {
    let backend = MemoryBackend::new();
    let v = vault(&backend);
    v.login("a@x", "alice", "pw", Some(CHAIN)).await.unwrap();
    v.change_password("pw2", "a@x", "alice").await.unwrap();

    assert!(v.verify_password("a@x", "alice", "pw2").await.unwrap());
    v.logout().await.unwrap();
    v.login("a@x", "alice", "pw2", Some(CHAIN)).await.unwrap();
}

// ============================================================================
// Deleting the server copy
// ============================================================================

#[tokio::test]
async fn disabling_remote_copy_deletes_the_server_wallet() {
    let backend = MemoryBackend::new();
    let v = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    let pubkey = key_for("a@x", "alice", "pw").public_key();
    assert_eq!(v.remote_status().await, Some(RemoteStatus::NotModified));

    v.keep_remote_copy(false, None).await.unwrap();

    assert!(!backend.has_wallet(&pubkey));
    assert!(v.remote_hash().await.unwrap().is_none());
    assert_eq!(v.remote_status().await, Some(RemoteStatus::NoContent));
    assert!(!v.is_empty().await, "local ciphertext is retained");

    // Re-enabling needs a fresh invitation token and re-creates the copy.
    let token = backend.issue_token();
    v.keep_remote_copy(true, Some(&token)).await.unwrap();
    assert!(backend.has_wallet(&pubkey));
    assert_eq!(v.remote_status().await, Some(RemoteStatus::NotModified));
}

// ============================================================================
// Logout and transports
// ============================================================================

#[tokio::test]
async fn logout_stops_receiving_pushes() {
    let backend = MemoryBackend::new();
    let a = synced_vault(&backend, "a@x", "alice", "pw").await.unwrap();
    let b = second_device(&backend, "a@x", "alice", "pw").await;

    b.logout().await.unwrap();
    a.set_state(obj(json!({"k": "late"}))).await.unwrap();
    settle().await;

    // B is locked and disconnected; nothing moved under it.
    assert!(b.is_locked().await);
    assert!(b.remote_status().await.is_none());
}

#[tokio::test]
async fn switching_backup_servers_persists_the_url_once() {
    let backend = MemoryBackend::new();
    let v = vault(&backend);
    let notifications = NotificationCounter::attach(&v);

    v.use_backup_server(Some("mem://one")).await.unwrap();
    assert_eq!(notifications.get(), 1);
    v.use_backup_server(Some("mem://one")).await.unwrap();
    assert_eq!(notifications.get(), 1, "unchanged url is silent");
    v.use_backup_server(Some("mem://two")).await.unwrap();
    assert_eq!(notifications.get(), 2);
    v.use_backup_server(None).await.unwrap();
    assert_eq!(notifications.get(), 3);
}
