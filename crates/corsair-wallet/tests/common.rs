//! Shared helpers for the integration suites.

#![allow(dead_code)]

use corsair_core::PrivateKey;
use corsair_net::MemoryBackend;
use corsair_storage::StateStore;
use corsair_wallet::{Result, WalletVault};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const SERVER_URL: &str = "mem://backup";
pub const CHAIN: &str = "chainA";

pub fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other:?}"),
    }
}

pub fn vault(backend: &MemoryBackend) -> WalletVault {
    WalletVault::new(StateStore::in_memory(), backend.connector())
}

/// The private key `login(email, username, password)` derives.
pub fn key_for(email: &str, username: &str, password: &str) -> PrivateKey {
    PrivateKey::from_seed(&format!(
        "{}\t{}\t{}",
        email.trim().to_lowercase(),
        username.trim().to_lowercase(),
        password
    ))
}

/// Let spawned push pumps run on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Counts notification dispatches for one container.
pub struct NotificationCounter {
    count: Arc<AtomicUsize>,
}

impl NotificationCounter {
    pub fn attach(vault: &WalletVault) -> Self {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        vault.subscribe(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Self { count }
    }

    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// A container fully synced against `backend`: endpoint configured,
/// remote-copy intent recorded with a fresh invitation token, logged in.
pub async fn synced_vault(
    backend: &MemoryBackend,
    email: &str,
    username: &str,
    password: &str,
) -> Result<WalletVault> {
    let v = vault(backend);
    v.use_backup_server(Some(SERVER_URL)).await?;
    let token = backend.issue_token();
    v.keep_remote_copy(true, Some(&token)).await?;
    v.login(email, username, password, Some(CHAIN)).await?;
    Ok(v)
}

/// `tree` with the volatile timestamp removed, for structural comparison.
pub fn without_last_modified(tree: &Map<String, Value>) -> Map<String, Value> {
    let mut out = tree.clone();
    out.remove("last_modified");
    out
}
