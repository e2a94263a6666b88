//! The wallet container.
//!
//! A [`WalletVault`] owns one storage state, at most one transport, and the
//! in-memory wallet tree. It is a cheap-clone handle; all mutable state sits
//! behind a single async mutex, so public operations are serialized and an
//! operation's encrypt/persist phases can never interleave with another's.
//!
//! Every public entry point follows the same shape: lock, run, then hand
//! the coalesced dirty flag to the notification dispatcher. This happens on
//! success and on failure alike, so subscribers always observe status
//! transitions.

use crate::notify::{callback, SubscriberId, SubscriberRegistry, WalletUpdate};
use crate::{settings, Error, Result};
use corsair_core::{tree, PrivateKey, PublicKey, Sha256Digest};
use corsair_net::{SocketStatus, TransportConnector, WalletTransport};
use corsair_storage::StateStore;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

/// Reserved wallet field: opaque chain identifier, immutable once set.
pub(crate) const FIELD_CHAIN_ID: &str = "chain_id";
/// Reserved wallet field: creation timestamp.
pub(crate) const FIELD_CREATED: &str = "created";
/// Reserved wallet field: last mutation timestamp.
pub(crate) const FIELD_LAST_MODIFIED: &str = "last_modified";
/// Reserved wallet field: credentials lacked an email or username.
pub(crate) const FIELD_WEAK_PASSWORD: &str = "weak_password";

/// Current UTC time in the ISO-8601 form used across wallet and storage.
pub(crate) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Relationship between the local wallet and the server copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Server copy differs from the local ciphertext
    Ok,
    /// Server holds no wallet
    NoContent,
    /// Server copy matches the local ciphertext
    NotModified,
    /// Divergent concurrent edits; human action required
    Conflict,
}

impl RemoteStatus {
    /// The wire rendering of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NoContent => "No Content",
            Self::NotModified => "Not Modified",
            Self::Conflict => "Conflict",
        }
    }

    /// Parse a wire status string.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "OK" => Some(Self::Ok),
            "No Content" => Some(Self::NoContent),
            "Not Modified" => Some(Self::NotModified),
            "Conflict" => Some(Self::Conflict),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of local mutations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LocalStatus {
    /// No mutation outstanding
    #[default]
    Clean,
    /// A mutation is being encrypted/persisted
    Pending,
    /// The last local write failed
    Error(String),
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("clean"),
            Self::Pending => f.write_str("Pending"),
            Self::Error(text) => f.write_str(text),
        }
    }
}

pub(crate) struct RemoteSubscription {
    pub(crate) pubkey: PublicKey,
    pub(crate) pump: JoinHandle<()>,
}

pub(crate) struct VaultState {
    pub(crate) store: StateStore,
    pub(crate) connector: Arc<dyn TransportConnector>,
    pub(crate) transport: Option<Arc<dyn WalletTransport>>,
    pub(crate) wallet: Map<String, Value>,
    pub(crate) private_key: Option<PrivateKey>,
    pub(crate) remote_status: Option<RemoteStatus>,
    pub(crate) local_status: LocalStatus,
    pub(crate) notify: bool,
    pub(crate) tree_dirty: bool,
    pub(crate) subscription: Option<RemoteSubscription>,
}

impl VaultState {
    pub(crate) fn require_key(&self) -> Result<PrivateKey> {
        self.private_key.clone().ok_or(Error::Locked)
    }

    pub(crate) fn set_remote_status(&mut self, status: Option<RemoteStatus>) {
        if self.remote_status != status {
            debug!(from = ?self.remote_status, to = ?status, "remote status changed");
            self.remote_status = status;
            self.notify = true;
        }
    }

    pub(crate) fn set_local_status(&mut self, status: LocalStatus) {
        if self.local_status != status {
            self.local_status = status;
            self.notify = true;
        }
    }

    pub(crate) fn touch_last_modified(&mut self) {
        self.wallet
            .insert(FIELD_LAST_MODIFIED.to_string(), Value::String(now_iso()));
    }

    pub(crate) fn snapshot(&self) -> WalletUpdate {
        WalletUpdate {
            locked: self.private_key.is_none(),
            empty: !self.store.has(settings::ENCRYPTED_WALLET),
            local_status: self.local_status.clone(),
            remote_status: self.remote_status,
            socket_status: self
                .transport
                .as_ref()
                .map(|t| t.socket_status())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn take_update(&mut self) -> Option<WalletUpdate> {
        if !self.notify {
            return None;
        }
        self.notify = false;
        Some(self.snapshot())
    }
}

pub(crate) struct VaultInner {
    pub(crate) state: Mutex<VaultState>,
    pub(crate) subscribers: SubscriberRegistry,
}

/// An encrypted wallet with optional server backup.
///
/// Cloning is cheap and yields a handle to the same container.
#[derive(Clone)]
pub struct WalletVault {
    pub(crate) inner: Arc<VaultInner>,
}

impl WalletVault {
    /// Create a container over a storage state and a way to reach backup
    /// servers. Nothing is decrypted or connected yet.
    pub fn new(store: StateStore, connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                state: Mutex::new(VaultState {
                    store,
                    connector,
                    transport: None,
                    wallet: Map::new(),
                    private_key: None,
                    remote_status: None,
                    local_status: LocalStatus::Clean,
                    notify: false,
                    tree_dirty: false,
                    subscription: None,
                }),
                subscribers: SubscriberRegistry::default(),
            }),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, VaultState> {
        self.inner.state.lock().await
    }

    /// Clear the dirty flag and fan the update out, then return `result`.
    pub(crate) fn finish<T>(
        &self,
        mut st: MutexGuard<'_, VaultState>,
        result: Result<T>,
    ) -> Result<T> {
        let update = st.take_update();
        drop(st);
        if let Some(update) = update {
            self.inner.subscribers.dispatch(&update);
        }
        result
    }

    /// Whether no wallet ciphertext is persisted.
    pub async fn is_empty(&self) -> bool {
        let st = self.lock().await;
        !st.store.has(settings::ENCRYPTED_WALLET)
    }

    /// Whether no private key is loaded.
    pub async fn is_locked(&self) -> bool {
        self.lock().await.private_key.is_none()
    }

    /// Last known relationship with the server copy.
    pub async fn remote_status(&self) -> Option<RemoteStatus> {
        self.lock().await.remote_status
    }

    /// Status of local mutations.
    pub async fn local_status(&self) -> LocalStatus {
        self.lock().await.local_status.clone()
    }

    /// Connection-level socket state.
    pub async fn socket_status(&self) -> SocketStatus {
        self.lock()
            .await
            .transport
            .as_ref()
            .map(|t| t.socket_status())
            .unwrap_or_default()
    }

    /// SHA-256 of the persisted ciphertext, if any.
    pub async fn local_hash(&self) -> Result<Option<Sha256Digest>> {
        let st = self.lock().await;
        settings::local_hash(&st.store)
    }

    /// Hash of the ciphertext last acknowledged by the server, if any.
    pub async fn remote_hash(&self) -> Result<Option<Sha256Digest>> {
        let st = self.lock().await;
        settings::remote_hash(&st.store)
    }

    /// Toggle durability of the local storage state. Fires no notification.
    pub async fn keep_local_copy(&self, save: bool) -> Result<()> {
        let mut st = self.lock().await;
        st.store.set_save_to_disk(save)?;
        Ok(())
    }

    /// Point the container at a backup server (or disconnect with `None`).
    ///
    /// Any existing transport is closed first; the call returns once the
    /// close has completed and the new connection, if requested, is open.
    /// A changed endpoint is persisted and raises a notification.
    pub async fn use_backup_server(&self, url: Option<&str>) -> Result<()> {
        let mut st = self.lock().await;
        let result = self.use_backup_server_inner(&mut st, url).await;
        self.finish(st, result)
    }

    async fn use_backup_server_inner(
        &self,
        st: &mut VaultState,
        url: Option<&str>,
    ) -> Result<()> {
        self.drop_subscription(st).await;
        if let Some(transport) = st.transport.take() {
            transport.close().await;
        }
        if let Some(url) = url {
            st.transport = Some(st.connector.clone().connect(url).await?);
            debug!(url, "backup server connected");
        }
        if settings::remote_url(&st.store).as_deref() != url {
            settings::set_remote_url(&mut st.store, url)?;
            st.notify = true;
        }
        Ok(())
    }

    /// Record the intent to keep (or stop keeping) a server copy, together
    /// with an invitation token for a first upload, then reconcile.
    ///
    /// Turning the intent off while in sync deletes the server copy; the
    /// local wallet is always retained.
    pub async fn keep_remote_copy(&self, save: bool, token: Option<&str>) -> Result<()> {
        let mut st = self.lock().await;
        let result = self.keep_remote_copy_inner(&mut st, save, token).await;
        self.finish(st, result)
    }

    async fn keep_remote_copy_inner(
        &self,
        st: &mut VaultState,
        save: bool,
        token: Option<&str>,
    ) -> Result<()> {
        if save {
            if settings::remote_url(&st.store).is_none() {
                return Err(Error::Configuration(
                    "remote_copy requires a backup server url".into(),
                ));
            }
            if st.wallet.get(FIELD_WEAK_PASSWORD).and_then(Value::as_bool) == Some(true) {
                return Err(Error::WeakPassword);
            }
        }
        settings::set_remote_copy(&mut st.store, save)?;
        if let Some(token) = token {
            settings::set_remote_token(&mut st.store, Some(token))?;
        }
        st.notify = true;
        if let Some(key) = st.private_key.clone() {
            self.sync(st, &key).await?;
        }
        Ok(())
    }

    /// The current wallet tree. Requires an unlocked container and triggers
    /// a reconciliation pass first.
    pub async fn get_state(&self) -> Result<Map<String, Value>> {
        let mut st = self.lock().await;
        let result = match st.require_key() {
            Ok(key) => match self.sync(&mut st, &key).await {
                Ok(()) => Ok(st.wallet.clone()),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.finish(st, result)
    }

    /// Deep-merge `partial` into the wallet and persist.
    ///
    /// A merge that changes nothing is a complete no-op: no timestamp
    /// bump, no write, no notification.
    pub async fn set_state(&self, partial: Map<String, Value>) -> Result<()> {
        let mut st = self.lock().await;
        let result = self.set_state_inner(&mut st, partial).await;
        self.finish(st, result)
    }

    async fn set_state_inner(
        &self,
        st: &mut VaultState,
        partial: Map<String, Value>,
    ) -> Result<()> {
        let key = st.require_key()?;
        if !st.wallet.contains_key(FIELD_CREATED) {
            return Err(Error::NotInitialized);
        }
        let merged = tree::merged(&st.wallet, &partial);
        if merged == st.wallet {
            return Ok(());
        }
        st.wallet = merged;
        st.touch_last_modified();
        st.tree_dirty = true;
        st.set_local_status(LocalStatus::Pending);
        st.notify = true;

        let result = self.update_wallet(st, &key).await;
        if result.is_err() && st.local_status == LocalStatus::Pending {
            // The local write itself failed; record it. Remote rejections
            // arrive after the write and leave local_status clean.
            if let Err(e) = &result {
                st.set_local_status(LocalStatus::Error(e.to_string()));
            }
        }
        result
    }

    /// Remove the field at `path` from the wallet and persist.
    ///
    /// Deep-merge cannot express deletion, so this is the explicit
    /// counterpart to [`set_state`](WalletVault::set_state).
    pub async fn delete_field(&self, path: &str) -> Result<()> {
        let mut st = self.lock().await;
        let result = self.delete_field_inner(&mut st, path).await;
        self.finish(st, result)
    }

    async fn delete_field_inner(&self, st: &mut VaultState, path: &str) -> Result<()> {
        let key = st.require_key()?;
        if !st.wallet.contains_key(FIELD_CREATED) {
            return Err(Error::NotInitialized);
        }
        if !tree::delete_field(&mut st.wallet, path) {
            return Ok(());
        }
        st.touch_last_modified();
        st.tree_dirty = true;
        st.set_local_status(LocalStatus::Pending);
        st.notify = true;

        let result = self.update_wallet(st, &key).await;
        if result.is_err() && st.local_status == LocalStatus::Pending {
            if let Err(e) = &result {
                st.set_local_status(LocalStatus::Error(e.to_string()));
            }
        }
        result
    }

    /// Seed the in-memory tree before a first login.
    ///
    /// Only allowed while locked; once a key is loaded, mutations go
    /// through [`set_state`](WalletVault::set_state). The data is folded
    /// into the wallet by the next `login`.
    pub async fn preload_state(&self, partial: Map<String, Value>) -> Result<()> {
        let mut st = self.lock().await;
        if st.private_key.is_some() {
            return Err(Error::Configuration(
                "preload_state is only valid while locked".into(),
            ));
        }
        tree::deep_merge(&mut st.wallet, &partial);
        Ok(())
    }

    /// Register a subscriber; the callback runs after every operation that
    /// changed observable state. Errors from the callback are logged.
    pub fn subscribe<F>(&self, f: F) -> SubscriberId
    where
        F: Fn(&WalletUpdate) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback(f), None)
    }

    /// Like [`subscribe`](WalletVault::subscribe), but each callback result
    /// is also delivered on the `ack` completion handle.
    pub fn subscribe_with_ack<F>(
        &self,
        f: F,
        ack: mpsc::UnboundedSender<Result<()>>,
    ) -> SubscriberId
    where
        F: Fn(&WalletUpdate) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(callback(f), Some(ack))
    }

    /// Remove a subscriber. Unknown ids log a warning and return `false`.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }

    /// Abort the push pump and drop the server-side subscription, if any.
    pub(crate) async fn drop_subscription(&self, st: &mut VaultState) {
        if let Some(subscription) = st.subscription.take() {
            subscription.pump.abort();
            if let Some(transport) = st.transport.clone() {
                if let Err(e) = transport.fetch_wallet_unsubscribe(subscription.pubkey).await {
                    debug!("unsubscribe failed: {e}");
                }
            }
        }
    }
}

impl fmt::Debug for WalletVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletVault")
            .field("subscribers", &self.inner.subscribers.len())
            .finish()
    }
}
