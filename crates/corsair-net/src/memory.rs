//! In-process wallet server.
//!
//! A protocol-faithful backend for tests and local development: wallets
//! keyed by signature-recovered public keys, hash compare-and-swap on
//! saves, single-use base58 invitation tokens, and push fan-out to every
//! other subscription on the changed key.

use crate::transport::{
    CreatedWallet, PushReceiver, SaveResponse, ServerWallet, SocketStatus, TransportConnector,
    WalletTransport, STATUS_CONFLICT, STATUS_NOT_MODIFIED, STATUS_NO_CONTENT, STATUS_OK,
};
use crate::{Error, Result};
use corsair_core::{encode_base64, PublicKey, Sha256Digest, Signature};
use parking_lot::Mutex;
use rand::RngCore as _;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct StoredWallet {
    ciphertext: Vec<u8>,
    hash: Sha256Digest,
    created: String,
    updated: String,
}

struct Subscription {
    id: u64,
    conn: u64,
    sender: mpsc::UnboundedSender<ServerWallet>,
}

#[derive(Default)]
struct BackendState {
    wallets: Mutex<HashMap<PublicKey, StoredWallet>>,
    subscriptions: Mutex<HashMap<PublicKey, Vec<Subscription>>>,
    tokens: Mutex<HashSet<String>>,
    next_subscription: AtomicU64,
    next_connection: AtomicU64,
}

/// Shared in-process server state.
///
/// Clone the backend (or its [`connector`](MemoryBackend::connector)) to
/// hand several containers connections into the same server.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<BackendState>,
}

impl MemoryBackend {
    /// A fresh, empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a single-use invitation token for a first upload.
    pub fn issue_token(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = bs58::encode(bytes).into_string();
        self.state.tokens.lock().insert(token.clone());
        token
    }

    /// A connector handing out connections into this server.
    pub fn connector(&self) -> Arc<dyn TransportConnector> {
        Arc::new(MemoryConnector {
            backend: self.clone(),
        })
    }

    /// Whether the server holds a wallet for `pubkey`.
    pub fn has_wallet(&self, pubkey: &PublicKey) -> bool {
        self.state.wallets.lock().contains_key(pubkey)
    }

    /// Base64 hash of the server copy for `pubkey`, if any.
    pub fn wallet_hash(&self, pubkey: &PublicKey) -> Option<String> {
        self.state
            .wallets
            .lock()
            .get(pubkey)
            .map(|w| w.hash.to_base64())
    }

    /// Server copy ciphertext for `pubkey`, if any.
    pub fn wallet_ciphertext(&self, pubkey: &PublicKey) -> Option<Vec<u8>> {
        self.state
            .wallets
            .lock()
            .get(pubkey)
            .map(|w| w.ciphertext.clone())
    }

    fn push_to_others(&self, pubkey: &PublicKey, from_conn: u64, event: ServerWallet) {
        let mut subs = self.state.subscriptions.lock();
        let Some(list) = subs.get_mut(pubkey) else {
            return;
        };
        list.retain(|sub| {
            if sub.conn == from_conn {
                return true;
            }
            // A dead receiver means the peer is gone; drop the subscription.
            sub.sender.send(event.clone()).is_ok()
        });
    }
}

/// Connector producing [`MemoryTransport`] connections.
pub struct MemoryConnector {
    backend: MemoryBackend,
}

#[async_trait::async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn WalletTransport>> {
        let conn = self
            .backend
            .state
            .next_connection
            .fetch_add(1, Ordering::Relaxed);
        debug!(url, conn, "memory transport connected");
        Ok(Arc::new(MemoryTransport {
            backend: self.backend.clone(),
            conn,
            open: AtomicBool::new(true),
            subscriptions: Mutex::new(HashMap::new()),
        }))
    }
}

/// One connection into a [`MemoryBackend`].
pub struct MemoryTransport {
    backend: MemoryBackend,
    conn: u64,
    open: AtomicBool,
    subscriptions: Mutex<HashMap<PublicKey, u64>>,
}

impl MemoryTransport {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

#[async_trait::async_trait]
impl WalletTransport for MemoryTransport {
    async fn fetch_wallet(
        &self,
        pubkey: PublicKey,
        local_hash: Option<Sha256Digest>,
    ) -> Result<(ServerWallet, PushReceiver)> {
        self.ensure_open()?;

        let mut own = self.subscriptions.lock();
        if own.contains_key(&pubkey) {
            return Err(Error::AlreadySubscribed(pubkey.to_string()));
        }

        let id = self
            .backend
            .state
            .next_subscription
            .fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.backend
            .state
            .subscriptions
            .lock()
            .entry(pubkey)
            .or_default()
            .push(Subscription {
                id,
                conn: self.conn,
                sender,
            });
        own.insert(pubkey, id);
        drop(own);

        let initial = match self.backend.state.wallets.lock().get(&pubkey) {
            None => ServerWallet {
                status_text: Some(STATUS_NO_CONTENT.into()),
                ..ServerWallet::default()
            },
            Some(wallet) if local_hash.as_ref() == Some(&wallet.hash) => ServerWallet {
                status_text: Some(STATUS_NOT_MODIFIED.into()),
                local_hash: Some(wallet.hash.to_base64()),
                encrypted_data: None,
                created: Some(wallet.created.clone()),
                updated: Some(wallet.updated.clone()),
            },
            Some(wallet) => ServerWallet {
                status_text: Some(STATUS_OK.into()),
                local_hash: Some(wallet.hash.to_base64()),
                encrypted_data: Some(encode_base64(&wallet.ciphertext)),
                created: Some(wallet.created.clone()),
                updated: Some(wallet.updated.clone()),
            },
        };
        debug!(key = %pubkey, id, status = ?initial.status_text, "subscription opened");
        Ok((initial, receiver))
    }

    async fn fetch_wallet_unsubscribe(&self, pubkey: PublicKey) -> Result<()> {
        self.ensure_open()?;
        let Some(id) = self.subscriptions.lock().remove(&pubkey) else {
            return Err(Error::NotSubscribed(pubkey.to_string()));
        };
        let mut subs = self.backend.state.subscriptions.lock();
        if let Some(list) = subs.get_mut(&pubkey) {
            list.retain(|sub| sub.id != id);
            if list.is_empty() {
                subs.remove(&pubkey);
            }
        }
        debug!(key = %pubkey, id, "subscription dropped");
        Ok(())
    }

    async fn create_wallet(
        &self,
        token: &str,
        ciphertext: &[u8],
        signature: &Signature,
    ) -> Result<CreatedWallet> {
        self.ensure_open()?;

        let hash = Sha256Digest::compute(ciphertext);
        let pubkey = signature.recover_digest(&hash)?;

        if self.backend.state.wallets.lock().contains_key(&pubkey) {
            return Err(Error::WalletExists);
        }
        if !self.backend.state.tokens.lock().remove(token) {
            warn!(key = %pubkey, "create rejected: unknown or spent token");
            return Err(Error::InvalidToken);
        }

        let now = Self::now();
        self.backend.state.wallets.lock().insert(
            pubkey,
            StoredWallet {
                ciphertext: ciphertext.to_vec(),
                hash,
                created: now.clone(),
                updated: now.clone(),
            },
        );
        self.backend.push_to_others(
            &pubkey,
            self.conn,
            ServerWallet {
                status_text: None,
                local_hash: Some(hash.to_base64()),
                encrypted_data: Some(encode_base64(ciphertext)),
                created: Some(now.clone()),
                updated: Some(now.clone()),
            },
        );
        debug!(key = %pubkey, hash = %hash, "wallet created");
        Ok(CreatedWallet {
            local_hash: hash.to_base64(),
            created: now,
        })
    }

    async fn save_wallet(
        &self,
        prev_hash: &Sha256Digest,
        ciphertext: &[u8],
        signature: &Signature,
    ) -> Result<SaveResponse> {
        self.ensure_open()?;

        let hash = Sha256Digest::compute(ciphertext);
        let pubkey = signature.recover_digest(&hash)?;

        let mut wallets = self.backend.state.wallets.lock();
        let Some(wallet) = wallets.get_mut(&pubkey) else {
            return Err(Error::UnknownWallet);
        };

        if wallet.hash != *prev_hash {
            debug!(key = %pubkey, expected = %wallet.hash, got = %prev_hash, "save conflict");
            return Ok(SaveResponse {
                status_text: STATUS_CONFLICT.into(),
                local_hash: Some(wallet.hash.to_base64()),
                updated: Some(wallet.updated.clone()),
            });
        }

        let now = Self::now();
        wallet.ciphertext = ciphertext.to_vec();
        wallet.hash = hash;
        wallet.updated = now.clone();
        let created = wallet.created.clone();
        drop(wallets);

        self.backend.push_to_others(
            &pubkey,
            self.conn,
            ServerWallet {
                status_text: None,
                local_hash: Some(hash.to_base64()),
                encrypted_data: Some(encode_base64(ciphertext)),
                created: Some(created),
                updated: Some(now.clone()),
            },
        );
        debug!(key = %pubkey, hash = %hash, "wallet saved");
        Ok(SaveResponse {
            status_text: STATUS_OK.into(),
            local_hash: Some(hash.to_base64()),
            updated: Some(now),
        })
    }

    async fn delete_wallet(&self, hash: &Sha256Digest, signature: &Signature) -> Result<()> {
        self.ensure_open()?;

        let pubkey = signature.recover_digest(hash)?;
        let mut wallets = self.backend.state.wallets.lock();
        let Some(wallet) = wallets.get(&pubkey) else {
            return Err(Error::UnknownWallet);
        };
        if wallet.hash != *hash {
            return Err(Error::HashMismatch);
        }
        wallets.remove(&pubkey);
        drop(wallets);

        self.backend
            .push_to_others(&pubkey, self.conn, ServerWallet::default());
        debug!(key = %pubkey, "wallet deleted");
        Ok(())
    }

    async fn change_password(
        &self,
        old_hash: &Sha256Digest,
        old_signature: &Signature,
        new_ciphertext: &[u8],
        new_signature: &Signature,
    ) -> Result<SaveResponse> {
        self.ensure_open()?;

        let old_pubkey = old_signature.recover_digest(old_hash)?;
        let new_hash = Sha256Digest::compute(new_ciphertext);
        let new_pubkey = new_signature.recover_digest(&new_hash)?;

        let mut wallets = self.backend.state.wallets.lock();
        let Some(wallet) = wallets.get(&old_pubkey) else {
            return Err(Error::UnknownWallet);
        };
        if wallet.hash != *old_hash {
            debug!(key = %old_pubkey, "change-password conflict");
            return Ok(SaveResponse {
                status_text: STATUS_CONFLICT.into(),
                local_hash: Some(wallet.hash.to_base64()),
                updated: Some(wallet.updated.clone()),
            });
        }

        let old = wallets
            .remove(&old_pubkey)
            .ok_or(Error::UnknownWallet)?;
        let now = Self::now();
        wallets.insert(
            new_pubkey,
            StoredWallet {
                ciphertext: new_ciphertext.to_vec(),
                hash: new_hash,
                created: old.created,
                updated: now.clone(),
            },
        );
        drop(wallets);

        // Peers still subscribed under the old key see a deletion.
        self.backend
            .push_to_others(&old_pubkey, self.conn, ServerWallet::default());
        debug!(old = %old_pubkey, new = %new_pubkey, "wallet re-keyed");
        Ok(SaveResponse {
            status_text: STATUS_OK.into(),
            local_hash: Some(new_hash.to_base64()),
            updated: Some(now),
        })
    }

    fn subscription_id(&self, pubkey: &PublicKey) -> Option<u64> {
        self.subscriptions.lock().get(pubkey).copied()
    }

    fn socket_status(&self) -> SocketStatus {
        if self.open.load(Ordering::Acquire) {
            SocketStatus::Open
        } else {
            SocketStatus::Closed
        }
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let own: Vec<(PublicKey, u64)> = self.subscriptions.lock().drain().collect();
        let mut subs = self.backend.state.subscriptions.lock();
        for (pubkey, id) in own {
            if let Some(list) = subs.get_mut(&pubkey) {
                list.retain(|sub| sub.id != id);
                if list.is_empty() {
                    subs.remove(&pubkey);
                }
            }
        }
        debug!(conn = self.conn, "memory transport closed");
    }
}
