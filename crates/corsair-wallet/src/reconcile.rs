//! The reconciliation engine.
//!
//! Three hashes drive every decision: the hash of the local ciphertext, the
//! last hash the server acknowledged (`remote_hash`), and the hash the
//! server reports now. Comparing them classifies each side as modified or
//! not, and the engine picks one of push / pull / create / delete /
//! conflict / no-op.
//!
//! Unsolicited pushes arrive on a per-subscription pump task and run
//! through the same handler as the initial fetch response, so a server-side
//! change observed live and one observed at the next login behave
//! identically.

use crate::vault::{LocalStatus, RemoteStatus, RemoteSubscription, VaultState, WalletVault};
use crate::{settings, Error, Result};
use corsair_core::{decode_base64, tree, PrivateKey, PublicKey, Sha256Digest};
use corsair_net::{PushReceiver, ServerWallet, STATUS_CONFLICT, STATUS_OK};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

impl WalletVault {
    /// Reconcile with the backup server.
    ///
    /// Without a transport this is a no-op. The first call per key opens
    /// the subscription and folds the initial response; later calls either
    /// push pending local state or, when the remote copy was disabled,
    /// delete the server copy.
    pub(crate) async fn sync(&self, st: &mut VaultState, key: &PrivateKey) -> Result<()> {
        if st.transport.is_none() {
            return Ok(());
        }
        let pubkey = key.public_key();
        match &st.subscription {
            Some(subscription) if subscription.pubkey == pubkey => {
                if !matches!(
                    st.remote_status,
                    Some(RemoteStatus::NoContent | RemoteStatus::NotModified)
                ) {
                    // A conflict (or an in-flight fetch) is not resolved here.
                    warn!(status = ?st.remote_status, "sync skipped: remote status unsettled");
                    return Ok(());
                }
                if st.remote_status == Some(RemoteStatus::NotModified)
                    && settings::remote_copy(&st.store) == Some(false)
                {
                    self.delete_remote_wallet(st, key, None).await
                } else {
                    self.update_wallet(st, key).await
                }
            }
            Some(_) => {
                // Subscription for a different key (password rotated).
                self.drop_subscription(st).await;
                self.open_subscription(st, key).await
            }
            None => self.open_subscription(st, key).await,
        }
    }

    async fn open_subscription(&self, st: &mut VaultState, key: &PrivateKey) -> Result<()> {
        let Some(transport) = st.transport.clone() else {
            return Ok(());
        };
        let pubkey = key.public_key();
        let local_hash = settings::local_hash(&st.store)?;
        let (initial, receiver) = transport.fetch_wallet(pubkey, local_hash).await?;
        let pump = self.spawn_pump(pubkey, receiver);
        st.subscription = Some(RemoteSubscription { pubkey, pump });
        debug!(key = %pubkey, "subscribed to server wallet");
        self.apply_server_wallet(st, initial, key).await
    }

    /// Fold one server-reported wallet state into the container.
    ///
    /// Runs for the initial fetch response (which carries a status) and for
    /// every push event (which does not; the status is synthesized from the
    /// hashes). The server's current hash is persisted before any decision.
    pub(crate) async fn apply_server_wallet(
        &self,
        st: &mut VaultState,
        server: ServerWallet,
        key: &PrivateKey,
    ) -> Result<()> {
        let local_hash = settings::local_hash(&st.store)?;
        let old_hash = settings::remote_hash(&st.store)?;
        let new_hash = match &server.local_hash {
            Some(b64) => Some(Sha256Digest::from_base64(b64)?),
            None => None,
        };
        let has_remote = new_hash.is_some();
        let has_local = local_hash.is_some();

        settings::set_remote_hash(&mut st.store, new_hash.as_ref())?;
        settings::set_remote_dates(&mut st.store, server.created.as_deref(), server.updated.as_deref())?;

        let status = match &server.status_text {
            Some(text) => RemoteStatus::parse(text).ok_or_else(|| Error::Server {
                status: text.clone(),
                payload: None,
            })?,
            None => {
                if !has_remote {
                    RemoteStatus::NoContent
                } else if local_hash == new_hash {
                    RemoteStatus::NotModified
                } else {
                    RemoteStatus::Ok
                }
            }
        };
        if status == RemoteStatus::Conflict {
            return Err(Error::Server {
                status: status.as_str().into(),
                payload: None,
            });
        }
        st.set_remote_status(Some(status));

        if has_remote && settings::remote_copy(&st.store) == Some(false) {
            debug!("server copy disabled locally; deleting remote wallet");
            return self.delete_remote_wallet(st, key, new_hash).await;
        }
        if !has_remote {
            if !has_local {
                return Ok(());
            }
            debug!("server has no copy; pushing local wallet");
            return self.update_wallet(st, key).await;
        }
        if local_hash == new_hash {
            st.set_remote_status(Some(RemoteStatus::NotModified));
            return Ok(());
        }
        if !has_local {
            return self.pull_server_copy(st, &server, key).await;
        }

        // Both sides hold different content. With no recorded common
        // ancestor the server copy wins; otherwise each side is classified
        // against the ancestor hash.
        let (local_mod, server_mod) = match old_hash {
            Some(old) => (local_hash != Some(old), Some(old) != new_hash),
            None => (false, true),
        };
        match (local_mod, server_mod) {
            (true, true) => {
                warn!(
                    local = ?local_hash,
                    server = ?new_hash,
                    "local and server wallets diverged"
                );
                st.set_remote_status(Some(RemoteStatus::Conflict));
                Err(Error::Conflict)
            }
            (true, false) => self.update_wallet(st, key).await,
            (false, true) => self.pull_server_copy(st, &server, key).await,
            (false, false) => Ok(()),
        }
    }

    /// Adopt the server copy: decrypt, fold into the in-memory tree, and
    /// persist the server's exact ciphertext so the hashes line up.
    async fn pull_server_copy(
        &self,
        st: &mut VaultState,
        server: &ServerWallet,
        key: &PrivateKey,
    ) -> Result<()> {
        let data = server.encrypted_data.as_deref().ok_or_else(|| Error::Server {
            status: server.status_text.clone().unwrap_or_else(|| "OK".into()),
            payload: Some("response carries no encrypted_data".into()),
        })?;
        let ciphertext = decode_base64(data)?;
        let decrypted = corsair_core::decrypt(&ciphertext, key).map_err(|e| match e {
            corsair_core::Error::Decrypt => Error::InvalidPassword,
            other => Error::Crypto(other),
        })?;

        tree::deep_merge(&mut st.wallet, &decrypted);
        st.tree_dirty = st.wallet != decrypted;
        settings::set_encrypted_wallet(&mut st.store, &ciphertext)?;
        st.set_local_status(LocalStatus::Clean);
        st.set_remote_status(Some(RemoteStatus::NotModified));
        st.notify = true;
        info!(hash = %Sha256Digest::compute(&ciphertext), "pulled server wallet");
        Ok(())
    }

    /// Persist the in-memory tree and propagate it to the server.
    ///
    /// The local write always happens (re-encrypting only when the tree
    /// actually changed, since encryption is randomized); the remote leg
    /// runs only with a transport and an explicit remote-copy intent, and
    /// picks the create path (invitation token, no acknowledged hash) or
    /// the save path (hash-guarded replace).
    pub(crate) async fn update_wallet(&self, st: &mut VaultState, key: &PrivateKey) -> Result<()> {
        let existing = settings::encrypted_wallet(&st.store)?;
        let ciphertext = match existing {
            Some(ciphertext) if !st.tree_dirty => {
                st.set_local_status(LocalStatus::Clean);
                ciphertext
            }
            _ => {
                let ciphertext = corsair_core::encrypt(&st.wallet, &key.public_key())?;
                settings::set_encrypted_wallet(&mut st.store, &ciphertext)?;
                st.tree_dirty = false;
                st.set_local_status(LocalStatus::Clean);
                st.notify = true;
                ciphertext
            }
        };

        let Some(transport) = st.transport.clone() else {
            return Ok(());
        };
        if settings::remote_copy(&st.store) != Some(true) {
            return Ok(());
        }
        let token = settings::remote_token(&st.store);
        let remote_hash = settings::remote_hash(&st.store)?;
        if token.is_none() && st.remote_status == Some(RemoteStatus::NoContent) {
            // The server is known empty and there is no invitation token:
            // the local write is all we can do.
            return Ok(());
        }

        let hash = Sha256Digest::compute(&ciphertext);
        let signature = key.sign_digest(&hash);

        if let (Some(token_value), None) = (&token, &remote_hash) {
            if st.remote_status == Some(RemoteStatus::NoContent) {
                let created = transport
                    .create_wallet(token_value, &ciphertext, &signature)
                    .await?;
                settings::set_remote_hash(&mut st.store, Some(&hash))?;
                settings::set_remote_dates(
                    &mut st.store,
                    Some(&created.created),
                    Some(&created.created),
                )?;
                settings::set_remote_token(&mut st.store, None)?;
                st.set_remote_status(Some(RemoteStatus::NotModified));
                info!(hash = %hash, "created server wallet");
                return Ok(());
            }
        }

        if let Some(prev) = remote_hash {
            if matches!(
                st.remote_status,
                Some(RemoteStatus::Ok | RemoteStatus::NotModified)
            ) {
                if hash == prev && st.remote_status == Some(RemoteStatus::NotModified) {
                    return Ok(());
                }
                let response = transport.save_wallet(&prev, &ciphertext, &signature).await?;
                if response.status_text == STATUS_OK {
                    settings::set_remote_hash(&mut st.store, Some(&hash))?;
                    settings::set_remote_dates(&mut st.store, None, response.updated.as_deref())?;
                    st.set_remote_status(Some(RemoteStatus::NotModified));
                    debug!(hash = %hash, "saved wallet to server");
                } else {
                    if let Some(status) = RemoteStatus::parse(&response.status_text) {
                        st.set_remote_status(Some(status));
                    }
                    warn!(status = %response.status_text, "server rejected wallet save");
                    return Err(if response.status_text == STATUS_CONFLICT {
                        Error::Conflict
                    } else {
                        Error::Server {
                            status: response.status_text,
                            payload: response.local_hash,
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Remove the server copy and forget everything we knew about it.
    ///
    /// `hash` defaults to the current local ciphertext hash, which the
    /// server verifies against its own copy.
    pub(crate) async fn delete_remote_wallet(
        &self,
        st: &mut VaultState,
        key: &PrivateKey,
        hash: Option<Sha256Digest>,
    ) -> Result<()> {
        let Some(transport) = st.transport.clone() else {
            return Ok(());
        };
        let hash = match hash {
            Some(hash) => hash,
            None => settings::local_hash(&st.store)?.ok_or(Error::WalletEmpty)?,
        };
        let signature = key.sign_digest(&hash);
        transport.delete_wallet(&hash, &signature).await?;
        settings::clear_remote_wallet(&mut st.store)?;
        st.set_remote_status(Some(RemoteStatus::NoContent));
        st.notify = true;
        info!(hash = %hash, "deleted server wallet");
        Ok(())
    }

    /// Spawn the task folding pushed server events into the container.
    ///
    /// Holds only a weak reference; the pump dies with the container, with
    /// its receiver, or when it is aborted on unsubscribe.
    fn spawn_pump(&self, pubkey: PublicKey, mut receiver: PushReceiver) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let vault = WalletVault { inner };
                let mut st = vault.inner.state.lock().await;
                let current = st
                    .subscription
                    .as_ref()
                    .is_some_and(|sub| sub.pubkey == pubkey);
                let Some(key) = st.private_key.clone() else {
                    debug!("push event while locked; dropped");
                    continue;
                };
                if !current || key.public_key() != pubkey {
                    debug!("push event for a stale subscription; dropped");
                    continue;
                }
                if let Err(e) = vault.apply_server_wallet(&mut st, event, &key).await {
                    warn!("failed to fold pushed wallet event: {e}");
                }
                let update = st.take_update();
                drop(st);
                if let Some(update) = update {
                    vault.inner.subscribers.dispatch(&update);
                }
            }
            debug!(key = %pubkey, "push pump finished");
        })
    }
}
