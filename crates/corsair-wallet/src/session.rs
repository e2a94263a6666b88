//! Session lifecycle: login, logout, password verification and rotation.
//!
//! The private key is derived from `lower(trim(email)) + "\t" +
//! lower(trim(username)) + "\t" + password`. Blank email or username are
//! legal; they mark the wallet `weak_password`, which forbids keeping a
//! server copy.

use crate::vault::{
    now_iso, LocalStatus, VaultState, WalletVault, FIELD_CHAIN_ID, FIELD_CREATED,
    FIELD_LAST_MODIFIED, FIELD_WEAK_PASSWORD,
};
use crate::{settings, Error, Result};
use corsair_core::{PrivateKey, Sha256Digest};
use corsair_net::{STATUS_CONFLICT, STATUS_OK};
use serde_json::Value;
use subtle::ConstantTimeEq as _;
use tracing::{debug, info, warn};

fn credential_seed(email: &str, username: &str, password: &str) -> String {
    format!(
        "{}\t{}\t{}",
        email.trim().to_lowercase(),
        username.trim().to_lowercase(),
        password
    )
}

fn same_key(a: &PrivateKey, b: &PrivateKey) -> bool {
    a.to_wif().as_bytes().ct_eq(b.to_wif().as_bytes()).into()
}

impl WalletVault {
    /// Unlock the wallet.
    ///
    /// Decrypts an existing local wallet, or initializes a fresh one and
    /// reconciles it with the backup server when one is configured.
    /// Exactly one notification fires when the login completes, on success
    /// and on failure alike.
    pub async fn login(
        &self,
        email: &str,
        username: &str,
        password: &str,
        chain_id: Option<&str>,
    ) -> Result<()> {
        let mut st = self.lock().await;
        let result = self
            .login_inner(&mut st, email, username, password, chain_id)
            .await;
        if result.is_err() && st.private_key.is_none() {
            // Failed before unlocking: tear down any half-open subscription
            // so a retry starts from a clean slate.
            self.drop_subscription(&mut st).await;
        }
        self.finish(st, result)
    }

    async fn login_inner(
        &self,
        st: &mut VaultState,
        email: &str,
        username: &str,
        password: &str,
        chain_id: Option<&str>,
    ) -> Result<()> {
        if password.trim().is_empty() {
            return Err(Error::MissingField("password".into()));
        }
        let weak = email.trim().is_empty() || username.trim().is_empty();
        let key = PrivateKey::from_seed(&credential_seed(email, username, password));

        if let Some(current) = &st.private_key {
            // Already unlocked: the same credentials are a no-op, anything
            // else is refused without touching state.
            return if same_key(current, &key) {
                Ok(())
            } else {
                Err(Error::InvalidPassword)
            };
        }

        match settings::encrypted_wallet(&st.store)? {
            Some(ciphertext) => {
                self.login_existing(st, key, &ciphertext, chain_id).await
            }
            None => self.login_fresh(st, key, chain_id, weak).await,
        }
    }

    /// A local ciphertext exists: prove the password by decrypting it.
    async fn login_existing(
        &self,
        st: &mut VaultState,
        key: PrivateKey,
        ciphertext: &[u8],
        chain_id: Option<&str>,
    ) -> Result<()> {
        let decrypted = corsair_core::decrypt(ciphertext, &key).map_err(|e| match e {
            corsair_core::Error::Decrypt => Error::InvalidPassword,
            other => Error::Crypto(other),
        })?;

        if let (Some(expected), Some(actual)) = (
            chain_id,
            decrypted.get(FIELD_CHAIN_ID).and_then(Value::as_str),
        ) {
            if expected != actual {
                return Err(Error::ChainMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        // Fold the decrypted tree over whatever was preloaded in memory.
        let mut merged = st.wallet.clone();
        corsair_core::deep_merge(&mut merged, &decrypted);
        st.tree_dirty = merged != decrypted;
        st.wallet = merged;
        st.private_key = Some(key.clone());
        st.notify = true;
        info!("wallet unlocked");

        self.sync(st, &key).await
    }

    /// No local ciphertext: initialize defaults, persist, and reconcile.
    async fn login_fresh(
        &self,
        st: &mut VaultState,
        key: PrivateKey,
        chain_id: Option<&str>,
        weak: bool,
    ) -> Result<()> {
        if weak && settings::remote_copy(&st.store) == Some(true) {
            return Err(Error::WeakPassword);
        }
        let prepopulated = !st.wallet.is_empty();

        let now = now_iso();
        if let Some(chain) = chain_id {
            st.wallet
                .entry(FIELD_CHAIN_ID)
                .or_insert(Value::String(chain.to_string()));
        }
        st.wallet
            .entry(FIELD_CREATED)
            .or_insert(Value::String(now.clone()));
        st.wallet
            .entry(FIELD_LAST_MODIFIED)
            .or_insert(Value::String(now));
        st.wallet
            .entry(FIELD_WEAK_PASSWORD)
            .or_insert(Value::Bool(weak));
        st.tree_dirty = true;
        st.notify = true;

        self.update_wallet(st, &key).await?;
        self.sync(st, &key).await?;

        // The sync may have pulled a server wallet over the defaults; the
        // chain id must now be settled and consistent.
        match st.wallet.get(FIELD_CHAIN_ID).and_then(Value::as_str) {
            Some(actual) => {
                if let Some(expected) = chain_id {
                    if actual != expected {
                        return Err(Error::ChainMismatch {
                            expected: expected.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                }
            }
            None if !prepopulated => {
                return Err(Error::MissingField("chain_id".into()));
            }
            None => {}
        }

        st.private_key = Some(key);
        st.notify = true;
        info!("wallet initialized and unlocked");
        Ok(())
    }

    /// Lock the wallet: clear the in-memory tree and key, drop the
    /// subscription, and close the transport. The persisted state survives,
    /// ciphertext and `remote_url` included.
    pub async fn logout(&self) -> Result<()> {
        let mut st = self.lock().await;
        self.drop_subscription(&mut st).await;
        if let Some(transport) = st.transport.take() {
            transport.close().await;
        }
        st.wallet = serde_json::Map::new();
        st.private_key = None;
        st.remote_status = None;
        st.local_status = LocalStatus::Clean;
        st.tree_dirty = false;
        st.notify = true;
        debug!("wallet locked");
        self.finish(st, Ok(()))
    }

    /// Whether these credentials derive the currently loaded key.
    ///
    /// The comparison runs over the WIF encodings in constant time.
    pub async fn verify_password(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<bool> {
        let st = self.lock().await;
        let current = st.private_key.as_ref().ok_or(Error::Locked)?;
        let candidate = PrivateKey::from_seed(&credential_seed(email, username, password));
        Ok(same_key(current, &candidate))
    }

    /// Rotate the wallet password.
    ///
    /// Re-encrypts under the new key locally, and, when a server copy is
    /// kept, proves ownership of both keys to the server in one call: the
    /// old key signs the pre-rotation hash, the new key signs the new
    /// ciphertext. The container stays unlocked under the new key even if
    /// the server leg fails; a later reconciliation retries.
    pub async fn change_password(
        &self,
        password: &str,
        email: &str,
        username: &str,
    ) -> Result<()> {
        let mut st = self.lock().await;
        let result = self
            .change_password_inner(&mut st, password, email, username)
            .await;
        self.finish(st, result)
    }

    async fn change_password_inner(
        &self,
        st: &mut VaultState,
        password: &str,
        email: &str,
        username: &str,
    ) -> Result<()> {
        let old_key = st.private_key.clone().ok_or(Error::Locked)?;
        let ciphertext = settings::encrypted_wallet(&st.store)?.ok_or(Error::WalletEmpty)?;
        if password.trim().is_empty() {
            return Err(Error::MissingField("password".into()));
        }
        let weak = email.trim().is_empty() || username.trim().is_empty();
        let remote_copy = settings::remote_copy(&st.store) == Some(true);
        if weak && remote_copy {
            return Err(Error::WeakPassword);
        }
        let new_key = PrivateKey::from_seed(&credential_seed(email, username, password));
        let original_hash = Sha256Digest::compute(&ciphertext);

        // A rotation may only start from a state the server has acknowledged.
        if remote_copy && settings::remote_hash(&st.store)? != Some(original_hash) {
            return Err(Error::WalletModified);
        }

        st.touch_last_modified();
        st.wallet
            .insert(FIELD_WEAK_PASSWORD.to_string(), Value::Bool(weak));
        let new_ciphertext = corsair_core::encrypt(&st.wallet, &new_key.public_key())?;
        settings::set_encrypted_wallet(&mut st.store, &new_ciphertext)?;
        st.tree_dirty = false;
        st.set_local_status(LocalStatus::Clean);
        st.notify = true;

        let transport = match st.transport.clone() {
            Some(transport) if remote_copy => transport,
            _ => {
                st.private_key = Some(new_key);
                info!("password rotated locally");
                return Ok(());
            }
        };

        self.drop_subscription(st).await;

        let original_signature = old_key.sign_digest(&original_hash);
        let new_hash = Sha256Digest::compute(&new_ciphertext);
        let new_signature = new_key.sign_digest(&new_hash);

        // Unlock under the new key before the server round-trip: the local
        // ciphertext is already rotated, and a failed call must not lock
        // the user out.
        st.private_key = Some(new_key);

        let response = transport
            .change_password(&original_hash, &original_signature, &new_ciphertext, &new_signature)
            .await?;
        if response.status_text == STATUS_OK {
            settings::set_remote_hash(&mut st.store, Some(&new_hash))?;
            settings::set_remote_dates(&mut st.store, None, response.updated.as_deref())?;
            info!("password rotated on server");
            Ok(())
        } else {
            warn!(status = %response.status_text, "server rejected password rotation");
            Err(if response.status_text == STATUS_CONFLICT {
                Error::Conflict
            } else {
                Error::Server {
                    status: response.status_text,
                    payload: response.local_hash,
                }
            })
        }
    }
}
