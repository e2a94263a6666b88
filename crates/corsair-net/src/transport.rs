//! The remote wallet transport contract.
//!
//! The server holds at most one wallet per public key, identified purely by
//! the key recovered from request signatures. Reads are subscriptions: the
//! initial response carries a `status_text`, every later server-side change
//! arrives as a push without one, and the engine synthesizes the status.

use crate::Result;
use corsair_core::{PublicKey, Sha256Digest, Signature};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Initial fetch status: server copy differs from the reported local hash.
pub const STATUS_OK: &str = "OK";
/// Initial fetch status: the server holds no wallet for this key.
pub const STATUS_NO_CONTENT: &str = "No Content";
/// Initial fetch status: the server copy matches the reported local hash.
pub const STATUS_NOT_MODIFIED: &str = "Not Modified";
/// Save/change response status: the guard hash no longer matches.
pub const STATUS_CONFLICT: &str = "Conflict";

/// A wallet record as the server reports it.
///
/// `status_text` is present only on the initial subscription response;
/// hashes and ciphertext are base64 at this boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerWallet {
    /// Fetch status, absent on push events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    /// Base64 SHA-256 of the server's ciphertext, absent when deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    /// Base64 ciphertext, omitted on "Not Modified"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<String>,
    /// Server-side creation timestamp (ISO-8601)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Server-side update timestamp (ISO-8601)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

/// Response to a successful `create_wallet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedWallet {
    /// Base64 SHA-256 of the stored ciphertext
    pub local_hash: String,
    /// Server-side creation timestamp (ISO-8601)
    pub created: String,
}

/// Response to `save_wallet` and `change_password`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    /// `"OK"`, `"Conflict"`, or another server status
    pub status_text: String,
    /// Base64 SHA-256 of the server's current ciphertext
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    /// Server-side update timestamp (ISO-8601)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

/// Stream of unsolicited server-side changes for a subscription.
pub type PushReceiver = mpsc::UnboundedReceiver<ServerWallet>;

/// Connection-level socket state; surfaced to the container but never part
/// of reconciliation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketStatus {
    /// Connection is live
    Open,
    /// Connection closed (or never opened)
    #[default]
    Closed,
}

/// A live connection to a wallet backup server.
#[async_trait::async_trait]
pub trait WalletTransport: Send + Sync {
    /// Open a subscription for `pubkey`.
    ///
    /// Returns the initial response (always carrying a `status_text`
    /// computed against `local_hash`) and the push stream for subsequent
    /// server-side changes.
    async fn fetch_wallet(
        &self,
        pubkey: PublicKey,
        local_hash: Option<Sha256Digest>,
    ) -> Result<(ServerWallet, PushReceiver)>;

    /// Drop the subscription for `pubkey`.
    async fn fetch_wallet_unsubscribe(&self, pubkey: PublicKey) -> Result<()>;

    /// First upload of a wallet, authorized by a single-use invitation
    /// token. The signature covers SHA-256 of the ciphertext.
    async fn create_wallet(
        &self,
        token: &str,
        ciphertext: &[u8],
        signature: &Signature,
    ) -> Result<CreatedWallet>;

    /// Replace the server copy, guarded by the previous hash. A stale guard
    /// is not an error: it returns a `"Conflict"` response.
    async fn save_wallet(
        &self,
        prev_hash: &Sha256Digest,
        ciphertext: &[u8],
        signature: &Signature,
    ) -> Result<SaveResponse>;

    /// Remove the server copy; the signature covers the current hash.
    async fn delete_wallet(&self, hash: &Sha256Digest, signature: &Signature) -> Result<()>;

    /// Atomically re-key the wallet: the old signature proves ownership of
    /// the current copy, the new signature binds the new ciphertext.
    async fn change_password(
        &self,
        old_hash: &Sha256Digest,
        old_signature: &Signature,
        new_ciphertext: &[u8],
        new_signature: &Signature,
    ) -> Result<SaveResponse>;

    /// Identifier of the live subscription for `pubkey`, if any.
    fn subscription_id(&self, pubkey: &PublicKey) -> Option<u64>;

    /// Current socket state.
    fn socket_status(&self) -> SocketStatus;

    /// Close the connection and drop its subscriptions.
    async fn close(&self);
}

/// Opens transports from configured endpoint URLs.
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect to `url`.
    async fn connect(&self, url: &str) -> Result<Arc<dyn WalletTransport>>;
}
