//! Error types for the wallet transport.

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation on a closed transport
    #[error("Transport is closed")]
    Closed,

    /// Endpoint could not be reached
    #[error("Connection failed: {0}")]
    Connect(String),

    /// A subscription already exists for this key on this connection
    #[error("Already subscribed for {0}")]
    AlreadySubscribed(String),

    /// No subscription exists for this key on this connection
    #[error("Not subscribed for {0}")]
    NotSubscribed(String),

    /// The server holds no wallet for the signing key
    #[error("Unknown wallet")]
    UnknownWallet,

    /// Invitation token is unknown or already consumed
    #[error("Invalid token")]
    InvalidToken,

    /// A wallet already exists for the signing key
    #[error("Wallet already exists")]
    WalletExists,

    /// The signed hash does not match the server's copy
    #[error("Hash mismatch")]
    HashMismatch,

    /// Signature or key material failed validation
    #[error("Crypto error: {0}")]
    Crypto(#[from] corsair_core::Error),
}
