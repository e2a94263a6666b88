//! Error taxonomy for the wallet engine.

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet engine errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required credential or wallet field is absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The operation requires an unlocked wallet
    #[error("Wallet is locked")]
    Locked,

    /// The derived key cannot decrypt the stored wallet
    #[error("Invalid password")]
    InvalidPassword,

    /// Blank email or username combined with remote backup intent
    #[error("Weak password: email and username are required for remote backup")]
    WeakPassword,

    /// The supplied chain id does not match the wallet's
    #[error("Chain mismatch: expected {expected}, wallet has {actual}")]
    ChainMismatch {
        /// Chain id supplied by the caller
        expected: String,
        /// Chain id recorded in the wallet
        actual: String,
    },

    /// Change-password requires a persisted wallet
    #[error("Wallet is empty")]
    WalletEmpty,

    /// Change-password refused: local ciphertext is not synced to the server
    #[error("Wallet was modified since the last backup")]
    WalletModified,

    /// Mutation before the wallet was initialized by a login
    #[error("Wallet is not initialized")]
    NotInitialized,

    /// Inconsistent remote configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local and server copies diverged; human action required
    #[error("Conflict: local and server copies diverged")]
    Conflict,

    /// The server rejected a save/create/change request
    #[error("Server returned {status}")]
    Server {
        /// Status text from the response
        status: String,
        /// Response payload, if any
        payload: Option<String>,
    },

    /// Cryptographic primitive failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] corsair_core::Error),

    /// Storage state failure
    #[error("Storage error: {0}")]
    Storage(#[from] corsair_storage::Error),

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] corsair_net::Error),
}
