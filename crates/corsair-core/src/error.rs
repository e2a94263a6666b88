//! Error types for the core primitives.

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Core primitive errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key material could not be parsed or derived
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// WIF string failed version or checksum validation
    #[error("Invalid WIF: {0}")]
    InvalidWif(String),

    /// Signature bytes could not be parsed or recovered
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// AEAD authentication failed (wrong key or tampered payload)
    #[error("Decryption failed")]
    Decrypt,

    /// Ciphertext frame is malformed
    #[error("Invalid ciphertext: {0}")]
    Ciphertext(String),

    /// Base64 or length validation failure at an encoding boundary
    #[error("Invalid encoding: {0}")]
    Encoding(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
