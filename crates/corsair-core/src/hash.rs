//! SHA-256 digests and the base64 boundary encoding.
//!
//! Digests identify wallet ciphertext versions; they travel base64-encoded
//! in storage and on the wire, and hex-encoded in logs.

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Digest([u8; 32]);

impl Sha256Digest {
    /// Hash raw bytes.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Wrap an existing 32-byte digest.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Encoding(format!("digest must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base64 rendering used in storage and on the wire.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse the base64 rendering.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = decode_base64(s)?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Digest({})", hex::encode(self.0))
    }
}

/// Encode bytes with the standard base64 alphabet.
pub fn encode_base64(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode standard-alphabet base64.
pub fn decode_base64(s: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(s)
        .map_err(|e| Error::Encoding(format!("base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = Sha256Digest::compute(b"corsair");
        let b = Sha256Digest::compute(b"corsair");
        assert_eq!(a, b);
        assert_ne!(a, Sha256Digest::compute(b"corsair!"));
    }

    #[test]
    fn base64_roundtrip() {
        let digest = Sha256Digest::compute(b"payload");
        let parsed = Sha256Digest::from_base64(&digest.to_base64()).unwrap();
        assert_eq!(digest, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Sha256Digest::from_bytes(&[0u8; 16]).is_err());
        assert!(Sha256Digest::from_base64("AAAA").is_err());
    }

    #[test]
    fn display_is_hex() {
        let digest = Sha256Digest::compute(b"");
        assert_eq!(
            digest.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
