//! secp256k1 key material derived from credential seeds.
//!
//! Keys are deterministic: the same seed string always derives the same
//! private key, which is how a password proves ownership of a wallet both
//! locally (decryption) and to the backup server (signatures).

use crate::hash::Sha256Digest;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Shared verification/signing context.
pub(crate) fn secp() -> &'static Secp256k1<All> {
    &SECP
}

/// Version byte for WIF private key encoding.
const WIF_VERSION: u8 = 0x80;

/// A secp256k1 private key.
#[derive(Clone)]
pub struct PrivateKey {
    secret: SecretKey,
}

impl PrivateKey {
    /// Derive a key from an arbitrary seed string.
    ///
    /// The seed is hashed with SHA-256 and interpreted as a scalar; on the
    /// (negligible) chance the digest falls outside the curve order, the
    /// digest is hashed again until a valid scalar is found.
    pub fn from_seed(seed: &str) -> Self {
        let mut digest = Zeroizing::new(<[u8; 32]>::from(Sha256::digest(seed.as_bytes())));
        loop {
            if let Ok(secret) = SecretKey::from_slice(digest.as_ref()) {
                return Self { secret };
            }
            *digest = Sha256::digest(digest.as_ref()).into();
        }
    }

    /// Generate a random key.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::new(&mut rand::thread_rng()),
        }
    }

    /// Parse a WIF-encoded key.
    pub fn from_wif(wif: &str) -> Result<Self> {
        let payload = bs58::decode(wif)
            .into_vec()
            .map_err(|e| Error::InvalidWif(format!("base58: {e}")))?;
        if payload.len() != 37 {
            return Err(Error::InvalidWif(format!(
                "expected 37 bytes, got {}",
                payload.len()
            )));
        }
        if payload[0] != WIF_VERSION {
            return Err(Error::InvalidWif(format!(
                "unexpected version byte {:#04x}",
                payload[0]
            )));
        }
        let (body, checksum) = payload.split_at(33);
        if double_sha256(body)[..4] != *checksum {
            return Err(Error::InvalidWif("checksum mismatch".into()));
        }
        let secret = SecretKey::from_slice(&body[1..])
            .map_err(|e| Error::InvalidKey(format!("secret key: {e}")))?;
        Ok(Self { secret })
    }

    /// WIF encoding: base58check of `0x80 || secret`.
    pub fn to_wif(&self) -> String {
        let mut payload = Zeroizing::new(Vec::with_capacity(37));
        payload.push(WIF_VERSION);
        payload.extend_from_slice(&self.secret.secret_bytes());
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        bs58::encode(payload.as_slice()).into_string()
    }

    /// The corresponding compressed public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(secp256k1::PublicKey::from_secret_key(&SECP, &self.secret))
    }

    /// Sign SHA-256 of `data` with a recoverable signature.
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.sign_digest(&Sha256Digest::compute(data))
    }

    /// Sign an existing digest.
    pub fn sign_digest(&self, digest: &Sha256Digest) -> Signature {
        let msg = Message::from_digest(*digest.as_bytes());
        Signature(SECP.sign_ecdsa_recoverable(&msg, &self.secret))
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "PrivateKey({})", self.public_key())
    }
}

/// A compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// 33-byte compressed serialization.
    pub fn serialize(&self) -> [u8; 33] {
        self.0.serialize()
    }

    /// Parse a compressed or uncompressed point.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        secp256k1::PublicKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| Error::InvalidKey(format!("public key: {e}")))
    }

    pub(crate) fn inner(&self) -> &secp256k1::PublicKey {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.serialize()).into_string())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

/// A recoverable ECDSA signature over SHA-256 of a message.
#[derive(Clone, Copy, Debug)]
pub struct Signature(RecoverableSignature);

impl Signature {
    /// 65-byte compact form: recovery id followed by r||s.
    pub fn serialize_compact(&self) -> [u8; 65] {
        let (recid, data) = self.0.serialize_compact();
        let mut out = [0u8; 65];
        out[0] = recid.to_i32() as u8;
        out[1..].copy_from_slice(&data);
        out
    }

    /// Parse the 65-byte compact form.
    pub fn from_compact(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(Error::InvalidSignature(format!(
                "expected 65 bytes, got {}",
                bytes.len()
            )));
        }
        let recid = RecoveryId::from_i32(i32::from(bytes[0]))
            .map_err(|e| Error::InvalidSignature(format!("recovery id: {e}")))?;
        RecoverableSignature::from_compact(&bytes[1..], recid)
            .map(Self)
            .map_err(|e| Error::InvalidSignature(format!("compact: {e}")))
    }

    /// Recover the signing key from SHA-256 of `data`.
    pub fn recover(&self, data: &[u8]) -> Result<PublicKey> {
        self.recover_digest(&Sha256Digest::compute(data))
    }

    /// Recover the signing key from an existing digest.
    pub fn recover_digest(&self, digest: &Sha256Digest) -> Result<PublicKey> {
        let msg = Message::from_digest(*digest.as_bytes());
        SECP.recover_ecdsa(&msg, &self.0)
            .map(PublicKey)
            .map_err(|e| Error::InvalidSignature(format!("recover: {e}")))
    }

    /// Check the signature against an expected key.
    pub fn verify_digest(&self, digest: &Sha256Digest, key: &PublicKey) -> bool {
        matches!(self.recover_digest(digest), Ok(recovered) if recovered == *key)
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = PrivateKey::from_seed("a@x\talice\tpw");
        let b = PrivateKey::from_seed("a@x\talice\tpw");
        assert_eq!(a.to_wif(), b.to_wif());
        assert_eq!(a.public_key(), b.public_key());

        let c = PrivateKey::from_seed("a@x\talice\tpw2");
        assert_ne!(a.to_wif(), c.to_wif());
    }

    #[test]
    fn wif_roundtrip() {
        let key = PrivateKey::from_seed("seed");
        let parsed = PrivateKey::from_wif(&key.to_wif()).unwrap();
        assert_eq!(key.to_wif(), parsed.to_wif());
    }

    #[test]
    fn wif_rejects_corruption() {
        let key = PrivateKey::from_seed("seed");
        let mut wif = key.to_wif();
        // Flip the first character to damage the checksum.
        let replacement = if wif.starts_with('5') { "6" } else { "5" };
        wif.replace_range(0..1, replacement);
        assert!(PrivateKey::from_wif(&wif).is_err());
        assert!(PrivateKey::from_wif("not a wif").is_err());
    }

    #[test]
    fn sign_and_recover() {
        let key = PrivateKey::from_seed("seed");
        let sig = key.sign(b"message");
        let recovered = sig.recover(b"message").unwrap();
        assert_eq!(recovered, key.public_key());
        assert!(sig.verify_digest(&Sha256Digest::compute(b"message"), &key.public_key()));
        assert!(!sig.verify_digest(&Sha256Digest::compute(b"other"), &key.public_key()));
    }

    #[test]
    fn signature_compact_roundtrip() {
        let key = PrivateKey::from_seed("seed");
        let sig = key.sign(b"message");
        let parsed = Signature::from_compact(&sig.serialize_compact()).unwrap();
        assert_eq!(parsed.recover(b"message").unwrap(), key.public_key());
    }
}
