//! Envelope encryption for wallet payloads.
//!
//! ECIES construction: an ephemeral secp256k1 key agrees a shared secret
//! with the recipient public key, HKDF-SHA256 stretches it into an
//! AES-256-GCM key, and the frame carries everything needed to decrypt:
//!
//! `[version(1)][ephemeral_pub(33)][nonce(12)][ciphertext]`
//!
//! Two encryptions of the same tree never produce the same bytes; the
//! ciphertext hash therefore identifies a *write*, not a plaintext.

use crate::keys::{secp, PrivateKey, PublicKey};
use crate::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::RngCore as _;
use secp256k1::ecdh::SharedSecret;
use secp256k1::SecretKey;
use serde_json::{Map, Value};
use sha2::Sha256;
use zeroize::Zeroizing;

const FRAME_VERSION: u8 = 1;
const EPHEMERAL_LEN: usize = 33;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + EPHEMERAL_LEN + NONCE_LEN;
const HKDF_INFO: &[u8] = b"corsair/envelope/v1";

/// Encrypt a wallet tree for `recipient`.
pub fn encrypt(tree: &Map<String, Value>, recipient: &PublicKey) -> Result<Vec<u8>> {
    let plaintext = Zeroizing::new(serde_json::to_vec(tree)?);

    let ephemeral = SecretKey::new(&mut rand::thread_rng());
    let ephemeral_pub = secp256k1::PublicKey::from_secret_key(secp(), &ephemeral);
    let key = derive_key(&SharedSecret::new(recipient.inner(), &ephemeral))?;

    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| Error::Ciphertext(format!("cipher init: {e}")))?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|e| Error::Ciphertext(format!("encrypt: {e}")))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&ephemeral_pub.serialize());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Decrypt a wallet tree with the recipient's private key.
///
/// A wrong key surfaces as [`Error::Decrypt`]; a malformed frame as
/// [`Error::Ciphertext`].
pub fn decrypt(frame: &[u8], key: &PrivateKey) -> Result<Map<String, Value>> {
    if frame.len() < HEADER_LEN {
        return Err(Error::Ciphertext(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[0] != FRAME_VERSION {
        return Err(Error::Ciphertext(format!(
            "unsupported frame version {}",
            frame[0]
        )));
    }

    let ephemeral_pub = secp256k1::PublicKey::from_slice(&frame[1..1 + EPHEMERAL_LEN])
        .map_err(|e| Error::Ciphertext(format!("ephemeral key: {e}")))?;
    let nonce = &frame[1 + EPHEMERAL_LEN..HEADER_LEN];
    let ciphertext = &frame[HEADER_LEN..];

    let aes_key = derive_key(&SharedSecret::new(&ephemeral_pub, key.secret()))?;
    let cipher = Aes256Gcm::new_from_slice(aes_key.as_ref())
        .map_err(|e| Error::Ciphertext(format!("cipher init: {e}")))?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decrypt)?,
    );

    match serde_json::from_slice::<Value>(&plaintext)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Ciphertext(format!(
            "payload is not an object: {other:?}"
        ))),
    }
}

fn derive_key(shared: &SharedSecret) -> Result<Zeroizing<[u8; 32]>> {
    let ikm = Zeroizing::new(shared.secret_bytes());
    let hk = Hkdf::<Sha256>::new(None, ikm.as_ref());
    let mut out = Zeroizing::new([0u8; 32]);
    hk.expand(HKDF_INFO, out.as_mut())
        .map_err(|e| Error::Ciphertext(format!("hkdf: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tree() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "chain_id": "chainA",
            "keys": { "owner": "WIF..." },
            "labels": ["primary", "cold"],
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn roundtrip() {
        let key = PrivateKey::from_seed("seed");
        let tree = sample_tree();
        let frame = encrypt(&tree, &key.public_key()).unwrap();
        let decrypted = decrypt(&frame, &key).unwrap();
        assert_eq!(Value::Object(tree), Value::Object(decrypted));
    }

    #[test]
    fn wrong_key_fails_as_decrypt() {
        let key = PrivateKey::from_seed("seed");
        let other = PrivateKey::from_seed("other");
        let frame = encrypt(&sample_tree(), &key.public_key()).unwrap();
        assert!(matches!(decrypt(&frame, &other), Err(Error::Decrypt)));
    }

    #[test]
    fn ciphertext_is_randomized() {
        let key = PrivateKey::from_seed("seed");
        let tree = sample_tree();
        let a = encrypt(&tree, &key.public_key()).unwrap();
        let b = encrypt(&tree, &key.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let key = PrivateKey::from_seed("seed");
        assert!(matches!(
            decrypt(&[], &key),
            Err(Error::Ciphertext(_))
        ));
        assert!(matches!(
            decrypt(&[9u8; 64], &key),
            Err(Error::Ciphertext(_))
        ));

        let mut frame = encrypt(&sample_tree(), &key.public_key()).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(matches!(decrypt(&frame, &key), Err(Error::Decrypt)));
    }
}
