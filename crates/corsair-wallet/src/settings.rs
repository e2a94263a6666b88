//! Typed accessors over the persisted storage state.
//!
//! The storage layer is an untyped string-to-JSON map; this module is the
//! only place that knows the key names and boundary encodings (base64 for
//! hashes and ciphertext). Writing `Value::Null` through `set_state`
//! deletes a key, which is how fields are cleared.

use crate::Result;
use corsair_core::{decode_base64, encode_base64, Sha256Digest};
use corsair_storage::StateStore;
use serde_json::{Map, Value};

/// Base64 ciphertext of the wallet object.
pub const ENCRYPTED_WALLET: &str = "encrypted_wallet";
/// Backup server endpoint.
pub const REMOTE_URL: &str = "remote_url";
/// Intent to keep a server copy.
pub const REMOTE_COPY: &str = "remote_copy";
/// Single-use invitation token for the first upload.
pub const REMOTE_TOKEN: &str = "remote_token";
/// Base64 SHA-256 of the last ciphertext known to be on the server.
pub const REMOTE_HASH: &str = "remote_hash";
/// Server-side creation timestamp.
pub const REMOTE_CREATED_DATE: &str = "remote_created_date";
/// Server-side update timestamp.
pub const REMOTE_UPDATED_DATE: &str = "remote_updated_date";

fn set_one(store: &mut StateStore, key: &str, value: Value) -> Result<()> {
    let mut partial = Map::new();
    partial.insert(key.to_string(), value);
    store.set_state(partial)?;
    Ok(())
}

fn get_str(store: &StateStore, key: &str) -> Option<String> {
    store.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Decoded wallet ciphertext, if persisted.
pub fn encrypted_wallet(store: &StateStore) -> Result<Option<Vec<u8>>> {
    match get_str(store, ENCRYPTED_WALLET) {
        Some(b64) => Ok(Some(decode_base64(&b64)?)),
        None => Ok(None),
    }
}

/// Persist wallet ciphertext.
pub fn set_encrypted_wallet(store: &mut StateStore, ciphertext: &[u8]) -> Result<()> {
    set_one(store, ENCRYPTED_WALLET, Value::String(encode_base64(ciphertext)))
}

/// SHA-256 of the persisted ciphertext, the canonical local version id.
pub fn local_hash(store: &StateStore) -> Result<Option<Sha256Digest>> {
    Ok(encrypted_wallet(store)?
        .as_deref()
        .map(Sha256Digest::compute))
}

/// Configured backup endpoint.
pub fn remote_url(store: &StateStore) -> Option<String> {
    get_str(store, REMOTE_URL)
}

/// Persist (or clear) the backup endpoint.
pub fn set_remote_url(store: &mut StateStore, url: Option<&str>) -> Result<()> {
    set_one(
        store,
        REMOTE_URL,
        url.map_or(Value::Null, |u| Value::String(u.to_string())),
    )
}

/// Remote-copy intent. Absent means "no decision yet", which several
/// reconciliation rules treat differently from an explicit `false`.
pub fn remote_copy(store: &StateStore) -> Option<bool> {
    store.get(REMOTE_COPY).and_then(Value::as_bool)
}

/// Persist the remote-copy intent.
pub fn set_remote_copy(store: &mut StateStore, save: bool) -> Result<()> {
    set_one(store, REMOTE_COPY, Value::Bool(save))
}

/// Pending invitation token.
pub fn remote_token(store: &StateStore) -> Option<String> {
    get_str(store, REMOTE_TOKEN)
}

/// Persist (or clear) the invitation token.
pub fn set_remote_token(store: &mut StateStore, token: Option<&str>) -> Result<()> {
    set_one(
        store,
        REMOTE_TOKEN,
        token.map_or(Value::Null, |t| Value::String(t.to_string())),
    )
}

/// Last ciphertext hash acknowledged by the server.
pub fn remote_hash(store: &StateStore) -> Result<Option<Sha256Digest>> {
    match get_str(store, REMOTE_HASH) {
        Some(b64) => Ok(Some(Sha256Digest::from_base64(&b64)?)),
        None => Ok(None),
    }
}

/// Persist (or clear) the acknowledged server hash.
pub fn set_remote_hash(store: &mut StateStore, hash: Option<&Sha256Digest>) -> Result<()> {
    set_one(
        store,
        REMOTE_HASH,
        hash.map_or(Value::Null, |h| Value::String(h.to_base64())),
    )
}

/// Persist server-side timestamps; `None` leaves a field untouched.
pub fn set_remote_dates(
    store: &mut StateStore,
    created: Option<&str>,
    updated: Option<&str>,
) -> Result<()> {
    let mut partial = Map::new();
    if let Some(created) = created {
        partial.insert(
            REMOTE_CREATED_DATE.to_string(),
            Value::String(created.to_string()),
        );
    }
    if let Some(updated) = updated {
        partial.insert(
            REMOTE_UPDATED_DATE.to_string(),
            Value::String(updated.to_string()),
        );
    }
    if !partial.is_empty() {
        store.set_state(partial)?;
    }
    Ok(())
}

/// Clear every trace of the server copy: hash and both timestamps.
pub fn clear_remote_wallet(store: &mut StateStore) -> Result<()> {
    let mut partial = Map::new();
    partial.insert(REMOTE_HASH.to_string(), Value::Null);
    partial.insert(REMOTE_CREATED_DATE.to_string(), Value::Null);
    partial.insert(REMOTE_UPDATED_DATE.to_string(), Value::Null);
    store.set_state(partial)?;
    Ok(())
}
