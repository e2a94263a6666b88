//! Corsair wallet core primitives
//!
//! This crate implements the cryptographic and data-model building blocks
//! shared by the wallet engine: credential-seeded secp256k1 keys, envelope
//! encryption for JSON wallet payloads, SHA-256 digests with their base64
//! boundary encoding, and deep-merge operations on the wallet tree.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod error;
pub mod hash;
pub mod keys;
pub mod tree;

pub use cipher::{decrypt, encrypt};
pub use error::{Error, Result};
pub use hash::{decode_base64, encode_base64, Sha256Digest};
pub use keys::{PrivateKey, PublicKey, Signature};
pub use tree::{deep_merge, delete_field, merged};
