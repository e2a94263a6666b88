//! Storage state for Corsair wallets
//!
//! A flat string-to-JSON map held in memory, with optional durability to a
//! single snapshot file. The wallet engine owns one store per container and
//! persists only plaintext bookkeeping here; wallet secrets always arrive
//! already encrypted.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod state_store;

pub use error::{Error, Result};
pub use state_store::StateStore;
