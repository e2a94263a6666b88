//! Corsair wallet engine
//!
//! Holds a JSON wallet object in memory, encrypts it under a
//! password-derived key for at-rest storage, and keeps it reconciled with a
//! single authoritative server copy (when one is configured) using
//! content-hash optimistic concurrency.
//!
//! The public surface is [`WalletVault`]: session management (`login`,
//! `logout`, `verify_password`, `change_password`), state access
//! (`get_state`, `set_state`, `delete_field`), backup configuration
//! (`use_backup_server`, `keep_remote_copy`, `keep_local_copy`), and a
//! subscriber registry notified once per completed operation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod notify;
mod reconcile;
mod session;
mod settings;
pub mod vault;

pub use error::{Error, Result};
pub use notify::{SubscriberId, WalletUpdate};
pub use vault::{LocalStatus, RemoteStatus, WalletVault};
