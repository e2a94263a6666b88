//! Remote wallet transport for Corsair
//!
//! Defines the contract the wallet engine speaks to a backup server:
//! subscriptions with push delivery, hash-guarded saves, invitation-token
//! creation, and the two-signature password rotation. Also ships an
//! in-process memory backend implementing the full protocol for tests and
//! local use.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod memory;
pub mod transport;

pub use error::{Error, Result};
pub use memory::{MemoryBackend, MemoryConnector, MemoryTransport};
pub use transport::{
    CreatedWallet, PushReceiver, SaveResponse, ServerWallet, SocketStatus, TransportConnector,
    WalletTransport, STATUS_CONFLICT, STATUS_NOT_MODIFIED, STATUS_NO_CONTENT, STATUS_OK,
};
