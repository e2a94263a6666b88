//! Subscriber registry and notification dispatch.
//!
//! Operations raise a single dirty flag while they run; when a public entry
//! point finishes (successfully or not) the flag is cleared and every
//! subscriber receives one status snapshot. Dispatch works on a copy of the
//! registry, so subscribers added from inside a callback only see the next
//! cycle.

use crate::vault::{LocalStatus, RemoteStatus};
use crate::Result;
use corsair_net::SocketStatus;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Handle identifying a registered subscriber.
pub type SubscriberId = u64;

/// Status snapshot delivered to subscribers after each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletUpdate {
    /// No private key is loaded
    pub locked: bool,
    /// No wallet ciphertext is persisted
    pub empty: bool,
    /// Local mutation status
    pub local_status: LocalStatus,
    /// Last known server relationship
    pub remote_status: Option<RemoteStatus>,
    /// Connection-level socket state
    pub socket_status: SocketStatus,
}

type Callback = Arc<dyn Fn(&WalletUpdate) -> Result<()> + Send + Sync>;

struct Entry {
    id: SubscriberId,
    callback: Callback,
    ack: Option<mpsc::UnboundedSender<Result<()>>>,
}

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub(crate) fn subscribe(
        &self,
        callback: Callback,
        ack: Option<mpsc::UnboundedSender<Result<()>>>,
    ) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry { id, callback, ack });
        debug!(id, "subscriber registered");
        id
    }

    /// Remove a subscriber. Unknown ids are an observable mistake but not
    /// fatal: they log and return `false`.
    pub(crate) fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            warn!(id, "unsubscribe for unknown subscriber");
            false
        } else {
            debug!(id, "subscriber removed");
            true
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Fan one update out to every subscriber registered before this call.
    pub(crate) fn dispatch(&self, update: &WalletUpdate) {
        let snapshot: Vec<(SubscriberId, Callback, Option<mpsc::UnboundedSender<Result<()>>>)> =
            self.entries
                .lock()
                .iter()
                .map(|entry| (entry.id, Arc::clone(&entry.callback), entry.ack.clone()))
                .collect();

        for (id, callback, ack) in snapshot {
            let result = callback(update);
            match ack {
                Some(ack) => {
                    // The receiver may be gone; that is the subscriber's business.
                    let _ = ack.send(result);
                }
                None => {
                    if let Err(e) = result {
                        warn!(id, "subscriber callback failed: {e}");
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Helper building the boxed callback type from a closure.
pub(crate) fn callback<F>(f: F) -> Callback
where
    F: Fn(&WalletUpdate) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::AtomicUsize;

    fn update() -> WalletUpdate {
        WalletUpdate {
            locked: false,
            empty: false,
            local_status: LocalStatus::Clean,
            remote_status: None,
            socket_status: SocketStatus::Closed,
        }
    }

    #[test]
    fn dispatch_reaches_every_subscriber() {
        let registry = SubscriberRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            registry.subscribe(
                callback(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
                None,
            );
        }
        registry.dispatch(&update());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn ack_channel_receives_callback_results() {
        let registry = SubscriberRegistry::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe(
            callback(|_| Err(Error::Locked)),
            Some(tx),
        );

        registry.dispatch(&update());
        assert!(matches!(rx.try_recv(), Ok(Err(Error::Locked))));
    }

    #[test]
    fn unsubscribe_unknown_id_is_nonfatal() {
        let registry = SubscriberRegistry::default();
        let id = registry.subscribe(callback(|_| Ok(())), None);
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn subscribers_added_during_dispatch_are_deferred() {
        let registry = Arc::new(SubscriberRegistry::default());
        let hits = Arc::new(AtomicUsize::new(0));

        let registry_inner = Arc::clone(&registry);
        let hits_inner = Arc::clone(&hits);
        registry.subscribe(
            callback(move |_| {
                let hits = Arc::clone(&hits_inner);
                registry_inner.subscribe(
                    callback(move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                    None,
                );
                Ok(())
            }),
            None,
        );

        registry.dispatch(&update());
        assert_eq!(hits.load(Ordering::SeqCst), 0, "new subscriber must wait a cycle");

        registry.dispatch(&update());
        assert!(hits.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn failing_callback_does_not_stop_dispatch() {
        let registry = SubscriberRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.subscribe(callback(|_| Err(Error::Locked)), None);
        let hits_clone = Arc::clone(&hits);
        registry.subscribe(
            callback(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            None,
        );

        registry.dispatch(&update());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
