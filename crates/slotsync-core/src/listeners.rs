//! Synchronous listener registries with drop-to-unsubscribe handles
//!
//! Every channel the engine exposes (bus categories, conflicts, connection
//! status) is a [`Listeners`] registry. `emit` calls each handler in
//! registration order on the caller's task; a panicking handler is caught
//! and logged so the remaining handlers still run.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::error;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Registry<T> = RwLock<BTreeMap<u64, Handler<T>>>;

/// A set of handlers for one event type
pub struct Listeners<T> {
    channel: &'static str,
    handlers: Arc<Registry<T>>,
    next_id: AtomicU64,
}

impl<T: 'static> Listeners<T> {
    /// `channel` names the registry in log output
    pub fn new(channel: &'static str) -> Self {
        Self {
            channel,
            handlers: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a handler. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().insert(id, Arc::new(handler));

        let weak: Weak<Registry<T>> = Arc::downgrade(&self.handlers);
        Subscription::from_fn(move || {
            if let Some(handlers) = weak.upgrade() {
                handlers.write().remove(&id);
            }
        })
    }

    /// Call every handler with `event`. Returns how many completed
    /// without panicking.
    pub fn emit(&self, event: &T) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly
        let handlers: Vec<(u64, Handler<T>)> = self
            .handlers
            .read()
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(channel = self.channel, handler = id, %message, "Listener panicked");
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Drop every registration. Outstanding [`Subscription`]s become no-ops.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

/// Handle returned by every `subscribe` call
///
/// Dropping it unsubscribes. `unsubscribe` may be called any number of
/// times; only the first call has an effect.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancels: Vec<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// A subscription that runs `cancel` once when ended
    pub fn from_fn<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancels: vec![Box::new(cancel)],
        }
    }

    /// A subscription that does nothing when ended
    pub fn empty() -> Self {
        Self {
            cancels: Vec::new(),
        }
    }

    /// Combine two subscriptions; ending the result ends both.
    pub fn join(mut self, mut other: Subscription) -> Self {
        self.cancels.append(&mut other.cancels);
        self
    }

    pub fn unsubscribe(&mut self) {
        for cancel in self.cancels.drain(..) {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancels.is_empty()
    }

    /// Keep the registration for the lifetime of the registry.
    pub fn detach(mut self) {
        self.cancels.clear();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_all_handlers() {
        let listeners: Listeners<u32> = Listeners::new("test");
        let sum = Arc::new(AtomicUsize::new(0));

        let s1 = {
            let sum = sum.clone();
            listeners.subscribe(move |v| {
                sum.fetch_add(*v as usize, Ordering::SeqCst);
            })
        };
        let s2 = {
            let sum = sum.clone();
            listeners.subscribe(move |v| {
                sum.fetch_add(*v as usize * 10, Ordering::SeqCst);
            })
        };

        assert_eq!(listeners.emit(&2), 2);
        assert_eq!(sum.load(Ordering::SeqCst), 22);
        drop((s1, s2));
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_panicking_handler_does_not_break_fanout() {
        let listeners: Listeners<u32> = Listeners::new("test");
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = listeners.subscribe(|_| panic!("handler failure"));
        let _good = {
            let hits = hits.clone();
            listeners.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert_eq!(listeners.emit(&1), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let listeners: Listeners<u32> = Listeners::new("test");
        let mut sub = listeners.subscribe(|_| {});
        let _other = listeners.subscribe(|_| {});
        assert_eq!(listeners.len(), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_subscription_outliving_registry() {
        let listeners: Listeners<u32> = Listeners::new("test");
        let sub = listeners.subscribe(|_| {});
        listeners.clear();
        drop(listeners);
        drop(sub);
    }

    #[test]
    fn test_joined_subscription_ends_both() {
        let a: Listeners<u32> = Listeners::new("a");
        let b: Listeners<u32> = Listeners::new("b");
        let joined = a.subscribe(|_| {}).join(b.subscribe(|_| {}));
        assert_eq!(a.len() + b.len(), 2);
        drop(joined);
        assert_eq!(a.len() + b.len(), 0);
    }

    #[test]
    fn test_detached_subscription_stays_registered() {
        let listeners: Listeners<u32> = Listeners::new("test");
        listeners.subscribe(|_| {}).detach();
        assert_eq!(listeners.len(), 1);
    }
}
