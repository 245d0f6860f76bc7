//! In-memory document store
//!
//! Implements [`DocumentStore`] with ordered per-subscription delivery.
//! Writes are diffed against every open live query: a document entering a
//! query's result set is delivered as `Added`, one changing inside it as
//! `Modified`, and one leaving it (deleted or no longer matching) as
//! `Removed`.
//!
//! Fault injection hooks let tests and the CLI demo exercise retry and
//! data-error paths without a real backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::store::{Collection, DocumentChange, DocumentStore, LiveQuery, Query, RawDocument};
use crate::error::{EngineError, EngineResult};

type Batch = EngineResult<Vec<DocumentChange>>;

struct Watcher {
    query: Query,
    tx: mpsc::UnboundedSender<Batch>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<Collection, BTreeMap<String, RawDocument>>,
    watchers: Vec<Watcher>,
    offline: bool,
}

/// Process-local store used by tests and the CLI
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failing_subscribes: AtomicU32,
    subscribe_calls: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` subscription setups with a subscription error
    pub fn fail_next_subscribes(&self, count: u32) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// Make every operation fail with a connection error while set
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Push an error into every open live query on `collection`
    pub fn break_streams(&self, collection: Collection, message: &str) {
        let mut inner = self.inner.lock();
        inner.watchers.retain(|w| {
            if w.query.collection() != collection {
                return true;
            }
            w.tx
                .unbounded_send(Err(EngineError::Connection(message.to_string())))
                .is_ok()
        });
    }

    /// Number of subscription attempts seen so far
    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of live queries whose stream has not been dropped
    pub fn active_subscriptions(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.watchers.retain(|w| !w.tx.is_closed());
        inner.watchers.len()
    }

    /// Number of documents in `collection`
    pub fn document_count(&self, collection: Collection) -> usize {
        self.inner
            .lock()
            .collections
            .get(&collection)
            .map_or(0, BTreeMap::len)
    }

    fn ensure_online(inner: &Inner) -> EngineResult<()> {
        if inner.offline {
            return Err(EngineError::Connection("store unreachable".to_string()));
        }
        Ok(())
    }

    /// Deliver the diff between `before` and `after` to every watcher of
    /// `collection`, dropping watchers whose stream is gone.
    fn notify(
        inner: &mut Inner,
        collection: Collection,
        id: &str,
        before: Option<&RawDocument>,
        after: Option<&RawDocument>,
    ) {
        inner.watchers.retain(|w| {
            if w.query.collection() != collection {
                return !w.tx.is_closed();
            }
            let was = before.is_some_and(|doc| w.query.matches(doc));
            let now = after.filter(|doc| w.query.matches(doc));
            let change = match (was, now) {
                (false, Some(doc)) => DocumentChange::Added(doc.clone()),
                (true, Some(doc)) => DocumentChange::Modified(doc.clone()),
                (true, None) => DocumentChange::Removed { id: id.to_string() },
                (false, None) => return !w.tx.is_closed(),
            };
            trace!(%collection, id, "Delivering change");
            w.tx.unbounded_send(Ok(vec![change])).is_ok()
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(&self, query: &Query) -> EngineResult<LiveQuery> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_subscribes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_subscribes.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Subscription(format!(
                "injected failure for {query:?}"
            )));
        }

        let mut inner = self.inner.lock();
        Self::ensure_online(&inner)?;

        let snapshot: Vec<RawDocument> = inner
            .collections
            .get(&query.collection())
            .map(|docs| docs.values().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default();

        let (tx, rx) = mpsc::unbounded();
        inner.watchers.push(Watcher {
            query: query.clone(),
            tx,
        });
        debug!(?query, snapshot = snapshot.len(), "Live query opened");

        Ok(LiveQuery {
            snapshot,
            changes: rx.boxed(),
        })
    }

    async fn fetch(&self, query: &Query) -> EngineResult<Vec<RawDocument>> {
        let inner = self.inner.lock();
        Self::ensure_online(&inner)?;
        Ok(inner
            .collections
            .get(&query.collection())
            .map(|docs| docs.values().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn put(&self, collection: Collection, doc: RawDocument) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        Self::ensure_online(&inner)?;
        let id = doc.id.clone();
        let before = inner
            .collections
            .entry(collection)
            .or_default()
            .insert(id.clone(), doc.clone());
        Self::notify(&mut inner, collection, &id, before.as_ref(), Some(&doc));
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        Self::ensure_online(&inner)?;
        let before = inner
            .collections
            .get_mut(&collection)
            .and_then(|docs| docs.remove(id));
        if before.is_some() {
            Self::notify(&mut inner, collection, id, before.as_ref(), None);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{UserId, WeeklyAvailability};

    fn rule_doc(owner: &str, slot: &str) -> RawDocument {
        let rule = WeeklyAvailability::available(UserId::from(owner), 1, slot.into());
        RawDocument::encode(rule.document_id(), &rule).unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_then_ordered_changes() {
        let store = MemoryStore::new();
        store
            .put(Collection::WeeklyAvailability, rule_doc("t1", "09:00-10:00"))
            .await
            .unwrap();

        let query = Query::AvailabilityForOwner(UserId::from("t1"));
        let mut live = store.subscribe(&query).await.unwrap();
        assert_eq!(live.snapshot.len(), 1);

        store
            .put(Collection::WeeklyAvailability, rule_doc("t1", "10:00-11:00"))
            .await
            .unwrap();
        store
            .put(Collection::WeeklyAvailability, rule_doc("t2", "10:00-11:00"))
            .await
            .unwrap();
        store
            .delete(Collection::WeeklyAvailability, "t1:1:09:00-10:00")
            .await
            .unwrap();

        let first = live.changes.next().await.unwrap().unwrap();
        assert!(matches!(&first[0], DocumentChange::Added(doc) if doc.id == "t1:1:10:00-11:00"));
        let second = live.changes.next().await.unwrap().unwrap();
        assert!(matches!(&second[0], DocumentChange::Removed { id } if id == "t1:1:09:00-10:00"));
    }

    #[tokio::test]
    async fn test_injected_subscribe_failures() {
        let store = MemoryStore::new();
        store.fail_next_subscribes(2);
        let query = Query::Presence(UserId::from("u1"));

        assert!(matches!(store.subscribe(&query).await, Err(EngineError::Subscription(_))));
        assert!(store.subscribe(&query).await.is_err());
        assert!(store.subscribe(&query).await.is_ok());
        assert_eq!(store.subscribe_calls(), 3);
    }

    #[tokio::test]
    async fn test_dropped_stream_ends_subscription() {
        let store = MemoryStore::new();
        let live = store
            .subscribe(&Query::Presence(UserId::from("u1")))
            .await
            .unwrap();
        assert_eq!(store.active_subscriptions(), 1);
        drop(live);
        assert_eq!(store.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_offline_store_rejects_operations() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store
            .fetch(&Query::Presence(UserId::from("u1")))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
