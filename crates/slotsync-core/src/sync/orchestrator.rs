//! Synchronization Orchestrator
//!
//! Binds live queries against the document store to the event bus, one
//! background task per watched key.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncOrchestrator                                               │
//! │  ├── watches: HashMap<SubscriptionKey, WatchState>              │
//! │  │   └── refcounted background task per key                     │
//! │  │       ├── subscribe (retried with BackoffPolicy)             │
//! │  │       ├── snapshot ──► Cache::update ──► EventBus::publish   │
//! │  │       └── change batches, applied in stream order            │
//! │  ├── cache: Cache<SubscriptionKey, Dataset>                     │
//! │  └── sweeper task: flags entries stale while offline            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys whose setup gave up wait for the connection to come back online
//! (or an explicit `refresh`) and then start a fresh retry window. A refresh
//! of a watched key is carried out by that key's task, which resubscribes, so
//! snapshots and pushes for one key are always applied in order.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::{Cache, CacheEntry};
use super::clock::Clock;
use super::dataset::{Dataset, SubscriptionKey};
use super::store::{DocumentChange, DocumentStore, RawDocument};
use crate::bus::{BusEvent, ChangeAction, EventBus};
use crate::config::SyncConfig;
use crate::connection::{BackoffPolicy, ConnectionManager, ConnectionState};
use crate::error::{EngineError, EngineResult};
use crate::listeners::Subscription;

/// Lifecycle of one watched key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyStatus {
    /// Establishing the live query
    Connecting,
    /// Receiving pushes
    Live,
    /// Waiting before setup attempt `attempt`
    Retrying { attempt: u32 },
    /// Gave up; waiting for the connection to return or a refresh
    Failed { error: String },
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStatus::Connecting => write!(f, "connecting"),
            KeyStatus::Live => write!(f, "live"),
            KeyStatus::Retrying { attempt } => write!(f, "retrying (attempt {attempt})"),
            KeyStatus::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Per-key view in [`SyncDiagnostics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyDiagnostics {
    pub key: SubscriptionKey,
    pub watchers: usize,
    pub status: KeyStatus,
    pub version: Option<u64>,
    pub is_stale: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Snapshot of every watched key
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncDiagnostics {
    pub keys: Vec<KeyDiagnostics>,
}

impl SyncDiagnostics {
    pub fn watched(&self) -> usize {
        self.keys.len()
    }

    pub fn stale(&self) -> Vec<&SubscriptionKey> {
        self.keys.iter().filter(|k| k.is_stale).map(|k| &k.key).collect()
    }

    pub fn failed(&self) -> Vec<&SubscriptionKey> {
        self.keys
            .iter()
            .filter(|k| matches!(k.status, KeyStatus::Failed { .. }))
            .map(|k| &k.key)
            .collect()
    }
}

/// Where a key task reports the version a requested refresh produced
type RefreshReply = oneshot::Sender<EngineResult<u64>>;

struct WatchState {
    refs: usize,
    status: KeyStatus,
    last_error: Option<String>,
    cancel: CancellationToken,
    refresh_tx: mpsc::UnboundedSender<RefreshReply>,
    task: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    bus: Arc<EventBus>,
    connection: Arc<ConnectionManager>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    backoff: BackoffPolicy,
    cache: Cache<SubscriptionKey, Dataset>,
    watches: Mutex<HashMap<SubscriptionKey, WatchState>>,
}

enum StreamEnd {
    Cancelled,
    Broken(String),
    Refresh(RefreshReply),
}

/// Why a key task stopped waiting
enum Wake {
    Cancelled,
    Ready,
    Refresh(RefreshReply),
}

/// Copy of a failure for every refresh waiting on the same attempt
fn refresh_failure(e: &EngineError) -> EngineError {
    match e {
        EngineError::Connection(m) => EngineError::Connection(m.clone()),
        EngineError::Subscription(m) => EngineError::Subscription(m.clone()),
        EngineError::ShutDown => EngineError::ShutDown,
        other => EngineError::Data(other.to_string()),
    }
}

fn answer_refreshes(waiting: &mut Vec<RefreshReply>, result: Result<u64, &EngineError>) {
    for reply in waiting.drain(..) {
        let _ = reply.send(result.map_err(refresh_failure));
    }
}

impl Inner {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn set_status(&self, key: &SubscriptionKey, status: KeyStatus) {
        if let Some(watch) = self.watches.lock().get_mut(key) {
            watch.status = status;
        }
    }

    fn record_error(&self, key: &SubscriptionKey, error: &EngineError) {
        if let Some(watch) = self.watches.lock().get_mut(key) {
            watch.last_error = Some(error.to_string());
        }
    }

    fn publish(&self, key: &SubscriptionKey, action: ChangeAction, entry: CacheEntry<Dataset>) {
        self.bus.publish(BusEvent {
            key: key.clone(),
            action,
            version: entry.version,
            timestamp: entry.last_updated,
            data: entry.data,
        });
    }

    /// Write the key's cache entry. With `owner` set, the write is dropped
    /// once that watch is released so a late batch cannot bring back an
    /// entry `release` removed. Returns whether an entry existed before.
    fn write_cache<F>(
        &self,
        key: &SubscriptionKey,
        owner: Option<&CancellationToken>,
        f: F,
    ) -> EngineResult<Option<(bool, CacheEntry<Dataset>)>>
    where
        F: FnOnce(Option<&Dataset>) -> EngineResult<Dataset>,
    {
        let _watches = self.watches.lock();
        if owner.is_some_and(CancellationToken::is_cancelled) {
            debug!(%key, "Dropping write for released key");
            return Ok(None);
        }
        let existed = self.cache.contains(key);
        let entry = self.cache.update(key, self.now(), f)?;
        Ok(Some((existed, entry)))
    }

    /// Replace the key's data with a full snapshot.
    fn ingest_snapshot(
        &self,
        key: &SubscriptionKey,
        docs: &[RawDocument],
        owner: Option<&CancellationToken>,
    ) -> EngineResult<Option<u64>> {
        let data = Dataset::from_snapshot(key, docs)?;
        let Some((existed, entry)) = self.write_cache(key, owner, |_| Ok(data))? else {
            return Ok(None);
        };
        let action = if existed {
            ChangeAction::Updated
        } else {
            ChangeAction::Created
        };
        let version = entry.version;
        debug!(%key, version, records = entry.data.len(), "Applied snapshot");
        self.publish(key, action, entry);
        Ok(Some(version))
    }

    /// Apply one pushed batch all-or-nothing.
    fn ingest(
        &self,
        key: &SubscriptionKey,
        changes: &[DocumentChange],
        owner: Option<&CancellationToken>,
    ) -> EngineResult<Option<u64>> {
        if changes.is_empty() {
            return Ok(None);
        }
        let mut actions = Vec::with_capacity(changes.len());
        let written = self.write_cache(key, owner, |current| {
            let mut next = match current {
                Some(data) => data.clone(),
                None => Dataset::from_snapshot(key, &[])?,
            };
            for change in changes {
                actions.push(next.apply(change)?);
            }
            Ok(next)
        })?;
        let Some((_, entry)) = written else {
            return Ok(None);
        };
        let version = entry.version;
        let action = ChangeAction::summarize(actions);
        debug!(%key, version, %action, changes = changes.len(), "Applied push");
        self.publish(key, action, entry);
        Ok(Some(version))
    }

    /// Consume a live query until it breaks, a refresh is requested, or the
    /// key is released.
    async fn consume(
        &self,
        key: &SubscriptionKey,
        mut changes: super::store::ChangeStream,
        cancel: &CancellationToken,
        refresh_rx: &mut mpsc::UnboundedReceiver<RefreshReply>,
    ) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                Some(reply) = refresh_rx.recv() => return StreamEnd::Refresh(reply),
                next = changes.next() => next,
            };
            match next {
                Some(Ok(batch)) => {
                    if let Err(e) = self.ingest(key, &batch, Some(cancel)) {
                        warn!(%key, error = %e, "Rejected pushed batch");
                        self.record_error(key, &e);
                    }
                }
                Some(Err(e)) => {
                    self.record_error(key, &e);
                    return StreamEnd::Broken(e.to_string());
                }
                None => return StreamEnd::Broken("change stream ended".to_string()),
            }
        }
    }

    /// Block until the connection transitions back to online, a refresh is
    /// requested, or the key is released.
    async fn wait_for_recovery(
        &self,
        cancel: &CancellationToken,
        refresh_rx: &mut mpsc::UnboundedReceiver<RefreshReply>,
    ) -> Wake {
        let mut state_rx = self.connection.watch_state();
        state_rx.borrow_and_update();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Wake::Cancelled,
                Some(reply) = refresh_rx.recv() => return Wake::Refresh(reply),
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        // Manager dropped; only a refresh can revive the key
                        return tokio::select! {
                            _ = cancel.cancelled() => Wake::Cancelled,
                            Some(reply) = refresh_rx.recv() => Wake::Refresh(reply),
                            else => Wake::Cancelled,
                        };
                    }
                    if *state_rx.borrow_and_update() == ConnectionState::Online {
                        return Wake::Ready;
                    }
                }
            }
        }
    }

    /// Sleep out a retry delay. A refresh cuts the delay short.
    async fn backoff_sleep(
        &self,
        delay: std::time::Duration,
        cancel: &CancellationToken,
        refresh_rx: &mut mpsc::UnboundedReceiver<RefreshReply>,
    ) -> Wake {
        tokio::select! {
            _ = cancel.cancelled() => Wake::Cancelled,
            Some(reply) = refresh_rx.recv() => Wake::Refresh(reply),
            _ = tokio::time::sleep(delay) => Wake::Ready,
        }
    }

    async fn run_key(
        self: Arc<Self>,
        key: SubscriptionKey,
        cancel: CancellationToken,
        mut refresh_rx: mpsc::UnboundedReceiver<RefreshReply>,
    ) {
        debug!(%key, "Key sync task started");
        let query = key.query();
        let mut retries: u32 = 0;
        // Refreshes answered by the next setup attempt
        let mut waiting: Vec<RefreshReply> = Vec::new();

        loop {
            self.set_status(&key, KeyStatus::Connecting);
            let setup = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.store.subscribe(&query) => r,
            };

            let failure = match setup {
                Ok(live) => {
                    retries = 0;
                    let snapshot = match self.ingest_snapshot(&key, &live.snapshot, Some(&cancel)) {
                        Ok(Some(version)) => Ok(version),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(%key, error = %e, "Rejected snapshot");
                            self.record_error(&key, &e);
                            Err(e)
                        }
                    };
                    answer_refreshes(&mut waiting, snapshot.as_ref().copied());
                    self.set_status(&key, KeyStatus::Live);
                    match self.consume(&key, live.changes, &cancel, &mut refresh_rx).await {
                        StreamEnd::Cancelled => break,
                        StreamEnd::Refresh(reply) => {
                            debug!(%key, "Refresh requested, resubscribing");
                            waiting.push(reply);
                            continue;
                        }
                        StreamEnd::Broken(reason) => {
                            warn!(%key, %reason, "Live query interrupted, resubscribing");
                            EngineError::Connection(reason)
                        }
                    }
                }
                Err(e) => {
                    self.record_error(&key, &e);
                    answer_refreshes(&mut waiting, Err(&e));
                    e
                }
            };

            if failure.is_retryable() && retries < self.config.max_retries {
                let delay = self.backoff.delay(retries);
                retries += 1;
                warn!(%key, attempt = retries, ?delay, error = %failure, "Subscription setup failed, retrying");
                self.set_status(&key, KeyStatus::Retrying { attempt: retries });
                match self.backoff_sleep(delay, &cancel, &mut refresh_rx).await {
                    Wake::Cancelled => break,
                    Wake::Ready => {}
                    Wake::Refresh(reply) => waiting.push(reply),
                }
                continue;
            }

            error!(%key, retries, error = %failure, "Giving up on subscription");
            self.cache.mark_stale(&key);
            self.set_status(
                &key,
                KeyStatus::Failed {
                    error: failure.to_string(),
                },
            );
            match self.wait_for_recovery(&cancel, &mut refresh_rx).await {
                Wake::Cancelled => break,
                Wake::Ready => {}
                Wake::Refresh(reply) => waiting.push(reply),
            }
            info!(%key, "Retrying subscription after recovery");
            retries = 0;
        }
        answer_refreshes(&mut waiting, Err(&EngineError::ShutDown));
        debug!(%key, "Key sync task ended");
    }

    fn sweep(&self) -> Vec<SubscriptionKey> {
        if self.connection.is_online() {
            return Vec::new();
        }
        let threshold = ChronoDuration::milliseconds(
            i64::try_from(self.config.stale_data_threshold_ms).unwrap_or(i64::MAX),
        );
        let flagged = self.cache.sweep_stale(self.now(), threshold);
        for key in &flagged {
            info!(%key, "Marked cache entry stale");
        }
        flagged
    }

    fn release(&self, key: &SubscriptionKey) {
        let removed = {
            let mut watches = self.watches.lock();
            let removed = match watches.get_mut(key) {
                Some(watch) if watch.refs > 1 => {
                    watch.refs -= 1;
                    None
                }
                Some(_) => watches.remove(key),
                None => None,
            };
            // Cancelled before the lock drops, so `write_cache` sees it
            if let Some(watch) = &removed {
                watch.cancel.cancel();
            }
            removed
        };
        if removed.is_some() {
            debug!(%key, "Last watcher released key");
            self.cache.remove(key);
        }
    }
}

/// Per-key live-query manager and versioned cache owner
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        let connection = Arc::clone(bus.connection());
        let backoff = BackoffPolicy::for_subscriptions(&config);
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                connection,
                clock,
                config,
                backoff,
                cache: Cache::new(),
                watches: Mutex::new(HashMap::new()),
            }),
            cancel: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Start the staleness sweep. A second call is a no-op.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let period = self.inner.config.stale_sweep_interval();
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.sweep();
                    }
                }
            }
        }));
    }

    /// Keep a live query open for `key` until the returned handle is
    /// dropped. Watchers of the same key share one query.
    pub fn watch(&self, key: SubscriptionKey) -> EngineResult<Subscription> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        {
            let mut watches = self.inner.watches.lock();
            if let Some(watch) = watches.get_mut(&key) {
                watch.refs += 1;
            } else {
                info!(%key, "Watching key");
                let cancel = self.cancel.child_token();
                let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(Arc::clone(&self.inner).run_key(
                    key.clone(),
                    cancel.clone(),
                    refresh_rx,
                ));
                watches.insert(
                    key.clone(),
                    WatchState {
                        refs: 1,
                        status: KeyStatus::Connecting,
                        last_error: None,
                        cancel,
                        refresh_tx,
                        task,
                    },
                );
            }
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Subscription::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                inner.release(&key);
            }
        }))
    }

    pub fn is_watching(&self, key: &SubscriptionKey) -> bool {
        self.inner.watches.lock().contains_key(key)
    }

    pub fn status(&self, key: &SubscriptionKey) -> Option<KeyStatus> {
        self.inner.watches.lock().get(key).map(|w| w.status.clone())
    }

    /// Cached data for a key
    pub fn entry(&self, key: &SubscriptionKey) -> Option<CacheEntry<Dataset>> {
        self.inner.cache.get(key)
    }

    /// Apply a batch for `key` as if the store had pushed it.
    ///
    /// Data errors leave the cache unchanged and are returned.
    pub fn ingest(&self, key: &SubscriptionKey, changes: &[DocumentChange]) -> EngineResult<Option<u64>> {
        self.inner.ingest(key, changes, None)
    }

    /// Re-read `key` from the store and replace its cache entry. Returns the
    /// version the fresh snapshot was stored as.
    ///
    /// A watched key resubscribes from its own task, which also starts a
    /// fresh retry window for a key that gave up. Other keys are fetched
    /// directly.
    pub async fn refresh(&self, key: &SubscriptionKey) -> EngineResult<u64> {
        let refresh_tx = self
            .inner
            .watches
            .lock()
            .get(key)
            .map(|w| w.refresh_tx.clone());
        if let Some(refresh_tx) = refresh_tx {
            let (reply, answer) = oneshot::channel();
            if refresh_tx.send(reply).is_ok() {
                return answer.await.unwrap_or(Err(EngineError::ShutDown));
            }
        }
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        let docs = self.inner.store.fetch(&key.query()).await?;
        self.inner
            .ingest_snapshot(key, &docs, None)?
            .ok_or(EngineError::ShutDown)
    }

    /// Run one staleness sweep now. Returns the keys flagged.
    pub fn sweep_now(&self) -> Vec<SubscriptionKey> {
        self.inner.sweep()
    }

    pub fn diagnostics(&self) -> SyncDiagnostics {
        let watches = self.inner.watches.lock();
        let mut keys: Vec<KeyDiagnostics> = watches
            .iter()
            .map(|(key, watch)| {
                let entry = self.inner.cache.get(key);
                KeyDiagnostics {
                    key: key.clone(),
                    watchers: watch.refs,
                    status: watch.status.clone(),
                    version: entry.as_ref().map(|e| e.version),
                    is_stale: entry.as_ref().is_some_and(|e| e.is_stale),
                    last_updated: entry.as_ref().map(|e| e.last_updated),
                    last_error: watch.last_error.clone(),
                }
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        SyncDiagnostics { keys }
    }

    /// Cancel every key task and the sweeper, then wait for the sweeper.
    pub async fn shutdown(&self) {
        info!("Shutting down sync orchestrator");
        self.cancel.cancel();
        let watches: Vec<WatchState> = self.inner.watches.lock().drain().map(|(_, w)| w).collect();
        for watch in watches {
            watch.cancel.cancel();
            let _ = watch.task.await;
        }
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        self.inner.cache.clear();
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
