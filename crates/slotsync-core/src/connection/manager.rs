//! Connection state machine, heartbeat and reconnection driver
//!
//! ## State machine
//!
//! ```text
//!            heartbeat fails / sustained slow / network down
//!   ┌────────┐ ───────────────────────────────────► ┌─────────┐
//!   │ Online │                                      │ Offline │◄──┐
//!   └────────┘ ◄──────────┐                         └─────────┘   │
//!                probe ok │                  attempts < max │      │ attempts
//!                         │                                 ▼      │ exhausted
//!                       ┌──────────────┐ ◄──────────────────┘      │ (ConnectionLost)
//!                       │ Reconnecting │ ──────────────────────────┘
//!                       └──────────────┘
//! ```
//!
//! A network-down signal parks the manager in `Offline` until a network-up
//! signal arrives; probes cannot succeed in between. After the attempt
//! window is exhausted the manager also waits for a network-up signal.
//!
//! Every state, quality or attempt-count change is emitted synchronously to
//! the registered listeners from whichever task made the change.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::probe::ConnectionProbe;
use super::quality::ConnectionQuality;
use crate::config::ConnectionConfig;
use crate::listeners::{Listeners, Subscription};

/// Coarse connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Online,
    Reconnecting,
    Offline,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Online => write!(f, "online"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Offline => write!(f, "offline"),
        }
    }
}

/// Process-wide connection status, mutated only by the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub is_online: bool,
    pub state: ConnectionState,
    /// Last successful probe
    pub last_seen: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    /// Round-trip time of the last successful probe
    pub latency_ms: Option<u64>,
    pub quality: ConnectionQuality,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            state: ConnectionState::Online,
            last_seen: None,
            reconnect_attempts: 0,
            latency_ms: None,
            quality: ConnectionQuality::Good,
        }
    }
}

/// Probe and reconnection counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub probes_sent: u64,
    pub probe_failures: u64,
    pub probe_timeouts: u64,
    /// Successful transitions back to online
    pub reconnects: u64,
    /// Times the attempt window was exhausted
    pub connection_lost: u64,
    pub average_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    #[serde(skip)]
    latency_total_ms: u64,
    #[serde(skip)]
    latency_samples: u64,
}

impl ConnectionMetrics {
    fn record_latency(&mut self, ms: u64) {
        self.latency_total_ms = self.latency_total_ms.saturating_add(ms);
        self.latency_samples += 1;
        self.average_latency_ms = Some(self.latency_total_ms / self.latency_samples);
    }
}

/// Snapshot returned by `connection_diagnostics`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDiagnostics {
    pub status: ConnectionStatus,
    pub quality: ConnectionQuality,
    pub metrics: ConnectionMetrics,
}

/// Event delivered to connection listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// State, quality or attempt count changed
    StatusChanged {
        previous: ConnectionState,
        status: ConnectionStatus,
    },
    /// The reconnect window was exhausted; retries stop until a network-up
    /// signal
    ConnectionLost { attempts: u32 },
}

struct Inner {
    config: ConnectionConfig,
    backoff: BackoffPolicy,
    probe: Arc<dyn ConnectionProbe>,
    status: RwLock<ConnectionStatus>,
    metrics: RwLock<ConnectionMetrics>,
    slow_streak: AtomicU32,
    network_down: AtomicBool,
    probe_now: AtomicBool,
    wake: Notify,
    listeners: Listeners<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    /// Mutate the status and notify listeners if anything they track changed.
    fn transition<F>(&self, reason: &str, f: F)
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        let (before, after) = {
            let mut status = self.status.write();
            let before = status.clone();
            f(&mut *status);
            status.is_online = status.state == ConnectionState::Online;
            (before, status.clone())
        };

        if before.state != after.state {
            info!(from = %before.state, to = %after.state, reason, "Connection state changed");
            self.state_tx.send_replace(after.state);
        }

        if before.state != after.state
            || before.quality != after.quality
            || before.reconnect_attempts != after.reconnect_attempts
        {
            self.listeners.emit(&ConnectionEvent::StatusChanged {
                previous: before.state,
                status: after,
            });
        }
    }

    /// One probe with timeout; returns the measured latency.
    async fn run_probe(&self) -> Result<Duration, String> {
        self.metrics.write().probes_sent += 1;
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.probe_timeout(), self.probe.probe()).await;
        let latency = started.elapsed();

        let failure = match outcome {
            Ok(Ok(())) => {
                let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                self.metrics.write().record_latency(ms);
                debug!(latency_ms = ms, "Heartbeat probe succeeded");
                return Ok(latency);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => {
                self.metrics.write().probe_timeouts += 1;
                format!("probe timed out after {:?}", self.config.probe_timeout())
            }
        };

        let mut metrics = self.metrics.write();
        metrics.probe_failures += 1;
        metrics.last_error = Some(failure.clone());
        drop(metrics);
        warn!(error = %failure, "Heartbeat probe failed");
        Err(failure)
    }

    fn go_offline(&self, reason: &str) {
        self.slow_streak.store(0, Ordering::SeqCst);
        self.transition(reason, |s| {
            s.state = ConnectionState::Offline;
            s.quality = ConnectionQuality::Offline;
        });
    }

    fn mark_online(&self, latency: Duration) {
        let quality = ConnectionQuality::classify(latency, &self.config);
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.slow_streak.store(0, Ordering::SeqCst);
        self.metrics.write().reconnects += 1;
        self.transition("probe succeeded", |s| {
            s.state = ConnectionState::Online;
            s.reconnect_attempts = 0;
            s.last_seen = Some(Utc::now());
            s.latency_ms = Some(ms);
            s.quality = quality.min(ConnectionQuality::Poor);
        });
    }

    /// Apply a heartbeat taken while online.
    fn on_heartbeat(&self, result: Result<Duration, String>) {
        if self.status.read().state != ConnectionState::Online {
            return;
        }
        let latency = match result {
            Ok(latency) => latency,
            Err(_) => {
                self.go_offline("heartbeat failed");
                return;
            }
        };

        let quality = ConnectionQuality::classify(latency, &self.config);
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        if quality == ConnectionQuality::Offline {
            let streak = self.slow_streak.fetch_add(1, Ordering::SeqCst) + 1;
            if streak >= self.config.sustained_slow_probes {
                warn!(latency_ms = ms, streak, "Sustained slow heartbeats");
                self.go_offline("sustained slow heartbeats");
                return;
            }
        } else {
            self.slow_streak.store(0, Ordering::SeqCst);
        }

        self.transition("heartbeat", |s| {
            s.last_seen = Some(Utc::now());
            s.latency_ms = Some(ms);
            s.quality = quality.min(ConnectionQuality::Poor);
        });
    }

    async fn drive(self: Arc<Self>, cancel: CancellationToken) {
        debug!("Connection driver started");
        loop {
            let status = self.status();
            match status.state {
                ConnectionState::Online => {
                    let wait = if self.probe_now.swap(false, Ordering::SeqCst) {
                        Duration::ZERO
                    } else {
                        self.config.heartbeat_interval()
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(wait) => {
                            let result = tokio::select! {
                                _ = cancel.cancelled() => break,
                                r = self.run_probe() => r,
                            };
                            self.on_heartbeat(result);
                        }
                    }
                }
                ConnectionState::Offline => {
                    let down = self.network_down.load(Ordering::SeqCst);
                    if !down && status.reconnect_attempts < self.config.max_reconnect_attempts {
                        self.transition("starting reconnection", |s| {
                            s.state = ConnectionState::Reconnecting;
                        });
                        continue;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => {}
                    }
                }
                ConnectionState::Reconnecting => {
                    let attempts = status.reconnect_attempts;
                    if attempts >= self.config.max_reconnect_attempts {
                        self.metrics.write().connection_lost += 1;
                        self.transition("reconnect attempts exhausted", |s| {
                            s.state = ConnectionState::Offline;
                            s.quality = ConnectionQuality::Offline;
                        });
                        error!(attempts, "Connection lost");
                        self.listeners
                            .emit(&ConnectionEvent::ConnectionLost { attempts });
                        continue;
                    }

                    let delay = if self.probe_now.swap(false, Ordering::SeqCst) {
                        Duration::ZERO
                    } else {
                        self.backoff.delay(attempts)
                    };
                    debug!(attempt = attempts + 1, ?delay, "Scheduling reconnect attempt");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.wake.notified() => continue,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if self.status.read().state != ConnectionState::Reconnecting {
                        continue;
                    }

                    self.transition("reconnect attempt", |s| {
                        s.reconnect_attempts = attempts + 1;
                    });
                    let result = tokio::select! {
                        _ = cancel.cancelled() => break,
                        r = self.run_probe() => r,
                    };
                    if self.status.read().state != ConnectionState::Reconnecting {
                        continue;
                    }
                    match result {
                        Ok(latency) => {
                            info!(attempt = attempts + 1, "Reconnected");
                            self.mark_online(latency);
                        }
                        Err(e) => debug!(attempt = attempts + 1, error = %e, "Reconnect attempt failed"),
                    }
                }
            }
        }
        debug!("Connection driver stopped");
    }
}

/// Tracks online/offline state and drives heartbeats and reconnection
///
/// Construct one per engine, call [`ConnectionManager::start`] from inside
/// a tokio runtime and [`ConnectionManager::shutdown`] when done.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, probe: Arc<dyn ConnectionProbe>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Online);
        let backoff = BackoffPolicy::for_connection(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                backoff,
                probe,
                status: RwLock::new(ConnectionStatus::default()),
                metrics: RwLock::new(ConnectionMetrics::default()),
                slow_streak: AtomicU32::new(0),
                network_down: AtomicBool::new(false),
                probe_now: AtomicBool::new(true),
                wake: Notify::new(),
                listeners: Listeners::new("connection"),
                state_tx,
            }),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the heartbeat/reconnect driver. A second call is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }
        info!(
            heartbeat = ?self.inner.config.heartbeat_interval(),
            max_attempts = self.inner.config.max_reconnect_attempts,
            "Starting connection manager"
        );
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(inner.drive(cancel)));
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    pub fn is_online(&self) -> bool {
        self.inner.status.read().is_online
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.inner.status.read().quality
    }

    pub fn diagnostics(&self) -> ConnectionDiagnostics {
        let status = self.inner.status();
        ConnectionDiagnostics {
            quality: status.quality,
            status,
            metrics: self.inner.metrics.read().clone(),
        }
    }

    /// Register a listener for status changes and connection loss
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(handler)
    }

    /// Async view of the coarse state, for background tasks
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// External signal that the network went away.
    pub fn notify_network_down(&self) {
        self.inner.network_down.store(true, Ordering::SeqCst);
        self.inner.go_offline("network down");
        self.inner.wake.notify_one();
    }

    /// External signal that the network is back; restarts the attempt window
    /// with an immediate probe.
    pub fn notify_network_up(&self) {
        self.inner.network_down.store(false, Ordering::SeqCst);
        if self.inner.status.read().state == ConnectionState::Online {
            return;
        }
        self.inner.transition("network up", |s| {
            s.state = ConnectionState::Reconnecting;
            s.reconnect_attempts = 0;
        });
        self.inner.probe_now.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    /// Probe immediately and apply the result.
    pub async fn check_now(&self) -> ConnectionStatus {
        let result = self.inner.run_probe().await;
        let state = self.inner.status.read().state;
        match (state, result) {
            (ConnectionState::Online, result) => self.inner.on_heartbeat(result),
            (_, Ok(latency)) if !self.inner.network_down.load(Ordering::SeqCst) => {
                self.inner.mark_online(latency);
            }
            _ => {}
        }
        self.inner.wake.notify_one();
        self.inner.status()
    }

    /// Cancel the driver's timers and drop every listener without waiting
    /// for the driver task to finish.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.inner.listeners.clear();
    }

    /// Stop the driver, wait for it to exit and drop every listener.
    pub async fn shutdown(&self) {
        info!("Shutting down connection manager");
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Connection driver ended abnormally");
                }
            }
        }
        self.inner.listeners.clear();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
