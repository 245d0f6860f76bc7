//! Heartbeat probes
//!
//! A probe is one lightweight round trip. The manager measures its latency
//! and applies the probe timeout; implementations only report success.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::sync::store::{DocumentStore, Query};
use crate::types::UserId;

/// One round trip to the backend
#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    async fn probe(&self) -> EngineResult<()>;
}

/// Probes the document store with a cheap presence read
pub struct StoreProbe {
    store: Arc<dyn DocumentStore>,
    query: Query,
}

impl StoreProbe {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            query: Query::Presence(UserId::from("__heartbeat__")),
        }
    }
}

#[async_trait]
impl ConnectionProbe for StoreProbe {
    async fn probe(&self) -> EngineResult<()> {
        self.store.fetch(&self.query).await.map(|_| ())
    }
}

/// Outcome a [`ScriptedProbe`] plays back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    /// Succeed after the given round-trip time
    Ok(Duration),
    /// Fail after the given round-trip time
    Fail(Duration),
    /// Never return (exercises the probe timeout)
    Hang,
}

/// Probe that replays a script, then repeats a fallback step
///
/// Delays use `tokio::time`, so paused-clock tests control them exactly.
pub struct ScriptedProbe {
    steps: Mutex<VecDeque<ProbeStep>>,
    fallback: Mutex<ProbeStep>,
    calls: Mutex<u64>,
}

impl ScriptedProbe {
    pub fn new(fallback: ProbeStep) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: Mutex::new(0),
        }
    }

    /// Always succeed with `latency`
    pub fn healthy(latency: Duration) -> Self {
        Self::new(ProbeStep::Ok(latency))
    }

    /// Queue steps to play before the fallback
    pub fn push(&self, steps: impl IntoIterator<Item = ProbeStep>) {
        self.steps.lock().extend(steps);
    }

    /// Replace the step used once the queue is empty
    pub fn set_fallback(&self, step: ProbeStep) {
        *self.fallback.lock() = step;
    }

    pub fn calls(&self) -> u64 {
        *self.calls.lock()
    }
}

#[async_trait]
impl ConnectionProbe for ScriptedProbe {
    async fn probe(&self) -> EngineResult<()> {
        *self.calls.lock() += 1;
        let step = {
            let next = self.steps.lock().pop_front();
            next.unwrap_or(*self.fallback.lock())
        };
        match step {
            ProbeStep::Ok(latency) => {
                tokio::time::sleep(latency).await;
                Ok(())
            }
            ProbeStep::Fail(latency) => {
                tokio::time::sleep(latency).await;
                Err(EngineError::Connection("scripted probe failure".to_string()))
            }
            ProbeStep::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_scripted_probe_plays_steps_then_fallback() {
        let probe = ScriptedProbe::healthy(Duration::from_millis(10));
        probe.push([ProbeStep::Fail(Duration::ZERO)]);

        assert!(probe.probe().await.is_err());
        assert!(probe.probe().await.is_ok());
        assert!(probe.probe().await.is_ok());
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn test_store_probe_follows_store_reachability() {
        let store = Arc::new(MemoryStore::new());
        let probe = StoreProbe::new(store.clone());
        assert!(probe.probe().await.is_ok());
        store.set_offline(true);
        assert!(probe.probe().await.unwrap_err().is_retryable());
    }
}
