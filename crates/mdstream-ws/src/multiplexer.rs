//! Connection registry.
//!
//! One physical connection per stream key, shared by every subscriber of
//! that key and reference counted. When the count drops to zero the
//! connection lingers for a grace period so that a quick resubscribe
//! reuses it instead of dialing again.
//!
//! Reference counts only change while holding the registry entry, and the
//! grace timer re-checks the count under the same entry before removing
//! it, so a subscribe racing an expiring grace period cannot lose.

use crate::connection::{ConnectionConfig, ConnectionTask, Shared};
use crate::sender::StreamSender;
use crate::state::LinkStatus;
use crate::subscription::Subscription;
use crate::transport::{Connector, TungsteniteConnector};
use dashmap::DashMap;
use mdstream_core::StreamKey;
use mdstream_telemetry::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ConnectionEntry {
    id: u64,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
    grace: Option<JoinHandle<()>>,
}

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    registry: DashMap<StreamKey, ConnectionEntry>,
    next_id: AtomicU64,
}

impl Inner {
    fn open(&self, key: StreamKey) -> ConnectionEntry {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(key = %key, id, "Opening shared connection");
        let (shared, task) = ConnectionTask::spawn(key, &self.config, self.connector.clone());
        ConnectionEntry {
            id,
            shared,
            task,
            grace: None,
        }
    }

    fn close_if_idle(&self, key: &StreamKey, id: u64) {
        let removed = self
            .registry
            .remove_if(key, |_, e| e.id == id && e.shared.subscribers() == 0);

        if let Some((_, entry)) = removed {
            info!(key = %key, id, "Grace period elapsed, closing connection");
            entry.shared.shutdown.cancel();
        }
    }
}

/// Shares one connection per stream key among any number of subscribers.
///
/// Cheap to clone; clones share the same registry. Tests build a fresh
/// multiplexer per case.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                registry: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Multiplexer dialing real WebSocket endpoints under `config.url`.
    pub fn connect(config: ConnectionConfig) -> Self {
        crate::init_crypto();
        let connector = TungsteniteConnector::new(
            config.url.clone(),
            Duration::from_millis(config.connect_timeout_ms),
        );
        Self::new(config, Arc::new(connector))
    }

    /// Subscribe to `key`, creating its connection on first use.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, key: StreamKey) -> Subscription {
        let mut entry = self
            .inner
            .registry
            .entry(key.clone())
            .or_insert_with(|| self.inner.open(key.clone()));

        if entry.task.is_finished() {
            warn!(key = %key, "Connection task exited, replacing it");
            *entry = self.inner.open(key.clone());
        }
        if let Some(grace) = entry.grace.take() {
            grace.abort();
            debug!(key = %key, "Resubscribed within grace period, keeping connection");
        }

        let count = entry.shared.ref_count.fetch_add(1, Ordering::SeqCst) + 1;
        let id = entry.id;
        let shared = entry.shared.clone();
        drop(entry);

        shared.wake();
        Metrics::ws_subscribers(key.as_str(), count);
        debug!(key = %key, subscribers = count, "Subscribed");

        let status = shared.status.subscribe();
        let sender = StreamSender::new(
            key.clone(),
            shared.outbound.clone(),
            shared.limiter.clone(),
            status.clone(),
        );
        Subscription::new(
            self.clone(),
            key,
            id,
            shared.fanout.subscribe(),
            status,
            sender,
        )
    }

    pub(crate) fn release(&self, key: &StreamKey, id: u64) {
        let Some(mut entry) = self.inner.registry.get_mut(key) else {
            return;
        };
        if entry.id != id {
            return;
        }

        let remaining = match entry
            .shared
            .ref_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(_) => return,
        };
        Metrics::ws_subscribers(key.as_str(), remaining);
        debug!(key = %key, subscribers = remaining, "Unsubscribed");

        if remaining > 0 {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak: Weak<Inner> = Arc::downgrade(&self.inner);
                let key = key.clone();
                let period = self.inner.config.grace_period();
                if let Some(old) = entry.grace.take() {
                    old.abort();
                }
                entry.grace = Some(handle.spawn(async move {
                    tokio::time::sleep(period).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.close_if_idle(&key, id);
                    }
                }));
            }
            Err(_) => {
                // Runtime is gone; nothing can run a timer.
                drop(entry);
                self.inner.close_if_idle(key, id);
            }
        }
    }

    /// Restart dialing for a connection that gave up.
    pub fn retry(&self, key: &StreamKey) -> bool {
        match self.inner.registry.get(key) {
            Some(entry) => {
                entry.shared.wake();
                true
            }
            None => false,
        }
    }

    /// Physical connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Live subscribers of `key` (0 when unknown).
    pub fn ref_count(&self, key: &StreamKey) -> usize {
        self.inner
            .registry
            .get(key)
            .map(|e| e.shared.subscribers())
            .unwrap_or(0)
    }

    pub fn status(&self, key: &StreamKey) -> Option<LinkStatus> {
        self.inner
            .registry
            .get(key)
            .map(|e| e.shared.status.borrow().clone())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Close every connection intentionally and wait for the tasks to exit.
    pub async fn shutdown(&self) {
        let keys: Vec<StreamKey> = self
            .inner
            .registry
            .iter()
            .map(|e| e.key().clone())
            .collect();

        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, entry)) = self.inner.registry.remove(&key) {
                if let Some(grace) = entry.grace {
                    grace.abort();
                }
                entry.shared.shutdown.cancel();
                tasks.push(entry.task);
            }
        }

        info!(count = tasks.len(), "Closing all connections");
        for task in tasks {
            if let Err(e) = task.await {
                warn!(?e, "Connection task ended abnormally");
            }
        }
    }
}
