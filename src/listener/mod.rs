//! Invalidation Listener
//!
//! Keeps loaded months fresh by applying change notifications to the index.
//!
//! ```text
//! Idle ──subscribe──▶ Subscribed ──event──▶ Applying ──done──▶ Subscribed
//!                        │    ▲
//!         feed closed    │    │ resubscribe (with backoff)
//!                        ▼    │
//!                     (backing off)
//!
//! shutdown from any state ──▶ Unsubscribed
//! ```
//!
//! A single bad event is logged and skipped. Removals leave a short-lived
//! tombstone so a duplicate `Added` delivered after its `Removed` cannot bring
//! the asset back. If the feed drops events (lag)
//! or the transport reconnects, every loaded month is reset, since changes may
//! have been missed.

use crate::index::MonthIndex;
use crate::source::{Asset, ChangeEvent, ChangeFeed, ChangeKind};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Listener lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Idle,
    Subscribed,
    Applying,
    Unsubscribed,
}

/// An event that could not be applied; logged, never surfaced
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Event processing skipped: {0}")]
    Skipped(String),
}

/// Most removals remembered at once
const MAX_TOMBSTONES: usize = 4096;

/// Resubscription backoff and duplicate suppression
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// How long a removal suppresses stale `Added`/`TimestampChanged` events
    pub tombstone_ttl: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            tombstone_ttl: Duration::from_secs(30),
        }
    }
}

/// Recently removed ids with the timestamp their removal carried
#[derive(Default)]
struct Tombstones {
    entries: HashMap<String, (Option<i64>, Instant)>,
}

impl Tombstones {
    fn bury(&mut self, id: &str, timestamp: Option<i64>, ttl: Duration) {
        let now = Instant::now();
        if self.entries.len() >= MAX_TOMBSTONES {
            self.entries.retain(|_, (_, at)| now.duration_since(*at) < ttl);
        }
        if self.entries.len() >= MAX_TOMBSTONES {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, at))| *at)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(id.to_string(), (timestamp, now));
    }

    /// True if an event at `timestamp` predates the remembered removal of `id`
    ///
    /// A live tombstone with a different timestamp means the id came back; it
    /// is dropped and the event applies.
    fn suppresses(&mut self, id: &str, timestamp: i64, ttl: Duration) -> bool {
        let Some((removed_at, buried)) = self.entries.get(id).copied() else {
            return false;
        };
        if buried.elapsed() >= ttl || removed_at.map_or(false, |ts| ts != timestamp) {
            self.entries.remove(id);
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub state: ListenerState,
    pub applied: u64,
    pub skipped: u64,
    pub resubscribes: u64,
    pub resets: u64,
}

/// Outcome of waiting on the feed
enum Received {
    Event(ChangeEvent),
    Lagged(u64),
    Closed,
    Shutdown,
}

pub struct InvalidationListener {
    index: MonthIndex,
    feed: Arc<dyn ChangeFeed>,
    config: ListenerConfig,
    state: watch::Sender<ListenerState>,
    shutdown: watch::Sender<bool>,
    applied: AtomicU64,
    skipped: AtomicU64,
    resubscribes: AtomicU64,
    resets: AtomicU64,
    tombstones: Mutex<Tombstones>,
}

impl InvalidationListener {
    pub fn new(index: MonthIndex, feed: Arc<dyn ChangeFeed>, config: ListenerConfig) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        let (shutdown, _) = watch::channel(false);
        Self {
            index,
            feed,
            config,
            state,
            shutdown,
            applied: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            resubscribes: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            tombstones: Mutex::new(Tombstones::default()),
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            state: self.state(),
            applied: self.applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            resubscribes: self.resubscribes.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }

    /// Start the listener background task
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Ask the background task to stop; it ends in `Unsubscribed`
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Apply one change notification to the index
    pub async fn apply_event(&self, event: &ChangeEvent) -> Result<(), EventError> {
        if event.id.trim().is_empty() {
            return Err(EventError::Skipped("event without asset id".to_string()));
        }

        match event.kind {
            ChangeKind::Added => {
                let timestamp = required_timestamp(event)?;
                self.insert(event, timestamp).await
            }
            ChangeKind::Removed => {
                let timestamp = event.timestamp.filter(|ts| *ts > 0);
                self.tombstones().bury(&event.id, timestamp, self.config.tombstone_ttl);
                let known = event
                    .timestamp
                    .filter(|ts| *ts > 0)
                    .and_then(|ts| self.index.zone().month_of(ts).ok());
                self.index.apply_remove(&event.id, known).await;
                Ok(())
            }
            ChangeKind::TimestampChanged => {
                let timestamp = required_timestamp(event)?;
                self.index.apply_remove(&event.id, None).await;
                self.insert(event, timestamp).await
            }
        }
    }

    async fn insert(&self, event: &ChangeEvent, timestamp: i64) -> Result<(), EventError> {
        if self
            .tombstones()
            .suppresses(&event.id, timestamp, self.config.tombstone_ttl)
        {
            return Err(EventError::Skipped(format!(
                "{:?} event for {} predates its removal",
                event.kind, event.id
            )));
        }

        let asset = Asset::new(event.id.clone(), timestamp).media_type(event.media_type);
        self.index
            .apply_insert(&asset)
            .await
            .map(|_| ())
            .map_err(|e| EventError::Skipped(e.to_string()))
    }

    async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut backoff = self.config.initial_backoff;
        let mut subscribed_before = false;

        'subscribe: loop {
            if *shutdown.borrow() {
                break;
            }

            let mut rx = match self.feed.subscribe().await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Change feed subscription failed"
                    );
                    if self.back_off(backoff, &mut shutdown).await {
                        break;
                    }
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    continue;
                }
            };

            self.state.send_replace(ListenerState::Subscribed);
            if subscribed_before {
                // Changes made while disconnected were never delivered
                self.resubscribes.fetch_add(1, Ordering::Relaxed);
                self.reset_index("resubscribed").await;
            }
            subscribed_before = true;
            tracing::info!("Subscribed to change feed");

            loop {
                let received = tokio::select! {
                    _ = shutdown.changed() => Received::Shutdown,
                    result = rx.recv() => match result {
                        Ok(event) => Received::Event(event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => Received::Lagged(missed),
                        Err(broadcast::error::RecvError::Closed) => Received::Closed,
                    },
                };

                match received {
                    Received::Event(event) => {
                        backoff = self.config.initial_backoff;
                        self.state.send_replace(ListenerState::Applying);
                        match self.apply_event(&event).await {
                            Ok(()) => {
                                self.applied.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(id = %event.id, kind = ?event.kind, "Applied change event");
                            }
                            Err(e) => {
                                self.skipped.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(id = %event.id, kind = ?event.kind, error = %e, "Skipped change event");
                            }
                        }
                        self.state.send_replace(ListenerState::Subscribed);
                    }
                    Received::Lagged(missed) => {
                        tracing::warn!(missed, "Change feed lagged");
                        self.reset_index("lagged").await;
                    }
                    Received::Closed => {
                        tracing::warn!(
                            backoff_ms = backoff.as_millis() as u64,
                            "Change feed closed; resubscribing"
                        );
                        if self.back_off(backoff, &mut shutdown).await {
                            break 'subscribe;
                        }
                        backoff = (backoff * 2).min(self.config.max_backoff);
                        continue 'subscribe;
                    }
                    Received::Shutdown => break 'subscribe,
                }
            }
        }

        self.state.send_replace(ListenerState::Unsubscribed);
        tracing::info!("Invalidation listener stopped");
    }

    fn tombstones(&self) -> std::sync::MutexGuard<'_, Tombstones> {
        self.tombstones
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn reset_index(&self, reason: &str) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        tracing::info!(reason, "Resetting loaded months");
        self.index.reset_loaded().await;
    }

    /// Sleep for `delay`; returns true if shutdown was requested meanwhile
    async fn back_off(&self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => *shutdown.borrow(),
            _ = shutdown.changed() => true,
        }
    }
}

fn required_timestamp(event: &ChangeEvent) -> Result<i64, EventError> {
    event.timestamp.filter(|ts| *ts > 0).ok_or_else(|| {
        EventError::Skipped(format!("{:?} event for {} has no usable timestamp", event.kind, event.id))
    })
}
