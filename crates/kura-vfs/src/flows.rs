//! Change notification pipeline.
//!
//! Two halves:
//!
//! - [`WatchRegistry`] holds in-process subscribers. A subscriber registered
//!   at directory `P` receives events for directory `D` when `P` is a
//!   segment-wise prefix of `D` (`/foo` never matches `/foobar`).
//! - [`ChangeBus`] fans events out to every other context sharing the same
//!   tree key. Each [`Root`](crate::Root) runs a listener that feeds messages
//!   from other contexts into its own registry without rebroadcasting them.
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(WatchRegistry::new());
//! let handle = registry.subscribe("/docs", None, Arc::new(|events| {
//!     for event in events {
//!         println!("{} {}", event.kind, event.path);
//!     }
//! }));
//! registry.dispatch("/docs/drafts", &events, OpSource::Local);
//! drop(handle); // unsubscribes
//! ```

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use kura_types::WatchEvent;

use crate::path;

// ============================================================================
// Origin Tracking
// ============================================================================

/// Where a batch of events came from.
///
/// Used to prevent echo loops: local changes are dispatched and broadcast,
/// remote ones are dispatched only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpSource {
    /// Produced by a mutation in this context
    #[default]
    Local,
    /// Received from another context over the change bus
    Remote,
}

// ============================================================================
// Path Matching
// ============================================================================

/// Check if a subscriber watching `watched` should see events in `dir`.
///
/// ```ignore
/// assert!(path_matches("/a", "/a/b"));
/// assert!(!path_matches("/a", "/ab"));
/// ```
pub fn path_matches(watched: &str, dir: &str) -> bool {
    path::is_within(watched, dir)
}

// ============================================================================
// Local Subscribers
// ============================================================================

/// Subscriber callback. Receives every event batch for a matching directory.
pub type WatchCallback = Arc<dyn Fn(&[WatchEvent]) + Send + Sync>;

struct Subscriber {
    dir: String,
    /// Full path of a single watched file, for `watch_file` subscriptions.
    file: Option<String>,
    callback: WatchCallback,
}

/// In-process subscriber table for one tree.
pub struct WatchRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, Subscriber>>,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `callback` for events at or below `dir`.
    ///
    /// With `file` set, only events whose path equals it are delivered.
    /// Dropping the returned handle unsubscribes.
    pub fn subscribe(
        self: &Arc<Self>,
        dir: &str,
        file: Option<String>,
        callback: WatchCallback,
    ) -> WatchHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dir = path::normalize(dir);
        tracing::debug!(id, dir = %dir, file = ?file, "watch registered");
        self.subscribers.write().insert(
            id,
            Subscriber {
                dir,
                file,
                callback,
            },
        );
        WatchHandle {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.subscribers.write().clear();
    }

    /// Deliver `events` for directory `dir` to every matching subscriber.
    ///
    /// Callbacks run synchronously, outside the registry lock. A panicking
    /// callback is logged and does not affect the others or the caller.
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, dir: &str, events: &[WatchEvent], source: OpSource) -> usize {
        if events.is_empty() {
            return 0;
        }

        let targets: Vec<(u64, Vec<WatchEvent>, WatchCallback)> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .filter(|(_, sub)| path_matches(&sub.dir, dir))
                .filter_map(|(id, sub)| {
                    let selected: Vec<WatchEvent> = match &sub.file {
                        Some(file) => events.iter().filter(|e| &e.path == file).cloned().collect(),
                        None => events.to_vec(),
                    };
                    (!selected.is_empty()).then(|| (*id, selected, Arc::clone(&sub.callback)))
                })
                .collect()
        };

        let mut delivered = 0;
        for (id, selected, callback) in targets {
            match catch_unwind(AssertUnwindSafe(|| callback(&selected))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(id, dir = %dir, ?source, "watch subscriber panicked");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("subscribers", &self.len())
            .finish_non_exhaustive()
    }
}

/// Live subscription. Dropping it (or calling [`unwatch`](Self::unwatch))
/// removes the subscriber.
pub struct WatchHandle {
    id: u64,
    registry: Weak<WatchRegistry>,
}

impl WatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Explicitly unsubscribe.
    pub fn unwatch(self) {
        drop(self);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").field("id", &self.id).finish()
    }
}

// ============================================================================
// Cross-context Bus
// ============================================================================

/// One batch of events published on the change bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// Context that produced the change.
    pub origin: Uuid,
    /// Directory the events happened in.
    pub dir: String,
    pub events: Vec<WatchEvent>,
}

static CHANNELS: LazyLock<DashMap<String, broadcast::Sender<ChangeMessage>>> =
    LazyLock::new(DashMap::new);

/// Named fan-out channel shared by every context using the same tree key.
///
/// Delivery is best effort: slow receivers lag and lose messages.
#[derive(Clone)]
pub struct ChangeBus {
    key: String,
    tx: broadcast::Sender<ChangeMessage>,
}

impl ChangeBus {
    /// Join (or create) the channel for `key`.
    ///
    /// `capacity` only applies when this call creates the channel.
    pub fn open(key: &str, capacity: usize) -> Self {
        let tx = CHANNELS
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(capacity.max(1)).0)
            .clone();
        Self {
            key: key.to_string(),
            tx,
        }
    }

    /// Join the channel for `key` and subscribe in one step.
    ///
    /// The receiver is created while the table entry is held, so a
    /// concurrent prune cannot drop the channel in between.
    pub fn join(key: &str, capacity: usize) -> (Self, ChangeSubscription) {
        let entry = CHANNELS
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(capacity.max(1)).0);
        let tx = entry.clone();
        let rx = entry.subscribe();
        drop(entry);

        let subscription = ChangeSubscription {
            key: key.to_string(),
            rx: Some(rx),
        };
        (
            Self {
                key: key.to_string(),
                tx,
            },
            subscription,
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish a message. Returns the number of receivers that got it.
    pub fn publish(&self, msg: ChangeMessage) -> usize {
        self.tx.send(msg).unwrap_or(0)
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            key: self.key.clone(),
            rx: Some(self.tx.subscribe()),
        }
    }

    /// Get the number of active receivers across all contexts.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Leave the channel, removing it from the table once nobody listens.
    pub fn close(&self) {
        prune(&self.key);
    }

    /// Returns true if the process-wide table holds a channel for `key`.
    pub fn is_open(key: &str) -> bool {
        CHANNELS.contains_key(key)
    }
}

fn prune(key: &str) {
    if CHANNELS
        .remove_if(key, |_, tx| tx.receiver_count() == 0)
        .is_some()
    {
        tracing::debug!(key = %key, "change bus channel pruned");
    }
}

impl std::fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("key", &self.key)
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

/// Receiving end of a [`ChangeBus`].
///
/// Dropping the last subscription for a key removes its channel from the
/// table, including when a listener task is aborted.
pub struct ChangeSubscription {
    key: String,
    rx: Option<broadcast::Receiver<ChangeMessage>>,
}

impl ChangeSubscription {
    /// Receive the next message, waiting if necessary.
    ///
    /// Returns None if the channel is closed.
    pub async fn recv(&mut self) -> Option<ChangeMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // We fell behind, log and continue
                    tracing::warn!(key = %self.key, lagged = n, "change bus receiver lagged behind");
                }
            }
        }
    }

    /// Forward messages from other contexts into `registry` until the
    /// channel closes or the task is aborted.
    pub fn spawn_listener(mut self, origin: Uuid, registry: Weak<WatchRegistry>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = self.recv().await {
                if msg.origin == origin {
                    continue;
                }
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.dispatch(&msg.dir, &msg.events, OpSource::Remote);
            }
            tracing::debug!(key = %self.key, %origin, "change bus listener stopped");
        })
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        // Release the receiver first so it no longer counts.
        drop(self.rx.take());
        prune(&self.key);
    }
}

impl std::fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
