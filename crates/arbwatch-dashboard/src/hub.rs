//! Viewer registry and fan-out.
//!
//! Each registered viewer owns a bounded queue of serialized frames. Publishing
//! serializes once and offers the frame to every queue without waiting. A
//! viewer whose queue is closed (disconnected) or full (stalled) is removed
//! from the registry; its socket task sees the queue end and closes.
//!
//! Dispatch works on a copy of the registry taken under the read lock, so
//! viewers registering or leaving mid-publish never invalidate the iteration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arbwatch_telemetry::Metrics;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

use crate::types::{Frame, HubEvent};

/// Default per-viewer queue length.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Identity of a registered viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewerId(u64);

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

struct HubInner {
    viewers: RwLock<HashMap<ViewerId, mpsc::Sender<Frame>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl HubInner {
    fn remove(&self, id: ViewerId) -> bool {
        let mut viewers = self.viewers.write();
        let removed = viewers.remove(&id).is_some();
        Metrics::viewers_connected(viewers.len());
        removed
    }
}

/// Fan-out dispatcher to all connected viewers.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                viewers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Add a viewer. `initial` is queued to this viewer alone, ahead of any
    /// later publish.
    pub fn register(&self, initial: Vec<HubEvent>) -> ViewerSubscription {
        let id = ViewerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let capacity = self.inner.queue_capacity.max(initial.len());
        let (tx, rx) = mpsc::channel(capacity);

        for event in &initial {
            match event.to_frame() {
                Ok(frame) => {
                    // Capacity covers the initial batch, so this cannot be full.
                    let _ = tx.try_send(frame);
                }
                Err(e) => warn!(error = %e, event = %event.event, "Failed to serialize initial event"),
            }
        }

        let count = {
            let mut viewers = self.inner.viewers.write();
            viewers.insert(id, tx);
            viewers.len()
        };
        Metrics::viewers_connected(count);
        debug!(%id, viewers = count, "Viewer registered");

        ViewerSubscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a viewer. Returns `false` if it was already gone.
    pub fn unregister(&self, id: ViewerId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!(%id, "Viewer unregistered");
        }
        removed
    }

    /// Send `payload` tagged with `event` to every registered viewer.
    ///
    /// Returns the number of viewers the frame was queued for.
    pub fn publish<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> usize {
        let frame = match HubEvent::new(event, payload).and_then(|e| e.to_frame()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, event, "Failed to serialize event, not published");
                return 0;
            }
        };
        self.publish_frame(event, frame)
    }

    /// Send an already serialized frame to every registered viewer.
    pub fn publish_frame(&self, event: &str, frame: Frame) -> usize {
        let targets: Vec<(ViewerId, mpsc::Sender<Frame>)> = self
            .inner
            .viewers
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => dropped.push((id, "stalled")),
                Err(TrySendError::Closed(_)) => dropped.push((id, "closed")),
            }
        }

        for (id, reason) in dropped {
            if self.inner.remove(id) {
                Metrics::viewer_dropped(reason);
                debug!(%id, reason, "Viewer dropped during publish");
            }
        }

        Metrics::event_published(event);
        delivered
    }

    /// Send one event to a single viewer. Returns `false` if the viewer is
    /// gone or its queue is full (in which case it is dropped).
    pub fn send_to<T: Serialize + ?Sized>(&self, id: ViewerId, event: &str, payload: &T) -> bool {
        let frame = match HubEvent::new(event, payload).and_then(|e| e.to_frame()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, event, "Failed to serialize event");
                return false;
            }
        };

        let Some(tx) = self.inner.viewers.read().get(&id).cloned() else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if self.inner.remove(id) {
                    Metrics::viewer_dropped("stalled");
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                if self.inner.remove(id) {
                    Metrics::viewer_dropped("closed");
                }
                false
            }
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.inner.viewers.read().len()
    }

    pub fn is_registered(&self, id: ViewerId) -> bool {
        self.inner.viewers.read().contains_key(&id)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("viewers", &self.viewer_count())
            .field("queue_capacity", &self.inner.queue_capacity)
            .finish()
    }
}

/// Receiving side of a registered viewer.
///
/// Dropping the subscription unregisters the viewer.
pub struct ViewerSubscription {
    id: ViewerId,
    rx: mpsc::Receiver<Frame>,
    hub: Weak<HubInner>,
}

impl ViewerSubscription {
    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Next frame, or `None` once the hub has dropped this viewer.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for ViewerSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

impl std::fmt::Debug for ViewerSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSubscription")
            .field("id", &self.id)
            .finish()
    }
}
