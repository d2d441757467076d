use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Uniquely identifies a received delivery within one client instance: the
/// topic it arrived on plus a client-wide arrival counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryId {
    topic: Arc<str>,
    sequence: u64,
}

impl DeliveryId {
    /// Reports the topic the delivery arrived on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Reports the arrival counter value assigned to the delivery.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Display for DeliveryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.topic, self.sequence)
    }
}

/// Concurrent set of the deliveries whose handling has begun but whose
/// acknowledgement or rejection has not completed yet. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlightTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    counter: AtomicU64,
    pending: SyncMutex<HashSet<DeliveryId>>,
}

/// Keeps a [`DeliveryId`] in the in-flight set for as long as it lives. The
/// identifier leaves the set when the guard is dropped, including during
/// unwinding.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    inner: Arc<TrackerInner>,
    id: DeliveryId,
}

impl InFlightTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh identifier for a delivery on the given topic and
    /// inserts it into the in-flight set.
    pub(crate) fn track(&self, topic: &Arc<str>) -> InFlightGuard {
        let sequence = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        let id = DeliveryId {
            topic: Arc::clone(topic),
            sequence,
        };

        self.inner.pending.lock().insert(id.clone());

        InFlightGuard {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Reports how many deliveries are in flight right now.
    pub(crate) fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Polls the in-flight set every `interval` until it is empty or
    /// `timeout` elapses. Returns the number of deliveries still in flight
    /// when waiting stopped (zero on a clean drain).
    ///
    /// A `timeout` too large to express as a deadline waits without one.
    pub(crate) async fn drain(&self, timeout: Duration, interval: Duration) -> usize {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let pending = self.len();
            if pending == 0 {
                return 0;
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return pending;
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };

            tokio::time::sleep(pause).await;
        }
    }
}

impl InFlightGuard {
    /// Exposes the tracked identifier.
    pub(crate) fn id(&self) -> &DeliveryId {
        &self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
    }
}
