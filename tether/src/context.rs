use crate::ClientEvent;
use crate::metrics::Metrics;
use crate::tracker::InFlightTracker;
use std::sync::Arc;
use tokio::sync::broadcast;

/// How many undelivered events a slow subscriber may lag behind.
const EVENT_CAPACITY: usize = 64;

/// State shared by every component of one client instance: its naming for
/// logs, its metrics, its in-flight deliveries, and its event channel.
pub(crate) struct Context {
    /// The client name, for logging.
    pub(crate) name: Arc<str>,
    /// The password-free broker identifier, for logging.
    pub(crate) identifier: Arc<str>,
    pub(crate) metrics: Metrics,
    pub(crate) tracker: InFlightTracker,
    events: broadcast::Sender<ClientEvent>,
}

impl Context {
    pub(crate) fn new(name: Arc<str>, identifier: Arc<str>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            name,
            identifier,
            metrics: Metrics::new(),
            tracker: InFlightTracker::new(),
            events,
        }
    }

    /// Broadcasts the given event to whoever listens. Nobody listening is
    /// fine.
    pub(crate) fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}
