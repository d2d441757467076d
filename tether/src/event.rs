use std::time::Duration;

/// A lifecycle report broadcast by a [`Client`](crate::Client).
///
/// Every event is also logged; subscribing through
/// [`Client::events`](crate::Client::events) lets the surrounding process
/// react without parsing logs. Slow receivers may miss events (see
/// [`tokio::sync::broadcast`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A connection and its channel were established.
    Connected,

    /// The established connection was lost.
    Disconnected,

    /// A reconnect will be attempted after the given delay.
    ReconnectScheduled {
        /// The number of the scheduled reconnect, counted from one since the
        /// last successful connect.
        attempt: u32,
        /// How long until the reconnect is attempted.
        delay: Duration,
    },

    /// Every permitted reconnect failed; nothing further will be attempted
    /// automatically.
    ReconnectExhausted {
        /// How many reconnects were attempted.
        attempts: u32,
    },

    /// The transport reported a non-fatal connection error.
    TransportError {
        /// The reported error text.
        message: String,
    },

    /// Graceful shutdown stopped waiting with deliveries still in flight.
    DrainTimedOut {
        /// Deliveries still in flight.
        pending: usize,
    },

    /// The client finished shutting down.
    ShutDown,
}

/// The result of [`Client::graceful_shutdown`](crate::Client::graceful_shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownOutcome {
    /// Whether every in-flight delivery finished within the drain window.
    pub drained: bool,
    /// Deliveries still in flight when the drain window closed.
    pub pending: usize,
}

impl ShutdownOutcome {
    pub(crate) fn drained() -> Self {
        Self {
            drained: true,
            pending: 0,
        }
    }

    pub(crate) fn timed_out(pending: usize) -> Self {
        Self {
            drained: false,
            pending,
        }
    }
}
