use serde::Serialize;
use std::fmt::{Display, Formatter};

/// The lifecycle state of a [`Client`](crate::Client)'s single logical
/// connection.
///
/// Only the connection manager moves between states, always under its
/// single-writer lock. Everything else observes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection is established. Initial state, and the state after a
    /// lost connection or a completed shutdown.
    #[default]
    Disconnected,

    /// A connect attempt is in progress.
    Connecting,

    /// A connection and its channel are established.
    Connected,

    /// Shutdown has begun; no further reconnects will be scheduled.
    ShuttingDown,
}

impl ConnectionState {
    /// Reports whether this is [`Connected`](ConnectionState::Connected).
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Reports a short, stable name for logging.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
