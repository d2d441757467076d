use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Aggregates the counters and timers of one client instance.
///
/// Every counter only ever grows. Updates are lock-free and may race freely
/// with each other and with [`snapshot`](Metrics::snapshot), which reads each
/// field independently.
#[derive(Debug)]
pub(crate) struct Metrics {
    sent: AtomicU64,
    received: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    reconnections: AtomicU64,
    total_processing_time_ms: AtomicU64,
    /// Epoch milliseconds of the last scheduled reconnect; zero means never.
    last_reconnect_at: AtomicU64,
    started_at: SystemTime,
    started: Instant,
}

/// A point-in-time copy of a client's metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Messages published successfully.
    pub sent: u64,
    /// Deliveries received (empty broker signals excluded).
    pub received: u64,
    /// Deliveries handled successfully and acknowledged.
    pub processed: u64,
    /// Failed attempts of any kind: handler failures, publish attempts,
    /// transport error events, subscription failures.
    pub errors: u64,
    /// Reconnects scheduled.
    pub reconnections: u64,
    /// Total handler time of the processed deliveries, in milliseconds.
    pub total_processing_time_ms: u64,
    /// When the last reconnect was scheduled, in epoch milliseconds.
    pub last_reconnect_at: Option<u64>,
    /// When the client was constructed, in epoch milliseconds.
    pub start_time: u64,
    /// Milliseconds since the client was constructed.
    pub uptime_ms: u64,
    /// Rounded mean of the processing time, in milliseconds; zero until
    /// something is processed.
    pub avg_processing_time_ms: u64,
}

/// The health verdict reported by [`HealthCheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The client is connected.
    Healthy,
    /// The client is in any other state.
    Unhealthy,
}

/// A health report, suitable for serving from a health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// Healthy if and only if connected.
    pub status: HealthStatus,
    /// When this report was produced, in epoch milliseconds.
    pub timestamp: u64,
    /// Milliseconds since the client was constructed.
    pub uptime_ms: u64,
    /// Whether the client is connected.
    pub is_connected: bool,
    /// Deliveries in flight when this report was produced.
    pub pending_messages: usize,
    /// The headline counters.
    pub metrics: HealthMetrics,
}

/// The subset of [`MetricsSnapshot`] included in a [`HealthCheck`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthMetrics {
    /// See [`MetricsSnapshot::sent`].
    pub sent: u64,
    /// See [`MetricsSnapshot::received`].
    pub received: u64,
    /// See [`MetricsSnapshot::processed`].
    pub processed: u64,
    /// See [`MetricsSnapshot::errors`].
    pub errors: u64,
    /// See [`MetricsSnapshot::reconnections`].
    pub reconnections: u64,
    /// See [`MetricsSnapshot::avg_processing_time_ms`].
    pub avg_processing_time_ms: u64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconnections: AtomicU64::new(0),
            total_processing_time_ms: AtomicU64::new(0),
            last_reconnect_at: AtomicU64::new(0),
            started_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a processed delivery along with how long its handling took.
    pub(crate) fn record_processed(&self, elapsed: Duration) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a scheduled reconnect and stamps it with the current time.
    pub(crate) fn record_reconnection(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
        self.last_reconnect_at
            .store(now_epoch_ms().max(1), Ordering::Relaxed);
    }

    pub(crate) fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_processing_time_ms = self.total_processing_time_ms.load(Ordering::Relaxed);
        let last_reconnect_at = match self.last_reconnect_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        };

        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            processed,
            errors: self.errors.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            total_processing_time_ms,
            last_reconnect_at,
            start_time: epoch_ms(self.started_at),
            uptime_ms: duration_ms(self.uptime()),
            avg_processing_time_ms: average(total_processing_time_ms, processed),
        }
    }

    pub(crate) fn health_check(&self, is_connected: bool, pending_messages: usize) -> HealthCheck {
        let snapshot = self.snapshot();

        HealthCheck {
            status: if is_connected {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            timestamp: now_epoch_ms(),
            uptime_ms: snapshot.uptime_ms,
            is_connected,
            pending_messages,
            metrics: HealthMetrics {
                sent: snapshot.sent,
                received: snapshot.received,
                processed: snapshot.processed,
                errors: snapshot.errors,
                reconnections: snapshot.reconnections,
                avg_processing_time_ms: snapshot.avg_processing_time_ms,
            },
        }
    }
}

/// Divides and rounds half up, in integers.
fn average(total: u64, count: u64) -> u64 {
    if count == 0 {
        return 0;
    }

    total.saturating_add(count / 2) / count
}

pub(crate) fn now_epoch_ms() -> u64 {
    epoch_ms(SystemTime::now())
}

fn epoch_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or_default()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
