#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes the client façade.
mod client;
pub use self::client::Client;

/// Exposes the client configuration.
mod config;
pub use self::config::{ClientConfig, ClientConfigBuilder, Endpoint, EndpointChunks};

/// Exposes the error taxonomy.
mod error;
pub use self::error::{BoxError, ClientError, CodecError, ConfigurationError, HandlerError};

/// Exposes the lifecycle events and shutdown outcome.
mod event;
pub use self::event::{ClientEvent, ShutdownOutcome};

/// Exposes the consumer handler contract.
mod handler;
pub use self::handler::{Handler, Message};

/// Exposes the wire payload format.
mod codec;
pub use self::codec::{Payload, TIMESTAMP_FIELD};

/// Exposes the connection states.
mod state;
pub use self::state::ConnectionState;

/// Exposes the metrics snapshot and health report.
mod metrics;
pub use self::metrics::{HealthCheck, HealthMetrics, HealthStatus, MetricsSnapshot};

/// Exposes the in-flight delivery identifiers.
mod tracker;
pub use self::tracker::DeliveryId;

/// The contract between the client and a message broker protocol
/// implementation.
pub mod transport;
#[cfg(feature = "amqp")]
pub use self::transport::amqp::AmqpTransport;

// Internal machinery
mod connector;
mod context;
mod dispatch;
mod publisher;
mod registry;

// Re-export policies as they are part of this crate’s API.
pub use tether_util::{PublishRetryPolicy, ReconnectPolicy};
