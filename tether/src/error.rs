use crate::transport::TransportError;
use std::error::Error as StdError;
use tether_util::PolicyError;
use thiserror::Error;

/// Shorthand for a boxed, thread-safe error.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents the failure of a caller-invoked [`Client`](crate::Client)
/// operation.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The client was constructed from invalid arguments.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The operation requires an established connection.
    #[error("not connected to the message broker")]
    NotConnected,

    /// The client began shutting down while the operation was in progress.
    #[error("the client is shutting down")]
    ShuttingDown,

    /// A transport call failed and was not retried.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Every publish attempt failed; carries the last transport error.
    #[error("failed to publish to topic '{topic}' after {attempts} attempt(s): {source}")]
    PublishExhausted {
        /// The topic the message was addressed to.
        topic: String,
        /// How many attempts were made.
        attempts: u32,
        /// The error of the last attempt.
        #[source]
        source: TransportError,
    },

    /// The outgoing data could not be serialized into the wire format.
    #[error(transparent)]
    Encode(#[from] CodecError),

    /// The connection was lost and every scheduled reconnect failed.
    #[error("gave up reconnecting to the message broker after {attempts} attempt(s)")]
    ReconnectExhausted {
        /// How many reconnects were attempted.
        attempts: u32,
    },
}

/// Represents invalid construction arguments. Never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// The client name is blank.
    #[error("invalid client configuration: expected a non-empty name")]
    EmptyName,

    /// The broker address could not be composed.
    #[error("invalid client configuration '{client}': expected a non-empty {field}")]
    EmptyEndpointField {
        /// Client name
        client: String,
        /// The offending field
        field: &'static str,
    },

    /// The broker port is zero.
    #[error("invalid client configuration '{client}': expected a non-zero port")]
    ZeroPort {
        /// Client name
        client: String,
    },

    /// The broker URL does not use an AMQP scheme.
    #[error("invalid client configuration '{client}': expected an amqp:// or amqps:// URL")]
    UnsupportedScheme {
        /// Client name
        client: String,
    },

    /// The drain poll interval is zero.
    #[error("invalid client configuration '{client}': expected a non-zero drain interval")]
    ZeroDrainInterval {
        /// Client name
        client: String,
    },

    /// A retry policy is unusable.
    #[error("invalid client configuration '{client}': {error}")]
    Policy {
        /// Client name
        client: String,
        /// The policy error
        error: PolicyError,
    },
}

/// Represents a failure to encode or decode the wire payload.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The bytes are not a valid serialized value.
    #[error("failed to parse the message payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The value is valid but is not an object of string-keyed fields.
    #[error("expected the message payload to be an object, found {found}")]
    NotAnObject {
        /// The kind of value that was found instead.
        found: &'static str,
    },
}

/// Represents a failure reported by a consumer [`Handler`](crate::Handler).
///
/// Contained to the single delivery it occurred on: the delivery is rejected
/// and counted, and the error goes no further.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct HandlerError {
    source: BoxError,
}

impl HandlerError {
    /// Wraps the given error.
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Creates a handler error from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "handler panicked".to_string()
        };

        Self::new(format!("handler panicked: {message}"))
    }
}
