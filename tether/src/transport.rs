use crate::BoxError;
use async_trait::async_trait;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use thiserror::Error;

/// Implements the contract over AMQP 0-9-1.
#[cfg(feature = "amqp")]
pub mod amqp;

/// Opens connections to a message broker.
///
/// The wire protocol lives entirely behind this trait and the [`Connection`]
/// and [`Channel`] traits it produces: the client never frames or encodes
/// protocol methods itself.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens a new connection to the broker at the given `address`.
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>, TransportError>;
}

/// A live connection to a broker, as produced by a [`Transport`].
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Opens a new [`Channel`] on this connection.
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError>;

    /// Registers a listener for asynchronous connection-level events. The
    /// listener may be invoked from any thread, at any time, including after
    /// [`close`](Connection::close).
    fn on_event(&self, listener: EventListener);

    /// Closes this connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// A channel multiplexed over a [`Connection`].
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Declares the named queue.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<(), TransportError>;

    /// Publishes the given bytes to the named queue.
    async fn publish(&self, queue: &str, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Starts consuming the named queue, invoking `callback` once per
    /// delivery. Returns a tag that identifies the subscription on this
    /// channel.
    async fn subscribe(
        &self,
        queue: &str,
        callback: DeliveryCallback,
    ) -> Result<SubscriptionTag, TransportError>;

    /// Stops the subscription identified by the given tag.
    async fn cancel(&self, tag: &SubscriptionTag) -> Result<(), TransportError>;

    /// Positively acknowledges the given delivery.
    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Rejects the given delivery without re-queueing it.
    async fn reject(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Closes this channel.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Connection-level events fired asynchronously by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is gone.
    Closed,
    /// Something went wrong on the connection; it may or may not survive.
    Error(String),
}

/// Receives [`ConnectionEvent`]s.
pub type EventListener = Box<dyn Fn(ConnectionEvent) + Send + Sync + 'static>;

/// Receives deliveries of a subscription. `None` is a broker-internal signal
/// (e.g., the consumer was cancelled) rather than a message.
pub type DeliveryCallback = Arc<dyn Fn(Option<Delivery>) + Send + Sync + 'static>;

/// Options for declaring a queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Whether the queue survives a broker restart.
    pub durable: bool,
}

impl QueueOptions {
    /// Options for the ephemeral work queues this client uses.
    pub const fn ephemeral() -> Self {
        Self { durable: false }
    }
}

/// Identifies a subscription on a particular [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionTag(Arc<str>);

impl SubscriptionTag {
    /// Wraps the given tag.
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(Arc::from(tag.as_ref()))
    }

    /// Exposes the tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriptionTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One inbound message instance, carrying the broker-assigned
/// acknowledgement tag and the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    tag: u64,
    bytes: Vec<u8>,
}

impl Delivery {
    /// Creates a delivery from its tag and payload.
    pub fn new(tag: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            bytes: bytes.into(),
        }
    }

    /// Exposes the broker-assigned delivery tag.
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Exposes the raw payload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Names the transport operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOperation {
    /// [`Transport::connect`]
    Connect,
    /// [`Connection::open_channel`]
    OpenChannel,
    /// [`Channel::declare_queue`]
    DeclareQueue,
    /// [`Channel::publish`]
    Publish,
    /// [`Channel::subscribe`]
    Subscribe,
    /// [`Channel::cancel`]
    Cancel,
    /// [`Channel::ack`]
    Ack,
    /// [`Channel::reject`]
    Reject,
    /// [`Channel::close`]
    CloseChannel,
    /// [`Connection::close`]
    CloseConnection,
    /// No channel was available to carry the operation.
    AcquireChannel,
}

impl TransportOperation {
    /// Reports a short, stable name for logging.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::OpenChannel => "open_channel",
            Self::DeclareQueue => "declare_queue",
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Cancel => "cancel",
            Self::Ack => "ack",
            Self::Reject => "reject",
            Self::CloseChannel => "close_channel",
            Self::CloseConnection => "close_connection",
            Self::AcquireChannel => "acquire_channel",
        }
    }
}

impl Display for TransportOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a failed transport call.
#[derive(Error)]
#[error("transport operation '{operation}' failed: {source}")]
pub struct TransportError {
    operation: TransportOperation,
    source: BoxError,
}

impl TransportError {
    /// Creates an error for the given failed operation.
    pub fn new(operation: TransportOperation, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }

    /// Reports which operation failed.
    pub fn operation(&self) -> TransportOperation {
        self.operation
    }
}

impl Debug for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportError")
            .field("operation", &self.operation)
            .field("source", &self.source.to_string())
            .finish()
    }
}
