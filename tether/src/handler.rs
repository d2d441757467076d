use crate::{BoxError, DeliveryId, HandlerError, Payload, TIMESTAMP_FIELD};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Processes the decoded messages of a bound topic.
///
/// Returning an error (or panicking) rejects the delivery; returning `Ok`
/// acknowledges it. Handlers are awaited to completion and are never
/// cancelled by the client.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles a single message.
    async fn handle(&self, message: Message) -> Result<(), HandlerError>;
}

/// Implements [`Handler`] for any async closure whose error converts into a
/// [`BoxError`], which includes `String`, `&'static str`, and every standard
/// error type.
#[async_trait]
impl<F, Fut, E> Handler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), HandlerError> {
        (self)(message).await.map_err(HandlerError::new)
    }
}

/// A decoded inbound message, as handed to a [`Handler`].
#[derive(Debug, Clone)]
pub struct Message {
    topic: Arc<str>,
    id: DeliveryId,
    payload: Payload,
}

impl Message {
    pub(crate) fn new(topic: Arc<str>, id: DeliveryId, payload: Payload) -> Self {
        Self { topic, id, payload }
    }

    /// Reports the topic this message was received on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Reports the client-assigned identifier of the underlying delivery.
    pub fn id(&self) -> &DeliveryId {
        &self.id
    }

    /// Exposes the decoded payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes this message, returning the decoded payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Looks up a single payload field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Reports the send time stamped by the publishing side, in epoch
    /// milliseconds, if present and numeric.
    pub fn timestamp(&self) -> Option<u64> {
        self.payload.get(TIMESTAMP_FIELD).and_then(Value::as_u64)
    }

    /// Deserializes the payload into the given type.
    pub fn deserialize<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        T::deserialize(Value::Object(self.payload.clone()))
    }
}
