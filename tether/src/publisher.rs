use crate::ClientError;
use crate::codec;
use crate::connector::Connector;
use crate::context::Context;
use crate::metrics::now_epoch_ms;
use crate::transport::{QueueOptions, TransportError, TransportOperation};
use serde::Serialize;
use std::sync::Arc;
use tether_util::{PublishRetryPolicy, publish_retry_delay};
use tracing::{debug, error, warn};

/// Publishes messages to topics, retrying failed attempts with the publish
/// retry backoff (1s, 2s, 4s, ...).
pub(crate) struct Publisher {
    context: Arc<Context>,
    policy: PublishRetryPolicy,
}

impl Publisher {
    pub(crate) fn new(context: Arc<Context>, policy: PublishRetryPolicy) -> Self {
        Self { context, policy }
    }

    /// Stamps, serializes, and publishes the given data to the given topic.
    ///
    /// Fails right away if the client is not connected. Every failed attempt
    /// counts as one error. Each attempt grabs the channel afresh, so a
    /// reconnect that happens during the backoff redirects the next attempt
    /// to the new channel.
    pub(crate) async fn send<T>(
        &self,
        connector: &Connector,
        topic: &str,
        data: &T,
    ) -> Result<(), ClientError>
    where
        T: Serialize + ?Sized,
    {
        if !connector.state().is_connected() {
            return Err(ClientError::NotConnected);
        }

        let bytes = codec::encode(data, now_epoch_ms())?;
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            let result = self.try_send(connector, topic, &bytes).await;
            attempt += 1;

            let error = match result {
                Ok(()) => {
                    self.context.metrics.record_sent();
                    debug!(
                        client = self.context.name.as_ref(),
                        topic,
                        attempt,
                        "Published a message",
                    );
                    return Ok(());
                }
                Err(error) => error,
            };

            self.context.metrics.record_error();

            if attempt >= max_attempts {
                error!(
                    client = self.context.name.as_ref(),
                    topic,
                    attempts = attempt,
                    ?error,
                    error_message = %error,
                    byte_preview = String::from_utf8_lossy(&bytes).as_ref(),
                    "Failed to publish a message; giving up",
                );
                return Err(ClientError::PublishExhausted {
                    topic: topic.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = publish_retry_delay(attempt - 1);
            warn!(
                client = self.context.name.as_ref(),
                topic,
                attempt,
                delay = ?delay,
                ?error,
                error_message = %error,
                "Failed to publish a message; retrying",
            );
            tokio::time::sleep(delay).await;

            if connector.is_shutting_down() {
                return Err(ClientError::ShuttingDown);
            }
        }
    }

    /// Makes a single publish attempt on the current channel.
    async fn try_send(
        &self,
        connector: &Connector,
        topic: &str,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        let channel = connector.channel().ok_or_else(|| {
            TransportError::new(TransportOperation::AcquireChannel, "no channel is open")
        })?;

        channel
            .declare_queue(topic, QueueOptions::ephemeral())
            .await?;
        channel.publish(topic, bytes.to_vec()).await
    }
}
