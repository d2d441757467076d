use crate::transport::{
    Channel, Connection, ConnectionEvent, Delivery, DeliveryCallback, EventListener, QueueOptions,
    SubscriptionTag, Transport, TransportError, TransportOperation,
};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{
    BasicProperties, Channel as LapinChannel, Connection as LapinConnection, ConnectionProperties,
};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// AMQP 0-9-1 reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// A [`Transport`] that speaks AMQP 0-9-1 (e.g., to RabbitMQ) through
/// `lapin`, on the current Tokio runtime.
///
/// Publishes go through the default exchange with the topic as the routing
/// key, so every topic maps onto the queue of the same name.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmqpTransport;

impl AmqpTransport {
    /// Creates a new AMQP transport.
    pub fn new() -> Self {
        Self
    }
}

struct AmqpConnection {
    connection: LapinConnection,
    listeners: Arc<SyncMutex<Vec<EventListener>>>,
}

struct AmqpChannel {
    channel: LapinChannel,
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Connection>, TransportError> {
        // Set up the connection properties to use the current Tokio context
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        let connection = LapinConnection::connect(address, properties)
            .await
            .map_err(|error| TransportError::new(TransportOperation::Connect, error))?;

        let listeners: Arc<SyncMutex<Vec<EventListener>>> = Arc::new(SyncMutex::new(Vec::new()));

        // A connection-level error is fatal to a lapin connection
        let notified = Arc::clone(&listeners);
        connection.on_error(move |error| {
            let message = error.to_string();
            for listener in notified.lock().iter() {
                listener(ConnectionEvent::Error(message.clone()));
                listener(ConnectionEvent::Closed);
            }
        });

        Ok(Arc::new(AmqpConnection {
            connection,
            listeners,
        }))
    }
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|error| TransportError::new(TransportOperation::OpenChannel, error))?;

        Ok(Arc::new(AmqpChannel { channel }))
    }

    fn on_event(&self, listener: EventListener) {
        self.listeners.lock().push(listener);
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connection
            .close(REPLY_SUCCESS, "Client shutdown")
            .await
            .map_err(|error| TransportError::new(TransportOperation::CloseConnection, error))
    }
}

impl AmqpChannel {
    /// Composes a consumer tag unique within the process.
    fn compose_consumer_tag(queue: &str) -> String {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        format!(
            "tether:{}:{}",
            queue,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<(), TransportError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable: options.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(|error| TransportError::new(TransportOperation::DeclareQueue, error))
    }

    async fn publish(&self, queue: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false, // this flag is not supported and ignored by RabbitMQ v3+
                },
                &bytes,
                BasicProperties::default(),
            )
            .await
            .map_err(|error| TransportError::new(TransportOperation::Publish, error))?;

        confirm
            .await
            .map(|_| ())
            .map_err(|error| TransportError::new(TransportOperation::Publish, error))
    }

    async fn subscribe(
        &self,
        queue: &str,
        callback: DeliveryCallback,
    ) -> Result<SubscriptionTag, TransportError> {
        let consumer_tag = Self::compose_consumer_tag(queue);

        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|error| TransportError::new(TransportOperation::Subscribe, error))?;

        let tag = SubscriptionTag::new(&consumer_tag);

        // Pump deliveries into the callback until the consumer goes away
        tokio::spawn(async move {
            while let Some(next) = consumer.next().await {
                match next {
                    Ok(delivery) => callback(Some(Delivery::new(delivery.delivery_tag, delivery.data))),
                    Err(error) => {
                        warn!(
                            consumer = consumer_tag.as_str(),
                            ?error,
                            error_message = %error,
                            "Stopped consuming after a RabbitMQ error",
                        );
                        break;
                    }
                }
            }

            debug!(consumer = consumer_tag.as_str(), "RabbitMQ consumer finished");
            callback(None);
        });

        Ok(tag)
    }

    async fn cancel(&self, tag: &SubscriptionTag) -> Result<(), TransportError> {
        self.channel
            .basic_cancel(tag.as_str(), BasicCancelOptions { nowait: false })
            .await
            .map_err(|error| TransportError::new(TransportOperation::Cancel, error))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.channel
            .basic_ack(delivery.tag(), BasicAckOptions { multiple: false })
            .await
            .map_err(|error| TransportError::new(TransportOperation::Ack, error))
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.channel
            .basic_reject(delivery.tag(), BasicRejectOptions { requeue: false })
            .await
            .map_err(|error| TransportError::new(TransportOperation::Reject, error))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.channel
            .close(REPLY_SUCCESS, "Client shutdown")
            .await
            .map_err(|error| TransportError::new(TransportOperation::CloseChannel, error))
    }
}
