use crate::connector::Connector;
use crate::context::Context;
use crate::publisher::Publisher;
use crate::registry::Registry;
use crate::transport::Transport;
use crate::{
    ClientConfig, ClientError, ClientEvent, ConnectionState, Handler, HealthCheck,
    MetricsSnapshot, ShutdownOutcome,
};
use serde::Serialize;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// A resilient client over a message broker.
///
/// Maintains a single logical connection and channel, over which any number
/// of topics are published to and consumed from. When the connection is
/// lost, the client reconnects with exponential backoff and re-subscribes
/// every bound topic on the new channel.
///
/// Cheap to clone: every clone drives the same connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    context: Arc<Context>,
    connector: Arc<Connector>,
    registry: Arc<Registry>,
    publisher: Publisher,
    drain_interval: Duration,
}

impl Client {
    /// Creates a client that connects through the given [`Transport`].
    ///
    /// Nothing is connected until [`start`](Client::start) is called, unless
    /// the config asks for [`auto_start`](ClientConfig::auto_start), in which
    /// case `start` is spawned onto the current Tokio runtime.
    pub fn new(config: ClientConfig, transport: impl Transport) -> Self {
        let client = Self::build(config.clone(), Arc::new(transport));

        if config.auto_start() {
            match RuntimeHandle::try_current() {
                Ok(runtime) => {
                    let starting = client.clone();
                    runtime.spawn(async move {
                        // Errors are reported inside
                        let _ = starting.start().await;
                    });
                }
                Err(error) => warn!(
                    client = config.name(),
                    ?error,
                    error_message = %error,
                    "Cannot auto-start the client outside of a Tokio runtime",
                ),
            }
        }

        client
    }

    /// Creates a client and [starts](Client::start) it right away.
    pub async fn connect(
        config: ClientConfig,
        transport: impl Transport,
    ) -> Result<Self, ClientError> {
        let client = Self::build(config, Arc::new(transport));

        client.start().await?;

        Ok(client)
    }

    /// Creates a client that connects over AMQP 0-9-1.
    #[cfg(feature = "amqp")]
    pub fn amqp(config: ClientConfig) -> Self {
        Self::new(config, crate::AmqpTransport::new())
    }

    fn build(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let context = Arc::new(Context::new(
            config.name_arc(),
            config.endpoint().identifier_arc(),
        ));
        let registry = Arc::new(Registry::new(Arc::clone(&context)));
        let connector = Arc::new(Connector::new(
            Arc::clone(&context),
            transport,
            config.endpoint().address().clone(),
            *config.reconnect(),
            Arc::clone(&registry),
        ));
        let publisher = Publisher::new(Arc::clone(&context), *config.publish());

        Self {
            inner: Arc::new(Inner {
                context,
                connector,
                registry,
                publisher,
                drain_interval: config.drain_interval(),
            }),
        }
    }
}

impl Client {
    /// Connects to the broker and subscribes every bound topic.
    ///
    /// A logged no-op while connecting, connected, or shutting down. If the
    /// connect fails and reconnecting is enabled, a reconnect is scheduled in
    /// the background and this returns `Ok`; watch
    /// [`state`](Client::state) or [`events`](Client::events) to learn when
    /// the client is connected.
    pub async fn start(&self) -> Result<(), ClientError> {
        self.inner.connector.start().await
    }

    /// Binds the given handler to the given topic, replacing the topic's
    /// previous handler, if any.
    ///
    /// When connected, the topic is subscribed right away. Otherwise, the
    /// binding waits for the next connect. If subscribing fails, the
    /// connection is dropped and re-established, as if it were lost.
    pub async fn bind<H>(&self, topic: impl AsRef<str>, handler: H)
    where
        H: Handler,
    {
        let connector = &self.inner.connector;

        let failed = self
            .inner
            .registry
            .bind(topic.as_ref(), Arc::new(handler), || connector.current())
            .await;

        if let Some(generation) = failed {
            connector.recover(generation).await;
        }
    }

    /// Publishes the given data to the given topic.
    ///
    /// The data must serialize into an object; a `timestamp` field holding
    /// the send time in epoch milliseconds is added to it. Failed attempts
    /// are retried according to the publish retry policy.
    pub async fn send<T>(&self, topic: impl AsRef<str>, data: &T) -> Result<(), ClientError>
    where
        T: Serialize + ?Sized,
    {
        self.inner
            .publisher
            .send(&self.inner.connector, topic.as_ref(), data)
            .await
    }

    /// Shuts down after waiting up to `timeout` for the in-flight deliveries
    /// to finish, then closes the channel and the connection.
    ///
    /// In-flight handlers are not cancelled: the timeout only bounds the
    /// waiting. Calls after the first (or after [`close`](Client::close))
    /// return right away with nothing left pending.
    pub async fn graceful_shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        let context = &self.inner.context;

        if !self.inner.connector.begin_shutdown().await {
            debug!(
                client = context.name.as_ref(),
                "Ignored a repeated shutdown request",
            );
            return ShutdownOutcome::drained();
        }

        info!(
            client = context.name.as_ref(),
            identifier = context.identifier.as_ref(),
            timeout = ?timeout,
            pending = context.tracker.len(),
            "Shutting down gracefully",
        );

        let pending = context
            .tracker
            .drain(timeout, self.inner.drain_interval)
            .await;

        let outcome = if pending == 0 {
            ShutdownOutcome::drained()
        } else {
            warn!(
                client = context.name.as_ref(),
                identifier = context.identifier.as_ref(),
                timeout = ?timeout,
                pending,
                "Timed out waiting for in-flight messages; shutting down anyway",
            );
            context.emit(ClientEvent::DrainTimedOut { pending });
            ShutdownOutcome::timed_out(pending)
        };

        self.finish_shutdown().await;

        outcome
    }

    /// Shuts down immediately, without waiting for in-flight deliveries.
    /// Idempotent.
    pub async fn close(&self) {
        if !self.inner.connector.begin_shutdown().await {
            return;
        }

        info!(
            client = self.inner.context.name.as_ref(),
            identifier = self.inner.context.identifier.as_ref(),
            pending = self.inner.context.tracker.len(),
            "Closing",
        );

        self.finish_shutdown().await;
    }

    async fn finish_shutdown(&self) {
        self.inner.connector.teardown().await;

        info!(
            client = self.inner.context.name.as_ref(),
            identifier = self.inner.context.identifier.as_ref(),
            "Shut down",
        );
        self.inner.context.emit(ClientEvent::ShutDown);
    }
}

impl Client {
    /// Reports the client name.
    pub fn name(&self) -> &str {
        &self.inner.context.name
    }

    /// Reports the password-free broker identifier.
    pub fn identifier(&self) -> &str {
        &self.inner.context.identifier
    }

    /// Reports the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.connector.state()
    }

    /// Subscribes to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connector.watch_state()
    }

    /// Subscribes to lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.context.subscribe()
    }

    /// Captures the current metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.context.metrics.snapshot()
    }

    /// Produces a health report: healthy if and only if connected.
    pub fn health_check(&self) -> HealthCheck {
        self.inner
            .context
            .metrics
            .health_check(self.state().is_connected(), self.pending_messages())
    }

    /// Reports how many deliveries are in flight.
    pub fn pending_messages(&self) -> usize {
        self.inner.context.tracker.len()
    }
}

impl Debug for Client {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name())
            .field("identifier", &self.identifier())
            .field("state", &self.state())
            .finish()
    }
}
