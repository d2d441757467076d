use crate::context::Context;
use crate::registry::{CurrentChannel, Registry};
use crate::transport::{Channel, Connection, ConnectionEvent, Transport, TransportError};
use crate::{ClientError, ClientEvent, ConnectionState};
use parking_lot::RwLock;
use secure_string::SecureString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tether_util::ReconnectPolicy;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::select;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owns the connection lifecycle of one client: drives connect attempts,
/// schedules reconnects with backoff, and holds the current connection and
/// channel.
///
/// Every state transition happens while holding the `lifecycle` lock, which
/// is never held across a transport call. Work that completes after the lock
/// was released (a connect attempt, a connection event) re-takes the lock
/// and checks the connect generation before acting, so stale work is
/// discarded instead of overwriting newer state.
///
/// A connect only counts as successful once every bound topic is subscribed
/// on the new channel. Until then the reconnect counter is not reset, and a
/// failed subscription drops the connection and schedules a reconnect.
pub(crate) struct Connector {
    context: Arc<Context>,
    transport: Arc<dyn Transport>,
    address: SecureString,
    policy: ReconnectPolicy,
    registry: Arc<Registry>,
    lifecycle: AsyncMutex<Lifecycle>,
    state: watch::Sender<ConnectionState>,
    resources: RwLock<Option<Resources>>,
    shutting_down: AtomicBool,
}

struct Lifecycle {
    /// Consecutive reconnects scheduled since the last successful connect.
    attempts: u32,
    /// Cancels the reconnect timer, if one is pending.
    pending: Option<CancellationToken>,
    /// Bumped on every connect attempt.
    generation: u64,
}

struct Resources {
    generation: u64,
    connection: Arc<dyn Connection>,
    channel: Arc<dyn Channel>,
}

impl Connector {
    pub(crate) fn new(
        context: Arc<Context>,
        transport: Arc<dyn Transport>,
        address: SecureString,
        policy: ReconnectPolicy,
        registry: Arc<Registry>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            context,
            transport,
            address,
            policy,
            registry,
            lifecycle: AsyncMutex::new(Lifecycle {
                attempts: 0,
                pending: None,
                generation: 0,
            }),
            state,
            resources: RwLock::new(None),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Exposes the current channel, if connected. Always read fresh: the
    /// channel changes on reconnect.
    pub(crate) fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.resources
            .read()
            .as_ref()
            .map(|resources| Arc::clone(&resources.channel))
    }

    pub(crate) fn current(&self) -> CurrentChannel {
        self.resources
            .read()
            .as_ref()
            .map(|resources| (resources.generation, Arc::clone(&resources.channel)))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

impl Connector {
    /// Connects, unless already connected, connecting, or shutting down (in
    /// which case this is a logged no-op).
    ///
    /// Returns `Ok` once connected, and also when the connect failed but a
    /// reconnect was scheduled. Returns the failure when reconnecting is
    /// disabled, when the reconnects are exhausted, or when shutdown began
    /// during the attempt.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<(), ClientError> {
        let generation = {
            let mut lifecycle = self.lifecycle.lock().await;
            let state = self.state();

            if self.is_shutting_down() || state != ConnectionState::Disconnected {
                warn!(
                    client = self.context.name.as_ref(),
                    identifier = self.context.identifier.as_ref(),
                    state = %state,
                    "Ignored a request to start the client",
                );
                return Ok(());
            }

            // A start supersedes whatever reconnect was still waiting
            if let Some(pending) = lifecycle.pending.take() {
                pending.cancel();
            }

            lifecycle.generation += 1;
            self.set_state(ConnectionState::Connecting);

            info!(
                client = self.context.name.as_ref(),
                identifier = self.context.identifier.as_ref(),
                attempt = lifecycle.attempts,
                "Connecting to the message broker",
            );

            lifecycle.generation
        };

        let result = self.open().await;

        let mut lifecycle = self.lifecycle.lock().await;

        if self.is_shutting_down() {
            drop(lifecycle);
            if let Ok((connection, channel)) = result {
                Self::discard(&self.context, connection, channel).await;
            }
            return Err(ClientError::ShuttingDown);
        }

        match result {
            Ok((connection, channel)) => {
                self.listen(generation, connection.as_ref());

                *self.resources.write() = Some(Resources {
                    generation,
                    connection,
                    channel: Arc::clone(&channel),
                });
                self.set_state(ConnectionState::Connected);
                drop(lifecycle);

                info!(
                    client = self.context.name.as_ref(),
                    identifier = self.context.identifier.as_ref(),
                    generation,
                    "Connected to the message broker",
                );
                self.context.emit(ClientEvent::Connected);

                if self.registry.resubscribe_all(generation, &channel).await {
                    self.settle(generation).await;
                } else {
                    self.recover(generation).await;
                }

                Ok(())
            }
            Err(error) => {
                self.set_state(ConnectionState::Disconnected);
                self.context.metrics.record_error();

                warn!(
                    client = self.context.name.as_ref(),
                    identifier = self.context.identifier.as_ref(),
                    ?error,
                    error_message = %error,
                    "Failed to connect to the message broker",
                );

                if !self.policy.enabled() {
                    return Err(ClientError::Transport(error));
                }

                self.schedule_reconnect(&mut lifecycle)
            }
        }
    }

    /// Opens a connection and a channel on it.
    async fn open(&self) -> Result<(Arc<dyn Connection>, Arc<dyn Channel>), TransportError> {
        let connection = self.transport.connect(self.address.unsecure()).await?;

        match connection.open_channel().await {
            Ok(channel) => Ok((connection, channel)),
            Err(error) => {
                if let Err(close_error) = connection.close().await {
                    debug!(
                        client = self.context.name.as_ref(),
                        ?close_error,
                        "Failed to close a connection without a channel",
                    );
                }
                Err(error)
            }
        }
    }

    /// Wires the connection's asynchronous events back into this connector.
    /// Only a weak reference is handed out: the connection must not keep
    /// its own manager alive.
    fn listen(self: &Arc<Self>, generation: u64, connection: &dyn Connection) {
        let connector = Arc::downgrade(self);
        let runtime = RuntimeHandle::current();

        connection.on_event(Box::new(move |event| {
            let connector: Weak<Self> = Weak::clone(&connector);
            runtime.spawn(async move {
                if let Some(connector) = connector.upgrade() {
                    connector.handle_event(generation, event).await;
                }
            });
        }));
    }

    async fn handle_event(self: &Arc<Self>, generation: u64, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Error(message) => {
                // The close of a connection may be handled first, so only a
                // newer connect attempt makes an error stale
                if self.lifecycle.lock().await.generation != generation {
                    debug!(
                        client = self.context.name.as_ref(),
                        generation,
                        error_message = message.as_str(),
                        "Ignored an error of a previous connection",
                    );
                    return;
                }

                self.context.metrics.record_error();
                warn!(
                    client = self.context.name.as_ref(),
                    identifier = self.context.identifier.as_ref(),
                    generation,
                    error_message = message.as_str(),
                    "The message broker connection reported an error",
                );
                self.context.emit(ClientEvent::TransportError { message });
            }
            ConnectionEvent::Closed => self.handle_closed(generation).await,
        }
    }

    async fn handle_closed(self: &Arc<Self>, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;

        if self.is_shutting_down() {
            debug!(
                client = self.context.name.as_ref(),
                generation,
                "Ignored a connection close during shutdown",
            );
            return;
        }

        if !self.is_current(generation) {
            debug!(
                client = self.context.name.as_ref(),
                generation,
                "Ignored a close of a previous connection",
            );
            return;
        }

        self.resources.write().take();
        self.set_state(ConnectionState::Disconnected);

        warn!(
            client = self.context.name.as_ref(),
            identifier = self.context.identifier.as_ref(),
            generation,
            "Lost the message broker connection",
        );
        self.context.emit(ClientEvent::Disconnected);

        if self.policy.enabled() {
            let _ = self.schedule_reconnect(&mut lifecycle);
        }
    }

    /// Reports whether the given generation holds the established connection.
    fn is_current(&self, generation: u64) -> bool {
        self.state() == ConnectionState::Connected
            && self
                .resources
                .read()
                .as_ref()
                .is_some_and(|resources| resources.generation == generation)
    }

    /// Resets the reconnect counter, unless a newer connect attempt began in
    /// the meantime.
    async fn settle(&self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;

        if lifecycle.generation == generation {
            lifecycle.attempts = 0;
        }
    }

    /// Gives up on the established connection of the given generation and
    /// schedules a reconnect, so that every bound topic gets subscribed
    /// again. A no-op if that connection is no longer current, or during
    /// shutdown.
    pub(crate) async fn recover(self: &Arc<Self>, generation: u64) {
        let resources = {
            let mut lifecycle = self.lifecycle.lock().await;

            if self.is_shutting_down() || !self.is_current(generation) {
                return;
            }

            let resources = self.resources.write().take();
            self.set_state(ConnectionState::Disconnected);

            warn!(
                client = self.context.name.as_ref(),
                identifier = self.context.identifier.as_ref(),
                generation,
                "Dropping the message broker connection to re-establish subscriptions",
            );
            self.context.emit(ClientEvent::Disconnected);

            if self.policy.enabled() {
                // Exhaustion is reported inside
                let _ = self.schedule_reconnect(&mut lifecycle);
            }

            resources
        };

        if let Some(resources) = resources {
            Self::discard(&self.context, resources.connection, resources.channel).await;
        }
    }

    /// Schedules a reconnect after the backoff delay of the next attempt,
    /// unless one is pending already. When every permitted attempt has been
    /// used up, reports that instead and schedules nothing.
    fn schedule_reconnect(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> Result<(), ClientError> {
        if lifecycle.pending.is_some() {
            debug!(
                client = self.context.name.as_ref(),
                "A reconnect is already scheduled",
            );
            return Ok(());
        }

        if lifecycle.attempts >= self.policy.max_attempts() {
            error!(
                alert = true,
                client = self.context.name.as_ref(),
                identifier = self.context.identifier.as_ref(),
                attempts = lifecycle.attempts,
                "Gave up reconnecting to the message broker",
            );
            self.context.emit(ClientEvent::ReconnectExhausted {
                attempts: lifecycle.attempts,
            });

            return Err(ClientError::ReconnectExhausted {
                attempts: lifecycle.attempts,
            });
        }

        lifecycle.attempts += 1;
        self.context.metrics.record_reconnection();

        let attempt = lifecycle.attempts;
        let delay = self.policy.delay(attempt);
        let token = CancellationToken::new();
        lifecycle.pending = Some(token.clone());

        let connector = Arc::clone(self);
        tokio::spawn(async move {
            select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // Errors are reported inside
                    let _ = connector.start().await;
                }
            }
        });

        info!(
            client = self.context.name.as_ref(),
            identifier = self.context.identifier.as_ref(),
            attempt,
            delay = ?delay,
            "Scheduled a reconnect to the message broker",
        );
        self.context
            .emit(ClientEvent::ReconnectScheduled { attempt, delay });

        Ok(())
    }
}

impl Connector {
    /// Marks the beginning of shutdown: no reconnect is scheduled or run from
    /// here on. Reports `false` if shutdown had begun already.
    pub(crate) async fn begin_shutdown(&self) -> bool {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(pending) = lifecycle.pending.take() {
            pending.cancel();
            debug!(
                client = self.context.name.as_ref(),
                "Cancelled the scheduled reconnect",
            );
        }
        self.set_state(ConnectionState::ShuttingDown);

        true
    }

    /// Closes the current channel and connection, if any, and settles in the
    /// disconnected state. Close failures are only reported.
    pub(crate) async fn teardown(&self) {
        let resources = {
            let _lifecycle = self.lifecycle.lock().await;
            self.resources.write().take()
        };

        if let Some(resources) = resources {
            Self::discard(&self.context, resources.connection, resources.channel).await;
        }

        self.set_state(ConnectionState::Disconnected);
    }

    async fn discard(context: &Context, connection: Arc<dyn Connection>, channel: Arc<dyn Channel>) {
        if let Err(error) = channel.close().await {
            error!(
                client = context.name.as_ref(),
                identifier = context.identifier.as_ref(),
                ?error,
                error_message = %error,
                "Failed to close the message broker channel",
            );
        }

        match connection.close().await {
            Ok(()) => info!(
                client = context.name.as_ref(),
                identifier = context.identifier.as_ref(),
                "Closed the message broker connection",
            ),
            Err(error) => error!(
                client = context.name.as_ref(),
                identifier = context.identifier.as_ref(),
                ?error,
                error_message = %error,
                "Failed to close the message broker connection",
            ),
        }
    }
}
