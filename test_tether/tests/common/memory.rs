use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tether::transport::{
    Channel, Connection, ConnectionEvent, Delivery, DeliveryCallback, EventListener, QueueOptions,
    SubscriptionTag, Transport, TransportError, TransportOperation,
};

/// An in-process stand-in for a message broker.
///
/// Records every call made through it and can be scripted to fail a given
/// number of upcoming calls of any kind. Published messages are routed to a
/// subscriber of the same queue, if there is one, which makes round trips
/// possible without a real broker.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    broker: Arc<Broker>,
}

#[derive(Default)]
struct Broker {
    state: Mutex<BrokerState>,
    next_tag: AtomicU64,
}

#[derive(Default)]
struct BrokerState {
    failures: HashMap<TransportOperation, usize>,
    connect_attempts: usize,
    connections: Vec<Arc<MemoryConnection>>,
    declared: Vec<(String, QueueOptions)>,
    published: Vec<(String, Vec<u8>)>,
    subscribed: Vec<String>,
    cancelled: Vec<String>,
    acks: Vec<u64>,
    rejects: Vec<u64>,
}

struct MemoryConnection {
    broker: Arc<Broker>,
    listeners: Mutex<Vec<EventListener>>,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
    closed: AtomicBool,
}

struct MemoryChannel {
    broker: Arc<Broker>,
    subscriptions: Mutex<Vec<(SubscriptionTag, String, DeliveryCallback)>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls of the given operation fail.
    pub fn fail_next(&self, operation: TransportOperation, count: usize) {
        *self
            .broker
            .state
            .lock()
            .failures
            .entry(operation)
            .or_default() += count;
    }

    pub fn connect_attempts(&self) -> usize {
        self.broker.state.lock().connect_attempts
    }

    pub fn connection_count(&self) -> usize {
        self.broker.state.lock().connections.len()
    }

    /// Counts the live subscriptions to the given queue on open channels.
    pub fn active_subscriptions(&self, queue: &str) -> usize {
        self.open_channels()
            .iter()
            .map(|channel| {
                channel
                    .subscriptions
                    .lock()
                    .iter()
                    .filter(|(_, subscribed, _)| subscribed == queue)
                    .count()
            })
            .sum()
    }

    /// Lists every queue subscribed to, in order, including replaced ones.
    pub fn subscribed(&self) -> Vec<String> {
        self.broker.state.lock().subscribed.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.broker.state.lock().cancelled.clone()
    }

    pub fn declared(&self) -> Vec<(String, QueueOptions)> {
        self.broker.state.lock().declared.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.broker.state.lock().published.clone()
    }

    pub fn acks(&self) -> Vec<u64> {
        self.broker.state.lock().acks.clone()
    }

    pub fn rejects(&self) -> Vec<u64> {
        self.broker.state.lock().rejects.clone()
    }

    /// Hands the given bytes to a subscriber of the given queue. Returns the
    /// delivery tag, or `None` if nobody is subscribed.
    pub fn deliver(&self, queue: &str, bytes: impl Into<Vec<u8>>) -> Option<u64> {
        let callback = self.find_callback(queue)?;
        let tag = self.broker.next_tag.fetch_add(1, Ordering::Relaxed) + 1;

        callback(Some(Delivery::new(tag, bytes)));

        Some(tag)
    }

    /// Sends the broker-internal empty signal to a subscriber of the given
    /// queue.
    pub fn deliver_empty(&self, queue: &str) -> bool {
        match self.find_callback(queue) {
            Some(callback) => {
                callback(None);
                true
            }
            None => false,
        }
    }

    /// Kills the latest connection: its channels close and its listeners
    /// hear about it.
    pub fn drop_connection(&self) {
        if let Some(connection) = self.latest_connection() {
            connection.kill();
            connection.notify(ConnectionEvent::Closed);
        }
    }

    /// Reports a non-fatal error on the latest connection.
    pub fn raise_error(&self, message: &str) {
        if let Some(connection) = self.latest_connection() {
            connection.notify(ConnectionEvent::Error(message.to_string()));
        }
    }

    /// Reports a non-fatal error on the connection opened `index`-th, counted
    /// from zero.
    pub fn raise_error_on(&self, index: usize, message: &str) {
        let connection = self.broker.state.lock().connections.get(index).cloned();

        if let Some(connection) = connection {
            connection.notify(ConnectionEvent::Error(message.to_string()));
        }
    }

    /// Reports whether the latest connection and its channels were closed.
    pub fn latest_closed(&self) -> (bool, bool) {
        match self.latest_connection() {
            Some(connection) => {
                let channels_closed = connection
                    .channels
                    .lock()
                    .iter()
                    .all(|channel| channel.closed.load(Ordering::Acquire));
                (channels_closed, connection.closed.load(Ordering::Acquire))
            }
            None => (false, false),
        }
    }

    fn latest_connection(&self) -> Option<Arc<MemoryConnection>> {
        self.broker.state.lock().connections.last().cloned()
    }

    fn open_channels(&self) -> Vec<Arc<MemoryChannel>> {
        let connections = self.broker.state.lock().connections.clone();

        connections
            .iter()
            .filter(|connection| !connection.closed.load(Ordering::Acquire))
            .flat_map(|connection| connection.channels.lock().clone())
            .filter(|channel| !channel.closed.load(Ordering::Acquire))
            .collect()
    }

    fn find_callback(&self, queue: &str) -> Option<DeliveryCallback> {
        self.broker.find_callback_among(&self.open_channels(), queue)
    }
}

impl Broker {
    /// Consumes one scripted failure of the given operation, if any.
    fn check(&self, operation: TransportOperation) -> Result<(), TransportError> {
        let mut state = self.state.lock();

        match state.failures.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(TransportError::new(operation, "scripted failure"))
            }
            _ => Ok(()),
        }
    }

    fn find_callback_among(
        &self,
        channels: &[Arc<MemoryChannel>],
        queue: &str,
    ) -> Option<DeliveryCallback> {
        channels.iter().find_map(|channel| {
            channel
                .subscriptions
                .lock()
                .iter()
                .find(|(_, subscribed, _)| subscribed == queue)
                .map(|(_, _, callback)| Arc::clone(callback))
        })
    }
}

impl MemoryConnection {
    fn kill(&self) {
        self.closed.store(true, Ordering::Release);
        for channel in self.channels.lock().iter() {
            channel.closed.store(true, Ordering::Release);
        }
    }

    fn notify(&self, event: ConnectionEvent) {
        for listener in self.listeners.lock().iter() {
            listener(event.clone());
        }
    }
}

impl MemoryChannel {
    fn ensure_open(&self, operation: TransportOperation) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::new(operation, "channel is closed"));
        }

        self.broker.check(operation)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, _address: &str) -> Result<Arc<dyn Connection>, TransportError> {
        self.broker.state.lock().connect_attempts += 1;
        self.broker.check(TransportOperation::Connect)?;

        let connection = Arc::new(MemoryConnection {
            broker: Arc::clone(&self.broker),
            listeners: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.broker
            .state
            .lock()
            .connections
            .push(Arc::clone(&connection));

        Ok(connection)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn Channel>, TransportError> {
        self.broker.check(TransportOperation::OpenChannel)?;

        let channel = Arc::new(MemoryChannel {
            broker: Arc::clone(&self.broker),
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.channels.lock().push(Arc::clone(&channel));

        Ok(channel)
    }

    fn on_event(&self, listener: EventListener) {
        self.listeners.lock().push(listener);
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.broker.check(TransportOperation::CloseConnection)?;
        self.kill();

        Ok(())
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<(), TransportError> {
        self.ensure_open(TransportOperation::DeclareQueue)?;
        self.broker
            .state
            .lock()
            .declared
            .push((name.to_string(), options));

        Ok(())
    }

    async fn publish(&self, queue: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open(TransportOperation::Publish)?;
        self.broker
            .state
            .lock()
            .published
            .push((queue.to_string(), bytes.clone()));

        let callback = {
            let subscriptions = self.subscriptions.lock();
            subscriptions
                .iter()
                .find(|(_, subscribed, _)| subscribed == queue)
                .map(|(_, _, callback)| Arc::clone(callback))
        };
        if let Some(callback) = callback {
            let tag = self.broker.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
            callback(Some(Delivery::new(tag, bytes)));
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        callback: DeliveryCallback,
    ) -> Result<SubscriptionTag, TransportError> {
        self.ensure_open(TransportOperation::Subscribe)?;

        let tag = {
            let mut state = self.broker.state.lock();
            state.subscribed.push(queue.to_string());
            SubscriptionTag::new(format!("memory:{}:{}", queue, state.subscribed.len()))
        };
        self.subscriptions
            .lock()
            .push((tag.clone(), queue.to_string(), callback));

        Ok(tag)
    }

    async fn cancel(&self, tag: &SubscriptionTag) -> Result<(), TransportError> {
        self.ensure_open(TransportOperation::Cancel)?;

        let removed = {
            let mut subscriptions = self.subscriptions.lock();
            let position = subscriptions
                .iter()
                .position(|(subscribed, _, _)| subscribed == tag);
            position.map(|position| subscriptions.remove(position))
        };

        if let Some((tag, _, callback)) = removed {
            self.broker
                .state
                .lock()
                .cancelled
                .push(tag.as_str().to_string());
            callback(None);
        }

        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.ensure_open(TransportOperation::Ack)?;
        self.broker.state.lock().acks.push(delivery.tag());

        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.ensure_open(TransportOperation::Reject)?;
        self.broker.state.lock().rejects.push(delivery.tag());

        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.broker.check(TransportOperation::CloseChannel)?;
        self.closed.store(true, Ordering::Release);

        Ok(())
    }
}
