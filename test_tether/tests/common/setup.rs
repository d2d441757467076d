use crate::common::memory::MemoryTransport;
use std::time::Duration;
use tether::{Client, ClientConfig, PublishRetryPolicy, ReconnectPolicy};

pub const TOPIC: &str = "orders";

/// Reconnects up to five times, starting at one second and doubling.
pub fn quick_reconnect() -> ReconnectPolicy {
    ReconnectPolicy::new(5, Duration::from_secs(1), 2.0)
}

pub fn config(name: &str, reconnect: ReconnectPolicy) -> ClientConfig {
    ClientConfig::builder()
        .name(name)
        .host("memory")
        .reconnect(reconnect)
        .publish(PublishRetryPolicy::new(3))
        .drain_interval(Duration::from_millis(10))
        .build()
        .expect("test config must be valid")
}

/// Creates a client over the given transport, not yet started.
pub fn client(name: &str, transport: &MemoryTransport) -> Client {
    client_with(name, transport, quick_reconnect())
}

pub fn client_with(name: &str, transport: &MemoryTransport, reconnect: ReconnectPolicy) -> Client {
    Client::new(config(name, reconnect), transport.clone())
}

/// Creates a client over the given transport and waits until it connects.
pub async fn connected(name: &str, transport: &MemoryTransport) -> Client {
    let client = client(name, transport);

    client.start().await.expect("memory transport must connect");
    assert!(client.state().is_connected());

    client
}
