use std::time::Duration;
use tether::ClientEvent;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;

/// Lets the (usually paused) clock run in small steps until the given
/// condition holds. Panics if it does not hold within the given window.
pub async fn until(within: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + within;

    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition not met within {:?}",
            within,
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Collects every event received so far, without waiting.
pub fn drain_events(events: &mut Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut received = Vec::new();

    loop {
        match events.try_recv() {
            Ok(event) => received.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return received,
        }
    }
}
