mod common;

#[cfg(test)]
mod tests {
    use crate::common::handlers::Recorder;
    use crate::common::memory::MemoryTransport;
    use crate::common::setup::{TOPIC, client, client_with, connected};
    use crate::common::wait::{drain_events, until};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tether::transport::TransportOperation;
    use tether::{ClientError, ClientEvent, ConnectionState, HealthStatus, ReconnectPolicy};

    #[tokio::test(start_paused = true)]
    async fn binding_before_start_subscribes_once() {
        // Given
        let transport = MemoryTransport::new();
        let client = client("bind_before_start", &transport);
        client.bind(TOPIC, Recorder::new()).await;

        // When
        client.start().await.unwrap();

        // Then
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(transport.subscribed(), vec![TOPIC.to_string()]);
        assert_eq!(transport.active_subscriptions(TOPIC), 1);
        assert_eq!(client.health_check().status, HealthStatus::Healthy);
        assert!(client.health_check().is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn queues_are_declared_non_durable() {
        // Given
        let transport = MemoryTransport::new();
        let client = connected("non_durable", &transport).await;

        // When
        client.bind(TOPIC, Recorder::new()).await;

        // Then
        let declared = transport.declared();
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].0, TOPIC);
        assert!(!declared[0].1.durable);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_a_no_op_while_connected() {
        // Given
        let transport = MemoryTransport::new();
        let client = connected("start_twice", &transport).await;

        // When
        let result = client.start().await;

        // Then
        assert!(result.is_ok());
        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_initial_failures() {
        // Given
        let transport = MemoryTransport::new();
        transport.fail_next(TransportOperation::Connect, 3);
        let client = client("initial_failures", &transport);
        let mut events = client.events();

        // When
        client.start().await.unwrap();
        until(Duration::from_secs(10), || client.metrics().reconnections == 3).await;

        // Then
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.health_check().status, HealthStatus::Unhealthy);

        // When
        until(Duration::from_secs(10), || client.state().is_connected()).await;

        // Then
        assert_eq!(transport.connect_attempts(), 4);
        assert_eq!(client.metrics().reconnections, 3);
        assert_eq!(client.metrics().errors, 3);
        assert!(client.metrics().last_reconnect_at.is_some());
        assert_eq!(client.health_check().status, HealthStatus::Healthy);
        assert_eq!(
            drain_events(&mut events),
            vec![
                ClientEvent::ReconnectScheduled {
                    attempt: 1,
                    delay: Duration::from_secs(1),
                },
                ClientEvent::ReconnectScheduled {
                    attempt: 2,
                    delay: Duration::from_secs(2),
                },
                ClientEvent::ReconnectScheduled {
                    attempt: 3,
                    delay: Duration::from_secs(4),
                },
                ClientEvent::Connected,
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        // Given
        let transport = MemoryTransport::new();
        transport.fail_next(TransportOperation::Connect, usize::MAX);
        let policy = ReconnectPolicy::new(2, Duration::from_millis(100), 2.0);
        let client = client_with("gives_up", &transport, policy);
        let mut events = client.events();

        // When
        client.start().await.unwrap();
        until(Duration::from_secs(5), || transport.connect_attempts() == 3).await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        // Then
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.metrics().reconnections, 2);
        let exhausted = drain_events(&mut events)
            .into_iter()
            .filter(|event| matches!(event, ClientEvent::ReconnectExhausted { .. }))
            .collect::<Vec<_>>();
        assert_eq!(
            exhausted,
            vec![ClientEvent::ReconnectExhausted { attempts: 2 }],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_start_after_giving_up_reports_exhaustion() {
        // Given
        let transport = MemoryTransport::new();
        transport.fail_next(TransportOperation::Connect, usize::MAX);
        let policy = ReconnectPolicy::new(1, Duration::from_millis(100), 2.0);
        let client = client_with("manual_after_exhaustion", &transport, policy);
        client.start().await.unwrap();
        until(Duration::from_secs(5), || transport.connect_attempts() == 2).await;

        // When
        let result = client.start().await;

        // Then
        assert!(matches!(
            result,
            Err(ClientError::ReconnectExhausted { attempts: 1 }),
        ));
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_reconnect_propagates_the_failure() {
        // Given
        let transport = MemoryTransport::new();
        transport.fail_next(TransportOperation::Connect, 1);
        let client = client_with("no_reconnect", &transport, ReconnectPolicy::disabled());

        // When
        let result = client.start().await;

        // Then
        match result {
            Err(ClientError::Transport(error)) => {
                assert_eq!(error.operation(), TransportOperation::Connect)
            }
            other => panic!("expected a transport error, got {:?}", other),
        }
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.metrics().reconnections, 0);
        assert_eq!(client.metrics().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_channel_closes_the_connection() {
        // Given
        let transport = MemoryTransport::new();
        transport.fail_next(TransportOperation::OpenChannel, 1);
        let client = client_with("no_channel", &transport, ReconnectPolicy::disabled());

        // When
        let result = client.start().await;

        // Then
        assert!(result.is_err());
        assert_eq!(transport.latest_closed(), (true, true));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_reconnects_and_resubscribes() {
        // Given
        let transport = MemoryTransport::new();
        let client = client("lost_connection", &transport);
        let recorder = Recorder::new();
        client.bind(TOPIC, recorder.clone()).await;
        client.start().await.unwrap();
        let mut events = client.events();

        // When
        transport.drop_connection();
        until(Duration::from_millis(100), || !client.state().is_connected()).await;

        // Then
        assert_eq!(client.health_check().status, HealthStatus::Unhealthy);

        // When
        until(Duration::from_secs(5), || client.state().is_connected()).await;
        until(Duration::from_millis(100), || {
            transport.active_subscriptions(TOPIC) == 1
        })
        .await;

        // Then
        assert_eq!(transport.connection_count(), 2);
        assert_eq!(transport.subscribed(), vec![TOPIC.to_string(), TOPIC.to_string()]);
        assert_eq!(
            drain_events(&mut events),
            vec![
                ClientEvent::Disconnected,
                ClientEvent::ReconnectScheduled {
                    attempt: 1,
                    delay: Duration::from_secs(1),
                },
                ClientEvent::Connected,
            ],
        );

        // When
        transport.deliver(TOPIC, br#"{"id":7}"#.to_vec());
        until(Duration::from_secs(1), || recorder.count() == 1).await;

        // Then
        assert_eq!(transport.acks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_reconnect_resets_the_backoff() {
        // Given
        let transport = MemoryTransport::new();
        let client = connected("backoff_reset", &transport).await;
        transport.drop_connection();
        until(Duration::from_secs(5), || transport.connection_count() == 2).await;
        until(Duration::from_millis(100), || client.state().is_connected()).await;
        let mut events = client.events();

        // When
        transport.drop_connection();
        until(Duration::from_millis(100), || !client.state().is_connected()).await;
        until(Duration::from_secs(5), || client.state().is_connected()).await;

        // Then
        assert_eq!(
            drain_events(&mut events),
            vec![
                ClientEvent::Disconnected,
                ClientEvent::ReconnectScheduled {
                    attempt: 1,
                    delay: Duration::from_secs(1),
                },
                ClientEvent::Connected,
            ],
        );
        assert_eq!(client.metrics().reconnections, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscription_reconnects_on_its_own() {
        // Given
        let transport = MemoryTransport::new();
        transport.fail_next(TransportOperation::Subscribe, 1);
        let client = client("subscribe_retry", &transport);
        client.bind(TOPIC, Recorder::new()).await;
        let mut events = client.events();

        // When
        client.start().await.unwrap();

        // Then
        assert_eq!(transport.active_subscriptions(TOPIC), 0);
        assert_eq!(client.metrics().errors, 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.health_check().status, HealthStatus::Unhealthy);
        assert_eq!(transport.latest_closed(), (true, true));

        // When
        until(Duration::from_secs(5), || {
            transport.active_subscriptions(TOPIC) == 1
        })
        .await;

        // Then
        assert!(client.state().is_connected());
        assert_eq!(transport.connection_count(), 2);
        assert_eq!(client.metrics().reconnections, 1);
        assert_eq!(
            drain_events(&mut events),
            vec![
                ClientEvent::Connected,
                ClientEvent::Disconnected,
                ClientEvent::ReconnectScheduled {
                    attempt: 1,
                    delay: Duration::from_secs(1),
                },
                ClientEvent::Connected,
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_subscription_failures_back_off_and_give_up() {
        // Given
        let transport = MemoryTransport::new();
        transport.fail_next(TransportOperation::Subscribe, usize::MAX);
        let policy = ReconnectPolicy::new(2, Duration::from_millis(100), 2.0);
        let client = client_with("subscribe_exhausted", &transport, policy);
        client.bind(TOPIC, Recorder::new()).await;
        let mut events = client.events();

        // When
        client.start().await.unwrap();
        until(Duration::from_secs(5), || transport.connection_count() == 3).await;
        tokio::time::sleep(Duration::from_secs(600)).await;

        // Then
        assert_eq!(transport.connection_count(), 3);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.metrics().reconnections, 2);
        let scheduled = drain_events(&mut events)
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    ClientEvent::ReconnectScheduled { .. } | ClientEvent::ReconnectExhausted { .. }
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            scheduled,
            vec![
                ClientEvent::ReconnectScheduled {
                    attempt: 1,
                    delay: Duration::from_millis(100),
                },
                ClientEvent::ReconnectScheduled {
                    attempt: 2,
                    delay: Duration::from_millis(200),
                },
                ClientEvent::ReconnectExhausted { attempts: 2 },
            ],
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connection_error_is_counted_and_reported() {
        // Given
        let transport = MemoryTransport::new();
        let client = connected("connection_error", &transport).await;
        let mut events = client.events();

        // When
        transport.raise_error("heartbeat missed");
        until(Duration::from_millis(100), || client.metrics().errors == 1).await;

        // Then
        assert_eq!(
            drain_events(&mut events),
            vec![ClientEvent::TransportError {
                message: "heartbeat missed".to_string(),
            }],
        );
        assert!(client.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn error_of_a_replaced_connection_is_ignored() {
        // Given
        let transport = MemoryTransport::new();
        let client = connected("stale_error", &transport).await;
        transport.drop_connection();
        until(Duration::from_millis(100), || !client.state().is_connected()).await;
        until(Duration::from_secs(5), || client.state().is_connected()).await;
        let errors = client.metrics().errors;
        let mut events = client.events();

        // When
        transport.raise_error_on(0, "late heartbeat failure");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Then
        assert_eq!(client.metrics().errors, errors);
        assert!(drain_events(&mut events).is_empty());
        assert!(client.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_observable() {
        // Given
        let transport = MemoryTransport::new();
        let client = client("watched", &transport);
        let mut state = client.watch_state();

        // When
        client.start().await.unwrap();

        // Then
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_start_connects_in_the_background() {
        // Given
        let transport = MemoryTransport::new();
        let config = tether::ClientConfig::builder()
            .name("auto")
            .host("memory")
            .auto_start(true)
            .build()
            .unwrap();

        // When
        let client = tether::Client::new(config, transport.clone());
        until(Duration::from_millis(100), || client.state().is_connected()).await;

        // Then
        assert_eq!(transport.connect_attempts(), 1);
    }
}
