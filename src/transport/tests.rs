use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::message::{ClientMessage, ServerMessage};
use super::{ConnectionOptions, ConnectionState, Connector, LoopbackConnector, Session, TransportConnection};
use crate::broker::Broker;
use crate::utils::error::TransportError;
use crate::utils::lock;

const WAIT: Duration = Duration::from_secs(2);

fn setup() -> (Arc<LoopbackConnector>, TransportConnection) {
    let connector = Arc::new(LoopbackConnector::new(Arc::new(Mutex::new(Broker::new()))));
    let connection = TransportConnection::new(
        connector.clone(),
        ConnectionOptions {
            client_id: "meter-1".to_string(),
            connect_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_millis(50),
            ack_timeout: Duration::from_millis(500),
        },
    );
    (connector, connection)
}

/// A broker that accepts the socket but never completes the handshake.
struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn connect(&self, _client_id: &str) -> Result<Session, TransportError> {
        std::future::pending().await
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[test]
fn test_frames_are_tagged_by_type() {
    let frame = ClientMessage::Subscribe {
        topic: "meters/#".to_string(),
    };
    assert_eq!(
        serde_json::to_string(&frame).unwrap(),
        r#"{"type":"subscribe","topic":"meters/#"}"#
    );

    let ack: ServerMessage = serde_json::from_str(r#"{"type":"puback","message_id":"m-1"}"#).unwrap();
    assert_eq!(
        ack,
        ServerMessage::PubAck {
            message_id: "m-1".to_string()
        }
    );
}

#[tokio::test]
async fn test_start_connects_once() {
    let (connector, connection) = setup();
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    assert!(connection.start().await);
    assert!(connection.start().await);
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connector.connect_count(), 1);

    connection.stop().await;
}

#[tokio::test]
async fn test_concurrent_starts_share_one_session() {
    let (connector, connection) = setup();
    let connection = Arc::new(connection);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let connection = connection.clone();
            tokio::spawn(async move { connection.start().await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(connector.connect_count(), 1);

    connection.stop().await;
}

#[tokio::test]
async fn test_failed_start_reconnects_in_background() {
    let (connector, connection) = setup();
    connector.set_available(false);

    assert!(!connection.start().await);
    assert!(!connection.is_connected());
    assert!(connection.status().borrow().attempts >= 1);

    connector.set_available(true);
    wait_until(|| connection.is_connected()).await;

    connection.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_final() {
    let (connector, connection) = setup();
    connection.stop().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    assert!(connection.start().await);
    connection.stop().await;
    connection.stop().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);

    connector.disconnect_all();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test]
async fn test_publish_starts_connection_and_is_acknowledged() {
    let (connector, connection) = setup();

    connection.publish("meters/readings/m1", b"{}", false).await.unwrap();
    assert!(connection.is_connected());
    assert_eq!(connector.connect_count(), 1);

    connection.stop().await;
}

#[tokio::test]
async fn test_publish_while_unavailable_fails() {
    let (connector, connection) = setup();
    connector.set_available(false);

    let err = connection.publish("meters/readings/m1", b"{}", false).await.unwrap_err();
    assert!(matches!(err, TransportError::Unavailable));

    connection.stop().await;
}

#[tokio::test]
async fn test_publish_rejects_non_utf8_payload() {
    let (connector, connection) = setup();

    let err = connection.publish("t", &[0xff, 0xfe], false).await.unwrap_err();
    assert!(matches!(err, TransportError::Encoding));
    assert_eq!(connector.connect_count(), 0);
}

#[tokio::test]
async fn test_reconnect_reasserts_each_subscription_once() {
    let (connector, connection) = setup();
    connection.add_subscription("meters/readings/#");
    connection.add_subscription("meters/billing/#");
    connection.add_subscription("meters/readings/#");
    assert_eq!(connection.subscriptions().len(), 2);

    assert!(connection.start().await);
    let broker = connector.broker();
    wait_until(|| lock(&broker).topics.len() == 2).await;

    connector.disconnect_all();
    wait_until(|| connector.connect_count() == 2 && lock(&broker).topics.len() == 2).await;

    for topic in lock(&broker).topics.values() {
        assert_eq!(topic.subscribers.len(), 1);
    }

    connection.stop().await;
}

#[tokio::test]
async fn test_inbound_messages_reach_the_consumer() {
    let (connector, connection) = setup();
    let mut inbound = connection.take_inbound().unwrap();
    assert!(connection.take_inbound().is_none());

    connection.add_subscription("meters/+/m1");
    assert!(connection.start().await);
    let broker = connector.broker();
    wait_until(|| lock(&broker).topics.contains_key("meters/+/m1")).await;

    lock(&broker).publish("meters/readings/m1", "42", false);
    let message = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(message.topic, "meters/readings/m1");
    assert_eq!(message.payload, b"42".to_vec());

    connection.restore_inbound(inbound);
    assert!(connection.take_inbound().is_some());
    connection.stop().await;
}

#[tokio::test]
async fn test_health_probe_revives_stopped_connection() {
    let (connector, connection) = setup();
    let connection = Arc::new(connection);
    let cancel = CancellationToken::new();

    let probe = {
        let connection = connection.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            connection
                .run_health_probe(Duration::from_millis(50), cancel)
                .await
        })
    };

    wait_until(|| connection.is_connected()).await;
    assert_eq!(connector.connect_count(), 1);

    cancel.cancel();
    probe.await.unwrap();
    connection.stop().await;
}

#[tokio::test]
async fn test_health_probe_accepts_zero_interval() {
    let (_connector, connection) = setup();
    let connection = Arc::new(connection);
    let cancel = CancellationToken::new();

    let probe = {
        let connection = connection.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { connection.run_health_probe(Duration::ZERO, cancel).await })
    };

    wait_until(|| connection.is_connected()).await;

    cancel.cancel();
    probe.await.unwrap();
    connection.stop().await;
}

#[tokio::test]
async fn test_cancelled_start_does_not_stay_connecting() {
    let connection = TransportConnection::new(
        Arc::new(StalledConnector),
        ConnectionOptions {
            client_id: "meter-1".to_string(),
            connect_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(60),
            ack_timeout: Duration::from_millis(500),
        },
    );

    assert!(timeout(Duration::from_millis(50), connection.start()).await.is_err());
    assert_eq!(connection.state(), ConnectionState::Reconnecting);

    wait_until(|| connection.status().borrow().attempts == 1).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(connection.state(), ConnectionState::Reconnecting);

    connection.stop().await;
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}
