use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::Broker;
use super::client::Client;
use super::topic::Topic;
use crate::transport::message::{ClientMessage, QOS_AT_MOST_ONCE, ServerMessage};

fn connect(broker: &mut Broker) -> (String, UnboundedReceiver<ServerMessage>) {
    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();
    let client = Client::new(tx);
    let id = client.id.clone();
    broker.register_client(client);
    (id, rx)
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn delivered_topics(frames: &[ServerMessage]) -> Vec<String> {
    frames
        .iter()
        .filter_map(|f| match f {
            ServerMessage::Message { topic, .. } => Some(topic.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_topic_subscribe_is_idempotent() {
    let mut topic = Topic::new("meters/#");
    topic.subscribe("client1".to_string());
    topic.subscribe("client1".to_string());
    assert_eq!(topic.subscribers, vec!["client1".to_string()]);

    topic.unsubscribe(&"client1".to_string());
    assert!(topic.subscribers.is_empty());
}

#[test]
fn test_topic_next_member_rotates() {
    let mut topic = Topic::new("$share/g/meters/#");
    assert!(topic.is_shared());
    assert!(topic.next_member().is_none());

    topic.subscribe("a".to_string());
    topic.subscribe("b".to_string());
    let picks: Vec<String> = (0..4).filter_map(|_| topic.next_member().cloned()).collect();
    assert_eq!(picks, vec!["a", "b", "a", "b"]);
}

#[test]
fn test_broker_register_and_remove_client() {
    let mut broker = Broker::new();
    let (id, _rx) = connect(&mut broker);
    assert!(broker.clients.contains_key(&id));

    broker.remove_client(&id);
    assert!(!broker.clients.contains_key(&id));
}

#[test]
fn test_broker_publish_routes_wildcards() {
    let mut broker = Broker::new();
    let (id, mut rx) = connect(&mut broker);
    broker.subscribe("meters/readings/+", id.clone()).unwrap();

    assert_eq!(broker.publish("meters/readings/u1", "{}", false), 1);
    assert_eq!(broker.publish("meters/readings/u1/extra", "{}", false), 0);
    assert_eq!(broker.publish("meters/billing/u1", "{}", false), 0);

    let frames = drain(&mut rx);
    assert!(matches!(frames[0], ServerMessage::SubAck { .. }));
    assert_eq!(delivered_topics(&frames), vec!["meters/readings/u1"]);
}

#[test]
fn test_overlapping_filters_deliver_once_per_client() {
    let mut broker = Broker::new();
    let (id, mut rx) = connect(&mut broker);
    broker.subscribe("meters/#", id.clone()).unwrap();
    broker.subscribe("meters/readings/u1", id.clone()).unwrap();

    assert_eq!(broker.publish("meters/readings/u1", "{}", false), 1);
    assert_eq!(delivered_topics(&drain(&mut rx)).len(), 1);
}

#[test]
fn test_shared_subscription_delivers_to_one_member() {
    let mut broker = Broker::new();
    let (a, mut rx_a) = connect(&mut broker);
    let (b, mut rx_b) = connect(&mut broker);
    broker.subscribe("$share/workers/meters/readings/#", a).unwrap();
    broker.subscribe("$share/workers/meters/readings/#", b).unwrap();

    for _ in 0..4 {
        assert_eq!(broker.publish("meters/readings/u1", "{}", false), 1);
    }

    assert_eq!(delivered_topics(&drain(&mut rx_a)).len(), 2);
    assert_eq!(delivered_topics(&drain(&mut rx_b)).len(), 2);
}

#[test]
fn test_retained_message_replayed_on_subscribe() {
    let mut broker = Broker::new();
    broker.publish("meters/clients/status/m1", "{\"Status\":\"online\"}", true);
    broker.publish("meters/clients/status/m1", "{\"Status\":\"offline\"}", true);

    let (id, mut rx) = connect(&mut broker);
    broker.subscribe("meters/clients/status/#", id).unwrap();

    let frames = drain(&mut rx);
    let replayed: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            ServerMessage::Message {
                payload, retain, ..
            } => Some((payload.clone(), *retain)),
            _ => None,
        })
        .collect();
    assert_eq!(
        replayed,
        vec![("{\"Status\":\"offline\"}".to_string(), true)]
    );
}

#[test]
fn test_empty_retained_payload_clears_retained() {
    let mut broker = Broker::new();
    broker.publish("status/m1", "online", true);
    broker.publish("status/m1", "", true);
    assert!(broker.retained.is_empty());
}

#[test]
fn test_handle_publish_acknowledges_sender() {
    let mut broker = Broker::new();
    let (id, mut rx) = connect(&mut broker);

    broker.handle(
        &id,
        ClientMessage::Publish {
            topic: "meters/readings/u1".to_string(),
            payload: "{}".to_string(),
            message_id: "m-1".to_string(),
            qos: 1,
            retain: false,
        },
    );

    assert_eq!(
        drain(&mut rx),
        vec![ServerMessage::PubAck {
            message_id: "m-1".to_string()
        }]
    );
}

#[test]
fn test_handle_fire_and_forget_publish_is_not_acknowledged() {
    let mut broker = Broker::new();
    let (id, mut rx) = connect(&mut broker);
    broker.subscribe("meters/#", id.clone()).unwrap();
    drain(&mut rx);

    broker.handle(
        &id,
        ClientMessage::Publish {
            topic: "meters/readings/u1".to_string(),
            payload: "{}".to_string(),
            message_id: "m-2".to_string(),
            qos: QOS_AT_MOST_ONCE,
            retain: false,
        },
    );

    let frames = drain(&mut rx);
    assert_eq!(delivered_topics(&frames), vec!["meters/readings/u1"]);
    assert!(!frames.iter().any(|f| matches!(f, ServerMessage::PubAck { .. })));
}

#[test]
fn test_handle_invalid_subscribe_reports_error() {
    let mut broker = Broker::new();
    let (id, mut rx) = connect(&mut broker);

    broker.handle(
        &id,
        ClientMessage::Subscribe {
            topic: "a/#/b".to_string(),
        },
    );

    assert!(broker.topics.is_empty());
    assert!(matches!(
        drain(&mut rx).as_slice(),
        [ServerMessage::Error { .. }]
    ));
}

#[test]
fn test_broker_cleanup_client() {
    let mut broker = Broker::new();
    let (id, _rx) = connect(&mut broker);
    broker.subscribe("test_topic", id.clone()).unwrap();

    broker.cleanup_client(&id);
    assert!(!broker.clients.contains_key(&id));
    assert!(!broker.topics.contains_key("test_topic"));
}

#[test]
fn test_disconnect_all_closes_client_channels() {
    let mut broker = Broker::new();
    let (_a, mut rx_a) = connect(&mut broker);
    let (_b, _rx_b) = connect(&mut broker);

    assert_eq!(broker.disconnect_all(), 2);
    assert!(broker.clients.is_empty());
    assert!(rx_a.try_recv().is_err());
    assert!(rx_a.is_closed());
}

#[test]
fn test_publish_to_client_with_closed_channel() {
    let mut broker = Broker::new();
    let (id, rx) = connect(&mut broker);
    broker.subscribe("test_topic", id).unwrap();

    drop(rx);

    assert_eq!(broker.publish("test_topic", "hello", false), 0);
}
