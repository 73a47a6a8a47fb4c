//! WebSocket port integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use nats_port::backbone::{BackboneError, Envelope};
use nats_port::client::{ClientEvent, SocketState};
use nats_port::ReconnectingSocket;

mod common;

const WAIT: Duration = Duration::from_secs(3);

fn publish(gateway: &common::TestGateway, subject: &str, envelope: Value) -> usize {
    gateway
        .backbone
        .publish(subject, serde_json::to_vec(&envelope).unwrap())
}

/// Send one raw frame and return the first text frame the gateway answers with.
async fn raw_exchange(gateway: &common::TestGateway, frame: &str) -> Value {
    let (mut stream, _) = connect_async(gateway.ws_url()).await.unwrap();
    stream.send(Message::text(frame.to_string())).await.unwrap();

    let reply = tokio::time::timeout(WAIT, async {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Text(text) = message {
                return serde_json::from_str::<Value>(text.as_str()).unwrap();
            }
        }
        panic!("socket ended without a reply");
    })
    .await
    .unwrap();

    let _ = stream.close(None).await;
    reply
}

#[tokio::test]
async fn test_subscribe_receives_published_messages() {
    let gateway = common::spawn_gateway(|_| {}).await;
    let (socket, mut events) = ReconnectingSocket::connect(&gateway.ws_url(), common::fast_client()).unwrap();

    socket.subscribe("topic1").await.unwrap();
    assert!(common::wait_for(WAIT, || gateway.backbone.active_subscriptions("topic1") == 1).await);

    assert_eq!(publish(&gateway, "topic1", json!({"code": 200, "body": "x"})), 1);

    let message = common::next_message(&mut events, WAIT).await.unwrap();
    assert_eq!(message.subject.as_deref(), Some("topic1"));
    assert_eq!(message.code, 200);
    assert_eq!(message.body, Some(json!("x")));

    socket.close();
    socket.closed().await;
    gateway.stop().await;
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let gateway = common::spawn_gateway(|_| {}).await;
    let (socket, mut events) = ReconnectingSocket::connect(&gateway.ws_url(), common::fast_client()).unwrap();

    socket.subscribe("topic1").await.unwrap();
    socket.unsubscribe("topic1").await.unwrap();
    assert!(common::wait_for(WAIT, || {
        gateway.backbone.subscriptions_opened("topic1") == 1
            && gateway.backbone.active_subscriptions("topic1") == 0
    })
    .await);

    publish(&gateway, "topic1", json!({"code": 200, "body": "late"}));
    assert!(common::next_message(&mut events, Duration::from_millis(300)).await.is_none());

    socket.close();
    gateway.stop().await;
}

#[tokio::test]
async fn test_two_sockets_share_one_upstream_subscription() {
    let gateway = common::spawn_gateway(|_| {}).await;
    let (first, mut first_events) = ReconnectingSocket::connect(&gateway.ws_url(), common::fast_client()).unwrap();
    let (second, mut second_events) = ReconnectingSocket::connect(&gateway.ws_url(), common::fast_client()).unwrap();

    first.subscribe("prices").await.unwrap();
    second.subscribe("prices").await.unwrap();

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let health_url = gateway.url("/health");
    let mut handlers = 0;
    for _ in 0..50 {
        let health: Value = client.get(&health_url).send().await.unwrap().json().await.unwrap();
        handlers = health["handlers"].as_u64().unwrap_or(0);
        if handlers == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(handlers, 2);
    assert_eq!(gateway.backbone.subscriptions_opened("prices"), 1);

    assert_eq!(publish(&gateway, "prices", json!({"code": 200, "body": 42})), 1);
    for events in [&mut first_events, &mut second_events] {
        let message = common::next_message(events, WAIT).await.unwrap();
        assert_eq!(message.body, Some(json!(42)));
    }

    first.close();
    first.closed().await;
    second.close();
    second.closed().await;
    gateway.stop().await;
}

#[tokio::test]
async fn test_closing_socket_releases_subscriptions() {
    let gateway = common::spawn_gateway(|_| {}).await;
    let (socket, _events) = ReconnectingSocket::connect(&gateway.ws_url(), common::fast_client()).unwrap();

    socket.subscribe("a").await.unwrap();
    socket.subscribe("b").await.unwrap();
    assert!(common::wait_for(WAIT, || {
        gateway.backbone.active_subscriptions("a") == 1 && gateway.backbone.active_subscriptions("b") == 1
    })
    .await);

    socket.close();
    socket.closed().await;

    assert!(common::wait_for(WAIT, || {
        gateway.backbone.active_subscriptions("a") == 0 && gateway.backbone.active_subscriptions("b") == 0
    })
    .await);

    gateway.stop().await;
}

#[tokio::test]
async fn test_authorization_rejection_closes_without_reconnect() {
    let gateway = common::spawn_gateway(|config| {
        config.auth.subjects = vec!["auth.session".to_string()];
    })
    .await;
    common::answer(&gateway.backbone, "auth.session", json!({"code": 401, "body": "expired"}));

    let (socket, mut events) = ReconnectingSocket::connect(&gateway.ws_url(), common::fast_client()).unwrap();
    socket.subscribe("private").await.unwrap();

    let mut close_code = None;
    while let Some(event) = common::next_event(&mut events, WAIT).await {
        if let ClientEvent::Closed { code, reason } = event {
            close_code = code;
            assert_eq!(serde_json::from_str::<Value>(&reason).unwrap(), json!({"code": 401}));
            break;
        }
    }
    assert_eq!(close_code, Some(4401));

    socket.closed().await;
    assert_eq!(socket.state(), SocketState::Closed);
    assert_eq!(gateway.backbone.subscriptions_opened("private"), 0);
    assert_eq!(gateway.backbone.request_count("auth.session"), 1);

    gateway.stop().await;
}

#[tokio::test]
async fn test_namespace_suffixes_upstream_subject() {
    let gateway = common::spawn_gateway(|config| {
        config.auth.namespace_subjects = vec!["orders".to_string()];
        config.auth.namespace_subject = Some("tenant.resolve".to_string());
    })
    .await;
    common::answer(
        &gateway.backbone,
        "tenant.resolve",
        json!({"code": 200, "body": {"namespace": "acme"}}),
    );

    let (socket, mut events) = ReconnectingSocket::connect(&gateway.ws_url(), common::fast_client()).unwrap();
    socket.subscribe("orders").await.unwrap();
    assert!(common::wait_for(WAIT, || gateway.backbone.active_subscriptions("orders.acme") == 1).await);
    assert_eq!(gateway.backbone.subscriptions_opened("orders"), 0);

    publish(&gateway, "orders.acme", json!({"code": 200, "body": {"id": 7}}));
    let message = common::next_message(&mut events, WAIT).await.unwrap();
    assert_eq!(message.subject.as_deref(), Some("orders"));
    assert_eq!(message.body, Some(json!({"id": 7})));

    socket.close();
    gateway.stop().await;
}

#[tokio::test]
async fn test_unknown_action_answers_400() {
    let gateway = common::spawn_gateway(|_| {}).await;

    let reply = raw_exchange(&gateway, r#"{"subject":"topic1","action":"publish"}"#).await;

    assert_eq!(reply["code"], 400);
    assert_eq!(reply["subject"], "topic1");
    assert_eq!(gateway.backbone.subscriptions_opened("topic1"), 0);

    gateway.stop().await;
}

#[tokio::test]
async fn test_unparseable_frame_answers_500() {
    let gateway = common::spawn_gateway(|_| {}).await;

    let reply = raw_exchange(&gateway, "not json").await;

    assert_eq!(reply["code"], 500);
    assert!(reply.get("subject").is_none());

    gateway.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_sockets() {
    let gateway = common::spawn_gateway(|_| {}).await;
    let (socket, _events) = ReconnectingSocket::connect(
        &gateway.ws_url(),
        nats_port::ClientConfig {
            max_retries: 0,
            ..common::fast_client()
        },
    )
    .unwrap();
    socket.subscribe("topic1").await.unwrap();
    assert!(common::wait_for(WAIT, || gateway.backbone.active_subscriptions("topic1") == 1).await);

    let backbone = gateway.backbone.clone();
    gateway.stop().await;

    tokio::time::timeout(WAIT, socket.closed()).await.unwrap();
    assert_eq!(backbone.active_subscriptions("topic1"), 0);
}

#[tokio::test]
async fn test_relay_transport_failure_answers_500_and_stays_open() {
    let gateway = common::spawn_gateway(|config| {
        config.auth.subjects = vec!["auth.offline".to_string()];
    })
    .await;

    let reply = raw_exchange(&gateway, r#"{"subject":"topic1","action":"subscribe"}"#).await;

    assert_eq!(reply["code"], 500);
    assert_eq!(reply["subject"], "topic1");
    assert_eq!(gateway.backbone.request_count("auth.offline"), 1);
    assert_eq!(gateway.backbone.subscriptions_opened("topic1"), 0);

    gateway.stop().await;
}

#[tokio::test]
async fn test_wrongly_typed_command_answers_400() {
    let gateway = common::spawn_gateway(|_| {}).await;

    let reply = raw_exchange(&gateway, r#"{"subject":"topic1","action":7}"#).await;
    assert_eq!(reply["code"], 400);
    assert_eq!(reply["subject"], "topic1");

    let reply = raw_exchange(&gateway, r#"{"subject":"topic1","action":"subscribe","headers":"x"}"#).await;
    assert_eq!(reply["code"], 400);

    let reply = raw_exchange(&gateway, "[1,2]").await;
    assert_eq!(reply["code"], 400);
    assert!(reply.get("subject").is_none());

    assert_eq!(gateway.backbone.subscriptions_opened("topic1"), 0);

    gateway.stop().await;
}

#[tokio::test]
async fn test_upgrade_headers_win_over_frame_headers() {
    let gateway = common::spawn_gateway(|config| {
        config.auth.subjects = vec!["auth.session".to_string()];
    })
    .await;
    let received: Arc<Mutex<Option<Envelope>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&received);
    gateway.backbone.respond("auth.session", move |payload| {
        let sink = Arc::clone(&sink);
        async move {
            let request: Envelope = serde_json::from_slice(&payload).unwrap();
            let reply = Envelope {
                headers: request.headers.clone(),
                body: None,
                code: Some(200),
            };
            *sink.lock().unwrap() = Some(request);
            Ok::<_, BackboneError>(Bytes::from(serde_json::to_vec(&reply).unwrap()))
        }
    });

    let mut request = gateway.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-tenant", HeaderValue::from_static("from-upgrade"));
    let (mut stream, _) = connect_async(request).await.unwrap();
    let frame = json!({
        "subject": "topic1",
        "action": "subscribe",
        "headers": {"x-tenant": "from-frame", "x-frame-only": "kept", "nats-subject": "spoofed"}
    });
    stream.send(Message::text(frame.to_string())).await.unwrap();

    assert!(common::wait_for(WAIT, || gateway.backbone.active_subscriptions("topic1") == 1).await);

    let seen = received.lock().unwrap().clone().unwrap();
    assert_eq!(seen.header_values("x-tenant"), vec!["from-upgrade"]);
    assert_eq!(seen.header_values("x-frame-only"), vec!["kept"]);
    assert_eq!(seen.header_values("nats-subject"), vec!["topic1"]);

    let _ = stream.close(None).await;
    gateway.stop().await;
}

#[tokio::test]
async fn test_namespace_rejection_closes_with_code() {
    let gateway = common::spawn_gateway(|config| {
        config.auth.namespace_subjects = vec!["orders".to_string()];
        config.auth.namespace_subject = Some("tenant.resolve".to_string());
    })
    .await;
    common::answer(&gateway.backbone, "tenant.resolve", json!({"code": 403, "body": "unknown tenant"}));

    let (socket, mut events) = ReconnectingSocket::connect(&gateway.ws_url(), common::fast_client()).unwrap();
    socket.subscribe("orders").await.unwrap();

    let mut close_code = None;
    while let Some(event) = common::next_event(&mut events, WAIT).await {
        if let ClientEvent::Closed { code, reason } = event {
            close_code = code;
            assert_eq!(serde_json::from_str::<Value>(&reason).unwrap(), json!({"code": 403}));
            break;
        }
    }
    assert_eq!(close_code, Some(4403));

    socket.closed().await;
    assert_eq!(socket.state(), SocketState::Closed);
    assert_eq!(gateway.backbone.subscriptions_opened("orders"), 0);

    gateway.stop().await;
}

#[tokio::test]
async fn test_shutdown_interrupts_slow_relay_hop() {
    let gateway = common::spawn_gateway(|config| {
        config.backbone.request_timeout_secs = 30;
        config.auth.subjects = vec!["auth.slow".to_string()];
    })
    .await;
    gateway.backbone.respond("auth.slow", |payload| async move {
        tokio::time::sleep(Duration::from_secs(20)).await;
        Ok::<_, BackboneError>(payload)
    });

    let (socket, mut events) = ReconnectingSocket::connect(
        &gateway.ws_url(),
        nats_port::ClientConfig {
            max_retries: 0,
            ..common::fast_client()
        },
    )
    .unwrap();
    socket.subscribe("topic1").await.unwrap();
    assert!(common::wait_for(WAIT, || gateway.backbone.request_count("auth.slow") == 1).await);

    gateway.stop().await;

    let mut close_code = None;
    while let Some(event) = common::next_event(&mut events, WAIT).await {
        if let ClientEvent::Closed { code, .. } = event {
            close_code = code;
            break;
        }
    }
    assert_eq!(close_code, Some(1001));
    assert_eq!(socket.state(), SocketState::Closed);
}
