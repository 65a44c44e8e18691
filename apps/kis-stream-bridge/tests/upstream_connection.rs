//! Upstream Connection Integration Tests
//!
//! Drives the connection worker against a local WebSocket server that
//! plays the KIS stream.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{FakeKis, UpstreamBridge, WAIT, eventually, test_upstream_config, trade_frame};
use kis_stream_bridge::{
    ConnectionState, CredentialCache, CredentialCacheConfig, CredentialError, CredentialProvider,
};

const REJECTED_APPROVAL: &str = r#"{"header":{"tr_id":"H0STCNT0","tr_key":"005930"},"body":{"rt_cd":"1","msg_cd":"OPSP0011","msg1":"invalid approval"}}"#;

/// Hands out `key-1`, `key-2`, ... and fails the call numbered `fail_on`.
#[derive(Default)]
struct CountingCredentials {
    calls: AtomicUsize,
    fail_on: Option<usize>,
}

impl CountingCredentials {
    fn failing_on(call: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(call),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingCredentials {
    async fn approval_key(&self) -> Result<String, CredentialError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(call) {
            return Err(CredentialError::Transport("approval host down".to_string()));
        }
        Ok(format!("key-{call}"))
    }

    async fn access_token(&self) -> Result<String, CredentialError> {
        Ok("token".to_string())
    }

    async fn invalidate_approval_key(&self) {}
}

#[tokio::test]
async fn first_listener_connects_and_subscribes() {
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start(test_upstream_config(&kis.url));

    kis.expect_no_connection().await;

    let (_id, _rx) = bridge.listen("005930");
    let mut conn = kis.next_connection().await;

    assert_eq!(
        conn.next_subscription().await,
        ("1".to_string(), "005930".to_string())
    );
    conn.expect_silence().await;

    eventually(|| bridge.status.state() == ConnectionState::Connected).await;
    bridge.cancel.cancel();
}

#[tokio::test]
async fn resubscribes_active_symbols_after_reconnect() {
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start(test_upstream_config(&kis.url));

    let (_a, _rx_a) = bridge.listen("005930");
    let (b, _rx_b) = bridge.listen("000660");

    let mut first = kis.next_connection().await;
    let mut subscribed = HashSet::new();
    for _ in 0..2 {
        let (tr_type, symbol) = first.next_subscription().await;
        assert_eq!(tr_type, "1");
        subscribed.insert(symbol);
    }
    assert_eq!(
        subscribed,
        HashSet::from(["005930".to_string(), "000660".to_string()])
    );
    first.expect_silence().await;

    bridge.registry.remove_listener("000660", b);
    assert_eq!(
        first.next_subscription().await,
        ("2".to_string(), "000660".to_string())
    );

    // Vendor drops the socket
    drop(first);

    let mut second = kis.next_connection().await;
    assert_eq!(
        second.next_subscription().await,
        ("1".to_string(), "005930".to_string())
    );
    second.expect_silence().await;

    eventually(|| bridge.status.state() == ConnectionState::Connected).await;
    assert_eq!(bridge.status.reconnect_attempts(), 0);
    bridge.cancel.cancel();
}

#[tokio::test]
async fn heartbeat_is_echoed_verbatim() {
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start(test_upstream_config(&kis.url));
    let (_id, mut ticks) = bridge.listen("005930");

    let mut conn = kis.next_connection().await;
    conn.next_subscription().await;

    let heartbeat = r#"{"header":{"tr_id":"PINGPONG","datetime":"20240105093000"}}"#;
    conn.send_text(heartbeat);

    loop {
        match conn.next_message().await {
            Some(Message::Pong(payload)) => {
                assert_eq!(payload.as_ref(), heartbeat.as_bytes());
                break;
            }
            Some(Message::Ping(_)) => {}
            other => panic!("expected pong, got {other:?}"),
        }
    }

    conn.expect_silence().await;
    assert!(ticks.try_recv().is_err());
    bridge.cancel.cancel();
}

#[tokio::test]
async fn trade_reaches_only_its_symbol() {
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start(test_upstream_config(&kis.url));
    let (_a, mut samsung) = bridge.listen("005930");
    let (_b, mut hynix) = bridge.listen("000660");

    let mut conn = kis.next_connection().await;
    conn.next_subscription().await;
    conn.next_subscription().await;

    conn.send_text(&trade_frame("005930", "71200"));

    let tick = tokio::time::timeout(WAIT, samsung.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tick.symbol, "005930");
    assert_eq!(tick.price, "71200");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(hynix.try_recv().is_err());
    bridge.cancel.cancel();
}

#[tokio::test]
async fn malformed_frame_keeps_connection() {
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start(test_upstream_config(&kis.url));
    let (_id, mut ticks) = bridge.listen("005930");

    let mut conn = kis.next_connection().await;
    conn.next_subscription().await;

    conn.send_text("0|H0STCNT0|001");
    conn.send_text("1|H0STCNT0|001|encrypted-payload");
    conn.send_text(&trade_frame("005930", "71300"));

    let tick = tokio::time::timeout(WAIT, ticks.recv()).await.unwrap().unwrap();
    assert_eq!(tick.price, "71300");
    kis.expect_no_connection().await;
    bridge.cancel.cancel();
}

#[tokio::test]
async fn rejected_request_triggers_reconnect() {
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start(test_upstream_config(&kis.url));
    let (_id, _rx) = bridge.listen("005930");

    let mut first = kis.next_connection().await;
    first.next_subscription().await;

    first.send_text(REJECTED_APPROVAL);
    first.expect_closed().await;

    let mut second = kis.next_connection().await;
    assert_eq!(
        second.next_subscription().await,
        ("1".to_string(), "005930".to_string())
    );
    assert!(
        bridge
            .status
            .last_error()
            .is_some_and(|e| e.contains("OPSP0011"))
    );
    bridge.cancel.cancel();
}

#[tokio::test]
async fn successful_control_frame_is_not_an_error() {
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start(test_upstream_config(&kis.url));
    let (_id, _rx) = bridge.listen("005930");

    let mut conn = kis.next_connection().await;
    conn.next_subscription().await;

    conn.send_text(
        r#"{"header":{"tr_id":"H0STCNT0","tr_key":"005930"},"body":{"rt_cd":"0","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS"}}"#,
    );

    conn.expect_silence().await;
    kis.expect_no_connection().await;
    assert_eq!(bridge.status.state(), ConnectionState::Connected);
    bridge.cancel.cancel();
}

#[tokio::test]
async fn handshake_timeout_is_retried() {
    // Accepts TCP but never answers the WebSocket handshake
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    let bridge = UpstreamBridge::start(test_upstream_config(&url));
    let (_id, _rx) = bridge.listen("005930");

    eventually(|| accepted.load(Ordering::SeqCst) >= 2).await;
    assert!(
        bridge
            .status
            .last_error()
            .is_some_and(|e| e.contains("handshake timed out"))
    );
    assert_ne!(bridge.status.state(), ConnectionState::Connected);
    bridge.cancel.cancel();
}

#[tokio::test]
async fn shutdown_closes_socket_and_stops_reconnecting() {
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start(test_upstream_config(&kis.url));
    let (_id, _rx) = bridge.listen("005930");

    let mut conn = kis.next_connection().await;
    conn.next_subscription().await;

    bridge.cancel.cancel();
    conn.expect_closed().await;

    tokio::time::timeout(WAIT, bridge.worker)
        .await
        .expect("worker did not stop")
        .unwrap();
    assert_eq!(bridge.status.state(), ConnectionState::Disconnected);
    kis.expect_no_connection().await;
}

#[tokio::test]
async fn rejected_approval_key_is_replaced_on_reconnect() {
    let auth = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/Approval"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"approval_key": "revoked-key"}),
        ))
        .up_to_n_times(1)
        .mount(&auth)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth2/Approval"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({"approval_key": "fresh-key"}),
        ))
        .mount(&auth)
        .await;

    let credentials = CredentialCache::new(CredentialCacheConfig {
        app_key: "app-key".to_string(),
        app_secret: "app-secret".to_string(),
        approval_base_url: auth.uri(),
        rest_base_url: auth.uri(),
        safety_margin: Duration::from_secs(60),
    })
    .unwrap();

    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start_with(test_upstream_config(&kis.url), Arc::new(credentials));
    let (_id, _rx) = bridge.listen("005930");

    let mut first = kis.next_connection().await;
    let (key, tr_type, symbol) = first.next_request().await;
    assert_eq!(
        (key.as_str(), tr_type.as_str(), symbol.as_str()),
        ("revoked-key", "1", "005930")
    );

    first.send_text(REJECTED_APPROVAL);
    first.expect_closed().await;

    let mut second = kis.next_connection().await;
    let (key, _, symbol) = second.next_request().await;
    assert_eq!((key.as_str(), symbol.as_str()), ("fresh-key", "005930"));

    let approvals = auth.received_requests().await.unwrap().len();
    assert_eq!(approvals, 2);
    bridge.cancel.cancel();
}

#[tokio::test]
async fn each_subscription_frame_carries_current_key() {
    let credentials = Arc::new(CountingCredentials::default());
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start_with(
        test_upstream_config(&kis.url),
        Arc::clone(&credentials) as Arc<dyn CredentialProvider>,
    );

    let (_a, _rx_a) = bridge.listen("005930");
    let mut conn = kis.next_connection().await;
    let (first_key, _, symbol) = conn.next_request().await;
    assert_eq!(symbol, "005930");
    assert_eq!(first_key, format!("key-{}", credentials.calls()));

    let (_b, _rx_b) = bridge.listen("000660");
    let (second_key, _, symbol) = conn.next_request().await;
    assert_eq!(symbol, "000660");
    assert_eq!(second_key, format!("key-{}", credentials.calls()));
    assert_ne!(first_key, second_key);

    kis.expect_no_connection().await;
    bridge.cancel.cancel();
}

#[tokio::test]
async fn credential_failure_on_subscribe_reconnects() {
    // Call 1 opens the connection, call 2 signs the first frame
    let credentials = Arc::new(CountingCredentials::failing_on(3));
    let mut kis = FakeKis::start().await;
    let bridge = UpstreamBridge::start_with(
        test_upstream_config(&kis.url),
        Arc::clone(&credentials) as Arc<dyn CredentialProvider>,
    );

    let (_a, _rx_a) = bridge.listen("005930");
    let mut first = kis.next_connection().await;
    first.next_request().await;

    let (_b, _rx_b) = bridge.listen("000660");
    first.expect_closed().await;

    let mut second = kis.next_connection().await;
    let mut subscribed = HashSet::new();
    for _ in 0..2 {
        let (_, tr_type, symbol) = second.next_request().await;
        assert_eq!(tr_type, "1");
        subscribed.insert(symbol);
    }
    assert_eq!(
        subscribed,
        HashSet::from(["005930".to_string(), "000660".to_string()])
    );
    assert!(
        bridge
            .status
            .last_error()
            .is_some_and(|e| e.contains("approval host down"))
    );
    bridge.cancel.cancel();
}
