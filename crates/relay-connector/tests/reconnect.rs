//! Supervised reconnection against an echo server that drops or disappears.

mod support;

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use relay_connector::{ConnectionState, Connector, SubscriptionFilter};
use relay_core::{CanonicalEvent, ConnectorError};
use tokio::sync::mpsc;

use support::{EchoServer, TIMEOUT, next_event, next_matching};

async fn lifecycle(connector: &Connector) -> mpsc::UnboundedReceiver<CanonicalEvent> {
    connector
        .subscribe_channel(SubscriptionFilter::all().tag("lifecycle"))
        .await
        .unwrap()
        .1
}

fn is(name: &'static str) -> impl FnMut(&CanonicalEvent) -> bool {
    move |event| event.event_type() == name
}

#[tokio::test]
async fn gives_up_after_max_attempts_with_doubling_delays() {
    let server = EchoServer::start().await;
    let connector = Connector::builder("flaky")
        .max_reconnect_attempts(3)
        .reconnect_base_delay(Duration::from_millis(20))
        .reconnect_stability(Duration::from_secs(60))
        .build()
        .unwrap();
    let mut events = lifecycle(&connector).await;
    connector.connect(&server.url).await.unwrap();
    let _ = next_matching(&mut events, is("connection_established")).await;

    server.shutdown();

    let terminated = next_matching(&mut events, is("connection_terminated")).await;
    assert_eq!(terminated.payload()["expected"], false);

    let lost = tokio::time::timeout(TIMEOUT, connector.connection_lost())
        .await
        .unwrap();
    assert_matches!(lost, ConnectorError::ConnectionLost { attempts: 3, ref url } if *url == server.url);
    assert_eq!(connector.state(), ConnectionState::GivingUp);

    let lost_event = next_matching(&mut events, is("connection_lost")).await;
    assert_eq!(lost_event.payload()["attempts"], 3);

    let status = connector.status().await.unwrap();
    assert_eq!(status.reconnect.attempts, 3);
    assert_eq!(status.reconnect.scheduled_delays_ms, vec![20, 40, 80]);
    // Three failed dials
    assert_eq!(status.metrics.error_count, 3);
}

#[tokio::test]
async fn reconnect_attempts_wait_out_the_backoff() {
    let server = EchoServer::start().await;
    let connector = Connector::builder("patient")
        .max_reconnect_attempts(3)
        .reconnect_base_delay(Duration::from_millis(50))
        .reconnect_stability(Duration::from_secs(60))
        .build()
        .unwrap();
    connector.connect(&server.url).await.unwrap();

    server.refuse_handshakes();
    let dropped_at = Instant::now();
    server.kick_all();

    let _ = tokio::time::timeout(TIMEOUT, connector.connection_lost())
        .await
        .unwrap();
    assert!(dropped_at.elapsed() >= Duration::from_millis(350));

    let accepts = server.accept_times();
    assert_eq!(accepts.len(), 4);
    let mut previous = dropped_at;
    for (attempt, expected) in accepts[1..].iter().zip([50, 100, 200]) {
        let waited = attempt.duration_since(previous);
        assert!(
            waited >= Duration::from_millis(expected),
            "waited {waited:?}, expected at least {expected}ms"
        );
        previous = *attempt;
    }
}

#[tokio::test]
async fn reconnects_and_reopens_channels() {
    let server = EchoServer::start().await;
    let connector = Connector::builder("resilient")
        .reconnect_base_delay(Duration::from_millis(20))
        .build()
        .unwrap();
    let _ = connector.create_channel("chat_message").await.unwrap();
    let mut events = lifecycle(&connector).await;
    connector.connect(&server.url).await.unwrap();
    let _ = next_matching(&mut events, is("connection_established")).await;

    server.kick_all();

    let established = next_matching(&mut events, is("connection_established")).await;
    assert_eq!(established.payload()["reconnectAttempts"], 1);
    assert_eq!(connector.state(), ConnectionState::Connected);
    assert_eq!(server.accepted(), 2);

    let channels = connector.channels().await.unwrap();
    assert_eq!(channels.len(), 2);
    assert!(!channels[0].is_open);
    assert!(channels[1].is_open);
    assert_eq!(channels[1].category_filter, "chat_message");
}

#[tokio::test]
async fn stable_links_reset_the_attempt_counter() {
    let server = EchoServer::start().await;
    let connector = Connector::builder("stable")
        .reconnect_base_delay(Duration::from_millis(10))
        .reconnect_stability(Duration::ZERO)
        .build()
        .unwrap();
    let mut events = lifecycle(&connector).await;
    connector.connect(&server.url).await.unwrap();
    let _ = next_matching(&mut events, is("connection_established")).await;

    for _ in 0..2 {
        server.kick_all();
        let established = next_matching(&mut events, is("connection_established")).await;
        assert_eq!(established.payload()["reconnectAttempts"], 1);
    }
}

#[tokio::test]
async fn short_lived_links_keep_counting() {
    let server = EchoServer::start().await;
    let connector = Connector::builder("unstable")
        .reconnect_base_delay(Duration::from_millis(10))
        .reconnect_stability(Duration::from_secs(60))
        .build()
        .unwrap();
    let mut events = lifecycle(&connector).await;
    connector.connect(&server.url).await.unwrap();
    let _ = next_matching(&mut events, is("connection_established")).await;

    server.kick_all();
    let first = next_matching(&mut events, is("connection_established")).await;
    assert_eq!(first.payload()["reconnectAttempts"], 1);

    server.kick_all();
    let second = next_matching(&mut events, is("connection_established")).await;
    assert_eq!(second.payload()["reconnectAttempts"], 2);
}

#[tokio::test]
async fn disabled_auto_reconnect_gives_up_immediately() {
    let server = EchoServer::start().await;
    let connector = Connector::builder("one-shot")
        .auto_reconnect(false)
        .build()
        .unwrap();
    connector.connect(&server.url).await.unwrap();

    server.kick_all();

    let lost = tokio::time::timeout(TIMEOUT, connector.connection_lost())
        .await
        .unwrap();
    assert_matches!(lost, ConnectorError::ConnectionLost { attempts: 0, .. });
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let server = EchoServer::start().await;
    let connector = Connector::builder("cancelled")
        .reconnect_base_delay(Duration::from_millis(300))
        .build()
        .unwrap();
    let mut events = lifecycle(&connector).await;
    connector.connect(&server.url).await.unwrap();
    let _ = next_matching(&mut events, is("connection_established")).await;

    server.kick_all();
    let _ = next_matching(&mut events, is("connection_terminated")).await;
    assert_eq!(connector.state(), ConnectionState::Reconnecting);

    connector.disconnect().await.unwrap();
    assert_eq!(connector.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(connector.state(), ConnectionState::Disconnected);
    assert_eq!(server.accepted(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn manual_connect_recovers_from_giving_up() {
    let server = EchoServer::start().await;
    let connector = Connector::builder("revived")
        .auto_reconnect(false)
        .build()
        .unwrap();
    let mut events = lifecycle(&connector).await;
    connector.connect(&server.url).await.unwrap();
    let _ = next_event(&mut events).await;

    server.kick_all();
    let _ = tokio::time::timeout(TIMEOUT, connector.connection_lost())
        .await
        .unwrap();

    connector.connect(&server.url).await.unwrap();
    assert_eq!(connector.state(), ConnectionState::Connected);
    let status = connector.status().await.unwrap();
    assert_eq!(status.reconnect.attempts, 0);
}
