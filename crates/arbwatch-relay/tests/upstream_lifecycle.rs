//! Upstream connection lifecycle against a mock server.

mod common;
use common::mock_ws::MockWsServer;

use std::sync::Arc;
use std::time::Duration;

use arbwatch_dashboard::{BroadcastHub, DashboardState, SystemSampler};
use arbwatch_relay::{
    Backoff, BlockWatcher, LinkState, RelayBridge, UpstreamConfig, UpstreamLink,
};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn config(url: String) -> UpstreamConfig {
    UpstreamConfig {
        url,
        backoff: Backoff {
            base: Duration::from_millis(10),
            max: Duration::from_millis(50),
            jitter: Duration::ZERO,
            max_attempts: 0,
        },
        dial_timeout: Duration::from_secs(2),
    }
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    timeout(Duration::from_secs(3), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition reached within timeout");
}

#[tokio::test]
async fn test_relay_republishes_upstream_frames() {
    let script = vec![
        json!({"event": "marketMetrics", "data": {"totalMarkets": 9}}).to_string(),
        json!({"event": "newBlock", "data": {"number": 77}}).to_string(),
    ];
    let server = MockWsServer::start(script).await;

    let state = DashboardState::new_relay_mode(BroadcastHub::default(), SystemSampler::new());
    let mut viewer = state.register_viewer();
    while viewer.try_recv().is_ok() {}

    let shutdown = CancellationToken::new();
    let link = Arc::new(UpstreamLink::new(
        config(server.url()),
        RelayBridge::new(state.clone()),
        shutdown.clone(),
    ));
    let task = {
        let link = link.clone();
        tokio::spawn(async move { link.run().await })
    };

    let metrics: Value = serde_json::from_str(
        &timeout(Duration::from_secs(3), viewer.recv())
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(metrics, json!({"event": "marketMetrics", "data": {"totalMarkets": 9}}));

    let status: Value = serde_json::from_str(
        &timeout(Duration::from_secs(3), viewer.recv())
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(status["event"], "systemStatus");
    assert_eq!(status["data"]["lastBlock"], 77);
    assert_eq!(link.state(), LinkState::Live);

    shutdown.cancel();
    assert!(task.await.unwrap().is_ok());
    assert_eq!(link.state(), LinkState::Idle);
    server.shutdown().await;
}

#[tokio::test]
async fn test_block_watcher_subscribes_on_connect() {
    let head = json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": "0x1", "result": {"number": "0x64", "timestamp": "0x6553f100"}}
    })
    .to_string();
    let server = MockWsServer::start(vec![head]).await;

    let state = DashboardState::new(BroadcastHub::default(), SystemSampler::new());
    let shutdown = CancellationToken::new();
    let link = Arc::new(UpstreamLink::new(
        config(server.url()),
        BlockWatcher::new(state.clone()),
        shutdown.clone(),
    ));
    let task = {
        let link = link.clone();
        tokio::spawn(async move { link.run().await })
    };

    wait_until(|| state.last_block() == 100).await;

    let received = timeout(Duration::from_secs(3), async {
        loop {
            let messages = server.received_messages().await;
            if !messages.is_empty() {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    let request: Value = serde_json::from_str(&received[0]).unwrap();
    assert_eq!(request["method"], "eth_subscribe");

    shutdown.cancel();
    task.await.unwrap().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_after_upstream_drops() {
    let script = vec![json!({"event": "profit", "data": {"profit": 1.0}}).to_string()];
    let server = MockWsServer::start_closing(script).await;

    let state = DashboardState::new_relay_mode(BroadcastHub::default(), SystemSampler::new());
    let shutdown = CancellationToken::new();
    let link = Arc::new(UpstreamLink::new(
        config(server.url()),
        RelayBridge::new(state),
        shutdown.clone(),
    ));
    let task = {
        let link = link.clone();
        tokio::spawn(async move { link.run().await })
    };

    timeout(Duration::from_secs(3), async {
        while server.connection_count().await < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("link keeps redialing");

    shutdown.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(link.state(), LinkState::Idle);
    server.shutdown().await;
}

/// Accepts TCP connections and holds them open without ever answering the
/// WebSocket handshake.
async fn silent_listener() -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (url, task)
}

#[tokio::test]
async fn test_cancel_interrupts_stalled_handshake() {
    let (url, listener) = silent_listener().await;

    let state = DashboardState::new_relay_mode(BroadcastHub::default(), SystemSampler::new());
    let shutdown = CancellationToken::new();
    let link = Arc::new(UpstreamLink::new(
        UpstreamConfig {
            dial_timeout: Duration::from_secs(60),
            ..config(url)
        },
        RelayBridge::new(state),
        shutdown.clone(),
    ));
    let task = {
        let link = link.clone();
        tokio::spawn(async move { link.run().await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(link.state(), LinkState::Dialing);
    shutdown.cancel();

    let result = timeout(Duration::from_secs(5), task)
        .await
        .expect("run returns promptly after cancel")
        .unwrap();
    tokio_test::assert_ok!(result);
    assert_eq!(link.state(), LinkState::Idle);
    listener.abort();
}

#[tokio::test]
async fn test_stalled_handshake_times_out() {
    let (url, listener) = silent_listener().await;

    let state = DashboardState::new_relay_mode(BroadcastHub::default(), SystemSampler::new());
    let link = UpstreamLink::new(
        UpstreamConfig {
            dial_timeout: Duration::from_millis(100),
            backoff: Backoff {
                max_attempts: 1,
                ..config(String::new()).backoff
            },
            url,
        },
        RelayBridge::new(state),
        CancellationToken::new(),
    );

    let result = timeout(Duration::from_secs(5), link.run())
        .await
        .expect("dial gives up within the timeout");
    assert!(matches!(result, Err(arbwatch_relay::RelayError::GaveUp { attempts: 1, .. })));
    listener.abort();
}
