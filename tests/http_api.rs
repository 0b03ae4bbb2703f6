//! End-to-end tests against a live listener
//!
//! Each test boots the full router on an ephemeral port and drives it with
//! a real HTTP client, covering the stream round-trip, the command wait
//! flow, and subscriber disconnect cleanup.

use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use yakapi::ci;
use yakapi::server::{self, AppState, ServerConfig};

async fn spawn_server(config: ServerConfig) -> (String, AppState, CancellationToken) {
    let state = AppState::new(config).unwrap();
    let cancel = CancellationToken::new();
    server::spawn_background(&state, &cancel).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state, cancel)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

/// Read from a chunked response until `want` bytes have arrived
async fn read_exact(resp: reqwest::Response, want: usize) -> Vec<u8> {
    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();

    let deadline = Instant::now() + Duration::from_secs(5);
    while buf.len() < want {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let chunk = tokio::time::timeout(remaining, stream.next())
            .await
            .expect("timed out reading stream")
            .expect("stream ended early")
            .expect("stream errored");
        buf.extend_from_slice(&chunk);
    }

    buf
}

#[tokio::test]
async fn stream_round_trip_delivers_body_and_newline() {
    let (base, state, _cancel) = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    // Subscribe first so the POSTed item has somewhere to go.
    let subscription = client
        .get(format!("{base}/v1/stream/rt"))
        .send()
        .await
        .unwrap();
    assert!(subscription.status().is_success());
    wait_until(|| state.manager.stream_stats("rt").map(|s| s.readers) == Some(1)).await;

    let post = client
        .post(format!("{base}/v1/stream/rt"))
        .body("{\"v\":1}")
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), reqwest::StatusCode::OK);

    let frame = read_exact(subscription, "{\"v\":1}\n".len()).await;
    assert_eq!(frame, b"{\"v\":1}\n");
}

#[tokio::test]
async fn every_subscriber_observes_the_publish() {
    let (base, state, _cancel) = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let mut subscriptions = Vec::new();
    for _ in 0..3 {
        let resp = client
            .get(format!("{base}/v1/stream/t"))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        subscriptions.push(resp);
    }
    wait_until(|| state.manager.stream_stats("t").map(|s| s.readers) == Some(3)).await;

    client
        .post(format!("{base}/v1/stream/t"))
        .body("{\"v\":1}")
        .send()
        .await
        .unwrap();

    for resp in subscriptions {
        let frame = read_exact(resp, "{\"v\":1}\n".len()).await;
        assert_eq!(frame, b"{\"v\":1}\n");
    }

    // All subscribers are gone; the registry must empty out.
    wait_until(|| {
        state
            .manager
            .stream_stats("t")
            .map(|s| s.readers)
            .unwrap_or(0)
            == 0
    })
    .await;
}

#[tokio::test]
async fn disconnecting_subscriber_releases_its_reader() {
    let (base, state, _cancel) = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    let subscription = client
        .get(format!("{base}/v1/stream/gone"))
        .send()
        .await
        .unwrap();
    wait_until(|| state.manager.stream_stats("gone").map(|s| s.readers) == Some(1)).await;

    drop(subscription);

    wait_until(|| state.manager.stream_stats("gone").is_none()).await;
}

#[tokio::test]
async fn ci_wait_returns_result_when_it_arrives() {
    let config = ServerConfig {
        ci_wait_timeout: Duration::from_secs(5),
        ci_poll_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let (base, state, _cancel) = spawn_server(config).await;
    let client = reqwest::Client::new();

    // The result collector must be listening before a result is published.
    wait_until(|| state.manager.stream_stats(ci::RESULT_STREAM).is_some()).await;

    let mut commands = state.manager.get_reader(ci::COMMAND_STREAM);

    let wait_request = {
        let base = base.clone();
        let client = client.clone();
        tokio::spawn(async move {
            client
                .post(format!("{base}/v1/ci?wait=1"))
                .header("content-type", "application/json")
                .body("{\"command\":\"fwd 10\"}")
                .send()
                .await
                .unwrap()
        })
    };

    let accepted: ci::Command =
        serde_json::from_slice(&commands.recv().await.unwrap()).unwrap();
    assert_eq!(accepted.cmd, "fwd");
    assert_eq!(accepted.args, "10");

    let result = format!("{{\"id\":\"{}\",\"result\":\"ok\"}}", accepted.id);
    client
        .post(format!("{base}/v1/stream/{}", ci::RESULT_STREAM))
        .body(result)
        .send()
        .await
        .unwrap();

    let response = wait_request.await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["id"], accepted.id.as_str());
    assert_eq!(body["result"], "ok");

    // The collector keeps only the most recent 256 results; flood the ring
    // and the original id is displaced.
    for n in 0..300 {
        state.results.store(ci::CommandResult {
            id: format!("flood-{n}"),
            result: "ok".into(),
            error: String::new(),
        });
    }
    assert!(state.results.fetch(&accepted.id).is_none());
}

#[tokio::test]
async fn ci_wait_times_out_with_service_unavailable() {
    let config = ServerConfig {
        ci_wait_timeout: Duration::from_millis(200),
        ci_poll_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    };
    let (base, _state, _cancel) = spawn_server(config).await;
    let client = reqwest::Client::new();

    let started = Instant::now();
    let response = client
        .post(format!("{base}/v1/ci?wait=1"))
        .header("content-type", "application/json")
        .body("{\"command\":\"fwd 10\"}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert!(started.elapsed() >= Duration::from_millis(200));
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn telemetry_publish_feeds_gauges() {
    let (base, state, _cancel) = spawn_server(ServerConfig::default()).await;
    let client = reqwest::Client::new();

    // The gauge aggregator must be subscribed before the publish.
    wait_until(|| {
        state
            .manager
            .stream_stats(yakapi::telemetry::TELEMETRY_STREAM)
            .is_some()
    })
    .await;

    client
        .post(format!("{base}/v1/stream/telemetry"))
        .body("{\"speed\":\"1.5\"}")
        .send()
        .await
        .unwrap();

    wait_until(|| state.metrics.has_telemetry_gauge("speed")).await;

    let text = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("telemetry_speed 1.5"));
}
