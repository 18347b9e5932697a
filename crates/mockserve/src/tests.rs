//! Tests for the mock server.
//!
//! This module covers:
//! - Server lifecycle (bind before return, ephemeral ports, close)
//! - Dispatch (404 fallback, mode switching, unknown modes)
//! - Capture queue behaviour through a running server

use super::*;
use std::time::{Duration, Instant};

const HOST: &str = "127.0.0.1";
const SHORT: Duration = Duration::from_millis(500);
const OVERALL: Duration = Duration::from_secs(10);

fn config_with(mode: &str, responses: Vec<ResponseData>) -> Configuration {
    Configuration::new(HOST, 0, 5).with_mode(mode, responses)
}

#[tokio::test]
async fn test_start_binds_ephemeral_port() {
    logging::init_test_tracing();
    let server = MockServer::start(Configuration::new(HOST, 0, 1)).await.unwrap();

    assert_ne!(server.port(), 0);
    assert_eq!(server.address().port(), server.port());
    assert_eq!(server.host(), HOST);
    assert_eq!(server.url("/x"), format!("http://127.0.0.1:{}/x", server.port()));

    // Listener is up as soon as start returns
    tokio::net::TcpStream::connect(server.address()).await.unwrap();
    server.close().await;
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let result = MockServer::start(Configuration::new(HOST, 0, 0)).await;
    assert!(matches!(
        result,
        Err(ServerError::Config(ConfigError::ZeroChannelSize))
    ));
}

#[tokio::test]
async fn test_start_fails_on_port_in_use() {
    let first = MockServer::start(Configuration::new(HOST, 0, 1)).await.unwrap();
    let result = MockServer::start(Configuration::new(HOST, first.port(), 1)).await;
    assert!(matches!(result, Err(ServerError::Bind(..))));
    first.close().await;
}

#[tokio::test]
async fn test_matched_and_unmatched_requests() {
    logging::init_test_tracing();
    let stub = ResponseData::new("GET", "/a", 200).with_body("x");
    let server = MockServer::start(config_with(DEFAULT_MODE, vec![stub]))
        .await
        .unwrap();
    let port = server.port();

    let response = do_request(HOST, port, &RequestData::new("GET", "/a"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "x");

    let response = do_request(HOST, port, &RequestData::new("POST", "/a"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert!(response.body.is_empty());

    let response = do_request(HOST, port, &RequestData::new("GET", "/b"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);

    // Unmatched requests are captured too, in arrival order
    let uris: Vec<(String, String)> = [0, 1, 2]
        .iter()
        .map(|_| server.try_next_request().unwrap())
        .map(|r| (r.method, r.uri))
        .collect();
    assert_eq!(
        uris,
        vec![
            ("GET".to_string(), "/a".to_string()),
            ("POST".to_string(), "/a".to_string()),
            ("GET".to_string(), "/b".to_string()),
        ]
    );
    assert_eq!(server.pending_requests(), 0);

    server.close().await;
}

#[tokio::test]
async fn test_mode_switching() {
    let config = Configuration::new(HOST, 0, 5)
        .with_mode(
            "m1",
            vec![ResponseData::new("PUT", "/text", 201).with_body("ok")],
        )
        .with_mode(
            "m2",
            vec![ResponseData::new("GET", "/json", 200).with_body("{}")],
        );
    let server = MockServer::start(config).await.unwrap();
    let port = server.port();
    assert_eq!(server.modes(), vec!["m1".to_string(), "m2".to_string()]);

    server.set_mode("m2");
    assert_eq!(server.mode(), "m2");
    let response = do_request(HOST, port, &RequestData::new("GET", "/json"))
        .await
        .unwrap();
    assert_eq!((response.status, response.body.as_str()), (200, "{}"));
    let response = do_request(HOST, port, &RequestData::new("PUT", "/text"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);

    server.set_mode("m1");
    let response = do_request(HOST, port, &RequestData::new("PUT", "/text"))
        .await
        .unwrap();
    assert_eq!((response.status, response.body.as_str()), (201, "ok"));

    server.set_mode("nope");
    for request in [RequestData::new("PUT", "/text"), RequestData::new("GET", "/json")] {
        let response = do_request(HOST, port, &request).await.unwrap();
        assert_eq!(response.status, 404);
    }

    server.close().await;
}

#[tokio::test]
async fn test_no_default_mode_is_all_404() {
    let server = MockServer::start(config_with(
        "only",
        vec![ResponseData::new("GET", "/a", 200)],
    ))
    .await
    .unwrap();

    assert_eq!(server.mode(), DEFAULT_MODE);
    let response = do_request(HOST, server.port(), &RequestData::new("GET", "/a"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);

    server.close().await;
}

#[tokio::test]
async fn test_configured_default_mode() {
    let mut config = config_with("warm", vec![ResponseData::new("GET", "/a", 204)]);
    config.default_mode = "warm".to_string();
    let server = MockServer::start(config).await.unwrap();

    let response = do_request(HOST, server.port(), &RequestData::new("GET", "/a"))
        .await
        .unwrap();
    assert_eq!(response.status, 204);

    server.close().await;
}

#[tokio::test]
async fn test_capture_stamped_with_server_address() {
    let server = MockServer::start(config_with(DEFAULT_MODE, vec![]))
        .await
        .unwrap();

    let request = RequestData::new("POST", "/submit?id=7")
        .with_body("payload")
        .with_header("X-Trace", "abc");
    do_request(HOST, server.port(), &request).await.unwrap();

    let captured = wait_for_server_request(&server, SHORT, OVERALL)
        .await
        .unwrap();
    assert_eq!(captured.uri, "/submit?id=7");
    assert_eq!(captured.body, "payload");
    assert_eq!(captured.headers.first("x-trace"), Some("abc"));
    assert_eq!(captured.host, HOST);
    assert_eq!(captured.port, server.port());
    compare_requests(&request, &captured, HOST, server.port()).assert_ok();

    server.close().await;
}

#[tokio::test]
async fn test_wait_without_requests_times_out() {
    let server = MockServer::start(Configuration::new(HOST, 0, 1)).await.unwrap();

    let start = Instant::now();
    let result = wait_for_server_request(&server, Duration::from_millis(200), OVERALL).await;
    assert_eq!(
        result,
        Err(CaptureError::Timeout(Duration::from_millis(200)))
    );
    assert!(start.elapsed() < Duration::from_secs(5));

    server.close().await;
}

#[tokio::test]
async fn test_full_capture_queue_drops_without_blocking_reply() {
    let mut config = Configuration::new(HOST, 0, 1).with_mode(
        DEFAULT_MODE,
        vec![ResponseData::new("GET", "/a", 200).with_body("x")],
    );
    config.capture_timeout = Duration::from_millis(50);
    let server = MockServer::start(config).await.unwrap();

    for _ in 0..2 {
        let response = do_request(HOST, server.port(), &RequestData::new("GET", "/a"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    assert_eq!(server.dropped_captures(), 1);
    assert_eq!(server.pending_requests(), 1);
    assert!(server.try_next_request().is_some());
    assert!(server.try_next_request().is_none());

    server.close().await;
}

#[tokio::test]
async fn test_client_hangup_while_queue_full_counts_as_dropped() {
    use tokio::io::AsyncWriteExt;

    logging::init_test_tracing();
    let mut config = config_with(DEFAULT_MODE, vec![ResponseData::new("GET", "/a", 200)]);
    config.channel_size = 1;
    config.capture_timeout = Duration::from_secs(10);
    let server = MockServer::start(config).await.unwrap();
    assert_eq!(server.config().capture_timeout, Duration::from_secs(10));

    do_request(HOST, server.port(), &RequestData::new("GET", "/a"))
        .await
        .unwrap();
    assert_eq!(server.pending_requests(), 1);

    // Second request parks its handler on the full queue, then the client goes away
    let mut stream = tokio::net::TcpStream::connect(server.address()).await.unwrap();
    stream
        .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(stream);

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.dropped_captures() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.dropped_captures(), 1);
    assert_eq!(server.pending_requests(), 1);

    assert_eq!(server.try_next_request().unwrap().uri, "/a");
    assert_eq!(server.pending_requests(), 0);
    assert!(server.try_next_request().is_none());

    server.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent_and_releases_port() {
    let server = MockServer::start(Configuration::new(HOST, 0, 1)).await.unwrap();
    let port = server.port();

    server.close().await;
    server.close().await;

    let result = do_request(HOST, port, &RequestData::new("GET", "/")).await;
    assert!(matches!(result, Err(ClientError::Transport { .. })));

    assert_eq!(
        server.wait_for_request(SHORT, OVERALL).await,
        Err(CaptureError::Closed)
    );

    // Port can be bound again
    let again = MockServer::start(Configuration::new(HOST, port, 1)).await.unwrap();
    again.close().await;
}

#[tokio::test]
async fn test_close_waits_for_delayed_response() {
    let stub = ResponseData::new("GET", "/slow", 200)
        .with_body("late")
        .with_wait(Duration::from_millis(300));
    let server = MockServer::start(config_with(DEFAULT_MODE, vec![stub]))
        .await
        .unwrap();
    let port = server.port();

    let in_flight = tokio::spawn(async move {
        do_request(HOST, port, &RequestData::new("GET", "/slow")).await
    });

    // Make sure the request has been captured, i.e. it is being handled
    wait_for_server_request(&server, Duration::from_secs(2), OVERALL)
        .await
        .unwrap();
    server.close().await;

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "late");
}

#[tokio::test]
async fn test_invalid_client_input() {
    let result = do_request(HOST, 1, &RequestData::new("BAD METHOD", "/")).await;
    assert!(matches!(result, Err(ClientError::InvalidMethod(_))));

    let request = RequestData::new("GET", "/").with_header("X-Bad", "line\nbreak");
    let result = do_request(HOST, 1, &request).await;
    assert!(matches!(result, Err(ClientError::InvalidHeader(_))));
}
