//! Resilience behavior against a mock server.

use std::time::Duration;

use opencode_client::{
    CircuitState, ClientConfig, ErrorKind, OpencodeClient, Request, Session,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        retry_delay_seconds: 0.01,
        max_retry_jitter_secs: 0.0,
        ..Default::default()
    }
}

fn session_json(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "projectID": "proj-1",
        "directory": "/repo",
        "title": "Test Session",
        "version": "1",
        "time": { "created": 1.0, "updated": 1.0 }
    })
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or(0)
}

#[tokio::test]
async fn test_circuit_opens_after_threshold() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([session_json("ses_1")])))
        .mount(&server)
        .await;

    let client = OpencodeClient::from_config(ClientConfig {
        enable_retry: false,
        circuit_breaker_threshold: 3,
        circuit_breaker_duration_secs: 1.0,
        ..config(&server)
    })
    .unwrap();

    for _ in 0..3 {
        let err = client.sessions().list().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientServer);
        assert_eq!(err.status(), Some(500));
    }
    let breaker = client.circuit_breaker().unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Fails fast without touching the network.
    let err = client.sessions().list().await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(request_count(&server).await, 3);

    // After the cool-down a probe goes through and closes the circuit.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let sessions: Vec<Session> = client.sessions().list().await.unwrap();
    assert_eq!(sessions[0].id, "ses_1");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(request_count(&server).await, 4);
}

#[tokio::test]
async fn test_not_found_never_trips_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "name": "NotFoundError",
            "data": { "message": "Session not found: missing" }
        })))
        .mount(&server)
        .await;

    let client = OpencodeClient::from_config(ClientConfig {
        circuit_breaker_threshold: 3,
        ..config(&server)
    })
    .unwrap();

    for _ in 0..10 {
        let err = client.sessions().get("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.attempts(), 1);
        assert!(err.to_string().contains("Session not found: missing"));
    }

    assert_eq!(client.circuit_breaker().unwrap().state(), CircuitState::Closed);
    assert_eq!(request_count(&server).await, 10);
}

#[tokio::test]
async fn test_retry_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session/ses_1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/session/ses_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json("ses_1")))
        .mount(&server)
        .await;

    let client = OpencodeClient::from_config(config(&server)).unwrap();
    let session = client.sessions().get("ses_1").await.unwrap();

    assert_eq!(session.title, "Test Session");
    assert_eq!(request_count(&server).await, 3);
    assert_eq!(client.circuit_breaker().unwrap().snapshot().consecutive_failures, 0);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/project"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/project"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = OpencodeClient::from_config(config(&server)).unwrap();
    assert!(client.projects().list().await.unwrap().is_empty());
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_retry_exhausted_counts_one_breaker_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "overloaded"})))
        .mount(&server)
        .await;

    let client = OpencodeClient::from_config(ClientConfig {
        max_retry_attempts: 2,
        ..config(&server)
    })
    .unwrap();

    let err = client.sessions().list().await.unwrap_err();
    assert_eq!(err.attempts(), 3);
    assert_eq!(err.status(), Some(503));
    assert!(err.is_transient());
    assert!(err.to_string().contains("overloaded"));
    assert_eq!(request_count(&server).await, 3);
    assert_eq!(client.circuit_breaker().unwrap().snapshot().consecutive_failures, 1);
}

#[tokio::test]
async fn test_operation_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = OpencodeClient::from_config(ClientConfig {
        enable_retry: false,
        operation_timeout_secs: 1.0,
        ..config(&server)
    })
    .unwrap();

    let started = std::time::Instant::now();
    let err = client.sessions().list().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.is_transient());
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_connection_failure_is_retried() {
    // Bind and release a port so nothing listens on it.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = OpencodeClient::from_config(ClientConfig {
        base_url: format!("http://127.0.0.1:{port}"),
        max_retry_attempts: 1,
        retry_delay_seconds: 0.01,
        max_retry_jitter_secs: 0.0,
        ..Default::default()
    })
    .unwrap();

    let err = client.health().check().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.attempts(), 2);
    assert!(err.to_string().contains("is it running?"));
    assert!(!client.health().is_healthy().await);
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/session"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let client = OpencodeClient::from_config(config(&server))
        .unwrap()
        .with_cancellation(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    let err = client.sessions().list().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!err.is_transient());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.circuit_breaker().unwrap().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_cancellation_aborts_unterminated_error_body() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // A 503 whose body never completes, on a stream call with no deadline.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        socket
            .write_all(
                b"HTTP/1.1 503 Service Unavailable\r\n\
                  content-type: text/plain\r\n\
                  content-length: 1000\r\n\r\n\
                  overloaded",
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(socket);
    });

    let token = CancellationToken::new();
    let client = OpencodeClient::from_config(ClientConfig {
        base_url: format!("http://{addr}"),
        enable_retry: false,
        enable_operation_timeout: false,
        ..Default::default()
    })
    .unwrap()
    .with_cancellation(token.clone());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    let err = client.open_stream(Request::get("event")).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
}
