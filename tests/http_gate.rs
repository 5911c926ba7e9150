use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tokio::sync::oneshot;

use roadbook_gate::http::{
    build_router, CorsPolicy, ErrorResponse, HttpServer, RateLimitGate, RATE_LIMITED_MESSAGE,
};
use roadbook_gate::ratelimit::{LimiterRegistry, ManualClock, RateLimitSettings};

struct TestServer {
    addr: SocketAddr,
    clock: Arc<ManualClock>,
    registry: Arc<LimiterRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(settings: RateLimitSettings, trust_forwarded: bool) -> Self {
        let clock = Arc::new(ManualClock::new(Instant::now()));
        let registry = Arc::new(LimiterRegistry::with_clock(settings, clock.clone()));
        let gate = RateLimitGate::new(registry.clone()).trust_forwarded_headers(trust_forwarded);
        let cors = CorsPolicy::new(vec!["https://roadbook.example".to_string()]);

        let server = HttpServer::bind("127.0.0.1:0".parse().unwrap(), build_router(gate, cors))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        tokio::spawn(server.serve_with_shutdown(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            clock,
            registry,
            shutdown: Some(tx),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[tokio::test]
async fn test_second_ping_is_rate_limited() {
    let server = TestServer::start(RateLimitSettings::default(), false).await;
    let client = reqwest::Client::new();

    let first = client.get(server.url("/api/ping")).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.text().await.unwrap(), "pong");

    let second = client.get(server.url("/api/ping")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: ErrorResponse = second.json().await.unwrap();
    assert_eq!(body.code, 429);
    assert_eq!(body.message, RATE_LIMITED_MESSAGE);

    assert!(server.registry.contains("127.0.0.1"));
}

#[tokio::test]
async fn test_ping_allowed_again_after_refill() {
    let server = TestServer::start(RateLimitSettings::default(), false).await;
    let client = reqwest::Client::new();

    assert_eq!(
        client.get(server.url("/api/ping")).send().await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        client.get(server.url("/api/ping")).send().await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    server.clock.advance(Duration::from_secs(1));
    assert_eq!(
        client.get(server.url("/api/ping")).send().await.unwrap().status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let server = TestServer::start(RateLimitSettings::default(), false).await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let response = client.get(server.url("/health")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }
    assert!(server.registry.is_empty());
}

#[tokio::test]
async fn test_forwarded_identities_are_isolated() {
    let server = TestServer::start(RateLimitSettings::default(), true).await;
    let client = reqwest::Client::new();

    for ip in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
        let response = client
            .get(server.url("/api/ping"))
            .header("X-Forwarded-For", ip)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "first request from {}", ip);
    }

    let repeat = client
        .get(server.url("/api/ping"))
        .header("X-Forwarded-For", "198.51.100.2")
        .send()
        .await
        .unwrap();
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(server.registry.len(), 3);
}

#[tokio::test]
async fn test_burst_capacity_over_http() {
    let settings = RateLimitSettings {
        burst_capacity: 3,
        ..RateLimitSettings::default()
    };
    let server = TestServer::start(settings, false).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for _ in 0..4 {
        statuses.push(client.get(server.url("/api/ping")).send().await.unwrap().status());
    }

    assert_eq!(
        statuses,
        vec![
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::OK,
            StatusCode::TOO_MANY_REQUESTS
        ]
    );
}

#[tokio::test]
async fn test_cors_headers_and_preflight() {
    let server = TestServer::start(RateLimitSettings::default(), false).await;
    let client = reqwest::Client::new();

    let preflight = client
        .request(reqwest::Method::OPTIONS, server.url("/api/ping"))
        .header("Origin", "https://roadbook.example")
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        preflight.headers()["access-control-allow-origin"],
        "https://roadbook.example"
    );
    assert_eq!(
        preflight.headers()["access-control-allow-methods"],
        "GET, POST, OPTIONS"
    );
    // Preflight does not spend a token
    assert!(server.registry.is_empty());

    let foreign = client
        .get(server.url("/api/ping"))
        .header("Origin", "https://elsewhere.example")
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::OK);
    assert!(foreign.headers().get("access-control-allow-origin").is_none());

    // Throttled responses still carry CORS headers
    let limited = client
        .get(server.url("/api/ping"))
        .header("Origin", "https://roadbook.example")
        .send()
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        limited.headers()["access-control-allow-origin"],
        "https://roadbook.example"
    );
}
