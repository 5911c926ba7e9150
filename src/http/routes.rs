//! Router assembly, CORS handling and the built-in endpoints.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ORIGIN,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use super::gate::{enforce, RateLimitGate};

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

/// Origins allowed to read responses from a browser.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allowed_origins: Arc<Vec<String>>,
}

impl CorsPolicy {
    /// Allow exactly the listed origins.
    pub fn new(allowed_origins: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_origins: Arc::new(allowed_origins.into_iter().collect()),
        }
    }

    /// Whether `origin` may be echoed back.
    pub fn allows(&self, origin: &HeaderValue) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed.as_bytes() == origin.as_bytes())
    }
}

/// Build the application router.
///
/// ```text
/// /health     - liveness probe, never throttled
/// /api/ping   - throttled by the rate limit gate
/// ```
///
/// CORS wraps everything, so preflight requests are answered before the
/// gate and never spend a token.
pub fn build_router(gate: RateLimitGate, cors: CorsPolicy) -> Router {
    let api = Router::new()
        .route("/api/ping", get(ping))
        .route_layer(middleware::from_fn_with_state(gate, enforce));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(middleware::from_fn_with_state(cors, apply_cors))
}

/// Middleware adding CORS headers and answering preflight requests.
pub async fn apply_cors(State(policy): State<CorsPolicy>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(ORIGIN)
        .filter(|origin| policy.allows(origin))
        .cloned();

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    if let Some(origin) = origin {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    response
}

async fn ping() -> &'static str {
    "pong"
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_policy_matches_exactly() {
        let policy = CorsPolicy::new(vec!["https://roadbook.example".to_string()]);

        assert!(policy.allows(&HeaderValue::from_static("https://roadbook.example")));
        assert!(!policy.allows(&HeaderValue::from_static("https://roadbook.example.evil")));
        assert!(!policy.allows(&HeaderValue::from_static("null")));
    }

    #[test]
    fn test_empty_cors_policy_allows_nothing() {
        let policy = CorsPolicy::default();
        assert!(!policy.allows(&HeaderValue::from_static("http://localhost:3000")));
    }
}
