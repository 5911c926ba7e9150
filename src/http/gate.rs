//! Rate limit gate in front of the API routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::response::ErrorResponse;
use crate::ratelimit::{ClientIdentity, LimiterRegistry};

/// Message sent with every 429 response.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests, please try again later.";

/// Adapter between the HTTP pipeline and the [`LimiterRegistry`].
///
/// The gate holds no state of its own; clones share the same registry.
#[derive(Debug, Clone)]
pub struct RateLimitGate {
    registry: Arc<LimiterRegistry>,
    trust_forwarded_headers: bool,
}

impl RateLimitGate {
    /// Create a gate that keys clients by their peer address.
    pub fn new(registry: Arc<LimiterRegistry>) -> Self {
        Self {
            registry,
            trust_forwarded_headers: false,
        }
    }

    /// Key clients by `X-Forwarded-For` / `X-Real-IP` when present.
    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded_headers = trust;
        self
    }

    /// The registry this gate consults.
    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    /// Derive the identity of a request.
    pub fn identify(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientIdentity {
        ClientIdentity::resolve(
            peer,
            |name| headers.get(name).and_then(|v| v.to_str().ok()),
            self.trust_forwarded_headers,
        )
    }

    /// Ask the registry whether `identity` may proceed now.
    pub fn admit(&self, identity: &ClientIdentity) -> Result<(), RateLimited> {
        if self.registry.check(identity.as_str()) {
            Ok(())
        } else {
            Err(RateLimited {
                identity: identity.clone(),
            })
        }
    }
}

/// Rejection produced when a client's bucket is empty.
#[derive(Debug, Clone)]
pub struct RateLimited {
    /// The throttled client
    pub identity: ClientIdentity,
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        ErrorResponse::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE).into_response()
    }
}

/// Middleware that short-circuits throttled requests with a 429.
pub async fn enforce(
    State(gate): State<RateLimitGate>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimited> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = gate.identify(request.headers(), peer);

    if let Err(rejected) = gate.admit(&identity) {
        debug!(
            identity = %identity,
            path = %request.uri().path(),
            "Rejecting rate limited request"
        );
        return Err(rejected);
    }

    Ok(next.run(request).await)
}
