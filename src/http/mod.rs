//! HTTP surface: the rate limit gate, CORS and the server.

mod gate;
mod response;
mod routes;
mod server;

pub use gate::{enforce, RateLimitGate, RateLimited, RATE_LIMITED_MESSAGE};
pub use response::ErrorResponse;
pub use routes::{apply_cors, build_router, CorsPolicy};
pub use server::HttpServer;
