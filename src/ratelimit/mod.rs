//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod identity;
mod registry;

pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{ClientIdentity, UNKNOWN_IDENTITY, X_FORWARDED_FOR, X_REAL_IP};
pub use registry::{
    LimiterRegistry, RateLimitSettings, DEFAULT_BURST_CAPACITY, DEFAULT_CLEANUP_INTERVAL,
    DEFAULT_MAX_ENTRIES, DEFAULT_REFILL_RATE, DEFAULT_TTL,
};
