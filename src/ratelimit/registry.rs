//! Per-identity limiter registry with lazy eviction.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::clock::{Clock, SystemClock};

/// Default steady-state rate: one request per second.
pub const DEFAULT_REFILL_RATE: f64 = 1.0;
/// Default burst size.
pub const DEFAULT_BURST_CAPACITY: u32 = 1;
/// Default idle time before an entry may be evicted.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
/// Default minimum spacing between sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
/// Default registry size that forces a sweep.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Tuning for a [`LimiterRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSettings {
    /// Tokens added per second to each bucket
    pub refill_rate: f64,
    /// Maximum tokens a bucket can bank
    pub burst_capacity: u32,
    /// Idle time after which an entry is eligible for removal
    pub ttl: Duration,
    /// Minimum spacing between time-triggered sweeps
    pub cleanup_interval: Duration,
    /// Registry size above which a sweep runs regardless of interval
    pub max_entries: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            refill_rate: DEFAULT_REFILL_RATE,
            burst_capacity: DEFAULT_BURST_CAPACITY,
            ttl: DEFAULT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

struct RegistryEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

impl RegistryEntry {
    /// Record a request at `now` and spend a token if one is available.
    fn visit(&mut self, now: Instant) -> bool {
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.bucket.try_consume(now)
    }
}

struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
    /// `None` until the first sweep, which makes the first call eligible
    last_cleanup: Option<Instant>,
}

/// Registry of token buckets keyed by client identity.
///
/// All state sits behind one mutex: lookup, creation, consumption and the
/// eviction sweep are serialized, so two concurrent first requests for the
/// same identity always share a bucket and a token is never spent twice.
///
/// Stale entries are removed lazily from inside [`acquire`](Self::acquire).
/// A sweep runs when the map holds more than `max_entries` entries, or when
/// `cleanup_interval` has passed since the previous one. A sweep only drops
/// entries idle for at least `ttl`, so a registry full of active clients can
/// stay above `max_entries` until they go quiet.
pub struct LimiterRegistry {
    settings: RateLimitSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<RegistryState>,
}

impl LimiterRegistry {
    /// Create a registry reading time from the system monotonic clock.
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Create a registry with an explicit time source.
    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                last_cleanup: None,
            }),
        }
    }

    /// Decide whether `identity` may proceed at the registry clock's `now`.
    pub fn check(&self, identity: &str) -> bool {
        self.acquire(identity, self.clock.now())
    }

    /// Decide whether `identity` may proceed at `now`.
    ///
    /// Creates the identity's bucket on first sight, consumes one token if
    /// available, records the visit, then runs the eviction policy.
    pub fn acquire(&self, identity: &str, now: Instant) -> bool {
        let mut state = self.state.lock();

        let allowed = match state.entries.get_mut(identity) {
            Some(entry) => entry.visit(now),
            None => {
                trace!(identity = %identity, "Creating token bucket");
                let mut entry = RegistryEntry {
                    bucket: TokenBucket::new(
                        self.settings.burst_capacity,
                        self.settings.refill_rate,
                        now,
                    ),
                    last_seen: now,
                };
                let allowed = entry.visit(now);
                state.entries.insert(identity.to_string(), entry);
                allowed
            }
        };

        if self.sweep_due(&state, now) {
            self.sweep_locked(&mut state, now);
        }

        allowed
    }

    /// Run an eviction sweep now, ignoring the interval and size triggers.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        self.sweep_locked(&mut state, now)
    }

    /// The settings this registry was built with.
    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether no identity is tracked.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Whether `identity` currently has an entry.
    pub fn contains(&self, identity: &str) -> bool {
        self.state.lock().entries.contains_key(identity)
    }

    /// Token balance of `identity` as of its last request.
    ///
    /// Returns `None` if the identity is not tracked.
    pub fn tokens(&self, identity: &str) -> Option<f64> {
        self.state
            .lock()
            .entries
            .get(identity)
            .map(|e| e.bucket.tokens())
    }

    /// When the last sweep ran, if ever.
    pub fn last_cleanup(&self) -> Option<Instant> {
        self.state.lock().last_cleanup
    }

    /// Drop every entry and forget the last sweep.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.last_cleanup = None;
    }

    fn sweep_due(&self, state: &RegistryState, now: Instant) -> bool {
        if state.entries.len() > self.settings.max_entries {
            return true;
        }
        match state.last_cleanup {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.settings.cleanup_interval,
        }
    }

    fn sweep_locked(&self, state: &mut RegistryState, now: Instant) -> usize {
        let ttl = self.settings.ttl;
        let before = state.entries.len();

        state
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) < ttl);
        state.last_cleanup = Some(now);

        let removed = before - state.entries.len();
        debug!(
            removed = removed,
            remaining = state.entries.len(),
            "Swept idle rate limit entries"
        );
        removed
    }

    #[cfg(test)]
    fn force_last_cleanup(&self, at: Option<Instant>) {
        self.state.lock().last_cleanup = at;
    }

    #[cfg(test)]
    fn force_last_seen(&self, identity: &str, at: Instant) {
        if let Some(entry) = self.state.lock().entries.get_mut(identity) {
            entry.last_seen = at;
        }
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new(RateLimitSettings::default())
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("settings", &self.settings)
            .field("entries", &self.len())
            .finish()
    }
}
