use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// External endpoint classes that share one token bucket each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Newznab search indexers
    Indexer,
    /// Catalog metadata APIs
    CatalogApi,
}

/// Token bucket parameters for one endpoint class
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum burst size
    pub capacity: f64,
    /// Tokens restored per second
    pub refill_per_sec: f64,
}

impl EndpointClass {
    fn default_limit(&self) -> RateLimitConfig {
        match self {
            EndpointClass::Indexer => RateLimitConfig {
                capacity: 4.0,
                refill_per_sec: 1.0,
            },
            // Public catalog APIs tend to want one request per second
            EndpointClass::CatalogApi => RateLimitConfig {
                capacity: 1.0,
                refill_per_sec: 1.0,
            },
        }
    }
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: config.capacity,
            capacity: config.capacity,
            refill_per_sec: config.refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available
    fn try_take(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }
}

/// Token-bucket throttle shared per external endpoint class.
///
/// One limiter instance is shared by everything in the process that talks
/// to a given class of endpoint; `acquire` suspends the caller until a
/// token is available. The lock is only held for the bookkeeping, never
/// across the sleep.
pub struct RateLimiter {
    buckets: Mutex<HashMap<EndpointClass, Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Override the built-in limit for one endpoint class
    pub fn set_limit(&self, class: EndpointClass, config: RateLimitConfig) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.insert(class, Bucket::new(config));
    }

    /// Wait until a request to this endpoint class is allowed
    pub async fn acquire(&self, class: EndpointClass) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().unwrap();
                let bucket = buckets
                    .entry(class)
                    .or_insert_with(|| Bucket::new(class.default_limit()));
                bucket.try_take(Instant::now())
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
