// src/http/limiter.rs

//! Per-host token bucket
//!
//! Every host gets its own bucket so a slow upstream never throttles the
//! others. Callers block in [`HostRateLimiter::acquire`] until a token is
//! available.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct HostRateLimiter {
    buckets: Mutex<HashMap<String, RateBucket>>,
    /// Requests per second per host
    rps: u32,
    burst: u32,
}

struct RateBucket {
    tokens: f64,
    last_update: Instant,
}

impl HostRateLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rps: rps.max(1),
            burst: burst.max(1),
        }
    }

    /// Take a token for `host` if one is available
    ///
    /// Returns how long to wait before the next token otherwise.
    pub fn try_acquire(&self, host: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();

        let bucket = buckets.entry(host.to_string()).or_insert_with(|| RateBucket {
            tokens: self.burst as f64,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps as f64).min(self.burst as f64);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.rps as f64))
        }
    }

    /// Block until a token for `host` is available
    pub fn acquire(&self, host: &str) {
        while let Err(wait) = self.try_acquire(host) {
            std::thread::sleep(wait);
        }
    }

    /// Drop buckets idle for longer than `max_age`
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .retain(|_, bucket| now.duration_since(bucket.last_update) < max_age);
    }
}
