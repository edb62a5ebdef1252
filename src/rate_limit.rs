//! Fixed-window rate limiter keyed by authenticated identity.
//!
//! Ten requests per sixty-second window. The window resets (count back to
//! one) the instant `now` passes the recorded reset time; there is no
//! sliding behavior. Check-and-increment is atomic per key, so concurrent
//! in-flight requests cannot overshoot the limit.

use dashmap::DashMap;
use std::time::{Duration, Instant};

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_MAX_REQUESTS: u32 = 10;

#[derive(Debug)]
struct Window {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    window: Duration,
    max_requests: u32,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_WINDOW, RATE_LIMIT_MAX_REQUESTS)
    }
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_requests,
        }
    }

    /// Counts a request for `identity` and reports whether it is allowed.
    ///
    /// The entry guard holds the shard lock for the key, making the
    /// check-and-increment atomic.
    pub fn check(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + self.window,
            });

        if now > entry.reset_at {
            entry.count = 1;
            entry.reset_at = now + self.window;
            return true;
        }

        if entry.count >= self.max_requests {
            return false;
        }

        entry.count += 1;
        true
    }

    /// Seconds a rejected caller should wait before retrying.
    pub fn retry_after(&self) -> u64 {
        self.window.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_and_rejects_the_next() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 10);
        for _ in 0..10 {
            assert!(limiter.check("user-1"));
        }
        assert!(!limiter.check("user-1"));
    }

    #[test]
    fn identities_are_tracked_independently() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[test]
    fn window_boundary_resets_the_count() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 2);
        assert!(limiter.check("user-1"));
        assert!(limiter.check("user-1"));
        assert!(!limiter.check("user-1"));

        std::thread::sleep(Duration::from_millis(30));
        // First request of the new window succeeds with count reset to 1.
        assert!(limiter.check("user-1"));
        assert!(limiter.check("user-1"));
        assert!(!limiter.check("user-1"));
    }

    #[test]
    fn concurrent_checks_never_exceed_the_limit() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicU32, Ordering};

        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), 10));
        let allowed = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let allowed = Arc::clone(&allowed);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        if limiter.check("shared") {
                            allowed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(allowed.load(Ordering::SeqCst), 10);
    }
}
