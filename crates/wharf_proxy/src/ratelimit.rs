//! Per-source-IP admission throttling for login attempts.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Entries older than this many minimum gaps are dropped when the map is
/// pruned.
const EXPIRY_FACTOR: u32 = 8;

/// Pruning kicks in once the map grows past this many sources.
const PRUNE_WATERMARK: usize = 1024;

/// Remembers when each source IP last attempted a login and refuses
/// attempts arriving faster than the configured minimum gap. A zero gap
/// disables the limiter.
pub struct LoginRateLimiter {
    inner: Mutex<Inner>,
}

struct Inner {
    min_gap: Duration,
    last_attempt: HashMap<IpAddr, Instant>,
}

impl LoginRateLimiter {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                min_gap,
                last_attempt: HashMap::new(),
            }),
        }
    }

    /// Records an attempt from `ip`. Returns `false` if the attempt came
    /// too soon after the previous one, in which case the caller kicks the
    /// connection before doing any further work.
    pub fn attempt(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.min_gap.is_zero() {
            return true;
        }

        if let Some(&last) = inner.last_attempt.get(&ip) {
            if now.duration_since(last) < inner.min_gap {
                return false;
            }
        }

        inner.last_attempt.insert(ip, now);

        if inner.last_attempt.len() > PRUNE_WATERMARK {
            let horizon = inner.min_gap * EXPIRY_FACTOR;
            inner
                .last_attempt
                .retain(|_, last| now.duration_since(*last) < horizon);
        }

        true
    }

    /// Hot-reload entry point.
    pub fn set_min_gap(&self, min_gap: Duration) {
        self.inner.lock().min_gap = min_gap;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_attempt_within_gap_is_refused() {
        let limiter = LoginRateLimiter::new(Duration::from_secs(10));
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        assert!(limiter.attempt(ip));
        assert!(!limiter.attempt(ip));
    }

    #[test]
    fn distinct_sources_do_not_interfere() {
        let limiter = LoginRateLimiter::new(Duration::from_secs(10));

        assert!(limiter.attempt("203.0.113.7".parse().unwrap()));
        assert!(limiter.attempt("203.0.113.8".parse().unwrap()));
    }

    #[test]
    fn zero_gap_disables_the_limiter() {
        let limiter = LoginRateLimiter::new(Duration::ZERO);
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        assert!(limiter.attempt(ip));
        assert!(limiter.attempt(ip));
    }

    #[test]
    fn refused_attempts_do_not_extend_the_window() {
        let limiter = LoginRateLimiter::new(Duration::from_millis(50));
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        assert!(limiter.attempt(ip));
        assert!(!limiter.attempt(ip));
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.attempt(ip));
    }
}
