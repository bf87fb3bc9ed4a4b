//! Per-user vote throttling with a token bucket.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use opshub_protocol::UserId;

/// How often buckets that have refilled completely are dropped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Token bucket per voting user. A burst of zero disables throttling.
pub struct VoteThrottle {
    buckets: HashMap<UserId, TokenBucket>,
    burst: u32,
    refill_per_sec: f64,
    last_sweep: Instant,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl VoteThrottle {
    /// - `burst`: votes a user may cast back to back
    /// - `refill_per_sec`: sustained votes per second
    pub fn new(burst: u32, refill_per_sec: f64) -> Self {
        Self {
            buckets: HashMap::new(),
            burst,
            refill_per_sec: refill_per_sec.max(0.0),
            last_sweep: Instant::now(),
        }
    }

    /// True if `user` may vote now; consumes one token.
    pub fn check(&mut self, user: &UserId) -> bool {
        self.check_at(user, Instant::now())
    }

    fn check_at(&mut self, user: &UserId, now: Instant) -> bool {
        if self.burst == 0 {
            return true;
        }
        let burst = self.burst as f64;
        if now.saturating_duration_since(self.last_sweep) >= SWEEP_INTERVAL {
            self.sweep(now);
        }
        let bucket = self.buckets.entry(user.clone()).or_insert_with(|| TokenBucket {
            tokens: burst,
            last_refill: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(burst);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            tracing::debug!(user = %user, "Vote throttled");
            false
        }
    }

    /// Drop buckets that are full again; a missing bucket starts full.
    fn sweep(&mut self, now: Instant) {
        let burst = self.burst as f64;
        let refill = self.refill_per_sec;
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens + elapsed * refill < burst
        });
        self.last_sweep = now;
        let dropped = before - self.buckets.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = self.buckets.len(), "Dropped idle vote buckets");
        }
    }

    /// Number of users with a live bucket.
    pub fn tracked_users(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_burst() {
        let mut t = VoteThrottle::new(5, 1.0);
        let user = UserId::new("u1");
        for _ in 0..5 {
            assert!(t.check(&user));
        }
    }

    #[test]
    fn test_blocks_past_burst_without_refill() {
        let mut t = VoteThrottle::new(3, 0.0);
        let user = UserId::new("u1");
        for _ in 0..3 {
            t.check(&user);
        }
        assert!(!t.check(&user));
    }

    #[test]
    fn test_refills_over_time() {
        let mut t = VoteThrottle::new(1, 2.0);
        let user = UserId::new("u1");
        let start = Instant::now();
        assert!(t.check_at(&user, start));
        assert!(!t.check_at(&user, start));
        assert!(t.check_at(&user, start + Duration::from_millis(600)));
    }

    #[test]
    fn test_users_have_separate_buckets() {
        let mut t = VoteThrottle::new(1, 0.0);
        assert!(t.check(&UserId::new("u1")));
        assert!(!t.check(&UserId::new("u1")));
        assert!(t.check(&UserId::new("u2")));
        assert_eq!(t.tracked_users(), 2);
    }

    #[test]
    fn test_refilled_buckets_are_dropped() {
        let mut t = VoteThrottle::new(2, 1.0);
        let start = Instant::now();
        for i in 0..50 {
            assert!(t.check_at(&UserId::new(format!("u{i}")), start));
        }
        assert_eq!(t.tracked_users(), 50);

        // Two seconds later every bucket has refilled to its burst of two.
        assert!(t.check_at(&UserId::new("late"), start + Duration::from_secs(2)));
        assert_eq!(t.tracked_users(), 1);
    }

    #[test]
    fn test_drained_buckets_survive_sweep() {
        let mut t = VoteThrottle::new(1, 0.0);
        let start = Instant::now();
        let user = UserId::new("u1");
        assert!(t.check_at(&user, start));
        assert!(!t.check_at(&user, start + Duration::from_secs(5)));
        assert_eq!(t.tracked_users(), 1);
    }

    #[test]
    fn test_zero_burst_disables() {
        let mut t = VoteThrottle::new(0, 0.0);
        let user = UserId::new("u1");
        for _ in 0..100 {
            assert!(t.check(&user));
        }
        assert_eq!(t.tracked_users(), 0);
    }
}
