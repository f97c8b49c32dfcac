use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use courier_core::types::Channel;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_per_second: u32) -> Self {
        let capacity = rate_per_second.max(1) as f64;
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Per-channel token buckets, rate R per second with burst R.
#[derive(Debug)]
pub struct RateLimiterSet {
    buckets: HashMap<Channel, Mutex<TokenBucket>>,
}

impl RateLimiterSet {
    pub fn new(rate_per_channel: u32) -> Self {
        let buckets = Channel::ALL
            .into_iter()
            .map(|channel| (channel, Mutex::new(TokenBucket::new(rate_per_channel))))
            .collect();
        Self { buckets }
    }

    /// Wait until one token is available for `channel`. Cancellation is
    /// handled at the call site.
    pub async fn acquire(&self, channel: Channel) {
        let bucket = &self.buckets[&channel];
        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                if bucket.try_acquire() {
                    return;
                }
                bucket.time_until_available()
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    #[allow(dead_code)]
    pub async fn try_acquire(&self, channel: Channel) -> bool {
        self.buckets[&channel].lock().await.try_acquire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_equals_rate() {
        let mut bucket = TokenBucket::new(2);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn tokens_refill_over_time() {
        let mut bucket = TokenBucket::new(100);
        while bucket.try_acquire() {}
        assert!(!bucket.try_acquire());

        std::thread::sleep(Duration::from_millis(30));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn wait_time_reflects_deficit() {
        let mut bucket = TokenBucket::new(10);
        while bucket.try_acquire() {}
        let wait = bucket.time_until_available();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn acquire_blocks_until_refill() {
        let set = RateLimiterSet::new(50);
        // Drain the sms bucket; other channels are unaffected.
        while set.try_acquire(Channel::Sms).await {}
        assert!(set.try_acquire(Channel::Email).await);

        // Blocks briefly, then a refilled token lets it through.
        set.acquire(Channel::Sms).await;
    }
}
