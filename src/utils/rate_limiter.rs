use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::trace;

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token bucket with fixed replenishment: every `interval` the bucket is refilled to `capacity`.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    interval: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, interval, bucket: Mutex::new(Bucket { tokens: capacity, last_refill: Instant::now() }) }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                self.interval.saturating_sub(bucket.last_refill.elapsed())
            };
            trace!("Rate limiting: waiting {}ms", wait.as_millis());
            sleep(wait).await;
        }
    }

    /// Takes a token if one is available without waiting.
    pub async fn try_acquire(&self) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let elapsed = bucket.last_refill.elapsed();
        if elapsed >= self.interval {
            let periods = (elapsed.as_nanos() / self.interval.as_nanos()) as u32;
            bucket.tokens = self.capacity;
            bucket.last_refill += self.interval * periods;
        }
    }
}
