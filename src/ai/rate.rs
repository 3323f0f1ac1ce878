//! Token-bucket rate limiter for the AI client.
//!
//! Shared by all workers in the process; acquisition sleeps until a token
//! is available rather than erroring.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at `rate` tokens per second, with
/// burst capacity `capacity`.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate: rate.max(0.01),
            capacity: capacity.max(1.0),
            state: Mutex::new(BucketState {
                tokens: capacity.max(1.0),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping as long as needed.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_throttle() {
        let bucket = TokenBucket::new(100.0, 2.0);
        let start = Instant::now();
        // Two burst tokens are free; the third waits ~10ms.
        bucket.acquire().await;
        bucket.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(5));
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(8));
    }
}
