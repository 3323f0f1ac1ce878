//! Per-domain adaptive request pacing.
//!
//! Tracks request timing per domain, backs off on 429/503, and gradually
//! recovers on success. Shared by every fetch path in the process.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct DomainState {
    current_delay: Duration,
    last_request: Option<Instant>,
    in_backoff: bool,
    consecutive_successes: u32,
}

impl DomainState {
    fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            last_request: None,
            in_backoff: false,
            consecutive_successes: 0,
        }
    }

    fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => self.current_delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }
}

/// Adaptive per-domain rate limiter.
#[derive(Debug)]
pub struct Politeness {
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    recovery_threshold: u32,
    domains: RwLock<HashMap<String, DomainState>>,
}

impl Default for Politeness {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }
}

impl Politeness {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            backoff_multiplier: 2.0,
            recovery_threshold: 3,
            domains: RwLock::new(HashMap::new()),
        }
    }

    /// Wait until the domain is ready, then mark a request started.
    pub async fn acquire(&self, domain: &str) {
        let wait = {
            let domains = self.domains.read().await;
            domains
                .get(domain)
                .map(|s| s.time_until_ready())
                .unwrap_or(Duration::ZERO)
        };

        if wait > Duration::ZERO {
            debug!("pacing {}: waiting {:?}", domain, wait);
            tokio::time::sleep(wait).await;
        }

        let mut domains = self.domains.write().await;
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(self.base_delay));
        state.last_request = Some(Instant::now());
    }

    /// Report the response status for a domain, adjusting its delay.
    pub async fn report(&self, domain: &str, status: u16) {
        let mut domains = self.domains.write().await;
        let Some(state) = domains.get_mut(domain) else {
            return;
        };

        match status {
            429 | 503 => {
                state.in_backoff = true;
                state.consecutive_successes = 0;
                let next = Duration::from_secs_f64(
                    state.current_delay.as_secs_f64() * self.backoff_multiplier,
                );
                state.current_delay = next.min(self.max_delay);
                warn!(
                    "rate limited by {} (HTTP {}), backing off to {:?}",
                    domain, status, state.current_delay
                );
            }
            s if s >= 500 => {
                // Mild backoff: the server may just be overloaded.
                let next = Duration::from_secs_f64(state.current_delay.as_secs_f64() * 1.5);
                state.current_delay = next.min(self.max_delay);
            }
            s if s < 400 => {
                state.consecutive_successes += 1;
                if state.in_backoff && state.consecutive_successes >= self.recovery_threshold {
                    let next =
                        Duration::from_secs_f64(state.current_delay.as_secs_f64() * 0.5);
                    state.current_delay = next.max(self.base_delay);
                    state.consecutive_successes = 0;
                    if state.current_delay <= self.base_delay {
                        state.in_backoff = false;
                        debug!("{} recovered from backoff", domain);
                    }
                }
            }
            _ => {} // other 4xx: access problem, not a pacing signal
        }
    }

    /// Current delay for a domain (for diagnostics).
    pub async fn current_delay(&self, domain: &str) -> Duration {
        let domains = self.domains.read().await;
        domains
            .get(domain)
            .map(|s| s.current_delay)
            .unwrap_or(self.base_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_backoff_on_429() {
        let pacing = Politeness::new(Duration::from_millis(100), Duration::from_secs(10));
        pacing.acquire("example.com").await;
        pacing.report("example.com", 429).await;
        assert_eq!(
            pacing.current_delay("example.com").await,
            Duration::from_millis(200)
        );
        pacing.report("example.com", 429).await;
        assert_eq!(
            pacing.current_delay("example.com").await,
            Duration::from_millis(400)
        );
    }

    #[tokio::test]
    async fn test_recovery_after_successes() {
        let pacing = Politeness::new(Duration::from_millis(100), Duration::from_secs(10));
        pacing.acquire("example.com").await;
        pacing.report("example.com", 429).await;

        for _ in 0..3 {
            pacing.report("example.com", 200).await;
        }
        assert_eq!(
            pacing.current_delay("example.com").await,
            Duration::from_millis(100)
        );
    }

    #[tokio::test]
    async fn test_client_error_leaves_delay() {
        let pacing = Politeness::new(Duration::from_millis(100), Duration::from_secs(10));
        pacing.acquire("example.com").await;
        pacing.report("example.com", 404).await;
        assert_eq!(
            pacing.current_delay("example.com").await,
            Duration::from_millis(100)
        );
    }
}
