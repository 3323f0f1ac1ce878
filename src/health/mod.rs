//! Source health tracking.
//!
//! Every completed scrape updates the source's health block: counters,
//! consecutive-failure streak, and exponential moving averages for yield
//! and duration. The health score is a pure function of the block plus the
//! clock and is recomputed on every update. Tracker writes are best-effort:
//! a failed update logs a warning and never fails the parent stage.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Source, SourceHealth};
use crate::store::{collections, rfc3339_utc, Store, Where};

/// EMA smoothing: new average = 0.7 * old + 0.3 * this run.
const EMA_KEEP: f64 = 0.7;
const EMA_BLEND: f64 = 0.3;

/// Freshness half-life style constant: score decays as exp(-days/14).
const FRESHNESS_DECAY_DAYS: f64 = 14.0;

/// Outcome of a single scrape run, as reported by the scrape runner.
#[derive(Debug, Clone, Copy)]
pub struct ScrapeOutcome {
    pub success: bool,
    pub jobs_found: u32,
    pub duration_ms: u64,
}

/// Compute the health score for a block at a given instant.
///
/// `success_rate * (1 - min(consecutive_failures, 5)/5) * freshness`,
/// clipped to [0, 1], where freshness decays exponentially with days since
/// the last scrape. A source that has never run scores from a clean slate.
pub fn health_score(health: &SourceHealth, now: DateTime<Utc>) -> f64 {
    let total = health.success_count + health.failure_count;
    let success_rate = if total == 0 {
        1.0
    } else {
        health.success_count as f64 / total as f64
    };

    let failure_penalty = 1.0 - (health.consecutive_failures.min(5) as f64 / 5.0);

    let freshness = match health.last_scraped_at {
        Some(last) => {
            let days = (now - last).num_seconds().max(0) as f64 / 86_400.0;
            (-days / FRESHNESS_DECAY_DAYS).exp()
        }
        None => 1.0,
    };

    (success_rate * failure_penalty * freshness).clamp(0.0, 1.0)
}

/// Apply one scrape outcome to a health block, returning the new block
/// with its score recomputed.
pub fn apply_outcome(
    health: &SourceHealth,
    outcome: ScrapeOutcome,
    now: DateTime<Utc>,
) -> SourceHealth {
    let mut updated = health.clone();
    let first_run = health.success_count + health.failure_count == 0;

    updated.last_scraped_at = Some(now);
    if outcome.success {
        updated.success_count += 1;
        updated.consecutive_failures = 0;
    } else {
        updated.failure_count += 1;
        updated.consecutive_failures += 1;
    }

    if first_run {
        updated.avg_jobs_per_scrape = outcome.jobs_found as f64;
        updated.avg_duration_ms = outcome.duration_ms as f64;
    } else {
        updated.avg_jobs_per_scrape =
            EMA_KEEP * health.avg_jobs_per_scrape + EMA_BLEND * outcome.jobs_found as f64;
        updated.avg_duration_ms =
            EMA_KEEP * health.avg_duration_ms + EMA_BLEND * outcome.duration_ms as f64;
    }

    updated.health_score = health_score(&updated, now);
    updated
}

/// Persists health updates and the per-company fairness window.
pub struct HealthTracker {
    store: Arc<dyn Store>,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a scrape outcome against a source. Best-effort: failures
    /// are logged, never propagated.
    pub async fn record_scrape(&self, source: &Source, outcome: ScrapeOutcome) {
        let now = Utc::now();
        let updated = apply_outcome(&source.health, outcome, now);

        let patch = json!({
            "health": updated,
            "updated_at": rfc3339_utc(now),
        });
        if let Err(e) = self
            .store
            .update(collections::JOB_SOURCES, &source.id, &patch, &[])
            .await
        {
            warn!("health update for source {} failed: {}", source.id, e);
            return;
        }

        // Fairness window entry, keyed per event.
        if let Some(ref company) = source.company_ref {
            let event_id = Uuid::new_v4().to_string();
            let event = json!({
                "source_id": source.id,
                "company_ref": company,
                "scraped_at": rfc3339_utc(now),
            });
            if let Err(e) = self
                .store
                .put(collections::SCRAPE_EVENTS, &event_id, &event)
                .await
            {
                warn!("scrape event write for {} failed: {}", source.id, e);
            }
        }
    }

    /// Per-company scrape counts within the rolling window, for the
    /// rotation fairness tie-breaker.
    pub async fn company_scrape_counts(
        &self,
        window_days: i64,
    ) -> Result<HashMap<String, u64>> {
        let cutoff = rfc3339_utc(Utc::now() - Duration::days(window_days));
        let events = self
            .store
            .query(
                collections::SCRAPE_EVENTS,
                &[Where::gte("scraped_at", cutoff)],
                None,
                None,
            )
            .await?;

        let mut counts = HashMap::new();
        for event in events {
            if let Some(company) = event.get("company_ref").and_then(|c| c.as_str()) {
                *counts.entry(company.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, SourceType};
    use crate::store::MemoryStore;

    #[test]
    fn test_score_never_scraped_is_full() {
        let health = SourceHealth::default();
        assert_eq!(health_score(&health, Utc::now()), 1.0);
    }

    #[test]
    fn test_score_decays_with_staleness() {
        let now = Utc::now();
        let mut health = SourceHealth {
            success_count: 10,
            ..Default::default()
        };

        health.last_scraped_at = Some(now);
        let fresh = health_score(&health, now);

        health.last_scraped_at = Some(now - Duration::days(14));
        let stale = health_score(&health, now);

        assert!(fresh > stale);
        // At exactly one decay constant, freshness is 1/e.
        assert!((stale - (-1.0f64).exp()).abs() < 0.01);
    }

    #[test]
    fn test_score_failure_penalty() {
        let now = Utc::now();
        let health = SourceHealth {
            success_count: 5,
            failure_count: 5,
            consecutive_failures: 5,
            last_scraped_at: Some(now),
            ..Default::default()
        };
        // Five consecutive failures zero the score regardless of rate.
        assert_eq!(health_score(&health, now), 0.0);

        let recovering = SourceHealth {
            consecutive_failures: 2,
            ..health
        };
        let score = health_score(&recovering, now);
        assert!(score > 0.0 && score < 0.5);
    }

    #[test]
    fn test_apply_outcome_success_resets_streak() {
        let now = Utc::now();
        let health = SourceHealth {
            success_count: 3,
            failure_count: 2,
            consecutive_failures: 2,
            avg_jobs_per_scrape: 10.0,
            avg_duration_ms: 1000.0,
            last_scraped_at: Some(now - Duration::days(1)),
            health_score: 0.5,
        };
        let updated = apply_outcome(
            &health,
            ScrapeOutcome {
                success: true,
                jobs_found: 20,
                duration_ms: 2000,
            },
            now,
        );
        assert_eq!(updated.success_count, 4);
        assert_eq!(updated.consecutive_failures, 0);
        assert_eq!(updated.last_scraped_at, Some(now));
        // EMA: 0.7 * 10 + 0.3 * 20 = 13
        assert!((updated.avg_jobs_per_scrape - 13.0).abs() < 1e-9);
        assert!((updated.avg_duration_ms - 1300.0).abs() < 1e-9);
    }

    #[test]
    fn test_apply_outcome_failure_increments_streak() {
        let now = Utc::now();
        let health = SourceHealth {
            success_count: 3,
            consecutive_failures: 1,
            ..Default::default()
        };
        let updated = apply_outcome(
            &health,
            ScrapeOutcome {
                success: false,
                jobs_found: 0,
                duration_ms: 500,
            },
            now,
        );
        assert_eq!(updated.failure_count, 1);
        assert_eq!(updated.consecutive_failures, 2);
        assert!(updated.health_score < 1.0);
    }

    #[test]
    fn test_first_run_seeds_averages() {
        let updated = apply_outcome(
            &SourceHealth::default(),
            ScrapeOutcome {
                success: true,
                jobs_found: 8,
                duration_ms: 1200,
            },
            Utc::now(),
        );
        assert_eq!(updated.avg_jobs_per_scrape, 8.0);
        assert_eq!(updated.avg_duration_ms, 1200.0);
    }

    #[tokio::test]
    async fn test_record_scrape_and_fairness_window() {
        let store = Arc::new(MemoryStore::new());
        let tracker = HealthTracker::new(store.clone());

        let mut source = Source::new(
            "s1".into(),
            SourceType::Greenhouse,
            "https://boards.greenhouse.io/acme".into(),
            Confidence::High,
        );
        source.company_ref = Some("acme".into());
        store
            .put(
                collections::JOB_SOURCES,
                &source.id,
                &serde_json::to_value(&source).unwrap(),
            )
            .await
            .unwrap();

        tracker
            .record_scrape(
                &source,
                ScrapeOutcome {
                    success: true,
                    jobs_found: 5,
                    duration_ms: 800,
                },
            )
            .await;

        let doc = store
            .get(collections::JOB_SOURCES, "s1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["health"]["success_count"], 1);

        let counts = tracker.company_scrape_counts(30).await.unwrap();
        assert_eq!(counts.get("acme"), Some(&1));
    }

    #[tokio::test]
    async fn test_record_scrape_missing_source_is_best_effort() {
        let store = Arc::new(MemoryStore::new());
        let tracker = HealthTracker::new(store);
        let source = Source::new(
            "ghost".into(),
            SourceType::Rss,
            "https://example.com/feed".into(),
            Confidence::High,
        );
        // No put; update hits a missing doc. Must not panic or error out.
        tracker
            .record_scrape(
                &source,
                ScrapeOutcome {
                    success: false,
                    jobs_found: 0,
                    duration_ms: 100,
                },
            )
            .await;
    }
}
