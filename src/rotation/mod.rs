//! Rotation scheduling: rank enabled sources for the next scrape cycle.
//!
//! Pure over the source list, the company tier map, and the fairness
//! counts. Sources past the consecutive-failure cutoff stay in the store
//! but leave rotation until an operator re-enables them.

use std::collections::HashMap;

use crate::config::RotationConfig;
use crate::models::{CompanyTier, Source};

/// Select up to `batch_size` sources for the next cycle.
///
/// Total order: health score descending, company tier rank ascending
/// (S before A before B...), last-scraped ascending with never-scraped
/// first, then the per-company fairness count ascending.
pub fn pick_rotation<'a>(
    sources: &'a [Source],
    tiers: &HashMap<String, CompanyTier>,
    fairness_counts: &HashMap<String, u64>,
    config: &RotationConfig,
    batch_size: usize,
) -> Vec<&'a Source> {
    let mut eligible: Vec<&Source> = sources
        .iter()
        .filter(|s| s.enabled)
        .filter(|s| s.health.consecutive_failures < config.max_consecutive_failures)
        .collect();

    eligible.sort_by(|a, b| {
        b.health
            .health_score
            .total_cmp(&a.health.health_score)
            .then_with(|| tier_rank(a, tiers).cmp(&tier_rank(b, tiers)))
            .then_with(|| {
                // None (never scraped) sorts before any timestamp.
                match (a.health.last_scraped_at, b.health.last_scraped_at) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(x), Some(y)) => x.cmp(&y),
                }
            })
            .then_with(|| fairness(a, fairness_counts).cmp(&fairness(b, fairness_counts)))
            .then_with(|| a.id.cmp(&b.id))
    });

    eligible.truncate(batch_size);
    eligible
}

fn tier_rank(source: &Source, tiers: &HashMap<String, CompanyTier>) -> u8 {
    source
        .company_ref
        .as_ref()
        .and_then(|c| tiers.get(c))
        .map(|t| t.rank())
        // Sources without a company tier rank last among equals.
        .unwrap_or(CompanyTier::D.rank() + 1)
}

fn fairness(source: &Source, counts: &HashMap<String, u64>) -> u64 {
    source
        .company_ref
        .as_ref()
        .and_then(|c| counts.get(c))
        .copied()
        .unwrap_or(0)
}
