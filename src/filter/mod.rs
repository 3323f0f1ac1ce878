//! Two-tier, strike-based job filter.
//!
//! Tier 1 is a set of hard rejections (stop-listed company, blocked token,
//! failed required-location clause): any hit rejects the job outright with
//! zero AI cost. Tier 2 accumulates weighted strikes across rule
//! categories; reaching the configured threshold rejects. The filter is a
//! pure function of the job record and config, never consults external
//! services, and is the sole gate before the expensive analyze stage.

use serde::{Deserialize, Serialize};

use crate::config::FilterConfig;
use crate::models::{normalize_company_name, JobRecord};

/// Strike weights per category.
const WEIGHT_LOCATION: u32 = 3;
const WEIGHT_SENIORITY: u32 = 2;
const WEIGHT_SIZE: u32 = 1;
const WEIGHT_ROLE_TYPE: u32 = 2;

/// How many of the top-ranked skills are checked for presence.
const PRIMARY_SKILL_DEPTH: usize = 3;

/// A single tier-2 rule hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeHit {
    pub category: String,
    pub rule: String,
    pub weight: u32,
}

/// Outcome of filtering, including the full rule trace for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterResult {
    pub passed: bool,
    /// Tier-1 rejection reason, when one fired.
    #[serde(default)]
    pub hard_reject: Option<String>,
    #[serde(default)]
    pub strikes: Vec<StrikeHit>,
    #[serde(default)]
    pub strike_total: u32,
    pub threshold: u32,
}

impl FilterResult {
    /// One-line summary for `result_message`.
    pub fn summary(&self) -> String {
        if let Some(ref reason) = self.hard_reject {
            return format!("hard rejection: {}", reason);
        }
        if !self.passed {
            let rules: Vec<&str> = self.strikes.iter().map(|s| s.rule.as_str()).collect();
            return format!(
                "{} strikes >= threshold {} ({})",
                self.strike_total,
                self.threshold,
                rules.join("; ")
            );
        }
        format!("passed with {} strikes", self.strike_total)
    }
}

/// Whether the job's location satisfies the configured clauses: remote,
/// or on-site in an allowed region. An empty region list with a location
/// present accepts anything.
fn location_acceptable(job: &JobRecord, config: &FilterConfig) -> bool {
    if job.remote == Some(true) {
        return true;
    }
    if config.allowed_regions.is_empty() {
        // No region preference configured; only an explicit non-remote
        // posting with remote-only intent would fail, and that intent is
        // expressed through allowed_regions.
        return true;
    }
    match job.location {
        Some(ref loc) => {
            let loc_lower = loc.to_lowercase();
            config
                .allowed_regions
                .iter()
                .any(|region| loc_lower.contains(&region.to_lowercase()))
        }
        None => false,
    }
}

/// Run the two-tier filter.
pub fn evaluate(job: &JobRecord, config: &FilterConfig) -> FilterResult {
    let mut result = FilterResult {
        passed: true,
        threshold: config.strike_threshold,
        ..Default::default()
    };

    // Tier 1: stop list.
    let company_key = normalize_company_name(&job.company_name);
    for stopped in &config.stop_list {
        if normalize_company_name(stopped) == company_key {
            result.passed = false;
            result.hard_reject = Some(format!("company on stop list: {}", job.company_name));
            return result;
        }
    }

    // Tier 1: blocked tokens in title or description.
    let haystack = format!(
        "{} {}",
        job.title.to_lowercase(),
        job.description.to_lowercase()
    );
    for token in &config.block_tokens {
        if haystack.contains(&token.to_lowercase()) {
            result.passed = false;
            result.hard_reject = Some(format!("blocked token: {}", token));
            return result;
        }
    }

    // Tier 1: required location clause.
    let location_ok = location_acceptable(job, config);
    if config.location_required && !location_ok {
        result.passed = false;
        result.hard_reject = Some("location requirement not met".to_string());
        return result;
    }

    // Tier 2: location strike when the clause is preferred, not required.
    if !location_ok {
        result.strikes.push(StrikeHit {
            category: "location".to_string(),
            rule: format!(
                "not remote and location {:?} outside allowed regions",
                job.location
            ),
            weight: WEIGHT_LOCATION,
        });
    }

    // Tier 2: seniority mismatch.
    if !config.target_seniority.is_empty() {
        if let Some(ref seniority) = job.seniority {
            let level = seniority.to_lowercase();
            let matched = config
                .target_seniority
                .iter()
                .any(|t| level.contains(&t.to_lowercase()));
            if !matched {
                result.strikes.push(StrikeHit {
                    category: "seniority".to_string(),
                    rule: format!("seniority {} outside target levels", seniority),
                    weight: WEIGHT_SENIORITY,
                });
            }
        }
    }

    // Tier 2: missing primary skills; weight decreases with rank.
    for (rank, skill) in config
        .tech_ranks
        .iter()
        .take(PRIMARY_SKILL_DEPTH)
        .enumerate()
    {
        if !job.mentions_skill(skill) {
            let weight = (PRIMARY_SKILL_DEPTH - rank) as u32;
            result.strikes.push(StrikeHit {
                category: "technology".to_string(),
                rule: format!("missing ranked skill {} (rank {})", skill, rank),
                weight,
            });
        }
    }

    // Tier 2: company size outside the preferred band.
    if let Some(size) = job.company_size {
        let below = config.preferred_size_min.is_some_and(|min| size < min);
        let above = config.preferred_size_max.is_some_and(|max| size > max);
        if below || above {
            result.strikes.push(StrikeHit {
                category: "company_size".to_string(),
                rule: format!("company size {} outside preferred band", size),
                weight: WEIGHT_SIZE,
            });
        }
    }

    // Tier 2: role type mismatch.
    if let (Some(ref wanted), Some(ref actual)) = (&config.role_type, &job.employment_type) {
        if !actual.eq_ignore_ascii_case(wanted) {
            result.strikes.push(StrikeHit {
                category: "role_type".to_string(),
                rule: format!("{} role, {} preferred", actual, wanted),
                weight: WEIGHT_ROLE_TYPE,
            });
        }
    }

    result.strike_total = result.strikes.iter().map(|s| s.weight).sum();
    result.passed = result.strike_total < config.strike_threshold;
    result
}
