//! Company pipeline stages: fetch -> extract -> analyze -> save.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{keys, StageContext};
use crate::ai::AiTier;
use crate::error::{EngineError, Result};
use crate::models::{
    normalize_company_name, Company, WorkItem, WorkItemStatus, WorkItemType,
};
use crate::scrape::{clean_page, find_board_hint, host_of};
use crate::store::{collections, Store, Where};

/// Candidate sub-paths tried in order when fetching company pages.
const ABOUT_PATHS: [&str; 5] = ["/about", "/about-us", "/company", "/careers", ""];

/// Time budget per candidate page.
const PER_CANDIDATE_SECS: u64 = 10;

/// Keep at most this many pages, each bounded to this many characters.
const MAX_PAGES: usize = 3;
const MAX_PAGE_CHARS: usize = 100_000;

/// Common stack markers for the heuristic fallback analyzer.
const KNOWN_TECH: [&str; 16] = [
    "rust",
    "go",
    "python",
    "typescript",
    "javascript",
    "react",
    "kubernetes",
    "docker",
    "postgresql",
    "mysql",
    "redis",
    "kafka",
    "aws",
    "gcp",
    "terraform",
    "graphql",
];

/// Try known about/career paths with a bounded budget per candidate and
/// collect the pages that answered.
pub async fn fetch(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let base = url::Url::parse(&item.url)
        .map_err(|e| EngineError::Parse(format!("bad company url {}: {}", item.url, e)))?;

    let mut pages = Vec::new();
    let mut last_error: Option<EngineError> = None;

    for path in ABOUT_PATHS {
        if pages.len() >= MAX_PAGES {
            break;
        }
        let candidate = if path.is_empty() {
            base.clone()
        } else {
            match base.join(path) {
                Ok(u) => u,
                Err(_) => continue,
            }
        };

        let fetched = tokio::time::timeout(
            Duration::from_secs(PER_CANDIDATE_SECS),
            ctx.fetcher.fetch(candidate.as_str()),
        )
        .await;

        match fetched {
            Ok(Ok(page)) if page.is_success() && !page.body.trim().is_empty() => {
                let body: String = page.body.chars().take(MAX_PAGE_CHARS).collect();
                pages.push(json!({"url": page.url, "body": body}));
            }
            Ok(Ok(page)) => {
                debug!("company page {} answered {}", candidate, page.status);
                last_error = Some(EngineError::Http {
                    status: Some(page.status),
                    message: format!("GET {} returned {}", candidate, page.status),
                });
            }
            Ok(Err(e)) => {
                debug!("company page {} failed: {}", candidate, e);
                last_error = Some(e);
            }
            Err(_) => {
                debug!("company page {} timed out", candidate);
                last_error = Some(EngineError::Timeout(PER_CANDIDATE_SECS));
            }
        }
    }

    if pages.is_empty() {
        // All candidates failed; classification of the last error decides
        // whether a retry is worth it.
        return Err(last_error.unwrap_or(EngineError::Http {
            status: Some(404),
            message: format!("no company pages reachable under {}", item.url),
        }));
    }

    item.result_message = Some(format!("fetched {} company pages", pages.len()));
    item.record_stage(keys::RAW_PAGES, Value::Array(pages));
    Ok(())
}

/// Clean the fetched HTML down to bounded analyzable text.
pub async fn extract(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let pages = raw_pages(item)?;
    let config = ctx.config.current().await;
    let budget = config.ai.max_content_chars;

    let mut combined = String::new();
    for page in &pages {
        if combined.len() >= budget {
            break;
        }
        let body = page.get("body").and_then(|b| b.as_str()).unwrap_or("");
        let cleaned = clean_page(body, budget - combined.len());
        if !cleaned.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&cleaned);
        }
    }

    item.record_stage(
        keys::EXTRACTED,
        json!({"text": combined, "chars": combined.len(), "pages": pages.len()}),
    );
    Ok(())
}

/// AI extraction of the company profile, with a heuristic fallback when
/// the provider is unavailable or fails.
pub async fn analyze(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let extracted: Value = item
        .stage(keys::EXTRACTED)
        .ok_or_else(|| EngineError::Invariant("extracted missing at analyze".to_string()))?;
    let text = extracted
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();
    let config = ctx.config.current().await;

    let analysis = if ctx.ai.is_available().await {
        let prompt = format!(
            "Extract a company profile from these pages.\n{}",
            text.chars()
                .take(config.ai.max_content_chars)
                .collect::<String>()
        );
        let schema = json!({
            "type": "object",
            "properties": {
                "about": {"type": "string"},
                "culture": {"type": "string"},
                "mission": {"type": "string"},
                "size": {"type": "string"},
                "industry": {"type": "string"},
                "founded": {"type": "string"},
                "hq_location": {"type": "string"},
                "tech_stack": {"type": "array", "items": {"type": "string"}},
                "job_board_hint": {"type": "string"}
            }
        });
        match ctx.ai.analyze(&prompt, AiTier::Medium, Some(&schema)).await {
            Ok(mut value) => {
                if let Some(obj) = value.as_object_mut() {
                    obj.insert("used_ai".to_string(), json!(true));
                }
                value
            }
            Err(e) => {
                warn!("company analysis fell back to heuristics: {}", e);
                heuristic_analysis(item, &text, &config.filter.tech_ranks)
            }
        }
    } else {
        heuristic_analysis(item, &text, &config.filter.tech_ranks)
    };

    item.record_stage(keys::ANALYSIS, analysis);
    Ok(())
}

/// Pattern-match profile extraction for when the AI is down.
fn heuristic_analysis(item: &WorkItem, text: &str, tech_ranks: &[String]) -> Value {
    let lower = text.to_lowercase();

    let mut stack: Vec<String> = Vec::new();
    for tech in KNOWN_TECH
        .iter()
        .map(|t| t.to_string())
        .chain(tech_ranks.iter().map(|t| t.to_lowercase()))
    {
        if lower.contains(&tech) && !stack.contains(&tech) {
            stack.push(tech);
        }
    }

    let about: String = text.chars().take(400).collect();

    // Board links hide in the raw HTML, not the cleaned text.
    let board_hint = item
        .stage::<Vec<Value>>(keys::RAW_PAGES)
        .and_then(|pages| {
            pages.iter().find_map(|p| {
                p.get("body")
                    .and_then(|b| b.as_str())
                    .and_then(find_board_hint)
            })
        });

    let mut analysis = json!({
        "about": about,
        "tech_stack": stack,
        "used_ai": false,
    });
    if let Some(hint) = board_hint {
        analysis["job_board_hint"] = json!(hint);
    }
    analysis
}

/// Upsert the company keyed by normalized name, score and tier it, and
/// spawn source discovery when a board hint surfaced with no enabled
/// source behind it.
pub async fn save(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let analysis: Value = item
        .stage(keys::ANALYSIS)
        .ok_or_else(|| EngineError::Invariant("analysis missing at save".to_string()))?;
    let config = ctx.config.current().await;

    let name = item
        .payload
        .get("company_name")
        .and_then(|n| n.as_str())
        .map(String::from)
        .unwrap_or(host_of(&item.url)?);
    let key = normalize_company_name(&name);

    // Upsert: keep the original creation time when re-analyzing.
    let existing = ctx.store.get(collections::COMPANIES, &key).await?;
    let mut company = Company::new(&name);
    if let Some(ref doc) = existing {
        if let Some(created) = doc.get("created_at").and_then(|c| c.as_str()) {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(created) {
                company.created_at = dt.with_timezone(&Utc);
            }
        }
    }

    company.website = item
        .payload
        .get("website")
        .and_then(|w| w.as_str())
        .map(String::from)
        .or(Some(item.url.clone()));
    company.about = str_field(&analysis, "about");
    company.culture = str_field(&analysis, "culture");
    company.mission = str_field(&analysis, "mission");
    company.size = str_field(&analysis, "size");
    company.industry = str_field(&analysis, "industry");
    company.founded = str_field(&analysis, "founded");
    company.hq_location = str_field(&analysis, "hq_location");
    company.job_board_hint = str_field(&analysis, "job_board_hint");
    company.tech_stack = analysis
        .get("tech_stack")
        .and_then(|t| t.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    company.set_score(priority_score(&company, &config.filter));

    ctx.store
        .put(
            collections::COMPANIES,
            &key,
            &serde_json::to_value(&company)
                .map_err(|e| EngineError::Parse(e.to_string()))?,
        )
        .await?;

    // Board hint with no enabled source behind it: discover one.
    if let Some(ref hint) = company.job_board_hint {
        let enabled_sources = ctx
            .store
            .query(
                collections::JOB_SOURCES,
                &[
                    Where::eq("company_ref", key.as_str()),
                    Where::eq("enabled", true),
                ],
                None,
                Some(1),
            )
            .await?;
        if enabled_sources.is_empty() {
            match ctx
                .queue
                .spawn(
                    item,
                    WorkItemType::SourceDiscovery,
                    hint,
                    json!({"company_ref": key}),
                )
                .await?
            {
                Ok(child) => info!("spawned source discovery {} for {}", child.id, key),
                Err(refusal) => debug!(
                    "source discovery spawn for {} refused: {}",
                    key,
                    refusal.as_str()
                ),
            }
        }
    }

    item.record_stage(
        keys::SAVED_REF,
        json!({"collection": collections::COMPANIES, "id": key}),
    );
    item.status = WorkItemStatus::Success;
    item.result_message = Some(format!(
        "company saved: {} (tier {}, score {})",
        company.name,
        company.tier.as_str(),
        company.priority_score
    ));
    Ok(())
}

/// Priority score: base 50, HQ-location bonus, rank-weighted stack
/// alignment, capped at 100 by the tier setter.
fn priority_score(company: &Company, filter: &crate::config::FilterConfig) -> u32 {
    let mut score: u32 = 50;

    if let Some(ref hq) = company.hq_location {
        if hq
            .to_lowercase()
            .contains(&filter.hq_bonus_location.to_lowercase())
        {
            score += 15;
        }
    }

    for (rank, skill) in filter.tech_ranks.iter().enumerate() {
        let matched = company
            .tech_stack
            .iter()
            .any(|t| t.eq_ignore_ascii_case(skill));
        if matched {
            score += 10u32.saturating_sub(2 * rank as u32).max(2);
        }
    }

    score
}

fn raw_pages(item: &WorkItem) -> Result<Vec<Value>> {
    item.stage(keys::RAW_PAGES)
        .ok_or_else(|| EngineError::Invariant("raw_pages missing".to_string()))
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}
