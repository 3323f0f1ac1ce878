//! Job pipeline stages: scrape -> filter -> analyze -> save.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{keys, StageContext};
use crate::ai::AiTier;
use crate::dedup::url_hash;
use crate::error::{EngineError, Result};
use crate::filter::{self, FilterResult};
use crate::models::{
    normalize_company_name, JobMatch, JobRecord, ResumeIntake, WorkItem, WorkItemStatus,
    WorkItemType,
};
use crate::store::{collections, Store};

/// Download the posting and normalize it into a job record.
pub async fn scrape(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let page = ctx.fetcher.fetch(&item.url).await?;
    page.error_for_status()?;

    let record = crate::scrape::parse_job(&item.url, &page)?;
    item.result_message = Some(format!("scraped: {} at {}", record.title, record.company_name));
    item.record_stage(keys::JOB_DATA, serde_json::to_value(&record).map_err(to_parse)?);
    Ok(())
}

/// Apply the two-tier filter. Rejection is a terminal FILTERED status and
/// spawns nothing downstream.
pub async fn filter(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let record = job_record(item)?;
    let config = ctx.config.current().await;

    let result = filter::evaluate(&record, &config.filter);
    let summary = result.summary();
    item.record_stage(
        keys::FILTER_RESULT,
        serde_json::to_value(&result).map_err(to_parse)?,
    );

    if !result.passed {
        item.status = WorkItemStatus::Filtered;
        info!("job {} filtered: {}", item.url, summary);
    }
    item.result_message = Some(summary);
    Ok(())
}

/// Tiered analysis: cheap classification, medium scoring, expensive
/// rescore only when the preliminary score lands near the threshold.
pub async fn analyze(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let record = job_record(item)?;
    let config = ctx.config.current().await;
    let thresholds = &config.ai.thresholds;

    let description: String = record
        .description
        .chars()
        .take(config.ai.max_content_chars)
        .collect();

    // Company context, when the pipeline already knows this company.
    let company_key = normalize_company_name(&record.company_name);
    let company_context = match ctx.store.get(collections::COMPANIES, &company_key).await {
        Ok(Some(doc)) => {
            let about = doc.get("about").and_then(|a| a.as_str()).unwrap_or("");
            let stack = doc
                .get("tech_stack")
                .and_then(|t| t.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!("Company: {}\nKnown stack: {}\n", about, stack)
        }
        _ => String::new(),
    };

    // Cheap tier: classification to enrich the record before scoring.
    let classify_prompt = format!(
        "Classify this job posting.\nTitle: {}\nCompany: {}\nDescription: {}",
        record.title, record.company_name, description
    );
    let classification = ctx
        .ai
        .analyze(
            &classify_prompt,
            AiTier::Cheap,
            Some(&json!({
                "type": "object",
                "properties": {
                    "category": {"type": "string"},
                    "seniority": {"type": "string"}
                }
            })),
        )
        .await
        .map_err(|e| EngineError::Ai(format!("classification: {}", e)))?;

    // Medium tier: scoring against the user profile.
    let score_prompt = format!(
        "Score this job posting against the candidate profile (0-100).\n\
         Profile skills (ranked): {}\nTarget seniority: {}\n{}\
         Title: {}\nCompany: {}\nLocation: {:?}\nCategory: {}\nDescription: {}",
        config.filter.tech_ranks.join(", "),
        config.filter.target_seniority.join(", "),
        company_context,
        record.title,
        record.company_name,
        record.location,
        classification
            .get("category")
            .and_then(|c| c.as_str())
            .unwrap_or("unknown"),
        description
    );
    let score_schema = json!({
        "type": "object",
        "properties": {
            "score": {"type": "integer"},
            "matched_skills": {"type": "array", "items": {"type": "string"}},
            "missing_skills": {"type": "array", "items": {"type": "string"}},
            "summary": {"type": "string"},
            "highlight_skills": {"type": "array", "items": {"type": "string"}},
            "talking_points": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["score"]
    });
    let mut analysis = ctx
        .ai
        .analyze(&score_prompt, AiTier::Medium, Some(&score_schema))
        .await
        .map_err(|e| EngineError::Ai(format!("scoring: {}", e)))?;
    let mut score = read_score(&analysis)?;
    let mut tiers_used = vec!["cheap", "medium"];

    // Expensive tier: rescore only in the band around the threshold.
    let band = thresholds.rescore_band;
    let min = thresholds.min_match_score;
    if score.abs_diff(min) <= band {
        debug!(
            "job {} score {} within ±{} of threshold {}, rescoring",
            item.url, score, band, min
        );
        analysis = ctx
            .ai
            .analyze(&score_prompt, AiTier::Expensive, Some(&score_schema))
            .await
            .map_err(|e| EngineError::Ai(format!("rescore: {}", e)))?;
        score = read_score(&analysis)?;
        tiers_used.push("expensive");
    }

    let filter_result: FilterResult = item
        .stage(keys::FILTER_RESULT)
        .ok_or_else(|| EngineError::Invariant("filter_result missing at analyze".to_string()))?;

    let match_result = json!({
        "score": score,
        "strike_count": filter_result.strike_total,
        "matched_skills": analysis.get("matched_skills").cloned().unwrap_or(json!([])),
        "missing_skills": analysis.get("missing_skills").cloned().unwrap_or(json!([])),
        "resume_intake": {
            "summary": analysis.get("summary").and_then(|s| s.as_str()).unwrap_or(""),
            "highlight_skills": analysis.get("highlight_skills").cloned().unwrap_or(json!([])),
            "talking_points": analysis.get("talking_points").cloned().unwrap_or(json!([])),
        },
        "tiers_used": tiers_used,
    });
    item.record_stage(keys::MATCH_RESULT, match_result);

    if score < min {
        item.status = WorkItemStatus::Skipped;
        item.result_message = Some(format!("score {} below minimum {}", score, min));
        info!("job {} skipped: score {} < {}", item.url, score, min);
    } else {
        item.result_message = Some(format!("scored {}", score));
    }
    Ok(())
}

/// Persist the match and cross-reference the company, spawning a COMPANY
/// item when the company is not yet known.
pub async fn save(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let record = job_record(item)?;
    let match_result: Value = item
        .stage(keys::MATCH_RESULT)
        .ok_or_else(|| EngineError::Invariant("match_result missing at save".to_string()))?;

    let company_key = normalize_company_name(&record.company_name);
    let company_known = ctx
        .store
        .get(collections::COMPANIES, &company_key)
        .await?
        .is_some();

    // Company discovery happens as an event through the spawn gate, never
    // as a direct reference edge.
    if !company_known {
        match record.company_website {
            Some(ref website) => {
                match ctx
                    .queue
                    .spawn(
                        item,
                        WorkItemType::Company,
                        website,
                        json!({
                            "company_name": record.company_name,
                            "website": website,
                        }),
                    )
                    .await?
                {
                    Ok(child) => {
                        info!(
                            "spawned company item {} for {}",
                            child.id, record.company_name
                        );
                        ctx.dedup.mark_known(website, WorkItemType::Company).await?;
                    }
                    Err(refusal) => {
                        debug!(
                            "company spawn for {} refused: {}",
                            record.company_name,
                            refusal.as_str()
                        );
                    }
                }
            }
            None => {
                debug!(
                    "company {} unknown but no website to spawn from",
                    record.company_name
                );
            }
        }
    }

    let company_ref = if company_known {
        company_key.clone()
    } else {
        // Provisional: resolves once the spawned company pipeline lands.
        format!("pending:{}", company_key)
    };

    let now = Utc::now();
    let score = match_result
        .get("score")
        .and_then(|s| s.as_u64())
        .unwrap_or(0) as u32;
    let resume_intake: ResumeIntake = match_result
        .get("resume_intake")
        .and_then(|r| serde_json::from_value(r.clone()).ok())
        .unwrap_or_default();

    let job_match = JobMatch {
        id: url_hash(&item.url)?,
        url: item.url.clone(),
        title: record.title.clone(),
        company_ref,
        company_name: record.company_name.clone(),
        location: record.location.clone(),
        remote: record.remote,
        match_score: score,
        strike_count: match_result
            .get("strike_count")
            .and_then(|s| s.as_u64())
            .unwrap_or(0) as u32,
        matched_skills: string_list(&match_result, "matched_skills"),
        missing_skills: string_list(&match_result, "missing_skills"),
        resume_intake,
        analyzed_at: now,
        created_at: now,
    };

    ctx.store
        .put(
            collections::JOB_MATCHES,
            &job_match.id,
            &serde_json::to_value(&job_match).map_err(to_parse)?,
        )
        .await?;

    item.record_stage(
        keys::SAVED_REF,
        json!({"collection": collections::JOB_MATCHES, "id": job_match.id}),
    );
    item.status = WorkItemStatus::Success;
    item.result_message = Some(format!(
        "match saved: {} (score {})",
        record.title, score
    ));
    Ok(())
}

fn job_record(item: &WorkItem) -> Result<JobRecord> {
    item.stage(keys::JOB_DATA)
        .ok_or_else(|| EngineError::Invariant("job_data missing".to_string()))
}

fn read_score(analysis: &Value) -> Result<u32> {
    analysis
        .get("score")
        .and_then(|s| s.as_u64())
        .map(|s| s.min(100) as u32)
        .ok_or_else(|| EngineError::Parse("analysis response has no score".to_string()))
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|s| s.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn to_parse(e: serde_json::Error) -> EngineError {
    EngineError::Parse(e.to_string())
}
