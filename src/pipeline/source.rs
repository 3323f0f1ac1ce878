//! Source discovery stages: detect -> validate -> save.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{keys, StageContext};
use crate::ai::AiTier;
use crate::dedup::url_hash;
use crate::error::{EngineError, Result};
use crate::models::{
    Confidence, SelectorConfig, Source, SourceType, WorkItem, WorkItemStatus,
};
use crate::scrape::{detect_from_probe, detect_from_url, extract_listings};
use crate::store::{collections, Store};

/// Classify the source type. Strict URL patterns are high confidence;
/// content probes cover feeds and APIs; everything else is generic HTML
/// at low confidence with AI-assisted selector discovery.
pub async fn detect(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let (source_type, confidence, board_token) = match detect_from_url(&item.url) {
        Some(hit) => hit,
        None => {
            let page = ctx.fetcher.fetch(&item.url).await?;
            page.error_for_status()?;
            let (t, c) = detect_from_probe(&page);
            (t, c, None)
        }
    };

    let mut detected = json!({
        "source_type": source_type.as_str(),
        "confidence": confidence.as_str(),
    });
    if let Some(token) = board_token {
        detected["board_token"] = json!(token);
    }

    if source_type == SourceType::Html {
        let selectors = discover_selectors(ctx, item).await;
        detected["selectors"] = serde_json::to_value(&selectors)
            .map_err(|e| EngineError::Parse(e.to_string()))?;
    }

    item.result_message = Some(format!(
        "detected {} ({} confidence)",
        source_type.as_str(),
        confidence.as_str()
    ));
    item.record_stage(keys::DETECTED, detected);
    Ok(())
}

/// Ask the cheap tier for row/title/link selectors; fall back to the
/// defaults when the provider is out.
async fn discover_selectors(ctx: &StageContext, item: &WorkItem) -> SelectorConfig {
    if !ctx.ai.is_available().await {
        return SelectorConfig::default();
    }
    let sample = match ctx.fetcher.fetch(&item.url).await {
        Ok(page) if page.is_success() => page.body.chars().take(8_000).collect::<String>(),
        _ => return SelectorConfig::default(),
    };

    let prompt = format!(
        "Derive CSS selectors for the job listings on this careers page: \
         one selector matching a listing row, one for the title within a \
         row, one for the link.\n{}",
        sample
    );
    let schema = json!({
        "type": "object",
        "properties": {
            "list": {"type": "string"},
            "title": {"type": "string"},
            "link": {"type": "string"}
        },
        "required": ["list", "title", "link"]
    });
    match ctx.ai.analyze(&prompt, AiTier::Cheap, Some(&schema)).await {
        Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("selector discovery returned unusable JSON: {}", e);
            SelectorConfig::default()
        }),
        Err(e) => {
            warn!("selector discovery failed: {}", e);
            SelectorConfig::default()
        }
    }
}

/// Probe high/medium confidence sources and require at least one job
/// record. Low confidence skips the probe and is parked for manual
/// validation.
pub async fn validate(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let detected = detected(item)?;
    let confidence = detected_confidence(&detected)?;

    if confidence == Confidence::Low {
        item.record_stage(
            keys::VALIDATED,
            json!({"ok": false, "manual_validation_required": true}),
        );
        item.result_message = Some("low confidence: manual validation required".to_string());
        return Ok(());
    }

    let source_type = detected_type(&detected)?;
    let selectors: Option<SelectorConfig> = detected
        .get("selectors")
        .and_then(|s| serde_json::from_value(s.clone()).ok());

    let page = ctx.fetcher.fetch(&item.url).await?;
    page.error_for_status()?;
    let listings = extract_listings(source_type, &item.url, &page, selectors.as_ref())?;

    if listings.is_empty() {
        return Err(EngineError::Parse(format!(
            "probe scrape of {} found no job records",
            item.url
        )));
    }

    item.record_stage(
        keys::VALIDATED,
        json!({"ok": true, "probe_count": listings.len()}),
    );
    item.result_message = Some(format!("probe found {} listings", listings.len()));
    Ok(())
}

/// Upsert the source document. Enabled only for validated high-confidence
/// sources; existing health blocks survive re-discovery.
pub async fn save(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let detected = detected(item)?;
    let validated: Value = item
        .stage(keys::VALIDATED)
        .ok_or_else(|| EngineError::Invariant("validated missing at save".to_string()))?;

    let source_type = detected_type(&detected)?;
    let confidence = detected_confidence(&detected)?;
    let manual = validated
        .get("manual_validation_required")
        .and_then(|m| m.as_bool())
        .unwrap_or(false);
    let probe_ok = validated.get("ok").and_then(|o| o.as_bool()).unwrap_or(false);

    let id: String = url_hash(&item.url)?.chars().take(16).collect();
    let mut source = Source::new(id.clone(), source_type, item.url.clone(), confidence);
    source.company_ref = item
        .payload
        .get("company_ref")
        .and_then(|c| c.as_str())
        .map(String::from);
    source.board_token = detected
        .get("board_token")
        .and_then(|t| t.as_str())
        .map(String::from);
    source.selectors = detected
        .get("selectors")
        .and_then(|s| serde_json::from_value(s.clone()).ok());
    source.manual_validation_required = manual;
    source.enabled = confidence == Confidence::High && probe_ok && !manual;

    // Re-discovery keeps accumulated health and the original creation time.
    if let Some(existing) = ctx.store.get(collections::JOB_SOURCES, &id).await? {
        if let Some(health) = existing.get("health") {
            if let Ok(parsed) = serde_json::from_value(health.clone()) {
                source.health = parsed;
            }
        }
        if let Some(created) = existing.get("created_at").and_then(|c| c.as_str()) {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(created) {
                source.created_at = dt.with_timezone(&chrono::Utc);
            }
        }
    }

    ctx.store
        .put(
            collections::JOB_SOURCES,
            &id,
            &serde_json::to_value(&source).map_err(|e| EngineError::Parse(e.to_string()))?,
        )
        .await?;

    item.status = WorkItemStatus::Success;
    item.result_message = Some(format!(
        "source saved: {} {} (enabled: {})",
        source.source_type.as_str(),
        item.url,
        source.enabled
    ));
    if source.enabled {
        info!("enabled source {} for {}", id, item.url);
    } else {
        debug!("saved disabled source {} for {}", id, item.url);
    }
    Ok(())
}

fn detected(item: &WorkItem) -> Result<Value> {
    item.stage(keys::DETECTED)
        .ok_or_else(|| EngineError::Invariant("detected missing".to_string()))
}

fn detected_type(detected: &Value) -> Result<SourceType> {
    detected
        .get("source_type")
        .and_then(|t| t.as_str())
        .and_then(SourceType::from_str)
        .ok_or_else(|| EngineError::Invariant("detected has no source_type".to_string()))
}

fn detected_confidence(detected: &Value) -> Result<Confidence> {
    match detected.get("confidence").and_then(|c| c.as_str()) {
        Some("high") => Ok(Confidence::High),
        Some("medium") => Ok(Confidence::Medium),
        Some("low") => Ok(Confidence::Low),
        _ => Err(EngineError::Invariant(
            "detected has no confidence".to_string(),
        )),
    }
}
