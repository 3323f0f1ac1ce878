//! Scrape-cycle scheduler.
//!
//! When enabled, periodically enqueues SCRAPE items for the sources the
//! rotation ranks highest, but only inside the configured daytime window
//! and only until the day's match target is met. The config file is
//! re-read between cycles.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::models::{CompanyTier, Source, WorkItemStatus, WorkItemType};
use crate::pipeline::StageContext;
use crate::rotation::pick_rotation;
use crate::store::{collections, rfc3339_utc, Order, Store, Where};

/// Sleep between scheduler cycles.
const CYCLE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15 * 60);

/// Whether `now` falls inside the configured local daytime window.
pub fn in_daytime_window(config: &SchedulerConfig, now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&config.offset());
    let hour = local.hour();
    let (start, end) = (config.daytime_hours.start, config.daytime_hours.end);
    if start <= end {
        hour >= start && hour < end
    } else {
        // Window wraps midnight.
        hour >= start || hour < end
    }
}

/// Matches written since the local midnight.
async fn matches_today(ctx: &StageContext, config: &SchedulerConfig) -> Result<usize> {
    let local_now = Utc::now().with_timezone(&config.offset());
    let midnight = local_now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive - chrono::Duration::seconds(config.offset().local_minus_utc() as i64))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or_else(Utc::now);

    let docs = ctx
        .store
        .query(
            collections::JOB_MATCHES,
            &[Where::gte("created_at", rfc3339_utc(midnight))],
            None,
            None,
        )
        .await?;
    Ok(docs.len())
}

/// Run one scheduling cycle: rank sources and enqueue scrapes.
/// Returns how many SCRAPE items were enqueued.
pub async fn run_cycle(ctx: &StageContext) -> Result<usize> {
    let config = ctx.config.current().await;
    let scheduler = &config.scheduler;

    if !in_daytime_window(scheduler, Utc::now()) {
        debug!("outside daytime window, skipping cycle");
        return Ok(0);
    }

    let today = matches_today(ctx, scheduler).await?;
    if today >= scheduler.target_matches as usize {
        info!(
            "daily target reached ({}/{}), skipping cycle",
            today, scheduler.target_matches
        );
        return Ok(0);
    }

    // Load sources and the context the rotation ranks on.
    let source_docs = ctx
        .store
        .query(
            collections::JOB_SOURCES,
            &[Where::eq("enabled", true)],
            Some(("health.health_score", Order::Desc)),
            None,
        )
        .await?;
    let sources: Vec<Source> = source_docs
        .into_iter()
        .filter_map(|doc| serde_json::from_value(doc).ok())
        .collect();
    if sources.is_empty() {
        debug!("no enabled sources");
        return Ok(0);
    }

    let tiers = company_tiers(ctx, &sources).await?;
    let counts = ctx
        .health
        .company_scrape_counts(config.rotation.fairness_window_days)
        .await?;

    // Rank everything; sources with a live scrape are skipped below, so
    // the cycle can still fill its batch from the next ranked ones.
    let ranked = pick_rotation(&sources, &tiers, &counts, &config.rotation, sources.len());

    let mut enqueued = 0usize;
    for source in ranked {
        if enqueued >= scheduler.max_sources {
            break;
        }
        // One live scrape per source at a time.
        let live = ctx
            .store
            .query(
                collections::WORK_QUEUE,
                &[
                    Where::eq("type", WorkItemType::Scrape.as_str()),
                    Where::eq("source_ref", source.id.as_str()),
                    Where::is_in(
                        "status",
                        vec![
                            json!(WorkItemStatus::Pending.as_str()),
                            json!(WorkItemStatus::Processing.as_str()),
                        ],
                    ),
                ],
                None,
                Some(1),
            )
            .await?;
        if !live.is_empty() {
            debug!("scrape already queued for source {}", source.id);
            continue;
        }

        let mut item = ctx
            .queue
            .submit_root(WorkItemType::Scrape, &source.url, json!({}))
            .await?;
        item.source_ref = Some(source.id.clone());
        ctx.queue.save(&item).await?;
        enqueued += 1;
        info!("enqueued scrape of {} ({})", source.url, source.id);
    }

    Ok(enqueued)
}

/// Tier lookup for the companies behind a source list.
async fn company_tiers(
    ctx: &StageContext,
    sources: &[Source],
) -> Result<HashMap<String, CompanyTier>> {
    let ids: Vec<String> = sources
        .iter()
        .filter_map(|s| s.company_ref.clone())
        .collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let docs = ctx.store.batch_get(collections::COMPANIES, &ids).await?;

    let mut tiers = HashMap::new();
    for (id, doc) in ids.into_iter().zip(docs) {
        if let Some(doc) = doc {
            if let Some(tier) = doc
                .get("tier")
                .and_then(|t| serde_json::from_value::<CompanyTier>(t.clone()).ok())
            {
                tiers.insert(id, tier);
            }
        }
    }
    Ok(tiers)
}

/// Scheduler loop: reload config, run a cycle, sleep.
pub async fn run_scheduler(ctx: StageContext) {
    info!("scheduler started");
    loop {
        if let Err(e) = ctx.config.reload().await {
            warn!("config reload failed, keeping previous: {}", e);
        }
        let config = ctx.config.current().await;
        if config.scheduler.enabled {
            match run_cycle(&ctx).await {
                Ok(n) if n > 0 => info!("cycle enqueued {} scrapes", n),
                Ok(_) => {}
                Err(e) => warn!("scheduler cycle failed: {}", e),
            }
        }
        tokio::time::sleep(CYCLE_INTERVAL).await;
    }
}
