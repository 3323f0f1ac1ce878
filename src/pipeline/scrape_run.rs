//! Scrape runner: enumerate a source's listings and enqueue job items.

use std::time::Instant;

use serde_json::json;
use tracing::{debug, info};

use super::{keys, StageContext};
use crate::error::{EngineError, Result};
use crate::health::ScrapeOutcome;
use crate::models::{Source, WorkItem, WorkItemStatus, WorkItemType};
use crate::scrape::extract_listings;
use crate::store::{collections, Store};

/// Run one scrape: fetch the board, extract listings, drop already-known
/// URLs, safe-spawn a JOB per survivor, and report health.
pub async fn run(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let source_id = item
        .source_ref
        .clone()
        .or_else(|| {
            item.payload
                .get("source_id")
                .and_then(|s| s.as_str())
                .map(String::from)
        })
        .ok_or_else(|| EngineError::Invariant("scrape item has no source_ref".to_string()))?;

    let source_doc = ctx
        .store
        .get(collections::JOB_SOURCES, &source_id)
        .await?
        .ok_or_else(|| EngineError::Invariant(format!("unknown source {}", source_id)))?;
    let source: Source = serde_json::from_value(source_doc)
        .map_err(|e| EngineError::Store(format!("corrupt source {}: {}", source_id, e)))?;

    let started = Instant::now();

    let scraped = async {
        let page = ctx.fetcher.fetch(&source.url).await?;
        page.error_for_status()?;
        extract_listings(
            source.source_type,
            &source.url,
            &page,
            source.selectors.as_ref(),
        )
    }
    .await;

    let listings = match scraped {
        Ok(listings) => listings,
        Err(e) => {
            ctx.health
                .record_scrape(
                    &source,
                    ScrapeOutcome {
                        success: false,
                        jobs_found: 0,
                        duration_ms: started.elapsed().as_millis() as u64,
                    },
                )
                .await;
            return Err(e);
        }
    };

    // Drop listings already known to the queue or the match store.
    let urls: Vec<String> = listings.iter().map(|l| l.url.clone()).collect();
    let known = ctx
        .dedup
        .batch_exists(ctx.store.as_ref(), &urls, WorkItemType::Job)
        .await?;

    let mut spawned = 0usize;
    let mut skipped_known = 0usize;
    let mut refused = 0usize;
    for listing in &listings {
        if known.get(&listing.url).copied().unwrap_or(false) {
            skipped_known += 1;
            continue;
        }
        let payload = json!({
            "source_id": source.id,
            "company_hint": listing.company_hint,
            "title_hint": listing.title,
        });
        match ctx
            .queue
            .spawn(item, WorkItemType::Job, &listing.url, payload)
            .await?
        {
            Ok(child) => {
                spawned += 1;
                ctx.dedup.mark_known(&child.url, WorkItemType::Job).await?;
            }
            Err(reason) => {
                refused += 1;
                debug!(
                    "listing {} not spawned: {}",
                    listing.url,
                    reason.as_str()
                );
            }
        }
    }

    ctx.health
        .record_scrape(
            &source,
            ScrapeOutcome {
                success: true,
                jobs_found: listings.len() as u32,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        )
        .await;

    item.record_stage(
        keys::SCRAPE_RESULT,
        json!({
            "listings": listings.len(),
            "spawned": spawned,
            "known": skipped_known,
            "refused": refused,
        }),
    );
    item.status = WorkItemStatus::Success;
    item.result_message = Some(format!(
        "scraped {}: {} listings, {} spawned, {} known, {} refused",
        source.url,
        listings.len(),
        spawned,
        skipped_known,
        refused
    ));
    info!("{}", item.result_message.as_deref().unwrap_or_default());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ScriptedProvider;
    use crate::config::{Config, ConfigHandle};
    use crate::models::{Confidence, SourceType};
    use crate::scrape::StaticFetcher;
    use crate::store::{MemoryStore, Where};
    use std::sync::Arc;

    const BOARD: &str = r#"{"jobs": [
        {"absolute_url": "https://boards.greenhouse.io/acme/jobs/1", "title": "Engineer"},
        {"absolute_url": "https://boards.greenhouse.io/acme/jobs/2", "title": "SRE"}
    ]}"#;

    async fn seeded_ctx(fetcher: StaticFetcher) -> StageContext {
        let ctx = StageContext::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedProvider::new()),
            Arc::new(fetcher),
            ConfigHandle::new(Config::default()),
        );
        let mut source = Source::new(
            "src1".into(),
            SourceType::Greenhouse,
            "https://boards.greenhouse.io/acme".into(),
            Confidence::High,
        );
        source.company_ref = Some("acme".into());
        ctx.store
            .put(
                collections::JOB_SOURCES,
                "src1",
                &serde_json::to_value(&source).unwrap(),
            )
            .await
            .unwrap();
        ctx
    }

    fn scrape_item() -> WorkItem {
        let mut item = WorkItem::new_root(
            WorkItemType::Scrape,
            "https://boards.greenhouse.io/acme".into(),
        );
        item.source_ref = Some("src1".into());
        item
    }

    #[tokio::test]
    async fn test_run_spawns_jobs_and_updates_health() {
        let fetcher = StaticFetcher::new().with_page(
            "https://boards.greenhouse.io/acme",
            "application/json",
            BOARD,
        );
        let ctx = seeded_ctx(fetcher).await;
        let mut item = scrape_item();
        ctx.queue.save(&item).await.unwrap();

        run(&ctx, &mut item).await.unwrap();

        assert_eq!(item.status, WorkItemStatus::Success);
        let jobs = ctx
            .store
            .query(
                collections::WORK_QUEUE,
                &[Where::eq("type", "job")],
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
        // Children share the scrape item's lineage.
        for job in &jobs {
            assert_eq!(job["tracking_id"], serde_json::json!(item.tracking_id));
            assert_eq!(job["spawn_depth"], 1);
        }

        let source = ctx
            .store
            .get(collections::JOB_SOURCES, "src1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source["health"]["success_count"], 1);
        assert_eq!(source["health"]["avg_jobs_per_scrape"], 2.0);
    }

    #[tokio::test]
    async fn test_run_skips_known_urls() {
        let fetcher = StaticFetcher::new().with_page(
            "https://boards.greenhouse.io/acme",
            "application/json",
            BOARD,
        );
        let ctx = seeded_ctx(fetcher).await;

        // First job already sits in the queue from an earlier run.
        ctx.store
            .put(
                collections::WORK_QUEUE,
                "existing",
                &serde_json::json!({
                    "url": "https://boards.greenhouse.io/acme/jobs/1",
                    "type": "job", "status": "success"
                }),
            )
            .await
            .unwrap();

        let mut item = scrape_item();
        ctx.queue.save(&item).await.unwrap();
        run(&ctx, &mut item).await.unwrap();

        let result: serde_json::Value = item.stage(keys::SCRAPE_RESULT).unwrap();
        assert_eq!(result["listings"], 2);
        assert_eq!(result["spawned"], 1);
        assert_eq!(result["known"], 1);
    }

    #[tokio::test]
    async fn test_run_failure_records_health() {
        // Board endpoint missing: 404.
        let ctx = seeded_ctx(StaticFetcher::new()).await;
        let mut item = scrape_item();
        ctx.queue.save(&item).await.unwrap();

        let err = run(&ctx, &mut item).await.unwrap_err();
        assert!(!err.is_transient());

        let source = ctx
            .store
            .get(collections::JOB_SOURCES, "src1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source["health"]["failure_count"], 1);
        assert_eq!(source["health"]["consecutive_failures"], 1);
    }

    #[tokio::test]
    async fn test_run_unknown_source_is_invariant_failure() {
        let ctx = seeded_ctx(StaticFetcher::new()).await;
        let mut item = scrape_item();
        item.source_ref = Some("missing".into());
        let err = run(&ctx, &mut item).await.unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }
}
