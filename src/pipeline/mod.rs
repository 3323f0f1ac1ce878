//! Pipeline engine: dispatcher and stage handlers.
//!
//! The worker loop claims an item and calls `run_stage` exactly once; the
//! selected handler mutates the item in memory (new stage outputs, maybe a
//! terminal status) and may spawn child work through the queue manager's
//! safe-spawn gate. No stage calls another stage; persistence happens at
//! the stage boundary, in the worker.

mod company;
mod dispatcher;
mod job;
mod scrape_run;
mod source;

pub use dispatcher::{select_stage, Stage};

use std::sync::Arc;

use crate::ai::AiProvider;
use crate::config::ConfigHandle;
use crate::dedup::DedupCache;
use crate::error::Result;
use crate::health::HealthTracker;
use crate::models::WorkItem;
use crate::queue::QueueManager;
use crate::scrape::Fetcher;
use crate::store::Store;

/// Stage output keys. Presence of a key in `pipeline_state` means the
/// stage producing it has completed.
pub mod keys {
    pub const JOB_DATA: &str = "job_data";
    pub const FILTER_RESULT: &str = "filter_result";
    pub const MATCH_RESULT: &str = "match_result";
    pub const SAVED_REF: &str = "saved_ref";

    pub const RAW_PAGES: &str = "raw_pages";
    pub const EXTRACTED: &str = "extracted";
    pub const ANALYSIS: &str = "analysis";

    pub const DETECTED: &str = "detected";
    pub const VALIDATED: &str = "validated";

    pub const SCRAPE_RESULT: &str = "scrape_result";
}

/// Everything a stage handler may touch. Shared by all workers in the
/// process; constructed once at startup.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn Store>,
    pub queue: Arc<QueueManager>,
    pub ai: Arc<dyn AiProvider>,
    pub fetcher: Arc<dyn Fetcher>,
    pub dedup: Arc<DedupCache>,
    pub health: Arc<HealthTracker>,
    pub config: ConfigHandle,
}

impl StageContext {
    pub fn new(
        store: Arc<dyn Store>,
        ai: Arc<dyn AiProvider>,
        fetcher: Arc<dyn Fetcher>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            queue: Arc::new(QueueManager::new(store.clone())),
            dedup: Arc::new(DedupCache::default()),
            health: Arc::new(HealthTracker::new(store.clone())),
            store,
            ai,
            fetcher,
            config,
        }
    }
}

/// Dispatch and run exactly one stage for the item. On return the item
/// carries any new stage outputs and status changes; the caller persists.
pub async fn run_stage(ctx: &StageContext, item: &mut WorkItem) -> Result<()> {
    let stage = select_stage(item.item_type, &item.pipeline_state);
    tracing::debug!("item {} ({}) -> {}", item.id, item.url, stage.as_str());

    match stage {
        Stage::JobScrape => job::scrape(ctx, item).await,
        Stage::JobFilter => job::filter(ctx, item).await,
        Stage::JobAnalyze => job::analyze(ctx, item).await,
        Stage::JobSave => job::save(ctx, item).await,
        Stage::CompanyFetch => company::fetch(ctx, item).await,
        Stage::CompanyExtract => company::extract(ctx, item).await,
        Stage::CompanyAnalyze => company::analyze(ctx, item).await,
        Stage::CompanySave => company::save(ctx, item).await,
        Stage::SourceDetect => source::detect(ctx, item).await,
        Stage::SourceValidate => source::validate(ctx, item).await,
        Stage::SourceSave => source::save(ctx, item).await,
        Stage::ScrapeRun => scrape_run::run(ctx, item).await,
    }
}
