//! Worker loop: claim, dispatch, persist, retry.
//!
//! Several loops may run concurrently in one process; they coordinate only
//! through the store's conditional claim. Each iteration claims one item,
//! runs exactly one stage under the item type's timeout, and persists the
//! outcome. Stage errors never escape: they are classified and mapped onto
//! the item's status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::models::{WorkItem, WorkItemStatus};
use crate::pipeline::{run_stage, StageContext};
use crate::store::{collections, rfc3339_utc, Store};

/// How long an idle worker sleeps before polling again.
const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Options for a worker run.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_count: usize,
    /// Drain mode: exit once the queue has no open work.
    pub drain: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_count: 2,
            drain: false,
        }
    }
}

/// Session totals across all loops of one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DrainReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub filtered: usize,
    pub retried: usize,
}

impl DrainReport {
    /// Exit semantics for a one-shot run: clean only when nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Run one claimed item through exactly one stage and persist the result.
/// Returns the status the item was left in.
pub async fn process_item(ctx: &StageContext, mut item: WorkItem) -> Result<WorkItemStatus> {
    let config = ctx.config.current().await;

    // A lineage invariant violation observed on read fails the item with a
    // diagnostic; no repair is attempted.
    if let Err(violation) = item.validate_lineage() {
        let message = format!("invariant violation: {}", violation);
        error!("item {}: {}", item.id, message);
        item.status = WorkItemStatus::Failed;
        item.error = Some(message);
        item.completed_at = Some(Utc::now());
        item.updated_at = Utc::now();
        ctx.queue.save(&item).await?;
        return Ok(WorkItemStatus::Failed);
    }

    let budget = config.stage_timeout_secs(item.item_type);
    let outcome = match tokio::time::timeout(
        Duration::from_secs(budget),
        run_stage(ctx, &mut item),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(budget)),
    };

    let now = Utc::now();
    match outcome {
        Ok(()) => {
            if item.status.is_terminal() {
                item.completed_at = Some(now);
            } else {
                // Stage done, pipeline not finished: hand the item back to
                // the queue for its next stage.
                item.status = WorkItemStatus::Pending;
                item.claimed_at = None;
            }
            item.error = None;
        }
        Err(e) => {
            let transient = e.is_transient();
            // Both the item's own cap and the configured cap bind.
            let retry_budget = item.max_retries.min(config.queue.max_retries);
            item.error = Some(e.to_string());
            if transient && item.retry_count < retry_budget {
                item.retry_count += 1;
                item.status = WorkItemStatus::Pending;
                item.claimed_at = None;
                warn!(
                    "item {} stage failed (retry {}/{}): {}",
                    item.id, item.retry_count, retry_budget, e
                );
            } else {
                item.status = WorkItemStatus::Failed;
                item.completed_at = Some(now);
                item.result_message = Some(format!("failed: {}", e));
                warn!("item {} failed permanently: {}", item.id, e);
            }
        }
    }
    item.updated_at = now;
    ctx.queue.save(&item).await?;
    Ok(item.status)
}

/// Run `worker_count` loops until stopped (or until drained, in drain
/// mode). Returns session totals.
pub async fn run_workers(ctx: StageContext, options: WorkerOptions) -> Result<DrainReport> {
    let report = Arc::new(Mutex::new(DrainReport::default()));
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    let mut handles = Vec::new();
    for n in 0..options.worker_count.max(1) {
        let ctx = ctx.clone();
        let report = report.clone();
        let worker_id = format!("worker:{}:{}", host, n);
        let drain = options.drain;
        handles.push(tokio::spawn(async move {
            worker_loop(ctx, worker_id, drain, report).await;
        }));
    }

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!("worker task panicked: {}", e);
        }
    }

    let final_report = *report.lock().await;
    Ok(final_report)
}

async fn worker_loop(
    ctx: StageContext,
    worker_id: String,
    drain: bool,
    report: Arc<Mutex<DrainReport>>,
) {
    info!("{} started", worker_id);
    let started = Utc::now();
    write_heartbeat(&ctx, &worker_id, started, 0, None).await;

    let mut session_processed: u64 = 0;
    loop {
        let config = ctx.config.current().await;
        let claimed = match ctx.queue.claim_next(config.queue.stale_claim_seconds).await {
            Ok(claimed) => claimed,
            Err(e) => {
                warn!("{}: claim failed: {}", worker_id, e);
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
        };

        let Some(item) = claimed else {
            if drain {
                match ctx.queue.has_open_work().await {
                    Ok(false) => break,
                    Ok(true) => {
                        // Another worker holds the remaining items.
                        tokio::time::sleep(POLL_INTERVAL).await;
                        continue;
                    }
                    Err(e) => {
                        warn!("{}: drain check failed: {}", worker_id, e);
                        tokio::time::sleep(POLL_INTERVAL).await;
                        continue;
                    }
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        };

        debug!("{} claimed {} ({})", worker_id, item.id, item.url);
        session_processed += 1;
        let current = item.url.clone();
        write_heartbeat(&ctx, &worker_id, started, session_processed, Some(&current)).await;

        match process_item(&ctx, item).await {
            Ok(status) => {
                let mut totals = report.lock().await;
                totals.processed += 1;
                match status {
                    WorkItemStatus::Success => totals.succeeded += 1,
                    WorkItemStatus::Failed => totals.failed += 1,
                    WorkItemStatus::Skipped => totals.skipped += 1,
                    WorkItemStatus::Filtered => totals.filtered += 1,
                    WorkItemStatus::Pending => totals.retried += 1,
                    WorkItemStatus::Processing => {}
                }
            }
            Err(e) => {
                // Persisting the outcome failed; the stale-claim mechanism
                // will recover the item.
                warn!("{}: persist failed, item will be reclaimed: {}", worker_id, e);
            }
        }
    }

    write_heartbeat(&ctx, &worker_id, started, session_processed, None).await;
    info!("{} drained after {} items", worker_id, session_processed);
}

/// Best-effort worker status for operators; never fails the loop.
async fn write_heartbeat(
    ctx: &StageContext,
    worker_id: &str,
    started: chrono::DateTime<Utc>,
    session_processed: u64,
    current_task: Option<&str>,
) {
    let doc = json!({
        "id": worker_id,
        "started_at": rfc3339_utc(started),
        "last_heartbeat": rfc3339_utc(Utc::now()),
        "session_processed": session_processed,
        "current_task": current_task,
        "version": env!("CARGO_PKG_VERSION"),
    });
    if let Err(e) = ctx
        .store
        .put(collections::WORKER_STATUS, worker_id, &doc)
        .await
    {
        debug!("heartbeat write failed for {}: {}", worker_id, e);
    }
}
