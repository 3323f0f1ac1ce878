//! Command implementations.

use std::sync::Arc;

use anyhow::{bail, Context};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use super::{Cli, Commands, SourceAction};
use crate::ai::HttpAiProvider;
use crate::config::{Config, ConfigHandle};
use crate::models::{Source, WorkItemType};
use crate::pipeline::StageContext;
use crate::scheduler;
use crate::scrape::HttpFetcher;
use crate::store::{collections, Order, SqliteStore, Store, Where};
use crate::worker::{run_workers, WorkerOptions};

/// Build the shared context from config and CLI overrides.
async fn build_context(cli: &Cli) -> anyhow::Result<StageContext> {
    let mut config = Config::load(cli.config.as_deref())
        .await
        .context("loading configuration")?;
    if let Some(ref data) = cli.data {
        config.data_dir = Some(data.display().to_string());
    }

    let data_dir = config.resolved_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let store = SqliteStore::new(&config.database_path())
        .map_err(|e| anyhow::anyhow!("opening database: {}", e))?;
    let fetcher = HttpFetcher::new(&config.user_agent, config.request_timeout_secs);
    let ai = HttpAiProvider::new(config.ai.clone());

    Ok(StageContext::new(
        Arc::new(store),
        Arc::new(ai),
        Arc::new(fetcher),
        ConfigHandle::new(config),
    ))
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            workers,
            drain,
            scheduler: with_scheduler,
        } => {
            let ctx = build_context(&cli).await?;
            run_cmd(ctx, workers, drain, with_scheduler).await
        }
        Commands::Submit {
            ref item_type,
            ref url,
            ref name,
        } => {
            let ctx = build_context(&cli).await?;
            submit_cmd(ctx, item_type, url, name.as_deref()).await
        }
        Commands::Sources { ref action } => {
            let ctx = build_context(&cli).await?;
            sources_cmd(ctx, action).await
        }
        Commands::Status => {
            let ctx = build_context(&cli).await?;
            status_cmd(ctx).await
        }
    }
}

async fn run_cmd(
    ctx: StageContext,
    workers: usize,
    drain: bool,
    with_scheduler: bool,
) -> anyhow::Result<()> {
    if with_scheduler {
        let scheduler_ctx = ctx.clone();
        tokio::spawn(async move {
            scheduler::run_scheduler(scheduler_ctx).await;
        });
    }

    let pb = if drain {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("static progress template"),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(120));
        pb.set_message("draining queue...");
        Some(pb)
    } else {
        None
    };

    let report = run_workers(
        ctx,
        WorkerOptions {
            worker_count: workers,
            drain,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("worker run failed: {}", e))?;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    println!(
        "{} processed: {} ok, {} filtered, {} skipped, {} failed, {} retries",
        style(report.processed).bold(),
        style(report.succeeded).green(),
        report.filtered,
        report.skipped,
        style(report.failed).red(),
        report.retried,
    );

    if drain && !report.is_clean() {
        bail!("{} items ended FAILED", report.failed);
    }
    Ok(())
}

async fn submit_cmd(
    ctx: StageContext,
    item_type: &str,
    url: &str,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let Some(item_type) = WorkItemType::from_str(item_type) else {
        bail!("unknown item type: {} (expected job, company, or source_discovery)", item_type);
    };

    let payload = match name {
        Some(n) => json!({"company_name": n}),
        None => json!(null),
    };
    let item = ctx
        .queue
        .submit_root(item_type, url, payload)
        .await
        .map_err(|e| anyhow::anyhow!("submit failed: {}", e))?;

    println!(
        "submitted {} {} as {} (tracking {})",
        item.item_type.as_str(),
        item.url,
        style(&item.id).bold(),
        item.tracking_id
    );
    Ok(())
}

async fn sources_cmd(ctx: StageContext, action: &SourceAction) -> anyhow::Result<()> {
    match action {
        SourceAction::List => {
            let docs = ctx
                .store
                .query(
                    collections::JOB_SOURCES,
                    &[],
                    Some(("health.health_score", Order::Desc)),
                    None,
                )
                .await
                .map_err(|e| anyhow::anyhow!("listing sources: {}", e))?;
            if docs.is_empty() {
                println!("no sources");
                return Ok(());
            }
            for doc in docs {
                let Ok(source) = serde_json::from_value::<Source>(doc) else {
                    continue;
                };
                let enabled = if source.enabled {
                    style("enabled").green()
                } else {
                    style("disabled").dim()
                };
                println!(
                    "{}  {:<10} {:>5.2}  {}  {}",
                    style(&source.id).bold(),
                    source.source_type.as_str(),
                    source.health.health_score,
                    enabled,
                    source.url
                );
            }
        }
        SourceAction::Enable { id } => set_source_enabled(&ctx, id, true).await?,
        SourceAction::Disable { id } => set_source_enabled(&ctx, id, false).await?,
        SourceAction::Add { url } => {
            let item = ctx
                .queue
                .submit_root(WorkItemType::SourceDiscovery, url, json!(null))
                .await
                .map_err(|e| anyhow::anyhow!("submit failed: {}", e))?;
            println!("submitted source discovery {} for {}", item.id, item.url);
        }
    }
    Ok(())
}

async fn set_source_enabled(ctx: &StageContext, id: &str, enabled: bool) -> anyhow::Result<()> {
    // Re-enabling also clears the failure streak so the source re-enters
    // rotation immediately; that needs the full health block, so enable is
    // a read-modify-write.
    if enabled {
        let Some(mut doc) = ctx
            .store
            .get(collections::JOB_SOURCES, id)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?
        else {
            bail!("no such source: {}", id);
        };
        doc["enabled"] = json!(true);
        doc["health"]["consecutive_failures"] = json!(0);
        ctx.store
            .put(collections::JOB_SOURCES, id, &doc)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
    } else {
        let applied = ctx
            .store
            .update(collections::JOB_SOURCES, id, &json!({"enabled": false}), &[])
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        if !applied {
            bail!("no such source: {}", id);
        }
    }
    println!("{} {}", if enabled { "enabled" } else { "disabled" }, id);
    Ok(())
}

async fn status_cmd(ctx: StageContext) -> anyhow::Result<()> {
    let counts = ctx
        .queue
        .counts_by_status()
        .await
        .map_err(|e| anyhow::anyhow!("reading queue: {}", e))?;

    println!("{}", style("queue").bold());
    for status in ["pending", "processing", "success", "filtered", "skipped", "failed"] {
        let count = counts.get(status).copied().unwrap_or(0);
        println!("  {:<12} {}", status, count);
    }

    let oldest = ctx
        .store
        .query(
            collections::WORK_QUEUE,
            &[Where::eq("status", "pending")],
            Some(("created_at", Order::Asc)),
            Some(1),
        )
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    if let Some(doc) = oldest.first() {
        if let Some(created) = doc.get("created_at").and_then(|c| c.as_str()) {
            println!("  oldest pending: {}", created);
        }
    }

    // Spawn-depth distribution, for watching lineages grow.
    let mut depths: std::collections::BTreeMap<u64, usize> = std::collections::BTreeMap::new();
    let mut rx = ctx
        .store
        .stream(collections::WORK_QUEUE, &[])
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    while let Some(doc) = rx.recv().await {
        let depth = doc.get("spawn_depth").and_then(|d| d.as_u64()).unwrap_or(0);
        *depths.entry(depth).or_insert(0) += 1;
    }
    if !depths.is_empty() {
        println!("{}", style("spawn depth").bold());
        for (depth, count) in depths {
            println!("  {:<12} {}", depth, count);
        }
    }

    let workers = ctx
        .store
        .query(
            collections::WORKER_STATUS,
            &[],
            Some(("last_heartbeat", Order::Desc)),
            None,
        )
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    if !workers.is_empty() {
        println!("{}", style("workers").bold());
        for worker in workers {
            println!(
                "  {:<30} processed {}  heartbeat {}",
                worker.get("id").and_then(|i| i.as_str()).unwrap_or("?"),
                worker
                    .get("session_processed")
                    .and_then(|p| p.as_u64())
                    .unwrap_or(0),
                worker
                    .get("last_heartbeat")
                    .and_then(|h| h.as_str())
                    .unwrap_or("?"),
            );
        }
    }
    Ok(())
}
