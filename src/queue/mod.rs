//! Queue manager: work item CRUD, atomic claiming, and the safe-spawn gate.
//!
//! All worker coordination happens through the store's conditional update;
//! the manager itself holds no mutable state. Spawning is gated by four
//! checks (depth, cycle, pending duplicate, success duplicate) so a lineage
//! can never loop, recurse without bound, or duplicate effort.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::debug;

use crate::dedup::normalize_url;
use crate::error::{EngineError, Result};
use crate::models::{WorkItem, WorkItemStatus, WorkItemType};
use crate::store::{collections, rfc3339_utc, Order, Store, Where};

/// How many candidates a claim attempt races over before giving up.
const CLAIM_CANDIDATES: usize = 10;

/// Why a spawn was refused. Refusals are expected engine behavior, not
/// failures: the parent stage logs and continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnRefusal {
    DepthExceeded,
    Cycle,
    AlreadyQueued,
    AlreadyDone,
}

impl SpawnRefusal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepthExceeded => "DEPTH_EXCEEDED",
            Self::Cycle => "CYCLE",
            Self::AlreadyQueued => "ALREADY_QUEUED",
            Self::AlreadyDone => "ALREADY_DONE",
        }
    }
}

/// Outcome of a spawn attempt.
pub type SpawnResult = std::result::Result<WorkItem, SpawnRefusal>;

pub struct QueueManager {
    store: Arc<dyn Store>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn item_from_doc(doc: Value) -> Result<WorkItem> {
        serde_json::from_value(doc)
            .map_err(|e| EngineError::Store(format!("corrupt work item: {}", e)))
    }

    /// Submit a root item: external input of `{type, url}` plus optional
    /// payload. The URL is normalized here; lineage is engine-generated.
    pub async fn submit_root(
        &self,
        item_type: WorkItemType,
        url: &str,
        payload: Value,
    ) -> Result<WorkItem> {
        let normalized = normalize_url(url)?;
        let mut item = WorkItem::new_root(item_type, normalized);
        item.payload = payload;
        self.save(&item).await?;
        Ok(item)
    }

    pub async fn get(&self, id: &str) -> Result<Option<WorkItem>> {
        match self.store.get(collections::WORK_QUEUE, id).await? {
            Some(doc) => Ok(Some(Self::item_from_doc(doc)?)),
            None => Ok(None),
        }
    }

    /// Persist the full item document.
    pub async fn save(&self, item: &WorkItem) -> Result<()> {
        let doc = serde_json::to_value(item)
            .map_err(|e| EngineError::Store(format!("serialize work item: {}", e)))?;
        self.store
            .put(collections::WORK_QUEUE, &item.id, &doc)
            .await
    }

    /// Claim one item: first a PENDING item (oldest first), then a
    /// PROCESSING item whose claim has gone stale. The claim itself is a
    /// conditional update, so concurrent workers race safely; losing the
    /// race just moves on to the next candidate.
    pub async fn claim_next(&self, stale_claim_seconds: u64) -> Result<Option<WorkItem>> {
        // Fresh pending work.
        let pending = self
            .store
            .query(
                collections::WORK_QUEUE,
                &[Where::eq("status", WorkItemStatus::Pending.as_str())],
                Some(("created_at", Order::Asc)),
                Some(CLAIM_CANDIDATES),
            )
            .await?;

        let now = Utc::now();
        for doc in pending {
            let item = Self::item_from_doc(doc)?;
            let patch = json!({
                "status": WorkItemStatus::Processing.as_str(),
                "claimed_at": rfc3339_utc(now),
                "updated_at": rfc3339_utc(now),
            });
            let won = self
                .store
                .update(
                    collections::WORK_QUEUE,
                    &item.id,
                    &patch,
                    &[Where::eq("status", WorkItemStatus::Pending.as_str())],
                )
                .await?;
            if won {
                let mut claimed = item;
                claimed.status = WorkItemStatus::Processing;
                claimed.claimed_at = Some(now);
                return Ok(Some(claimed));
            }
        }

        // Stale claims: a worker died mid-stage. Reclaim by CAS on the
        // observed claimed_at so two reclaimers cannot both win.
        let cutoff = rfc3339_utc(now - Duration::seconds(stale_claim_seconds as i64));
        let stale = self
            .store
            .query(
                collections::WORK_QUEUE,
                &[
                    Where::eq("status", WorkItemStatus::Processing.as_str()),
                    Where::lt("claimed_at", cutoff.clone()),
                ],
                Some(("claimed_at", Order::Asc)),
                Some(CLAIM_CANDIDATES),
            )
            .await?;

        for doc in stale {
            let observed_claim = doc
                .get("claimed_at")
                .cloned()
                .unwrap_or(Value::Null);
            let item = Self::item_from_doc(doc)?;
            let patch = json!({
                "claimed_at": rfc3339_utc(now),
                "updated_at": rfc3339_utc(now),
            });
            let won = self
                .store
                .update(
                    collections::WORK_QUEUE,
                    &item.id,
                    &patch,
                    &[
                        Where::eq("status", WorkItemStatus::Processing.as_str()),
                        Where::eq("claimed_at", observed_claim),
                    ],
                )
                .await?;
            if won {
                debug!("reclaimed stale item {} ({})", item.id, item.url);
                let mut claimed = item;
                claimed.claimed_at = Some(now);
                return Ok(Some(claimed));
            }
        }

        Ok(None)
    }

    /// The safe-spawn gate. Returns the normalized target URL on approval.
    pub async fn can_spawn(
        &self,
        parent: &WorkItem,
        target_url: &str,
        target_type: WorkItemType,
    ) -> Result<std::result::Result<String, SpawnRefusal>> {
        // Depth check.
        if parent.spawn_depth + 1 > parent.max_spawn_depth {
            return Ok(Err(SpawnRefusal::DepthExceeded));
        }

        let normalized = normalize_url(target_url)?;

        // Circular check: the target must not repeat any ancestor's
        // (url, type), the parent included.
        if parent.item_type == target_type && parent.url == normalized {
            return Ok(Err(SpawnRefusal::Cycle));
        }
        if !parent.ancestry_chain.is_empty() {
            let ancestors = self
                .store
                .batch_get(collections::WORK_QUEUE, &parent.ancestry_chain)
                .await?;
            for doc in ancestors.into_iter().flatten() {
                let ancestor = Self::item_from_doc(doc)?;
                if ancestor.item_type == target_type && ancestor.url == normalized {
                    return Ok(Err(SpawnRefusal::Cycle));
                }
            }
        }

        // Pending-duplicate check within the lineage.
        let live = self
            .store
            .query(
                collections::WORK_QUEUE,
                &[
                    Where::eq("tracking_id", parent.tracking_id.as_str()),
                    Where::eq("url", normalized.as_str()),
                    Where::eq("type", target_type.as_str()),
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
            return Ok(Err(SpawnRefusal::AlreadyQueued));
        }

        // Success-duplicate check within the lineage.
        let done = self
            .store
            .query(
                collections::WORK_QUEUE,
                &[
                    Where::eq("tracking_id", parent.tracking_id.as_str()),
                    Where::eq("url", normalized.as_str()),
                    Where::eq("type", target_type.as_str()),
                    Where::eq("status", WorkItemStatus::Success.as_str()),
                ],
                None,
                Some(1),
            )
            .await?;
        if !done.is_empty() {
            return Ok(Err(SpawnRefusal::AlreadyDone));
        }

        Ok(Ok(normalized))
    }

    /// Spawn a child if the gate approves. The child inherits the parent's
    /// tracking id, extends its ancestry chain, and deepens by one.
    pub async fn spawn(
        &self,
        parent: &WorkItem,
        target_type: WorkItemType,
        target_url: &str,
        payload: Value,
    ) -> Result<SpawnResult> {
        let normalized = match self.can_spawn(parent, target_url, target_type).await? {
            Ok(url) => url,
            Err(refusal) => {
                debug!(
                    "spawn of {} {} from {} refused: {}",
                    target_type.as_str(),
                    target_url,
                    parent.id,
                    refusal.as_str()
                );
                return Ok(Err(refusal));
            }
        };

        let mut child = WorkItem::new_child(parent, target_type, normalized);
        child.payload = payload;
        self.save(&child).await?;
        Ok(Ok(child))
    }

    /// Queue counts by status, for operators.
    pub async fn counts_by_status(&self) -> Result<HashMap<String, usize>> {
        let mut counts = HashMap::new();
        for status in [
            WorkItemStatus::Pending,
            WorkItemStatus::Processing,
            WorkItemStatus::Success,
            WorkItemStatus::Failed,
            WorkItemStatus::Skipped,
            WorkItemStatus::Filtered,
        ] {
            let docs = self
                .store
                .query(
                    collections::WORK_QUEUE,
                    &[Where::eq("status", status.as_str())],
                    None,
                    None,
                )
                .await?;
            counts.insert(status.as_str().to_string(), docs.len());
        }
        Ok(counts)
    }

    /// Whether any claimable or in-flight work remains.
    pub async fn has_open_work(&self) -> Result<bool> {
        let open = self
            .store
            .query(
                collections::WORK_QUEUE,
                &[Where::is_in(
                    "status",
                    vec![
                        json!(WorkItemStatus::Pending.as_str()),
                        json!(WorkItemStatus::Processing.as_str()),
                    ],
                )],
                None,
                Some(1),
            )
            .await?;
        Ok(!open.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> QueueManager {
        QueueManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_submit_root_normalizes_and_assigns_lineage() {
        let queue = manager();
        let item = queue
            .submit_root(
                WorkItemType::Job,
                "HTTPS://Example.com/Jobs/1/?utm_source=x",
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(item.url, "https://example.com/Jobs/1");
        assert_eq!(item.spawn_depth, 0);
        assert!(item.ancestry_chain.is_empty());
        assert!(!item.tracking_id.is_empty());

        let fetched = queue.get(&item.id).await.unwrap().unwrap();
        assert_eq!(fetched.url, item.url);
    }

    #[tokio::test]
    async fn test_claim_oldest_pending_once() {
        let queue = manager();
        let a = queue
            .submit_root(WorkItemType::Job, "https://example.com/a", Value::Null)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        queue
            .submit_root(WorkItemType::Job, "https://example.com/b", Value::Null)
            .await
            .unwrap();

        let first = queue.claim_next(900).await.unwrap().unwrap();
        assert_eq!(first.id, a.id);
        assert_eq!(first.status, WorkItemStatus::Processing);

        let second = queue.claim_next(900).await.unwrap().unwrap();
        assert_ne!(second.id, first.id);

        // Nothing left to claim.
        assert!(queue.claim_next(900).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_claim_reclaimed() {
        let queue = manager();
        let item = queue
            .submit_root(WorkItemType::Job, "https://example.com/a", Value::Null)
            .await
            .unwrap();

        let mut claimed = queue.claim_next(900).await.unwrap().unwrap();
        assert_eq!(claimed.id, item.id);

        // Age the claim past the threshold and persist.
        claimed.claimed_at = Some(Utc::now() - Duration::seconds(1000));
        queue.save(&claimed).await.unwrap();

        let reclaimed = queue.claim_next(900).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, item.id);
        assert_eq!(reclaimed.status, WorkItemStatus::Processing);

        // A fresh claim is not stale.
        assert!(queue.claim_next(900).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_spawn_inherits_lineage() {
        let queue = manager();
        let root = queue
            .submit_root(WorkItemType::Job, "https://example.com/j/1", Value::Null)
            .await
            .unwrap();

        let child = queue
            .spawn(
                &root,
                WorkItemType::Company,
                "https://acme.example.com",
                json!({"company_name": "Acme"}),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(child.tracking_id, root.tracking_id);
        assert_eq!(child.ancestry_chain, vec![root.id.clone()]);
        assert_eq!(child.spawn_depth, 1);
        assert!(child.validate_lineage().is_ok());
    }

    #[tokio::test]
    async fn test_spawn_depth_refusal() {
        let queue = manager();
        let mut current = queue
            .submit_root(WorkItemType::Job, "https://example.com/depth/0", Value::Null)
            .await
            .unwrap();

        // Ten spawns succeed (depths 1..=10), the eleventh is refused.
        for depth in 1..=10u32 {
            let spawned = queue
                .spawn(
                    &current,
                    WorkItemType::Job,
                    &format!("https://example.com/depth/{}", depth),
                    Value::Null,
                )
                .await
                .unwrap();
            current = spawned.unwrap();
            assert_eq!(current.spawn_depth, depth);
        }

        let refused = queue
            .spawn(
                &current,
                WorkItemType::Job,
                "https://example.com/depth/11",
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(refused.unwrap_err(), SpawnRefusal::DepthExceeded);
    }

    #[tokio::test]
    async fn test_spawn_cycle_refusal() {
        let queue = manager();
        let root = queue
            .submit_root(WorkItemType::Job, "https://example.com/j/1", Value::Null)
            .await
            .unwrap();

        let discovery = queue
            .spawn(
                &root,
                WorkItemType::SourceDiscovery,
                "https://example.com/careers",
                Value::Null,
            )
            .await
            .unwrap()
            .unwrap();

        // Spawning a JOB back at the root's URL closes a cycle.
        let refused = queue
            .spawn(
                &discovery,
                WorkItemType::Job,
                "https://example.com/j/1",
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(refused.unwrap_err(), SpawnRefusal::Cycle);

        // Same URL but a different type is not a cycle.
        let allowed = queue
            .spawn(
                &discovery,
                WorkItemType::Company,
                "https://example.com/j/1",
                Value::Null,
            )
            .await
            .unwrap();
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_duplicate_refusals() {
        let queue = manager();
        let root = queue
            .submit_root(WorkItemType::Job, "https://example.com/j/1", Value::Null)
            .await
            .unwrap();

        let first = queue
            .spawn(
                &root,
                WorkItemType::Company,
                "https://acme.example.com",
                Value::Null,
            )
            .await
            .unwrap()
            .unwrap();

        // Still pending: duplicate refused as ALREADY_QUEUED.
        let again = queue
            .spawn(
                &root,
                WorkItemType::Company,
                "https://acme.example.com/",
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(again.unwrap_err(), SpawnRefusal::AlreadyQueued);

        // Completed successfully: refused as ALREADY_DONE.
        let mut done = first;
        done.status = WorkItemStatus::Success;
        queue.save(&done).await.unwrap();
        let after_done = queue
            .spawn(
                &root,
                WorkItemType::Company,
                "https://acme.example.com",
                Value::Null,
            )
            .await
            .unwrap();
        assert_eq!(after_done.unwrap_err(), SpawnRefusal::AlreadyDone);

        // Failed items do not block a respawn.
        let mut failed = queue.get(&done.id).await.unwrap().unwrap();
        failed.status = WorkItemStatus::Failed;
        queue.save(&failed).await.unwrap();
        let retry = queue
            .spawn(
                &root,
                WorkItemType::Company,
                "https://acme.example.com",
                Value::Null,
            )
            .await
            .unwrap();
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn test_dedup_scoped_to_lineage() {
        let queue = manager();
        let root_a = queue
            .submit_root(WorkItemType::Job, "https://example.com/a", Value::Null)
            .await
            .unwrap();
        let root_b = queue
            .submit_root(WorkItemType::Job, "https://example.com/b", Value::Null)
            .await
            .unwrap();

        // The same company URL may be spawned from two different lineages.
        let from_a = queue
            .spawn(
                &root_a,
                WorkItemType::Company,
                "https://acme.example.com",
                Value::Null,
            )
            .await
            .unwrap();
        let from_b = queue
            .spawn(
                &root_b,
                WorkItemType::Company,
                "https://acme.example.com",
                Value::Null,
            )
            .await
            .unwrap();
        assert!(from_a.is_ok());
        assert!(from_b.is_ok());
    }

    #[tokio::test]
    async fn test_counts_and_open_work() {
        let queue = manager();
        assert!(!queue.has_open_work().await.unwrap());
        queue
            .submit_root(WorkItemType::Job, "https://example.com/a", Value::Null)
            .await
            .unwrap();
        assert!(queue.has_open_work().await.unwrap());
        let counts = queue.counts_by_status().await.unwrap();
        assert_eq!(counts["pending"], 1);
        assert_eq!(counts["success"], 0);
    }
}
