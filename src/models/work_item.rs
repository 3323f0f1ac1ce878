//! Work item model: the unit of queued pipeline work.
//!
//! A work item carries its accumulated pipeline state (a map of stage-output
//! name to JSON; presence of a key means that stage completed) and its
//! lineage: every item spawned from a root submission shares the root's
//! tracking id, records its ancestor chain, and counts its spawn depth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default retry budget for a work item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default cap on spawn chain depth.
pub const DEFAULT_MAX_SPAWN_DEPTH: u32 = 10;

/// Kind of pipeline a work item flows through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    Job,
    Company,
    SourceDiscovery,
    Scrape,
}

impl WorkItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Company => "company",
            Self::SourceDiscovery => "source_discovery",
            Self::Scrape => "scrape",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "job" => Some(Self::Job),
            "company" => Some(Self::Company),
            "source_discovery" => Some(Self::SourceDiscovery),
            "scrape" => Some(Self::Scrape),
            _ => None,
        }
    }
}

/// Processing status of a work item.
///
/// Transitions are monotone: `Pending -> Processing -> terminal`, where
/// terminal is one of `Success | Failed | Skipped | Filtered`. The only
/// path back is an explicit retry, which returns the item to `Pending`
/// and increments its retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Skipped,
    Filtered,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Filtered => "filtered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            "filtered" => Some(Self::Filtered),
            _ => None,
        }
    }

    /// Whether this status is final. `Skipped` and `Filtered` are
    /// successful terminal states, not errors.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::Filtered
        )
    }
}

/// A single queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier, assigned at creation.
    pub id: String,
    /// Which pipeline this item flows through.
    #[serde(rename = "type")]
    pub item_type: WorkItemType,
    /// Canonical (normalized) input URL; dedup key within type.
    pub url: String,
    pub status: WorkItemStatus,
    /// Stage-output name -> JSON. Grows monotonically; a key is never
    /// removed within a successful run.
    #[serde(default)]
    pub pipeline_state: serde_json::Map<String, Value>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// One-line human-readable outcome.
    #[serde(default)]
    pub result_message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Shared across a whole spawn lineage; assigned at the root.
    pub tracking_id: String,
    /// Ancestor item ids, root first, excluding self.
    #[serde(default)]
    pub ancestry_chain: Vec<String>,
    #[serde(default)]
    pub spawn_depth: u32,
    pub max_spawn_depth: u32,
    /// For `Scrape` items: id of the source to run.
    #[serde(default)]
    pub source_ref: Option<String>,
    /// Submission extras (company name hints, websites, etc).
    #[serde(default)]
    pub payload: Value,
}

impl WorkItem {
    /// Create a root item: fresh tracking id, empty ancestry, depth zero.
    pub fn new_root(item_type: WorkItemType, url: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            item_type,
            url,
            status: WorkItemStatus::Pending,
            pipeline_state: serde_json::Map::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: now,
            updated_at: now,
            claimed_at: None,
            completed_at: None,
            result_message: None,
            error: None,
            tracking_id: Uuid::new_v4().to_string(),
            ancestry_chain: Vec::new(),
            spawn_depth: 0,
            max_spawn_depth: DEFAULT_MAX_SPAWN_DEPTH,
            source_ref: None,
            payload: Value::Null,
        }
    }

    /// Create a child inheriting the parent's lineage.
    pub fn new_child(parent: &WorkItem, item_type: WorkItemType, url: String) -> Self {
        let mut chain = parent.ancestry_chain.clone();
        chain.push(parent.id.clone());
        let mut item = Self::new_root(item_type, url);
        item.tracking_id = parent.tracking_id.clone();
        item.ancestry_chain = chain;
        item.spawn_depth = parent.spawn_depth + 1;
        item.max_spawn_depth = parent.max_spawn_depth;
        item
    }

    /// Whether a stage output is already present.
    pub fn has_stage(&self, key: &str) -> bool {
        self.pipeline_state.contains_key(key)
    }

    /// Record a stage output. Outputs are additive; overwriting an existing
    /// key keeps the state monotone in key set.
    pub fn record_stage(&mut self, key: &str, value: Value) {
        self.pipeline_state.insert(key.to_string(), value);
        self.updated_at = Utc::now();
    }

    /// Read a stage output back as a typed value.
    pub fn stage<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.pipeline_state
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Check the lineage invariant: spawn depth equals ancestry length.
    pub fn validate_lineage(&self) -> Result<(), String> {
        if self.spawn_depth as usize != self.ancestry_chain.len() {
            return Err(format!(
                "spawn_depth {} != ancestry_chain length {}",
                self.spawn_depth,
                self.ancestry_chain.len()
            ));
        }
        if self.spawn_depth > self.max_spawn_depth {
            return Err(format!(
                "spawn_depth {} exceeds max_spawn_depth {}",
                self.spawn_depth, self.max_spawn_depth
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_roundtrip() {
        for t in [
            WorkItemType::Job,
            WorkItemType::Company,
            WorkItemType::SourceDiscovery,
            WorkItemType::Scrape,
        ] {
            assert_eq!(WorkItemType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(WorkItemType::from_str("unknown"), None);
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            WorkItemStatus::Pending,
            WorkItemStatus::Processing,
            WorkItemStatus::Success,
            WorkItemStatus::Failed,
            WorkItemStatus::Skipped,
            WorkItemStatus::Filtered,
        ] {
            assert_eq!(WorkItemStatus::from_str(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!WorkItemStatus::Pending.is_terminal());
        assert!(!WorkItemStatus::Processing.is_terminal());
        assert!(WorkItemStatus::Success.is_terminal());
        assert!(WorkItemStatus::Failed.is_terminal());
        assert!(WorkItemStatus::Skipped.is_terminal());
        assert!(WorkItemStatus::Filtered.is_terminal());
    }

    #[test]
    fn test_root_lineage() {
        let item = WorkItem::new_root(WorkItemType::Job, "https://example.com/job".into());
        assert_eq!(item.spawn_depth, 0);
        assert!(item.ancestry_chain.is_empty());
        assert!(item.validate_lineage().is_ok());
    }

    #[test]
    fn test_child_inherits_lineage() {
        let root = WorkItem::new_root(WorkItemType::Job, "https://example.com/job".into());
        let child = WorkItem::new_child(&root, WorkItemType::Company, "https://example.com".into());
        assert_eq!(child.tracking_id, root.tracking_id);
        assert_eq!(child.ancestry_chain, vec![root.id.clone()]);
        assert_eq!(child.spawn_depth, 1);
        assert_eq!(child.max_spawn_depth, root.max_spawn_depth);
        assert!(child.validate_lineage().is_ok());

        let grandchild =
            WorkItem::new_child(&child, WorkItemType::SourceDiscovery, "https://x.com".into());
        assert_eq!(grandchild.spawn_depth, 2);
        assert_eq!(grandchild.ancestry_chain, vec![root.id, child.id]);
    }

    #[test]
    fn test_validate_lineage_mismatch() {
        let mut item = WorkItem::new_root(WorkItemType::Job, "https://example.com/job".into());
        item.spawn_depth = 3;
        assert!(item.validate_lineage().is_err());
    }

    #[test]
    fn test_stage_recording() {
        let mut item = WorkItem::new_root(WorkItemType::Job, "https://example.com/job".into());
        assert!(!item.has_stage("job_data"));
        item.record_stage("job_data", serde_json::json!({"title": "Engineer"}));
        assert!(item.has_stage("job_data"));

        #[derive(serde::Deserialize)]
        struct Partial {
            title: String,
        }
        let partial: Partial = item.stage("job_data").unwrap();
        assert_eq!(partial.title, "Engineer");
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut item = WorkItem::new_root(WorkItemType::Job, "https://example.com/job".into());
        item.record_stage("job_data", serde_json::json!({"title": "Engineer"}));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "job");
        assert_eq!(json["status"], "pending");
        let back: WorkItem = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, item.id);
        assert!(back.has_stage("job_data"));
    }
}
