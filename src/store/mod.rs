//! Document store abstraction.
//!
//! The engine persists everything as JSON documents in named collections
//! and coordinates workers exclusively through the store's conditional
//! update. Two backends: SQLite (production) and in-memory (tests).

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Collection names used by the engine.
pub mod collections {
    pub const WORK_QUEUE: &str = "work-queue";
    pub const COMPANIES: &str = "companies";
    pub const JOB_SOURCES: &str = "job-sources";
    pub const JOB_MATCHES: &str = "job-matches";
    pub const SCRAPE_EVENTS: &str = "scrape-events";
    pub const WORKER_STATUS: &str = "worker-status";
}

/// Comparison operator for a where clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    In,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A single field condition. `field` is a dotted path into the document
/// (e.g. `health.health_score`).
#[derive(Debug, Clone)]
pub struct Where {
    pub field: String,
    pub op: FieldOp,
    pub value: Value,
}

impl Where {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::Eq,
            value: value.into(),
        }
    }

    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::In,
            value: Value::Array(values),
        }
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::Lt,
            value: value.into(),
        }
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FieldOp::Gte,
            value: value.into(),
        }
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Key-value document store with batch reads and conditional updates.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn put(&self, collection: &str, id: &str, doc: &Value) -> Result<()>;

    /// Merge `patch` (top-level keys) into the document iff it exists and
    /// all `conditions` hold at the time of the write. Returns whether the
    /// patch was applied. This is the claim primitive: contention shows up
    /// as `Ok(false)`.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: &Value,
        conditions: &[Where],
    ) -> Result<bool>;

    async fn query(
        &self,
        collection: &str,
        wheres: &[Where],
        order_by: Option<(&str, Order)>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>>;

    /// Fetch many documents; position i corresponds to ids[i].
    async fn batch_get(&self, collection: &str, ids: &[String]) -> Result<Vec<Option<Value>>>;

    /// Stream matching documents through a channel. The default buffers a
    /// full query; backends with native cursors can do better.
    async fn stream(
        &self,
        collection: &str,
        wheres: &[Where],
    ) -> Result<tokio::sync::mpsc::Receiver<Value>> {
        let docs = self.query(collection, wheres, None, None).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(docs.len().max(1));
        for doc in docs {
            if tx.send(doc).await.is_err() {
                break;
            }
        }
        Ok(rx)
    }
}

/// Timestamps written into documents by hand (patches, cutoffs) use the
/// same RFC 3339 "Z" rendering chrono's serde emits, so lexicographic
/// comparison across both stays consistent.
pub fn rfc3339_utc(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Look up a dotted path in a document.
pub(crate) fn field_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Ordering between two JSON scalars of the same kind. Strings compare
/// lexicographically (RFC 3339 timestamps order correctly this way).
pub(crate) fn cmp_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Evaluate all clauses against a document. A missing field fails every
/// clause except an explicit equality with null.
pub(crate) fn matches_clauses(doc: &Value, wheres: &[Where]) -> bool {
    wheres.iter().all(|w| {
        let field = field_path(doc, &w.field);
        match w.op {
            FieldOp::Eq => match field {
                Some(v) => v == &w.value,
                None => w.value.is_null(),
            },
            FieldOp::In => match (field, w.value.as_array()) {
                (Some(v), Some(candidates)) => candidates.contains(v),
                _ => false,
            },
            FieldOp::Lt | FieldOp::Lte | FieldOp::Gt | FieldOp::Gte => {
                let Some(v) = field else { return false };
                let Some(ord) = cmp_values(v, &w.value) else {
                    return false;
                };
                match w.op {
                    FieldOp::Lt => ord == std::cmp::Ordering::Less,
                    FieldOp::Lte => ord != std::cmp::Ordering::Greater,
                    FieldOp::Gt => ord == std::cmp::Ordering::Greater,
                    FieldOp::Gte => ord != std::cmp::Ordering::Less,
                    _ => unreachable!(),
                }
            }
        }
    })
}

/// Shallow-merge patch keys into a document object.
pub(crate) fn merge_patch(doc: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(source)) = (doc, patch) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
}

/// Sort documents in place by a dotted field path.
pub(crate) fn sort_docs(docs: &mut [Value], field: &str, order: Order) {
    docs.sort_by(|a, b| {
        let av = field_path(a, field);
        let bv = field_path(b, field);
        let ord = match (av, bv) {
            (Some(x), Some(y)) => cmp_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => std::cmp::Ordering::Equal,
        };
        match order {
            Order::Asc => ord,
            Order::Desc => ord.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_path_nested() {
        let doc = json!({"health": {"health_score": 0.8}, "id": "s1"});
        assert_eq!(field_path(&doc, "id"), Some(&json!("s1")));
        assert_eq!(field_path(&doc, "health.health_score"), Some(&json!(0.8)));
        assert_eq!(field_path(&doc, "health.missing"), None);
    }

    #[test]
    fn test_matches_eq_and_in() {
        let doc = json!({"status": "pending", "type": "job"});
        assert!(matches_clauses(&doc, &[Where::eq("status", "pending")]));
        assert!(!matches_clauses(&doc, &[Where::eq("status", "success")]));
        assert!(matches_clauses(
            &doc,
            &[Where::is_in(
                "status",
                vec![json!("pending"), json!("processing")]
            )]
        ));
        assert!(matches_clauses(
            &doc,
            &[Where::eq("status", "pending"), Where::eq("type", "job")]
        ));
    }

    #[test]
    fn test_matches_range_on_strings() {
        let doc = json!({"created_at": "2026-07-01T00:00:00Z"});
        assert!(matches_clauses(
            &doc,
            &[Where::gte("created_at", "2026-06-01T00:00:00Z")]
        ));
        assert!(matches_clauses(
            &doc,
            &[Where::lt("created_at", "2026-08-01T00:00:00Z")]
        ));
        assert!(!matches_clauses(
            &doc,
            &[Where::lt("created_at", "2026-07-01T00:00:00Z")]
        ));
    }

    #[test]
    fn test_missing_field_matches_null_eq_only() {
        let doc = json!({"status": "pending"});
        assert!(matches_clauses(
            &doc,
            &[Where::eq("claimed_at", Value::Null)]
        ));
        assert!(!matches_clauses(&doc, &[Where::lt("claimed_at", "x")]));
    }

    #[test]
    fn test_merge_patch_shallow() {
        let mut doc = json!({"a": 1, "b": {"c": 2}});
        merge_patch(&mut doc, &json!({"a": 9, "d": true}));
        assert_eq!(doc, json!({"a": 9, "b": {"c": 2}, "d": true}));
    }

    #[test]
    fn test_sort_docs_nulls_first_asc() {
        let mut docs = vec![
            json!({"id": "b", "at": "2026-02-01"}),
            json!({"id": "c"}),
            json!({"id": "a", "at": "2026-01-01"}),
        ];
        sort_docs(&mut docs, "at", Order::Asc);
        let ids: Vec<_> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }
}
