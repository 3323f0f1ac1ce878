//! In-memory store backend for tests and offline runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{matches_clauses, merge_patch, sort_docs, Order, Store, Where};
use crate::error::Result;

/// HashMap-backed store. Conditional updates take the collection write
/// lock, so claim semantics match the SQLite backend.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn put(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc.clone());
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: &Value,
        conditions: &[Where],
    ) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(doc) = docs.get_mut(id) else {
            return Ok(false);
        };
        if !matches_clauses(doc, conditions) {
            return Ok(false);
        }
        merge_patch(doc, patch);
        Ok(true)
    }

    async fn query(
        &self,
        collection: &str,
        wheres: &[Where],
        order_by: Option<(&str, Order)>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let mut results: Vec<Value> = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| matches_clauses(doc, wheres))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some((field, order)) = order_by {
            sort_docs(&mut results, field, order);
        }
        if let Some(n) = limit {
            results.truncate(n);
        }
        Ok(results)
    }

    async fn batch_get(&self, collection: &str, ids: &[String]) -> Result<Vec<Option<Value>>> {
        let collections = self.collections.read().await;
        let docs = collections.get(collection);
        Ok(ids
            .iter()
            .map(|id| docs.and_then(|d| d.get(id)).cloned())
            .collect())
    }
}
