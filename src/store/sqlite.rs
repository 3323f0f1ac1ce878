//! SQLite store backend.
//!
//! Documents are JSON text rows keyed by (collection, id). Queries use
//! `json_extract` with expression indexes covering the queue's hot paths.
//! Conditional updates run inside an IMMEDIATE transaction so a claim is
//! atomic across workers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;

use super::{matches_clauses, merge_patch, FieldOp, Order, Store, Where};
use crate::error::{EngineError, Result};

/// SQLite-backed document store. Connections are opened per operation;
/// WAL mode makes that cheap and keeps multiple workers write-safe.
#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database and ensure schema + indexes.
    pub fn new(db_path: &Path) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        let conn = store.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                doc TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_queue_status_created
                ON documents(json_extract(doc, '$.status'), json_extract(doc, '$.created_at'))
                WHERE collection = 'work-queue';
            CREATE INDEX IF NOT EXISTS idx_queue_tracking_status
                ON documents(json_extract(doc, '$.tracking_id'), json_extract(doc, '$.status'))
                WHERE collection = 'work-queue';
            CREATE INDEX IF NOT EXISTS idx_queue_url_type_status
                ON documents(json_extract(doc, '$.url'), json_extract(doc, '$.type'), json_extract(doc, '$.status'))
                WHERE collection = 'work-queue';
            CREATE INDEX IF NOT EXISTS idx_queue_depth
                ON documents(json_extract(doc, '$.spawn_depth'))
                WHERE collection = 'work-queue';
        "#,
        )
        .map_err(db_err)?;
        Ok(store)
    }

    /// Open a connection with settings tuned for concurrent workers.
    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).map_err(db_err)?;

        // WAL allows multiple readers alongside one writer; busy_timeout
        // covers short claim contention instead of surfacing SQLITE_BUSY.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 30000;
            PRAGMA temp_store = MEMORY;
        "#,
        )
        .map_err(db_err)?;

        Ok(conn)
    }
}

fn db_err(e: rusqlite::Error) -> EngineError {
    EngineError::Store(e.to_string())
}

fn parse_doc(text: String) -> Result<Value> {
    serde_json::from_str(&text).map_err(|e| EngineError::Store(format!("corrupt document: {}", e)))
}

/// Convert a JSON scalar to a SQL parameter matching what json_extract
/// yields for the same document field.
fn to_sql_value(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Dotted field paths come from engine code only; reject anything that
/// could escape the json path literal.
fn json_path(field: &str) -> Result<String> {
    if field
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        Ok(format!("$.{}", field))
    } else {
        Err(EngineError::Store(format!("invalid field path: {}", field)))
    }
}

/// Render where clauses as SQL, appending bind parameters.
fn build_where_sql(wheres: &[Where], params: &mut Vec<SqlValue>) -> Result<String> {
    let mut sql = String::new();
    for w in wheres {
        let path = json_path(&w.field)?;
        let extract = format!("json_extract(doc, '{}')", path);
        sql.push_str(" AND ");
        match w.op {
            FieldOp::Eq => {
                if w.value.is_null() {
                    sql.push_str(&format!("{} IS NULL", extract));
                } else {
                    sql.push_str(&format!("{} = ?", extract));
                    params.push(to_sql_value(&w.value));
                }
            }
            FieldOp::In => {
                let candidates = w.value.as_array().cloned().unwrap_or_default();
                if candidates.is_empty() {
                    sql.push_str("0");
                    continue;
                }
                let placeholders = vec!["?"; candidates.len()].join(", ");
                sql.push_str(&format!("{} IN ({})", extract, placeholders));
                for c in &candidates {
                    params.push(to_sql_value(c));
                }
            }
            FieldOp::Lt | FieldOp::Lte | FieldOp::Gt | FieldOp::Gte => {
                let op = match w.op {
                    FieldOp::Lt => "<",
                    FieldOp::Lte => "<=",
                    FieldOp::Gt => ">",
                    FieldOp::Gte => ">=",
                    _ => unreachable!(),
                };
                sql.push_str(&format!("{} {} ?", extract, op));
                params.push(to_sql_value(&w.value));
            }
        }
    }
    Ok(sql)
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let store = self.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.connect()?;
            let result = conn.query_row(
                "SELECT doc FROM documents WHERE collection = ? AND id = ?",
                rusqlite::params![collection, id],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(text) => Ok(Some(parse_doc(text)?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(db_err(e)),
            }
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn put(&self, collection: &str, id: &str, doc: &Value) -> Result<()> {
        let store = self.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        let text = doc.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = store.connect()?;
            conn.execute(
                r#"
                INSERT INTO documents (collection, id, doc, updated_at)
                VALUES (?, ?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT (collection, id)
                DO UPDATE SET doc = excluded.doc, updated_at = CURRENT_TIMESTAMP
                "#,
                rusqlite::params![collection, id, text],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: &Value,
        conditions: &[Where],
    ) -> Result<bool> {
        let store = self.clone();
        let collection = collection.to_string();
        let id = id.to_string();
        let patch = patch.clone();
        let conditions = conditions.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = store.connect()?;
            conn.execute("BEGIN IMMEDIATE", []).map_err(db_err)?;

            let result: Result<bool> = (|| {
                let row = conn.query_row(
                    "SELECT doc FROM documents WHERE collection = ? AND id = ?",
                    rusqlite::params![collection, id],
                    |row| row.get::<_, String>(0),
                );
                let mut doc = match row {
                    Ok(text) => parse_doc(text)?,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(false),
                    Err(e) => return Err(db_err(e)),
                };
                if !matches_clauses(&doc, &conditions) {
                    return Ok(false);
                }
                merge_patch(&mut doc, &patch);
                conn.execute(
                    "UPDATE documents SET doc = ?, updated_at = CURRENT_TIMESTAMP \
                     WHERE collection = ? AND id = ?",
                    rusqlite::params![doc.to_string(), collection, id],
                )
                .map_err(db_err)?;
                Ok(true)
            })();

            if result.is_ok() {
                conn.execute("COMMIT", []).map_err(db_err)?;
            } else {
                let _ = conn.execute("ROLLBACK", []);
            }

            result
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn query(
        &self,
        collection: &str,
        wheres: &[Where],
        order_by: Option<(&str, Order)>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let store = self.clone();
        let collection = collection.to_string();
        let wheres = wheres.to_vec();
        let order_by = order_by.map(|(f, o)| (f.to_string(), o));
        tokio::task::spawn_blocking(move || {
            let mut params: Vec<SqlValue> = vec![SqlValue::Text(collection)];
            let mut sql = String::from("SELECT doc FROM documents WHERE collection = ?");
            sql.push_str(&build_where_sql(&wheres, &mut params)?);

            if let Some((field, order)) = &order_by {
                let path = json_path(field)?;
                let dir = match order {
                    Order::Asc => "ASC",
                    Order::Desc => "DESC",
                };
                sql.push_str(&format!(
                    " ORDER BY json_extract(doc, '{}') {}",
                    path, dir
                ));
            }
            if let Some(n) = limit {
                sql.push_str(&format!(" LIMIT {}", n));
            }

            let conn = store.connect()?;
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(params), |row| row.get::<_, String>(0))
                .map_err(db_err)?;

            let mut docs = Vec::new();
            for row in rows {
                docs.push(parse_doc(row.map_err(db_err)?)?);
            }
            Ok(docs)
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }

    async fn batch_get(&self, collection: &str, ids: &[String]) -> Result<Vec<Option<Value>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.clone();
        let collection = collection.to_string();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT id, doc FROM documents WHERE collection = ? AND id IN ({})",
                placeholders
            );
            let mut params: Vec<SqlValue> = vec![SqlValue::Text(collection)];
            params.extend(ids.iter().map(|id| SqlValue::Text(id.clone())));

            let conn = store.connect()?;
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(params), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(db_err)?;

            let mut found = std::collections::HashMap::new();
            for row in rows {
                let (id, text) = row.map_err(db_err)?;
                found.insert(id, parse_doc(text)?);
            }
            Ok(ids.iter().map(|id| found.remove(id)).collect())
        })
        .await
        .map_err(|e| EngineError::Store(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, store) = temp_store();
        store
            .put("work-queue", "a", &json!({"status": "pending", "n": 1}))
            .await
            .unwrap();
        let doc = store.get("work-queue", "a").await.unwrap().unwrap();
        assert_eq!(doc["status"], "pending");

        // Upsert replaces.
        store
            .put("work-queue", "a", &json!({"status": "success"}))
            .await
            .unwrap();
        let doc = store.get("work-queue", "a").await.unwrap().unwrap();
        assert_eq!(doc["status"], "success");
        assert!(doc.get("n").is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_claim() {
        let (_dir, store) = temp_store();
        store
            .put("work-queue", "a", &json!({"status": "pending"}))
            .await
            .unwrap();

        let first = store
            .update(
                "work-queue",
                "a",
                &json!({"status": "processing"}),
                &[Where::eq("status", "pending")],
            )
            .await
            .unwrap();
        let second = store
            .update(
                "work-queue",
                "a",
                &json!({"status": "processing"}),
                &[Where::eq("status", "pending")],
            )
            .await
            .unwrap();
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn test_query_filters_order_limit() {
        let (_dir, store) = temp_store();
        for (id, status, at) in [
            ("a", "pending", "2026-03-01T00:00:00Z"),
            ("b", "pending", "2026-01-01T00:00:00Z"),
            ("c", "success", "2026-02-01T00:00:00Z"),
        ] {
            store
                .put(
                    "work-queue",
                    id,
                    &json!({"id": id, "status": status, "created_at": at}),
                )
                .await
                .unwrap();
        }

        let docs = store
            .query(
                "work-queue",
                &[Where::eq("status", "pending")],
                Some(("created_at", Order::Asc)),
                None,
            )
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let docs = store
            .query(
                "work-queue",
                &[Where::is_in(
                    "status",
                    vec![json!("pending"), json!("success")],
                )],
                None,
                Some(2),
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_get_positions() {
        let (_dir, store) = temp_store();
        store.put("companies", "x", &json!({"name": "X"})).await.unwrap();
        let results = store
            .batch_get("companies", &["missing".to_string(), "x".to_string()])
            .await
            .unwrap();
        assert!(results[0].is_none());
        assert_eq!(results[1].as_ref().unwrap()["name"], "X");
    }
}
