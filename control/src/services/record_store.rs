use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::db::{execute_async, records, DbPool};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {category}/{id}")]
    NotFound { category: String, id: String },

    #[error("invalid record body: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Category-keyed store of JSON records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, category: &str) -> Result<Vec<String>, StoreError>;

    /// Fails with [`StoreError::NotFound`] if the record is absent.
    async fn load(&self, category: &str, id: &str) -> Result<Value, StoreError>;

    /// Insert or replace.
    async fn store(&self, category: &str, id: &str, record: &Value) -> Result<(), StoreError>;

    /// No-op if the record is absent.
    async fn delete(&self, category: &str, id: &str) -> Result<(), StoreError>;
}

// ============================================================================
// SQLite
// ============================================================================

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn list(&self, category: &str) -> Result<Vec<String>, StoreError> {
        let category = category.to_string();
        let ids = execute_async(&self.pool, move |conn| records::list_ids(conn, &category)).await?;
        Ok(ids)
    }

    async fn load(&self, category: &str, id: &str) -> Result<Value, StoreError> {
        let (c, i) = (category.to_string(), id.to_string());
        let body = execute_async(&self.pool, move |conn| records::get_record(conn, &c, &i)).await?;

        match body {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Err(StoreError::NotFound {
                category: category.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn store(&self, category: &str, id: &str, record: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        let (c, i) = (category.to_string(), id.to_string());
        execute_async(&self.pool, move |conn| records::upsert_record(conn, &c, &i, &body)).await?;
        Ok(())
    }

    async fn delete(&self, category: &str, id: &str) -> Result<(), StoreError> {
        let (c, i) = (category.to_string(), id.to_string());
        execute_async(&self.pool, move |conn| records::delete_record(conn, &c, &i)).await?;
        Ok(())
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Non-persistent store for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Value>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, category: &str) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self
            .records()
            .keys()
            .filter(|(c, _)| c == category)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn load(&self, category: &str, id: &str) -> Result<Value, StoreError> {
        self.records()
            .get(&(category.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                category: category.to_string(),
                id: id.to_string(),
            })
    }

    async fn store(&self, category: &str, id: &str, record: &Value) -> Result<(), StoreError> {
        self.records()
            .insert((category.to_string(), id.to_string()), record.clone());
        Ok(())
    }

    async fn delete(&self, category: &str, id: &str) -> Result<(), StoreError> {
        self.records().remove(&(category.to_string(), id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn exercise_contract(store: &dyn RecordStore) {
        assert!(store.list("nodes").await.unwrap().is_empty());
        assert!(matches!(
            store.load("nodes", "a").await,
            Err(StoreError::NotFound { .. })
        ));

        store.store("nodes", "a", &json!({"ip": "10.0.0.1"})).await.unwrap();
        store.store("nodes", "a", &json!({"ip": "10.0.0.2"})).await.unwrap();
        store.store("other", "b", &json!({})).await.unwrap();

        assert_eq!(store.list("nodes").await.unwrap(), vec!["a".to_string()]);
        assert_eq!(store.load("nodes", "a").await.unwrap()["ip"], "10.0.0.2");

        store.delete("nodes", "a").await.unwrap();
        store.delete("nodes", "a").await.unwrap();
        assert!(store.list("nodes").await.unwrap().is_empty());
        assert_eq!(store.list("other").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        exercise_contract(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_db(&dir.path().join("control.db")).unwrap();
        exercise_contract(&SqliteStore::new(pool)).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.db");

        {
            let store = SqliteStore::new(crate::db::init_db(&path).unwrap());
            store.store("nodes", "a", &json!({"port": 24444})).await.unwrap();
        }

        let store = SqliteStore::new(crate::db::init_db(&path).unwrap());
        assert_eq!(store.load("nodes", "a").await.unwrap()["port"], 24444);
    }
}
