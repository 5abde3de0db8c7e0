use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

use super::init_db;
use super::store::{from_micros, to_micros, Store, StoreError};
use crate::models::{CacheEntry, DeadLetter, Operation, OperationKind};

/// SQLite-backed durable store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    kind: String,
    entity: String,
    payload: String,
    enqueued_at: i64,
    retry_count: i64,
    last_error: Option<String>,
    next_attempt_at: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    key: String,
    data: Vec<u8>,
    stored_at: i64,
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: String,
    kind: String,
    entity: String,
    payload: String,
    enqueued_at: i64,
    retry_count: i64,
    last_error: Option<String>,
    dropped_at: i64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `path` and runs migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let pool = init_db(path).await.map_err(|e| StoreError::Init {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(pool))
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_operation(
    table: &'static str,
    id: &str,
    kind: &str,
    entity: String,
    payload: &str,
    enqueued_at: i64,
    retry_count: i64,
    last_error: Option<String>,
) -> Result<Operation, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { table, reason };

    Ok(Operation {
        id: Uuid::parse_str(id).map_err(|e| corrupt(format!("bad id '{}': {}", id, e)))?,
        kind: kind.parse::<OperationKind>().map_err(corrupt)?,
        entity,
        payload: serde_json::from_str(payload)?,
        enqueued_at: from_micros(table, enqueued_at)?,
        retry_count: u32::try_from(retry_count)
            .map_err(|_| corrupt(format!("bad retry_count {}", retry_count)))?,
        last_error,
        next_attempt_at: None,
    })
}

impl TryFrom<OperationRow> for Operation {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let mut op = parse_operation(
            "operations",
            &row.id,
            &row.kind,
            row.entity,
            &row.payload,
            row.enqueued_at,
            row.retry_count,
            row.last_error,
        )?;
        op.next_attempt_at = row
            .next_attempt_at
            .map(|micros| from_micros("operations", micros))
            .transpose()?;
        Ok(op)
    }
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = StoreError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let operation = parse_operation(
            "dead_letters",
            &row.id,
            &row.kind,
            row.entity,
            &row.payload,
            row.enqueued_at,
            row.retry_count,
            row.last_error,
        )?;
        Ok(DeadLetter::new(
            operation,
            from_micros("dead_letters", row.dropped_at)?,
        ))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn add_operation(&self, op: &Operation) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&op.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO operations (id, kind, entity, payload, enqueued_at, retry_count, last_error, next_attempt_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(op.id.to_string())
        .bind(op.kind.as_str())
        .bind(&op.entity)
        .bind(&payload)
        .bind(to_micros(op.enqueued_at))
        .bind(i64::from(op.retry_count))
        .bind(&op.last_error)
        .bind(op.next_attempt_at.map(to_micros))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateId(op.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_operations(&self) -> Result<Vec<Operation>, StoreError> {
        let rows: Vec<OperationRow> = sqlx::query_as("SELECT * FROM operations")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Operation::try_from).collect()
    }

    async fn update_operation(&self, op: &Operation) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE operations SET retry_count = ?, last_error = ?, next_attempt_at = ? WHERE id = ?",
        )
        .bind(i64::from(op.retry_count))
        .bind(&op.last_error)
        .bind(op.next_attempt_at.map(to_micros))
        .bind(op.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_operation(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM operations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_operations(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn clear_operations(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM operations")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_enqueued_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(enqueued_at) FROM operations")
            .fetch_one(&self.pool)
            .await?;
        latest
            .map(|micros| from_micros("operations", micros))
            .transpose()
    }

    async fn set_cache(
        &self,
        key: &str,
        data: &[u8],
        stored_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO cache (key, data, stored_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(data)
            .bind(to_micros(stored_at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_cache(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let row: Option<CacheRow> = sqlx::query_as("SELECT * FROM cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(CacheEntry::new(
                row.key,
                row.data,
                from_micros("cache", row.stored_at)?,
            ))),
            None => Ok(None),
        }
    }

    async fn clear_cache(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cache").execute(&self.pool).await?;
        Ok(())
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn add_dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        let op = &letter.operation;
        let payload = serde_json::to_string(&op.payload)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO dead_letters (id, kind, entity, payload, enqueued_at, retry_count, last_error, dropped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(op.id.to_string())
        .bind(op.kind.as_str())
        .bind(&op.entity)
        .bind(&payload)
        .bind(to_micros(op.enqueued_at))
        .bind(i64::from(op.retry_count))
        .bind(&op.last_error)
        .bind(to_micros(letter.dropped_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        let rows: Vec<DeadLetterRow> =
            sqlx::query_as("SELECT * FROM dead_letters ORDER BY dropped_at, enqueued_at")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    async fn clear_dead_letters(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM dead_letters")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        store: SqliteStore,
        _temp_dir: TempDir,
    }

    async fn setup_store() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::open(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        TestContext {
            store,
            _temp_dir: temp_dir,
        }
    }

    fn op_at(micros: i64, kind: OperationKind) -> Operation {
        Operation::new(
            kind,
            "projects",
            json!({"id": "p-1", "name": "Pavilion"}),
            DateTime::from_timestamp_micros(micros).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_add_and_list_operation() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        let op = op_at(1_700_000_000_000_001, OperationKind::Create);
        store.add_operation(&op).await.unwrap();

        let ops = store.list_operations().await.unwrap();
        assert_eq!(ops, vec![op]);
    }

    #[tokio::test]
    async fn test_add_duplicate_id_fails() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        let op = op_at(1_700_000_000_000_001, OperationKind::Create);
        store.add_operation(&op).await.unwrap();

        let err = store.add_operation(&op).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(id) if id == op.id));
        assert_eq!(store.count_operations().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_operation_persists_retry_metadata() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        let mut op = op_at(1_700_000_000_000_001, OperationKind::Update);
        store.add_operation(&op).await.unwrap();

        op.retry_count = 2;
        op.last_error = Some("HTTP 503: Service Unavailable".to_string());
        op.next_attempt_at = DateTime::from_timestamp_micros(1_700_000_005_000_001);
        store.update_operation(&op).await.unwrap();

        let ops = store.list_operations().await.unwrap();
        assert_eq!(ops[0].retry_count, 2);
        assert_eq!(
            ops[0].last_error.as_deref(),
            Some("HTTP 503: Service Unavailable")
        );
        assert_eq!(ops[0].next_attempt_at, op.next_attempt_at);
    }

    #[tokio::test]
    async fn test_remove_operation_is_idempotent() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        let op = op_at(1_700_000_000_000_001, OperationKind::Delete);
        store.add_operation(&op).await.unwrap();

        store.remove_operation(op.id).await.unwrap();
        store.remove_operation(op.id).await.unwrap();
        store.remove_operation(Uuid::new_v4()).await.unwrap();

        assert_eq!(store.count_operations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_latest_enqueued_at_and_clear() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        assert!(store.latest_enqueued_at().await.unwrap().is_none());

        store
            .add_operation(&op_at(1_700_000_000_000_005, OperationKind::Create))
            .await
            .unwrap();
        store
            .add_operation(&op_at(1_700_000_000_000_009, OperationKind::Create))
            .await
            .unwrap();

        let latest = store.latest_enqueued_at().await.unwrap().unwrap();
        assert_eq!(latest.timestamp_micros(), 1_700_000_000_000_009);

        store.clear_operations().await.unwrap();
        assert_eq!(store.count_operations().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cache_overwrite_and_miss() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        assert!(store.get_cache("projects").await.unwrap().is_none());

        let first = DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let second = first + chrono::Duration::milliseconds(1500);
        store.set_cache("projects", b"v1", first).await.unwrap();
        store.set_cache("projects", b"v2", second).await.unwrap();

        let entry = store.get_cache("projects").await.unwrap().unwrap();
        assert_eq!(entry.key, "projects");
        assert_eq!(entry.data, b"v2".to_vec());
        assert_eq!(entry.stored_at, second);

        store.clear_cache().await.unwrap();
        assert!(store.get_cache("projects").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_overwrite_and_miss() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        assert!(store.get_metadata("lastSyncTime").await.unwrap().is_none());

        store.set_metadata("lastSyncTime", "a").await.unwrap();
        store.set_metadata("lastSyncTime", "b").await.unwrap();

        assert_eq!(
            store.get_metadata("lastSyncTime").await.unwrap().as_deref(),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_dead_letters() {
        let ctx = setup_store().await;
        let store = &ctx.store;

        let mut op = op_at(1_700_000_000_000_001, OperationKind::Update);
        op.retry_count = 3;
        op.last_error = Some("connection refused".to_string());
        let dropped_at = DateTime::from_timestamp_micros(1_700_000_100_000_000).unwrap();

        store
            .add_dead_letter(&DeadLetter::new(op.clone(), dropped_at))
            .await
            .unwrap();

        let letters = store.list_dead_letters().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].operation, op);
        assert_eq!(letters[0].dropped_at, dropped_at);

        store.clear_dead_letters().await.unwrap();
        assert!(store.list_dead_letters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let op = op_at(1_700_000_000_000_001, OperationKind::Create);
        {
            let store = SqliteStore::open(&db_path).await.unwrap();
            store.add_operation(&op).await.unwrap();
            store.close().await;
        }

        let store = SqliteStore::open(&db_path).await.unwrap();
        assert_eq!(store.list_operations().await.unwrap(), vec![op]);
    }
}
