use crate::error::{RelayError, Result};
use crate::storage::KvStore;
use async_trait::async_trait;
use chrono::Utc;
use libsql::{Builder, Connection, Database};
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

fn store_error(context: &'static str) -> impl FnOnce(libsql::Error) -> RelayError {
    move |e| RelayError::Store(format!("{context}: {e}"))
}

/// Turso/libSQL-backed store. Expired rows are filtered on read and purged
/// on write.
pub struct LibsqlStore {
    db: Database,
}

impl LibsqlStore {
    /// Connect to Turso using `LIBSQL_URL` and `LIBSQL_AUTH_TOKEN`
    pub async fn from_env() -> Result<Self> {
        let url = env::var("LIBSQL_URL")
            .map_err(|_| RelayError::Config("LIBSQL_URL environment variable not set".to_string()))?;
        let auth_token = env::var("LIBSQL_AUTH_TOKEN").map_err(|_| {
            RelayError::Config("LIBSQL_AUTH_TOKEN environment variable not set".to_string())
        })?;

        info!("Connecting to Turso database at {}", url);

        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(store_error("Failed to connect to database"))?;

        Ok(Self { db })
    }

    /// Local file database, used for development
    pub async fn open_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(store_error("Failed to open local database"))?;
        Ok(Self { db })
    }

    fn connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(store_error("Failed to get database connection"))
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");
        let conn = self.connection()?;
        conn.execute_batch(include_str!("../migrations/001_create_kv_store.sql"))
            .await
            .map_err(store_error("Failed to run migrations"))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    async fn purge_expired(&self, conn: &Connection) -> Result<()> {
        let removed = conn
            .execute(
                "DELETE FROM kv_store WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                libsql::params![Utc::now().timestamp_millis()],
            )
            .await
            .map_err(store_error("Failed to purge expired keys"))?;
        if removed > 0 {
            debug!("Purged {} expired keys", removed);
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for LibsqlStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT value FROM kv_store WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                libsql::params![key, Utc::now().timestamp_millis()],
            )
            .await
            .map_err(store_error("Failed to query key"))?;

        match rows.next().await.map_err(store_error("Failed to read row"))? {
            Some(row) => {
                let raw: String = row.get(0).map_err(store_error("Failed to get value"))?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let conn = self.connection()?;
        self.purge_expired(&conn).await?;

        let expires_at: Option<i64> =
            ttl.map(|ttl| Utc::now().timestamp_millis() + ttl.as_millis() as i64);
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, expires_at) VALUES (?1, ?2, ?3)",
            libsql::params![key, serde_json::to_string(&value)?, expires_at],
        )
        .await
        .map_err(store_error("Failed to upsert key"))?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, expires_at) VALUES (?1, CAST(?2 AS TEXT), NULL) \
             ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + ?2 AS TEXT)",
            libsql::params![key, delta],
        )
        .await
        .map_err(store_error("Failed to increment counter"))?;

        let mut rows = conn
            .query("SELECT value FROM kv_store WHERE key = ?1", libsql::params![key])
            .await
            .map_err(store_error("Failed to read counter"))?;
        let row = rows
            .next()
            .await
            .map_err(store_error("Failed to read row"))?
            .ok_or_else(|| RelayError::Store(format!("counter '{key}' vanished after increment")))?;
        let raw: String = row.get(0).map_err(store_error("Failed to get counter"))?;
        raw.trim()
            .parse::<i64>()
            .map_err(|e| RelayError::Store(format!("value at '{key}' is not an integer: {e}")))
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO kv_list (key, value) VALUES (?1, ?2)",
            libsql::params![key, value],
        )
        .await
        .map_err(store_error("Failed to push list entry"))?;

        let mut rows = conn
            .query("SELECT COUNT(*) FROM kv_list WHERE key = ?1", libsql::params![key])
            .await
            .map_err(store_error("Failed to count list"))?;
        match rows.next().await.map_err(store_error("Failed to read row"))? {
            Some(row) => {
                let count: i64 = row.get(0).map_err(store_error("Failed to get count"))?;
                Ok(count as u64)
            }
            None => Ok(0),
        }
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT value FROM kv_list WHERE key = ?1 ORDER BY id DESC",
                libsql::params![key],
            )
            .await
            .map_err(store_error("Failed to query list"))?;

        let mut values = Vec::new();
        while let Some(row) = rows.next().await.map_err(store_error("Failed to read row"))? {
            let value: String = row.get(0).map_err(store_error("Failed to get list value"))?;
            values.push(value);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn local_store() -> (LibsqlStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.db");
        let store = LibsqlStore::open_local(path.to_str().unwrap()).await.unwrap();
        store.run_migrations().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_round_trip_and_counters() {
        let (store, _dir) = local_store().await;

        store.set("task:1", json!({"status": "pending"}), None).await.unwrap();
        assert_eq!(
            store.get("task:1").await.unwrap(),
            Some(json!({"status": "pending"}))
        );

        assert_eq!(store.incr_by("api_calls:0", 1).await.unwrap(), 1);
        assert_eq!(store.incr_by("api_calls:0", 2).await.unwrap(), 3);

        store.lpush("api_calls:0:correlation_ids", "a").await.unwrap();
        store.lpush("api_calls:0:correlation_ids", "b").await.unwrap();
        assert_eq!(
            store.list("api_calls:0:correlation_ids").await.unwrap(),
            vec!["b", "a"]
        );
    }

    #[tokio::test]
    async fn test_expired_values_are_hidden() {
        let (store, _dir) = local_store().await;
        store
            .set("ratelimit:x", json!([1]), Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("ratelimit:x").await.unwrap().is_none());
    }
}
