//! SQLite-backed `Store`.
//!
//! Designed for single-node/self-hosted deployments. Dataset credentials and
//! webhook secrets are sealed with the `SecretBox` before they are written.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, SqlitePool};
use uuid::Uuid;

use crate::credentials::SecretBox;
use crate::models::{
    Credentials, Dataset, DatasetId, DatasetObject, ListQuery, Row, SubscriptionState, Table,
    TableBinding, TableId, WebhookSubscription,
};
use crate::store::traits::Store;
use crate::{Error, Result};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    secrets: SecretBox,
}

impl SqliteStore {
    #[tracing::instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, secrets: SecretBox) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("sqlite_store mkdir", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(|e| Error::backend("sqlite_store connect options", e))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(|e| Error::backend("sqlite_store connect", e))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::backend("sqlite_store schema", e))?;

        Ok(Self { pool, secrets })
    }

    fn seal_credentials(&self, creds: Option<&Credentials>) -> Result<Option<Vec<u8>>> {
        creds.map(|c| self.secrets.seal_json(c)).transpose()
    }

    fn decode_dataset(&self, row: &SqliteRow) -> Result<Dataset> {
        let sealed: Option<Vec<u8>> = row.try_get("credentials")?;
        let credentials = sealed
            .map(|bytes| self.secrets.open_json::<Credentials>(&bytes))
            .transpose()?;
        let last_synced: Option<String> = row.try_get("last_synced_at")?;
        Ok(Dataset {
            id: DatasetId(parse_uuid(row.try_get("id")?)?),
            name: row.try_get("name")?,
            integration_type: row.try_get("integration_type")?,
            credentials,
            last_synced_at: last_synced.map(parse_ts).transpose()?,
            created_at: parse_ts(row.try_get("created_at")?)?,
            updated_at: parse_ts(row.try_get("updated_at")?)?,
        })
    }

    fn decode_subscription(&self, row: &SqliteRow) -> Result<WebhookSubscription> {
        let sealed: Vec<u8> = row.try_get("secret")?;
        let secret = String::from_utf8(self.secrets.open(&sealed)?)
            .map_err(|e| Error::backend("decode webhook secret", e))?;
        let state: String = row.try_get("state")?;
        Ok(WebhookSubscription {
            id: parse_uuid(row.try_get("id")?)?,
            dataset_id: DatasetId(parse_uuid(row.try_get("dataset_id")?)?),
            integration: row.try_get("integration")?,
            remote_id: row.try_get("remote_id")?,
            callback_url: row.try_get("callback_url")?,
            secret,
            state: SubscriptionState::from_str(&state)?,
            created_at: parse_ts(row.try_get("created_at")?)?,
            updated_at: parse_ts(row.try_get("updated_at")?)?,
        })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  integration_type TEXT NULL,
  credentials BLOB NULL,
  last_synced_at TEXT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS datasets_created_idx ON datasets(created_at, id);

CREATE TABLE IF NOT EXISTS dataset_tables (
  id TEXT PRIMARY KEY,
  dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
  key TEXT NOT NULL,
  created_at TEXT NOT NULL,
  UNIQUE(dataset_id, key)
);

CREATE TABLE IF NOT EXISTS rows (
  id TEXT PRIMARY KEY,
  table_id TEXT NOT NULL REFERENCES dataset_tables(id) ON DELETE CASCADE,
  source_id TEXT NOT NULL,
  data TEXT NULL,
  data_hash TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE(table_id, source_id)
);

CREATE TABLE IF NOT EXISTS dataset_objects (
  id TEXT PRIMARY KEY,
  dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
  object_type TEXT NOT NULL,
  source_id TEXT NOT NULL,
  data TEXT NULL,
  data_hash TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE(dataset_id, object_type)
);

CREATE TABLE IF NOT EXISTS webhook_subscriptions (
  id TEXT PRIMARY KEY,
  dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
  integration TEXT NOT NULL,
  remote_id TEXT NOT NULL,
  callback_url TEXT NOT NULL,
  secret BLOB NOT NULL,
  state TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE(integration, remote_id)
);
CREATE INDEX IF NOT EXISTS ws_dataset_idx ON webhook_subscriptions(dataset_id);
"#;

fn parse_uuid(s: String) -> Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| Error::backend("parse stored uuid", e))
}

fn parse_ts(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::backend("parse stored timestamp", e))
}

fn encode_data(value: &serde_json::Value) -> Result<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::to_string(value)
        .map(Some)
        .map_err(|e| Error::backend("serialize data", e))
}

fn decode_data(raw: Option<String>) -> Result<serde_json::Value> {
    match raw {
        None => Ok(serde_json::Value::Null),
        Some(s) => serde_json::from_str(&s).map_err(|e| Error::backend("deserialize data", e)),
    }
}

fn decode_table(row: &SqliteRow) -> Result<Table> {
    Ok(Table {
        id: TableId(parse_uuid(row.try_get("id")?)?),
        dataset_id: DatasetId(parse_uuid(row.try_get("dataset_id")?)?),
        key: row.try_get("key")?,
        created_at: parse_ts(row.try_get::<String, _>("created_at")?)?,
    })
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    Ok(Row {
        id: parse_uuid(row.try_get("id")?)?,
        table_id: TableId(parse_uuid(row.try_get("table_id")?)?),
        source_id: row.try_get("source_id")?,
        data: decode_data(row.try_get("data")?)?,
        data_hash: row.try_get("data_hash")?,
        created_at: parse_ts(row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(row.try_get::<String, _>("updated_at")?)?,
    })
}

fn decode_object(row: &SqliteRow) -> Result<DatasetObject> {
    Ok(DatasetObject {
        id: parse_uuid(row.try_get("id")?)?,
        dataset_id: DatasetId(parse_uuid(row.try_get("dataset_id")?)?),
        object_type: row.try_get("object_type")?,
        source_id: row.try_get("source_id")?,
        data: decode_data(row.try_get("data")?)?,
        data_hash: row.try_get("data_hash")?,
        created_at: parse_ts(row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(row.try_get::<String, _>("updated_at")?)?,
    })
}

fn limit_offset(query: ListQuery) -> (i64, i64) {
    (
        i64::try_from(query.limit).unwrap_or(i64::MAX),
        i64::try_from(query.offset).unwrap_or(i64::MAX),
    )
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_dataset(&self, dataset: &Dataset) -> Result<()> {
        let sealed = self.seal_credentials(dataset.credentials.as_ref())?;
        sqlx::query(
            r#"
INSERT INTO datasets (id, name, integration_type, credentials, last_synced_at, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(id) DO UPDATE SET
  name = excluded.name,
  integration_type = excluded.integration_type,
  credentials = excluded.credentials,
  last_synced_at = excluded.last_synced_at,
  updated_at = excluded.updated_at
"#,
        )
        .bind(dataset.id.to_string())
        .bind(&dataset.name)
        .bind(&dataset.integration_type)
        .bind(sealed)
        .bind(dataset.last_synced_at.map(|d| d.to_rfc3339()))
        .bind(dataset.created_at.to_rfc3339())
        .bind(dataset.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_dataset(&self, id: DatasetId) -> Result<Option<Dataset>> {
        let row = sqlx::query("SELECT * FROM datasets WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| self.decode_dataset(r)).transpose()
    }

    async fn list_datasets(&self, query: ListQuery) -> Result<Vec<Dataset>> {
        let (limit, offset) = limit_offset(query);
        let rows = sqlx::query("SELECT * FROM datasets ORDER BY created_at, id LIMIT ?1 OFFSET ?2")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| self.decode_dataset(r)).collect()
    }

    async fn delete_dataset(&self, id: DatasetId) -> Result<bool> {
        let res = sqlx::query("DELETE FROM datasets WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn mark_dataset_synced(&self, id: DatasetId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE datasets SET last_synced_at = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_or_create_table(&self, dataset_id: DatasetId, key: &str) -> Result<TableBinding> {
        let inserted = sqlx::query(
            r#"
INSERT INTO dataset_tables (id, dataset_id, key, created_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(dataset_id, key) DO NOTHING
"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(dataset_id.to_string())
        .bind(key)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let table = self
            .get_table(dataset_id, key)
            .await?
            .ok_or_else(|| Error::BackendMessage(format!("table binding '{key}' vanished")))?;
        Ok(TableBinding {
            table,
            created: inserted.rows_affected() > 0,
        })
    }

    async fn get_table(&self, dataset_id: DatasetId, key: &str) -> Result<Option<Table>> {
        let row = sqlx::query("SELECT * FROM dataset_tables WHERE dataset_id = ?1 AND key = ?2")
            .bind(dataset_id.to_string())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_table).transpose()
    }

    async fn list_tables(&self, dataset_id: DatasetId) -> Result<Vec<Table>> {
        let rows = sqlx::query("SELECT * FROM dataset_tables WHERE dataset_id = ?1 ORDER BY key")
            .bind(dataset_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_table).collect()
    }

    async fn get_row(&self, table_id: TableId, source_id: &str) -> Result<Option<Row>> {
        let row = sqlx::query("SELECT * FROM rows WHERE table_id = ?1 AND source_id = ?2")
            .bind(table_id.to_string())
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn put_row(&self, row: Row) -> Result<Row> {
        let stored = sqlx::query(
            r#"
INSERT INTO rows (id, table_id, source_id, data, data_hash, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
ON CONFLICT(table_id, source_id) DO UPDATE SET
  data = excluded.data,
  data_hash = excluded.data_hash,
  updated_at = excluded.updated_at
RETURNING *
"#,
        )
        .bind(row.id.to_string())
        .bind(row.table_id.to_string())
        .bind(&row.source_id)
        .bind(encode_data(&row.data)?)
        .bind(&row.data_hash)
        .bind(row.created_at.to_rfc3339())
        .bind(row.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        decode_row(&stored)
    }

    async fn list_rows(&self, table_id: TableId, query: ListQuery) -> Result<Vec<Row>> {
        let (limit, offset) = limit_offset(query);
        let rows = sqlx::query(
            "SELECT * FROM rows WHERE table_id = ?1 ORDER BY source_id LIMIT ?2 OFFSET ?3",
        )
        .bind(table_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn count_rows(&self, table_id: TableId) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rows WHERE table_id = ?1")
            .bind(table_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    async fn get_object(
        &self,
        dataset_id: DatasetId,
        object_type: &str,
    ) -> Result<Option<DatasetObject>> {
        let row = sqlx::query(
            "SELECT * FROM dataset_objects WHERE dataset_id = ?1 AND object_type = ?2",
        )
        .bind(dataset_id.to_string())
        .bind(object_type)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode_object).transpose()
    }

    async fn put_object(&self, object: DatasetObject) -> Result<DatasetObject> {
        let stored = sqlx::query(
            r#"
INSERT INTO dataset_objects
  (id, dataset_id, object_type, source_id, data, data_hash, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(dataset_id, object_type) DO UPDATE SET
  source_id = excluded.source_id,
  data = excluded.data,
  data_hash = excluded.data_hash,
  updated_at = excluded.updated_at
RETURNING *
"#,
        )
        .bind(object.id.to_string())
        .bind(object.dataset_id.to_string())
        .bind(&object.object_type)
        .bind(&object.source_id)
        .bind(encode_data(&object.data)?)
        .bind(&object.data_hash)
        .bind(object.created_at.to_rfc3339())
        .bind(object.updated_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        decode_object(&stored)
    }

    async fn list_objects(&self, dataset_id: DatasetId) -> Result<Vec<DatasetObject>> {
        let rows = sqlx::query(
            "SELECT * FROM dataset_objects WHERE dataset_id = ?1 ORDER BY object_type",
        )
        .bind(dataset_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_object).collect()
    }

    async fn put_subscription(&self, sub: &WebhookSubscription) -> Result<()> {
        let sealed = self.secrets.seal(sub.secret.as_bytes())?;
        sqlx::query(
            r#"
INSERT INTO webhook_subscriptions
  (id, dataset_id, integration, remote_id, callback_url, secret, state, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
ON CONFLICT(integration, remote_id) DO UPDATE SET
  dataset_id = excluded.dataset_id,
  callback_url = excluded.callback_url,
  secret = excluded.secret,
  state = excluded.state,
  updated_at = excluded.updated_at
"#,
        )
        .bind(sub.id.to_string())
        .bind(sub.dataset_id.to_string())
        .bind(&sub.integration)
        .bind(&sub.remote_id)
        .bind(&sub.callback_url)
        .bind(sealed)
        .bind(sub.state.as_str())
        .bind(sub.created_at.to_rfc3339())
        .bind(sub.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_subscription(
        &self,
        integration: &str,
        remote_id: &str,
    ) -> Result<Option<WebhookSubscription>> {
        let row = sqlx::query(
            "SELECT * FROM webhook_subscriptions WHERE integration = ?1 AND remote_id = ?2",
        )
        .bind(integration)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(|r| self.decode_subscription(r)).transpose()
    }

    async fn list_subscriptions(&self, dataset_id: DatasetId) -> Result<Vec<WebhookSubscription>> {
        let rows = sqlx::query(
            "SELECT * FROM webhook_subscriptions WHERE dataset_id = ?1 ORDER BY created_at",
        )
        .bind(dataset_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| self.decode_subscription(r)).collect()
    }
}
