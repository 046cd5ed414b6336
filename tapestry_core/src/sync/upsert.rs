//! Read-compare-write upsert shared by polling and webhook deliveries.
//!
//! A write happens only when the incoming value differs structurally from the
//! stored one, and every write publishes exactly one `Operation`. Two callers
//! racing on the same identity converge on the same stored value.

use crate::canonical::{content_hash, deep_equal};
use crate::models::{DatasetId, DatasetObject, Row, Table};
use crate::operations::{Operation, OperationBus};
use crate::store::Store;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Unchanged,
    Changed,
}

impl UpsertOutcome {
    pub fn is_changed(self) -> bool {
        self == UpsertOutcome::Changed
    }
}

#[derive(Clone)]
pub struct Upserter {
    store: Arc<dyn Store>,
    bus: OperationBus,
}

impl Upserter {
    pub fn new(store: Arc<dyn Store>, bus: OperationBus) -> Self {
        Self { store, bus }
    }

    pub fn bus(&self) -> &OperationBus {
        &self.bus
    }

    #[tracing::instrument(level = "debug", skip(self, table, data), fields(table_id = %table.id, table = %table.key))]
    pub async fn upsert_row(
        &self,
        table: &Table,
        source_id: &str,
        data: serde_json::Value,
    ) -> Result<UpsertOutcome> {
        let existing = self.store.get_row(table.id, source_id).await?;
        if let Some(existing) = &existing {
            if deep_equal(&existing.data, &data) {
                return Ok(UpsertOutcome::Unchanged);
            }
        }

        let now = Utc::now();
        let row = Row {
            id: existing.as_ref().map(|r| r.id).unwrap_or_else(Uuid::new_v4),
            table_id: table.id,
            source_id: source_id.to_string(),
            data_hash: content_hash(&data),
            data,
            created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
            updated_at: now,
        };
        let stored = self.store.put_row(row).await?;
        self.bus.publish(Operation::Row {
            table_id: stored.table_id,
            source_id: stored.source_id,
            data: stored.data,
        });
        Ok(UpsertOutcome::Changed)
    }

    #[tracing::instrument(level = "debug", skip(self, data), fields(dataset_id = %dataset_id))]
    pub async fn upsert_object(
        &self,
        dataset_id: DatasetId,
        object_type: &str,
        source_id: &str,
        data: serde_json::Value,
    ) -> Result<UpsertOutcome> {
        let existing = self.store.get_object(dataset_id, object_type).await?;
        if let Some(existing) = &existing {
            if existing.source_id == source_id && deep_equal(&existing.data, &data) {
                return Ok(UpsertOutcome::Unchanged);
            }
        }

        let now = Utc::now();
        let object = DatasetObject {
            id: existing.as_ref().map(|o| o.id).unwrap_or_else(Uuid::new_v4),
            dataset_id,
            object_type: object_type.to_string(),
            source_id: source_id.to_string(),
            data_hash: content_hash(&data),
            data,
            created_at: existing.as_ref().map(|o| o.created_at).unwrap_or(now),
            updated_at: now,
        };
        let stored = self.store.put_object(object).await?;
        self.bus.publish(Operation::Object {
            dataset_id: stored.dataset_id,
            object_type: stored.object_type,
            data: stored.data,
        });
        Ok(UpsertOutcome::Changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn setup() -> (MemoryStore, Upserter, Table) {
        let store = MemoryStore::new();
        let upserter = Upserter::new(Arc::new(store.clone()), OperationBus::default());
        let table = store
            .get_or_create_table(DatasetId::new(), "items")
            .await
            .unwrap()
            .table;
        (store, upserter, table)
    }

    #[tokio::test]
    async fn identical_data_is_not_rewritten() {
        let (store, upserter, table) = setup().await;
        let mut sub = upserter.bus().subscribe();

        let first = upserter
            .upsert_row(&table, "1", json!({"id": 1, "description": "A"}))
            .await
            .unwrap();
        let second = upserter
            .upsert_row(&table, "1", json!({"description": "A", "id": 1}))
            .await
            .unwrap();

        assert_eq!(first, UpsertOutcome::Changed);
        assert_eq!(second, UpsertOutcome::Unchanged);
        assert_eq!(store.data_writes(), 1);
        assert_eq!(sub.drain().len(), 1);
    }

    #[tokio::test]
    async fn changed_data_updates_the_same_row() {
        let (store, upserter, table) = setup().await;
        upserter
            .upsert_row(&table, "1", json!({"description": "A"}))
            .await
            .unwrap();
        let before = store.get_row(table.id, "1").await.unwrap().unwrap();

        let mut sub = upserter.bus().subscribe();
        let outcome = upserter
            .upsert_row(&table, "1", json!({"description": "B"}))
            .await
            .unwrap();
        assert!(outcome.is_changed());

        let after = store.get_row(table.id, "1").await.unwrap().unwrap();
        assert_eq!(before.id, after.id);
        assert_eq!(after.data, json!({"description": "B"}));
        assert_ne!(before.data_hash, after.data_hash);
        assert_eq!(
            sub.drain(),
            vec![Operation::Row {
                table_id: table.id,
                source_id: "1".to_string(),
                data: json!({"description": "B"}),
            }]
        );
    }

    #[tokio::test]
    async fn objects_dedup_on_content_and_identity() {
        let (store, upserter, _) = setup().await;
        let ds = DatasetId::new();
        let data = json!({"id": 7, "email": "a@b.c"});
        assert!(
            upserter
                .upsert_object(ds, "me", "7", data.clone())
                .await
                .unwrap()
                .is_changed()
        );
        assert!(
            !upserter
                .upsert_object(ds, "me", "7", data.clone())
                .await
                .unwrap()
                .is_changed()
        );
        assert!(
            upserter
                .upsert_object(ds, "me", "8", data)
                .await
                .unwrap()
                .is_changed()
        );
        assert_eq!(store.list_objects(ds).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_upserts_converge() {
        let (store, upserter, table) = setup().await;
        let data = json!({"id": 1, "v": "same"});
        let (a, b) = tokio::join!(
            upserter.upsert_row(&table, "1", data.clone()),
            upserter.upsert_row(&table, "1", data.clone()),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(store.count_rows(table.id).await.unwrap(), 1);
        assert_eq!(store.get_row(table.id, "1").await.unwrap().unwrap().data, data);
    }
}
