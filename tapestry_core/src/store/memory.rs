use crate::Result;
use crate::models::{
    Dataset, DatasetId, DatasetObject, ListQuery, Row, Table, TableBinding, TableId,
    WebhookSubscription,
};
use crate::store::traits::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory `Store` for local development and unit tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    data_writes: Arc<AtomicU64>,
}

#[derive(Default)]
struct Inner {
    datasets: HashMap<DatasetId, Dataset>,
    tables: HashMap<(DatasetId, String), Table>,
    rows: BTreeMap<(TableId, String), Row>,
    objects: HashMap<(DatasetId, String), DatasetObject>,
    subscriptions: HashMap<(String, String), WebhookSubscription>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of row and object writes so far (primarily for tests).
    pub fn data_writes(&self) -> u64 {
        self.data_writes.load(Ordering::SeqCst)
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, query: ListQuery) -> Vec<T> {
    items.skip(query.offset).take(query.limit).collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_dataset(&self, dataset: &Dataset) -> Result<()> {
        self.inner
            .write()
            .await
            .datasets
            .insert(dataset.id, dataset.clone());
        Ok(())
    }

    async fn get_dataset(&self, id: DatasetId) -> Result<Option<Dataset>> {
        Ok(self.inner.read().await.datasets.get(&id).cloned())
    }

    async fn list_datasets(&self, query: ListQuery) -> Result<Vec<Dataset>> {
        let inner = self.inner.read().await;
        let mut all: Vec<&Dataset> = inner.datasets.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(page(all.into_iter().cloned(), query))
    }

    async fn delete_dataset(&self, id: DatasetId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.datasets.remove(&id).is_none() {
            return Ok(false);
        }
        let table_ids: Vec<TableId> = inner
            .tables
            .values()
            .filter(|t| t.dataset_id == id)
            .map(|t| t.id)
            .collect();
        inner.tables.retain(|(ds, _), _| *ds != id);
        inner.rows.retain(|(t, _), _| !table_ids.contains(t));
        inner.objects.retain(|(ds, _), _| *ds != id);
        inner.subscriptions.retain(|_, s| s.dataset_id != id);
        Ok(true)
    }

    async fn mark_dataset_synced(&self, id: DatasetId, at: DateTime<Utc>) -> Result<()> {
        if let Some(ds) = self.inner.write().await.datasets.get_mut(&id) {
            ds.last_synced_at = Some(at);
        }
        Ok(())
    }

    async fn get_or_create_table(&self, dataset_id: DatasetId, key: &str) -> Result<TableBinding> {
        let mut inner = self.inner.write().await;
        let slot = (dataset_id, key.to_string());
        if let Some(table) = inner.tables.get(&slot) {
            return Ok(TableBinding {
                table: table.clone(),
                created: false,
            });
        }
        let table = Table {
            id: TableId(Uuid::new_v4()),
            dataset_id,
            key: key.to_string(),
            created_at: Utc::now(),
        };
        inner.tables.insert(slot, table.clone());
        Ok(TableBinding {
            table,
            created: true,
        })
    }

    async fn get_table(&self, dataset_id: DatasetId, key: &str) -> Result<Option<Table>> {
        Ok(self
            .inner
            .read()
            .await
            .tables
            .get(&(dataset_id, key.to_string()))
            .cloned())
    }

    async fn list_tables(&self, dataset_id: DatasetId) -> Result<Vec<Table>> {
        let inner = self.inner.read().await;
        let mut tables: Vec<Table> = inner
            .tables
            .values()
            .filter(|t| t.dataset_id == dataset_id)
            .cloned()
            .collect();
        tables.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(tables)
    }

    async fn get_row(&self, table_id: TableId, source_id: &str) -> Result<Option<Row>> {
        Ok(self
            .inner
            .read()
            .await
            .rows
            .get(&(table_id, source_id.to_string()))
            .cloned())
    }

    async fn put_row(&self, mut row: Row) -> Result<Row> {
        let mut inner = self.inner.write().await;
        let slot = (row.table_id, row.source_id.clone());
        if let Some(existing) = inner.rows.get(&slot) {
            row.id = existing.id;
            row.created_at = existing.created_at;
        }
        inner.rows.insert(slot, row.clone());
        self.data_writes.fetch_add(1, Ordering::SeqCst);
        Ok(row)
    }

    async fn list_rows(&self, table_id: TableId, query: ListQuery) -> Result<Vec<Row>> {
        let inner = self.inner.read().await;
        Ok(page(
            inner
                .rows
                .range((table_id, String::new())..)
                .take_while(|((t, _), _)| *t == table_id)
                .map(|(_, r)| r.clone()),
            query,
        ))
    }

    async fn count_rows(&self, table_id: TableId) -> Result<u64> {
        let inner = self.inner.read().await;
        Ok(inner.rows.keys().filter(|(t, _)| *t == table_id).count() as u64)
    }

    async fn get_object(
        &self,
        dataset_id: DatasetId,
        object_type: &str,
    ) -> Result<Option<DatasetObject>> {
        Ok(self
            .inner
            .read()
            .await
            .objects
            .get(&(dataset_id, object_type.to_string()))
            .cloned())
    }

    async fn put_object(&self, mut object: DatasetObject) -> Result<DatasetObject> {
        let mut inner = self.inner.write().await;
        let slot = (object.dataset_id, object.object_type.clone());
        if let Some(existing) = inner.objects.get(&slot) {
            object.id = existing.id;
            object.created_at = existing.created_at;
        }
        inner.objects.insert(slot, object.clone());
        self.data_writes.fetch_add(1, Ordering::SeqCst);
        Ok(object)
    }

    async fn list_objects(&self, dataset_id: DatasetId) -> Result<Vec<DatasetObject>> {
        let inner = self.inner.read().await;
        let mut objects: Vec<DatasetObject> = inner
            .objects
            .values()
            .filter(|o| o.dataset_id == dataset_id)
            .cloned()
            .collect();
        objects.sort_by(|a, b| a.object_type.cmp(&b.object_type));
        Ok(objects)
    }

    async fn put_subscription(&self, sub: &WebhookSubscription) -> Result<()> {
        let mut inner = self.inner.write().await;
        let slot = (sub.integration.clone(), sub.remote_id.clone());
        let mut sub = sub.clone();
        if let Some(existing) = inner.subscriptions.get(&slot) {
            sub.id = existing.id;
            sub.created_at = existing.created_at;
        }
        inner.subscriptions.insert(slot, sub);
        Ok(())
    }

    async fn get_subscription(
        &self,
        integration: &str,
        remote_id: &str,
    ) -> Result<Option<WebhookSubscription>> {
        Ok(self
            .inner
            .read()
            .await
            .subscriptions
            .get(&(integration.to_string(), remote_id.to_string()))
            .cloned())
    }

    async fn list_subscriptions(&self, dataset_id: DatasetId) -> Result<Vec<WebhookSubscription>> {
        let inner = self.inner.read().await;
        let mut subs: Vec<WebhookSubscription> = inner
            .subscriptions
            .values()
            .filter(|s| s.dataset_id == dataset_id)
            .cloned()
            .collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subs)
    }
}
