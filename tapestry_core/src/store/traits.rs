use crate::Result;
use crate::models::{
    Dataset, DatasetId, DatasetObject, ListQuery, Row, Table, TableBinding, TableId,
    WebhookSubscription,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence contract of the engine.
///
/// Writes are insert-or-replace on the natural keys: `(dataset_id, key)` for
/// tables, `(table_id, source_id)` for rows, `(dataset_id, object_type)` for
/// objects and `(integration, remote_id)` for webhook subscriptions. Replacing
/// keeps the existing surrogate id and `created_at`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace a dataset, credentials included.
    async fn upsert_dataset(&self, dataset: &Dataset) -> Result<()>;

    async fn get_dataset(&self, id: DatasetId) -> Result<Option<Dataset>>;

    /// Datasets ordered by creation time.
    async fn list_datasets(&self, query: ListQuery) -> Result<Vec<Dataset>>;

    /// Delete a dataset and everything it owns. Returns false if it did not exist.
    async fn delete_dataset(&self, id: DatasetId) -> Result<bool>;

    async fn mark_dataset_synced(&self, id: DatasetId, at: DateTime<Utc>) -> Result<()>;

    /// Bind table `key` to the dataset, assigning its id on first call.
    async fn get_or_create_table(&self, dataset_id: DatasetId, key: &str) -> Result<TableBinding>;

    async fn get_table(&self, dataset_id: DatasetId, key: &str) -> Result<Option<Table>>;

    async fn list_tables(&self, dataset_id: DatasetId) -> Result<Vec<Table>>;

    async fn get_row(&self, table_id: TableId, source_id: &str) -> Result<Option<Row>>;

    /// Insert or replace by `(table_id, source_id)`; returns the stored row.
    async fn put_row(&self, row: Row) -> Result<Row>;

    /// Rows ordered by `source_id`.
    async fn list_rows(&self, table_id: TableId, query: ListQuery) -> Result<Vec<Row>>;

    async fn count_rows(&self, table_id: TableId) -> Result<u64>;

    async fn get_object(
        &self,
        dataset_id: DatasetId,
        object_type: &str,
    ) -> Result<Option<DatasetObject>>;

    /// Insert or replace by `(dataset_id, object_type)`; returns the stored object.
    async fn put_object(&self, object: DatasetObject) -> Result<DatasetObject>;

    async fn list_objects(&self, dataset_id: DatasetId) -> Result<Vec<DatasetObject>>;

    /// Insert or replace by `(integration, remote_id)`.
    async fn put_subscription(&self, sub: &WebhookSubscription) -> Result<()>;

    async fn get_subscription(
        &self,
        integration: &str,
        remote_id: &str,
    ) -> Result<Option<WebhookSubscription>>;

    async fn list_subscriptions(&self, dataset_id: DatasetId) -> Result<Vec<WebhookSubscription>>;
}
