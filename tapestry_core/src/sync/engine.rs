use crate::credentials::CredentialStore;
use crate::error::json_kind;
use crate::integrations::{FetchContext, Integration, IntegrationRegistry, ObjectDefinition, TableDefinition};
use crate::models::{Dataset, DatasetId, ListQuery};
use crate::operations::OperationBus;
use crate::store::Store;
use crate::sync::report::{
    DatasetFailure, DatasetReport, SkipReason, SyncAllReport, UnitKind, UnitReport,
};
use crate::sync::upsert::{UpsertOutcome, Upserter};
use crate::webhooks::SubscriptionManager;
use crate::{Error, Result};
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use std::sync::Arc;

const DATASET_PAGE_SIZE: usize = 100;

/// Pulls provider data for datasets and reconciles it through the `Upserter`.
///
/// Failures are contained at the smallest unit: a failing object or table is
/// logged and reported without stopping its siblings, and a failing dataset
/// never stops `sync_all`.
pub struct SyncEngine {
    store: Arc<dyn Store>,
    registry: Arc<IntegrationRegistry>,
    credentials: CredentialStore,
    upserter: Upserter,
    http: reqwest::Client,
    max_concurrent_datasets: usize,
    subscriptions: Option<SubscriptionManager>,
}

impl SyncEngine {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<IntegrationRegistry>,
        credentials: CredentialStore,
        bus: OperationBus,
    ) -> Self {
        Self {
            upserter: Upserter::new(store.clone(), bus),
            store,
            registry,
            credentials,
            http: reqwest::Client::new(),
            max_concurrent_datasets: 1,
            subscriptions: None,
        }
    }

    /// Outbound client for provider calls; its timeout is the only timeout layer.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// `1` keeps `sync_all` strictly sequential. Larger values run that many
    /// datasets at once; each dataset's own units stay sequential.
    pub fn with_max_concurrent_datasets(mut self, n: usize) -> Self {
        self.max_concurrent_datasets = n.max(1);
        self
    }

    /// Enable webhook subscription setup when a table is first bound.
    pub fn with_webhook_setup(mut self, subscriptions: SubscriptionManager) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<IntegrationRegistry> {
        &self.registry
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn upserter(&self) -> &Upserter {
        &self.upserter
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    #[tracing::instrument(level = "debug", skip_all, fields(dataset_id = %ctx.dataset.id, object = %def.key))]
    pub async fn sync_object(
        &self,
        ctx: &FetchContext<'_>,
        def: &ObjectDefinition,
    ) -> Result<UnitReport> {
        let mut report = UnitReport::new(UnitKind::Object, &def.key);
        let data = match def.source.get(ctx).await? {
            None | Some(serde_json::Value::Null) => {
                tracing::debug!("object getter returned no value");
                return Ok(report);
            }
            Some(v) => v,
        };
        report.fetched = 1;

        let source_id = def.source.object_id(ctx.dataset, &data);
        match self
            .upserter
            .upsert_object(ctx.dataset.id, &def.key, &source_id, data)
            .await?
        {
            UpsertOutcome::Changed => report.changed = 1,
            UpsertOutcome::Unchanged => report.unchanged = 1,
        }
        tracing::info!(changed = report.changed, "synced object");
        Ok(report)
    }

    /// Fetch a table and upsert every identified row.
    ///
    /// A non-array result is a `ShapeMismatch` and nothing is written.
    #[tracing::instrument(level = "debug", skip_all, fields(dataset_id = %ctx.dataset.id, table = %def.key))]
    pub async fn sync_table(
        &self,
        ctx: &FetchContext<'_>,
        integration: &Integration,
        def: &TableDefinition,
    ) -> Result<UnitReport> {
        let mut report = UnitReport::new(UnitKind::Table, &def.key);
        let items = match def.source.get(ctx).await? {
            None | Some(serde_json::Value::Null) => {
                tracing::debug!("table getter returned no value");
                return Ok(report);
            }
            Some(serde_json::Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::ShapeMismatch {
                    table: def.key.clone(),
                    found: json_kind(&other),
                });
            }
        };
        report.fetched = items.len();

        let binding = self
            .store
            .get_or_create_table(ctx.dataset.id, &def.key)
            .await?;
        self.ensure_webhooks(ctx, integration, binding.created).await;

        for item in items {
            let Some(source_id) = def.source.row_id(ctx.dataset, &item) else {
                tracing::debug!("row has no identity; skipped");
                report.skipped += 1;
                continue;
            };
            match self
                .upserter
                .upsert_row(&binding.table, &source_id, item)
                .await?
            {
                UpsertOutcome::Changed => report.changed += 1,
                UpsertOutcome::Unchanged => report.unchanged += 1,
            }
        }
        tracing::info!(
            fetched = report.fetched,
            changed = report.changed,
            "synced table"
        );
        Ok(report)
    }

    /// Set up push delivery when a table is first bound, and again on later
    /// passes while the dataset still holds no local subscription.
    async fn ensure_webhooks(
        &self,
        ctx: &FetchContext<'_>,
        integration: &Integration,
        newly_bound: bool,
    ) {
        let Some(subscriptions) = &self.subscriptions else {
            return;
        };
        if integration.webhooks.is_none() {
            return;
        }
        if !newly_bound {
            match self.store.list_subscriptions(ctx.dataset.id).await {
                Ok(existing) if existing.is_empty() => {
                    tracing::debug!(integration = %integration.key, "retrying webhook subscription setup");
                }
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(error = %err, "could not list webhook subscriptions");
                    return;
                }
            }
        }
        if let Err(err) = subscriptions.ensure(ctx, integration).await {
            tracing::warn!(
                integration = %integration.key,
                error = %err,
                "webhook subscription setup failed"
            );
        }
    }

    /// Sync every object, then every table of the dataset, sequentially.
    ///
    /// Unbound, unknown or unauthenticated datasets are skipped without error.
    #[tracing::instrument(level = "info", skip_all, fields(dataset_id = %dataset.id))]
    pub async fn sync_dataset(&self, dataset: &Dataset) -> Result<DatasetReport> {
        let Some(key) = dataset.integration_type.as_deref() else {
            tracing::debug!("dataset has no integration bound; skipped");
            return Ok(DatasetReport::skipped(dataset.id, None, SkipReason::Unbound));
        };
        let Some(integration) = self.registry.get(key) else {
            tracing::debug!(integration = key, "integration not registered; skipped");
            return Ok(DatasetReport::skipped(
                dataset.id,
                Some(key.to_string()),
                SkipReason::UnknownIntegration,
            ));
        };
        let Some(credential) = self
            .credentials
            .resolve(dataset, integration.auth_type)
            .await?
        else {
            tracing::debug!(integration = key, "dataset is unauthenticated; skipped");
            return Ok(DatasetReport::skipped(
                dataset.id,
                Some(key.to_string()),
                SkipReason::Unauthenticated,
            ));
        };

        let ctx = FetchContext {
            dataset,
            credential: &credential,
            http: &self.http,
        };
        let mut report = DatasetReport::synced(dataset.id, key);

        for def in integration.objects() {
            match self.sync_object(&ctx, def).await {
                Ok(unit) => report.units.push(unit),
                Err(err) => {
                    tracing::warn!(integration = key, object = %def.key, error = %err, "object sync failed");
                    report
                        .units
                        .push(UnitReport::failed(UnitKind::Object, &def.key, &err));
                }
            }
        }
        for def in integration.tables() {
            match self.sync_table(&ctx, &integration, def).await {
                Ok(unit) => report.units.push(unit),
                Err(err) => {
                    tracing::warn!(integration = key, table = %def.key, error = %err, "table sync failed");
                    report
                        .units
                        .push(UnitReport::failed(UnitKind::Table, &def.key, &err));
                }
            }
        }

        self.store.mark_dataset_synced(dataset.id, Utc::now()).await?;
        tracing::info!(integration = key, changed = report.changed(), "synced dataset");
        Ok(report)
    }

    pub async fn sync_dataset_by_id(&self, id: DatasetId) -> Result<DatasetReport> {
        let dataset = self
            .store
            .get_dataset(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("dataset {id} not found")))?;
        self.sync_dataset(&dataset).await
    }

    /// Sync every dataset. A failing dataset is logged and reported, never propagated.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn sync_all(&self) -> Result<SyncAllReport> {
        let datasets = self.all_datasets().await?;
        let mut report = SyncAllReport::default();

        let results: Vec<(DatasetId, Result<DatasetReport>)> = if self.max_concurrent_datasets <= 1
        {
            let mut results = Vec::with_capacity(datasets.len());
            for dataset in &datasets {
                results.push((dataset.id, self.sync_dataset(dataset).await));
            }
            results
        } else {
            // Boxed up front so the spawned scheduler future stays `Send`.
            let passes: Vec<BoxFuture<'_, (DatasetId, Result<DatasetReport>)>> = datasets
                .iter()
                .map(|dataset| self.sync_tagged(dataset).boxed())
                .collect();
            futures_util::stream::iter(passes)
                .buffer_unordered(self.max_concurrent_datasets)
                .collect()
                .await
        };

        for (dataset_id, result) in results {
            match result {
                Ok(r) => report.datasets.push(r),
                Err(err) => {
                    tracing::warn!(dataset_id = %dataset_id, error = %err, "dataset sync failed");
                    report.failures.push(DatasetFailure {
                        dataset_id,
                        error: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            datasets = datasets.len(),
            failures = report.failures.len(),
            changed = report.changed(),
            "sync pass complete"
        );
        Ok(report)
    }

    async fn sync_tagged(&self, dataset: &Dataset) -> (DatasetId, Result<DatasetReport>) {
        (dataset.id, self.sync_dataset(dataset).await)
    }

    async fn all_datasets(&self) -> Result<Vec<Dataset>> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .list_datasets(ListQuery {
                    limit: DATASET_PAGE_SIZE,
                    offset,
                })
                .await?;
            let n = page.len();
            all.extend(page);
            if n < DATASET_PAGE_SIZE {
                return Ok(all);
            }
            offset += n;
        }
    }
}
