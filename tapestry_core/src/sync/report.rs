use crate::models::DatasetId;
use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Object,
    Table,
}

/// Outcome of syncing one object or table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub kind: UnitKind,
    pub key: String,
    /// Items returned by the getter.
    pub fetched: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Items the identity function declined to identify.
    pub skipped: usize,
    /// Set when the unit was abandoned for this cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitReport {
    pub fn new(kind: UnitKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            fetched: 0,
            changed: 0,
            unchanged: 0,
            skipped: 0,
            error: None,
        }
    }

    pub fn failed(kind: UnitKind, key: impl Into<String>, error: &crate::Error) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(kind, key)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Why a dataset was not synced. Each is a normal state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No integration bound yet.
    Unbound,
    /// The bound key is not in the registry.
    UnknownIntegration,
    /// No usable credentials.
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetReport {
    pub dataset_id: DatasetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub units: Vec<UnitReport>,
}

impl DatasetReport {
    pub fn synced(dataset_id: DatasetId, integration: impl Into<String>) -> Self {
        Self {
            dataset_id,
            integration: Some(integration.into()),
            skipped: None,
            units: Vec::new(),
        }
    }

    pub fn skipped(
        dataset_id: DatasetId,
        integration: Option<String>,
        reason: SkipReason,
    ) -> Self {
        Self {
            dataset_id,
            integration,
            skipped: Some(reason),
            units: Vec::new(),
        }
    }

    pub fn changed(&self) -> usize {
        self.units.iter().map(|u| u.changed).sum()
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.is_failed())
    }

    pub fn unit(&self, key: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetFailure {
    pub dataset_id: DatasetId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncAllReport {
    pub datasets: Vec<DatasetReport>,
    pub failures: Vec<DatasetFailure>,
}

impl SyncAllReport {
    pub fn changed(&self) -> usize {
        self.datasets.iter().map(DatasetReport::changed).sum()
    }

    pub fn dataset(&self, id: DatasetId) -> Option<&DatasetReport> {
        self.datasets.iter().find(|d| d.dataset_id == id)
    }
}
