//! Polling synchronization: the engine, the shared upsert path and the scheduler.

pub mod engine;
pub mod report;
pub mod scheduler;
pub mod upsert;

pub use engine::SyncEngine;
pub use report::{DatasetFailure, DatasetReport, SkipReason, SyncAllReport, UnitKind, UnitReport};
pub use scheduler::{DEFAULT_SYNC_INTERVAL, Scheduler, SchedulerHandle};
pub use upsert::{UpsertOutcome, Upserter};
