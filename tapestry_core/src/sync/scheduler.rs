//! Fixed-interval sync scheduler.
//!
//! Runs `sync_all` on every registered engine (one per tenant store) at a fixed
//! period, optionally once immediately at start. A pass that overruns the
//! period delays the next tick instead of bursting.

use crate::sync::engine::SyncEngine;
use crate::sync::report::SyncAllReport;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10 * 60);

pub struct Scheduler {
    engines: Vec<Arc<SyncEngine>>,
    interval: Duration,
    run_on_startup: bool,
}

impl Scheduler {
    pub fn new(engines: Vec<Arc<SyncEngine>>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::InvalidInput(
                "sync interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            engines,
            interval,
            run_on_startup: true,
        })
    }

    pub fn run_on_startup(mut self, enabled: bool) -> Self {
        self.run_on_startup = enabled;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One pass over every engine. Engines run one after another.
    #[tracing::instrument(level = "info", skip(self), fields(engines = self.engines.len()))]
    pub async fn run_once(&self) -> Vec<SyncAllReport> {
        let mut reports = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            match engine.sync_all().await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!(error = %e, "sync pass failed"),
            }
        }
        reports
    }

    /// Spawn the scheduler loop.
    pub fn start(self) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let first = if self.run_on_startup {
                Instant::now()
            } else {
                Instant::now() + self.interval
            };
            let mut ticker = tokio::time::interval_at(first, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_s = self.interval.as_secs(),
                run_on_startup = self.run_on_startup,
                "sync scheduler started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = self.run_once() => {}
                }
            }
            tracing::info!("sync scheduler stopped");
        });
        SchedulerHandle { cancel, task }
    }
}

/// Handle to a running scheduler. Dropping it leaves the loop running.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the loop, abandoning an in-flight pass, and wait for the task to end.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "sync scheduler task ended abnormally");
        }
    }
}
