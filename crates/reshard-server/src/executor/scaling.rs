//! Executor that copies data for admitted jobs.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use reshard_core::job::TableProgress;
use reshard_core::{
    DataSynchronizer, JobStatus, ScalingApi, TableMigration, WorkflowConfiguration,
};

use super::Poller;
use crate::config::ExecutorConfig;

/// Runs pending jobs table by table through a [`DataSynchronizer`].
pub struct ScalingJobExecutor {
    api: Arc<ScalingApi>,
    synchronizer: Arc<dyn DataSynchronizer>,
    config: ExecutorConfig,
    poller: Poller,
}

impl ScalingJobExecutor {
    /// Create a new executor.
    pub fn new(
        api: Arc<ScalingApi>,
        synchronizer: Arc<dyn DataSynchronizer>,
        config: ExecutorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            synchronizer,
            config,
            poller: Poller::new("scaling"),
        })
    }

    /// Start polling for pending jobs. Returns false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.poller.start(self.config.poll_interval, move || {
            let this = Arc::clone(&this);
            async move {
                this.run_once().await;
            }
        })
    }

    /// Stop polling and wait for the current pass to finish.
    pub async fn stop(&self) {
        self.poller.stop().await;
    }

    /// Whether the polling loop is running.
    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    /// Run every pending job once. Returns how many jobs were picked up.
    ///
    /// Jobs of different schemas run side by side.
    pub async fn run_once(&self) -> usize {
        let pending = match self.api.pending_jobs() {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "cannot list pending jobs");
                return 0;
            }
        };
        let count = pending.len();
        future::join_all(pending.iter().map(|job| self.run_job(job.job_id))).await;
        count
    }

    async fn run_job(&self, job_id: u64) {
        let state = match self.api.mark_running(job_id) {
            Ok(state) => state,
            Err(e) => {
                warn!(job_id, error = %e, "cannot claim scaling job");
                return;
            }
        };

        let (Some(configuration), Some(plan)) =
            (self.api.job_configuration(job_id), self.api.job_plan(job_id))
        else {
            self.fail(job_id, "job configuration unavailable");
            return;
        };

        let tables: Vec<TableMigration> = {
            let remaining: HashSet<&str> = state
                .remaining_tables()
                .map(|t| t.logic_table.as_str())
                .collect();
            plan.tables()
                .iter()
                .filter(|t| remaining.contains(t.logic_table.as_str()))
                .cloned()
                .collect()
        };
        let handle = configuration.handle();
        let retry_times = handle.retry_times;
        info!(
            job_id,
            schema_name = %state.schema_name,
            rule_cache_id = %state.rule_cache_id,
            tables = tables.len(),
            concurrency = handle.concurrency,
            "scaling job running"
        );

        let workflow = configuration.workflow().clone();
        let results: Vec<Result<(), String>> = stream::iter(tables)
            .map(|table| {
                let workflow = &workflow;
                async move { self.sync_table(job_id, workflow, &table, retry_times).await }
            })
            .buffer_unordered(handle.concurrency.max(1))
            .collect()
            .await;
        let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();

        if !self.still_running(job_id) {
            return;
        }
        if !failures.is_empty() {
            self.fail(job_id, &failures.join("; "));
            return;
        }

        match self.api.mark_succeeded(job_id) {
            Ok(state) => info!(
                job_id,
                schema_name = %state.schema_name,
                rule_cache_id = %state.rule_cache_id,
                "scaling job succeeded"
            ),
            Err(e) => warn!(job_id, error = %e, "cannot mark scaling job succeeded"),
        }
    }

    async fn sync_table(
        &self,
        job_id: u64,
        workflow: &WorkflowConfiguration,
        table: &TableMigration,
        retry_times: u32,
    ) -> Result<(), String> {
        let mut last_error = String::new();
        for attempt in 1..=retry_times.saturating_add(1) {
            self.record(job_id, &table.logic_table, TableProgress::start_attempt)?;
            match self.synchronizer.synchronize(workflow, table).await {
                Ok(report) => {
                    self.record(job_id, &table.logic_table, |t| t.complete(report.rows_copied))?;
                    debug!(
                        job_id,
                        logic_table = %table.logic_table,
                        attempt,
                        rows_copied = report.rows_copied,
                        "table synchronized"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        job_id,
                        logic_table = %table.logic_table,
                        attempt,
                        error = %e,
                        "table synchronization attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        let message = format!("{}: {}", table.logic_table, last_error);
        self.record(job_id, &table.logic_table, |t| t.fail(last_error))?;
        Err(message)
    }

    /// Whether the job still belongs to this worker. The watchdog may have
    /// failed it while tables were being copied.
    fn still_running(&self, job_id: u64) -> bool {
        match self.api.status(job_id) {
            Ok(state) if state.status == JobStatus::Running => true,
            Ok(state) => {
                warn!(
                    job_id,
                    status = %state.status,
                    "scaling job left running state while copying, dropping its results"
                );
                false
            }
            Err(e) => {
                error!(job_id, error = %e, "cannot load scaling job");
                false
            }
        }
    }

    fn record(
        &self,
        job_id: u64,
        logic_table: &str,
        update: impl FnOnce(&mut TableProgress),
    ) -> Result<(), String> {
        self.api
            .record_table_progress(job_id, logic_table, update)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn fail(&self, job_id: u64, reason: &str) {
        if let Err(e) = self.api.mark_failed(job_id, reason) {
            error!(job_id, reason, error = %e, "cannot mark scaling job failed");
        }
    }
}
