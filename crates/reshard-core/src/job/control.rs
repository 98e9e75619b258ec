//! Migration control: job admission and lifecycle tracking.

use super::config::JobConfiguration;
use super::error::ScalingError;
use super::plan::MigrationPlan;
use super::state::{JobState, JobStateStore, JobStatus, TableProgress};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of submitting a job configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A job was created and will run in the background.
    JobStarted(u64),
    /// Source and target are equivalent; the target rule can be activated now.
    NoMigrationNeeded,
}

/// Admits migration jobs.
#[async_trait]
pub trait MigrationControl: Send + Sync {
    /// Decide whether `configuration` needs a job and start one if so.
    ///
    /// An error means nothing was admitted.
    async fn start(&self, configuration: JobConfiguration) -> Result<Admission, ScalingError>;
}

struct JobHandle {
    configuration: Arc<JobConfiguration>,
    plan: Arc<MigrationPlan>,
}

/// Job admission and lifecycle over a persistent state store.
///
/// At most one unfinished job exists per schema.
pub struct ScalingApi {
    store: JobStateStore,
    jobs: DashMap<u64, JobHandle>,
    next_job_id: AtomicU64,
    write_lock: Mutex<()>,
}

impl ScalingApi {
    /// Open the API and recover unfinished jobs.
    ///
    /// Jobs found `Running` go back to `Pending`; their completed tables are
    /// skipped when they run again. Jobs whose configuration can no longer be
    /// decoded are marked failed.
    pub fn open(db: &sled::Db) -> Result<Self, ScalingError> {
        let store = JobStateStore::open(db)?;
        let next_job_id = store.max_job_id()?.map_or(1, |id| id + 1);
        let api = Self {
            store,
            jobs: DashMap::new(),
            next_job_id: AtomicU64::new(next_job_id),
            write_lock: Mutex::new(()),
        };
        api.recover()?;
        Ok(api)
    }

    fn recover(&self) -> Result<(), ScalingError> {
        for mut state in self.store.list()? {
            if state.is_terminal() {
                continue;
            }
            let restored = JobConfiguration::from_json(&state.configuration).and_then(|config| {
                MigrationPlan::compute(config.source(), config.target()).map(|plan| (config, plan))
            });
            match restored {
                Ok((configuration, plan)) => {
                    if state.status == JobStatus::Running {
                        state.transition(JobStatus::Pending)?;
                        self.store.save(&state)?;
                    }
                    info!(
                        job_id = state.job_id,
                        schema_name = %state.schema_name,
                        status = %state.status,
                        "recovered scaling job"
                    );
                    self.jobs.insert(
                        state.job_id,
                        JobHandle {
                            configuration: Arc::new(configuration),
                            plan: Arc::new(plan),
                        },
                    );
                }
                Err(e) => {
                    error!(
                        job_id = state.job_id,
                        schema_name = %state.schema_name,
                        error = %e,
                        "cannot recover scaling job"
                    );
                    state.fail(format!("recovery failed: {}", e))?;
                    self.store.save(&state)?;
                }
            }
        }
        self.store.flush()?;
        Ok(())
    }

    /// Admit a job configuration.
    pub fn admit(&self, configuration: JobConfiguration) -> Result<Admission, ScalingError> {
        let plan = MigrationPlan::compute(configuration.source(), configuration.target())?;

        let _guard = self.write_lock.lock();
        if let Some(job_id) = self.unfinished_job_of(configuration.schema_name()) {
            return Err(ScalingError::MigrationInProgress {
                schema_name: configuration.schema_name().to_string(),
                job_id,
            });
        }
        if let Some((source_name, target_name)) = plan.default_data_source_change() {
            return Err(ScalingError::DefaultDataSourceChanged {
                schema_name: configuration.schema_name().to_string(),
                source_name: source_name.to_string(),
                target_name: target_name.to_string(),
            });
        }
        if plan.is_empty() {
            info!(
                schema_name = %configuration.schema_name(),
                rule_cache_id = %configuration.rule_cache_id(),
                "source and target are equivalent, no migration needed"
            );
            return Ok(Admission::NoMigrationNeeded);
        }

        let job_id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let state = JobState::new(
            job_id,
            configuration.schema_name(),
            configuration.rule_cache_id(),
            plan.tables().iter().map(|t| t.logic_table.clone()),
            configuration.to_json()?,
        );
        self.store.save(&state)?;
        self.store.flush()?;

        info!(
            job_id,
            schema_name = %configuration.schema_name(),
            rule_cache_id = %configuration.rule_cache_id(),
            tables = plan.len(),
            "scaling job admitted"
        );
        self.jobs.insert(
            job_id,
            JobHandle {
                configuration: Arc::new(configuration),
                plan: Arc::new(plan),
            },
        );
        Ok(Admission::JobStarted(job_id))
    }

    /// Current state of a job.
    pub fn status(&self, job_id: u64) -> Result<JobState, ScalingError> {
        self.store
            .load(job_id)?
            .ok_or(ScalingError::JobNotFound(job_id))
    }

    /// Every known job, ordered by id.
    pub fn list(&self) -> Result<Vec<JobState>, ScalingError> {
        Ok(self.store.list()?)
    }

    /// Jobs waiting for a worker.
    pub fn pending_jobs(&self) -> Result<Vec<JobState>, ScalingError> {
        self.jobs_with_status(JobStatus::Pending)
    }

    /// Jobs a worker is copying.
    pub fn running_jobs(&self) -> Result<Vec<JobState>, ScalingError> {
        self.jobs_with_status(JobStatus::Running)
    }

    /// Jobs whose data is in place but whose rule is not active yet.
    pub fn succeeded_jobs(&self) -> Result<Vec<JobState>, ScalingError> {
        self.jobs_with_status(JobStatus::Succeeded)
    }

    /// Configuration of an unfinished job.
    pub fn job_configuration(&self, job_id: u64) -> Option<Arc<JobConfiguration>> {
        self.jobs
            .get(&job_id)
            .map(|handle| Arc::clone(&handle.configuration))
    }

    /// Plan of an unfinished job.
    pub fn job_plan(&self, job_id: u64) -> Option<Arc<MigrationPlan>> {
        self.jobs.get(&job_id).map(|handle| Arc::clone(&handle.plan))
    }

    /// Configurations of every unfinished job, ordered by job id.
    pub fn unfinished_configurations(&self) -> Vec<(u64, Arc<JobConfiguration>)> {
        let mut configurations: Vec<_> = self
            .jobs
            .iter()
            .map(|handle| (*handle.key(), Arc::clone(&handle.configuration)))
            .collect();
        configurations.sort_by_key(|(job_id, _)| *job_id);
        configurations
    }

    /// Claim a pending job for a worker.
    pub fn mark_running(&self, job_id: u64) -> Result<JobState, ScalingError> {
        self.update(job_id, |state| state.transition(JobStatus::Running))
    }

    /// Update one table's progress.
    ///
    /// Fails with [`ScalingError::JobNotRunning`] once the job has left
    /// `Running`, which tells a worker to stop copying.
    pub fn record_table_progress(
        &self,
        job_id: u64,
        logic_table: &str,
        update: impl FnOnce(&mut TableProgress),
    ) -> Result<JobState, ScalingError> {
        self.update(job_id, |state| {
            if state.status != JobStatus::Running {
                return Err(ScalingError::JobNotRunning {
                    job_id,
                    status: state.status.to_string(),
                });
            }
            match state.table_mut(logic_table) {
                Some(table) => update(table),
                None => warn!(job_id, logic_table, "progress for table outside the plan"),
            }
            Ok(())
        })
    }

    /// All tables are in place.
    pub fn mark_succeeded(&self, job_id: u64) -> Result<JobState, ScalingError> {
        self.update(job_id, |state| state.transition(JobStatus::Succeeded))
    }

    /// The job cannot complete; the source rule stays active.
    pub fn mark_failed(&self, job_id: u64, reason: &str) -> Result<JobState, ScalingError> {
        let state = self.update(job_id, |state| state.fail(reason))?;
        error!(
            job_id,
            schema_name = %state.schema_name,
            rule_cache_id = %state.rule_cache_id,
            reason,
            "scaling job failed"
        );
        Ok(state)
    }

    /// The target rule has been activated.
    pub fn mark_switched(&self, job_id: u64) -> Result<JobState, ScalingError> {
        self.update(job_id, |state| state.transition(JobStatus::Switched))
    }

    /// Only unfinished jobs are loaded; terminal ones never leave `Switched`
    /// or `Failed`, so they need no polling.
    fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<JobState>, ScalingError> {
        let mut job_ids: Vec<u64> = self.jobs.iter().map(|handle| *handle.key()).collect();
        job_ids.sort_unstable();

        let mut states = Vec::with_capacity(job_ids.len());
        for job_id in job_ids {
            if let Some(state) = self.store.load(job_id)? {
                if state.status == status {
                    states.push(state);
                }
            }
        }
        Ok(states)
    }

    fn unfinished_job_of(&self, schema_name: &str) -> Option<u64> {
        self.jobs
            .iter()
            .filter(|handle| handle.configuration.schema_name() == schema_name)
            .map(|handle| *handle.key())
            .min()
    }

    fn update(
        &self,
        job_id: u64,
        apply: impl FnOnce(&mut JobState) -> Result<(), ScalingError>,
    ) -> Result<JobState, ScalingError> {
        let _guard = self.write_lock.lock();
        let mut state = self.status(job_id)?;
        apply(&mut state)?;
        self.store.save(&state)?;
        self.store.flush()?;
        debug!(job_id, status = %state.status, "job state saved");
        if state.is_terminal() {
            self.jobs.remove(&job_id);
        }
        Ok(state)
    }
}

#[async_trait]
impl MigrationControl for ScalingApi {
    async fn start(&self, configuration: JobConfiguration) -> Result<Admission, ScalingError> {
        self.admit(configuration)
    }
}
