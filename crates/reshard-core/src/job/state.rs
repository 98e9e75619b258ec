//! Scaling job state and persistence.
//!
//! Job state survives restarts so unfinished jobs can be picked up again.

use super::error::ScalingError;
use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Lifecycle of a scaling job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub enum JobStatus {
    /// Admitted, waiting for a worker.
    Pending,
    /// A worker is copying data.
    Running,
    /// All tables copied; the target rule is not active yet.
    Succeeded,
    /// The target rule has been activated.
    Switched,
    /// The job failed; the source rule stays active.
    Failed,
}

impl JobStatus {
    /// Whether the lifecycle allows moving to `next`.
    ///
    /// `Running -> Pending` is only used when recovering jobs after a
    /// restart.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Pending)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Succeeded, JobStatus::Switched)
                | (JobStatus::Succeeded, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Switched => write!(f, "switched"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of one table within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum TableStatus {
    /// Not started.
    Pending,
    /// Being synchronized.
    Running,
    /// Synchronized.
    Complete,
    /// Gave up after exhausting retries.
    Failed,
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableStatus::Pending => write!(f, "pending"),
            TableStatus::Running => write!(f, "running"),
            TableStatus::Complete => write!(f, "complete"),
            TableStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of one table.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct TableProgress {
    /// Logic table being migrated.
    pub logic_table: String,
    /// Current status.
    pub status: TableStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Rows copied by the last successful attempt.
    pub rows_copied: u64,
    /// When the first attempt started (microseconds since epoch).
    pub started_at: Option<u64>,
    /// When the table finished (microseconds since epoch).
    pub completed_at: Option<u64>,
    /// Last error, if any.
    pub error: Option<String>,
}

impl TableProgress {
    /// Create a pending entry.
    pub fn new(logic_table: impl Into<String>) -> Self {
        Self {
            logic_table: logic_table.into(),
            status: TableStatus::Pending,
            attempts: 0,
            rows_copied: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Record the start of an attempt.
    pub fn start_attempt(&mut self) {
        self.status = TableStatus::Running;
        self.attempts += 1;
        self.started_at.get_or_insert_with(current_timestamp);
    }

    /// Mark the table as synchronized.
    pub fn complete(&mut self, rows_copied: u64) {
        self.status = TableStatus::Complete;
        self.rows_copied = rows_copied;
        self.completed_at = Some(current_timestamp());
        self.error = None;
    }

    /// Mark the table as failed for good.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TableStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error = Some(error.into());
    }
}

/// Persistent state of a scaling job.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct JobState {
    /// Job id, unique and increasing.
    pub job_id: u64,
    /// Schema being migrated.
    pub schema_name: String,
    /// Target rule to activate on success.
    pub rule_cache_id: String,
    /// Current status.
    pub status: JobStatus,
    /// Per-table progress, in plan order.
    pub tables: Vec<TableProgress>,
    /// When the job was admitted (microseconds since epoch).
    pub created_at: u64,
    /// When a worker last started the job (microseconds since epoch).
    pub started_at: Option<u64>,
    /// When the job reached a terminal status (microseconds since epoch).
    pub completed_at: Option<u64>,
    /// Error message if the job failed.
    pub error: Option<String>,
    /// The job configuration, as JSON.
    pub configuration: String,
}

impl JobState {
    /// Create a pending job.
    pub fn new(
        job_id: u64,
        schema_name: impl Into<String>,
        rule_cache_id: impl Into<String>,
        tables: impl IntoIterator<Item = String>,
        configuration: String,
    ) -> Self {
        Self {
            job_id,
            schema_name: schema_name.into(),
            rule_cache_id: rule_cache_id.into(),
            status: JobStatus::Pending,
            tables: tables.into_iter().map(TableProgress::new).collect(),
            created_at: current_timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
            configuration,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), ScalingError> {
        if !self.status.can_transition_to(next) {
            return Err(ScalingError::InvalidTransition {
                job_id: self.job_id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        match next {
            JobStatus::Running => self.started_at = Some(current_timestamp()),
            JobStatus::Switched | JobStatus::Failed => {
                self.completed_at = Some(current_timestamp())
            }
            JobStatus::Pending | JobStatus::Succeeded => {}
        }
        Ok(())
    }

    /// Mark the job as failed with a reason.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), ScalingError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Whether the job will never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Switched | JobStatus::Failed)
    }

    /// Progress entry for a table.
    pub fn table_mut(&mut self, logic_table: &str) -> Option<&mut TableProgress> {
        self.tables.iter_mut().find(|t| t.logic_table == logic_table)
    }

    /// Tables that still need synchronizing.
    pub fn remaining_tables(&self) -> impl Iterator<Item = &TableProgress> {
        self.tables
            .iter()
            .filter(|t| t.status != TableStatus::Complete)
    }

    /// Microseconds since a worker started the job, if running.
    pub fn running_for(&self, now: u64) -> Option<u64> {
        match (self.status, self.started_at) {
            (JobStatus::Running, Some(started)) => Some(now.saturating_sub(started)),
            _ => None,
        }
    }

    /// Serialize the state to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize state from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Job state store backed by a sled tree.
pub struct JobStateStore {
    tree: sled::Tree,
}

impl JobStateStore {
    /// Tree name for job state.
    pub const TREE_NAME: &'static str = "scaling:jobs";

    const KEY_PREFIX: &'static [u8] = b"job:";

    /// Open or create the job state store.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    /// Save a job state.
    pub fn save(&self, state: &JobState) -> Result<(), Error> {
        self.tree.insert(Self::job_key(state.job_id), state.to_bytes()?)?;
        Ok(())
    }

    /// Load a job state.
    pub fn load(&self, job_id: u64) -> Result<Option<JobState>, Error> {
        match self.tree.get(Self::job_key(job_id))? {
            Some(bytes) => Ok(Some(JobState::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a job state.
    pub fn delete(&self, job_id: u64) -> Result<(), Error> {
        self.tree.remove(Self::job_key(job_id))?;
        Ok(())
    }

    /// All job states, ordered by job id.
    pub fn list(&self) -> Result<Vec<JobState>, Error> {
        let mut states = Vec::new();
        for result in self.tree.scan_prefix(Self::KEY_PREFIX) {
            let (_, value) = result?;
            states.push(JobState::from_bytes(&value)?);
        }
        Ok(states)
    }

    /// Highest stored job id.
    pub fn max_job_id(&self) -> Result<Option<u64>, Error> {
        match self.tree.scan_prefix(Self::KEY_PREFIX).keys().next_back() {
            Some(key) => Self::decode_key(&key?).map(Some),
            None => Ok(None),
        }
    }

    /// Flush changes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }

    fn job_key(job_id: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(Self::KEY_PREFIX.len() + 8);
        key.extend_from_slice(Self::KEY_PREFIX);
        key.extend_from_slice(&job_id.to_be_bytes());
        key
    }

    fn decode_key(key: &[u8]) -> Result<u64, Error> {
        let id: [u8; 8] = key
            .strip_prefix(Self::KEY_PREFIX)
            .and_then(|rest| rest.try_into().ok())
            .ok_or(Error::InvalidKey)?;
        Ok(u64::from_be_bytes(id))
    }
}
