//! Scaling job errors.

use crate::topology::ConfigurationParseError;
use thiserror::Error;

/// Errors raised while admitting or tracking scaling jobs.
#[derive(Debug, Error)]
pub enum ScalingError {
    /// The schema already has a job that has not finished.
    #[error("migration already in progress for schema '{schema_name}': job {job_id}")]
    MigrationInProgress {
        /// Schema with the running job.
        schema_name: String,
        /// The unfinished job.
        job_id: u64,
    },

    /// The job configuration could not be planned.
    #[error("cannot plan migration: {0}")]
    Planning(#[from] ConfigurationParseError),

    /// Job state could not be stored or loaded.
    #[error("job state storage failed: {0}")]
    Storage(#[from] crate::error::Error),

    /// Tables no rule governs would land on a different data source.
    #[error(
        "default data source of schema '{schema_name}' changes from '{source_name}' to '{target_name}'"
    )]
    DefaultDataSourceChanged {
        /// The schema.
        schema_name: String,
        /// Default data source of the source topology.
        source_name: String,
        /// Default data source of the target topology.
        target_name: String,
    },

    /// Progress was reported for a job that is no longer running.
    #[error("job {job_id} is {status}, not running")]
    JobNotRunning {
        /// The job.
        job_id: u64,
        /// Its current status.
        status: String,
    },

    /// No job with this id exists.
    #[error("job {0} not found")]
    JobNotFound(u64),

    /// A status change that the job lifecycle does not allow.
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The job.
        job_id: u64,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
}

impl From<sled::Error> for ScalingError {
    fn from(e: sled::Error) -> Self {
        ScalingError::Storage(crate::error::Error::Storage(e))
    }
}
