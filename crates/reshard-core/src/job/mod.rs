//! Scaling jobs: configuration, planning, admission and persistence.

pub mod config;
pub mod control;
pub mod error;
pub mod plan;
pub mod state;
pub mod sync;

pub use config::{
    HandleConfiguration, JobConfiguration, JobRuleConfiguration, WorkflowConfiguration,
};
pub use control::{Admission, MigrationControl, ScalingApi};
pub use error::ScalingError;
pub use plan::{MigrationPlan, MigrationReason, TableMigration};
pub use state::{current_timestamp, JobState, JobStateStore, JobStatus, TableProgress, TableStatus};
pub use sync::{DataSynchronizer, DryRunSynchronizer, SyncError, SyncReport};
