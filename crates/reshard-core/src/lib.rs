//! Reshard Core - topology snapshots, migration jobs and rule switching.
//!
//! This crate holds everything the orchestrator needs that does not depend on
//! an async runtime: parsing topologies, planning and tracking migration
//! jobs, and activating target rules.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod error;
pub mod job;
pub mod reviser;
pub mod rule;
pub mod switch;
pub mod topology;
pub mod transaction;

pub use error::Error;
pub use job::{
    Admission, DataSynchronizer, DryRunSynchronizer, HandleConfiguration, JobConfiguration,
    JobState, JobStatus, MigrationControl, MigrationPlan, MigrationReason, ScalingApi,
    ScalingError, SyncError, SyncReport, TableMigration, WorkflowConfiguration,
};
pub use reviser::{
    revise, revise_all, IdentityTableNameReviser, ShardingTableNameReviser, TableNameReviser,
};
pub use rule::{Rule, ShardingRule, TableRule};
pub use switch::{
    ActiveRule, ActiveRuleRegistry, RuleCache, RuleCacheState, RuleSwitch, SwitchError,
    SwitchOutcome,
};
pub use topology::{
    ConfigurationParseError, DataNode, RuleConfiguration, RuleKind, TopologySnapshot,
};
pub use transaction::TransactionSchemaGuard;

/// Re-export protocol types.
pub use reshard_proto as proto;
