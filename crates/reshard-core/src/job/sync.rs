//! The seam between job workers and the data copy machinery.

use super::config::WorkflowConfiguration;
use super::plan::TableMigration;
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::info;

/// What one synchronization attempt achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Rows now present on the target nodes.
    pub rows_copied: u64,
}

/// A synchronization attempt failed. Workers may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A data source could not be reached.
    #[error("data source '{0}' is unavailable")]
    DataSourceUnavailable(String),

    /// The copy itself failed.
    #[error("synchronizing '{table}' failed: {reason}")]
    Failed {
        /// Logic table being copied.
        table: String,
        /// Underlying failure.
        reason: String,
    },
}

/// Copies one table's rows from its source nodes to its target nodes.
///
/// Implementations must be safe to call again for a table whose previous
/// attempt failed part way.
#[async_trait]
pub trait DataSynchronizer: Send + Sync {
    /// Bring `table.target_nodes` in line with `table.source_nodes`.
    async fn synchronize(
        &self,
        workflow: &WorkflowConfiguration,
        table: &TableMigration,
    ) -> Result<SyncReport, SyncError>;
}

/// Logs the node mapping of each table without copying anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunSynchronizer;

#[async_trait]
impl DataSynchronizer for DryRunSynchronizer {
    async fn synchronize(
        &self,
        workflow: &WorkflowConfiguration,
        table: &TableMigration,
    ) -> Result<SyncReport, SyncError> {
        let sources: BTreeSet<&str> = table
            .source_nodes
            .iter()
            .map(|n| n.data_source.as_str())
            .collect();
        let targets: BTreeSet<&str> = table
            .target_nodes
            .iter()
            .map(|n| n.data_source.as_str())
            .collect();
        let reasons: Vec<String> = table.reasons.iter().map(|r| r.to_string()).collect();
        info!(
            schema_name = %workflow.schema_name,
            rule_cache_id = %workflow.rule_cache_id,
            logic_table = %table.logic_table,
            reasons = ?reasons,
            source_data_sources = ?sources,
            target_data_sources = ?targets,
            source_nodes = table.source_nodes.len(),
            target_nodes = table.target_nodes.len(),
            "dry run: table would be synchronized"
        );
        Ok(SyncReport::default())
    }
}
