//! Immutable job configurations.

use crate::error::Error;
use crate::topology::{ConfigurationParseError, TopologySnapshot};
use reshard_proto::MigrationTrigger;
use serde::{Deserialize, Serialize};

/// Identity of a migration workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfiguration {
    /// Logical schema being migrated.
    pub schema_name: String,
    /// Staged target rule to activate once the data is in place.
    pub rule_cache_id: String,
}

impl WorkflowConfiguration {
    /// Create a new workflow identity.
    pub fn new(schema_name: impl Into<String>, rule_cache_id: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            rule_cache_id: rule_cache_id.into(),
        }
    }
}

/// Topology before and after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRuleConfiguration {
    /// Topology currently serving traffic.
    pub source: TopologySnapshot,
    /// Topology to migrate to.
    pub target: TopologySnapshot,
}

/// Worker tuning carried with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleConfiguration {
    /// Tables synchronized in parallel.
    pub concurrency: usize,
    /// Extra attempts per table before the job fails.
    pub retry_times: u32,
}

impl Default for HandleConfiguration {
    fn default() -> Self {
        Self {
            concurrency: 2,
            retry_times: 3,
        }
    }
}

/// Everything a worker needs to run one migration.
///
/// The workflow and both snapshots always agree on the schema name; a value
/// of this type is never observed half built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfiguration {
    rule_config: JobRuleConfiguration,
    workflow: WorkflowConfiguration,
    #[serde(default)]
    handle: HandleConfiguration,
}

impl JobConfiguration {
    /// Pair two snapshots under a workflow identity.
    pub fn new(
        workflow: WorkflowConfiguration,
        source: TopologySnapshot,
        target: TopologySnapshot,
        handle: HandleConfiguration,
    ) -> Result<Self, ConfigurationParseError> {
        let config = Self {
            rule_config: JobRuleConfiguration { source, target },
            workflow,
            handle,
        };
        config.check_schema()?;
        Ok(config)
    }

    /// Build source and target snapshots from a trigger's serialized text.
    pub fn from_trigger(
        trigger: &MigrationTrigger,
        handle: HandleConfiguration,
    ) -> Result<Self, ConfigurationParseError> {
        let source = TopologySnapshot::build(
            &trigger.schema_name,
            &trigger.source_data_source,
            &trigger.source_rule,
        )?;
        let target = TopologySnapshot::build(
            &trigger.schema_name,
            &trigger.target_data_source,
            &trigger.target_rule,
        )?;
        Self::new(
            WorkflowConfiguration::new(&trigger.schema_name, &trigger.rule_cache_id),
            source,
            target,
            handle,
        )
    }

    /// Workflow identity.
    pub fn workflow(&self) -> &WorkflowConfiguration {
        &self.workflow
    }

    /// Topology currently serving traffic.
    pub fn source(&self) -> &TopologySnapshot {
        &self.rule_config.source
    }

    /// Topology to migrate to.
    pub fn target(&self) -> &TopologySnapshot {
        &self.rule_config.target
    }

    /// Worker tuning.
    pub fn handle(&self) -> HandleConfiguration {
        self.handle
    }

    /// Schema shared by the workflow and both snapshots.
    pub fn schema_name(&self) -> &str {
        &self.workflow.schema_name
    }

    /// Staged target rule id.
    pub fn rule_cache_id(&self) -> &str {
        &self.workflow.rule_cache_id
    }

    /// Serialize for storage alongside the job state.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode a stored configuration, validating it again.
    pub fn from_json(text: &str) -> Result<Self, ConfigurationParseError> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ConfigurationParseError::Corrupted(e.to_string()))?;
        config.rule_config.source.validate()?;
        config.rule_config.target.validate()?;
        config.check_schema()?;
        Ok(config)
    }

    fn check_schema(&self) -> Result<(), ConfigurationParseError> {
        for snapshot in [&self.rule_config.source, &self.rule_config.target] {
            if snapshot.schema_name() != self.workflow.schema_name {
                return Err(ConfigurationParseError::SchemaMismatch {
                    expected: self.workflow.schema_name.clone(),
                    actual: snapshot.schema_name().to_string(),
                });
            }
        }
        Ok(())
    }
}
