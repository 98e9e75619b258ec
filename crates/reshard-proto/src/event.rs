//! Cluster events exchanged on the orchestrator's event bus.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::EVENT_FORMAT_VERSION;

/// Request to migrate a schema from its current topology to a new one.
///
/// The data source and rule fields carry serialized configuration text. They
/// are parsed into topology snapshots by the consumer at handling time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationTrigger {
    /// Logical schema being migrated.
    pub schema_name: String,
    /// Identifier of the staged target rule awaiting activation.
    pub rule_cache_id: String,
    /// Serialized data sources currently in effect.
    pub source_data_source: String,
    /// Serialized rules currently in effect.
    pub source_rule: String,
    /// Serialized data sources after the change.
    pub target_data_source: String,
    /// Serialized rules after the change.
    pub target_rule: String,
}

impl MigrationTrigger {
    /// Create a new trigger.
    pub fn new(
        schema_name: impl Into<String>,
        rule_cache_id: impl Into<String>,
        source_data_source: impl Into<String>,
        source_rule: impl Into<String>,
        target_data_source: impl Into<String>,
        target_rule: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            rule_cache_id: rule_cache_id.into(),
            source_data_source: source_data_source.into(),
            source_rule: source_rule.into(),
            target_data_source: target_data_source.into(),
            target_rule: target_rule.into(),
        }
    }

    /// Check that the identity fields are present.
    pub fn validate(&self) -> Result<(), Error> {
        if self.schema_name.trim().is_empty() {
            return Err(Error::InvalidEvent("schema name is blank".to_string()));
        }
        if self.rule_cache_id.trim().is_empty() {
            return Err(Error::InvalidEvent(format!(
                "rule cache id is blank for schema '{}'",
                self.schema_name
            )));
        }
        Ok(())
    }

    /// The switch event that activates this trigger's target rule.
    pub fn switch_event(&self) -> SwitchRuleConfiguration {
        SwitchRuleConfiguration::new(&self.schema_name, &self.rule_cache_id)
    }

    /// Parse a trigger document.
    ///
    /// The document may carry a `version` field; when present it must equal
    /// [`EVENT_FORMAT_VERSION`].
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        let document: TriggerDocument =
            serde_yaml::from_str(text).map_err(|e| Error::Deserialization(e.to_string()))?;
        if document.version != EVENT_FORMAT_VERSION {
            return Err(Error::VersionMismatch {
                expected: EVENT_FORMAT_VERSION,
                actual: document.version,
            });
        }
        document.trigger.validate()?;
        Ok(document.trigger)
    }

    /// Render this trigger as a versioned document.
    pub fn to_yaml(&self) -> Result<String, Error> {
        let document = TriggerDocument {
            version: EVENT_FORMAT_VERSION,
            trigger: self.clone(),
        };
        serde_yaml::to_string(&document).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl std::fmt::Display for MigrationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MigrationTrigger(schema={}, rule_cache_id={})",
            self.schema_name, self.rule_cache_id
        )
    }
}

#[derive(Serialize, Deserialize)]
struct TriggerDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(flatten)]
    trigger: MigrationTrigger,
}

fn default_version() -> u32 {
    EVENT_FORMAT_VERSION
}

/// Signal that activates a staged rule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRuleConfiguration {
    /// Logical schema whose active rule is replaced.
    pub schema_name: String,
    /// Identifier of the staged rule to activate.
    pub rule_cache_id: String,
}

impl SwitchRuleConfiguration {
    /// Create a new switch event.
    pub fn new(schema_name: impl Into<String>, rule_cache_id: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            rule_cache_id: rule_cache_id.into(),
        }
    }
}

impl std::fmt::Display for SwitchRuleConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SwitchRuleConfiguration(schema={}, rule_cache_id={})",
            self.schema_name, self.rule_cache_id
        )
    }
}

/// Discriminant used to route events to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ClusterEvent::StartScaling`].
    StartScaling,
    /// [`ClusterEvent::SwitchRuleConfiguration`].
    SwitchRuleConfiguration,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::StartScaling => write!(f, "start_scaling"),
            EventKind::SwitchRuleConfiguration => write!(f, "switch_rule_configuration"),
        }
    }
}

/// Every event carried by the cluster event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A topology change needs a migration decision.
    StartScaling(MigrationTrigger),
    /// A staged rule must become active.
    SwitchRuleConfiguration(SwitchRuleConfiguration),
}

impl ClusterEvent {
    /// The routing tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ClusterEvent::StartScaling(_) => EventKind::StartScaling,
            ClusterEvent::SwitchRuleConfiguration(_) => EventKind::SwitchRuleConfiguration,
        }
    }

    /// Schema the event refers to.
    pub fn schema_name(&self) -> &str {
        match self {
            ClusterEvent::StartScaling(trigger) => &trigger.schema_name,
            ClusterEvent::SwitchRuleConfiguration(switch) => &switch.schema_name,
        }
    }

    /// Rule cache id the event refers to.
    pub fn rule_cache_id(&self) -> &str {
        match self {
            ClusterEvent::StartScaling(trigger) => &trigger.rule_cache_id,
            ClusterEvent::SwitchRuleConfiguration(switch) => &switch.rule_cache_id,
        }
    }
}

impl From<MigrationTrigger> for ClusterEvent {
    fn from(trigger: MigrationTrigger) -> Self {
        ClusterEvent::StartScaling(trigger)
    }
}

impl From<SwitchRuleConfiguration> for ClusterEvent {
    fn from(switch: SwitchRuleConfiguration) -> Self {
        ClusterEvent::SwitchRuleConfiguration(switch)
    }
}
