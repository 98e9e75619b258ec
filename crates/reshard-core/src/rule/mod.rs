//! Runtime rules built from a snapshot's rule configurations.

pub mod sharding;

pub use sharding::{ShardingRule, TableRule};

use crate::topology::{
    ConfigurationParseError, EncryptRuleConfiguration, ReadwriteSplittingRuleConfiguration,
    RuleConfiguration, RuleKind, SingleRuleConfiguration, TopologySnapshot,
};

/// A rule ready for use by revisers and planners.
///
/// Only sharding needs a resolved form; the other kinds carry their
/// configuration as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Sharding with expanded data nodes.
    Sharding(ShardingRule),
    /// Column encryption.
    Encrypt(EncryptRuleConfiguration),
    /// Read-write splitting.
    ReadwriteSplitting(ReadwriteSplittingRuleConfiguration),
    /// Single tables.
    Single(SingleRuleConfiguration),
}

impl Rule {
    /// Build a runtime rule against the snapshot's logical data sources.
    pub fn build(
        config: &RuleConfiguration,
        data_sources: &[String],
    ) -> Result<Self, ConfigurationParseError> {
        Ok(match config {
            RuleConfiguration::Sharding(c) => Rule::Sharding(ShardingRule::new(c, data_sources)?),
            RuleConfiguration::Encrypt(c) => Rule::Encrypt(c.clone()),
            RuleConfiguration::ReadwriteSplitting(c) => Rule::ReadwriteSplitting(c.clone()),
            RuleConfiguration::Single(c) => Rule::Single(c.clone()),
        })
    }

    /// Build every rule of a snapshot, in declaration order.
    pub fn build_all(snapshot: &TopologySnapshot) -> Result<Vec<Self>, ConfigurationParseError> {
        let data_sources = snapshot.logical_data_source_names();
        snapshot
            .rules()
            .iter()
            .map(|config| Self::build(config, &data_sources))
            .collect()
    }

    /// Kind tag of this rule.
    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Sharding(_) => RuleKind::Sharding,
            Rule::Encrypt(_) => RuleKind::Encrypt,
            Rule::ReadwriteSplitting(_) => RuleKind::ReadwriteSplitting,
            Rule::Single(_) => RuleKind::Single,
        }
    }
}
