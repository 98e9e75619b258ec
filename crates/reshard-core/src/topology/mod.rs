//! Topology snapshots and the serialized configuration grammar.
//!
//! A [`TopologySnapshot`] describes one schema's data sources and rules at a
//! point in time. Snapshots are built from YAML text, validated on
//! construction, and never shared with live configuration.

pub mod data_node;
pub mod error;
pub mod inline;
pub mod rule_config;
pub mod snapshot;

pub use data_node::DataNode;
pub use error::ConfigurationParseError;
pub use inline::InlineExpression;
pub use rule_config::{
    AlgorithmConfiguration, EncryptColumnConfiguration, EncryptRuleConfiguration,
    EncryptTableConfiguration, Properties, ReadwriteSplittingDataSourceConfiguration,
    ReadwriteSplittingRuleConfiguration, RuleConfiguration, RuleKind, ShardingRuleConfiguration,
    ShardingStrategyConfiguration, ShardingTableConfiguration, SingleRuleConfiguration,
};
pub use snapshot::{DataSourceProperties, TopologySnapshot};
